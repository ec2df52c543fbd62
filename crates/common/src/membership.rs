//! Mesh membership protocol
//!
//! Every operation infers its state from the directory and the local tunnel
//! device on each run, so all of them are safe to re-run after a crash. Each
//! node only ever writes its own record; reconciliation decisions are taken
//! from a freshly read snapshot every pass.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::allocator::allocate_ip;
use crate::config::MeshConfig;
use crate::directory::MeshDirectory;
use crate::store::KvStore;
use crate::tunnel::{PeerSpec, TunnelController};
use crate::types::{parse_mesh_cidr, MeshInfo, NodeMap, NodeRecord};
use crate::{Error, Result};

/// Bounds of the update poll interval, in seconds
const MIN_POLL_SECS: u64 = 5;
const MAX_POLL_SECS: u64 = 60;

/// Node IDs publishing the same public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyConflict {
    pub public_key: String,
    pub node_ids: Vec<String>,
}

/// Result of a successful join
#[derive(Debug, Clone, Serialize)]
pub struct JoinOutcome {
    pub interface: String,
    pub overlay_ip: Ipv4Addr,
    pub public_key: String,
    pub listen_port: u16,
    /// True when this run wrote a new record, false when an existing one was adopted
    pub registered: bool,
    pub peers_added: usize,
    /// Conflicts between other members, left for an operator to resolve
    pub unresolved_conflicts: Vec<KeyConflict>,
}

/// Totals over all passes of an update run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub passes: usize,
    pub peers_added: usize,
    pub peers_removed: usize,
}

/// Membership operations for the local node
pub struct Membership {
    directory: MeshDirectory,
    tunnel: Arc<dyn TunnelController>,
    config: MeshConfig,
}

impl Membership {
    pub fn new(
        store: Arc<dyn KvStore>,
        tunnel: Arc<dyn TunnelController>,
        config: MeshConfig,
    ) -> Self {
        Self {
            directory: MeshDirectory::new(store, config.store.base_path.clone()),
            tunnel,
            config,
        }
    }

    pub fn directory(&self) -> &MeshDirectory {
        &self.directory
    }

    /// Local interface name used for `mesh`
    pub fn interface_name(&self, mesh: &str) -> String {
        self.config.tunnel.interface_name(mesh)
    }

    /// Create a mesh. Returns false if it already existed.
    pub async fn create(&self, name: &str, cidr: &str) -> Result<bool> {
        require_segment("name", name)?;
        let network = parse_mesh_cidr(cidr)?;

        self.directory
            .create_meeting_point(&MeshInfo::new(name, network))
            .await
    }

    /// Delete a mesh and all its node records. Returns false if not found.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        require_segment("name", name)?;
        self.directory.delete_mesh(name).await
    }

    /// Meeting point and members of a mesh
    pub async fn nodes(&self, name: &str) -> Result<(MeshInfo, NodeMap)> {
        require_segment("name", name)?;
        let info = self
            .directory
            .read_meeting_point(name)
            .await?
            .ok_or_else(|| Error::MeshNotFound(name.to_string()))?;
        let nodes = self.directory.list_nodes(name).await?;
        Ok((info, nodes))
    }

    /// Join `name` as `node_id`, reachable at `endpoint`
    ///
    /// `endpoint` is either a literal IP address or the name of a local
    /// interface whose first address is used.
    pub async fn join(&self, name: &str, node_id: &str, endpoint: &str) -> Result<JoinOutcome> {
        require_segment("name", name)?;
        require_segment("id", node_id)?;
        require("endpoint", endpoint)?;

        let endpoint_ip = self.resolve_endpoint(endpoint).await?;
        debug!("Using endpoint {} for node {}", endpoint_ip, node_id);

        let mesh = self
            .directory
            .read_meeting_point(name)
            .await?
            .ok_or_else(|| Error::MeshNotFound(name.to_string()))?;
        let nodes = self.directory.list_nodes(name).await?;
        trace!("Mesh {} has {} members before join", name, nodes.len());

        let interface = self.interface_name(name);
        if !self.tunnel.has_interface(&interface).await? {
            self.tunnel.create_interface(&interface).await?;
        }
        let identity = self
            .tunnel
            .ensure_keypair_and_listen_port(&interface, self.config.tunnel.default_listen_port)
            .await?;

        let (overlay_ip, registered) = match nodes.get(node_id) {
            Some(existing) => {
                if existing.public_key != identity.public_key {
                    warn!(
                        "Node {} is registered with public key {} but the local device has {}",
                        node_id, existing.public_key, identity.public_key
                    );
                }
                debug!("Node {} already registered, keeping {}", node_id, existing.overlay_ip);
                (existing.overlay_ip, false)
            }
            None => {
                let taken: HashSet<Ipv4Addr> = nodes.values().map(|n| n.overlay_ip).collect();
                let ip = allocate_ip(&mesh.network_cidr, &taken, &mut rand::thread_rng())?;

                // No endpoint yet, peers must not dial an interface that is not ready
                let record = NodeRecord {
                    node_id: node_id.to_string(),
                    overlay_ip: ip,
                    public_key: identity.public_key.clone(),
                    external_endpoint: String::new(),
                    listen_port: identity.listen_port,
                };
                self.directory.write_node(name, &record).await?;
                info!("Registered node {} in mesh {} with {}", node_id, name, ip);
                (ip, true)
            }
        };

        let nodes = self.directory.list_nodes(name).await?;
        let mut unresolved_conflicts = Vec::new();
        for conflict in find_conflicts(&nodes) {
            if conflict.node_ids.iter().any(|id| id == node_id) {
                return Err(self.resolve_own_conflict(name, node_id, registered, conflict).await);
            }
            warn!(
                "Nodes {} share public key {}, manual resolution required",
                conflict.node_ids.join(", "),
                conflict.public_key
            );
            unresolved_conflicts.push(conflict);
        }

        self.tunnel
            .assign_address_if_missing(&interface, overlay_ip)
            .await?;
        self.directory
            .update_endpoint(name, node_id, &endpoint_ip.to_string(), identity.listen_port)
            .await?;
        info!(
            "Published endpoint {}:{} for node {}",
            endpoint_ip, identity.listen_port, node_id
        );

        let peers_added = self.add_peers(&interface, node_id, &nodes).await?;

        self.tunnel.bring_up(&interface).await?;
        self.tunnel
            .ensure_route(&interface, &mesh.network_cidr)
            .await?;
        info!("Joined mesh {} as {} on {}", name, overlay_ip, interface);

        Ok(JoinOutcome {
            interface,
            overlay_ip,
            public_key: identity.public_key,
            listen_port: identity.listen_port,
            registered,
            peers_added,
            unresolved_conflicts,
        })
    }

    /// Leave `name`: deregister, then tear down the local interface
    ///
    /// The interface is left intact when deregistration fails.
    pub async fn leave(&self, name: &str, node_id: &str) -> Result<()> {
        require_segment("name", name)?;
        require_segment("id", node_id)?;

        let interface = self.require_interface(name).await?;

        self.directory.delete_node(name, node_id).await?;
        info!("Removed node {} from mesh {}", node_id, name);

        self.tunnel.remove_all_peers(&interface).await?;
        self.tunnel.take_down(&interface).await?;
        self.tunnel.destroy_interface(&interface).await?;
        info!("Left mesh {}", name);
        Ok(())
    }

    /// Reconcile the local peer set with the directory until `wait_secs` have
    /// passed. Runs at least one pass; zero means exactly one pass.
    pub async fn update(&self, name: &str, node_id: &str, wait_secs: u64) -> Result<UpdateReport> {
        require_segment("name", name)?;
        require_segment("id", node_id)?;

        if self.directory.read_meeting_point(name).await?.is_none() {
            return Err(Error::MeshNotFound(name.to_string()));
        }
        let interface = self.require_interface(name).await?;
        let interval = poll_interval(wait_secs);
        // Beyond what the clock can represent means no deadline at all
        let deadline = Instant::now().checked_add(Duration::from_secs(wait_secs));
        debug!(
            "Updating {} for {}s, polling every {}s",
            interface,
            wait_secs,
            interval.as_secs()
        );

        let mut report = UpdateReport::default();
        loop {
            let nodes = self.directory.list_nodes(name).await?;
            report.peers_added += self.add_peers(&interface, node_id, &nodes).await?;
            report.peers_removed += self.prune_peers(&interface, node_id, &nodes).await?;
            report.passes += 1;

            if wait_secs == 0 {
                break;
            }
            tokio::time::sleep(interval).await;
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
        }

        info!(
            "Update of {} done after {} passes (+{} -{})",
            interface, report.passes, report.peers_added, report.peers_removed
        );
        Ok(report)
    }

    async fn resolve_endpoint(&self, endpoint: &str) -> Result<IpAddr> {
        if let Ok(ip) = IpAddr::from_str(endpoint) {
            return Ok(ip);
        }
        self.tunnel
            .interface_address(endpoint)
            .await?
            .ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "endpoint {} is neither an IP address nor an interface with an address",
                    endpoint
                ))
            })
    }

    async fn require_interface(&self, name: &str) -> Result<String> {
        let interface = self.interface_name(name);
        if !self.tunnel.has_interface(&interface).await? {
            return Err(Error::NotJoined(interface));
        }
        Ok(interface)
    }

    /// A conflict involving this node: a record written in this run is
    /// withdrawn, an established one is left for an operator
    async fn resolve_own_conflict(
        &self,
        name: &str,
        node_id: &str,
        registered: bool,
        conflict: KeyConflict,
    ) -> Error {
        let other_node_id = conflict
            .node_ids
            .iter()
            .find(|id| id.as_str() != node_id)
            .cloned()
            .unwrap_or_default();

        if registered {
            warn!(
                "Public key of node {} already used by {}, removing own record",
                node_id, other_node_id
            );
            if let Err(e) = self.directory.delete_node(name, node_id).await {
                return e;
            }
        } else {
            warn!(
                "Public key of node {} also used by {}, manual resolution required",
                node_id, other_node_id
            );
        }

        Error::Conflict {
            node_id: node_id.to_string(),
            other_node_id,
            evicted: registered,
        }
    }

    /// Add every member except self as a peer. Returns the number added.
    async fn add_peers(&self, interface: &str, node_id: &str, nodes: &NodeMap) -> Result<usize> {
        let mut added = 0;
        for (id, record) in nodes.iter().filter(|(id, _)| id.as_str() != node_id) {
            if self
                .tunnel
                .add_peer_if_absent(interface, &PeerSpec::for_node(record))
                .await?
            {
                debug!("Added peer {} ({})", id, record.overlay_ip);
                added += 1;
            }
        }
        Ok(added)
    }

    /// Remove peers whose key no other member publishes. Returns the number removed.
    async fn prune_peers(&self, interface: &str, node_id: &str, nodes: &NodeMap) -> Result<usize> {
        let wanted: HashSet<&str> = nodes
            .iter()
            .filter(|(id, _)| id.as_str() != node_id)
            .map(|(_, record)| record.public_key.as_str())
            .collect();

        let mut removed = 0;
        for public_key in self.tunnel.list_peer_public_keys(interface).await? {
            if !wanted.contains(public_key.as_str()) {
                self.tunnel.remove_peer(interface, &public_key).await?;
                debug!("Removed stale peer {}", public_key);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Poll interval for an update run of `wait_secs`
pub fn poll_interval(wait_secs: u64) -> Duration {
    Duration::from_secs((wait_secs / 10).clamp(MIN_POLL_SECS, MAX_POLL_SECS))
}

/// Groups of node IDs sharing a public key, in node ID order
pub fn find_conflicts(nodes: &NodeMap) -> Vec<KeyConflict> {
    let mut by_key: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (id, record) in nodes {
        by_key
            .entry(record.public_key.as_str())
            .or_default()
            .push(id.clone());
    }

    by_key
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(key, node_ids)| KeyConflict {
            public_key: key.to_string(),
            node_ids,
        })
        .collect()
}

fn require(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::MissingParameter(what.to_string()));
    }
    Ok(())
}

/// Mesh names and node IDs are single store path segments
fn require_segment(what: &str, value: &str) -> Result<()> {
    require(what, value)?;
    if value.contains('/') || value == "." || value == ".." {
        return Err(Error::InvalidParameter(format!(
            "{} {:?} must not contain '/' or be a relative path",
            what, value
        )));
    }
    Ok(())
}
