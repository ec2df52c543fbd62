//! Tunnel interface control
//!
//! Manages one local WireGuard interface: existence, key material, address,
//! route and peer set. Peers are identified by public key.

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::types::NodeRecord;
use crate::Result;

pub mod memory;
pub mod wireguard;

pub use memory::MemoryTunnel;
pub use wireguard::WireGuardTunnel;

/// Identity of a configured device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceIdentity {
    pub public_key: String,
    pub listen_port: u16,
}

/// Peer to configure on an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSpec {
    pub public_key: String,
    pub endpoint: Option<SocketAddr>,
    pub allowed_ips: Vec<Ipv4Network>,
    pub preshared_key: Option<String>,
}

impl PeerSpec {
    /// Peer for a mesh member, routing exactly its overlay address
    pub fn for_node(record: &NodeRecord) -> Self {
        Self {
            public_key: record.public_key.clone(),
            endpoint: record.endpoint(),
            allowed_ips: vec![record.allowed_ip()],
            preshared_key: None,
        }
    }
}

/// Control plane for a local tunnel interface
#[async_trait]
pub trait TunnelController: Send + Sync {
    /// Whether the interface exists
    async fn has_interface(&self, name: &str) -> Result<bool>;

    /// Create the interface
    async fn create_interface(&self, name: &str) -> Result<()>;

    /// Generate a keypair and set the listen port, each only if unset.
    /// Fails if the device still reports a zero key or port afterwards.
    async fn ensure_keypair_and_listen_port(
        &self,
        name: &str,
        listen_port: u16,
    ) -> Result<DeviceIdentity>;

    /// Assign `ip` to the interface unless already assigned
    async fn assign_address_if_missing(&self, name: &str, ip: Ipv4Addr) -> Result<()>;

    /// Set the interface up
    async fn bring_up(&self, name: &str) -> Result<()>;

    /// Route `cidr` through the interface unless already routed
    async fn ensure_route(&self, name: &str, cidr: &Ipv4Network) -> Result<()>;

    /// Add a peer unless one with the same public key exists. Returns true if added.
    async fn add_peer_if_absent(&self, name: &str, peer: &PeerSpec) -> Result<bool>;

    /// Remove the peer with `public_key`
    async fn remove_peer(&self, name: &str, public_key: &str) -> Result<()>;

    /// Remove every peer
    async fn remove_all_peers(&self, name: &str) -> Result<()>;

    /// Snapshot of the public keys of all configured peers
    async fn list_peer_public_keys(&self, name: &str) -> Result<Vec<String>>;

    /// Set the interface down
    async fn take_down(&self, name: &str) -> Result<()>;

    /// Delete the interface
    async fn destroy_interface(&self, name: &str) -> Result<()>;

    /// First address assigned to a host interface, `None` if it has none or
    /// does not exist
    async fn interface_address(&self, name: &str) -> Result<Option<IpAddr>>;
}
