//! Mesh directory
//!
//! Typed view over the coordination store: one meeting point per mesh at
//! `<base>/<mesh>/mp` and one record per member at `<base>/<mesh>/nodes/<id>`.

use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::store::{join_path, KvStore};
use crate::types::{MeshInfo, NodeMap, NodeRecord};
use crate::{Error, Result};

/// Directory of meshes and their members
#[derive(Clone)]
pub struct MeshDirectory {
    store: Arc<dyn KvStore>,
    base_path: String,
}

impl MeshDirectory {
    pub fn new(store: Arc<dyn KvStore>, base_path: impl Into<String>) -> Self {
        Self {
            store,
            base_path: base_path.into(),
        }
    }

    /// Path of a mesh's meeting point
    pub fn meeting_point_path(&self, mesh: &str) -> String {
        join_path(&[&self.base_path, mesh, "mp"])
    }

    /// Path of the folder holding a mesh's node records
    pub fn nodes_path(&self, mesh: &str) -> String {
        join_path(&[&self.base_path, mesh, "nodes"])
    }

    /// Path of a single node record
    pub fn node_path(&self, mesh: &str, node_id: &str) -> String {
        join_path(&[&self.base_path, mesh, "nodes", node_id])
    }

    /// Write the meeting point unless one exists. Returns true if created.
    ///
    /// An existing meeting point is never overwritten, even with another CIDR.
    pub async fn create_meeting_point(&self, info: &MeshInfo) -> Result<bool> {
        let path = self.meeting_point_path(&info.name);
        trace!("Looking for meeting point at {}", path);

        if let Some(existing) = self.read_meeting_point(&info.name).await? {
            debug!(
                "Meeting point for {} already present with {}",
                existing.name, existing.network_cidr
            );
            return Ok(false);
        }

        self.store.write(&path, info.to_payload()?).await?;
        info!("Created meeting point for mesh {} ({})", info.name, info.network_cidr);
        Ok(true)
    }

    /// Read a mesh's meeting point, `None` if the mesh does not exist
    pub async fn read_meeting_point(&self, mesh: &str) -> Result<Option<MeshInfo>> {
        let path = self.meeting_point_path(mesh);
        match self.store.read(&path).await? {
            Some(payload) => MeshInfo::decode(&path, payload).map(Some),
            None => Ok(None),
        }
    }

    /// Delete every node record, then the meeting point. Returns false if absent.
    ///
    /// Not atomic: a failure part way leaves the remaining records in place and
    /// re-running the delete finishes the job.
    pub async fn delete_mesh(&self, mesh: &str) -> Result<bool> {
        let path = self.meeting_point_path(mesh);
        if self.store.read(&path).await?.is_none() {
            debug!("No meeting point for mesh {}", mesh);
            return Ok(false);
        }

        let node_ids = self.store.list(&self.nodes_path(mesh)).await?;
        debug!("Deleting {} node records of mesh {}", node_ids.len(), mesh);
        for node_id in &node_ids {
            self.delete_node(mesh, node_id).await?;
        }

        self.store.delete(&path).await?;
        info!("Deleted mesh {}", mesh);
        Ok(true)
    }

    /// Read all node records of a mesh
    ///
    /// Any record that fails to decode fails the whole listing, a partial
    /// membership view would lead to wrong reconciliation decisions.
    pub async fn list_nodes(&self, mesh: &str) -> Result<NodeMap> {
        let node_ids = self.store.list(&self.nodes_path(mesh)).await?;

        let mut nodes = NodeMap::new();
        for node_id in node_ids {
            let path = self.node_path(mesh, &node_id);
            // Listed but gone by now: deleted between list and read
            let Some(payload) = self.store.read(&path).await? else {
                debug!("Node {} vanished while listing", node_id);
                continue;
            };
            let record = NodeRecord::decode(&path, payload)?;
            nodes.insert(node_id, record);
        }

        trace!("Found {} nodes in mesh {}", nodes.len(), mesh);
        Ok(nodes)
    }

    /// Replace a node's record
    pub async fn write_node(&self, mesh: &str, record: &NodeRecord) -> Result<()> {
        let path = self.node_path(mesh, &record.node_id);
        trace!("Writing node record {}", path);
        self.store.write(&path, record.to_payload()?).await
    }

    /// Read a single node record
    pub async fn read_node(&self, mesh: &str, node_id: &str) -> Result<NodeRecord> {
        let path = self.node_path(mesh, node_id);
        let payload = self.store.read(&path).await?.ok_or_else(|| Error::NodeNotFound {
            mesh: mesh.to_string(),
            node_id: node_id.to_string(),
        })?;
        NodeRecord::decode(&path, payload)
    }

    /// Delete a node's record
    pub async fn delete_node(&self, mesh: &str, node_id: &str) -> Result<()> {
        self.store.delete(&self.node_path(mesh, node_id)).await
    }

    /// Publish a node's reachability, leaving the other fields as stored
    ///
    /// Read-modify-write without locking: only the owning node writes its record.
    pub async fn update_endpoint(
        &self,
        mesh: &str,
        node_id: &str,
        endpoint: &str,
        listen_port: u16,
    ) -> Result<()> {
        let mut record = self.read_node(mesh, node_id).await?;
        record.external_endpoint = endpoint.to_string();
        record.listen_port = listen_port;
        self.write_node(mesh, &record).await
    }
}
