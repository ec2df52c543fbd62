//! CLI Commands

pub mod create;
pub mod delete;
pub mod join;
pub mod leave;
pub mod nodes;
pub mod update;

use anyhow::Result;
use automesh_common::default_node_id;

/// Node ID from `--id`, falling back to the host-derived ID
pub fn resolve_node_id(id: Option<String>) -> Result<String> {
    match id.filter(|id| !id.trim().is_empty()) {
        Some(id) => Ok(id),
        None => Ok(default_node_id()?),
    }
}
