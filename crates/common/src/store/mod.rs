//! Coordination store access
//!
//! A hierarchical key/value namespace. Paths are logical (`<base>/<mesh>/...`);
//! backends map them onto their own layout.

use async_trait::async_trait;

use crate::types::Payload;
use crate::Result;

pub mod memory;
pub mod vault;

pub use memory::MemoryStore;
pub use vault::VaultStore;

/// Key/value store interface consumed by the mesh directory
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read the record at `path`, `None` when absent
    async fn read(&self, path: &str) -> Result<Option<Payload>>;

    /// Replace the record at `path`
    async fn write(&self, path: &str, data: Payload) -> Result<()>;

    /// Delete the record at `path`, deleting an absent record is not an error
    async fn delete(&self, path: &str) -> Result<()>;

    /// Names of the immediate children under `path`
    async fn list(&self, path: &str) -> Result<Vec<String>>;
}

/// Join path segments with single slashes
pub fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
