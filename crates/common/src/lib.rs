//! Automesh Common Library
//!
//! Mesh membership over a shared key/value store: data model, store access,
//! tunnel control and the join/leave/update protocol.

pub mod allocator;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod identity;
pub mod membership;
pub mod store;
pub mod tunnel;
pub mod types;

// Re-export commonly used types
pub use config::{MeshConfig, StoreConfig, TunnelConfig};
pub use directory::MeshDirectory;
pub use error::{Error, Result};
pub use identity::default_node_id;
pub use membership::{JoinOutcome, KeyConflict, Membership, UpdateReport};
pub use store::{KvStore, MemoryStore, VaultStore};
pub use tunnel::{MemoryTunnel, TunnelController, WireGuardTunnel};
pub use types::*;

/// Automesh version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
