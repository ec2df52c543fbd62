//! Mesh configuration
//!
//! Built once at process start and passed down by reference.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Linux limits interface names to IFNAMSIZ - 1 bytes
const MAX_INTERFACE_NAME: usize = 15;

/// Hex digits of the mesh name hash kept in shortened interface names
const NAME_HASH_LEN: usize = 6;

/// Top level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Coordination store configuration
    pub store: StoreConfig,

    /// Tunnel interface configuration
    pub tunnel: TunnelConfig,
}

/// Coordination store (Vault KV v2) configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store address, e.g. `http://127.0.0.1:8200`
    pub address: String,

    /// Access token, absent when an agent injects credentials
    pub token: Option<String>,

    /// Mount path of the KV version 2 engine
    pub engine_path: String,

    /// Namespace under the engine holding all meshes
    pub base_path: String,

    /// HTTP timeout in seconds
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8200".to_string(),
            token: None,
            engine_path: "secret".to_string(),
            base_path: "wgvam".to_string(),
            timeout_secs: 10,
        }
    }
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("address", &self.address)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("engine_path", &self.engine_path)
            .field("base_path", &self.base_path)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Tunnel interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// UDP port used when the device has none configured yet
    pub default_listen_port: u16,

    /// Path to the `ip` binary
    pub ip_command: String,

    /// Path to the `wg` binary
    pub wg_command: String,

    /// Prefix for derived interface names
    pub interface_prefix: String,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            default_listen_port: 51820,
            ip_command: "ip".to_string(),
            wg_command: "wg".to_string(),
            interface_prefix: "wg-".to_string(),
        }
    }
}

impl TunnelConfig {
    /// Interface name for a mesh, stable across runs
    ///
    /// Names that do not fit are shortened and tagged with a hash of the full
    /// mesh name, so distinct meshes never share an interface.
    pub fn interface_name(&self, mesh_name: &str) -> String {
        let mut name = format!("{}{}", self.interface_prefix, mesh_name);
        if name.len() <= MAX_INTERFACE_NAME {
            return name;
        }

        let digest = hex::encode(Sha256::digest(mesh_name.as_bytes()));
        let tag = format!("-{}", &digest[..NAME_HASH_LEN]);
        let mut cut = MAX_INTERFACE_NAME - tag.len();
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
        name.push_str(&tag);
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MeshConfig::default();
        assert_eq!(config.store.engine_path, "secret");
        assert_eq!(config.store.base_path, "wgvam");
        assert!(config.store.token.is_none());
        assert_eq!(config.tunnel.default_listen_port, 51820);
    }

    #[test]
    fn test_interface_name() {
        let tunnel = TunnelConfig::default();
        assert_eq!(tunnel.interface_name("test"), "wg-test");
        assert_eq!(tunnel.interface_name("a-very-long-mesh-name"), "wg-a-ver-c9bfaa");
    }

    #[test]
    fn test_long_mesh_names_get_distinct_interfaces() {
        let tunnel = TunnelConfig::default();
        let eu1 = tunnel.interface_name("production-eu1");
        let eu2 = tunnel.interface_name("production-eu2");

        assert_eq!(eu1, "wg-produ-bb5629");
        assert_eq!(eu2, "wg-produ-ca6b56");
        assert_ne!(eu1, eu2);
        assert_eq!(eu1, tunnel.interface_name("production-eu1"));
        assert!(tunnel.interface_name("ünïcödé-mesh-näme").len() <= 15);
    }

    #[test]
    fn test_token_redacted() {
        let store = StoreConfig {
            token: Some("s.secret".to_string()),
            ..Default::default()
        };
        let dump = format!("{:?}", store);
        assert!(!dump.contains("s.secret"));
        assert!(dump.contains("<redacted>"));
    }
}
