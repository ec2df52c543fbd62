//! Node identity derived from the host

use sha2::{Digest, Sha256};

use crate::{Error, Result};

/// Stable node ID for this host: hex of the first 16 bytes of SHA-256(hostname)
pub fn default_node_id() -> Result<String> {
    let host = hostname::get()
        .map_err(|e| Error::Internal(format!("unable to read host name: {}", e)))?;
    Ok(node_id_for_host(&host.to_string_lossy()))
}

/// Node ID for a given host name
pub fn node_id_for_host(host: &str) -> String {
    let digest = Sha256::digest(host.as_bytes());
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_is_stable() {
        let a = node_id_for_host("node-a.example");
        assert_eq!(a, node_id_for_host("node-a.example"));
        assert_ne!(a, node_id_for_host("node-b.example"));
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_default_node_id() {
        let id = default_node_id().unwrap();
        assert_eq!(id.len(), 32);
    }
}
