//! Error types for Automesh

use thiserror::Error;

/// Result type alias using Automesh Error
pub type Result<T> = std::result::Result<T, Error>;

/// Automesh error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Malformed record at {path}: {reason}")]
    MalformedRecord { path: String, reason: String },

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid CIDR: {0}")]
    InvalidCidr(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Mesh not found: {0}")]
    MeshNotFound(String),

    #[error("Node {node_id} not found in mesh {mesh}")]
    NodeNotFound { mesh: String, node_id: String },

    #[error("Public key of node {node_id} conflicts with node {other_node_id}{}", conflict_suffix(.evicted))]
    Conflict {
        node_id: String,
        other_node_id: String,
        evicted: bool,
    },

    #[error("Interface {0} not present, must have joined first")]
    NotJoined(String),

    #[error("Tunnel error: {0}")]
    Tunnel(String),

    #[error("Command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Address allocation failed: {0}")]
    AddressAllocation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn conflict_suffix(evicted: &bool) -> &'static str {
    if *evicted {
        ", removed own record"
    } else {
        ", manual resolution required"
    }
}

impl From<ipnetwork::IpNetworkError> for Error {
    fn from(e: ipnetwork::IpNetworkError) -> Self {
        Error::InvalidCidr(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message() {
        let e = Error::Conflict {
            node_id: "b".to_string(),
            other_node_id: "a".to_string(),
            evicted: true,
        };
        assert_eq!(
            e.to_string(),
            "Public key of node b conflicts with node a, removed own record"
        );

        let e = Error::Conflict {
            node_id: "b".to_string(),
            other_node_id: "a".to_string(),
            evicted: false,
        };
        assert!(e.to_string().ends_with("manual resolution required"));
    }

    #[test]
    fn test_cidr_parse_error_maps_to_invalid_cidr() {
        let parse_error = "10.0.0.0/40".parse::<ipnetwork::Ipv4Network>().unwrap_err();
        assert!(matches!(Error::from(parse_error), Error::InvalidCidr(_)));
    }
}
