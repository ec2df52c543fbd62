//! Core types for Automesh
//!
//! The coordination store holds loosely typed JSON maps. Everything read from
//! it is decoded into the structs below right away and validated, so the rest
//! of the crate never touches raw payloads.

use ipnetwork::Ipv4Network;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

use crate::{crypto, Error, Result};

/// Raw record payload as stored in the coordination store
pub type Payload = Map<String, Value>;

/// Identifies a mesh: its name and overlay address block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshInfo {
    pub name: String,
    #[serde(
        rename = "network",
        serialize_with = "serialize_network",
        deserialize_with = "deserialize_network"
    )]
    pub network_cidr: Ipv4Network,
}

/// Meeting point envelope, the mesh info is stored as an embedded JSON string
#[derive(Debug, Serialize, Deserialize)]
struct MeetingPointPayload {
    meshinfo: String,
}

impl MeshInfo {
    pub fn new(name: impl Into<String>, network_cidr: Ipv4Network) -> Self {
        Self {
            name: name.into(),
            network_cidr,
        }
    }

    /// Encode as a meeting point payload
    pub fn to_payload(&self) -> Result<Payload> {
        let envelope = MeetingPointPayload {
            meshinfo: serde_json::to_string(self)?,
        };
        into_payload(&envelope)
    }

    /// Decode a meeting point payload read from `path`
    pub fn decode(path: &str, payload: Payload) -> Result<Self> {
        let envelope: MeetingPointPayload = serde_json::from_value(Value::Object(payload))
            .map_err(|e| malformed(path, e))?;
        serde_json::from_str(&envelope.meshinfo).map_err(|e| malformed(path, e))
    }
}

/// One mesh member as published in the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(rename = "nodeID")]
    pub node_id: String,

    #[serde(rename = "wgip")]
    pub overlay_ip: Ipv4Addr,

    #[serde(rename = "pubkey")]
    pub public_key: String,

    /// Empty until the node's interface is ready to be dialed
    #[serde(rename = "endpointIP", default)]
    pub external_endpoint: String,

    #[serde(rename = "endpointPort", deserialize_with = "deserialize_port")]
    pub listen_port: u16,
}

impl NodeRecord {
    /// Encode as a node payload
    pub fn to_payload(&self) -> Result<Payload> {
        into_payload(self)
    }

    /// Decode and validate a node payload read from `path`
    pub fn decode(path: &str, payload: Payload) -> Result<Self> {
        let record: NodeRecord =
            serde_json::from_value(Value::Object(payload)).map_err(|e| malformed(path, e))?;

        if record.node_id.is_empty() {
            return Err(malformed(path, "empty nodeID"));
        }
        if !crypto::is_valid_key(&record.public_key) {
            return Err(malformed(path, "pubkey is not a 32 byte base64 key"));
        }

        Ok(record)
    }

    /// True once the node has published a reachable endpoint
    pub fn is_reachable(&self) -> bool {
        !self.external_endpoint.is_empty()
    }

    /// Socket address peers should dial, if one has been published
    pub fn endpoint(&self) -> Option<SocketAddr> {
        if !self.is_reachable() {
            return None;
        }
        if let Ok(addr) = SocketAddr::from_str(&self.external_endpoint) {
            return Some(addr);
        }
        IpAddr::from_str(&self.external_endpoint)
            .ok()
            .map(|ip| SocketAddr::new(ip, self.listen_port))
    }

    /// Allowed IP for this node as a peer: exactly its overlay address
    pub fn allowed_ip(&self) -> Ipv4Network {
        host_network(self.overlay_ip)
    }
}

/// All members of a mesh keyed by node ID
pub type NodeMap = BTreeMap<String, NodeRecord>;

/// Single-host network for `ip`
pub fn host_network(ip: Ipv4Addr) -> Ipv4Network {
    Ipv4Network::from(ip)
}

/// Parse and validate a mesh CIDR
///
/// Prefixes longer than /30 leave no host addresses to allocate and are rejected.
pub fn parse_mesh_cidr(cidr: &str) -> Result<Ipv4Network> {
    let cidr = cidr.trim();
    if cidr.is_empty() {
        return Err(Error::InvalidCidr("empty network range".to_string()));
    }
    if !cidr.contains('/') {
        return Err(Error::InvalidCidr(format!("{} has no prefix length", cidr)));
    }
    let network = Ipv4Network::from_str(cidr)?;
    if network.prefix() > 30 {
        return Err(Error::InvalidCidr(format!(
            "{} has no usable host addresses",
            cidr
        )));
    }
    Ok(network)
}

/// Canonical `a.b.c.d/len` form using the network address
pub fn canonical_cidr(network: &Ipv4Network) -> String {
    format!("{}/{}", network.network(), network.prefix())
}

fn into_payload<T: Serialize>(value: &T) -> Result<Payload> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Internal(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

fn malformed(path: &str, reason: impl std::fmt::Display) -> Error {
    Error::MalformedRecord {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn serialize_network<S: Serializer>(
    network: &Ipv4Network,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(&network.to_string())
}

fn deserialize_network<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Ipv4Network, D::Error> {
    let raw = String::deserialize(d)?;
    parse_mesh_cidr(&raw).map_err(de::Error::custom)
}

/// Ports have been written both as JSON numbers and as decimal strings
fn deserialize_port<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u64),
        Text(String),
    }

    match PortRepr::deserialize(d)? {
        PortRepr::Number(n) => u16::try_from(n)
            .map_err(|_| de::Error::custom(format!("port {} out of range", n))),
        PortRepr::Text(s) => s
            .trim()
            .parse::<u16>()
            .map_err(|e| de::Error::custom(format!("port {:?}: {}", s, e))),
    }
}
