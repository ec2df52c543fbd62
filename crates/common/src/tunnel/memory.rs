//! In-process tunnel controller
//!
//! Same observable semantics as [`super::WireGuardTunnel`] without touching
//! the host. Clones share state, so a test can keep a handle for inspection.

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::debug;

use super::{DeviceIdentity, PeerSpec, TunnelController};
use crate::crypto::generate_wireguard_keypair;
use crate::{Error, Result};

/// State of one fake interface
#[derive(Debug, Clone, Default)]
pub struct InterfaceState {
    pub up: bool,
    pub addresses: Vec<Ipv4Addr>,
    pub routes: Vec<Ipv4Network>,
    pub public_key: Option<String>,
    pub listen_port: u16,
    pub peers: BTreeMap<String, PeerSpec>,
}

#[derive(Debug, Default)]
struct TunnelState {
    interfaces: HashMap<String, InterfaceState>,
    host_addresses: HashMap<String, IpAddr>,
    fixed_public_key: Option<String>,
}

/// Fake tunnel controller
#[derive(Debug, Clone, Default)]
pub struct MemoryTunnel {
    state: Arc<Mutex<TunnelState>>,
}

impl MemoryTunnel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host interface for endpoint resolution
    pub fn with_host_address(self, name: &str, addr: IpAddr) -> Self {
        self.state
            .lock()
            .host_addresses
            .insert(name.to_string(), addr);
        self
    }

    /// Use `public_key` instead of generating one for new devices
    pub fn with_public_key(self, public_key: impl Into<String>) -> Self {
        self.state.lock().fixed_public_key = Some(public_key.into());
        self
    }

    /// Snapshot of an interface, `None` if it does not exist
    pub fn interface(&self, name: &str) -> Option<InterfaceState> {
        self.state.lock().interfaces.get(name).cloned()
    }

    /// Inject a peer directly, bypassing reconciliation
    pub fn insert_peer(&self, name: &str, peer: PeerSpec) -> Result<()> {
        let mut state = self.state.lock();
        let iface = state
            .interfaces
            .get_mut(name)
            .ok_or_else(|| no_device(name))?;
        iface.peers.insert(peer.public_key.clone(), peer);
        Ok(())
    }

    fn with_interface<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut InterfaceState) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        let iface = state
            .interfaces
            .get_mut(name)
            .ok_or_else(|| no_device(name))?;
        f(iface)
    }
}

fn no_device(name: &str) -> Error {
    Error::Tunnel(format!("no such device {}", name))
}

#[async_trait]
impl TunnelController for MemoryTunnel {
    async fn has_interface(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().interfaces.contains_key(name))
    }

    async fn create_interface(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.interfaces.contains_key(name) {
            return Err(Error::Tunnel(format!("device {} already exists", name)));
        }
        state
            .interfaces
            .insert(name.to_string(), InterfaceState::default());
        debug!("Created fake interface {}", name);
        Ok(())
    }

    async fn ensure_keypair_and_listen_port(
        &self,
        name: &str,
        listen_port: u16,
    ) -> Result<DeviceIdentity> {
        let mut state = self.state.lock();
        let fixed = state.fixed_public_key.clone();
        let iface = state
            .interfaces
            .get_mut(name)
            .ok_or_else(|| no_device(name))?;

        if iface.public_key.is_none() {
            iface.public_key =
                Some(fixed.unwrap_or_else(|| generate_wireguard_keypair().public_key));
        }
        if iface.listen_port == 0 {
            if listen_port == 0 {
                return Err(Error::InvalidParameter(
                    "wireguard listen port may not be 0".to_string(),
                ));
            }
            iface.listen_port = listen_port;
        }

        match &iface.public_key {
            Some(public_key) => Ok(DeviceIdentity {
                public_key: public_key.clone(),
                listen_port: iface.listen_port,
            }),
            None => Err(Error::Tunnel(format!(
                "unable to set wireguard key configuration on {}",
                name
            ))),
        }
    }

    async fn assign_address_if_missing(&self, name: &str, ip: Ipv4Addr) -> Result<()> {
        self.with_interface(name, |iface| {
            if !iface.addresses.contains(&ip) {
                iface.addresses.push(ip);
            }
            Ok(())
        })
    }

    async fn bring_up(&self, name: &str) -> Result<()> {
        self.with_interface(name, |iface| {
            iface.up = true;
            Ok(())
        })
    }

    async fn ensure_route(&self, name: &str, cidr: &Ipv4Network) -> Result<()> {
        self.with_interface(name, |iface| {
            if !iface.routes.contains(cidr) {
                iface.routes.push(*cidr);
            }
            Ok(())
        })
    }

    async fn add_peer_if_absent(&self, name: &str, peer: &PeerSpec) -> Result<bool> {
        self.with_interface(name, |iface| {
            if iface.peers.contains_key(&peer.public_key) {
                return Ok(false);
            }
            iface.peers.insert(peer.public_key.clone(), peer.clone());
            Ok(true)
        })
    }

    async fn remove_peer(&self, name: &str, public_key: &str) -> Result<()> {
        self.with_interface(name, |iface| {
            iface.peers.remove(public_key);
            Ok(())
        })
    }

    async fn remove_all_peers(&self, name: &str) -> Result<()> {
        self.with_interface(name, |iface| {
            iface.peers.clear();
            Ok(())
        })
    }

    async fn list_peer_public_keys(&self, name: &str) -> Result<Vec<String>> {
        self.with_interface(name, |iface| Ok(iface.peers.keys().cloned().collect()))
    }

    async fn take_down(&self, name: &str) -> Result<()> {
        self.with_interface(name, |iface| {
            iface.up = false;
            Ok(())
        })
    }

    async fn destroy_interface(&self, name: &str) -> Result<()> {
        self.state
            .lock()
            .interfaces
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| no_device(name))
    }

    async fn interface_address(&self, name: &str) -> Result<Option<IpAddr>> {
        let state = self.state.lock();
        if let Some(addr) = state.host_addresses.get(name) {
            return Ok(Some(*addr));
        }
        Ok(state
            .interfaces
            .get(name)
            .and_then(|iface| iface.addresses.first())
            .map(|ip| IpAddr::V4(*ip)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::host_network;

    fn peer(public_key: &str) -> PeerSpec {
        PeerSpec {
            public_key: public_key.to_string(),
            endpoint: None,
            allowed_ips: vec![host_network(Ipv4Addr::new(10, 37, 0, 2))],
            preshared_key: None,
        }
    }

    #[tokio::test]
    async fn test_keypair_is_stable() {
        let tunnel = MemoryTunnel::new();
        tunnel.create_interface("wg-test").await.unwrap();

        let first = tunnel
            .ensure_keypair_and_listen_port("wg-test", 44444)
            .await
            .unwrap();
        let second = tunnel
            .ensure_keypair_and_listen_port("wg-test", 51820)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.listen_port, 44444);
    }

    #[tokio::test]
    async fn test_zero_listen_port_rejected() {
        let tunnel = MemoryTunnel::new();
        tunnel.create_interface("wg-test").await.unwrap();
        assert!(matches!(
            tunnel.ensure_keypair_and_listen_port("wg-test", 0).await,
            Err(Error::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_peers_keyed_by_public_key() {
        let tunnel = MemoryTunnel::new();
        tunnel.create_interface("wg-test").await.unwrap();

        assert!(tunnel.add_peer_if_absent("wg-test", &peer("k1")).await.unwrap());
        assert!(!tunnel.add_peer_if_absent("wg-test", &peer("k1")).await.unwrap());
        assert!(tunnel.add_peer_if_absent("wg-test", &peer("k2")).await.unwrap());
        assert_eq!(
            tunnel.list_peer_public_keys("wg-test").await.unwrap(),
            vec!["k1", "k2"]
        );

        tunnel.remove_peer("wg-test", "k1").await.unwrap();
        tunnel.remove_peer("wg-test", "k1").await.unwrap();
        assert_eq!(tunnel.list_peer_public_keys("wg-test").await.unwrap(), vec!["k2"]);

        tunnel.remove_all_peers("wg-test").await.unwrap();
        assert!(tunnel.list_peer_public_keys("wg-test").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_device() {
        let tunnel = MemoryTunnel::new();
        assert!(!tunnel.has_interface("wg-test").await.unwrap());
        assert!(tunnel.bring_up("wg-test").await.is_err());
        assert!(tunnel.destroy_interface("wg-test").await.is_err());
        assert_eq!(tunnel.interface_address("wg-test").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_host_address_lookup() {
        let tunnel =
            MemoryTunnel::new().with_host_address("eth0", "192.0.2.10".parse().unwrap());
        assert_eq!(
            tunnel.interface_address("eth0").await.unwrap(),
            Some("192.0.2.10".parse().unwrap())
        );
    }
}
