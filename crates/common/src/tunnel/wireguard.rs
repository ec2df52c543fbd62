//! WireGuard interface control through `ip` and `wg`
//!
//! Private keys are generated in-process and handed to `wg` through a
//! temporary file so they never show up in a process listing.

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use serde::Deserialize;
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use tempfile::NamedTempFile;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, trace};

use super::{DeviceIdentity, PeerSpec, TunnelController};
use crate::config::TunnelConfig;
use crate::crypto::{generate_wireguard_keypair, is_valid_key};
use crate::types::canonical_cidr;
use crate::{Error, Result};

/// Entry of `ip -j addr show` output
#[derive(Debug, Deserialize)]
struct IpLinkJson {
    #[serde(default)]
    addr_info: Vec<IpAddrInfoJson>,
}

#[derive(Debug, Deserialize)]
struct IpAddrInfoJson {
    family: String,
    local: Option<String>,
}

/// WireGuard controller backed by the system tools
pub struct WireGuardTunnel {
    ip_command: String,
    wg_command: String,
}

impl WireGuardTunnel {
    pub fn new(config: &TunnelConfig) -> Self {
        Self {
            ip_command: config.ip_command.clone(),
            wg_command: config.wg_command.clone(),
        }
    }

    /// Run a command, returning stdout. Failure exit status is an error.
    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let command = format!("{} {}", program, args.join(" "));
        trace!("Running {}", command);

        let output = AsyncCommand::new(program).args(args).output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            return Err(Error::Command { command, stderr });
        }
        if !stderr.is_empty() {
            debug!("{} reported: {}", program, stderr);
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn ip(&self, args: &[&str]) -> Result<String> {
        self.run(&self.ip_command, args).await
    }

    async fn wg(&self, args: &[&str]) -> Result<String> {
        self.run(&self.wg_command, args).await
    }

    /// Single field of `wg show <name> <field>`
    async fn wg_show(&self, name: &str, field: &str) -> Result<String> {
        Ok(self.wg(&["show", name, field]).await?.trim().to_string())
    }

    async fn listen_port(&self, name: &str) -> Result<u16> {
        let raw = self.wg_show(name, "listen-port").await?;
        raw.parse::<u16>()
            .map_err(|_| Error::Tunnel(format!("unexpected listen port {:?} on {}", raw, name)))
    }

    async fn addresses(&self, name: &str) -> Result<Vec<IpAddr>> {
        let raw = self.ip(&["-j", "address", "show", "dev", name]).await?;
        parse_addresses(&raw)
    }
}

#[async_trait]
impl TunnelController for WireGuardTunnel {
    async fn has_interface(&self, name: &str) -> Result<bool> {
        let status = AsyncCommand::new(&self.ip_command)
            .args(["link", "show", "dev", name])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await?;
        Ok(status.success())
    }

    async fn create_interface(&self, name: &str) -> Result<()> {
        self.ip(&["link", "add", "dev", name, "type", "wireguard"]).await?;
        info!("Created interface {}", name);
        Ok(())
    }

    async fn ensure_keypair_and_listen_port(
        &self,
        name: &str,
        listen_port: u16,
    ) -> Result<DeviceIdentity> {
        if !is_set_key(&self.wg_show(name, "private-key").await?) {
            debug!("Private key of {} is empty, generating new key", name);
            let keypair = generate_wireguard_keypair();
            let key_file = secret_file(&keypair.private_key)?;
            let path = key_file.path().to_string_lossy().to_string();
            self.wg(&["set", name, "private-key", &path]).await?;
            debug!("Set private key of {}", name);
        }

        if self.listen_port(name).await? == 0 {
            if listen_port == 0 {
                return Err(Error::InvalidParameter(
                    "wireguard listen port may not be 0".to_string(),
                ));
            }
            self.wg(&["set", name, "listen-port", &listen_port.to_string()])
                .await?;
            debug!("Set listen port of {} to {}", name, listen_port);
        }

        // Read back, a partially applied configuration is an error
        let private_set = is_set_key(&self.wg_show(name, "private-key").await?);
        let public_key = self.wg_show(name, "public-key").await?;
        let port = self.listen_port(name).await?;
        if !private_set || !is_set_key(&public_key) || port == 0 {
            return Err(Error::Tunnel(format!(
                "unable to set wireguard key configuration on {}",
                name
            )));
        }

        trace!("Device {} has public key {}", name, public_key);
        Ok(DeviceIdentity {
            public_key,
            listen_port: port,
        })
    }

    async fn assign_address_if_missing(&self, name: &str, ip: Ipv4Addr) -> Result<()> {
        if self.addresses(name).await?.contains(&IpAddr::V4(ip)) {
            trace!("{} already has {}", name, ip);
            return Ok(());
        }

        self.ip(&["address", "add", &format!("{}/32", ip), "dev", name])
            .await?;

        if !self.addresses(name).await?.contains(&IpAddr::V4(ip)) {
            return Err(Error::Tunnel(format!(
                "unable to add ip address {} to interface {}",
                ip, name
            )));
        }
        info!("Assigned {} to {}", ip, name);
        Ok(())
    }

    async fn bring_up(&self, name: &str) -> Result<()> {
        self.ip(&["link", "set", "up", "dev", name]).await?;
        debug!("Device {} up", name);
        Ok(())
    }

    async fn ensure_route(&self, name: &str, cidr: &Ipv4Network) -> Result<()> {
        let routes = self.ip(&["route", "show", "dev", name]).await?;
        if route_present(&routes, cidr) {
            trace!("Route to {} via {} present", cidr, name);
            return Ok(());
        }

        self.ip(&["route", "add", &canonical_cidr(cidr), "dev", name])
            .await?;
        debug!("Route to {} set via {}", cidr, name);
        Ok(())
    }

    async fn add_peer_if_absent(&self, name: &str, peer: &PeerSpec) -> Result<bool> {
        let existing = self.list_peer_public_keys(name).await?;
        if existing.iter().any(|k| k == &peer.public_key) {
            trace!("Peer {} already present, skipping", peer.public_key);
            return Ok(false);
        }

        let psk_file = match &peer.preshared_key {
            Some(psk) => Some(secret_file(psk)?),
            None => None,
        };
        let psk_path = psk_file
            .as_ref()
            .map(|f| f.path().to_string_lossy().to_string());

        let args = peer_args(name, peer, psk_path.as_deref());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.wg(&args).await?;

        info!("Added peer {} to {}", peer.public_key, name);
        Ok(true)
    }

    async fn remove_peer(&self, name: &str, public_key: &str) -> Result<()> {
        self.wg(&["set", name, "peer", public_key, "remove"]).await?;
        info!("Removed peer {} from {}", public_key, name);
        Ok(())
    }

    async fn remove_all_peers(&self, name: &str) -> Result<()> {
        for public_key in self.list_peer_public_keys(name).await? {
            self.remove_peer(name, &public_key).await?;
        }
        info!("Removed all peers from {}", name);
        Ok(())
    }

    async fn list_peer_public_keys(&self, name: &str) -> Result<Vec<String>> {
        let raw = self.wg(&["show", name, "peers"]).await?;
        Ok(raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn take_down(&self, name: &str) -> Result<()> {
        self.ip(&["link", "set", "down", "dev", name]).await?;
        debug!("Device {} down", name);
        Ok(())
    }

    async fn destroy_interface(&self, name: &str) -> Result<()> {
        self.ip(&["link", "delete", "dev", name, "type", "wireguard"])
            .await?;
        info!("Removed interface {}", name);
        Ok(())
    }

    async fn interface_address(&self, name: &str) -> Result<Option<IpAddr>> {
        match self.addresses(name).await {
            Ok(addrs) => Ok(addrs
                .iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addrs.first())
                .copied()),
            Err(Error::Command { stderr, .. }) => {
                debug!("No interface {}: {}", name, stderr);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// `wg` prints `(none)` for unset keys
fn is_set_key(raw: &str) -> bool {
    is_valid_key(raw.trim())
}

/// Owner-only temporary file holding a key, deleted on drop
fn secret_file(key: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "{}", key)?;
    file.flush()?;
    Ok(file)
}

/// Addresses from `ip -j address show` output, in listed order
fn parse_addresses(raw: &str) -> Result<Vec<IpAddr>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let links: Vec<IpLinkJson> = serde_json::from_str(raw)?;
    Ok(links
        .iter()
        .flat_map(|l| l.addr_info.iter())
        .filter(|a| a.family == "inet" || a.family == "inet6")
        .filter_map(|a| a.local.as_deref())
        .filter_map(|local| local.parse::<IpAddr>().ok())
        .collect())
}

/// Whether `ip route show` output has a route for `cidr`
fn route_present(routes: &str, cidr: &Ipv4Network) -> bool {
    let wanted = canonical_cidr(cidr);
    routes
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .any(|dest| dest == wanted)
}

/// Arguments for `wg set` adding one peer
fn peer_args(name: &str, peer: &PeerSpec, psk_path: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "set".to_string(),
        name.to_string(),
        "peer".to_string(),
        peer.public_key.clone(),
    ];
    if let Some(endpoint) = peer.endpoint {
        args.extend(["endpoint".to_string(), endpoint.to_string()]);
    }
    if !peer.allowed_ips.is_empty() {
        let allowed = peer
            .allowed_ips
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(",");
        args.extend(["allowed-ips".to_string(), allowed]);
    }
    if let Some(path) = psk_path {
        args.extend(["preshared-key".to_string(), path.to_string()]);
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{host_network, parse_mesh_cidr};

    #[test]
    fn test_parse_addresses() {
        let raw = r#"[{"ifindex":2,"ifname":"eth0","flags":["UP"],"addr_info":[
            {"family":"inet6","local":"fe80::1","prefixlen":64},
            {"family":"inet","local":"192.0.2.10","prefixlen":24}
        ]}]"#;
        let addrs = parse_addresses(raw).unwrap();
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[1], "192.0.2.10".parse::<IpAddr>().unwrap());

        assert!(parse_addresses("").unwrap().is_empty());
        assert!(parse_addresses(r#"[{"ifname":"wg-test"}]"#).unwrap().is_empty());
        assert!(parse_addresses("not json").is_err());
    }

    #[test]
    fn test_route_present() {
        let cidr = parse_mesh_cidr("10.37.0.0/16").unwrap();
        assert!(route_present("10.37.0.0/16 scope link \n", &cidr));
        assert!(route_present(
            "10.99.0.0/16 scope link\n10.37.0.0/16 scope link\n",
            &cidr
        ));
        assert!(!route_present("", &cidr));
        assert!(!route_present("10.37.0.0/24 scope link", &cidr));
    }

    #[test]
    fn test_peer_args() {
        let peer = PeerSpec {
            public_key: "KEY".to_string(),
            endpoint: Some("1.2.3.4:44444".parse().unwrap()),
            allowed_ips: vec![host_network("10.37.1.2".parse().unwrap())],
            preshared_key: None,
        };
        assert_eq!(
            peer_args("wg-test", &peer, None),
            vec![
                "set", "wg-test", "peer", "KEY", "endpoint", "1.2.3.4:44444",
                "allowed-ips", "10.37.1.2/32"
            ]
        );

        let unreachable = PeerSpec {
            endpoint: None,
            ..peer
        };
        let args = peer_args("wg-test", &unreachable, Some("/tmp/psk"));
        assert!(!args.contains(&"endpoint".to_string()));
        assert_eq!(&args[args.len() - 2..], ["preshared-key", "/tmp/psk"]);
    }

    #[test]
    fn test_unset_key_output() {
        assert!(!is_set_key("(none)"));
        assert!(!is_set_key(""));
        assert!(is_set_key(&format!(
            "{}\n",
            generate_wireguard_keypair().public_key
        )));
    }

    #[test]
    fn test_secret_file_contents() {
        let file = secret_file("abc").unwrap();
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "abc\n");
    }
}
