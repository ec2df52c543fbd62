//! Nodes Command

use anyhow::{Context, Result};
use automesh_common::{canonical_cidr, Membership, NodeRecord};
use clap::Args;
use serde::Serialize;

use crate::output::{print_info, print_list, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct NodesArgs {
    /// Mesh name
    #[arg(short, long)]
    pub name: Option<String>,
}

/// Node display wrapper for serialization
#[derive(Serialize)]
pub struct NodeDisplay {
    pub node_id: String,
    pub overlay_ip: String,
    pub public_key: String,
    pub endpoint: String,
    pub listen_port: u16,
}

impl From<NodeRecord> for NodeDisplay {
    fn from(record: NodeRecord) -> Self {
        Self {
            node_id: record.node_id,
            overlay_ip: record.overlay_ip.to_string(),
            public_key: record.public_key,
            endpoint: record.external_endpoint,
            listen_port: record.listen_port,
        }
    }
}

impl TableDisplay for NodeDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Node", "Overlay IP", "Public Key", "Endpoint", "Port"]
    }

    fn row(&self) -> Vec<String> {
        let endpoint = if self.endpoint.is_empty() {
            "-".to_string()
        } else {
            self.endpoint.clone()
        };
        vec![
            self.node_id.clone(),
            self.overlay_ip.clone(),
            self.public_key.clone(),
            endpoint,
            self.listen_port.to_string(),
        ]
    }
}

pub async fn execute(args: NodesArgs, membership: &Membership, format: OutputFormat) -> Result<()> {
    let name = args.name.unwrap_or_default();
    let (info, nodes) = membership
        .nodes(&name)
        .await
        .with_context(|| format!("unable to list mesh '{}'", name))?;

    print_info(
        &format!("Mesh '{}' ({})", info.name, canonical_cidr(&info.network_cidr)),
        format,
    );
    let displays: Vec<NodeDisplay> = nodes.into_values().map(NodeDisplay::from).collect();
    print_list(&displays, format);

    Ok(())
}
