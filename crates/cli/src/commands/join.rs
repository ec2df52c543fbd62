//! Join Command

use anyhow::{Context, Result};
use automesh_common::{JoinOutcome, Membership};
use clap::Args;
use serde::Serialize;

use super::resolve_node_id;
use crate::output::{print_item, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct JoinArgs {
    /// Mesh name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Node ID, defaults to a hash of the host name
    #[arg(long)]
    pub id: Option<String>,

    /// Endpoint IP address or local interface name peers connect to
    #[arg(short, long)]
    pub endpoint: Option<String>,
}

/// Join result display wrapper
#[derive(Serialize)]
pub struct JoinDisplay {
    pub node_id: String,
    #[serde(flatten)]
    pub outcome: JoinOutcome,
}

impl TableDisplay for JoinDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Node", "Interface", "Overlay IP", "Public Key", "Port", "New", "Peers Added"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.node_id.clone(),
            self.outcome.interface.clone(),
            self.outcome.overlay_ip.to_string(),
            self.outcome.public_key.clone(),
            self.outcome.listen_port.to_string(),
            self.outcome.registered.to_string(),
            self.outcome.peers_added.to_string(),
        ]
    }
}

pub async fn execute(args: JoinArgs, membership: &Membership, format: OutputFormat) -> Result<()> {
    let name = args.name.unwrap_or_default();
    let node_id = resolve_node_id(args.id)?;
    let endpoint = args.endpoint.unwrap_or_default();

    let outcome = membership
        .join(&name, &node_id, &endpoint)
        .await
        .with_context(|| format!("unable to join mesh '{}'", name))?;

    for conflict in &outcome.unresolved_conflicts {
        print_warning(&format!(
            "Nodes {} share public key {}",
            conflict.node_ids.join(", "),
            conflict.public_key
        ));
    }

    print_success(&format!("Joined mesh '{}'", name), format);
    print_item(&JoinDisplay { node_id, outcome }, format);

    Ok(())
}
