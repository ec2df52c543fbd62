//! Update Command

use anyhow::{Context, Result};
use automesh_common::{Membership, UpdateReport};
use clap::Args;
use serde::Serialize;

use super::resolve_node_id;
use crate::output::{print_item, OutputFormat, TableDisplay};

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Mesh name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Node ID, defaults to a hash of the host name
    #[arg(long)]
    pub id: Option<String>,

    /// Keep reconciling for this many seconds, 0 runs a single pass
    #[arg(short, long, default_value = "0")]
    pub wait: u64,
}

/// Update result display wrapper
#[derive(Serialize)]
pub struct UpdateDisplay {
    pub mesh: String,
    #[serde(flatten)]
    pub report: UpdateReport,
}

impl TableDisplay for UpdateDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Mesh", "Passes", "Peers Added", "Peers Removed"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.mesh.clone(),
            self.report.passes.to_string(),
            self.report.peers_added.to_string(),
            self.report.peers_removed.to_string(),
        ]
    }
}

pub async fn execute(
    args: UpdateArgs,
    membership: &Membership,
    format: OutputFormat,
) -> Result<()> {
    let name = args.name.unwrap_or_default();
    let node_id = resolve_node_id(args.id)?;

    let report = membership
        .update(&name, &node_id, args.wait)
        .await
        .with_context(|| format!("unable to update mesh '{}'", name))?;

    print_item(&UpdateDisplay { mesh: name, report }, format);

    Ok(())
}
