//! Leave Command

use anyhow::{Context, Result};
use automesh_common::Membership;
use clap::Args;

use super::resolve_node_id;
use crate::output::{print_success, OutputFormat};

#[derive(Args, Debug)]
pub struct LeaveArgs {
    /// Mesh name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Node ID, defaults to a hash of the host name
    #[arg(long)]
    pub id: Option<String>,
}

pub async fn execute(args: LeaveArgs, membership: &Membership, format: OutputFormat) -> Result<()> {
    let name = args.name.unwrap_or_default();
    let node_id = resolve_node_id(args.id)?;

    membership
        .leave(&name, &node_id)
        .await
        .with_context(|| format!("unable to leave mesh '{}'", name))?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "name": name, "node_id": node_id, "left": true }));
        }
        _ => print_success(&format!("Node {} left mesh '{}'", node_id, name), format),
    }

    Ok(())
}
