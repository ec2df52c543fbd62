//! Delete Command

use anyhow::{Context, Result};
use automesh_common::Membership;
use clap::Args;

use crate::output::{print_info, print_success, OutputFormat};

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Mesh name
    #[arg(short, long)]
    pub name: Option<String>,
}

pub async fn execute(
    args: DeleteArgs,
    membership: &Membership,
    format: OutputFormat,
) -> Result<()> {
    let name = args.name.unwrap_or_default();
    let deleted = membership
        .delete(&name)
        .await
        .with_context(|| format!("unable to delete mesh '{}'", name))?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "name": name, "deleted": deleted }));
        }
        _ if deleted => print_success(&format!("Mesh '{}' deleted", name), format),
        _ => print_info(&format!("Mesh '{}' not found", name), format),
    }

    Ok(())
}
