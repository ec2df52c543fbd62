//! Create Command

use anyhow::{Context, Result};
use automesh_common::Membership;
use clap::Args;

use crate::output::{print_info, print_success, OutputFormat};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Mesh name
    #[arg(short, long)]
    pub name: Option<String>,

    /// Overlay network of the mesh
    #[arg(short, long, default_value = "10.37.0.0/16")]
    pub cidr: String,
}

pub async fn execute(
    args: CreateArgs,
    membership: &Membership,
    format: OutputFormat,
) -> Result<()> {
    let name = args.name.unwrap_or_default();
    let created = membership
        .create(&name, &args.cidr)
        .await
        .with_context(|| format!("unable to create mesh '{}'", name))?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "name": name, "created": created }));
        }
        _ if created => print_success(
            &format!("Mesh '{}' created with {}", name, args.cidr),
            format,
        ),
        _ => print_info(&format!("Mesh '{}' already exists", name), format),
    }

    Ok(())
}
