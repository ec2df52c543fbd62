//! Automesh CLI - Main Entry Point
//!
//! Creates, joins, reconciles and removes WireGuard meshes coordinated
//! through a Vault KV store.

use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use automesh_common::{
    MeshConfig, Membership, StoreConfig, TunnelConfig, VaultStore, WireGuardTunnel,
};

mod commands;
mod exit;
mod output;

use commands::{create, delete, join, leave, nodes, update};
use exit::Category;

/// Automesh - self-organising WireGuard meshes
#[derive(Parser)]
#[command(name = "automesh")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    /// UDP listen port for devices that have none configured
    #[arg(long, env = "AUTOMESH_LISTEN_PORT", default_value = "51820", global = true)]
    listen_port: u16,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    #[command(flatten)]
    log: LogArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct StoreArgs {
    /// Vault address
    #[arg(
        short = 'a',
        long = "addr",
        env = "AUTOMESH_VAULT_ADDR",
        default_value = "http://127.0.0.1:8200",
        global = true
    )]
    address: String,

    /// Vault token, omit when an agent injects credentials
    #[arg(long, env = "AUTOMESH_VAULT_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Mount path of the KV version 2 engine
    #[arg(long, env = "AUTOMESH_VAULT_ENGINE_PATH", default_value = "secret", global = true)]
    engine_path: String,

    /// Base path holding all meshes
    #[arg(long = "base", env = "AUTOMESH_VAULT_BASE", default_value = "wgvam", global = true)]
    base_path: String,

    /// Vault request timeout in seconds
    #[arg(long, env = "AUTOMESH_VAULT_TIMEOUT", default_value = "10", global = true)]
    timeout: u64,
}

#[derive(Args)]
struct LogArgs {
    /// Log progress
    #[arg(short, long, env = "AUTOMESH_LOG_VERBOSE", global = true)]
    verbose: bool,

    /// Log decisions
    #[arg(short, long, env = "AUTOMESH_LOG_DEBUG", global = true)]
    debug: bool,

    /// Log everything, including store payloads and commands
    #[arg(long, env = "AUTOMESH_LOG_TRACE", global = true)]
    trace: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "AUTOMESH_LOG_JSON", global = true)]
    log_json: bool,
}

impl LogArgs {
    fn level(&self) -> &'static str {
        if self.trace {
            "trace"
        } else if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else {
            "error"
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create a mesh
    Create(create::CreateArgs),

    /// Delete a mesh and all its node records
    Delete(delete::DeleteArgs),

    /// Join this node to a mesh
    Join(join::JoinArgs),

    /// Remove this node from a mesh
    Leave(leave::LeaveArgs),

    /// Reconcile local peers with the mesh
    Update(update::UpdateArgs),

    /// Show a mesh and its nodes
    Nodes(nodes::NodesArgs),
}

impl Commands {
    fn category(&self) -> Category {
        match self {
            Commands::Create(_) => Category::Create,
            Commands::Delete(_) => Category::Delete,
            Commands::Join(_) => Category::Join,
            Commands::Leave(_) => Category::Leave,
            Commands::Update(_) => Category::Update,
            Commands::Nodes(_) => Category::List,
        }
    }
}

impl Cli {
    fn config(&self) -> MeshConfig {
        MeshConfig {
            store: StoreConfig {
                address: self.store.address.clone(),
                token: self.store.token.clone(),
                engine_path: self.store.engine_path.clone(),
                base_path: self.store.base_path.clone(),
                timeout_secs: self.store.timeout,
            },
            tunnel: TunnelConfig {
                default_listen_port: self.listen_port,
                ..Default::default()
            },
        }
    }
}

fn init_logging(log: &LogArgs) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log.level()));

    let json = log.log_json.then(|| {
        fmt::layer()
            .json()
            .with_target(false)
            .with_writer(std::io::stderr)
    });
    let text = (!log.log_json).then(|| {
        fmt::layer()
            .without_time()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config();
    debug!("Automesh v{}", automesh_common::VERSION);
    debug!("Configuration: {:?}", config);

    let store = VaultStore::new(&config.store)?;
    let tunnel = WireGuardTunnel::new(&config.tunnel);
    let membership = Membership::new(Arc::new(store), Arc::new(tunnel), config);

    let format = cli.format;
    match cli.command {
        Commands::Create(args) => create::execute(args, &membership, format).await,
        Commands::Delete(args) => delete::execute(args, &membership, format).await,
        Commands::Join(args) => join::execute(args, &membership, format).await,
        Commands::Leave(args) => leave::execute(args, &membership, format).await,
        Commands::Update(args) => update::execute(args, &membership, format).await,
        Commands::Nodes(args) => nodes::execute(args, &membership, format).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let category = cli.command.category();
    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(exit::code_for(&e, category));
    }
}
