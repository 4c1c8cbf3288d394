mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    agent::AgentSubcommand, config::ConfigSubcommand, op::OpSubcommand,
    resource::ResourceSubcommand, settings::SettingsSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "fleetctl",
    about = "Remote operation console: serve the API, seed inventory, unstick resources",
    version,
    propagate_version = true
)]
struct Cli {
    /// Console root (default: auto-detect from .fleet/)
    #[arg(long, global = true, env = "FLEET_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .fleet/ with a default config and an empty store
    Init {
        /// Message bus URL written to the new config
        #[arg(long)]
        nats_url: Option<String>,
    },

    /// Run the console API server
    Serve {
        /// Override the listen address from the config
        #[arg(long)]
        listen: Option<String>,
    },

    /// Manage the agent inventory
    Agent {
        #[command(subcommand)]
        subcommand: AgentSubcommand,
    },

    /// Manage per-tenant settings
    Settings {
        #[command(subcommand)]
        subcommand: SettingsSubcommand,
    },

    /// Inspect and seed resource rows
    Resource {
        #[command(subcommand)]
        subcommand: ResourceSubcommand,
    },

    /// Inspect and clear in-flight operations
    Op {
        #[command(subcommand)]
        subcommand: OpSubcommand,
    },

    /// Validate the console configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { nats_url } => cmd::init::run(&root, nats_url.as_deref()),
        Commands::Serve { listen } => cmd::serve::run(&root, listen.as_deref()),
        Commands::Agent { subcommand } => cmd::agent::run(&root, subcommand, cli.json),
        Commands::Settings { subcommand } => cmd::settings::run(&root, subcommand, cli.json),
        Commands::Resource { subcommand } => cmd::resource::run(&root, subcommand, cli.json),
        Commands::Op { subcommand } => cmd::op::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
