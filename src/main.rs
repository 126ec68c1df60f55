mod api;
mod client;
mod commands;
mod config;
mod discovery;
mod domain;
mod error;
mod overlay;
mod server;
mod template;
mod util;

use clap::{Parser, Subcommand};

use commands::configure::ConfigureCommands;
use commands::container::ContainerCommands;
use commands::node::NodeCommands;
use commands::overlay::OverlayCommands;
use commands::profile::ProfileCommands;
use commands::query::QueryCommands;

#[derive(Parser)]
#[command(name = "cinder", version, about = "Stateless cluster provisioner for diskless compute nodes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage node records (§6) — the sole node mutation path.
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },

    /// Manage shared profile records (§6).
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Build, inspect, and evict cached overlay images (§4.5-4.6).
    Overlay {
        #[command(subcommand)]
        command: OverlayCommands,
    },

    /// Manage container rootfs trees on disk (§6; import is out of scope).
    Container {
        #[command(subcommand)]
        command: ContainerCommands,
    },

    /// Render controller-host templates (DHCP/hosts/SSH) to stdout (§6).
    Configure {
        #[command(subcommand)]
        command: ConfigureCommands,
    },

    /// Run the provisioning daemon (§4.7-4.8, §5).
    Daemon {
        /// Path to the controller configuration file (overrides the default
        /// `CINDER_CONFIG`/`<config_dir>/cinder/controller.yaml` lookup).
        #[arg(long)]
        config: Option<String>,

        /// Path to the node/profile document (overrides the default
        /// `CINDER_NODES_FILE`/`<config_dir>/cinder/nodes.yaml` lookup).
        #[arg(long)]
        nodes: Option<String>,
    },

    /// Query a running daemon's plaintext `/info/*` endpoints (§6, §4.8).
    Query {
        /// Target daemon address (`host:port` or a full URL); defaults to
        /// the local daemon's default listen address.
        #[arg(long, global = true)]
        node: Option<String>,

        #[command(subcommand)]
        command: QueryCommands,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Node { command } => commands::node::run(&command),
        Commands::Profile { command } => commands::profile::run(&command),
        Commands::Overlay { command } => commands::overlay::run(&command),
        Commands::Container { command } => commands::container::run(&command),
        Commands::Configure { command } => commands::configure::run(&command),
        Commands::Daemon { config, nodes } => commands::daemon::run(config, nodes),
        Commands::Query { node, command } => commands::query::run(node.as_deref(), &command),
    }
}
