//! snapguard - checkpoint/restore guard for one node of a cluster
//!
//! Subcommands:
//! - `snapguard serve <node_id> <pid>` - Run the guard for a target process
//! - `snapguard send <command> <node_id> <round>` - Send a command over the local socket
//! - `snapguard config` - Print the effective configuration

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snapconf::GuardConfig;
use snapguard::{client, serve, telemetry, Command, CommandRequest};

#[derive(Parser)]
#[command(name = "snapguard")]
#[command(about = "Checkpoint/restore guard for cluster nodes")]
#[command(version)]
struct Cli {
    /// Config file (replaces ./snapguard.toml in the search path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the guard
    Serve {
        /// This guard's node id
        node_id: u32,

        /// Pid of the process to checkpoint and restore
        pid: u32,

        /// Unix socket for the local channel
        #[arg(long)]
        socket: Option<PathBuf>,

        /// HTTP port for the network channel
        #[arg(short, long)]
        port: Option<u16>,

        /// Snapshot store directory
        #[arg(long)]
        store_dir: Option<PathBuf>,
    },

    /// Send a command to the local guard
    Send {
        /// checkpoint or restore
        command: String,

        /// Target node id
        node_id: u32,

        /// Round index
        round: u64,

        /// Unix socket of the local guard
        #[arg(long)]
        socket: Option<PathBuf>,

        /// Timeout in milliseconds
        #[arg(short, long, default_value = "5000")]
        timeout: u64,
    },

    /// Print the effective configuration and where it came from
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (mut config, sources) = GuardConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve {
            node_id,
            pid,
            socket,
            port,
            store_dir,
        } => {
            if let Some(socket) = socket {
                config.paths.socket_path = socket;
            }
            if let Some(port) = port {
                config.bind.http_port = port;
            }
            if let Some(store_dir) = store_dir {
                config.paths.store_dir = store_dir;
            }

            telemetry::init(&config.telemetry, node_id)?;
            for file in &sources.files {
                tracing::debug!(file = %file.display(), "loaded config");
            }

            let result = serve::run(config, node_id, pid).await;
            telemetry::shutdown();
            result
        }

        Commands::Send {
            command,
            node_id,
            round,
            socket,
            timeout,
        } => {
            telemetry::init_fmt(&config.telemetry.log_level);

            let command: Command = command.parse()?;
            let socket = socket.unwrap_or(config.paths.socket_path);
            let request = CommandRequest {
                command,
                node_id,
                round,
            };

            let reply = client::send(&socket, &request, Duration::from_millis(timeout)).await?;
            println!("{}", reply);
            if reply.starts_with("ERROR") {
                std::process::exit(1);
            }
            Ok(())
        }

        Commands::Config => {
            print!("{}", config.to_toml());
            println!();
            if sources.files.is_empty() {
                println!("# sources: defaults only");
            }
            for file in &sources.files {
                println!("# source: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env: {}", var);
            }
            Ok(())
        }
    }
}
