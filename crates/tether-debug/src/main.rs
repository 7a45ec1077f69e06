use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tether_config::{AdapterConfig, TetherConfig};
use tether_debug::ControllerConfig;

/// Drive a Debug Adapter Protocol adapter through newline-delimited JSON tool
/// calls on stdio.
#[derive(Debug, Parser)]
#[command(name = "tether", version, about)]
struct Cli {
    /// Path to a TOML config file.
    ///
    /// If unset, `TETHER_CONFIG` is used as a fallback. When neither is
    /// provided the built-in defaults apply.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Connect to an adapter already listening on this address.
    #[arg(long, conflicts_with = "adapter_command")]
    adapter_tcp: Option<SocketAddr>,

    /// Spawn the adapter and speak DAP over its stdio.
    #[arg(long)]
    adapter_command: Option<String>,

    /// Arguments for `--adapter-command`.
    #[arg(long = "adapter-arg", requires = "adapter_command")]
    adapter_args: Vec<String>,
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = TetherConfig::discover(cli.config.clone()).with_context(|| {
        match &cli.config {
            Some(path) => format!("failed to load config from {}", path.display()),
            None => "failed to load config from TETHER_CONFIG".to_string(),
        }
    })?;
    if let Some(addr) = cli.adapter_tcp {
        config.adapter = Some(AdapterConfig::tcp(addr));
    } else if let Some(command) = cli.adapter_command {
        config.adapter = Some(AdapterConfig::command(command, cli.adapter_args));
    }

    tether_config::init_tracing(&config.logging);
    tracing::info!(target: "tether.server", adapter = ?config.adapter, "starting");

    tether_debug::server::run_stdio(ControllerConfig::from(&config))
        .await
        .context("tool server failed")
}
