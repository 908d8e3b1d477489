use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

mod config;
mod server;
mod telemetry;

use config::ServerConfig;

/// Murmur real-time chat server
#[derive(Parser, Debug)]
#[command(name = "murmur-server", version, about)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "MURMUR_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen address (e.g. 127.0.0.1:3000)
    #[arg(short, long)]
    bind: Option<String>,

    /// Human-readable log output instead of JSON
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.pretty {
        telemetry::init_local()?;
    } else {
        telemetry::init()?;
    }

    info!("Murmur Server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = ServerConfig::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.server.bind_addr = bind;
    }
    config.log_config();

    server::start(config).await?;

    telemetry::shutdown();

    Ok(())
}
