use std::net::SocketAddr;

use aegis_server::config::loader::{DEFAULT_CONFIG_FILE, load_config};
use aegis_server::{AegisServer, AppState, Backends, observability};
use anyhow::Context;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "aegis-server", version, about = "Aegis security control plane")]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "AEGIS_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Listen address, overriding server.host and server.port
    #[arg(long)]
    addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    observability::init_tracing();
    let cli = Cli::parse();

    let cfg = load_config(Some(&cli.config))
        .with_context(|| format!("configuration error ({})", cli.config))?;
    tracing::info!(path = %cli.config, "Configuration loaded");
    observability::apply_logging_level(&cfg.logging.level);

    let backends = Backends::connect(&cfg).await?;
    let state = AppState::new(cfg, backends)?;

    let mut server = AegisServer::new(state);
    if let Some(addr) = cli.addr {
        server = server.with_addr(addr);
    }
    server.run().await
}
