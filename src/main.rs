//! Rewrite gateway binary.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ net (TLS?) ──▶ http server ──▶ rewrite middleware
//!                                                      │
//!                     ┌────────────────┬───────────────┼──────────────┐
//!                     ▼                ▼               ▼              ▼
//!               403 / 410         redirect         proxy          continue
//!                                 (Location)    (forwarder) ──▶  next stage
//!                                                     │        (static files)
//!                                                     ▼
//!                                               upstream server
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;

use rewrite_gateway::config::{load_config, load_rules, GatewayConfig};
use rewrite_gateway::lifecycle::spawn_signal_handler;
use rewrite_gateway::net::load_tls_config;
use rewrite_gateway::observability::logging;
use rewrite_gateway::{Error, HttpServer, Shutdown};

const DEFAULT_CONFIG: &str = "gateway.toml";

#[derive(Parser, Debug)]
#[command(name = "rewrite-gateway", version, about = "Rule-driven URL rewrite gateway")]
struct Cli {
    /// Configuration file (defaults to ./gateway.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Compile the configuration and rules, report, and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let (config, base_dir) = read_config(cli.config.as_deref())?;

    if cli.check {
        let rules = load_rules(&config, &base_dir)?;
        println!("configuration ok: {} rules", rules.len());
        return Ok(());
    }

    logging::init(&config.observability)?;
    tracing::info!("rewrite-gateway v{} starting", env!("CARGO_PKG_VERSION"));

    let rules = load_rules(&config, &base_dir)?;
    tracing::info!(
        bind_address = %config.listener.bind_address,
        rules = rules.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    let tls = config.listener.tls.clone();
    let bind_address = config.listener.bind_address.clone();
    let server = HttpServer::new(config, rules)?;

    let shutdown = Shutdown::new();
    let receiver = shutdown.subscribe();
    spawn_signal_handler(shutdown.clone());

    match tls {
        Some(tls) => {
            let tls_config = load_tls_config(&tls).await?;
            let addr = bind_address
                .parse::<SocketAddr>()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
            server.run_tls(addr, tls_config, receiver).await?;
        }
        None => {
            let listener = TcpListener::bind(&bind_address).await?;
            server.run(listener, receiver).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Load the configuration and the directory relative rule files resolve
/// against. A missing default file means built-in defaults.
fn read_config(path: Option<&Path>) -> Result<(GatewayConfig, PathBuf), Error> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG), false),
    };

    if !explicit && !path.exists() {
        return Ok((GatewayConfig::default(), PathBuf::from(".")));
    }

    let config = load_config(&path)?;
    let base_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((config, base_dir))
}
