use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use owc_core::ProxyConfig;
use owc_proxy::AppState;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "owc-proxy",
    version,
    about = "Edge proxy for Open Web Calendar that keeps calendar sources private"
)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8787", env = "OWC_PORT")]
    port: u16,

    /// Address to bind
    #[arg(short, long, default_value = "127.0.0.1", env = "OWC_BIND")]
    bind: IpAddr,

    /// Config file (default: ~/.config/owc-proxy/config.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let config =
        ProxyConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        upstream = %config.upstream,
        calendars = config.calendar_urls.len(),
        fixed_sources = config.fixed_sources,
        secret = config.secret.is_some(),
        timeout_secs = config.timeout.as_secs(),
        "owc-proxy starting"
    );

    let state = AppState::new(config).context("Failed to build upstream client")?;
    let app = owc_proxy::app(state);

    let addr = SocketAddr::new(args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
