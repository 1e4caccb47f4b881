//! # Recon Server
//!
//! Coordinates long-running reconnaissance scans (subdomain enumeration,
//! HTTP probing, URL harvesting, vulnerability scanning) and streams
//! their progress to clients in real time.
//!
//! The server is built on Axum and drives external scanning tools
//! (subfinder, httpx, waybackurls, gau, katana, nuclei) as child
//! processes, one pipeline task per active scan.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recon_config::Config;
use recon_core::{MemoryProjects, MemorySink, ProcessToolRunner, ScanService};
use recon_server::{AppState, routes, service_config};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "recon-server")]
#[command(about = "Reconnaissance scan orchestration server with live progress streaming")]
struct Cli {
    /// Address to bind the HTTP listener to
    #[arg(long, env = "RECON_BIND")]
    bind: Option<SocketAddr>,

    /// Path to a TOML configuration file
    #[arg(long, env = "RECON_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let service = ScanService::new(
        Arc::new(ProcessToolRunner::new()),
        Arc::new(MemorySink::new()),
        Arc::new(MemoryProjects::new()),
        service_config(&config.scanner),
    );
    let state = AppState::new(service);
    // The dashboard frontend runs on its own origin during development.
    let app = routes::router(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!("recon server listening on {}", config.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
