//! Standalone HTTP exchange server.
//!
//! Serves the exchange transport's wire protocol over HTTP so agents and
//! users running in separate processes (or on separate machines) can
//! address each other through a shared, registered mailbox.

use std::sync::Arc;

use agentex::exchange::http::auth::{AuthProvider, ImplicitPrincipal, SharedSecretAuth};
use agentex::exchange::http::config::ExchangeServerConfig;
use agentex::exchange::http::server::{build_router, ExchangeServerState};
use agentex::observability::{init_tracing, LogFormat};
use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Runs the agentex message exchange over HTTP.
#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    /// Path to a TOML config file. Falls back to development defaults when
    /// omitted.
    #[arg(long)]
    config: Option<String>,

    /// Emit logs as JSON instead of pretty-printed lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let format = if args.json_logs { LogFormat::Json } else { LogFormat::Pretty };
    init_tracing("agentex=info", format);

    let config = match &args.config {
        Some(path) => ExchangeServerConfig::load(path)
            .with_context(|| format!("loading exchange server config from {path}"))?,
        None => ExchangeServerConfig::development(),
    };
    config.validate().context("exchange server config is invalid")?;

    info!(bind_address = %config.bind_address, "starting agentex exchange server");

    let auth: Arc<dyn AuthProvider> = match &config.shared_secret {
        Some(secret) => Arc::new(SharedSecretAuth::new(secret.clone())),
        None => Arc::new(ImplicitPrincipal),
    };

    let state = ExchangeServerState::new(&config);
    let app = build_router(state, auth);

    let listener = TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    info!("exchange server listening on http://{}", config.bind_address);

    if let Err(error) = axum::serve(listener, app).await {
        error!(%error, "exchange server exited with an error");
        return Err(error.into());
    }

    info!("exchange server shutting down");
    Ok(())
}
