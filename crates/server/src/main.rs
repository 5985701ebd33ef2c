//! Meeting-notification fan-out server
//!
//! Wires the configuration, the Google Calendar client, the token store
//! and the hub together, then serves the HTTP boundary until interrupted.

use std::sync::Arc;

use meetings_core::{CalendarApi, TokenStore};
use meetings_infra::server::{serve, AppState};
use meetings_infra::{config, GoogleCalendarApi, Hub, StaticTokenStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Arc::new(config::load()?);
    if config.oauth.client_id.is_empty() {
        debug!("no oauth client configured; user registration runs elsewhere");
    }

    let tokens: Arc<dyn TokenStore> = match &config.server.accounts_path {
        Some(path) => Arc::new(StaticTokenStore::load(path)?),
        None => {
            warn!("no accounts file configured, every upgrade request will be rejected");
            Arc::new(StaticTokenStore::empty())
        }
    };

    let api: Arc<dyn CalendarApi> =
        Arc::new(GoogleCalendarApi::new(config.subscription.provider_timeout())?);

    let shutdown = CancellationToken::new();
    let hub = Hub::spawn(api, Arc::clone(&config), shutdown.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    info!(addr = %config.server.bind_addr, host_url = %config.server.host_url, "listening");

    let root = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            root.cancel();
        }
    });

    serve(listener, AppState { hub, tokens, config }, shutdown).await?;
    info!("server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
