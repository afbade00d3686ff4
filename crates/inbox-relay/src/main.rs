mod server;

use anyhow::{Context, Result};
use inbox_relay_engine::{
    AuthState, GmailApi, GoogleOAuth, LogSink, Relay, RelayConfig, RelayParts, Session,
    StateStore, spawn_worker,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub type AppRelay = Relay<GmailApi, GoogleOAuth, StateStore, LogSink>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .try_init()
        .ok();

    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    let store = StateStore::open(&config.state).await?;
    let session = Session::new();

    let relay: Arc<AppRelay> = Arc::new(Relay::new(
        &config,
        RelayParts {
            provider: Arc::new(GmailApi::new(session.clone())),
            auth: Arc::new(GoogleOAuth::new(&config.oauth)?),
            store,
            session,
            sink: LogSink,
        },
    ));

    match relay.start().await? {
        AuthState::Restored => info!("relay running with stored credential"),
        AuthState::AwaitingAuthorization { .. } => {
            warn!("waiting for authorization at {}", config.oauth.redirect_uri)
        }
    }

    let (notifications, worker) = spawn_worker(Arc::clone(&relay));
    let state = server::AppState {
        relay: Arc::clone(&relay),
        notifications,
    };

    server::serve(config.listen_addr, state, shutdown_signal()).await?;

    // the router (and with it the last sender) is gone, so the worker drains
    if let Err(err) = worker.await {
        warn!("notification worker ended abnormally: {err}");
    }
    relay.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
