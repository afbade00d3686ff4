use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use inbox_relay_engine::{NotificationSender, parse_push_body};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::AppRelay;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<AppRelay>,
    pub notifications: NotificationSender,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/gmail/oauth2callback", get(oauth_callback))
        .route("/gmail/pubsub/push", post(pubsub_push))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind webhook listener on {addr}"))?;
    info!("webhook server listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("webhook server failed")
}

async fn oauth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, &'static str) {
    if let Some(error) = params.error {
        warn!("authorization denied: {error}");
        return (StatusCode::BAD_REQUEST, "Authorization was denied");
    }

    let Some(code) = params.code else {
        return (StatusCode::BAD_REQUEST, "Missing authorization code");
    };

    match state.relay.authorize(&code).await {
        Ok(()) => (
            StatusCode::OK,
            "Authorization successful! You can close this tab.",
        ),
        Err(err) => {
            error!("authorization code exchange failed: {err}");
            (StatusCode::BAD_REQUEST, "Error retrieving access token")
        }
    }
}

/// Acknowledges as soon as the payload parses; processing happens on the
/// notification worker and recovers through the checkpoint, not through
/// Pub/Sub redelivery.
async fn pubsub_push(State(state): State<AppState>, body: Bytes) -> (StatusCode, &'static str) {
    match parse_push_body(&body) {
        Ok(notification) => {
            info!(
                history_id = %notification.history_id,
                mailbox = notification.email_address.as_deref().unwrap_or("unknown"),
                "push notification received"
            );
            state.notifications.enqueue(notification.history_id);
            (StatusCode::OK, "")
        }
        Err(err) => {
            warn!("rejecting push delivery: {err}");
            (StatusCode::BAD_REQUEST, "Missing Required Parameters")
        }
    }
}
