//! HTTP boundary
//!
//! Two endpoints: the websocket upgrade clients connect to, and the push
//! endpoint the calendar provider posts change notices to. The push
//! handler acks `200 OK` unconditionally and synchronously; the provider
//! only allows a short acknowledgement window, so all real work happens
//! behind the hub's command queue.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use meetings_core::TokenStore;
use meetings_domain::{Config, FanoutKey, MeetingsError, PushNotice, Result};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::hub::{ClientSession, Hub};
use crate::redact::redact_email;

/// Shared state of the HTTP boundary.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub tokens: Arc<dyn TokenStore>,
    pub config: Arc<Config>,
}

/// Build the service router. The push route's first segment comes from the
/// configured prefix; the wildcard suffix is the fan-out key.
pub fn router(state: AppState) -> Router {
    let push_route = format!("/{}/*suffix", state.config.server.push_prefix);
    Router::new()
        .route("/notifications", get(register_client))
        .route(&push_route, post(receive_push))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| MeetingsError::Internal(format!("server error: {e}")))
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    email: String,
    token: String,
    #[serde(default = "default_calendar")]
    calendar: String,
}

fn default_calendar() -> String {
    "primary".to_string()
}

// The upgrade is extracted as an Option so authentication failures map to
// 401/404 even for callers that never sent the websocket headers.
async fn register_client(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    let account = match state.tokens.authenticate(&params.email, &params.token).await {
        Ok(account) => account,
        Err(MeetingsError::NotFound(_)) => {
            warn!(user = %redact_email(&params.email), "upgrade for unknown user");
            return (StatusCode::NOT_FOUND, "User not found").into_response();
        }
        Err(MeetingsError::Auth(_)) => {
            warn!(user = %redact_email(&params.email), "upgrade with invalid token");
            return (StatusCode::UNAUTHORIZED, "Token provided is not valid").into_response();
        }
        Err(e) => {
            error!(error = %e, "could not authenticate user");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Authentication failed").into_response();
        }
    };

    let Some(ws) = ws else {
        return (StatusCode::BAD_REQUEST, "Error upgrading: not a websocket request")
            .into_response();
    };

    let hub = state.hub.clone();
    let session_config = state.config.session.clone();
    let calendar = params.calendar;
    ws.on_upgrade(move |socket| ClientSession::run(socket, account, calendar, hub, session_config))
}

async fn receive_push(
    State(state): State<AppState>,
    Path(suffix): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    match (FanoutKey::parse_suffix(&suffix), parse_push_headers(&headers)) {
        (Ok(key), Ok(notice)) => {
            // route only enqueues; provider calls run off the hub loop, so
            // the ack below stays within the provider's window.
            if state.hub.route(key, notice).await.is_err() {
                warn!("hub loop is gone, dropping push");
            }
        }
        (Err(e), _) => debug!(error = %e, "push with malformed suffix, discarding"),
        (_, Err(e)) => debug!(error = %e, "push with malformed headers, discarding"),
    }
    (StatusCode::OK, "OK")
}

fn parse_push_headers(headers: &HeaderMap) -> Result<PushNotice> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let channel_id = get("x-goog-channel-id")
        .ok_or_else(|| MeetingsError::InvalidInput("missing X-Goog-Channel-ID header".into()))?;

    let channel_expiration = get("x-goog-channel-expiration").and_then(|raw| {
        match DateTime::parse_from_rfc2822(&raw) {
            Ok(when) => Some(when.with_timezone(&Utc)),
            Err(e) => {
                warn!(error = %e, raw = %raw, "could not parse channel expiration time");
                None
            }
        }
    });

    Ok(PushNotice {
        channel_id,
        resource_id: get("x-goog-resource-id").unwrap_or_default(),
        resource_state: get("x-goog-resource-state").unwrap_or_default(),
        message_number: get("x-goog-message-number"),
        channel_expiration,
        resource_uri: get("x-goog-resource-uri"),
        token: get("x-goog-channel-token"),
    })
}
