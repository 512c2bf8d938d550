use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::dispatcher::{DispatchError, OutboundDispatcher, ProcessResponseRequest};
use crate::pipeline::Pipeline;
use crate::platform::wppconnect::WebhookEvent;
use crate::platform::Transport;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub dispatcher: Arc<OutboundDispatcher>,
    pub transport: Arc<dyn Transport>,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match self {
            DispatchError::TransportNotReady => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::MissingRecipient
            | DispatchError::MissingContent(_)
            | DispatchError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            DispatchError::DeliveryFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// ── Handlers ───────────────────────────────────────────────────────────────────

/// Backend callback carrying a reply for a user.
async fn process_response(
    State(state): State<AppState>,
    body: Result<Json<ProcessResponseRequest>, JsonRejection>,
) -> Result<Json<Value>, DispatchError> {
    let Json(body) = body.map_err(|e| {
        warn!("Rejecting malformed backend reply: {}", e.body_text());
        DispatchError::InvalidBody(e.body_text())
    })?;
    info!(
        "Backend reply received: tipo={:?} recipient={:?}",
        body.tipo, body.recipient_phone
    );
    state.dispatcher.dispatch(body).await?;
    Ok(Json(json!({ "status": "success" })))
}

/// Events pushed by the WPPConnect session.
async fn session_event(State(state): State<AppState>, Json(body): Json<Value>) -> StatusCode {
    let event: WebhookEvent = match serde_json::from_value(body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Unparseable session event: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };

    match event.into_transport_event() {
        Some(event) => state.pipeline.handle_event(event),
        None => debug!("Ignoring session event"),
    }
    StatusCode::OK
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "ready": state.transport.is_ready(),
        "bot_id": state.pipeline.identity(),
    }))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/process-response", post(process_response))
        .route("/wpp-events", post(session_event))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve(addr: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("HTTP server listening on {}", addr);
    info!("  POST /process-response  (backend replies)");
    info!("  POST /wpp-events        (session events)");

    axum::serve(listener, router(state))
        .await
        .context("Server error")?;

    Ok(())
}
