//! History API for the Confab server.
//!
//! Request/response JSON endpoints for message persistence. This path is
//! deliberately decoupled from the relay: clients write history here
//! independently of relaying, and the two views are only eventually
//! consistent.

use crate::config::Config;
use crate::metrics;
use crate::relay::AppState;
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use confab_core::{validate_user_id, StoredMessage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Request body for appending a message.
#[derive(Debug, Deserialize)]
pub struct AppendRequest {
    /// Sender user identifier.
    pub from: String,
    /// Recipient user identifier.
    pub to: String,
    /// Message body.
    pub message: String,
}

/// Request body for listing a conversation.
#[derive(Debug, Deserialize)]
pub struct ListRequest {
    /// Requesting user identifier.
    pub from: String,
    /// Conversation partner identifier.
    pub to: String,
}

/// A stored message projected for the requesting user.
#[derive(Debug, Serialize)]
pub struct MessageView {
    /// Whether the requesting user sent this message.
    pub from_self: bool,
    /// The stored message.
    pub message: StoredMessage,
}

/// Run the HTTP history API server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_api_server(config: Config, state: Arc<AppState>) -> Result<()> {
    let app = Router::new()
        .route("/messages", post(append_message))
        .route("/messages/list", post(list_messages))
        .route("/health", get(health_handler))
        .with_state(state);

    let addr = config.api_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("History API listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.router.stats();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": stats.connection_count,
        "online": stats.online_count,
    }))
}

/// Append a message to history.
async fn append_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AppendRequest>,
) -> Response {
    if let Err(e) = validate_participants(&req.from, &req.to) {
        return bad_request(e);
    }
    if req.message.is_empty() {
        return bad_request("Message cannot be empty");
    }

    match state.store.append(&req.from, &req.to, &req.message) {
        Ok(stored) => {
            metrics::record_history_append();
            (StatusCode::OK, Json(stored)).into_response()
        }
        Err(e) => storage_failure(&e),
    }
}

/// List the conversation between two users, ascending by update time.
async fn list_messages(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ListRequest>,
) -> Response {
    if let Err(e) = validate_participants(&req.from, &req.to) {
        return bad_request(e);
    }

    match state.store.list_between(&req.from, &req.to) {
        Ok(messages) => {
            let views: Vec<MessageView> = messages
                .into_iter()
                .map(|message| MessageView {
                    from_self: message.sender == req.from,
                    message,
                })
                .collect();
            (StatusCode::OK, Json(views)).into_response()
        }
        Err(e) => storage_failure(&e),
    }
}

fn validate_participants(from: &str, to: &str) -> Result<(), &'static str> {
    validate_user_id(from)?;
    validate_user_id(to)?;
    if from == to {
        return Err("Sender and recipient must differ");
    }
    Ok(())
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

fn storage_failure(error: &confab_core::StoreError) -> Response {
    error!("History store failure: {}", error);
    metrics::record_error("store");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}
