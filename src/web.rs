//! HTTP surface of the relay, powered by axum.
//!
//! Serves:
//! - `GET  /`                      — chat page
//! - `GET  /get_messages`          — recent messages, oldest first
//! - `POST /send_message_from_web` — form fields `message`, `timestamp`
//! - `POST /delete_message`        — JSON body `{"id": <local id>}`
//! - `GET  /health`                — liveness check

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{rejection::FormRejection, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::relay::{Outcome, Relay, RelayError};
use crate::store::Message;

// The chat page is embedded at compile time — no runtime file needed.
const INDEX_HTML: &str = include_str!("../static/index.html");

#[derive(Deserialize)]
struct PostForm {
    message: Option<String>,
    timestamp: Option<String>,
}

#[derive(Deserialize)]
struct DeleteRequest {
    #[serde(default)]
    id: Option<serde_json::Value>,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::NotFound(_) => StatusCode::NOT_FOUND,
            RelayError::Storage(e) => {
                error!("Storage failure: {:#}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(Outcome::error(self.to_string()))).into_response()
    }
}

pub fn build_router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/get_messages", get(get_messages))
        .route("/send_message_from_web", post(send_message_from_web))
        .route("/delete_message", post(delete_message))
        .route("/health", get(health_check))
        .with_state(relay)
}

/// Serve until `shutdown` flips to true
pub async fn serve(
    relay: Arc<Relay>,
    bind: &str,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("Invalid server address: {bind}:{port}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!("Web relay listening on http://{}", addr);

    axum::serve(listener, build_router(relay))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .context("Server error")?;

    Ok(())
}

async fn serve_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn get_messages(State(relay): State<Arc<Relay>>) -> Result<Json<Vec<Message>>, RelayError> {
    Ok(Json(relay.list().await?))
}

async fn send_message_from_web(
    State(relay): State<Arc<Relay>>,
    form: Result<Form<PostForm>, FormRejection>,
) -> Result<Json<Outcome>, RelayError> {
    let Form(form) = form.map_err(|rejection| RelayError::Validation(rejection.body_text()))?;
    let outcome = relay
        .post(form.message.as_deref(), form.timestamp.as_deref())
        .await?;
    Ok(Json(outcome))
}

async fn delete_message(
    State(relay): State<Arc<Relay>>,
    body: Bytes,
) -> Result<Json<Outcome>, RelayError> {
    let id = serde_json::from_slice::<DeleteRequest>(&body)
        .ok()
        .and_then(|req| req.id)
        .and_then(|id| parse_id(&id));
    Ok(Json(relay.delete(id).await?))
}

/// Accepts `5` and `"5"`; browsers are not consistent about which they send
fn parse_id(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

async fn health_check(State(relay): State<Arc<Relay>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "telegram": relay.telegram_enabled(),
    }))
}
