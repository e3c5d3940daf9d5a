//! HTTP surface: health JSON, webhook ingress and operator routes.
//!
//! Webhooks only enqueue into the admission queue and answer immediately;
//! replies go out through the [`MessagingClient`](super::traits::MessagingClient)
//! once the worker reaches the message.

use crate::admission::{AdmissionPipeline, AdmissionQueue, EnqueueAction, Janitor, QueueStats};
use crate::channels::traits::{InboundMessage, MediaKind};
use crate::channels::whatsapp::WhatsAppClient;
use crate::supervisor::health::{HealthSnapshot, SharedHealth};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct GatewayState {
    pub queue: Arc<AdmissionQueue>,
    pub pipeline: Arc<AdmissionPipeline>,
    pub janitor: Arc<Janitor>,
    pub health: SharedHealth,
    pub whatsapp: Option<Arc<WhatsAppClient>>,
    /// Bearer token for `/webhook` and `/admin/*`; `None` disables the check.
    pub bearer_token: Option<String>,
}

#[derive(serde::Deserialize)]
struct GenericWebhookBody {
    sender: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    media: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(serde::Deserialize)]
struct WhatsAppVerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

#[derive(Serialize)]
struct HealthBody {
    #[serde(flatten)]
    snapshot: HealthSnapshot,
    queue: QueueStats,
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(generic_webhook))
        .route("/whatsapp", get(whatsapp_verify).post(whatsapp_inbound))
        .route("/admin/reclaim", post(admin_reclaim))
        .route("/admin/senders/{sender}/pause", post(admin_pause))
        .route("/admin/senders/{sender}/resume", post(admin_resume))
        .with_state(state)
}

pub async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    Ok(TcpListener::bind(addr).await?)
}

/// Serve on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: GatewayState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let local_addr: SocketAddr = listener.local_addr()?;
    tracing::info!("gateway listening on http://{local_addr}");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    tracing::info!("gateway stopped");
    Ok(())
}

fn bearer_is_valid(headers: &HeaderMap, expected: &Option<String>) -> bool {
    let Some(expected_token) = expected else {
        return true;
    };
    let header_value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let candidate = header_value
        .strip_prefix("Bearer ")
        .unwrap_or_default()
        .trim();
    !expected_token.is_empty() && candidate == expected_token
}

fn unauthorized() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "unauthorized"})),
    )
}

async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    let snapshot = state.health.snapshot();
    let status = if snapshot.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthBody {
        snapshot,
        queue: state.queue.stats(),
    };
    (status, Json(body))
}

async fn generic_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(body): Json<GenericWebhookBody>,
) -> impl IntoResponse {
    if !bearer_is_valid(&headers, &state.bearer_token) {
        return unauthorized();
    }

    let sender = body.sender.trim();
    let media = body.media.as_deref().and_then(MediaKind::from_channel_type);
    let text = body.text.trim();
    if sender.is_empty() || (text.is_empty() && media.is_none()) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "sender and text or media are required"})),
        );
    }

    let mut message = match media {
        Some(kind) => InboundMessage::media(sender, kind, text),
        None => InboundMessage::text(sender, text),
    };
    if let Some(id) = body.message_id.filter(|id| !id.trim().is_empty()) {
        message = message.with_id(id.trim());
    }

    let (action, _settled) = state.queue.enqueue(message);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "queued": true,
            "dropped": action == EnqueueAction::DroppedOldest
        })),
    )
}

async fn whatsapp_verify(
    State(state): State<GatewayState>,
    Query(query): Query<WhatsAppVerifyQuery>,
) -> impl IntoResponse {
    let Some(client) = state.whatsapp else {
        return (StatusCode::NOT_FOUND, "whatsapp channel not configured").into_response();
    };

    let mode = query.mode.unwrap_or_default();
    let token = query.verify_token.unwrap_or_default();
    if mode == "subscribe" && !token.is_empty() && token == client.verify_token() {
        let challenge = query.challenge.unwrap_or_default();
        return (StatusCode::OK, challenge).into_response();
    }

    (StatusCode::FORBIDDEN, "verification failed").into_response()
}

async fn whatsapp_inbound(
    State(state): State<GatewayState>,
    Json(payload): Json<serde_json::Value>,
) -> impl IntoResponse {
    let Some(client) = state.whatsapp else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "whatsapp channel not configured"})),
        );
    };

    let mut queued: usize = 0;
    let mut dropped: usize = 0;
    for message in client.parse_webhook_payload(&payload) {
        let (action, _settled) = state.queue.enqueue(message);
        queued = queued.saturating_add(1);
        if action == EnqueueAction::DroppedOldest {
            dropped = dropped.saturating_add(1);
        }
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "queued": queued,
            "dropped": dropped
        })),
    )
}

// ── Operator routes ────────────────────────────────────────────

async fn admin_reclaim(
    State(state): State<GatewayState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !bearer_is_valid(&headers, &state.bearer_token) {
        return unauthorized();
    }
    let report = state.janitor.reclaim();
    (StatusCode::OK, Json(serde_json::json!(report)))
}

async fn admin_pause(
    State(state): State<GatewayState>,
    Path(sender): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !bearer_is_valid(&headers, &state.bearer_token) {
        return unauthorized();
    }
    let ticket = state.pipeline.pause_sender(&sender);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "sender": sender,
            "paused": true,
            "expiresInMs": ticket.duration.as_millis() as u64
        })),
    )
}

async fn admin_resume(
    State(state): State<GatewayState>,
    Path(sender): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !bearer_is_valid(&headers, &state.bearer_token) {
        return unauthorized();
    }
    let resumed = state.pipeline.resume_sender(&sender);
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "sender": sender,
            "resumed": resumed
        })),
    )
}
