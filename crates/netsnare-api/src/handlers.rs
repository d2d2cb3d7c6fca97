//! Diagnostics handlers.
//!
//! Everything here reads shared state and returns JSON; the only mutating
//! route is the manual spool replay trigger.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::DiagState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// GET /monitor
pub async fn monitor(State(state): State<DiagState>) -> impl IntoResponse {
    let diagnostics = state.client.diagnostics().snapshot();
    Json(serde_json::json!({
        "honeypot": {
            "id": state.config.honeypot_id,
            "version": snare_core::VERSION,
            "uptime": state.started_at.elapsed().as_secs(),
            "api": {
                "endpoint": state.config.api_endpoint,
                "lastHeartbeat": diagnostics.last_success.map(epoch_secs),
                "offlineMode": state.config.offline_mode,
            },
            "modules": state.modules.snapshot(),
        }
    }))
}

/// GET /api-diagnostics (debug mode)
pub async fn api_diagnostics(State(state): State<DiagState>) -> impl IntoResponse {
    // The raw key must never leave the process, even in debug mode.
    let mut config = serde_json::to_value(state.config.as_ref()).unwrap_or_default();
    if let Some(obj) = config.as_object_mut() {
        obj.insert(
            "api_key".to_string(),
            serde_json::Value::String(state.config.redacted_api_key()),
        );
    }

    ApiResponse::ok(serde_json::json!({
        "config": config,
        "heartbeat": state.client.diagnostics().snapshot(),
        "cache": state.throttle.stats(),
        "tls_fingerprint": state.tls_fingerprint,
    }))
}

/// GET /test-heartbeat — trigger one heartbeat and report its outcome.
pub async fn test_heartbeat(State(state): State<DiagState>) -> impl IntoResponse {
    if state.config.offline_mode {
        return error_response("offline mode, heartbeats disabled", StatusCode::CONFLICT)
            .into_response();
    }
    match state.client.send_heartbeat().await {
        Ok(()) => ApiResponse::ok(serde_json::json!({
            "delivered": true,
            "consecutive_failures": 0,
        }))
        .into_response(),
        Err(e) => ApiResponse::ok(serde_json::json!({
            "delivered": false,
            "error": e.to_string(),
            "consecutive_failures": state.client.diagnostics().consecutive_failures(),
        }))
        .into_response(),
    }
}

/// GET /offline-attacks (debug mode)
pub async fn offline_attacks(State(state): State<DiagState>) -> impl IntoResponse {
    match state.client.spool().entries() {
        Ok(entries) => ApiResponse::ok(entries).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}

/// POST /upload-offline-attacks (debug mode) — run one replay pass.
pub async fn upload_offline_attacks(State(state): State<DiagState>) -> impl IntoResponse {
    match state.client.replay_spool().await {
        Ok(stats) => ApiResponse::ok(stats).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
    }
}
