//! HTTP handlers.

use axum::{body::Bytes, extract::State, Json};
use chrono::{SecondsFormat, Utc};
use metrics::counter;
use rollcall_core::{MatchMode, TargetSpec};
use rollcall_ops::UpdateOutcome;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::payload::{CiEvent, RegistryPush};
use crate::{ApiError, ApiResult, AppState};

pub const NO_MAPPING: &str = "No service mapping found";
pub const REGISTRY_OK: &str = "Webhook processed successfully";
pub const CI_OK: &str = "GitHub webhook processed successfully";

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self { message: message.to_string() })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub match_mode: MatchMode,
    pub targets: Vec<TargetSpec>,
    pub pending: Vec<String>,
    pub poll_interval_secs: u64,
}

/// Alias table and in-flight updates, for operators.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        match_mode: state.ctx.registry.mode(),
        targets: state.ctx.registry.specs().to_vec(),
        pending: state.ctx.tracker.pending().iter().map(|k| k.to_string()).collect(),
        poll_interval_secs: state.poll_interval.as_secs(),
    })
}

/// Container registry push: resolve, update, mark pending.
pub async fn registry_push(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<MessageResponse>> {
    counter!("rollcall_registry_webhooks_total", 1u64);
    let push = RegistryPush::parse(&body).map_err(|e| {
        warn!(error = %e, "rejecting registry webhook");
        e
    })?;
    info!(image = %push.image, tag = %push.tag, "registry push received");
    match state.ctx.trigger_update(&push.image, &push.tag).await {
        UpdateOutcome::Unmapped => Ok(MessageResponse::new(NO_MAPPING)),
        UpdateOutcome::Applied { .. } => Ok(MessageResponse::new(REGISTRY_OK)),
        UpdateOutcome::Failed { target, image, error } => {
            Err(ApiError::UpdateFailed(format!("Failed to update {} to {}: {}", target, image, error)))
        }
    }
}

/// CI lifecycle event: relayed to the notifier, never fails the caller.
pub async fn ci_event(State(state): State<AppState>, body: Bytes) -> Json<MessageResponse> {
    counter!("rollcall_ci_webhooks_total", 1u64);
    match serde_json::from_slice::<CiEvent>(&body) {
        Ok(event) => {
            let action = event.classify();
            info!(repo = %event.repo(), action = ?action, "ci event received");
            match event.message() {
                Some(text) => state.ctx.notifier.notify(text),
                None => info!(action = ?action, "ci event not relayed"),
            }
        }
        Err(e) => warn!(error = %e, "ignoring unparseable ci payload"),
    }
    MessageResponse::new(CI_OK)
}
