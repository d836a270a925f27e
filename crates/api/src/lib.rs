//! rollcall webhook ingress.
//!
//! Registry pushes drive image updates through the shared [`RelayContext`];
//! CI events are relayed to the notifier only.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use rollcall_ops::RelayContext;
use tower_http::trace::TraceLayer;

mod error;
pub mod handlers;
pub mod payload;

pub use error::{ApiError, ApiResult, ErrorResponse};

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<RelayContext>,
    pub poll_interval: Duration,
}

impl AppState {
    pub fn new(ctx: Arc<RelayContext>, poll_interval: Duration) -> Self {
        Self { ctx, poll_interval }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/webhook/dockerhub", post(handlers::registry_push))
        .route("/webhook/github", post(handlers::ci_event))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
