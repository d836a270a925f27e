#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use rollcall_api::handlers::{HealthResponse, MessageResponse, StatusResponse};
use rollcall_api::{router, AppState, ErrorResponse};
use rollcall_core::mock::MemoryWorkloads;
use rollcall_core::{MatchMode, TargetKey, TargetRegistry, TargetSpec};
use rollcall_notify::{MemoryTransport, Notifier};
use rollcall_ops::RelayContext;
use serde::de::DeserializeOwned;
use serde_json::json;
use tower::ServiceExt;

struct Harness {
    app: Router,
    ctx: Arc<RelayContext>,
    workloads: Arc<MemoryWorkloads>,
    transport: Arc<MemoryTransport>,
}

fn harness() -> Harness {
    let registry = TargetRegistry::new(
        vec![TargetSpec::new("auth-service", "backend", "auth-service")],
        MatchMode::Substring,
    )
    .expect("valid table");
    let workloads = Arc::new(MemoryWorkloads::new());
    let transport = Arc::new(MemoryTransport::new());
    let notifier = Notifier::new(transport.clone(), Duration::from_secs(1));
    let ctx = Arc::new(RelayContext::new(registry, workloads.clone(), notifier));
    let app = router(AppState::new(ctx.clone(), Duration::from_secs(30)));
    Harness { app, ctx, workloads, transport }
}

fn auth() -> TargetKey { TargetKey::new("backend", "auth-service") }

async fn post(app: &Router, uri: &str, body: String) -> (StatusCode, Vec<u8>) {
    let resp = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> T {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn health_reports_healthy_with_timestamp() {
    let h = harness();
    let resp = h.app.clone().oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: HealthResponse = decode(&bytes);
    assert_eq!(body.status, "healthy");
    assert!(chrono::DateTime::parse_from_rfc3339(&body.timestamp).is_ok(), "{}", body.timestamp);
}

#[tokio::test]
async fn mapped_push_updates_and_marks_pending() {
    let h = harness();
    let payload = json!({"repository": {"repo_name": "registry.example/auth-service"}, "push_data": {"tag": "v2"}});
    let (status, bytes) = post(&h.app, "/webhook/dockerhub", payload.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decode::<MessageResponse>(&bytes).message, "Webhook processed successfully");
    assert_eq!(h.workloads.applied(), vec![(auth(), "registry.example/auth-service:v2".to_string())]);
    assert!(h.ctx.tracker.is_pending(&auth()));
    let sent = h.transport.wait_for(1, Duration::from_secs(1)).await;
    assert!(sent[0].contains("backend/auth-service"));
}

#[tokio::test]
async fn unmapped_push_is_a_successful_no_op() {
    let h = harness();
    let payload = json!({"repository": {"repo_name": "registry.example/unmapped-thing"}, "push_data": {"tag": "v2"}});
    let (status, bytes) = post(&h.app, "/webhook/dockerhub", payload.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decode::<MessageResponse>(&bytes).message, "No service mapping found");
    assert!(h.workloads.applied().is_empty());
    assert!(h.ctx.tracker.is_empty());
}

#[tokio::test]
async fn incomplete_push_is_rejected() {
    let h = harness();
    let (status, bytes) = post(&h.app, "/webhook/dockerhub", json!({"repository": {"repo_name": "x"}}).to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!decode::<ErrorResponse>(&bytes).error.is_empty());

    let (status, _) = post(&h.app, "/webhook/dockerhub", "{".to_string()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.workloads.applied().is_empty());
}

#[tokio::test]
async fn failed_update_returns_server_error() {
    let h = harness();
    h.workloads.fail_apply(&auth(), "deployments.apps \"auth-service\" not found");
    let payload = json!({"repository": {"repo_name": "registry.example/auth-service"}, "push_data": {"tag": "v2"}});
    let (status, bytes) = post(&h.app, "/webhook/dockerhub", payload.to_string()).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(decode::<ErrorResponse>(&bytes).error.contains("not found"));
    assert!(!h.ctx.tracker.is_pending(&auth()));
    let sent = h.transport.wait_for(1, Duration::from_secs(1)).await;
    assert!(sent[0].contains("failed"));
}

#[tokio::test]
async fn ci_failure_notifies_without_touching_updates() {
    let h = harness();
    let payload = json!({
        "action": "completed",
        "workflow_run": {"conclusion": "failure", "head_branch": "main"},
        "repository": {"name": "svc"}
    });
    let (status, bytes) = post(&h.app, "/webhook/github", payload.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(decode::<MessageResponse>(&bytes).message, "GitHub webhook processed successfully");
    let sent = h.transport.wait_for(1, Duration::from_secs(1)).await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("❌"));
    assert!(h.workloads.applied().is_empty());
    assert!(h.ctx.tracker.is_empty());
}

#[tokio::test]
async fn ci_handler_always_answers_ok() {
    let h = harness();
    for body in ["not json".to_string(), json!({"action": "labeled"}).to_string(), json!({}).to_string()] {
        let (status, bytes) = post(&h.app, "/webhook/github", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(decode::<MessageResponse>(&bytes).message, "GitHub webhook processed successfully");
    }
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn status_lists_targets_and_pending() {
    let h = harness();
    h.ctx.tracker.mark_pending(auth());
    let resp = h.app.clone().oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: StatusResponse = decode(&bytes);
    assert_eq!(body.targets.len(), 1);
    assert_eq!(body.pending, vec!["backend/auth-service".to_string()]);
    assert_eq!(body.poll_interval_secs, 30);
    assert_eq!(body.match_mode, MatchMode::Substring);
}
