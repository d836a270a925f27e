//! rollcall notifications: best-effort delivery of status messages to a chat.
//!
//! `Notifier::notify` never blocks and never fails. Each message is sent from
//! its own spawned task with a bounded timeout; failures end up in the log.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metrics::counter;
use tracing::{debug, info, warn};

/// Longest response body echoed into logs.
const MAX_LOGGED_BODY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("transport: {0}")]
    Transport(String),
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// A way of delivering one message.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, text: &str) -> Result<(), NotifyError>;
}

/// Telegram Bot API `sendMessage`.
pub struct TelegramTransport {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramTransport {
    pub const API_BASE: &'static str = "https://api.telegram.org";

    pub fn new(token: &str, chat_id: &str, timeout: Duration) -> Result<Self, NotifyError> {
        Self::with_api_base(Self::API_BASE, token, chat_id, timeout)
    }

    pub fn with_api_base(base: &str, token: &str, chat_id: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(format!("failed to build HTTP client: {}", e)))?;
        let endpoint = format!("{}/bot{}/sendMessage", base.trim_end_matches('/'), token);
        Ok(Self { client, endpoint, chat_id: chat_id.to_string() })
    }
}

#[async_trait::async_trait]
impl Transport for TelegramTransport {
    fn name(&self) -> &'static str { "telegram" }

    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            // reqwest errors can embed the URL, and with it the bot token
            .map_err(|e| NotifyError::Transport(e.without_url().to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected { status, body: truncate(&body, MAX_LOGGED_BODY) });
        }
        Ok(())
    }
}

/// Records messages instead of sending them.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<String>>,
    fail: bool,
}

impl MemoryTransport {
    pub fn new() -> Self { Self::default() }

    /// Every send is rejected (and still recorded).
    pub fn failing() -> Self { Self { sent: Mutex::new(Vec::new()), fail: true } }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Wait until at least `n` messages were recorded or `within` elapses.
    pub async fn wait_for(&self, n: usize, within: Duration) -> Vec<String> {
        let deadline = Instant::now() + within;
        loop {
            let sent = self.sent();
            if sent.len() >= n || Instant::now() >= deadline {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str { "memory" }

    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(text.to_string());
        }
        if self.fail {
            return Err(NotifyError::Rejected { status: 500, body: "memory transport set to fail".into() });
        }
        Ok(())
    }
}

/// Fire-and-forget front end over an optional transport.
#[derive(Clone)]
pub struct Notifier {
    transport: Option<Arc<dyn Transport>>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        info!(transport = transport.name(), timeout_ms = %timeout.as_millis(), "notifier enabled");
        Self { transport: Some(transport), timeout }
    }

    /// Every `notify` is a no-op.
    pub fn disabled() -> Self {
        info!("notification credentials not set; notifications disabled");
        Self { transport: None, timeout: Duration::ZERO }
    }

    pub fn is_enabled(&self) -> bool { self.transport.is_some() }

    /// Queue `message` for delivery and return immediately.
    pub fn notify(&self, message: impl Into<String>) {
        let Some(transport) = self.transport.clone() else { return };
        let message = message.into();
        let limit = self.timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(deliver(transport, message, limit));
            }
            Err(_) => warn!("no async runtime; notification dropped"),
        }
    }
}

async fn deliver(transport: Arc<dyn Transport>, message: String, limit: Duration) {
    let t0 = Instant::now();
    match tokio::time::timeout(limit, transport.send(&message)).await {
        Ok(Ok(())) => {
            counter!("rollcall_notifications_total", 1u64);
            debug!(transport = transport.name(), took_ms = %t0.elapsed().as_millis(), "notification delivered");
        }
        Ok(Err(NotifyError::Rejected { status, body })) => {
            counter!("rollcall_notify_failures_total", 1u64);
            warn!(transport = transport.name(), status, body = %body, "notification rejected");
        }
        Ok(Err(e)) => {
            counter!("rollcall_notify_failures_total", 1u64);
            warn!(transport = transport.name(), error = %e, "notification failed");
        }
        Err(_) => {
            counter!("rollcall_notify_failures_total", 1u64);
            warn!(transport = transport.name(), timeout_ms = %limit.as_millis(), "notification timed out");
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use tokio::sync::mpsc;

    struct StallTransport;

    #[async_trait::async_trait]
    impl Transport for StallTransport {
        fn name(&self) -> &'static str { "stall" }
        async fn send(&self, _text: &str) -> Result<(), NotifyError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn notify_delivers_through_transport() {
        let transport = Arc::new(MemoryTransport::new());
        let notifier = Notifier::new(transport.clone(), Duration::from_secs(1));
        notifier.notify("rollout healthy");
        assert_eq!(transport.wait_for(1, Duration::from_secs(1)).await, vec!["rollout healthy".to_string()]);
    }

    #[tokio::test]
    async fn disabled_notifier_is_silent() {
        let notifier = Notifier::disabled();
        assert!(!notifier.is_enabled());
        notifier.notify("nobody hears this");
    }

    #[tokio::test]
    async fn failures_and_stalls_are_absorbed() {
        let failing_transport = Arc::new(MemoryTransport::failing());
        let failing = Notifier::new(failing_transport.clone(), Duration::from_secs(1));
        failing.notify("will be rejected");
        failing.notify("rejected again");
        let mut sent = failing_transport.wait_for(2, Duration::from_secs(1)).await;
        sent.sort();
        assert_eq!(sent, vec!["rejected again".to_string(), "will be rejected".to_string()]);

        let stalled = Notifier::new(Arc::new(StallTransport), Duration::from_millis(20));
        let t0 = Instant::now();
        for _ in 0..5 {
            stalled.notify("will time out");
        }
        assert!(t0.elapsed() < Duration::from_millis(20), "notify waited on delivery: {:?}", t0.elapsed());
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    #[test]
    fn notify_outside_runtime_does_not_panic() {
        let notifier = Notifier::new(Arc::new(MemoryTransport::new()), Duration::from_secs(1));
        notifier.notify("dropped");
    }

    #[tokio::test]
    async fn telegram_posts_chat_id_and_text() {
        let (tx, mut rx) = mpsc::unbounded_channel::<serde_json::Value>();
        let app = Router::new().route(
            "/bottest-token/sendMessage",
            post(move |Json(body): Json<serde_json::Value>| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(body);
                    Json(serde_json::json!({"ok": true}))
                }
            }),
        );
        let base = serve(app).await;
        let t = TelegramTransport::with_api_base(&base, "test-token", "-1001", Duration::from_secs(2)).expect("client");
        t.send("deployed").await.expect("sent");
        let body = rx.recv().await.expect("body");
        assert_eq!(body["chat_id"], "-1001");
        assert_eq!(body["text"], "deployed");
    }

    #[tokio::test]
    async fn telegram_rejection_carries_status_and_body() {
        let app = Router::new().route(
            "/botbad/sendMessage",
            post(|| async { (StatusCode::FORBIDDEN, "bot was kicked from the group chat") }),
        );
        let base = serve(app).await;
        let t = TelegramTransport::with_api_base(&base, "bad", "-1001", Duration::from_secs(2)).expect("client");
        match t.send("deployed").await {
            Err(NotifyError::Rejected { status, body }) => {
                assert_eq!(status, 403);
                assert!(body.contains("kicked"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("ééé", 2), "éé…");
    }
}
