//! HTTP health server and usage counters.
//!
//! Exposes `/health` (liveness plus queue and task counts) and `/ready`
//! (200 while workers run and the queue accepts work, 503 otherwise).
//!
//! Also provides:
//! - [`UsageMetrics`] for lock-free per-request counters
//! - [`start_periodic_usage_flush`] for periodic metric emission
//!
//! Uses raw TCP + manual HTTP; the two endpoints do not justify a web framework.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::queue::RequestQueue;
use crate::tasks::TaskManager;

const USAGE_FLUSH_INTERVAL_SECS: u64 = 60;

// ============================================================================
// UsageMetrics
// ============================================================================

/// Lock-free counters shared by the orchestrator and its workers.
#[derive(Debug)]
pub struct UsageMetrics {
    /// Inbound messages seen.
    pub requests: AtomicU64,
    /// Messages answered by the fast path.
    pub fast_path_hits: AtomicU64,
    /// Requests turned away by admission control or the task limit.
    pub rejections: AtomicU64,
    /// Tool calls that reached the tool layer.
    pub tool_calls: AtomicU64,
    /// Prompt tokens consumed.
    pub input_tokens: AtomicU64,
    /// Completion tokens produced.
    pub output_tokens: AtomicU64,
    /// Executions that ended failed, partial or timed out, plus delivery errors.
    pub errors: AtomicU64,
    /// Whether workers are running.
    pub ready: AtomicBool,
}

impl UsageMetrics {
    /// Create zeroed counters with `ready = false`.
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            fast_path_hits: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            tool_calls: AtomicU64::new(0),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            ready: AtomicBool::new(false),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fast_path(&self) {
        self.fast_path_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool_calls(&self, count: u64) {
        self.tool_calls.fetch_add(count, Ordering::Relaxed);
    }

    /// Record token usage from an execution.
    pub fn record_tokens(&self, input: u64, output: u64) {
        self.input_tokens.fetch_add(input, Ordering::Relaxed);
        self.output_tokens.fetch_add(output, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Counters as a JSON object.
    pub fn snapshot(&self) -> serde_json::Value {
        json!({
            "requests": self.requests.load(Ordering::Relaxed),
            "fast_path_hits": self.fast_path_hits.load(Ordering::Relaxed),
            "rejections": self.rejections.load(Ordering::Relaxed),
            "tool_calls": self.tool_calls.load(Ordering::Relaxed),
            "input_tokens": self.input_tokens.load(Ordering::Relaxed),
            "output_tokens": self.output_tokens.load(Ordering::Relaxed),
            "errors": self.errors.load(Ordering::Relaxed),
        })
    }

    /// Emit current counters as a structured log line.
    pub fn emit_usage(&self, reason: &str) {
        info!(
            event = "usage_summary",
            reason = reason,
            requests = self.requests.load(Ordering::Relaxed),
            fast_path_hits = self.fast_path_hits.load(Ordering::Relaxed),
            rejections = self.rejections.load(Ordering::Relaxed),
            tool_calls = self.tool_calls.load(Ordering::Relaxed),
            input_tokens = self.input_tokens.load(Ordering::Relaxed),
            output_tokens = self.output_tokens.load(Ordering::Relaxed),
            errors = self.errors.load(Ordering::Relaxed),
            "Usage metrics"
        );
    }
}

impl Default for UsageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Health state
// ============================================================================

/// Everything the health endpoints report on.
#[derive(Clone)]
pub struct HealthState {
    started: Instant,
    metrics: Arc<UsageMetrics>,
    queue: Arc<RequestQueue>,
    tasks: Arc<TaskManager>,
}

impl HealthState {
    pub fn new(metrics: Arc<UsageMetrics>, queue: Arc<RequestQueue>, tasks: Arc<TaskManager>) -> Self {
        Self {
            started: Instant::now(),
            metrics,
            queue,
            tasks,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.metrics.is_ready() && !self.queue.is_closed()
    }

    /// Body of `GET /health`.
    pub fn health_json(&self) -> serde_json::Value {
        json!({
            "status": "ok",
            "uptime_secs": self.started.elapsed().as_secs(),
            "queue": self.queue.metrics(),
            "tasks": { "active": self.tasks.total_active() },
            "usage": self.metrics.snapshot(),
        })
    }

    /// Map a request line to a status line and JSON body.
    fn route(&self, method: &str, path: &str) -> (&'static str, String) {
        match (method, path) {
            ("GET", "/health") => ("200 OK", self.health_json().to_string()),
            ("GET", "/ready") => {
                if self.is_ready() {
                    ("200 OK", json!({"status": "ready"}).to_string())
                } else {
                    (
                        "503 Service Unavailable",
                        json!({"status": "not_ready"}).to_string(),
                    )
                }
            }
            _ => ("404 Not Found", json!({"error": "not_found"}).to_string()),
        }
    }
}

// ============================================================================
// Health server
// ============================================================================

/// Start the HTTP health server.
///
/// Serves:
/// - `GET /health` → 200 with `{"status":"ok","uptime_secs":N,"queue":{...},"tasks":{"active":N}}`
/// - `GET /ready`  → 200 while ready, 503 otherwise
/// - Anything else → 404
///
/// Returns a `JoinHandle` so callers can abort on shutdown.
pub async fn start_health_server(
    host: &str,
    port: u16,
    state: HealthState,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Health server listening");

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut stream, _addr)) => {
                    let state = state.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 512];
                        let n = match tokio::time::timeout(
                            Duration::from_secs(5),
                            tokio::io::AsyncReadExt::read(&mut stream, &mut buf),
                        )
                        .await
                        {
                            Ok(Ok(n)) => n,
                            _ => return,
                        };

                        let request = String::from_utf8_lossy(&buf[..n]);
                        let request_line = request.lines().next().unwrap_or_default();
                        let mut parts = request_line.split_whitespace();
                        let method = parts.next().unwrap_or_default();
                        let raw_path = parts.next().unwrap_or_default();
                        let path = raw_path.split('?').next().unwrap_or(raw_path);

                        let (status_line, body) = state.route(method, path);
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_line,
                            body.len(),
                            body
                        );

                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Health server accept error");
                }
            }
        }
    });

    Ok(handle)
}

// ============================================================================
// Periodic usage flush
// ============================================================================

/// Start a background task that emits usage metrics every 60 seconds.
///
/// Emits a final `shutdown` summary when `shutdown_rx` signals `true`.
pub fn start_periodic_usage_flush(
    metrics: Arc<UsageMetrics>,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(USAGE_FLUSH_INTERVAL_SECS));
        interval.tick().await; // skip first immediate tick

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    metrics.emit_usage("periodic");
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        metrics.emit_usage("shutdown");
                        break;
                    }
                }
            }
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueConfig, TasksConfig};

    fn state() -> HealthState {
        HealthState::new(
            Arc::new(UsageMetrics::new()),
            Arc::new(RequestQueue::new(&QueueConfig::default())),
            Arc::new(TaskManager::new(&TasksConfig::default())),
        )
    }

    async fn get(port: u16, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port))
            .await
            .unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = tokio::io::AsyncReadExt::read(&mut stream, &mut buf)
            .await
            .unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_usage_metrics_recording() {
        let m = UsageMetrics::new();
        m.record_request();
        m.record_request();
        m.record_fast_path();
        m.record_tool_calls(3);
        m.record_tokens(100, 40);
        m.record_error();
        let snap = m.snapshot();
        assert_eq!(snap["requests"], 2);
        assert_eq!(snap["fast_path_hits"], 1);
        assert_eq!(snap["tool_calls"], 3);
        assert_eq!(snap["input_tokens"], 100);
        assert_eq!(snap["errors"], 1);
        assert!(!m.is_ready());
    }

    #[test]
    fn test_ready_requires_flag_and_open_queue() {
        let s = state();
        assert!(!s.is_ready());
        s.metrics.set_ready(true);
        assert!(s.is_ready());
        s.queue.close();
        assert!(!s.is_ready());
    }

    #[test]
    fn test_health_json_shape() {
        let body = state().health_json();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["tasks"]["active"], 0);
        assert_eq!(body["queue"]["queue_size"], 0);
    }

    #[test]
    fn test_route_unknown_path() {
        let (status, body) = state().route("GET", "/metrics");
        assert_eq!(status, "404 Not Found");
        assert!(body.contains("not_found"));
        assert_eq!(state().route("POST", "/health").0, "404 Not Found");
    }

    #[tokio::test]
    async fn test_health_server_endpoints() {
        let s = state();
        let port = free_port().await;
        let handle = start_health_server("127.0.0.1", port, s.clone())
            .await
            .unwrap();

        let health = get(port, "/health").await;
        assert!(health.contains("200 OK"), "response: {}", health);
        assert!(health.contains("uptime_secs"));
        assert!(health.contains("\"active\":0"));

        let not_ready = get(port, "/ready").await;
        assert!(not_ready.contains("503"));

        s.metrics.set_ready(true);
        let ready = get(port, "/ready?check=1").await;
        assert!(ready.contains("200 OK"));

        handle.abort();
    }

    #[tokio::test]
    async fn test_usage_flush_stops_on_shutdown() {
        let (tx, rx) = tokio::sync::watch::channel(false);
        let handle = start_periodic_usage_flush(Arc::new(UsageMetrics::new()), rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
