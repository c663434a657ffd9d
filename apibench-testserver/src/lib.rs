//! A small time-series-flavoured SUT for integration tests.
//!
//! Writes accept line-protocol bodies and count the lines as points; queries report the
//! points written so far, so a query phase only sees rows after a write phase ran.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{Duration, sleep};

pub const PATH_WRITE: &str = "/api/v2/write";
pub const PATH_QUERY: &str = "/api/v2/query";
pub const PATH_HEALTH: &str = "/health";
pub const PATH_FAIL: &str = "/fail";
pub const PATH_SLOW: &str = "/slow";

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    writes_total: Arc<AtomicU64>,
    points_total: Arc<AtomicU64>,
    body_bytes_total: Arc<AtomicU64>,
    saw_bearer_token: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    fn observe_auth(&self, headers: &HeaderMap) {
        if headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("Bearer "))
        {
            self.saw_bearer_token.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn writes_total(&self) -> u64 {
        self.writes_total.load(Ordering::Relaxed)
    }

    pub fn points_total(&self) -> u64 {
        self.points_total.load(Ordering::Relaxed)
    }

    pub fn body_bytes_total(&self) -> u64 {
        self.body_bytes_total.load(Ordering::Relaxed)
    }

    pub fn saw_bearer_token(&self) -> u64 {
        self.saw_bearer_token.load(Ordering::Relaxed)
    }
}

async fn handle_write(
    State(stats): State<TestServerStats>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    stats.inc_requests_total();
    stats.observe_auth(&headers);

    if !query.contains_key("bucket") {
        return StatusCode::BAD_REQUEST;
    }

    let points = body
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .count() as u64;
    if points == 0 {
        return StatusCode::BAD_REQUEST;
    }

    stats.writes_total.fetch_add(1, Ordering::Relaxed);
    stats.points_total.fetch_add(points, Ordering::Relaxed);
    stats
        .body_bytes_total
        .fetch_add(body.len() as u64, Ordering::Relaxed);

    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    results: Vec<QueryRow>,
}

#[derive(Debug, Serialize)]
struct QueryRow {
    measurement: &'static str,
    points: u64,
}

async fn handle_query(
    State(stats): State<TestServerStats>,
    headers: HeaderMap,
) -> (StatusCode, Bytes) {
    stats.inc_requests_total();
    stats.observe_auth(&headers);

    let points = stats.points_total();
    let results = if points == 0 {
        Vec::new()
    } else {
        vec![QueryRow {
            measurement: "airSensors",
            points,
        }]
    };

    match serde_json::to_vec(&QueryResponse { results }) {
        Ok(bytes) => (StatusCode::OK, Bytes::from(bytes)),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Bytes::from_static(b"encode error"),
        ),
    }
}

async fn handle_health(State(stats): State<TestServerStats>) -> &'static str {
    stats.inc_requests_total();
    "ok"
}

async fn handle_fail(State(stats): State<TestServerStats>) -> (StatusCode, &'static str) {
    stats.inc_requests_total();
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn handle_slow(
    State(stats): State<TestServerStats>,
    Query(query): Query<HashMap<String, String>>,
) -> &'static str {
    stats.inc_requests_total();
    let ms = query
        .get("ms")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(50);
    sleep(Duration::from_millis(ms)).await;
    "slow"
}

pub fn router(stats: TestServerStats) -> Router {
    Router::new()
        .route(PATH_WRITE, post(handle_write))
        .route(PATH_QUERY, get(handle_query))
        .route(PATH_HEALTH, get(handle_health))
        .route(PATH_FAIL, get(handle_fail))
        .route(PATH_SLOW, get(handle_slow))
        .with_state(stats)
}

pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
