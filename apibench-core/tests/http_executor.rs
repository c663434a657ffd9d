use std::sync::Arc;
use std::time::Duration;

use anyhow::ensure;
use apibench_core::{
    BenchmarkOrchestrator, ErrorKind, OperationExecutor, OperationRef, RawPhase, RawPlan, Role,
    StaticResolver, TemplatePayloads,
};
use apibench_testserver::{PATH_FAIL, PATH_QUERY, PATH_SLOW, PATH_WRITE, TestServer};
use bytes::Bytes;

fn resolver() -> StaticResolver {
    StaticResolver::new()
        .with(
            "write",
            OperationRef::new(http::Method::POST, PATH_WRITE)
                .with_query("bucket", "bench")
                .with_header("content-type", "text/plain"),
        )
        .with(
            "query",
            OperationRef::new(http::Method::GET, PATH_QUERY).with_non_empty_pointer("/results"),
        )
}

#[tokio::test]
async fn write_then_query_against_live_server() -> anyhow::Result<()> {
    let server = TestServer::start().await?;

    let executor = OperationExecutor::http(server.base_url())
        .with_auth_token(Some("t0ken".to_string()));
    let payloads = TemplatePayloads::new().with("write", "airSensors,sensor={step} temp=21.{step}\n");
    let raw = RawPlan {
        system_id: Some("testserver".to_string()),
        operation_order: vec![Role::from("write"), Role::from("query")],
        phases: vec![RawPhase::iterations("run", 25, 5)],
        thresholds: [
            ("availability_pct_min".to_string(), serde_json::json!(100)),
            ("non_empty_query_results".to_string(), serde_json::json!(true)),
        ]
        .into_iter()
        .collect(),
        ..RawPlan::default()
    };

    let report = BenchmarkOrchestrator::new(executor, Arc::new(payloads))
        .run(&raw, &resolver())
        .await;

    ensure!(report.ok, "failures: {:?}", report.verdict.failures);
    ensure!(server.stats().writes_total() == 25);
    ensure!(server.stats().points_total() == 25);
    ensure!(server.stats().saw_bearer_token() == 50);

    let metrics = report
        .metrics
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("metrics missing"))?;
    let write = metrics
        .partition("run", "write")
        .ok_or_else(|| anyhow::anyhow!("write partition missing"))?;
    ensure!(write.bytes_total > server.stats().body_bytes_total());

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn query_before_any_write_is_empty() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let executor = OperationExecutor::http(server.base_url());
    let op = executor.prepare(
        &Role::from("query"),
        &OperationRef::new(http::Method::GET, PATH_QUERY).with_non_empty_pointer("/results"),
    )?;

    let event = executor.execute(&op, &Arc::from("run"), Bytes::new()).await;
    ensure!(event.is_ok());
    ensure!(event.non_empty == Some(false));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn server_errors_and_timeouts_become_events() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    let executor = OperationExecutor::http(server.base_url())
        .with_default_timeout(Duration::from_millis(100));
    let phase: Arc<str> = Arc::from("run");

    let fail = executor.prepare(
        &Role::from("write"),
        &OperationRef::new(http::Method::GET, PATH_FAIL),
    )?;
    let event = executor.execute(&fail, &phase, Bytes::new()).await;
    ensure!(event.error_kind == Some(ErrorKind::Http5xx));
    ensure!(event.http_status == Some(500));

    let slow = executor.prepare(
        &Role::from("query"),
        &OperationRef::new(http::Method::GET, PATH_SLOW).with_query("ms", "2000"),
    )?;
    let event = executor.execute(&slow, &phase, Bytes::new()).await;
    ensure!(event.error_kind == Some(ErrorKind::Timeout));
    ensure!(event.duration_ms < 1_000.0, "duration={}", event.duration_ms);

    let bad_write = executor.prepare(
        &Role::from("write"),
        &OperationRef::new(http::Method::POST, PATH_WRITE),
    )?;
    let event = executor
        .execute(&bad_write, &phase, Bytes::from_static(b"m v=1"))
        .await;
    ensure!(event.error_kind == Some(ErrorKind::Http4xx));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn closed_port_is_connection_refused() -> anyhow::Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let executor = OperationExecutor::http(format!("http://{addr}"));
    let op = executor.prepare(
        &Role::from("write"),
        &OperationRef::new(http::Method::POST, PATH_WRITE),
    )?;
    let event = executor.execute(&op, &Arc::from("run"), Bytes::new()).await;
    ensure!(
        event.error_kind == Some(ErrorKind::ConnectionRefused),
        "{:?}",
        event.error_kind
    );
    Ok(())
}
