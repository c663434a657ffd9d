use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::ensure;
use apibench_core::{
    BenchmarkOrchestrator, EmptyPayloads, ErrorKind, HttpRequest, HttpResponse, OperationExecutor,
    OperationRef, PhaseState, RawPhase, RawPlan, Role, StaticResolver, TemplatePayloads,
    Transport, TransportError, summarize,
};
use bytes::Bytes;

/// Answers every request after `latency`; every `fail_every`-th call returns 503.
struct FakeSut {
    latency: Duration,
    fail_every: Option<u64>,
    calls: AtomicU64,
}

impl FakeSut {
    fn new(latency_ms: u64) -> Self {
        Self {
            latency: Duration::from_millis(latency_ms),
            fail_every: None,
            calls: AtomicU64::new(0),
        }
    }

    fn failing_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n);
        self
    }
}

impl Transport for FakeSut {
    async fn send(&self, req: HttpRequest) -> Result<HttpResponse, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        tokio::time::sleep(self.latency).await;

        let status = match self.fail_every {
            Some(n) if call % n == 0 => 503,
            _ => 200,
        };
        let body = if req.url.contains("/query") {
            Bytes::from_static(br#"{"results":[{"points":1}]}"#)
        } else {
            Bytes::new()
        };
        Ok(HttpResponse {
            status,
            bytes_sent: req.body.len() as u64,
            bytes_received: body.len() as u64,
            body,
            headers: Vec::new(),
        })
    }
}

fn resolver() -> StaticResolver {
    StaticResolver::new()
        .with(
            "write",
            OperationRef::new(http::Method::POST, "/api/v2/write").with_query("bucket", "b"),
        )
        .with(
            "query",
            OperationRef::new(http::Method::GET, "/api/v2/query").with_non_empty_pointer("/results"),
        )
}

fn orchestrator(sut: FakeSut) -> BenchmarkOrchestrator<FakeSut> {
    let executor = OperationExecutor::new(sut, "http://sut.local");
    BenchmarkOrchestrator::new(executor, Arc::new(EmptyPayloads))
}

fn thresholds(pairs: &[(&str, serde_json::Value)]) -> BTreeMap<String, serde_json::Value> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn hundred_successful_writes() -> anyhow::Result<()> {
    let raw = RawPlan {
        phases: vec![RawPhase::iterations("run", 100, 10).with_role("write")],
        ..RawPlan::default()
    };

    let report = orchestrator(FakeSut::new(20))
        .run(&raw, &resolver())
        .await;

    ensure!(report.ok, "report: {:?}", report.fatal);
    let metrics = report
        .metrics
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("metrics missing"))?;
    let write = metrics
        .partition("run", "write")
        .ok_or_else(|| anyhow::anyhow!("write partition missing"))?;

    ensure!(write.count == 100);
    ensure!(write.ok == 100);
    ensure!(write.availability_pct == 100.0);
    let p50 = write.p50_ms.unwrap_or(f64::NAN);
    let p95 = write.p95_ms.unwrap_or(f64::NAN);
    ensure!((p50 - 20.0).abs() < 1.0, "p50={p50}");
    ensure!((p95 - 20.0).abs() < 1.0, "p95={p95}");
    ensure!(report.events_sample.len() == 50);
    ensure!(report.phases.len() == 1);
    ensure!(report.phases[0].state == PhaseState::Complete);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn five_server_errors_fail_availability_threshold() -> anyhow::Result<()> {
    let raw = RawPlan {
        phases: vec![RawPhase::iterations("run", 100, 10).with_role("write")],
        thresholds: thresholds(&[("availability_pct_min", serde_json::json!(96))]),
        ..RawPlan::default()
    };

    let report = orchestrator(FakeSut::new(20).failing_every(20))
        .run(&raw, &resolver())
        .await;

    ensure!(!report.ok);
    ensure!(report.fatal.is_none());
    let metrics = report
        .metrics
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("metrics missing"))?;
    ensure!(metrics.total.availability_pct == 95.0);
    ensure!(metrics.total.errors_by_kind.get(&ErrorKind::Http5xx) == Some(&5));
    ensure!(report.verdict.checks.len() == 1);
    ensure!(!report.verdict.checks[0].passed);
    ensure!(report.verdict.checks[0].name == "availability_pct_min");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unthrottled_duration_phase_matches_latency() -> anyhow::Result<()> {
    let raw = RawPlan {
        phases: vec![RawPhase::duration("run", 1_000, 1).with_role("write")],
        ..RawPlan::default()
    };

    let report = orchestrator(FakeSut::new(10)).run(&raw, &resolver()).await;
    ensure!(report.ok);
    let count = report.metrics.as_ref().map_or(0, |m| m.total.count);
    ensure!((95..=105).contains(&count), "count={count}");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn paced_phase_converges_on_target() -> anyhow::Result<()> {
    let target = 50_000;
    let raw = RawPlan {
        phases: vec![
            RawPhase::duration("run", 6_000, 8)
                .with_role("write")
                .with_target_bytes_per_second(target),
        ],
        ..RawPlan::default()
    };

    let executor = OperationExecutor::new(FakeSut::new(0), "http://sut.local");
    let payloads = TemplatePayloads::new().with("write", "cpu,host=h{step} usage=0.5 {step}\n".repeat(10));
    let report = BenchmarkOrchestrator::new(executor, Arc::new(payloads))
        .run(&raw, &resolver())
        .await;

    ensure!(report.ok);
    let phase = &report.phases[0];
    let achieved = phase.achieved_bytes_per_second;
    let target = target as f64;
    ensure!(
        (achieved - target).abs() / target < 0.05,
        "achieved={achieved} target={target}"
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn warmup_is_excluded_from_assertions() -> anyhow::Result<()> {
    let raw = RawPlan {
        operation_order: vec![Role::from("write"), Role::from("query")],
        phases: vec![
            RawPhase::iterations("warmup", 7, 2),
            RawPhase::iterations("run", 20, 4),
        ],
        thresholds: thresholds(&[
            ("min_requests", serde_json::json!(40)),
            ("non_empty_query_results", serde_json::json!(true)),
            ("ok_roles", serde_json::json!(["write", "query"])),
        ]),
        ..RawPlan::default()
    };

    let report = orchestrator(FakeSut::new(3)).run(&raw, &resolver()).await;
    ensure!(report.ok, "failures: {:?}", report.verdict.failures);

    let order: Vec<(String, String)> = report
        .phases
        .iter()
        .map(|p| (p.name.to_string(), p.role.to_string()))
        .collect();
    ensure!(
        order
            == vec![
                ("warmup".to_string(), "write".to_string()),
                ("warmup".to_string(), "query".to_string()),
                ("run".to_string(), "write".to_string()),
                ("run".to_string(), "query".to_string()),
            ],
        "{order:?}"
    );

    let metrics = report
        .metrics
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("metrics missing"))?;
    ensure!(metrics.total.count == 40);
    ensure!(metrics.partitions.iter().all(|p| p.phase == "run"));

    let warmup = report
        .warmup_metrics
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("warmup metrics missing"))?;
    ensure!(warmup.total.count == 14);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn invalid_plan_short_circuits_without_traffic() -> anyhow::Result<()> {
    let raw = RawPlan {
        phases: vec![RawPhase::iterations("run", 10, 0).with_role("write")],
        ..RawPlan::default()
    };

    let orchestrator = orchestrator(FakeSut::new(1));
    let report = orchestrator.run(&raw, &resolver()).await;

    ensure!(!report.ok);
    ensure!(report.plan.is_none());
    ensure!(report.phases.is_empty());
    ensure!(report.verdict.failures.len() == 1);
    ensure!(
        report
            .fatal
            .as_deref()
            .is_some_and(|f| f.contains("concurrency"))
    );
    ensure!(orchestrator.executor().transport().calls.load(Ordering::Relaxed) == 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unknown_threshold_is_a_config_error() -> anyhow::Result<()> {
    let raw = RawPlan {
        phases: vec![RawPhase::iterations("run", 1, 1).with_role("write")],
        thresholds: thresholds(&[("p42_ms_max", serde_json::json!(1))]),
        ..RawPlan::default()
    };

    let report = orchestrator(FakeSut::new(1)).run(&raw, &resolver()).await;
    ensure!(!report.ok);
    ensure!(
        report
            .fatal
            .as_deref()
            .is_some_and(|f| f.contains("p42_ms_max"))
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn aggregation_of_a_real_log_is_stable() -> anyhow::Result<()> {
    let raw = RawPlan {
        phases: vec![RawPhase::iterations("run", 50, 5).with_role("write")],
        ..RawPlan::default()
    };
    let report = orchestrator(FakeSut::new(4).failing_every(7))
        .with_events_sample(usize::MAX)
        .run(&raw, &resolver())
        .await;

    ensure!(report.events_sample.len() == 50);
    let first = summarize(&report.events_sample);
    let second = summarize(&report.events_sample);
    ensure!(first == second);
    ensure!(first.total.count == first.total.ok + first.total.error);
    ensure!(first.total.p50_ms <= first.total.p95_ms);
    ensure!(first.total.p95_ms <= first.total.p99_ms);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failing_phase_aborts_the_rest_and_keeps_completed_events() -> anyhow::Result<()> {
    let raw = RawPlan {
        operation_order: vec![Role::from("write"), Role::from("query")],
        phases: vec![RawPhase::iterations("run", 5, 1)],
        ..RawPlan::default()
    };

    let orchestrator = orchestrator(FakeSut::new(2));
    let mut prepared = orchestrator.prepare(&raw, &resolver())?;
    ensure!(prepared.plan.phases.len() == 2);
    prepared.operations.remove(&Role::from("query"));

    let report = orchestrator.execute(prepared).await;

    ensure!(!report.ok);
    ensure!(
        report
            .fatal
            .as_deref()
            .is_some_and(|f| f.contains("query")),
        "fatal: {:?}",
        report.fatal
    );
    ensure!(report.phases.len() == 1);
    ensure!(report.phases[0].role == Role::from("write"));
    ensure!(report.metrics.as_ref().map(|m| m.total.count) == Some(5));
    ensure!(report.events_sample.len() == 5);
    ensure!(orchestrator.executor().transport().calls.load(Ordering::Relaxed) == 5);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rejected_plan_report_reuses_the_prepare_error() -> anyhow::Result<()> {
    let raw = RawPlan {
        system_id: Some("influxdb".to_string()),
        phases: vec![RawPhase::iterations("run", 10, 0).with_role("write")],
        ..RawPlan::default()
    };

    let orchestrator = orchestrator(FakeSut::new(1));
    let err = match orchestrator.prepare(&raw, &resolver()) {
        Ok(_) => anyhow::bail!("zero concurrency must not prepare"),
        Err(err) => err,
    };
    let report = orchestrator.rejected(&raw, &err);

    ensure!(!report.ok);
    ensure!(report.fatal.as_deref() == Some(err.to_string().as_str()));
    ensure!(report.system_id.as_deref() == Some("influxdb"));
    ensure!(report.phases.is_empty());
    ensure!(orchestrator.executor().transport().calls.load(Ordering::Relaxed) == 0);
    Ok(())
}
