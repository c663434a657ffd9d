use serde::Serialize;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use apibench_core::{BenchmarkReport, PhaseKind, PhaseProgress, PreparedPlan, ProgressFn, Role};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_header(&self, _plan_path: &Path, _base_url: &str, _plan: &PreparedPlan) {}

    fn progress(&self) -> Option<ProgressFn> {
        Some(Arc::new(move |u| {
            let line = build_progress_line(&u);
            emit_json_line(&line);
        }))
    }

    fn print_report(&self, report: &BenchmarkReport) -> anyhow::Result<()> {
        let line = JsonReportLine {
            kind: "report",
            report,
        };
        let mut out = std::io::stdout().lock();
        serde_json::to_writer(&mut out, &line)?;
        writeln!(out)?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonProgressLine {
    pub kind: &'static str,
    pub phase_index: usize,
    pub phases: usize,
    pub phase: PhaseKind,
    pub role: Role,
    pub concurrency: u64,
    pub elapsed_ms: u64,

    pub events_total: u64,
    pub errors_total: u64,
    pub bytes_sent_total: u64,

    pub events_per_sec: f64,
    pub bytes_sent_per_sec: u64,
    pub target_bytes_per_second: u64,
}

#[derive(Debug, Serialize)]
struct JsonReportLine<'a> {
    kind: &'static str,
    #[serde(flatten)]
    report: &'a BenchmarkReport,
}

fn build_progress_line(u: &PhaseProgress) -> JsonProgressLine {
    JsonProgressLine {
        kind: "progress",
        phase_index: u.index,
        phases: u.phases,
        phase: u.phase,
        role: u.role.clone(),
        concurrency: u.concurrency,
        elapsed_ms: u.elapsed.as_millis().min(u128::from(u64::MAX)) as u64,
        events_total: u.events_total,
        errors_total: u.errors_total,
        bytes_sent_total: u.bytes_sent_total,
        events_per_sec: u.events_per_sec_now,
        bytes_sent_per_sec: u.bytes_sent_per_sec_now,
        target_bytes_per_second: u.target_bytes_per_second,
    }
}

fn emit_json_line<T: Serialize>(line: &T) {
    let mut out = std::io::stdout().lock();
    if serde_json::to_writer(&mut out, line).is_ok() {
        let _ = writeln!(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apibench_core::PhaseMode;
    use serde_json::Value;
    use std::time::Duration;

    #[test]
    fn progress_line_has_kind_and_phase() {
        let line = build_progress_line(&PhaseProgress {
            tick: 1,
            index: 2,
            phases: 3,
            phase: PhaseKind::Warmup,
            role: Role::from("query"),
            mode: PhaseMode::DurationMs(5_000),
            concurrency: 2,
            elapsed: Duration::from_millis(1_000),
            events_total: 10,
            errors_total: 0,
            bytes_sent_total: 500,
            events_per_sec_now: 10.0,
            bytes_sent_per_sec_now: 500,
            target_bytes_per_second: 0,
        });

        let v: Value = match serde_json::to_value(&line) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("progress"));
        assert_eq!(v.get("phase").and_then(Value::as_str), Some("warmup"));
        assert_eq!(v.get("role").and_then(Value::as_str), Some("query"));
        assert_eq!(v.get("elapsed_ms").and_then(Value::as_u64), Some(1_000));
        assert_eq!(v.get("phase_index").and_then(Value::as_u64), Some(2));
    }

    #[test]
    fn report_line_flattens_the_report() {
        let report = BenchmarkReport {
            ok: false,
            run_id: Default::default(),
            system_id: None,
            started_at_ms: 1,
            finished_at_ms: 2,
            plan: None,
            warnings: Vec::new(),
            phases: Vec::new(),
            warmup_metrics: None,
            metrics: None,
            verdict: apibench_core::Verdict::fatal("plan has no phases"),
            fatal: Some("plan has no phases".to_string()),
            events_sample: Vec::new(),
        };
        let line = JsonReportLine {
            kind: "report",
            report: &report,
        };

        let v: Value = match serde_json::to_value(&line) {
            Ok(v) => v,
            Err(err) => panic!("to_value failed: {err}"),
        };
        assert_eq!(v.get("kind").and_then(Value::as_str), Some("report"));
        assert_eq!(v.get("ok").and_then(Value::as_bool), Some(false));
        assert_eq!(
            v.get("fatal").and_then(Value::as_str),
            Some("plan has no phases")
        );
        assert_eq!(
            v.pointer("/verdict/failures/0").and_then(Value::as_str),
            Some("plan has no phases")
        );
    }
}
