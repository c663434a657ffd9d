use std::fmt::Write as _;
use std::time::Duration;

use apibench_core::{BenchmarkReport, PartitionSummary, PreparedPlan};

use super::format::*;

pub(crate) fn render_plan(prepared: &PreparedPlan) -> String {
    let mut out = String::new();
    let plan = &prepared.plan;

    if let Some(system_id) = &plan.system_id {
        writeln!(out, "system: {system_id}").ok();
    }
    for (idx, phase) in plan.phases.iter().enumerate() {
        writeln!(
            out,
            "phase {}/{}: {} role={} {} concurrency={} target={}",
            idx + 1,
            plan.phases.len(),
            phase.name,
            phase.role,
            format_mode(&phase.mode),
            phase.concurrency,
            format_target(phase.target_bytes_per_second)
        )
        .ok();
    }
    for (role, op) in &prepared.operations {
        writeln!(out, "operation: {role} {} {}", op.method, op.url).ok();
    }
    for t in &plan.thresholds {
        writeln!(out, "threshold: {}", t.check_name()).ok();
    }
    for w in &prepared.warnings {
        writeln!(out, "warning: {w}").ok();
    }

    out
}

pub(crate) fn render(report: &BenchmarkReport) -> String {
    let mut out = String::new();

    writeln!(out, "run: {}", report.run_id).ok();
    if let Some(system_id) = &report.system_id {
        writeln!(out, "system: {system_id}").ok();
    }

    if let Some(reason) = &report.fatal {
        writeln!(out, "fatal: {reason}").ok();
    }
    for w in &report.warnings {
        writeln!(out, "warning: {w}").ok();
    }

    if !report.phases.is_empty() {
        out.push('\n');
        out.push_str("phases\n");
    }
    for p in &report.phases {
        let elapsed = Duration::from_secs_f64(p.elapsed_ms.max(0.0) / 1000.0);
        writeln!(
            out,
            "  {} {}: {} c={} events={} errors={} elapsed={} state={}",
            p.name,
            p.role,
            format_mode(&p.mode),
            p.concurrency,
            p.events,
            p.errors,
            format_duration(elapsed),
            p.state
        )
        .ok();
        if p.target_bytes_per_second > 0 {
            writeln!(
                out,
                "    pacing: target {} achieved {}/s",
                format_target(p.target_bytes_per_second),
                format_bytes(p.achieved_bytes_per_second.round() as u64)
            )
            .ok();
        }
        if p.cancelled > 0 || p.ceiling_hit {
            writeln!(
                out,
                "    cancelled: {} ceiling_hit: {}",
                p.cancelled, p.ceiling_hit
            )
            .ok();
        }
    }

    if let Some(metrics) = &report.metrics {
        out.push('\n');
        out.push_str("summary\n");
        for part in &metrics.partitions {
            render_partition(&format!("{} {}", part.phase, part.role), part, &mut out);
        }
        render_partition("total", &metrics.total, &mut out);
    }

    if let Some(warmup) = &report.warmup_metrics
        && warmup.total.count > 0
    {
        writeln!(
            out,
            "warmup: {} events, availability {:.2}% (not asserted)",
            warmup.total.count, warmup.total.availability_pct
        )
        .ok();
    }

    if !report.verdict.checks.is_empty() {
        out.push('\n');
        out.push_str("thresholds\n");
        for c in &report.verdict.checks {
            let mark = if c.passed { "ok  " } else { "FAIL" };
            writeln!(out, "  {mark} {}: {}", c.name, c.detail).ok();
        }
    }

    out.push('\n');
    writeln!(out, "verdict: {}", if report.ok { "ok" } else { "failed" }).ok();

    out
}

fn render_partition(label: &str, p: &PartitionSummary, out: &mut String) {
    writeln!(out, "{label}").ok();
    writeln!(
        out,
        "  requests: {} (ok {} error {}) availability {:.2}%",
        p.count, p.ok, p.error, p.availability_pct
    )
    .ok();
    writeln!(
        out,
        "  latency: p50={} p95={} p99={} min={} mean={} max={}",
        format_ms_opt(p.p50_ms),
        format_ms_opt(p.p95_ms),
        format_ms_opt(p.p99_ms),
        format_ms_opt(p.min_ms),
        format_ms_opt(p.mean_ms),
        format_ms_opt(p.max_ms)
    )
    .ok();
    writeln!(
        out,
        "  bytes: sent {} recv {}",
        format_bytes(p.bytes_total),
        format_bytes(p.bytes_received)
    )
    .ok();

    if !p.errors_by_kind.is_empty() {
        let errors = p
            .errors_by_kind
            .iter()
            .map(|(kind, n)| format!("{kind}={n}"))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "  errors: {errors}").ok();
    }
}
