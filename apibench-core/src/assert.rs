//! Threshold evaluation.

use serde::Serialize;

use crate::event::Event;
use crate::metrics::{MetricsSummary, PartitionSummary};
use crate::operation::Role;
use crate::plan::{PhaseKind, Threshold, ThresholdSpec};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Check {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub ok: bool,
    pub checks: Vec<Check>,
    pub failures: Vec<String>,
}

impl Verdict {
    pub fn from_checks(checks: Vec<Check>) -> Self {
        let failures: Vec<String> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect();
        Self {
            ok: failures.is_empty(),
            checks,
            failures,
        }
    }

    /// A verdict that failed before any threshold could be evaluated.
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            checks: Vec::new(),
            failures: vec![reason.into()],
        }
    }
}

/// Evaluates every threshold against run-phase metrics and events.
///
/// Unscoped thresholds read the summary total; role-scoped ones read the `run` partition of
/// that role, and fail when the role produced no run events.
pub fn evaluate(thresholds: &[ThresholdSpec], metrics: &MetricsSummary, events: &[Event]) -> Verdict {
    let run = PhaseKind::Run.to_string();

    let checks = thresholds
        .iter()
        .map(|spec| {
            let name = spec.check_name();
            let partition = match &spec.role {
                None => Some(&metrics.total),
                Some(role) => metrics.partition(&run, role.as_str()),
            };

            let (passed, detail) = match (&spec.threshold, partition) {
                (Threshold::NonEmptyQueryResults, _) => non_empty_query_results(events),
                (Threshold::OkRoles(roles), _) => ok_roles(roles, events),
                (_, None) => (false, "no run events for this role".to_string()),
                (threshold, Some(p)) => metric_check(threshold, p),
            };

            Check {
                name,
                passed,
                detail,
            }
        })
        .collect();

    Verdict::from_checks(checks)
}

fn metric_check(threshold: &Threshold, p: &PartitionSummary) -> (bool, String) {
    match threshold {
        Threshold::AvailabilityPctMin(min) => {
            let observed = p.availability_pct;
            (
                observed >= *min,
                format!("availability {observed:.2}% (min {min}%, {} of {} ok)", p.ok, p.count),
            )
        }
        Threshold::ErrorRatePctMax(max) => {
            let observed = p.error_rate_pct();
            (
                observed <= *max,
                format!("error rate {observed:.2}% (max {max}%)"),
            )
        }
        Threshold::P50MsMax(max) => latency_check("p50", p.p50_ms, *max),
        Threshold::P95MsMax(max) => latency_check("p95", p.p95_ms, *max),
        Threshold::P99MsMax(max) => latency_check("p99", p.p99_ms, *max),
        Threshold::MinRequests(min) => (
            p.count >= *min,
            format!("{} requests (min {min})", p.count),
        ),
        Threshold::NonEmptyQueryResults | Threshold::OkRoles(_) => {
            (false, "not a metric threshold".to_string())
        }
    }
}

fn latency_check(label: &str, observed: Option<f64>, max: f64) -> (bool, String) {
    match observed {
        Some(v) => (v <= max, format!("{label} {v:.2} ms (max {max} ms)")),
        None => (false, format!("{label} unavailable: no events (max {max} ms)")),
    }
}

fn non_empty_query_results(events: &[Event]) -> (bool, String) {
    let queries: Vec<&Event> = events.iter().filter(|e| e.role.is_query()).collect();
    if queries.is_empty() {
        return (false, "no query events".to_string());
    }

    let ok = queries.iter().filter(|e| e.is_ok()).count();
    let non_empty = queries
        .iter()
        .filter(|e| e.is_ok())
        .filter(|e| e.non_empty == Some(true))
        .count();

    (
        non_empty > 0,
        format!(
            "{non_empty} of {ok} ok query responses non-empty ({} query events)",
            queries.len()
        ),
    )
}

fn ok_roles(roles: &[Role], events: &[Event]) -> (bool, String) {
    let missing: Vec<&str> = roles
        .iter()
        .filter(|role| !events.iter().any(|e| &e.role == *role && e.is_ok()))
        .map(Role::as_str)
        .collect();

    if missing.is_empty() {
        let all: Vec<&str> = roles.iter().map(Role::as_str).collect();
        (true, format!("ok events for {}", all.join(", ")))
    } else {
        (false, format!("no ok events for {}", missing.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::event::ErrorKind;
    use crate::metrics::summarize;

    fn ev(role: &str, ms: f64, kind: Option<ErrorKind>) -> Event {
        match kind {
            None => Event::ok(Role::from(role), Arc::from("run"), ms, 10),
            Some(k) => Event::error(Role::from(role), Arc::from("run"), ms, 10, k),
        }
    }

    fn spec(threshold: Threshold) -> ThresholdSpec {
        ThresholdSpec {
            role: None,
            threshold,
        }
    }

    #[test]
    fn availability_below_minimum_fails() {
        let mut events: Vec<Event> = (0..95).map(|_| ev("write", 20.0, None)).collect();
        events.extend((0..5).map(|_| ev("write", 20.0, Some(ErrorKind::Http5xx))));
        let metrics = summarize(&events);

        let verdict = evaluate(
            &[spec(Threshold::AvailabilityPctMin(96.0))],
            &metrics,
            &events,
        );
        assert!(!verdict.ok);
        assert_eq!(verdict.checks.len(), 1);
        assert_eq!(verdict.checks[0].name, "availability_pct_min");
        assert!(verdict.checks[0].detail.contains("95.00%"));
        assert_eq!(verdict.failures.len(), 1);

        let verdict = evaluate(
            &[spec(Threshold::AvailabilityPctMin(95.0))],
            &metrics,
            &events,
        );
        assert!(verdict.ok);
        assert!(verdict.failures.is_empty());
    }

    #[test]
    fn verdict_is_and_of_checks() {
        let events: Vec<Event> = (1..=10).map(|i| ev("write", f64::from(i), None)).collect();
        let metrics = summarize(&events);

        let verdict = evaluate(
            &[
                spec(Threshold::P95MsMax(100.0)),
                spec(Threshold::P99MsMax(5.0)),
                spec(Threshold::MinRequests(10)),
            ],
            &metrics,
            &events,
        );
        assert!(!verdict.ok);
        let passed: Vec<bool> = verdict.checks.iter().map(|c| c.passed).collect();
        assert_eq!(passed, vec![true, false, true]);
    }

    #[test]
    fn no_thresholds_is_ok() {
        let verdict = evaluate(&[], &summarize(&[]), &[]);
        assert!(verdict.ok);
        assert!(verdict.checks.is_empty());
    }

    #[test]
    fn latency_thresholds_fail_without_events() {
        let verdict = evaluate(&[spec(Threshold::P50MsMax(10.0))], &summarize(&[]), &[]);
        assert!(!verdict.ok);
    }

    #[test]
    fn non_empty_query_results_requires_query_content() {
        let t = [spec(Threshold::NonEmptyQueryResults)];

        let writes = vec![ev("write", 1.0, None)];
        let verdict = evaluate(&t, &summarize(&writes), &writes);
        assert!(!verdict.ok);
        assert!(verdict.checks[0].detail.contains("no query events"));

        let mut empty = ev("query", 1.0, None);
        empty.non_empty = Some(false);
        let events = vec![empty.clone()];
        assert!(!evaluate(&t, &summarize(&events), &events).ok);

        let mut full = ev("query", 1.0, None);
        full.non_empty = Some(true);
        let events = vec![empty, full];
        assert!(evaluate(&t, &summarize(&events), &events).ok);

        // Only the executor's content check counts, not the response size.
        let mut sized = ev("query", 1.0, None);
        sized.bytes_received = 12;
        let events = vec![sized];
        assert!(!evaluate(&t, &summarize(&events), &events).ok);
    }

    #[test]
    fn role_scoped_threshold_reads_run_partition() {
        let events = vec![
            ev("write", 500.0, None),
            ev("query", 5.0, None),
            ev("query", 7.0, None),
        ];
        let metrics = summarize(&events);
        let thresholds = [
            ThresholdSpec {
                role: Some(Role::from("query")),
                threshold: Threshold::P95MsMax(10.0),
            },
            ThresholdSpec {
                role: Some(Role::from("delete")),
                threshold: Threshold::MinRequests(0),
            },
        ];

        let verdict = evaluate(&thresholds, &metrics, &events);
        assert_eq!(verdict.checks[0].name, "p95_ms_max[query]");
        assert!(verdict.checks[0].passed);
        assert!(!verdict.checks[1].passed);
        assert!(!verdict.ok);
    }

    #[test]
    fn ok_roles_lists_missing_roles() {
        let events = vec![
            ev("write", 1.0, None),
            ev("query", 1.0, Some(ErrorKind::Http4xx)),
        ];
        let verdict = evaluate(
            &[spec(Threshold::OkRoles(vec![
                Role::from("write"),
                Role::from("query"),
            ]))],
            &summarize(&events),
            &events,
        );
        assert!(!verdict.ok);
        assert_eq!(verdict.checks[0].detail, "no ok events for query");
    }
}
