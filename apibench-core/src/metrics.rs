//! Event log reduction: counts, availability and nearest-rank latency percentiles.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::event::{ErrorKind, Event};

/// Phase and role label of the [`MetricsSummary::total`] partition.
pub const ALL: &str = "*";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionSummary {
    pub phase: String,
    pub role: String,
    pub count: u64,
    pub ok: u64,
    pub error: u64,
    pub availability_pct: f64,
    /// Sum of `bytes_sent` over ok events.
    pub bytes_total: u64,
    pub bytes_received: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub mean_ms: Option<f64>,
    pub errors_by_kind: BTreeMap<ErrorKind, u64>,
}

impl PartitionSummary {
    pub fn error_rate_pct(&self) -> f64 {
        100.0 - self.availability_pct
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    /// One entry per `(phase, role)`, sorted.
    pub partitions: Vec<PartitionSummary>,
    /// Every event of the log, phase and role set to `*`.
    pub total: PartitionSummary,
}

impl MetricsSummary {
    pub fn partition(&self, phase: &str, role: &str) -> Option<&PartitionSummary> {
        self.partitions
            .iter()
            .find(|p| p.phase == phase && p.role == role)
    }
}

/// Reduces `events` into per-`(phase, role)` summaries. Pure and deterministic.
pub fn summarize(events: &[Event]) -> MetricsSummary {
    let mut groups: BTreeMap<(&str, &str), Vec<&Event>> = BTreeMap::new();
    for event in events {
        groups
            .entry((&*event.phase_name, event.role.as_str()))
            .or_default()
            .push(event);
    }

    let partitions = groups
        .into_iter()
        .map(|((phase, role), events)| summarize_partition(phase, role, &events))
        .collect();

    let all: Vec<&Event> = events.iter().collect();
    MetricsSummary {
        partitions,
        total: summarize_partition(ALL, ALL, &all),
    }
}

fn summarize_partition(phase: &str, role: &str, events: &[&Event]) -> PartitionSummary {
    let count = events.len() as u64;
    let ok = events.iter().filter(|e| e.is_ok()).count() as u64;
    let error = count - ok;

    let availability_pct = if count == 0 {
        100.0
    } else {
        100.0 * ok as f64 / count as f64
    };

    let mut bytes_total = 0u64;
    let mut bytes_received = 0u64;
    let mut errors_by_kind: BTreeMap<ErrorKind, u64> = BTreeMap::new();
    for event in events {
        if event.is_ok() {
            bytes_total = bytes_total.saturating_add(event.bytes_sent);
        }
        bytes_received = bytes_received.saturating_add(event.bytes_received);
        if let Some(kind) = event.error_kind {
            *errors_by_kind.entry(kind).or_default() += 1;
        }
    }

    let mut durations: Vec<f64> = events
        .iter()
        .filter(|e| e.was_sent())
        .map(|e| e.duration_ms)
        .collect();
    durations.sort_by(f64::total_cmp);

    let mean_ms = if durations.is_empty() {
        None
    } else {
        Some(durations.iter().sum::<f64>() / durations.len() as f64)
    };

    PartitionSummary {
        phase: phase.to_string(),
        role: role.to_string(),
        count,
        ok,
        error,
        availability_pct,
        bytes_total,
        bytes_received,
        p50_ms: percentile(&durations, 50),
        p95_ms: percentile(&durations, 95),
        p99_ms: percentile(&durations, 99),
        min_ms: durations.first().copied(),
        max_ms: durations.last().copied(),
        mean_ms,
        errors_by_kind,
    }
}

/// Nearest rank on sorted values: `sorted[ceil(k/100 * n)]`, clamped to `n - 1`.
pub fn percentile(sorted: &[f64], k: u32) -> Option<f64> {
    let n = sorted.len();
    if n == 0 {
        return None;
    }
    let rank = (k as usize * n).div_ceil(100);
    Some(sorted[rank.min(n - 1)])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::operation::Role;

    fn ev(phase: &str, role: &str, ms: f64, kind: Option<ErrorKind>) -> Event {
        match kind {
            None => Event::ok(Role::from(role), Arc::from(phase), ms, 100),
            Some(k) => Event::error(Role::from(role), Arc::from(phase), ms, 100, k),
        }
    }

    #[test]
    fn empty_log_is_fully_available_without_percentiles() {
        let summary = summarize(&[]);
        assert!(summary.partitions.is_empty());
        assert_eq!(summary.total.count, 0);
        assert_eq!(summary.total.availability_pct, 100.0);
        assert_eq!(summary.total.p50_ms, None);
        assert_eq!(summary.total.mean_ms, None);
    }

    #[test]
    fn partitions_by_phase_and_role() {
        let events = vec![
            ev("run", "write", 10.0, None),
            ev("run", "query", 5.0, None),
            ev("warmup", "write", 1.0, Some(ErrorKind::Timeout)),
            ev("run", "write", 30.0, Some(ErrorKind::Http5xx)),
        ];
        let summary = summarize(&events);

        let keys: Vec<(&str, &str)> = summary
            .partitions
            .iter()
            .map(|p| (p.phase.as_str(), p.role.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![("run", "query"), ("run", "write"), ("warmup", "write")]
        );

        let write = summary
            .partition("run", "write")
            .unwrap_or_else(|| panic!("missing partition"));
        assert_eq!((write.count, write.ok, write.error), (2, 1, 1));
        assert_eq!(write.availability_pct, 50.0);
        assert_eq!(write.bytes_total, 100);
        assert_eq!(write.errors_by_kind.get(&ErrorKind::Http5xx), Some(&1));
        assert_eq!(summary.total.count, 4);
    }

    #[test]
    fn nearest_rank_uses_ceiling_clamped_to_last() {
        let sorted: Vec<f64> = (1..=10).map(f64::from).collect();
        // ceil(0.5 * 10) = 5 -> sorted[5]
        assert_eq!(percentile(&sorted, 50), Some(6.0));
        // ceil(0.95 * 10) = 10 -> clamped to sorted[9]
        assert_eq!(percentile(&sorted, 95), Some(10.0));
        assert_eq!(percentile(&[7.0], 99), Some(7.0));
        assert_eq!(percentile(&[], 50), None);
    }

    #[test]
    fn percentiles_are_ordered_and_counts_balance() {
        let events: Vec<Event> = (0..257)
            .map(|i| {
                let kind = (i % 13 == 0).then_some(ErrorKind::Http4xx);
                ev("run", "write", f64::from((i * 37) % 101), kind)
            })
            .collect();
        let summary = summarize(&events);

        for p in summary.partitions.iter().chain(std::iter::once(&summary.total)) {
            assert_eq!(p.count, p.ok + p.error);
            assert!((0.0..=100.0).contains(&p.availability_pct));
            let (p50, p95, p99) = (p.p50_ms, p.p95_ms, p.p99_ms);
            assert!(p50 <= p95 && p95 <= p99, "{p50:?} {p95:?} {p99:?}");
        }
    }

    #[test]
    fn unsent_events_count_but_carry_no_latency() {
        let events = vec![
            ev("run", "write", 40.0, None),
            ev("run", "write", 0.0, Some(ErrorKind::PayloadError)),
            ev("run", "write", 0.0, Some(ErrorKind::PayloadRejected)),
        ];
        let summary = summarize(&events);
        let write = summary
            .partition("run", "write")
            .unwrap_or_else(|| panic!("missing partition"));

        assert_eq!((write.count, write.ok, write.error), (3, 1, 2));
        assert_eq!(write.p50_ms, Some(40.0));
        assert_eq!(write.min_ms, Some(40.0));
        assert_eq!(write.mean_ms, Some(40.0));

        let unsent_only = summarize(&events[1..]);
        assert_eq!(unsent_only.total.count, 2);
        assert_eq!(unsent_only.total.p99_ms, None);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let events = vec![
            ev("run", "write", 3.0, None),
            ev("run", "write", 1.0, Some(ErrorKind::Cancelled)),
        ];
        assert_eq!(summarize(&events), summarize(&events));
    }
}
