use serde::Serialize;
use uuid::Uuid;

use crate::assert::Verdict;
use crate::event::{Event, unix_ms_now};
use crate::metrics::MetricsSummary;
use crate::operation::Role;
use crate::plan::{Plan, PhaseKind, PhaseMode};
use crate::scheduler::{PhaseRun, PhaseState};

pub const DEFAULT_EVENTS_SAMPLE: usize = 50;

/// How one executed phase ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseOutcome {
    pub name: PhaseKind,
    pub role: Role,
    pub mode: PhaseMode,
    pub concurrency: u64,
    pub state: PhaseState,
    pub events: u64,
    pub errors: u64,
    pub cancelled: u64,
    pub ceiling_hit: bool,
    pub elapsed_ms: f64,
    pub target_bytes_per_second: u64,
    pub achieved_bytes_per_second: f64,
}

impl PhaseOutcome {
    pub(crate) fn new(phase: &crate::plan::Phase, run: &PhaseRun) -> Self {
        Self {
            name: phase.name,
            role: phase.role.clone(),
            mode: phase.mode,
            concurrency: phase.concurrency,
            state: run.state,
            events: run.log.len() as u64,
            errors: run.log.iter().filter(|e| !e.is_ok()).count() as u64,
            cancelled: run.cancelled,
            ceiling_hit: run.ceiling_hit,
            elapsed_ms: run.elapsed.as_secs_f64() * 1000.0,
            target_bytes_per_second: phase.target_bytes_per_second,
            achieved_bytes_per_second: run.achieved_bytes_per_second,
        }
    }
}

/// The write-once result of one benchmark run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReport {
    pub ok: bool,
    pub run_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    /// The resolved plan; absent when validation failed.
    pub plan: Option<Plan>,
    pub warnings: Vec<String>,
    pub phases: Vec<PhaseOutcome>,
    pub warmup_metrics: Option<MetricsSummary>,
    pub metrics: Option<MetricsSummary>,
    pub verdict: Verdict,
    /// Set when the run stopped on a configuration or runtime error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
    pub events_sample: Vec<Event>,
}

impl BenchmarkReport {
    /// Report for a plan that never ran: no phases, no metrics, `reason` as the fatal cause.
    pub fn rejected(system_id: Option<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let now = unix_ms_now();
        Self {
            ok: false,
            run_id: Uuid::new_v4(),
            system_id,
            started_at_ms: now,
            finished_at_ms: now,
            plan: None,
            warnings: Vec::new(),
            phases: Vec::new(),
            warmup_metrics: None,
            metrics: None,
            verdict: Verdict::fatal(reason.clone()),
            fatal: Some(reason),
            events_sample: Vec::new(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
