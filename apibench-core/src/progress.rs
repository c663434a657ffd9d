use std::time::Duration;

use crate::operation::Role;
use crate::plan::{PhaseKind, PhaseMode};

#[derive(Debug, Clone)]
pub struct PhaseProgress {
    /// Monotonic tick counter (1-based) within the phase.
    pub tick: u64,
    /// 1-based position of the phase in the plan.
    pub index: usize,
    pub phases: usize,
    pub phase: PhaseKind,
    pub role: Role,
    pub mode: PhaseMode,
    pub concurrency: u64,
    pub elapsed: Duration,

    pub events_total: u64,
    pub errors_total: u64,
    pub bytes_sent_total: u64,

    /// Events/sec observed during the last progress interval.
    pub events_per_sec_now: f64,
    /// Bytes sent/sec observed during the last progress interval.
    pub bytes_sent_per_sec_now: u64,
    /// `0` when unthrottled.
    pub target_bytes_per_second: u64,
}

pub type ProgressFn = std::sync::Arc<dyn Fn(PhaseProgress) + Send + Sync + 'static>;
