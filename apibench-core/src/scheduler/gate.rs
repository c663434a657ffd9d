use std::sync::atomic::{AtomicU64, Ordering};

use tokio::time::Instant;

/// Hands out step indices until the phase's termination condition is met.
#[derive(Debug)]
pub(crate) struct IterationGate {
    remaining: Option<AtomicU64>,
    total: u64,
    next_step: AtomicU64,
    close_at: Instant,
}

impl IterationGate {
    /// `iterations: None` runs until `close_at`; otherwise `close_at` is only a ceiling.
    pub(crate) fn new(iterations: Option<u64>, close_at: Instant) -> Self {
        Self {
            remaining: iterations.map(AtomicU64::new),
            total: iterations.unwrap_or(0),
            next_step: AtomicU64::new(0),
            close_at,
        }
    }

    pub(crate) fn close_at(&self) -> Instant {
        self.close_at
    }

    /// Claims the next step, or `None` once the phase must stop issuing requests.
    pub(crate) fn claim(&self) -> Option<u64> {
        if Instant::now() >= self.close_at {
            return None;
        }

        match &self.remaining {
            Some(remaining) => {
                let before = remaining
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1))
                    .ok()?;
                Some(self.total - before)
            }
            None => Some(self.next_step.fetch_add(1, Ordering::Relaxed)),
        }
    }
}
