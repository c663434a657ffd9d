use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

const MIN_PACING_SLEEP: Duration = Duration::from_millis(1);

/// Per-phase bytes/second ceiling shared by the phase's workers.
///
/// A send is admitted while the bytes already reserved stay below `elapsed * target`; the
/// admitted send then reserves its own size, which may overshoot the budget by one request.
/// Otherwise the caller sleeps for the deficit and retries. The byte counter is the only
/// shared state and is reserved with a CAS, so two workers cannot both spend the same
/// headroom. A target of `0` disables pacing.
#[derive(Debug)]
pub struct RateController {
    target_bytes_per_second: u64,
    started: Instant,
    sent: AtomicU64,
}

impl RateController {
    pub fn new(target_bytes_per_second: u64) -> Self {
        Self::starting_at(target_bytes_per_second, Instant::now())
    }

    pub fn starting_at(target_bytes_per_second: u64, started: Instant) -> Self {
        Self {
            target_bytes_per_second,
            started,
            sent: AtomicU64::new(0),
        }
    }

    pub fn is_unthrottled(&self) -> bool {
        self.target_bytes_per_second == 0
    }

    pub fn target_bytes_per_second(&self) -> u64 {
        self.target_bytes_per_second
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Waits until `bytes` may be sent and reserves them.
    ///
    /// Returns `false` without reserving when the admission time would fall at or after
    /// `stop_at`; the caller must not send in that case.
    pub async fn acquire(&self, bytes: u64, stop_at: Option<Instant>) -> bool {
        if self.is_unthrottled() {
            self.sent.fetch_add(bytes, Ordering::Relaxed);
            return true;
        }

        let target = self.target_bytes_per_second as f64;
        loop {
            let now = Instant::now();
            if let Some(stop_at) = stop_at
                && now >= stop_at
            {
                return false;
            }

            let allowed = now.duration_since(self.started).as_secs_f64() * target;
            let sent = self.sent.load(Ordering::Relaxed);

            if (sent as f64) < allowed {
                if self
                    .sent
                    .compare_exchange_weak(
                        sent,
                        sent.saturating_add(bytes),
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    return true;
                }
                continue;
            }

            let deficit = Duration::from_secs_f64((sent as f64 - allowed) / target);
            let wake_at = now + deficit.max(MIN_PACING_SLEEP);
            if let Some(stop_at) = stop_at
                && wake_at >= stop_at
            {
                return false;
            }

            tokio::time::sleep_until(wake_at).await;
        }
    }

    /// Average admitted rate since the controller started.
    pub fn achieved_bytes_per_second(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.bytes_sent() as f64 / secs
    }
}
