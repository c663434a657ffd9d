#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// The run completed but one or more thresholds failed.
    VerdictFailed = 11,

    /// Invalid CLI flags, unreadable plan document, or a plan rejected by validation.
    InvalidInput = 30,

    /// Internal/runtime error (IO errors, phase failures, worker faults).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_report(report: &apibench_core::BenchmarkReport) -> Self {
        if report.ok {
            Self::Success
        } else if report.plan.is_none() {
            Self::InvalidInput
        } else if report.is_fatal() {
            Self::RuntimeError
        } else {
            Self::VerdictFailed
        }
    }
}
