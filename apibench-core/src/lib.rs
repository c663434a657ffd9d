//! Benchmark execution engine: phased, rate-controlled request scheduling, per-request events,
//! metrics aggregation and threshold verdicts.

mod assert;
mod error;
mod event;
mod executor;
mod metrics;
mod operation;
mod orchestrator;
mod payload;
mod plan;
mod progress;
mod rate;
mod report;
mod scheduler;

pub use assert::{Check, Verdict, evaluate};
pub use error::{Error, Result};
pub use event::{ErrorKind, Event, EventLog, EventRecorder, EventStatus, RecorderTotals};
pub use executor::{
    DEFAULT_REQUEST_TIMEOUT, OperationExecutor, OutboundRequest, PreparedOperation, Transport,
    TransportError, response_non_empty,
};
pub use metrics::{ALL, MetricsSummary, PartitionSummary, percentile, summarize};
pub use operation::{OperationRef, OperationResolver, Role, StaticResolver};
pub use orchestrator::{BenchmarkOrchestrator, PreparedPlan};
pub use payload::{EmptyPayloads, PayloadError, PayloadProvider, TemplatePayloads};
pub use plan::{
    Guardrails, PayloadViolation, Phase, PhaseKind, PhaseMode, PhaseModeKind, Plan, RawPhase,
    RawPlan, Threshold, ThresholdSpec, ValidatedPlan, parse_thresholds,
};
pub use progress::{PhaseProgress, ProgressFn};
pub use rate::RateController;
pub use report::{BenchmarkReport, DEFAULT_EVENTS_SAMPLE, PhaseOutcome};
pub use scheduler::{PhaseRun, PhaseScheduler, PhaseState};

pub use apibench_http::{HttpClient, HttpRequest, HttpResponse, HttpTransportErrorKind};
