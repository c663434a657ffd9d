use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::assert::{Verdict, evaluate};
use crate::error::{Error, Result};
use crate::event::{EventLog, unix_ms_now};
use crate::executor::{OperationExecutor, PreparedOperation, Transport};
use crate::metrics::summarize;
use crate::operation::{OperationResolver, Role};
use crate::payload::PayloadProvider;
use crate::plan::{Plan, PhaseKind, RawPlan, ValidatedPlan};
use crate::progress::ProgressFn;
use crate::report::{BenchmarkReport, DEFAULT_EVENTS_SAMPLE, PhaseOutcome};
use crate::scheduler::PhaseScheduler;

/// A validated plan with every operation bound to the executor's base URL.
#[derive(Debug, Clone)]
pub struct PreparedPlan {
    pub plan: Plan,
    pub warnings: Vec<String>,
    pub operations: BTreeMap<Role, PreparedOperation>,
}

/// Validates a plan, runs its phases in order, and assembles the report.
pub struct BenchmarkOrchestrator<T> {
    executor: Arc<OperationExecutor<T>>,
    payloads: Arc<dyn PayloadProvider>,
    events_sample: usize,
    progress: Option<ProgressFn>,
}

impl<T: Transport> BenchmarkOrchestrator<T> {
    pub fn new(executor: OperationExecutor<T>, payloads: Arc<dyn PayloadProvider>) -> Self {
        Self {
            executor: Arc::new(executor),
            payloads,
            events_sample: DEFAULT_EVENTS_SAMPLE,
            progress: None,
        }
    }

    #[must_use]
    pub fn with_events_sample(mut self, events_sample: usize) -> Self {
        self.events_sample = events_sample;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Option<ProgressFn>) -> Self {
        self.progress = progress;
        self
    }

    pub fn executor(&self) -> &OperationExecutor<T> {
        &self.executor
    }

    /// Plan validation plus operation binding; no request is sent.
    pub fn prepare(&self, raw: &RawPlan, resolver: &dyn OperationResolver) -> Result<PreparedPlan> {
        let ValidatedPlan { plan, warnings } =
            Plan::validate(raw, resolver, self.payloads.as_ref())?;

        let operations = plan
            .operations
            .iter()
            .map(|(role, op)| Ok((role.clone(), self.executor.prepare(role, op)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(PreparedPlan {
            plan,
            warnings,
            operations,
        })
    }

    /// Always yields a report; failures surface as `ok: false` with a fatal reason.
    pub async fn run(&self, raw: &RawPlan, resolver: &dyn OperationResolver) -> BenchmarkReport {
        match self.prepare(raw, resolver) {
            Ok(prepared) => self.execute(prepared).await,
            Err(err) => self.rejected(raw, &err),
        }
    }

    /// The report of a plan that failed [`prepare`](Self::prepare); nothing was sent.
    pub fn rejected(&self, raw: &RawPlan, err: &Error) -> BenchmarkReport {
        let report = BenchmarkReport::rejected(raw.system_id.clone(), err.to_string());
        tracing::error!(run_id = %report.run_id, error = %err, "plan validation failed");
        report
    }

    /// Runs the phases of an already prepared plan in order.
    pub async fn execute(&self, prepared: PreparedPlan) -> BenchmarkReport {
        let run_id = Uuid::new_v4();
        let started_at_ms = unix_ms_now();

        tracing::info!(
            %run_id,
            system_id = prepared.plan.system_id.as_deref().unwrap_or("-"),
            phases = prepared.plan.phases.len(),
            "benchmark started"
        );

        let mut outcomes = Vec::with_capacity(prepared.plan.phases.len());
        let mut logs: Vec<(PhaseKind, EventLog)> = Vec::new();
        let mut fatal: Option<String> = None;

        let total = prepared.plan.phases.len();
        for (idx, phase) in prepared.plan.phases.iter().enumerate() {
            let result = match prepared.operations.get(&phase.role) {
                Some(op) => {
                    PhaseScheduler::new(
                        self.executor.clone(),
                        self.payloads.clone(),
                        prepared.plan.guardrails.clone(),
                    )
                    .with_progress(self.progress.clone())
                    .at_position(idx + 1, total)
                    .run(phase, op)
                    .await
                }
                None => Err(Error::MissingRole(phase.role.to_string())),
            };

            match result {
                Ok(run) => {
                    outcomes.push(PhaseOutcome::new(phase, &run));
                    logs.push((phase.name, run.log));
                }
                Err(err) => {
                    tracing::error!(
                        %run_id,
                        phase = %phase.name,
                        role = %phase.role,
                        error = %err,
                        "phase failed; remaining phases skipped"
                    );
                    fatal = Some(format!("phase `{}` ({}): {err}", phase.name, phase.role));
                    break;
                }
            }
        }

        let of_kind = |kind: PhaseKind| {
            EventLog::concat(logs.iter().filter(|(k, _)| *k == kind).map(|(_, log)| log))
        };
        let warmup_log = of_kind(PhaseKind::Warmup);
        let run_log = of_kind(PhaseKind::Run);
        let metrics = summarize(run_log.events());
        let warmup_metrics = summarize(warmup_log.events());

        let verdict = match &fatal {
            Some(reason) => Verdict::fatal(reason.clone()),
            None => evaluate(&prepared.plan.thresholds, &metrics, run_log.events()),
        };

        let events_sample = logs
            .iter()
            .flat_map(|(_, log)| log.iter())
            .take(self.events_sample)
            .cloned()
            .collect();
        let ok = fatal.is_none() && verdict.ok;

        tracing::info!(
            %run_id,
            ok,
            run_events = run_log.len(),
            availability_pct = metrics.total.availability_pct,
            "benchmark finished"
        );

        BenchmarkReport {
            ok,
            run_id,
            system_id: prepared.plan.system_id.clone(),
            started_at_ms,
            finished_at_ms: unix_ms_now(),
            warnings: prepared.warnings,
            phases: outcomes,
            warmup_metrics: Some(warmup_metrics),
            metrics: Some(metrics),
            verdict,
            fatal,
            events_sample,
            plan: Some(prepared.plan),
        }
    }
}
