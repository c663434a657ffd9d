mod gate;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{Error, Result};
use crate::event::{ErrorKind, Event, EventLog, EventRecorder, unix_ms_now};
use crate::executor::{OperationExecutor, PreparedOperation, Transport};
use crate::payload::PayloadProvider;
use crate::plan::{Guardrails, Phase, PhaseMode, PayloadViolation};
use crate::progress::{PhaseProgress, ProgressFn};
use crate::rate::RateController;

use gate::IterationGate;

/// Pause after a payload that was never sent, so a failing provider cannot spin a worker.
const UNSENT_BACKOFF: Duration = Duration::from_millis(10);

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, strum::Display, strum::FromRepr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum PhaseState {
    Pending = 0,
    Running = 1,
    Draining = 2,
    Complete = 3,
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(PhaseState::Pending as u8))
    }

    fn get(&self) -> PhaseState {
        PhaseState::from_repr(self.0.load(Ordering::Acquire)).unwrap_or(PhaseState::Complete)
    }

    fn advance(&self, to: PhaseState, phase: &Phase) {
        let from = self.get();
        if from >= to {
            return;
        }
        self.0.store(to as u8, Ordering::Release);
        tracing::debug!(phase = %phase.name, role = %phase.role, %from, %to, "phase state");
    }
}

/// What one phase produced.
#[derive(Debug, Clone)]
pub struct PhaseRun {
    pub log: EventLog,
    pub state: PhaseState,
    pub elapsed: Duration,
    /// Requests abandoned after the drain grace period.
    pub cancelled: u64,
    /// Whether the phase was closed by its wall-clock ceiling.
    pub ceiling_hit: bool,
    pub achieved_bytes_per_second: f64,
}

/// Runs one phase as a bounded pool of workers.
pub struct PhaseScheduler<T> {
    executor: Arc<OperationExecutor<T>>,
    payloads: Arc<dyn PayloadProvider>,
    guardrails: Guardrails,
    progress: Option<ProgressFn>,
    position: (usize, usize),
}

impl<T: Transport> PhaseScheduler<T> {
    pub fn new(
        executor: Arc<OperationExecutor<T>>,
        payloads: Arc<dyn PayloadProvider>,
        guardrails: Guardrails,
    ) -> Self {
        Self {
            executor,
            payloads,
            guardrails,
            progress: None,
            position: (1, 1),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Option<ProgressFn>) -> Self {
        self.progress = progress;
        self
    }

    /// 1-based phase position reported in progress updates.
    #[must_use]
    pub fn at_position(mut self, index: usize, phases: usize) -> Self {
        self.position = (index, phases);
        self
    }

    pub async fn run(&self, phase: &Phase, op: &PreparedOperation) -> Result<PhaseRun> {
        let state = StateCell::new();

        if phase.concurrency == 0 {
            return Err(Error::InvalidConcurrency {
                phase: phase.name.to_string(),
                got: 0,
            });
        }

        let started = Instant::now();
        let (iterations, close_at, ceiling) = match phase.mode {
            PhaseMode::Iterations(n) => (
                Some(n),
                started + self.guardrails.max_phase_duration(),
                true,
            ),
            PhaseMode::DurationMs(ms) => (None, started + Duration::from_millis(ms), false),
        };
        let hard_deadline = close_at + self.guardrails.drain_grace();

        let gate = Arc::new(IterationGate::new(iterations, close_at));
        let rate = Arc::new(RateController::starting_at(
            phase.target_bytes_per_second,
            started,
        ));
        let recorder = Arc::new(EventRecorder::new());
        let op = Arc::new(op.clone());
        let phase_name: Arc<str> = Arc::from(phase.name.to_string());

        tracing::info!(
            phase = %phase.name,
            role = %phase.role,
            concurrency = phase.concurrency,
            mode = ?phase.mode,
            target_bytes_per_second = phase.target_bytes_per_second,
            "phase started"
        );

        let mut workers = JoinSet::new();
        for _ in 0..phase.concurrency {
            let worker = Worker {
                executor: self.executor.clone(),
                payloads: self.payloads.clone(),
                guardrails: self.guardrails.clone(),
                gate: gate.clone(),
                rate: rate.clone(),
                recorder: recorder.clone(),
                op: op.clone(),
                phase_name: phase_name.clone(),
                hard_deadline,
            };
            workers.spawn(worker.run());
        }
        state.advance(PhaseState::Running, phase);

        let progress_handle = self.progress.clone().map(|progress| {
            tokio::spawn(report_progress(
                progress,
                ProgressContext {
                    phase: phase.clone(),
                    position: self.position,
                    started,
                },
                recorder.clone(),
            ))
        });

        let close = tokio::time::sleep_until(close_at);
        tokio::pin!(close);
        let mut cancelled = 0u64;
        let mut ceiling_hit = false;
        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    Some(Ok(n)) => cancelled += n,
                    Some(Err(err)) => {
                        if let Some(h) = &progress_handle {
                            h.abort();
                        }
                        workers.abort_all();
                        return Err(err.into());
                    }
                    None => break,
                },
                () = &mut close, if state.get() == PhaseState::Running => {
                    ceiling_hit = ceiling;
                    state.advance(PhaseState::Draining, phase);
                }
            }
        }
        state.advance(PhaseState::Draining, phase);

        if let Some(h) = progress_handle {
            h.abort();
            let _ = h.await;
        }

        let elapsed = started.elapsed();
        let log = recorder.finish();
        state.advance(PhaseState::Complete, phase);

        if ceiling_hit {
            tracing::warn!(
                phase = %phase.name,
                role = %phase.role,
                ceiling_ms = self.guardrails.max_phase_duration_ms,
                "phase hit its wall-clock ceiling before finishing its iterations"
            );
        }
        if cancelled > 0 {
            tracing::warn!(
                phase = %phase.name,
                role = %phase.role,
                cancelled,
                "in-flight requests cancelled after drain grace"
            );
        }
        tracing::info!(
            phase = %phase.name,
            role = %phase.role,
            events = log.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "phase complete"
        );

        Ok(PhaseRun {
            log,
            state: state.get(),
            elapsed,
            cancelled,
            ceiling_hit,
            achieved_bytes_per_second: rate.achieved_bytes_per_second(elapsed),
        })
    }
}

struct Worker<T> {
    executor: Arc<OperationExecutor<T>>,
    payloads: Arc<dyn PayloadProvider>,
    guardrails: Guardrails,
    gate: Arc<IterationGate>,
    rate: Arc<RateController>,
    recorder: Arc<EventRecorder>,
    op: Arc<PreparedOperation>,
    phase_name: Arc<str>,
    hard_deadline: Instant,
}

impl<T: Transport> Worker<T> {
    /// Returns the number of requests this worker abandoned.
    async fn run(self) -> u64 {
        let mut cancelled = 0u64;

        while let Some(step) = self.gate.claim() {
            let body = match self.payloads.next(&self.op.role, step) {
                Ok(body) => body,
                Err(err) => {
                    tracing::debug!(error = %err, "payload provider failed");
                    self.reject(ErrorKind::PayloadError).await;
                    continue;
                }
            };

            if let Err(violation) = self.guardrails.check_payload(&body) {
                match violation {
                    PayloadViolation::TooLarge { len, max } => {
                        tracing::debug!(step, len, max, "payload over size limit");
                    }
                    PayloadViolation::Forbidden(needle) => {
                        tracing::debug!(step, needle = %needle, "payload contains forbidden string");
                    }
                }
                self.reject(ErrorKind::PayloadRejected).await;
                continue;
            }

            let outbound = self.op.request(body);
            let wire_bytes = outbound.wire_bytes;
            if !self
                .rate
                .acquire(wire_bytes, Some(self.gate.close_at()))
                .await
            {
                break;
            }

            let sent_at_ms = unix_ms_now();
            let sent = Instant::now();
            let event = tokio::select! {
                event = self.executor.execute_request(&self.op, &self.phase_name, outbound) => event,
                () = tokio::time::sleep_until(self.hard_deadline) => {
                    cancelled += 1;
                    Event::error(
                        self.op.role.clone(),
                        self.phase_name.clone(),
                        sent.elapsed().as_secs_f64() * 1000.0,
                        wire_bytes,
                        ErrorKind::Cancelled,
                    )
                    .with_started_at_ms(sent_at_ms)
                }
            };
            self.recorder.push(event);
        }

        cancelled
    }

    /// Records an unsent request and backs off before the next claim.
    async fn reject(&self, kind: ErrorKind) {
        self.recorder.push(Event::error(
            self.op.role.clone(),
            self.phase_name.clone(),
            0.0,
            0,
            kind,
        ));
        let resume_at = (Instant::now() + UNSENT_BACKOFF).min(self.gate.close_at());
        tokio::time::sleep_until(resume_at).await;
    }
}

struct ProgressContext {
    phase: Phase,
    position: (usize, usize),
    started: Instant,
}

async fn report_progress(progress: ProgressFn, ctx: ProgressContext, recorder: Arc<EventRecorder>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;

    let mut tick: u64 = 0;
    let mut last_at = ctx.started;
    let mut last = recorder.totals();
    loop {
        interval.tick().await;
        tick = tick.saturating_add(1);

        let now = Instant::now();
        let dt = now.duration_since(last_at).as_secs_f64().max(1e-9);
        last_at = now;

        let totals = recorder.totals();
        let events_per_sec_now = totals.events.saturating_sub(last.events) as f64 / dt;
        let bytes_sent_per_sec_now =
            (totals.bytes_sent.saturating_sub(last.bytes_sent) as f64 / dt).round() as u64;
        last = totals;

        (progress)(PhaseProgress {
            tick,
            index: ctx.position.0,
            phases: ctx.position.1,
            phase: ctx.phase.name,
            role: ctx.phase.role.clone(),
            mode: ctx.phase.mode,
            concurrency: ctx.phase.concurrency,
            elapsed: now.duration_since(ctx.started),
            events_total: totals.events,
            errors_total: totals.errors,
            bytes_sent_total: totals.bytes_sent,
            events_per_sec_now,
            bytes_sent_per_sec_now,
            target_bytes_per_second: ctx.phase.target_bytes_per_second,
        });
    }
}
