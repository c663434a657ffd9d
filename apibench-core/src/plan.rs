//! Plan model and validation.
//!
//! A [`RawPlan`] is the loosely checked input; [`Plan::validate`] turns it into an immutable
//! [`Plan`] once, so nothing downstream re-validates.

mod guardrails;
mod thresholds;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::operation::{OperationRef, OperationResolver, Role};
use crate::payload::PayloadProvider;

pub use guardrails::{Guardrails, PayloadViolation};
pub use thresholds::{Threshold, ThresholdSpec, parse_thresholds};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PhaseKind {
    Warmup,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseModeKind {
    Iterations,
    Duration,
}

/// A phase as written in a plan document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPhase {
    pub name: String,
    /// Omitted roles expand over the plan's `operation_order`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<PhaseModeKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default = "default_concurrency")]
    pub concurrency: i64,
    #[serde(default)]
    pub target_bytes_per_second: i64,
}

fn default_concurrency() -> i64 {
    1
}

impl RawPhase {
    pub fn iterations(name: &str, iterations: i64, concurrency: i64) -> Self {
        Self {
            name: name.to_string(),
            role: None,
            mode: None,
            iterations: Some(iterations),
            duration_ms: None,
            concurrency,
            target_bytes_per_second: 0,
        }
    }

    pub fn duration(name: &str, duration_ms: i64, concurrency: i64) -> Self {
        Self {
            duration_ms: Some(duration_ms),
            iterations: None,
            ..Self::iterations(name, 0, concurrency)
        }
    }

    #[must_use]
    pub fn with_role(mut self, role: impl Into<Role>) -> Self {
        self.role = Some(role.into());
        self
    }

    #[must_use]
    pub fn with_target_bytes_per_second(mut self, target: i64) -> Self {
        self.target_bytes_per_second = target;
        self
    }
}

/// An already-resolved plan prior to validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
    pub phases: Vec<RawPhase>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operation_order: Vec<Role>,
    #[serde(default)]
    pub guardrails: Guardrails,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub thresholds: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub role_thresholds: BTreeMap<Role, BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseMode {
    Iterations(u64),
    DurationMs(u64),
}

impl PhaseMode {
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::DurationMs(ms) => Some(Duration::from_millis(*ms)),
            Self::Iterations(_) => None,
        }
    }

    pub fn iterations(&self) -> Option<u64> {
        match self {
            Self::Iterations(n) => Some(*n),
            Self::DurationMs(_) => None,
        }
    }
}

/// One validated phase, bound to a single role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    pub name: PhaseKind,
    pub role: Role,
    pub mode: PhaseMode,
    pub concurrency: u64,
    /// `0` means unthrottled.
    pub target_bytes_per_second: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_id: Option<String>,
    pub phases: Vec<Phase>,
    pub operations: BTreeMap<Role, OperationRef>,
    pub guardrails: Guardrails,
    pub thresholds: Vec<ThresholdSpec>,
}

/// A validated plan plus the clamp warnings produced while validating it.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPlan {
    pub plan: Plan,
    pub warnings: Vec<String>,
}

impl Plan {
    pub fn validate(
        raw: &RawPlan,
        resolver: &dyn OperationResolver,
        payloads: &dyn PayloadProvider,
    ) -> Result<ValidatedPlan> {
        let guardrails = raw.guardrails.clone();
        guardrails.check_limits()?;

        if raw.phases.is_empty() {
            return Err(Error::NoPhases);
        }

        let mut warnings = Vec::new();
        let mut phases = Vec::new();
        for raw_phase in &raw.phases {
            let roles = match &raw_phase.role {
                Some(role) => vec![role.clone()],
                None if !raw.operation_order.is_empty() => raw.operation_order.clone(),
                None => {
                    return Err(Error::MissingPhaseRole {
                        phase: raw_phase.name.clone(),
                    });
                }
            };

            for role in roles {
                phases.push(validate_phase(raw_phase, role, &guardrails, &mut warnings)?);
            }
        }

        if !phases.iter().any(|p| p.name == PhaseKind::Run) {
            return Err(Error::MissingRunPhase);
        }

        let mut operations = BTreeMap::new();
        for phase in &phases {
            if operations.contains_key(&phase.role) {
                continue;
            }
            let op = resolver
                .resolve(&phase.role)
                .ok_or_else(|| Error::MissingRole(phase.role.to_string()))?;
            for text in op.strings() {
                guardrails.check_text(&format!("operation for role `{}`", phase.role), text)?;
            }
            operations.insert(phase.role.clone(), op);
        }

        for (role, template) in payloads.templates() {
            guardrails.check_text(&format!("payload template for role `{role}`"), &template)?;
        }

        let thresholds = parse_thresholds(&raw.thresholds, &raw.role_thresholds)?;

        for warning in &warnings {
            tracing::warn!("{warning}");
        }

        Ok(ValidatedPlan {
            plan: Plan {
                system_id: raw.system_id.clone(),
                phases,
                operations,
                guardrails,
                thresholds,
            },
            warnings,
        })
    }

    pub fn operation(&self, role: &Role) -> Option<&OperationRef> {
        self.operations.get(role)
    }
}

fn validate_phase(
    raw: &RawPhase,
    role: Role,
    guardrails: &Guardrails,
    warnings: &mut Vec<String>,
) -> Result<Phase> {
    let invalid = |reason: String| Error::InvalidPhase {
        name: raw.name.clone(),
        reason,
    };

    let name: PhaseKind = raw
        .name
        .parse()
        .map_err(|_| invalid("name must be `warmup` or `run`".to_string()))?;

    if raw.concurrency < 1 {
        return Err(Error::InvalidConcurrency {
            phase: raw.name.clone(),
            got: raw.concurrency,
        });
    }

    if raw.target_bytes_per_second < 0 {
        return Err(invalid(format!(
            "`target_bytes_per_second` must be >= 0 (got {})",
            raw.target_bytes_per_second
        )));
    }

    let mismatch = || Error::ModeMismatch {
        phase: raw.name.clone(),
    };
    let mode_kind = match (raw.mode, raw.iterations, raw.duration_ms) {
        (Some(kind), _, _) => kind,
        (None, Some(_), None) => PhaseModeKind::Iterations,
        (None, None, Some(_)) => PhaseModeKind::Duration,
        (None, _, _) => return Err(mismatch()),
    };

    let mode = match mode_kind {
        PhaseModeKind::Iterations => {
            let iterations = raw.iterations.ok_or_else(mismatch)?;
            if iterations < 0 {
                return Err(invalid(format!(
                    "`iterations` must be >= 0 (got {iterations})"
                )));
            }
            let mut iterations = iterations as u64;
            if iterations > guardrails.max_iterations {
                warnings.push(format!(
                    "phase `{}` ({role}): iterations clamped from {iterations} to {}",
                    raw.name, guardrails.max_iterations
                ));
                iterations = guardrails.max_iterations;
            }
            PhaseMode::Iterations(iterations)
        }
        PhaseModeKind::Duration => {
            let duration_ms = raw.duration_ms.ok_or_else(mismatch)?;
            if duration_ms < 0 {
                return Err(invalid(format!(
                    "`duration_ms` must be >= 0 (got {duration_ms})"
                )));
            }
            let duration_ms = duration_ms as u64;
            if duration_ms > guardrails.max_phase_duration_ms {
                return Err(Error::Guardrail(format!(
                    "phase `{}`: duration_ms {duration_ms} exceeds max_phase_duration_ms {}",
                    raw.name, guardrails.max_phase_duration_ms
                )));
            }
            PhaseMode::DurationMs(duration_ms)
        }
    };

    let mut concurrency = raw.concurrency as u64;
    if concurrency > guardrails.max_concurrency {
        warnings.push(format!(
            "phase `{}` ({role}): concurrency clamped from {concurrency} to {}",
            raw.name, guardrails.max_concurrency
        ));
        concurrency = guardrails.max_concurrency;
    }

    Ok(Phase {
        name,
        role,
        mode,
        concurrency,
        target_bytes_per_second: raw.target_bytes_per_second as u64,
    })
}
