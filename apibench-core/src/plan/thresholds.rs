use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::operation::Role;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Threshold {
    AvailabilityPctMin(f64),
    ErrorRatePctMax(f64),
    P50MsMax(f64),
    P95MsMax(f64),
    P99MsMax(f64),
    MinRequests(u64),
    NonEmptyQueryResults,
    OkRoles(Vec<Role>),
}

impl Threshold {
    pub const KINDS: &'static [&'static str] = &[
        "availability_pct_min",
        "error_rate_pct_max",
        "p50_ms_max",
        "p95_ms_max",
        "p99_ms_max",
        "min_requests",
        "non_empty_query_results",
        "ok_roles",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::AvailabilityPctMin(_) => "availability_pct_min",
            Self::ErrorRatePctMax(_) => "error_rate_pct_max",
            Self::P50MsMax(_) => "p50_ms_max",
            Self::P95MsMax(_) => "p95_ms_max",
            Self::P99MsMax(_) => "p99_ms_max",
            Self::MinRequests(_) => "min_requests",
            Self::NonEmptyQueryResults => "non_empty_query_results",
            Self::OkRoles(_) => "ok_roles",
        }
    }

    /// Thresholds over run events as a whole; these cannot be scoped to one role.
    pub fn is_global_only(&self) -> bool {
        matches!(self, Self::NonEmptyQueryResults | Self::OkRoles(_))
    }

    /// Parses one `name: value` pair. `Ok(None)` means the threshold is switched off.
    pub fn parse(name: &str, value: &serde_json::Value) -> Result<Option<Self>> {
        let threshold = match name {
            "availability_pct_min" => Self::AvailabilityPctMin(percent(name, value)?),
            "error_rate_pct_max" => Self::ErrorRatePctMax(percent(name, value)?),
            "p50_ms_max" => Self::P50MsMax(millis(name, value)?),
            "p95_ms_max" => Self::P95MsMax(millis(name, value)?),
            "p99_ms_max" => Self::P99MsMax(millis(name, value)?),
            "min_requests" => Self::MinRequests(
                value
                    .as_u64()
                    .ok_or_else(|| invalid(name, "expected a non-negative integer"))?,
            ),
            "non_empty_query_results" => match value.as_bool() {
                Some(true) => Self::NonEmptyQueryResults,
                Some(false) => return Ok(None),
                None => return Err(invalid(name, "expected a boolean")),
            },
            "ok_roles" => {
                let roles = value
                    .as_array()
                    .ok_or_else(|| invalid(name, "expected a list of role names"))?
                    .iter()
                    .map(|v| {
                        v.as_str()
                            .map(Role::from)
                            .ok_or_else(|| invalid(name, "expected a list of role names"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                if roles.is_empty() {
                    return Ok(None);
                }
                Self::OkRoles(roles)
            }
            other => return Err(Error::UnknownThreshold(other.to_string())),
        };
        Ok(Some(threshold))
    }
}

/// A threshold with an optional role scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(flatten)]
    pub threshold: Threshold,
}

impl ThresholdSpec {
    pub fn check_name(&self) -> String {
        match &self.role {
            Some(role) => format!("{}[{role}]", self.threshold.name()),
            None => self.threshold.name().to_string(),
        }
    }
}

/// Parses unscoped thresholds followed by role-scoped ones, each in key order.
pub fn parse_thresholds(
    global: &BTreeMap<String, serde_json::Value>,
    by_role: &BTreeMap<Role, BTreeMap<String, serde_json::Value>>,
) -> Result<Vec<ThresholdSpec>> {
    let mut out = Vec::new();

    for (name, value) in global {
        if let Some(threshold) = Threshold::parse(name, value)? {
            out.push(ThresholdSpec {
                role: None,
                threshold,
            });
        }
    }

    for (role, thresholds) in by_role {
        for (name, value) in thresholds {
            let Some(threshold) = Threshold::parse(name, value)? else {
                continue;
            };
            if threshold.is_global_only() {
                return Err(invalid(name, "cannot be scoped to a role"));
            }
            out.push(ThresholdSpec {
                role: Some(role.clone()),
                threshold,
            });
        }
    }

    Ok(out)
}

fn invalid(name: &str, reason: &str) -> Error {
    Error::InvalidThreshold {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn millis(name: &str, value: &serde_json::Value) -> Result<f64> {
    match value.as_f64() {
        Some(v) if v.is_finite() && v >= 0.0 => Ok(v),
        _ => Err(invalid(name, "expected a non-negative number of milliseconds")),
    }
}

fn percent(name: &str, value: &serde_json::Value) -> Result<f64> {
    match value.as_f64() {
        Some(v) if (0.0..=100.0).contains(&v) => Ok(v),
        _ => Err(invalid(name, "expected a percentage between 0 and 100")),
    }
}
