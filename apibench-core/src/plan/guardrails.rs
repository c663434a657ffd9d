use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Safety ceilings applied to every plan.
///
/// Missing fields in a plan document fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Guardrails {
    pub max_concurrency: u64,
    pub max_iterations: u64,
    pub max_payload_bytes: u64,
    pub forbidden_strings: Vec<String>,
    /// Hard wall-clock ceiling of one phase; iteration phases are cancelled past it.
    pub max_phase_duration_ms: u64,
    /// How long in-flight requests may finish once a phase closes.
    pub drain_grace_ms: u64,
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            max_concurrency: 64,
            max_iterations: 1_000_000,
            max_payload_bytes: 2_000_000,
            forbidden_strings: ["rm -rf", "sudo ", "curl | sh", "powershell -enc"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            max_phase_duration_ms: 10 * 60 * 1000,
            drain_grace_ms: 5_000,
        }
    }
}

/// Why a generated payload was not sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadViolation {
    TooLarge { len: u64, max: u64 },
    Forbidden(String),
}

impl Guardrails {
    pub fn max_phase_duration(&self) -> Duration {
        Duration::from_millis(self.max_phase_duration_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub(crate) fn check_limits(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::Guardrail(
                "`max_concurrency` must be >= 1".to_string(),
            ));
        }
        if self.max_phase_duration_ms == 0 {
            return Err(Error::Guardrail(
                "`max_phase_duration_ms` must be >= 1".to_string(),
            ));
        }
        if self.forbidden_strings.iter().any(String::is_empty) {
            return Err(Error::Guardrail(
                "`forbidden_strings` must not contain empty strings".to_string(),
            ));
        }
        Ok(())
    }

    pub fn find_forbidden(&self, haystack: &[u8]) -> Option<&str> {
        self.forbidden_strings
            .iter()
            .find(|needle| contains(haystack, needle.as_bytes()))
            .map(String::as_str)
    }

    /// Rejects `text` when it contains a forbidden string; `what` names it in the error.
    pub(crate) fn check_text(&self, what: &str, text: &str) -> Result<()> {
        match self.find_forbidden(text.as_bytes()) {
            Some(needle) => Err(Error::Guardrail(format!(
                "{what} contains forbidden string `{needle}`"
            ))),
            None => Ok(()),
        }
    }

    pub fn check_payload(&self, body: &[u8]) -> std::result::Result<(), PayloadViolation> {
        let len = body.len() as u64;
        if len > self.max_payload_bytes {
            return Err(PayloadViolation::TooLarge {
                len,
                max: self.max_payload_bytes,
            });
        }
        if let Some(needle) = self.find_forbidden(body) {
            return Err(PayloadViolation::Forbidden(needle.to_string()));
        }
        Ok(())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty()
        && haystack.len() >= needle.len()
        && haystack.windows(needle.len()).any(|w| w == needle)
}
