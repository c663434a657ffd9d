//! On-disk form of a resolved benchmark plan.
//!
//! A plan document is plain data: phases, the operation behind each role, guardrails and
//! thresholds. Nothing is merged from the environment or other files.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, bail};
use apibench_core::{
    Guardrails, OperationRef, RawPhase, RawPlan, Role, StaticResolver, TemplatePayloads,
};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    fn from_path(path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|s| s.to_str()).unwrap_or("") {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            ext => bail!(
                "unsupported plan extension `{ext}` (expected .yaml, .yml or .json): {}",
                path.display()
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PlanDocument {
    #[serde(default)]
    system_id: Option<String>,
    phases: Vec<PhaseDocument>,
    #[serde(default)]
    operation_order: Vec<Role>,
    operations: BTreeMap<Role, OperationDocument>,
    #[serde(default)]
    guardrails: Guardrails,
    #[serde(default)]
    thresholds: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    role_thresholds: BTreeMap<Role, BTreeMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct PhaseDocument {
    #[serde(flatten)]
    raw: RawPhase,
    /// Human alternative to `duration_ms` (e.g. `30s`, `1m 30s`).
    #[serde(default)]
    duration: Option<String>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OperationDocument {
    #[serde(flatten)]
    op: OperationRef,
    /// Request body template; `{step}` and `{role}` are substituted per request.
    #[serde(default)]
    body: Option<String>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_json::Value>,
}

/// Everything the orchestrator needs from one plan document.
pub(crate) struct LoadedPlan {
    pub raw: RawPlan,
    pub resolver: StaticResolver,
    pub payloads: Arc<TemplatePayloads>,
}

impl PlanDocument {
    pub(crate) fn parse(text: &str, path: &Path) -> anyhow::Result<Self> {
        match DocumentFormat::from_path(path)? {
            DocumentFormat::Yaml => serde_yaml::from_str(text)
                .with_context(|| format!("invalid YAML plan: {}", path.display())),
            DocumentFormat::Json => serde_json::from_str(text)
                .with_context(|| format!("invalid JSON plan: {}", path.display())),
        }
    }

    pub(crate) fn into_loaded(self) -> anyhow::Result<LoadedPlan> {
        let phases = self
            .phases
            .into_iter()
            .map(PhaseDocument::into_raw)
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut payloads = TemplatePayloads::new();
        let mut resolver = StaticResolver::new();
        for (role, doc) in self.operations {
            reject_unknown(&format!("operation `{role}`"), &doc.unknown)?;
            if let Some(body) = doc.body {
                payloads = payloads.with(role.clone(), body);
            }
            resolver = resolver.with(role, doc.op);
        }

        Ok(LoadedPlan {
            raw: RawPlan {
                system_id: self.system_id,
                phases,
                operation_order: self.operation_order,
                guardrails: self.guardrails,
                thresholds: self.thresholds,
                role_thresholds: self.role_thresholds,
            },
            resolver,
            payloads: Arc::new(payloads),
        })
    }
}

impl PhaseDocument {
    fn into_raw(self) -> anyhow::Result<RawPhase> {
        let Self {
            mut raw,
            duration,
            unknown,
        } = self;
        reject_unknown(&format!("phase `{}`", raw.name), &unknown)?;
        let Some(duration) = duration else {
            return Ok(raw);
        };

        if raw.duration_ms.is_some() {
            bail!(
                "phase `{}` sets both `duration` and `duration_ms`",
                raw.name
            );
        }
        let d = humantime::parse_duration(duration.trim())
            .with_context(|| format!("phase `{}`: invalid duration `{duration}`", raw.name))?;
        let ms = i64::try_from(d.as_millis())
            .with_context(|| format!("phase `{}`: duration `{duration}` is too large", raw.name))?;
        raw.duration_ms = Some(ms);
        Ok(raw)
    }
}

/// Flattened sections cannot use `deny_unknown_fields`; leftover keys land here instead.
fn reject_unknown(
    owner: &str,
    unknown: &BTreeMap<String, serde_json::Value>,
) -> anyhow::Result<()> {
    match unknown.keys().next() {
        Some(key) => bail!("{owner}: unknown field `{key}`"),
        None => Ok(()),
    }
}

pub(crate) async fn load(path: &Path) -> anyhow::Result<LoadedPlan> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read plan: {}", path.display()))?;
    PlanDocument::parse(&text, path)?.into_loaded()
}
