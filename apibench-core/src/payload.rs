use std::collections::BTreeMap;

use bytes::Bytes;

use crate::operation::Role;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("payload generation failed for role `{role}` at step {step}: {message}")]
pub struct PayloadError {
    pub role: String,
    pub step: u64,
    pub message: String,
}

impl PayloadError {
    pub fn new(role: &Role, step: u64, message: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            step,
            message: message.into(),
        }
    }
}

/// Produces request bodies. Must return the same bytes for the same `(role, step)`.
pub trait PayloadProvider: Send + Sync {
    fn next(&self, role: &Role, step: u64) -> Result<Bytes, PayloadError>;

    /// Static body templates, scanned for forbidden strings before any request is sent.
    fn templates(&self) -> Vec<(Role, String)> {
        Vec::new()
    }
}

/// Every request goes out with an empty body.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyPayloads;

impl PayloadProvider for EmptyPayloads {
    fn next(&self, _role: &Role, _step: u64) -> Result<Bytes, PayloadError> {
        Ok(Bytes::new())
    }
}

/// Renders a per-role text template, substituting `{step}` and `{role}`.
///
/// Roles without a template get an empty body.
#[derive(Debug, Clone, Default)]
pub struct TemplatePayloads {
    templates: BTreeMap<Role, String>,
}

impl TemplatePayloads {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, role: impl Into<Role>, template: impl Into<String>) -> Self {
        self.templates.insert(role.into(), template.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl FromIterator<(Role, String)> for TemplatePayloads {
    fn from_iter<I: IntoIterator<Item = (Role, String)>>(iter: I) -> Self {
        Self {
            templates: iter.into_iter().collect(),
        }
    }
}

impl PayloadProvider for TemplatePayloads {
    fn next(&self, role: &Role, step: u64) -> Result<Bytes, PayloadError> {
        let Some(template) = self.templates.get(role) else {
            return Ok(Bytes::new());
        };

        let rendered = template
            .replace("{step}", &step.to_string())
            .replace("{role}", role.as_str());
        Ok(Bytes::from(rendered))
    }

    fn templates(&self) -> Vec<(Role, String)> {
        self.templates
            .iter()
            .map(|(r, t)| (r.clone(), t.clone()))
            .collect()
    }
}
