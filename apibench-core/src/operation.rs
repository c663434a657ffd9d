use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Logical name of an operation a phase drives (`write`, `query`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Arc<str>);

impl Role {
    pub const WRITE: &'static str = "write";
    pub const QUERY: &'static str = "query";

    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_query(&self) -> bool {
        self.as_str() == Self::QUERY
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl Borrow<str> for Role {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A resolved HTTP operation template. Shared read-only by every worker of a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRef {
    #[serde(with = "method_serde")]
    pub method: http::Method,
    pub path: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    /// Per-operation timeout; the executor default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// JSON pointer into an ok response body that must resolve to non-empty content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_empty_pointer: Option<String>,
}

impl OperationRef {
    pub fn new(method: http::Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            timeout_ms: None,
            non_empty_pointer: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    #[must_use]
    pub fn with_non_empty_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.non_empty_pointer = Some(pointer.into());
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Every user-supplied string of the template, for guardrail scans.
    pub(crate) fn strings(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.path.as_str())
            .chain(self.headers.values().map(String::as_str))
            .chain(self.query.values().map(String::as_str))
    }
}

/// Maps a role to the operation that serves it.
pub trait OperationResolver: Send + Sync {
    fn resolve(&self, role: &Role) -> Option<OperationRef>;
}

/// Resolver over an already-resolved role → operation table.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    operations: BTreeMap<Role, OperationRef>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, role: impl Into<Role>, op: OperationRef) -> Self {
        self.operations.insert(role.into(), op);
        self
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.operations.keys()
    }
}

impl FromIterator<(Role, OperationRef)> for StaticResolver {
    fn from_iter<I: IntoIterator<Item = (Role, OperationRef)>>(iter: I) -> Self {
        Self {
            operations: iter.into_iter().collect(),
        }
    }
}

impl OperationResolver for StaticResolver {
    fn resolve(&self, role: &Role) -> Option<OperationRef> {
        self.operations.get(role).cloned()
    }
}

mod method_serde {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(method: &http::Method, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(method.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<http::Method, D::Error> {
        let raw = String::deserialize(d)?;
        http::Method::from_bytes(raw.to_ascii_uppercase().as_bytes())
            .map_err(|_| de::Error::custom(format!("invalid http method `{raw}`")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_resolver_returns_registered_roles_only() {
        let resolver = StaticResolver::new().with("write", OperationRef::new(http::Method::POST, "/w"));

        let op = resolver.resolve(&Role::from("write"));
        assert_eq!(op.map(|o| o.path), Some("/w".to_string()));
        assert!(resolver.resolve(&Role::from("query")).is_none());
    }

    #[test]
    fn method_deserializes_case_insensitively() {
        let op: OperationRef = serde_json::from_str(r#"{"method":"post","path":"/w"}"#)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(op.method, http::Method::POST);
        assert!(op.headers.is_empty());
        assert_eq!(op.timeout(), None);
    }

    #[test]
    fn strings_cover_path_headers_and_query() {
        let op = OperationRef::new(http::Method::GET, "/q")
            .with_header("x-a", "h")
            .with_query("q", "v");
        let all: Vec<&str> = op.strings().collect();
        assert_eq!(all, vec!["/q", "h", "v"]);
    }
}
