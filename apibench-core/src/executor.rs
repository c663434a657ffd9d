use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use apibench_http::{HttpClient, HttpRequest, HttpResponse, HttpTransportErrorKind};
use bytes::Bytes;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::event::{ErrorKind, Event, unix_ms_now};
use crate::operation::{OperationRef, Role};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A request that failed before a response arrived.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct TransportError {
    pub kind: HttpTransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: HttpTransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn event_kind(&self) -> ErrorKind {
        match self.kind {
            HttpTransportErrorKind::Connect => ErrorKind::ConnectionRefused,
            HttpTransportErrorKind::Timeout => ErrorKind::Timeout,
            _ => ErrorKind::TransportError,
        }
    }
}

impl From<apibench_http::Error> for TransportError {
    fn from(err: apibench_http::Error) -> Self {
        Self::new(err.transport_error_kind(), err.to_string())
    }
}

/// Sends one HTTP request and collects the full response.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        req: HttpRequest,
    ) -> impl Future<Output = std::result::Result<HttpResponse, TransportError>> + Send;
}

impl Transport for HttpClient {
    async fn send(&self, req: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        self.request(req).await.map_err(TransportError::from)
    }
}

/// An operation bound to a base URL: the URL and headers are built once per phase.
#[derive(Debug, Clone)]
pub struct PreparedOperation {
    pub role: Role,
    pub method: http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
    pub non_empty_pointer: Option<String>,
}

impl PreparedOperation {
    pub fn request(&self, body: Bytes) -> OutboundRequest {
        let mut request = HttpRequest::new(self.method.clone(), self.url.clone())
            .with_body(body)
            .with_timeout(self.timeout);
        request.headers.clone_from(&self.headers);

        let body_len = request.body.len() as u64;
        let wire_bytes = apibench_http::estimate_http_request_bytes(&request).unwrap_or(body_len);
        OutboundRequest {
            request,
            wire_bytes,
        }
    }
}

/// A fully built request together with its estimated wire size.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub request: HttpRequest,
    pub wire_bytes: u64,
}

/// Turns one operation + payload into exactly one [`Event`].
#[derive(Debug)]
pub struct OperationExecutor<T> {
    transport: T,
    base_url: String,
    default_timeout: Duration,
    auth_token: Option<String>,
}

impl OperationExecutor<HttpClient> {
    pub fn http(base_url: impl Into<String>) -> Self {
        Self::new(HttpClient::default(), base_url)
    }
}

impl<T: Transport> OperationExecutor<T> {
    pub fn new(transport: T, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            auth_token: None,
        }
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sends `Authorization: Bearer <token>` unless an operation sets its own header.
    #[must_use]
    pub fn with_auth_token(mut self, token: Option<String>) -> Self {
        self.auth_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Binds `op` to the base URL, rejecting templates that can never be sent.
    pub fn prepare(&self, role: &Role, op: &OperationRef) -> Result<PreparedOperation> {
        let invalid = |reason: String| Error::InvalidOperation {
            role: role.to_string(),
            reason,
        };

        if !op.path.starts_with('/') {
            return Err(invalid(format!("path `{}` must start with `/`", op.path)));
        }

        let mut url = url::Url::parse(&format!("{}{}", self.base_url, op.path))
            .map_err(|e| invalid(format!("invalid url: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
        }
        if !op.query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(op.query.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        let mut headers = Vec::with_capacity(op.headers.len() + 1);
        for (name, value) in &op.headers {
            http::HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| invalid(format!("invalid header name `{name}`")))?;
            http::HeaderValue::from_str(value)
                .map_err(|_| invalid(format!("invalid value for header `{name}`")))?;
            headers.push((name.clone(), value.clone()));
        }
        if let Some(token) = &self.auth_token
            && !op
                .headers
                .keys()
                .any(|k| k.eq_ignore_ascii_case("authorization"))
        {
            let value = format!("Bearer {token}");
            http::HeaderValue::from_str(&value)
                .map_err(|_| invalid("auth token is not a valid header value".to_string()))?;
            headers.push(("authorization".to_string(), value));
        }

        Ok(PreparedOperation {
            role: role.clone(),
            method: op.method.clone(),
            url: url.into(),
            headers,
            timeout: op.timeout().unwrap_or(self.default_timeout),
            non_empty_pointer: op.non_empty_pointer.clone(),
        })
    }

    pub async fn execute(&self, op: &PreparedOperation, phase: &Arc<str>, body: Bytes) -> Event {
        self.execute_request(op, phase, op.request(body)).await
    }

    /// Sends an already built request. Never fails: every outcome is an event.
    pub async fn execute_request(
        &self,
        op: &PreparedOperation,
        phase: &Arc<str>,
        outbound: OutboundRequest,
    ) -> Event {
        let OutboundRequest {
            request,
            wire_bytes,
        } = outbound;
        let timeout = request.timeout.unwrap_or(self.default_timeout);

        let started_at_ms = unix_ms_now();
        let started = Instant::now();
        let outcome = tokio::time::timeout(timeout, self.transport.send(request)).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        let event = match outcome {
            Err(_) => Event::error(
                op.role.clone(),
                phase.clone(),
                duration_ms,
                wire_bytes,
                ErrorKind::Timeout,
            ),
            Ok(Err(err)) => Event::error(
                op.role.clone(),
                phase.clone(),
                duration_ms,
                wire_bytes,
                err.event_kind(),
            ),
            Ok(Ok(res)) if res.is_success() => {
                let mut event = Event::ok(op.role.clone(), phase.clone(), duration_ms, wire_bytes)
                    .with_http_status(res.status);
                event.bytes_received = res.bytes_received;
                event.non_empty = Some(response_non_empty(
                    &res.body,
                    op.non_empty_pointer.as_deref(),
                ));
                event
            }
            Ok(Ok(res)) => {
                let mut event = Event::error(
                    op.role.clone(),
                    phase.clone(),
                    duration_ms,
                    wire_bytes,
                    ErrorKind::from_status(res.status),
                )
                .with_http_status(res.status);
                event.bytes_received = res.bytes_received;
                event
            }
        };

        event.with_started_at_ms(started_at_ms)
    }
}

/// Whether a response body carries content.
///
/// With a JSON pointer the target must be a non-empty array/object/string or any number or
/// bool. Without one, any body other than blank, `[]`, `{}` or `null` counts.
pub fn response_non_empty(body: &[u8], pointer: Option<&str>) -> bool {
    let parsed = serde_json::from_slice::<serde_json::Value>(body);

    match pointer {
        Some(pointer) => parsed
            .ok()
            .as_ref()
            .and_then(|v| v.pointer(pointer))
            .is_some_and(json_non_empty),
        None => {
            if body.iter().all(u8::is_ascii_whitespace) {
                return false;
            }
            match parsed {
                Ok(v) => json_non_empty(&v),
                Err(_) => true,
            }
        }
    }
}

fn json_non_empty(value: &serde_json::Value) -> bool {
    use serde_json::Value;

    match value {
        Value::Null => false,
        Value::Bool(_) | Value::Number(_) => true,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
