use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::operation::Role;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EventStatus {
    Ok,
    Error,
}

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
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ConnectionRefused,
    #[serde(rename = "http_4xx")]
    #[strum(serialize = "http_4xx")]
    Http4xx,
    #[serde(rename = "http_5xx")]
    #[strum(serialize = "http_5xx")]
    Http5xx,
    /// Non-2xx status outside 4xx/5xx (redirects, informational).
    HttpOther,
    TransportError,
    /// Abandoned at the phase ceiling after the drain grace period.
    Cancelled,
    /// Payload exceeded `max_payload_bytes` or contained a forbidden string.
    PayloadRejected,
    PayloadError,
}

impl ErrorKind {
    /// Kinds recorded for requests that never reached the wire.
    pub fn is_unsent(self) -> bool {
        matches!(self, Self::PayloadRejected | Self::PayloadError)
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            400..=499 => Self::Http4xx,
            500..=599 => Self::Http5xx,
            _ => Self::HttpOther,
        }
    }
}

/// Outcome of one request attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub role: Role,
    pub phase_name: Arc<str>,
    /// Wall-clock send time, milliseconds since the unix epoch.
    pub started_at_ms: u64,
    pub duration_ms: f64,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub bytes_sent: u64,
    #[serde(default)]
    pub bytes_received: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Whether the response carried non-empty content; only set for ok responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_empty: Option<bool>,
}

impl Event {
    pub fn ok(role: Role, phase_name: Arc<str>, duration_ms: f64, bytes_sent: u64) -> Self {
        Self {
            role,
            phase_name,
            started_at_ms: unix_ms_now(),
            duration_ms,
            status: EventStatus::Ok,
            http_status: None,
            bytes_sent,
            bytes_received: 0,
            error_kind: None,
            non_empty: None,
        }
    }

    pub fn error(
        role: Role,
        phase_name: Arc<str>,
        duration_ms: f64,
        bytes_sent: u64,
        kind: ErrorKind,
    ) -> Self {
        Self {
            status: EventStatus::Error,
            error_kind: Some(kind),
            ..Self::ok(role, phase_name, duration_ms, bytes_sent)
        }
    }

    #[must_use]
    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    #[must_use]
    pub fn with_started_at_ms(mut self, started_at_ms: u64) -> Self {
        self.started_at_ms = started_at_ms;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == EventStatus::Ok
    }

    /// Whether the request was issued; unsent events carry no latency.
    pub fn was_sent(&self) -> bool {
        !self.error_kind.is_some_and(ErrorKind::is_unsent)
    }
}

pub(crate) fn unix_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or(0)
}

/// Running totals visible while a phase is still appending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderTotals {
    pub events: u64,
    pub errors: u64,
    pub bytes_sent: u64,
}

/// Concurrent append side of an [`EventLog`].
///
/// Workers append through a shared reference; the log itself is only handed out by
/// [`EventRecorder::finish`] once the phase drained.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<Event>>,
    events_total: AtomicU64,
    errors_total: AtomicU64,
    bytes_sent_total: AtomicU64,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        if !event.is_ok() {
            self.errors_total.fetch_add(1, Ordering::Relaxed);
        }
        self.bytes_sent_total
            .fetch_add(event.bytes_sent, Ordering::Relaxed);

        self.events.lock().push(event);
    }

    pub fn totals(&self) -> RecorderTotals {
        RecorderTotals {
            events: self.events_total.load(Ordering::Relaxed),
            errors: self.errors_total.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent_total.load(Ordering::Relaxed),
        }
    }

    pub fn finish(&self) -> EventLog {
        EventLog {
            events: std::mem::take(&mut *self.events.lock()),
        }
    }
}

/// Read-only, append-ordered events of one or more completed phases.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    pub fn from_events(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub fn concat<'a>(logs: impl IntoIterator<Item = &'a EventLog>) -> Self {
        Self {
            events: logs
                .into_iter()
                .flat_map(|log| log.events.iter().cloned())
                .collect(),
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn sample(&self, limit: usize) -> Vec<Event> {
        self.events.iter().take(limit).cloned().collect()
    }
}

impl<'a> IntoIterator for &'a EventLog {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
