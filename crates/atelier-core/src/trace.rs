use crate::sink::{NoopSink, SpanSink};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Correlation identifier shared by every span of one orchestration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceId(Uuid);

impl TraceId {
    /// Generate a fresh random trace id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TraceId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Final status of a closed span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    /// The unit of work completed successfully.
    Ok,
    /// The unit of work failed; the span carries a `reason` attribute.
    Error,
    /// The unit of work was abandoned before it finished.
    Cancelled,
}

impl std::fmt::Display for SpanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpanStatus::Ok => write!(f, "ok"),
            SpanStatus::Error => write!(f, "error"),
            SpanStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A closed, timed record of one unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSpan {
    pub name: String,
    pub trace_id: TraceId,
    pub span_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: SpanStatus,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl TraceSpan {
    /// Look up a single attribute.
    pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }
}

/// Opens spans and forwards closed spans to a [`SpanSink`].
///
/// Cheap to clone; every clone shares the same sink.
#[derive(Clone)]
pub struct TraceRecorder {
    sink: Arc<dyn SpanSink>,
}

impl TraceRecorder {
    pub fn new(sink: Arc<dyn SpanSink>) -> Self {
        Self { sink }
    }

    /// A recorder that drops every span.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    /// Open a root span for the given trace.
    pub fn start(&self, name: impl Into<String>, trace_id: TraceId) -> SpanGuard {
        SpanGuard::open(name.into(), trace_id, None, self.sink.clone())
    }
}

impl std::fmt::Debug for TraceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceRecorder").finish_non_exhaustive()
    }
}

struct OpenSpan {
    name: String,
    parent_id: Option<Uuid>,
    start_time: DateTime<Utc>,
    started: Instant,
    attributes: BTreeMap<String, serde_json::Value>,
}

/// An open span.
///
/// Close it explicitly with [`ok`](Self::ok), [`fail`](Self::fail) or
/// [`cancel`](Self::cancel). A guard dropped while still open (for example
/// because the future owning it was aborted at a deadline) is closed with
/// [`SpanStatus::Cancelled`].
pub struct SpanGuard {
    trace_id: TraceId,
    span_id: Uuid,
    open: Option<OpenSpan>,
    sink: Arc<dyn SpanSink>,
}

impl SpanGuard {
    fn open(
        name: String,
        trace_id: TraceId,
        parent_id: Option<Uuid>,
        sink: Arc<dyn SpanSink>,
    ) -> Self {
        Self {
            trace_id,
            span_id: Uuid::new_v4(),
            open: Some(OpenSpan {
                name,
                parent_id,
                start_time: Utc::now(),
                started: Instant::now(),
                attributes: BTreeMap::new(),
            }),
            sink,
        }
    }

    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub fn span_id(&self) -> Uuid {
        self.span_id
    }

    /// Open a child span in the same trace.
    pub fn child(&self, name: impl Into<String>) -> SpanGuard {
        SpanGuard::open(
            name.into(),
            self.trace_id,
            Some(self.span_id),
            self.sink.clone(),
        )
    }

    /// Attach or overwrite an attribute.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        if let Some(open) = self.open.as_mut() {
            open.attributes.insert(key.into(), value.into());
        }
    }

    /// Builder-style variant of [`set_attribute`](Self::set_attribute).
    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.set_attribute(key, value);
        self
    }

    pub fn ok(mut self) {
        self.close(SpanStatus::Ok);
    }

    /// Close as failed, recording `reason`.
    pub fn fail(mut self, reason: impl std::fmt::Display) {
        self.set_attribute("reason", reason.to_string());
        self.close(SpanStatus::Error);
    }

    /// Close as cancelled, recording `reason`.
    pub fn cancel(mut self, reason: impl std::fmt::Display) {
        self.set_attribute("reason", reason.to_string());
        self.close(SpanStatus::Cancelled);
    }

    fn close(&mut self, status: SpanStatus) {
        let Some(open) = self.open.take() else {
            return;
        };

        let elapsed = open.started.elapsed();
        let span = TraceSpan {
            name: open.name,
            trace_id: self.trace_id,
            span_id: self.span_id,
            parent_id: open.parent_id,
            start_time: open.start_time,
            end_time: Utc::now(),
            duration_ms: elapsed.as_millis() as u64,
            status,
            attributes: open.attributes,
        };

        debug!(
            trace_id = %span.trace_id,
            span = %span.name,
            status = %span.status,
            duration_ms = span.duration_ms,
            "span closed"
        );

        self.sink.export(span);
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if self.open.is_some() {
            self.set_attribute("reason", "dropped before completion");
            self.close(SpanStatus::Cancelled);
        }
    }
}
