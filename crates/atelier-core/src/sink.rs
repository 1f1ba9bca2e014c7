use crate::error::{AtelierError, AtelierResult};
use crate::trace::{SpanStatus, TraceId, TraceSpan};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Destination for closed spans.
///
/// `export` is called synchronously when a span closes, possibly from many
/// tasks at once, so implementations must not block.
pub trait SpanSink: Send + Sync {
    fn export(&self, span: TraceSpan);
}

/// Discards every span.
pub struct NoopSink;

impl SpanSink for NoopSink {
    fn export(&self, _span: TraceSpan) {}
}

/// Keeps closed spans in memory, in close order.
#[derive(Default)]
pub struct MemorySink {
    spans: Mutex<Vec<TraceSpan>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all spans recorded so far.
    pub fn spans(&self) -> Vec<TraceSpan> {
        self.spans.lock().clone()
    }

    /// Spans belonging to one trace.
    pub fn for_trace(&self, trace_id: TraceId) -> Vec<TraceSpan> {
        self.spans
            .lock()
            .iter()
            .filter(|s| s.trace_id == trace_id)
            .cloned()
            .collect()
    }

    /// Spans with the given name.
    pub fn named(&self, name: &str) -> Vec<TraceSpan> {
        self.spans
            .lock()
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.spans.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.lock().is_empty()
    }

    pub fn clear(&self) {
        self.spans.lock().clear();
    }
}

impl SpanSink for MemorySink {
    fn export(&self, span: TraceSpan) {
        self.spans.lock().push(span);
    }
}

/// Emits every closed span as a structured `tracing` event.
pub struct LogSink;

impl SpanSink for LogSink {
    fn export(&self, span: TraceSpan) {
        let attributes = serde_json::Value::Object(span.attributes.clone().into_iter().collect());
        match span.status {
            SpanStatus::Ok => info!(
                target: "atelier::trace",
                trace_id = %span.trace_id,
                span = %span.name,
                duration_ms = span.duration_ms,
                attributes = %attributes,
                "span"
            ),
            SpanStatus::Error | SpanStatus::Cancelled => warn!(
                target: "atelier::trace",
                trace_id = %span.trace_id,
                span = %span.name,
                status = %span.status,
                duration_ms = span.duration_ms,
                attributes = %attributes,
                "span"
            ),
        }
    }
}

/// Appends closed spans as JSON lines to a file.
///
/// Writing happens on a background task fed by an unbounded channel, so
/// `export` never waits on disk. Call [`shutdown`](Self::shutdown) before the
/// runtime stops or queued spans are lost.
pub struct JsonlSink {
    tx: Mutex<Option<mpsc::UnboundedSender<TraceSpan>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl JsonlSink {
    /// Create the sink and spawn its writer task. Must be called inside a
    /// tokio runtime.
    pub fn new(path: impl Into<PathBuf>) -> AtelierResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AtelierError::Trace(format!(
                        "cannot create span directory '{}': {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let (tx, rx) = mpsc::unbounded_channel::<TraceSpan>();
        let writer = tokio::spawn(write_spans(path, rx));

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Stop accepting spans and wait until every queued span is on disk.
    ///
    /// Spans exported after shutdown are dropped. Calling it twice is a no-op.
    pub async fn shutdown(&self) {
        self.tx.lock().take();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "Span writer task ended abnormally");
            }
        }
    }
}

async fn write_spans(path: PathBuf, mut rx: mpsc::UnboundedReceiver<TraceSpan>) {
    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Span file unavailable, dropping spans");
            return;
        }
    };

    while let Some(span) = rx.recv().await {
        let line = match serde_json::to_string(&span) {
            Ok(line) => format!("{line}\n"),
            Err(e) => {
                warn!(error = %e, "Failed to serialize span");
                continue;
            }
        };
        if let Err(e) = file.write_all(line.as_bytes()).await {
            warn!(error = %e, "Failed to append span");
            continue;
        }
        if let Err(e) = file.flush().await {
            warn!(error = %e, "Failed to flush span file");
        }
    }
}

impl SpanSink for JsonlSink {
    fn export(&self, span: TraceSpan) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(span);
        }
    }
}

/// Forwards every span to several sinks.
pub struct MultiSink {
    sinks: Vec<Arc<dyn SpanSink>>,
}

impl MultiSink {
    pub fn new(sinks: Vec<Arc<dyn SpanSink>>) -> Self {
        Self { sinks }
    }
}

impl SpanSink for MultiSink {
    fn export(&self, span: TraceSpan) {
        for sink in &self.sinks {
            sink.export(span.clone());
        }
    }
}
