//! Core types for the Atelier orchestration engine.
//!
//! This crate is the leaf dependency of every other Atelier crate. It holds
//! the shared error type and the trace recorder that wraps each unit of work
//! in a correlated, timed span.
//!
//! # Main types
//!
//! - [`AtelierError`]: Unified error enum for configuration and plumbing failures.
//! - [`AtelierResult`]: Convenience alias for `Result<T, AtelierError>`.
//! - [`TraceId`]: Correlation identifier shared by every span of one request.
//! - [`TraceSpan`]: A closed, timed, attributed record of one unit of work.
//! - [`TraceRecorder`]: Opens spans and hands closed spans to a [`SpanSink`].
//! - [`SpanGuard`]: An open span; closes itself as `cancelled` when dropped.

/// Error type shared across the workspace.
pub mod error;
/// Span sinks (in-memory, log, JSONL file).
pub mod sink;
/// Trace identifiers, spans and the recorder.
pub mod trace;

pub use error::{AtelierError, AtelierResult};
pub use sink::{JsonlSink, LogSink, MemorySink, MultiSink, NoopSink, SpanSink};
pub use trace::{SpanGuard, SpanStatus, TraceId, TraceRecorder, TraceSpan};
