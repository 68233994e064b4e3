//! Trace exporters
use crate::trace::{SpanData, TraceError};
use futures_util::future::BoxFuture;
use std::fmt::Debug;

/// Describes the result of an export.
pub type ExportResult = Result<(), TraceError>;

/// `SpanExporter` defines the interface that collector-specific exporters
/// implement so they can be driven by the
/// [`BatchSpanProcessor`](crate::trace::BatchSpanProcessor).
///
/// An exporter is expected to be a plain encoder and transmitter: the
/// processor owns batching, retry with backoff and the per-attempt timeout.
pub trait SpanExporter: Send + Sync + Debug {
    /// Exports a batch of finished spans.
    ///
    /// This function will never be called concurrently for the same exporter
    /// instance. It can be called again only after the current call returns,
    /// and is called again with the same batch when the previous attempt
    /// failed and the retry budget allows it.
    ///
    /// The returned future is polled on a dedicated export thread with a
    /// minimal executor; it must not rely on an async runtime being present.
    /// It may block that thread: the processor stops waiting for it after the
    /// attempt timeout.
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult>;

    /// Shuts down the exporter. Called once, after the final flush.
    fn shutdown(&mut self) {}
}
