use crate::trace::{ExportResult, SpanData, SpanExporter, TraceError, TraceResult};
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// An in-memory span exporter that stores span data in memory.
///
/// It is intended for tests: clones share the same storage, so a test can
/// keep one handle while the processor owns the other.
///
/// Available with the `testing` feature.
///
/// # Example
/// ```
///# #[cfg(not(feature = "testing"))]
///# fn main() {}
///# #[cfg(feature = "testing")]
///# fn main() {
///# use apm_agent::trace::{BatchSpanProcessor, InMemorySpanExporter, SpanKind, Tracer};
/// let exporter = InMemorySpanExporter::default();
/// let processor = BatchSpanProcessor::builder(exporter.clone()).build();
/// let tracer = Tracer::builder().with_span_processor(processor).build();
///
/// tracer.in_transaction("job", SpanKind::Custom, |_| {});
/// tracer.flush().unwrap();
///
/// let spans = exporter.get_finished_spans().unwrap();
/// assert_eq!(spans.len(), 1);
///# }
/// ```
#[derive(Clone, Debug)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
    failures_left: Arc<AtomicUsize>,
    export_calls: Arc<AtomicUsize>,
    is_shutdown: Arc<AtomicBool>,
}

impl Default for InMemorySpanExporter {
    fn default() -> Self {
        InMemorySpanExporterBuilder::new().build()
    }
}

/// Builder for [`InMemorySpanExporter`].
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporterBuilder {
    failures: usize,
}

impl InMemorySpanExporterBuilder {
    /// Creates a new instance of the `InMemorySpanExporterBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the first `failures` export calls fail, as a collector answering
    /// with an error would.
    pub fn with_failures(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }

    /// Creates a new instance of the `InMemorySpanExporter`.
    pub fn build(&self) -> InMemorySpanExporter {
        InMemorySpanExporter {
            spans: Arc::new(Mutex::new(Vec::new())),
            failures_left: Arc::new(AtomicUsize::new(self.failures)),
            export_calls: Arc::new(AtomicUsize::new(0)),
            is_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl InMemorySpanExporter {
    /// Returns the finished spans as a vector of `SpanData`.
    pub fn get_finished_spans(&self) -> TraceResult<Vec<SpanData>> {
        self.spans
            .lock()
            .map(|spans_guard| spans_guard.iter().cloned().collect())
            .map_err(TraceError::from)
    }

    /// Number of times `export` was called, failed attempts included.
    pub fn export_calls(&self) -> usize {
        self.export_calls.load(Ordering::SeqCst)
    }

    /// Returns `true` once the processor shut the exporter down.
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Clears the internal storage of finished spans.
    pub fn reset(&self) {
        let _ = self.spans.lock().map(|mut spans_guard| spans_guard.clear());
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        self.export_calls.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if should_fail {
            return Box::pin(std::future::ready(Err(TraceError::from(
                "collector unavailable",
            ))));
        }
        let result = self
            .spans
            .lock()
            .map(|mut spans_guard| spans_guard.extend(batch))
            .map_err(TraceError::from);
        Box::pin(std::future::ready(result))
    }

    fn shutdown(&mut self) {
        self.is_shutdown.store(true, Ordering::SeqCst);
    }
}
