//! # Tracing
//!
//! The span model and the machinery that gets finished spans to a collector.
//!
//! A *transaction* is the root of a local trace tree, typically one incoming
//! request or one background job. *Spans* are the timed operations inside it:
//! an outgoing HTTP call, a database query, a CPU-bound step. Every span
//! belongs to exactly one trace (shared [`TraceId`]) and, except for the
//! transaction, has exactly one parent.
//!
//! ```
//! use apm_agent::trace::{SpanKind, Tracer};
//!
//! # let tracer = Tracer::builder().build();
//! let tx = tracer.start_transaction("GET /users", SpanKind::Request);
//! let query = tx.start_child("SELECT users", SpanKind::Db).unwrap();
//! query.end();
//! tx.end();
//! ```
//!
//! Ending a transaction ends any descendant still open (flagged as
//! `truncated`) and hands the whole tree to the [`SpanProcessor`]. The
//! [`BatchSpanProcessor`] buffers it in a [`RingBuffer`] and a background
//! thread exports it through a [`SpanExporter`].
mod config;
mod context;
mod error;
mod export;
mod id_generator;
#[cfg(any(test, feature = "testing"))]
mod in_memory_exporter;
mod ring_buffer;
mod span;
mod span_context;
mod span_processor;
mod tracer;

pub use config::{Config, SpanLimits};
pub use context::{get_active_span, mark_span_as_active, with_current};
pub use error::{ExportError, TraceError, TraceResult};
pub use export::{ExportResult, SpanExporter};
#[cfg(any(test, feature = "testing"))]
pub use id_generator::IncrementIdGenerator;
pub use id_generator::{IdGenerator, RandomIdGenerator};
#[cfg(any(test, feature = "testing"))]
pub use in_memory_exporter::{InMemorySpanExporter, InMemorySpanExporterBuilder};
pub use ring_buffer::RingBuffer;
pub use span::{Span, SpanCount, SpanData, SpanKind, Status};
pub use span_context::{SpanContext, SpanId, TraceId};
pub use span_processor::{
    BatchConfig, BatchConfigBuilder, BatchSpanProcessor, BatchSpanProcessorBuilder, SpanProcessor,
};
pub use tracer::{Tracer, TracerBuilder};
