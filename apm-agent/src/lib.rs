//! # APM agent core
//!
//! This crate captures transactions and spans in-process, links them into
//! trace trees and ships them, batched, to a collector from a dedicated
//! background thread.
//!
//! It is split into:
//!
//! - [`trace`]: the span model, the [`Tracer`](trace::Tracer) façade, the
//!   bounded [`RingBuffer`](trace::RingBuffer) and the
//!   [`BatchSpanProcessor`](trace::BatchSpanProcessor) that drains it.
//! - [`context`]: execution-scoped propagation of the current span, for
//!   threads and for async tasks alike.
//! - [`propagation`]: W3C `traceparent` injection and extraction so a trace can
//!   continue across process boundaries.
//! - [`retry`]: exponential backoff used by the export worker.
//!
//! Wire formats are not part of this crate; an exporter (for instance the one
//! in `apm-agent-intake`) implements [`SpanExporter`](trace::SpanExporter).
//!
//! # Getting started
//!
//! ```no_run
//! use apm_agent::trace::{BatchSpanProcessor, SpanKind, Tracer};
//! # use apm_agent::trace::{ExportResult, SpanData, SpanExporter};
//! # use futures_util::future::BoxFuture;
//! # #[derive(Debug)]
//! # struct MyExporter;
//! # impl SpanExporter for MyExporter {
//! #     fn export(&mut self, _batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
//! #         Box::pin(async { Ok(()) })
//! #     }
//! # }
//!
//! let processor = BatchSpanProcessor::builder(MyExporter).build();
//! let tracer = Tracer::builder().with_span_processor(processor).build();
//!
//! tracer.in_transaction("GET /orders", SpanKind::Request, |_tx| {
//!     tracer.in_span("SELECT orders", SpanKind::Db, |_span| {
//!         // query the database
//!     });
//! });
//!
//! let _ = tracer.shutdown();
//! ```
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod common;
pub use common::{Key, KeyValue, Value};

#[doc(hidden)]
pub mod internal_logging;

pub mod context;
pub use context::{Context, ContextGuard};

pub mod propagation;
pub mod retry;
pub mod trace;

#[doc(hidden)]
#[cfg(feature = "internal-logs")]
pub mod _private {
    pub use tracing::{debug, error, info, warn};
}
