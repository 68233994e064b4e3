//! # APM intake exporter
//!
//! Ships finished transactions and spans to a collector's intake endpoint as
//! newline-delimited JSON: one metadata line describing the service, then one
//! `transaction` or `span` line per record.
//!
//! ## Quickstart
//!
//! ```no_run
//! use apm_agent::trace::{BatchSpanProcessor, SpanKind, Tracer};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
//!     let exporter = apm_agent_intake::IntakeExporter::builder()
//!         .with_service_name("checkout")
//!         .build()?;
//!     let tracer = Tracer::builder()
//!         .with_span_processor(BatchSpanProcessor::builder(exporter).build())
//!         .build();
//!
//!     tracer.in_transaction("doing_work", SpanKind::Request, |_tx| {
//!         // Traced app logic here...
//!     });
//!
//!     tracer.shutdown()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! | Variable | Default |
//! | --- | --- |
//! | `ELASTIC_APM_SERVER_URL` | `http://localhost:8200` |
//! | `ELASTIC_APM_SERVICE_NAME` | `unknown-service` |
//! | `ELASTIC_APM_SERVICE_VERSION` | |
//! | `ELASTIC_APM_ENVIRONMENT` | |
//! | `ELASTIC_APM_SECRET_TOKEN` | |
//!
//! ## HTTP client
//!
//! The default `reqwest-blocking-client` feature sends from the export
//! worker thread with `reqwest::blocking`. Any [`apm_agent_http::HttpClient`]
//! can be supplied through
//! [`IntakeExporterBuilder::with_http_client`] instead.
//!
//! Failed requests are retried by the `BatchSpanProcessor` with exponential
//! backoff; a rejected batch surfaces as [`Error::Rejected`] carrying the
//! status and the collector's error messages.
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

mod exporter;

pub use exporter::{Error, IntakeExporter, IntakeExporterBuilder};
