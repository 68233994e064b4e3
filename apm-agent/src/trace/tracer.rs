//! # Tracer
//!
//! The [`Tracer`] is the entry point for instrumentation. It starts
//! transactions, starts spans under whatever span is current, and owns the
//! span processor finished transactions are handed to.
//!
//! Instrumentation calls never fail and never block on I/O: misuse such as
//! starting a span with no transaction in progress yields a no-op span and a
//! diagnostic event. Only [`Tracer::flush`] and [`Tracer::shutdown`] wait for
//! the exporter.
use crate::context::{Context, ContextGuard};
use crate::trace::{
    mark_span_as_active, Config, IdGenerator, Span, SpanContext, SpanKind, SpanLimits,
    SpanProcessor, TraceError, TraceResult,
};
use crate::{apm_debug, apm_warn};
use std::borrow::Cow;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Starts transactions and spans and ships them through its span processor.
///
/// Cloning a `Tracer` is cheap; clones share the processor.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

struct TracerInner {
    processor: Option<Arc<dyn SpanProcessor>>,
    id_generator: Arc<dyn IdGenerator>,
    span_limits: SpanLimits,
    is_shutdown: AtomicBool,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("processor", &self.inner.processor)
            .field("span_limits", &self.inner.span_limits)
            .field("is_shutdown", &self.inner.is_shutdown)
            .finish()
    }
}

impl Tracer {
    /// Create a new [`TracerBuilder`].
    pub fn builder() -> TracerBuilder {
        TracerBuilder::default()
    }

    /// Starts a new transaction: the root of a new trace.
    ///
    /// The transaction is not made current; use
    /// [`Tracer::start_active_transaction`], [`Tracer::in_transaction`] or
    /// [`mark_span_as_active`] for that. An empty name, or a tracer without
    /// processor or already shut down, yields a no-op span.
    pub fn start_transaction<T>(&self, name: T, kind: SpanKind) -> Span
    where
        T: Into<Cow<'static, str>>,
    {
        self.build_transaction(name.into(), kind, None)
    }

    /// Starts a new transaction and makes it the current span of this flow
    /// of execution until the returned guard is dropped.
    ///
    /// Spans started through [`Tracer::start_span`] in the meantime become
    /// its children. Dropping the guard does not end the transaction.
    ///
    /// ```
    /// use apm_agent::trace::{SpanKind, Tracer};
    ///
    /// # let tracer = Tracer::builder().build();
    /// let (tx, _guard) = tracer.start_active_transaction("GET /users", SpanKind::Request);
    /// let query = tracer.start_span("SELECT users", SpanKind::Db);
    /// query.end();
    /// tx.end();
    /// ```
    pub fn start_active_transaction<T>(&self, name: T, kind: SpanKind) -> (Span, ContextGuard)
    where
        T: Into<Cow<'static, str>>,
    {
        let transaction = self.start_transaction(name, kind);
        let guard = mark_span_as_active(transaction.clone());
        (transaction, guard)
    }

    /// Starts a transaction that continues a trace begun in another process,
    /// typically with a context extracted by
    /// [`TraceContextPropagator`](crate::propagation::TraceContextPropagator).
    ///
    /// The transaction shares the remote trace id and records the remote span
    /// as its parent. An invalid remote context starts a new trace instead.
    pub fn start_transaction_with_remote_parent<T>(
        &self,
        name: T,
        kind: SpanKind,
        remote_parent: &SpanContext,
    ) -> Span
    where
        T: Into<Cow<'static, str>>,
    {
        let parent = remote_parent.is_valid().then_some(remote_parent);
        self.build_transaction(name.into(), kind, parent)
    }

    fn build_transaction(
        &self,
        name: Cow<'static, str>,
        kind: SpanKind,
        remote_parent: Option<&SpanContext>,
    ) -> Span {
        if name.is_empty() {
            apm_warn!(name: "Tracer.EmptyTransactionName");
            return Span::noop();
        }
        if self.inner.is_shutdown.load(Ordering::Relaxed) {
            return Span::noop();
        }
        let Some(processor) = &self.inner.processor else {
            return Span::noop();
        };

        let (trace_id, parent_span_id) = match remote_parent {
            Some(parent) => (parent.trace_id(), Some(parent.span_id())),
            None => (self.inner.id_generator.new_trace_id(), None),
        };
        Span::new_transaction(
            name,
            kind,
            trace_id,
            parent_span_id,
            processor.clone(),
            self.inner.id_generator.clone(),
            self.inner.span_limits,
        )
    }

    /// Starts a span as a child of the current span.
    ///
    /// If the current span already ended, its nearest ancestor that is still
    /// recording becomes the parent. With no such span, or with an empty
    /// name, a no-op span is returned and a diagnostic event is emitted; the
    /// caller's control flow is never affected.
    pub fn start_span<T>(&self, name: T, kind: SpanKind) -> Span
    where
        T: Into<Cow<'static, str>>,
    {
        let name = name.into();
        match self.current() {
            Some(parent) => match parent.start_child(name, kind) {
                Ok(span) => span,
                Err(err) => {
                    apm_warn!(
                        name: "Tracer.InvalidSpan",
                        error = format!("{}", err)
                    );
                    Span::noop()
                }
            },
            None => {
                apm_debug!(name: "Tracer.NoActiveTransaction", span_name = name.into_owned());
                Span::noop()
            }
        }
    }

    /// Starts a transaction, makes it current while `f` runs, and ends it
    /// afterwards, also if `f` panics.
    ///
    /// ```
    /// use apm_agent::trace::{SpanKind, Tracer};
    ///
    /// let tracer = Tracer::builder().build();
    /// let answer = tracer.in_transaction("job", SpanKind::Custom, |_tx| {
    ///     tracer.in_span("step", SpanKind::Custom, |_span| 42)
    /// });
    /// assert_eq!(answer, 42);
    /// ```
    pub fn in_transaction<T, F, N>(&self, name: N, kind: SpanKind, f: F) -> T
    where
        F: FnOnce(&Span) -> T,
        N: Into<Cow<'static, str>>,
    {
        run_in(self.start_transaction(name, kind), f)
    }

    /// Starts a child of the current span, makes it current while `f` runs,
    /// and ends it afterwards, also if `f` panics.
    pub fn in_span<T, F, N>(&self, name: N, kind: SpanKind, f: F) -> T
    where
        F: FnOnce(&Span) -> T,
        N: Into<Cow<'static, str>>,
    {
        run_in(self.start_span(name, kind), f)
    }

    /// Records `err` on the current span.
    ///
    /// This only observes the error: the caller still returns or propagates it
    /// exactly as it would without tracing.
    pub fn capture_exception(&self, err: &dyn Error) {
        if let Some(span) = self.current() {
            span.capture_error(err);
        }
    }

    /// The current span of this flow of execution. Once the innermost span
    /// ends, its nearest ancestor still recording is current again, so ending
    /// a span restores its parent even while the span's guard is alive.
    pub fn current(&self) -> Option<Span> {
        Context::map_current(|cx| cx.span().and_then(Span::nearest_recording))
    }

    /// Exports everything ended so far, blocking until the exporter is done
    /// or the flush timeout passes.
    pub fn flush(&self) -> TraceResult<()> {
        match &self.inner.processor {
            Some(processor) => processor.force_flush(),
            None => Ok(()),
        }
    }

    /// Flushes with a hard deadline and stops the export worker.
    ///
    /// Afterwards every new transaction is a no-op span. Calling it again
    /// returns [`TraceError::AlreadyShutdown`].
    pub fn shutdown(&self) -> TraceResult<()> {
        if self.inner.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(TraceError::AlreadyShutdown);
        }
        match &self.inner.processor {
            Some(processor) => processor.shutdown(),
            None => Ok(()),
        }
    }
}

fn run_in<T, F>(span: Span, f: F) -> T
where
    F: FnOnce(&Span) -> T,
{
    let ending = EndOnDrop(span);
    let _guard = mark_span_as_active(ending.0.clone());
    f(&ending.0)
}

/// Ends the span when dropped, which also covers unwinding.
struct EndOnDrop(Span);

impl Drop for EndOnDrop {
    fn drop(&mut self) {
        self.0.end();
    }
}

/// Builder for [`Tracer`].
#[derive(Debug, Default)]
pub struct TracerBuilder {
    processor: Option<Arc<dyn SpanProcessor>>,
    config: Option<Config>,
}

impl TracerBuilder {
    /// The processor finished transactions are handed to. Without one every
    /// span is a no-op span.
    pub fn with_span_processor<T: SpanProcessor + 'static>(mut self, processor: T) -> Self {
        self.processor = Some(Arc::new(processor));
        self
    }

    /// Use a processor that is shared with other owners.
    pub fn with_shared_span_processor(mut self, processor: Arc<dyn SpanProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// The tracer configuration. Defaults to [`Config::default`], which reads
    /// the environment.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Replace the id generator of the configuration.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        let config = self.config.take().unwrap_or_default();
        self.config = Some(config.with_id_generator(id_generator));
        self
    }

    /// Create the tracer.
    pub fn build(self) -> Tracer {
        let config = self.config.unwrap_or_default();
        Tracer {
            inner: Arc::new(TracerInner {
                processor: self.processor,
                id_generator: config.id_generator,
                span_limits: config.span_limits,
                is_shutdown: AtomicBool::new(false),
            }),
        }
    }
}
