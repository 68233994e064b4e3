//! # Span
//!
//! A [`Span`] is one timed operation in a trace. The root of every local trace
//! tree is a *transaction*: a span without a local parent that collects its
//! descendants and hands the whole tree to the span processor when it ends.
//!
//! A span's start time is taken from the wall clock when it is created; its
//! end time is the start time plus the monotonic time elapsed, so clock
//! adjustments while a span is open never produce a negative duration.
//!
//! Spans are cheap handles (`Arc`) and may be cloned into contexts, moved
//! across threads and ended from any of them. Ending is idempotent.
use crate::trace::{SpanContext, SpanId, SpanLimits, SpanProcessor, TraceError, TraceResult};
use crate::{apm_debug, KeyValue};
use std::borrow::Cow;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant, SystemTime};

use super::IdGenerator;

/// The kind of work a span measures. Serialized as the span `type`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SpanKind {
    /// Handling of an incoming request; the usual transaction kind.
    Request,
    /// An outgoing call to another service.
    External,
    /// A database query.
    Db,
    /// Application-defined work.
    Custom,
    /// Any other type name understood by the collector.
    Other(Cow<'static, str>),
}

impl SpanKind {
    /// The type name sent to the collector.
    pub fn as_str(&self) -> &str {
        match self {
            SpanKind::Request => "request",
            SpanKind::External => "external",
            SpanKind::Db => "db",
            SpanKind::Custom => "custom",
            SpanKind::Other(name) => name,
        }
    }
}

impl fmt::Display for SpanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the operation a span measures.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Status {
    /// No outcome was recorded.
    #[default]
    Unset,
    /// The operation completed successfully.
    Ok,
    /// The operation failed.
    Error {
        /// Summary of the failure.
        description: Cow<'static, str>,
    },
}

impl Status {
    /// Create a new error status with a given description.
    pub fn error(description: impl Into<Cow<'static, str>>) -> Self {
        Status::Error {
            description: description.into(),
        }
    }
}

/// Number of child spans a transaction started, and how many it refused
/// because of [`SpanLimits::max_spans_per_transaction`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpanCount {
    /// Child spans recorded.
    pub started: u32,
    /// Child spans refused over the limit.
    pub dropped: u32,
}

/// The immutable record of an ended span, as handed to exporters.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// Trace and span ids.
    pub span_context: SpanContext,
    /// Enclosing span; `None` for a transaction started without a remote parent.
    pub parent_span_id: Option<SpanId>,
    /// Id of the owning transaction; equals the span id for a transaction.
    pub transaction_id: SpanId,
    /// Span name
    pub name: Cow<'static, str>,
    /// Span kind
    pub kind: SpanKind,
    /// Span start time
    pub start_time: SystemTime,
    /// Span end time, never before `start_time`.
    pub end_time: SystemTime,
    /// Span attributes
    pub attributes: Vec<KeyValue>,
    /// Span status
    pub status: Status,
    /// Set when the span was still open when its transaction ended.
    pub truncated: bool,
    /// Child span counts; only present on transactions.
    pub span_count: Option<SpanCount>,
}

impl SpanData {
    /// Returns `true` for the root record of a transaction.
    pub fn is_transaction(&self) -> bool {
        self.span_count.is_some()
    }

    /// Time between start and end.
    pub fn duration(&self) -> Duration {
        self.end_time
            .duration_since(self.start_time)
            .unwrap_or_default()
    }
}

/// Handle to a span or transaction.
///
/// Spans obtained while no transaction is active, or after the transaction
/// ended, are *no-op* spans: every operation on them is accepted and ignored,
/// so instrumentation never has to check before calling.
#[derive(Clone)]
pub struct Span {
    inner: Arc<SpanInner>,
}

struct SpanInner {
    span_context: SpanContext,
    parent_span_id: Option<SpanId>,
    /// Local parent; empty for transactions and no-op spans.
    parent: Weak<SpanInner>,
    transaction_id: SpanId,
    start_time: SystemTime,
    started_at: Instant,
    limits: SpanLimits,
    state: Mutex<SpanState>,
    owner: Owner,
}

enum Owner {
    Noop,
    /// The span is the transaction root.
    Transaction(Arc<Transaction>),
    /// Children only hold a weak reference, so a transaction dropped without
    /// being ended frees its whole tree.
    Child(Weak<Transaction>),
}

struct SpanState {
    name: Cow<'static, str>,
    kind: SpanKind,
    attributes: Vec<KeyValue>,
    status: Status,
    end_time: Option<SystemTime>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SpanInner {
    fn new(
        span_context: SpanContext,
        parent_span_id: Option<SpanId>,
        parent: Weak<SpanInner>,
        transaction_id: SpanId,
        name: Cow<'static, str>,
        kind: SpanKind,
        limits: SpanLimits,
        owner: Owner,
    ) -> Self {
        SpanInner {
            span_context,
            parent_span_id,
            parent,
            transaction_id,
            start_time: SystemTime::now(),
            started_at: Instant::now(),
            limits,
            state: Mutex::new(SpanState {
                name,
                kind,
                attributes: Vec::new(),
                status: Status::Unset,
                end_time: None,
            }),
            owner,
        }
    }

    fn is_noop(&self) -> bool {
        matches!(self.owner, Owner::Noop)
    }

    fn is_recording(&self) -> bool {
        !self.is_noop() && lock(&self.state).end_time.is_none()
    }

    /// The transaction root this span belongs to, while it is alive.
    fn root(&self) -> Option<Arc<SpanInner>> {
        match &self.owner {
            Owner::Child(transaction) => transaction.upgrade()?.root.upgrade(),
            Owner::Noop | Owner::Transaction(_) => None,
        }
    }

    fn end_time(&self, timestamp: Option<SystemTime>) -> SystemTime {
        match timestamp {
            Some(timestamp) => timestamp.max(self.start_time),
            None => self.start_time + self.started_at.elapsed(),
        }
    }

    /// Moves the recorded state into an exportable record. Only called once,
    /// right after `end_time` was set.
    fn take_data(&self, state: &mut SpanState, end_time: SystemTime, truncated: bool) -> SpanData {
        SpanData {
            span_context: self.span_context,
            parent_span_id: self.parent_span_id,
            transaction_id: self.transaction_id,
            name: state.name.clone(),
            kind: state.kind.clone(),
            start_time: self.start_time,
            end_time,
            attributes: std::mem::take(&mut state.attributes),
            status: std::mem::take(&mut state.status),
            truncated,
            span_count: None,
        }
    }

    /// Ends a span still open when its transaction ends.
    fn force_end(&self, timestamp: SystemTime) -> Option<SpanData> {
        let mut state = lock(&self.state);
        if state.end_time.is_some() {
            return None;
        }
        let end_time = self.end_time(Some(timestamp));
        state.end_time = Some(end_time);
        Some(self.take_data(&mut state, end_time, true))
    }
}

impl Span {
    /// A span that records nothing.
    pub fn noop() -> Self {
        Span {
            inner: Arc::new(SpanInner::new(
                SpanContext::NONE,
                None,
                Weak::new(),
                SpanId::INVALID,
                Cow::Borrowed(""),
                SpanKind::Custom,
                SpanLimits::default(),
                Owner::Noop,
            )),
        }
    }

    pub(crate) fn new_transaction(
        name: Cow<'static, str>,
        kind: SpanKind,
        trace_id: crate::trace::TraceId,
        parent_span_id: Option<SpanId>,
        processor: Arc<dyn SpanProcessor>,
        id_generator: Arc<dyn IdGenerator>,
        limits: SpanLimits,
    ) -> Self {
        let span_id = id_generator.new_span_id();
        let inner = Arc::new_cyclic(|root| {
            let transaction = Arc::new(Transaction {
                id: span_id,
                root: root.clone(),
                processor,
                id_generator,
                limits,
                state: Mutex::new(TransactionState::default()),
            });
            SpanInner::new(
                SpanContext::new(trace_id, span_id, false),
                parent_span_id,
                Weak::new(),
                span_id,
                name,
                kind,
                limits,
                Owner::Transaction(transaction),
            )
        });
        Span { inner }
    }

    /// The trace and span id of this span.
    pub fn span_context(&self) -> &SpanContext {
        &self.inner.span_context
    }

    /// The id of the enclosing span, if any.
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.inner.parent_span_id
    }

    /// Returns `true` if this span is the root of a transaction.
    pub fn is_transaction(&self) -> bool {
        matches!(self.inner.owner, Owner::Transaction(_))
    }

    /// Returns `true` while the span records data, i.e. it is not a no-op
    /// span and has not ended.
    pub fn is_recording(&self) -> bool {
        self.inner.is_recording()
    }

    /// This span if it is still recording, otherwise its closest ancestor
    /// that is. Once a span ends, work started "under" it lands on its
    /// parent, up to the transaction root.
    ///
    /// Returns `None` for no-op spans and once the transaction has ended.
    pub fn nearest_recording(&self) -> Option<Span> {
        let mut inner = self.inner.clone();
        loop {
            if inner.is_recording() {
                return Some(Span { inner });
            }
            // An ancestor whose last handle is gone can't be walked through;
            // the root is the nearest one still reachable.
            inner = match inner.parent.upgrade() {
                Some(parent) => parent,
                None => {
                    return inner
                        .root()
                        .filter(|root| root.is_recording())
                        .map(|inner| Span { inner })
                }
            };
        }
    }

    /// Start a span nested under this one.
    ///
    /// The child shares this span's trace id and belongs to the same
    /// transaction. Fails only if `name` is empty. If this span is not
    /// recording, or its transaction has ended or reached its span limit, a
    /// no-op span is returned.
    pub fn start_child<T>(&self, name: T, kind: SpanKind) -> TraceResult<Span>
    where
        T: Into<Cow<'static, str>>,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(TraceError::InvalidSpanName);
        }
        if !self.is_recording() {
            return Ok(Span::noop());
        }
        let transaction = match &self.inner.owner {
            Owner::Noop => None,
            Owner::Transaction(transaction) => Some(transaction.clone()),
            Owner::Child(transaction) => transaction.upgrade(),
        };
        Ok(match transaction {
            Some(transaction) => transaction.start_span(&self.inner, name, kind),
            None => Span::noop(),
        })
    }

    /// Sets a single attribute; an existing value for the same key is
    /// replaced.
    pub fn set_attribute(&self, attribute: KeyValue) {
        self.with_state(|state| set_attribute(&mut state.attributes, attribute));
    }

    /// Sets the status of this span.
    pub fn set_status(&self, status: Status) {
        self.with_state(|state| state.status = status);
    }

    /// Updates the span's name.
    pub fn update_name<T>(&self, new_name: T)
    where
        T: Into<Cow<'static, str>>,
    {
        self.with_state(|state| state.name = new_name.into());
    }

    /// Records `err` on this span: the status becomes [`Status::Error`] and the
    /// message, truncated to the configured length, is kept as the
    /// `exception.message` attribute.
    ///
    /// This only observes the error; the caller keeps handling it as usual.
    pub fn capture_error(&self, err: &dyn Error) {
        if !self.is_recording() {
            return;
        }
        let max_len = self.inner.limits.max_error_message_length;
        let message = truncate(err.to_string(), max_len);
        let cause = err.source().map(|source| truncate(source.to_string(), max_len));
        self.with_state(|state| {
            set_attribute(
                &mut state.attributes,
                KeyValue::new("exception.message", message.clone()),
            );
            if let Some(cause) = cause {
                set_attribute(&mut state.attributes, KeyValue::new("exception.cause", cause));
            }
            state.status = Status::error(message);
        });
    }

    /// Ends the span now and returns its end time.
    ///
    /// Ending an already ended span changes nothing and returns the time it
    /// originally ended at. Ending a transaction force-ends its open
    /// descendants and queues the whole tree for export.
    pub fn end(&self) -> SystemTime {
        self.finish(None)
    }

    /// Ends the span with the given timestamp, clamped to not precede the
    /// start time.
    pub fn end_with_timestamp(&self, timestamp: SystemTime) -> SystemTime {
        self.finish(Some(timestamp))
    }

    /// A snapshot of the span's data while it is still recording.
    pub fn exported_data(&self) -> Option<SpanData> {
        if self.inner.is_noop() {
            return None;
        }
        let state = lock(&self.inner.state);
        if state.end_time.is_some() {
            return None;
        }
        Some(SpanData {
            span_context: self.inner.span_context,
            parent_span_id: self.inner.parent_span_id,
            transaction_id: self.inner.transaction_id,
            name: state.name.clone(),
            kind: state.kind.clone(),
            start_time: self.inner.start_time,
            end_time: self.inner.end_time(None),
            attributes: state.attributes.clone(),
            status: state.status.clone(),
            truncated: false,
            span_count: None,
        })
    }

    fn with_state<F: FnOnce(&mut SpanState)>(&self, f: F) {
        if self.inner.is_noop() {
            return;
        }
        let mut state = lock(&self.inner.state);
        if state.end_time.is_none() {
            f(&mut state);
        }
    }

    fn finish(&self, timestamp: Option<SystemTime>) -> SystemTime {
        let inner = &self.inner;
        let (end_time, data) = {
            let mut state = lock(&inner.state);
            if let Some(end_time) = state.end_time {
                return end_time;
            }
            let end_time = inner.end_time(timestamp);
            state.end_time = Some(end_time);
            if inner.is_noop() {
                return end_time;
            }
            (end_time, inner.take_data(&mut state, end_time, false))
        };

        match &inner.owner {
            Owner::Noop => {}
            Owner::Transaction(transaction) => transaction.end(data, end_time),
            Owner::Child(transaction) => match transaction.upgrade() {
                Some(transaction) => transaction.child_ended(data),
                None => {
                    apm_debug!(
                        name: "Span.EndAfterTransactionDropped",
                        span_id = format!("{}", data.span_context.span_id())
                    );
                }
            },
        }
        end_time
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("Span")
            .field("span_context", &self.inner.span_context)
            .field("parent_span_id", &self.inner.parent_span_id)
            .field("name", &state.name)
            .field("kind", &state.kind)
            .field("ended", &state.end_time.is_some())
            .finish()
    }
}

fn set_attribute(attributes: &mut Vec<KeyValue>, attribute: KeyValue) {
    match attributes.iter_mut().find(|kv| kv.key == attribute.key) {
        Some(existing) => existing.value = attribute.value,
        None => attributes.push(attribute),
    }
}

fn truncate(mut message: String, max_len: usize) -> String {
    if message.len() > max_len {
        let mut idx = max_len;
        while !message.is_char_boundary(idx) {
            idx -= 1;
        }
        message.truncate(idx);
    }
    message
}

/// Shared state of one transaction: `Started` until the root span ends,
/// `Ended` afterwards.
struct Transaction {
    id: SpanId,
    root: Weak<SpanInner>,
    processor: Arc<dyn SpanProcessor>,
    id_generator: Arc<dyn IdGenerator>,
    limits: SpanLimits,
    state: Mutex<TransactionState>,
}

#[derive(Default)]
struct TransactionState {
    ended: bool,
    open: HashMap<SpanId, Arc<SpanInner>>,
    finished: Vec<SpanData>,
    span_count: SpanCount,
}

impl Transaction {
    fn start_span(
        self: &Arc<Self>,
        parent: &Arc<SpanInner>,
        name: Cow<'static, str>,
        kind: SpanKind,
    ) -> Span {
        let mut state = lock(&self.state);
        if state.ended {
            return Span::noop();
        }
        if state.span_count.started >= self.limits.max_spans_per_transaction {
            state.span_count.dropped += 1;
            if state.span_count.dropped == 1 {
                apm_debug!(
                    name: "Transaction.SpanLimitReached",
                    limit = self.limits.max_spans_per_transaction
                );
            }
            return Span::noop();
        }
        state.span_count.started += 1;

        let span_id = self.id_generator.new_span_id();
        let inner = Arc::new(SpanInner::new(
            SpanContext::new(parent.span_context.trace_id(), span_id, false),
            Some(parent.span_context.span_id()),
            Arc::downgrade(parent),
            self.id,
            name,
            kind,
            self.limits,
            Owner::Child(Arc::downgrade(self)),
        ));
        state.open.insert(span_id, inner.clone());
        Span { inner }
    }

    fn child_ended(&self, data: SpanData) {
        let mut state = lock(&self.state);
        state.open.remove(&data.span_context.span_id());
        if state.ended {
            // The transaction ended while this span was finishing.
            drop(state);
            self.processor.on_end(vec![data]);
        } else {
            state.finished.push(data);
        }
    }

    fn end(&self, mut data: SpanData, end_time: SystemTime) {
        let (open, finished, span_count) = {
            let mut state = lock(&self.state);
            state.ended = true;
            (
                std::mem::take(&mut state.open),
                std::mem::take(&mut state.finished),
                state.span_count,
            )
        };

        data.span_count = Some(span_count);
        let mut batch = Vec::with_capacity(1 + finished.len() + open.len());
        batch.push(data);
        batch.extend(finished);

        let truncated_before = batch.len();
        batch.extend(open.into_values().filter_map(|span| span.force_end(end_time)));
        if batch.len() > truncated_before {
            apm_debug!(
                name: "Transaction.TruncatedSpans",
                count = batch.len() - truncated_before
            );
        }

        self.processor.on_end(batch);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let ended = lock(&self.state).ended;
        if !ended {
            apm_debug!(
                name: "Transaction.DroppedWithoutEnd",
                transaction_id = format!("{}", self.id)
            );
        }
    }
}
