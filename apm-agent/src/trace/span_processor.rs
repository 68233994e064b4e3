//! # Span Processor
//!
//! A span processor receives every finished transaction tree from the
//! [`Tracer`](crate::trace::Tracer) and is responsible for getting it to an
//! exporter.
//!
//! ```ascii
//!   +-----+--------------+   +-----------------------+   +-------------------+
//!   |     |              |   |                       |   |                   |
//!   |     | Span.end()   +---> BatchSpanProcessor    +--->   SpanExporter    |
//!   | app |              |   |  (RingBuffer + thread)|   | (IntakeExporter)  |
//!   |     |              |   |                       |   |                   |
//!   +-----+--------------+   +-----------------------+   +-------------------+
//! ```
//!
//! [`BatchSpanProcessor`] is the processor used in production. Application
//! threads only push into its bounded [`RingBuffer`] and, when a full batch is
//! waiting, nudge the worker thread through a bounded channel without
//! blocking. The worker drains the buffer every `scheduled_delay` or whenever
//! nudged, exports batch by batch with retry and backoff, and gives up on a
//! batch once its retry budget is spent.
//!
//! Export attempts are polled on a second thread. An exporter that blocks
//! inside its future (a blocking HTTP client, say) then only stalls that
//! thread, and the worker still gives up on the attempt after
//! `max_export_timeout`.
use crate::retry::{retry_with_exponential_backoff, RetryPolicy};
use crate::trace::config::env_value;
use crate::trace::{ExportResult, RingBuffer, SpanData, SpanExporter, TraceError, TraceResult};
use crate::{apm_debug, apm_error, apm_info, apm_warn};
use futures_channel::oneshot;
use futures_executor::block_on;
use futures_timer::Delay;
use futures_util::future::{select, BoxFuture, Either};
use std::cmp::min;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, sync_channel, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub(crate) const ELASTIC_APM_FLUSH_INTERVAL: &str = "ELASTIC_APM_FLUSH_INTERVAL";
pub(crate) const ELASTIC_APM_FLUSH_INTERVAL_DEFAULT: u64 = 5_000;
pub(crate) const ELASTIC_APM_MAX_QUEUE_SIZE: &str = "ELASTIC_APM_MAX_QUEUE_SIZE";
pub(crate) const ELASTIC_APM_MAX_QUEUE_SIZE_DEFAULT: usize = 2_048;
pub(crate) const ELASTIC_APM_MAX_BATCH_SIZE: &str = "ELASTIC_APM_MAX_BATCH_SIZE";
pub(crate) const ELASTIC_APM_MAX_BATCH_SIZE_DEFAULT: usize = 512;
pub(crate) const ELASTIC_APM_EXPORT_TIMEOUT: &str = "ELASTIC_APM_EXPORT_TIMEOUT";
pub(crate) const ELASTIC_APM_EXPORT_TIMEOUT_DEFAULT: u64 = 30_000;
pub(crate) const ELASTIC_APM_MAX_RETRIES: &str = "ELASTIC_APM_MAX_RETRIES";
pub(crate) const ELASTIC_APM_MAX_RETRIES_DEFAULT: usize = 3;
pub(crate) const ELASTIC_APM_RETRY_INITIAL_DELAY: &str = "ELASTIC_APM_RETRY_INITIAL_DELAY";
pub(crate) const ELASTIC_APM_RETRY_INITIAL_DELAY_DEFAULT: u64 = 100;
pub(crate) const ELASTIC_APM_RETRY_MAX_DELAY: &str = "ELASTIC_APM_RETRY_MAX_DELAY";
pub(crate) const ELASTIC_APM_RETRY_MAX_DELAY_DEFAULT: u64 = 1_600;
pub(crate) const ELASTIC_APM_SHUTDOWN_TIMEOUT: &str = "ELASTIC_APM_SHUTDOWN_TIMEOUT";
pub(crate) const ELASTIC_APM_SHUTDOWN_TIMEOUT_DEFAULT: u64 = 5_000;

const FORCEFLUSH_TIMEOUT_DEFAULT: Duration = Duration::from_secs(5);
const RETRY_JITTER_DEFAULT: Duration = Duration::from_millis(100);

/// `SpanProcessor` is the interface the tracer uses to hand over finished
/// spans.
pub trait SpanProcessor: Send + Sync + fmt::Debug {
    /// Called once per ended transaction with the transaction record followed
    /// by its child spans, and for the rare child that ends after its
    /// transaction. Must not block on I/O.
    fn on_end(&self, batch: Vec<SpanData>);
    /// Export all spans handed over so far, blocking until done or timed out.
    fn force_flush(&self) -> TraceResult<()>;
    /// Flush and release resources. Spans handed over afterwards are dropped.
    fn shutdown(&self) -> TraceResult<()>;
}

/// Messages accepted by the export worker.
#[derive(Debug)]
enum BatchMessage {
    /// A full batch is waiting in the buffer.
    ExportBatch,
    ForceFlush(SyncSender<ExportResult>),
    Shutdown(SyncSender<ExportResult>),
}

/// Counters shared between producers, the worker and the processor handle.
#[derive(Debug, Default)]
struct ExportCounters {
    dropped_after_shutdown: AtomicUsize,
    failed: AtomicUsize,
    exported: AtomicUsize,
    /// Set by the worker right before its last drain of the buffer.
    worker_stopped: AtomicBool,
}

impl ExportCounters {
    /// Counts whatever is left in the buffer once nobody will export it.
    fn discard_stranded(&self, buffer: &RingBuffer<SpanData>) {
        let stranded = buffer.drain_batch(usize::MAX).len();
        if stranded > 0 {
            self.dropped_after_shutdown
                .fetch_add(stranded, Ordering::Relaxed);
            apm_warn!(name: "BatchSpanProcessor.SpansStranded", count = stranded);
        }
    }
}

/// A [`SpanProcessor`] that buffers finished spans and exports them in
/// batches from a dedicated background thread.
///
/// Spans are exported when `max_export_batch_size` of them are buffered or
/// every `scheduled_delay`, whichever comes first. Each batch is retried with
/// exponential backoff according to the configured [`RetryPolicy`]; every
/// attempt is bounded by `max_export_timeout`. A batch that still fails
/// after the last retry is dropped and counted in
/// [`failed_span_count`](Self::failed_span_count).
///
/// When the buffer is full the oldest span is evicted and counted in
/// [`dropped_span_count`](Self::dropped_span_count); producers never wait.
///
/// ```
/// use apm_agent::trace::{BatchConfigBuilder, BatchSpanProcessor, Tracer};
/// # use apm_agent::trace::{ExportResult, SpanData, SpanExporter};
/// # use futures_util::future::BoxFuture;
/// # #[derive(Debug)]
/// # struct StdoutExporter;
/// # impl SpanExporter for StdoutExporter {
/// #     fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
/// #         println!("{} spans", batch.len());
/// #         Box::pin(async { Ok(()) })
/// #     }
/// # }
/// use std::time::Duration;
///
/// let config = BatchConfigBuilder::default()
///     .with_max_queue_size(4096)
///     .with_scheduled_delay(Duration::from_secs(1))
///     .build();
/// let processor = BatchSpanProcessor::builder(StdoutExporter)
///     .with_batch_config(config)
///     .build();
/// let tracer = Tracer::builder().with_span_processor(processor).build();
/// # let _ = tracer.shutdown();
/// ```
pub struct BatchSpanProcessor {
    buffer: Arc<RingBuffer<SpanData>>,
    message_sender: SyncSender<BatchMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    export_pending: Arc<AtomicBool>,
    counters: Arc<ExportCounters>,
    max_export_batch_size: usize,
    forceflush_timeout: Duration,
    shutdown_timeout: Duration,
    is_shutdown: AtomicBool,
}

impl fmt::Debug for BatchSpanProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchSpanProcessor")
            .field("buffer", &self.buffer)
            .field("counters", &self.counters)
            .field("is_shutdown", &self.is_shutdown)
            .finish()
    }
}

impl BatchSpanProcessor {
    /// Creates a new instance of `BatchSpanProcessor` and starts its worker
    /// thread.
    pub fn new<E>(exporter: E, config: BatchConfig) -> Self
    where
        E: SpanExporter + Send + 'static,
    {
        let buffer = Arc::new(RingBuffer::new(config.max_queue_size));
        // Only control messages go through the channel; a handful is plenty
        // since batch nudges are coalesced.
        let (message_sender, message_receiver) = sync_channel(16);
        let export_pending = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(ExportCounters::default());

        let mut worker = ExportWorker {
            exporter,
            attempts: AttemptRunner::start(),
            buffer: buffer.clone(),
            export_pending: export_pending.clone(),
            counters: counters.clone(),
            max_export_batch_size: config.max_export_batch_size,
            max_export_timeout: config.max_export_timeout,
            retry_policy: config.retry_policy,
        };
        let scheduled_delay = config.scheduled_delay;
        let forceflush_timeout = config.forceflush_timeout;
        let shutdown_timeout = config.shutdown_timeout;

        let handle = thread::Builder::new()
            .name("BatchSpanProcessorThread".to_string())
            .spawn(move || {
                apm_debug!(name: "BatchSpanProcessor.ThreadStarted");
                let mut last_export_time = Instant::now();

                loop {
                    let timeout = scheduled_delay.saturating_sub(last_export_time.elapsed());
                    match message_receiver.recv_timeout(timeout) {
                        Ok(BatchMessage::ExportBatch) => {
                            worker.export_pending.store(false, Ordering::Release);
                            let _ = worker.export_buffered(None);
                            last_export_time = Instant::now();
                        }
                        Ok(BatchMessage::ForceFlush(sender)) => {
                            let deadline = Instant::now() + forceflush_timeout;
                            let result = worker.export_buffered(Some(deadline));
                            let _ = sender.send(result);
                            last_export_time = Instant::now();
                        }
                        Ok(BatchMessage::Shutdown(sender)) => {
                            let deadline = Instant::now() + shutdown_timeout;
                            let result = worker.export_buffered(Some(deadline));
                            worker.exporter.shutdown();
                            let _ = sender.send(result);
                            break;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            let _ = worker.export_buffered(None);
                            last_export_time = Instant::now();
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            // The processor was dropped without shutdown.
                            let _ = worker.export_buffered(Some(Instant::now() + shutdown_timeout));
                            worker.exporter.shutdown();
                            break;
                        }
                    }
                }
                // Producers that passed the shutdown check just before it
                // flipped may still push; either this drain or theirs picks
                // those spans up.
                worker.counters.worker_stopped.store(true, Ordering::SeqCst);
                worker.counters.discard_stranded(&worker.buffer);
                apm_debug!(name: "BatchSpanProcessor.ThreadStopped");
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                apm_error!(
                    name: "BatchSpanProcessor.ThreadSpawnFailed",
                    error = format!("{}", err)
                );
                None
            }
        };

        BatchSpanProcessor {
            buffer,
            message_sender,
            handle: Mutex::new(handle),
            export_pending,
            counters,
            max_export_batch_size: config.max_export_batch_size,
            forceflush_timeout,
            shutdown_timeout,
            is_shutdown: AtomicBool::new(false),
        }
    }

    /// Create a new batch processor builder
    pub fn builder<E>(exporter: E) -> BatchSpanProcessorBuilder<E>
    where
        E: SpanExporter + Send + 'static,
    {
        BatchSpanProcessorBuilder {
            exporter,
            config: BatchConfig::default(),
        }
    }

    /// Spans lost without an export attempt: evicted from the full buffer, or
    /// handed over after shutdown or after the shutdown deadline passed.
    pub fn dropped_span_count(&self) -> usize {
        self.buffer.dropped_count() + self.counters.dropped_after_shutdown.load(Ordering::Relaxed)
    }

    /// Spans whose batch was given up on after exhausting the retry budget.
    pub fn failed_span_count(&self) -> usize {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Spans accepted by the exporter.
    pub fn exported_span_count(&self) -> usize {
        self.counters.exported.load(Ordering::Relaxed)
    }

    /// Spans currently waiting in the buffer.
    pub fn queued_span_count(&self) -> usize {
        self.buffer.len()
    }
}

impl SpanProcessor for BatchSpanProcessor {
    fn on_end(&self, batch: Vec<SpanData>) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            let dropped = self
                .counters
                .dropped_after_shutdown
                .fetch_add(batch.len(), Ordering::Relaxed);
            if dropped == 0 {
                apm_warn!(name: "BatchSpanProcessor.SpanEndedAfterShutdown");
            }
            return;
        }

        for span in batch {
            if self.buffer.push(span).is_some() && self.buffer.dropped_count() == 1 {
                apm_warn!(
                    name: "BatchSpanProcessor.SpanDroppingStarted",
                    capacity = self.buffer.capacity()
                );
            }
        }
        if self.counters.worker_stopped.load(Ordering::SeqCst) {
            self.counters.discard_stranded(&self.buffer);
            return;
        }

        if self.buffer.len() >= self.max_export_batch_size
            && !self.export_pending.swap(true, Ordering::AcqRel)
        {
            match self.message_sender.try_send(BatchMessage::ExportBatch) {
                Ok(()) => {}
                // The worker is busy with control messages; the scheduled
                // export picks the spans up.
                Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                    self.export_pending.store(false, Ordering::Release);
                }
            }
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(TraceError::AlreadyShutdown);
        }
        let (sender, receiver) = sync_channel(1);
        self.message_sender
            .send(BatchMessage::ForceFlush(sender))
            .map_err(|_| TraceError::Other("export worker is not running".into()))?;

        receiver
            .recv_timeout(self.forceflush_timeout)
            .map_err(|_| TraceError::ExportTimedOut(self.forceflush_timeout))?
    }

    fn shutdown(&self) -> TraceResult<()> {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(TraceError::AlreadyShutdown);
        }
        let (sender, receiver) = sync_channel(1);
        self.message_sender
            .send(BatchMessage::Shutdown(sender))
            .map_err(|_| TraceError::Other("export worker is not running".into()))?;

        // The worker bounds its own final flush by the same deadline; the
        // extra margin covers the exporter's shutdown.
        let result = receiver
            .recv_timeout(self.shutdown_timeout + Duration::from_millis(500))
            .map_err(|_| TraceError::ExportTimedOut(self.shutdown_timeout))?;

        let handle = match self.handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        apm_info!(
            name: "BatchSpanProcessor.Shutdown",
            exported = self.exported_span_count(),
            failed = self.failed_span_count(),
            dropped = self.dropped_span_count()
        );
        result
    }
}

type Attempt = (BoxFuture<'static, ExportResult>, oneshot::Sender<ExportResult>);

/// Polls export attempts on a thread of their own, one at a time.
struct AttemptRunner {
    sender: Option<mpsc::Sender<Attempt>>,
}

impl AttemptRunner {
    fn start() -> Self {
        let (sender, receiver) = mpsc::channel::<Attempt>();
        let spawned = thread::Builder::new()
            .name("BatchSpanProcessorExportThread".to_string())
            .spawn(move || {
                for (attempt, reply) in receiver {
                    // The worker may have stopped waiting already.
                    let _ = reply.send(block_on(attempt));
                }
            });
        match spawned {
            Ok(_) => AttemptRunner {
                sender: Some(sender),
            },
            Err(err) => {
                apm_warn!(
                    name: "BatchSpanProcessor.ExportThreadSpawnFailed",
                    error = format!("{}", err)
                );
                AttemptRunner { sender: None }
            }
        }
    }

    /// Hands `attempt` to the export thread. Without one, the attempt is
    /// returned as is and runs on the worker.
    fn run(&self, attempt: BoxFuture<'static, ExportResult>) -> BoxFuture<'static, ExportResult> {
        let Some(sender) = &self.sender else {
            return attempt;
        };
        let (reply, result) = oneshot::channel();
        match sender.send((attempt, reply)) {
            Ok(()) => Box::pin(async move {
                result
                    .await
                    .unwrap_or_else(|_| Err(TraceError::from("export thread stopped")))
            }),
            Err(mpsc::SendError((attempt, _))) => attempt,
        }
    }
}

/// State owned by the export thread.
struct ExportWorker<E> {
    exporter: E,
    attempts: AttemptRunner,
    buffer: Arc<RingBuffer<SpanData>>,
    export_pending: Arc<AtomicBool>,
    counters: Arc<ExportCounters>,
    max_export_batch_size: usize,
    max_export_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl<E: SpanExporter> ExportWorker<E> {
    /// Exports batches until the buffer is empty. With a deadline, whatever
    /// is still buffered once it passes is discarded.
    ///
    /// Returns the error of the last batch that failed, if any.
    fn export_buffered(&mut self, deadline: Option<Instant>) -> ExportResult {
        let mut result = Ok(());
        loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                let discarded = self.buffer.drain_batch(usize::MAX).len();
                if discarded > 0 {
                    self.counters
                        .dropped_after_shutdown
                        .fetch_add(discarded, Ordering::Relaxed);
                    apm_warn!(
                        name: "BatchSpanProcessor.DeadlineExceeded",
                        discarded = discarded
                    );
                }
                return result;
            }

            let batch = self.buffer.drain_batch(self.max_export_batch_size);
            if batch.is_empty() {
                return result;
            }
            if let Err(err) = self.export_with_retry(batch, deadline) {
                result = Err(err);
            }
        }
    }

    fn export_with_retry(&mut self, batch: Vec<SpanData>, deadline: Option<Instant>) -> ExportResult {
        let count = batch.len();
        let attempt_timeout = self.max_export_timeout;
        let exporter = &mut self.exporter;
        let attempts = &self.attempts;

        let export = retry_with_exponential_backoff(self.retry_policy, "export", || {
            let attempt = attempts.run(exporter.export(batch.clone()));
            async move {
                match select(attempt, Delay::new(attempt_timeout)).await {
                    Either::Left((result, _)) => result,
                    Either::Right(_) => Err(TraceError::ExportTimedOut(attempt_timeout)),
                }
            }
        });

        let result = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match block_on(select(Box::pin(export), Delay::new(remaining))) {
                    Either::Left((result, _)) => result,
                    Either::Right(_) => Err(TraceError::ExportTimedOut(remaining)),
                }
            }
            None => block_on(export),
        };

        match &result {
            Ok(()) => {
                self.counters.exported.fetch_add(count, Ordering::Relaxed);
                apm_debug!(name: "BatchSpanProcessor.ExportSucceeded", count = count);
            }
            Err(err) => {
                self.counters.failed.fetch_add(count, Ordering::Relaxed);
                apm_error!(
                    name: "BatchSpanProcessor.ExportFailed",
                    count = count,
                    error = format!("{}", err)
                );
            }
        }
        result
    }
}

/// A builder for creating [`BatchSpanProcessor`] instances.
#[derive(Debug)]
pub struct BatchSpanProcessorBuilder<E>
where
    E: SpanExporter + Send + 'static,
{
    exporter: E,
    config: BatchConfig,
}

impl<E> BatchSpanProcessorBuilder<E>
where
    E: SpanExporter + Send + 'static,
{
    /// Set the BatchConfig for [`BatchSpanProcessorBuilder`]
    pub fn with_batch_config(self, config: BatchConfig) -> Self {
        BatchSpanProcessorBuilder { config, ..self }
    }

    /// Build a batch processor
    pub fn build(self) -> BatchSpanProcessor {
        BatchSpanProcessor::new(self.exporter, self.config)
    }
}

/// Batch span processor configuration.
/// Use [`BatchConfigBuilder`] to configure your own instance of [`BatchConfig`].
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// The maximum queue size to buffer spans for delayed processing. If the
    /// queue gets full the oldest spans are evicted.
    pub(crate) max_queue_size: usize,

    /// The delay interval between two consecutive processing of batches.
    pub(crate) scheduled_delay: Duration,

    /// The maximum number of spans to process in a single batch. A full batch
    /// triggers an export before the scheduled delay elapses.
    pub(crate) max_export_batch_size: usize,

    /// The maximum duration of a single export attempt.
    pub(crate) max_export_timeout: Duration,

    /// How failed exports are retried.
    pub(crate) retry_policy: RetryPolicy,

    /// How long `force_flush` waits.
    pub(crate) forceflush_timeout: Duration,

    /// Hard deadline for the final flush on shutdown.
    pub(crate) shutdown_timeout: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfigBuilder::default().build()
    }
}

/// A builder for creating [`BatchConfig`] instances.
#[derive(Debug)]
pub struct BatchConfigBuilder {
    max_queue_size: usize,
    scheduled_delay: Duration,
    max_export_batch_size: usize,
    max_export_timeout: Duration,
    retry_policy: RetryPolicy,
    forceflush_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Default for BatchConfigBuilder {
    /// Create a new [`BatchConfigBuilder`] initialized with default batch
    /// config values. The values are overridden by environment variables if
    /// set:
    /// * `ELASTIC_APM_MAX_QUEUE_SIZE`
    /// * `ELASTIC_APM_FLUSH_INTERVAL` (ms)
    /// * `ELASTIC_APM_MAX_BATCH_SIZE`
    /// * `ELASTIC_APM_EXPORT_TIMEOUT` (ms)
    /// * `ELASTIC_APM_MAX_RETRIES`
    /// * `ELASTIC_APM_RETRY_INITIAL_DELAY` (ms)
    /// * `ELASTIC_APM_RETRY_MAX_DELAY` (ms)
    /// * `ELASTIC_APM_SHUTDOWN_TIMEOUT` (ms)
    fn default() -> Self {
        BatchConfigBuilder {
            max_queue_size: ELASTIC_APM_MAX_QUEUE_SIZE_DEFAULT,
            scheduled_delay: Duration::from_millis(ELASTIC_APM_FLUSH_INTERVAL_DEFAULT),
            max_export_batch_size: ELASTIC_APM_MAX_BATCH_SIZE_DEFAULT,
            max_export_timeout: Duration::from_millis(ELASTIC_APM_EXPORT_TIMEOUT_DEFAULT),
            retry_policy: RetryPolicy {
                max_retries: ELASTIC_APM_MAX_RETRIES_DEFAULT,
                initial_delay: Duration::from_millis(ELASTIC_APM_RETRY_INITIAL_DELAY_DEFAULT),
                max_delay: Duration::from_millis(ELASTIC_APM_RETRY_MAX_DELAY_DEFAULT),
                jitter: RETRY_JITTER_DEFAULT,
            },
            forceflush_timeout: FORCEFLUSH_TIMEOUT_DEFAULT,
            shutdown_timeout: Duration::from_millis(ELASTIC_APM_SHUTDOWN_TIMEOUT_DEFAULT),
        }
        .init_from_env_vars()
    }
}

impl BatchConfigBuilder {
    /// Set max_queue_size for [`BatchConfigBuilder`].
    /// It's the maximum number of spans buffered between transaction end and
    /// export. When the buffer is full the oldest span is evicted.
    /// The default value is 2048.
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    /// Set max_export_batch_size for [`BatchConfigBuilder`].
    /// It's the maximum number of spans to send in a single request. If there
    /// are more than one batch worth of spans buffered, batches are sent one
    /// after the other without delay. The default value is 512.
    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size;
        self
    }

    /// Set scheduled_delay for [`BatchConfigBuilder`].
    /// It's the interval between two consecutive exports.
    /// The default value is 5000 milliseconds.
    pub fn with_scheduled_delay(mut self, scheduled_delay: Duration) -> Self {
        self.scheduled_delay = scheduled_delay;
        self
    }

    /// Set max_export_timeout for [`BatchConfigBuilder`].
    /// It's the maximum duration of one export attempt.
    /// The default value is 30000 milliseconds.
    pub fn with_max_export_timeout(mut self, max_export_timeout: Duration) -> Self {
        self.max_export_timeout = max_export_timeout;
        self
    }

    /// Set the retry policy for failed exports.
    /// By default a batch is retried 3 times, 100 ms after the first failure
    /// and doubling up to 1600 ms.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Set how long [`SpanProcessor::force_flush`] waits for the export.
    /// The default value is 5 seconds.
    pub fn with_forceflush_timeout(mut self, forceflush_timeout: Duration) -> Self {
        self.forceflush_timeout = forceflush_timeout;
        self
    }

    /// Set the hard deadline of the final flush on shutdown. Spans not
    /// exported by then are discarded. The default value is 5 seconds.
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Builds a `BatchConfig` enforcing the following invariants:
    /// * `max_export_batch_size` must be less than or equal to `max_queue_size`.
    /// * both are at least 1.
    pub fn build(self) -> BatchConfig {
        let max_queue_size = self.max_queue_size.max(1);
        let max_export_batch_size = min(self.max_export_batch_size, max_queue_size).max(1);

        BatchConfig {
            max_queue_size,
            scheduled_delay: self.scheduled_delay,
            max_export_batch_size,
            max_export_timeout: self.max_export_timeout,
            retry_policy: self.retry_policy,
            forceflush_timeout: self.forceflush_timeout,
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(max_queue_size) = env_value::<usize>(ELASTIC_APM_MAX_QUEUE_SIZE) {
            self.max_queue_size = max_queue_size;
        }

        if let Some(scheduled_delay) = env_value::<u64>(ELASTIC_APM_FLUSH_INTERVAL) {
            self.scheduled_delay = Duration::from_millis(scheduled_delay);
        }

        if let Some(max_export_batch_size) = env_value::<usize>(ELASTIC_APM_MAX_BATCH_SIZE) {
            self.max_export_batch_size = max_export_batch_size;
        }

        // max export batch size must be less or equal to max queue size.
        if self.max_export_batch_size > self.max_queue_size {
            self.max_export_batch_size = self.max_queue_size;
        }

        if let Some(max_export_timeout) = env_value::<u64>(ELASTIC_APM_EXPORT_TIMEOUT) {
            self.max_export_timeout = Duration::from_millis(max_export_timeout);
        }

        if let Some(max_retries) = env_value::<usize>(ELASTIC_APM_MAX_RETRIES) {
            self.retry_policy.max_retries = max_retries;
        }

        if let Some(initial_delay) = env_value::<u64>(ELASTIC_APM_RETRY_INITIAL_DELAY) {
            self.retry_policy.initial_delay = Duration::from_millis(initial_delay);
        }

        if let Some(max_delay) = env_value::<u64>(ELASTIC_APM_RETRY_MAX_DELAY) {
            self.retry_policy.max_delay = Duration::from_millis(max_delay);
        }

        if let Some(shutdown_timeout) = env_value::<u64>(ELASTIC_APM_SHUTDOWN_TIMEOUT) {
            self.shutdown_timeout = Duration::from_millis(shutdown_timeout);
        }

        self
    }
}
