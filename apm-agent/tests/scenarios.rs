//! End-to-end behavior through the public API: tracer, context, batch
//! processor and a scripted exporter standing in for the collector.
use apm_agent::context::FutureContextExt;
use apm_agent::retry::RetryPolicy;
use apm_agent::trace::{
    mark_span_as_active, BatchConfigBuilder, BatchSpanProcessor, ExportError, ExportResult,
    SpanData, SpanExporter, SpanKind, TraceError, Tracer,
};
use apm_agent::Context;
use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
#[error("collector answered {0}")]
struct StatusError(u16);

impl ExportError for StatusError {
    fn exporter_name(&self) -> &'static str {
        "scripted"
    }
}

/// Answers each export call with the next scripted status; once the script
/// runs out every call gets the last status again.
#[derive(Clone, Debug)]
struct ScriptedExporter {
    statuses: Arc<Vec<u16>>,
    calls: Arc<AtomicUsize>,
    delivered: Arc<Mutex<Vec<SpanData>>>,
}

impl ScriptedExporter {
    fn new(statuses: &[u16]) -> Self {
        ScriptedExporter {
            statuses: Arc::new(statuses.to_vec()),
            calls: Arc::new(AtomicUsize::new(0)),
            delivered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn delivered(&self) -> Vec<SpanData> {
        self.delivered.lock().unwrap().clone()
    }
}

impl SpanExporter for ScriptedExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .statuses
            .get(call)
            .or(self.statuses.last())
            .copied()
            .unwrap_or(202);
        let result = if (200..300).contains(&status) {
            self.delivered.lock().unwrap().extend(batch);
            Ok(())
        } else {
            Err(TraceError::from(StatusError(status)))
        };
        Box::pin(std::future::ready(result))
    }
}

fn setup(exporter: &ScriptedExporter, max_retries: usize) -> (Tracer, Arc<BatchSpanProcessor>) {
    let processor = Arc::new(
        BatchSpanProcessor::builder(exporter.clone())
            .with_batch_config(
                BatchConfigBuilder::default()
                    .with_scheduled_delay(Duration::from_secs(3600))
                    .with_retry_policy(RetryPolicy {
                        max_retries,
                        initial_delay: Duration::from_millis(1),
                        max_delay: Duration::from_millis(8),
                        jitter: Duration::from_millis(1),
                    })
                    .build(),
            )
            .build(),
    );
    let tracer = Tracer::builder()
        .with_shared_span_processor(processor.clone())
        .build();
    (tracer, processor)
}

#[test]
fn transaction_with_one_child_exports_linked_records() {
    let exporter = ScriptedExporter::new(&[202]);
    let (tracer, _processor) = setup(&exporter, 3);

    let t1 = tracer.start_transaction("T1", SpanKind::Request);
    {
        let _guard = mark_span_as_active(t1.clone());
        let a = tracer.start_span("A", SpanKind::Custom);
        thread::sleep(Duration::from_millis(10));
        a.end();
        thread::sleep(Duration::from_millis(20));
    }
    t1.end();
    tracer.flush().unwrap();

    let records = exporter.delivered();
    assert_eq!(records.len(), 2);
    let (t1, a) = (&records[0], &records[1]);
    assert_eq!(t1.name, "T1");
    assert_eq!(a.name, "A");
    assert_eq!(t1.span_context.trace_id(), a.span_context.trace_id());
    assert_eq!(a.parent_span_id, Some(t1.span_context.span_id()));
    assert_eq!(a.transaction_id, t1.span_context.span_id());

    let t1_ms = t1.duration().as_millis();
    let a_ms = a.duration().as_millis();
    assert!((30..200).contains(&t1_ms), "T1 took {t1_ms}ms");
    assert!((10..150).contains(&a_ms), "A took {a_ms}ms");
    assert!(t1.end_time >= a.end_time);
}

#[test]
fn batch_is_delivered_when_success_comes_within_retry_budget() {
    let exporter = ScriptedExporter::new(&[500, 500, 500, 202]);
    let (tracer, processor) = setup(&exporter, 3);

    tracer.in_transaction("retry", SpanKind::Request, |_| {
        tracer.in_span("child", SpanKind::Db, |_| {});
    });
    assert!(tracer.flush().is_ok());

    assert_eq!(exporter.calls(), 4);
    assert_eq!(exporter.delivered().len(), 2);
    assert_eq!(processor.exported_span_count(), 2);
    assert_eq!(processor.failed_span_count(), 0);
    assert_eq!(processor.dropped_span_count(), 0);
}

#[test]
fn batch_is_dropped_after_retry_budget() {
    let exporter = ScriptedExporter::new(&[503]);
    let (tracer, processor) = setup(&exporter, 3);

    tracer.in_transaction("doomed", SpanKind::Request, |_| {
        tracer.in_span("one", SpanKind::Custom, |_| {});
        tracer.in_span("two", SpanKind::Custom, |_| {});
    });
    let result = tracer.flush();

    assert!(matches!(result, Err(TraceError::ExportFailed(_))));
    assert_eq!(exporter.calls(), 4);
    assert_eq!(processor.failed_span_count(), 3);
    assert!(exporter.delivered().is_empty());

    // Nothing is left to retry.
    assert!(tracer.flush().is_ok());
    assert_eq!(exporter.calls(), 4);
}

#[test]
fn open_children_are_truncated_with_the_transaction() {
    let exporter = ScriptedExporter::new(&[202]);
    let (tracer, _processor) = setup(&exporter, 0);

    let tx = tracer.start_transaction("tx", SpanKind::Request);
    let forgotten = {
        let _guard = mark_span_as_active(tx.clone());
        tracer.start_span("forgotten", SpanKind::External)
    };
    let tx_end = tx.end();
    tracer.flush().unwrap();

    let records = exporter.delivered();
    assert_eq!(records.len(), 2);
    assert!(!records[0].truncated);
    assert!(records[1].truncated);
    assert_eq!(records[1].end_time, tx_end);
    assert!(!forgotten.is_recording());
}

#[test]
fn ending_twice_keeps_first_timestamp_and_exports_once() {
    let exporter = ScriptedExporter::new(&[202]);
    let (tracer, _processor) = setup(&exporter, 0);

    let tx = tracer.start_transaction("tx", SpanKind::Request);
    let first = tx.end();
    thread::sleep(Duration::from_millis(5));
    assert_eq!(tx.end(), first);
    tracer.flush().unwrap();

    assert_eq!(exporter.delivered().len(), 1);
}

#[test]
fn instrumentation_without_transaction_is_harmless() {
    let exporter = ScriptedExporter::new(&[202]);
    let (tracer, _processor) = setup(&exporter, 0);

    let span = tracer.start_span("orphan", SpanKind::Custom);
    span.capture_error(&std::io::Error::new(std::io::ErrorKind::Other, "ignored"));
    span.end();
    tracer.capture_exception(&std::io::Error::new(std::io::ErrorKind::Other, "ignored"));
    assert!(tracer.current().is_none());

    tracer.flush().unwrap();
    assert_eq!(exporter.calls(), 0);
}

#[test]
fn concurrent_threads_build_separate_trees() {
    let exporter = ScriptedExporter::new(&[202]);
    let (tracer, _processor) = setup(&exporter, 0);

    let handles: Vec<_> = (0..8)
        .map(|flow| {
            let tracer = tracer.clone();
            thread::spawn(move || {
                tracer.in_transaction(format!("flow-{flow}"), SpanKind::Request, |root| {
                    for depth in 0..5 {
                        tracer.in_span(format!("level-{depth}"), SpanKind::Custom, |_| {
                            thread::yield_now();
                        });
                        let current = tracer.current().unwrap();
                        assert_eq!(current.span_context(), root.span_context());
                    }
                });
                assert!(tracer.current().is_none());
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    tracer.flush().unwrap();

    let records = exporter.delivered();
    assert_eq!(records.len(), 8 * 6);
    for tx in records.iter().filter(|r| r.is_transaction()) {
        let children: Vec<_> = records
            .iter()
            .filter(|r| r.transaction_id == tx.span_context.span_id() && !r.is_transaction())
            .collect();
        assert_eq!(children.len(), 5);
        assert!(children
            .iter()
            .all(|c| c.span_context.trace_id() == tx.span_context.trace_id()
                && c.parent_span_id == Some(tx.span_context.span_id())));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tasks_keep_their_own_current_span() {
    let exporter = ScriptedExporter::new(&[202]);
    let (tracer, _processor) = setup(&exporter, 0);

    let tasks: Vec<_> = (0..32)
        .map(|flow| {
            let tracer = tracer.clone();
            let root = tracer.start_transaction(format!("task-{flow}"), SpanKind::Request);
            let cx = Context::new().with_span(root.clone());
            tokio::spawn(
                async move {
                    for depth in 0..3 {
                        let span = tracer.start_span(format!("step-{depth}"), SpanKind::Custom);
                        async {
                            tokio::time::sleep(Duration::from_millis(1)).await;
                            tokio::task::yield_now().await;
                        }
                        .with_context(Context::current_with_span(span.clone()))
                        .await;
                        span.end();
                        let current = tracer.current().unwrap();
                        assert_eq!(current.span_context(), root.span_context());
                    }
                    root.end();
                }
                .with_context(cx),
            )
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    tracer.flush().unwrap();
    let records = exporter.delivered();
    assert_eq!(records.len(), 32 * 4);
    assert!(records.iter().all(|r| !r.truncated));
}

#[test]
fn shutdown_flushes_and_later_transactions_are_noop() {
    let exporter = ScriptedExporter::new(&[202]);
    let (tracer, processor) = setup(&exporter, 0);

    tracer.in_transaction("last", SpanKind::Request, |_| {});
    tracer.shutdown().unwrap();
    assert_eq!(exporter.delivered().len(), 1);

    let late = tracer.start_transaction("late", SpanKind::Request);
    assert!(!late.is_recording());
    assert!(matches!(tracer.shutdown(), Err(TraceError::AlreadyShutdown)));
    assert_eq!(processor.dropped_span_count(), 0);
}

#[test]
fn ending_innermost_span_makes_its_parent_current_again() {
    let exporter = ScriptedExporter::new(&[202]);
    let (tracer, _processor) = setup(&exporter, 0);

    let (tx, _tx_guard) = tracer.start_active_transaction("T1", SpanKind::Request);
    let a = tracer.start_span("A", SpanKind::Custom);
    let _a_guard = mark_span_as_active(a.clone());
    a.end();

    // A's guard is still alive, yet new work lands on the transaction.
    let b = tracer.start_span("B", SpanKind::Custom);
    assert!(b.is_recording());
    b.end();
    tx.end();
    tracer.flush().unwrap();

    let records = exporter.delivered();
    let names: Vec<_> = records.iter().map(|r| r.name.as_ref()).collect();
    assert_eq!(names, ["T1", "A", "B"]);
    assert_eq!(records[2].parent_span_id, Some(records[0].span_context.span_id()));
}

/// Holds the polling thread inside its future for a fixed time.
#[derive(Debug)]
struct StallingExporter(Duration);

impl SpanExporter for StallingExporter {
    fn export(&mut self, _batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let stall = self.0;
        Box::pin(async move {
            thread::sleep(stall);
            Ok(())
        })
    }
}

#[test]
fn flush_is_bounded_by_export_timeout_when_exporter_blocks() {
    let processor = BatchSpanProcessor::builder(StallingExporter(Duration::from_millis(500)))
        .with_batch_config(
            BatchConfigBuilder::default()
                .with_scheduled_delay(Duration::from_secs(3600))
                .with_max_export_timeout(Duration::from_millis(20))
                .with_retry_policy(RetryPolicy::no_retry())
                .build(),
        )
        .build();
    let processor = Arc::new(processor);
    let tracer = Tracer::builder()
        .with_shared_span_processor(processor.clone())
        .build();

    tracer.in_transaction("slow", SpanKind::Request, |_| {});
    let start = Instant::now();
    let result = tracer.flush();

    assert!(start.elapsed() < Duration::from_millis(400), "flush waited for the exporter");
    assert!(matches!(result, Err(TraceError::ExportTimedOut(_))));
    assert_eq!(processor.failed_span_count(), 1);
}
