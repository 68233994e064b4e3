//! One transaction with an outgoing HTTP call, a simulated database query and
//! a CPU-bound step, shipped to the collector configured through the
//! `ELASTIC_APM_*` environment variables.
use apm_agent::context::FutureContextExt;
use apm_agent::propagation::TraceContextPropagator;
use apm_agent::trace::{BatchSpanProcessor, SpanKind, Tracer};
use apm_agent::{Context, KeyValue};
use apm_agent_http::HeaderInjector;
use apm_agent_intake::IntakeExporter;
use std::error::Error;
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn Error + Send + Sync + 'static>;

const TODO_URL: &str = "https://jsonplaceholder.typicode.com/todos/1";

fn init_tracer() -> Result<Tracer, BoxError> {
    let exporter = IntakeExporter::builder().build()?;
    Ok(Tracer::builder()
        .with_span_processor(BatchSpanProcessor::builder(exporter).build())
        .build())
}

async fn simulate_http_call(tracer: &Tracer, client: &reqwest::Client) -> Result<(), BoxError> {
    let span = tracer.start_span("HTTP Call", SpanKind::External);
    let cx = Context::current_with_span(span.clone());

    let mut headers = http::HeaderMap::new();
    TraceContextPropagator::new().inject_context(&cx, &mut HeaderInjector(&mut headers));
    let result = client
        .get(TODO_URL)
        .headers(headers)
        .send()
        .with_context(cx)
        .await;

    match &result {
        Ok(response) => span.set_attribute(KeyValue::new(
            "http.status_code",
            i64::from(response.status().as_u16()),
        )),
        Err(err) => span.capture_error(err),
    }
    span.end();
    result?;
    Ok(())
}

async fn simulate_database_query(tracer: &Tracer) {
    let span = tracer.start_span("DB Query", SpanKind::Db);
    tokio::time::sleep(Duration::from_millis(500))
        .with_context(Context::current_with_span(span.clone()))
        .await;
    span.end();
}

fn simulate_processing(tracer: &Tracer) {
    tracer.in_span("Processing Data", SpanKind::Custom, |_span| {
        thread::sleep(Duration::from_secs(1));
    });
}

fn run(tracer: &Tracer, runtime: &tokio::runtime::Runtime) -> Result<(), BoxError> {
    let client = reqwest::Client::new();
    runtime.block_on(
        async {
            simulate_http_call(tracer, &client).await?;
            simulate_database_query(tracer).await;
            Ok::<_, BoxError>(())
        }
        .with_current_context(),
    )?;
    simulate_processing(tracer);
    Ok(())
}

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    println!("Starting APM demo...");

    // The blocking client of the exporter must not be created inside the
    // async runtime.
    let tracer = init_tracer()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let (transaction, guard) =
        tracer.start_active_transaction("SampleTransaction", SpanKind::Request);
    let result = run(&tracer, &runtime);
    drop(guard);
    if let Err(err) = &result {
        transaction.capture_error(&**err);
    }
    transaction.end();

    drop(runtime);
    tracer.shutdown()?;
    println!("APM demo completed. Check the APM UI for traces.");
    Ok(())
}
