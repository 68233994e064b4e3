mod env;
mod model;
mod uploader;

use apm_agent::apm_debug;
use apm_agent::trace::{ExportError, ExportResult, SpanData, SpanExporter, TraceError};
use apm_agent_http::{HttpClient, HttpError};
use futures_util::future::BoxFuture;
use model::Metadata;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uploader::Uploader;

/// Span exporter for the collector's intake API.
///
/// Each export is one `POST {server_url}/intake/v2/events` whose NDJSON body
/// starts with a metadata line describing the service, followed by one
/// `transaction` or `span` line per record.
#[derive(Debug)]
pub struct IntakeExporter {
    metadata_line: Vec<u8>,
    uploader: Uploader,
    is_shutdown: bool,
}

impl IntakeExporter {
    /// Create a builder with values taken from the environment.
    pub fn builder() -> IntakeExporterBuilder {
        IntakeExporterBuilder::default()
    }
}

impl SpanExporter for IntakeExporter {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        if self.is_shutdown {
            return Box::pin(std::future::ready(Err(TraceError::AlreadyShutdown)));
        }
        let body = model::encode_events(&self.metadata_line, batch);
        let uploader = self.uploader.clone();
        Box::pin(async move {
            let body = body.map_err(Error::from)?;
            uploader.upload(body).await
        })
    }

    fn shutdown(&mut self) {
        self.is_shutdown = true;
    }
}

/// Builder for [`IntakeExporter`].
///
/// Defaults come from `ELASTIC_APM_SERVER_URL` (`http://localhost:8200`),
/// `ELASTIC_APM_SERVICE_NAME` (`unknown-service`),
/// `ELASTIC_APM_SERVICE_VERSION`, `ELASTIC_APM_ENVIRONMENT`,
/// `ELASTIC_APM_SECRET_TOKEN` and `ELASTIC_APM_EXPORT_TIMEOUT` (30 s). The
/// `with_*` methods override them.
pub struct IntakeExporterBuilder {
    server_url: String,
    service_name: String,
    service_version: Option<String>,
    environment: Option<String>,
    secret_token: Option<String>,
    timeout: Duration,
    client: Option<Arc<dyn HttpClient>>,
}

impl Default for IntakeExporterBuilder {
    fn default() -> Self {
        IntakeExporterBuilder {
            server_url: env::server_url(),
            service_name: env::service_name(),
            service_version: env::get(env::ENV_SERVICE_VERSION),
            environment: env::get(env::ENV_ENVIRONMENT),
            secret_token: env::get(env::ENV_SECRET_TOKEN),
            timeout: env::export_timeout(),
            client: None,
        }
    }
}

impl fmt::Debug for IntakeExporterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntakeExporterBuilder")
            .field("server_url", &self.server_url)
            .field("service_name", &self.service_name)
            .field("service_version", &self.service_version)
            .field("environment", &self.environment)
            .field("secret_token", &self.secret_token.as_ref().map(|_| "****"))
            .field("timeout", &self.timeout)
            .field("client", &self.client)
            .finish()
    }
}

impl IntakeExporterBuilder {
    /// Base URL of the collector, without the intake path.
    pub fn with_server_url<T: Into<String>>(mut self, server_url: T) -> Self {
        self.server_url = server_url.into();
        self
    }

    /// Assign the service name under which transactions are grouped.
    pub fn with_service_name<T: Into<String>>(mut self, name: T) -> Self {
        self.service_name = name.into();
        self
    }

    /// Assign the version of the instrumented service.
    pub fn with_service_version<T: Into<String>>(mut self, version: T) -> Self {
        self.service_version = Some(version.into());
        self
    }

    /// Assign the deployment environment, e.g. `production`.
    pub fn with_environment<T: Into<String>>(mut self, environment: T) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Secret token sent as `Authorization: Bearer <token>`.
    pub fn with_secret_token<T: Into<String>>(mut self, token: T) -> Self {
        self.secret_token = Some(token.into());
        self
    }

    /// Request timeout of the bundled client. Ignored when a client is set
    /// through [`with_http_client`](Self::with_http_client).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Assign client implementation
    pub fn with_http_client<T: HttpClient + 'static>(mut self, client: T) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    /// Build the exporter.
    ///
    /// Without a client set through [`with_http_client`](Self::with_http_client)
    /// a `reqwest::blocking::Client` bounded by the configured timeout is
    /// used, which needs the `reqwest-blocking-client` feature.
    pub fn build(self) -> Result<IntakeExporter, Error> {
        let client = match self.client {
            Some(client) => client,
            None => default_client(self.timeout)?,
        };
        let uploader = Uploader::new(client, &self.server_url, self.secret_token.as_deref())?;
        let metadata_line =
            Metadata::new(self.service_name, self.service_version, self.environment).to_line()?;
        apm_debug!(
            name: "IntakeExporter.Built",
            intake_url = format!("{}", uploader.intake_url())
        );

        Ok(IntakeExporter {
            metadata_line,
            uploader,
            is_shutdown: false,
        })
    }
}

#[cfg(feature = "reqwest-blocking-client")]
fn default_client(timeout: Duration) -> Result<Arc<dyn HttpClient>, Error> {
    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| Error::Http(Box::new(err)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "reqwest-blocking-client"))]
fn default_client(_timeout: Duration) -> Result<Arc<dyn HttpClient>, Error> {
    Err(Error::NoHttpClient)
}

/// Wrap type for errors from the intake exporter
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No http client implementation found. User should provide one or enable features.
    #[error("http client must be set, users can enable the reqwest-blocking-client feature to use http client implementation within crate")]
    NoHttpClient,

    /// The request could not be built.
    #[error("http request failed with {0}")]
    RequestFailed(#[from] http::Error),

    /// The collector could not be reached or the connection broke.
    #[error("http request failed: {0}")]
    Http(#[source] HttpError),

    /// The collector answered with a non-success status.
    #[error("intake rejected events with status {status} ({accepted} accepted): {}", .messages.join("; "))]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Events the collector stored despite the failure
        accepted: u64,
        /// Error messages from the response body
        messages: Vec<String>,
    },

    /// The events could not be encoded.
    #[error("failed to encode events: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The server url is invalid
    #[error("invalid uri")]
    InvalidUri(#[from] http::uri::InvalidUri),

    /// The secret token can not be sent as a header.
    #[error("invalid secret token: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
}

impl ExportError for Error {
    fn exporter_name(&self) -> &'static str {
        "intake"
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use apm_agent::trace::{SpanContext, SpanId, SpanKind, TraceId};
    use apm_agent_http::{Bytes, Request, Response};
    use async_trait::async_trait;
    use futures_executor::block_on;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::SystemTime;

    #[derive(Clone, Debug)]
    pub(crate) enum Reply {
        Status(u16, &'static str),
        Unreachable,
    }

    #[derive(Clone, Debug)]
    pub(crate) struct Recorded {
        pub(crate) method: http::Method,
        pub(crate) uri: http::Uri,
        pub(crate) headers: http::HeaderMap,
        pub(crate) body: Bytes,
    }

    /// Answers with scripted replies, then with `202 Accepted`.
    #[derive(Clone, Debug, Default)]
    pub(crate) struct MockClient {
        replies: Arc<Mutex<VecDeque<Reply>>>,
        requests: Arc<Mutex<Vec<Recorded>>>,
    }

    impl MockClient {
        pub(crate) fn new(replies: Vec<Reply>) -> Self {
            MockClient {
                replies: Arc::new(Mutex::new(replies.into())),
                requests: Arc::default(),
            }
        }

        pub(crate) fn requests(&self) -> Vec<Recorded> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpClient for MockClient {
        async fn send_bytes(&self, request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
            let (parts, body) = request.into_parts();
            self.requests.lock().unwrap().push(Recorded {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body,
            });
            let reply = self.replies.lock().unwrap().pop_front();
            match reply.unwrap_or(Reply::Status(202, "")) {
                Reply::Status(status, body) => Ok(Response::builder()
                    .status(status)
                    .body(Bytes::from_static(body.as_bytes()))?),
                Reply::Unreachable => Err("connection refused".into()),
            }
        }
    }

    fn transaction() -> SpanData {
        let now = SystemTime::now();
        SpanData {
            span_context: SpanContext::new(TraceId::from_u128(7), SpanId::from_u64(7), false),
            parent_span_id: None,
            transaction_id: SpanId::from_u64(7),
            name: "GET /".into(),
            kind: SpanKind::Request,
            start_time: now,
            end_time: now,
            attributes: Vec::new(),
            status: Default::default(),
            truncated: false,
            span_count: Some(Default::default()),
        }
    }

    fn builder(client: &MockClient) -> IntakeExporterBuilder {
        IntakeExporterBuilder::default()
            .with_server_url("http://collector:8200")
            .with_http_client(client.clone())
    }

    #[test]
    fn exports_metadata_and_records() {
        let client = MockClient::new(Vec::new());
        let mut exporter = builder(&client)
            .with_service_name("checkout")
            .with_environment("test")
            .build()
            .unwrap();

        block_on(exporter.export(vec![transaction()])).unwrap();

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        let body = std::str::from_utf8(&requests[0].body).unwrap();
        let lines: Vec<serde_json::Value> = body
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["metadata"]["service"]["name"], "checkout");
        assert_eq!(lines[0]["metadata"]["service"]["environment"], "test");
        assert_eq!(lines[1]["transaction"]["name"], "GET /");
    }

    #[test]
    fn rejected_export_is_an_error() {
        let client = MockClient::new(vec![Reply::Status(500, "")]);
        let mut exporter = builder(&client).build().unwrap();

        let result = block_on(exporter.export(vec![transaction()]));
        assert!(matches!(result, Err(TraceError::ExportFailed(_))));
    }

    #[test]
    fn export_after_shutdown_fails() {
        let client = MockClient::new(Vec::new());
        let mut exporter = builder(&client).build().unwrap();
        exporter.shutdown();

        let result = block_on(exporter.export(vec![transaction()]));
        assert!(matches!(result, Err(TraceError::AlreadyShutdown)));
        assert!(client.requests().is_empty());
    }

    #[test]
    fn builder_reads_environment() {
        temp_env::with_vars(
            [
                (env::ENV_SERVER_URL, Some("http://apm.internal:8200")),
                (env::ENV_SERVICE_NAME, Some("billing")),
                (env::ENV_SERVICE_VERSION, Some("2.0.1")),
                (env::ENV_ENVIRONMENT, Some("production")),
                (env::ENV_SECRET_TOKEN, Some("token")),
                (env::ENV_EXPORT_TIMEOUT, Some("2500")),
            ],
            || {
                let builder = IntakeExporterBuilder::default();
                assert_eq!(builder.timeout, Duration::from_millis(2500));
                assert_eq!(builder.server_url, "http://apm.internal:8200");
                assert_eq!(builder.service_name, "billing");
                assert_eq!(builder.service_version.as_deref(), Some("2.0.1"));
                assert_eq!(builder.environment.as_deref(), Some("production"));
                assert_eq!(builder.secret_token.as_deref(), Some("token"));
                assert!(!format!("{builder:?}").contains("\"token\""));

                let client = MockClient::new(Vec::new());
                let mut exporter = builder.with_http_client(client.clone()).build().unwrap();
                block_on(exporter.export(vec![transaction()])).unwrap();
                let requests = client.requests();
                assert_eq!(requests[0].uri, "http://apm.internal:8200/intake/v2/events");
                assert_eq!(requests[0].headers["authorization"], "Bearer token");
            },
        );
    }

    #[test]
    fn builder_overrides_environment() {
        temp_env::with_vars(
            [
                (env::ENV_SERVICE_NAME, Some("from-env")),
                (env::ENV_SECRET_TOKEN, None),
            ],
            || {
                let builder = IntakeExporterBuilder::default().with_service_name("from-code");
                assert_eq!(builder.service_name, "from-code");
                assert_eq!(builder.secret_token, None);
            },
        );
    }

    #[cfg(feature = "reqwest-blocking-client")]
    #[test]
    fn bundled_client_gives_up_on_unresponsive_collector() {
        use std::io::Read;
        use std::net::TcpListener;
        use std::time::Instant;

        // Accepts the connection and reads the request, but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            std::thread::sleep(Duration::from_secs(2));
        });

        let mut exporter = IntakeExporterBuilder::default()
            .with_server_url(format!("http://{addr}"))
            .with_timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let start = Instant::now();
        let result = block_on(exporter.export(vec![transaction()]));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(result, Err(TraceError::ExportFailed(_))));
        drop(exporter);
        server.join().unwrap();
    }

    #[test]
    fn invalid_server_url_fails_to_build() {
        let client = MockClient::new(Vec::new());
        let result = builder(&client).with_server_url("http://bad host").build();
        assert!(matches!(result, Err(Error::InvalidUri(_))));
    }
}
