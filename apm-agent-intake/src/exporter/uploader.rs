//! # Intake uploader
use crate::exporter::Error;
use apm_agent::apm_debug;
use apm_agent::trace::ExportResult;
use apm_agent_http::{Bytes, HttpClient};
use http::header::{AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderValue, Method, Request, Uri};
use serde::Deserialize;
use std::sync::Arc;

const INTAKE_PATH: &str = "/intake/v2/events";
const NDJSON: &str = "application/x-ndjson";

/// Posts encoded event bodies to the intake endpoint. Cheap to clone, so
/// every export future owns one.
#[derive(Clone, Debug)]
pub(crate) struct Uploader {
    client: Arc<dyn HttpClient>,
    intake_url: Uri,
    authorization: Option<HeaderValue>,
}

impl Uploader {
    pub(crate) fn new(
        client: Arc<dyn HttpClient>,
        server_url: &str,
        secret_token: Option<&str>,
    ) -> Result<Self, Error> {
        let intake_url = format!("{}{}", server_url.trim_end_matches('/'), INTAKE_PATH).parse()?;
        let authorization = match secret_token {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };
        Ok(Uploader {
            client,
            intake_url,
            authorization,
        })
    }

    pub(crate) fn intake_url(&self) -> &Uri {
        &self.intake_url
    }

    pub(crate) async fn upload(&self, body: Vec<u8>) -> ExportResult {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri(self.intake_url.clone())
            .header(CONTENT_TYPE, NDJSON);
        if let Some(authorization) = &self.authorization {
            request = request.header(AUTHORIZATION, authorization.clone());
        }
        let request = request
            .body(Bytes::from(body))
            .map_err::<Error, _>(Into::into)?;

        let response = self
            .client
            .send_bytes(request)
            .await
            .map_err(Error::Http)?;
        let status = response.status();
        apm_debug!(name: "IntakeExporter.Response", status = status.as_u16());
        if status.is_success() {
            return Ok(());
        }
        Err(rejection(status.as_u16(), response.body()).into())
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    accepted: u64,
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Deserialize)]
struct ErrorItem {
    message: String,
}

/// Reads the `{"accepted": N, "errors": [{"message": ...}]}` body of a
/// rejected request. Bodies that are not in that shape are kept verbatim.
fn rejection(status: u16, body: &[u8]) -> Error {
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(parsed) => Error::Rejected {
            status,
            accepted: parsed.accepted,
            messages: parsed.errors.into_iter().map(|e| e.message).collect(),
        },
        Err(_) => {
            let text = String::from_utf8_lossy(body).trim().to_string();
            Error::Rejected {
                status,
                accepted: 0,
                messages: if text.is_empty() { Vec::new() } else { vec![text] },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::tests::{MockClient, Reply};
    use apm_agent::trace::TraceError;
    use futures_executor::block_on;

    fn uploader(client: &MockClient, token: Option<&str>) -> Uploader {
        Uploader::new(Arc::new(client.clone()), "http://collector:8200/", token).unwrap()
    }

    #[test]
    fn posts_ndjson_to_intake_path() {
        let client = MockClient::new(vec![Reply::Status(202, "")]);
        let uploader = uploader(&client, None);
        block_on(uploader.upload(b"{\"metadata\":{}}\n".to_vec())).unwrap();

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(request.uri, "http://collector:8200/intake/v2/events");
        assert_eq!(request.headers[CONTENT_TYPE], NDJSON);
        assert!(request.headers.get(AUTHORIZATION).is_none());
        assert_eq!(request.body.as_ref(), b"{\"metadata\":{}}\n");
    }

    #[test]
    fn sends_bearer_token() {
        let client = MockClient::new(vec![Reply::Status(202, "")]);
        block_on(uploader(&client, Some("s3cr3t")).upload(Vec::new())).unwrap();

        let requests = client.requests();
        let authorization = &requests[0].headers[AUTHORIZATION];
        assert_eq!(authorization, "Bearer s3cr3t");
        assert!(authorization.is_sensitive());
    }

    #[test]
    fn parses_validation_errors() {
        let client = MockClient::new(vec![Reply::Status(
            400,
            r#"{"accepted": 1, "errors": [{"message": "missing trace_id"}, {"message": "bad duration"}]}"#,
        )]);
        let result = block_on(uploader(&client, None).upload(Vec::new()));

        match result {
            Err(TraceError::ExportFailed(err)) => {
                let err = err.to_string();
                assert!(err.contains("status 400"), "{err}");
                assert!(err.contains("missing trace_id; bad duration"), "{err}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(
            rejection(400, br#"{"accepted": 1, "errors": [{"message": "missing trace_id"}]}"#)
                .to_string(),
            "intake rejected events with status 400 (1 accepted): missing trace_id"
        );
    }

    #[test]
    fn keeps_unstructured_error_body() {
        match rejection(503, b" upstream unavailable \n") {
            Error::Rejected {
                status,
                accepted,
                messages,
            } => {
                assert_eq!(status, 503);
                assert_eq!(accepted, 0);
                assert_eq!(messages, vec!["upstream unavailable".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        match rejection(500, b"") {
            Error::Rejected { messages, .. } => assert!(messages.is_empty()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn transport_failure_is_http_error() {
        let client = MockClient::new(vec![Reply::Unreachable]);
        let result = block_on(uploader(&client, None).upload(Vec::new()));
        match result {
            Err(TraceError::ExportFailed(err)) => {
                assert!(err.to_string().contains("connection refused"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn invalid_server_url() {
        let client = MockClient::new(Vec::new());
        let result = Uploader::new(Arc::new(client), "not a url", None);
        assert!(matches!(result, Err(Error::InvalidUri(_))));
    }

    #[test]
    fn invalid_token() {
        let client = MockClient::new(Vec::new());
        let result = Uploader::new(Arc::new(client), "http://collector:8200", Some("bad\ntoken"));
        assert!(matches!(result, Err(Error::InvalidHeader(_))));
    }
}
