use std::env;
use std::time::Duration;

/// Base URL of the collector; `/intake/v2/events` is appended.
pub(crate) const ENV_SERVER_URL: &str = "ELASTIC_APM_SERVER_URL";
pub(crate) const DEFAULT_SERVER_URL: &str = "http://localhost:8200";

pub(crate) const ENV_SERVICE_NAME: &str = "ELASTIC_APM_SERVICE_NAME";
pub(crate) const DEFAULT_SERVICE_NAME: &str = "unknown-service";

pub(crate) const ENV_SERVICE_VERSION: &str = "ELASTIC_APM_SERVICE_VERSION";
pub(crate) const ENV_ENVIRONMENT: &str = "ELASTIC_APM_ENVIRONMENT";
pub(crate) const ENV_SECRET_TOKEN: &str = "ELASTIC_APM_SECRET_TOKEN";

/// Request timeout of the bundled HTTP client, in milliseconds. Shared with
/// the batch processor's per-attempt timeout.
pub(crate) const ENV_EXPORT_TIMEOUT: &str = "ELASTIC_APM_EXPORT_TIMEOUT";
pub(crate) const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads a variable, treating unset and blank the same.
pub(crate) fn get(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

pub(crate) fn server_url() -> String {
    get(ENV_SERVER_URL).unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
}

pub(crate) fn service_name() -> String {
    get(ENV_SERVICE_NAME).unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string())
}

/// Unparsable values fall back to the default.
pub(crate) fn export_timeout() -> Duration {
    get(ENV_EXPORT_TIMEOUT)
        .and_then(|millis| millis.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_EXPORT_TIMEOUT)
}
