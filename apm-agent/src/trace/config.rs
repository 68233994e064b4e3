//! Tracer configuration
//!
//! Defaults can be overridden from the environment; values are read once when
//! the configuration is created and never change afterwards.
use crate::apm_warn;
use crate::trace::{IdGenerator, RandomIdGenerator};
use std::env;
use std::str::FromStr;
use std::sync::Arc;

pub(crate) const ELASTIC_APM_TRANSACTION_MAX_SPANS: &str = "ELASTIC_APM_TRANSACTION_MAX_SPANS";
pub(crate) const ELASTIC_APM_TRANSACTION_MAX_SPANS_DEFAULT: u32 = 500;
pub(crate) const ELASTIC_APM_ERROR_MESSAGE_MAX_LENGTH: &str = "ELASTIC_APM_ERROR_MESSAGE_MAX_LENGTH";
pub(crate) const ELASTIC_APM_ERROR_MESSAGE_MAX_LENGTH_DEFAULT: usize = 1024;

/// Limits applied while spans record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct SpanLimits {
    /// Child spans a single transaction records; further children are no-op
    /// spans counted as dropped.
    pub max_spans_per_transaction: u32,
    /// Bytes of an error message kept by `capture_error`.
    pub max_error_message_length: usize,
}

impl Default for SpanLimits {
    fn default() -> Self {
        SpanLimits {
            max_spans_per_transaction: ELASTIC_APM_TRANSACTION_MAX_SPANS_DEFAULT,
            max_error_message_length: ELASTIC_APM_ERROR_MESSAGE_MAX_LENGTH_DEFAULT,
        }
    }
}

/// Tracer configuration
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Config {
    /// The id generator the tracer uses for new spans and traces.
    pub id_generator: Arc<dyn IdGenerator>,
    /// span limits
    pub span_limits: SpanLimits,
}

impl Config {
    /// Replace the id generator.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.id_generator = Arc::new(id_generator);
        self
    }

    /// Replace the span limits.
    pub fn with_span_limits(mut self, span_limits: SpanLimits) -> Self {
        self.span_limits = span_limits;
        self
    }

    /// Set the maximum number of child spans recorded per transaction.
    pub fn with_max_spans_per_transaction(mut self, max_spans: u32) -> Self {
        self.span_limits.max_spans_per_transaction = max_spans;
        self
    }

    /// Set the maximum length, in bytes, of captured error messages.
    pub fn with_max_error_message_length(mut self, max_length: usize) -> Self {
        self.span_limits.max_error_message_length = max_length;
        self
    }
}

impl Default for Config {
    /// Create the default configuration, overridden by
    /// `ELASTIC_APM_TRANSACTION_MAX_SPANS` and
    /// `ELASTIC_APM_ERROR_MESSAGE_MAX_LENGTH` when set.
    fn default() -> Self {
        let mut config = Config {
            id_generator: Arc::new(RandomIdGenerator::default()),
            span_limits: SpanLimits::default(),
        };

        if let Some(max_spans) = env_value::<u32>(ELASTIC_APM_TRANSACTION_MAX_SPANS) {
            config.span_limits.max_spans_per_transaction = max_spans;
        }

        if let Some(max_length) = env_value::<usize>(ELASTIC_APM_ERROR_MESSAGE_MAX_LENGTH) {
            config.span_limits.max_error_message_length = max_length;
        }

        config
    }
}

/// Reads and parses an environment variable, warning about values that do
/// not parse.
pub(crate) fn env_value<T: FromStr>(name: &'static str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match T::from_str(raw.trim()) {
        Ok(value) => Some(value),
        Err(_) => {
            apm_warn!(
                name: "Config.InvalidEnvironmentValue",
                variable = name,
                value = raw
            );
            None
        }
    }
}
