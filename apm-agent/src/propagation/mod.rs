//! # Propagation
//!
//! Trace identity crosses process boundaries in request headers. An
//! [`Injector`] writes header values into an outgoing carrier and an
//! [`Extractor`] reads them from an incoming one; the
//! [`TraceContextPropagator`] uses both to speak the W3C `traceparent`
//! format.
//!
//! `apm-agent-http` implements these traits for `http::HeaderMap`. Plain
//! `HashMap<String, String>` carriers work too and treat names
//! case-insensitively, like HTTP headers.
use std::collections::HashMap;
use std::hash::BuildHasher;

mod trace_context;
pub use trace_context::TraceContextPropagator;

/// Write access to the headers of an outgoing request.
pub trait Injector {
    /// Sets header `key` to `value`, replacing an earlier value.
    fn set(&mut self, key: &str, value: String);
}

/// Read access to the headers of an incoming request.
pub trait Extractor {
    /// The value of header `key`, if present.
    fn get(&self, key: &str) -> Option<&str>;
}

impl<S: BuildHasher> Injector for HashMap<String, String, S> {
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_ascii_lowercase(), value);
    }
}

impl<S: BuildHasher> Extractor for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<&str> {
        HashMap::get(self, &key.to_ascii_lowercase()).map(String::as_str)
    }
}
