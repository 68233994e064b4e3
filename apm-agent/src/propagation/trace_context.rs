//! # W3C Trace Context Propagator
//!
//! Reads and writes the `traceparent` header:
//! `{version}-{trace-id}-{parent-id}-{trace-flags}`, all lowercase hex, for
//! example `00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01`.
use crate::context::Context;
use crate::propagation::{Extractor, Injector};
use crate::trace::{Span, SpanContext, SpanId, TraceId};

const SUPPORTED_VERSION: u8 = 0;
const MAX_VERSION: u8 = 254;
const TRACEPARENT_HEADER: &str = "traceparent";
// Every recorded span is exported, so outgoing requests always carry the
// sampled flag.
const SAMPLED_FLAG: u8 = 0x01;

/// Propagates span identity in [W3C Trace Context] format.
///
/// [W3C Trace Context]: https://www.w3.org/TR/trace-context/
#[derive(Clone, Debug, Default)]
pub struct TraceContextPropagator {
    _private: (),
}

impl TraceContextPropagator {
    /// Create a new `TraceContextPropagator`.
    pub fn new() -> Self {
        TraceContextPropagator { _private: () }
    }

    /// Writes the `traceparent` header for `span_context`. Invalid contexts
    /// (no-op spans) write nothing.
    pub fn inject(&self, span_context: &SpanContext, injector: &mut dyn Injector) {
        if span_context.is_valid() {
            let header_value = format!(
                "{:02x}-{}-{}-{:02x}",
                SUPPORTED_VERSION,
                span_context.trace_id(),
                span_context.span_id(),
                SAMPLED_FLAG
            );
            injector.set(TRACEPARENT_HEADER, header_value);
        }
    }

    /// Injects the span of `cx`, or its nearest ancestor still recording if
    /// that span already ended.
    pub fn inject_context(&self, cx: &Context, injector: &mut dyn Injector) {
        if let Some(span) = cx.span().and_then(Span::nearest_recording) {
            self.inject(span.span_context(), injector);
        }
    }

    /// Injects the current span, so an outgoing request continues the trace.
    ///
    /// ```
    /// use apm_agent::propagation::TraceContextPropagator;
    /// use std::collections::HashMap;
    ///
    /// let mut headers = HashMap::new();
    /// TraceContextPropagator::new().inject_current(&mut headers);
    /// // Nothing is current, so nothing was written.
    /// assert!(headers.is_empty());
    /// ```
    pub fn inject_current(&self, injector: &mut dyn Injector) {
        Context::map_current(|cx| self.inject_context(cx, injector))
    }

    /// Reads a remote parent from the `traceparent` header.
    ///
    /// Returns `None` when the header is absent or malformed; a malformed
    /// header never aborts the request, the caller just starts a new trace.
    pub fn extract(&self, extractor: &dyn Extractor) -> Option<SpanContext> {
        let header_value = extractor.get(TRACEPARENT_HEADER)?.trim();
        let parts = header_value.split_terminator('-').collect::<Vec<&str>>();
        // Ensure parts are not out of range.
        if parts.len() < 4 {
            return None;
        }

        // Ensure version is within range, for version 0 there must be 4 parts.
        if parts[0].len() != 2 || !is_lower_hex(parts[0]) {
            return None;
        }
        let version = u8::from_str_radix(parts[0], 16).ok()?;
        if version > MAX_VERSION || version == 0 && parts.len() != 4 {
            return None;
        }

        if parts[1].len() != 32 || !is_lower_hex(parts[1]) {
            return None;
        }
        let trace_id = TraceId::from_hex(parts[1]).ok()?;

        if parts[2].len() != 16 || !is_lower_hex(parts[2]) {
            return None;
        }
        let span_id = SpanId::from_hex(parts[2]).ok()?;

        if parts[3].len() != 2 || !is_lower_hex(parts[3]) {
            return None;
        }
        let flags = u8::from_str_radix(parts[3], 16).ok()?;
        // Ensure flags are valid for version 0
        if version == 0 && flags > 2 {
            return None;
        }

        let span_context = SpanContext::new(trace_id, span_id, true);
        span_context.is_valid().then_some(span_context)
    }
}

fn is_lower_hex(value: &str) -> bool {
    value
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn extractor(traceparent: &str) -> HashMap<String, String> {
        let mut carrier = HashMap::new();
        carrier.insert(TRACEPARENT_HEADER.to_string(), traceparent.to_string());
        carrier
    }

    const TRACE_ID: TraceId = TraceId::from_u128(0x4bf9_2f35_77b3_4da6_a3ce_929d_0e0e_4736);
    const SPAN_ID: SpanId = SpanId::from_u64(0x00f0_67aa_0ba9_02b7);

    #[rstest]
    #[case("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00")]
    #[case("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")]
    #[case("02-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-09")]
    #[case("02-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-09-XYZxsf09")]
    #[case("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-")]
    #[case("  00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01  ")]
    fn extract_valid(#[case] traceparent: &str) {
        let propagator = TraceContextPropagator::new();
        assert_eq!(
            propagator.extract(&extractor(traceparent)),
            Some(SpanContext::new(TRACE_ID, SPAN_ID, true))
        );
    }

    #[rstest]
    #[case("0000-00000000000000000000000000000000-0000000000000000-01", "wrong version length")]
    #[case("00-ab00000000000000000000000000000000-cd00000000000000-01", "wrong trace ID length")]
    #[case("00-ab000000000000000000000000000000-cd0000000000000000-01", "wrong span ID length")]
    #[case("00-ab000000000000000000000000000000-cd00000000000000-0100", "wrong trace flag length")]
    #[case("00-ab00000000000000000000000000000-cd00000000000000-01", "short trace ID")]
    #[case("qw-00000000000000000000000000000000-0000000000000000-01", "bogus version")]
    #[case("00-qw000000000000000000000000000000-cd00000000000000-01", "bogus trace ID")]
    #[case("00-ab000000000000000000000000000000-qw00000000000000-01", "bogus span ID")]
    #[case("00-ab000000000000000000000000000000-cd00000000000000-qw", "bogus trace flag")]
    #[case("A0-00000000000000000000000000000000-0000000000000000-01", "upper case version")]
    #[case("00-AB000000000000000000000000000000-cd00000000000000-01", "upper case trace ID")]
    #[case("00-ab000000000000000000000000000000-CD00000000000000-01", "upper case span ID")]
    #[case("00-ab000000000000000000000000000000-cd00000000000000-A1", "upper case trace flag")]
    #[case("00-00000000000000000000000000000000-0000000000000000-01", "zero trace ID and span ID")]
    #[case("00-ab000000000000000000000000000000-cd00000000000000-09", "trace-flag unused bits set")]
    #[case("ff-ab000000000000000000000000000000-cd00000000000000-01", "forbidden version")]
    #[case("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7", "missing options")]
    #[case("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-", "empty options")]
    #[case("", "empty header")]
    fn extract_invalid(#[case] traceparent: &str, #[case] reason: &str) {
        let propagator = TraceContextPropagator::new();
        assert_eq!(propagator.extract(&extractor(traceparent)), None, "{}", reason);
    }

    #[test]
    fn extract_without_header() {
        let propagator = TraceContextPropagator::new();
        let carrier: HashMap<String, String> = HashMap::new();
        assert_eq!(propagator.extract(&carrier), None);
    }

    #[test]
    fn inject_valid_context() {
        let propagator = TraceContextPropagator::new();
        let mut carrier = HashMap::new();
        propagator.inject(&SpanContext::new(TRACE_ID, SPAN_ID, false), &mut carrier);

        assert_eq!(
            Extractor::get(&carrier, TRACEPARENT_HEADER),
            Some("00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01")
        );
    }

    #[test]
    fn inject_skips_invalid_context() {
        let propagator = TraceContextPropagator::new();
        let mut carrier = HashMap::new();
        propagator.inject(&SpanContext::NONE, &mut carrier);
        assert!(carrier.is_empty());
    }

    #[test]
    fn injected_header_extracts_to_same_ids() {
        let propagator = TraceContextPropagator::new();
        let mut carrier = HashMap::new();
        propagator.inject(&SpanContext::new(TRACE_ID, SPAN_ID, false), &mut carrier);

        let extracted = propagator.extract(&carrier).unwrap();
        assert_eq!(extracted.trace_id(), TRACE_ID);
        assert_eq!(extracted.span_id(), SPAN_ID);
        assert!(extracted.is_remote());
    }
}
