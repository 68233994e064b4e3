//! Helpers for working with the current span.
use crate::context::{Context, ContextGuard};
use crate::trace::Span;

/// Mark a given `Span` as active.
///
/// Spans started through the [`Tracer`](crate::trace::Tracer) while the
/// returned guard is alive become children of `span`. Dropping the guard
/// makes the previously active span active again; it does not end `span`.
///
/// ```
/// use apm_agent::trace::{mark_span_as_active, Span};
///
/// let span = Span::noop();
/// let _guard = mark_span_as_active(span);
/// ```
pub fn mark_span_as_active(span: Span) -> ContextGuard {
    Context::current_with_span(span).attach()
}

/// Runs `f` with `span` as the current span and restores the previous one
/// afterwards, including when `f` panics.
pub fn with_current<T, F>(span: Span, f: F) -> T
where
    F: FnOnce() -> T,
{
    let _guard = mark_span_as_active(span);
    f()
}

/// Executes a closure with a reference to this thread's current span.
///
/// If the current span already ended, the closure receives its nearest
/// ancestor still recording. Without any, it receives a no-op span, so callers
/// can record unconditionally.
///
/// ```
/// use apm_agent::trace::get_active_span;
/// use apm_agent::KeyValue;
///
/// get_active_span(|span| span.set_attribute(KeyValue::new("cache.hit", true)));
/// ```
pub fn get_active_span<F, T>(f: F) -> T
where
    F: FnOnce(&Span) -> T,
{
    let span = Context::map_current(|cx| cx.span().and_then(Span::nearest_recording));
    f(&span.unwrap_or_else(Span::noop))
}
