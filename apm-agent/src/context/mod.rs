//! Execution-scoped context propagation.
//!
//! A [`Context`] carries the span that is *current* for a logical flow of
//! execution. New spans started through the
//! [`Tracer`](crate::trace::Tracer) use it as their parent.
//!
//! On a thread, a context becomes current with [`Context::attach`] and stops
//! being current when the returned [`ContextGuard`] is dropped. Guards nest:
//! dropping one restores whatever was current before it was attached, also
//! while unwinding from a panic.
//!
//! Async tasks move between worker threads and interleave on them, so a
//! thread-local alone cannot follow them. Wrap the future with
//! [`FutureContextExt::with_context`] instead: the context is attached for the
//! duration of every poll and detached again afterwards, so it travels with the
//! task.
//!
//! ```
//! use apm_agent::Context;
//!
//! let cx = Context::new();
//! let _guard = cx.attach();
//! assert!(Context::current().span().is_none());
//! ```
use crate::apm_warn;
use crate::trace::Span;
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;


mod future_ext;
pub use future_ext::{FutureContextExt, WithContext};

thread_local! {
    static CURRENT_CONTEXT: RefCell<ContextStack> = RefCell::new(ContextStack::default());
}

/// An immutable, execution-scoped value holding the current span, if any.
///
/// Contexts are cheap to clone. "Changing" the span produces a new context;
/// the one that is current is never mutated.
#[derive(Clone, Default)]
pub struct Context {
    span: Option<Span>,
}

impl Context {
    /// Creates an empty `Context`.
    pub fn new() -> Self {
        Context::default()
    }

    /// Returns an immutable snapshot of the current thread's context.
    pub fn current() -> Self {
        Self::map_current(|cx| cx.clone())
    }

    /// Applies a function to the current context returning its value.
    ///
    /// This can be used to build a new context without cloning the current one.
    pub fn map_current<T>(f: impl FnOnce(&Context) -> T) -> T {
        CURRENT_CONTEXT.with(|cx| cx.borrow().map_current_cx(f))
    }

    /// Returns a copy of the current context with `span` as the current span.
    pub fn current_with_span(span: Span) -> Self {
        Self::map_current(|cx| cx.with_span(span))
    }

    /// Returns a copy of this context with `span` as the current span.
    pub fn with_span(&self, span: Span) -> Self {
        Context { span: Some(span) }
    }

    /// The span held by this context.
    pub fn span(&self) -> Option<&Span> {
        self.span.as_ref()
    }

    /// Returns `true` if this context holds a span that still records.
    pub fn has_active_span(&self) -> bool {
        self.span.as_ref().is_some_and(Span::is_recording)
    }

    /// Replaces the current context on this thread with this context.
    ///
    /// Dropping the returned [`ContextGuard`] will reset the current context to
    /// the previous value.
    ///
    /// ```
    /// use apm_agent::Context;
    /// use apm_agent::trace::Span;
    ///
    /// let span = Span::noop();
    /// {
    ///     let _guard = Context::current_with_span(span).attach();
    ///     assert!(Context::current().span().is_some());
    /// }
    /// assert!(Context::current().span().is_none());
    /// ```
    pub fn attach(self) -> ContextGuard {
        let cx_pos = CURRENT_CONTEXT.with(|cx| cx.borrow_mut().push(self));

        ContextGuard {
            cx_pos,
            _marker: PhantomData,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Context");
        match &self.span {
            Some(span) => dbg.field("span", span.span_context()),
            None => dbg.field("span", &"None"),
        };
        dbg.finish()
    }
}

/// A guard that resets the current context to the prior context when dropped.
#[derive(Debug)]
pub struct ContextGuard {
    // Position of the attached context in the stack.
    cx_pos: u16,
    // Thread locals make this type !Send.
    _marker: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let pos = self.cx_pos;
        if pos > ContextStack::BASE_POS && pos < ContextStack::MAX_POS {
            // `try_with`: the thread local may already be gone during thread exit.
            let _ = CURRENT_CONTEXT.try_with(|stack| stack.borrow_mut().pop_id(pos));
        }
    }
}

/// Per-thread stack of attached contexts.
///
/// Guards remember the position they pushed to. Dropping a guard that is not
/// on top only clears its slot; the slot is removed once everything above it
/// has been dropped too, so out-of-order drops never restore the wrong
/// context.
struct ContextStack {
    current_cx: Context,
    stack: Vec<Option<Context>>,
    _marker: PhantomData<*const ()>,
}

impl ContextStack {
    const BASE_POS: u16 = 0;
    const MAX_POS: u16 = u16::MAX;
    const INITIAL_CAPACITY: usize = 8;

    #[inline(always)]
    fn push(&mut self, cx: Context) -> u16 {
        // Position 0 is the base context, which lives in `current_cx` when
        // nothing is attached.
        let next_pos = self.stack.len() + 1;
        if next_pos < ContextStack::MAX_POS.into() {
            let current_cx = std::mem::replace(&mut self.current_cx, cx);
            self.stack.push(Some(current_cx));
            next_pos as u16
        } else {
            apm_warn!(
                name: "Context.AttachFailed",
                max_depth = ContextStack::MAX_POS
            );
            ContextStack::MAX_POS
        }
    }

    #[inline(always)]
    fn pop_id(&mut self, pos: u16) {
        let len = self.stack.len() as u16;
        if pos == len {
            // Top of the stack: also discard slots cleared by earlier
            // out-of-order drops.
            while let Some(None) = self.stack.last() {
                _ = self.stack.pop();
            }
            if let Some(Some(next_cx)) = self.stack.pop() {
                self.current_cx = next_cx;
            }
        } else if pos < len {
            _ = self.stack[pos as usize].take();
        } else {
            apm_warn!(
                name: "Context.PopOutOfBounds",
                position = pos,
                stack_length = len
            );
        }
    }

    #[inline(always)]
    fn map_current_cx<T>(&self, f: impl FnOnce(&Context) -> T) -> T {
        f(&self.current_cx)
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        ContextStack {
            current_cx: Context::default(),
            stack: Vec::with_capacity(ContextStack::INITIAL_CAPACITY),
            _marker: PhantomData,
        }
    }
}
