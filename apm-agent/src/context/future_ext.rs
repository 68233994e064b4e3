use crate::Context;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::Context as TaskContext;
use std::task::Poll;

pin_project! {
    /// A future that has an associated context.
    ///
    /// The context is attached while the inner future is polled and detached
    /// when `poll` returns, so whichever thread resumes the task sees the same
    /// current span, and other tasks interleaved on that thread never do.
    #[derive(Clone, Debug)]
    pub struct WithContext<T> {
        #[pin]
        inner: T,
        apm_cx: Context,
    }
}

impl<T: Future> Future for WithContext<T> {
    type Output = T::Output;

    fn poll(self: Pin<&mut Self>, task_cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _guard = this.apm_cx.clone().attach();

        this.inner.poll(task_cx)
    }
}

impl<F: Future> FutureContextExt for F {}

/// Extension trait allowing futures to carry a [`Context`].
pub trait FutureContextExt: Sized {
    /// Attaches the provided [`Context`] to this future, returning a
    /// `WithContext` wrapper.
    ///
    /// ```
    /// use apm_agent::context::FutureContextExt;
    /// use apm_agent::trace::Span;
    /// use apm_agent::Context;
    ///
    /// # futures_executor::block_on(async {
    /// let cx = Context::new().with_span(Span::noop());
    /// let has_span = async { Context::current().span().is_some() }
    ///     .with_context(cx)
    ///     .await;
    /// assert!(has_span);
    /// # });
    /// ```
    fn with_context(self, apm_cx: Context) -> WithContext<Self> {
        WithContext {
            inner: self,
            apm_cx,
        }
    }

    /// Attaches the current [`Context`] to this future, returning a
    /// `WithContext` wrapper.
    ///
    /// Use this before handing a future to a spawner so the task keeps the
    /// span that was current where it was created.
    fn with_current_context(self) -> WithContext<Self> {
        let apm_cx = Context::current();
        self.with_context(apm_cx)
    }
}
