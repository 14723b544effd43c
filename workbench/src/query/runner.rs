use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::future::{AbortHandle, Abortable, Aborted};
use pin_project_lite::pin_project;
use tracing::debug;

use crate::util::lock;

use super::QueryError;

#[derive(Default)]
struct SignalState {
    cancelled: AtomicBool,
    finished: AtomicBool,
}

/// Cooperative cancellation flag handed to a running computation.
#[derive(Clone, Default)]
pub struct CancellationSignal {
    state: Arc<SignalState>,
}

impl CancellationSignal {
    /// Returns `true` once the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }
}

impl fmt::Debug for CancellationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSignal")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

pin_project! {
    /// Future returned by [`CancelableQueryRunner::run()`].
    pub struct RunFuture<Fut> {
        #[pin]
        inner: Abortable<Fut>,
        signal: CancellationSignal,
    }
}

impl<Fut, T> Future for RunFuture<Fut>
where
    Fut: Future<Output = Result<T, QueryError>>,
{
    type Output = Result<T, QueryError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let output = match this.inner.poll(cx) {
            Poll::Ready(output) => output,
            Poll::Pending => return Poll::Pending,
        };
        this.signal.state.finished.store(true, Ordering::Release);

        Poll::Ready(output.unwrap_or_else(|Aborted| Err(QueryError::Cancelled)))
    }
}

impl<Fut> fmt::Debug for RunFuture<Fut> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunFuture")
            .field("signal", &self.signal)
            .finish_non_exhaustive()
    }
}

/// Runner of computations of which only the latest one matters.
///
/// Starting a run cancels the previous one: its future resolves to
/// [`QueryError::Cancelled`] and its [`CancellationSignal`] is raised so the
/// computation can stop early.
#[derive(Default)]
pub struct CancelableQueryRunner {
    current: Mutex<Option<(AbortHandle, CancellationSignal)>>,
}

impl CancelableQueryRunner {
    /// Creates an idle runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs a computation, cancelling the previous one.
    ///
    /// The computation only makes progress while the returned future is
    /// polled.
    pub fn run<F, Fut, T>(&self, f: F) -> RunFuture<Fut>
    where
        F: FnOnce(CancellationSignal) -> Fut,
        Fut: Future<Output = Result<T, QueryError>>,
    {
        self.cancel();

        let signal = CancellationSignal::default();
        let (handle, registration) = AbortHandle::new_pair();
        *lock(&self.current) = Some((handle, signal.clone()));

        RunFuture {
            inner: Abortable::new(f(signal.clone()), registration),
            signal,
        }
    }

    /// Cancels the current run, if any.
    ///
    /// Returns `true` if a run was cancelled. Calling this method more than
    /// once is a no-op.
    pub fn cancel(&self) -> bool {
        let Some((handle, signal)) = lock(&self.current).take() else {
            return false;
        };
        if signal.state.finished.load(Ordering::Acquire) {
            return false;
        }
        handle.abort();
        signal.cancel();
        debug!("query run cancelled");

        true
    }

    /// Returns `true` if a run was started and has neither completed nor been
    /// cancelled.
    pub fn is_running(&self) -> bool {
        lock(&self.current)
            .as_ref()
            .is_some_and(|(_, signal)| !signal.state.finished.load(Ordering::Acquire))
    }
}

impl fmt::Debug for CancelableQueryRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelableQueryRunner")
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use futures_channel::oneshot;
    use futures_executor::block_on;

    use super::*;

    #[test]
    fn new_run_cancels_previous_one() {
        let runner = CancelableQueryRunner::new();
        let (tx, rx) = oneshot::channel::<u32>();

        let mut first_signal = None;
        let first = runner.run(|signal| {
            first_signal = Some(signal);
            async move { rx.await.map_err(|_| QueryError::Cancelled) }
        });
        assert!(runner.is_running());

        let second = runner.run(|_| async { Ok(7u32) });
        tx.send(1).unwrap();

        assert!(first_signal.unwrap().is_cancelled());
        assert!(block_on(first).unwrap_err().is_cancelled());
        assert_eq!(block_on(second).unwrap(), 7);
        assert!(!runner.is_running());
    }

    #[test]
    fn cancel_is_idempotent() {
        let runner = CancelableQueryRunner::new();
        assert!(!runner.cancel());

        let run = runner.run(|_| futures_util::future::pending::<Result<(), QueryError>>());
        assert!(runner.cancel());
        assert!(!runner.cancel());
        assert!(block_on(run).unwrap_err().is_cancelled());
    }

    #[test]
    fn completed_run_is_not_cancelled() {
        let runner = CancelableQueryRunner::new();
        let mut signal = None;
        let run = runner.run(|s| {
            signal = Some(s);
            async { Ok("done") }
        });

        assert_eq!(block_on(run).unwrap(), "done");
        assert!(!runner.cancel());
        assert!(!signal.unwrap().is_cancelled());
    }
}
