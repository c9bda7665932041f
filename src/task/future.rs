//! Single-assignment result handle shared between a caller and a worker
//!
//! [`Promise`] is the worker's half, [`TaskFuture`] the caller's. Exactly
//! one terminal state is ever recorded: the first of complete, fail or
//! cancel wins and later attempts are no-ops.

use crate::core::error::TaskError;
use crate::core::types::CompletionStatus;
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

enum Outcome<R> {
    Pending,
    /// Picked up by the worker; cancellation no longer applies
    Running,
    Ready(Result<R, TaskError>),
    /// Result already handed to the caller; keeps the terminal status
    Taken(CompletionStatus),
}

struct Inner<R> {
    outcome: Outcome<R>,
    waker: Option<Waker>,
}

struct Shared<R> {
    inner: Mutex<Inner<R>>,
    ready: Condvar,
}

fn status_of<R>(result: &Result<R, TaskError>) -> CompletionStatus {
    match result {
        Ok(_) => CompletionStatus::Success,
        Err(TaskError::Cancelled) => CompletionStatus::Cancelled,
        Err(_) => CompletionStatus::Error,
    }
}

impl<R> Shared<R> {
    /// Record `result` if nothing was recorded yet
    fn settle(&self, result: Result<R, TaskError>) -> bool {
        let waker = {
            let mut inner = self.inner.lock();
            if !matches!(inner.outcome, Outcome::Pending | Outcome::Running) {
                return false;
            }
            inner.outcome = Outcome::Ready(result);
            inner.waker.take()
        };
        self.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    fn status(&self) -> Option<CompletionStatus> {
        match &self.inner.lock().outcome {
            Outcome::Pending | Outcome::Running => None,
            Outcome::Ready(result) => Some(status_of(result)),
            Outcome::Taken(status) => Some(*status),
        }
    }
}

impl<R> Inner<R> {
    fn take_ready(&mut self) -> Option<Result<R, TaskError>> {
        match std::mem::replace(&mut self.outcome, Outcome::Pending) {
            Outcome::Ready(result) => {
                self.outcome = Outcome::Taken(status_of(&result));
                Some(result)
            }
            other => {
                self.outcome = other;
                None
            }
        }
    }
}

/// Create a linked promise/future pair
pub fn pending<R>() -> (Promise<R>, TaskFuture<R>) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner { outcome: Outcome::Pending, waker: None }),
        ready: Condvar::new(),
    });
    (Promise { shared: Arc::clone(&shared) }, TaskFuture { shared })
}

/// Worker-side half. Dropping an unsettled promise cancels the future, so a
/// caller can never be left waiting on work that will not run.
pub struct Promise<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Promise<R> {
    /// Mark the task as started. Returns false if the caller cancelled
    /// first; after a successful start, [`TaskFuture::cancel`] is a no-op.
    pub fn start(&self) -> bool {
        let mut inner = self.shared.inner.lock();
        match inner.outcome {
            Outcome::Pending => {
                inner.outcome = Outcome::Running;
                true
            }
            Outcome::Running => true,
            _ => false,
        }
    }

    /// Whether the future already holds a terminal state
    pub fn is_settled(&self) -> bool {
        self.shared.status().is_some()
    }

    /// Whether the future ended up cancelled
    pub fn is_cancelled(&self) -> bool {
        self.shared.status() == Some(CompletionStatus::Cancelled)
    }

    /// Settle with `result`. Returns false if the future was already settled.
    pub fn settle(self, result: Result<R, TaskError>) -> bool {
        self.shared.settle(result)
    }

    /// Settle successfully with `value`
    pub fn complete(self, value: R) -> bool {
        self.settle(Ok(value))
    }

    /// Settle with a task failure
    pub fn fail(self, error: TaskError) -> bool {
        self.settle(Err(error))
    }

    /// Settle as cancelled
    pub fn cancel(self) -> bool {
        self.settle(Err(TaskError::Cancelled))
    }
}

impl<R> Drop for Promise<R> {
    fn drop(&mut self) {
        self.shared.settle(Err(TaskError::Cancelled));
    }
}

/// Caller-side handle to the result of a submitted task.
///
/// Await it from async code or block on it with [`wait`](Self::wait).
pub struct TaskFuture<R> {
    shared: Arc<Shared<R>>,
}

impl<R> TaskFuture<R> {
    /// Cancel the task if the worker has not reached it yet.
    ///
    /// Returns true if this call decided the outcome. Once execution has
    /// started the cancel has no effect and the task's own result stands.
    pub fn cancel(&self) -> bool {
        let waker = {
            let mut inner = self.shared.inner.lock();
            if !matches!(inner.outcome, Outcome::Pending) {
                return false;
            }
            inner.outcome = Outcome::Ready(Err(TaskError::Cancelled));
            inner.waker.take()
        };
        self.shared.ready.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// Terminal status, or `None` while pending
    pub fn status(&self) -> Option<CompletionStatus> {
        self.shared.status()
    }

    /// Whether the task reached a terminal state
    pub fn is_done(&self) -> bool {
        self.status().is_some()
    }

    /// Whether the task ended cancelled
    pub fn is_cancelled(&self) -> bool {
        self.status() == Some(CompletionStatus::Cancelled)
    }

    /// Block the calling thread until the task settles
    pub fn wait(self) -> Result<R, TaskError> {
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(result) = inner.take_ready() {
                return result;
            }
            if let Outcome::Taken(_) = inner.outcome {
                return Err(TaskError::Cancelled);
            }
            self.shared.ready.wait(&mut inner);
        }
    }

    /// Block for at most `timeout`; hands the future back if it is still
    /// pending.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<R, TaskError>, Self> {
        let deadline = Instant::now() + timeout;
        {
            let mut inner = self.shared.inner.lock();
            loop {
                if let Some(result) = inner.take_ready() {
                    return Ok(result);
                }
                if self.shared.ready.wait_until(&mut inner, deadline).timed_out() {
                    if let Some(result) = inner.take_ready() {
                        return Ok(result);
                    }
                    break;
                }
            }
        }
        Err(self)
    }
}

impl<R> Future for TaskFuture<R> {
    type Output = Result<R, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.shared.inner.lock();
        if let Some(result) = inner.take_ready() {
            return Poll::Ready(result);
        }
        if let Outcome::Taken(_) = inner.outcome {
            panic!("TaskFuture polled after completion");
        }
        let stale = !matches!(&inner.waker, Some(w) if w.will_wake(cx.waker()));
        if stale {
            inner.waker = Some(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<R> std::fmt::Debug for TaskFuture<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFuture").field("status", &self.status()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_then_wait() {
        let (promise, future) = pending::<u32>();
        assert!(!future.is_done());
        assert!(promise.complete(7));
        assert_eq!(future.status(), Some(CompletionStatus::Success));
        assert_eq!(future.wait().unwrap(), 7);
    }

    #[test]
    fn first_outcome_wins() {
        let (promise, future) = pending::<u32>();
        assert!(future.cancel());
        assert!(!future.cancel());
        assert!(promise.is_cancelled());
        assert!(!promise.complete(1));
        assert!(future.is_cancelled());
        assert!(future.wait().unwrap_err().is_cancelled());
    }

    #[test]
    fn cancel_after_completion_is_noop() {
        let (promise, future) = pending::<&str>();
        promise.complete("done");
        assert!(!future.cancel());
        assert_eq!(future.wait().unwrap(), "done");
    }

    #[test]
    fn cancel_after_start_is_noop() {
        let (promise, future) = pending::<u32>();
        assert!(promise.start());
        assert!(!future.cancel());
        assert!(!future.is_done());
        promise.complete(5);
        assert_eq!(future.wait().unwrap(), 5);
    }

    #[test]
    fn start_after_cancel_fails() {
        let (promise, future) = pending::<u32>();
        future.cancel();
        assert!(!promise.start());
        assert!(promise.is_settled());
    }

    #[test]
    fn dropped_promise_cancels() {
        let (promise, future) = pending::<()>();
        drop(promise);
        assert_eq!(future.status(), Some(CompletionStatus::Cancelled));
    }

    #[test]
    fn failure_is_reported_as_error() {
        let (promise, future) = pending::<()>();
        promise.fail(TaskError::Failed(anyhow::anyhow!("nope")));
        assert_eq!(future.status(), Some(CompletionStatus::Error));
        assert!(matches!(future.wait(), Err(TaskError::Failed(e)) if e.to_string() == "nope"));
    }

    #[test]
    fn wait_timeout_returns_future_while_pending() {
        let (promise, future) = pending::<u8>();
        let future = future.wait_timeout(Duration::from_millis(10)).unwrap_err();
        let handle = std::thread::spawn(move || promise.complete(3));
        assert_eq!(future.wait_timeout(Duration::from_secs(5)).unwrap().unwrap(), 3);
        assert!(handle.join().unwrap());
    }

    #[tokio::test]
    async fn await_from_async_context() {
        let (promise, future) = pending::<String>();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(5));
            promise.complete("hi".to_string());
        });
        assert_eq!(future.await.unwrap(), "hi");
    }
}
