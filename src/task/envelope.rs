//! Task envelopes carried through a worker channel, and the handler that
//! executes them on the worker thread.
//!
//! A task is any `FnOnce() -> anyhow::Result<R>` closure. Its error, or a
//! panic, settles the future as failed and never reaches the worker loop.

use crate::core::error::TaskError;
use crate::core::types::CompletionStatus;
use crate::runtime::handler::EventHandler;
use crate::system::metrics::{MetricContext, MetricService};
use crate::task::future::{pending, Promise, TaskFuture};
use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Where a task runs, as seen by metrics
pub struct TaskScope<'a> {
    /// Owning service name
    pub service: &'a str,
    /// Worker (thread) name
    pub worker: &'a str,
    /// Metrics sink
    pub metrics: &'a dyn MetricService,
}

/// Type-erased envelope stored in a worker slot
pub trait Envelope: Send {
    /// Run the task unless it was cancelled, settle its future and report
    /// the outcome
    fn execute(self: Box<Self>, scope: &TaskScope<'_>) -> CompletionStatus;

    /// Cancel without running
    fn discard(self: Box<Self>, scope: &TaskScope<'_>);
}

/// A task paired with its promise, an optional name reported to metrics
/// and its creation time
pub struct TaskEnvelope<F, R> {
    name: Option<Cow<'static, str>>,
    task: F,
    promise: Promise<R>,
    created_at: Instant,
}

impl<F, R> TaskEnvelope<F, R>
where
    F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    R: Send + 'static,
{
    /// Wrap `task` and return the caller's future alongside
    pub fn new(task: F) -> (Self, TaskFuture<R>) {
        Self::with_name(None, task)
    }

    /// Like [`new`](Self::new), tagging the task with `name`
    pub fn named(name: impl Into<Cow<'static, str>>, task: F) -> (Self, TaskFuture<R>) {
        Self::with_name(Some(name.into()), task)
    }

    fn with_name(name: Option<Cow<'static, str>>, task: F) -> (Self, TaskFuture<R>) {
        let (promise, future) = pending();
        let envelope = Self {
            name,
            task,
            promise,
            created_at: Instant::now(),
        };
        (envelope, future)
    }

    /// Box into a slot value
    pub fn boxed(self) -> Box<dyn Envelope> {
        Box::new(self)
    }
}

impl<F, R> Envelope for TaskEnvelope<F, R>
where
    F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    R: Send + 'static,
{
    fn execute(self: Box<Self>, scope: &TaskScope<'_>) -> CompletionStatus {
        let TaskEnvelope { name, task, promise, created_at } = *self;
        let ctx = MetricContext {
            service: scope.service,
            worker: scope.worker,
            task: name.as_deref(),
        };
        scope.metrics.record_latency(&ctx, created_at.elapsed());
        let timer = scope.metrics.start_timer(&ctx);

        let status = if promise.start() {
            let result = match catch_unwind(AssertUnwindSafe(task)) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(TaskError::Failed(e)),
                Err(payload) => Err(TaskError::from_panic(payload)),
            };
            let status = match &result {
                Ok(_) => CompletionStatus::Success,
                Err(_) => CompletionStatus::Error,
            };
            promise.settle(result);
            status
        } else {
            CompletionStatus::Cancelled
        };

        scope.metrics.stop_timer(&ctx, timer);
        scope.metrics.increment_task_count(&ctx, status);
        status
    }

    fn discard(self: Box<Self>, scope: &TaskScope<'_>) {
        let TaskEnvelope { name, promise, .. } = *self;
        promise.cancel();
        let ctx = MetricContext {
            service: scope.service,
            worker: scope.worker,
            task: name.as_deref(),
        };
        scope.metrics.increment_task_count(&ctx, CompletionStatus::Cancelled);
    }
}

/// Worker slot for task mode; empty between tasks
pub type TaskSlot = Option<Box<dyn Envelope>>;

/// Store an envelope into a claimed slot
pub(crate) fn fill_slot(slot: &mut TaskSlot, envelope: Box<dyn Envelope>) {
    *slot = Some(envelope);
}

/// Executes task envelopes on a worker thread
#[derive(Clone)]
pub struct TaskHandler {
    service: Arc<str>,
    metrics: Arc<dyn MetricService>,
}

impl TaskHandler {
    /// Handler for tasks of `service`, reporting to `metrics`
    pub fn new(service: impl Into<Arc<str>>, metrics: Arc<dyn MetricService>) -> Self {
        Self { service: service.into(), metrics }
    }
}

impl EventHandler<TaskSlot> for TaskHandler {
    fn on_event(&mut self, worker: &str, slot: &mut TaskSlot, sequence: u64, _end_of_batch: bool) -> anyhow::Result<()> {
        if let Some(envelope) = slot.take() {
            let scope = TaskScope { service: &self.service, worker, metrics: self.metrics.as_ref() };
            let status = envelope.execute(&scope);
            tracing::trace!(worker, sequence, %status, "task finished");
        }
        Ok(())
    }

    fn on_error(&mut self, worker: &str, slot: &mut TaskSlot, sequence: u64, error: anyhow::Error) {
        // only metrics can fail here; the task body is isolated in execute
        slot.take();
        tracing::warn!(worker, sequence, error = %error, "task reporting failed");
    }

    fn on_discard(&mut self, worker: &str, slot: &mut TaskSlot, _sequence: u64) {
        if let Some(envelope) = slot.take() {
            let scope = TaskScope { service: &self.service, worker, metrics: self.metrics.as_ref() };
            envelope.discard(&scope);
        }
    }
}
