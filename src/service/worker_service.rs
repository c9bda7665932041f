//! Keyed task execution
//!
//! [`WorkerService`] is the task-mode façade over [`EventWorkerService`]:
//! every ring slot holds an optional boxed task envelope, and submitting a
//! closure returns a [`TaskFuture`] for its result. Tasks with equal keys
//! run one at a time, in submission order, on the same worker thread.
//!
//! ```no_run
//! use keyed_executor::{WorkerService, WorkerServiceConfig};
//!
//! # fn main() -> keyed_executor::Result<()> {
//! let service = WorkerService::new(WorkerServiceConfig::default())?;
//! let future = service.execute("account-42", || Ok(6 * 7))?;
//! assert_eq!(future.wait().ok(), Some(42));
//! service.shutdown();
//! # Ok(())
//! # }
//! ```

use crate::core::config::WorkerServiceConfig;
use crate::core::error::Result;
use crate::core::types::{KeyHash, RoutingKey};
use crate::routing::hash::{AHashCodeProvider, HashCodeProvider};
use crate::routing::selector::NodeSelector;
use crate::service::event_service::EventWorkerService;
use crate::service::state::ServiceState;
use crate::system::metrics::{MetricService, NoopMetricService};
use crate::task::envelope::{fill_slot, TaskEnvelope, TaskHandler, TaskSlot};
use crate::task::future::TaskFuture;
use std::borrow::Cow;
use std::sync::Arc;

/// Builder for a [`WorkerService`] with injected collaborators
pub struct WorkerServiceBuilder {
    config: WorkerServiceConfig,
    hasher: Arc<dyn HashCodeProvider>,
    metrics: Arc<dyn MetricService>,
}

impl WorkerServiceBuilder {
    /// Use `hasher` for routing keys (default: [`AHashCodeProvider`])
    pub fn hash_provider(mut self, hasher: Arc<dyn HashCodeProvider>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Report task outcomes to `metrics` (default: [`NoopMetricService`])
    pub fn metrics(mut self, metrics: Arc<dyn MetricService>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Validate the configuration and start every worker
    pub fn build(self) -> Result<WorkerService> {
        let handler = TaskHandler::new(self.config.name.as_str(), self.metrics);
        let events = EventWorkerService::with_hash_provider(self.config, self.hasher, || None, handler)?;
        Ok(WorkerService { events })
    }
}

/// Runs closures on a fixed pool of worker threads, routed by key
pub struct WorkerService {
    events: EventWorkerService<TaskSlot>,
}

/// Whether a submission may wait for ring capacity
#[derive(Clone, Copy)]
enum Submit {
    Blocking,
    NonBlocking,
}

impl WorkerService {
    /// Start a service with default collaborators
    pub fn new(config: WorkerServiceConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start configuring collaborators
    pub fn builder(config: WorkerServiceConfig) -> WorkerServiceBuilder {
        WorkerServiceBuilder {
            config,
            hasher: Arc::new(AHashCodeProvider::new()),
            metrics: Arc::new(NoopMetricService),
        }
    }

    fn submit<R, F>(&self, hash: KeyHash, name: Option<Cow<'static, str>>, task: F, mode: Submit) -> Result<TaskFuture<R>>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        // liveness first: a refused submission never creates a future
        let worker = self.events.route_hash(hash)?;
        let (envelope, future) = match name {
            Some(name) => TaskEnvelope::named(name, task),
            None => TaskEnvelope::new(task),
        };
        let published = match mode {
            Submit::Blocking => worker.publish_with(envelope.boxed(), fill_slot),
            Submit::NonBlocking => worker.try_publish_with(envelope.boxed(), fill_slot),
        };
        published.map_err(|e| self.events.submission_error(e))?;
        Ok(future)
    }

    fn key_hash(&self, key: RoutingKey<'_>) -> KeyHash {
        if self.events.selector().kind().is_keyed() {
            self.events.hash_key(key)
        } else {
            0
        }
    }

    /// Submit `task` for `key`, waiting while the target worker's ring is
    /// full. The returned future settles with the task's result.
    pub fn execute<'k, R, F>(&self, key: impl Into<RoutingKey<'k>>, task: F) -> Result<TaskFuture<R>>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.submit(self.key_hash(key.into()), None, task, Submit::Blocking)
    }

    /// Like [`execute`](Self::execute) but never waits: a full ring fails
    /// with [`Error::InsufficientCapacity`](crate::Error::InsufficientCapacity)
    /// and nothing is enqueued.
    pub fn try_execute<'k, R, F>(&self, key: impl Into<RoutingKey<'k>>, task: F) -> Result<TaskFuture<R>>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.submit(self.key_hash(key.into()), None, task, Submit::NonBlocking)
    }

    /// [`execute`](Self::execute) with a task name reported to metrics
    pub fn execute_named<'k, R, F>(
        &self,
        key: impl Into<RoutingKey<'k>>,
        name: impl Into<Cow<'static, str>>,
        task: F,
    ) -> Result<TaskFuture<R>>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.submit(self.key_hash(key.into()), Some(name.into()), task, Submit::Blocking)
    }

    /// [`try_execute`](Self::try_execute) with a task name reported to metrics
    pub fn try_execute_named<'k, R, F>(
        &self,
        key: impl Into<RoutingKey<'k>>,
        name: impl Into<Cow<'static, str>>,
        task: F,
    ) -> Result<TaskFuture<R>>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.submit(self.key_hash(key.into()), Some(name.into()), task, Submit::NonBlocking)
    }

    /// Submit with a precomputed key hash
    pub fn execute_hashed<R, F>(&self, hash: KeyHash, task: F) -> Result<TaskFuture<R>>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.submit(hash, None, task, Submit::Blocking)
    }

    /// Non-blocking submit with a precomputed key hash
    pub fn try_execute_hashed<R, F>(&self, hash: KeyHash, task: F) -> Result<TaskFuture<R>>
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.submit(hash, None, task, Submit::NonBlocking)
    }

    /// Fire-and-forget variant of [`execute`](Self::execute); the future
    /// only reports completion.
    pub fn run<'k, F>(&self, key: impl Into<RoutingKey<'k>>, task: F) -> Result<TaskFuture<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.execute(key, move || {
            task();
            Ok(())
        })
    }

    /// Fire-and-forget variant of [`try_execute`](Self::try_execute)
    pub fn try_run<'k, F>(&self, key: impl Into<RoutingKey<'k>>, task: F) -> Result<TaskFuture<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.try_execute(key, move || {
            task();
            Ok(())
        })
    }

    /// Stop accepting tasks and wait for the workers to exit. Idempotent;
    /// returns true for the call that shut the service down.
    pub fn shutdown(&self) -> bool {
        self.events.shutdown()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServiceState {
        self.events.state()
    }

    /// Whether tasks are accepted
    pub fn is_running(&self) -> bool {
        self.events.is_running()
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.events.worker_count()
    }

    /// Virtual nodes per worker (the configured replica count)
    pub fn worker_node_count(&self) -> usize {
        self.events.worker_node_count()
    }

    /// Virtual nodes across all workers
    pub fn virtual_node_count(&self) -> usize {
        self.events.virtual_node_count()
    }

    /// Configuration the service runs with
    pub fn config(&self) -> &WorkerServiceConfig {
        self.events.config()
    }

    /// Node selector in use
    pub fn selector(&self) -> &NodeSelector {
        self.events.selector()
    }

    /// Worker thread names, by worker index
    pub fn worker_names(&self) -> impl Iterator<Item = &str> {
        self.events.worker_names()
    }

    /// Name of the worker thread `key` routes to
    pub fn worker_for<'k>(&self, key: impl Into<RoutingKey<'k>>) -> &str {
        self.events.worker_for(key)
    }

    /// Tasks queued across all workers and not yet finished
    pub fn queued(&self) -> usize {
        self.events.queued()
    }
}
