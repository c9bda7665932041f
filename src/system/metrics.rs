//! Task metrics for worker services
//!
//! Workers report every task outcome to a [`MetricService`]. The default
//! [`NoopMetricService`] records nothing; [`PrometheusMetricService`]
//! publishes counters and histograms into the crate's Prometheus registry.
//! Metrics are never on a required success path: a failing metrics sink
//! cannot fail a task.

use crate::core::error::Result;
use crate::core::types::CompletionStatus;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Global metrics registry
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Worker metric families, registered on first use
static WORKER_METRICS: OnceCell<WorkerMetrics> = OnceCell::new();

const LATENCY_BUCKETS: &[f64] = &[0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];
const EXECUTION_BUCKETS: &[f64] = &[0.000_01, 0.000_1, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

/// Identifies the task an outcome belongs to
#[derive(Debug, Clone, Copy)]
pub struct MetricContext<'a> {
    /// Owning service name
    pub service: &'a str,
    /// Worker (thread) name
    pub worker: &'a str,
    /// Task name, when the task was submitted with one
    pub task: Option<&'a str>,
}

/// Execution timer handed out by [`MetricService::start_timer`]
#[derive(Debug)]
pub struct TaskTimer {
    start: Option<Instant>,
}

impl TaskTimer {
    /// Timer that reads the clock now
    pub fn started() -> Self {
        Self { start: Some(Instant::now()) }
    }

    /// Timer that never reads the clock
    pub fn disabled() -> Self {
        Self { start: None }
    }

    /// Time since start, `None` for a disabled timer
    pub fn elapsed(&self) -> Option<Duration> {
        self.start.map(|s| s.elapsed())
    }
}

/// Metrics collaborator consumed by workers
pub trait MetricService: Send + Sync + 'static {
    /// Queue-to-execution delay of one task
    fn record_latency(&self, ctx: &MetricContext<'_>, latency: Duration);

    /// Start timing a task body
    fn start_timer(&self, ctx: &MetricContext<'_>) -> TaskTimer;

    /// Stop a timer returned by [`start_timer`](Self::start_timer)
    fn stop_timer(&self, ctx: &MetricContext<'_>, timer: TaskTimer);

    /// Count one finished task with its terminal status
    fn increment_task_count(&self, ctx: &MetricContext<'_>, status: CompletionStatus);
}

/// Records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricService;

impl MetricService for NoopMetricService {
    #[inline]
    fn record_latency(&self, _ctx: &MetricContext<'_>, _latency: Duration) {}

    #[inline]
    fn start_timer(&self, _ctx: &MetricContext<'_>) -> TaskTimer {
        TaskTimer::disabled()
    }

    #[inline]
    fn stop_timer(&self, _ctx: &MetricContext<'_>, _timer: TaskTimer) {}

    #[inline]
    fn increment_task_count(&self, _ctx: &MetricContext<'_>, _status: CompletionStatus) {}
}

/// Which labels are attached to worker metrics. A disabled label is
/// reported as an empty string, which keeps label cardinality bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Attach the service name
    pub worker_service_name_tag: bool,
    /// Attach the worker name
    pub worker_name_tag: bool,
    /// Attach the task name
    pub worker_task_name_tag: bool,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            worker_service_name_tag: true,
            worker_name_tag: true,
            worker_task_name_tag: true,
        }
    }
}

/// Prometheus metric families for worker tasks
struct WorkerMetrics {
    /// Finished tasks by status
    finished: IntCounterVec,
    /// Task body execution time
    execution_time: HistogramVec,
    /// Time between submission and execution start
    latency: HistogramVec,
}

impl WorkerMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let finished = IntCounterVec::new(
            Opts::new("worker_finished_tasks_count", "Total number of finished worker tasks"),
            &["worker_service_name", "worker_name", "worker_task_name", "status"],
        )?;
        let execution_time = HistogramVec::new(
            HistogramOpts::new("worker_task_execution_time_seconds", "Task body execution time in seconds")
                .buckets(EXECUTION_BUCKETS.to_vec()),
            &["worker_service_name", "worker_name", "worker_task_name"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new(
                "worker_execution_time_latency_seconds",
                "Delay between task submission and execution start in seconds",
            )
            .buckets(LATENCY_BUCKETS.to_vec()),
            &["worker_service_name", "worker_name", "worker_task_name"],
        )?;
        registry.register(Box::new(finished.clone()))?;
        registry.register(Box::new(execution_time.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        Ok(Self { finished, execution_time, latency })
    }

    fn global() -> Result<&'static WorkerMetrics> {
        WORKER_METRICS.get_or_try_init(|| Self::register(registry()))
    }
}

/// Publishes worker metrics into the crate registry
#[derive(Clone, Copy)]
pub struct PrometheusMetricService {
    metrics: &'static WorkerMetrics,
    config: MetricConfig,
}

impl PrometheusMetricService {
    /// Create a service reporting with `config`'s labels
    pub fn new(config: MetricConfig) -> Result<Self> {
        Ok(Self { metrics: WorkerMetrics::global()?, config })
    }

    fn labels<'a>(&self, ctx: &MetricContext<'a>) -> [&'a str; 3] {
        [
            if self.config.worker_service_name_tag { ctx.service } else { "" },
            if self.config.worker_name_tag { ctx.worker } else { "" },
            if self.config.worker_task_name_tag { ctx.task.unwrap_or("") } else { "" },
        ]
    }
}

impl std::fmt::Debug for PrometheusMetricService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetricService").field("config", &self.config).finish()
    }
}

impl MetricService for PrometheusMetricService {
    fn record_latency(&self, ctx: &MetricContext<'_>, latency: Duration) {
        self.metrics
            .latency
            .with_label_values(&self.labels(ctx))
            .observe(latency.as_secs_f64());
    }

    fn start_timer(&self, _ctx: &MetricContext<'_>) -> TaskTimer {
        TaskTimer::started()
    }

    fn stop_timer(&self, ctx: &MetricContext<'_>, timer: TaskTimer) {
        if let Some(elapsed) = timer.elapsed() {
            self.metrics
                .execution_time
                .with_label_values(&self.labels(ctx))
                .observe(elapsed.as_secs_f64());
        }
    }

    fn increment_task_count(&self, ctx: &MetricContext<'_>, status: CompletionStatus) {
        let [service, worker, task] = self.labels(ctx);
        self.metrics
            .finished
            .with_label_values(&[service, worker, task, status.as_str()])
            .inc();
    }
}

/// Register the worker metric families up front
pub fn init_registry() {
    if let Err(e) = WorkerMetrics::global() {
        tracing::warn!(error = %e, "failed to register worker metrics");
    }
}

/// Get the Prometheus registry for serving metrics to monitoring systems
pub fn registry() -> &'static Registry {
    &REGISTRY
}

/// Collect and return all metrics as a Prometheus-formatted string
pub fn collect_metrics() -> String {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = registry().gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
