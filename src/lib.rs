//! Keyed Executor - keyed task execution on a fixed pool of worker threads
//!
//! Every submission carries a routing key. Equal keys always resolve to the
//! same worker while the pool is running, so work for one key runs one item
//! at a time, in submission order, without locks in user code. Distinct keys
//! spread over the pool and run in parallel.
//!
//! Each worker owns a pre-allocated bounded ring and one dedicated thread.
//! Keys are hashed by a [`HashCodeProvider`](routing::HashCodeProvider) and
//! mapped to a worker through virtual nodes by a
//! [`NodeSelector`](routing::NodeSelector).
#![warn(missing_docs)]

// Core foundational modules
pub mod constants;
pub mod core;
pub mod structures;

// Execution and routing
pub mod routing;
pub mod runtime;
pub mod task;

// Public façades and monitoring
pub mod service;
pub mod system;

// Re-export commonly used items for convenience
pub use crate::core::{
    CompletionStatus, ConfigError, Error, KeyHash, Result, RoutingKey, SelectorKind, ShutdownPolicy,
    TaskError, WaitPolicy, WorkerServiceConfig,
};
pub use routing::{AHashCodeProvider, Blake3HashCodeProvider, HashCodeProvider};
pub use runtime::EventHandler;
pub use service::{EventWorkerService, ServiceState, WorkerService, WorkerServiceBuilder};
pub use system::{MetricConfig, MetricService, NoopMetricService, PrometheusMetricService};
pub use task::TaskFuture;

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Initialize tracing and the metrics registry.
///
/// Safe to call more than once; only the first call installs the global
/// subscriber.
pub fn init() -> Result<()> {
    // Initialize tracing
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    tracing::info!("Initializing {} v{}", NAME, VERSION);

    // Initialize metrics registry
    system::metrics::init_registry();

    Ok(())
}
