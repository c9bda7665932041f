//! Error types and handling for the keyed executor
//!
//! Submission and configuration failures are returned synchronously at the
//! call site. Failures of the task body itself never surface here; they are
//! delivered through the task's future as a [`TaskError`].

use thiserror::Error;

/// Main result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the keyed executor
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration, the service was never built
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Submission attempted after the service was shut down
    #[error("Worker service '{0}' is terminated")]
    Terminated(String),

    /// Submission reached a worker whose alive flag is already cleared
    #[error("Worker '{0}' is dead")]
    WorkerDead(String),

    /// Non-blocking submission against a full channel
    #[error("Insufficient capacity on worker '{worker}' (capacity: {capacity})")]
    InsufficientCapacity {
        /// Name of the worker whose channel is full
        worker: String,
        /// Capacity of that worker's channel
        capacity: usize,
    },

    /// Worker thread could not be spawned
    #[error("Failed to spawn worker thread '{name}': {source}")]
    Spawn {
        /// Thread name
        name: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// I/O errors from std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Prometheus metrics errors
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// A blocking helper task on the async runtime panicked or was cancelled
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// True for the synchronous capacity rejection of `try_*` submissions
    pub fn is_insufficient_capacity(&self) -> bool {
        matches!(self, Error::InsufficientCapacity { .. })
    }

    /// True when the submission was refused because of shutdown
    pub fn is_terminated(&self) -> bool {
        matches!(self, Error::Terminated(_) | Error::WorkerDead(_))
    }
}

/// Construction-time validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Service name is empty
    #[error("name must not be empty")]
    EmptyName,

    /// Worker count out of range
    #[error("worker_count must be in 1..={max} (got {got})")]
    WorkerCount {
        /// Configured value
        got: usize,
        /// Upper bound
        max: usize,
    },

    /// Replica count must be positive
    #[error("replica_count must be greater than 0")]
    ReplicaCount,

    /// Ring capacity must be a power of two
    #[error("buffer_size must be a power of two >= 2 (got {0})")]
    BufferSize(usize),

    /// Batch size limit out of range
    #[error("batch_size_limit must be in 1..={buffer_size} (got {got})")]
    BatchSizeLimit {
        /// Configured value
        got: usize,
        /// Ring capacity
        buffer_size: usize,
    },

    /// Config file could not be read
    #[error("failed to read config file: {0}")]
    Read(String),

    /// Config file or environment value could not be parsed
    #[error("failed to parse {field}: {message}")]
    Parse {
        /// Offending field or source
        field: String,
        /// Parser message
        message: String,
    },
}

/// Failure delivered through a task's future
#[derive(Error, Debug)]
pub enum TaskError {
    /// The task body returned an error
    #[error("task failed: {0}")]
    Failed(#[source] anyhow::Error),

    /// The task body panicked
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The future was cancelled before the worker reached it
    #[error("task cancelled")]
    Cancelled,
}

impl TaskError {
    /// True if the task never ran because it was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        TaskError::Panicked(panic_message(payload.as_ref()))
    }
}

/// Extract a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
