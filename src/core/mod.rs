//! Core system types and foundations
//!
//! Error handling, configuration and the small value types shared by the
//! routing layer and the workers.

pub mod types;
pub mod error;
pub mod config;

// Re-export commonly used items
pub use types::{CompletionStatus, KeyHash, RoutingKey, SelectorKind, ShutdownPolicy, WaitPolicy};
pub use error::{ConfigError, Error, Result, TaskError};
pub use config::{WorkerServiceConfig, WorkerServiceConfigBuilder};
