//! Global constants used throughout the keyed executor
//!
//! This module contains compile-time defaults and limits that are shared
//! across configuration, workers and routing to avoid magic numbers.

/// Default virtual nodes (replicas) per worker
///
/// High enough that the hash ring spreads keys evenly across workers,
/// low enough that ring construction stays in the low milliseconds.
pub const DEFAULT_REPLICA_COUNT: usize = 400;

/// Default ring buffer capacity per worker (must be a power of two)
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Default service name, used as prefix for thread and node names
pub const DEFAULT_SERVICE_NAME: &str = "worker-service";

/// Maximum worker threads allowed
pub const MAX_WORKER_THREADS: usize = 1024;

/// Cache line size for memory alignment
///
/// Apple silicon uses 128-byte lines; everything else we target uses 64.
#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
pub const CACHE_LINE_SIZE: usize = 128;

/// Cache line size for memory alignment
#[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
pub const CACHE_LINE_SIZE: usize = 64;

/// Producer park timeout in microseconds
///
/// Producers waiting on a full channel are never explicitly woken, so a
/// parking producer re-checks capacity at this interval.
pub const PRODUCER_PARK_TIMEOUT_US: u64 = 50;

/// Worker thread park timeout in milliseconds
///
/// Upper bound on a consumer park; producers unpark the consumer explicitly,
/// this only bounds the cost of a missed wake-up.
pub const WORKER_PARK_TIMEOUT_MS: u64 = 100;

/// Default config file looked up by [`WorkerServiceConfig::load`](crate::core::config::WorkerServiceConfig::load)
pub const DEFAULT_CONFIG_FILE: &str = "keyed-executor.toml";

/// Prefix for environment variable overrides
pub const ENV_PREFIX: &str = "KX_";
