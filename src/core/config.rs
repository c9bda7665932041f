//! Configuration management for the keyed executor
//!
//! All settings are validated once at service construction and are
//! immutable afterwards. Sources, in order of precedence: explicit builder
//! calls, `KX_*` environment variables, `keyed-executor.toml`, defaults.

use crate::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_CONFIG_FILE, DEFAULT_REPLICA_COUNT, DEFAULT_SERVICE_NAME,
    ENV_PREFIX, MAX_WORKER_THREADS,
};
use crate::core::error::ConfigError;
use crate::core::types::{SelectorKind, ShutdownPolicy, WaitPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Worker service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerServiceConfig {
    /// Service name, prefix of worker thread and virtual node names
    pub name: String,

    /// Number of worker threads
    pub worker_count: usize,

    /// Virtual nodes per worker
    pub replica_count: usize,

    /// Ring buffer capacity per worker, power of two
    pub buffer_size: usize,

    /// Wait policy of producers blocked on a full channel
    pub producer_wait_policy: WaitPolicy,

    /// Wait policy of consumers idling on an empty channel
    pub consumer_wait_policy: WaitPolicy,

    /// Node selection strategy
    pub selector: SelectorKind,

    /// Maximum envelopes a consumer handles before re-checking liveness
    pub batch_size_limit: usize,

    /// What happens to queued work on shutdown
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for WorkerServiceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_SERVICE_NAME.to_string(),
            worker_count: default_worker_count(),
            replica_count: DEFAULT_REPLICA_COUNT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            producer_wait_policy: WaitPolicy::Spinning,
            consumer_wait_policy: WaitPolicy::Parking,
            selector: SelectorKind::HashRing,
            batch_size_limit: DEFAULT_BUFFER_SIZE / 2,
            shutdown_policy: ShutdownPolicy::Drain,
        }
    }
}

/// One worker per core, leaving one core to the callers
pub fn default_worker_count() -> usize {
    let cpus = num_cpus::get();
    if cpus > 1 { cpus - 1 } else { 1 }
}

impl WorkerServiceConfig {
    /// Start a builder from defaults
    pub fn builder() -> WorkerServiceConfigBuilder {
        WorkerServiceConfigBuilder { config: Self::default() }
    }

    /// Load configuration from the default file (if present) and environment
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if Path::new(DEFAULT_CONFIG_FILE).exists() {
            Self::from_file(DEFAULT_CONFIG_FILE)?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(e.to_string()))?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Apply `KX_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(name) = lookup("NAME") {
            self.name = name;
        }
        if let Some(v) = lookup("WORKER_COUNT") {
            self.worker_count = parse_field("KX_WORKER_COUNT", &v)?;
        }
        if let Some(v) = lookup("REPLICA_COUNT") {
            self.replica_count = parse_field("KX_REPLICA_COUNT", &v)?;
        }
        if let Some(v) = lookup("BUFFER_SIZE") {
            self.buffer_size = parse_field("KX_BUFFER_SIZE", &v)?;
        }
        if let Some(v) = lookup("BATCH_SIZE_LIMIT") {
            self.batch_size_limit = parse_field("KX_BATCH_SIZE_LIMIT", &v)?;
        }
        if let Some(v) = lookup("SELECTOR") {
            self.selector = parse_field("KX_SELECTOR", &v)?;
        }
        if let Some(v) = lookup("PRODUCER_WAIT_POLICY") {
            self.producer_wait_policy = parse_field("KX_PRODUCER_WAIT_POLICY", &v)?;
        }
        if let Some(v) = lookup("CONSUMER_WAIT_POLICY") {
            self.consumer_wait_policy = parse_field("KX_CONSUMER_WAIT_POLICY", &v)?;
        }
        if let Some(v) = lookup("SHUTDOWN_POLICY") {
            self.shutdown_policy = parse_field("KX_SHUTDOWN_POLICY", &v)?;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }

        if self.worker_count == 0 || self.worker_count > MAX_WORKER_THREADS {
            return Err(ConfigError::WorkerCount {
                got: self.worker_count,
                max: MAX_WORKER_THREADS,
            });
        }

        if self.replica_count == 0 {
            return Err(ConfigError::ReplicaCount);
        }

        if self.buffer_size < 2 || !self.buffer_size.is_power_of_two() {
            return Err(ConfigError::BufferSize(self.buffer_size));
        }

        if self.batch_size_limit == 0 || self.batch_size_limit > self.buffer_size {
            return Err(ConfigError::BatchSizeLimit {
                got: self.batch_size_limit,
                buffer_size: self.buffer_size,
            });
        }

        Ok(())
    }

    /// Total number of virtual nodes the service will build
    pub fn virtual_node_count(&self) -> usize {
        self.worker_count * self.replica_count
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Parse {
        field: field.to_string(),
        message: e.to_string(),
    })
}

/// Fluent builder for [`WorkerServiceConfig`]
#[derive(Debug, Clone)]
pub struct WorkerServiceConfigBuilder {
    config: WorkerServiceConfig,
}

impl WorkerServiceConfigBuilder {
    /// Service name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Number of worker threads
    pub fn worker_count(mut self, worker_count: usize) -> Self {
        self.config.worker_count = worker_count;
        self
    }

    /// Virtual nodes per worker
    pub fn replica_count(mut self, replica_count: usize) -> Self {
        self.config.replica_count = replica_count;
        self
    }

    /// Ring capacity per worker. Also clamps the batch size limit to half of it
    /// unless one was set explicitly afterwards.
    pub fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.config.buffer_size = buffer_size;
        self.config.batch_size_limit = (buffer_size / 2).max(1);
        self
    }

    /// Producer wait policy
    pub fn producer_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.config.producer_wait_policy = policy;
        self
    }

    /// Consumer wait policy
    pub fn consumer_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.config.consumer_wait_policy = policy;
        self
    }

    /// Node selection strategy
    pub fn selector(mut self, selector: SelectorKind) -> Self {
        self.config.selector = selector;
        self
    }

    /// Maximum envelopes per consumer iteration
    pub fn batch_size_limit(mut self, limit: usize) -> Self {
        self.config.batch_size_limit = limit;
        self
    }

    /// Shutdown policy for queued work
    pub fn shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.config.shutdown_policy = policy;
        self
    }

    /// Validate and build
    pub fn build(self) -> Result<WorkerServiceConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = WorkerServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.replica_count, 400);
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.batch_size_limit, 2048);
        assert!(config.worker_count >= 1);
    }

    #[test]
    fn rejects_invalid_values() {
        let base = WorkerServiceConfig::builder();
        assert_eq!(base.clone().worker_count(0).build().unwrap_err(),
            ConfigError::WorkerCount { got: 0, max: MAX_WORKER_THREADS });
        assert_eq!(base.clone().replica_count(0).build().unwrap_err(), ConfigError::ReplicaCount);
        assert_eq!(base.clone().buffer_size(100).build().unwrap_err(), ConfigError::BufferSize(100));
        assert_eq!(base.clone().buffer_size(1).build().unwrap_err(), ConfigError::BufferSize(1));
        assert_eq!(base.clone().name("  ").build().unwrap_err(), ConfigError::EmptyName);
        assert_eq!(
            base.buffer_size(8).batch_size_limit(9).build().unwrap_err(),
            ConfigError::BatchSizeLimit { got: 9, buffer_size: 8 }
        );
    }

    #[test]
    fn builder_sets_fields() {
        let config = WorkerServiceConfig::builder()
            .name("orders")
            .worker_count(3)
            .replica_count(10)
            .buffer_size(64)
            .selector(SelectorKind::Modulo)
            .consumer_wait_policy(WaitPolicy::Yielding)
            .shutdown_policy(ShutdownPolicy::Discard)
            .build()
            .unwrap();
        assert_eq!(config.name, "orders");
        assert_eq!(config.batch_size_limit, 32);
        assert_eq!(config.virtual_node_count(), 30);
        assert_eq!(config.selector, SelectorKind::Modulo);
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Discard);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let config = WorkerServiceConfig::from_toml(
            "name = \"ingest\"\nworker_count = 2\nbuffer_size = 256\nselector = \"modulo\"\n",
        )
        .unwrap();
        assert_eq!(config.name, "ingest");
        assert_eq!(config.worker_count, 2);
        assert_eq!(config.buffer_size, 256);
        assert_eq!(config.replica_count, DEFAULT_REPLICA_COUNT);
        assert_eq!(config.consumer_wait_policy, WaitPolicy::Parking);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "worker_count = 4\nshutdown_policy = \"discard\"").unwrap();
        let config = WorkerServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Discard);
        assert!(matches!(
            WorkerServiceConfig::from_file("/definitely/not/here.toml"),
            Err(ConfigError::Read(_))
        ));
    }

    #[test]
    fn env_style_overrides() {
        let vars: HashMap<&str, &str> = [
            ("WORKER_COUNT", "6"),
            ("SELECTOR", "round_robin_single_producer"),
            ("NAME", "x"),
            ("PRODUCER_WAIT_POLICY", "parking"),
            ("CONSUMER_WAIT_POLICY", "yielding"),
            ("SHUTDOWN_POLICY", "discard"),
        ]
        .into_iter()
        .collect();
        let mut config = WorkerServiceConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.worker_count, 6);
        assert_eq!(config.selector, SelectorKind::RoundRobinSingleProducer);
        assert_eq!(config.name, "x");
        assert_eq!(config.producer_wait_policy, WaitPolicy::Parking);
        assert_eq!(config.consumer_wait_policy, WaitPolicy::Yielding);
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Discard);

        let bad_policy: HashMap<&str, &str> = [("SHUTDOWN_POLICY", "later")].into_iter().collect();
        let err = config.apply_overrides(|k| bad_policy.get(k).map(|v| v.to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { field, .. } if field == "KX_SHUTDOWN_POLICY"));

        let bad: HashMap<&str, &str> = [("BUFFER_SIZE", "lots")].into_iter().collect();
        let err = config.apply_overrides(|k| bad.get(k).map(|v| v.to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { field, .. } if field == "KX_BUFFER_SIZE"));
    }
}
