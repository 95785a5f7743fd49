//! Configuration types for concurrent reads.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tributary_types::LogLevel;

use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::thread_pool::DEFAULT_MAX_CONCURRENT_TASKS;

const DEFAULT_NUM_WORKERS: usize = 4;
const DEFAULT_INITIAL_PARTITION_GENERATORS: usize = 2;
const DEFAULT_TIMEOUT_SECONDS: u64 = 900;
const DEFAULT_GENERATOR_BACKOFF_MS: u64 = 100;

/// Worker pool and queue sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcurrencyConfig {
    /// Worker threads shared by generators and readers.
    pub num_workers: usize,
    /// Streams whose generators start immediately. The rest start as
    /// earlier generators finish.
    pub initial_partition_generators: usize,
    /// In-flight task count above which generators hold back.
    pub max_concurrent_tasks: usize,
    /// Shared queue bound.
    pub queue_capacity: usize,
    /// Longest wait for the next queue item before the read fails.
    pub timeout_seconds: u64,
    /// Sleep between checks while generators are held back.
    pub generator_backoff_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            num_workers: DEFAULT_NUM_WORKERS,
            initial_partition_generators: DEFAULT_INITIAL_PARTITION_GENERATORS,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            generator_backoff_ms: DEFAULT_GENERATOR_BACKOFF_MS,
        }
    }
}

impl ConcurrencyConfig {
    /// Single worker running a single generator.
    #[must_use]
    pub fn single_threaded() -> Self {
        Self {
            num_workers: 1,
            initial_partition_generators: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    #[must_use]
    pub fn generator_backoff(&self) -> Duration {
        Duration::from_millis(self.generator_backoff_ms)
    }
}

/// Message repository and slice logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MessageConfig {
    /// Least severe log level kept by the message repository.
    pub repository_level: LogLevel,
    /// Echo every partition slice as a log message.
    pub log_slices: bool,
}

impl Default for MessageConfig {
    fn default() -> Self {
        Self {
            repository_level: LogLevel::Info,
            log_slices: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ConcurrencyConfig::default();
        assert_eq!(config.num_workers, 4);
        assert_eq!(config.initial_partition_generators, 2);
        assert_eq!(config.max_concurrent_tasks, 10_000);
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.timeout(), Duration::from_secs(900));
        assert_eq!(config.generator_backoff(), Duration::from_millis(100));
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: ConcurrencyConfig = serde_yaml::from_str("num_workers: 8").unwrap();
        assert_eq!(config.num_workers, 8);
        assert_eq!(config.initial_partition_generators, 2);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<ConcurrencyConfig, _> = serde_yaml::from_str("workers: 8");
        assert!(result.is_err());
    }

    #[test]
    fn message_config_parses_uppercase_levels() {
        let config: MessageConfig =
            serde_yaml::from_str("repository_level: WARN\nlog_slices: true").unwrap();
        assert_eq!(config.repository_level, LogLevel::Warn);
        assert!(config.log_slices);
    }
}
