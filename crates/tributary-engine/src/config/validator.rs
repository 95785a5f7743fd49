//! Semantic validation for concurrency settings.

use anyhow::{bail, Result};

use crate::config::types::ConcurrencyConfig;

/// Validate worker, generator, and queue sizing.
///
/// Workers must outnumber initial generators so at least one thread is
/// left for reading, unless both are 1.
///
/// # Errors
///
/// Returns an error listing every violation found.
pub fn validate_concurrency(config: &ConcurrencyConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.num_workers == 0 {
        errors.push("num_workers must be at least 1".to_string());
    }
    if config.initial_partition_generators == 0 {
        errors.push("initial_partition_generators must be at least 1".to_string());
    }

    let single_threaded = config.num_workers == 1 && config.initial_partition_generators == 1;
    if !single_threaded
        && config.num_workers > 0
        && config.initial_partition_generators >= config.num_workers
    {
        errors.push(format!(
            "num_workers ({}) must exceed initial_partition_generators ({}) so readers can make progress",
            config.num_workers, config.initial_partition_generators
        ));
    }

    if config.max_concurrent_tasks == 0 {
        errors.push("max_concurrent_tasks must be at least 1".to_string());
    } else if config.initial_partition_generators > 0
        && config.max_concurrent_tasks <= config.initial_partition_generators
    {
        // Running generators count toward the limit themselves.
        errors.push(format!(
            "max_concurrent_tasks ({}) must be greater than initial_partition_generators ({}) so generators can enqueue partitions",
            config.max_concurrent_tasks, config.initial_partition_generators
        ));
    }
    if config.queue_capacity == 0 {
        errors.push("queue_capacity must be at least 1".to_string());
    }
    if config.timeout_seconds == 0 {
        errors.push("timeout_seconds must be > 0".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Concurrency validation failed:\n  - {}", errors.join("\n  - "));
    }
}
