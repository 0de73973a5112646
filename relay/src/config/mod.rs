//! Configuration types for dispatcher groups.

use serde::Deserialize;
use thiserror::Error;

/// Validation failures for group configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("worker_count must be greater than 0")]
    WorkerCountZero,
    #[error("batch.max_size must be greater than 0")]
    BatchMaxSizeZero,
}

/// Batch processing configuration for worker dispatch.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of events a worker forwards to the dispatcher in one call.
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,
}

impl BatchConfig {
    /// Default maximum batch size for event dispatch.
    pub const DEFAULT_MAX_SIZE: usize = 1000;

    /// Validates batch configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::BatchMaxSizeZero);
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
        }
    }
}

fn default_batch_max_size() -> usize {
    BatchConfig::DEFAULT_MAX_SIZE
}

/// Configuration for a dispatcher group.
///
/// Contains all settings required to run the fan-out relay: the number of worker
/// dispatchers, batching parameters, and the optional bound on the start-up
/// barrier. The worker count is fixed for the lifetime of the group; partition
/// assignment must never change while the group is live.
#[derive(Clone, Debug, Deserialize)]
pub struct GroupConfig {
    /// The unique identifier for this group.
    pub id: u64,
    /// Number of worker dispatchers draining the shared event source in parallel.
    pub worker_count: u16,
    /// Batch processing configuration.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Maximum number of milliseconds to wait for all workers to report healthy or
    /// failed during start-up. `None` waits without bound, matching the behavior of
    /// groups that predate this setting.
    #[serde(default)]
    pub start_timeout_ms: Option<u64>,
}

impl GroupConfig {
    /// Creates a configuration with defaults for everything except identity and
    /// worker count.
    pub fn new(id: u64, worker_count: u16) -> Self {
        Self {
            id,
            worker_count,
            batch: BatchConfig::default(),
            start_timeout_ms: None,
        }
    }

    /// Validates group configuration settings.
    ///
    /// Checks batching settings and ensures the worker count is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.worker_count == 0 {
            return Err(ValidationError::WorkerCountZero);
        }

        self.batch.validate()?;

        Ok(())
    }
}
