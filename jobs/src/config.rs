use serde::Deserialize;

use crate::error::JobError;

/// What happens to queued jobs when the manager shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Run every outstanding job before joining the workers.
    #[default]
    Drain,
    /// Drop queued jobs without running them. Their counters are still
    /// released so waiters do not hang.
    Discard,
}

/// Job manager settings, usually loaded from the engine's TOML config.
///
/// Every field has a default, so an empty document is a valid configuration:
///
/// ```
/// use tde_jobs::{JobManagerConfig, ShutdownPolicy};
///
/// let config = JobManagerConfig::from_toml_str(r#"
///     worker_count = 4
///     shutdown_policy = "discard"
/// "#).unwrap();
///
/// assert_eq!(config.worker_count, Some(4));
/// assert_eq!(config.shutdown_policy, ShutdownPolicy::Discard);
/// assert_eq!(config.main_thread_tick_rate, 60);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct JobManagerConfig {
    /// Number of worker threads. `None` uses the available hardware parallelism.
    pub worker_count: Option<usize>,
    pub shutdown_policy: ShutdownPolicy,
    /// The main-thread queue is processed on every N-th call to
    /// [`process_main_thread_queue`](crate::JobScheduler::process_main_thread_queue).
    pub main_thread_tick_rate: u32,
    /// Bytes handed to the scratch allocator factory for each worker.
    pub scratch_allocator_size: usize,
    /// Worker threads are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            shutdown_policy: ShutdownPolicy::Drain,
            main_thread_tick_rate: 60,
            scratch_allocator_size: 64 * 1024,
            thread_name_prefix: "tde-worker".to_owned(),
        }
    }
}

impl JobManagerConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, JobError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if self.worker_count == Some(0) {
            return Err(JobError::Config("worker_count must be at least 1".into()));
        }
        if self.main_thread_tick_rate == 0 {
            return Err(JobError::Config(
                "main_thread_tick_rate must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Worker count after resolving the hardware default.
    pub fn resolved_worker_count(&self) -> usize {
        self.worker_count
            .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, |n| n.get()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tde_core::ErrorKind;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = JobManagerConfig::from_toml_str("").unwrap();
        assert_eq!(config, JobManagerConfig::default());
        assert!(config.resolved_worker_count() >= 1);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = JobManagerConfig::from_toml_str("worker_count = 0").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgs);

        assert!(JobManagerConfig::from_toml_str("main_thread_tick_rate = 0").is_err());
        assert!(JobManagerConfig::from_toml_str("shutdown_policy = \"later\"").is_err());
    }

    #[test]
    fn test_full_document() {
        let config = JobManagerConfig::from_toml_str(
            r#"
            worker_count = 2
            shutdown_policy = "drain"
            main_thread_tick_rate = 1
            scratch_allocator_size = 4096
            thread_name_prefix = "render-job"
            "#,
        )
        .unwrap();
        assert_eq!(config.resolved_worker_count(), 2);
        assert_eq!(config.main_thread_tick_rate, 1);
        assert_eq!(config.scratch_allocator_size, 4096);
        assert_eq!(config.thread_name_prefix, "render-job");
    }
}
