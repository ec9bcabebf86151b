//! # TDE Jobs
//!
//! Priority job manager for the TDE engine.
//!
//! ## Overview
//!
//! - [`JobManager`] - worker pool draining a three-tier priority queue
//! - [`JobScheduler`] - cloneable handle for submitting and waiting on jobs
//! - [`JobCounter`] - tracks outstanding jobs of a batch
//! - [`JobContext`] - handle given to suspendable (async) jobs
//! - [`JobManagerConfig`] - TOML-loadable settings
//!
//! Jobs that wait on counters can either block their worker (the worker keeps
//! executing other queued jobs meanwhile) or be written as async jobs that
//! suspend and resume on any worker with their state intact.
//!
//! ## Example
//!
//! ```
//! use tde_jobs::{JobCounter, JobManager, JobManagerConfig, JobPriority, SubmitJobParams};
//!
//! let manager = JobManager::new(JobManagerConfig::default()).unwrap();
//! let frame = JobCounter::new();
//!
//! let scheduler = manager.scheduler().clone();
//! manager
//!     .submit_async_job(Some(&frame), SubmitJobParams::from(JobPriority::High), |ctx| async move {
//!         let children = JobCounter::new();
//!         scheduler
//!             .submit_multiple_jobs(Some(&children), 64, 8, JobPriority::High, |_args| {})
//!             .unwrap();
//!         ctx.wait_for(&children, 0).await;
//!     })
//!     .unwrap();
//!
//! manager.wait_for_job_counter(&frame, 0);
//! ```

mod config;
mod counter;
mod error;
mod job;
mod manager;
mod priority;
mod queue;
mod task;
mod worker;

pub use config::{JobManagerConfig, ShutdownPolicy};
pub use counter::{CounterWait, JobCounter};
pub use error::{JobError, JobFailure};
pub use job::{Job, JobArgs, SubmitJobParams};
pub use manager::{FailureSink, JobManager, JobManagerBuilder, JobScheduler, ScratchAllocatorFactory};
pub use priority::JobPriority;
pub use task::{JobContext, YieldNow};
pub use worker::{current_worker_index, with_scratch_allocator};

/// Jobs library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
