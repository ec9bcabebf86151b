use std::borrow::Cow;

use crate::priority::JobPriority;

/// Arguments handed to a running job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct JobArgs {
    /// Index of the item being processed. Always `0` for single jobs.
    pub job_index: u32,
    /// Index of the group the item belongs to in
    /// [`submit_multiple_jobs`](crate::JobScheduler::submit_multiple_jobs).
    pub group_index: u32,
}

pub(crate) type JobFn = Box<dyn FnOnce(JobArgs) + Send + 'static>;

/// A unit of work for the job manager.
///
/// Any `FnOnce(JobArgs) + Send + 'static` closure converts into a job.
/// [`Job::empty`] models a missing callable and is rejected on submission.
///
/// ```
/// use tde_jobs::{Job, JobArgs};
///
/// let job = Job::from(|args: JobArgs| assert_eq!(args.job_index, 0));
/// assert!(!job.is_empty());
/// assert!(Job::empty().is_empty());
/// ```
pub struct Job {
    func: Option<JobFn>,
}

impl Job {
    pub fn new<F>(func: F) -> Self
    where
        F: FnOnce(JobArgs) + Send + 'static,
    {
        Self {
            func: Some(Box::new(func)),
        }
    }

    /// A job without a callable.
    pub fn empty() -> Self {
        Self { func: None }
    }

    pub fn is_empty(&self) -> bool {
        self.func.is_none()
    }

    pub(crate) fn into_fn(self) -> Option<JobFn> {
        self.func
    }
}

impl<F> From<F> for Job
where
    F: FnOnce(JobArgs) + Send + 'static,
{
    fn from(func: F) -> Self {
        Self::new(func)
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("empty", &self.is_empty())
            .finish()
    }
}

/// Per-submission options.
///
/// ```
/// use tde_jobs::{JobPriority, SubmitJobParams};
///
/// let params = SubmitJobParams::new()
///     .with_priority(JobPriority::High)
///     .with_name("stream_textures")
///     .with_blocking_calls(true);
/// assert_eq!(params.priority, JobPriority::High);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitJobParams {
    pub priority: JobPriority,
    /// Shown in failure reports and profiler zones.
    pub name: Cow<'static, str>,
    /// The job makes blocking calls (file or network I/O, sleeps) and runs on
    /// its own OS thread instead of occupying a pool worker.
    pub blocking_calls_awaited: bool,
}

impl SubmitJobParams {
    pub const DEFAULT_NAME: &'static str = "Job";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_blocking_calls(mut self, blocking_calls_awaited: bool) -> Self {
        self.blocking_calls_awaited = blocking_calls_awaited;
        self
    }
}

impl Default for SubmitJobParams {
    fn default() -> Self {
        Self {
            priority: JobPriority::Normal,
            name: Cow::Borrowed(Self::DEFAULT_NAME),
            blocking_calls_awaited: false,
        }
    }
}

impl From<JobPriority> for SubmitJobParams {
    fn from(priority: JobPriority) -> Self {
        Self::default().with_priority(priority)
    }
}

/// Splits `item_count` items into consecutive ranges of at most `group_size`.
pub(crate) fn group_ranges(
    item_count: u32,
    group_size: u32,
) -> impl Iterator<Item = (u32, std::ops::Range<u32>)> {
    let group_size = group_size.max(1);
    let groups = item_count.div_ceil(group_size);
    (0..groups).map(move |group| {
        // `group < groups` keeps `start` below `item_count`.
        let start = group.saturating_mul(group_size);
        let end = start.saturating_add(group_size).min(item_count);
        (group, start..end)
    })
}
