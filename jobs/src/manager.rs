use std::borrow::Cow;
use std::collections::VecDeque;
use std::future::Future;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;
use tde_core::memory::Allocator;
use tde_core::{profile_function, profile_message, profile_plot, profile_scope_dynamic};

use crate::config::{JobManagerConfig, ShutdownPolicy};
use crate::counter::JobCounter;
use crate::error::{JobError, JobFailure};
use crate::job::{Job, JobArgs, SubmitJobParams, group_ranges};
use crate::priority::JobPriority;
use crate::queue::{JobQueue, QueuedJob, Task};
use crate::task::{AsyncTask, JobContext};
use crate::worker::{self, current_worker};

/// Receives reports of jobs that panicked.
pub type FailureSink = Arc<dyn Fn(&JobFailure) + Send + Sync>;

/// Builds a worker's scratch allocator from the configured byte budget.
pub type ScratchAllocatorFactory = Arc<dyn Fn(usize) -> Box<dyn Allocator> + Send + Sync>;

type MainThreadCallback = Box<dyn FnOnce() + Send>;

/// How long a worker waiting on a counter sleeps before checking the queue
/// for more work to help with.
const HELP_POLL_INTERVAL: Duration = Duration::from_micros(200);

const JOB_GROUP_NAME: &str = "JobGroup";

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);

/// State shared by the manager, its workers and every scheduler handle.
pub(crate) struct Shared {
    pub(crate) id: usize,
    pub(crate) queue: Arc<JobQueue>,
    failure_sink: FailureSink,
    pub(crate) scratch_factory: Option<ScratchAllocatorFactory>,
    pub(crate) scratch_size: usize,
    worker_count: usize,
    thread_name_prefix: String,
    blocking_threads: Mutex<Vec<JoinHandle<()>>>,
    main_thread: ThreadId,
    main_queue: Mutex<VecDeque<MainThreadCallback>>,
    main_ticks: AtomicU64,
    main_thread_tick_rate: u32,
}

impl Shared {
    pub(crate) fn run_task(&self, task: Task) {
        match task {
            Task::Job(job) => self.run_job(job),
            Task::Async(task) => {
                profile_scope_dynamic!(task.name.as_ref());
                if let Some(failure) = task.run() {
                    self.report(&failure);
                }
            }
        }
    }

    fn run_job(&self, job: QueuedJob) {
        profile_scope_dynamic!(job.name.as_ref());
        let QueuedJob {
            func,
            args,
            counter,
            name,
        } = job;

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || func(args))) {
            self.report(&JobFailure::from_panic(&name, payload));
        }
        if let Some(counter) = counter {
            counter.decrement();
        }
    }

    fn report(&self, failure: &JobFailure) {
        (self.failure_sink)(failure);
    }

    fn spawn_blocking(self: &Arc<Self>, job: QueuedJob) -> Result<(), JobError> {
        let counter = job.counter.clone();
        let shared = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-blocking", self.thread_name_prefix))
            .spawn(move || shared.run_job(job));

        match spawned {
            Ok(handle) => {
                let mut threads = self.blocking_threads.lock();
                threads.retain(|thread| !thread.is_finished());
                threads.push(handle);
                Ok(())
            }
            Err(err) => {
                if let Some(counter) = counter {
                    counter.decrement();
                }
                Err(JobError::ThreadSpawn(err))
            }
        }
    }

    fn join_blocking_threads(&self) {
        let threads = std::mem::take(&mut *self.blocking_threads.lock());
        for thread in threads {
            if thread.join().is_err() {
                log::error!("blocking job thread terminated abnormally");
            }
        }
    }

    fn discard(&self, tasks: Vec<Task>) {
        if tasks.is_empty() {
            return;
        }
        log::warn!("discarding {} queued jobs on shutdown", tasks.len());
        for task in tasks {
            task.discard();
        }
    }
}

/// Cloneable handle for submitting and waiting on jobs.
///
/// Obtained from [`JobManager::scheduler`] (or through `Deref` on the
/// manager) and from [`JobContext::scheduler`] inside async jobs. Handles can
/// be moved into jobs to submit nested work.
#[derive(Clone)]
pub struct JobScheduler {
    shared: Arc<Shared>,
}

impl JobScheduler {
    /// Queues a job.
    ///
    /// If `counter` is given it is incremented before the job becomes
    /// visible to workers and decremented exactly once after the job ran,
    /// even if it panicked.
    ///
    /// # Errors
    ///
    /// - [`JobError::InvalidArgs`] for an empty job; nothing is queued and
    ///   the counter is left untouched.
    /// - [`JobError::ShuttingDown`] once the manager stopped accepting work.
    /// - [`JobError::ThreadSpawn`] if a blocking job's thread could not start.
    pub fn submit_job(
        &self,
        counter: Option<&JobCounter>,
        job: impl Into<Job>,
        params: SubmitJobParams,
    ) -> Result<(), JobError> {
        let func = job
            .into()
            .into_fn()
            .ok_or(JobError::InvalidArgs("job has no callable"))?;

        let queued = QueuedJob {
            func,
            args: JobArgs::default(),
            counter: counter.cloned(),
            name: params.name,
        };
        self.enqueue(queued, params.priority, params.blocking_calls_awaited)
    }

    /// Runs `job` once for every item in `0..item_count`, batched into jobs
    /// of `group_size` consecutive items that share one counter. Every batch
    /// is queued at `priority`.
    ///
    /// ```
    /// use std::sync::Arc;
    /// use std::sync::atomic::{AtomicU32, Ordering};
    /// use tde_jobs::{JobCounter, JobManager, JobManagerConfig, JobPriority};
    ///
    /// let manager = JobManager::new(JobManagerConfig::default()).unwrap();
    /// let counter = JobCounter::new();
    /// let sum = Arc::new(AtomicU32::new(0));
    ///
    /// let total = sum.clone();
    /// manager
    ///     .submit_multiple_jobs(Some(&counter), 100, 16, JobPriority::Normal, move |args| {
    ///         total.fetch_add(args.job_index, Ordering::Relaxed);
    ///     })
    ///     .unwrap();
    ///
    /// manager.wait_for_job_counter(&counter, 0);
    /// assert_eq!(sum.load(Ordering::Relaxed), (0..100).sum::<u32>());
    /// ```
    pub fn submit_multiple_jobs<F>(
        &self,
        counter: Option<&JobCounter>,
        item_count: u32,
        group_size: u32,
        priority: JobPriority,
        job: F,
    ) -> Result<(), JobError>
    where
        F: Fn(JobArgs) + Send + Sync + 'static,
    {
        if group_size == 0 {
            return Err(JobError::InvalidArgs("group size must be non-zero"));
        }

        let job = Arc::new(job);
        for (group_index, range) in group_ranges(item_count, group_size) {
            let job = job.clone();
            let queued = QueuedJob {
                args: JobArgs {
                    job_index: range.start,
                    group_index,
                },
                func: Box::new(move |_| {
                    for job_index in range {
                        job(JobArgs {
                            job_index,
                            group_index,
                        });
                    }
                }),
                counter: counter.cloned(),
                name: Cow::Borrowed(JOB_GROUP_NAME),
            };
            self.enqueue(queued, priority, false)?;
        }
        Ok(())
    }

    /// Queues a suspendable job.
    ///
    /// `job` receives a [`JobContext`] and returns the future to run. Awaiting
    /// [`JobContext::wait_for`] suspends the job without blocking its worker;
    /// it resumes on any worker once the counter is reached. The counter is
    /// decremented when the future completes or panics.
    ///
    /// Async jobs always run on pool workers;
    /// [`SubmitJobParams::blocking_calls_awaited`] is ignored for them.
    pub fn submit_async_job<F, Fut>(
        &self,
        counter: Option<&JobCounter>,
        params: SubmitJobParams,
        job: F,
    ) -> Result<(), JobError>
    where
        F: FnOnce(JobContext) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.shared.queue.is_closed() {
            return Err(JobError::ShuttingDown);
        }

        let future = job(JobContext::new(self.clone()));
        if let Some(counter) = counter {
            counter.increment();
        }
        let task = AsyncTask::new(
            Box::pin(future),
            params.name,
            params.priority,
            counter.cloned(),
            &self.shared.queue,
        );
        // Losing a race with shutdown cancels the task, releasing the counter.
        if !task.schedule() {
            return Err(JobError::ShuttingDown);
        }
        Ok(())
    }

    /// Blocks until `counter` drops to `desired` or below.
    ///
    /// On a worker thread the wait re-enters the scheduler: the worker keeps
    /// running queued jobs until the counter is reached, so jobs waiting on
    /// their own sub-jobs cannot starve the pool. Elsewhere the calling
    /// thread sleeps on the counter.
    ///
    /// Inside async jobs prefer awaiting [`JobContext::wait_for`].
    pub fn wait_for_job_counter(&self, counter: &JobCounter, desired: u32) {
        profile_function!();
        if counter.has_reached(desired) {
            return;
        }

        if !self.is_worker_thread() {
            counter.wait_blocking(desired);
            return;
        }

        while !counter.has_reached(desired) {
            match self.shared.queue.try_pop() {
                Some(task) => self.shared.run_task(task),
                None => {
                    counter.wait_blocking_for(desired, HELP_POLL_INTERVAL);
                }
            }
        }
    }

    /// Runs `callback` on the thread that created the manager.
    ///
    /// Called on that thread, the callback runs immediately. Otherwise it is
    /// queued until the next processing tick of
    /// [`process_main_thread_queue`](Self::process_main_thread_queue).
    pub fn execute_in_main_thread<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if thread::current().id() == self.shared.main_thread {
            callback();
            return;
        }
        self.shared.main_queue.lock().push_back(Box::new(callback));
    }

    /// Runs queued main-thread callbacks.
    ///
    /// Meant to be called once per frame from the main thread. The first
    /// call (tick 0) drains the queue, then every `main_thread_tick_rate`-th
    /// call after it (ticks N, 2N, ...); the calls in between return 0.
    /// Returns the number of callbacks run.
    pub fn process_main_thread_queue(&self) -> usize {
        let tick = self.shared.main_ticks.fetch_add(1, Ordering::Relaxed);
        if tick % u64::from(self.shared.main_thread_tick_rate) != 0 {
            return 0;
        }

        let callbacks = std::mem::take(&mut *self.shared.main_queue.lock());
        let count = callbacks.len();
        for callback in callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                self.shared
                    .report(&JobFailure::from_panic("MainThreadCallback", payload));
            }
        }
        count
    }

    /// Number of main-thread callbacks waiting for the next processing tick.
    pub fn main_thread_queue_len(&self) -> usize {
        self.shared.main_queue.lock().len()
    }

    /// Jobs currently waiting in the queue (not counting running ones).
    pub fn pending_job_count(&self) -> usize {
        let pending = self.shared.queue.len();
        profile_plot!("Pending jobs", pending);
        pending
    }

    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    /// Whether the calling thread is one of this manager's workers.
    pub fn is_worker_thread(&self) -> bool {
        current_worker().is_some_and(|worker| worker.pool == self.shared.id)
    }

    fn enqueue(
        &self,
        job: QueuedJob,
        priority: JobPriority,
        blocking: bool,
    ) -> Result<(), JobError> {
        if let Some(counter) = &job.counter {
            counter.increment();
        }

        if blocking {
            return self.shared.spawn_blocking(job);
        }

        match self.shared.queue.push(priority, Task::Job(job)) {
            Ok(()) => Ok(()),
            Err(rejected) => {
                rejected.discard();
                Err(JobError::ShuttingDown)
            }
        }
    }
}

/// Thread pool executing jobs by priority.
///
/// Dropping the manager shuts it down according to its
/// [`ShutdownPolicy`]. All submission and waiting methods live on
/// [`JobScheduler`], which the manager dereferences to.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use tde_jobs::{JobCounter, JobManager, JobManagerConfig, SubmitJobParams};
///
/// let manager = JobManager::new(JobManagerConfig::default()).unwrap();
/// let counter = JobCounter::new();
/// let flag = Arc::new(AtomicBool::new(false));
///
/// let job_flag = flag.clone();
/// manager
///     .submit_job(Some(&counter), move |_| job_flag.store(true, Ordering::SeqCst), SubmitJobParams::new())
///     .unwrap();
///
/// manager.wait_for_job_counter(&counter, 0);
/// assert!(flag.load(Ordering::SeqCst));
/// ```
pub struct JobManager {
    scheduler: JobScheduler,
    workers: Vec<JoinHandle<()>>,
    shutdown_policy: ShutdownPolicy,
}

impl JobManager {
    pub fn new(config: JobManagerConfig) -> Result<Self, JobError> {
        JobManagerBuilder::new().with_config(config).build()
    }

    pub fn builder() -> JobManagerBuilder {
        JobManagerBuilder::new()
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// Stops the workers. Called automatically on drop; later calls are no-ops.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        let shared = self.scheduler.shared.clone();

        match self.shutdown_policy {
            ShutdownPolicy::Drain => {
                shared.join_blocking_threads();
                shared.queue.begin_shutdown();
                self.join_workers();
            }
            ShutdownPolicy::Discard => {
                shared.discard(shared.queue.close());
                self.join_workers();
            }
        }

        shared.join_blocking_threads();
        // Wakeups that arrived after the last worker exited.
        shared.discard(shared.queue.close());
        profile_message!("job manager stopped");
        log::info!("job manager stopped");
    }

    fn join_workers(&mut self) {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("job worker terminated abnormally");
            }
        }
    }
}

impl Deref for JobManager {
    type Target = JobScheduler;

    fn deref(&self) -> &JobScheduler {
        &self.scheduler
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Configures and starts a [`JobManager`].
///
/// ```
/// use tde_core::memory::{GrowthPolicy, create_linear_allocator};
/// use tde_jobs::{JobManager, JobManagerConfig};
///
/// let config = JobManagerConfig {
///     worker_count: Some(2),
///     ..Default::default()
/// };
/// let manager = JobManager::builder()
///     .with_config(config)
///     .with_failure_sink(|failure| eprintln!("{failure}"))
///     .with_scratch_allocator_factory(|size| {
///         Box::new(create_linear_allocator(size, GrowthPolicy::Grow).unwrap())
///     })
///     .build()
///     .unwrap();
/// assert_eq!(manager.worker_count(), 2);
/// ```
pub struct JobManagerBuilder {
    config: JobManagerConfig,
    failure_sink: Option<FailureSink>,
    scratch_factory: Option<ScratchAllocatorFactory>,
}

impl JobManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: JobManagerConfig::default(),
            failure_sink: None,
            scratch_factory: None,
        }
    }

    pub fn with_config(mut self, config: JobManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default sink, which logs failures at `error` level.
    pub fn with_failure_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&JobFailure) + Send + Sync + 'static,
    {
        self.failure_sink = Some(Arc::new(sink));
        self
    }

    /// Gives every worker its own allocator, reachable from jobs through
    /// [`with_scratch_allocator`](crate::with_scratch_allocator).
    pub fn with_scratch_allocator_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(usize) -> Box<dyn Allocator> + Send + Sync + 'static,
    {
        self.scratch_factory = Some(Arc::new(factory));
        self
    }

    /// Spawns the worker threads.
    ///
    /// The calling thread becomes the manager's main thread for
    /// [`JobScheduler::execute_in_main_thread`].
    pub fn build(self) -> Result<JobManager, JobError> {
        self.config.validate()?;
        let worker_count = self.config.resolved_worker_count();

        let shared = Arc::new(Shared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            queue: Arc::new(JobQueue::new()),
            failure_sink: self
                .failure_sink
                .unwrap_or_else(|| Arc::new(|failure: &JobFailure| log::error!("{failure}"))),
            scratch_factory: self.scratch_factory,
            scratch_size: self.config.scratch_allocator_size,
            worker_count,
            thread_name_prefix: self.config.thread_name_prefix.clone(),
            blocking_threads: Mutex::new(Vec::new()),
            main_thread: thread::current().id(),
            main_queue: Mutex::new(VecDeque::new()),
            main_ticks: AtomicU64::new(0),
            main_thread_tick_rate: self.config.main_thread_tick_rate,
        });

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", self.config.thread_name_prefix))
                .spawn(move || worker::worker_main(worker_shared, index));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    log::error!("failed to spawn job worker {index}: {err}");
                    shared.queue.begin_shutdown();
                    for worker in workers {
                        if worker.join().is_err() {
                            log::warn!("job worker terminated abnormally after a failed spawn");
                        }
                    }
                    return Err(JobError::ThreadSpawn(err));
                }
            }
        }

        log::info!(
            "job manager started with {worker_count} workers ({:?} on shutdown)",
            self.config.shutdown_policy
        );

        Ok(JobManager {
            scheduler: JobScheduler { shared },
            workers,
            shutdown_policy: self.config.shutdown_policy,
        })
    }
}

impl Default for JobManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
