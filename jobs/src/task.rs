use std::borrow::Cow;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;

use crate::counter::{CounterWait, JobCounter};
use crate::error::JobFailure;
use crate::manager::JobScheduler;
use crate::priority::JobPriority;
use crate::queue::{JobQueue, Task};

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A suspendable job.
///
/// The job's state lives in a pinned future. Suspending it (for example on
/// [`JobContext::wait_for`]) returns the worker to the scheduler; waking it
/// pushes the task back onto the queue at its original priority.
pub(crate) struct AsyncTask {
    future: Mutex<Option<BoxFuture>>,
    pub(crate) name: Cow<'static, str>,
    priority: JobPriority,
    counter: Option<JobCounter>,
    queue: Weak<JobQueue>,
    /// Set while the task sits in the queue, so repeated wakes enqueue it once.
    queued: AtomicBool,
    /// Set when a poll was requested while another worker was polling.
    notified: AtomicBool,
    cancelled: AtomicBool,
}

impl AsyncTask {
    pub(crate) fn new(
        future: BoxFuture,
        name: Cow<'static, str>,
        priority: JobPriority,
        counter: Option<JobCounter>,
        queue: &Arc<JobQueue>,
    ) -> Arc<Self> {
        Arc::new(Self {
            future: Mutex::new(Some(future)),
            name,
            priority,
            counter,
            queue: Arc::downgrade(queue),
            queued: AtomicBool::new(false),
            notified: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
        })
    }

    /// Puts the task on the queue unless it is already there.
    ///
    /// Returns `false` if the queue is gone or closed; the task is cancelled
    /// then.
    pub(crate) fn schedule(self: &Arc<Self>) -> bool {
        if self.queued.swap(true, Ordering::AcqRel) {
            return true;
        }
        let Some(queue) = self.queue.upgrade() else {
            self.cancel();
            return false;
        };
        match queue.push(self.priority, Task::Async(self.clone())) {
            Ok(()) => true,
            Err(rejected) => {
                rejected.discard();
                false
            }
        }
    }

    /// Polls the future until it suspends or completes.
    ///
    /// Returns a failure report if the future panicked. The task's counter is
    /// decremented exactly once, when the future completes or panics.
    pub(crate) fn run(self: &Arc<Self>) -> Option<JobFailure> {
        self.queued.store(false, Ordering::Release);
        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);

        loop {
            self.notified.store(true, Ordering::SeqCst);
            // Whoever holds the lock sees `notified` after releasing it and
            // polls again on our behalf.
            let Some(mut slot) = self.future.try_lock() else {
                return None;
            };
            self.notified.store(false, Ordering::SeqCst);

            let Some(future) = slot.as_mut() else {
                return None;
            };

            match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
                Ok(Poll::Pending) => {}
                Ok(Poll::Ready(())) => {
                    *slot = None;
                    drop(slot);
                    self.finish();
                    return None;
                }
                Err(payload) => {
                    *slot = None;
                    drop(slot);
                    self.finish();
                    return Some(JobFailure::from_panic(&self.name, payload));
                }
            }

            drop(slot);
            // A cancel that found the lock held left the future to us.
            if self.cancelled.load(Ordering::SeqCst) {
                self.cancel();
                return None;
            }
            if !self.notified.load(Ordering::SeqCst) {
                return None;
            }
        }
    }

    /// Drops the future without finishing it. If a worker is polling it
    /// right now, that worker drops it once the poll returns.
    pub(crate) fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let Some(mut slot) = self.future.try_lock() else {
            return;
        };
        let future = slot.take();
        drop(slot);
        if future.is_some() {
            drop(future);
            self.finish();
        }
    }

    fn finish(&self) {
        if let Some(counter) = &self.counter {
            counter.decrement();
        }
    }
}

impl Wake for AsyncTask {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

/// Handle given to async jobs.
///
/// ```ignore
/// scheduler.submit_async_job(Some(&frame), SubmitJobParams::new(), |ctx| async move {
///     let children = JobCounter::new();
///     ctx.scheduler().submit_job(Some(&children), |_| build_chunk(), SubmitJobParams::new())?;
///     ctx.wait_for(&children, 0).await;
///     merge_chunks();
/// })?;
/// ```
#[derive(Clone)]
pub struct JobContext {
    scheduler: JobScheduler,
}

impl JobContext {
    pub(crate) fn new(scheduler: JobScheduler) -> Self {
        Self { scheduler }
    }

    /// Scheduler the job runs on, for submitting sub-jobs.
    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// Suspends the job until `counter` drops to `desired` or below.
    pub fn wait_for<'a>(&self, counter: &'a JobCounter, desired: u32) -> CounterWait<'a> {
        counter.wait_for(desired)
    }

    /// Suspends the job once, letting other queued work run first.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow { yielded: false }
    }
}

/// Future returned by [`JobContext::yield_now`].
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;
    use std::sync::atomic::AtomicU32;

    fn spawn_task(queue: &Arc<JobQueue>, counter: &JobCounter, future: BoxFuture) -> Arc<AsyncTask> {
        counter.increment();
        AsyncTask::new(future, "test".into(), JobPriority::Normal, Some(counter.clone()), queue)
    }

    fn drain(queue: &JobQueue) {
        while let Some(task) = queue.try_pop() {
            if let Task::Async(task) = task {
                assert!(task.run().is_none());
            }
        }
    }

    #[test]
    fn test_suspended_task_resumes_with_captured_state() {
        let queue = Arc::new(JobQueue::new());
        let done = JobCounter::new();
        let gate = JobCounter::new();
        gate.increment();

        let observed = Arc::new(AtomicU32::new(0));
        let future: BoxFuture = {
            let gate = gate.clone();
            let observed = observed.clone();
            Box::pin(async move {
                let captured = vec![1u32, 2, 3];
                gate.wait_for(0).await;
                observed.store(captured.iter().sum(), Ordering::SeqCst);
            })
        };

        spawn_task(&queue, &done, future).schedule();
        drain(&queue);
        // Suspended on the gate: not finished, not queued.
        assert_eq!(done.value(), 1);
        assert_eq!(queue.len(), 0);

        gate.decrement();
        assert_eq!(queue.len(), 1);
        drain(&queue);
        assert!(done.is_done());
        assert_eq!(observed.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_yield_requeues_once() {
        let queue = Arc::new(JobQueue::new());
        let done = JobCounter::new();
        let future: BoxFuture = Box::pin(async {
            YieldNow { yielded: false }.await;
        });

        spawn_task(&queue, &done, future).schedule();
        let first = queue.try_pop();
        assert!(matches!(&first, Some(Task::Async(_))));
        if let Some(Task::Async(task)) = first {
            task.run();
        }
        assert_eq!(queue.len(), 1);
        drain(&queue);
        assert!(done.is_done());
    }

    #[test]
    fn test_panicking_task_reports_and_finishes() {
        let queue = Arc::new(JobQueue::new());
        let done = JobCounter::new();
        let future: BoxFuture = Box::pin(async { panic!("broken stream") });

        let task = spawn_task(&queue, &done, future);
        let failure = task.run().unwrap();
        assert_eq!(failure.message, "broken stream");
        assert!(done.is_done());

        // A completed task ignores further polls.
        assert!(task.run().is_none());
        assert!(done.is_done());
    }

    #[test]
    fn test_cancel_during_poll_releases_counter_after_poll() {
        let queue = Arc::new(JobQueue::new());
        let done = JobCounter::new();
        let handle: Arc<OnceLock<Arc<AsyncTask>>> = Arc::new(OnceLock::new());

        let future: BoxFuture = {
            let handle = handle.clone();
            Box::pin(async move {
                // The running worker still holds the future lock here.
                if let Some(task) = handle.get() {
                    task.cancel();
                }
                std::future::pending::<()>().await;
            })
        };
        let task = spawn_task(&queue, &done, future);
        assert!(handle.set(task.clone()).is_ok());

        assert!(task.run().is_none());
        assert!(done.is_done());
        assert!(task.future.lock().is_none());
    }

    #[test]
    fn test_schedule_on_closed_queue_cancels() {
        let queue = Arc::new(JobQueue::new());
        let done = JobCounter::new();
        let task = spawn_task(&queue, &done, Box::pin(async {}));
        assert!(queue.close().is_empty());

        assert!(!task.schedule());
        assert!(done.is_done());
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_cancel_releases_counter() {
        let queue = Arc::new(JobQueue::new());
        let done = JobCounter::new();
        let task = spawn_task(&queue, &done, Box::pin(async {}));
        task.cancel();
        assert!(done.is_done());
        task.cancel();
        assert!(done.is_done());
    }
}
