use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Number of outstanding jobs in a batch.
///
/// A counter is incremented when a job tied to it is submitted and
/// decremented once that job has finished, whether it completed normally or
/// panicked. Waiting on a counter blocks (or suspends an async job) until its
/// value drops to a desired threshold, usually zero.
///
/// Counters are cheap shared handles: every queued job holds a clone, so a
/// counter can never be dropped while jobs still refer to it.
///
/// ```
/// use tde_jobs::JobCounter;
///
/// let counter = JobCounter::new();
/// assert!(counter.is_done());
/// let alias = counter.clone();
/// assert_eq!(alias.value(), counter.value());
/// ```
#[derive(Clone, Default)]
pub struct JobCounter {
    inner: Arc<CounterInner>,
}

#[derive(Default)]
struct CounterInner {
    value: AtomicU32,
    /// Async jobs suspended on this counter.
    wakers: Mutex<Vec<Waker>>,
    condvar: Condvar,
}

impl JobCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of outstanding jobs.
    pub fn value(&self) -> u32 {
        self.inner.value.load(Ordering::Acquire)
    }

    /// Whether every job tied to the counter has finished.
    pub fn is_done(&self) -> bool {
        self.value() == 0
    }

    /// Whether the counter has dropped to `desired` or below.
    pub fn has_reached(&self, desired: u32) -> bool {
        self.value() <= desired
    }

    /// Returns a future that resolves once the counter reaches `desired`.
    ///
    /// Awaiting it inside an async job suspends the job without blocking the
    /// worker thread; the job is rescheduled when the counter changes.
    pub fn wait_for(&self, desired: u32) -> CounterWait<'_> {
        CounterWait {
            counter: self,
            desired,
        }
    }

    pub(crate) fn increment(&self) {
        self.inner.value.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn decrement(&self) {
        let previous = self.inner.value.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "job counter decremented below zero");

        // Taking the lock orders this decrement against waiters that checked
        // the value under the same lock, so no wakeup is lost.
        let wakers = {
            let mut wakers = self.inner.wakers.lock();
            self.inner.condvar.notify_all();
            std::mem::take(&mut *wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Blocks the calling OS thread until the counter reaches `desired`.
    pub(crate) fn wait_blocking(&self, desired: u32) {
        let mut guard = self.inner.wakers.lock();
        while !self.has_reached(desired) {
            self.inner.condvar.wait(&mut guard);
        }
    }

    /// Like [`wait_blocking`](Self::wait_blocking), but gives up after
    /// `timeout`. Returns whether the counter reached `desired`.
    pub(crate) fn wait_blocking_for(&self, desired: u32, timeout: Duration) -> bool {
        let mut guard = self.inner.wakers.lock();
        if !self.has_reached(desired) {
            self.inner.condvar.wait_for(&mut guard, timeout);
        }
        self.has_reached(desired)
    }

    fn register_waker(&self, desired: u32, waker: &Waker) -> bool {
        let mut wakers = self.inner.wakers.lock();
        if self.has_reached(desired) {
            return false;
        }
        if !wakers.iter().any(|registered| registered.will_wake(waker)) {
            wakers.push(waker.clone());
        }
        true
    }
}

impl std::fmt::Debug for JobCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCounter")
            .field("value", &self.value())
            .finish()
    }
}

/// Future returned by [`JobCounter::wait_for`].
pub struct CounterWait<'a> {
    counter: &'a JobCounter,
    desired: u32,
}

impl Future for CounterWait<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.counter.has_reached(self.desired) {
            return Poll::Ready(());
        }
        if self.counter.register_waker(self.desired, cx.waker()) {
            Poll::Pending
        } else {
            Poll::Ready(())
        }
    }
}
