use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::counter::JobCounter;
use crate::job::{JobArgs, JobFn};
use crate::priority::JobPriority;
use crate::task::AsyncTask;

/// A synchronous job waiting in the queue.
pub(crate) struct QueuedJob {
    pub(crate) func: JobFn,
    pub(crate) args: JobArgs,
    pub(crate) counter: Option<JobCounter>,
    pub(crate) name: std::borrow::Cow<'static, str>,
}

pub(crate) enum Task {
    Job(QueuedJob),
    /// An async job ready to be polled.
    Async(Arc<AsyncTask>),
}

impl Task {
    /// Drops the task without running it, keeping its counter consistent.
    pub(crate) fn discard(self) {
        match self {
            Task::Job(job) => {
                if let Some(counter) = job.counter {
                    counter.decrement();
                }
            }
            Task::Async(task) => task.cancel(),
        }
    }
}

struct QueueState {
    tiers: [VecDeque<Task>; JobPriority::COUNT],
    /// Workers exit once the queue runs empty.
    shutting_down: bool,
    /// No further tasks are accepted.
    closed: bool,
}

impl QueueState {
    fn pop(&mut self) -> Option<Task> {
        JobPriority::DRAIN_ORDER
            .iter()
            .find_map(|priority| self.tiers[priority.tier()].pop_front())
    }

    fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }
}

/// Three-tier FIFO queue shared by all workers.
pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl JobQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                tiers: Default::default(),
                shutting_down: false,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueues a task, handing it back if the queue is closed.
    pub(crate) fn push(&self, priority: JobPriority, task: Task) -> Result<(), Task> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(task);
        }
        state.tiers[priority.tier()].push_back(task);
        self.available.notify_one();
        Ok(())
    }

    pub(crate) fn try_pop(&self) -> Option<Task> {
        self.state.lock().pop()
    }

    /// Blocks until a task is available. Returns `None` once the queue is
    /// shutting down and empty.
    pub(crate) fn pop_blocking(&self) -> Option<Task> {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.pop() {
                return Some(task);
            }
            if state.shutting_down {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Lets workers exit once they run out of work.
    pub(crate) fn begin_shutdown(&self) {
        self.state.lock().shutting_down = true;
        self.available.notify_all();
    }

    /// Stops accepting tasks and returns everything still queued.
    pub(crate) fn close(&self) -> Vec<Task> {
        let mut state = self.state.lock();
        state.closed = true;
        state.shutting_down = true;
        self.available.notify_all();
        let mut remaining = Vec::with_capacity(state.len());
        while let Some(task) = state.pop() {
            remaining.push(task);
        }
        remaining
    }
}
