use std::cell::{Cell, RefCell};
use std::sync::Arc;

use tde_core::memory::Allocator;
use tde_core::set_thread_name;

use crate::manager::Shared;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerId {
    pub(crate) pool: usize,
    pub(crate) index: usize,
}

thread_local! {
    static WORKER: Cell<Option<WorkerId>> = const { Cell::new(None) };
    static SCRATCH: RefCell<Option<Box<dyn Allocator>>> = const { RefCell::new(None) };
}

pub(crate) fn current_worker() -> Option<WorkerId> {
    WORKER.get()
}

/// Index of the pool worker running on this thread, if any.
pub fn current_worker_index() -> Option<usize> {
    current_worker().map(|worker| worker.index)
}

/// Runs `f` with the current worker's scratch allocator.
///
/// Returns `None` when called off a worker thread, when the manager was
/// built without a scratch allocator factory, or when the allocator is
/// already borrowed further up the stack.
///
/// ```ignore
/// scheduler.submit_job(Some(&counter), |_| {
///     tde_jobs::with_scratch_allocator(|scratch| {
///         let block = scratch.allocate(256, 16);
///         // ...
///     });
/// }, SubmitJobParams::new())?;
/// ```
pub fn with_scratch_allocator<R>(f: impl FnOnce(&mut dyn Allocator) -> R) -> Option<R> {
    SCRATCH.with(|scratch| {
        let mut scratch = scratch.try_borrow_mut().ok()?;
        let allocator = scratch.as_mut()?;
        Some(f(&mut **allocator))
    })
}

pub(crate) fn worker_main(shared: Arc<Shared>, index: usize) {
    if let Some(name) = std::thread::current().name() {
        set_thread_name!(name);
    }
    WORKER.set(Some(WorkerId {
        pool: shared.id,
        index,
    }));
    if let Some(factory) = &shared.scratch_factory {
        let allocator = factory(shared.scratch_size);
        SCRATCH.with_borrow_mut(|scratch| *scratch = Some(allocator));
    }
    log::debug!("job worker {index} started");

    while let Some(task) = shared.queue.pop_blocking() {
        shared.run_task(task);
    }

    SCRATCH.with_borrow_mut(|scratch| *scratch = None);
    WORKER.set(None);
    log::debug!("job worker {index} stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_a_worker_by_default() {
        assert_eq!(current_worker_index(), None);
        assert!(with_scratch_allocator(|_| ()).is_none());
    }
}
