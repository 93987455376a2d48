//! Per-thread run queue for completion callbacks
//!
//! A device may complete a read inline, so a completion that issues the next read would
//! otherwise recurse once per hop. The first job on a thread becomes the drain loop; jobs
//! scheduled while it runs are queued and executed after the current one returns.

use std::cell::RefCell;
use std::collections::VecDeque;

type Job = Box<dyn FnOnce() + 'static>;

#[derive(Default)]
struct RunQueue {
    active: bool,
    jobs: VecDeque<Job>,
}

thread_local! {
    static RUN_QUEUE: RefCell<RunQueue> = RefCell::new(RunQueue::default());
}

/// Resets the queue if a job unwinds
struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        RUN_QUEUE.with(|q| {
            let mut q = q.borrow_mut();
            q.active = false;
            q.jobs.clear();
        });
    }
}

/// Run `job` now, or after the job currently draining on this thread.
pub(crate) fn run(job: Job) {
    let first = RUN_QUEUE.with(|q| {
        let mut q = q.borrow_mut();
        if q.active {
            q.jobs.push_back(job);
            None
        } else {
            q.active = true;
            Some(job)
        }
    });
    let Some(mut job) = first else {
        return;
    };

    let _guard = DrainGuard;
    loop {
        job();
        match RUN_QUEUE.with(|q| q.borrow_mut().jobs.pop_front()) {
            Some(next) => job = next,
            None => break,
        }
    }
}

/// Current queue depth on this thread
#[cfg(test)]
fn depth() -> usize {
    RUN_QUEUE.with(|q| q.borrow().jobs.len())
}
