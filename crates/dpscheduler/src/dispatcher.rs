//! Per-priority dispatcher thread: blocks on its queue's `take()` and hands
//! each ready task to the worker pool.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::job::Job;
use crate::pool::WorkerPool;
use crate::queue::DelayQueue;
use crate::task::{Priority, RecurringPanicPolicy};

pub(crate) struct Dispatcher {
    priority: Priority,
    queue: Arc<DelayQueue>,
    pool: Arc<WorkerPool>,
    clock: Arc<Clock>,
    panic_policy: RecurringPanicPolicy,
    thread_name: String,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub(crate) fn new(
        priority: Priority,
        queue: Arc<DelayQueue>,
        pool: Arc<WorkerPool>,
        clock: Arc<Clock>,
        panic_policy: RecurringPanicPolicy,
        thread_name: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            priority,
            queue,
            pool,
            clock,
            panic_policy,
            thread_name,
            join: Mutex::new(None),
        })
    }

    /// Starts this dispatcher's thread the first time it is called;
    /// subsequent calls are a cheap no-op. Safe to call on every
    /// submission, since most of those calls take the lock-free fast path.
    pub(crate) fn maybe_start(self: &Arc<Self>) {
        if !self.queue.mark_dispatcher_started() {
            return;
        }
        let this = self.clone();
        let handle = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || this.run())
            .expect("failed to spawn dispatcher thread");
        *self.join.lock() = Some(handle);
    }

    /// Blocks until the dispatcher's thread (if ever started) has exited.
    pub(crate) fn join(&self) {
        if let Some(handle) = self.join.lock().take() {
            let _ = handle.join();
        }
    }

    fn run(self: Arc<Self>) {
        loop {
            let Some(task) = self.queue.take() else {
                break;
            };
            let job = Job {
                task,
                queue: self.queue.clone(),
                clock: self.clock.clone(),
                panic_policy: self.panic_policy,
                pool: self.pool.clone(),
            };
            let accepted = match self.priority {
                Priority::High => self.pool.run_high_priority_task(job),
                Priority::Low => self.pool.run_low_priority_task(job),
            };
            if !accepted {
                tracing::debug!(
                    target: "dpscheduler::dispatcher",
                    priority = ?self.priority,
                    "pool rejected a dequeued task; shutdown must be in progress",
                );
            }
        }
        tracing::debug!(target: "dpscheduler::dispatcher", priority = ?self.priority, "dispatcher stopped");
    }
}
