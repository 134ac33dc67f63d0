//! Pool workers: one dedicated thread per worker, handed at most one task
//! at a time through a single-slot `park`/`unpark` handoff.
//!
//! A freshly spawned worker that is created specifically to run a task
//! starts executing that task immediately; it is never placed in the pool's
//! idle list before doing so. Once a worker is idle, handing it a new job
//! is a single pointer-sized store into its slot followed by an `unpark()`
//! call on its thread -- no channel, no allocation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};

use parking_lot::Mutex;

use crate::error::{Result, SchedulerError};
use crate::job::Job;
use crate::pool::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WorkerId(pub(crate) u64);

pub(crate) struct Worker {
    id: WorkerId,
    slot: Mutex<Option<Job>>,
    running: AtomicBool,
    last_run_time_ms: AtomicU64,
    park_thread: OnceLock<Thread>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Spawns a new worker thread. If `first_job` is `Some`, the thread
    /// runs it immediately, before ever checking its slot. If `None`, the
    /// worker starts parked, ready to receive a job via [`Worker::hand_job`]
    /// (used by `prestart_all_core_threads`).
    pub(crate) fn spawn(
        id: WorkerId,
        first_job: Option<Job>,
        pool: Arc<WorkerPool>,
        name_prefix: &str,
        stack_size: Option<usize>,
    ) -> Result<Arc<Worker>> {
        let worker = Arc::new(Worker {
            id,
            slot: Mutex::new(None),
            running: AtomicBool::new(true),
            last_run_time_ms: AtomicU64::new(0),
            park_thread: OnceLock::new(),
            join: Mutex::new(None),
        });

        let thread_worker = worker.clone();
        let mut builder = thread::Builder::new().name(format!("{name_prefix}-{}", id.0));
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }
        let handle = builder
            .spawn(move || thread_worker.run_loop(first_job, pool))
            .map_err(|err| SchedulerError::WorkerSpawnFailed(err.to_string()))?;

        // Obtained synchronously from the `JoinHandle`, without waiting for
        // the spawned thread to actually start running. Nothing else can
        // observe `worker` until this function returns, so this is set
        // before any call to `hand_job`/`stop` could race it.
        worker
            .park_thread
            .set(handle.thread().clone())
            .expect("park_thread is set exactly once, before the worker is published");
        *worker.join.lock() = Some(handle);
        Ok(worker)
    }

    pub(crate) fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn last_run_time_ms(&self) -> u64 {
        self.last_run_time_ms.load(Ordering::Acquire)
    }

    /// Whether the calling thread *is* this worker's own OS thread. A
    /// worker discovering its own retirement (from inside `worker_done`,
    /// called at the tail of its own run loop) must never try to join
    /// itself.
    pub(crate) fn is_current_thread(&self) -> bool {
        self.park_thread
            .get()
            .is_some_and(|t| t.id() == thread::current().id())
    }

    /// Hands `job` to an idle worker and wakes its thread.
    pub(crate) fn hand_job(&self, job: Job) {
        let mut guard = self.slot.lock();
        debug_assert!(guard.is_none(), "worker already holds a pending job");
        *guard = Some(job);
        drop(guard);
        self.unpark();
    }

    /// Signals the worker to exit after finishing (or instead of starting)
    /// its next task, and wakes it in case it is parked.
    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.unpark();
    }

    fn unpark(&self) {
        if let Some(thread) = self.park_thread.get() {
            thread.unpark();
        }
    }

    /// Blocks until this worker's OS thread has actually exited. Called
    /// after `stop()` when a caller (pool shutdown, core-size shrink) needs
    /// a deterministic point at which the thread is gone.
    pub(crate) fn join(&self) {
        if let Some(handle) = self.join.lock().take() {
            let _ = handle.join();
        }
    }

    fn run_loop(self: Arc<Self>, first_job: Option<Job>, pool: Arc<WorkerPool>) {
        let mut pending = first_job;
        loop {
            let job = match pending.take() {
                Some(job) => job,
                None => match self.park_for_next() {
                    Some(job) => job,
                    None => return,
                },
            };
            let clock = job.clock.clone();
            job.run();
            if !self.running.load(Ordering::Acquire) {
                return;
            }
            self.last_run_time_ms
                .store(clock.last_known_time(), Ordering::Release);
            pool.worker_done(self.clone());
        }
    }

    fn park_for_next(&self) -> Option<Job> {
        loop {
            if !self.running.load(Ordering::Acquire) {
                return None;
            }
            if let Some(job) = self.slot.lock().take() {
                return Some(job);
            }
            thread::park();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}
