//! Worker pool manager: owns the core/max pool bounds, the idle worker
//! list, and the rules for growing, reusing, and shrinking it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::job::Job;
use crate::worker::{Worker, WorkerId};

struct PoolState {
    running: bool,
    current_pool_size: usize,
    /// LIFO for reuse (`pop_back`/`push_back`), FIFO for expiry (`front`):
    /// a freshly idle worker is both the first one handed new work and the
    /// last one to expire.
    available_workers: VecDeque<Arc<Worker>>,
    core_pool_size: usize,
    max_pool_size: usize,
    keep_alive: Duration,
    max_wait_for_low_priority: Duration,
    allow_core_thread_timeout: bool,
}

/// Manages the set of worker threads shared by both priority dispatchers.
pub(crate) struct WorkerPool {
    clock: Arc<Clock>,
    state: Mutex<PoolState>,
    worker_available: Condvar,
    next_worker_id: AtomicU64,
    thread_name_prefix: String,
    stack_size: Option<usize>,
}

enum Acquired {
    New,
    Idle(Arc<Worker>),
}

impl WorkerPool {
    pub(crate) fn new(clock: Arc<Clock>, config: &SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            clock,
            state: Mutex::new(PoolState {
                running: true,
                current_pool_size: 0,
                available_workers: VecDeque::new(),
                core_pool_size: config.core_pool_size,
                max_pool_size: config.max_pool_size,
                keep_alive: config.keep_alive,
                max_wait_for_low_priority: config.max_wait_for_low_priority,
                allow_core_thread_timeout: config.allow_core_thread_timeout,
            }),
            worker_available: Condvar::new(),
            next_worker_id: AtomicU64::new(1),
            thread_name_prefix: config.thread_name_prefix.clone(),
            stack_size: config.stack_size,
        })
    }

    /// Runs `job` on an idle worker if one exists, otherwise grows the pool
    /// up to `max_pool_size`, otherwise waits unconditionally for a worker
    /// to free up. Returns `false` only if the pool was shut down.
    pub(crate) fn run_high_priority_task(self: &Arc<Self>, job: Job) -> bool {
        let acquired = {
            let mut state = self.state.lock();
            if !state.running {
                return false;
            }
            if let Some(worker) = state.available_workers.pop_back() {
                Acquired::Idle(worker)
            } else if state.current_pool_size < state.max_pool_size {
                match self.spawn_worker(&mut state, Some(job.clone())) {
                    Ok(()) => Acquired::New,
                    Err(err) => {
                        tracing::error!(target: "dpscheduler::pool", %err, "failed to grow pool for a high-priority task, falling back to waiting for a worker");
                        match self.wait_for_idle_worker(&mut state, None) {
                            Some(worker) => Acquired::Idle(worker),
                            None => return false,
                        }
                    }
                }
            } else {
                match self.wait_for_idle_worker(&mut state, None) {
                    Some(worker) => Acquired::Idle(worker),
                    None => return false,
                }
            }
        };
        if let Acquired::Idle(worker) = acquired {
            worker.hand_job(job);
        }
        true
    }

    /// Like [`WorkerPool::run_high_priority_task`], but bounds the wait for
    /// an idle worker by `max_wait_for_low_priority` before growing the pool
    /// (below `max_pool_size`), so low-priority bursts prefer reusing an
    /// existing worker over paying for a new thread.
    pub(crate) fn run_low_priority_task(self: &Arc<Self>, job: Job) -> bool {
        let acquired = {
            let mut state = self.state.lock();
            if !state.running {
                return false;
            }
            if let Some(worker) = state.available_workers.pop_back() {
                Acquired::Idle(worker)
            } else if state.current_pool_size >= state.max_pool_size {
                match self.wait_for_idle_worker(&mut state, None) {
                    Some(worker) => Acquired::Idle(worker),
                    None => return false,
                }
            } else {
                let wait = state.max_wait_for_low_priority;
                match self.wait_for_idle_worker(&mut state, Some(wait)) {
                    Some(worker) => Acquired::Idle(worker),
                    None if !state.running => return false,
                    None => {
                        if state.current_pool_size < state.max_pool_size {
                            match self.spawn_worker(&mut state, Some(job.clone())) {
                                Ok(()) => Acquired::New,
                                Err(err) => {
                                    tracing::error!(target: "dpscheduler::pool", %err, "failed to grow pool for a low-priority task, falling back to waiting for a worker");
                                    match self.wait_for_idle_worker(&mut state, None) {
                                        Some(worker) => Acquired::Idle(worker),
                                        None => return false,
                                    }
                                }
                            }
                        } else {
                            match self.wait_for_idle_worker(&mut state, None) {
                                Some(worker) => Acquired::Idle(worker),
                                None => return false,
                            }
                        }
                    }
                }
            }
        };
        if let Acquired::Idle(worker) = acquired {
            worker.hand_job(job);
        }
        true
    }

    /// Called by a worker thread right after it finishes a job. If the pool
    /// is still running, the worker is returned to the idle list (LIFO, so
    /// a recently-used worker is preferred over one that has been idle a
    /// while, letting the rest expire); otherwise it is killed. This runs
    /// on the worker's own thread -- see `kill_worker`'s self-join note.
    pub(crate) fn worker_done(self: &Arc<Self>, worker: Arc<Worker>) {
        let mut state = self.state.lock();
        if !state.running {
            self.kill_worker(&mut state, worker);
        } else {
            state.available_workers.push_back(worker);
            self.expire_idle_workers(&mut state);
        }
        drop(state);
        self.worker_available.notify_all();
    }

    /// Eagerly spawns workers up to `core_pool_size`. Returns the number of
    /// threads actually started.
    pub(crate) fn prestart_all_core_threads(self: &Arc<Self>) -> usize {
        let mut started = 0;
        let mut state = self.state.lock();
        while state.current_pool_size < state.core_pool_size {
            match self.spawn_worker(&mut state, None) {
                Ok(()) => started += 1,
                Err(err) => {
                    tracing::error!(target: "dpscheduler::pool", %err, "failed to prestart worker");
                    break;
                }
            }
        }
        drop(state);
        self.worker_available.notify_all();
        started
    }

    /// Stops accepting new work. Returns `false` if shutdown had already
    /// been initiated.
    pub(crate) fn start_shutdown(&self) -> bool {
        let mut state = self.state.lock();
        if !state.running {
            return false;
        }
        state.running = false;
        drop(state);
        self.worker_available.notify_all();
        true
    }

    pub(crate) fn kill_all_idle_workers(&self) {
        let mut state = self.state.lock();
        while let Some(worker) = state.available_workers.pop_back() {
            self.kill_worker(&mut state, worker);
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        !self.state.lock().running
    }

    pub(crate) fn current_pool_size(&self) -> usize {
        self.state.lock().current_pool_size
    }

    pub(crate) fn idle_worker_count(&self) -> usize {
        self.state.lock().available_workers.len()
    }

    pub(crate) fn core_pool_size(&self) -> usize {
        self.state.lock().core_pool_size
    }

    pub(crate) fn max_pool_size(&self) -> usize {
        self.state.lock().max_pool_size
    }

    pub(crate) fn keep_alive(&self) -> Duration {
        self.state.lock().keep_alive
    }

    pub(crate) fn max_wait_for_low_priority(&self) -> Duration {
        self.state.lock().max_wait_for_low_priority
    }

    pub(crate) fn set_core_pool_size(&self, size: usize) -> crate::error::Result<()> {
        use crate::error::SchedulerError;
        if size == 0 {
            return Err(SchedulerError::InvalidCorePoolSize(size));
        }
        let mut state = self.state.lock();
        if size > state.max_pool_size {
            return Err(SchedulerError::InvalidMaxPoolSize {
                core: size,
                max: state.max_pool_size,
            });
        }
        state.core_pool_size = size;
        self.expire_idle_workers(&mut state);
        Ok(())
    }

    pub(crate) fn set_max_pool_size(&self, size: usize) -> crate::error::Result<()> {
        use crate::error::SchedulerError;
        let mut state = self.state.lock();
        if size < state.core_pool_size {
            return Err(SchedulerError::InvalidMaxPoolSize {
                core: state.core_pool_size,
                max: size,
            });
        }
        state.max_pool_size = size;
        Ok(())
    }

    pub(crate) fn set_keep_alive(&self, keep_alive: Duration) {
        let mut state = self.state.lock();
        state.keep_alive = keep_alive;
        self.expire_idle_workers(&mut state);
    }

    pub(crate) fn set_max_wait_for_low_priority(&self, wait: Duration) {
        self.state.lock().max_wait_for_low_priority = wait;
    }

    pub(crate) fn set_allow_core_thread_timeout(&self, allow: bool) {
        let mut state = self.state.lock();
        state.allow_core_thread_timeout = allow;
        self.expire_idle_workers(&mut state);
    }

    /// Spawns a new worker. If `first_job` is `None`, the worker starts
    /// parked rather than mid-task, so it is pushed onto `available_workers`
    /// immediately -- otherwise it would be invisible to
    /// `run_*_priority_task`'s reuse path and to `kill_all_idle_workers`.
    fn spawn_worker(
        self: &Arc<Self>,
        state: &mut PoolState,
        first_job: Option<Job>,
    ) -> crate::error::Result<()> {
        let id = WorkerId(self.next_worker_id.fetch_add(1, Ordering::Relaxed));
        let starts_parked = first_job.is_none();
        state.current_pool_size += 1;
        match Worker::spawn(
            id,
            first_job,
            self.clone(),
            &self.thread_name_prefix,
            self.stack_size,
        ) {
            Ok(worker) => {
                if starts_parked {
                    state.available_workers.push_back(worker);
                }
                Ok(())
            }
            Err(err) => {
                state.current_pool_size -= 1;
                Err(err)
            }
        }
    }

    /// Signals `worker` to exit and accounts for its departure. Blocks
    /// until the OS thread has actually exited, unless `worker` is the
    /// calling thread itself (a worker discovering its own retirement at
    /// the tail of `worker_done`) -- a thread cannot join itself, and it
    /// will exit on its own the moment this function returns and its run
    /// loop re-checks `running`.
    fn kill_worker(&self, state: &mut PoolState, worker: Arc<Worker>) {
        worker.stop();
        if !worker.is_current_thread() {
            worker.join();
        }
        state.current_pool_size = state.current_pool_size.saturating_sub(1);
    }

    fn wait_for_idle_worker(
        &self,
        state: &mut MutexGuard<'_, PoolState>,
        max_wait: Option<Duration>,
    ) -> Option<Arc<Worker>> {
        let deadline = max_wait.map(|d| Instant::now() + d);
        loop {
            if let Some(worker) = state.available_workers.pop_back() {
                return Some(worker);
            }
            if !state.running {
                return None;
            }
            match deadline {
                None => {
                    self.worker_available.wait(state);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.worker_available.wait_for(state, deadline - now);
                }
            }
        }
    }

    /// Expires idle workers beyond `keep_alive`, oldest-idle first. Only
    /// considers workers beyond `core_pool_size` unless
    /// `allow_core_thread_timeout` is set.
    fn expire_idle_workers(&self, state: &mut PoolState) {
        loop {
            let should_expire = state.available_workers.front().is_some_and(|worker| {
                let over_core = state.current_pool_size > state.core_pool_size
                    || state.allow_core_thread_timeout;
                over_core
                    && self
                        .clock
                        .last_known_time()
                        .saturating_sub(worker.last_run_time_ms())
                        > state.keep_alive.as_millis() as u64
            });
            if !should_expire {
                break;
            }
            let Some(worker) = state.available_workers.pop_front() else {
                break;
            };
            self.kill_worker(state, worker);
        }
    }
}
