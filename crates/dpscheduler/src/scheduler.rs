//! The public scheduler facade.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Result, SchedulerError};
use crate::pool::WorkerPool;
use crate::queue::DelayQueue;
use crate::task::{
    build_future_closure, handle_from_parts, Priority, TaskHandle, TaskToken, TaskWrapper,
};

struct Lane {
    queue: Arc<DelayQueue>,
    dispatcher: Arc<Dispatcher>,
}

struct SchedulerInner {
    clock: Arc<Clock>,
    pool: Arc<WorkerPool>,
    high: Lane,
    low: Lane,
    default_priority: Priority,
}

/// A two-priority, dynamically-sized task scheduler.
///
/// Submissions land on a `High` or `Low` priority lane, each served by its
/// own dispatcher thread draining into a shared worker pool that grows
/// between `core_pool_size` and `max_pool_size` and shrinks idle workers
/// back down after `keep_alive`.
///
/// Cloning a `PriorityScheduler` is cheap (it is a handle around an `Arc`)
/// and shares the same underlying pool and queues.
#[derive(Clone)]
pub struct PriorityScheduler {
    inner: Arc<SchedulerInner>,
}

impl PriorityScheduler {
    /// Builds a scheduler from `config`.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let clock = Arc::new(Clock::new());
        clock.update_clock();
        let pool = WorkerPool::new(clock.clone(), &config);

        let high_queue = Arc::new(DelayQueue::new(clock.clone()));
        let low_queue = Arc::new(DelayQueue::new(clock.clone()));
        let high_dispatcher = Dispatcher::new(
            Priority::High,
            high_queue.clone(),
            pool.clone(),
            clock.clone(),
            config.recurring_panic_policy,
            format!("{}-high-dispatcher", config.thread_name_prefix),
        );
        let low_dispatcher = Dispatcher::new(
            Priority::Low,
            low_queue.clone(),
            pool.clone(),
            clock.clone(),
            config.recurring_panic_policy,
            format!("{}-low-dispatcher", config.thread_name_prefix),
        );

        Ok(Self {
            inner: Arc::new(SchedulerInner {
                clock,
                pool,
                high: Lane {
                    queue: high_queue,
                    dispatcher: high_dispatcher,
                },
                low: Lane {
                    queue: low_queue,
                    dispatcher: low_dispatcher,
                },
                default_priority: config.default_priority,
            }),
        })
    }

    /// Starts building a scheduler with [`crate::SchedulerBuilder`].
    pub fn builder() -> crate::SchedulerBuilder {
        crate::SchedulerBuilder::new()
    }

    fn lane(&self, priority: Priority) -> &Lane {
        match priority {
            Priority::High => &self.inner.high,
            Priority::Low => &self.inner.low,
        }
    }

    fn enqueue_run_time_ms(&self, delay: Duration) -> i64 {
        let now = self.inner.clock.accurate_time();
        now as i64 + delay.as_millis() as i64
    }

    /// Submits a one-time task at the scheduler's default priority, to run
    /// as soon as a worker is available.
    pub fn submit(&self, task: impl FnOnce() + Send + 'static) -> Result<TaskToken> {
        self.submit_after_with_priority(Duration::ZERO, self.inner.default_priority, task)
    }

    /// Submits a one-time task at `priority`.
    pub fn submit_with_priority(
        &self,
        priority: Priority,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<TaskToken> {
        self.submit_after_with_priority(Duration::ZERO, priority, task)
    }

    /// Submits a one-time task at the scheduler's default priority, to run
    /// no sooner than `delay` from now.
    pub fn submit_after(
        &self,
        delay: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<TaskToken> {
        self.submit_after_with_priority(delay, self.inner.default_priority, task)
    }

    /// Submits a one-time task at `priority`, to run no sooner than `delay`
    /// from now.
    pub fn submit_after_with_priority(
        &self,
        delay: Duration,
        priority: Priority,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<TaskToken> {
        if self.is_shutdown() {
            return Err(SchedulerError::Shutdown);
        }
        let run_time_ms = self.enqueue_run_time_ms(delay);
        let mut once = Some(task);
        let boxed: Box<dyn FnMut() + Send> = Box::new(move || {
            if let Some(f) = once.take() {
                f();
            }
        });
        let wrapper = TaskWrapper::one_time(priority, run_time_ms, boxed);
        self.enqueue(priority, wrapper.clone());
        Ok(TaskToken { task: wrapper })
    }

    /// Submits a one-time task at the scheduler's default priority and
    /// returns a handle to its eventual result.
    pub fn submit_with_result<F, T>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit_with_result_after(Duration::ZERO, self.inner.default_priority, task)
    }

    /// Submits a one-time task at `priority`, to run no sooner than `delay`
    /// from now, returning a handle to its eventual result.
    pub fn submit_with_result_after<F, T>(
        &self,
        delay: Duration,
        priority: Priority,
        task: F,
    ) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shutdown() {
            return Err(SchedulerError::Shutdown);
        }
        let run_time_ms = self.enqueue_run_time_ms(delay);
        let (boxed, state) = build_future_closure(task);
        let wrapper = TaskWrapper::one_time(priority, run_time_ms, boxed);
        self.enqueue(priority, wrapper.clone());
        Ok(handle_from_parts(wrapper, state))
    }

    /// Schedules a recurring task: first occurrence after `initial_delay`,
    /// subsequent ones `recurring_delay` after each occurrence finishes.
    pub fn schedule_recurring(
        &self,
        initial_delay: Duration,
        recurring_delay: Duration,
        priority: Priority,
        task: impl FnMut() + Send + 'static,
    ) -> Result<TaskToken> {
        if self.is_shutdown() {
            return Err(SchedulerError::Shutdown);
        }
        let run_time_ms = self.enqueue_run_time_ms(initial_delay);
        let boxed: Box<dyn FnMut() + Send> = Box::new(task);
        let wrapper = TaskWrapper::recurring(
            priority,
            run_time_ms,
            recurring_delay.as_millis() as i64,
            boxed,
        );
        self.enqueue(priority, wrapper.clone());
        Ok(TaskToken { task: wrapper })
    }

    fn enqueue(&self, priority: Priority, wrapper: Arc<TaskWrapper>) {
        let lane = self.lane(priority);
        lane.queue.add(wrapper);
        lane.dispatcher.maybe_start();
    }

    /// Cancels and removes `token`'s task if it is still pending (or, for a
    /// recurring task, currently out with a worker). Returns whether it was
    /// found.
    pub fn remove(&self, token: &TaskToken) -> bool {
        if self.inner.high.queue.remove(&token.task) {
            token.task.cancel();
            return true;
        }
        if self.inner.low.queue.remove(&token.task) {
            token.task.cancel();
            return true;
        }
        false
    }

    /// Eagerly spawns workers up to `core_pool_size`. Returns how many
    /// threads were actually started.
    pub fn prestart_all_core_threads(&self) -> usize {
        self.inner.pool.prestart_all_core_threads()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.pool.is_shutdown()
    }

    pub fn current_pool_size(&self) -> usize {
        self.inner.pool.current_pool_size()
    }

    pub fn idle_worker_count(&self) -> usize {
        self.inner.pool.idle_worker_count()
    }

    pub fn core_pool_size(&self) -> usize {
        self.inner.pool.core_pool_size()
    }

    pub fn max_pool_size(&self) -> usize {
        self.inner.pool.max_pool_size()
    }

    pub fn keep_alive(&self) -> Duration {
        self.inner.pool.keep_alive()
    }

    pub fn max_wait_for_low_priority(&self) -> Duration {
        self.inner.pool.max_wait_for_low_priority()
    }

    pub fn default_priority(&self) -> Priority {
        self.inner.default_priority
    }

    pub fn set_core_pool_size(&self, size: usize) -> Result<()> {
        self.inner.pool.set_core_pool_size(size)
    }

    pub fn set_max_pool_size(&self, size: usize) -> Result<()> {
        self.inner.pool.set_max_pool_size(size)
    }

    pub fn set_keep_alive(&self, keep_alive: Duration) {
        self.inner.pool.set_keep_alive(keep_alive)
    }

    pub fn set_max_wait_for_low_priority(&self, wait: Duration) {
        self.inner.pool.set_max_wait_for_low_priority(wait)
    }

    pub fn set_allow_core_thread_timeout(&self, allow: bool) {
        self.inner.pool.set_allow_core_thread_timeout(allow)
    }

    /// Stops accepting new submissions, lets in-flight tasks finish,
    /// cancels everything still queued, and joins both dispatcher threads.
    /// Idempotent: a second call is a no-op.
    pub fn shutdown(&self) {
        if !self.inner.pool.start_shutdown() {
            return;
        }
        self.inner.high.queue.stop();
        self.inner.low.queue.stop();
        self.inner.high.dispatcher.join();
        self.inner.low.dispatcher.join();
        for task in self.inner.high.queue.clear() {
            task.cancel();
        }
        for task in self.inner.low.queue.clear() {
            task.cancel();
        }
        self.inner.pool.kill_all_idle_workers();
    }
}

impl Drop for PriorityScheduler {
    fn drop(&mut self) {
        // Only the last handle triggers the signal-only shutdown; cloned
        // handles elsewhere in the program should keep the scheduler alive.
        if Arc::strong_count(&self.inner) == 1 {
            self.inner.pool.start_shutdown();
            self.inner.high.queue.stop();
            self.inner.low.queue.stop();
        }
    }
}
