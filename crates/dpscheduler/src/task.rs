//! Task wrappers: the unit the queues, dispatchers, and workers move around.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::Clock;
use crate::error::{Result, SchedulerError};
use crate::queue::DelayQueue;

/// The lane a task runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Runs ahead of `Low` priority work whenever both lanes have ready tasks.
    High,
    /// Background work; may wait behind `High` tasks and behind
    /// `max_wait_for_low_priority` before a new worker is grown for it.
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    OneTime,
    Recurring,
}

/// What happens to a recurring task's series after its closure panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurringPanicPolicy {
    /// Reschedule the next occurrence as if the run had completed normally.
    Reschedule,
    /// Cancel the series; no further occurrences run.
    Cancel,
}

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A queued unit of work, shared between the queue, the dispatcher, and the
/// worker that eventually runs it.
pub(crate) struct TaskWrapper {
    id: u64,
    priority: Priority,
    kind: TaskKind,
    canceled: AtomicBool,
    executing: AtomicBool,
    run_time_ms: AtomicI64,
    recurring_delay_ms: i64,
    action: Mutex<Box<dyn FnMut() + Send>>,
}

impl TaskWrapper {
    pub(crate) fn one_time(
        priority: Priority,
        run_time_ms: i64,
        action: Box<dyn FnMut() + Send>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            priority,
            kind: TaskKind::OneTime,
            canceled: AtomicBool::new(false),
            executing: AtomicBool::new(false),
            run_time_ms: AtomicI64::new(run_time_ms),
            recurring_delay_ms: 0,
            action: Mutex::new(action),
        })
    }

    pub(crate) fn recurring(
        priority: Priority,
        first_run_time_ms: i64,
        recurring_delay_ms: i64,
        action: Box<dyn FnMut() + Send>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
            priority,
            kind: TaskKind::Recurring,
            canceled: AtomicBool::new(false),
            executing: AtomicBool::new(false),
            run_time_ms: AtomicI64::new(first_run_time_ms),
            recurring_delay_ms,
            action: Mutex::new(action),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn priority(&self) -> Priority {
        self.priority
    }

    pub(crate) fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Cancels the task. Returns `true` if this call performed the
    /// cancellation (idempotent: later calls return `false`).
    pub(crate) fn cancel(&self) -> bool {
        !self.canceled.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub(crate) fn mark_executing(&self) {
        self.executing.store(true, Ordering::Release);
    }

    /// Clears the "currently executing" marker so a fresh delay can be read
    /// for this task again. Called while repositioning a rescheduled
    /// recurring task back into its queue.
    pub(crate) fn allow_delay_update(&self) {
        self.executing.store(false, Ordering::Release);
    }

    /// This task's remaining delay relative to `now`, in milliseconds. A
    /// recurring task that is marked executing reports `i64::MAX` so it
    /// never sorts to the front of its queue while its current run is out
    /// with a worker.
    pub(crate) fn delay_ms_at(&self, now: u64) -> i64 {
        if self.kind == TaskKind::Recurring && self.executing.load(Ordering::Acquire) {
            return i64::MAX;
        }
        self.run_time_ms.load(Ordering::Acquire) - now as i64
    }

    /// Runs the task's closure, catching any panic. Intended to be called
    /// from exactly one worker thread at a time.
    pub(crate) fn invoke(&self) -> std::thread::Result<()> {
        let mut guard = self.action.lock();
        panic::catch_unwind(AssertUnwindSafe(|| (&mut *guard)()))
    }

    /// Computes the next occurrence's run time and reinserts this task into
    /// `queue` at its new sorted position. Only meaningful for recurring
    /// tasks.
    ///
    /// Freezes the clock for the whole operation so the `run_time_ms` stamp
    /// written here and the sort position `queue.reposition` computes from
    /// it are derived from the same "now" -- two independent reads could
    /// disagree and violate the queue's ordering.
    pub(crate) fn reschedule(self: &Arc<Self>, queue: &DelayQueue, clock: &Clock) {
        clock.stop_forcing_update();
        let now = clock.update_clock();
        self.run_time_ms
            .store(now as i64 + self.recurring_delay_ms, Ordering::Release);
        queue.reposition(self.clone());
        clock.resume_forcing_update();
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

/// A single-fire wakeup, used by [`TaskHandle`] to let a waiter block until a
/// future-bearing task finishes (or is cancelled).
struct TaskWakeup {
    ready: AtomicBool,
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl TaskWakeup {
    fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    fn wake(&self) {
        let _guard = self.mutex.lock();
        self.ready.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    fn wait(&self) {
        let mut guard = self.mutex.lock();
        while !self.ready.load(Ordering::Acquire) {
            self.condvar.wait(&mut guard);
        }
    }

    /// Returns `true` if the wakeup fired before the timeout elapsed.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.mutex.lock();
        if self.ready.load(Ordering::Acquire) {
            return true;
        }
        let result = self.condvar.wait_for(&mut guard, timeout);
        self.ready.load(Ordering::Acquire) || !result.timed_out()
    }
}

enum Outcome<T> {
    Value(T),
    Panicked(String),
}

pub(crate) struct FutureState<T> {
    started: AtomicBool,
    done: AtomicBool,
    wakeup: TaskWakeup,
    slot: Mutex<Option<Outcome<T>>>,
}

impl<T> FutureState<T> {
    fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            done: AtomicBool::new(false),
            wakeup: TaskWakeup::new(),
            slot: Mutex::new(None),
        }
    }
}

/// A handle to a future-bearing task's eventual result.
///
/// Superset of a plain one-time task: in addition to cancellation, it lets a
/// caller block for (or poll) the closure's return value.
pub struct TaskHandle<T> {
    pub(crate) task: Arc<TaskWrapper>,
    state: Arc<FutureState<T>>,
}

impl<T: Send + 'static> TaskHandle<T> {
    /// `true` once the task has produced a result (or panicked).
    pub fn is_finished(&self) -> bool {
        self.state.done.load(Ordering::Acquire)
    }

    /// `true` if this task was cancelled (whether or not it ever ran).
    pub fn is_cancelled(&self) -> bool {
        self.task.is_canceled()
    }

    /// Cancels the task. Succeeds only if the task has not started running
    /// yet; returns whether this call performed the cancellation.
    pub fn cancel(&self) -> bool {
        if self.state.started.load(Ordering::Acquire) {
            false
        } else {
            let cancelled_now = self.task.cancel();
            self.state.wakeup.wake();
            cancelled_now
        }
    }

    /// Returns the result without blocking if it is already available.
    pub fn try_get(&self) -> Option<Result<T>> {
        if !self.state.done.load(Ordering::Acquire) {
            return None;
        }
        self.take_outcome()
    }

    /// Blocks until the task finishes (or was cancelled before running),
    /// then returns its result.
    pub fn wait(self) -> Result<T> {
        self.state.wakeup.wait();
        self.take_outcome().unwrap_or(Err(SchedulerError::Cancelled))
    }

    /// Blocks for up to `timeout`. Returns `None` if the deadline elapses
    /// before the task finishes.
    pub fn wait_timeout(self, timeout: Duration) -> Option<Result<T>> {
        if self.state.wakeup.wait_timeout(timeout) {
            Some(self.take_outcome().unwrap_or(Err(SchedulerError::Cancelled)))
        } else {
            None
        }
    }

    fn take_outcome(&self) -> Option<Result<T>> {
        let mut slot = self.state.slot.lock();
        slot.take().map(|outcome| match outcome {
            Outcome::Value(v) => Ok(v),
            Outcome::Panicked(msg) => Err(SchedulerError::TaskPanicked(msg)),
        })
    }
}

/// Builds the boxed closure and paired [`FutureState`] for a future-bearing
/// one-time task, wiring up the wakeup and result slot.
pub(crate) fn build_future_closure<F, T>(task: F) -> (Box<dyn FnMut() + Send>, Arc<FutureState<T>>)
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::new(FutureState::<T>::new());
    let state_for_closure = state.clone();
    let mut once = Some(task);
    let boxed: Box<dyn FnMut() + Send> = Box::new(move || {
        state_for_closure.started.store(true, Ordering::Release);
        if let Some(f) = once.take() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            let mut slot = state_for_closure.slot.lock();
            *slot = Some(match outcome {
                Ok(v) => Outcome::Value(v),
                Err(e) => Outcome::Panicked(panic_message(&*e)),
            });
        }
        state_for_closure.done.store(true, Ordering::Release);
        state_for_closure.wakeup.wake();
    });
    (boxed, state)
}

pub(crate) fn handle_from_parts<T>(
    task: Arc<TaskWrapper>,
    state: Arc<FutureState<T>>,
) -> TaskHandle<T> {
    TaskHandle { task, state }
}

/// A lightweight handle to a submitted task, usable to cancel it or pass to
/// [`crate::PriorityScheduler::remove`].
#[derive(Clone)]
pub struct TaskToken {
    pub(crate) task: Arc<TaskWrapper>,
}

impl TaskToken {
    pub fn cancel(&self) -> bool {
        self.task.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.task.is_canceled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn one_time_task_delay_counts_down() {
        let t = TaskWrapper::one_time(Priority::High, 1_000, Box::new(|| {}));
        assert_eq!(t.delay_ms_at(0), 1_000);
        assert_eq!(t.delay_ms_at(1_000), 0);
        assert_eq!(t.delay_ms_at(1_500), -500);
    }

    #[test]
    fn recurring_task_reports_max_delay_while_executing() {
        let t = TaskWrapper::recurring(Priority::Low, 0, 100, Box::new(|| {}));
        t.mark_executing();
        assert_eq!(t.delay_ms_at(0), i64::MAX);
        t.allow_delay_update();
        assert_eq!(t.delay_ms_at(0), 0);
    }

    #[test]
    fn cancel_is_idempotent_and_reports_first_caller() {
        let t = TaskWrapper::one_time(Priority::High, 0, Box::new(|| {}));
        assert!(t.cancel());
        assert!(!t.cancel());
        assert!(t.is_canceled());
    }

    #[test]
    fn invoke_catches_panics() {
        let t = TaskWrapper::one_time(
            Priority::High,
            0,
            Box::new(|| panic!("boom")),
        );
        assert!(t.invoke().is_err());
    }

    #[test]
    fn invoke_runs_closure_and_observes_side_effects() {
        let counter = Arc::new(AtomicI32::new(0));
        let c = counter.clone();
        let t = TaskWrapper::one_time(
            Priority::High,
            0,
            Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        t.invoke().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn future_handle_delivers_result() {
        let (boxed, state) = build_future_closure(|| 42);
        let task = TaskWrapper::one_time(Priority::High, 0, boxed);
        let handle = handle_from_parts(task, state);
        task_invoke(&handle);
        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn future_handle_reports_panic_as_task_panicked() {
        let (boxed, state) = build_future_closure(|| -> i32 { panic!("nope") });
        let task = TaskWrapper::one_time(Priority::High, 0, boxed);
        let handle = handle_from_parts(task, state);
        task_invoke(&handle);
        match handle.wait() {
            Err(SchedulerError::TaskPanicked(_)) => {}
            other => panic!("expected TaskPanicked, got {other:?}"),
        }
    }

    #[test]
    fn cancel_before_start_prevents_further_cancellation() {
        let (boxed, state) = build_future_closure(|| 1);
        let task = TaskWrapper::one_time(Priority::High, 10_000, boxed);
        let handle = handle_from_parts(task, state);
        assert!(handle.cancel());
        assert!(handle.is_cancelled());
        match handle.wait() {
            Err(SchedulerError::Cancelled) => {}
            other => panic!("expected Cancelled, got {other:?}"),
        }
    }

    fn task_invoke<T>(handle: &TaskHandle<T>) {
        let _ = handle.task.invoke();
    }
}
