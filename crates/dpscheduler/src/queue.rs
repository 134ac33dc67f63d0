//! A blocking, mid-sequence-repositionable delay queue.
//!
//! Deliberately not a [`std::collections::BinaryHeap`]: a recurring task
//! that gets rescheduled needs to move from wherever it sits back into
//! sorted order, which a heap cannot do without a full rebuild. A plain
//! `VecDeque` kept in sorted order by linear scan is the simplest structure
//! that supports that, and the queues here are expected to hold at most a
//! few hundred entries.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::clock::Clock;
use crate::task::TaskWrapper;

pub(crate) struct DelayQueue {
    clock: Arc<Clock>,
    entries: Mutex<VecDeque<Arc<TaskWrapper>>>,
    not_empty: Condvar,
    stopped: AtomicBool,
    /// Published under `entries`'s lock, read without it: whether this
    /// queue's dispatcher thread has already been started.
    dispatcher_started: AtomicBool,
}

impl DelayQueue {
    pub(crate) fn new(clock: Arc<Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
            stopped: AtomicBool::new(false),
            dispatcher_started: AtomicBool::new(false),
        }
    }

    /// Inserts `task` in sorted position by remaining delay.
    pub(crate) fn add(&self, task: Arc<TaskWrapper>) {
        let mut guard = self.entries.lock();
        self.clock.stop_forcing_update();
        let now = self.clock.update_clock();
        let pos = insert_position(&guard, &task, now);
        guard.insert(pos, task);
        self.clock.resume_forcing_update();
        drop(guard);
        self.not_empty.notify_all();
    }

    /// Appends `task` unconditionally to the back, used when a recurring
    /// task is placed back in the queue immediately after being dequeued
    /// (it reports an effectively infinite delay while executing, so its
    /// sorted position is always last).
    fn add_last(&self, guard: &mut VecDeque<Arc<TaskWrapper>>, task: Arc<TaskWrapper>) {
        guard.push_back(task);
    }

    /// Removes `task` from wherever it currently sits (if present), clears
    /// its "executing" marker, and reinserts it at its new sorted position.
    ///
    /// Reads "now" via [`Clock::accurate_time`] rather than forcing a fresh
    /// OS read: the caller (`TaskWrapper::reschedule`) already froze the
    /// clock around its own `run_time_ms` stamp, and the sort position must
    /// use that exact same instant, not a later one.
    pub(crate) fn reposition(&self, task: Arc<TaskWrapper>) {
        let mut guard = self.entries.lock();
        if let Some(pos) = guard.iter().position(|t| Arc::ptr_eq(t, &task)) {
            guard.remove(pos);
        }
        task.allow_delay_update();
        let now = self.clock.accurate_time();
        let pos = insert_position(&guard, &task, now);
        guard.insert(pos, task);
        drop(guard);
        self.not_empty.notify_all();
    }

    /// Blocks until the head entry's delay has elapsed, then pops and
    /// returns it. If the popped task is a non-cancelled recurring task, it
    /// is marked executing and reinserted at the tail atomically with the
    /// pop, so it is never observably absent from the queue.
    ///
    /// Returns `None` once the queue has been stopped and drained of ready
    /// work.
    pub(crate) fn take(&self) -> Option<Arc<TaskWrapper>> {
        let mut guard = self.entries.lock();
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return None;
            }
            match guard.front().cloned() {
                None => {
                    self.not_empty.wait(&mut guard);
                }
                Some(head) => {
                    let now = self.clock.accurate_time();
                    let delay = head.delay_ms_at(now);
                    if delay <= 0 {
                        guard.pop_front();
                        if head.kind() == crate::task::TaskKind::Recurring && !head.is_canceled() {
                            head.mark_executing();
                            self.add_last(&mut guard, head.clone());
                        }
                        return Some(head);
                    }
                    self.not_empty
                        .wait_for(&mut guard, Duration::from_millis(delay as u64));
                }
            }
        }
    }

    /// Removes `task` from the queue if present. Returns whether it was
    /// found. Used by explicit `remove()` calls against a still-pending
    /// (or, for a recurring task, currently-executing) entry.
    pub(crate) fn remove(&self, task: &Arc<TaskWrapper>) -> bool {
        let mut guard = self.entries.lock();
        if let Some(pos) = guard.iter().position(|t| Arc::ptr_eq(t, task)) {
            guard.remove(pos);
            true
        } else {
            false
        }
    }

    /// Drains all remaining entries, returning them for the caller to
    /// cancel. Used during shutdown.
    pub(crate) fn clear(&self) -> Vec<Arc<TaskWrapper>> {
        self.entries.lock().drain(..).collect()
    }

    /// Wakes any blocked `take()` call; subsequent and in-flight calls
    /// return `None` once they observe the stopped flag.
    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.not_empty.notify_all();
    }

    /// Returns `true` if this call transitioned the dispatcher from
    /// not-started to started. Implements the double-checked lazy start:
    /// callers take the fast, lock-free path on the (overwhelmingly common)
    /// case that a dispatcher is already running.
    pub(crate) fn mark_dispatcher_started(&self) -> bool {
        if self.dispatcher_started.load(Ordering::Acquire) {
            return false;
        }
        let _guard = self.entries.lock();
        if self.dispatcher_started.load(Ordering::Acquire) {
            return false;
        }
        self.dispatcher_started.store(true, Ordering::Release);
        true
    }
}

fn insert_position(
    entries: &VecDeque<Arc<TaskWrapper>>,
    task: &Arc<TaskWrapper>,
    now: u64,
) -> usize {
    let delay = task.delay_ms_at(now);
    entries
        .iter()
        .position(|existing| existing.delay_ms_at(now) > delay)
        .unwrap_or(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;
    use std::sync::atomic::AtomicI32;
    use std::thread;

    fn new_queue() -> (Arc<Clock>, DelayQueue) {
        let clock = Arc::new(Clock::new());
        clock.update_clock();
        (clock.clone(), DelayQueue::new(clock))
    }

    #[test]
    fn take_returns_entries_in_delay_order() {
        let (clock, queue) = new_queue();
        let now = clock.last_known_time();
        let late = TaskWrapper::one_time(Priority::High, now as i64 + 50, Box::new(|| {}));
        let early = TaskWrapper::one_time(Priority::High, now as i64, Box::new(|| {}));
        queue.add(late.clone());
        queue.add(early.clone());

        let first = queue.take().unwrap();
        assert!(Arc::ptr_eq(&first, &early));
    }

    #[test]
    fn recurring_task_is_requeued_atomically_on_take() {
        let (clock, queue) = new_queue();
        let now = clock.last_known_time();
        let task = TaskWrapper::recurring(Priority::Low, now as i64, 1_000, Box::new(|| {}));
        queue.add(task.clone());

        let taken = queue.take().unwrap();
        assert!(Arc::ptr_eq(&taken, &task));
        // Still present (requeued at the tail), now reporting max delay.
        assert!(queue.remove(&task));
    }

    #[test]
    fn canceled_recurring_task_is_not_requeued_on_take() {
        let (clock, queue) = new_queue();
        let now = clock.last_known_time();
        let task = TaskWrapper::recurring(Priority::Low, now as i64, 1_000, Box::new(|| {}));
        task.cancel();
        queue.add(task.clone());

        queue.take().unwrap();
        assert!(!queue.remove(&task));
    }

    #[test]
    fn reposition_moves_task_to_new_sorted_slot() {
        let (clock, queue) = new_queue();
        let now = clock.last_known_time();
        let task = TaskWrapper::recurring(Priority::Low, now as i64, 0, Box::new(|| {}));
        let other = TaskWrapper::one_time(Priority::Low, now as i64 + 10, Box::new(|| {}));
        queue.add(other.clone());
        queue.add(task.clone());
        task.mark_executing();
        queue.reposition(task.clone());
        // allow_delay_update cleared executing and the task's run_time_ms
        // is still `now`, so it should sort back to the front.
        let first = queue.take().unwrap();
        assert!(Arc::ptr_eq(&first, &task));
    }

    #[test]
    fn stop_wakes_a_blocked_take() {
        let clock = Arc::new(Clock::new());
        clock.update_clock();
        let queue = Arc::new(DelayQueue::new(clock));
        let counter = Arc::new(AtomicI32::new(0));
        let c = counter.clone();
        let q = queue.clone();
        let handle = thread::spawn(move || {
            if q.take().is_none() {
                c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        });
        thread::sleep(Duration::from_millis(20));
        queue.stop();
        handle.join().unwrap();
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn mark_dispatcher_started_only_transitions_once() {
        let (_clock, queue) = new_queue();
        assert!(queue.mark_dispatcher_started());
        assert!(!queue.mark_dispatcher_started());
    }
}
