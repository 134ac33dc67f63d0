//! The bundle of context a worker needs to run one dequeued task.

use std::sync::Arc;

use crate::clock::Clock;
use crate::pool::WorkerPool;
use crate::queue::DelayQueue;
use crate::task::{panic_message, RecurringPanicPolicy, TaskKind, TaskWrapper};

/// A single dequeued task, paired with enough of its origin lane to
/// reschedule it if it is recurring.
#[derive(Clone)]
pub(crate) struct Job {
    pub(crate) task: Arc<TaskWrapper>,
    pub(crate) queue: Arc<DelayQueue>,
    pub(crate) clock: Arc<Clock>,
    pub(crate) panic_policy: RecurringPanicPolicy,
    pub(crate) pool: Arc<WorkerPool>,
}

impl Job {
    /// Runs the task, logging (but not propagating) any panic, and
    /// reschedules it if it is a still-live recurring task.
    pub(crate) fn run(self) {
        if self.task.is_canceled() {
            return;
        }
        let outcome = self.task.invoke();
        if let Err(payload) = &outcome {
            tracing::error!(
                target: "dpscheduler::job",
                task_id = self.task.id(),
                message = %panic_message(payload.as_ref()),
                "task panicked",
            );
        }
        if self.task.kind() != TaskKind::Recurring || self.task.is_canceled() {
            return;
        }
        match (&outcome, self.panic_policy) {
            (Err(_), RecurringPanicPolicy::Cancel) => {
                self.task.cancel();
            }
            // Once the pool has stopped running, the queue may already be
            // draining (or drained) under `shutdown`; skip reinsertion
            // rather than requeue into a lane nothing will ever take from
            // again.
            _ if self.pool.is_shutdown() => {}
            _ => {
                self.task.reschedule(&self.queue, &self.clock);
            }
        }
    }
}
