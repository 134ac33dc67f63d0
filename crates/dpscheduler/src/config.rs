//! Construction-time configuration for a [`crate::PriorityScheduler`].

use std::time::Duration;

use crate::error::{Result, SchedulerError};
use crate::scheduler::PriorityScheduler;
use crate::task::{Priority, RecurringPanicPolicy};

/// Validated settings used to build a [`PriorityScheduler`].
///
/// Most callers should go through [`SchedulerBuilder`] rather than
/// constructing this directly.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub core_pool_size: usize,
    pub max_pool_size: usize,
    pub keep_alive: Duration,
    pub max_wait_for_low_priority: Duration,
    pub allow_core_thread_timeout: bool,
    pub default_priority: Priority,
    pub recurring_panic_policy: RecurringPanicPolicy,
    pub thread_name_prefix: String,
    pub stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            core_pool_size: 1,
            max_pool_size: 4,
            keep_alive: Duration::from_secs(60),
            max_wait_for_low_priority: Duration::from_millis(500),
            allow_core_thread_timeout: false,
            default_priority: Priority::High,
            recurring_panic_policy: RecurringPanicPolicy::Reschedule,
            thread_name_prefix: "dpscheduler-worker".to_string(),
            stack_size: None,
        }
    }
}

impl SchedulerConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.core_pool_size == 0 {
            return Err(SchedulerError::InvalidCorePoolSize(self.core_pool_size));
        }
        if self.max_pool_size < self.core_pool_size {
            return Err(SchedulerError::InvalidMaxPoolSize {
                core: self.core_pool_size,
                max: self.max_pool_size,
            });
        }
        Ok(())
    }
}

/// Builder for [`SchedulerConfig`] / [`PriorityScheduler`].
#[derive(Debug, Clone, Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Minimum number of worker threads kept alive even when idle (unless
    /// `allow_core_thread_timeout` is set).
    pub fn core_pool_size(mut self, size: usize) -> Self {
        self.config.core_pool_size = size;
        self
    }

    /// Hard upper bound on the number of worker threads.
    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.config.max_pool_size = size;
        self
    }

    /// How long a worker beyond `core_pool_size` may sit idle before it is
    /// torn down.
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// How long a low-priority submission waits for an idle worker before a
    /// new one is grown (while below `max_pool_size`).
    pub fn max_wait_for_low_priority(mut self, wait: Duration) -> Self {
        self.config.max_wait_for_low_priority = wait;
        self
    }

    /// If `true`, even core workers are subject to `keep_alive` expiry.
    pub fn allow_core_thread_timeout(mut self, allow: bool) -> Self {
        self.config.allow_core_thread_timeout = allow;
        self
    }

    /// Priority used by `submit`/`submit_after`/`submit_with_result` when no
    /// priority is given explicitly.
    pub fn default_priority(mut self, priority: Priority) -> Self {
        self.config.default_priority = priority;
        self
    }

    /// What happens to a recurring task's series after its closure panics.
    pub fn recurring_panic_policy(mut self, policy: RecurringPanicPolicy) -> Self {
        self.config.recurring_panic_policy = policy;
        self
    }

    /// Prefix used when naming worker and dispatcher threads.
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Stack size for worker threads. Defaults to the platform default.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = Some(bytes);
        self
    }

    pub fn build(self) -> Result<PriorityScheduler> {
        PriorityScheduler::new(self.config)
    }
}
