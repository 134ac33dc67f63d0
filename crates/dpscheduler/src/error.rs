//! Error types for the scheduler.

use std::fmt;

/// The error type for scheduler construction, submission, and reconfiguration.
#[derive(Debug)]
pub enum SchedulerError {
    /// `core_pool_size` was zero.
    InvalidCorePoolSize(usize),
    /// `max_pool_size` was smaller than `core_pool_size`.
    InvalidMaxPoolSize {
        /// The core pool size that was configured.
        core: usize,
        /// The max pool size that was rejected.
        max: usize,
    },
    /// A task was submitted after `shutdown()` was called.
    Shutdown,
    /// The OS refused to spawn a worker thread while growing the pool.
    WorkerSpawnFailed(String),
    /// A future-bearing task's closure unwound with a panic.
    TaskPanicked(String),
    /// A future-bearing task was cancelled before it produced a result.
    Cancelled,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCorePoolSize(n) => {
                write!(f, "core_pool_size must be at least 1, got {n}")
            }
            Self::InvalidMaxPoolSize { core, max } => write!(
                f,
                "max_pool_size ({max}) must be greater than or equal to core_pool_size ({core})"
            ),
            Self::Shutdown => write!(f, "scheduler has been shut down"),
            Self::WorkerSpawnFailed(msg) => write!(f, "failed to spawn worker thread: {msg}"),
            Self::TaskPanicked(msg) => write!(f, "task panicked: {msg}"),
            Self::Cancelled => write!(f, "task was cancelled before it ran"),
        }
    }
}

impl std::error::Error for SchedulerError {}

/// A specialized `Result` type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
