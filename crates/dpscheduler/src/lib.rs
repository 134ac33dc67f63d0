//! A two-priority, dynamically-sized task scheduler.
//!
//! [`PriorityScheduler`] runs one-time and recurring closures on a shared
//! pool of worker threads that grows between a core and a maximum size and
//! shrinks idle workers back down after a configurable keep-alive. Work is
//! submitted under [`Priority::High`] or [`Priority::Low`]: each priority is
//! served by its own ordered delay queue and dispatcher thread, with
//! low-priority submissions preferring to wait for an existing worker to
//! free up rather than immediately growing the pool.
//!
//! # Example
//!
//! ```no_run
//! use dpscheduler::{Priority, SchedulerConfig};
//! use dpscheduler::PriorityScheduler;
//! use std::time::Duration;
//!
//! let scheduler = PriorityScheduler::new(SchedulerConfig::default())?;
//!
//! // Fire once, right away.
//! scheduler.submit(|| println!("hello"))?;
//!
//! // Fire once, after a delay, at low priority.
//! scheduler.submit_after_with_priority(Duration::from_millis(500), Priority::Low, || {
//!     println!("low priority, delayed");
//! })?;
//!
//! // Fire every second, starting immediately.
//! let handle = scheduler.schedule_recurring(
//!     Duration::ZERO,
//!     Duration::from_secs(1),
//!     Priority::High,
//!     || println!("tick"),
//! )?;
//!
//! // Stop the recurring series.
//! scheduler.remove(&handle);
//!
//! scheduler.shutdown();
//! # Ok::<(), dpscheduler::SchedulerError>(())
//! ```

#![warn(missing_docs)]

mod clock;
mod config;
mod dispatcher;
mod error;
mod job;
mod pool;
mod queue;
mod scheduler;
mod task;
mod worker;

pub use config::{SchedulerBuilder, SchedulerConfig};
pub use error::{Result, SchedulerError};
pub use scheduler::PriorityScheduler;
pub use task::{Priority, RecurringPanicPolicy, TaskHandle, TaskToken};
