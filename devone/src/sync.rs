//! Blocking primitives shared by the device and its callers.
//!
//! - [`Task`]: who is calling, whether it is asleep, and its pending interrupt.
//! - [`SleepLock`]: mutual exclusion that can be held across slow work and
//!   waited for interruptibly.
//! - [`WaitQueue`]: wait/notify with wake tickets and poll registrations.
//! - [`PollTable`] / [`PollWaiter`]: one thread sleeping on many queues.
//!
//! Every sleep here is woken directly by [`Task::interrupt`]; nothing polls
//! on a timer to notice cancellation.

mod poll_table;
mod sleep_lock;
mod task;
mod wait_queue;

use thiserror::Error;

pub use poll_table::{PollTable, PollWaiter};
pub use sleep_lock::{SleepLock, SleepLockGuard};
pub use task::{Task, TaskId, TaskState};
pub use wait_queue::{WaitQueue, WakeTicket};

/// A wait was abandoned because the sleeping task was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupted while waiting")]
pub struct Interrupted;
