//! Registration side of multiplexed waits.
//!
//! A [`PollTable`] lives for one multiplexed wait. Every queue it is
//! registered on notifies its [`PollWaiter`] on `wake_all`, so one thread can
//! sleep on many queues at once. Registrations are removed when the table
//! drops.

use std::sync::Arc;
use std::time::Duration;

use minstant::Instant;
use parking_lot::{Condvar, Mutex};

use super::Interrupted;
use super::task::{Task, Wake};
use super::wait_queue::{RegistrationKey, Shared as QueueShared};

struct Signal {
    notified: Mutex<bool>,
    cond: Condvar,
}

impl Wake for Signal {
    fn wake(&self) {
        let _held = self.notified.lock();
        self.cond.notify_all();
    }
}

/// The sleeping half of a multiplexed wait. Clones share one signal.
#[derive(Clone)]
pub struct PollWaiter {
    signal: Arc<Signal>,
}

impl PollWaiter {
    fn new() -> Self {
        Self {
            signal: Arc::new(Signal {
                notified: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    /// Marks the waiter notified and wakes it.
    pub fn notify(&self) {
        let mut notified = self.signal.notified.lock();
        *notified = true;
        self.signal.cond.notify_all();
    }

    /// Whether a notification is pending.
    #[must_use]
    pub fn is_notified(&self) -> bool {
        *self.signal.notified.lock()
    }

    /// Sleeps until notified, `deadline` passes, or `task` is interrupted.
    ///
    /// Returns `Ok(true)` on notification (consuming it) and `Ok(false)` on
    /// timeout. `None` waits indefinitely.
    ///
    /// # Errors
    ///
    /// [`Interrupted`] if the task is interrupted first; the interrupt is consumed.
    pub fn wait(&self, task: &Task, deadline: Option<Instant>) -> Result<bool, Interrupted> {
        let _parked = task.park_on(Arc::clone(&self.signal) as Arc<dyn Wake>);
        let mut notified = self.signal.notified.lock();
        loop {
            if *notified {
                *notified = false;
                return Ok(true);
            }
            if task.clear_interrupt() {
                return Err(Interrupted);
            }
            match deadline {
                None => task.sleep(|| self.signal.cond.wait(&mut notified)),
                Some(deadline) => {
                    let remaining = remaining_until(deadline);
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                    task.sleep(|| {
                        self.signal.cond.wait_for(&mut notified, remaining);
                    });
                }
            }
        }
    }
}

fn remaining_until(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

/// Collects wait-queue registrations for one multiplexed wait.
pub struct PollTable {
    waiter: PollWaiter,
    armed: bool,
    registrations: Vec<(Arc<QueueShared>, RegistrationKey)>,
}

impl PollTable {
    /// A fresh, armed table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            waiter: PollWaiter::new(),
            armed: true,
            registrations: Vec::new(),
        }
    }

    #[must_use]
    pub const fn waiter(&self) -> &PollWaiter {
        &self.waiter
    }

    /// Whether queues should still register this table.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Stops further registrations. Existing ones stay until drop.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Queues this table is registered on.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub(crate) fn record(&mut self, queue: Arc<QueueShared>, key: RegistrationKey) {
        self.registrations.push((queue, key));
    }
}

impl Default for PollTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PollTable {
    fn drop(&mut self) {
        for (queue, key) in self.registrations.drain(..) {
            queue.unregister(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn times_out_without_notification() {
        let table = PollTable::new();
        let task = Task::current();
        let start = std::time::Instant::now();
        let deadline = Instant::now() + Duration::from_millis(30);
        assert_eq!(table.waiter().wait(&task, Some(deadline)), Ok(false));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn pending_notification_returns_at_once_and_is_consumed() {
        let table = PollTable::new();
        let task = Task::current();
        table.waiter().notify();
        assert_eq!(table.waiter().wait(&task, None), Ok(true));
        assert!(!table.waiter().is_notified());
    }

    #[test]
    fn notify_from_another_thread_wakes_waiter() {
        let table = PollTable::new();
        let waiter = table.waiter().clone();
        let notifier = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waiter.notify();
        });
        let task = Task::current();
        let deadline = Instant::now() + Duration::from_secs(5);
        assert_eq!(table.waiter().wait(&task, Some(deadline)), Ok(true));
        notifier.join().unwrap();
    }
}
