//! Wait/notify channel with interruptible sleepers and poll registrations.
//!
//! Waiters do not test a predicate under the queue lock. Instead they take a
//! [`WakeTicket`] while still holding whatever lock guards their condition,
//! drop that lock, and sleep until the queue has been woken at least once
//! since the ticket was issued. A wake-up landing between the unlock and the
//! sleep is therefore never lost, and the predicate itself is only ever read
//! under its own lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use super::Interrupted;
use super::poll_table::{PollTable, PollWaiter};
use super::task::{Task, Wake};

/// Position in a queue's wake sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "a ticket is only useful when waited on"]
pub struct WakeTicket(u64);

/// Key of one poll registration on one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegistrationKey(u64);

impl RegistrationKey {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

struct Inner {
    sequence: u64,
    sleepers: usize,
    registrations: Vec<(RegistrationKey, PollWaiter)>,
}

pub(crate) struct Shared {
    inner: Mutex<Inner>,
    woken: Condvar,
}

impl Wake for Shared {
    fn wake(&self) {
        let _held = self.inner.lock();
        self.woken.notify_all();
    }
}

impl Shared {
    pub(crate) fn unregister(&self, key: RegistrationKey) {
        self.inner.lock().registrations.retain(|(k, _)| *k != key);
    }
}

/// A wait queue. Clones refer to the same queue.
#[derive(Clone)]
pub struct WaitQueue {
    shared: Arc<Shared>,
}

impl WaitQueue {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    sequence: 0,
                    sleepers: 0,
                    registrations: Vec::new(),
                }),
                woken: Condvar::new(),
            }),
        }
    }

    /// Snapshot of the wake sequence. Take it while holding the lock that
    /// guards the condition being waited for.
    pub fn ticket(&self) -> WakeTicket {
        WakeTicket(self.shared.inner.lock().sequence)
    }

    /// Sleeps until the queue is woken after `ticket` was taken.
    ///
    /// Returns immediately if that already happened.
    ///
    /// # Errors
    ///
    /// [`Interrupted`] if `task` is interrupted first; the interrupt is consumed.
    pub fn wait_interruptible(&self, task: &Task, ticket: WakeTicket) -> Result<(), Interrupted> {
        let _parked = task.park_on(Arc::clone(&self.shared) as Arc<dyn Wake>);
        let mut inner = self.shared.inner.lock();
        loop {
            if inner.sequence != ticket.0 {
                return Ok(());
            }
            if task.clear_interrupt() {
                return Err(Interrupted);
            }
            inner.sleepers += 1;
            task.sleep(|| self.shared.woken.wait(&mut inner));
            inner.sleepers -= 1;
        }
    }

    /// Wakes every sleeper and every registered poll waiter.
    ///
    /// Returns how many threads were sleeping on the queue itself.
    pub fn wake_all(&self) -> usize {
        let (sleepers, waiters) = {
            let mut inner = self.shared.inner.lock();
            inner.sequence = inner.sequence.wrapping_add(1);
            self.shared.woken.notify_all();
            let waiters: Vec<PollWaiter> =
                inner.registrations.iter().map(|(_, w)| w.clone()).collect();
            (inner.sleepers, waiters)
        };
        for waiter in waiters {
            waiter.notify();
        }
        sleepers
    }

    /// Adds `table`'s waiter to this queue without blocking. A disarmed
    /// table, or none at all, is a no-op.
    pub fn register(&self, table: Option<&mut PollTable>) {
        let Some(table) = table else { return };
        if !table.is_armed() {
            return;
        }
        let key = RegistrationKey::next();
        self.shared
            .inner
            .lock()
            .registrations
            .push((key, table.waiter().clone()));
        table.record(Arc::clone(&self.shared), key);
    }

    /// Live poll registrations.
    #[must_use]
    pub fn registrations(&self) -> usize {
        self.shared.inner.lock().registrations.len()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::TaskState;
    use std::sync::mpsc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn spawn_sleeper(
        queue: &WaitQueue,
        ticket: WakeTicket,
    ) -> (Task, thread::JoinHandle<Result<(), Interrupted>>) {
        let (tx, rx) = mpsc::channel();
        let queue = queue.clone();
        let handle = thread::spawn(move || {
            let task = Task::current();
            tx.send(task.clone()).unwrap();
            queue.wait_interruptible(&task, ticket)
        });
        let task = rx.recv().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while task.state() != TaskState::Sleeping {
            assert!(Instant::now() < deadline, "sleeper never parked");
            thread::sleep(Duration::from_millis(1));
        }
        (task, handle)
    }

    #[test]
    fn wake_after_ticket_releases_sleeper() {
        let queue = WaitQueue::new();
        let ticket = queue.ticket();
        let (_task, handle) = spawn_sleeper(&queue, ticket);
        assert_eq!(queue.wake_all(), 1);
        assert_eq!(handle.join().unwrap(), Ok(()));
    }

    #[test]
    fn wake_before_wait_is_not_lost() {
        let queue = WaitQueue::new();
        let ticket = queue.ticket();
        queue.wake_all();
        let task = Task::current();
        assert_eq!(queue.wait_interruptible(&task, ticket), Ok(()));
    }

    #[test]
    fn interrupt_wakes_sleeper_with_error() {
        let queue = WaitQueue::new();
        let ticket = queue.ticket();
        let (task, handle) = spawn_sleeper(&queue, ticket);
        task.interrupt();
        assert_eq!(handle.join().unwrap(), Err(Interrupted));
        assert!(!task.is_interrupted());
    }

    #[test]
    fn registration_lives_as_long_as_the_table() {
        let queue = WaitQueue::new();
        let mut table = PollTable::new();
        queue.register(Some(&mut table));
        assert_eq!(queue.registrations(), 1);

        queue.wake_all();
        assert!(table.waiter().is_notified());

        drop(table);
        assert_eq!(queue.registrations(), 0);
    }

    #[test]
    fn disarmed_table_does_not_register() {
        let queue = WaitQueue::new();
        let mut table = PollTable::new();
        table.disarm();
        queue.register(Some(&mut table));
        queue.register(None);
        assert_eq!(queue.registrations(), 0);
    }
}
