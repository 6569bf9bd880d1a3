//! A sleeping mutual-exclusion lock with interruptible acquisition.
//!
//! Unlike `parking_lot::Mutex`, a [`SleepLock`] may be held across arbitrary
//! work (copying out to a caller buffer, re-arming a timer) and waiting for it
//! can be abandoned when the waiting task is interrupted. The inner mutex only
//! protects the `locked` flag and is never held while the lock is.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::Interrupted;
use super::task::{Task, Wake};

struct Gate {
    locked: Mutex<bool>,
    released: Condvar,
}

impl Wake for Gate {
    fn wake(&self) {
        let _held = self.locked.lock();
        self.released.notify_all();
    }
}

/// Binary sleeping lock owning `T`.
pub struct SleepLock<T> {
    gate: Arc<Gate>,
    value: UnsafeCell<T>,
}

// SAFETY: `value` is only reachable through a `SleepLockGuard`, and the
// `locked` flag guarantees at most one guard exists at a time.
unsafe impl<T: Send> Send for SleepLock<T> {}
// SAFETY: as above; shared access hands out `&mut T` to one holder only.
unsafe impl<T: Send> Sync for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            gate: Arc::new(Gate {
                locked: Mutex::new(false),
                released: Condvar::new(),
            }),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock, sleeping uninterruptibly while it is held elsewhere.
    pub fn lock(&self) -> SleepLockGuard<'_, T> {
        let task = Task::current();
        let mut locked = self.gate.locked.lock();
        while *locked {
            task.sleep(|| self.gate.released.wait(&mut locked));
        }
        *locked = true;
        SleepLockGuard::new(self)
    }

    /// Acquires the lock unless `task` is interrupted while waiting.
    ///
    /// A free lock is taken even with an interrupt pending; the interrupt
    /// stays pending for the next wait.
    ///
    /// # Errors
    ///
    /// [`Interrupted`] if the task was interrupted before the lock came free.
    /// The interrupt is consumed.
    pub fn lock_interruptible(&self, task: &Task) -> Result<SleepLockGuard<'_, T>, Interrupted> {
        let mut locked = self.gate.locked.lock();
        if !*locked {
            *locked = true;
            return Ok(SleepLockGuard::new(self));
        }
        drop(locked);

        let _parked = task.park_on(Arc::clone(&self.gate) as Arc<dyn Wake>);
        let mut locked = self.gate.locked.lock();
        loop {
            if !*locked {
                *locked = true;
                return Ok(SleepLockGuard::new(self));
            }
            if task.clear_interrupt() {
                // Our wake-up may have been meant for the next waiter.
                self.gate.released.notify_one();
                return Err(Interrupted);
            }
            task.sleep(|| self.gate.released.wait(&mut locked));
        }
    }
}

/// Exclusive access to the contents of a [`SleepLock`]; releases on drop.
///
/// Shares its `T` like `&mut T` does: the guard is only `Sync` when `T` is.
///
/// ```compile_fail
/// use std::cell::Cell;
/// use devone::sync::SleepLock;
///
/// fn shared_across_threads<S: Sync>(_: &S) {}
///
/// let lock = SleepLock::new(Cell::new(0u64));
/// let guard = lock.lock();
/// shared_across_threads(&guard);
/// ```
pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
    _value: PhantomData<&'a mut T>,
}

impl<'a, T> SleepLockGuard<'a, T> {
    const fn new(lock: &'a SleepLock<T>) -> Self {
        Self {
            lock,
            _value: PhantomData,
        }
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard is the unique holder of the lock.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard is the unique holder of the lock.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        let mut locked = self.lock.gate.locked.lock();
        *locked = false;
        self.lock.gate.released.notify_one();
    }
}
