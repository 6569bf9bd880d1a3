//! Caller identity, scheduling state and interrupts.
//!
//! Every thread that touches the device has a [`Task`], created lazily on
//! first use. The blocking primitives in this module tree flip the task to
//! [`TaskState::Sleeping`] while parked and register what they are parked on,
//! so [`Task::interrupt`] can wake the sleeper wherever it is.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Something a task can be parked on. `wake` must take the lock the sleeper
/// checks its wake condition under before notifying, or the wake-up can be lost.
pub(crate) trait Wake: Send + Sync {
    fn wake(&self);
}

/// Scheduling state as seen from other threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Sleeping,
}

impl TaskState {
    const fn from_raw(raw: u8) -> Self {
        if raw == SLEEPING { Self::Sleeping } else { Self::Running }
    }
}

const RUNNING: u8 = 0;
const SLEEPING: u8 = 1;

/// Process-unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

struct Inner {
    id: TaskId,
    name: Option<String>,
    state: AtomicU8,
    interrupt: AtomicBool,
    parked_on: Mutex<Option<Arc<dyn Wake>>>,
}

/// Cheaply clonable handle to a thread's task.
#[derive(Clone)]
pub struct Task {
    inner: Arc<Inner>,
}

thread_local! {
    static CURRENT: Task = Task::for_current_thread();
}

impl Task {
    fn for_current_thread() -> Self {
        Self {
            inner: Arc::new(Inner {
                id: TaskId::next(),
                name: std::thread::current().name().map(str::to_owned),
                state: AtomicU8::new(RUNNING),
                interrupt: AtomicBool::new(false),
                parked_on: Mutex::new(None),
            }),
        }
    }

    /// The calling thread's task.
    #[must_use]
    pub fn current() -> Self {
        CURRENT.with(Self::clone)
    }

    #[must_use]
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Instantaneous scheduling state; stale as soon as it is returned.
    #[must_use]
    pub fn state(&self) -> TaskState {
        TaskState::from_raw(self.inner.state.load(Ordering::Acquire))
    }

    /// Raises an interrupt and wakes the task if it is parked.
    ///
    /// The next interruptible wait the task is in, or enters, fails with
    /// [`super::Interrupted`] and consumes the interrupt.
    pub fn interrupt(&self) {
        self.inner.interrupt.store(true, Ordering::SeqCst);
        let parked = self.inner.parked_on.lock().clone();
        if let Some(waker) = parked {
            waker.wake();
        }
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupt.load(Ordering::SeqCst)
    }

    /// Drops a pending interrupt; returns whether one was pending.
    pub fn clear_interrupt(&self) -> bool {
        self.inner.interrupt.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        let raw = match state {
            TaskState::Running => RUNNING,
            TaskState::Sleeping => SLEEPING,
        };
        self.inner.state.store(raw, Ordering::Release);
    }

    /// Registers `waker` as what this task is parked on until the returned
    /// guard drops. Must be called before the sleeper's first interrupt check.
    pub(crate) fn park_on(&self, waker: Arc<dyn Wake>) -> Parked<'_> {
        *self.inner.parked_on.lock() = Some(waker);
        Parked { task: self }
    }

    /// Sleeps via `wait`, marking the task sleeping for the duration.
    pub(crate) fn sleep<R>(&self, wait: impl FnOnce() -> R) -> R {
        self.set_state(TaskState::Sleeping);
        let out = wait();
        self.set_state(TaskState::Running);
        out
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Guard returned by [`Task::park_on`].
pub(crate) struct Parked<'a> {
    task: &'a Task,
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        *self.task.inner.parked_on.lock() = None;
        self.task.set_state(TaskState::Running);
    }
}
