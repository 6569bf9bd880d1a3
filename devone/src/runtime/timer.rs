//! Timer thread: owns a [`Wheel`] and fires one-shot callbacks.
//!
//! Callbacks run on the `devone-timer` thread with the service lock released,
//! one at a time. The service remembers which owner's callback is running so
//! that [`TimerService::cancel_sync`] can act as a completion barrier: once it
//! returns, no callback for that owner is running or will run.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

use crate::runtime::timing::{PowerOfTwo, TickClock, TimerHandle, Wheel, WheelError};
use crate::trace::{debug, error, info, trace, warn};

/// Work run when a timer fires. Must not block on I/O.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Identity of whoever armed a timer; the unit of [`TimerService::cancel_sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerOwner(u64);

impl TimerOwner {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Timer thread configuration.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Timer resolution.
    pub tick: Duration,
    /// Wheel slot count.
    pub slots: PowerOfTwo,
    /// Maximum number of concurrently pending timers.
    pub capacity: NonZeroUsize,
    /// CPU to pin the timer thread to, if any.
    pub core: Option<usize>,
}

/// Errors from the timer service.
#[derive(Debug, Error)]
pub enum TimerError {
    /// The OS refused to start the timer thread.
    #[error("failed to spawn timer thread: {0}")]
    Spawn(#[source] std::io::Error),
    /// No room left on the wheel.
    #[error(transparent)]
    Wheel(#[from] WheelError),
    /// The service is shutting down and accepts no new timers.
    #[error("timer service has stopped")]
    Stopped,
}

struct Pending {
    owner: TimerOwner,
    callback: TimerCallback,
}

/// A timer sitting on the wheel. Deliberately neither `Copy` nor `Clone`:
/// whoever holds it is the only one who can cancel or replace it.
#[derive(Debug)]
pub struct ArmedTimer {
    handle: TimerHandle<Pending>,
}

struct State {
    wheel: Wheel<Pending>,
    /// Taken off the wheel, waiting to run on the timer thread.
    due: VecDeque<Pending>,
    running: Option<TimerOwner>,
    shutdown: bool,
}

impl State {
    /// Removes queued-but-not-started callbacks for `owner`.
    fn purge_due(&mut self, owner: TimerOwner) -> Vec<Pending> {
        let (purged, kept): (Vec<Pending>, Vec<Pending>) =
            self.due.drain(..).partition(|p| p.owner == owner);
        self.due = kept.into();
        purged
    }
}

struct Shared {
    state: Mutex<State>,
    /// Signals the timer thread: new timer or shutdown.
    wakeup: Condvar,
    /// Signalled after every callback completes.
    idle: Condvar,
    clock: TickClock,
}

/// Handle to the timer thread. Dropping it stops and joins the thread;
/// timers still pending at that point never fire.
pub struct TimerService {
    shared: Arc<Shared>,
    worker_id: ThreadId,
    worker: Option<JoinHandle<()>>,
}

impl TimerService {
    /// Starts the timer thread.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Spawn`] if the thread cannot be created.
    pub fn spawn(config: &TimerConfig) -> Result<Self, TimerError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                wheel: Wheel::new(config.slots, config.capacity),
                due: VecDeque::new(),
                running: None,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            idle: Condvar::new(),
            clock: TickClock::start(config.tick),
        });

        debug!(
            tick_us = u64::try_from(config.tick.as_micros()).unwrap_or(u64::MAX),
            slots = config.slots.get(),
            capacity = config.capacity.get(),
            core = ?config.core,
            "spawning timer thread"
        );
        let worker_shared = Arc::clone(&shared);
        let core = config.core;
        let worker = thread::Builder::new()
            .name("devone-timer".into())
            .spawn(move || {
                if let Some(id) = core {
                    pin_to_core(id);
                }
                info!("timer thread started");
                run(&worker_shared);
                info!("timer thread exiting");
            })
            .map_err(TimerError::Spawn)?;

        Ok(Self {
            shared,
            worker_id: worker.thread().id(),
            worker: Some(worker),
        })
    }

    /// Arms a one-shot timer that runs `callback` after at least `delay`.
    ///
    /// # Errors
    ///
    /// [`TimerError::Wheel`] when the wheel is full, [`TimerError::Stopped`]
    /// after shutdown began.
    pub fn arm(
        &self,
        owner: TimerOwner,
        delay: Duration,
        callback: TimerCallback,
    ) -> Result<ArmedTimer, TimerError> {
        let mut state = self.shared.state.lock();
        let armed = self.schedule(&mut state, owner, delay, callback)?;
        drop(state);
        self.shared.wakeup.notify_one();
        Ok(armed)
    }

    /// Replaces `previous` (if still pending) with a fresh timer for the same owner.
    ///
    /// Does not wait for a callback that is already running; callers that
    /// care must tolerate one late fire from the replaced timer.
    ///
    /// # Errors
    ///
    /// As for [`TimerService::arm`].
    pub fn rearm(
        &self,
        owner: TimerOwner,
        previous: Option<ArmedTimer>,
        delay: Duration,
        callback: TimerCallback,
    ) -> Result<ArmedTimer, TimerError> {
        let mut state = self.shared.state.lock();
        let replaced = previous.and_then(|t| state.wheel.cancel(t.handle));
        let purged = state.purge_due(owner);
        let armed = self.schedule(&mut state, owner, delay, callback);
        drop(state);
        // Stale callbacks are dropped outside the lock.
        drop((replaced, purged));
        self.shared.wakeup.notify_one();
        armed
    }

    /// Cancels `timer` and everything else queued for `owner`, then blocks
    /// until no callback for `owner` is running.
    ///
    /// Returns `true` if something was cancelled before it ran. Called from
    /// the timer thread itself it cannot wait for its own callback, so it
    /// only cancels.
    pub fn cancel_sync(&self, owner: TimerOwner, timer: Option<ArmedTimer>) -> bool {
        let mut state = self.shared.state.lock();
        let cancelled = timer.and_then(|t| state.wheel.cancel(t.handle));
        let purged = state.purge_due(owner);
        let hit = cancelled.is_some() || !purged.is_empty();

        if thread::current().id() == self.worker_id {
            warn!(owner = owner.get(), "cancel_sync from the timer thread; not waiting");
        } else {
            while state.running == Some(owner) {
                trace!(owner = owner.get(), "waiting for in-flight timer callback");
                self.shared.idle.wait(&mut state);
            }
        }
        drop(state);
        drop((cancelled, purged));

        debug!(owner = owner.get(), hit, "timer cancelled synchronously");
        hit
    }

    /// Timers armed but not yet run.
    #[must_use]
    pub fn pending(&self) -> usize {
        let state = self.shared.state.lock();
        state.wheel.len() + state.due.len()
    }

    fn schedule(
        &self,
        state: &mut MutexGuard<'_, State>,
        owner: TimerOwner,
        delay: Duration,
        callback: TimerCallback,
    ) -> Result<ArmedTimer, TimerError> {
        if state.shutdown {
            return Err(TimerError::Stopped);
        }
        let now = self.shared.clock.now();
        let span = self.shared.clock.span_for(delay);
        let handle = state
            .wheel
            .schedule(now, span, Pending { owner, callback })?;
        trace!(
            owner = owner.get(),
            now = now.get(),
            ticks = span.get(),
            "timer armed"
        );
        Ok(ArmedTimer { handle })
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.shared.state.lock().shutdown = true;
        self.shared.wakeup.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            debug!("waiting for timer thread to exit");
            if worker.join().is_err() {
                error!("timer thread panicked");
            }
        }
    }
}

fn run(shared: &Shared) {
    let mut state = shared.state.lock();
    while !state.shutdown {
        let now = shared.clock.now();
        let State { wheel, due, .. } = &mut *state;
        wheel.tick(now, |_, pending| due.push_back(pending));

        while let Some(Pending { owner, callback }) = state.due.pop_front() {
            state.running = Some(owner);
            MutexGuard::unlocked(&mut state, || fire(owner, callback));
            state.running = None;
            shared.idle.notify_all();
        }

        if state.shutdown {
            break;
        }
        match state.wheel.next_deadline() {
            Some(deadline) => {
                let wait = shared.clock.until(deadline);
                if !wait.is_zero() {
                    shared.wakeup.wait_for(&mut state, wait);
                }
            }
            None => shared.wakeup.wait(&mut state),
        }
    }
}

fn fire(owner: TimerOwner, callback: TimerCallback) {
    trace!(owner = owner.get(), "timer fired");
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!(owner = owner.get(), "timer callback panicked");
    }
}

fn pin_to_core(id: usize) {
    if core_affinity::set_for_current(core_affinity::CoreId { id }) {
        debug!(core = id, "timer thread pinned");
    } else {
        warn!(core = id, "failed to pin timer thread");
    }
}
