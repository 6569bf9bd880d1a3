//! Per-open-session state and its timer.
//!
//! A [`Session`] owns one [`SessionState`] and the one timer that can make it
//! ready. Everything mutable sits behind the session's [`SleepLock`]; the
//! timer callback takes it like any other operation.
//!
//! Each (re)arm bumps `arm_generation` and bakes the new value into the
//! callback. A callback that was already running when a read re-armed finds
//! a newer generation and leaves `ready` alone, so at most one arm is ever
//! live per session.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::runtime::timer::{ArmedTimer, TimerCallback, TimerOwner, TimerService};
use crate::sync::{SleepLock, WaitQueue};
use crate::trace::{debug, trace};

use super::DeviceError;

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    const fn owner(self) -> TimerOwner {
        TimerOwner::new(self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

pub(crate) struct SessionData {
    pub(crate) ready: bool,
    timer: Option<ArmedTimer>,
    arm_generation: u64,
}

pub(crate) struct SessionState {
    pub(crate) data: SleepLock<SessionData>,
    pub(crate) read_wait: WaitQueue,
}

impl SessionState {
    fn new() -> Self {
        Self {
            data: SleepLock::new(SessionData {
                ready: false,
                timer: None,
                arm_generation: 0,
            }),
            read_wait: WaitQueue::new(),
        }
    }
}

/// One unit of the controller's session budget, returned on drop.
pub(crate) struct SessionSlot {
    open: Arc<AtomicUsize>,
}

impl SessionSlot {
    /// Claims a slot unless `limit` sessions are already open.
    pub(crate) fn acquire(open: &Arc<AtomicUsize>, limit: NonZeroUsize) -> Option<Self> {
        open.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            (n < limit.get()).then_some(n + 1)
        })
        .ok()?;
        Some(Self {
            open: Arc::clone(open),
        })
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::AcqRel);
    }
}

/// An open session. Dropping it closes it: the timer is cancelled and any
/// callback already running for it is waited out before the state goes away.
pub struct Session {
    id: SessionId,
    state: Arc<SessionState>,
    timers: Arc<TimerService>,
    timeout: Duration,
    _slot: SessionSlot,
}

impl Session {
    /// Allocates the state and arms the first timer.
    pub(crate) fn open(
        id: SessionId,
        timers: Arc<TimerService>,
        timeout: Duration,
        slot: SessionSlot,
    ) -> Result<Self, DeviceError> {
        let session = Self {
            id,
            state: Arc::new(SessionState::new()),
            timers,
            timeout,
            _slot: slot,
        };
        {
            let mut data = session.state.data.lock();
            session.arm(&mut data)?;
        }
        debug!(
            session = id.get(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "session opened"
        );
        Ok(session)
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Readiness right now. Takes the session lock, so it waits out a
    /// concurrent read or timer callback.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.data.lock().ready
    }

    /// Closes the session. Same as dropping it.
    pub fn close(self) {
        drop(self);
    }

    pub(crate) fn state(&self) -> &SessionState {
        &self.state
    }

    /// Replaces any pending timer with a fresh one `timeout` from now.
    /// The caller holds the session lock; `data` is its contents.
    pub(crate) fn arm(&self, data: &mut SessionData) -> Result<(), DeviceError> {
        data.arm_generation += 1;
        let callback = self.timer_callback(data.arm_generation);
        let previous = data.timer.take();
        match self.timers.rearm(self.id.owner(), previous, self.timeout, callback) {
            Ok(armed) => data.timer = Some(armed),
            Err(err) => {
                debug!(session = self.id.get(), %err, "arming timer failed");
                return Err(err.into());
            }
        }
        trace!(
            session = self.id.get(),
            generation = data.arm_generation,
            "timer armed"
        );
        Ok(())
    }

    fn timer_callback(&self, generation: u64) -> TimerCallback {
        let state = Arc::downgrade(&self.state);
        let id = self.id;
        Box::new(move || on_timer(&state, id, generation))
    }

    #[cfg(test)]
    fn generation(&self) -> u64 {
        self.state.data.lock().arm_generation
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // The callback may be queued on the session lock; never hold it here.
        let timer = self.state.data.lock().timer.take();
        if self.timers.cancel_sync(self.id.owner(), timer) {
            debug!(session = self.id.get(), "session closed before its timer fired");
        } else {
            debug!(session = self.id.get(), "session closed");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn on_timer(state: &Weak<SessionState>, id: SessionId, generation: u64) {
    let Some(state) = state.upgrade() else {
        return;
    };
    let mut data = state.data.lock();
    if data.arm_generation != generation {
        trace!(
            session = id.get(),
            generation,
            current = data.arm_generation,
            "stale timer ignored"
        );
        return;
    }
    data.ready = true;
    data.timer = None;
    if state.read_wait.wake_all() == 0 {
        trace!(session = id.get(), "ready with no sleeping reader");
    }
    drop(data);
    debug!(session = id.get(), "session ready");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use std::thread;
    use std::time::Instant;

    fn fixture(timeout: Duration) -> (Arc<TimerService>, Arc<AtomicUsize>, Session) {
        let config = DeviceConfig::fast().with_timeout(timeout);
        let timers = Arc::new(TimerService::spawn(&config.timer()).unwrap());
        let open = Arc::new(AtomicUsize::new(0));
        let slot = SessionSlot::acquire(&open, config.max_sessions).unwrap();
        let session =
            Session::open(SessionId::new(1), Arc::clone(&timers), timeout, slot).unwrap();
        (timers, open, session)
    }

    fn wait_ready(session: &Session, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if session.is_ready() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        session.is_ready()
    }

    #[test]
    fn becomes_ready_after_timeout() {
        let (_timers, _open, session) = fixture(Duration::from_millis(30));
        assert!(!session.is_ready());
        assert!(wait_ready(&session, Duration::from_secs(5)));
    }

    #[test]
    fn stale_callback_does_not_set_ready() {
        let (_timers, _open, session) = fixture(Duration::from_secs(60));
        let stale = session.timer_callback(session.generation());
        {
            let mut data = session.state.data.lock();
            session.arm(&mut data).unwrap();
        }
        stale();
        assert!(!session.is_ready());

        let current = session.timer_callback(session.generation());
        current();
        assert!(session.is_ready());
    }

    #[test]
    fn close_cancels_timer_and_returns_slot() {
        let (timers, open, session) = fixture(Duration::from_secs(60));
        assert_eq!(open.load(Ordering::SeqCst), 1);
        assert_eq!(timers.pending(), 1);
        session.close();
        assert_eq!(timers.pending(), 0);
        assert_eq!(open.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn slot_limit_is_enforced() {
        let open = Arc::new(AtomicUsize::new(0));
        let limit = NonZeroUsize::new(2).unwrap();
        let a = SessionSlot::acquire(&open, limit).unwrap();
        let _b = SessionSlot::acquire(&open, limit).unwrap();
        assert!(SessionSlot::acquire(&open, limit).is_none());
        drop(a);
        assert!(SessionSlot::acquire(&open, limit).is_some());
    }
}
