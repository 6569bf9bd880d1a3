//! Device configuration.
//!
//! One [`DeviceConfig`] is handed to [`crate::ReadinessController::new`] and
//! applies uniformly to every session opened through that controller.
//!
//! # Sizing
//!
//! - `timeout` is the readiness period: a session becomes readable this long
//!   after it was opened or last read.
//! - `tick` bounds how late a timer may fire. The default 10ms is far below
//!   the default timeout; tests use 1ms with timeouts of tens of milliseconds.
//! - `max_sessions` is also the timer wheel's capacity, since each open
//!   session owns at most one pending timer.

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::runtime::timer::TimerConfig;
use crate::runtime::timing::PowerOfTwo;

/// Readiness-device configuration.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Delay between (re)arm and readiness.
    ///
    /// **Default**: 20s
    pub timeout: Duration,

    /// Timer resolution.
    ///
    /// **Default**: 10ms
    pub tick: Duration,

    /// Timing wheel slot count; must be a power of two.
    ///
    /// **Default**: 512 (about 5s per lap at the default tick; longer
    /// timeouts simply take several laps)
    pub wheel_slots: usize,

    /// Sessions that may be open at once.
    ///
    /// **Default**: 256
    pub max_sessions: NonZeroUsize,

    /// CPU to pin the timer thread to.
    ///
    /// **Default**: unpinned
    pub timer_core: Option<usize>,
}

impl DeviceConfig {
    /// Builds a configuration, checking its invariants.
    ///
    /// # Panics
    ///
    /// Panics if `tick` is zero or `wheel_slots` is not a power of two.
    #[must_use]
    fn new_validated(
        timeout: Duration,
        tick: Duration,
        wheel_slots: usize,
        max_sessions: NonZeroUsize,
        timer_core: Option<usize>,
    ) -> Self {
        assert!(!tick.is_zero(), "tick must be > 0");
        assert!(
            wheel_slots.is_power_of_two(),
            "wheel_slots must be a power of two"
        );

        Self {
            timeout,
            tick,
            wheel_slots,
            max_sessions,
            timer_core,
        }
    }

    /// Short timeout and fine tick, for demos and tests.
    #[must_use]
    pub fn fast() -> Self {
        Self::new_validated(
            Duration::from_millis(50),
            Duration::from_millis(1),
            64,
            NonZeroUsize::new(64).unwrap_or(NonZeroUsize::MIN),
            None,
        )
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// # Panics
    ///
    /// Panics if `tick` is zero.
    #[must_use]
    pub const fn with_tick(mut self, tick: Duration) -> Self {
        assert!(!tick.is_zero(), "tick must be > 0");
        self.tick = tick;
        self
    }

    /// # Panics
    ///
    /// Panics if `slots` is not a power of two.
    #[must_use]
    pub const fn with_wheel_slots(mut self, slots: usize) -> Self {
        assert!(slots.is_power_of_two(), "wheel_slots must be a power of two");
        self.wheel_slots = slots;
        self
    }

    #[must_use]
    pub const fn with_max_sessions(mut self, max_sessions: NonZeroUsize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    #[must_use]
    pub const fn with_timer_core(mut self, core: Option<usize>) -> Self {
        self.timer_core = core;
        self
    }

    /// The timer thread's share of this configuration.
    pub(crate) fn timer(&self) -> TimerConfig {
        TimerConfig {
            tick: self.tick,
            slots: PowerOfTwo::new(self.wheel_slots)
                .unwrap_or_else(|| unreachable!("wheel_slots validated on construction")),
            capacity: self.max_sessions,
            core: self.timer_core,
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::new_validated(
            Duration::from_secs(20),
            Duration::from_millis(10),
            512,
            NonZeroUsize::new(256).unwrap_or(NonZeroUsize::MIN),
            None,
        )
    }
}
