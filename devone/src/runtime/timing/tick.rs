//! Tick-space coordinates and the clock that produces them.
//!
//! The wheel never sees wall-clock durations. The [`TickClock`] maps elapsed
//! monotonic time onto a discrete lattice, `tick = floor(elapsed / tick_len)`,
//! and converts requested delays into spans rounded *up*, so that a timer can
//! only ever fire late, never early.

use core::ops::Add;
use std::time::Duration;

use minstant::Instant;

/// A point on the discrete tick lattice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct TickInstant(u64);

impl TickInstant {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Number of ticks from `earlier` to `self`, zero if `earlier` is ahead.
    #[inline]
    #[must_use]
    pub const fn since(self, earlier: Self) -> TickSpan {
        TickSpan(self.0.saturating_sub(earlier.0))
    }
}

/// A span in tick space (number of ticks).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct TickSpan(u64);

impl TickSpan {
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Add<TickSpan> for TickInstant {
    type Output = Self;

    #[inline]
    fn add(self, rhs: TickSpan) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

/// Monotonic clock quantized to a fixed tick length.
#[derive(Debug, Clone, Copy)]
pub struct TickClock {
    origin: Instant,
    tick_ns: u64,
}

impl TickClock {
    /// Starts a clock whose tick zero is "now".
    ///
    /// # Panics
    ///
    /// Panics if `tick` is zero or longer than `u64::MAX` nanoseconds.
    #[must_use]
    pub fn start(tick: Duration) -> Self {
        let tick_ns = u64::try_from(tick.as_nanos()).expect("tick length fits in u64 nanoseconds");
        assert!(tick_ns > 0, "tick length must be non-zero");
        Self {
            origin: Instant::now(),
            tick_ns,
        }
    }

    /// The current position on the tick lattice.
    #[must_use]
    pub fn now(&self) -> TickInstant {
        self.instant_to_tick(Instant::now())
    }

    /// Maps a monotonic instant onto the lattice; instants before the origin map to zero.
    #[must_use]
    pub fn instant_to_tick(&self, instant: Instant) -> TickInstant {
        let elapsed = instant.saturating_duration_since(self.origin).as_nanos();
        let ticks = elapsed / u128::from(self.tick_ns);
        TickInstant(u64::try_from(ticks).unwrap_or(u64::MAX))
    }

    /// Time left until tick `deadline` begins; zero once it has.
    #[must_use]
    pub fn until(&self, deadline: TickInstant) -> Duration {
        let offset_ns = u128::from(deadline.get()) * u128::from(self.tick_ns);
        let offset = Duration::from_nanos(u64::try_from(offset_ns).unwrap_or(u64::MAX));
        offset.saturating_sub(Instant::now().saturating_duration_since(self.origin))
    }

    /// Converts a delay into whole ticks, rounding up.
    #[must_use]
    pub fn span_for(&self, delay: Duration) -> TickSpan {
        let ticks = delay.as_nanos().div_ceil(u128::from(self.tick_ns));
        TickSpan(u64::try_from(ticks).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_round_up_to_whole_ticks() {
        let clock = TickClock::start(Duration::from_millis(10));
        assert_eq!(clock.span_for(Duration::ZERO), TickSpan::new(0));
        assert_eq!(clock.span_for(Duration::from_millis(1)), TickSpan::new(1));
        assert_eq!(clock.span_for(Duration::from_millis(10)), TickSpan::new(1));
        assert_eq!(clock.span_for(Duration::from_millis(11)), TickSpan::new(2));
        assert_eq!(clock.span_for(Duration::from_secs(20)), TickSpan::new(2000));
    }

    #[test]
    fn instants_before_origin_map_to_zero() {
        let earlier = Instant::now();
        let clock = TickClock::start(Duration::from_millis(1));
        assert_eq!(clock.instant_to_tick(earlier), TickInstant::new(0));
    }

    #[test]
    fn span_between_instants_saturates() {
        let a = TickInstant::new(5);
        let b = TickInstant::new(9);
        assert_eq!(b.since(a), TickSpan::new(4));
        assert_eq!(a.since(b), TickSpan::new(0));
        assert_eq!(a + TickSpan::new(3), TickInstant::new(8));
    }

    #[test]
    #[should_panic(expected = "tick length must be non-zero")]
    fn zero_tick_rejected() {
        let _ = TickClock::start(Duration::ZERO);
    }
}
