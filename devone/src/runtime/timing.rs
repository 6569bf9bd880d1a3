//! Timing primitives: a quantized monotonic clock and a hashed timing wheel.
//!
//! The wheel itself is single-threaded; [`crate::runtime::timer`] wraps it in a
//! dedicated thread for callers that need callbacks fired asynchronously.

mod slab;
mod tick;
mod wheel;

pub use tick::{TickClock, TickInstant, TickSpan};
pub use wheel::{PowerOfTwo, TimerHandle, Wheel, WheelError};
