//! Runtime scaffolding for the device.
//!
//! - `timing`: clock and timing wheel (shared-nothing, single owner).
//! - `timer`: the timer thread that owns a wheel and fires callbacks, with a
//!   cancel-and-wait barrier for owners that are about to be torn down.

pub mod timer;
pub mod timing;
