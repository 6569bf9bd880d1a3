//! A timer-armed readiness device.
//!
//! Models a character device whose sessions become readable a fixed time
//! after being opened or last read. Readers block (interruptibly) until then,
//! poll-style callers can wait on many sessions at once, and closing a
//! session waits out its timer.
//!
//! # Layout
//!
//! - [`device`]: sessions, the file-operations table, `poll`/`select`.
//! - [`sync`]: tasks with interrupts, the sleeping lock, wait queues and
//!   poll tables.
//! - [`runtime`]: the timing wheel and the thread that drives it.
//! - [`config`]: [`DeviceConfig`].

pub mod config;
pub mod device;
pub mod runtime;
pub mod sync;
mod trace;

pub use config::DeviceConfig;
pub use device::{
    CopyFault, DeviceError, FILLER_BYTE, File, FileOperations, OpenFlags, PollFd, PollMask,
    ReadinessController, Session, SessionId, UserBuffer, WaiterStatus, poll, select_read,
};
pub use sync::{Interrupted, PollTable, Task, TaskState};
pub use trace::init_tracing;
