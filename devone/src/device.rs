//! The readiness device.
//!
//! A session opened on a [`ReadinessController`] starts out not readable.
//! After the configured timeout its timer fires, marks it ready and wakes
//! everyone waiting on it: blocked readers as well as [`poll`] callers. The
//! first read to take the session lock consumes readiness, fills the caller's
//! buffer with [`FILLER_BYTE`] and re-arms the timer; other readers go back
//! to sleep for the next round.
//!
//! ```no_run
//! use devone::{DeviceConfig, FileOperations, OpenFlags, ReadinessController};
//!
//! let dev = ReadinessController::new(DeviceConfig::fast())?;
//! let file = dev.open(OpenFlags::NONE)?;
//! let mut buf = [0u8; 16];
//! let n = dev.read(&file, &mut buf[..], 16)?;
//! assert!(buf[..n].iter().all(|&b| b == 0xFF));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod controller;
mod error;
mod file;
mod poll;
mod session;
mod status;

pub use controller::{FileOperations, ReadinessController};
pub use error::{DeviceError, errno};
pub use file::{CopyFault, FILLER_BYTE, File, OpenFlags, UserBuffer};
pub use poll::{PollFd, PollMask, poll, select_read};
pub use session::{Session, SessionId};
pub use status::WaiterStatus;
