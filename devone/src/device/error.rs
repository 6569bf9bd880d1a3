//! Errors surfaced by device operations.

use std::io;

use thiserror::Error;

use crate::runtime::timer::TimerError;
use crate::sync::Interrupted;

/// Linux errno values the equivalent character driver would return.
pub mod errno {
    pub const EFAULT: i32 = 14;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EINVAL: i32 = 22;
    pub const EBADFD: i32 = 77;
    /// Kernel-internal "restart after signal"; never reaches user space as such.
    pub const ERESTARTSYS: i32 = 512;
}

/// Errors from device operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Session state could not be allocated: session limit reached, or the
    /// timer service could not take the session's timer.
    #[error("out of memory: cannot allocate session state")]
    OutOfMemory,
    /// Non-blocking read with nothing ready. Retry later.
    #[error("operation would block")]
    WouldBlock,
    /// A blocking wait was interrupted. Readiness was not consumed.
    #[error("interrupted")]
    Interrupted,
    /// Copying out to the caller's buffer failed. Readiness *was* consumed.
    #[error("bad address: copy to caller buffer failed at offset {offset}")]
    Fault { offset: usize },
    /// The device accepts no input.
    #[error("operation not supported")]
    NotSupported,
    /// The file has no open session behind it.
    #[error("bad session: file has no open session")]
    BadSession,
}

impl DeviceError {
    /// The errno a kernel driver would hand back for this error.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::OutOfMemory => errno::ENOMEM,
            Self::WouldBlock => errno::EAGAIN,
            Self::Interrupted => errno::ERESTARTSYS,
            Self::Fault { .. } => errno::EFAULT,
            Self::NotSupported => errno::EINVAL,
            Self::BadSession => errno::EBADFD,
        }
    }

    /// Whether retrying the same call can succeed.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::WouldBlock | Self::Interrupted)
    }
}

impl From<Interrupted> for DeviceError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}

impl From<TimerError> for DeviceError {
    fn from(_: TimerError) -> Self {
        Self::OutOfMemory
    }
}

impl From<DeviceError> for io::Error {
    fn from(err: DeviceError) -> Self {
        let kind = match err {
            DeviceError::OutOfMemory => io::ErrorKind::OutOfMemory,
            DeviceError::WouldBlock => io::ErrorKind::WouldBlock,
            DeviceError::Interrupted => io::ErrorKind::Interrupted,
            DeviceError::Fault { .. } => io::ErrorKind::InvalidInput,
            DeviceError::NotSupported => io::ErrorKind::Unsupported,
            DeviceError::BadSession => io::ErrorKind::NotConnected,
        };
        Self::new(kind, err)
    }
}
