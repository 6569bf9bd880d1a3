//! Multiplexed waits over many files.
//!
//! [`poll`] asks every file for its readiness mask, registering one shared
//! [`PollTable`] on each file's wait queue during the first pass. If nothing
//! is ready it sleeps on the table's waiter; any queue's `wake_all` brings it
//! back for another pass. Registrations are dropped with the table when the
//! call returns.

use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::time::Duration;

use minstant::Instant;

use crate::sync::{PollTable, Task};
use crate::trace::trace;

use super::{DeviceError, File, FileOperations};

/// Readiness event bits, with the Linux `poll(2)` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollMask(u16);

impl PollMask {
    pub const EMPTY: Self = Self(0);
    pub const IN: Self = Self(0x0001);
    pub const PRI: Self = Self(0x0002);
    pub const OUT: Self = Self(0x0004);
    pub const ERR: Self = Self(0x0008);
    pub const HUP: Self = Self(0x0010);
    /// The file has no session behind it.
    pub const NVAL: Self = Self(0x0020);
    pub const RDNORM: Self = Self(0x0040);
    pub const WRNORM: Self = Self(0x0100);

    /// Reported whether or not they were asked for.
    const ALWAYS: Self = Self(Self::ERR.0 | Self::HUP.0 | Self::NVAL.0);

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for PollMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PollMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for PollMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// One entry of a [`poll`] call.
#[derive(Debug)]
pub struct PollFd<'a> {
    pub file: &'a File,
    pub events: PollMask,
    pub revents: PollMask,
}

impl<'a> PollFd<'a> {
    #[must_use]
    pub const fn new(file: &'a File, events: PollMask) -> Self {
        Self {
            file,
            events,
            revents: PollMask::EMPTY,
        }
    }
}

/// Waits until at least one of `fds` reports an event it asked for.
///
/// Returns how many entries have non-empty `revents`, or `0` once `timeout`
/// passes. `None` waits indefinitely; `Some(Duration::ZERO)` checks once.
/// `ERR`, `HUP` and `NVAL` are always reported; a file without a session
/// shows up as `NVAL` rather than failing the call.
///
/// # Errors
///
/// [`DeviceError::Interrupted`] if the calling task is interrupted while
/// waiting. Any other error from a readiness check is passed through.
pub fn poll<O>(ops: &O, fds: &mut [PollFd<'_>], timeout: Option<Duration>) -> Result<usize, DeviceError>
where
    O: FileOperations + ?Sized,
{
    let task = Task::current();
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut table = PollTable::new();

    loop {
        let mut ready = 0;
        for fd in fds.iter_mut() {
            let mask = match ops.poll(fd.file, Some(&mut table)) {
                Ok(mask) => mask,
                Err(DeviceError::BadSession) => PollMask::NVAL,
                Err(err) => return Err(err),
            };
            fd.revents = mask & (fd.events | PollMask::ALWAYS);
            if !fd.revents.is_empty() {
                ready += 1;
            }
        }
        table.disarm();

        if ready > 0 {
            trace!(fds = fds.len(), ready, "poll ready");
            return Ok(ready);
        }
        if !table.waiter().wait(&task, deadline)? {
            trace!(fds = fds.len(), "poll timed out");
            return Ok(0);
        }
    }
}

/// `select(2)`-style read set: indices of `files` that are readable.
///
/// Empty on timeout.
///
/// # Errors
///
/// [`DeviceError::BadSession`] if any file has no session, otherwise as for
/// [`poll`].
pub fn select_read<O>(
    ops: &O,
    files: &[&File],
    timeout: Option<Duration>,
) -> Result<Vec<usize>, DeviceError>
where
    O: FileOperations + ?Sized,
{
    let read_set = PollMask::IN | PollMask::RDNORM;
    let mut fds: Vec<PollFd<'_>> = files.iter().map(|f| PollFd::new(f, read_set)).collect();
    poll(ops, &mut fds, timeout)?;

    if fds.iter().any(|fd| fd.revents.contains(PollMask::NVAL)) {
        return Err(DeviceError::BadSession);
    }
    Ok(fds
        .iter()
        .enumerate()
        .filter(|(_, fd)| fd.revents.intersects(read_set))
        .map(|(i, _)| i)
        .collect())
}
