//! Open-file handles and caller buffers.

use std::fmt;
use std::ops::BitOr;

use super::session::Session;

/// Byte every successful read produces.
pub const FILLER_BYTE: u8 = 0xFF;

/// Flags fixed at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const NONE: Self = Self(0);
    /// Reads fail with `WouldBlock` instead of sleeping.
    pub const NONBLOCK: Self = Self(0o4000);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// An open file: flags plus the session created by `open`.
///
/// A `File` with no session is what a handle looks like after `release`, and
/// every session-bound operation on it fails with
/// [`super::DeviceError::BadSession`].
pub struct File {
    flags: OpenFlags,
    private: Option<Session>,
}

impl File {
    /// A file with no session attached yet.
    #[must_use]
    pub const fn detached(flags: OpenFlags) -> Self {
        Self {
            flags,
            private: None,
        }
    }

    pub(crate) fn with_session(flags: OpenFlags, session: Session) -> Self {
        Self {
            flags,
            private: Some(session),
        }
    }

    #[must_use]
    pub const fn is_nonblocking(&self) -> bool {
        self.flags.contains(OpenFlags::NONBLOCK)
    }

    pub fn set_flags(&mut self, flags: OpenFlags) {
        self.flags = flags;
    }

    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.private.as_ref()
    }

    pub(crate) fn take_session(&mut self) -> Option<Session> {
        self.private.take()
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("flags", &self.flags)
            .field("session", &self.private.as_ref().map(Session::id))
            .finish()
    }
}

/// A copy into the caller's buffer hit an address it may not write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyFault {
    pub offset: usize,
}

/// Destination of a read. Writes may fail part-way, like a copy to an
/// unmapped user page.
pub trait UserBuffer {
    /// Stores `byte` at `offset`.
    ///
    /// # Errors
    ///
    /// [`CopyFault`] if `offset` is not writable.
    fn write_byte(&mut self, offset: usize, byte: u8) -> Result<(), CopyFault>;

    /// Fills `count` bytes starting at zero, stopping at the first fault.
    ///
    /// # Errors
    ///
    /// The first [`CopyFault`] hit.
    fn fill_bytes(&mut self, count: usize, byte: u8) -> Result<(), CopyFault> {
        (0..count).try_for_each(|offset| self.write_byte(offset, byte))
    }
}

impl UserBuffer for [u8] {
    fn write_byte(&mut self, offset: usize, byte: u8) -> Result<(), CopyFault> {
        let slot = self.get_mut(offset).ok_or(CopyFault { offset })?;
        *slot = byte;
        Ok(())
    }

    fn fill_bytes(&mut self, count: usize, byte: u8) -> Result<(), CopyFault> {
        if count > self.len() {
            <[u8]>::fill(self, byte);
            return Err(CopyFault { offset: self.len() });
        }
        <[u8]>::fill(&mut self[..count], byte);
        Ok(())
    }
}

impl UserBuffer for Vec<u8> {
    /// Grows as needed; never faults.
    fn write_byte(&mut self, offset: usize, byte: u8) -> Result<(), CopyFault> {
        if offset >= self.len() {
            self.resize(offset + 1, 0);
        }
        self[offset] = byte;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let flags = OpenFlags::NONE | OpenFlags::NONBLOCK;
        assert!(flags.contains(OpenFlags::NONBLOCK));
        assert!(!OpenFlags::NONE.contains(OpenFlags::NONBLOCK));
        assert!(File::detached(flags).is_nonblocking());
    }

    #[test]
    fn slice_faults_past_its_end() {
        let mut buf = [0u8; 4];
        assert_eq!(buf.as_mut_slice().fill_bytes(3, FILLER_BYTE), Ok(()));
        assert_eq!(buf, [0xFF, 0xFF, 0xFF, 0]);

        let mut short = [0u8; 2];
        assert_eq!(
            short.as_mut_slice().fill_bytes(5, FILLER_BYTE),
            Err(CopyFault { offset: 2 })
        );
        assert_eq!(short, [0xFF, 0xFF]);
    }

    #[test]
    fn vec_grows() {
        let mut buf: Vec<u8> = Vec::new();
        assert_eq!(buf.fill_bytes(3, FILLER_BYTE), Ok(()));
        assert_eq!(buf, vec![0xFF; 3]);
    }

    #[test]
    fn detached_file_has_no_session() {
        let file = File::detached(OpenFlags::NONE);
        assert!(file.session().is_none());
    }
}
