//! The operations layer: open/release, read, write and readiness checks.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::config::DeviceConfig;
use crate::runtime::timer::{TimerError, TimerService};
use crate::sync::{PollTable, Task};
use crate::trace::{debug, info, trace};

use super::file::{FILLER_BYTE, File, OpenFlags, UserBuffer};
use super::poll::PollMask;
use super::session::{Session, SessionId, SessionSlot};
use super::status::WaiterStatus;
use super::DeviceError;

/// File-operations table of a character device.
pub trait FileOperations {
    /// Opens a new session.
    ///
    /// # Errors
    ///
    /// [`DeviceError::OutOfMemory`] if no session can be allocated.
    fn open(&self, flags: OpenFlags) -> Result<File, DeviceError>;

    /// Closes the file's session and waits out its timer.
    ///
    /// # Errors
    ///
    /// [`DeviceError::BadSession`] if the file was already released.
    fn release(&self, file: &mut File) -> Result<(), DeviceError>;

    /// Reads `count` bytes into `buf`.
    ///
    /// # Errors
    ///
    /// See [`DeviceError`].
    fn read<B>(&self, file: &File, buf: &mut B, count: usize) -> Result<usize, DeviceError>
    where
        B: UserBuffer + ?Sized;

    /// Writes `data` to the device and returns how many bytes it took.
    ///
    /// # Errors
    ///
    /// [`DeviceError::NotSupported`] for a device that accepts no input. The
    /// readiness device always returns it, with or without a session.
    fn write(&self, file: &File, data: &[u8]) -> Result<usize, DeviceError>;

    /// Reports readiness without blocking, registering `table` for wake-ups.
    ///
    /// # Errors
    ///
    /// [`DeviceError::BadSession`] if the file has no session.
    fn poll(&self, file: &File, table: Option<&mut PollTable>) -> Result<PollMask, DeviceError>;
}

/// The readiness device.
///
/// Every session opened here becomes readable `timeout` after it was opened
/// or last read, one reader at a time.
pub struct ReadinessController {
    config: DeviceConfig,
    timers: Arc<TimerService>,
    /// Last task seen by a readiness check that has not yet observed readiness.
    waiter: Mutex<Option<Task>>,
    open_sessions: Arc<AtomicUsize>,
    next_session: AtomicU64,
}

impl ReadinessController {
    /// Starts the timer thread and returns a device with no open sessions.
    ///
    /// # Errors
    ///
    /// [`TimerError::Spawn`] if the timer thread cannot be started.
    pub fn new(config: DeviceConfig) -> Result<Self, TimerError> {
        let timers = Arc::new(TimerService::spawn(&config.timer())?);
        info!(
            timeout_ms = u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX),
            max_sessions = config.max_sessions.get(),
            "readiness device up"
        );
        Ok(Self {
            config,
            timers,
            waiter: Mutex::new(None),
            open_sessions: Arc::new(AtomicUsize::new(0)),
            next_session: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }

    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::Acquire)
    }

    /// Timers armed and not yet fired, across all sessions.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    /// Scheduling state of the last task recorded by [`FileOperations::poll`].
    #[must_use]
    pub fn waiter_status(&self) -> WaiterStatus {
        let waiter = self.waiter.lock().clone();
        waiter.map_or(WaiterStatus::NoWaitingTask, |task| task.state().into())
    }

    /// Writes [`Self::waiter_status`] as one line.
    ///
    /// # Errors
    ///
    /// Whatever `out` fails with.
    pub fn write_status<W>(&self, out: &mut W) -> io::Result<()>
    where
        W: io::Write + ?Sized,
    {
        writeln!(out, "{}", self.waiter_status())
    }

    fn record_waiter(&self, task: Option<Task>) {
        *self.waiter.lock() = task;
    }
}

impl FileOperations for ReadinessController {
    fn open(&self, flags: OpenFlags) -> Result<File, DeviceError> {
        let Some(slot) = SessionSlot::acquire(&self.open_sessions, self.config.max_sessions)
        else {
            debug!(limit = self.config.max_sessions.get(), "session limit reached");
            return Err(DeviceError::OutOfMemory);
        };
        let id = SessionId::new(self.next_session.fetch_add(1, Ordering::Relaxed));
        let session = Session::open(id, Arc::clone(&self.timers), self.config.timeout, slot)?;
        Ok(File::with_session(flags, session))
    }

    fn release(&self, file: &mut File) -> Result<(), DeviceError> {
        let session = file.take_session().ok_or(DeviceError::BadSession)?;
        trace!(session = session.id().get(), "release");
        session.close();
        Ok(())
    }

    fn read<B>(&self, file: &File, buf: &mut B, count: usize) -> Result<usize, DeviceError>
    where
        B: UserBuffer + ?Sized,
    {
        let session = file.session().ok_or(DeviceError::BadSession)?;
        let state = session.state();
        let task = Task::current();
        trace!(session = session.id().get(), task = %task.id(), count, "read");

        let mut data = state.data.lock_interruptible(&task)?;
        while !data.ready {
            let ticket = state.read_wait.ticket();
            drop(data);
            if file.is_nonblocking() {
                return Err(DeviceError::WouldBlock);
            }
            state.read_wait.wait_interruptible(&task, ticket)?;
            data = state.data.lock_interruptible(&task)?;
        }

        let copied = buf
            .fill_bytes(count, FILLER_BYTE)
            .map_err(|fault| DeviceError::Fault { offset: fault.offset });
        data.ready = false;
        session.arm(&mut data)?;
        drop(data);

        debug!(session = session.id().get(), task = %task.id(), ok = copied.is_ok(), "read consumed readiness");
        copied.map(|()| count)
    }

    fn write(&self, _file: &File, data: &[u8]) -> Result<usize, DeviceError> {
        trace!(len = data.len(), "write rejected");
        Err(DeviceError::NotSupported)
    }

    fn poll(&self, file: &File, table: Option<&mut PollTable>) -> Result<PollMask, DeviceError> {
        let session = file.session().ok_or(DeviceError::BadSession)?;
        let state = session.state();
        let task = Task::current();

        let data = state.data.lock();
        self.record_waiter(Some(task));
        state.read_wait.register(table);

        let mut mask = PollMask::OUT | PollMask::WRNORM;
        if data.ready {
            mask |= PollMask::IN | PollMask::RDNORM;
            self.record_waiter(None);
        }
        drop(data);

        trace!(session = session.id().get(), mask = mask.bits(), "poll");
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use std::time::Duration;

    fn device(timeout: Duration) -> ReadinessController {
        ReadinessController::new(DeviceConfig::fast().with_timeout(timeout)).unwrap()
    }

    #[test]
    fn nonblocking_read_before_timeout_would_block() {
        let dev = device(Duration::from_secs(60));
        let file = dev.open(OpenFlags::NONBLOCK).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(dev.read(&file, &mut buf[..], 8), Err(DeviceError::WouldBlock));
        assert_eq!(buf, [0; 8]);
    }

    #[test]
    fn write_is_never_supported() {
        let dev = device(Duration::from_secs(60));
        let file = dev.open(OpenFlags::NONE).unwrap();
        assert_eq!(dev.write(&file, b"x"), Err(DeviceError::NotSupported));
        assert_eq!(
            dev.write(&File::detached(OpenFlags::NONE), b""),
            Err(DeviceError::NotSupported)
        );
    }

    #[test]
    fn released_file_is_a_bad_session() {
        let dev = device(Duration::from_secs(60));
        let mut file = dev.open(OpenFlags::NONE).unwrap();
        dev.release(&mut file).unwrap();
        assert_eq!(dev.release(&mut file), Err(DeviceError::BadSession));
        assert_eq!(dev.poll(&file, None), Err(DeviceError::BadSession));
        let mut buf = [0u8; 1];
        assert_eq!(dev.read(&file, &mut buf[..], 1), Err(DeviceError::BadSession));
        assert_eq!(dev.open_sessions(), 0);
    }

    #[test]
    fn session_limit_maps_to_out_of_memory() {
        let config = DeviceConfig::fast()
            .with_timeout(Duration::from_secs(60))
            .with_max_sessions(NonZeroUsize::new(1).unwrap());
        let dev = ReadinessController::new(config).unwrap();
        let first = dev.open(OpenFlags::NONE).unwrap();
        assert_eq!(dev.open(OpenFlags::NONE).err(), Some(DeviceError::OutOfMemory));
        drop(first);
        assert!(dev.open(OpenFlags::NONE).is_ok());
    }

    #[test]
    fn poll_records_then_clears_waiter() {
        let dev = device(Duration::from_millis(20));
        let file = dev.open(OpenFlags::NONE).unwrap();
        assert_eq!(dev.waiter_status(), WaiterStatus::NoWaitingTask);

        let mask = dev.poll(&file, None).unwrap();
        assert_eq!(mask, PollMask::OUT | PollMask::WRNORM);
        assert_eq!(dev.waiter_status(), WaiterStatus::Running);

        while !file.session().unwrap().is_ready() {
            std::thread::sleep(Duration::from_millis(2));
        }
        let mask = dev.poll(&file, None).unwrap();
        assert!(mask.contains(PollMask::IN | PollMask::RDNORM | PollMask::OUT));
        assert_eq!(dev.waiter_status(), WaiterStatus::NoWaitingTask);

        let mut line = Vec::new();
        dev.write_status(&mut line).unwrap();
        assert_eq!(line, b"no waiting task\n");
    }
}
