//! Readiness checks and multiplexed waits.

use std::sync::mpsc;
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use devone::{
    DeviceConfig, DeviceError, FileOperations, OpenFlags, PollFd, PollMask, PollTable,
    ReadinessController, Task, TaskState, WaiterStatus, poll, select_read,
};

static INIT_TRACING: Once = Once::new();

fn init_test_tracing() {
    INIT_TRACING.call_once(|| {
        devone::init_tracing();
    });
}

fn device(timeout: Duration) -> Arc<ReadinessController> {
    init_test_tracing();
    Arc::new(
        ReadinessController::new(DeviceConfig::fast().with_timeout(timeout))
            .expect("start device"),
    )
}

fn wait_until_sleeping(task: &Task) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while task.state() != TaskState::Sleeping {
        assert!(Instant::now() < deadline, "{task:?} never went to sleep");
        thread::sleep(Duration::from_millis(1));
    }
}

const READABLE: PollMask = PollMask::IN;

#[test]
fn check_before_and_after_timeout() {
    let timeout = Duration::from_millis(30);
    let dev = device(timeout);
    let file = dev.open(OpenFlags::NONE).unwrap();

    let before = dev.poll(&file, None).unwrap();
    assert!(!before.intersects(PollMask::IN | PollMask::RDNORM));
    assert!(before.contains(PollMask::OUT | PollMask::WRNORM));
    assert_ne!(dev.waiter_status(), WaiterStatus::NoWaitingTask);

    thread::sleep(timeout * 2);
    let after = dev.poll(&file, None).unwrap();
    assert!(after.contains(PollMask::IN | PollMask::RDNORM));
    assert_eq!(dev.waiter_status(), WaiterStatus::NoWaitingTask);
}

#[test]
fn registration_is_woken_by_the_timer() {
    let dev = device(Duration::from_millis(20));
    let file = dev.open(OpenFlags::NONE).unwrap();
    let mut table = PollTable::new();
    dev.poll(&file, Some(&mut table)).unwrap();
    assert_eq!(table.len(), 1);

    let task = Task::current();
    let deadline = minstant::Instant::now() + Duration::from_secs(5);
    assert_eq!(table.waiter().wait(&task, Some(deadline)), Ok(true));
    assert!(dev.poll(&file, None).unwrap().contains(READABLE));
}

#[test]
fn dropped_registration_is_never_woken() {
    let timeout = Duration::from_millis(20);
    let dev = device(timeout);
    let file = dev.open(OpenFlags::NONE).unwrap();
    let mut table = PollTable::new();
    dev.poll(&file, Some(&mut table)).unwrap();
    let waiter = table.waiter().clone();
    drop(table);

    thread::sleep(timeout * 3);
    assert!(file.session().unwrap().is_ready());
    assert!(!waiter.is_notified());
}

#[test]
fn poll_times_out_then_reports_readable() {
    let timeout = Duration::from_millis(80);
    let dev = device(timeout);
    let file = dev.open(OpenFlags::NONE).unwrap();

    let mut fds = [PollFd::new(&file, READABLE)];
    let start = Instant::now();
    assert_eq!(poll(&*dev, &mut fds, Some(Duration::from_millis(20))), Ok(0));
    assert!(start.elapsed() >= Duration::from_millis(20));
    assert!(fds[0].revents.is_empty());

    assert_eq!(poll(&*dev, &mut fds, Some(Duration::from_secs(5))), Ok(1));
    assert_eq!(fds[0].revents, PollMask::IN);
    assert!(start.elapsed() >= timeout);
}

#[test]
fn zero_timeout_checks_once() {
    let dev = device(Duration::from_secs(60));
    let file = dev.open(OpenFlags::NONE).unwrap();
    let mut fds = [PollFd::new(&file, READABLE | PollMask::OUT)];
    assert_eq!(poll(&*dev, &mut fds, Some(Duration::ZERO)), Ok(1));
    assert_eq!(fds[0].revents, PollMask::OUT);
}

#[test]
fn only_ready_entries_are_reported() {
    let timeout = Duration::from_millis(60);
    let dev = device(timeout);
    let early = dev.open(OpenFlags::NONE).unwrap();
    thread::sleep(timeout / 2);
    let late = dev.open(OpenFlags::NONE).unwrap();

    let mut fds = [PollFd::new(&early, READABLE), PollFd::new(&late, READABLE)];
    assert_eq!(poll(&*dev, &mut fds, Some(Duration::from_secs(5))), Ok(1));
    assert_eq!(fds[0].revents, PollMask::IN);
    assert!(fds[1].revents.is_empty());
}

#[test]
fn interrupting_a_poller() {
    let dev = device(Duration::from_secs(60));
    let file = Arc::new(dev.open(OpenFlags::NONE).unwrap());

    let (tx, rx) = mpsc::channel();
    let poller = {
        let dev = Arc::clone(&dev);
        let file = Arc::clone(&file);
        thread::spawn(move || {
            tx.send(Task::current()).unwrap();
            let mut fds = [PollFd::new(&file, READABLE)];
            poll(&*dev, &mut fds, None)
        })
    };
    let task = rx.recv().unwrap();
    wait_until_sleeping(&task);
    assert_eq!(dev.waiter_status(), WaiterStatus::Sleeping);

    task.interrupt();
    assert_eq!(poller.join().unwrap(), Err(DeviceError::Interrupted));
    assert_eq!(dev.waiter_status(), WaiterStatus::Running);
}

#[test]
fn select_reports_ready_indices() {
    let timeout = Duration::from_millis(30);
    let dev = device(timeout);
    let a = dev.open(OpenFlags::NONE).unwrap();
    let b = dev.open(OpenFlags::NONE).unwrap();

    assert_eq!(select_read(&*dev, &[&a, &b], Some(Duration::ZERO)), Ok(vec![]));
    thread::sleep(timeout * 2);
    assert_eq!(select_read(&*dev, &[&a, &b], None), Ok(vec![0, 1]));

    let mut buf = [0u8; 1];
    dev.read(&a, &mut buf[..], 1).unwrap();
    assert_eq!(select_read(&*dev, &[&a, &b], None), Ok(vec![1]));
}

#[test]
fn released_file_reports_nval() {
    let dev = device(Duration::from_secs(60));
    let mut file = dev.open(OpenFlags::NONE).unwrap();
    dev.release(&mut file).unwrap();

    let mut fds = [PollFd::new(&file, READABLE)];
    assert_eq!(poll(&*dev, &mut fds, None), Ok(1));
    assert_eq!(fds[0].revents, PollMask::NVAL);
    assert_eq!(
        select_read(&*dev, &[&file], None),
        Err(DeviceError::BadSession)
    );
}
