//! Integration tests for the vsync receiver.

use metronome_client::VSyncReceiver;
use metronome_dispatch::{SocketChannel, VSyncConnectionApi};
use metronome_shared::{VsyncError, VsyncResult};
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixDatagram;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A connection whose requests are answered immediately with a tick.
struct LoopbackConnection {
    channel: SocketChannel,
    fd_requests: AtomicUsize,
    next_timestamp: AtomicI64,
    rate: Mutex<Option<i32>>,
}

impl LoopbackConnection {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            channel: SocketChannel::new().unwrap(),
            fd_requests: AtomicUsize::new(0),
            next_timestamp: AtomicI64::new(1_000),
            rate: Mutex::new(None),
        })
    }
}

impl VSyncConnectionApi for LoopbackConnection {
    fn request_next_vsync(&self) -> VsyncResult<()> {
        let ts = self.next_timestamp.fetch_add(1_000, Ordering::SeqCst);
        self.channel
            .send_timestamp(ts)
            .map_err(|_| VsyncError::RemoteCallFailure)
    }

    fn get_receive_fd(&self) -> VsyncResult<OwnedFd> {
        self.fd_requests.fetch_add(1, Ordering::SeqCst);
        self.channel
            .receive_fd()
            .map_err(|_| VsyncError::InvalidOperating)
    }

    fn set_vsync_rate(&self, rate: i32) -> VsyncResult<()> {
        if rate <= 0 {
            return Err(VsyncError::InvalidArguments);
        }
        *self.rate.lock() = Some(rate);
        Ok(())
    }
}

/// A connection whose read end the test writes to directly.
struct RawConnection {
    rx: Mutex<Option<UnixDatagram>>,
}

impl RawConnection {
    fn new() -> (Arc<Self>, UnixDatagram) {
        let (tx, rx) = UnixDatagram::pair().unwrap();
        tx.set_nonblocking(true).unwrap();
        let conn = Arc::new(Self {
            rx: Mutex::new(Some(rx)),
        });
        (conn, tx)
    }
}

impl VSyncConnectionApi for RawConnection {
    fn request_next_vsync(&self) -> VsyncResult<()> {
        Ok(())
    }

    fn get_receive_fd(&self) -> VsyncResult<OwnedFd> {
        self.rx
            .lock()
            .take()
            .map(OwnedFd::from)
            .ok_or(VsyncError::InvalidOperating)
    }

    fn set_vsync_rate(&self, _rate: i32) -> VsyncResult<()> {
        Ok(())
    }
}

/// A runtime that only runs the read task while the test drives it.
fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn drive(runtime: &tokio::runtime::Runtime) {
    runtime.block_on(async { tokio::time::sleep(Duration::from_millis(100)).await });
}

fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

#[test]
fn test_calls_before_init_fail() {
    let conn = LoopbackConnection::new();
    let receiver = VSyncReceiver::new(conn.clone(), "early");

    assert_eq!(
        receiver.request_next_vsync(|_| {}),
        Err(VsyncError::InvalidOperating)
    );
    assert_eq!(
        receiver.set_vsync_rate(|_| {}, 2),
        Err(VsyncError::InvalidOperating)
    );
    assert_eq!(conn.fd_requests.load(Ordering::SeqCst), 0);
}

#[test]
fn test_init_is_idempotent() {
    let conn = LoopbackConnection::new();
    let receiver = VSyncReceiver::new(conn.clone(), "idempotent");

    receiver.init().unwrap();
    receiver.init().unwrap();
    assert!(receiver.is_initialized());
    assert_eq!(conn.fd_requests.load(Ordering::SeqCst), 1);
}

#[test]
fn test_request_invokes_callback() {
    let conn = LoopbackConnection::new();
    let receiver = VSyncReceiver::new(conn.clone(), "frames");
    receiver.init().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    receiver
        .request_next_vsync(move |ts| sink.lock().push(ts))
        .unwrap();

    assert!(wait_for(|| !seen.lock().is_empty()));
    // No new data, no further callbacks
    thread::sleep(Duration::from_millis(50));
    assert_eq!(*seen.lock(), vec![1_000]);
}

#[test]
fn test_latest_callback_wins() {
    let conn = LoopbackConnection::new();
    let receiver = VSyncReceiver::new(conn.clone(), "swap");
    receiver.init().unwrap();

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let counter = first.clone();
    receiver
        .request_next_vsync(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(wait_for(|| first.load(Ordering::SeqCst) == 1));

    let counter = second.clone();
    receiver
        .request_next_vsync(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(wait_for(|| second.load(Ordering::SeqCst) == 1));
    assert_eq!(first.load(Ordering::SeqCst), 1);
}

#[test]
fn test_set_rate_forwards() {
    let conn = LoopbackConnection::new();
    let receiver = VSyncReceiver::new(conn.clone(), "rate");
    receiver.init().unwrap();

    receiver.set_vsync_rate(|_| {}, 2).unwrap();
    assert_eq!(*conn.rate.lock(), Some(2));
    assert_eq!(
        receiver.set_vsync_rate(|_| {}, 0),
        Err(VsyncError::InvalidArguments)
    );
}

#[test]
fn test_runs_on_supplied_runtime() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_io()
        .build()
        .unwrap();
    let conn = LoopbackConnection::new();
    let receiver = VSyncReceiver::with_handle(conn.clone(), "hosted", runtime.handle().clone());
    receiver.init().unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    receiver
        .request_next_vsync(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert!(wait_for(|| hits.load(Ordering::SeqCst) == 1));

    drop(receiver);
    runtime.shutdown_background();
}

#[test]
fn test_queued_ticks_coalesce_into_one_callback() {
    let runtime = paused_runtime();
    let conn = LoopbackConnection::new();
    let receiver = VSyncReceiver::with_handle(conn.clone(), "burst", runtime.handle().clone());
    receiver.init().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    receiver
        .request_next_vsync(move |ts| sink.lock().push(ts))
        .unwrap();
    // Two more ticks land before the read task gets to run
    conn.request_next_vsync().unwrap();
    conn.request_next_vsync().unwrap();

    drive(&runtime);
    assert_eq!(*seen.lock(), vec![3_000]);
}

#[test]
fn test_partial_datagram_ignored() {
    let runtime = paused_runtime();
    let (conn, tx) = RawConnection::new();
    let receiver = VSyncReceiver::with_handle(conn, "partial", runtime.handle().clone());
    receiver.init().unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    receiver
        .set_vsync_rate(move |ts| sink.lock().push(ts), 1)
        .unwrap();

    tx.send(&[1, 2, 3]).unwrap();
    drive(&runtime);
    assert!(seen.lock().is_empty());

    tx.send(&5_000i64.to_ne_bytes()).unwrap();
    tx.send(&[9; 5]).unwrap();
    drive(&runtime);
    assert_eq!(*seen.lock(), vec![5_000]);
}

#[test]
fn test_drop_stops_reading_and_closes_fd() {
    let (conn, tx) = RawConnection::new();
    let receiver = VSyncReceiver::new(conn, "dropped");
    receiver.init().unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    receiver
        .set_vsync_rate(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            1,
        )
        .unwrap();
    tx.send(&1i64.to_ne_bytes()).unwrap();
    assert!(wait_for(|| hits.load(Ordering::SeqCst) == 1));

    drop(receiver);
    // Once the read end is closed, sends fail outright instead of queueing
    assert!(wait_for(|| matches!(
        tx.send(&2i64.to_ne_bytes()),
        Err(e) if e.kind() != ErrorKind::WouldBlock
    )));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
