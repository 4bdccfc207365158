//! # Vsync Receiver
//!
//! Client-side bridge from a connection's channel to a frame callback.
//!
//! ```text
//!   channel fd ──readable──> drain all queued ticks ──> callback(latest)
//!              (tokio task)   (keep only the newest)    (once per wake)
//! ```
//!
//! The read task runs on the consumer's tokio runtime when one is supplied,
//! otherwise on a single-worker runtime owned by the receiver.

use metronome_dispatch::{decode_timestamps, VSyncConnectionApi};
use metronome_shared::{VsyncError, VsyncResult};
use parking_lot::Mutex;
use std::io;
use std::os::unix::net::UnixDatagram as StdUnixDatagram;
use std::sync::Arc;
use tokio::net::UnixDatagram;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

/// Frame callback; receives the newest tick timestamp.
pub type FrameCallback = Arc<dyn Fn(i64) + Send + Sync>;

type CallbackSlot = Arc<Mutex<Option<FrameCallback>>>;

/// Room for a burst of coalesced ticks in one receive call.
const READ_BUFFER_SIZE: usize = 1024;

/// Drains everything `recv` can return without blocking.
///
/// Returns the newest complete timestamp seen, or `None` if nothing was
/// queued. A zero-length read ends the drain.
pub fn drain_latest<F>(mut recv: F) -> io::Result<Option<i64>>
where
    F: FnMut(&mut [u8]) -> io::Result<usize>,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];
    let mut latest = None;
    loop {
        match recv(&mut buf) {
            Ok(0) => return Ok(latest),
            Ok(n) => {
                if let Some(ts) = decode_timestamps(&buf[..n]).last() {
                    latest = Some(ts);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(latest),
            Err(e) => return Err(e),
        }
    }
}

async fn read_loop(socket: UnixDatagram, callback: CallbackSlot, name: String) {
    loop {
        if let Err(e) = socket.readable().await {
            tracing::warn!(receiver = %name, error = %e, "vsync fd wait failed");
            return;
        }
        match drain_latest(|buf| socket.try_recv(buf)) {
            Ok(Some(timestamp)) => {
                let callback = callback.lock().clone();
                match callback {
                    Some(callback) => callback(timestamp),
                    None => tracing::trace!(receiver = %name, timestamp, "tick without callback"),
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(receiver = %name, error = %e, "vsync fd read failed");
                return;
            }
        }
    }
}

#[derive(Default)]
struct ReceiverState {
    initialized: bool,
    runtime: Option<Runtime>,
    task: Option<JoinHandle<()>>,
}

/// Consumer-side vsync receiver.
pub struct VSyncReceiver {
    name: String,
    connection: Arc<dyn VSyncConnectionApi>,
    handle: Option<Handle>,
    callback: CallbackSlot,
    state: Mutex<ReceiverState>,
}

impl VSyncReceiver {
    /// Creates a receiver that will run on its own runtime.
    #[must_use]
    pub fn new(connection: Arc<dyn VSyncConnectionApi>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connection,
            handle: None,
            callback: Arc::new(Mutex::new(None)),
            state: Mutex::new(ReceiverState::default()),
        }
    }

    /// Creates a receiver that runs its read task on `handle`.
    #[must_use]
    pub fn with_handle(
        connection: Arc<dyn VSyncConnectionApi>,
        name: impl Into<String>,
        handle: Handle,
    ) -> Self {
        Self {
            name: name.into(),
            connection,
            handle: Some(handle),
            callback: Arc::new(Mutex::new(None)),
            state: Mutex::new(ReceiverState::default()),
        }
    }

    /// Fetches the fd and starts listening. Idempotent.
    pub fn init(&self) -> VsyncResult<()> {
        let mut state = self.state.lock();
        if state.initialized {
            return Ok(());
        }

        let fd = self.connection.get_receive_fd()?;
        let socket = StdUnixDatagram::from(fd);
        socket.set_nonblocking(true).map_err(|e| self.io_failure("set_nonblocking", &e))?;

        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => {
                let runtime = Builder::new_multi_thread()
                    .worker_threads(1)
                    .thread_name(format!("vsync-rx-{}", self.name))
                    .enable_io()
                    .build()
                    .map_err(|e| self.io_failure("runtime", &e))?;
                let handle = runtime.handle().clone();
                state.runtime = Some(runtime);
                handle
            }
        };

        let socket = {
            let _guard = handle.enter();
            UnixDatagram::from_std(socket).map_err(|e| self.io_failure("register", &e))?
        };
        let task = handle.spawn(read_loop(
            socket,
            Arc::clone(&self.callback),
            self.name.clone(),
        ));

        state.task = Some(task);
        state.initialized = true;
        tracing::debug!(receiver = %self.name, "vsync receiver initialized");
        Ok(())
    }

    fn io_failure(&self, stage: &str, e: &io::Error) -> VsyncError {
        tracing::warn!(receiver = %self.name, stage, error = %e, "vsync receiver init failed");
        VsyncError::InvalidOperating
    }

    fn store_callback<F>(&self, callback: F) -> VsyncResult<()>
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        if !self.state.lock().initialized {
            return Err(VsyncError::InvalidOperating);
        }
        *self.callback.lock() = Some(Arc::new(callback));
        Ok(())
    }

    /// Requests one frame; `callback` runs with the tick's timestamp.
    pub fn request_next_vsync<F>(&self, callback: F) -> VsyncResult<()>
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        self.store_callback(callback)?;
        self.connection.request_next_vsync()
    }

    /// Requests every `rate`-th frame.
    pub fn set_vsync_rate<F>(&self, callback: F, rate: i32) -> VsyncResult<()>
    where
        F: Fn(i64) + Send + Sync + 'static,
    {
        self.store_callback(callback)?;
        self.connection.set_vsync_rate(rate)
    }

    /// Whether [`VSyncReceiver::init`] has succeeded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }
}

impl Drop for VSyncReceiver {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(task) = state.task.take() {
            task.abort();
        }
        if let Some(runtime) = state.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for VSyncReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VSyncReceiver")
            .field("name", &self.name)
            .field("initialized", &self.is_initialized())
            .field("external_runtime", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}
