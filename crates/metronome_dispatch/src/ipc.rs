//! # Connection IPC
//!
//! Exposes a [`Connection`](crate::Connection) to another party through
//! exactly three synchronous calls.
//!
//! ```text
//!   client                                  service
//!   VSyncConnectionProxy ──Parcel──> RemoteObject ──> VSyncConnectionStub ──> Connection
//!                        <──Parcel──   (LocalBinder:
//!                                       own thread, crossbeam queue)
//! ```
//!
//! | opcode | call | request | reply |
//! |--------|------|---------|-------|
//! | 1 | `REQUEST_NEXT_VSYNC` | token | code |
//! | 2 | `GET_RECEIVE_FD` | token | code, fd |
//! | 3 | `SET_VSYNC_RATE` | token, rate | code |
//!
//! Every request starts with [`VSYNC_CONNECTION_TOKEN`]. The stub rejects
//! a wrong token outright and answers an unknown opcode with
//! [`VsyncError::InvalidOperating`].

use crate::parcel::Parcel;
use crossbeam_channel::{bounded, unbounded, Sender};
use metronome_shared::error::{vsync_code, vsync_result_from_code};
use metronome_shared::{VsyncError, VsyncResult};
use parking_lot::Mutex;
use std::io;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Interface identity carried at the start of every request.
pub const VSYNC_CONNECTION_TOKEN: &str = "metronome.IVSyncConnection";

/// Arm one tick.
pub const REQUEST_NEXT_VSYNC: u32 = 1;
/// Fetch the channel's read descriptor.
pub const GET_RECEIVE_FD: u32 = 2;
/// Switch to a periodic rate.
pub const SET_VSYNC_RATE: u32 = 3;

/// The consumer-facing connection surface, local or remote.
pub trait VSyncConnectionApi: Send + Sync {
    /// Arms one tick.
    fn request_next_vsync(&self) -> VsyncResult<()>;
    /// Returns a duplicate of the channel's read end.
    fn get_receive_fd(&self) -> VsyncResult<OwnedFd>;
    /// Sets a periodic rate; `rate` must be positive.
    fn set_vsync_rate(&self, rate: i32) -> VsyncResult<()>;
}

/// Transport for one remote object.
pub trait RemoteObject: Send + Sync {
    /// Delivers a request and waits for the reply.
    fn send_request(&self, code: u32, data: Parcel) -> VsyncResult<Parcel>;
}

/// Service-side dispatcher for a connection.
pub struct VSyncConnectionStub {
    connection: Arc<dyn VSyncConnectionApi>,
}

impl VSyncConnectionStub {
    /// Wraps a connection.
    #[must_use]
    pub fn new(connection: Arc<dyn VSyncConnectionApi>) -> Self {
        Self { connection }
    }

    /// Decodes and executes one request.
    pub fn on_remote_request(&self, code: u32, mut data: Parcel) -> VsyncResult<Parcel> {
        match data.read_string() {
            Ok(token) if token == VSYNC_CONNECTION_TOKEN => {}
            _ => {
                tracing::warn!(code, "rejected request with bad interface token");
                return Err(VsyncError::RemoteCallFailure);
            }
        }

        let mut reply = Parcel::new();
        match code {
            REQUEST_NEXT_VSYNC => {
                reply.write_i32(vsync_code(self.connection.request_next_vsync()));
            }
            GET_RECEIVE_FD => match self.connection.get_receive_fd() {
                Ok(fd) => {
                    reply.write_i32(vsync_code(Ok(())));
                    reply.write_fd(fd);
                }
                Err(e) => reply.write_i32(e.code()),
            },
            SET_VSYNC_RATE => {
                let result = data
                    .read_i32()
                    .map_err(|_| VsyncError::InvalidArguments)
                    .and_then(|rate| self.connection.set_vsync_rate(rate));
                reply.write_i32(vsync_code(result));
            }
            _ => {
                tracing::warn!(code, "unknown vsync connection opcode");
                return Err(VsyncError::InvalidOperating);
            }
        }
        Ok(reply)
    }
}

impl RemoteObject for VSyncConnectionStub {
    fn send_request(&self, code: u32, data: Parcel) -> VsyncResult<Parcel> {
        self.on_remote_request(code, data)
    }
}

/// Client-side view of a remote connection.
pub struct VSyncConnectionProxy {
    remote: Arc<dyn RemoteObject>,
}

impl VSyncConnectionProxy {
    /// Wraps a transport.
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteObject>) -> Self {
        Self { remote }
    }

    fn call(&self, code: u32, data: Parcel) -> VsyncResult<Parcel> {
        let mut reply = self.remote.send_request(code, data)?;
        let status = reply
            .read_i32()
            .map_err(|_| VsyncError::RemoteCallFailure)?;
        vsync_result_from_code(status)?;
        Ok(reply)
    }
}

impl VSyncConnectionApi for VSyncConnectionProxy {
    fn request_next_vsync(&self) -> VsyncResult<()> {
        let data = Parcel::with_interface_token(VSYNC_CONNECTION_TOKEN);
        self.call(REQUEST_NEXT_VSYNC, data).map(drop)
    }

    fn get_receive_fd(&self) -> VsyncResult<OwnedFd> {
        let data = Parcel::with_interface_token(VSYNC_CONNECTION_TOKEN);
        let mut reply = self.call(GET_RECEIVE_FD, data)?;
        reply.read_fd().map_err(|_| VsyncError::RemoteCallFailure)
    }

    fn set_vsync_rate(&self, rate: i32) -> VsyncResult<()> {
        let mut data = Parcel::with_interface_token(VSYNC_CONNECTION_TOKEN);
        data.write_i32(rate);
        self.call(SET_VSYNC_RATE, data).map(drop)
    }
}

struct BinderRequest {
    code: u32,
    data: Parcel,
    reply: Sender<VsyncResult<Parcel>>,
}

/// In-process binder: serves a [`RemoteObject`] on its own thread.
///
/// Calls block the caller until the serving thread replies. After
/// [`LocalBinder::kill`] every call fails with `RemoteCallFailure`.
pub struct LocalBinder {
    sender: Mutex<Option<Sender<BinderRequest>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LocalBinder {
    /// Starts serving `object`.
    pub fn new(object: Arc<dyn RemoteObject>, name: &str) -> io::Result<Self> {
        let (sender, receiver) = unbounded::<BinderRequest>();
        let thread = thread::Builder::new()
            .name(format!("binder-{name}"))
            .spawn(move || {
                for request in receiver.iter() {
                    let result = object.send_request(request.code, request.data);
                    let _ = request.reply.send(result);
                }
            })?;
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Whether calls can still be delivered.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.sender.lock().is_some()
    }

    /// Stops serving and joins the serving thread.
    pub fn kill(&self) {
        drop(self.sender.lock().take());
        if let Some(thread) = self.thread.lock().take() {
            if thread.thread().id() != thread::current().id() && thread.join().is_err() {
                tracing::error!("binder thread panicked");
            }
        }
    }
}

impl RemoteObject for LocalBinder {
    fn send_request(&self, code: u32, data: Parcel) -> VsyncResult<Parcel> {
        let sender = self
            .sender
            .lock()
            .clone()
            .ok_or(VsyncError::RemoteCallFailure)?;
        let (reply, response) = bounded(1);
        sender
            .send(BinderRequest { code, data, reply })
            .map_err(|_| VsyncError::RemoteCallFailure)?;
        response.recv().map_err(|_| VsyncError::RemoteCallFailure)?
    }
}

impl Drop for LocalBinder {
    fn drop(&mut self) {
        self.kill();
    }
}
