//! # Vsync Connection
//!
//! One consumer's handle on a [`Distributor`]. Holds the consumer's
//! [`SocketChannel`] and forwards rate requests to the distributor through
//! a weak back-reference, so the distributor stays the sole owner.
//!
//! Rate state lives in the distributor's table, guarded by its lock.

use crate::channel::SocketChannel;
use crate::distributor::{Distributor, DistributorInner};
use crate::ipc::VSyncConnectionApi;
use metronome_shared::{PostError, VsyncError, VsyncResult};
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Per-consumer vsync handle.
pub struct Connection {
    name: String,
    channel: Option<SocketChannel>,
    distributor: Weak<DistributorInner>,
    post_count: AtomicU64,
    receive_fd_taken: AtomicBool,
}

impl Connection {
    /// Creates a connection bound to `distributor`.
    ///
    /// The connection is not registered until passed to
    /// [`Distributor::add_connection`]. A channel that cannot be created
    /// is logged; such a connection fails every post and gets reclaimed.
    #[must_use]
    pub fn new(distributor: &Distributor, name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        let channel = match SocketChannel::new() {
            Ok(channel) => Some(channel),
            Err(e) => {
                tracing::error!(connection = %name, error = %e, "failed to create vsync channel");
                None
            }
        };
        Arc::new(Self {
            name,
            channel,
            distributor: Arc::downgrade(distributor.inner()),
            post_count: AtomicU64::new(0),
            receive_fd_taken: AtomicBool::new(false),
        })
    }

    #[cfg(test)]
    pub(crate) fn without_channel(distributor: &Distributor, name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            channel: None,
            distributor: Arc::downgrade(distributor.inner()),
            post_count: AtomicU64::new(0),
            receive_fd_taken: AtomicBool::new(false),
        })
    }

    /// Connection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ticks successfully written.
    #[must_use]
    pub fn post_count(&self) -> u64 {
        self.post_count.load(Ordering::Relaxed)
    }

    /// Writes one tick to the channel without blocking.
    pub fn post_event(&self, timestamp: i64) -> Result<(), PostError> {
        let channel = self.channel.as_ref().ok_or(PostError::Broken)?;
        channel.send_timestamp(timestamp)?;
        self.post_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn distributor(&self) -> VsyncResult<Arc<DistributorInner>> {
        self.distributor.upgrade().ok_or(VsyncError::Nullptr)
    }

    /// Arms one tick. No-op while already armed or periodic.
    pub fn request_next_vsync(&self) -> VsyncResult<()> {
        self.distributor()?.request_next_vsync(self)
    }

    /// Switches to a periodic rate.
    pub fn set_vsync_rate(&self, rate: i32) -> VsyncResult<()> {
        self.distributor()?.set_vsync_rate(rate, self)
    }

    /// Sets the overriding high-priority rate.
    pub fn set_high_priority_vsync_rate(&self, rate: i32) -> VsyncResult<()> {
        self.distributor()?.set_high_priority_vsync_rate(rate, self)
    }

    /// Hands out a duplicate of the channel's read end.
    ///
    /// Only the first successful call gets a descriptor. Two readers on the
    /// same datagram socket would split the ticks between them, so later
    /// calls fail with `InvalidOperating`.
    pub fn get_receive_fd(&self) -> VsyncResult<OwnedFd> {
        let channel = self.channel.as_ref().ok_or(VsyncError::InvalidOperating)?;
        if self.receive_fd_taken.swap(true, Ordering::AcqRel) {
            tracing::warn!(connection = %self.name, "receive fd already handed out");
            return Err(VsyncError::InvalidOperating);
        }
        channel.receive_fd().map_err(|e| {
            self.receive_fd_taken.store(false, Ordering::Release);
            tracing::warn!(connection = %self.name, error = %e, "failed to duplicate receive fd");
            VsyncError::InvalidOperating
        })
    }

    /// Unregisters from the owning distributor.
    pub fn destroy(&self) -> VsyncResult<()> {
        self.distributor()?.remove_connection(self)
    }
}

impl VSyncConnectionApi for Connection {
    fn request_next_vsync(&self) -> VsyncResult<()> {
        Connection::request_next_vsync(self)
    }

    fn get_receive_fd(&self) -> VsyncResult<OwnedFd> {
        Connection::get_receive_fd(self)
    }

    fn set_vsync_rate(&self, rate: i32) -> VsyncResult<()> {
        Connection::set_vsync_rate(self, rate)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("has_channel", &self.channel.is_some())
            .field("post_count", &self.post_count())
            .finish_non_exhaustive()
    }
}
