//! # Vsync Callback Identity
//!
//! Generator listeners and controller sinks are addressed through a tagged
//! handle rather than by pointer value. A [`ListenerHandle`] pairs a unique
//! [`ListenerId`] with a weak reference to the sink, so:
//!
//! - identity comparisons never depend on addresses;
//! - a sink that has been dropped reads as "empty" and is skipped;
//! - the generator never keeps a downstream component alive.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Receiver of vsync ticks.
pub trait VSyncCallback: Send + Sync {
    /// Called with the tick timestamp in nanoseconds.
    fn on_vsync_event(&self, timestamp: i64);
}

/// Process-unique listener identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocates a fresh id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Identity-carrying, non-owning reference to a [`VSyncCallback`].
#[derive(Clone)]
pub struct ListenerHandle {
    id: ListenerId,
    sink: Weak<dyn VSyncCallback>,
}

impl ListenerHandle {
    /// Wraps a live sink under a fresh id.
    #[must_use]
    pub fn new(sink: &Arc<dyn VSyncCallback>) -> Self {
        Self {
            id: ListenerId::next(),
            sink: Arc::downgrade(sink),
        }
    }

    /// Wraps an already-weak sink under a fresh id.
    ///
    /// Useful from inside `Arc::new_cyclic`, before the strong owner exists.
    #[must_use]
    pub fn from_weak(sink: Weak<dyn VSyncCallback>) -> Self {
        Self {
            id: ListenerId::next(),
            sink,
        }
    }

    /// The identity of this handle.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ListenerId {
        self.id
    }

    /// Returns true if the sink has been dropped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sink.strong_count() == 0
    }

    /// Delivers a tick. Returns false if the sink is gone.
    pub fn fire(&self, timestamp: i64) -> bool {
        match self.sink.upgrade() {
            Some(sink) => {
                sink.on_vsync_event(timestamp);
                true
            }
            None => false,
        }
    }
}

impl PartialEq for ListenerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ListenerHandle {}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .field("alive", &!self.is_empty())
            .finish()
    }
}
