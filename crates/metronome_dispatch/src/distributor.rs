//! # Vsync Distributor
//!
//! Turns one controller's tick stream into per-connection notifications.
//!
//! ## Rate Regimes
//!
//! | rate | regime | on tick `n` |
//! |------|--------|-------------|
//! | idle (-1) | no interest | nothing |
//! | once (0) | one-shot | fire, back to idle |
//! | N > 0 | periodic | fire if `n % N == 0` |
//!
//! A high-priority (QoS) rate, when set, replaces `N` as the divisor for
//! both armed and periodic connections.
//!
//! ## Thread Loop
//!
//! ```text
//!   ┌────────────── wait (untimed, or soft period while requesters wait)
//!   v
//!   take event ──> collect ready connections under lock
//!                     │
//!        no event ────┼──> someone waiting? enable controller : sleep
//!        event, nobody waiting ──> disable controller
//!        event, ready set ──> post outside lock ──> fix up failures
//! ```
//!
//! The hardware path is switched off as soon as a tick arrives that no
//! connection wants, and back on at the first request.

use crate::connection::Connection;
use metronome_core::Controller;
use metronome_shared::time::monotonic_now_ns;
use metronome_shared::{
    DistributorConfig, ListenerHandle, PostError, PriorityHint, VSyncCallback, VSyncEvent,
    VSyncRate, VsyncError, VsyncResult,
};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Diagnostic snapshot of one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection name.
    pub name: String,
    /// Ticks successfully written to the channel.
    pub post_count: u64,
    /// Raw rate (-1 idle, 0 once, N periodic).
    pub rate: i32,
    /// High-priority rate, meaningful when `high_priority_state` is set.
    pub high_priority_rate: i32,
    /// Whether the high-priority rate overrides `rate`.
    pub high_priority_state: bool,
}

/// Extracts the QoS pid from a connection name.
///
/// Only names containing `"WM"` take part in QoS. The pid is the run of
/// digits right after the first `_`.
#[must_use]
pub fn qos_pid_from_name(name: &str) -> Option<u32> {
    if !name.contains("WM") {
        return None;
    }
    let rest = &name[name.find('_')? + 1..];
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

struct Slot {
    connection: Arc<Connection>,
    rate: VSyncRate,
    high_priority_rate: i32,
    high_priority_state: bool,
}

impl Slot {
    fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            rate: VSyncRate::Idle,
            high_priority_rate: 0,
            high_priority_state: false,
        }
    }

    fn high_priority_divisor(&self) -> Option<i64> {
        (self.high_priority_state && self.high_priority_rate > 0)
            .then(|| i64::from(self.high_priority_rate))
    }

    fn effective_rate(&self) -> i32 {
        if self.high_priority_state {
            self.high_priority_rate
        } else {
            self.rate.as_raw()
        }
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            name: self.connection.name().to_string(),
            post_count: self.connection.post_count(),
            rate: self.rate.as_raw(),
            high_priority_rate: self.high_priority_rate,
            high_priority_state: self.high_priority_state,
        }
    }
}

struct DistributorState {
    connections: Vec<Slot>,
    event: VSyncEvent,
    vsync_enabled: bool,
    /// A controller tick arrived since the controller was last enabled.
    hardware_ticking: bool,
    running: bool,
}

impl DistributorState {
    fn position(&self, connection: &Connection) -> Option<usize> {
        self.connections
            .iter()
            .position(|slot| std::ptr::eq(Arc::as_ptr(&slot.connection), connection))
    }

    fn slot_mut(&mut self, connection: &Connection) -> VsyncResult<&mut Slot> {
        let index = self
            .position(connection)
            .ok_or(VsyncError::InvalidArguments)?;
        Ok(&mut self.connections[index])
    }

    /// Returns whether anyone wants ticks, and who is ready for this one.
    fn collect(&mut self, timestamp: i64, vsync_count: i64) -> (bool, Vec<Arc<Connection>>) {
        let mut wait_for_vsync = false;
        let mut ready = Vec::new();

        for slot in &mut self.connections {
            let divisor = match (slot.high_priority_divisor(), slot.rate) {
                (_, VSyncRate::Idle) => continue,
                (None, VSyncRate::ArmedOnce) => 1,
                (None, VSyncRate::Periodic(n)) => i64::from(n.max(1)),
                (Some(divisor), _) => divisor,
            };
            wait_for_vsync = true;

            if timestamp > 0 && vsync_count % divisor == 0 {
                if slot.rate == VSyncRate::ArmedOnce {
                    slot.rate = VSyncRate::Idle;
                }
                ready.push(Arc::clone(&slot.connection));
            }
        }
        (wait_for_vsync, ready)
    }
}

pub(crate) struct DistributorInner {
    name: String,
    state: Mutex<DistributorState>,
    wake: Condvar,
    controller: Arc<Controller>,
    soft_vsync_period: Option<Duration>,
}

impl DistributorInner {
    fn thread_main(&self) {
        loop {
            let mut state = self.state.lock();
            if !state.running {
                break;
            }

            let timestamp = state.event.timestamp;
            state.event.timestamp = 0;
            let vsync_count = state.event.vsync_count;
            let (wait_for_vsync, ready) = state.collect(timestamp, vsync_count);

            if timestamp == 0 {
                if wait_for_vsync {
                    self.enable_vsync(&mut state);
                    self.wait_for_event(&mut state);
                } else {
                    self.wake.wait(&mut state);
                }
                continue;
            }
            if !wait_for_vsync {
                self.disable_vsync(&mut state);
                continue;
            }
            drop(state);

            tracing::trace!(
                distributor = %self.name,
                connections = ready.len(),
                timestamp,
                vsync_count,
                "posting vsync"
            );
            for connection in ready {
                match connection.post_event(timestamp) {
                    Ok(()) => {}
                    Err(PostError::WouldBlock) => {
                        let mut state = self.state.lock();
                        tracing::debug!(
                            distributor = %self.name,
                            connection = connection.name(),
                            "channel full, retrying next vsync"
                        );
                        if let Ok(slot) = state.slot_mut(&connection) {
                            if slot.rate == VSyncRate::Idle {
                                slot.rate = VSyncRate::ArmedOnce;
                            }
                        }
                    }
                    Err(PostError::Broken) => {
                        tracing::warn!(
                            distributor = %self.name,
                            connection = connection.name(),
                            "channel broken, dropping connection"
                        );
                        let _ = self.remove_connection(&connection);
                    }
                }
            }
        }
        tracing::info!(distributor = %self.name, "vsync distributor stopped");
    }

    /// Waits for a tick while requesters are pending, synthesizing one if
    /// the hardware path has not delivered anything since it was enabled.
    fn wait_for_event(&self, state: &mut parking_lot::MutexGuard<'_, DistributorState>) {
        let Some(period) = self.soft_vsync_period else {
            self.wake.wait(state);
            return;
        };
        let timed_out = self.wake.wait_for(state, period).timed_out();
        if timed_out && state.running && !state.hardware_ticking && state.event.timestamp == 0 {
            state.event.timestamp = monotonic_now_ns();
            state.event.vsync_count += 1;
            tracing::trace!(distributor = %self.name, "software vsync");
        }
    }

    fn enable_vsync(&self, state: &mut DistributorState) {
        if state.vsync_enabled {
            return;
        }
        state.vsync_enabled = true;
        state.hardware_ticking = false;
        match self.controller.set_enable(true) {
            Ok(()) => tracing::info!(distributor = %self.name, "vsync enabled"),
            Err(e) => tracing::warn!(distributor = %self.name, error = %e, "controller enable failed"),
        }
    }

    fn disable_vsync(&self, state: &mut DistributorState) {
        if !state.vsync_enabled {
            return;
        }
        state.vsync_enabled = false;
        state.hardware_ticking = false;
        match self.controller.set_enable(false) {
            Ok(()) => tracing::info!(distributor = %self.name, "vsync disabled"),
            Err(e) => tracing::warn!(distributor = %self.name, error = %e, "controller disable failed"),
        }
    }

    pub(crate) fn add_connection(&self, connection: &Arc<Connection>) -> VsyncResult<()> {
        let mut state = self.state.lock();
        if state.position(connection).is_some() {
            return Err(VsyncError::InvalidArguments);
        }
        tracing::info!(distributor = %self.name, connection = connection.name(), "connection added");
        state.connections.push(Slot::new(Arc::clone(connection)));
        Ok(())
    }

    pub(crate) fn remove_connection(&self, connection: &Connection) -> VsyncResult<()> {
        let mut state = self.state.lock();
        let index = state
            .position(connection)
            .ok_or(VsyncError::InvalidArguments)?;
        state.connections.remove(index);
        tracing::info!(distributor = %self.name, connection = connection.name(), "connection removed");
        Ok(())
    }

    pub(crate) fn request_next_vsync(&self, connection: &Connection) -> VsyncResult<()> {
        let mut state = self.state.lock();
        let slot = state.slot_mut(connection)?;
        if slot.rate == VSyncRate::Idle {
            slot.rate = VSyncRate::ArmedOnce;
            self.wake.notify_all();
        }
        tracing::debug!(
            distributor = %self.name,
            connection = connection.name(),
            rate = %slot.rate,
            "request next vsync"
        );
        Ok(())
    }

    pub(crate) fn set_vsync_rate(&self, rate: i32, connection: &Connection) -> VsyncResult<()> {
        if rate <= 0 {
            return Err(VsyncError::InvalidArguments);
        }
        let mut state = self.state.lock();
        let slot = state.slot_mut(connection)?;
        let rate = VSyncRate::from_raw(rate);
        if slot.rate == rate {
            return Err(VsyncError::InvalidArguments);
        }
        slot.rate = rate;
        tracing::debug!(distributor = %self.name, connection = connection.name(), %rate, "vsync rate set");
        self.wake.notify_all();
        Ok(())
    }

    pub(crate) fn set_high_priority_vsync_rate(
        &self,
        rate: i32,
        connection: &Connection,
    ) -> VsyncResult<()> {
        if rate <= 0 {
            return Err(VsyncError::InvalidArguments);
        }
        let mut state = self.state.lock();
        let slot = state.slot_mut(connection)?;
        if slot.high_priority_rate == rate {
            return Err(VsyncError::InvalidArguments);
        }
        slot.high_priority_rate = rate;
        slot.high_priority_state = true;
        tracing::debug!(
            distributor = %self.name,
            connection = connection.name(),
            rate,
            "high priority rate set"
        );
        self.wake.notify_all();
        Ok(())
    }

    fn set_qos_vsync_rate(&self, pid: u32, rate: i32) -> VsyncResult<()> {
        if rate <= 0 {
            return Err(VsyncError::InvalidArguments);
        }
        let mut state = self.state.lock();
        let slot = state
            .connections
            .iter_mut()
            .find(|slot| qos_pid_from_name(slot.connection.name()) == Some(pid));
        if let Some(slot) = slot {
            if slot.high_priority_rate != rate {
                slot.high_priority_rate = rate;
                slot.high_priority_state = true;
                tracing::debug!(
                    distributor = %self.name,
                    connection = slot.connection.name(),
                    pid,
                    rate,
                    "qos rate set"
                );
                self.wake.notify_all();
            }
        }
        Ok(())
    }
}

impl VSyncCallback for DistributorInner {
    fn on_vsync_event(&self, timestamp: i64) {
        let mut state = self.state.lock();
        state.event.timestamp = timestamp;
        state.event.vsync_count += 1;
        state.hardware_ticking = true;
        self.wake.notify_all();
    }
}

/// Multi-connection vsync broadcaster.
///
/// Owns its connections; each [`Connection`] only holds a weak reference
/// back. Dropping the distributor stops its thread and releases the
/// controller.
pub struct Distributor {
    inner: Arc<DistributorInner>,
    thread: Option<JoinHandle<()>>,
}

impl Distributor {
    /// Starts a distributor thread fed by `controller`.
    pub fn new(
        controller: Arc<Controller>,
        name: &str,
        config: &DistributorConfig,
        hint: Arc<dyn PriorityHint>,
    ) -> io::Result<Self> {
        let inner = Arc::new(DistributorInner {
            name: name.to_string(),
            state: Mutex::new(DistributorState {
                connections: Vec::new(),
                event: VSyncEvent::default(),
                vsync_enabled: false,
                hardware_ticking: false,
                running: true,
            }),
            wake: Condvar::new(),
            controller,
            soft_vsync_period: config.soft_vsync_period(),
        });

        let sink: Arc<dyn VSyncCallback> = inner.clone();
        if let Err(e) = inner.controller.set_callback(ListenerHandle::new(&sink)) {
            tracing::error!(distributor = name, error = %e, "controller rejected callback");
        }

        let thread_inner = Arc::clone(&inner);
        let priority = config.priority;
        let thread_name = format!("metronome-{name}");
        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                hint.apply(&thread_name, priority);
                thread_inner.thread_main();
            })?;

        tracing::info!(distributor = name, "vsync distributor started");
        Ok(Self {
            inner,
            thread: Some(thread),
        })
    }

    pub(crate) fn inner(&self) -> &Arc<DistributorInner> {
        &self.inner
    }

    /// Distributor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Adds a connection. Fails if it is already present.
    pub fn add_connection(&self, connection: &Arc<Connection>) -> VsyncResult<()> {
        self.inner.add_connection(connection)
    }

    /// Removes a connection. Fails if it is absent.
    pub fn remove_connection(&self, connection: &Arc<Connection>) -> VsyncResult<()> {
        self.inner.remove_connection(connection)
    }

    /// Arms a one-shot tick for an idle connection; no-op otherwise.
    pub fn request_next_vsync(&self, connection: &Arc<Connection>) -> VsyncResult<()> {
        self.inner.request_next_vsync(connection)
    }

    /// Sets a periodic rate (every `rate`-th tick).
    pub fn set_vsync_rate(&self, rate: i32, connection: &Arc<Connection>) -> VsyncResult<()> {
        self.inner.set_vsync_rate(rate, connection)
    }

    /// Sets the overriding high-priority rate.
    pub fn set_high_priority_vsync_rate(
        &self,
        rate: i32,
        connection: &Arc<Connection>,
    ) -> VsyncResult<()> {
        self.inner.set_high_priority_vsync_rate(rate, connection)
    }

    /// Sets the high-priority rate of the QoS connection owned by `pid`.
    ///
    /// An unknown pid is not an error.
    pub fn set_qos_vsync_rate(&self, pid: u32, rate: i32) -> VsyncResult<()> {
        self.inner.set_qos_vsync_rate(pid, rate)
    }

    /// Snapshot of every connection, in insertion order.
    #[must_use]
    pub fn get_vsync_connection_infos(&self) -> Vec<ConnectionInfo> {
        let state = self.inner.state.lock();
        state.connections.iter().map(Slot::info).collect()
    }

    /// `(pid, effective rate)` of every QoS-addressable connection.
    #[must_use]
    pub fn get_qos_vsync_rate_infos(&self) -> Vec<(u32, i32)> {
        let state = self.inner.state.lock();
        state
            .connections
            .iter()
            .filter_map(|slot| {
                qos_pid_from_name(slot.connection.name()).map(|pid| (pid, slot.effective_rate()))
            })
            .collect()
    }

    /// Number of connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.state.lock().connections.len()
    }

    /// Whether the controller is currently enabled by this distributor.
    #[must_use]
    pub fn is_vsync_enabled(&self) -> bool {
        self.inner.state.lock().vsync_enabled
    }

    /// Delivers a tick as if it came from the controller.
    pub fn on_vsync_event(&self, timestamp: i64) {
        self.inner.on_vsync_event(timestamp);
    }
}

impl Drop for Distributor {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.running = false;
            self.inner.wake.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(distributor = %self.inner.name, "distributor thread panicked");
            }
        }
        let mut state = self.inner.state.lock();
        self.inner.disable_vsync(&mut state);
    }
}

impl std::fmt::Debug for Distributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Distributor")
            .field("name", &self.inner.name)
            .field("connections", &state.connections.len())
            .field("vsync_enabled", &state.vsync_enabled)
            .finish()
    }
}
