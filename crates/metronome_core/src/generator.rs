//! # Vsync Generator
//!
//! Owns the authoritative [`ClockModel`] and a set of listeners, each with
//! its own phase offset. A dedicated thread sleeps until the earliest
//! listener is due, then fires every due listener outside the lock.
//!
//! ## Thread Loop
//!
//! ```text
//!            mutation (update_mode / add / remove)
//!         ┌──────────────────────────────────────────┐
//!         v                                          │
//!   ┌──────────┐  model + listeners  ┌──────────┐    │
//!   │   Idle   │ ──────────────────> │  Armed   │ ───┘
//!   └──────────┘                     └──────────┘
//!         ^                               │ deadline reached
//!         │          ┌──────────┐         │
//!         └───────── │  Firing  │ <───────┘
//!                    └──────────┘
//! ```
//!
//! ## Wake-up Latency
//!
//! The scheduler wakes the thread late by a roughly constant amount. The
//! generator keeps an exponential moving average of that lateness (weight
//! 1/64, clamped) and aims every deadline early by the same amount.

use metronome_shared::time::{instant_at_ns, monotonic_now_ns};
use metronome_shared::{
    ClockModel, GeneratorConfig, ListenerHandle, PriorityHint, VsyncError, VsyncResult,
};
use parking_lot::{Condvar, Mutex};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Receiver of clock model updates.
pub trait ModelSink: Send + Sync {
    /// Replaces the clock model.
    fn update_mode(&self, model: ClockModel) -> VsyncResult<()>;
}

/// Computes a listener's next fire time.
///
/// `now` is pushed to at least `last_fire_time + wakeup_delay`, rounded up
/// to the next tick of the listener's phase, pushed one more period if it
/// would land within 3/5 of a period of the last fire, and finally moved
/// early by `wakeup_delay`. Requires `model.period > 0`.
#[must_use]
pub fn next_fire_time(
    model: &ClockModel,
    phase_offset: i64,
    last_fire_time: i64,
    wakeup_delay: i64,
    now: i64,
) -> i64 {
    let period = model.period;
    let mut now = now.max(last_fire_time + wakeup_delay);

    now -= model.reference_time;
    let phase = model.phase + phase_offset;
    now -= phase;
    if now < 0 {
        now = -period;
    }

    let num_periods = now / period;
    let mut next = (num_periods + 1) * period + phase + model.reference_time;

    if next - last_fire_time < 3 * period / 5 {
        next += period;
    }
    next - wakeup_delay
}

struct Listener {
    phase_offset: i64,
    handle: ListenerHandle,
    last_fire_time: i64,
}

struct GeneratorState {
    model: ClockModel,
    listeners: Vec<Listener>,
    wakeup_delay: i64,
    running: bool,
}

impl GeneratorState {
    fn earliest_fire_time(&self, now: i64) -> Option<i64> {
        self.listeners
            .iter()
            .map(|l| {
                next_fire_time(
                    &self.model,
                    l.phase_offset,
                    l.last_fire_time,
                    self.wakeup_delay,
                    now,
                )
            })
            .min()
    }

    /// Marks due listeners as fired and returns them with their timestamps.
    fn take_due(&mut self, now: i64, tolerance: i64) -> Vec<(ListenerHandle, i64)> {
        if self.model.period <= 0 {
            return Vec::new();
        }

        let before = self.listeners.len();
        self.listeners.retain(|l| !l.handle.is_empty());
        if self.listeners.len() != before {
            tracing::debug!(
                pruned = before - self.listeners.len(),
                "dropped listeners whose sink is gone"
            );
        }

        let one_period_ago = now - self.model.period;
        let model = self.model;
        let wakeup_delay = self.wakeup_delay;
        let mut due = Vec::new();
        for listener in &mut self.listeners {
            let t = next_fire_time(
                &model,
                listener.phase_offset,
                listener.last_fire_time,
                wakeup_delay,
                one_period_ago,
            );
            if t < now || t - now < tolerance {
                listener.last_fire_time = t;
                due.push((listener.handle.clone(), t));
            }
        }
        due
    }

    fn find(&mut self, handle: &ListenerHandle) -> Option<&mut Listener> {
        self.listeners.iter_mut().find(|l| l.handle == *handle)
    }
}

struct Shared {
    state: Mutex<GeneratorState>,
    wake: Condvar,
    config: GeneratorConfig,
    fire_count: AtomicU64,
}

/// The periodic listener engine.
///
/// Always held in an [`Arc`]; controllers keep a weak reference to it.
/// Dropping the last owner stops and joins the thread.
pub struct Generator {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Generator {
    /// Starts a generator thread with an empty model.
    pub fn new(config: GeneratorConfig, hint: Arc<dyn PriorityHint>) -> io::Result<Arc<Self>> {
        let shared = Arc::new(Shared {
            state: Mutex::new(GeneratorState {
                model: ClockModel::default(),
                listeners: Vec::new(),
                wakeup_delay: 0,
                running: true,
            }),
            wake: Condvar::new(),
            config,
            fire_count: AtomicU64::new(0),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("metronome-generator".to_string())
            .spawn(move || {
                hint.apply("metronome-generator", thread_shared.config.priority);
                Self::thread_main(&thread_shared);
            })?;

        tracing::info!("vsync generator started");
        Ok(Arc::new(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        }))
    }

    fn thread_main(shared: &Shared) {
        let max_wakeup_delay = shared.config.max_wakeup_delay_ns;
        let tolerance = shared.config.fire_tolerance_ns;

        loop {
            let mut state = shared.state.lock();
            if !state.running {
                break;
            }
            if state.model.period == 0 || state.listeners.is_empty() {
                shared.wake.wait(&mut state);
                continue;
            }

            let now = monotonic_now_ns();
            let Some(next) = state.earliest_fire_time(now) else {
                shared.wake.wait(&mut state);
                continue;
            };

            let mut woke_on_deadline = false;
            if now < next {
                let result = shared.wake.wait_until(&mut state, instant_at_ns(next));
                if !result.timed_out() {
                    // Woken by a mutation; recompute against the new state.
                    continue;
                }
                if !state.running {
                    break;
                }
                woke_on_deadline = true;
            }

            let now = monotonic_now_ns();
            if woke_on_deadline {
                let delay = (state.wakeup_delay * 63 + (now - next)) / 64;
                state.wakeup_delay = delay.min(max_wakeup_delay);
            }
            let due = state.take_due(now, tolerance);
            drop(state);

            if !due.is_empty() {
                let total = shared.fire_count.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(listeners = due.len(), total, "generator fire");
            }
            for (handle, timestamp) in due {
                handle.fire(timestamp);
            }
        }

        tracing::info!("vsync generator stopped");
    }

    /// Replaces the clock model and wakes the thread.
    ///
    /// `period == 0` parks the thread until a real model arrives.
    pub fn update_mode(&self, period: i64, phase: i64, reference_time: i64) -> VsyncResult<()> {
        if period < 0 || reference_time < 0 {
            return Err(VsyncError::InvalidArguments);
        }
        let mut state = self.shared.state.lock();
        state.model = ClockModel::new(period, phase, reference_time);
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Registers a listener at `phase_offset` from the model's phase.
    ///
    /// The first fire lands within about half a period.
    pub fn add_listener(&self, phase_offset: i64, handle: ListenerHandle) -> VsyncResult<()> {
        if handle.is_empty() {
            return Err(VsyncError::InvalidArguments);
        }
        let mut state = self.shared.state.lock();
        if state.find(&handle).is_some() {
            return Err(VsyncError::InvalidArguments);
        }
        let last_fire_time = monotonic_now_ns() - state.model.period / 2 + state.model.phase;
        tracing::debug!(listener = %handle.id(), phase_offset, "listener added");
        state.listeners.push(Listener {
            phase_offset,
            handle,
            last_fire_time,
        });
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Unregisters a listener.
    pub fn remove_listener(&self, handle: &ListenerHandle) -> VsyncResult<()> {
        let mut state = self.shared.state.lock();
        let index = state
            .listeners
            .iter()
            .position(|l| l.handle == *handle)
            .ok_or(VsyncError::InvalidArguments)?;
        state.listeners.remove(index);
        tracing::debug!(listener = %handle.id(), "listener removed");
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Moves a registered listener to a new phase offset.
    pub fn change_phase_offset(&self, handle: &ListenerHandle, offset: i64) -> VsyncResult<()> {
        if handle.is_empty() {
            return Err(VsyncError::InvalidArguments);
        }
        let mut state = self.shared.state.lock();
        let listener = state.find(handle).ok_or(VsyncError::InvalidOperating)?;
        listener.phase_offset = offset;
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Current model snapshot.
    #[must_use]
    pub fn model(&self) -> ClockModel {
        self.shared.state.lock().model
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.state.lock().listeners.len()
    }

    /// Current wake-up latency estimate.
    #[must_use]
    pub fn wakeup_delay(&self) -> i64 {
        self.shared.state.lock().wakeup_delay
    }

    /// Number of wakes that fired at least one listener.
    #[must_use]
    pub fn fire_count(&self) -> u64 {
        self.shared.fire_count.load(Ordering::Relaxed)
    }

    /// Stops the thread. Idempotent.
    ///
    /// Called from the generator thread itself (a listener dropping the
    /// last owner), the thread is detached instead of joined.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.running = false;
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.thread.lock().take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("vsync generator thread panicked");
            }
        }
    }
}

impl ModelSink for Generator {
    fn update_mode(&self, model: ClockModel) -> VsyncResult<()> {
        Generator::update_mode(self, model.period, model.phase, model.reference_time)
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Generator")
            .field("model", &state.model)
            .field("listeners", &state.listeners.len())
            .field("wakeup_delay", &state.wakeup_delay)
            .finish()
    }
}
