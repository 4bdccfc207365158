//! # Vsync Controller
//!
//! Adapts one generator subscription for one downstream sink (a
//! distributor). Enabling registers the controller as a generator
//! listener; disabling removes it, which is how a distributor stops paying
//! for ticks nobody wants.
//!
//! The enable/phase state and the sink slot sit behind separate locks.
//! The generator thread only ever takes the sink slot.

use crate::generator::Generator;
use metronome_shared::{ListenerHandle, VSyncCallback, VsyncError, VsyncResult};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

struct ControllerState {
    enabled: bool,
    phase_offset: i64,
}

/// Single-listener adapter between a [`Generator`] and one sink.
pub struct Controller {
    generator: Weak<Generator>,
    /// This controller's identity in the generator's listener list.
    listener: ListenerHandle,
    state: Mutex<ControllerState>,
    callback: Mutex<Option<ListenerHandle>>,
}

impl Controller {
    /// Creates a disabled controller.
    #[must_use]
    pub fn new(generator: &Arc<Generator>, phase_offset: i64) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let sink: Weak<dyn VSyncCallback> = weak.clone();
            Self {
                generator: Arc::downgrade(generator),
                listener: ListenerHandle::from_weak(sink),
                state: Mutex::new(ControllerState {
                    enabled: false,
                    phase_offset,
                }),
                callback: Mutex::new(None),
            }
        })
    }

    /// Starts or stops receiving generator ticks.
    pub fn set_enable(&self, enabled: bool) -> VsyncResult<()> {
        let generator = self.generator.upgrade().ok_or(VsyncError::Nullptr)?;
        let mut state = self.state.lock();
        if enabled == state.enabled {
            return Ok(());
        }
        if enabled {
            generator.add_listener(state.phase_offset, self.listener.clone())?;
        } else {
            generator.remove_listener(&self.listener)?;
        }
        state.enabled = enabled;
        tracing::debug!(enabled, "controller toggled");
        Ok(())
    }

    /// Sets the downstream sink.
    pub fn set_callback(&self, callback: ListenerHandle) -> VsyncResult<()> {
        if callback.is_empty() {
            return Err(VsyncError::Nullptr);
        }
        *self.callback.lock() = Some(callback);
        Ok(())
    }

    /// Moves this controller's ticks without re-registering.
    pub fn set_phase_offset(&self, offset: i64) -> VsyncResult<()> {
        let generator = self.generator.upgrade().ok_or(VsyncError::Nullptr)?;
        let mut state = self.state.lock();
        state.phase_offset = offset;
        if state.enabled {
            generator.change_phase_offset(&self.listener, offset)?;
        }
        Ok(())
    }

    /// Whether the controller is registered with the generator.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Current phase offset.
    #[must_use]
    pub fn phase_offset(&self) -> i64 {
        self.state.lock().phase_offset
    }
}

impl VSyncCallback for Controller {
    fn on_vsync_event(&self, timestamp: i64) {
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback.fire(timestamp);
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if self.state.get_mut().enabled {
            if let Some(generator) = self.generator.upgrade() {
                let _ = generator.remove_listener(&self.listener);
            }
        }
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Controller")
            .field("listener", &self.listener.id())
            .field("enabled", &state.enabled)
            .field("phase_offset", &state.phase_offset)
            .finish()
    }
}
