//! # Vsync Sampler
//!
//! A software phase-locked loop. Raw hardware vsync timestamps go in, an
//! estimated [`ClockModel`] comes out and is pushed to a [`ModelSink`]
//! (normally the [`crate::Generator`]).
//!
//! ## Model Estimation
//!
//! ```text
//!   samples:  s0    s1    s2    s3    s4    s5   ...
//!   deltas:     d1    d2    d3    d4    d5
//!
//!   period = (sum(d) - min(d) - max(d)) / (n - 3)
//!   phase  = atan2(mean(sin θi), mean(cos θi)) / scale
//!            where θi = ((si - s0) mod period) * scale, scale = 2π / period
//! ```
//!
//! The trimmed mean rejects a single late or early sample. The circular
//! mean keeps samples that straddle a period boundary from averaging out
//! to half a period.
//!
//! ## Error Tracking
//!
//! Present-fence timestamps are compared against the model. When the mean
//! squared deviation stays under half the threshold, hardware sampling can
//! be switched off; when it rises above the threshold, a resync is needed.

use crate::generator::ModelSink;
use metronome_shared::constants::{
    MAX_SAMPLES, MAX_SAMPLES_WITHOUT_PRESENT, MIN_SAMPLES_FOR_UPDATE, NUM_PRESENT,
};
use metronome_shared::{ClockModel, SamplerConfig};
use parking_lot::Mutex;
use std::f64::consts::PI;
use std::sync::Arc;

/// Switch for the physical vsync interrupt; receives the desired state.
pub type HardwareVsyncSwitch = Arc<dyn Fn(bool) + Send + Sync>;

const INVALID_TIMESTAMP: i64 = -1;

/// Deltas dropped from the period estimate (min, max, plus one for n-1 deltas).
const TRIMMED_SAMPLES: usize = 3;

struct SamplerState {
    period: i64,
    phase: i64,
    reference_time: i64,
    error: i64,
    samples: [i64; MAX_SAMPLES],
    first_sample_index: usize,
    num_samples: usize,
    mode_updated: bool,
    hardware_vsync_status: bool,
    present_fence_time: [i64; NUM_PRESENT],
    present_fence_offset: usize,
    samples_since_present: usize,
}

impl SamplerState {
    const fn new() -> Self {
        Self {
            period: 0,
            phase: 0,
            reference_time: 0,
            error: 0,
            samples: [0; MAX_SAMPLES],
            first_sample_index: 0,
            num_samples: 0,
            mode_updated: false,
            hardware_vsync_status: true,
            present_fence_time: [INVALID_TIMESTAMP; NUM_PRESENT],
            present_fence_offset: 0,
            samples_since_present: 0,
        }
    }

    #[inline]
    fn sample(&self, i: usize) -> i64 {
        self.samples[(self.first_sample_index + i) % MAX_SAMPLES]
    }

    fn model(&self) -> ClockModel {
        ClockModel::new(self.period, self.phase, self.reference_time)
    }

    fn reset_error(&mut self) {
        self.present_fence_offset = 0;
        self.error = 0;
        self.present_fence_time = [INVALID_TIMESTAMP; NUM_PRESENT];
    }

    /// Recomputes period and phase. Returns the new model if one was produced.
    fn update_mode(&mut self) -> Option<ClockModel> {
        if self.num_samples < MIN_SAMPLES_FOR_UPDATE {
            return None;
        }

        let mut sum = 0i64;
        let mut min = i64::MAX;
        let mut max = i64::MIN;
        for i in 1..self.num_samples {
            let diff = self.sample(i).saturating_sub(self.sample(i - 1));
            min = min.min(diff);
            max = max.max(diff);
            sum = sum.saturating_add(diff);
        }
        sum = sum.saturating_sub(min.saturating_add(max));

        let period = sum / (self.num_samples - TRIMMED_SAMPLES) as i64;
        if period <= 0 {
            tracing::warn!(period, "degenerate sample set, model not updated");
            return None;
        }

        let scale = 2.0 * PI / period as f64;
        let mut avg_x = 0.0f64;
        let mut avg_y = 0.0f64;
        for i in 1..self.num_samples {
            let delta =
                (self.sample(i).saturating_sub(self.reference_time) % period) as f64 * scale;
            avg_x += delta.cos();
            avg_y += delta.sin();
        }
        let n = (self.num_samples - 1) as f64;
        avg_x /= n;
        avg_y /= n;

        self.period = period;
        self.phase = (avg_y.atan2(avg_x) / scale) as i64;
        self.mode_updated = true;
        Some(self.model())
    }

    fn update_error(&mut self) {
        if !self.mode_updated {
            return;
        }

        let mut count = 0i64;
        let mut sq_sum = 0i64;
        for &t in &self.present_fence_time {
            if t <= 0 {
                continue;
            }
            let sample = t.saturating_sub(self.reference_time);
            if sample <= self.phase {
                continue;
            }
            let mut err = sample.saturating_sub(self.phase) % self.period;
            if err > self.period / 2 {
                err -= self.period;
            }
            sq_sum = sq_sum.saturating_add(err.saturating_mul(err));
            count += 1;
        }

        self.error = if count > 0 { sq_sum / count } else { 0 };
    }
}

/// Software PLL over hardware vsync samples.
pub struct Sampler {
    state: Mutex<SamplerState>,
    sink: Arc<dyn ModelSink>,
    switch: Mutex<Option<HardwareVsyncSwitch>>,
    error_threshold: i64,
}

impl Sampler {
    /// Creates a sampler that publishes its model to `sink`.
    #[must_use]
    pub fn new(config: &SamplerConfig, sink: Arc<dyn ModelSink>) -> Self {
        Self {
            state: Mutex::new(SamplerState::new()),
            sink,
            switch: Mutex::new(None),
            error_threshold: config.error_threshold_ns2,
        }
    }

    /// Clears all state, including the present-fence history.
    pub fn reset(&self) {
        *self.state.lock() = SamplerState::new();
    }

    /// Starts a new sampling session.
    ///
    /// The next sample re-seeds the reference time. The last period is
    /// kept so the bootstrap model is immediately usable.
    pub fn begin_sample(&self) {
        let mut state = self.state.lock();
        state.num_samples = 0;
        state.mode_updated = false;
        state.hardware_vsync_status = true;
    }

    /// Feeds one hardware vsync timestamp.
    ///
    /// Returns false once the model is good enough to stop hardware sampling.
    pub fn add_sample(&self, timestamp: i64) -> bool {
        let should_disable = {
            let mut state = self.state.lock();
            if state.num_samples == 0 {
                state.phase = 0;
                state.reference_time = timestamp;
                self.publish(state.model());
            }

            if state.num_samples < MAX_SAMPLES - 1 {
                state.num_samples += 1;
            } else {
                state.first_sample_index = (state.first_sample_index + 1) % MAX_SAMPLES;
            }
            let index = (state.first_sample_index + state.num_samples - 1) % MAX_SAMPLES;
            state.samples[index] = timestamp;

            if let Some(model) = state.update_mode() {
                self.publish(model);
            }

            let since = state.samples_since_present;
            state.samples_since_present += 1;
            if since > MAX_SAMPLES_WITHOUT_PRESENT {
                state.reset_error();
            }

            state.mode_updated && state.error < self.error_threshold / 2
        };

        if should_disable {
            tracing::debug!("model converged, disabling hardware vsync");
            self.set_hardware_vsync_enabled(false);
        }
        !should_disable
    }

    /// Records a present-fence time.
    ///
    /// Returns true if hardware sampling is needed (no model yet, or the
    /// model drifted past the error threshold).
    pub fn add_present_fence_time(&self, timestamp: i64) -> bool {
        let mut state = self.state.lock();
        let offset = state.present_fence_offset;
        state.present_fence_time[offset] = timestamp;
        state.present_fence_offset = (offset + 1) % NUM_PRESENT;
        state.samples_since_present = 0;

        state.update_error();

        let needs_resync = !state.mode_updated || state.error > self.error_threshold;
        if needs_resync && state.mode_updated {
            tracing::debug!(error = state.error, "present fence drift, resync needed");
        }
        needs_resync
    }

    /// Records whether the hardware interrupt is currently on.
    pub fn set_hardware_vsync_status(&self, enabled: bool) {
        self.state.lock().hardware_vsync_status = enabled;
    }

    /// Whether the hardware interrupt is currently on.
    #[must_use]
    pub fn hardware_vsync_status(&self) -> bool {
        self.state.lock().hardware_vsync_status
    }

    /// Registers the switch invoked when the sampler wants hardware vsync off.
    pub fn set_hardware_vsync_switch(&self, switch: HardwareVsyncSwitch) {
        *self.switch.lock() = Some(switch);
    }

    fn set_hardware_vsync_enabled(&self, enabled: bool) {
        let switch = self.switch.lock().clone();
        match switch {
            Some(switch) => switch(enabled),
            None => tracing::error!(enabled, "no hardware vsync switch registered"),
        }
    }

    fn publish(&self, model: ClockModel) {
        if let Err(e) = self.sink.update_mode(model) {
            tracing::warn!(?model, error = %e, "model rejected by sink");
        }
    }

    /// Estimated period.
    #[must_use]
    pub fn period(&self) -> i64 {
        self.state.lock().period
    }

    /// Estimated phase.
    #[must_use]
    pub fn phase(&self) -> i64 {
        self.state.lock().phase
    }

    /// Reference timestamp of the current session.
    #[must_use]
    pub fn reference_time(&self) -> i64 {
        self.state.lock().reference_time
    }

    /// Mean squared present-fence error.
    #[must_use]
    pub fn error(&self) -> i64 {
        self.state.lock().error
    }

    /// The current model, or `None` before the session's first update.
    #[must_use]
    pub fn model(&self) -> Option<ClockModel> {
        let state = self.state.lock();
        state.mode_updated.then(|| state.model())
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Sampler")
            .field("period", &state.period)
            .field("phase", &state.phase)
            .field("reference_time", &state.reference_time)
            .field("num_samples", &state.num_samples)
            .field("error", &state.error)
            .finish_non_exhaustive()
    }
}
