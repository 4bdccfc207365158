//! # Simulated Display
//!
//! Stand-in for a panel's vsync interrupt.
//!
//! ```text
//!   edge k = start + k * period
//!   timestamp = edge k + uniform(-jitter, +jitter)
//! ```
//!
//! Every edge reports a present fence. Hardware timestamps are only
//! reported while the service wants them, which is how the sampler's
//! switch is honoured.

use crate::service::VsyncService;
use metronome_shared::time::{instant_at_ns, monotonic_now_ns};
use metronome_shared::DisplayConfig;
use parking_lot::{Condvar, Mutex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct Shared {
    running: Mutex<bool>,
    wake: Condvar,
    frames: AtomicU64,
    hardware_samples: AtomicU64,
}

/// Thread producing jittered hardware vsync timestamps.
pub struct SimulatedDisplay {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
    period_ns: i64,
}

impl SimulatedDisplay {
    /// Starts a display seeded from the clock.
    pub fn start(config: &DisplayConfig, service: Arc<VsyncService>) -> io::Result<Self> {
        Self::start_seeded(config, service, monotonic_now_ns().unsigned_abs())
    }

    /// Starts a display with a fixed jitter seed.
    pub fn start_seeded(
        config: &DisplayConfig,
        service: Arc<VsyncService>,
        seed: u64,
    ) -> io::Result<Self> {
        let shared = Arc::new(Shared {
            running: Mutex::new(true),
            wake: Condvar::new(),
            frames: AtomicU64::new(0),
            hardware_samples: AtomicU64::new(0),
        });

        let period_ns = config.period_ns();
        let jitter_ns = config.jitter_ns;
        let thread_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("metronome-display".to_string())
            .spawn(move || {
                Self::thread_main(&thread_shared, &service, period_ns, jitter_ns, seed);
            })?;

        tracing::info!(
            refresh_rate_hz = config.refresh_rate_hz,
            jitter_ns,
            "simulated display started"
        );
        Ok(Self {
            shared,
            thread: Some(thread),
            period_ns,
        })
    }

    fn thread_main(
        shared: &Shared,
        service: &VsyncService,
        period_ns: i64,
        jitter_ns: i64,
        seed: u64,
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut edge = monotonic_now_ns() + period_ns;

        loop {
            let jitter = if jitter_ns > 0 {
                rng.gen_range(-jitter_ns..=jitter_ns)
            } else {
                0
            };
            let timestamp = edge + jitter;

            {
                let mut running = shared.running.lock();
                while *running && monotonic_now_ns() < timestamp {
                    shared.wake.wait_until(&mut running, instant_at_ns(timestamp));
                }
                if !*running {
                    break;
                }
            }

            shared.frames.fetch_add(1, Ordering::Relaxed);
            if service.hardware_vsync_enabled() {
                shared.hardware_samples.fetch_add(1, Ordering::Relaxed);
                service.on_hardware_vsync(timestamp);
            }
            service.on_present_fence(timestamp);

            edge += period_ns;
            let now = monotonic_now_ns();
            if edge < now {
                // Skip edges missed while the thread was descheduled.
                let missed = (now - edge) / period_ns + 1;
                edge += missed * period_ns;
            }
        }

        tracing::info!("simulated display stopped");
    }

    /// Edges produced so far.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }

    /// Edges reported to the sampler.
    #[must_use]
    pub fn hardware_sample_count(&self) -> u64 {
        self.shared.hardware_samples.load(Ordering::Relaxed)
    }

    /// Nominal period.
    #[must_use]
    pub fn period_ns(&self) -> i64 {
        self.period_ns
    }

    /// Stops and joins the display thread.
    pub fn stop(&mut self) {
        *self.shared.running.lock() = false;
        self.shared.wake.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("display thread panicked");
            }
        }
    }
}

impl Drop for SimulatedDisplay {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SimulatedDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedDisplay")
            .field("period_ns", &self.period_ns)
            .field("frames", &self.frame_count())
            .field("hardware_samples", &self.hardware_sample_count())
            .finish_non_exhaustive()
    }
}
