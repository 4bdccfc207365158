//! # METRONOME Server
//!
//! Headless demo: a simulated panel drives the service, one application
//! connection renders at the configured rate, stats are logged each second.
//!
//! ```bash
//! # Defaults, run for 10 seconds
//! ./metronome_server
//!
//! # Custom config, run for 60 seconds, verbose
//! RUST_LOG=metronome=debug ./metronome_server metronome.toml 60
//! ```

use metronome::client::VSyncReceiver;
use metronome::{SimulatedDisplay, VsyncService};
use metronome_shared::constants::NS_PER_MS;
use metronome_shared::{LoggingPriorityHint, VsyncConfig};
use std::error::Error;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_RUN_SECS: u64 = 10;

fn main() -> Result<(), Box<dyn Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => VsyncConfig::load(&path)?,
        None => VsyncConfig::default(),
    };
    let run_for = Duration::from_secs(match args.next() {
        Some(secs) => secs.parse()?,
        None => DEFAULT_RUN_SECS,
    });

    tracing::info!(
        refresh_rate_hz = config.display.refresh_rate_hz,
        soft_vsync_period_ms = config.distributor.soft_vsync_period_ms,
        run_secs = run_for.as_secs(),
        "METRONOME server starting"
    );

    let display_config = config.display.clone();
    let service = Arc::new(VsyncService::with_priority_hint(
        config,
        Arc::new(LoggingPriorityHint),
    )?);
    let mut display = SimulatedDisplay::start(&display_config, Arc::clone(&service))?;

    // One renderer at full rate
    let connection = service.create_vsync_connection("demo_renderer")?;
    let receiver = VSyncReceiver::new(connection, "demo_renderer");
    receiver.init()?;

    let frames = Arc::new(AtomicU64::new(0));
    let last_timestamp = Arc::new(AtomicI64::new(0));
    let (frame_counter, last_seen) = (Arc::clone(&frames), Arc::clone(&last_timestamp));
    receiver.set_vsync_rate(
        move |timestamp| {
            frame_counter.fetch_add(1, Ordering::Relaxed);
            last_seen.store(timestamp, Ordering::Relaxed);
        },
        1,
    )?;

    let started = Instant::now();
    let mut last_frames = 0;
    while started.elapsed() < run_for {
        thread::sleep(Duration::from_secs(1));

        let total = frames.load(Ordering::Relaxed);
        let model = service.generator().model();
        let hardware_samples = display.hardware_sample_count();
        tracing::info!(
            fps = total - last_frames,
            total,
            last_timestamp_ms = last_timestamp.load(Ordering::Relaxed) / NS_PER_MS,
            model_hz = model.refresh_rate_hz(),
            wakeup_delay_ns = service.generator().wakeup_delay(),
            hardware_vsync = service.hardware_vsync_enabled(),
            hardware_samples,
            "tick stats"
        );
        last_frames = total;
    }

    drop(receiver);
    display.stop();
    for info in service.app_distributor().get_vsync_connection_infos() {
        tracing::info!(?info, "connection at shutdown");
    }
    service.destroy_connections();
    tracing::info!(frames = frames.load(Ordering::Relaxed), "METRONOME server stopped");
    Ok(())
}
