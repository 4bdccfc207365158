//! # Vsync Service
//!
//! Owns one clock and the two distributors hanging off it:
//!
//! - `rs` - internal composition consumers, handed [`Connection`]s directly
//! - `app` - application consumers, handed a remote proxy per connection
//!
//! Hardware sampling is switched off by the sampler once its model
//! converges, and back on when present fences show drift.

use metronome_core::{Controller, Generator, ModelSink, Sampler};
use metronome_dispatch::{
    Connection, Distributor, LocalBinder, RemoteObject, VSyncConnectionApi, VSyncConnectionProxy,
    VSyncConnectionStub,
};
use metronome_shared::{
    ConfigError, NoopPriorityHint, PriorityHint, VsyncConfig, VsyncError, VsyncResult,
};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Service construction failures.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Configuration rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// A worker thread could not be started.
    #[error("failed to start worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// An application connection and the binder serving it.
struct ServedConnection {
    connection: Arc<Connection>,
    binder: Arc<LocalBinder>,
}

/// Top-level vsync wiring.
pub struct VsyncService {
    // Field order is drop order: consumers first, clock last.
    connections: Mutex<Vec<ServedConnection>>,
    rs_distributor: Distributor,
    app_distributor: Distributor,
    sampler: Arc<Sampler>,
    generator: Arc<Generator>,
    hardware_vsync_enabled: Arc<AtomicBool>,
    config: VsyncConfig,
}

impl VsyncService {
    /// Starts a service with scheduler hints disabled.
    pub fn new(config: VsyncConfig) -> Result<Self, ServiceError> {
        Self::with_priority_hint(config, Arc::new(NoopPriorityHint))
    }

    /// Starts a service whose threads report to `hint`.
    pub fn with_priority_hint(
        config: VsyncConfig,
        hint: Arc<dyn PriorityHint>,
    ) -> Result<Self, ServiceError> {
        config.validate()?;

        let generator = Generator::new(config.generator.clone(), Arc::clone(&hint))?;
        let sink: Arc<dyn ModelSink> = generator.clone();
        let sampler = Arc::new(Sampler::new(&config.sampler, sink));

        let hardware_vsync_enabled = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&hardware_vsync_enabled);
        sampler.set_hardware_vsync_switch(Arc::new(move |enabled| {
            if flag.swap(enabled, Ordering::AcqRel) != enabled {
                tracing::info!(enabled, "hardware vsync switched");
            }
        }));
        sampler.begin_sample();

        let service = &config.service;
        let rs_controller = Controller::new(&generator, service.rs_phase_offset_ns);
        let rs_distributor = Distributor::new(
            rs_controller,
            &service.rs_distributor_name,
            &config.distributor,
            Arc::clone(&hint),
        )?;
        let app_controller = Controller::new(&generator, service.app_phase_offset_ns);
        let app_distributor = Distributor::new(
            app_controller,
            &service.app_distributor_name,
            &config.distributor,
            hint,
        )?;

        tracing::info!(
            rs = %service.rs_distributor_name,
            app = %service.app_distributor_name,
            "vsync service started"
        );
        Ok(Self {
            connections: Mutex::new(Vec::new()),
            rs_distributor,
            app_distributor,
            sampler,
            generator,
            hardware_vsync_enabled,
            config,
        })
    }

    /// Creates an application connection and returns its remote proxy.
    ///
    /// Name it `<tag>_<pid>` with `WM` in the tag to make it QoS-addressable.
    pub fn create_vsync_connection(&self, name: &str) -> VsyncResult<Arc<dyn VSyncConnectionApi>> {
        let connection = Connection::new(&self.app_distributor, name);
        self.app_distributor.add_connection(&connection)?;

        let stub: Arc<dyn RemoteObject> =
            Arc::new(VSyncConnectionStub::new(connection.clone()));
        let binder = match LocalBinder::new(stub, name) {
            Ok(binder) => Arc::new(binder),
            Err(e) => {
                tracing::warn!(connection = name, error = %e, "failed to start binder");
                // Registration succeeded a moment ago; undo it.
                let _ = self.app_distributor.remove_connection(&connection);
                return Err(VsyncError::InvalidOperating);
            }
        };

        let remote: Arc<dyn RemoteObject> = binder.clone();
        self.connections.lock().push(ServedConnection { connection, binder });
        tracing::debug!(connection = name, "vsync connection created");
        Ok(Arc::new(VSyncConnectionProxy::new(remote)))
    }

    /// Creates a connection on the internal distributor.
    pub fn create_rs_connection(&self, name: &str) -> VsyncResult<Arc<Connection>> {
        let connection = Connection::new(&self.rs_distributor, name);
        self.rs_distributor.add_connection(&connection)?;
        Ok(connection)
    }

    /// Unregisters every application connection and stops its binder.
    ///
    /// Proxies handed out earlier fail with `RemoteCallFailure` afterwards.
    pub fn destroy_connections(&self) {
        let served = std::mem::take(&mut *self.connections.lock());
        for ServedConnection { connection, binder } in served {
            binder.kill();
            if let Err(e) = connection.destroy() {
                tracing::debug!(connection = %connection.name(), error = %e, "already removed");
            }
        }
    }

    /// Number of application connections created and not yet destroyed.
    #[must_use]
    pub fn served_connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Feeds one hardware vsync timestamp.
    ///
    /// Returns whether hardware sampling should continue.
    pub fn on_hardware_vsync(&self, timestamp: i64) -> bool {
        let keep_sampling = self.sampler.add_sample(timestamp);
        if !keep_sampling {
            self.sampler.set_hardware_vsync_status(false);
        }
        keep_sampling
    }

    /// Feeds one present-fence time.
    ///
    /// Returns whether hardware sampling is needed; if it is and sampling
    /// was off, a new sampling session starts.
    pub fn on_present_fence(&self, timestamp: i64) -> bool {
        let needs_sampling = self.sampler.add_present_fence_time(timestamp);
        if needs_sampling && !self.hardware_vsync_enabled() {
            self.enable_hardware_vsync();
        }
        needs_sampling
    }

    /// Starts a new hardware sampling session.
    pub fn enable_hardware_vsync(&self) {
        self.sampler.begin_sample();
        if !self.hardware_vsync_enabled.swap(true, Ordering::AcqRel) {
            tracing::info!("hardware vsync resync started");
        }
    }

    /// Whether hardware timestamps are currently wanted.
    #[must_use]
    pub fn hardware_vsync_enabled(&self) -> bool {
        self.hardware_vsync_enabled.load(Ordering::Acquire)
    }

    /// The internal distributor.
    #[must_use]
    pub fn rs_distributor(&self) -> &Distributor {
        &self.rs_distributor
    }

    /// The application distributor.
    #[must_use]
    pub fn app_distributor(&self) -> &Distributor {
        &self.app_distributor
    }

    /// The sampler.
    #[must_use]
    pub fn sampler(&self) -> &Arc<Sampler> {
        &self.sampler
    }

    /// The generator.
    #[must_use]
    pub fn generator(&self) -> &Arc<Generator> {
        &self.generator
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &VsyncConfig {
        &self.config
    }
}

impl Drop for VsyncService {
    fn drop(&mut self) {
        self.destroy_connections();
        tracing::info!("vsync service stopped");
    }
}

impl std::fmt::Debug for VsyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VsyncService")
            .field("rs", &self.rs_distributor)
            .field("app", &self.app_distributor)
            .field("served_connections", &self.served_connection_count())
            .field("hardware_vsync_enabled", &self.hardware_vsync_enabled())
            .finish_non_exhaustive()
    }
}
