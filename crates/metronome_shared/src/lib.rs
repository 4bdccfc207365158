//! # METRONOME Shared Types
//!
//! Vocabulary used by every METRONOME crate.
//!
//! ## Contents
//!
//! - [`error`] - flat error enum with stable wire codes
//! - [`clock`] - clock model, tick event, connection rate regimes
//! - [`callback`] - tick sink trait and identity-carrying handles
//! - [`time`] - process-wide monotonic nanosecond time base
//! - [`priority`] - thread priority hints
//! - [`config`] - TOML configuration
//! - [`constants`] - timing constants
//!
//! ## Units
//!
//! Every timestamp and duration is an `i64` of nanoseconds on the
//! [`time::monotonic_now_ns`] base unless a name says otherwise.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod callback;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod priority;
pub mod time;

pub use callback::{ListenerHandle, ListenerId, VSyncCallback};
pub use clock::{ClockModel, VSyncEvent, VSyncRate};
pub use config::{
    DisplayConfig, DistributorConfig, GeneratorConfig, SamplerConfig, ServiceConfig, VsyncConfig,
};
pub use error::{ConfigError, PostError, VsyncError, VsyncResult};
pub use priority::{LoggingPriorityHint, NoopPriorityHint, PriorityHint, ThreadPriority};
pub use time::{instant_at_ns, monotonic_now_ns};
