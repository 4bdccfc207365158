//! # METRONOME
//!
//! The frame-timing heartbeat of the display pipeline.
//!
//! ```text
//!   SimulatedDisplay ──hw ts──> Sampler ──model──> Generator
//!   (or real panel)                                    │
//!                                       ┌──────────────┴──────────────┐
//!                                  Controller(rs)              Controller(app)
//!                                       │                             │
//!                                 Distributor(rs)             Distributor(app)
//!                                       │                             │
//!                                  Connection...        stub <── LocalBinder <── proxy
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use metronome::VsyncService;
//! use metronome_shared::VsyncConfig;
//!
//! let service = VsyncService::new(VsyncConfig::default())?;
//! let connection = service.create_vsync_connection("renderer_1234")?;
//! // hand `connection` to a metronome_client::VSyncReceiver
//! ```
//!
//! Hardware timestamps enter through [`VsyncService::on_hardware_vsync`];
//! [`SimulatedDisplay`] produces them when no panel is attached.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod defaults;
pub mod display;
pub mod service;

pub use defaults::{create_generator, create_sampler, destroy_generator, destroy_sampler};
pub use display::SimulatedDisplay;
pub use service::{ServiceError, VsyncService};

/// Re-exported building blocks.
pub use metronome_client as client;
pub use metronome_core as core;
pub use metronome_dispatch as dispatch;
pub use metronome_shared as shared;
