//! # METRONOME Core Clock
//!
//! The software clock of the vsync pipeline.
//!
//! ```text
//!   hardware vsync ──> Sampler ──(ClockModel)──> Generator ──> Controller ──> sink
//!                      (PLL)                    (thread)      (one per sink)
//! ```
//!
//! ## Components
//!
//! 1. [`Sampler`] - turns noisy hardware timestamps into a period/phase model
//! 2. [`Generator`] - fires phase-shifted listeners on the modelled ticks
//! 3. [`Controller`] - gates one sink's subscription to the generator
//!
//! ## Thread Safety
//!
//! All three are `Send + Sync` and meant to be shared behind `Arc`.
//! The generator fires listeners outside its lock, so a listener may call
//! back into the generator.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod controller;
pub mod generator;
pub mod sampler;

pub use controller::Controller;
pub use generator::{next_fire_time, Generator, ModelSink};
pub use sampler::{HardwareVsyncSwitch, Sampler};
