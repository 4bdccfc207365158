//! # METRONOME Client
//!
//! The consumer end of a vsync connection.
//!
//! ## Example
//!
//! ```rust,ignore
//! use metronome_client::VSyncReceiver;
//!
//! let receiver = VSyncReceiver::new(connection, "renderer");
//! receiver.init()?;
//! receiver.request_next_vsync(|timestamp| draw_frame(timestamp))?;
//! ```
//!
//! One request yields one callback. Ask again from inside the callback for
//! the next frame, or use [`VSyncReceiver::set_vsync_rate`] for a fixed
//! cadence.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod receiver;

pub use receiver::{drain_latest, FrameCallback, VSyncReceiver};
