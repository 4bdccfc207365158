//! # METRONOME Dispatch
//!
//! Fans one vsync clock out to many consumers.
//!
//! ```text
//!   Controller ──> Distributor ──┬──> Connection ──channel──> consumer
//!                  (thread)      ├──> Connection ──channel──> consumer
//!                                └──> Connection ──channel──> consumer
//! ```
//!
//! ## Modules
//!
//! - [`distributor`] - broadcast thread, rate bookkeeping, QoS overrides
//! - [`connection`] - per-consumer handle
//! - [`channel`] - non-blocking 8-byte timestamp pipe
//! - [`parcel`] / [`ipc`] - remote proxy/stub and an in-process binder
//!
//! ## Delivery Guarantees
//!
//! Within one tick, connections are notified in insertion order. A post
//! never blocks: a full channel re-arms the connection for the next tick,
//! a broken one removes the connection.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod channel;
pub mod connection;
pub mod distributor;
pub mod ipc;
pub mod parcel;

pub use channel::{decode_timestamps, SocketChannel};
pub use connection::Connection;
pub use distributor::{qos_pid_from_name, ConnectionInfo, Distributor};
pub use ipc::{
    LocalBinder, RemoteObject, VSyncConnectionApi, VSyncConnectionProxy, VSyncConnectionStub,
    VSYNC_CONNECTION_TOKEN,
};
pub use parcel::{Parcel, ParcelError};
