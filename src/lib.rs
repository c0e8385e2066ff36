//! Prahari - device telemetry monitor
//!
//! Transport library letting distributed sensor-bearing devices stream
//! telemetry (temperature/fan measurements, error reports) to a central
//! monitor over TCP, with messages dispatched back over the same
//! connection.
//!
//! ## Architecture
//!
//! - [`dispatch`]: worker pool plus per-actor serial lanes with
//!   weak-liveness guarded callbacks
//! - [`net`]: framing codec, connection actor, server and client
//! - [`messages`]: the device message model and the monitor-side store
//! - [`devices`]: file-backed measurement source for the device tool

pub mod config;
pub mod devices;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod messages;
pub mod net;

// Re-export commonly used types
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use messages::{DeviceError, DeviceMessage, ErrorKind, Measurement};
pub use net::{DeviceClient, DeviceServer, Serializer, WireFormat};
