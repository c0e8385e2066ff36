//! TCP transport for device messages

pub mod client;
pub mod connection;
pub mod server;
pub mod wire;

pub use client::DeviceClient;
pub use connection::{Connection, ConnectionId};
pub use server::DeviceServer;
pub use wire::{create_serializer, Serializer, WireFormat};
