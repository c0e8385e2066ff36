//! In-memory store of received device messages
//!
//! The monitor keeps every message it has seen, keyed by device name, in
//! arrival order per device. Shared between the server callback and the
//! statistics printer, so access goes through a mutex.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::messages::{DeviceError, DeviceMessage, Measurement};

/// Mutex-guarded message store keyed by device name
#[derive(Default)]
pub struct MessageStorage {
    messages: Mutex<HashMap<String, Vec<DeviceMessage>>>,
}

impl MessageStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message under its device name
    pub fn store(&self, message: DeviceMessage) {
        let mut map = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(message.device_name().to_string())
            .or_default()
            .push(message);
    }

    /// Names of all devices that have reported at least one message
    pub fn devices(&self) -> Vec<String> {
        let map = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        map.keys().cloned().collect()
    }

    /// All messages received from the given device, in arrival order
    pub fn device_messages(&self, device_name: &str) -> Vec<DeviceMessage> {
        let map = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        map.get(device_name).cloned().unwrap_or_default()
    }

    /// Number of messages received from the given device
    pub fn message_count(&self, device_name: &str) -> usize {
        let map = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        map.get(device_name).map_or(0, Vec::len)
    }

    /// Measurements received from the given device, in arrival order
    pub fn measurements(&self, device_name: &str) -> Vec<Measurement> {
        self.partition(device_name).0
    }

    /// Error reports received from the given device, in arrival order
    pub fn errors(&self, device_name: &str) -> Vec<DeviceError> {
        self.partition(device_name).1
    }

    // One pass over the device's messages, split by kind. The match is
    // exhaustive: a new message variant will not compile until handled here.
    fn partition(&self, device_name: &str) -> (Vec<Measurement>, Vec<DeviceError>) {
        let map = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        let mut measurements = Vec::new();
        let mut errors = Vec::new();
        if let Some(messages) = map.get(device_name) {
            for message in messages {
                match message {
                    DeviceMessage::Measurement(m) => measurements.push(m.clone()),
                    DeviceMessage::Error(e) => errors.push(e.clone()),
                }
            }
        }
        (measurements, errors)
    }
}
