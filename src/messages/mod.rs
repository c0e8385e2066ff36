//! Device message model
//!
//! Messages exchanged between a device and the monitor. A device reports
//! either a [`Measurement`] (temperature sensor and fan speed readings) or a
//! [`DeviceError`]. The message carries the device name; attribution is part
//! of the payload, never derived from the connection it arrived on.
//!
//! Device names are length-bounded and checked at construction, so a message
//! that exists is always encodable.

pub mod storage;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::MAX_DEVICE_NAME_LEN;
use crate::error::{Error, Result};

/// Message from a device: a measurement report or an error report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceMessage {
    /// Periodic sensor readings
    Measurement(Measurement),
    /// Device-side failure report
    Error(DeviceError),
}

impl DeviceMessage {
    /// Name of the reporting device
    pub fn device_name(&self) -> &str {
        match self {
            DeviceMessage::Measurement(m) => &m.device_name,
            DeviceMessage::Error(e) => &e.device_name,
        }
    }

    /// Re-check construction invariants on a message that arrived from the
    /// wire, where the constructors were bypassed
    pub(crate) fn validate(&self) -> Result<()> {
        check_device_name(self.device_name())
    }
}

impl fmt::Display for DeviceMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceMessage::Measurement(m) => fmt::Display::fmt(m, f),
            DeviceMessage::Error(e) => fmt::Display::fmt(e, f),
        }
    }
}

/// Temperature and fan speed readings from one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    /// Name of the reporting device
    pub device_name: String,
    /// Ordered temperature sensor values
    pub temperature_sensors: Vec<u16>,
    /// Ordered fan speed values
    pub fan_speeds: Vec<u8>,
}

impl Measurement {
    /// Value signaling a failed temperature sensor read
    pub const ERROR_TEMPERATURE: u16 = 0xffff;
    /// Value signaling a failed fan speed read
    pub const ERROR_FAN_SPEED: u8 = 0xff;

    /// Create an empty measurement for the given device.
    ///
    /// Fails if the device name exceeds [`MAX_DEVICE_NAME_LEN`].
    pub fn new(device_name: impl Into<String>) -> Result<Self> {
        let device_name = device_name.into();
        check_device_name(&device_name)?;
        Ok(Self {
            device_name,
            temperature_sensors: Vec::new(),
            fan_speeds: Vec::new(),
        })
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] measurement: temperatures={:?} fan_speeds={:?}",
            self.device_name, self.temperature_sensors, self.fan_speeds
        )
    }
}

/// Failure report from one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceError {
    /// Name of the reporting device
    pub device_name: String,
    /// Failure cause
    pub error_kind: ErrorKind,
}

impl DeviceError {
    /// Create an error report for the given device.
    ///
    /// Fails if the device name exceeds [`MAX_DEVICE_NAME_LEN`].
    pub fn new(device_name: impl Into<String>, error_kind: ErrorKind) -> Result<Self> {
        let device_name = device_name.into();
        check_device_name(&device_name)?;
        Ok(Self {
            device_name,
            error_kind,
        })
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] error: {}", self.device_name, self.error_kind)
    }
}

/// Possible device failure causes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Disk got corrupted
    DiskCorrupted,
    /// Part of the device exploded
    Exploded,
    /// Unknown failure cause
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::DiskCorrupted => "disk_corrupted",
            ErrorKind::Exploded => "exploded",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

pub(crate) fn check_device_name(name: &str) -> Result<()> {
    if name.len() > MAX_DEVICE_NAME_LEN {
        return Err(Error::DeviceNameTooLong {
            max: MAX_DEVICE_NAME_LEN,
            len: name.len(),
        });
    }
    Ok(())
}
