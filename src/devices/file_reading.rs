//! Device reading temperature and fan speed values from sensor files
//!
//! Each configured path is expected to hold one numeric value (the
//! `/sys/class/hwmon` layout). On every reporting tick the device reads all
//! of its files, builds a [`Measurement`] and emits it through `on_message`.
//! A file that cannot be read or parsed contributes the corresponding error
//! sentinel value instead of aborting the report.
//!
//! Ticks originate on a dedicated timer thread and cross into the device's
//! dispatch lane, so a dropped device stops reporting without further
//! callbacks.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::dispatch::{self, Dispatcher, Lane};
use crate::error::Result;
use crate::handler::HandlerSlot;
use crate::messages::{check_device_name, DeviceMessage, Measurement};

struct DeviceShared {
    name: String,
    lane: Lane,
    report_interval: Duration,
    temperature_files: Vec<PathBuf>,
    fan_speed_files: Vec<PathBuf>,
    running: AtomicBool,
    on_message: HandlerSlot<DeviceMessage>,
}

/// Device producing measurement reports from sensor files on a fixed interval
#[derive(Clone)]
pub struct FileReadingDevice {
    shared: Arc<DeviceShared>,
}

impl FileReadingDevice {
    /// Create the device. Fails if the device name exceeds the configured
    /// maximum, so every report it later builds is constructible.
    pub fn new(
        name: impl Into<String>,
        dispatcher: &Dispatcher,
        report_interval: Duration,
        temperature_files: Vec<PathBuf>,
        fan_speed_files: Vec<PathBuf>,
    ) -> Result<Self> {
        let name = name.into();
        check_device_name(&name)?;
        Ok(Self {
            shared: Arc::new(DeviceShared {
                name,
                lane: dispatcher.lane(),
                report_interval,
                temperature_files,
                fan_speed_files,
                running: AtomicBool::new(false),
                on_message: HandlerSlot::new(),
            }),
        })
    }

    /// Assign the callback receiving each produced report
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(DeviceMessage) + Send + Sync + 'static,
    {
        self.shared.on_message.set(handler);
    }

    /// Start periodic reporting. Subsequent calls are no-ops.
    pub fn start(&self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let tick = dispatch::wrap(&self.shared.lane, &self.shared, |owner, ()| {
            owner.report_measurement();
        });
        let weak = Arc::downgrade(&self.shared);
        let interval = self.shared.report_interval;

        thread::Builder::new()
            .name(format!("device-{}-timer", self.shared.name))
            .spawn(move || loop {
                thread::sleep(interval);
                match weak.upgrade() {
                    Some(shared) if shared.running.load(Ordering::SeqCst) => tick(()),
                    _ => break,
                }
            })?;

        log::info!(
            "device {} reporting every {:?}",
            self.shared.name,
            self.shared.report_interval
        );
        Ok(())
    }

    /// Stop periodic reporting
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
    }
}

impl DeviceShared {
    fn report_measurement(&self) {
        let mut measurement = match Measurement::new(self.name.clone()) {
            Ok(measurement) => measurement,
            Err(e) => {
                log::error!("device {}: {}", self.name, e);
                return;
            }
        };

        for path in &self.temperature_files {
            let value = read_sensor_file(path)
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(Measurement::ERROR_TEMPERATURE);
            measurement.temperature_sensors.push(value);
        }
        for path in &self.fan_speed_files {
            let value = read_sensor_file(path)
                .and_then(|v| u8::try_from(v).ok())
                .unwrap_or(Measurement::ERROR_FAN_SPEED);
            measurement.fan_speeds.push(value);
        }

        self.on_message.invoke(DeviceMessage::Measurement(measurement));
    }
}

fn read_sensor_file(path: &Path) -> Option<u64> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_sensor_file_parses_trimmed_value() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "1234\n").unwrap();
        assert_eq!(read_sensor_file(file.path()), Some(1234));
    }

    #[test]
    fn test_read_sensor_file_rejects_garbage() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "not a number").unwrap();
        assert_eq!(read_sensor_file(file.path()), None);
    }

    #[test]
    fn test_read_sensor_file_missing() {
        assert_eq!(read_sensor_file(Path::new("/nonexistent/sensor")), None);
    }
}
