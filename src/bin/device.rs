//! File-reading device tool
//!
//! Reports device temperature sensors and fan speeds to the device monitor
//! over TCP. Sensor values are read from files, one numeric value per file
//! (the `/sys/class/hwmon` layout).
//!
//! Example:
//!
//! ```text
//! prahari-device --server-ip 1.2.3.4 --server-port 1234 \
//!     --device-name testing_device \
//!     --temp-sensor /sys/class/hwmon/hwmon4/temp1_input \
//!     --temp-sensor /sys/class/hwmon/hwmon4/temp2_input \
//!     --fan-speed /sys/class/hwmon/hwmon2/fan1_input
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;

use prahari::devices::FileReadingDevice;
use prahari::{DeviceClient, Dispatcher, Serializer, WireFormat};

/// Tool reporting device temperature sensors and fan speeds to the device
/// monitoring server over TCP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address of the device monitoring server
    #[arg(long)]
    server_ip: String,

    /// TCP port of the device monitoring server
    #[arg(long)]
    server_port: u16,

    /// Device name
    #[arg(long)]
    device_name: String,

    /// Reporting interval in milliseconds
    #[arg(long, default_value = "1000")]
    report_interval: u64,

    /// Path to a file listing a temperature sensor value (repeatable)
    #[arg(long = "temp-sensor")]
    temp_sensor: Vec<PathBuf>,

    /// Path to a file listing a fan speed value (repeatable)
    #[arg(long = "fan-speed")]
    fan_speed: Vec<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match run(args) {
        Ok(clean) if clean => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the tool stopped cleanly (Ctrl-C) rather than because
/// the transport died
fn run(args: Args) -> prahari::Result<bool> {
    let dispatcher = Dispatcher::new(2)?;
    let client = DeviceClient::new(&dispatcher, Serializer::new(WireFormat::Json));
    let device = FileReadingDevice::new(
        &args.device_name,
        &dispatcher,
        Duration::from_millis(args.report_interval),
        args.temp_sensor,
        args.fan_speed,
    )?;

    let running = Arc::new(AtomicBool::new(true));
    let failed = Arc::new(AtomicBool::new(false));

    let r = Arc::clone(&running);
    let f = Arc::clone(&failed);
    client.on_error(move || {
        log::error!("TCP connection to server error");
        f.store(true, Ordering::Relaxed);
        r.store(false, Ordering::Relaxed);
    });

    let r = Arc::clone(&running);
    let f = Arc::clone(&failed);
    client.on_close(move || {
        log::error!("TCP connection to server closed");
        f.store(true, Ordering::Relaxed);
        r.store(false, Ordering::Relaxed);
    });

    let reporting_device = device.clone();
    client.on_connect(move || {
        log::info!("connected, reporting starts");
        if let Err(e) = reporting_device.start() {
            log::error!("failed to start reporting: {}", e);
        }
    });

    let sender = client.clone();
    device.on_message(move |message| sender.send(message));

    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| prahari::Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    client.connect(&args.server_ip, args.server_port)?;

    while running.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));
    }

    device.stop();
    Ok(!failed.load(Ordering::Relaxed))
}
