//! Device monitoring server
//!
//! Listens for TCP connections from devices, prints every received message
//! and keeps per-device statistics, printed on a fixed interval.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;

use prahari::messages::storage::MessageStorage;
use prahari::{DeviceServer, Dispatcher, Serializer, WireFormat};

/// Device monitoring server: receives telemetry from devices over TCP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to listen on
    #[arg(long)]
    ip: String,

    /// TCP port to listen on
    #[arg(long)]
    port: u16,

    /// Interval between statistics printouts in milliseconds
    #[arg(long, default_value = "10000")]
    stats_print_interval: u64,

    /// Worker threads servicing connection events
    #[arg(long, default_value_t = default_threads())]
    threads: usize,
}

fn default_threads() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(2)
}

fn main() -> prahari::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let dispatcher = Dispatcher::new(args.threads)?;
    let server = DeviceServer::new(&dispatcher, Serializer::new(WireFormat::Json));
    let storage = Arc::new(MessageStorage::new());

    let store = Arc::clone(&storage);
    server.on_message(move |message| {
        println!("{}", message);
        store.store(message);
    });
    server.on_error(|| log::error!("server error"));

    server.listen(&args.ip, args.port);

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| prahari::Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    log::info!("monitor running, press Ctrl-C to stop");

    let stats_interval = Duration::from_millis(args.stats_print_interval);
    let mut last_stats = Instant::now();
    while running.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));
        if last_stats.elapsed() >= stats_interval {
            print_statistics(&storage);
            last_stats = Instant::now();
        }
    }

    log::info!("monitor stopped");
    Ok(())
}

fn print_statistics(storage: &MessageStorage) {
    let mut devices = storage.devices();
    if devices.is_empty() {
        println!("no messages received yet");
        return;
    }
    devices.sort();

    println!("--- message statistics ---");
    for device in devices {
        println!(
            "{}: {} messages ({} measurements, {} errors)",
            device,
            storage.message_count(&device),
            storage.measurements(&device).len(),
            storage.errors(&device).len()
        );
    }
}
