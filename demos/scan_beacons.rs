//! Beacon scanner example
//!
//! Listens for temperature beacons and prints every decoded reading.
//!
//! Optional allow-lists are read from the working directory:
//! - `mac_filter.txt`: one address per line
//! - `uuid_filter.txt`: one service UUID per line
//!
//! A missing file disables that filter; an empty file blocks everything.
//!
//! Run with: cargo run --example scan_beacons

use std::time::Duration;
use temp_beacon_ble::{BeaconScanner, Result, ScanFilter};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,temp_beacon_ble=info")
        .init();

    println!("Temperature Beacon Scanner");
    println!("==========================\n");

    let filter = ScanFilter::allow_all()
        .load_mac_list("mac_filter.txt")?
        .load_uuid_list("uuid_filter.txt")?;

    let scanner = BeaconScanner::new(filter).await?;
    let mut readings = scanner.subscribe();
    scanner.start_scanning().await?;

    println!("Scanning. Press Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            reading = readings.recv() => match reading {
                Ok(reading) => println!("{}", reading),
                Err(RecvError::Lagged(n)) => println!("(skipped {} readings)", n),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                break;
            }
        }
    }

    scanner.stop_scanning().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    Ok(())
}
