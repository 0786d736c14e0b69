//! Simulated beacon node example
//!
//! Runs the full beacon pipeline against a simulated sensor and radio:
//! - Enables the radio and starts advertising
//! - Samples a drifting temperature every 5 seconds
//! - Prints every advertisement pushed on air
//!
//! Run with: cargo run --example simulated_beacon
//!
//! To start from a specific temperature:
//!   cargo run --example simulated_beacon -- --start 18.5

use std::sync::Arc;
use std::time::Duration;
use temp_beacon_ble::ble::advertising::AdStructure;
use temp_beacon_ble::sim::{SimulatedRadio, SimulatedSensor};
use temp_beacon_ble::utils::hex_dump;
use temp_beacon_ble::{BeaconConfig, BeaconNode, Result, ServiceDataRecord};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,temp_beacon_ble=info")
        .init();

    println!("Simulated Temperature Beacon");
    println!("============================\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let start = args
        .iter()
        .position(|arg| arg == "--start")
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(22.0);

    let sensor = SimulatedSensor::new("BMP180 (simulated)", start).with_drift(0.25);
    let radio = Arc::new(SimulatedRadio::default());

    let node = BeaconNode::new(BeaconConfig::default(), sensor, radio.clone());
    let running = node.bring_up().await?;

    println!("Advertising. Press Ctrl+C to stop.\n");

    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    let mut last = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let on_air = radio.on_air();
                if on_air == last {
                    continue;
                }

                if let Some(ref bytes) = on_air {
                    println!("{}", hex_dump(bytes));
                    let record = AdStructure::parse_all(bytes)?
                        .into_iter()
                        .find_map(|s| match s {
                            AdStructure::ServiceData128(data) => ServiceDataRecord::parse(&data).ok(),
                            _ => None,
                        });
                    if let Some(record) = record {
                        println!("  -> {:?}\n", record);
                    }
                }
                last = on_air;
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                break;
            }
        }
    }

    let stats = running.stats();
    running.shutdown().await?;

    println!(
        "Samples: {} scheduled, {} coalesced, {} completed",
        stats.scheduled, stats.coalesced, stats.completed
    );

    Ok(())
}
