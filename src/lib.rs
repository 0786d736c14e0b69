// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # temp-beacon-ble
//!
//! Periodic temperature sampling republished as a connectionless Bluetooth
//! Low Energy beacon.
//!
//! A beacon node reads a temperature sensor on a fixed schedule and splices
//! the value into a 128-bit service-data record carried in a live
//! advertisement. Any scanner in range can read the temperature without
//! connecting.
//!
//! ## Features
//!
//! - **Payload Encoding**: Fixed 19-byte service-data record (UUID, sensor type, temperature)
//! - **Coalescing Dispatch**: Timer ticks never overlap sensor reads; late ticks collapse into one
//! - **Live Updates**: New data is pushed into the running advertisement without restarting it
//! - **Beacon Scanning**: Decode beacons from nearby nodes, filtered by address or service UUID
//! - **Simulation**: Run the full node without hardware
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use temp_beacon_ble::sim::{SimulatedRadio, SimulatedSensor};
//! use temp_beacon_ble::{BeaconConfig, BeaconNode, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let sensor = SimulatedSensor::new("BMP180", 22.0).with_drift(0.1);
//!     let radio = Arc::new(SimulatedRadio::default());
//!
//!     let node = BeaconNode::new(BeaconConfig::default(), sensor, radio.clone());
//!     let running = node.bring_up().await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(12)).await;
//!     println!("Samples taken: {}", running.stats().completed);
//!
//!     running.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! The scanner uses the host Bluetooth adapter through `btleplug`.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### macOS
//! Requires Bluetooth permission.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod beacon;
pub mod ble;
pub mod config;
pub mod data;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod sensor;
pub mod sim;
pub mod timer;
pub mod utils;

// Re-exports for convenience
pub use beacon::{BeaconNode, RunningBeacon, SamplingJob};
pub use config::BeaconConfig;
pub use dispatcher::{DispatchStats, Job, TickHandle, TickOutcome, WorkDispatcher};
pub use error::{AdvError, DeviceError, Error, Result, SensorError, StackError};
pub use sensor::{SensorAdapter, SensorChannel, SensorDevice};
pub use timer::PeriodicTimer;
pub use utils::celsius_to_fahrenheit;

// Re-export commonly used types from submodules
pub use ble::{
    AdvertisementPublisher, AdvertisingData, AdvertisingParameters, BeaconReading, BeaconScanner,
    RadioStack, ScanFilter, SessionState, BEACON_SERVICE_UUID,
};
pub use data::{CentiCelsius, SensorValue};
pub use protocol::{SensorKind, ServiceDataPayload, ServiceDataRecord};
