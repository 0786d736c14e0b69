//! BLE module.
//!
//! Advertising payload construction, the advertisement session that pushes
//! payloads to a radio stack, and the receiver-side beacon scanner.

pub mod advertising;
pub mod publisher;
pub mod scanner;
pub mod uuids;

pub use advertising::{AdStructure, AdvertisingData, AdvertisingParameters};
pub use publisher::{AdvertisementPublisher, RadioStack, ReadyNotifier, SessionState};
pub use scanner::{BeaconReading, BeaconScanner, ScanFilter};
pub use uuids::*;
