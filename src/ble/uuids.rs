//! BLE identifiers used by the beacon.
//!
//! Contains the service UUID scoping the service-data record and the
//! manufacturer ID used by the manufacturer-data beacon variant.

use uuid::Uuid;

/// Service UUID carried at the start of every service-data record.
pub const BEACON_SERVICE_UUID: Uuid = Uuid::from_u128(0xddce36f1_417c_48e1_a8ea_e286e1e5498e);

/// Manufacturer ID reserved for testing (0xFFFF), used by the
/// manufacturer-data beacon variant.
pub const TEST_MANUFACTURER_ID: u16 = 0xFFFF;

/// Check if a service UUID is the beacon service.
pub fn is_beacon_service(uuid: &Uuid) -> bool {
    *uuid == BEACON_SERVICE_UUID
}
