//! Advertising data construction.
//!
//! Builds the advertising and scan-response data sets broadcast by the
//! beacon, using the standard length-type-value AD structure layout.

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

use crate::error::{AdvError, Error, Result};
use crate::protocol::ServiceDataRecord;

/// AD type: flags.
pub const AD_TYPE_FLAGS: u8 = 0x01;
/// AD type: complete local name.
pub const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
/// AD type: service data with a 128-bit UUID.
pub const AD_TYPE_SERVICE_DATA_128: u8 = 0x21;
/// AD type: manufacturer specific data.
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Flag: LE general discoverable mode.
pub const LE_GENERAL_DISCOVERABLE: u8 = 0x02;
/// Flag: BR/EDR (classic) not supported.
pub const BR_EDR_NOT_SUPPORTED: u8 = 0x04;

/// Maximum size of a legacy advertising or scan-response payload.
pub const MAX_LEGACY_PAYLOAD: usize = 31;

/// A single AD structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdStructure {
    /// Discoverability and capability flags.
    Flags(u8),
    /// Service data scoped by a 128-bit UUID. The UUID is the first 16 bytes
    /// of the data, little-endian.
    ServiceData128(Bytes),
    /// Complete local name.
    CompleteLocalName(String),
    /// Manufacturer specific data.
    ManufacturerData {
        /// Bluetooth SIG company identifier.
        company_id: u16,
        /// Payload following the company identifier.
        data: Bytes,
    },
    /// Any other AD type, kept verbatim.
    Unknown {
        /// AD type byte.
        ad_type: u8,
        /// Payload.
        data: Bytes,
    },
}

impl AdStructure {
    /// AD type byte for this structure.
    pub fn ad_type(&self) -> u8 {
        match self {
            Self::Flags(_) => AD_TYPE_FLAGS,
            Self::ServiceData128(_) => AD_TYPE_SERVICE_DATA_128,
            Self::CompleteLocalName(_) => AD_TYPE_COMPLETE_LOCAL_NAME,
            Self::ManufacturerData { .. } => AD_TYPE_MANUFACTURER_DATA,
            Self::Unknown { ad_type, .. } => *ad_type,
        }
    }

    /// Length of the payload following the type byte.
    fn payload_len(&self) -> usize {
        match self {
            Self::Flags(_) => 1,
            Self::ServiceData128(data) => data.len(),
            Self::CompleteLocalName(name) => name.len(),
            Self::ManufacturerData { data, .. } => 2 + data.len(),
            Self::Unknown { data, .. } => data.len(),
        }
    }

    /// Encoded size including the length and type bytes.
    pub fn encoded_len(&self) -> usize {
        2 + self.payload_len()
    }

    /// Append the length-type-value encoding to `buf`.
    ///
    /// The length byte is not checked; callers go through
    /// [`AdvertisingData::encode`], which rejects anything over
    /// [`MAX_LEGACY_PAYLOAD`].
    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((1 + self.payload_len()) as u8);
        buf.put_u8(self.ad_type());
        match self {
            Self::Flags(flags) => buf.put_u8(*flags),
            Self::ServiceData128(data) => buf.put_slice(data),
            Self::CompleteLocalName(name) => buf.put_slice(name.as_bytes()),
            Self::ManufacturerData { company_id, data } => {
                buf.put_u16_le(*company_id);
                buf.put_slice(data);
            }
            Self::Unknown { data, .. } => buf.put_slice(data),
        }
    }

    /// Parse every AD structure in a raw advertising payload.
    ///
    /// A zero length byte terminates the payload early, as some stacks pad
    /// with zeros.
    pub fn parse_all(data: &[u8]) -> Result<Vec<Self>> {
        let mut structures = Vec::new();
        let mut i = 0usize;

        while i < data.len() {
            let len = data[i] as usize;
            if len == 0 {
                break;
            }
            if i + 1 + len > data.len() {
                return Err(Error::InvalidData {
                    context: format!(
                        "AD structure at offset {} claims {} bytes, only {} left",
                        i,
                        len,
                        data.len() - i - 1
                    ),
                });
            }

            let ad_type = data[i + 1];
            let payload = &data[i + 2..i + 1 + len];
            structures.push(Self::from_parts(ad_type, payload)?);
            i += 1 + len;
        }

        Ok(structures)
    }

    fn from_parts(ad_type: u8, payload: &[u8]) -> Result<Self> {
        let structure = match ad_type {
            AD_TYPE_FLAGS => {
                let flags = *payload.first().ok_or_else(|| Error::InvalidData {
                    context: "Empty flags structure".to_string(),
                })?;
                Self::Flags(flags)
            }
            AD_TYPE_SERVICE_DATA_128 => Self::ServiceData128(Bytes::copy_from_slice(payload)),
            AD_TYPE_COMPLETE_LOCAL_NAME => {
                Self::CompleteLocalName(String::from_utf8_lossy(payload).into_owned())
            }
            AD_TYPE_MANUFACTURER_DATA if payload.len() >= 2 => Self::ManufacturerData {
                company_id: u16::from_le_bytes([payload[0], payload[1]]),
                data: Bytes::copy_from_slice(&payload[2..]),
            },
            _ => Self::Unknown {
                ad_type,
                data: Bytes::copy_from_slice(payload),
            },
        };
        Ok(structure)
    }
}

/// An ordered set of AD structures making up one advertising or
/// scan-response payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdvertisingData {
    structures: Vec<AdStructure>,
}

impl AdvertisingData {
    /// Create an empty data set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a data set from structures.
    pub fn from_structures(structures: Vec<AdStructure>) -> Self {
        Self { structures }
    }

    /// Append a structure.
    pub fn push(&mut self, structure: AdStructure) {
        self.structures.push(structure);
    }

    /// The structures in broadcast order.
    pub fn structures(&self) -> &[AdStructure] {
        &self.structures
    }

    /// Total encoded size.
    pub fn encoded_len(&self) -> usize {
        self.structures.iter().map(AdStructure::encoded_len).sum()
    }

    /// Encode to the on-air layout.
    ///
    /// # Errors
    ///
    /// Returns [`AdvError::PayloadTooLarge`] if the result exceeds a legacy
    /// advertising PDU.
    pub fn encode(&self) -> std::result::Result<Bytes, AdvError> {
        let len = self.encoded_len();
        if len > MAX_LEGACY_PAYLOAD {
            return Err(AdvError::PayloadTooLarge {
                len,
                max: MAX_LEGACY_PAYLOAD,
            });
        }

        let mut buf = BytesMut::with_capacity(len);
        for structure in &self.structures {
            structure.encode(&mut buf);
        }
        Ok(buf.freeze())
    }

    /// Find the first service-data structure, if any.
    pub fn service_data_128(&self) -> Option<&Bytes> {
        self.structures.iter().find_map(|s| match s {
            AdStructure::ServiceData128(data) => Some(data),
            _ => None,
        })
    }

    /// Find the complete local name, if any.
    pub fn local_name(&self) -> Option<&str> {
        self.structures.iter().find_map(|s| match s {
            AdStructure::CompleteLocalName(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Advertising data set of the beacon: flags plus the service-data record.
pub fn beacon_advertising_data(record: &ServiceDataRecord) -> AdvertisingData {
    AdvertisingData::from_structures(vec![
        AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
        AdStructure::ServiceData128(Bytes::copy_from_slice(record.as_bytes())),
    ])
}

/// Scan-response data set of the beacon: the complete device name.
pub fn beacon_scan_response(device_name: &str) -> AdvertisingData {
    AdvertisingData::from_structures(vec![AdStructure::CompleteLocalName(
        device_name.to_string(),
    )])
}

/// Advertising parameters handed to the radio stack on start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingParameters {
    /// Whether centrals may connect.
    pub connectable: bool,
    /// Whether the identity address is advertised instead of a private one.
    pub use_identity: bool,
    /// Minimum advertising interval.
    pub interval_min: Duration,
    /// Maximum advertising interval.
    pub interval_max: Duration,
}

impl AdvertisingParameters {
    /// Connectable advertising at the second fast interval (100-150 ms).
    pub fn conn_fast_2() -> Self {
        Self {
            connectable: true,
            use_identity: true,
            interval_min: Duration::from_millis(100),
            interval_max: Duration::from_millis(150),
        }
    }

    /// Non-connectable advertising at the second fast interval (100-150 ms).
    pub fn nconn_fast_2() -> Self {
        Self {
            connectable: false,
            ..Self::conn_fast_2()
        }
    }

    /// Interval bounds in 0.625 ms controller units.
    pub fn interval_units(&self) -> (u16, u16) {
        let to_units = |d: Duration| (d.as_micros() / 625).min(u16::MAX as u128) as u16;
        (to_units(self.interval_min), to_units(self.interval_max))
    }
}

impl Default for AdvertisingParameters {
    fn default() -> Self {
        Self::conn_fast_2()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::BEACON_SERVICE_UUID;
    use crate::data::SensorValue;
    use crate::protocol::SENSOR_TYPE_TEMPERATURE;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_flags_encoding() {
        let mut buf = BytesMut::new();
        AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED).encode(&mut buf);
        assert_eq!(&buf[..], &[0x02, 0x01, 0x06]);
    }

    #[test]
    fn test_beacon_advertising_layout() {
        let mut record = ServiceDataRecord::new(BEACON_SERVICE_UUID, SENSOR_TYPE_TEMPERATURE);
        record.encode(&SensorValue::new(23, 500000));

        let ad = beacon_advertising_data(&record);
        let encoded = ad.encode().unwrap();

        assert_eq!(encoded.len(), 3 + 2 + ServiceDataRecord::LEN);
        assert_eq!(&encoded[..3], &[0x02, 0x01, 0x06]);
        assert_eq!(encoded[3], 20);
        assert_eq!(encoded[4], AD_TYPE_SERVICE_DATA_128);
        assert_eq!(&encoded[5..], record.as_bytes());
    }

    #[test]
    fn test_scan_response_layout() {
        let sd = beacon_scan_response("BMP180 Beacon");
        let encoded = sd.encode().unwrap();
        assert_eq!(encoded[0] as usize, 1 + "BMP180 Beacon".len());
        assert_eq!(encoded[1], AD_TYPE_COMPLETE_LOCAL_NAME);
        assert_eq!(&encoded[2..], b"BMP180 Beacon");
        assert_eq!(sd.local_name(), Some("BMP180 Beacon"));
    }

    #[test]
    fn test_payload_too_large() {
        let sd = beacon_scan_response("a name that is far too long for a legacy pdu");
        let err = sd.encode().unwrap_err();
        assert!(matches!(err, AdvError::PayloadTooLarge { max: 31, .. }));
    }

    #[test]
    fn test_oversized_structure_is_rejected_not_truncated() {
        let ad = AdvertisingData::from_structures(vec![AdStructure::Unknown {
            ad_type: 0x30,
            data: Bytes::from(vec![0xAA; 300]),
        }]);
        let err = ad.encode().unwrap_err();
        assert_eq!(
            err,
            AdvError::PayloadTooLarge {
                len: 302,
                max: MAX_LEGACY_PAYLOAD
            }
        );
    }

    #[test]
    fn test_parse_all() {
        let mut record = ServiceDataRecord::new(BEACON_SERVICE_UUID, SENSOR_TYPE_TEMPERATURE);
        record.encode(&SensorValue::new(-5, -250000));
        let ad = beacon_advertising_data(&record);
        let encoded = ad.encode().unwrap();

        let parsed = AdvertisingData::from_structures(AdStructure::parse_all(&encoded).unwrap());
        assert_eq!(parsed, ad);
        assert_eq!(
            parsed.service_data_128().map(|b| b.to_vec()),
            Some(record.as_bytes().to_vec())
        );
    }

    #[test]
    fn test_parse_manufacturer_and_padding() {
        let raw = [0x06, 0xFF, 0xFF, 0xFF, 0x01, 0x2E, 0x09, 0x00, 0x00];
        let parsed = AdStructure::parse_all(&raw).unwrap();
        assert_eq!(
            parsed,
            vec![AdStructure::ManufacturerData {
                company_id: 0xFFFF,
                data: Bytes::from_static(&[0x01, 0x2E, 0x09]),
            }]
        );
    }

    #[test]
    fn test_parse_truncated() {
        assert!(AdStructure::parse_all(&[0x05, 0x09, b'a']).is_err());
        assert!(AdStructure::parse_all(&[0x01, 0x01]).is_err());
    }

    #[test]
    fn test_conn_fast_2_parameters() {
        let params = AdvertisingParameters::conn_fast_2();
        assert!(params.connectable);
        assert_eq!(params.interval_units(), (0x00A0, 0x00F0));
        assert!(!AdvertisingParameters::nconn_fast_2().connectable);
    }
}
