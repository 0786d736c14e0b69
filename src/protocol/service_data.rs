//! Service-data record carried in the beacon advertisement.
//!
//! The record is a fixed 19-byte layout:
//!
//! | Offset | Length | Field |
//! |---|---|---|
//! | 0 | 16 | Service UUID, little-endian byte order |
//! | 16 | 1 | Sensor-type tag |
//! | 17 | 2 | Temperature in hundredths of a degree, `i16` little-endian |
//!
//! Receivers usually get the payload with the UUID already stripped by their
//! BLE stack, which is what [`ServiceDataPayload`] parses.

use tracing::trace;
use uuid::Uuid;

use crate::data::{CentiCelsius, SensorValue};
use crate::error::{Error, Result};

/// Sensor type tag for a temperature reading.
pub const SENSOR_TYPE_TEMPERATURE: u8 = 0x01;

/// Sensor type tag reserved for "no data"; receivers ignore it.
pub const SENSOR_TYPE_NONE: u8 = 0x00;

/// Kind of sensor announced by the type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SensorKind {
    /// No data (tag `0x00`).
    None,
    /// Temperature in hundredths of a degree Celsius (tag `0x01`).
    Temperature,
    /// Any other tag.
    Unknown(u8),
}

impl SensorKind {
    /// Create from raw tag value.
    pub fn from_raw(value: u8) -> Self {
        match value {
            SENSOR_TYPE_NONE => Self::None,
            SENSOR_TYPE_TEMPERATURE => Self::Temperature,
            other => Self::Unknown(other),
        }
    }

    /// Convert to raw tag value.
    pub fn to_raw(&self) -> u8 {
        match self {
            Self::None => SENSOR_TYPE_NONE,
            Self::Temperature => SENSOR_TYPE_TEMPERATURE,
            Self::Unknown(tag) => *tag,
        }
    }
}

/// The 19-byte service-data record broadcast by the beacon.
#[derive(Clone, PartialEq, Eq)]
pub struct ServiceDataRecord {
    bytes: [u8; ServiceDataRecord::LEN],
}

impl ServiceDataRecord {
    /// Total record length.
    pub const LEN: usize = 19;
    /// Offset of the sensor-type tag.
    pub const SENSOR_TYPE_OFFSET: usize = 16;
    /// Offset of the temperature slot.
    pub const TEMPERATURE_OFFSET: usize = 17;

    /// Create a record for `uuid` with the temperature slot zeroed.
    pub fn new(uuid: Uuid, sensor_type: u8) -> Self {
        let mut bytes = [0u8; Self::LEN];
        bytes[..16].copy_from_slice(&uuid.as_u128().to_le_bytes());
        bytes[Self::SENSOR_TYPE_OFFSET] = sensor_type;
        Self { bytes }
    }

    /// Parse a complete record, UUID included.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let bytes: [u8; Self::LEN] = data.try_into().map_err(|_| Error::InvalidData {
            context: format!(
                "Service data record must be {} bytes, got {}",
                Self::LEN,
                data.len()
            ),
        })?;
        Ok(Self { bytes })
    }

    /// Splice the truncated hundredths representation of `value` into the
    /// temperature slot.
    ///
    /// Only bytes `[17..19)` are written. Values outside the 16-bit range are
    /// clamped (see [`CentiCelsius::saturating_from_sensor_value`]).
    pub fn encode(&mut self, value: &SensorValue) -> CentiCelsius {
        let centi = CentiCelsius::saturating_from_sensor_value(value);
        self.set_temperature(centi);
        centi
    }

    /// Write an already encoded temperature into the temperature slot.
    pub fn set_temperature(&mut self, centi: CentiCelsius) {
        self.bytes[Self::TEMPERATURE_OFFSET..].copy_from_slice(&centi.to_le_bytes());
        trace!("Service data temperature slot set to {}", centi);
    }

    /// Service UUID stored in the record.
    pub fn uuid(&self) -> Uuid {
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&self.bytes[..16]);
        Uuid::from_u128(u128::from_le_bytes(raw))
    }

    /// Sensor-type tag stored in the record.
    pub fn sensor_type(&self) -> SensorKind {
        SensorKind::from_raw(self.bytes[Self::SENSOR_TYPE_OFFSET])
    }

    /// Temperature currently stored in the record.
    pub fn temperature(&self) -> CentiCelsius {
        CentiCelsius::from_le_bytes([
            self.bytes[Self::TEMPERATURE_OFFSET],
            self.bytes[Self::TEMPERATURE_OFFSET + 1],
        ])
    }

    /// Raw record bytes.
    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for ServiceDataRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDataRecord")
            .field("uuid", &self.uuid())
            .field("sensor_type", &self.sensor_type())
            .field("temperature", &self.temperature())
            .finish()
    }
}

/// Sensor payload as seen by a receiver, without the leading UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceDataPayload {
    /// Announced sensor type.
    pub sensor_type: SensorKind,
    /// Temperature, present when the type is a temperature and the value
    /// bytes were included.
    pub temperature: Option<CentiCelsius>,
}

impl ServiceDataPayload {
    /// Parse `[type, t_lo, t_hi]`.
    ///
    /// Only the type byte is mandatory; a payload too short to hold a value
    /// yields `temperature: None`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (&tag, rest) = data.split_first().ok_or_else(|| Error::InvalidData {
            context: "Empty service data payload".to_string(),
        })?;

        let sensor_type = SensorKind::from_raw(tag);
        let temperature = match (sensor_type, rest) {
            (SensorKind::Temperature, [lo, hi, ..]) => Some(CentiCelsius::from_le_bytes([*lo, *hi])),
            _ => None,
        };

        Ok(Self {
            sensor_type,
            temperature,
        })
    }
}
