//! Temperature data structures.
//!
//! Contains the fixed-point value reported by sensor drivers and the
//! 16-bit hundredths-of-a-degree representation broadcast over the air.

use tracing::warn;

use crate::utils::celsius_to_fahrenheit;

/// Fixed-point sensor reading.
///
/// Sensor drivers report a value as an integer part plus a fractional part
/// in millionths of a unit. Both parts carry the same sign, so -5.25 °C is
/// `{ val1: -5, val2: -250000 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorValue {
    /// Integer part of the value.
    pub val1: i32,
    /// Fractional part of the value, in millionths.
    pub val2: i32,
}

impl SensorValue {
    /// Number of fractional units per whole unit.
    pub const MICROS_PER_UNIT: i32 = 1_000_000;

    /// Create a new sensor value from its integer and fractional parts.
    pub fn new(val1: i32, val2: i32) -> Self {
        Self { val1, val2 }
    }

    /// Build a sensor value from a floating point reading.
    ///
    /// The fractional part is truncated to whole millionths.
    ///
    /// # Example
    ///
    /// ```
    /// use temp_beacon_ble::data::SensorValue;
    ///
    /// let value = SensorValue::from_f64(-5.25);
    /// assert_eq!(value, SensorValue::new(-5, -250000));
    /// ```
    pub fn from_f64(value: f64) -> Self {
        let val1 = value.trunc() as i32;
        let val2 = ((value - value.trunc()) * Self::MICROS_PER_UNIT as f64).round() as i32;
        Self { val1, val2 }
    }

    /// Convert to a floating point value.
    pub fn to_f64(&self) -> f64 {
        self.val1 as f64 + self.val2 as f64 / Self::MICROS_PER_UNIT as f64
    }

    /// Value in hundredths of a unit, truncated toward zero.
    ///
    /// Computed in 64 bits so that no intermediate overflows.
    pub fn to_centi(&self) -> i64 {
        self.val1 as i64 * 100 + self.val2 as i64 / 10_000
    }
}

impl std::fmt::Display for SensorValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.to_f64())
    }
}

/// Temperature in hundredths of a degree Celsius, as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CentiCelsius(pub i16);

impl CentiCelsius {
    /// Smallest representable temperature (-327.68 °C).
    pub const MIN: Self = Self(i16::MIN);
    /// Largest representable temperature (327.67 °C).
    pub const MAX: Self = Self(i16::MAX);

    /// Convert a sensor value, returning `None` if it does not fit in 16 bits.
    pub fn try_from_sensor_value(value: &SensorValue) -> Option<Self> {
        i16::try_from(value.to_centi()).ok().map(Self)
    }

    /// Convert a sensor value, clamping to the representable range.
    ///
    /// Out-of-range readings are logged and saturate at [`CentiCelsius::MIN`]
    /// or [`CentiCelsius::MAX`] instead of wrapping around.
    ///
    /// # Example
    ///
    /// ```
    /// use temp_beacon_ble::data::{CentiCelsius, SensorValue};
    ///
    /// let centi = CentiCelsius::saturating_from_sensor_value(&SensorValue::new(23, 500000));
    /// assert_eq!(centi, CentiCelsius(2350));
    ///
    /// let hot = CentiCelsius::saturating_from_sensor_value(&SensorValue::new(400, 0));
    /// assert_eq!(hot, CentiCelsius::MAX);
    /// ```
    pub fn saturating_from_sensor_value(value: &SensorValue) -> Self {
        match Self::try_from_sensor_value(value) {
            Some(centi) => centi,
            None => {
                let clamped = value.to_centi().clamp(i16::MIN as i64, i16::MAX as i64) as i16;
                warn!(
                    "Temperature {} out of 16-bit range, clamping to {}",
                    value,
                    CentiCelsius(clamped)
                );
                Self(clamped)
            }
        }
    }

    /// Little-endian wire representation.
    pub fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    /// Parse from the little-endian wire representation.
    pub fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self(i16::from_le_bytes(bytes))
    }

    /// Raw hundredths value.
    pub fn raw_value(&self) -> i16 {
        self.0
    }

    /// Convert to degrees Celsius.
    pub fn to_celsius(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Convert to degrees Fahrenheit.
    pub fn to_fahrenheit(&self) -> f64 {
        celsius_to_fahrenheit(self.to_celsius())
    }
}

impl std::fmt::Display for CentiCelsius {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} °C", self.to_celsius())
    }
}
