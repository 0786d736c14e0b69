//! Beacon configuration.
//!
//! The node has no runtime configuration; [`BeaconConfig::default`] carries
//! the fixed constants. The `with_*` builders exist for simulators and tests.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::advertising::AdvertisingParameters;
use crate::ble::uuids::BEACON_SERVICE_UUID;
use crate::error::{Error, Result};
use crate::protocol::SENSOR_TYPE_TEMPERATURE;
use crate::sensor::SensorChannel;

/// Complete local name put in the scan response.
pub const DEVICE_NAME: &str = "BMP180 Beacon";

/// Delay between arming the sensor timer and the first sample.
pub const INITIAL_DELAY: Duration = Duration::from_secs(1);

/// Period between samples.
pub const SAMPLE_PERIOD: Duration = Duration::from_secs(5);

/// Fixed parameters of a beacon node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconConfig {
    /// Complete local name broadcast in the scan response.
    pub device_name: String,
    /// Service UUID scoping the service-data record.
    pub service_uuid: Uuid,
    /// Sensor-type tag written into the record.
    pub sensor_type: u8,
    /// Sensor channel sampled each cycle.
    pub channel: SensorChannel,
    /// Delay before the first sample.
    pub initial_delay: Duration,
    /// Period between samples.
    pub sample_period: Duration,
    /// Advertising parameters used on start.
    pub advertising: AdvertisingParameters,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_string(),
            service_uuid: BEACON_SERVICE_UUID,
            sensor_type: SENSOR_TYPE_TEMPERATURE,
            channel: SensorChannel::DieTemp,
            initial_delay: INITIAL_DELAY,
            sample_period: SAMPLE_PERIOD,
            advertising: AdvertisingParameters::conn_fast_2(),
        }
    }
}

impl BeaconConfig {
    /// Set the device name.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Set the sensor channel.
    pub fn with_channel(mut self, channel: SensorChannel) -> Self {
        self.channel = channel;
        self
    }

    /// Set the sampling schedule.
    ///
    /// A zero period is rejected by [`BeaconConfig::validate`].
    pub fn with_schedule(mut self, initial_delay: Duration, sample_period: Duration) -> Self {
        self.initial_delay = initial_delay;
        self.sample_period = sample_period;
        self
    }

    /// Check the configuration can drive a beacon.
    pub fn validate(&self) -> Result<()> {
        if self.sample_period.is_zero() {
            return Err(Error::InvalidData {
                context: "sample period must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}
