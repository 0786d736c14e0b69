//! Sensor access.
//!
//! [`SensorDevice`] is the boundary to a physical sensor driver.
//! [`SensorAdapter`] wraps its two-stage fetch/read protocol into a single
//! fallible read.

use tracing::{debug, error, trace};

use crate::data::SensorValue;
use crate::error::{DeviceError, SensorError};

#[cfg(test)]
use mockall::automock;

/// Measurement channel of a sensor device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SensorChannel {
    /// Ambient temperature.
    AmbientTemp,
    /// Die (chip) temperature.
    #[default]
    DieTemp,
    /// Barometric pressure.
    Press,
}

impl SensorChannel {
    /// Channel name as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::AmbientTemp => "ambient_temp",
            Self::DieTemp => "die_temp",
            Self::Press => "press",
        }
    }
}

impl std::fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A sensor driver.
///
/// Methods may block the caller for the duration of a physical measurement.
#[cfg_attr(test, automock)]
pub trait SensorDevice: Send {
    /// Human readable device name.
    fn name(&self) -> String;

    /// Whether the driver finished initialisation and can be used.
    fn is_ready(&self) -> bool;

    /// Trigger a fresh sample of all channels.
    fn sample_fetch(&mut self) -> Result<(), DeviceError>;

    /// Read one channel of the last fetched sample.
    fn channel_get(&mut self, channel: SensorChannel) -> Result<SensorValue, DeviceError>;
}

impl<T: SensorDevice + ?Sized> SensorDevice for Box<T> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn sample_fetch(&mut self) -> Result<(), DeviceError> {
        (**self).sample_fetch()
    }

    fn channel_get(&mut self, channel: SensorChannel) -> Result<SensorValue, DeviceError> {
        (**self).channel_get(channel)
    }
}

/// Single-read wrapper around a [`SensorDevice`].
pub struct SensorAdapter<S> {
    device: S,
    channel: SensorChannel,
}

impl<S: SensorDevice> SensorAdapter<S> {
    /// Create an adapter reading the die temperature channel.
    pub fn new(device: S) -> Self {
        Self::with_channel(device, SensorChannel::DieTemp)
    }

    /// Create an adapter reading a specific channel.
    pub fn with_channel(device: S, channel: SensorChannel) -> Self {
        Self { device, channel }
    }

    /// The channel this adapter reads.
    pub fn channel(&self) -> SensorChannel {
        self.channel
    }

    /// Name of the wrapped device.
    pub fn device_name(&self) -> String {
        self.device.name()
    }

    /// Whether the wrapped device is ready.
    pub fn is_ready(&self) -> bool {
        self.device.is_ready()
    }

    /// Fetch a fresh sample and read the configured channel.
    ///
    /// Either stage failing abandons the read; there is no retry.
    pub fn read(&mut self) -> Result<SensorValue, SensorError> {
        debug!("Fetching sensor data...");

        if let Err(source) = self.device.sample_fetch() {
            error!("sensor_sample_fetch failed: {}", source);
            return Err(SensorError::FetchFailed { source });
        }

        let value = self.device.channel_get(self.channel).map_err(|source| {
            error!("sensor_channel_get({}) failed: {}", self.channel, source);
            SensorError::ChannelReadFailed {
                channel: self.channel,
                source,
            }
        })?;

        trace!("Read {} = {}", self.channel, value);
        Ok(value)
    }

    /// Consume the adapter and return the device.
    pub fn into_inner(self) -> S {
        self.device
    }
}
