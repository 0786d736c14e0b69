//! Error types for the temp-beacon-ble crate.

use thiserror::Error;

use crate::ble::publisher::SessionState;
use crate::sensor::SensorChannel;

/// Error code reported by a sensor driver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("device error {code}")]
pub struct DeviceError {
    /// Driver-specific (errno style) error code.
    pub code: i32,
}

impl DeviceError {
    /// Create a new device error from a raw code.
    pub fn new(code: i32) -> Self {
        Self { code }
    }
}

/// Error code reported by a radio stack.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("radio stack error {code}")]
pub struct StackError {
    /// Stack-specific (errno style) error code.
    pub code: i32,
}

impl StackError {
    /// Create a new stack error from a raw code.
    pub fn new(code: i32) -> Self {
        Self { code }
    }
}

/// Failure of a single sensor read.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// Triggering a fresh sample failed.
    #[error("sensor sample fetch failed: {source}")]
    FetchFailed {
        /// The driver error.
        source: DeviceError,
    },

    /// Reading the channel value from the fetched sample failed.
    #[error("sensor channel {channel} read failed: {source}")]
    ChannelReadFailed {
        /// The channel that was being read.
        channel: SensorChannel,
        /// The driver error.
        source: DeviceError,
    },
}

/// Failure of an advertising operation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvError {
    /// The radio stack refused to start advertising.
    #[error("advertising failed to start (err {code})")]
    StartFailed {
        /// The stack error code.
        code: i32,
    },

    /// The radio stack refused to update advertising data.
    #[error("advertising data update failed (err {code})")]
    UpdateFailed {
        /// The stack error code.
        code: i32,
    },

    /// Advertising was started before the radio stack signalled ready, or
    /// after it had already started.
    #[error("advertisement session is {state}, cannot start")]
    NotReady {
        /// The state the session was in.
        state: SessionState,
    },

    /// The advertisement session is not in a state that accepts updates.
    #[error("advertisement session is {state}, not advertising")]
    NotAdvertising {
        /// The state the session was in.
        state: SessionState,
    },

    /// The encoded advertising payload does not fit into a legacy PDU.
    #[error("advertising payload too large: {len} bytes (max {max})")]
    PayloadTooLarge {
        /// Encoded length.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },
}

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The sensor device did not report ready at boot.
    #[error("{name} device not ready")]
    DeviceNotReady {
        /// Name of the sensor device.
        name: String,
    },

    /// The radio stack could not be enabled.
    #[error("Bluetooth init failed (err {code})")]
    RadioEnableFailed {
        /// The stack error code.
        code: i32,
    },

    /// A sensor read failed.
    #[error(transparent)]
    Sensor(#[from] SensorError),

    /// An advertising operation failed.
    #[error(transparent)]
    Advertising(#[from] AdvError),

    /// Invalid data was received or supplied.
    #[error("Invalid data: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// An allow-list file could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StackError> for Error {
    fn from(err: StackError) -> Self {
        Error::RadioEnableFailed { code: err.code }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
