//! Protocol module for the beacon payload.
//!
//! This module contains the fixed-layout service-data record spliced into
//! every advertisement, and its receiver-side parser.

pub mod service_data;

pub use service_data::{
    SensorKind, ServiceDataPayload, ServiceDataRecord, SENSOR_TYPE_NONE, SENSOR_TYPE_TEMPERATURE,
};
