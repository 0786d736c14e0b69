//! Data structures for sensor readings.
//!
//! This module contains the fixed-point value produced by sensor drivers
//! and the 16-bit encoded temperature carried in the beacon payload.

pub mod temperatures;

pub use temperatures::{CentiCelsius, SensorValue};
