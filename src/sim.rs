//! In-process stand-ins for the sensor driver and the radio stack.
//!
//! Useful for running a beacon node without hardware, and for driving the
//! full pipeline in tests.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, trace};

use crate::ble::advertising::{AdvertisingData, AdvertisingParameters};
use crate::ble::publisher::{RadioStack, ReadyNotifier};
use crate::data::SensorValue;
use crate::error::{DeviceError, StackError};
use crate::sensor::{SensorChannel, SensorDevice};

/// Error code reported for a channel the simulated sensor does not have.
pub const ENOTSUP: i32 = -134;
/// Error code reported when advertising is already running.
pub const EALREADY: i32 = -120;
/// Error code reported when there is no advertisement to update.
pub const EAGAIN: i32 = -11;
/// Error code reported for data that does not fit an advertisement.
pub const EINVAL: i32 = -22;

/// Number of most recent calls [`SimulatedRadio`] keeps.
pub const CALL_LOG_CAPACITY: usize = 256;

/// One scripted outcome of a sampling cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimulatedSample {
    /// Fetch succeeds and the channel reads this temperature in °C.
    Value(f64),
    /// Fetch fails with this code.
    FetchError(i32),
    /// Fetch succeeds but reading the channel fails with this code.
    ChannelError(i32),
}

/// A temperature sensor driven by a script or a linear drift.
///
/// Scripted samples are consumed first; after that every fetch advances the
/// temperature by the drift.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    name: String,
    ready: bool,
    current: f64,
    drift: f64,
    script: VecDeque<SimulatedSample>,
    pending_channel_error: Option<i32>,
    fetches: usize,
}

impl SimulatedSensor {
    /// A ready sensor reading a constant `start_celsius`.
    pub fn new(name: impl Into<String>, start_celsius: f64) -> Self {
        Self {
            name: name.into(),
            ready: true,
            current: start_celsius,
            drift: 0.0,
            script: VecDeque::new(),
            pending_channel_error: None,
            fetches: 0,
        }
    }

    /// Change the temperature by `step` °C on every unscripted fetch.
    pub fn with_drift(mut self, step: f64) -> Self {
        self.drift = step;
        self
    }

    /// Mark the sensor as not ready.
    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    /// Queue a scripted sample.
    pub fn push(mut self, sample: SimulatedSample) -> Self {
        self.script.push_back(sample);
        self
    }

    /// Number of fetches attempted so far.
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    /// The temperature the next channel read would report.
    pub fn current(&self) -> f64 {
        self.current
    }
}

impl SensorDevice for SimulatedSensor {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn sample_fetch(&mut self) -> Result<(), DeviceError> {
        self.fetches += 1;
        self.pending_channel_error = None;

        match self.script.pop_front() {
            Some(SimulatedSample::Value(celsius)) => self.current = celsius,
            Some(SimulatedSample::FetchError(code)) => return Err(DeviceError::new(code)),
            Some(SimulatedSample::ChannelError(code)) => self.pending_channel_error = Some(code),
            None if self.fetches > 1 => self.current += self.drift,
            None => {}
        }

        trace!("{} fetched {:.2} C", self.name, self.current);
        Ok(())
    }

    fn channel_get(&mut self, channel: SensorChannel) -> Result<SensorValue, DeviceError> {
        if let Some(code) = self.pending_channel_error.take() {
            return Err(DeviceError::new(code));
        }

        match channel {
            SensorChannel::AmbientTemp | SensorChannel::DieTemp => {
                Ok(SensorValue::from_f64(self.current))
            }
            SensorChannel::Press => Err(DeviceError::new(ENOTSUP)),
        }
    }
}

/// A call made to the simulated radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    /// `enable` was called.
    Enable,
    /// `adv_start` was called with these encoded payloads.
    AdvStart {
        /// Parameters passed.
        params: AdvertisingParameters,
        /// Encoded advertising data.
        ad: Bytes,
        /// Encoded scan response.
        sd: Bytes,
    },
    /// `adv_update_data` was called with these encoded payloads.
    AdvUpdate {
        /// Encoded advertising data.
        ad: Bytes,
        /// Encoded scan response.
        sd: Bytes,
    },
}

#[derive(Debug, Default)]
struct RadioInner {
    calls: VecDeque<RadioCall>,
    updates: usize,
    on_air: Option<(Bytes, Bytes)>,
    ready_status: Option<StackError>,
    refuse_enable: Option<StackError>,
    start_error: Option<StackError>,
    next_update_error: Option<StackError>,
}

impl RadioInner {
    fn record(&mut self, call: RadioCall) {
        if matches!(call, RadioCall::AdvUpdate { .. }) {
            self.updates += 1;
        }
        if self.calls.len() == CALL_LOG_CAPACITY {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }
}

/// A radio stack that records what it would have put on air.
///
/// Only the last [`CALL_LOG_CAPACITY`] calls are kept.
#[derive(Debug)]
pub struct SimulatedRadio {
    address: [u8; 6],
    inner: Mutex<RadioInner>,
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new([0x01, 0x02, 0x03, 0x04, 0x05, 0xC6])
    }
}

impl SimulatedRadio {
    /// A radio with the given identity address (little-endian bytes).
    pub fn new(address: [u8; 6]) -> Self {
        Self {
            address,
            inner: Mutex::new(RadioInner::default()),
        }
    }

    /// Report `code` through the ready notifier instead of success.
    pub fn fail_ready(self, code: i32) -> Self {
        self.inner.lock().ready_status = Some(StackError::new(code));
        self
    }

    /// Refuse the enable request itself.
    pub fn refuse_enable(self, code: i32) -> Self {
        self.inner.lock().refuse_enable = Some(StackError::new(code));
        self
    }

    /// Fail `adv_start` with `code`.
    pub fn fail_start(self, code: i32) -> Self {
        self.inner.lock().start_error = Some(StackError::new(code));
        self
    }

    /// Fail the next `adv_update_data` with `code`.
    pub fn fail_next_update(&self, code: i32) {
        self.inner.lock().next_update_error = Some(StackError::new(code));
    }

    /// The most recent calls, oldest first.
    pub fn calls(&self) -> Vec<RadioCall> {
        self.inner.lock().calls.iter().cloned().collect()
    }

    /// Number of successful or failed update calls since creation.
    pub fn update_count(&self) -> usize {
        self.inner.lock().updates
    }

    /// Advertising data currently on air.
    pub fn on_air(&self) -> Option<Bytes> {
        self.inner.lock().on_air.as_ref().map(|(ad, _)| ad.clone())
    }

    /// Scan response currently on air.
    pub fn scan_response(&self) -> Option<Bytes> {
        self.inner.lock().on_air.as_ref().map(|(_, sd)| sd.clone())
    }
}

fn encode_pair(ad: &AdvertisingData, sd: &AdvertisingData) -> Result<(Bytes, Bytes), StackError> {
    let ad = ad.encode().map_err(|_| StackError::new(EINVAL))?;
    let sd = sd.encode().map_err(|_| StackError::new(EINVAL))?;
    Ok((ad, sd))
}

#[async_trait]
impl RadioStack for SimulatedRadio {
    fn enable(&self, ready: ReadyNotifier) -> Result<(), StackError> {
        let status = {
            let mut inner = self.inner.lock();
            inner.record(RadioCall::Enable);
            if let Some(e) = inner.refuse_enable {
                return Err(e);
            }
            inner.ready_status.map_or(Ok(()), Err)
        };

        tokio::spawn(async move {
            tokio::task::yield_now().await;
            let _ = ready.send(status);
        });
        Ok(())
    }

    async fn adv_start(
        &self,
        params: AdvertisingParameters,
        ad: &AdvertisingData,
        sd: &AdvertisingData,
    ) -> Result<(), StackError> {
        let (ad, sd) = encode_pair(ad, sd)?;
        let mut inner = self.inner.lock();
        inner.record(RadioCall::AdvStart {
            params,
            ad: ad.clone(),
            sd: sd.clone(),
        });

        if let Some(e) = inner.start_error {
            return Err(e);
        }
        if inner.on_air.is_some() {
            return Err(StackError::new(EALREADY));
        }

        debug!("Simulated radio advertising {} bytes", ad.len());
        inner.on_air = Some((ad, sd));
        Ok(())
    }

    async fn adv_update_data(
        &self,
        ad: &AdvertisingData,
        sd: &AdvertisingData,
    ) -> Result<(), StackError> {
        let (ad, sd) = encode_pair(ad, sd)?;
        let mut inner = self.inner.lock();
        inner.record(RadioCall::AdvUpdate {
            ad: ad.clone(),
            sd: sd.clone(),
        });

        if let Some(e) = inner.next_update_error.take() {
            return Err(e);
        }
        if inner.on_air.is_none() {
            return Err(StackError::new(EAGAIN));
        }

        inner.on_air = Some((ad, sd));
        Ok(())
    }

    fn identity_address(&self) -> Option<[u8; 6]> {
        Some(self.address)
    }
}
