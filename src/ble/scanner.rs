//! Receiver-side beacon scanning.
//!
//! Listens for advertisements from temperature beacons, filters them by
//! address and service UUID, and decodes the carried temperature. Both the
//! 128-bit service-data form and the manufacturer-data form (test company
//! ID `0xFFFF`) are understood.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter as BleScanFilter};
use btleplug::platform::{Adapter, Manager, PeripheralId};
use chrono::{DateTime, Utc};
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::uuids::TEST_MANUFACTURER_ID;
use crate::data::CentiCelsius;
use crate::error::{Error, Result};
use crate::protocol::{SensorKind, ServiceDataPayload};

/// Address and service UUID allow-lists.
///
/// `None` means the filter is inactive. `Some` of an empty set is active and
/// rejects everything.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScanFilter {
    macs: Option<HashSet<String>>,
    uuids: Option<HashSet<Uuid>>,
}

impl ScanFilter {
    /// A filter that accepts every beacon.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Only accept the given addresses (case-insensitive).
    pub fn with_macs<I, A>(mut self, macs: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<str>,
    {
        self.macs = Some(
            macs.into_iter()
                .map(|m| m.as_ref().trim().to_uppercase())
                .collect(),
        );
        self
    }

    /// Only accept service data scoped by the given UUIDs.
    pub fn with_uuids<I>(mut self, uuids: I) -> Self
    where
        I: IntoIterator<Item = Uuid>,
    {
        self.uuids = Some(uuids.into_iter().collect());
        self
    }

    /// Load an address allow-list, one address per line.
    ///
    /// A missing file leaves the address filter inactive.
    pub fn load_mac_list(self, path: impl AsRef<Path>) -> Result<Self> {
        match read_list(path.as_ref())? {
            Some(lines) => {
                info!("Loaded {} allowed addresses", lines.len());
                Ok(self.with_macs(lines))
            }
            None => Ok(self),
        }
    }

    /// Load a UUID allow-list, one canonical UUID per line.
    ///
    /// A missing file leaves the UUID filter inactive.
    pub fn load_uuid_list(self, path: impl AsRef<Path>) -> Result<Self> {
        let Some(lines) = read_list(path.as_ref())? else {
            return Ok(self);
        };

        let uuids = lines
            .iter()
            .map(|line| {
                Uuid::parse_str(line).map_err(|e| Error::InvalidData {
                    context: format!("Invalid UUID '{}': {}", line, e),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        info!("Loaded {} allowed service UUIDs", uuids.len());
        Ok(self.with_uuids(uuids))
    }

    /// Check an address against the filter.
    pub fn allows_address(&self, address: &str) -> bool {
        self.macs
            .as_ref()
            .map_or(true, |macs| macs.contains(&address.to_uppercase()))
    }

    /// Check a service UUID against the filter.
    pub fn allows_uuid(&self, uuid: &Uuid) -> bool {
        self.uuids.as_ref().map_or(true, |uuids| uuids.contains(uuid))
    }
}

/// Read non-empty, trimmed lines; `None` if the file does not exist.
fn read_list(path: &Path) -> Result<Option<Vec<String>>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        )),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("{} not found, filter disabled", path.display());
            Ok(None)
        }
        Err(source) => Err(Error::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// A decoded beacon advertisement.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BeaconReading {
    /// Peripheral address.
    pub address: String,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Service UUID for service-data readings; `None` for manufacturer data.
    pub service_uuid: Option<Uuid>,
    /// Announced sensor type.
    pub sensor_type: SensorKind,
    /// Temperature, for temperature readings.
    pub temperature: Option<CentiCelsius>,
    /// When the advertisement was received.
    pub received_at: DateTime<Utc>,
}

impl BeaconReading {
    /// Temperature in degrees Celsius.
    pub fn celsius(&self) -> Option<f64> {
        self.temperature.map(|t| t.to_celsius())
    }
}

impl std::fmt::Display for BeaconReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}  ", self.address)?;
        match self.rssi {
            Some(rssi) => write!(f, "RSSI {:>4} dBm  ", rssi)?,
            None => write!(f, "RSSI    ? dBm  ")?,
        }
        match (self.sensor_type, self.temperature) {
            (SensorKind::Temperature, Some(t)) => write!(f, "Temp {:6.2} °C", t.to_celsius())?,
            (kind, _) => write!(f, "Unknown sensor (type {:02X})", kind.to_raw())?,
        }
        if let Some(uuid) = self.service_uuid {
            write!(f, "  UUID: {}", uuid)?;
        }
        write!(f, "  Name: {}", self.local_name.as_deref().unwrap_or("Unknown"))
    }
}

/// Advertisement fields of one peripheral, as handed to the decoder.
#[derive(Debug, Clone, Default)]
pub struct ObservedAdvertisement<'a> {
    /// Peripheral address.
    pub address: String,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised local name.
    pub local_name: Option<String>,
    /// Service data keyed by UUID, with the UUID stripped from the payload.
    pub service_data: Option<&'a HashMap<Uuid, Vec<u8>>>,
    /// Manufacturer data keyed by company ID.
    pub manufacturer_data: Option<&'a HashMap<u16, Vec<u8>>>,
}

/// Decode every beacon reading contained in an advertisement.
///
/// Readings with sensor type `0x00` are dropped silently; unparseable
/// payloads are skipped.
pub fn decode_readings(adv: &ObservedAdvertisement<'_>, filter: &ScanFilter) -> Vec<BeaconReading> {
    if !filter.allows_address(&adv.address) {
        return Vec::new();
    }

    let now = Utc::now();
    let reading = |service_uuid: Option<Uuid>, payload: ServiceDataPayload| BeaconReading {
        address: adv.address.clone(),
        rssi: adv.rssi,
        local_name: adv.local_name.clone(),
        service_uuid,
        sensor_type: payload.sensor_type,
        temperature: payload.temperature,
        received_at: now,
    };

    let mut readings = Vec::new();

    for (uuid, data) in adv.service_data.into_iter().flatten() {
        if !filter.allows_uuid(uuid) {
            continue;
        }
        match ServiceDataPayload::parse(data) {
            Ok(payload) if payload.sensor_type != SensorKind::None => {
                readings.push(reading(Some(*uuid), payload));
            }
            Ok(_) => {}
            Err(e) => trace!("Skipping service data from {}: {}", adv.address, e),
        }
    }

    if let Some(data) = adv
        .manufacturer_data
        .and_then(|m| m.get(&TEST_MANUFACTURER_ID))
        .filter(|d| d.len() >= 3)
    {
        if let Ok(payload) = ServiceDataPayload::parse(data) {
            if payload.sensor_type != SensorKind::None {
                readings.push(reading(None, payload));
            }
        }
    }

    readings
}

/// BLE scanner for temperature beacons.
pub struct BeaconScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
    /// Filter applied to every advertisement.
    filter: Arc<ScanFilter>,
    /// Whether scanning is currently active.
    is_scanning: Arc<RwLock<bool>>,
    /// Channel for decoded readings.
    event_tx: broadcast::Sender<BeaconReading>,
    /// Handle to the scanning task.
    scan_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl BeaconScanner {
    /// Create a scanner on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new(filter: ScanFilter) -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self::with_adapter(adapter, filter))
    }

    /// Create a scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter, filter: ScanFilter) -> Self {
        let (event_tx, _) = broadcast::channel(100);

        Self {
            adapter,
            filter: Arc::new(filter),
            is_scanning: Arc::new(RwLock::new(false)),
            event_tx,
            scan_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Start scanning.
    pub async fn start_scanning(&self) -> Result<()> {
        if *self.is_scanning.read() {
            debug!("Already scanning, ignoring start request");
            return Ok(());
        }

        info!("Starting BLE scan for temperature beacons");

        self.adapter.start_scan(BleScanFilter::default()).await?;
        *self.is_scanning.write() = true;

        let adapter = self.adapter.clone();
        let filter = self.filter.clone();
        let is_scanning = self.is_scanning.clone();
        let event_tx = self.event_tx.clone();

        let handle = tokio::spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    error!("Failed to get adapter events: {}", e);
                    return;
                }
            };

            while *is_scanning.read() {
                tokio::select! {
                    Some(event) = events.next() => {
                        Self::handle_event(event, &adapter, &filter, &event_tx).await;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
            }

            debug!("Scan event loop ended");
        });

        *self.scan_handle.write() = Some(handle);

        Ok(())
    }

    /// Stop scanning.
    pub async fn stop_scanning(&self) -> Result<()> {
        if !*self.is_scanning.read() {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        info!("Stopping BLE scan");

        *self.is_scanning.write() = false;
        self.adapter.stop_scan().await?;

        let handle = self.scan_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        Ok(())
    }

    /// Check if currently scanning.
    pub fn is_scanning(&self) -> bool {
        *self.is_scanning.read()
    }

    /// Subscribe to decoded readings.
    pub fn subscribe(&self) -> broadcast::Receiver<BeaconReading> {
        self.event_tx.subscribe()
    }

    /// The filter in use.
    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }

    async fn handle_event(
        event: CentralEvent,
        adapter: &Adapter,
        filter: &ScanFilter,
        event_tx: &broadcast::Sender<BeaconReading>,
    ) {
        match event {
            CentralEvent::ServiceDataAdvertisement { id, service_data } => {
                trace!("Service data advertisement: {:?}", id);
                Self::publish(adapter, id, Some(&service_data), None, filter, event_tx).await;
            }
            CentralEvent::ManufacturerDataAdvertisement {
                id,
                manufacturer_data,
            } => {
                if manufacturer_data.contains_key(&TEST_MANUFACTURER_ID) {
                    trace!("Manufacturer data advertisement: {:?}", id);
                    Self::publish(adapter, id, None, Some(&manufacturer_data), filter, event_tx)
                        .await;
                }
            }
            _ => {}
        }
    }

    async fn publish(
        adapter: &Adapter,
        id: PeripheralId,
        service_data: Option<&HashMap<Uuid, Vec<u8>>>,
        manufacturer_data: Option<&HashMap<u16, Vec<u8>>>,
        filter: &ScanFilter,
        event_tx: &broadcast::Sender<BeaconReading>,
    ) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        let observed = ObservedAdvertisement {
            address: properties.address.to_string(),
            rssi: properties.rssi,
            local_name: properties.local_name,
            service_data,
            manufacturer_data,
        };

        for reading in decode_readings(&observed, filter) {
            debug!("{}", reading);
            let _ = event_tx.send(reading);
        }
    }
}

impl Drop for BeaconScanner {
    fn drop(&mut self) {
        *self.is_scanning.write() = false;
    }
}
