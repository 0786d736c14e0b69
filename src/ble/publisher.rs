//! Advertisement session management.
//!
//! Owns the interaction with the radio stack: enabling it, starting the
//! advertisement once it is ready, and pushing new advertising data into the
//! live session without restarting it.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, trace};

use crate::ble::advertising::{AdvertisingData, AdvertisingParameters};
use crate::error::{AdvError, Error, Result, StackError};
use crate::utils::format_address;

#[cfg(test)]
use mockall::automock;

/// Notifier through which a radio stack reports that enabling finished.
pub type ReadyNotifier = oneshot::Sender<std::result::Result<(), StackError>>;

/// A BLE radio stack able to broadcast advertisements.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RadioStack: Send + Sync {
    /// Begin enabling the stack.
    ///
    /// An immediate error means the request was refused. Otherwise the
    /// stack reports the outcome through `ready` once initialisation is
    /// complete.
    fn enable(&self, ready: ReadyNotifier) -> std::result::Result<(), StackError>;

    /// Start advertising.
    async fn adv_start(
        &self,
        params: AdvertisingParameters,
        ad: &AdvertisingData,
        sd: &AdvertisingData,
    ) -> std::result::Result<(), StackError>;

    /// Replace the advertising and scan-response data of the running
    /// advertisement.
    async fn adv_update_data(
        &self,
        ad: &AdvertisingData,
        sd: &AdvertisingData,
    ) -> std::result::Result<(), StackError>;

    /// Identity address of the controller, if known.
    fn identity_address(&self) -> Option<[u8; 6]>;
}

/// State of the advertisement session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// The radio stack has not been enabled.
    #[default]
    Uninitialized,
    /// Enable was requested, waiting for the stack to report ready.
    Enabling,
    /// The stack is ready; advertising has not started.
    Ready,
    /// Advertising is live and accepts data updates.
    Advertising,
}

impl SessionState {
    /// Check if advertising is live.
    pub fn is_advertising(&self) -> bool {
        matches!(self, Self::Advertising)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::Enabling => write!(f, "Enabling"),
            Self::Ready => write!(f, "Ready"),
            Self::Advertising => write!(f, "Advertising"),
        }
    }
}

/// Publishes beacon data through a [`RadioStack`].
pub struct AdvertisementPublisher<R: ?Sized> {
    /// The radio stack.
    radio: Arc<R>,
    /// Parameters used when starting the advertisement.
    params: AdvertisingParameters,
    /// Current session state.
    state: Arc<RwLock<SessionState>>,
    /// Channel for session state changes.
    event_tx: broadcast::Sender<SessionState>,
}

impl<R: RadioStack + ?Sized> AdvertisementPublisher<R> {
    /// Create a publisher that starts connectable, fast-interval advertising.
    pub fn new(radio: Arc<R>) -> Self {
        Self::with_params(radio, AdvertisingParameters::conn_fast_2())
    }

    /// Create a publisher with specific advertising parameters.
    pub fn with_params(radio: Arc<R>, params: AdvertisingParameters) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            radio,
            params,
            state: Arc::new(RwLock::new(SessionState::Uninitialized)),
            event_tx,
        }
    }

    /// Get the current session state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Check if advertising is live.
    pub fn is_advertising(&self) -> bool {
        self.state().is_advertising()
    }

    /// Subscribe to session state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.event_tx.subscribe()
    }

    /// The advertising parameters used on start.
    pub fn params(&self) -> AdvertisingParameters {
        self.params
    }

    /// The underlying radio stack.
    pub fn radio(&self) -> &Arc<R> {
        &self.radio
    }

    /// Enable the radio stack and wait until it reports ready.
    pub async fn enable(&self) -> Result<()> {
        let current = self.state();
        if current != SessionState::Uninitialized {
            debug!("Radio stack already {}", current);
            return Ok(());
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        self.set_state(SessionState::Enabling);

        if let Err(e) = self.radio.enable(ready_tx) {
            error!("Bluetooth init failed ({})", e.code);
            self.set_state(SessionState::Uninitialized);
            return Err(e.into());
        }

        match ready_rx.await {
            Ok(Ok(())) => {
                info!("Bluetooth initialized");
                self.set_state(SessionState::Ready);
                Ok(())
            }
            Ok(Err(e)) => {
                error!("Bluetooth init failed (err {})", e.code);
                self.set_state(SessionState::Uninitialized);
                Err(e.into())
            }
            Err(_) => {
                self.set_state(SessionState::Uninitialized);
                Err(Error::Internal(
                    "radio stack dropped its ready notifier".to_string(),
                ))
            }
        }
    }

    /// Start advertising `ad` with scan response `sd`.
    ///
    /// Only valid once the stack is ready, and only once.
    pub async fn start(
        &self,
        ad: &AdvertisingData,
        sd: &AdvertisingData,
    ) -> std::result::Result<(), AdvError> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(AdvError::NotReady { state });
        }

        ad.encode()?;
        sd.encode()?;

        if let Err(e) = self.radio.adv_start(self.params, ad, sd).await {
            error!("Advertising failed to start (err {})", e.code);
            return Err(AdvError::StartFailed { code: e.code });
        }

        self.set_state(SessionState::Advertising);

        let address = self
            .radio
            .identity_address()
            .map(|addr| format_address(&addr))
            .unwrap_or_else(|| "unknown address".to_string());
        info!("Beacon started, advertising as {}", address);

        Ok(())
    }

    /// Push new data into the running advertisement.
    ///
    /// The session keeps its address and interval. On failure the previous
    /// data stays on air.
    pub async fn update(
        &self,
        ad: &AdvertisingData,
        sd: &AdvertisingData,
    ) -> std::result::Result<(), AdvError> {
        let state = self.state();
        if !state.is_advertising() {
            return Err(AdvError::NotAdvertising { state });
        }

        ad.encode()?;
        sd.encode()?;

        self.radio
            .adv_update_data(ad, sd)
            .await
            .map_err(|e| AdvError::UpdateFailed { code: e.code })?;

        trace!("Advertising data updated");
        Ok(())
    }

    /// Update the session state and emit an event.
    fn set_state(&self, new_state: SessionState) {
        let old_state = {
            let mut state = self.state.write();
            let old = *state;
            *state = new_state;
            old
        };

        if old_state != new_state {
            debug!("Advertisement state changed: {} -> {}", old_state, new_state);
            let _ = self.event_tx.send(new_state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::advertising::{beacon_advertising_data, beacon_scan_response};
    use crate::ble::uuids::BEACON_SERVICE_UUID;
    use crate::protocol::{ServiceDataRecord, SENSOR_TYPE_TEMPERATURE};

    fn payloads() -> (AdvertisingData, AdvertisingData) {
        let record = ServiceDataRecord::new(BEACON_SERVICE_UUID, SENSOR_TYPE_TEMPERATURE);
        (beacon_advertising_data(&record), beacon_scan_response("Beacon"))
    }

    fn ready_radio() -> MockRadioStack {
        let mut radio = MockRadioStack::new();
        radio.expect_enable().times(1).returning(|ready| {
            let _ = ready.send(Ok(()));
            Ok(())
        });
        radio
            .expect_identity_address()
            .return_const(Some([0x01, 0x02, 0x03, 0x04, 0x05, 0xC6]));
        radio
    }

    #[test]
    fn test_session_state() {
        assert!(SessionState::Advertising.is_advertising());
        assert!(!SessionState::Ready.is_advertising());
        assert_eq!(SessionState::default(), SessionState::Uninitialized);
        assert_eq!(format!("{}", SessionState::Enabling), "Enabling");
    }

    #[tokio::test]
    async fn test_enable_then_start_then_update() {
        let mut radio = ready_radio();
        radio
            .expect_adv_start()
            .withf(|params, _, _| params.connectable)
            .times(1)
            .returning(|_, _, _| Ok(()));
        radio
            .expect_adv_update_data()
            .times(2)
            .returning(|_, _| Ok(()));

        let publisher = AdvertisementPublisher::new(Arc::new(radio));
        let mut events = publisher.subscribe();
        let (ad, sd) = payloads();

        publisher.enable().await.unwrap();
        assert_eq!(publisher.state(), SessionState::Ready);

        publisher.start(&ad, &sd).await.unwrap();
        assert!(publisher.is_advertising());

        publisher.update(&ad, &sd).await.unwrap();
        publisher.update(&ad, &sd).await.unwrap();

        assert_eq!(events.recv().await.unwrap(), SessionState::Enabling);
        assert_eq!(events.recv().await.unwrap(), SessionState::Ready);
        assert_eq!(events.recv().await.unwrap(), SessionState::Advertising);
    }

    #[tokio::test]
    async fn test_update_before_start_is_rejected() {
        let mut radio = ready_radio();
        radio.expect_adv_update_data().never();

        let publisher = AdvertisementPublisher::new(Arc::new(radio));
        let (ad, sd) = payloads();

        let err = publisher.update(&ad, &sd).await.unwrap_err();
        assert_eq!(
            err,
            AdvError::NotAdvertising {
                state: SessionState::Uninitialized
            }
        );

        publisher.enable().await.unwrap();
        let err = publisher.update(&ad, &sd).await.unwrap_err();
        assert_eq!(
            err,
            AdvError::NotAdvertising {
                state: SessionState::Ready
            }
        );
    }

    #[tokio::test]
    async fn test_start_before_ready_is_rejected() {
        let mut radio = MockRadioStack::new();
        radio.expect_adv_start().never();

        let publisher = AdvertisementPublisher::new(Arc::new(radio));
        let (ad, sd) = payloads();

        assert_eq!(
            publisher.start(&ad, &sd).await.unwrap_err(),
            AdvError::NotReady {
                state: SessionState::Uninitialized
            }
        );
    }

    #[tokio::test]
    async fn test_start_failure_keeps_session_ready() {
        let mut radio = ready_radio();
        radio
            .expect_adv_start()
            .times(1)
            .returning(|_, _, _| Err(StackError::new(-12)));
        radio.expect_adv_update_data().never();

        let publisher = AdvertisementPublisher::new(Arc::new(radio));
        let (ad, sd) = payloads();

        publisher.enable().await.unwrap();
        assert_eq!(
            publisher.start(&ad, &sd).await.unwrap_err(),
            AdvError::StartFailed { code: -12 }
        );
        assert_eq!(publisher.state(), SessionState::Ready);
        assert!(publisher.update(&ad, &sd).await.is_err());
    }

    #[tokio::test]
    async fn test_update_failure_is_reported() {
        let mut radio = ready_radio();
        radio.expect_adv_start().returning(|_, _, _| Ok(()));
        radio
            .expect_adv_update_data()
            .times(1)
            .returning(|_, _| Err(StackError::new(-16)));

        let publisher = AdvertisementPublisher::new(Arc::new(radio));
        let (ad, sd) = payloads();
        publisher.enable().await.unwrap();
        publisher.start(&ad, &sd).await.unwrap();

        assert_eq!(
            publisher.update(&ad, &sd).await.unwrap_err(),
            AdvError::UpdateFailed { code: -16 }
        );
        assert!(publisher.is_advertising());
    }

    #[tokio::test]
    async fn test_enable_refused() {
        let mut radio = MockRadioStack::new();
        radio
            .expect_enable()
            .returning(|_| Err(StackError::new(-19)));

        let publisher = AdvertisementPublisher::new(Arc::new(radio));
        let err = publisher.enable().await.unwrap_err();
        assert!(matches!(err, Error::RadioEnableFailed { code: -19 }));
        assert_eq!(publisher.state(), SessionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_enable_reports_failure_asynchronously() {
        let mut radio = MockRadioStack::new();
        radio.expect_enable().returning(|ready| {
            tokio::spawn(async move {
                let _ = ready.send(Err(StackError::new(-5)));
            });
            Ok(())
        });

        let publisher = AdvertisementPublisher::new(Arc::new(radio));
        let err = publisher.enable().await.unwrap_err();
        assert!(matches!(err, Error::RadioEnableFailed { code: -5 }));
    }
}
