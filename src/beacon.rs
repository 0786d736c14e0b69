//! Beacon node bring-up and the sampling job.
//!
//! [`BeaconNode::bring_up`] checks the sensor, enables the radio stack, waits
//! for it to report ready, starts advertising and only then arms the sample
//! timer. Each timer tick schedules one [`SamplingJob`] run, which reads the
//! sensor, splices the temperature into the service-data record and pushes
//! the record into the live advertisement.
//!
//! Sensor reads block, so they run on Tokio's blocking pool and never on a
//! runtime worker.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};

use crate::ble::advertising::{beacon_advertising_data, beacon_scan_response, AdvertisingData};
use crate::ble::publisher::{AdvertisementPublisher, RadioStack, SessionState};
use crate::config::BeaconConfig;
use crate::data::{CentiCelsius, SensorValue};
use crate::dispatcher::{DispatchStats, Job, TickHandle, WorkDispatcher};
use crate::error::{Error, Result};
use crate::protocol::ServiceDataRecord;
use crate::sensor::{SensorAdapter, SensorDevice};
use crate::timer::PeriodicTimer;
use crate::utils::hex_dump;

/// One sampling cycle: read, encode, publish.
///
/// Owns the service-data record; it is only ever touched from
/// [`SamplingJob::sample_and_publish`].
pub struct SamplingJob<S, R: ?Sized> {
    sensor: Arc<Mutex<SensorAdapter<S>>>,
    record: ServiceDataRecord,
    scan_response: AdvertisingData,
    publisher: Arc<AdvertisementPublisher<R>>,
}

impl<S, R> SamplingJob<S, R>
where
    S: SensorDevice,
    R: RadioStack + ?Sized,
{
    /// Create a sampling job.
    pub fn new(
        sensor: SensorAdapter<S>,
        record: ServiceDataRecord,
        scan_response: AdvertisingData,
        publisher: Arc<AdvertisementPublisher<R>>,
    ) -> Self {
        Self {
            sensor: Arc::new(Mutex::new(sensor)),
            record,
            scan_response,
            publisher,
        }
    }

    /// The service-data record as last encoded.
    pub fn record(&self) -> &ServiceDataRecord {
        &self.record
    }

    /// Consume the job and return its sensor.
    ///
    /// # Errors
    ///
    /// Fails if a read is still running on the blocking pool.
    pub fn into_sensor(self) -> Result<S> {
        Arc::try_unwrap(self.sensor)
            .map(|sensor| sensor.into_inner().into_inner())
            .map_err(|_| Error::Internal("sensor still in use by a read".to_string()))
    }
}

impl<S, R> SamplingJob<S, R>
where
    S: SensorDevice + 'static,
    R: RadioStack + ?Sized,
{
    /// Read the sensor on the blocking pool, keeping the caller's subscriber.
    async fn read_sensor(&self) -> Result<SensorValue> {
        let sensor = self.sensor.clone();
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());

        let value = tokio::task::spawn_blocking(move || {
            tracing::dispatcher::with_default(&dispatch, || sensor.lock().read())
        })
        .await
        .map_err(|e| Error::Internal(format!("sensor read task failed: {}", e)))??;

        Ok(value)
    }

    /// Run one cycle.
    ///
    /// A failed sensor read leaves the record untouched and skips the
    /// update. A failed update leaves the previous data on air. Either way
    /// the error has already been logged when this returns.
    pub async fn sample_and_publish(&mut self) -> Result<CentiCelsius> {
        let value = self.read_sensor().await?;
        let centi = self.record.encode(&value);

        info!("Service Data 128:\n{}", hex_dump(self.record.as_bytes()));

        let ad = beacon_advertising_data(&self.record);
        if let Err(e) = self.publisher.update(&ad, &self.scan_response).await {
            error!("Advertising data update failed: {}", e);
            return Err(e.into());
        }

        info!("Updated Temp: {:.2} C in advertising data", value.to_f64());
        Ok(centi)
    }
}

#[async_trait]
impl<S, R> Job for SamplingJob<S, R>
where
    S: SensorDevice + 'static,
    R: RadioStack + ?Sized + 'static,
{
    async fn run(&mut self) {
        let _ = self.sample_and_publish().await;
    }
}

/// A beacon node before bring-up.
pub struct BeaconNode<S, R: ?Sized> {
    config: BeaconConfig,
    sensor: SensorAdapter<S>,
    publisher: Arc<AdvertisementPublisher<R>>,
}

impl<S, R> BeaconNode<S, R>
where
    S: SensorDevice + 'static,
    R: RadioStack + ?Sized + 'static,
{
    /// Create a node from its collaborators.
    pub fn new(config: BeaconConfig, sensor: S, radio: Arc<R>) -> Self {
        let sensor = SensorAdapter::with_channel(sensor, config.channel);
        let publisher = Arc::new(AdvertisementPublisher::with_params(
            radio,
            config.advertising,
        ));

        Self {
            config,
            sensor,
            publisher,
        }
    }

    /// The advertisement publisher, for observing session state.
    pub fn publisher(&self) -> &Arc<AdvertisementPublisher<R>> {
        &self.publisher
    }

    /// Bring the node up.
    ///
    /// Steps, in order:
    /// 1. validate the configuration and check the sensor is ready,
    /// 2. enable the radio stack and wait for its ready notification,
    /// 3. start advertising the initial record and scan response,
    /// 4. spawn the sampling worker and arm the sample timer.
    ///
    /// The timer is never armed unless advertising started.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error; nothing is retried.
    pub async fn bring_up(self) -> Result<RunningBeacon<S, R>> {
        let Self {
            config,
            sensor,
            publisher,
        } = self;

        config.validate()?;
        info!("{} starting", config.device_name);

        if !sensor.is_ready() {
            let name = sensor.device_name();
            error!("{} device not ready", name);
            return Err(Error::DeviceNotReady { name });
        }

        publisher.enable().await?;

        let record = ServiceDataRecord::new(config.service_uuid, config.sensor_type);
        let ad = beacon_advertising_data(&record);
        let sd = beacon_scan_response(&config.device_name);

        publisher.start(&ad, &sd).await?;

        let job = SamplingJob::new(sensor, record, sd, publisher.clone());
        let dispatcher = WorkDispatcher::spawn(job);
        let ticks = dispatcher.tick_handle();
        let timer = PeriodicTimer::start(config.initial_delay, config.sample_period, move || {
            ticks.on_tick();
        })?;

        Ok(RunningBeacon {
            publisher,
            dispatcher,
            timer,
        })
    }
}

/// A beacon that is advertising and sampling.
pub struct RunningBeacon<S, R: ?Sized> {
    publisher: Arc<AdvertisementPublisher<R>>,
    dispatcher: WorkDispatcher<SamplingJob<S, R>>,
    timer: PeriodicTimer,
}

impl<S, R> RunningBeacon<S, R>
where
    S: SensorDevice + 'static,
    R: RadioStack + ?Sized + 'static,
{
    /// Current advertisement session state.
    pub fn session_state(&self) -> SessionState {
        self.publisher.state()
    }

    /// Sampling counters.
    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Handle for triggering extra samples outside the timer.
    pub fn tick_handle(&self) -> TickHandle {
        self.dispatcher.tick_handle()
    }

    /// Stop sampling and return the sampling job.
    ///
    /// The advertisement itself is left running with its last data.
    pub async fn shutdown(mut self) -> Result<SamplingJob<S, R>> {
        self.timer.stop();
        let job = self.dispatcher.shutdown().await?;
        info!("Beacon sampling stopped");
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::publisher::MockRadioStack;
    use crate::data::SensorValue;
    use crate::error::{AdvError, DeviceError, SensorError, StackError};
    use crate::sensor::MockSensorDevice;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    /// Counts ERROR events seen by the subscriber.
    #[derive(Clone, Default)]
    struct ErrorCounter(Arc<AtomicUsize>);

    impl ErrorCounter {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl<T: tracing::Subscriber> Layer<T> for ErrorCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, T>) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Sensor whose fetch blocks the calling thread.
    struct SlowSensor {
        delay: Duration,
    }

    impl SensorDevice for SlowSensor {
        fn name(&self) -> String {
            "slow".to_string()
        }

        fn is_ready(&self) -> bool {
            true
        }

        fn sample_fetch(&mut self) -> std::result::Result<(), DeviceError> {
            std::thread::sleep(self.delay);
            Ok(())
        }

        fn channel_get(
            &mut self,
            _channel: crate::sensor::SensorChannel,
        ) -> std::result::Result<SensorValue, DeviceError> {
            Ok(SensorValue::new(20, 0))
        }
    }

    fn ready_sensor(value: SensorValue) -> MockSensorDevice {
        let mut sensor = MockSensorDevice::new();
        sensor.expect_is_ready().return_const(true);
        sensor.expect_name().returning(|| "BMP180".to_string());
        sensor.expect_sample_fetch().returning(|| Ok(()));
        sensor.expect_channel_get().returning(move |_| Ok(value));
        sensor
    }

    fn expect_ready(radio: &mut MockRadioStack, seq: &mut Sequence) {
        radio
            .expect_enable()
            .times(1)
            .in_sequence(seq)
            .returning(|ready| {
                let _ = ready.send(Ok(()));
                Ok(())
            });
    }

    async fn advertising_publisher(
        mut radio: MockRadioStack,
    ) -> Arc<AdvertisementPublisher<MockRadioStack>> {
        radio.expect_enable().returning(|ready| {
            let _ = ready.send(Ok(()));
            Ok(())
        });
        radio.expect_adv_start().returning(|_, _, _| Ok(()));
        radio.expect_identity_address().return_const(None);

        let publisher = Arc::new(AdvertisementPublisher::new(Arc::new(radio)));
        let record = ServiceDataRecord::new(crate::ble::uuids::BEACON_SERVICE_UUID, 0x01);
        publisher.enable().await.unwrap();
        publisher
            .start(&beacon_advertising_data(&record), &beacon_scan_response("Test"))
            .await
            .unwrap();
        publisher
    }

    fn job_with<S: SensorDevice>(
        sensor: S,
        publisher: Arc<AdvertisementPublisher<MockRadioStack>>,
    ) -> SamplingJob<S, MockRadioStack> {
        SamplingJob::new(
            SensorAdapter::new(sensor),
            ServiceDataRecord::new(crate::ble::uuids::BEACON_SERVICE_UUID, 0x01),
            beacon_scan_response("Test"),
            publisher,
        )
    }

    #[tokio::test]
    async fn test_cycle_encodes_and_updates() {
        let mut radio = MockRadioStack::new();
        radio
            .expect_adv_update_data()
            .times(1)
            .withf(|ad, sd| {
                ad.service_data_128().map(|d| d[17..19].to_vec()) == Some(vec![0x2E, 0x09])
                    && sd.local_name() == Some("Test")
            })
            .returning(|_, _| Ok(()));
        let publisher = advertising_publisher(radio).await;

        let mut job = job_with(ready_sensor(SensorValue::new(23, 500000)), publisher);
        let centi = job.sample_and_publish().await.unwrap();

        assert_eq!(centi, CentiCelsius(2350));
        assert_eq!(&job.record().as_bytes()[17..19], &[0x2E, 0x09]);
    }

    #[tokio::test]
    async fn test_sensor_failure_skips_update() {
        let mut radio = MockRadioStack::new();
        radio.expect_adv_update_data().never();
        let publisher = advertising_publisher(radio).await;

        let mut sensor = MockSensorDevice::new();
        sensor
            .expect_sample_fetch()
            .returning(|| Err(DeviceError::new(-5)));
        sensor.expect_channel_get().never();

        let mut job = job_with(sensor, publisher);
        let before = job.record().clone();

        let err = job.sample_and_publish().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Sensor(SensorError::FetchFailed { .. })
        ));
        assert_eq!(job.record().as_bytes(), before.as_bytes());
    }

    #[tokio::test]
    async fn test_sensor_failure_logs_one_error_per_cycle() {
        let errors = ErrorCounter::default();
        let subscriber = tracing_subscriber::registry().with(errors.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut radio = MockRadioStack::new();
        radio.expect_adv_update_data().never();
        let publisher = advertising_publisher(radio).await;

        let mut sensor = MockSensorDevice::new();
        sensor
            .expect_sample_fetch()
            .returning(|| Err(DeviceError::new(-5)));
        sensor.expect_channel_get().never();
        let mut job = job_with(sensor, publisher);

        assert!(job.sample_and_publish().await.is_err());
        assert_eq!(errors.count(), 1);

        assert!(job.sample_and_publish().await.is_err());
        assert_eq!(errors.count(), 2);
    }

    #[tokio::test]
    async fn test_slow_read_leaves_runtime_responsive() {
        let mut radio = MockRadioStack::new();
        radio
            .expect_adv_update_data()
            .times(1)
            .returning(|_, _| Ok(()));
        let publisher = advertising_publisher(radio).await;
        let mut job = job_with(
            SlowSensor {
                delay: Duration::from_millis(300),
            },
            publisher,
        );

        let (started_tx, started_rx) = oneshot::channel();
        let heartbeat = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(10));
            interval.tick().await;
            let _ = started_tx.send(());

            let mut last = std::time::Instant::now();
            let mut max_gap = Duration::ZERO;
            for _ in 0..30 {
                interval.tick().await;
                let now = std::time::Instant::now();
                max_gap = max_gap.max(now - last);
                last = now;
            }
            max_gap
        });
        started_rx.await.unwrap();

        assert_eq!(job.sample_and_publish().await.unwrap(), CentiCelsius(2000));

        let max_gap = heartbeat.await.unwrap();
        assert!(
            max_gap < Duration::from_millis(150),
            "runtime stalled for {:?}",
            max_gap
        );
        assert!(job.into_sensor().is_ok());
    }

    #[tokio::test]
    async fn test_update_failure_keeps_encoded_record() {
        let mut radio = MockRadioStack::new();
        radio
            .expect_adv_update_data()
            .times(1)
            .returning(|_, _| Err(StackError::new(-16)));
        let publisher = advertising_publisher(radio).await;

        let mut job = job_with(ready_sensor(SensorValue::new(-5, -250000)), publisher);
        let err = job.sample_and_publish().await.unwrap_err();

        assert!(matches!(
            err,
            Error::Advertising(AdvError::UpdateFailed { code: -16 })
        ));
        assert_eq!(&job.record().as_bytes()[17..19], &[0xF3, 0xFD]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bring_up_orders_enable_start_update() {
        let (updated_tx, mut updated_rx) = mpsc::unbounded_channel();
        let mut radio = MockRadioStack::new();
        let mut seq = Sequence::new();

        expect_ready(&mut radio, &mut seq);
        radio
            .expect_adv_start()
            .times(1)
            .in_sequence(&mut seq)
            .withf(|params, ad, sd| {
                params.connectable
                    && ad.service_data_128().map(|d| d.len()) == Some(ServiceDataRecord::LEN)
                    && sd.local_name() == Some("BMP180 Beacon")
            })
            .returning(|_, _, _| Ok(()));
        radio.expect_identity_address().return_const(None);
        radio
            .expect_adv_update_data()
            .times(2)
            .in_sequence(&mut seq)
            .returning(move |_, _| {
                let _ = updated_tx.send(tokio::time::Instant::now());
                Ok(())
            });

        let node = BeaconNode::new(
            BeaconConfig::default(),
            ready_sensor(SensorValue::new(21, 0)),
            Arc::new(radio),
        );
        let armed_at = tokio::time::Instant::now();
        let beacon = node.bring_up().await.unwrap();
        assert_eq!(beacon.session_state(), SessionState::Advertising);

        let close_to = |elapsed: Duration, expected: Duration| {
            elapsed >= expected && elapsed < expected + Duration::from_millis(5)
        };

        let first = updated_rx.recv().await.unwrap();
        assert!(close_to(first - armed_at, Duration::from_secs(1)));

        let second = updated_rx.recv().await.unwrap();
        assert!(close_to(second - armed_at, Duration::from_secs(6)));

        let job = beacon.shutdown().await.unwrap();
        assert_eq!(job.record().temperature(), CentiCelsius(2100));
    }

    #[tokio::test]
    async fn test_sensor_not_ready_aborts_before_radio() {
        let mut sensor = MockSensorDevice::new();
        sensor.expect_is_ready().return_const(false);
        sensor.expect_name().returning(|| "BMP180".to_string());

        let mut radio = MockRadioStack::new();
        radio.expect_enable().never();

        let node = BeaconNode::new(BeaconConfig::default(), sensor, Arc::new(radio));
        let err = node.bring_up().await.err().unwrap();
        assert!(matches!(err, Error::DeviceNotReady { ref name } if name == "BMP180"));
    }

    #[tokio::test]
    async fn test_zero_period_rejected_before_radio() {
        let mut radio = MockRadioStack::new();
        radio.expect_enable().never();

        let config = BeaconConfig::default().with_schedule(Duration::from_secs(1), Duration::ZERO);
        let node = BeaconNode::new(config, ready_sensor(SensorValue::new(20, 0)), Arc::new(radio));
        let err = node.bring_up().await.err().unwrap();
        assert!(matches!(err, Error::InvalidData { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_failure_never_arms_timer() {
        let mut radio = MockRadioStack::new();
        let mut seq = Sequence::new();
        expect_ready(&mut radio, &mut seq);
        radio
            .expect_adv_start()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(StackError::new(-12)));
        radio.expect_adv_update_data().never();

        let mut sensor = MockSensorDevice::new();
        sensor.expect_is_ready().return_const(true);
        sensor.expect_sample_fetch().never();

        let node = BeaconNode::new(BeaconConfig::default(), sensor, Arc::new(radio));
        let publisher = node.publisher().clone();
        let err = node.bring_up().await.err().unwrap();

        assert!(matches!(
            err,
            Error::Advertising(AdvError::StartFailed { code: -12 })
        ));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(publisher.state(), SessionState::Ready);
    }
}
