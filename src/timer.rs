//! Periodic timing source.
//!
//! Fires a callback after an initial delay and then at a fixed period until
//! stopped. The callback runs on the timer task and must return promptly.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// A running periodic timer.
pub struct PeriodicTimer {
    handle: Option<JoinHandle<()>>,
    initial_delay: Duration,
    period: Duration,
}

impl PeriodicTimer {
    /// Arm the timer: `on_expiry` fires after `initial_delay`, then every
    /// `period`.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidData`] if `period` is zero.
    pub fn start<F>(initial_delay: Duration, period: Duration, mut on_expiry: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(Error::InvalidData {
                context: "timer period must be non-zero".to_string(),
            });
        }

        info!(
            "Arming sensor timer: first expiry in {:?}, then every {:?}",
            initial_delay, period
        );

        let first = Instant::now() + initial_delay;
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                on_expiry();
            }
        });

        Ok(Self {
            handle: Some(handle),
            initial_delay,
            period,
        })
    }

    /// The configured initial delay.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// The configured period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Check if the timer is still armed.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the timer. No expiry fires after this returns.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("Sensor timer stopped");
        }
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
