//! Deferred work dispatch.
//!
//! Decouples a time-critical trigger (a timer tick) from the work it starts.
//! Ticks are posted into a single-slot mailbox with a non-blocking send; a
//! worker task drains the mailbox and runs the job to completion before it
//! looks at the mailbox again. At most one run is ever pending, and runs
//! never overlap, so the job's state needs no lock.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Work executed on the worker task.
#[async_trait]
pub trait Job: Send + 'static {
    /// Run the job once. Failures are handled inside the job.
    async fn run(&mut self);
}

/// Result of posting a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickOutcome {
    /// A run was scheduled.
    Scheduled,
    /// A run was already pending; this tick was dropped.
    Coalesced,
    /// The worker is gone.
    Closed,
}

/// Counters describing dispatcher activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchStats {
    /// Ticks that scheduled a run.
    pub scheduled: u64,
    /// Ticks dropped because a run was already pending.
    pub coalesced: u64,
    /// Runs that completed.
    pub completed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    coalesced: AtomicU64,
    completed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            scheduled: self.scheduled.load(Ordering::SeqCst),
            coalesced: self.coalesced.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
        }
    }
}

/// Cheap, cloneable handle for posting ticks.
///
/// [`TickHandle::on_tick`] never blocks or awaits, so it is safe to call
/// from any context.
#[derive(Debug, Clone)]
pub struct TickHandle {
    tx: mpsc::Sender<()>,
    counters: Arc<Counters>,
}

impl TickHandle {
    /// Request a run of the job.
    pub fn on_tick(&self) -> TickOutcome {
        match self.tx.try_send(()) {
            Ok(()) => {
                self.counters.scheduled.fetch_add(1, Ordering::SeqCst);
                trace!("Tick scheduled a run");
                TickOutcome::Scheduled
            }
            Err(TrySendError::Full(())) => {
                self.counters.coalesced.fetch_add(1, Ordering::SeqCst);
                debug!("Run already pending, tick coalesced");
                TickOutcome::Coalesced
            }
            Err(TrySendError::Closed(())) => TickOutcome::Closed,
        }
    }

    /// Current dispatcher counters.
    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }
}

/// Runs a [`Job`] on a dedicated worker task, one run at a time.
pub struct WorkDispatcher<J> {
    handle: TickHandle,
    shutdown_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<J>>,
}

impl<J: Job> WorkDispatcher<J> {
    /// Spawn the worker task owning `job`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(job: J) -> Self {
        let (tx, mut rx) = mpsc::channel::<()>(1);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let counters = Arc::new(Counters::default());
        let worker_counters = counters.clone();

        let worker = tokio::spawn(async move {
            let mut job = job;

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    tick = rx.recv() => match tick {
                        Some(()) => {
                            job.run().await;
                            worker_counters.completed.fetch_add(1, Ordering::SeqCst);
                        }
                        None => break,
                    },
                }
            }

            debug!("Work dispatcher worker ended");
            job
        });

        Self {
            handle: TickHandle { tx, counters },
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
        }
    }

    /// A handle for posting ticks.
    pub fn tick_handle(&self) -> TickHandle {
        self.handle.clone()
    }

    /// Request a run of the job.
    pub fn on_tick(&self) -> TickOutcome {
        self.handle.on_tick()
    }

    /// Current dispatcher counters.
    pub fn stats(&self) -> DispatchStats {
        self.handle.stats()
    }

    /// Stop the worker and return the job.
    ///
    /// A run in progress completes first; a pending run is discarded.
    pub async fn shutdown(mut self) -> Result<J> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let worker = self
            .worker
            .take()
            .ok_or_else(|| Error::Internal("worker already joined".to_string()))?;

        worker
            .await
            .map_err(|e| Error::Internal(format!("worker task failed: {}", e)))
    }
}

impl<J> Drop for WorkDispatcher<J> {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
