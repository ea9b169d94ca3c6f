//! Cancellable periodic tasks.
//!
//! A [`PeriodicTask`] runs a unit of [`Work`] on its own thread once per
//! period until it is stopped. The sleep between ticks waits on a stop
//! channel, so `stop()` interrupts it immediately instead of waiting out the
//! rest of the period.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use pvsim_protocol::CodecError;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bus::BusError;

/// Shortest period a task will run at, in seconds.
pub const MIN_PERIOD: f64 = 0.01;

/// Period used when none is configured, in seconds.
pub const DEFAULT_PERIOD: f64 = 1.0;

/// A failure inside one tick. Ends the task that raised it.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("Failed to render message: {0}")]
    Render(#[from] CodecError),

    #[error("Failed to publish to {topic}: {source}")]
    Publish {
        topic: String,
        #[source]
        source: BusError,
    },
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task {0} is already running")]
    AlreadyRunning(String),

    #[error("Failed to spawn thread for task {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Task {0} panicked")]
    Panicked(String),

    #[error("Task ended with an error: {0}")]
    Tick(#[from] TickError),
}

/// One unit of periodic work.
pub trait Work: Send + 'static {
    fn tick(&mut self) -> Result<(), TickError>;
}

type Outcome<W> = (W, Result<(), TickError>);

pub struct PeriodicTask<W: Work> {
    name: String,
    /// Held here while stopped, moved to the worker while running
    work: Option<W>,
    /// Seconds, stored as `f64` bits
    period: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    stop_tx: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<Outcome<W>>>,
}

impl<W: Work> PeriodicTask<W> {
    pub fn new(name: impl Into<String>, work: W, period: f64) -> Self {
        let task = Self {
            name: name.into(),
            work: Some(work),
            period: Arc::new(AtomicU64::new(DEFAULT_PERIOD.to_bits())),
            running: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            worker: None,
        };
        task.set_period(period);
        task
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn period(&self) -> f64 {
        f64::from_bits(self.period.load(Ordering::Relaxed))
    }

    /// Change the period. Takes effect after the current sleep.
    ///
    /// Values below [`MIN_PERIOD`] are clamped to it. Values that do not fit
    /// a [`Duration`] (NaN, infinite, too large) are ignored and the current
    /// period is kept.
    pub fn set_period(&self, period: f64) {
        let period = if period < MIN_PERIOD {
            warn!(
                "Update period {} for {} is below the minimum, using {}",
                period, self.name, MIN_PERIOD
            );
            MIN_PERIOD
        } else {
            period
        };

        if let Err(e) = Duration::try_from_secs_f64(period) {
            warn!(
                "Ignoring update period {} for {}: {}, keeping {}",
                period,
                self.name,
                e,
                self.period()
            );
            return;
        }
        self.period.store(period.to_bits(), Ordering::Relaxed);
    }

    /// Whether the worker thread exists and has not finished.
    pub fn is_alive(&self) -> bool {
        self.worker
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Whether a worker handle is held, finished or not.
    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }

    /// The unit of work, available while the task is stopped.
    pub fn work(&self) -> Option<&W> {
        self.work.as_ref()
    }

    pub fn start(&mut self) -> Result<(), TaskError> {
        if self.worker.is_some() {
            return Err(TaskError::AlreadyRunning(self.name.clone()));
        }
        let work = self
            .work
            .take()
            .ok_or_else(|| TaskError::AlreadyRunning(self.name.clone()))?;

        let (stop_tx, stop_rx) = mpsc::channel();
        let period = self.period.clone();
        let running = self.running.clone();
        let name = self.name.clone();
        running.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name(format!("task-{}", self.name))
            .spawn(move || run_loop(name, work, period, running, stop_rx))
            .map_err(|source| {
                self.running.store(false, Ordering::Release);
                TaskError::Spawn {
                    name: self.name.clone(),
                    source,
                }
            })?;

        debug!("Started task {} at period {}", self.name, self.period());
        self.stop_tx = Some(stop_tx);
        self.worker = Some(handle);
        Ok(())
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// Returns the error that ended the worker early, if any. The task can be
    /// started again afterwards.
    pub fn stop(&mut self) -> Result<(), TaskError> {
        self.running.store(false, Ordering::Release);
        if let Some(stop_tx) = self.stop_tx.take() {
            // The worker may already be gone after a failed tick
            let _ = stop_tx.send(());
        }

        let Some(handle) = self.worker.take() else {
            return Ok(());
        };

        match handle.join() {
            Ok((work, outcome)) => {
                self.work = Some(work);
                info!("Stopped task {}", self.name);
                outcome.map_err(TaskError::from)
            }
            Err(_) => Err(TaskError::Panicked(self.name.clone())),
        }
    }
}

impl<W: Work> Drop for PeriodicTask<W> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop();
        }
    }
}

fn run_loop<W: Work>(
    name: String,
    mut work: W,
    period: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    stop_rx: mpsc::Receiver<()>,
) -> Outcome<W> {
    while running.load(Ordering::Acquire) {
        if let Err(e) = work.tick() {
            error!("Task {} failed: {}", name, e);
            running.store(false, Ordering::Release);
            return (work, Err(e));
        }

        // Only periods that fit a Duration are ever stored
        let sleep = Duration::try_from_secs_f64(f64::from_bits(period.load(Ordering::Relaxed)))
            .unwrap_or(Duration::from_secs(1));
        match stop_rx.recv_timeout(sleep) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    (work, Ok(()))
}
