//! Background loop that drains the queue on a fixed cadence.
//!
//! Every cycle runs as its own task so a panic inside it is contained and
//! logged. Shutdown stops new cycles immediately, waits for the in-flight
//! one up to a grace period and aborts it after that.

use std::{sync::Arc, time::Duration};

use blackbox_core::Clock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    drainer::QueueDrainer,
    error::{DeliveryError, Result},
};

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Attempt cap handed to every cycle.
    pub max_attempts: u32,
    /// Age after which dead letters are purged; `None` keeps them.
    pub dead_letter_retention: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(crate::DEFAULT_DRAIN_INTERVAL_SECONDS),
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            dead_letter_retention: None,
        }
    }
}

/// Owns the background drain loop.
pub struct DrainScheduler {
    drainer: Arc<QueueDrainer>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    stop: CancellationToken,
    abort: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl DrainScheduler {
    /// Creates a stopped scheduler.
    pub fn new(drainer: Arc<QueueDrainer>, config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            drainer,
            config,
            clock,
            stop: CancellationToken::new(),
            abort: CancellationToken::new(),
            handle: None,
        }
    }

    /// Spawns the loop. The first cycle starts right away.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::AlreadyRunning` if called twice.
    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(DeliveryError::AlreadyRunning);
        }

        info!(
            interval_ms = self.config.interval.as_millis(),
            max_attempts = self.config.max_attempts,
            "starting drain scheduler"
        );

        let drain_loop = DrainLoop {
            drainer: self.drainer.clone(),
            config: self.config.clone(),
            clock: self.clock.clone(),
            stop: self.stop.clone(),
            abort: self.abort.clone(),
        };
        self.handle = Some(tokio::spawn(drain_loop.run()));

        Ok(())
    }

    /// Returns true while the loop task is alive.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the loop.
    ///
    /// No cycle starts after this is called. An in-flight cycle gets
    /// `timeout` to finish before it is aborted; either way the loop task
    /// has exited when this returns.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if the in-flight cycle had to be aborted
    /// and `WorkerPanic` if the loop task itself panicked.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        self.stop.cancel();

        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        info!(timeout_seconds = timeout.as_secs(), "stopping drain scheduler");

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => {
                info!("drain scheduler stopped");
                Ok(())
            },
            Ok(Err(join_error)) => {
                error!(error = %join_error, "drain scheduler task panicked");
                Err(DeliveryError::WorkerPanic { error: join_error.to_string() })
            },
            Err(_elapsed) => {
                warn!(
                    timeout_seconds = timeout.as_secs(),
                    "drain cycle still running after grace period, aborting it"
                );
                self.abort.cancel();
                if let Err(join_error) = handle.await {
                    error!(error = %join_error, "drain scheduler task failed while aborting");
                }
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }
}

impl Drop for DrainScheduler {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            if !handle.is_finished() && !self.stop.is_cancelled() {
                warn!("drain scheduler dropped without shutdown_graceful(); cancelling");
                self.stop.cancel();
                self.abort.cancel();
            }
        }
    }
}

struct DrainLoop {
    drainer: Arc<QueueDrainer>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    stop: CancellationToken,
    abort: CancellationToken,
}

impl DrainLoop {
    async fn run(self) {
        loop {
            if self.stop.is_cancelled() {
                break;
            }

            let drainer = self.drainer.clone();
            let config = self.config.clone();
            let mut cycle = tokio::spawn(async move { run_cycle(&drainer, &config).await });

            tokio::select! {
                result = &mut cycle => {
                    if let Err(join_error) = result {
                        error!(error = %join_error, "drain cycle panicked; continuing");
                    }
                },
                () = self.abort.cancelled() => {
                    cycle.abort();
                    let _ = cycle.await;
                    break;
                },
            }

            tokio::select! {
                biased;
                () = self.stop.cancelled() => break,
                () = self.clock.sleep(self.config.interval) => {},
            }
        }

        debug!("drain loop exited");
    }
}

async fn run_cycle(drainer: &QueueDrainer, config: &SchedulerConfig) {
    match drainer.drain_once(config.max_attempts).await {
        Ok(delivered) if delivered > 0 => debug!(delivered, "drain cycle completed"),
        Ok(_) => {},
        Err(error) => error!(error = %error, "drain cycle failed; retrying next interval"),
    }

    if let Some(retention) = config.dead_letter_retention {
        if let Err(error) = drainer.purge_expired(retention).await {
            error!(error = %error, "dead-letter retention sweep failed");
        }
    }
}
