//! Wiring of queue, dispatcher, drainer and scheduler.

use std::{sync::Arc, time::Duration};

use blackbox_core::Clock;
use tracing::info;

use crate::{
    client::{ClientConfig, DeliveryClient, Dispatcher},
    drainer::{DrainConfig, DrainStats, QueueDrainer},
    error::{DeliveryError, Result},
    queue::WebhookQueue,
    retry::{drain_policy, RetryPolicy},
    scheduler::{DrainScheduler, SchedulerConfig},
    storage::QueueStorage,
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Pause between drain cycles.
    pub drain_interval: Duration,
    /// Attempt cap before dead-lettering.
    pub max_attempts: u32,
    /// Backoff between cycles for failed deliveries.
    pub retry_policy: RetryPolicy,
    /// Fixed backoff after unexpected processing failures.
    pub fault_backoff: Duration,
    /// Linear backoff base for in-process dispatch retries.
    pub dispatch_backoff_base: Duration,
    /// HTTP client settings.
    pub client_config: ClientConfig,
    /// Grace period for the in-flight cycle at shutdown.
    pub shutdown_timeout: Duration,
    /// Age after which dead letters are purged; `None` keeps them.
    pub dead_letter_retention: Option<Duration>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            drain_interval: Duration::from_secs(crate::DEFAULT_DRAIN_INTERVAL_SECONDS),
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            retry_policy: drain_policy(crate::DEFAULT_MAX_ATTEMPTS),
            fault_backoff: Duration::from_secs(crate::DEFAULT_FAULT_BACKOFF_SECONDS),
            dispatch_backoff_base: Duration::from_millis(100),
            client_config: ClientConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
            dead_letter_retention: None,
        }
    }
}

impl DeliveryConfig {
    /// Checks the settings the engine cannot run without.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` naming the bad field.
    pub fn validate(&self) -> Result<()> {
        if self.drain_interval.is_zero() {
            return Err(DeliveryError::configuration("drain_interval must be greater than 0"));
        }
        if self.max_attempts == 0 {
            return Err(DeliveryError::configuration("max_attempts must be greater than 0"));
        }
        if self.client_config.timeout.is_zero() {
            return Err(DeliveryError::configuration("client timeout must be greater than 0"));
        }
        Ok(())
    }

    fn drain_config(&self) -> DrainConfig {
        DrainConfig {
            dispatch_retries: 1,
            dispatch_backoff_base: self.dispatch_backoff_base,
            retry_policy: RetryPolicy {
                max_attempts: self.max_attempts,
                ..self.retry_policy.clone()
            },
            fault_backoff: self.fault_backoff,
        }
    }

    fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: self.drain_interval,
            max_attempts: self.max_attempts,
            dead_letter_retention: self.dead_letter_retention,
        }
    }
}

/// Webhook delivery service: the queue plus its background drain.
pub struct DeliveryEngine {
    config: DeliveryConfig,
    queue: WebhookQueue,
    drainer: Arc<QueueDrainer>,
    scheduler: Option<DrainScheduler>,
    clock: Arc<dyn Clock>,
}

impl DeliveryEngine {
    /// Creates an engine delivering over HTTP.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the configuration is invalid or the
    /// HTTP client cannot be built.
    pub fn new(
        storage: Arc<dyn QueueStorage>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = DeliveryClient::new(config.client_config.clone(), clock.clone())?;
        Self::with_dispatcher(storage, Arc::new(client), config, clock)
    }

    /// Creates an engine with a custom dispatcher.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the configuration is invalid.
    pub fn with_dispatcher(
        storage: Arc<dyn QueueStorage>,
        dispatcher: Arc<dyn Dispatcher>,
        config: DeliveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let queue = WebhookQueue::new(storage, clock.clone());
        let drainer = Arc::new(QueueDrainer::new(queue.clone(), dispatcher, config.drain_config()));

        Ok(Self { config, queue, drainer, scheduler: None, clock })
    }

    /// The webhook record store.
    pub fn queue(&self) -> &WebhookQueue {
        &self.queue
    }

    /// Starts the background drain.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::AlreadyRunning` if already started.
    pub fn start(&mut self) -> Result<()> {
        if self.scheduler.is_some() {
            return Err(DeliveryError::AlreadyRunning);
        }

        let mut scheduler = DrainScheduler::new(
            self.drainer.clone(),
            self.config.scheduler_config(),
            self.clock.clone(),
        );
        scheduler.start()?;
        self.scheduler = Some(scheduler);

        info!("delivery engine started");
        Ok(())
    }

    /// Returns true while the background drain is running.
    pub fn is_running(&self) -> bool {
        self.scheduler.as_ref().is_some_and(DrainScheduler::is_running)
    }

    /// Runs one drain cycle immediately, outside the schedule.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn drain_now(&self) -> Result<usize> {
        self.drainer.drain_once(self.config.max_attempts).await
    }

    /// Accumulated drain counters.
    pub async fn stats(&self) -> DrainStats {
        self.drainer.stats().await
    }

    /// Stops the background drain within the configured grace period.
    ///
    /// # Errors
    ///
    /// Returns error if the in-flight cycle had to be aborted.
    pub async fn shutdown(mut self) -> Result<()> {
        match self.scheduler.take() {
            Some(scheduler) => scheduler.shutdown_graceful(self.config.shutdown_timeout).await,
            None => Ok(()),
        }
    }
}
