//! BlackBox CRM webhook service.
//!
//! Ties the delivery engine and the enrichment cache together behind one
//! `App` handle, configured from a single `Config`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;

use std::sync::Arc;

use anyhow::Context;
use blackbox_core::{error::Result as CoreResult, Clock, WebhookId, WebhookRecord, WebhookSummary};
use blackbox_delivery::{storage::QueueStorage, DeliveryEngine, DrainStats, WebhookQueue};
use blackbox_enrichment::{Enrichment, EnrichmentCache, EnrichmentSource, SimulatedRegistry};
pub use config::Config;
use serde_json::Value;

/// Running service: webhook delivery plus lead enrichment.
pub struct App {
    engine: DeliveryEngine,
    enrichment: EnrichmentCache,
}

impl App {
    /// Builds the service over `storage`, enriching from the simulated
    /// registry.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn new(
        storage: Arc<dyn QueueStorage>,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        Self::with_source(storage, Arc::new(SimulatedRegistry), config, clock)
    }

    /// Builds the service with a custom enrichment source.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the HTTP client
    /// cannot be built.
    pub fn with_source(
        storage: Arc<dyn QueueStorage>,
        source: Arc<dyn EnrichmentSource>,
        config: &Config,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let engine = DeliveryEngine::new(storage, config.to_delivery_config(), clock.clone())
            .context("Failed to build delivery engine")?;
        let enrichment = EnrichmentCache::new(config.to_enrichment_config(), source, clock);

        Ok(Self { engine, enrichment })
    }

    /// Queues a webhook and returns its ID.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` for an empty URL.
    pub async fn enqueue(&self, url: &str, payload: &Value) -> CoreResult<WebhookId> {
        Ok(self.queue().enqueue(url, payload).await?.id)
    }

    /// Every queued webhook, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn list_webhooks(&self) -> CoreResult<Vec<WebhookSummary>> {
        self.queue().list_summaries().await
    }

    /// Dead-lettered webhooks awaiting operator action.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn dead_letters(&self) -> CoreResult<Vec<WebhookSummary>> {
        Ok(self.queue().dead_letters().await?.iter().map(WebhookRecord::summary).collect())
    }

    /// Puts a webhook back in line for immediate delivery.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown ID.
    pub async fn requeue(&self, id: WebhookId) -> CoreResult<WebhookSummary> {
        Ok(self.queue().requeue(id).await?.summary())
    }

    /// Permanently removes a dead-lettered webhook.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown ID and
    /// `CoreError::InvalidInput` for a live one.
    pub async fn purge(&self, id: WebhookId) -> CoreResult<()> {
        self.queue().purge(id).await
    }

    /// Enriches a company name.
    pub async fn enrich(&self, name: &str) -> Enrichment {
        self.enrichment.enrich(name).await
    }

    /// Runs one drain cycle now and returns how many webhooks were delivered.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn drain_now(&self) -> blackbox_delivery::Result<usize> {
        self.engine.drain_now().await
    }

    /// Accumulated drain counters.
    pub async fn stats(&self) -> DrainStats {
        self.engine.stats().await
    }

    /// Starts the background drain.
    ///
    /// # Errors
    ///
    /// Returns error if already started.
    pub fn start(&mut self) -> blackbox_delivery::Result<()> {
        self.engine.start()
    }

    /// Returns true while the background drain is running.
    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    /// Stops the background drain.
    ///
    /// # Errors
    ///
    /// Returns error if the in-flight cycle had to be aborted.
    pub async fn shutdown(self) -> blackbox_delivery::Result<()> {
        self.engine.shutdown().await
    }

    fn queue(&self) -> &WebhookQueue {
        self.engine.queue()
    }
}
