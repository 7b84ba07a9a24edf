//! One sweep over the due part of the queue.
//!
//! Each due record gets exactly one network attempt per cycle. Success
//! deletes the record; failure counts an attempt and either reschedules it
//! with exponential backoff or dead-letters it at the cap. When processing a
//! record fails for any other reason the attempt still counts, with a fixed
//! backoff instead. Only a failure of the store itself ends the cycle early.
//!
//! Cycles never overlap: a manual drain started while a scheduled one is in
//! flight waits for it and then sees the queue as that cycle left it.

use std::{sync::Arc, time::Duration};

use blackbox_core::{models::WebhookRecord, Clock};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    client::Dispatcher,
    error::{DeliveryError, ErrorCategory, Result},
    queue::WebhookQueue,
    retry::{drain_policy, fault_policy, RetryContext, RetryDecision, RetryPolicy},
};

const FAILED_MARKER: &str = ";failed";
const DEAD_LETTER_MARKER: &str = ";max_attempts";

/// Tuning for a drain cycle.
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Attempts the dispatcher makes per record per cycle.
    pub dispatch_retries: u32,
    /// Linear backoff base inside the dispatcher.
    pub dispatch_backoff_base: Duration,
    /// Exponential backoff between cycles; `max_attempts` is supplied per
    /// call.
    pub retry_policy: RetryPolicy,
    /// Fixed backoff after an unexpected processing failure.
    pub fault_backoff: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            dispatch_retries: 1,
            dispatch_backoff_base: Duration::from_millis(100),
            retry_policy: drain_policy(crate::DEFAULT_MAX_ATTEMPTS),
            fault_backoff: Duration::from_secs(crate::DEFAULT_FAULT_BACKOFF_SECONDS),
        }
    }
}

/// Counters accumulated across drain cycles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainStats {
    /// Completed cycles.
    pub cycles: u64,
    /// Records delivered and deleted.
    pub delivered: u64,
    /// Failed records put back with a backoff.
    pub rescheduled: u64,
    /// Records moved to the dead-letter state.
    pub dead_lettered: u64,
    /// Records whose processing failed unexpectedly.
    pub faults: u64,
    /// Dead letters removed by the retention sweep.
    pub purged: u64,
    /// When the last cycle finished.
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// What happened to one record in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Delivered and deleted.
    Delivered,
    /// Failed; due again later.
    Rescheduled,
    /// Failed at the attempt cap.
    DeadLettered,
    /// Changed by someone else (requeued, purged or dead-lettered) while the
    /// cycle held a stale copy; left alone.
    Skipped,
}

/// Drives queue records through the dispatcher.
pub struct QueueDrainer {
    queue: WebhookQueue,
    dispatcher: Arc<dyn Dispatcher>,
    config: DrainConfig,
    stats: Arc<RwLock<DrainStats>>,
    clock: Arc<dyn Clock>,
    cycle: Mutex<()>,
}

impl QueueDrainer {
    /// Creates a drainer.
    pub fn new(queue: WebhookQueue, dispatcher: Arc<dyn Dispatcher>, config: DrainConfig) -> Self {
        let clock = queue.clock().clone();
        Self {
            queue,
            dispatcher,
            config,
            stats: Arc::new(RwLock::new(DrainStats::default())),
            clock,
            cycle: Mutex::new(()),
        }
    }

    /// Queue this drainer works on.
    pub fn queue(&self) -> &WebhookQueue {
        &self.queue
    }

    /// Snapshot of the accumulated counters.
    pub async fn stats(&self) -> DrainStats {
        self.stats.read().await.clone()
    }

    /// Processes every due record once and returns how many were delivered.
    ///
    /// Waits for any cycle already running on this drainer to finish first.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::DatabaseError` if the store cannot be read or
    /// a failed record cannot be written back. Individual delivery failures
    /// are never returned.
    pub async fn drain_once(&self, max_attempts: u32) -> Result<usize> {
        let _cycle = self.cycle.lock().await;

        let due = self.queue.due_records(self.clock.now_utc()).await?;
        debug!(due = due.len(), "drain cycle started");

        let mut delivered = 0;
        for record in due {
            let span = info_span!("webhook_drain", webhook_id = %record.id, attempts = record.attempts);

            let outcome = async {
                match self.process(&record, max_attempts).await {
                    Ok(outcome) => Ok(outcome),
                    Err(fault) => self.record_fault(&record, &fault, max_attempts).await,
                }
            }
            .instrument(span)
            .await?;

            let mut stats = self.stats.write().await;
            match outcome {
                DrainOutcome::Delivered => {
                    delivered += 1;
                    stats.delivered += 1;
                },
                DrainOutcome::Rescheduled => stats.rescheduled += 1,
                DrainOutcome::DeadLettered => stats.dead_lettered += 1,
                DrainOutcome::Skipped => {},
            }
        }

        let mut stats = self.stats.write().await;
        stats.cycles += 1;
        stats.last_cycle_at = Some(self.clock.now_utc());

        Ok(delivered)
    }

    /// Runs the dead-letter retention sweep.
    ///
    /// # Errors
    ///
    /// Returns error if the store fails.
    pub async fn purge_expired(&self, retention: Duration) -> Result<u64> {
        let purged = self.queue.purge_expired(retention).await?;
        if purged > 0 {
            info!(purged, retention_seconds = retention.as_secs(), "expired dead letters purged");
            self.stats.write().await.purged += purged;
        }
        Ok(purged)
    }

    // A delete that fails after a 2xx surfaces as a fault, so the record is
    // delivered again later. Receivers get at-least-once delivery.
    async fn process(&self, record: &WebhookRecord, max_attempts: u32) -> Result<DrainOutcome> {
        let payload = record.payload_value().map_err(|e| DeliveryError::payload(e.to_string()))?;

        let delivered = self
            .dispatcher
            .dispatch(
                &record.url,
                &payload,
                self.config.dispatch_retries,
                self.config.dispatch_backoff_base,
            )
            .await;

        if delivered {
            self.queue.delete(record.id).await?;
            info!(url = %record.url, "webhook delivered");
            return Ok(DrainOutcome::Delivered);
        }

        let attempts = record.attempt_count() + 1;
        let policy = RetryPolicy { max_attempts, ..self.config.retry_policy.clone() };
        let mut last_error = format!("{}{FAILED_MARKER}", record.last_error);

        self.apply_failure(record, attempts, &mut last_error, policy).await
    }

    async fn record_fault(
        &self,
        record: &WebhookRecord,
        fault: &DeliveryError,
        max_attempts: u32,
    ) -> Result<DrainOutcome> {
        warn!(
            category = %ErrorCategory::from(fault),
            error = %fault,
            "webhook processing failed unexpectedly"
        );
        self.stats.write().await.faults += 1;

        let attempts = record.attempt_count() + 1;
        let policy = fault_policy(max_attempts, self.config.fault_backoff);
        let mut last_error = fault.to_string();

        self.apply_failure(record, attempts, &mut last_error, policy).await
    }

    async fn apply_failure(
        &self,
        record: &WebhookRecord,
        attempts: u32,
        last_error: &mut String,
        policy: RetryPolicy,
    ) -> Result<DrainOutcome> {
        let now = self.clock.now_utc();

        let (backoff, dead) = match RetryContext::new(attempts, now, policy).decide_retry() {
            RetryDecision::Retry { next_attempt_at } => {
                ((next_attempt_at - now).to_std().unwrap_or_default(), false)
            },
            RetryDecision::GiveUp { reason } => {
                debug!(reason = %reason, "giving up on webhook");
                last_error.push_str(DEAD_LETTER_MARKER);
                (Duration::ZERO, true)
            },
        };

        let updated =
            self.queue.mark_failed(record.id, last_error.as_str(), attempts, backoff, dead).await?;

        if !updated {
            debug!("webhook changed during drain; leaving it as is");
            return Ok(DrainOutcome::Skipped);
        }

        if dead {
            error!(url = %record.url, attempts, last_error = %last_error, "webhook dead-lettered");
            Ok(DrainOutcome::DeadLettered)
        } else {
            warn!(
                url = %record.url,
                attempts,
                backoff_seconds = backoff.as_secs(),
                "webhook delivery failed, rescheduled"
            );
            Ok(DrainOutcome::Rescheduled)
        }
    }
}
