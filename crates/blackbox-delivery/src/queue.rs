//! The webhook record store.
//!
//! `WebhookQueue` validates and timestamps requests before handing them to a
//! `QueueStorage` backend. It is the surface shared by enqueuing callers, the
//! drainer and operator tooling.

use std::{sync::Arc, time::Duration};

use blackbox_core::{
    error::{CoreError, Result},
    models::{FailureUpdate, WebhookId, WebhookRecord, WebhookSummary},
    Clock,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::storage::QueueStorage;

/// Durable queue of pending webhooks.
#[derive(Clone)]
pub struct WebhookQueue {
    storage: Arc<dyn QueueStorage>,
    clock: Arc<dyn Clock>,
}

impl WebhookQueue {
    /// Creates a queue over the given backend.
    pub fn new(storage: Arc<dyn QueueStorage>, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    /// Queues `payload` for delivery to `url`.
    ///
    /// The stored record has no attempts and is immediately due.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` for an empty URL or a payload that
    /// cannot be serialized; nothing is persisted in that case.
    pub async fn enqueue(&self, url: &str, payload: &serde_json::Value) -> Result<WebhookRecord> {
        if url.trim().is_empty() {
            return Err(CoreError::InvalidInput("webhook url must not be empty".to_string()));
        }

        let record = WebhookRecord::new(url, payload, self.clock.now_utc())
            .map_err(|e| CoreError::InvalidInput(format!("payload is not serializable: {e}")))?;
        let stored = self.storage.insert(record).await?;

        debug!(webhook_id = %stored.id, url, "webhook enqueued");
        Ok(stored)
    }

    /// Live records due at `now`.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    pub async fn due_records(&self, now: DateTime<Utc>) -> Result<Vec<WebhookRecord>> {
        self.storage.due_records(now).await
    }

    /// Looks up a record by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    pub async fn find(&self, id: WebhookId) -> Result<Option<WebhookRecord>> {
        self.storage.find(id).await
    }

    /// Deletes a record permanently. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    pub async fn delete(&self, id: WebhookId) -> Result<()> {
        if !self.storage.delete(id).await? {
            debug!(webhook_id = %id, "delete of absent webhook ignored");
        }
        Ok(())
    }

    /// Records a failed drain cycle.
    ///
    /// With `dead` set the record is dead-lettered and `next_attempt_at` is
    /// cleared; otherwise it becomes due again after `backoff`. Returns false
    /// if the record was already dead or gone.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    pub async fn mark_failed(
        &self,
        id: WebhookId,
        error: impl Into<String>,
        attempts: u32,
        backoff: Duration,
        dead: bool,
    ) -> Result<bool> {
        let next_attempt_at = if dead {
            None
        } else {
            let backoff = chrono::Duration::from_std(backoff)
                .map_err(|_| CoreError::InvalidInput(format!("backoff {backoff:?} out of range")))?;
            Some(self.clock.now_utc() + backoff)
        };

        let update = FailureUpdate { attempts, last_error: error.into(), next_attempt_at, dead };
        self.storage.mark_failed(id, update).await
    }

    /// Resets a record so the next drain cycle picks it up.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if no record has this ID.
    pub async fn requeue(&self, id: WebhookId) -> Result<WebhookRecord> {
        let record = self.storage.requeue(id, self.clock.now_utc()).await?;
        info!(webhook_id = %id, url = %record.url, "webhook requeued");
        Ok(record)
    }

    /// Every record regardless of state, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    pub async fn list_all(&self) -> Result<Vec<WebhookRecord>> {
        self.storage.list_all().await
    }

    /// Admin listing rows, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    pub async fn list_summaries(&self) -> Result<Vec<WebhookSummary>> {
        Ok(self.list_all().await?.iter().map(WebhookRecord::summary).collect())
    }

    /// Dead-lettered records awaiting operator action.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    pub async fn dead_letters(&self) -> Result<Vec<WebhookRecord>> {
        Ok(self.list_all().await?.into_iter().filter(|record| record.dead).collect())
    }

    /// Permanently removes a dead-lettered record.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for an unknown ID and
    /// `CoreError::InvalidInput` for a live record.
    pub async fn purge(&self, id: WebhookId) -> Result<()> {
        if self.storage.purge_dead(id).await? {
            info!(webhook_id = %id, "dead-lettered webhook purged");
            return Ok(());
        }

        match self.storage.find(id).await? {
            Some(_) => Err(CoreError::InvalidInput(format!(
                "webhook {id} is live; only dead-lettered webhooks can be purged"
            ))),
            None => Err(CoreError::NotFound(format!("webhook {id}"))),
        }
    }

    /// Removes dead letters created more than `retention` ago.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    pub async fn purge_expired(&self, retention: Duration) -> Result<u64> {
        let retention = chrono::Duration::from_std(retention)
            .map_err(|_| CoreError::InvalidInput(format!("retention {retention:?} out of range")))?;
        self.storage.purge_dead_before(self.clock.now_utc() - retention).await
    }

    /// Clock used for timestamps.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use blackbox_core::TestClock;
    use serde_json::json;

    use super::*;
    use crate::storage::memory::MemoryQueueStorage;

    fn queue() -> (WebhookQueue, MemoryQueueStorage, TestClock) {
        let storage = MemoryQueueStorage::new();
        let clock = TestClock::new();
        let queue = WebhookQueue::new(Arc::new(storage.clone()), Arc::new(clock.clone()));
        (queue, storage, clock)
    }

    #[tokio::test]
    async fn enqueue_rejects_empty_url_without_persisting() {
        let (queue, storage, _clock) = queue();

        let result = queue.enqueue("", &json!({"lead": 1})).await;

        assert!(matches!(result, Err(CoreError::InvalidInput(_))));
        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn enqueued_record_is_due_now() {
        let (queue, _storage, clock) = queue();

        let record = queue.enqueue("https://hooks.example.com/a", &json!({})).await.expect("ok");

        assert_eq!(record.attempts, 0);
        assert!(record.next_attempt_at.is_some_and(|at| at <= clock.now_utc()));
        assert_eq!(queue.due_records(clock.now_utc()).await.expect("due").len(), 1);
    }

    #[tokio::test]
    async fn mark_failed_schedules_after_backoff() {
        let (queue, _storage, clock) = queue();
        let record = queue.enqueue("https://hooks.example.com/a", &json!({})).await.expect("ok");

        let updated = queue
            .mark_failed(record.id, ";failed", 1, Duration::from_secs(2), false)
            .await
            .expect("update");
        assert!(updated);

        assert!(queue.due_records(clock.now_utc()).await.expect("due").is_empty());
        clock.advance(Duration::from_secs(2));
        assert_eq!(queue.due_records(clock.now_utc()).await.expect("due").len(), 1);
    }

    #[tokio::test]
    async fn delete_twice_is_a_no_op() {
        let (queue, storage, _clock) = queue();
        let record = queue.enqueue("https://hooks.example.com/a", &json!({})).await.expect("ok");

        queue.delete(record.id).await.expect("first delete");
        queue.delete(record.id).await.expect("second delete");

        assert!(storage.is_empty().await);
    }

    #[tokio::test]
    async fn requeue_of_unknown_id_is_not_found() {
        let (queue, _storage, _clock) = queue();

        let result = queue.requeue(WebhookId::new()).await;

        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn purge_only_removes_dead_letters() {
        let (queue, _storage, _clock) = queue();
        let live = queue.enqueue("https://hooks.example.com/live", &json!({})).await.expect("ok");
        let dead = queue.enqueue("https://hooks.example.com/dead", &json!({})).await.expect("ok");
        queue
            .mark_failed(dead.id, ";max_attempts", 5, Duration::ZERO, true)
            .await
            .expect("dead-letter");

        assert!(matches!(queue.purge(live.id).await, Err(CoreError::InvalidInput(_))));
        queue.purge(dead.id).await.expect("purge dead");
        assert!(matches!(queue.purge(dead.id).await, Err(CoreError::NotFound(_))));
        assert_eq!(queue.list_all().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn retention_sweep_keeps_recent_dead_letters() {
        let (queue, _storage, clock) = queue();
        let old = queue.enqueue("https://hooks.example.com/old", &json!({})).await.expect("ok");
        queue.mark_failed(old.id, "", 5, Duration::ZERO, true).await.expect("dead-letter");

        clock.advance(Duration::from_secs(48 * 3600));
        let recent = queue.enqueue("https://hooks.example.com/new", &json!({})).await.expect("ok");
        queue.mark_failed(recent.id, "", 5, Duration::ZERO, true).await.expect("dead-letter");

        let purged = queue.purge_expired(Duration::from_secs(24 * 3600)).await.expect("sweep");

        assert_eq!(purged, 1);
        let remaining = queue.dead_letters().await.expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, recent.id);
    }
}
