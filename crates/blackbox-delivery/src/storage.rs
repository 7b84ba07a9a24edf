//! Storage abstraction for the webhook queue.
//!
//! `QueueStorage` is the row-level persistence interface the queue needs.
//! `PostgresQueueStorage` adapts the core repository; `memory` provides a
//! non-durable backend used by tests and local runs without a database.

use std::{future::Future, pin::Pin, sync::Arc};

use blackbox_core::{
    error::Result,
    models::{FailureUpdate, WebhookId, WebhookRecord},
    storage::Storage,
};
use chrono::{DateTime, Utc};

/// Boxed future returned by `QueueStorage` methods.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistence operations over webhook records.
pub trait QueueStorage: Send + Sync + 'static {
    /// Persists a new record and returns it as stored.
    fn insert(&self, record: WebhookRecord) -> StorageFuture<'_, WebhookRecord>;

    /// Live records with `next_attempt_at <= now`, in no particular order.
    fn due_records(&self, now: DateTime<Utc>) -> StorageFuture<'_, Vec<WebhookRecord>>;

    /// Looks up a single record.
    fn find(&self, id: WebhookId) -> StorageFuture<'_, Option<WebhookRecord>>;

    /// Every record regardless of state.
    fn list_all(&self) -> StorageFuture<'_, Vec<WebhookRecord>>;

    /// Removes a record; returns false if it was already gone.
    fn delete(&self, id: WebhookId) -> StorageFuture<'_, bool>;

    /// Applies a drain failure to a live record; returns false if the record
    /// is gone or already dead.
    fn mark_failed(&self, id: WebhookId, update: FailureUpdate) -> StorageFuture<'_, bool>;

    /// Resets a record to the immediately eligible live state.
    ///
    /// Fails with `CoreError::NotFound` for an unknown ID.
    fn requeue(&self, id: WebhookId, now: DateTime<Utc>) -> StorageFuture<'_, WebhookRecord>;

    /// Deletes a record only if it is dead-lettered.
    fn purge_dead(&self, id: WebhookId) -> StorageFuture<'_, bool>;

    /// Deletes dead-lettered records created before `cutoff`.
    fn purge_dead_before(&self, cutoff: DateTime<Utc>) -> StorageFuture<'_, u64>;
}

/// PostgreSQL-backed queue storage.
pub struct PostgresQueueStorage {
    storage: Arc<Storage>,
}

impl PostgresQueueStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl QueueStorage for PostgresQueueStorage {
    fn insert(&self, record: WebhookRecord) -> StorageFuture<'_, WebhookRecord> {
        Box::pin(async move { self.storage.webhook_queue.insert(&record).await })
    }

    fn due_records(&self, now: DateTime<Utc>) -> StorageFuture<'_, Vec<WebhookRecord>> {
        Box::pin(self.storage.webhook_queue.find_due(now))
    }

    fn find(&self, id: WebhookId) -> StorageFuture<'_, Option<WebhookRecord>> {
        Box::pin(self.storage.webhook_queue.find_by_id(id))
    }

    fn list_all(&self) -> StorageFuture<'_, Vec<WebhookRecord>> {
        Box::pin(self.storage.webhook_queue.list_all())
    }

    fn delete(&self, id: WebhookId) -> StorageFuture<'_, bool> {
        Box::pin(self.storage.webhook_queue.delete(id))
    }

    fn mark_failed(&self, id: WebhookId, update: FailureUpdate) -> StorageFuture<'_, bool> {
        Box::pin(async move { self.storage.webhook_queue.mark_failed(id, &update).await })
    }

    fn requeue(&self, id: WebhookId, now: DateTime<Utc>) -> StorageFuture<'_, WebhookRecord> {
        Box::pin(self.storage.webhook_queue.requeue(id, now))
    }

    fn purge_dead(&self, id: WebhookId) -> StorageFuture<'_, bool> {
        Box::pin(self.storage.webhook_queue.purge_dead(id))
    }

    fn purge_dead_before(&self, cutoff: DateTime<Utc>) -> StorageFuture<'_, u64> {
        Box::pin(self.storage.webhook_queue.purge_dead_before(cutoff))
    }
}

pub mod memory {
    //! In-memory queue storage.
    //!
    //! Mirrors the PostgreSQL semantics (live-only drain updates, column-
    //! scoped requeue) and supports one-shot error injection for exercising
    //! the drainer's failure paths.

    use std::{collections::HashMap, sync::Arc};

    use blackbox_core::{
        error::CoreError,
        models::{FailureUpdate, WebhookId, WebhookRecord},
    };
    use chrono::{DateTime, Utc};
    use tokio::sync::RwLock;

    use super::{QueueStorage, StorageFuture};

    /// Operation an injected error is attached to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Operation {
        /// `due_records`
        DueRecords,
        /// `delete`
        Delete,
        /// `mark_failed`
        MarkFailed,
    }

    /// Process-local queue storage.
    #[derive(Clone, Default)]
    pub struct MemoryQueueStorage {
        records: Arc<RwLock<HashMap<WebhookId, WebhookRecord>>>,
        injected: Arc<RwLock<HashMap<Operation, String>>>,
    }

    impl MemoryQueueStorage {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes the next call of `operation` fail with a database error.
        pub async fn inject_error(&self, operation: Operation, message: impl Into<String>) {
            self.injected.write().await.insert(operation, message.into());
        }

        /// Number of stored records.
        pub async fn len(&self) -> usize {
            self.records.read().await.len()
        }

        /// Returns true if no records are stored.
        pub async fn is_empty(&self) -> bool {
            self.records.read().await.is_empty()
        }

        /// Overwrites the stored payload text of a record.
        pub async fn corrupt_payload(&self, id: WebhookId, payload: impl Into<String>) {
            if let Some(record) = self.records.write().await.get_mut(&id) {
                record.payload = payload.into();
            }
        }

        async fn take_injected(&self, operation: Operation) -> Result<(), CoreError> {
            match self.injected.write().await.remove(&operation) {
                Some(message) => Err(CoreError::Database(message)),
                None => Ok(()),
            }
        }
    }

    impl QueueStorage for MemoryQueueStorage {
        fn insert(&self, record: WebhookRecord) -> StorageFuture<'_, WebhookRecord> {
            Box::pin(async move {
                let mut records = self.records.write().await;
                if records.contains_key(&record.id) {
                    return Err(CoreError::ConstraintViolation(format!(
                        "webhook {} already exists",
                        record.id
                    )));
                }
                records.insert(record.id, record.clone());
                Ok(record)
            })
        }

        fn due_records(&self, now: DateTime<Utc>) -> StorageFuture<'_, Vec<WebhookRecord>> {
            Box::pin(async move {
                self.take_injected(Operation::DueRecords).await?;
                let records = self.records.read().await;
                Ok(records.values().filter(|record| record.is_due(now)).cloned().collect())
            })
        }

        fn find(&self, id: WebhookId) -> StorageFuture<'_, Option<WebhookRecord>> {
            Box::pin(async move { Ok(self.records.read().await.get(&id).cloned()) })
        }

        fn list_all(&self) -> StorageFuture<'_, Vec<WebhookRecord>> {
            Box::pin(async move {
                let mut all: Vec<_> = self.records.read().await.values().cloned().collect();
                all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                Ok(all)
            })
        }

        fn delete(&self, id: WebhookId) -> StorageFuture<'_, bool> {
            Box::pin(async move {
                self.take_injected(Operation::Delete).await?;
                Ok(self.records.write().await.remove(&id).is_some())
            })
        }

        fn mark_failed(&self, id: WebhookId, update: FailureUpdate) -> StorageFuture<'_, bool> {
            Box::pin(async move {
                self.take_injected(Operation::MarkFailed).await?;
                let mut records = self.records.write().await;
                match records.get_mut(&id) {
                    Some(record) if !record.dead => {
                        update.apply(record);
                        Ok(true)
                    },
                    _ => Ok(false),
                }
            })
        }

        fn requeue(
            &self,
            id: WebhookId,
            now: DateTime<Utc>,
        ) -> StorageFuture<'_, WebhookRecord> {
            Box::pin(async move {
                let mut records = self.records.write().await;
                let record = records
                    .get_mut(&id)
                    .ok_or_else(|| CoreError::NotFound(format!("webhook {id}")))?;
                record.reset(now);
                Ok(record.clone())
            })
        }

        fn purge_dead(&self, id: WebhookId) -> StorageFuture<'_, bool> {
            Box::pin(async move {
                let mut records = self.records.write().await;
                if records.get(&id).is_some_and(|record| record.dead) {
                    records.remove(&id);
                    return Ok(true);
                }
                Ok(false)
            })
        }

        fn purge_dead_before(&self, cutoff: DateTime<Utc>) -> StorageFuture<'_, u64> {
            Box::pin(async move {
                let mut records = self.records.write().await;
                let before = records.len();
                records.retain(|_, record| !(record.dead && record.created_at < cutoff));
                Ok(u64::try_from(before - records.len()).unwrap_or(u64::MAX))
            })
        }
    }
}
