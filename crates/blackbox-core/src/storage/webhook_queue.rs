//! Repository for the `webhook_queue` table.
//!
//! Drain-side updates only touch live rows (`dead = FALSE`), so a drain that
//! read a record before an operator acted on it can never rewrite a
//! dead-lettered row. Requeue only touches the four scheduling columns.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{Executor, PgPool, Postgres, Transaction};

use crate::{
    error::{CoreError, Result},
    models::{FailureUpdate, WebhookId, WebhookRecord},
};

/// Repository for webhook queue operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a new record.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails or a constraint is violated.
    pub async fn insert(&self, record: &WebhookRecord) -> Result<WebhookRecord> {
        self.insert_impl(&*self.pool, record).await
    }

    /// Inserts a new record inside the caller's transaction, so the webhook
    /// commits or rolls back together with the caller's own writes.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn insert_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: &WebhookRecord,
    ) -> Result<WebhookRecord> {
        self.insert_impl(&mut **tx, record).await
    }

    async fn insert_impl<'e, E>(&self, executor: E, record: &WebhookRecord) -> Result<WebhookRecord>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let stored = sqlx::query_as::<_, WebhookRecord>(
            r#"
            INSERT INTO webhook_queue (
                id, url, payload, attempts, last_error, next_attempt_at, dead, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, url, payload, attempts, last_error, next_attempt_at, dead, created_at
            "#,
        )
        .bind(record.id)
        .bind(&record.url)
        .bind(&record.payload)
        .bind(record.attempts)
        .bind(&record.last_error)
        .bind(record.next_attempt_at)
        .bind(record.dead)
        .bind(record.created_at)
        .fetch_one(executor)
        .await?;

        Ok(stored)
    }

    /// Returns live records whose `next_attempt_at` has passed.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_due(&self, now: DateTime<Utc>) -> Result<Vec<WebhookRecord>> {
        let records = sqlx::query_as::<_, WebhookRecord>(
            r#"
            SELECT id, url, payload, attempts, last_error, next_attempt_at, dead, created_at
            FROM webhook_queue
            WHERE dead = FALSE
              AND next_attempt_at IS NOT NULL
              AND next_attempt_at <= $1
            "#,
        )
        .bind(now)
        .fetch_all(&*self.pool)
        .await?;

        Ok(records)
    }

    /// Finds a record by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: WebhookId) -> Result<Option<WebhookRecord>> {
        let record = sqlx::query_as::<_, WebhookRecord>(
            r#"
            SELECT id, url, payload, attempts, last_error, next_attempt_at, dead, created_at
            FROM webhook_queue
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(record)
    }

    /// Lists every record regardless of state, newest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn list_all(&self) -> Result<Vec<WebhookRecord>> {
        let records = sqlx::query_as::<_, WebhookRecord>(
            r#"
            SELECT id, url, payload, attempts, last_error, next_attempt_at, dead, created_at
            FROM webhook_queue
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&*self.pool)
        .await?;

        Ok(records)
    }

    /// Deletes a record. Deleting an absent record is not an error.
    ///
    /// # Errors
    ///
    /// Returns error if the statement fails.
    pub async fn delete(&self, id: WebhookId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhook_queue WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Applies a drain failure to a live record.
    ///
    /// Returns false if the record is gone or already dead.
    ///
    /// # Errors
    ///
    /// Returns error if the statement fails.
    pub async fn mark_failed(&self, id: WebhookId, update: &FailureUpdate) -> Result<bool> {
        let attempts = i32::try_from(update.attempts)
            .map_err(|_| CoreError::InvalidInput("attempt count out of range".to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE webhook_queue
            SET attempts = $2, last_error = $3, next_attempt_at = $4, dead = $5
            WHERE id = $1 AND dead = FALSE
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(&update.last_error)
        .bind(update.next_attempt_at)
        .bind(update.dead)
        .execute(&*self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Resets a record to the immediately eligible live state.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` if no record has this ID.
    pub async fn requeue(&self, id: WebhookId, now: DateTime<Utc>) -> Result<WebhookRecord> {
        let record = sqlx::query_as::<_, WebhookRecord>(
            r#"
            UPDATE webhook_queue
            SET attempts = 0, dead = FALSE, last_error = '', next_attempt_at = $2
            WHERE id = $1
            RETURNING id, url, payload, attempts, last_error, next_attempt_at, dead, created_at
            "#,
        )
        .bind(id)
        .bind(now)
        .fetch_optional(&*self.pool)
        .await?;

        record.ok_or_else(|| CoreError::NotFound(format!("webhook {id}")))
    }

    /// Deletes a dead-lettered record. Live records are left untouched.
    ///
    /// # Errors
    ///
    /// Returns error if the statement fails.
    pub async fn purge_dead(&self, id: WebhookId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM webhook_queue WHERE id = $1 AND dead = TRUE")
            .bind(id)
            .execute(&*self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes dead-lettered records created before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns error if the statement fails.
    pub async fn purge_dead_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM webhook_queue WHERE dead = TRUE AND created_at < $1")
                .bind(cutoff)
                .execute(&*self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}
