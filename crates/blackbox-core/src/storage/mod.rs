//! Database access layer for the webhook queue.
//!
//! All SQL touching `webhook_queue` lives in this module; callers go through
//! the repositories held by `Storage`.

use std::sync::Arc;

use sqlx::PgPool;

pub mod webhook_queue;

use crate::error::Result;

/// Container for repository instances sharing one connection pool.
#[derive(Clone)]
pub struct Storage {
    /// Repository for queued webhook records.
    pub webhook_queue: Arc<webhook_queue::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self { webhook_queue: Arc::new(webhook_queue::Repository::new(pool)) }
    }

    /// Verifies database connectivity with a trivial query.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.webhook_queue.pool()).await?;

        Ok(())
    }
}
