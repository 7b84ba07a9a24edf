//! Durable webhook delivery with retry, backoff and dead-lettering.
//!
//! Callers enqueue a URL and JSON payload into the `WebhookQueue`; the
//! `DrainScheduler` periodically asks the `QueueDrainer` to push every due
//! record through the `Dispatcher`.
//!
//! # Retry layers
//!
//! 1. **Dispatcher** - a few quick in-process attempts with linear backoff,
//!    for transient blips.
//! 2. **Drainer** - one attempt per cycle, rescheduled with `2^attempts`
//!    seconds of backoff persisted on the record, for sustained outages.
//!    Records reaching the attempt cap are dead-lettered and kept for
//!    operator review.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use blackbox_core::RealClock;
//! use blackbox_delivery::{
//!     storage::memory::MemoryQueueStorage, DeliveryConfig, DeliveryEngine, DeliveryError,
//! };
//!
//! # async fn example() -> Result<(), DeliveryError> {
//! let storage = Arc::new(MemoryQueueStorage::new());
//! let mut engine =
//!     DeliveryEngine::new(storage, DeliveryConfig::default(), Arc::new(RealClock::new()))?;
//!
//! engine.queue().enqueue("https://hooks.example.com/leads", &serde_json::json!({"id": 7})).await?;
//! engine.start()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod drainer;
pub mod engine;
pub mod error;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod storage;

pub use client::{ClientConfig, DeliveryClient, Dispatcher};
pub use drainer::{DrainConfig, DrainOutcome, DrainStats, QueueDrainer};
pub use engine::{DeliveryConfig, DeliveryEngine};
pub use error::{DeliveryError, Result};
pub use queue::WebhookQueue;
pub use scheduler::{DrainScheduler, SchedulerConfig};

/// Default pause between drain cycles.
pub const DEFAULT_DRAIN_INTERVAL_SECONDS: u64 = 5;

/// Default number of failed cycles before a record is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default per-request HTTP timeout.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 5;

/// Default backoff after an unexpected processing failure.
pub const DEFAULT_FAULT_BACKOFF_SECONDS: u64 = 30;
