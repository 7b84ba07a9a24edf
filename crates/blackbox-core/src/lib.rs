//! Core domain model for the BlackBox webhook queue.
//!
//! Provides the `WebhookRecord` entity and its identifier, the error type
//! shared by every queue backend, the PostgreSQL repository and the `Clock`
//! abstraction that keeps time-dependent behavior testable.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{FailureUpdate, QueueState, WebhookId, WebhookRecord, WebhookSummary};
pub use time::{Clock, RealClock, TestClock};
