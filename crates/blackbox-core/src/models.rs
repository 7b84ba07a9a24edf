//! Webhook queue domain model.
//!
//! A `WebhookRecord` is one unit of pending outbound work. It is live until
//! it is delivered (and deleted) or dead-lettered after exhausting its
//! attempt budget; dead records stay in the table for operator review.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed webhook record identifier.
///
/// Assigned once at enqueue time and never changed.
///
/// # Example
///
/// ```
/// use blackbox_core::models::WebhookId;
/// let id = WebhookId::new();
/// println!("queued webhook {id}");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WebhookId(pub Uuid);

impl WebhookId {
    /// Creates a new random webhook ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WebhookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WebhookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for WebhookId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for WebhookId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for WebhookId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for WebhookId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Where a record sits in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Live and eligible for the next drain cycle.
    Due,
    /// Live but backing off until `next_attempt_at`.
    Scheduled,
    /// Dead-lettered; waits for an operator to requeue or purge it.
    Dead,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Due => write!(f, "due"),
            Self::Scheduled => write!(f, "scheduled"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// A queued outbound webhook.
///
/// The payload is kept in its serialized JSON form, exactly as it sits in the
/// `webhook_queue.payload` column, and decoded at delivery time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookRecord {
    /// Record identifier.
    pub id: WebhookId,
    /// Destination endpoint.
    pub url: String,
    /// Serialized JSON body.
    pub payload: String,
    /// Failed drain cycles so far.
    pub attempts: i32,
    /// Diagnostic trail of failures; empty until the first failure.
    pub last_error: String,
    /// Earliest time the record may be drained. `None` once dead.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Dead-letter flag.
    pub dead: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl WebhookRecord {
    /// Builds a fresh record that is immediately eligible for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized to JSON.
    pub fn new(
        url: impl Into<String>,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            id: WebhookId::new(),
            url: url.into(),
            payload: serde_json::to_string(payload)?,
            attempts: 0,
            last_error: String::new(),
            next_attempt_at: Some(now),
            dead: false,
            created_at: now,
        })
    }

    /// Decodes the stored payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored text is not valid JSON.
    pub fn payload_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.payload)
    }

    /// Attempt counter as an unsigned value.
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts).unwrap_or(0)
    }

    /// Returns true if the record is live and its backoff has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.dead && self.next_attempt_at.is_some_and(|at| at <= now)
    }

    /// Projects the record onto its lifecycle state at `now`.
    pub fn state(&self, now: DateTime<Utc>) -> QueueState {
        if self.dead {
            QueueState::Dead
        } else if self.is_due(now) {
            QueueState::Due
        } else {
            QueueState::Scheduled
        }
    }

    /// Resets the record to the immediately eligible live state.
    pub fn reset(&mut self, now: DateTime<Utc>) {
        self.attempts = 0;
        self.dead = false;
        self.last_error.clear();
        self.next_attempt_at = Some(now);
    }

    /// Admin view of the record without its payload.
    pub fn summary(&self) -> WebhookSummary {
        WebhookSummary {
            id: self.id,
            url: self.url.clone(),
            attempts: self.attempts,
            last_error: self.last_error.clone(),
            next_attempt_at: self.next_attempt_at,
            dead: self.dead,
            created_at: self.created_at,
        }
    }
}

/// Operator-facing listing row for dead-letter review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSummary {
    /// Record identifier.
    pub id: WebhookId,
    /// Destination endpoint.
    pub url: String,
    /// Failed drain cycles so far.
    pub attempts: i32,
    /// Diagnostic trail of failures.
    pub last_error: String,
    /// Earliest next delivery time, if live.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Dead-letter flag.
    pub dead: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Outcome of a failed drain cycle, applied to the stored record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureUpdate {
    /// New attempt count.
    pub attempts: u32,
    /// New diagnostic text.
    pub last_error: String,
    /// Next eligibility time; `None` when dead-lettering.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Whether the record is now dead.
    pub dead: bool,
}

impl FailureUpdate {
    /// Applies the update to an in-memory record.
    pub fn apply(&self, record: &mut WebhookRecord) {
        record.attempts = i32::try_from(self.attempts).unwrap_or(i32::MAX);
        record.last_error.clone_from(&self.last_error);
        record.next_attempt_at = self.next_attempt_at;
        record.dead = self.dead;
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    #[test]
    fn new_record_is_immediately_due() {
        let now = Utc::now();
        let record = WebhookRecord::new("https://hooks.example.com/a", &json!({"k": 1}), now)
            .expect("payload serializes");

        assert_eq!(record.attempts, 0);
        assert!(record.last_error.is_empty());
        assert!(!record.dead);
        assert_eq!(record.next_attempt_at, Some(now));
        assert_eq!(record.state(now), QueueState::Due);
    }

    #[test]
    fn backing_off_record_is_scheduled() {
        let now = Utc::now();
        let mut record =
            WebhookRecord::new("https://hooks.example.com/a", &json!({}), now).expect("payload");
        record.next_attempt_at = Some(now + Duration::seconds(4));

        assert!(!record.is_due(now));
        assert_eq!(record.state(now), QueueState::Scheduled);
        assert!(record.is_due(now + Duration::seconds(4)));
    }

    #[test]
    fn dead_record_is_never_due() {
        let now = Utc::now();
        let mut record =
            WebhookRecord::new("https://hooks.example.com/a", &json!({}), now).expect("payload");
        record.dead = true;
        record.next_attempt_at = None;

        assert!(!record.is_due(now + Duration::days(365)));
        assert_eq!(record.state(now), QueueState::Dead);
    }

    #[test]
    fn reset_restores_live_state() {
        let now = Utc::now();
        let mut record =
            WebhookRecord::new("https://hooks.example.com/a", &json!({}), now).expect("payload");
        FailureUpdate {
            attempts: 5,
            last_error: ";failed;max_attempts".to_string(),
            next_attempt_at: None,
            dead: true,
        }
        .apply(&mut record);

        let later = now + Duration::minutes(10);
        record.reset(later);

        assert_eq!(record.attempts, 0);
        assert!(!record.dead);
        assert_eq!(record.last_error, "");
        assert_eq!(record.next_attempt_at, Some(later));
    }

    #[test]
    fn summary_omits_payload_but_keeps_diagnostics() {
        let record = WebhookRecord::new("https://hooks.example.com/a", &json!({"k": 1}), Utc::now())
            .expect("payload");
        let summary = record.summary();

        assert_eq!(summary.id, record.id);
        assert_eq!(summary.url, record.url);
        let rendered = serde_json::to_value(&summary).expect("summary serializes");
        assert!(rendered.get("payload").is_none());
        assert!(rendered.get("last_error").is_some());
    }

    #[test]
    fn nested_payload_survives_storage_form() {
        let payload = json!({
            "lead": {"id": 42, "tags": ["hot", "inbound"]},
            "score": 87.5,
            "owner": null
        });
        let record =
            WebhookRecord::new("https://hooks.example.com/a", &payload, Utc::now()).expect("payload");

        assert_eq!(record.payload_value().expect("decodes"), payload);
    }
}
