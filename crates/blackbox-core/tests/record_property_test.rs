//! Property tests for webhook records.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use blackbox_core::{FailureUpdate, QueueState, WebhookRecord};
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::{Map, Value};

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        ".{0,16}".prop_map(Value::String),
    ];

    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                .prop_map(|entries| Value::Object(entries.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

proptest! {
    #[test]
    fn stored_payload_decodes_to_the_original(payload in json_value()) {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let record = WebhookRecord::new("https://hooks.example.com/in", &payload, now)
            .expect("serializable");

        prop_assert_eq!(record.payload_value().expect("valid json"), payload);
        prop_assert_eq!(record.state(now), QueueState::Due);
    }

    #[test]
    fn failure_updates_drive_the_state(
        attempts in 1u32..50,
        backoff_secs in 1i64..86_400,
        dead in any::<bool>(),
    ) {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut record = WebhookRecord::new("https://hooks.example.com/in", &Value::Null, now)
            .expect("serializable");

        let next_attempt_at = (!dead).then(|| now + Duration::seconds(backoff_secs));
        FailureUpdate { attempts, last_error: ";failed".to_string(), next_attempt_at, dead }
            .apply(&mut record);

        prop_assert_eq!(record.attempt_count(), attempts);
        if dead {
            prop_assert_eq!(record.state(now + Duration::days(365)), QueueState::Dead);
            prop_assert!(!record.is_due(now + Duration::days(365)));
        } else {
            prop_assert_eq!(record.state(now), QueueState::Scheduled);
            prop_assert_eq!(
                record.state(now + Duration::seconds(backoff_secs)),
                QueueState::Due
            );
        }

        record.reset(now);
        prop_assert_eq!(record.state(now), QueueState::Due);
        prop_assert_eq!(record.attempts, 0);
        prop_assert!(record.last_error.is_empty());
    }
}
