//! Dispatcher behavior against scripted webhook receivers.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::{sync::Arc, time::Duration};

use blackbox_core::TestClock;
use blackbox_delivery::client::{ClientConfig, DeliveryClient, Dispatcher};
use serde_json::json;
use wiremock::{
    matchers::{body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn client(clock: &TestClock) -> DeliveryClient {
    DeliveryClient::new(ClientConfig::default(), Arc::new(clock.clone())).expect("client builds")
}

#[tokio::test]
async fn first_success_returns_immediately() {
    let server = MockServer::start().await;
    let payload = json!({"event": "lead.created", "lead": {"id": 17}});
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("content-type", "application/json"))
        .and(body_json(&payload))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let clock = TestClock::new();
    let delivered = client(&clock)
        .dispatch(&format!("{}/hook", server.uri()), &payload, 3, Duration::from_millis(500))
        .await;

    assert!(delivered);
    assert_eq!(clock.elapsed(), Duration::ZERO);
}

#[tokio::test]
async fn recovers_after_two_failures_with_linear_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let clock = TestClock::new();
    let delivered = client(&clock)
        .dispatch(&format!("{}/hook", server.uri()), &json!({}), 4, Duration::from_millis(500))
        .await;

    assert!(delivered);
    assert_eq!(server.received_requests().await.expect("recording enabled").len(), 3);
    // Slept 500ms after attempt 1 and 1000ms after attempt 2.
    assert_eq!(clock.elapsed(), Duration::from_millis(1_500));
}

#[tokio::test]
async fn exhausting_retries_returns_false() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let clock = TestClock::new();
    let delivered =
        client(&clock).dispatch(&server.uri(), &json!({}), 3, Duration::from_secs(1)).await;

    assert!(!delivered);
    // No pause after the final attempt.
    assert_eq!(clock.elapsed(), Duration::from_secs(3));
}

#[tokio::test]
async fn client_errors_are_retried_too() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;

    let clock = TestClock::new();
    let delivered =
        client(&clock).dispatch(&server.uri(), &json!({}), 2, Duration::from_millis(10)).await;

    assert!(!delivered);
}

#[tokio::test]
async fn connection_refused_counts_as_failed_attempt() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);

    let clock = TestClock::new();
    let dispatcher: Arc<dyn Dispatcher> = Arc::new(client(&clock));
    let delivered = dispatcher
        .dispatch(&format!("http://127.0.0.1:{port}/hook"), &json!({}), 2, Duration::from_secs(1))
        .await;

    assert!(!delivered);
    assert_eq!(clock.elapsed(), Duration::from_secs(1));
}

#[tokio::test]
async fn slow_receiver_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let config = ClientConfig { timeout: Duration::from_millis(200), ..ClientConfig::default() };
    let client = DeliveryClient::new(config, Arc::new(TestClock::new())).expect("client builds");

    let result = client.post(&server.uri(), &json!({}), 1).await;

    assert!(matches!(result, Err(blackbox_delivery::DeliveryError::Timeout { .. })));
}
