//! HTTP dispatcher for outbound webhooks.
//!
//! `DeliveryClient::post` performs one JSON POST and categorizes the outcome.
//! `dispatch` wraps it in the short in-process retry loop: up to `retries`
//! attempts with a linear `backoff_base * attempt` pause between them,
//! answering only "delivered or not".

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    time::{Duration, Instant},
};

use blackbox_core::{Clock, RealClock};
use reqwest::Response;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    error::{DeliveryError, ErrorCategory, Result},
    retry::dispatch_policy,
};

const MAX_RESPONSE_BODY_SIZE: usize = 1024;

/// Configuration for the webhook delivery client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout for a single POST.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Maximum number of redirects to follow.
    pub max_redirects: u32,
    /// Whether to verify TLS certificates.
    pub verify_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::DEFAULT_TIMEOUT_SECONDS),
            user_agent: "BlackBox-Webhooks/1.0".to_string(),
            max_redirects: 3,
            verify_tls: true,
        }
    }
}

/// Anything that can try to deliver a webhook.
///
/// The drainer only needs the yes/no answer; implementations log their own
/// failure details.
pub trait Dispatcher: Send + Sync + 'static {
    /// Attempts delivery up to `retries` times with linear backoff.
    fn dispatch<'a>(
        &'a self,
        url: &'a str,
        payload: &'a serde_json::Value,
        retries: u32,
        backoff_base: Duration,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

/// Response from a webhook delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body, truncated.
    pub body: String,
    /// Total duration of the request.
    pub duration: Duration,
    /// Whether the request was successful (2xx status).
    pub is_success: bool,
}

impl DeliveryResponse {
    /// Converts a non-2xx response into the matching error.
    ///
    /// # Errors
    ///
    /// Returns `ClientError` for 4xx and `ServerError` for any other non-2xx
    /// status.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success {
            Ok(self)
        } else {
            Err(DeliveryError::from_status(self.status_code, self.body))
        }
    }
}

/// reqwest-backed webhook client.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

impl DeliveryClient {
    /// Creates a new delivery client.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built from the provided settings.
    pub fn new(config: ClientConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects as usize))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config, clock })
    }

    /// Creates a client with default configuration and the real clock.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ConfigurationError` if the HTTP client cannot
    /// be built.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default(), Arc::new(RealClock::new()))
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Performs one POST of `payload` as JSON.
    ///
    /// Any HTTP response, including non-2xx, is returned as `Ok`; call
    /// `DeliveryResponse::into_result` to treat those as errors.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the request exceeds the configured timeout and
    /// `NetworkError` for connection and transport failures.
    pub async fn post(
        &self,
        url: &str,
        payload: &serde_json::Value,
        attempt_number: u32,
    ) -> Result<DeliveryResponse> {
        let start_time = Instant::now();

        let span = info_span!("webhook_dispatch", url = %url, attempt = attempt_number);

        async move {
            debug!("sending webhook");

            let request = self
                .client
                .post(url)
                .json(payload)
                .header("X-Blackbox-Delivery-Attempt", attempt_number.to_string())
                .header("X-Blackbox-Sent-At", self.clock.now_utc().to_rfc3339());

            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    let duration = start_time.elapsed();
                    debug!(duration_ms = duration.as_millis(), error = %e, "request failed");

                    if e.is_timeout() {
                        return Err(DeliveryError::timeout(self.config.timeout.as_secs()));
                    }
                    if e.is_connect() {
                        return Err(DeliveryError::network(format!("connection failed: {e}")));
                    }
                    return Err(DeliveryError::network(e.to_string()));
                },
            };

            let delivery_response = read_response(response, start_time.elapsed()).await;

            debug!(
                status = delivery_response.status_code,
                duration_ms = delivery_response.duration.as_millis(),
                "received response"
            );

            Ok(delivery_response)
        }
        .instrument(span)
        .await
    }

    /// Delivers `payload` to `url`, retrying in-process.
    ///
    /// Returns true on the first 2xx. Any error or non-2xx response is
    /// followed by a `backoff_base * attempt` pause and another attempt, up
    /// to `retries` attempts in total. No pause follows the last attempt.
    pub async fn dispatch(
        &self,
        url: &str,
        payload: &serde_json::Value,
        retries: u32,
        backoff_base: Duration,
    ) -> bool {
        let policy = dispatch_policy(retries, backoff_base);

        for attempt in 1..=retries {
            match self.post(url, payload, attempt).await.and_then(DeliveryResponse::into_result) {
                Ok(_) => return true,
                Err(error) => {
                    debug!(
                        url,
                        attempt,
                        retries,
                        category = %ErrorCategory::from(&error),
                        error = %error,
                        "webhook attempt failed"
                    );
                },
            }

            if attempt < retries {
                self.clock.sleep(policy.delay_for(attempt)).await;
            }
        }

        warn!(url, retries, "webhook dispatch exhausted its attempts");
        false
    }
}

impl Dispatcher for DeliveryClient {
    fn dispatch<'a>(
        &'a self,
        url: &'a str,
        payload: &'a serde_json::Value,
        retries: u32,
        backoff_base: Duration,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(DeliveryClient::dispatch(self, url, payload, retries, backoff_base))
    }
}

async fn read_response(response: Response, duration: Duration) -> DeliveryResponse {
    let status_code = response.status().as_u16();
    let is_success = response.status().is_success();

    let body = match response.bytes().await {
        Ok(bytes) if bytes.len() > MAX_RESPONSE_BODY_SIZE => {
            let truncated = String::from_utf8_lossy(&bytes[..MAX_RESPONSE_BODY_SIZE]);
            format!("{truncated}... (truncated)")
        },
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => format!("[failed to read response body: {e}]"),
    };

    DeliveryResponse { status_code, body, duration, is_success }
}

#[cfg(test)]
mod tests {
    use blackbox_core::TestClock;
    use serde_json::json;
    use wiremock::{
        matchers::{header_exists, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    fn test_client() -> DeliveryClient {
        DeliveryClient::new(ClientConfig::default(), Arc::new(TestClock::new()))
            .expect("client builds")
    }

    #[tokio::test]
    async fn post_reports_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header_exists("X-Blackbox-Delivery-Attempt"))
            .respond_with(ResponseTemplate::new(202).set_body_string("queued"))
            .expect(1)
            .mount(&server)
            .await;

        let response = test_client()
            .post(&format!("{}/hook", server.uri()), &json!({"event": "lead.created"}), 1)
            .await
            .expect("request completes");

        assert_eq!(response.status_code, 202);
        assert_eq!(response.body, "queued");
        assert!(response.is_success);
    }

    #[tokio::test]
    async fn non_success_status_becomes_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad lead"))
            .mount(&server)
            .await;

        let result = test_client()
            .post(&server.uri(), &json!({}), 1)
            .await
            .and_then(DeliveryResponse::into_result);

        assert!(matches!(result, Err(DeliveryError::ClientError { status_code: 422, .. })));
    }

    #[tokio::test]
    async fn long_bodies_are_truncated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("x".repeat(4096)))
            .mount(&server)
            .await;

        let response = test_client().post(&server.uri(), &json!({}), 1).await.expect("response");

        assert!(response.body.ends_with("... (truncated)"));
        assert!(response.body.len() < 4096);
    }

    #[tokio::test]
    async fn zero_retries_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let delivered =
            test_client().dispatch(&server.uri(), &json!({}), 0, Duration::from_millis(1)).await;

        assert!(!delivered);
    }
}
