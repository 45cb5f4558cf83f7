use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::{is_payment_intent_id, GatewayError, PaymentIntent, PaymentIntentPage, PaymentIntentRequest};
use crate::ports::PaymentGateway;

const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Retries for transient gateway failures, with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for a Stripe-compatible payment intents API.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    base_url: String,
    secret_key: String,
    retry: RetryPolicy,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl StripeClient {
    pub fn new(base_url: String, secret_key: String, timeout: Duration) -> Self {
        Self::with_policy(base_url, secret_key, timeout, RetryPolicy::default(), 5, 30)
    }

    /// Creates a client with explicit retry and circuit breaker settings.
    pub fn with_policy(
        base_url: String,
        secret_key: String,
        timeout: Duration,
        retry: RetryPolicy,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        StripeClient {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
            retry,
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Runs one logical gateway call: each attempt goes through the circuit
    /// breaker, transient failures are retried with backoff.
    async fn execute<T, F>(&self, operation: &'static str, build: F) -> Result<T, GatewayError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            let request = build();
            let result = self
                .circuit_breaker
                .call_with(is_transient_failure, send_once::<T>(request))
                .await;

            let err = match result {
                Ok(value) => return Ok(value),
                Err(FailsafeError::Rejected) => return Err(GatewayError::CircuitOpen),
                Err(FailsafeError::Inner(e)) => e,
            };

            if !err.is_transient() || attempt >= self.retry.max_retries {
                return Err(err);
            }

            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                operation,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying payment gateway call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn is_transient_failure(err: &GatewayError) -> bool {
    err.is_transient()
}

async fn send_once<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, GatewayError> {
    let response = request
        .send()
        .await
        .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()));
    }

    let message = response
        .json::<ErrorEnvelope>()
        .await
        .ok()
        .and_then(|envelope| envelope.error.message)
        .unwrap_or_else(|| format!("gateway returned {}", status));

    Err(match status {
        StatusCode::NOT_FOUND => GatewayError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => GatewayError::Unavailable(message),
        s if s.is_server_error() => GatewayError::Unavailable(message),
        s => GatewayError::Rejected {
            status: s.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl PaymentGateway for StripeClient {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        let mut form = vec![
            ("amount".to_string(), request.amount.to_string()),
            ("currency".to_string(), request.currency.clone()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        let url = self.url("/v1/payment_intents");
        self.execute("create_payment_intent", || {
            self.client
                .post(&url)
                .bearer_auth(&self.secret_key)
                .header("Idempotency-Key", &request.idempotency_key)
                .form(&form)
        })
        .await
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError> {
        if !is_payment_intent_id(id) {
            return Err(GatewayError::NotFound(format!("No such payment_intent: {}", id)));
        }
        let url = self.url(&format!("/v1/payment_intents/{}", id));
        self.execute("retrieve_payment_intent", || {
            self.client.get(&url).bearer_auth(&self.secret_key)
        })
        .await
    }

    async fn list_payment_intents(
        &self,
        limit: u32,
        starting_after: Option<&str>,
    ) -> Result<PaymentIntentPage, GatewayError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(cursor) = starting_after {
            query.push(("starting_after", cursor.to_string()));
        }

        let url = self.url("/v1/payment_intents");
        self.execute("list_payment_intents", || {
            self.client
                .get(&url)
                .bearer_auth(&self.secret_key)
                .query(&query)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::PaymentIntentStatus;

    fn fast_client(url: String) -> StripeClient {
        StripeClient::with_policy(
            url,
            "sk_test_123".to_string(),
            Duration::from_secs(5),
            RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
            },
            10,
            30,
        )
    }

    const INTENT_BODY: &str = r#"{
        "id": "pi_123",
        "amount": 160000,
        "currency": "bdt",
        "status": "requires_payment_method",
        "client_secret": "pi_123_secret_abc",
        "metadata": {"bookingId": "b-1"},
        "created": 1700000000
    }"#;

    #[test]
    fn backoff_grows_exponentially_and_is_capped() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(20), MAX_BACKOFF);
    }

    #[test]
    fn test_client_starts_closed() {
        let client = StripeClient::new(
            "https://api.stripe.com/".to_string(),
            "sk_test".to_string(),
            Duration::from_secs(10),
        );
        assert_eq!(client.base_url, "https://api.stripe.com");
        assert_eq!(client.circuit_state(), "closed");
    }

    #[tokio::test]
    async fn test_create_payment_intent_sends_form_and_idempotency_key() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/payment_intents")
            .match_header("authorization", "Bearer sk_test_123")
            .match_header("idempotency-key", "booking-b-1-160000")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("amount".into(), "160000".into()),
                mockito::Matcher::UrlEncoded("currency".into(), "bdt".into()),
                mockito::Matcher::UrlEncoded("metadata[bookingId]".into(), "b-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(INTENT_BODY)
            .create_async()
            .await;

        let client = fast_client(server.url());
        let intent = client
            .create_payment_intent(&PaymentIntentRequest {
                amount: 160_000,
                currency: "bdt".to_string(),
                idempotency_key: "booking-b-1-160000".to_string(),
                metadata: vec![("bookingId".to_string(), "b-1".to_string())],
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(intent.id, "pi_123");
        assert_eq!(intent.client_secret.as_deref(), Some("pi_123_secret_abc"));
    }

    #[tokio::test]
    async fn test_retries_server_errors_then_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("GET", "/v1/payment_intents/pi_123")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let client = fast_client(server.url());
        let result = client.retrieve_payment_intent("pi_123").await;
        failing.assert_async().await;
        assert!(matches!(result, Err(GatewayError::Unavailable(_))));

        // Exhausted retries leave the error transient so the caller may retry later.
        assert!(result.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_does_not_retry_declines() {
        let mut server = mockito::Server::new_async().await;
        let declined = server
            .mock("POST", "/v1/payment_intents")
            .with_status(402)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": {"message": "Your card was declined."}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = fast_client(server.url());
        let result = client
            .create_payment_intent(&PaymentIntentRequest {
                amount: 100,
                currency: "bdt".to_string(),
                idempotency_key: "k".to_string(),
                metadata: vec![],
            })
            .await;

        declined.assert_async().await;
        assert_eq!(
            result.unwrap_err(),
            GatewayError::Rejected {
                status: 402,
                message: "Your card was declined.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_not_found_maps_to_not_found() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/payment_intents/pi_missing")
            .with_status(404)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": {"message": "No such payment_intent"}}"#)
            .create_async()
            .await;

        let client = fast_client(server.url());
        let result = client.retrieve_payment_intent("pi_missing").await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_malformed_intent_id_is_not_requested() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = fast_client(server.url());
        let result = client.retrieve_payment_intent("pi_1/../../v1/balance").await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_payment_intents_passes_cursor() {
        let mut server = mockito::Server::new_async().await;
        let body = format!(r#"{{"data": [{}], "has_more": true}}"#, INTENT_BODY);
        let mock = server
            .mock("GET", "/v1/payment_intents")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("limit".into(), "100".into()),
                mockito::Matcher::UrlEncoded("starting_after".into(), "pi_099".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let client = fast_client(server.url());
        let page = client.list_payment_intents(100, Some("pi_099")).await.unwrap();
        mock.assert_async().await;
        assert!(page.has_more);
        assert_eq!(page.data[0].status, PaymentIntentStatus::RequiresPaymentMethod);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_consecutive_failures() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r"^/v1/payment_intents/.*".into()))
            .with_status(500)
            .expect_at_least(3)
            .create_async()
            .await;

        let client = StripeClient::with_policy(
            server.url(),
            "sk_test".to_string(),
            Duration::from_secs(5),
            RetryPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
            },
            3,
            60,
        );

        for _ in 0..3 {
            let _ = client.retrieve_payment_intent("pi_1").await;
        }

        let result = client.retrieve_payment_intent("pi_1").await;
        assert_eq!(result.unwrap_err(), GatewayError::CircuitOpen);
        assert_eq!(client.circuit_state(), "open");
    }
}
