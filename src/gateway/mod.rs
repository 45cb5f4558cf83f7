//! External payment gateway: wire types, the HTTP client, webhook signature
//! checks and an in-process stand-in for tests.

pub mod client;
pub mod mock;
pub mod webhook;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub use client::{RetryPolicy, StripeClient};
pub use mock::MockGateway;

pub const METADATA_BOOKING_ID: &str = "bookingId";
pub const METADATA_USER_EMAIL: &str = "userEmail";
pub const METADATA_TICKET_TITLE: &str = "ticketTitle";

/// `pi_` followed by ASCII letters, digits or underscores. Anything else is
/// never sent to the gateway, since ids end up in request paths.
pub fn is_payment_intent_id(id: &str) -> bool {
    match id.strip_prefix("pi_") {
        Some(rest) => !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
        None => false,
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway refused the request (declined card, invalid parameters).
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("resource not found: {0}")]
    NotFound(String),

    /// Network failure, timeout, rate limit or 5xx. Safe to retry.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("circuit breaker open")]
    CircuitOpen,

    #[error("invalid response from gateway: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }

    /// What the consumer is shown. Gateway refusals are passed through as-is.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Rejected { message, .. } => message.clone(),
            GatewayError::NotFound(_) => "Payment not found at gateway".to_string(),
            GatewayError::Unavailable(_) | GatewayError::CircuitOpen => {
                "Payment gateway is temporarily unavailable, please retry".to_string()
            }
            GatewayError::InvalidResponse(_) => {
                "Payment gateway returned an unexpected response".to_string()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentIntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Canceled,
    Succeeded,
    #[serde(other)]
    Unknown,
}

impl PaymentIntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentIntentStatus::RequiresPaymentMethod => "requires_payment_method",
            PaymentIntentStatus::RequiresConfirmation => "requires_confirmation",
            PaymentIntentStatus::RequiresAction => "requires_action",
            PaymentIntentStatus::Processing => "processing",
            PaymentIntentStatus::RequiresCapture => "requires_capture",
            PaymentIntentStatus::Canceled => "canceled",
            PaymentIntentStatus::Succeeded => "succeeded",
            PaymentIntentStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PaymentIntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    /// Minor currency units.
    pub amount: i64,
    pub currency: String,
    pub status: PaymentIntentStatus,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Unix seconds.
    pub created: i64,
}

impl PaymentIntent {
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntentRequest {
    pub amount: i64,
    pub currency: String,
    /// Sent as the gateway's `Idempotency-Key` so retried creations collapse
    /// into one intent.
    pub idempotency_key: String,
    pub metadata: Vec<(String, String)>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntentPage {
    pub data: Vec<PaymentIntent>,
    #[serde(default)]
    pub has_more: bool,
}
