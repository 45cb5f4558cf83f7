use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::JsonBody;
use crate::error::AppError;
use crate::gateway::webhook::{
    verify_signature, SignatureError, WebhookEvent, DEFAULT_TOLERANCE_SECS,
    PAYMENT_SUCCEEDED_EVENT, SIGNATURE_HEADER,
};
use crate::middleware::Caller;
use crate::validation::ValidationError;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub booking_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPaymentRequest {
    pub payment_intent_id: String,
    pub booking_id: Uuid,
}

pub async fn create_payment_intent(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(request): JsonBody<CreateIntentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let created = state
        .settlement
        .create_payment_intent(&caller.user, request.booking_id)
        .await?;
    Ok(Json(created))
}

pub async fn confirm_payment(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(request): JsonBody<ConfirmPaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    let booking = state
        .settlement
        .confirm_payment(&caller.user, &request.payment_intent_id, request.booking_id)
        .await?;
    Ok(Json(json!({ "success": true, "booking": booking })))
}

pub async fn payment_history(
    State(state): State<AppState>,
    caller: Caller,
    Path(email): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let history = state
        .settlement
        .payment_history(&caller.user, email.trim())
        .await?;
    Ok(Json(history))
}

/// Gateway-signed event delivery. Business refusals are acknowledged so the
/// gateway stops redelivering; only server-side failures ask for a retry.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let Some(secret) = state.webhook_secret.as_deref() else {
        return Err(AppError::NotFound("webhook endpoint is not configured".to_string()));
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(SignatureError::MissingHeader)
        .and_then(|header| {
            verify_signature(secret, &body, header, Utc::now().timestamp(), DEFAULT_TOLERANCE_SECS)
        });
    if let Err(e) = signature {
        tracing::warn!(error = %e, "Rejected webhook delivery");
        return Err(ValidationError::new("Stripe-Signature", e.to_string()).into());
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ValidationError::new("body", format!("invalid event payload: {}", e)))?;
    let event_type = payload
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default();
    if event_type != PAYMENT_SUCCEEDED_EVENT {
        tracing::debug!(event_type = %event_type, "Acknowledged unhandled webhook event");
        return Ok(Json(json!({ "received": true })));
    }

    let event: WebhookEvent = serde_json::from_value(payload)
        .map_err(|e| ValidationError::new("body", format!("invalid event payload: {}", e)))?;

    match state.settlement.confirm_from_webhook(&event).await {
        Ok(Some(booking)) => Ok(Json(json!({ "received": true, "bookingId": booking.id }))),
        Ok(None) => Ok(Json(json!({ "received": true }))),
        Err(e) if e.status_code().is_server_error() => Err(e),
        Err(e) => {
            tracing::warn!(event_id = %event.id, error = %e, "Webhook event not applied");
            Ok(Json(json!({ "received": true, "ignored": e.to_string() })))
        }
    }
}
