//! Settlement of accepted bookings against the external payment gateway.
//!
//! The amount charged is always recomputed from the stored booking. A booking
//! becomes `paid` only after the gateway itself reports the intent succeeded,
//! and the `accepted -> paid` transition doubles as the idempotency guard:
//! a repeated confirmation of the same intent returns the paid booking and
//! changes nothing.

use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::{ensure_not_departed, require_role};
use crate::config::CoreSettings;
use crate::domain::{from_minor_units, Booking, BookingStatus, Role, User};
use crate::error::AppError;
use crate::gateway::webhook::{WebhookEvent, PAYMENT_SUCCEEDED_EVENT};
use crate::gateway::{
    is_payment_intent_id, GatewayError, PaymentIntent, PaymentIntentRequest, PaymentIntentStatus, METADATA_BOOKING_ID,
    METADATA_TICKET_TITLE, METADATA_USER_EMAIL,
};
use crate::ports::{BookingRepository, PaymentGateway, RepositoryError};
use crate::validation::ValidationError;

pub const HISTORY_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntentCreated {
    pub client_secret: String,
    pub payment_intent_id: String,
    pub amount: BigDecimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
    pub id: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub ticket_title: Option<String>,
    pub booking_id: Option<String>,
    pub payment_date: DateTime<Utc>,
    pub status: PaymentIntentStatus,
}

impl TransactionSummary {
    fn from_intent(intent: &PaymentIntent) -> Self {
        Self {
            id: intent.id.clone(),
            amount: from_minor_units(intent.amount),
            currency: intent.currency.clone(),
            ticket_title: intent.metadata_value(METADATA_TICKET_TITLE).map(str::to_string),
            booking_id: intent.metadata_value(METADATA_BOOKING_ID).map(str::to_string),
            payment_date: Utc
                .timestamp_opt(intent.created, 0)
                .single()
                .unwrap_or_else(Utc::now),
            status: intent.status,
        }
    }
}

pub fn idempotency_key(booking_id: Uuid, amount_minor: i64) -> String {
    format!("booking-{}-{}", booking_id, amount_minor)
}

pub struct SettlementService {
    bookings: Arc<dyn BookingRepository>,
    gateway: Arc<dyn PaymentGateway>,
    settings: CoreSettings,
}

impl SettlementService {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        gateway: Arc<dyn PaymentGateway>,
        settings: CoreSettings,
    ) -> Self {
        Self {
            bookings,
            gateway,
            settings,
        }
    }

    pub async fn create_payment_intent(
        &self,
        consumer: &User,
        booking_id: Uuid,
    ) -> Result<PaymentIntentCreated, AppError> {
        let booking = self.load_own_booking(consumer, booking_id).await?;

        match booking.status {
            BookingStatus::Accepted => {}
            BookingStatus::Paid => {
                return Err(AppError::InvalidTransition(
                    "booking is already paid".to_string(),
                ))
            }
            other => {
                return Err(AppError::InvalidTransition(format!(
                    "booking is {}; only accepted bookings can be paid",
                    other
                )))
            }
        }
        ensure_not_departed(booking.departs_at(self.settings.departure_offset), Utc::now())?;

        let amount = booking.amount_minor_units().ok_or_else(|| {
            AppError::Internal(format!("booking {} total does not fit minor units", booking.id))
        })?;
        let request = PaymentIntentRequest {
            amount,
            currency: self.settings.currency.clone(),
            idempotency_key: idempotency_key(booking.id, amount),
            metadata: vec![
                (METADATA_BOOKING_ID.to_string(), booking.id.to_string()),
                (METADATA_USER_EMAIL.to_string(), booking.consumer_email.clone()),
                (METADATA_TICKET_TITLE.to_string(), booking.ticket_title.clone()),
            ],
        };

        let intent = self.gateway.create_payment_intent(&request).await?;
        let client_secret = intent.client_secret.clone().ok_or_else(|| {
            GatewayError::InvalidResponse("payment intent has no client secret".to_string())
        })?;

        tracing::info!(
            booking_id = %booking.id,
            payment_intent_id = %intent.id,
            amount_minor = amount,
            "Payment intent created"
        );
        Ok(PaymentIntentCreated {
            client_secret,
            payment_intent_id: intent.id,
            amount: booking.total_price,
            currency: intent.currency,
        })
    }

    /// Consumer-initiated confirmation after the client finished payment.
    pub async fn confirm_payment(
        &self,
        consumer: &User,
        payment_intent_id: &str,
        booking_id: Uuid,
    ) -> Result<Booking, AppError> {
        let payment_intent_id = payment_intent_id.trim();
        if payment_intent_id.is_empty() {
            return Err(ValidationError::new("paymentIntentId", "must not be empty").into());
        }
        if !is_payment_intent_id(payment_intent_id) {
            return Err(ValidationError::new("paymentIntentId", "is not a payment intent id").into());
        }
        let booking = self.load_own_booking(consumer, booking_id).await?;
        self.settle(booking, payment_intent_id, true).await
    }

    /// Gateway-initiated confirmation. Events other than a succeeded intent,
    /// or intents not tied to a known booking, are acknowledged and ignored.
    pub async fn confirm_from_webhook(&self, event: &WebhookEvent) -> Result<Option<Booking>, AppError> {
        if event.event_type != PAYMENT_SUCCEEDED_EVENT {
            tracing::debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event");
            return Ok(None);
        }

        let intent = &event.data.object;
        let Some(booking_id) = intent
            .metadata_value(METADATA_BOOKING_ID)
            .and_then(|raw| Uuid::parse_str(raw).ok())
        else {
            tracing::warn!(event_id = %event.id, payment_intent_id = %intent.id, "Webhook intent carries no booking id");
            return Ok(None);
        };

        let booking = match self.bookings.get_by_id(booking_id).await {
            Ok(booking) => booking,
            Err(RepositoryError::NotFound { .. }) => {
                tracing::warn!(event_id = %event.id, booking_id = %booking_id, "Webhook references unknown booking");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        // Funds are already captured by the time the gateway reports success.
        self.settle(booking, &intent.id, false).await.map(Some)
    }

    /// Succeeded charges made under `email`, newest first. Scans a bounded
    /// number of gateway pages.
    pub async fn payment_history(
        &self,
        caller: &User,
        email: &str,
    ) -> Result<Vec<TransactionSummary>, AppError> {
        if !caller.is_admin() && !caller.email.eq_ignore_ascii_case(email) {
            return Err(AppError::Forbidden(
                "payment history is only visible to its owner".to_string(),
            ));
        }

        let mut summaries = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..self.settings.history_max_pages {
            let page = self
                .gateway
                .list_payment_intents(HISTORY_PAGE_SIZE, cursor.as_deref())
                .await?;

            summaries.extend(
                page.data
                    .iter()
                    .filter(|intent| intent.status == PaymentIntentStatus::Succeeded)
                    .filter(|intent| {
                        intent
                            .metadata_value(METADATA_USER_EMAIL)
                            .map(|owner| owner.eq_ignore_ascii_case(email))
                            .unwrap_or(false)
                    })
                    .map(TransactionSummary::from_intent),
            );

            cursor = page.data.last().map(|intent| intent.id.clone());
            if !page.has_more || cursor.is_none() {
                break;
            }
        }

        Ok(summaries)
    }

    async fn load_own_booking(&self, consumer: &User, booking_id: Uuid) -> Result<Booking, AppError> {
        require_role(consumer, &[Role::Consumer], "pay for bookings")?;
        let booking = self.bookings.get_by_id(booking_id).await?;
        if booking.consumer_id != consumer.id {
            return Err(AppError::Forbidden("not your booking".to_string()));
        }
        Ok(booking)
    }

    async fn settle(
        &self,
        booking: Booking,
        payment_intent_id: &str,
        enforce_departure: bool,
    ) -> Result<Booking, AppError> {
        if let Some(done) = already_settled(&booking, payment_intent_id)? {
            return Ok(done);
        }
        if booking.status != BookingStatus::Accepted {
            return Err(booking.status.transition_to(BookingStatus::Paid).err().map_or_else(
                || AppError::InvalidTransition("booking is not payable".to_string()),
                AppError::from,
            ));
        }
        if enforce_departure {
            ensure_not_departed(booking.departs_at(self.settings.departure_offset), Utc::now())?;
        }

        let intent = self.gateway.retrieve_payment_intent(payment_intent_id).await?;
        verify_intent(&booking, &intent)?;

        let paid_at = Utc::now();
        match self.bookings.mark_paid(booking.id, &intent.id, paid_at).await? {
            Some(paid) => {
                tracing::info!(
                    booking_id = %paid.id,
                    payment_intent_id = %intent.id,
                    from = "accepted",
                    to = "paid",
                    "Booking paid"
                );
                Ok(paid)
            }
            // Lost a race with another confirmation; accept it if it settled
            // with the same intent.
            None => {
                let current = self.bookings.get_by_id(booking.id).await?;
                already_settled(&current, &intent.id)?.ok_or_else(|| {
                    AppError::InvalidTransition(format!(
                        "booking is {}; only accepted bookings can be paid",
                        current.status
                    ))
                })
            }
        }
    }
}

/// `Some` when the booking is already paid by this intent; an error when it
/// is paid by a different one.
fn already_settled(booking: &Booking, payment_intent_id: &str) -> Result<Option<Booking>, AppError> {
    if booking.status != BookingStatus::Paid {
        return Ok(None);
    }
    if booking.payment_id.as_deref() == Some(payment_intent_id) {
        return Ok(Some(booking.clone()));
    }
    Err(AppError::InvalidTransition(
        "booking is already paid with a different payment".to_string(),
    ))
}

fn verify_intent(booking: &Booking, intent: &PaymentIntent) -> Result<(), AppError> {
    if intent.status != PaymentIntentStatus::Succeeded {
        return Err(AppError::PaymentNotCompleted(intent.status.to_string()));
    }

    let booking_id = booking.id.to_string();
    if intent.metadata_value(METADATA_BOOKING_ID) != Some(booking_id.as_str()) {
        return Err(ValidationError::new(
            "paymentIntentId",
            "payment intent does not belong to this booking",
        )
        .into());
    }

    if Some(intent.amount) != booking.amount_minor_units() {
        tracing::error!(
            booking_id = %booking.id,
            payment_intent_id = %intent.id,
            intent_amount = intent.amount,
            "Payment intent amount does not match booking total"
        );
        return Err(ValidationError::new(
            "paymentIntentId",
            "payment amount does not match the booking total",
        )
        .into());
    }

    Ok(())
}
