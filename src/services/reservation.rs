//! Booking lifecycle and the seat movements tied to it.

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{ensure_not_departed, require_admin, require_role};
use crate::config::CoreSettings;
use crate::domain::{normalize_money, Booking, BookingStatus, Role, User};
use crate::error::AppError;
use crate::ports::{BookingRepository, RepositoryError, TicketRepository, UserRepository};
use crate::validation::{sanitize_string, validate_max_len, ValidationError, REASON_MAX_LEN};

/// Body of `PUT /bookings/:id`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDecision {
    pub status: BookingStatus,
    #[serde(default, alias = "rejectionReason")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueSummary {
    pub total_revenue: BigDecimal,
    pub seats_sold: i64,
    pub paid_bookings: usize,
    pub tickets_added: usize,
    pub bookings_by_status: BTreeMap<String, usize>,
}

pub struct ReservationService {
    tickets: Arc<dyn TicketRepository>,
    bookings: Arc<dyn BookingRepository>,
    users: Arc<dyn UserRepository>,
    settings: CoreSettings,
}

impl ReservationService {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        bookings: Arc<dyn BookingRepository>,
        users: Arc<dyn UserRepository>,
        settings: CoreSettings,
    ) -> Self {
        Self {
            tickets,
            bookings,
            users,
            settings,
        }
    }

    /// Reserves `number_of_seats` on a listed ticket. The seat check and the
    /// decrement happen in one store operation; this is the only place seats
    /// are ever consumed.
    pub async fn create_booking(
        &self,
        consumer: &User,
        ticket_id: Uuid,
        number_of_seats: i32,
    ) -> Result<Booking, AppError> {
        require_role(consumer, &[Role::Consumer], "book tickets")?;
        Booking::validate_seat_count(number_of_seats)?;

        let ticket = self.tickets.get_by_id(ticket_id).await?;
        let vendor_flagged = match self.users.get_by_id(&ticket.vendor_id).await {
            Ok(vendor) => vendor.is_flagged(),
            Err(RepositoryError::NotFound { .. }) => false,
            Err(e) => return Err(e.into()),
        };
        if !ticket.is_publicly_listable(vendor_flagged) {
            return Err(RepositoryError::ticket_not_found(ticket_id).into());
        }
        ensure_not_departed(ticket.departs_at(self.settings.departure_offset), Utc::now())?;

        let booking = Booking::request(consumer, &ticket, number_of_seats);
        if booking.amount_minor_units().is_none() {
            return Err(ValidationError::new("numberOfSeats", "total price is too large to charge").into());
        }
        let booking = self.bookings.reserve(&booking).await.map_err(|e| {
            if let RepositoryError::InsufficientSeats { requested, available } = &e {
                tracing::info!(
                    ticket_id = %ticket_id,
                    requested,
                    available,
                    "Booking refused: insufficient seats"
                );
            }
            AppError::from(e)
        })?;

        tracing::info!(
            booking_id = %booking.id,
            ticket_id = %ticket_id,
            consumer_id = %consumer.id,
            seats = number_of_seats,
            total_price = %booking.total_price,
            "Booking created"
        );
        Ok(booking)
    }

    pub async fn accept_booking(&self, vendor: &User, id: Uuid) -> Result<Booking, AppError> {
        self.load_for_vendor(vendor, id).await?;

        let target = BookingStatus::Accepted;
        match self
            .bookings
            .update_status(id, BookingStatus::allowed_sources(target), target)
            .await?
        {
            Some(booking) => {
                tracing::info!(booking_id = %id, vendor_id = %vendor.id, from = "pending", to = "accepted", "Booking accepted");
                Ok(booking)
            }
            None => Err(self.refused(id, target).await),
        }
    }

    /// Refuses a pending booking and hands its seats back to the ticket in
    /// the same step.
    pub async fn reject_booking(
        &self,
        vendor: &User,
        id: Uuid,
        reason: Option<&str>,
    ) -> Result<Booking, AppError> {
        self.load_for_vendor(vendor, id).await?;

        let reason = reason.map(sanitize_string).filter(|r| !r.is_empty());
        if let Some(reason) = &reason {
            validate_max_len("reason", reason, REASON_MAX_LEN)?;
        }

        let target = BookingStatus::Rejected;
        match self
            .bookings
            .release(id, BookingStatus::allowed_sources(target), target, reason.as_deref())
            .await?
        {
            Some(booking) => {
                tracing::info!(
                    booking_id = %id,
                    vendor_id = %vendor.id,
                    seats_restored = booking.number_of_seats,
                    "Booking rejected"
                );
                Ok(booking)
            }
            None => Err(self.refused(id, target).await),
        }
    }

    /// Applies a vendor decision from `PUT /bookings/:id`.
    pub async fn decide(
        &self,
        vendor: &User,
        id: Uuid,
        decision: BookingDecision,
    ) -> Result<Booking, AppError> {
        match decision.status {
            BookingStatus::Accepted => self.accept_booking(vendor, id).await,
            BookingStatus::Rejected => self.reject_booking(vendor, id, decision.reason.as_deref()).await,
            other => Err(ValidationError::new(
                "status",
                format!("vendors may only accept or reject bookings, not mark them {}", other),
            )
            .into()),
        }
    }

    /// Withdraws a booking that is not yet paid and restores its seats.
    pub async fn cancel_booking(&self, caller: &User, id: Uuid) -> Result<Booking, AppError> {
        let booking = self.bookings.get_by_id(id).await?;
        if !caller.is_admin() && booking.consumer_id != caller.id {
            return Err(AppError::Forbidden(
                "only the booking's consumer or an admin can cancel it".to_string(),
            ));
        }
        if booking.status == BookingStatus::Paid {
            return Err(AppError::InvalidTransition(
                "paid bookings cannot be cancelled; request a refund instead".to_string(),
            ));
        }

        let target = BookingStatus::Cancelled;
        match self
            .bookings
            .release(id, BookingStatus::allowed_sources(target), target, None)
            .await?
        {
            Some(booking) => {
                tracing::info!(
                    booking_id = %id,
                    actor_id = %caller.id,
                    seats_restored = booking.number_of_seats,
                    "Booking cancelled"
                );
                Ok(booking)
            }
            None => Err(self.refused(id, target).await),
        }
    }

    pub async fn get_booking(&self, caller: &User, id: Uuid) -> Result<Booking, AppError> {
        let booking = self.bookings.get_by_id(id).await?;
        let allowed = caller.is_admin()
            || booking.consumer_id == caller.id
            || (caller.role == Role::Vendor && booking.vendor_id == caller.id);
        if !allowed {
            return Err(AppError::Forbidden("not your booking".to_string()));
        }
        Ok(booking)
    }

    pub async fn list_all(&self, admin: &User, limit: i64, offset: i64) -> Result<Vec<Booking>, AppError> {
        require_admin(admin, "list all bookings")?;
        Ok(self
            .bookings
            .list_all(limit.clamp(1, 100), offset.max(0))
            .await?)
    }

    pub async fn list_mine(&self, consumer: &User) -> Result<Vec<Booking>, AppError> {
        Ok(self.bookings.list_by_consumer(&consumer.id).await?)
    }

    pub async fn list_requested(&self, vendor: &User) -> Result<Vec<Booking>, AppError> {
        require_role(vendor, &[Role::Vendor], "list booking requests")?;
        Ok(self.bookings.list_by_vendor(&vendor.id).await?)
    }

    pub async fn revenue(&self, vendor: &User) -> Result<RevenueSummary, AppError> {
        require_role(vendor, &[Role::Vendor], "view revenue")?;

        let bookings = self.bookings.list_by_vendor(&vendor.id).await?;
        let tickets = self.tickets.list_by_vendor(&vendor.id).await?;

        let mut summary = RevenueSummary {
            total_revenue: BigDecimal::from(0),
            seats_sold: 0,
            paid_bookings: 0,
            tickets_added: tickets.len(),
            bookings_by_status: BTreeMap::new(),
        };
        for booking in &bookings {
            *summary
                .bookings_by_status
                .entry(booking.status.to_string())
                .or_insert(0) += 1;
            if booking.status == BookingStatus::Paid {
                summary.total_revenue = &summary.total_revenue + &booking.total_price;
                summary.seats_sold += i64::from(booking.number_of_seats);
                summary.paid_bookings += 1;
            }
        }
        summary.total_revenue = normalize_money(&summary.total_revenue);

        Ok(summary)
    }

    async fn load_for_vendor(&self, vendor: &User, id: Uuid) -> Result<Booking, AppError> {
        require_role(vendor, &[Role::Vendor], "decide on bookings")?;
        let booking = self.bookings.get_by_id(id).await?;
        if booking.vendor_id != vendor.id {
            return Err(AppError::Forbidden(
                "only the vendor who owns the ticket can decide on this booking".to_string(),
            ));
        }
        Ok(booking)
    }

    async fn refused(&self, id: Uuid, target: BookingStatus) -> AppError {
        match self.bookings.get_by_id(id).await {
            Ok(current) => match current.status.transition_to(target) {
                Err(refused) => refused.into(),
                Ok(()) => AppError::InvalidTransition(format!(
                    "booking {} changed concurrently, retry",
                    id
                )),
            },
            Err(e) => e.into(),
        }
    }
}
