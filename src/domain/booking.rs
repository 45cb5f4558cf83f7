//! Bookings: a consumer's claim on seats of one ticket.

use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ticket::{clock_time, departure_instant};
use super::{normalize_money, to_minor_units, InvalidTransition, Ticket, TransportType, UnknownVariant, User};
use crate::validation::{validate_min, ValidationResult};

/// `pending -> accepted -> paid`, `pending -> rejected`, and consumer/admin
/// cancellation out of `pending` or `accepted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Accepted,
    Rejected,
    Paid,
    Cancelled,
}

impl BookingStatus {
    /// Statuses whose seats are still held against the ticket.
    pub const HOLDING: [BookingStatus; 3] = [
        BookingStatus::Pending,
        BookingStatus::Accepted,
        BookingStatus::Paid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Paid => "paid",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Rejected | BookingStatus::Paid | BookingStatus::Cancelled
        )
    }

    pub fn holds_seats(&self) -> bool {
        Self::HOLDING.contains(self)
    }

    pub fn allowed_sources(target: BookingStatus) -> &'static [BookingStatus] {
        match target {
            BookingStatus::Pending => &[],
            BookingStatus::Accepted | BookingStatus::Rejected => &[BookingStatus::Pending],
            BookingStatus::Paid => &[BookingStatus::Accepted],
            BookingStatus::Cancelled => &[BookingStatus::Pending, BookingStatus::Accepted],
        }
    }

    pub fn transition_to(self, target: BookingStatus) -> Result<(), InvalidTransition> {
        if Self::allowed_sources(target).contains(&self) {
            Ok(())
        } else {
            Err(InvalidTransition {
                entity: "booking",
                from: self.as_str(),
                to: target.as_str(),
            })
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "accepted" => Ok(BookingStatus::Accepted),
            "rejected" => Ok(BookingStatus::Rejected),
            "paid" => Ok(BookingStatus::Paid),
            "cancelled" => Ok(BookingStatus::Cancelled),
            _ => Err(UnknownVariant {
                kind: "booking status",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: Uuid,
    pub consumer_id: String,
    pub consumer_email: String,
    pub consumer_name: Option<String>,
    pub ticket_id: Uuid,
    pub vendor_id: String,
    pub ticket_title: String,
    pub transport_type: TransportType,
    pub from: String,
    pub to: String,
    pub departure_date: NaiveDate,
    #[serde(with = "clock_time")]
    pub departure_time: NaiveTime,
    pub number_of_seats: i32,
    pub price_per_seat: BigDecimal,
    pub total_price: BigDecimal,
    pub status: BookingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub payment_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Builds a pending booking, snapshotting the ticket's price and schedule.
    /// Seats are consumed separately, by the store's atomic reservation.
    pub fn request(consumer: &User, ticket: &Ticket, number_of_seats: i32) -> Self {
        let now = Utc::now();
        let price_per_seat = normalize_money(&ticket.price);
        let total_price = normalize_money(&(price_per_seat.clone() * BigDecimal::from(number_of_seats)));

        Self {
            id: Uuid::new_v4(),
            consumer_id: consumer.id.clone(),
            consumer_email: consumer.email.clone(),
            consumer_name: Some(consumer.name.clone()),
            ticket_id: ticket.id,
            vendor_id: ticket.vendor_id.clone(),
            ticket_title: ticket.title.clone(),
            transport_type: ticket.transport_type,
            from: ticket.route.from.clone(),
            to: ticket.route.to.clone(),
            departure_date: ticket.schedule.departure_date,
            departure_time: ticket.schedule.departure_time,
            number_of_seats,
            price_per_seat,
            total_price,
            status: BookingStatus::Pending,
            rejection_reason: None,
            payment_id: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate_seat_count(number_of_seats: i32) -> ValidationResult {
        validate_min("numberOfSeats", number_of_seats, 1)
    }

    /// The authoritative charge, in gateway minor units.
    pub fn amount_minor_units(&self) -> Option<i64> {
        to_minor_units(&self.total_price)
    }

    pub fn departs_at(&self, offset: FixedOffset) -> DateTime<Utc> {
        departure_instant(self.departure_date, self.departure_time, offset)
    }
}
