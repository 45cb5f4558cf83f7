//! Domain entities for the booking core.
//! Framework-agnostic: no sqlx, no axum.

pub mod booking;
pub mod ticket;
pub mod user;

use bigdecimal::{BigDecimal, ToPrimitive};
use thiserror::Error;

pub use booking::{Booking, BookingStatus};
pub use ticket::{NewTicket, Route, Schedule, Ticket, TicketStatus, TransportType};
pub use user::{Role, User};

/// A status change that the entity's state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{entity} cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub entity: &'static str,
    pub from: &'static str,
    pub to: &'static str,
}

/// Raised when a stored enum column holds a value the domain does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Money is kept with two decimal places everywhere.
pub fn normalize_money(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale(2)
}

/// Converts an amount to the gateway's integer minor units (paisa, cents).
pub fn to_minor_units(amount: &BigDecimal) -> Option<i64> {
    (amount.clone() * BigDecimal::from(100)).with_scale(0).to_i64()
}

pub fn from_minor_units(minor: i64) -> BigDecimal {
    (BigDecimal::from(minor) / BigDecimal::from(100)).with_scale(2)
}
