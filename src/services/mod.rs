//! Workflow services. Each one owns the rules of one component and talks to
//! storage and the payment gateway only through the ports.

pub mod inventory;
pub mod reservation;
pub mod settlement;
pub mod users;

pub use inventory::{InventoryService, TicketFilters, TicketUpdate};
pub use reservation::{BookingDecision, ReservationService, RevenueSummary};
pub use settlement::{PaymentIntentCreated, SettlementService, TransactionSummary};
pub use users::{Registration, UserDirectory, UserUpdate};

use chrono::{DateTime, Utc};

use crate::domain::{Role, User};
use crate::error::AppError;

/// Fails with `Forbidden` unless `user` holds one of `roles`.
pub fn require_role(user: &User, roles: &[Role], action: &str) -> Result<(), AppError> {
    if roles.contains(&user.role) {
        return Ok(());
    }

    Err(AppError::Forbidden(format!(
        "{} role cannot {}",
        user.role, action
    )))
}

pub fn require_admin(user: &User, action: &str) -> Result<(), AppError> {
    require_role(user, &[Role::Admin], action)
}

/// Fails with `DepartureClosed` once `departs_at` is not in the future.
pub fn ensure_not_departed(departs_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), AppError> {
    if departs_at <= now {
        return Err(AppError::DepartureClosed);
    }
    Ok(())
}
