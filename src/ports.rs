//! Seams between the workflow services and their collaborators.
//!
//! Every method that changes seat counts, booking status or the advertising
//! counter is a single conditional operation in the store: the precondition is
//! checked by the same statement (or row-locked transaction) that writes.
//! Methods returning `Option` yield `None` when that precondition did not hold.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Booking, BookingStatus, Role, Ticket, TicketStatus, TransportType, UnknownVariant, User,
};
use crate::gateway::{GatewayError, PaymentIntent, PaymentIntentPage, PaymentIntentRequest};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("insufficient seats: requested {requested}, available {available}")]
    InsufficientSeats { requested: i32, available: i32 },

    #[error("advertising cap of {cap} reached")]
    AdvertisingCapReached { cap: i64 },

    #[error("{0}")]
    Conflict(String),

    #[error("stored data is invalid: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl RepositoryError {
    pub fn ticket_not_found(id: Uuid) -> Self {
        RepositoryError::NotFound {
            entity: "ticket",
            id: id.to_string(),
        }
    }

    pub fn booking_not_found(id: Uuid) -> Self {
        RepositoryError::NotFound {
            entity: "booking",
            id: id.to_string(),
        }
    }

    pub fn user_not_found(id: &str) -> Self {
        RepositoryError::NotFound {
            entity: "user",
            id: id.to_string(),
        }
    }
}

impl From<UnknownVariant> for RepositoryError {
    fn from(err: UnknownVariant) -> Self {
        RepositoryError::Corrupt(err.to_string())
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Which tickets a listing may include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Listable status and an unflagged vendor.
    Public,
    /// Moderation view: everything.
    All,
    /// Moderation view narrowed to one status.
    Status(TicketStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketSort {
    Newest,
    PriceAsc,
    PriceDesc,
    Departure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketQuery {
    pub visibility: Visibility,
    pub transport_type: Option<TransportType>,
    /// Case-insensitive substring of the origin.
    pub from: Option<String>,
    /// Case-insensitive substring of the destination.
    pub to: Option<String>,
    pub sort: TicketSort,
    pub limit: i64,
    pub offset: i64,
}

impl Default for TicketQuery {
    fn default() -> Self {
        Self {
            visibility: Visibility::Public,
            transport_type: None,
            from: None,
            to: None,
            sort: TicketSort::Newest,
            limit: 50,
            offset: 0,
        }
    }
}

#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn insert(&self, ticket: &Ticket) -> RepositoryResult<Ticket>;

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Ticket>;

    async fn list(&self, query: &TicketQuery) -> RepositoryResult<Vec<Ticket>>;

    async fn list_by_vendor(&self, vendor_id: &str) -> RepositoryResult<Vec<Ticket>>;

    /// Advertised tickets that are also publicly listable.
    async fn list_advertised(&self) -> RepositoryResult<Vec<Ticket>>;

    /// Moves the ticket to `to` only if its current status is one of `from`.
    async fn update_status(
        &self,
        id: Uuid,
        from: &[TicketStatus],
        to: TicketStatus,
        rejection_reason: Option<&str>,
    ) -> RepositoryResult<Option<Ticket>>;

    /// `update_status` and `claim_advertising_slot` as one step: when the
    /// claim is refused the status change is not kept either.
    async fn transition_and_advertise(
        &self,
        id: Uuid,
        from: &[TicketStatus],
        to: TicketStatus,
        cap: i64,
    ) -> RepositoryResult<Option<Ticket>>;

    /// Claims one of `cap` advertising slots for a listable ticket. Claiming an
    /// already advertised ticket is a no-op that consumes no slot.
    async fn claim_advertising_slot(&self, id: Uuid, cap: i64) -> RepositoryResult<Ticket>;

    /// Returns the ticket's slot, if it holds one.
    async fn release_advertising_slot(&self, id: Uuid) -> RepositoryResult<Ticket>;

    /// Deletes a ticket that has no seat-holding bookings.
    async fn delete(&self, id: Uuid) -> RepositoryResult<()>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Consumes `booking.number_of_seats` from the ticket and stores the
    /// booking in one atomic step. Fails with `InsufficientSeats` without
    /// writing anything when capacity is short.
    async fn reserve(&self, booking: &Booking) -> RepositoryResult<Booking>;

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Booking>;

    async fn list_all(&self, limit: i64, offset: i64) -> RepositoryResult<Vec<Booking>>;

    async fn list_by_consumer(&self, consumer_id: &str) -> RepositoryResult<Vec<Booking>>;

    async fn list_by_vendor(&self, vendor_id: &str) -> RepositoryResult<Vec<Booking>>;

    /// Status change with no inventory effect.
    async fn update_status(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> RepositoryResult<Option<Booking>>;

    /// Status change that hands the booking's seats back to its ticket,
    /// never raising `available_seats` above `total_seats`.
    async fn release(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
        reason: Option<&str>,
    ) -> RepositoryResult<Option<Booking>>;

    /// `accepted -> paid`, recording the gateway reference.
    async fn mark_paid(
        &self,
        id: Uuid,
        payment_id: &str,
        paid_at: DateTime<Utc>,
    ) -> RepositoryResult<Option<Booking>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Inserts the account or refreshes its profile fields. Role and fraud
    /// flag of an existing account are left untouched.
    async fn upsert(&self, user: &User) -> RepositoryResult<User>;

    async fn get_by_id(&self, id: &str) -> RepositoryResult<User>;

    async fn list(&self) -> RepositoryResult<Vec<User>>;

    async fn set_role(&self, id: &str, role: Role) -> RepositoryResult<User>;

    async fn set_fraud(&self, id: &str, is_fraud: bool) -> RepositoryResult<User>;
}

/// The external payment gateway, as the settlement adapter needs it.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, GatewayError>;

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError>;

    async fn list_payment_intents(
        &self,
        limit: u32,
        starting_after: Option<&str>,
    ) -> Result<PaymentIntentPage, GatewayError>;
}
