//! Postgres implementation of BookingRepository.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::postgres_ticket_repository::status_list;
use crate::domain::{Booking, BookingStatus, TicketStatus, TransportType};
use crate::ports::{BookingRepository, RepositoryError, RepositoryResult};

const BOOKING_COLUMNS: &str = "id, consumer_id, consumer_email, consumer_name, ticket_id, \
    vendor_id, ticket_title, transport_type, route_from, route_to, departure_date, \
    departure_time, number_of_seats, price_per_seat, total_price, status, rejection_reason, \
    payment_id, paid_at, created_at, updated_at";

/// Postgres-backed booking repository. Seat movements and the booking
/// status change they belong to always commit together.
#[derive(Clone)]
pub struct PostgresBookingRepository {
    pool: PgPool,
}

impl PostgresBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingRepository for PostgresBookingRepository {
    async fn reserve(&self, booking: &Booking) -> RepositoryResult<Booking> {
        let mut tx = self.pool.begin().await?;

        let remaining: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE tickets
            SET available_seats = available_seats - $2, updated_at = NOW()
            WHERE id = $1 AND available_seats >= $2 AND status IN ('approved', 'active')
            RETURNING available_seats
            "#,
        )
        .bind(booking.ticket_id)
        .bind(booking.number_of_seats)
        .fetch_optional(&mut *tx)
        .await?;

        if remaining.is_none() {
            let current: Option<(String, i32)> =
                sqlx::query_as("SELECT status, available_seats FROM tickets WHERE id = $1")
                    .bind(booking.ticket_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            return Err(match current {
                None => RepositoryError::ticket_not_found(booking.ticket_id),
                Some((status, _)) if !status.parse::<TicketStatus>()?.is_listable() => {
                    RepositoryError::Conflict(format!("ticket is {} and not open for booking", status))
                }
                Some((_, available)) => RepositoryError::InsufficientSeats {
                    requested: booking.number_of_seats,
                    available,
                },
            });
        }

        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            INSERT INTO bookings (
                id, consumer_id, consumer_email, consumer_name, ticket_id,
                vendor_id, ticket_title, transport_type, route_from, route_to,
                departure_date, departure_time, number_of_seats, price_per_seat, total_price,
                status, rejection_reason, payment_id, paid_at, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21)
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(booking.id)
        .bind(&booking.consumer_id)
        .bind(&booking.consumer_email)
        .bind(&booking.consumer_name)
        .bind(booking.ticket_id)
        .bind(&booking.vendor_id)
        .bind(&booking.ticket_title)
        .bind(booking.transport_type.as_str())
        .bind(&booking.from)
        .bind(&booking.to)
        .bind(booking.departure_date)
        .bind(booking.departure_time)
        .bind(booking.number_of_seats)
        .bind(&booking.price_per_seat)
        .bind(&booking.total_price)
        .bind(booking.status.as_str())
        .bind(&booking.rejection_reason)
        .bind(&booking.payment_id)
        .bind(booking.paid_at)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.into_domain()
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Booking> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE id = $1",
            BOOKING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::booking_not_found(id))?
            .into_domain()
    }

    async fn list_all(&self, limit: i64, offset: i64) -> RepositoryResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            BOOKING_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BookingRow::into_domain).collect()
    }

    async fn list_by_consumer(&self, consumer_id: &str) -> RepositoryResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE consumer_id = $1 ORDER BY created_at DESC",
            BOOKING_COLUMNS
        ))
        .bind(consumer_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BookingRow::into_domain).collect()
    }

    async fn list_by_vendor(&self, vendor_id: &str) -> RepositoryResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {} FROM bookings WHERE vendor_id = $1 ORDER BY created_at DESC",
            BOOKING_COLUMNS
        ))
        .bind(vendor_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BookingRow::into_domain).collect()
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> RepositoryResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            UPDATE bookings SET status = $2, updated_at = NOW()
            WHERE id = $1 AND status = ANY($3)
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(to.as_str())
        .bind(status_list(from))
        .fetch_optional(&self.pool)
        .await?;

        row.map(BookingRow::into_domain).transpose()
    }

    async fn release(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
        reason: Option<&str>,
    ) -> RepositoryResult<Option<Booking>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            UPDATE bookings
            SET status = $2, rejection_reason = COALESCE($3, rejection_reason), updated_at = NOW()
            WHERE id = $1 AND status = ANY($4)
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(to.as_str())
        .bind(reason)
        .bind(status_list(from))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let booking = row.into_domain()?;

        sqlx::query(
            r#"
            UPDATE tickets
            SET available_seats = LEAST(total_seats, available_seats + $2), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(booking.ticket_id)
        .bind(booking.number_of_seats)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(booking))
    }

    async fn mark_paid(
        &self,
        id: Uuid,
        payment_id: &str,
        paid_at: DateTime<Utc>,
    ) -> RepositoryResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            UPDATE bookings
            SET status = 'paid', payment_id = $2, paid_at = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'accepted'
            RETURNING {}
            "#,
            BOOKING_COLUMNS
        ))
        .bind(id)
        .bind(payment_id)
        .bind(paid_at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BookingRow::into_domain).transpose()
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    consumer_id: String,
    consumer_email: String,
    consumer_name: Option<String>,
    ticket_id: Uuid,
    vendor_id: String,
    ticket_title: String,
    transport_type: String,
    route_from: String,
    route_to: String,
    departure_date: NaiveDate,
    departure_time: NaiveTime,
    number_of_seats: i32,
    price_per_seat: BigDecimal,
    total_price: BigDecimal,
    status: String,
    rejection_reason: Option<String>,
    payment_id: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BookingRow {
    fn into_domain(self) -> RepositoryResult<Booking> {
        Ok(Booking {
            id: self.id,
            consumer_id: self.consumer_id,
            consumer_email: self.consumer_email,
            consumer_name: self.consumer_name,
            ticket_id: self.ticket_id,
            vendor_id: self.vendor_id,
            ticket_title: self.ticket_title,
            transport_type: self.transport_type.parse::<TransportType>()?,
            from: self.route_from,
            to: self.route_to,
            departure_date: self.departure_date,
            departure_time: self.departure_time,
            number_of_seats: self.number_of_seats,
            price_per_seat: self.price_per_seat,
            total_price: self.total_price,
            status: self.status.parse::<BookingStatus>()?,
            rejection_reason: self.rejection_reason,
            payment_id: self.payment_id,
            paid_at: self.paid_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
