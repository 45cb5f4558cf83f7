//! Postgres implementation of TicketRepository.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::domain::{Route, Schedule, Ticket, TicketStatus, TransportType};
use crate::ports::{
    RepositoryError, RepositoryResult, TicketQuery, TicketRepository, TicketSort, Visibility,
};

pub(crate) const TICKET_COLUMNS: &str = "id, title, route_from, route_to, transport_type, \
    departure_date, departure_time, arrival_time, duration, price, total_seats, available_seats, \
    features, vendor_id, vendor_name, vendor_email, status, rejection_reason, is_advertised, \
    created_at, updated_at";

const VENDOR_NOT_FLAGGED: &str = "NOT EXISTS (SELECT 1 FROM users u \
    WHERE u.id = tickets.vendor_id AND u.is_fraud)";

const LISTABLE_STATUSES: &str = "status IN ('approved', 'active')";

/// Postgres-backed ticket repository.
#[derive(Clone)]
pub struct PostgresTicketRepository {
    pool: PgPool,
}

impl PostgresTicketRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Escapes `%`, `_` and `\` so user input is matched literally by ILIKE.
fn like_pattern(fragment: &str) -> String {
    let mut escaped = String::with_capacity(fragment.len() + 2);
    escaped.push('%');
    for ch in fragment.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

pub(crate) fn status_list<T: ToString>(statuses: &[T]) -> Vec<String> {
    statuses.iter().map(ToString::to_string).collect()
}

async fn lock_ticket(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> RepositoryResult<Ticket> {
    let row = sqlx::query_as::<_, TicketRow>(&format!(
        "SELECT {} FROM tickets WHERE id = $1 FOR UPDATE",
        TICKET_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;

    row.ok_or_else(|| RepositoryError::ticket_not_found(id))?
        .into_domain()
}

async fn vendor_is_flagged(
    tx: &mut Transaction<'_, Postgres>,
    vendor_id: &str,
) -> RepositoryResult<bool> {
    let flagged: Option<bool> = sqlx::query_scalar(
        "SELECT is_fraud FROM users WHERE id = $1",
    )
    .bind(vendor_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(flagged.unwrap_or(false))
}

async fn set_advertised(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    advertised: bool,
) -> RepositoryResult<Ticket> {
    let row = sqlx::query_as::<_, TicketRow>(&format!(
        "UPDATE tickets SET is_advertised = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
        TICKET_COLUMNS
    ))
    .bind(id)
    .bind(advertised)
    .fetch_one(&mut **tx)
    .await?;

    row.into_domain()
}

/// Takes one slot for a locked, listable ticket from an unflagged vendor.
async fn take_slot(
    tx: &mut Transaction<'_, Postgres>,
    ticket: &Ticket,
    cap: i64,
) -> RepositoryResult<Ticket> {
    if !ticket.status.is_listable() || vendor_is_flagged(tx, &ticket.vendor_id).await? {
        return Err(RepositoryError::Conflict(
            "only publicly listed tickets can be advertised".to_string(),
        ));
    }

    let claimed = sqlx::query("UPDATE advertising_slots SET used = used + 1 WHERE id = 1 AND used < $1")
        .bind(cap)
        .execute(&mut **tx)
        .await?
        .rows_affected();
    if claimed == 0 {
        return Err(RepositoryError::AdvertisingCapReached { cap });
    }

    set_advertised(tx, ticket.id, true).await
}

async fn give_back_slot(tx: &mut Transaction<'_, Postgres>) -> RepositoryResult<()> {
    sqlx::query("UPDATE advertising_slots SET used = GREATEST(used - 1, 0) WHERE id = 1")
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl TicketRepository for PostgresTicketRepository {
    async fn insert(&self, ticket: &Ticket) -> RepositoryResult<Ticket> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            INSERT INTO tickets (
                id, title, route_from, route_to, transport_type,
                departure_date, departure_time, arrival_time, duration, price,
                total_seats, available_seats, features, vendor_id, vendor_name,
                vendor_email, status, rejection_reason, is_advertised, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                $16, $17, $18, $19, $20, $21)
            RETURNING {}
            "#,
            TICKET_COLUMNS
        ))
        .bind(ticket.id)
        .bind(&ticket.title)
        .bind(&ticket.route.from)
        .bind(&ticket.route.to)
        .bind(ticket.transport_type.as_str())
        .bind(ticket.schedule.departure_date)
        .bind(ticket.schedule.departure_time)
        .bind(ticket.schedule.arrival_time)
        .bind(&ticket.schedule.duration)
        .bind(&ticket.price)
        .bind(ticket.total_seats)
        .bind(ticket.available_seats)
        .bind(&ticket.features)
        .bind(&ticket.vendor_id)
        .bind(&ticket.vendor_name)
        .bind(&ticket.vendor_email)
        .bind(ticket.status.as_str())
        .bind(&ticket.rejection_reason)
        .bind(ticket.is_advertised)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Ticket> {
        let row = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM tickets WHERE id = $1",
            TICKET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::ticket_not_found(id))?
            .into_domain()
    }

    async fn list(&self, query: &TicketQuery) -> RepositoryResult<Vec<Ticket>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM tickets WHERE TRUE", TICKET_COLUMNS));

        match query.visibility {
            Visibility::Public => {
                builder.push(" AND ").push(LISTABLE_STATUSES);
                builder.push(" AND ").push(VENDOR_NOT_FLAGGED);
            }
            Visibility::All => {}
            Visibility::Status(status) => {
                builder.push(" AND status = ").push_bind(status.as_str());
            }
        }

        if let Some(transport_type) = query.transport_type {
            builder
                .push(" AND transport_type = ")
                .push_bind(transport_type.as_str());
        }
        if let Some(from) = query.from.as_deref().filter(|s| !s.is_empty()) {
            builder
                .push(" AND route_from ILIKE ")
                .push_bind(like_pattern(from))
                .push(" ESCAPE '\\'");
        }
        if let Some(to) = query.to.as_deref().filter(|s| !s.is_empty()) {
            builder
                .push(" AND route_to ILIKE ")
                .push_bind(like_pattern(to))
                .push(" ESCAPE '\\'");
        }

        builder.push(match query.sort {
            TicketSort::Newest => " ORDER BY created_at DESC",
            TicketSort::PriceAsc => " ORDER BY price ASC, created_at DESC",
            TicketSort::PriceDesc => " ORDER BY price DESC, created_at DESC",
            TicketSort::Departure => " ORDER BY departure_date ASC, departure_time ASC",
        });
        builder.push(" LIMIT ").push_bind(query.limit);
        builder.push(" OFFSET ").push_bind(query.offset);

        let rows = builder
            .build_query_as::<TicketRow>()
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TicketRow::into_domain).collect()
    }

    async fn list_by_vendor(&self, vendor_id: &str) -> RepositoryResult<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM tickets WHERE vendor_id = $1 ORDER BY created_at DESC",
            TICKET_COLUMNS
        ))
        .bind(vendor_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TicketRow::into_domain).collect()
    }

    async fn list_advertised(&self) -> RepositoryResult<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(&format!(
            "SELECT {} FROM tickets WHERE is_advertised AND {} AND {} ORDER BY updated_at DESC",
            TICKET_COLUMNS, LISTABLE_STATUSES, VENDOR_NOT_FLAGGED
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TicketRow::into_domain).collect()
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: &[TicketStatus],
        to: TicketStatus,
        rejection_reason: Option<&str>,
    ) -> RepositoryResult<Option<Ticket>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            UPDATE tickets
            SET status = $2, rejection_reason = $3, updated_at = NOW()
            WHERE id = $1 AND status = ANY($4)
            RETURNING {}
            "#,
            TICKET_COLUMNS
        ))
        .bind(id)
        .bind(to.as_str())
        .bind(rejection_reason)
        .bind(status_list(from))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut ticket = row.into_domain()?;

        // A ticket leaving the listable states hands back its carousel slot.
        if ticket.is_advertised && !to.is_listable() {
            ticket = set_advertised(&mut tx, id, false).await?;
            give_back_slot(&mut tx).await?;
        }

        tx.commit().await?;
        Ok(Some(ticket))
    }

    async fn claim_advertising_slot(&self, id: Uuid, cap: i64) -> RepositoryResult<Ticket> {
        let mut tx = self.pool.begin().await?;
        let ticket = lock_ticket(&mut tx, id).await?;

        if ticket.is_advertised {
            return Ok(ticket);
        }

        let ticket = take_slot(&mut tx, &ticket, cap).await?;
        tx.commit().await?;
        Ok(ticket)
    }

    async fn transition_and_advertise(
        &self,
        id: Uuid,
        from: &[TicketStatus],
        to: TicketStatus,
        cap: i64,
    ) -> RepositoryResult<Option<Ticket>> {
        let mut tx = self.pool.begin().await?;
        let ticket = lock_ticket(&mut tx, id).await?;
        if !from.contains(&ticket.status) {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, TicketRow>(&format!(
            r#"
            UPDATE tickets
            SET status = $2, rejection_reason = NULL, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TICKET_COLUMNS
        ))
        .bind(id)
        .bind(to.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let ticket = row.into_domain()?;

        // Dropping the transaction on a refused claim rolls the status back.
        let ticket = if ticket.is_advertised {
            ticket
        } else {
            take_slot(&mut tx, &ticket, cap).await?
        };

        tx.commit().await?;
        Ok(Some(ticket))
    }

    async fn release_advertising_slot(&self, id: Uuid) -> RepositoryResult<Ticket> {
        let mut tx = self.pool.begin().await?;
        let ticket = lock_ticket(&mut tx, id).await?;

        if !ticket.is_advertised {
            return Ok(ticket);
        }

        let ticket = set_advertised(&mut tx, id, false).await?;
        give_back_slot(&mut tx).await?;
        tx.commit().await?;
        Ok(ticket)
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<()> {
        let mut tx = self.pool.begin().await?;
        let ticket = lock_ticket(&mut tx, id).await?;

        let live: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM bookings WHERE ticket_id = $1 AND status IN ('pending', 'accepted', 'paid')",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if live > 0 {
            return Err(RepositoryError::Conflict(format!(
                "ticket {} still has {} live booking(s)",
                id, live
            )));
        }

        if ticket.is_advertised {
            give_back_slot(&mut tx).await?;
        }
        sqlx::query("DELETE FROM tickets WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TicketRow {
    id: Uuid,
    title: String,
    route_from: String,
    route_to: String,
    transport_type: String,
    departure_date: NaiveDate,
    departure_time: NaiveTime,
    arrival_time: Option<NaiveTime>,
    duration: Option<String>,
    price: BigDecimal,
    total_seats: i32,
    available_seats: i32,
    features: Vec<String>,
    vendor_id: String,
    vendor_name: Option<String>,
    vendor_email: Option<String>,
    status: String,
    rejection_reason: Option<String>,
    is_advertised: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TicketRow {
    pub(crate) fn into_domain(self) -> RepositoryResult<Ticket> {
        Ok(Ticket {
            id: self.id,
            title: self.title,
            route: Route {
                from: self.route_from,
                to: self.route_to,
            },
            transport_type: self.transport_type.parse::<TransportType>()?,
            schedule: Schedule {
                departure_date: self.departure_date,
                departure_time: self.departure_time,
                arrival_time: self.arrival_time,
                duration: self.duration,
            },
            price: self.price,
            total_seats: self.total_seats,
            available_seats: self.available_seats,
            features: self.features,
            vendor_id: self.vendor_id,
            vendor_name: self.vendor_name,
            vendor_email: self.vendor_email,
            status: self.status.parse::<TicketStatus>()?,
            rejection_reason: self.rejection_reason,
            is_advertised: self.is_advertised,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
