//! In-process store implementing every repository port.
//!
//! All state sits behind one async mutex, so each trait method observes and
//! mutates the store as a single step, the same guarantee the Postgres
//! adapters get from conditional updates.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Booking, BookingStatus, Role, Ticket, TicketStatus, User};
use crate::ports::{
    BookingRepository, RepositoryError, RepositoryResult, TicketQuery, TicketRepository,
    TicketSort, UserRepository, Visibility,
};

#[derive(Default)]
struct State {
    tickets: HashMap<Uuid, Ticket>,
    bookings: HashMap<Uuid, Booking>,
    users: HashMap<String, User>,
    advertised_slots_used: i64,
}

impl State {
    fn vendor_flagged(&self, vendor_id: &str) -> bool {
        self.users
            .get(vendor_id)
            .map(User::is_flagged)
            .unwrap_or(false)
    }

    fn publicly_listable(&self, ticket: &Ticket) -> bool {
        ticket.is_publicly_listable(self.vendor_flagged(&ticket.vendor_id))
    }

    fn ticket_mut(&mut self, id: Uuid) -> RepositoryResult<&mut Ticket> {
        self.tickets
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::ticket_not_found(id))
    }

    fn release_slot(&mut self) {
        self.advertised_slots_used = (self.advertised_slots_used - 1).max(0);
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn advertised_slots_used(&self) -> i64 {
        self.state.lock().await.advertised_slots_used
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn newest_first<T, F: Fn(&T) -> DateTime<Utc>>(items: &mut [T], created_at: F) {
    items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
}

#[async_trait]
impl TicketRepository for MemoryStore {
    async fn insert(&self, ticket: &Ticket) -> RepositoryResult<Ticket> {
        let mut state = self.state.lock().await;
        if state.tickets.contains_key(&ticket.id) {
            return Err(RepositoryError::Conflict(format!(
                "ticket {} already exists",
                ticket.id
            )));
        }
        state.tickets.insert(ticket.id, ticket.clone());
        Ok(ticket.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Ticket> {
        let state = self.state.lock().await;
        state
            .tickets
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::ticket_not_found(id))
    }

    async fn list(&self, query: &TicketQuery) -> RepositoryResult<Vec<Ticket>> {
        let state = self.state.lock().await;

        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| match query.visibility {
                Visibility::Public => state.publicly_listable(t),
                Visibility::All => true,
                Visibility::Status(status) => t.status == status,
            })
            .filter(|t| query.transport_type.map_or(true, |ty| t.transport_type == ty))
            .filter(|t| {
                query
                    .from
                    .as_deref()
                    .map_or(true, |from| contains_ignore_case(&t.route.from, from))
            })
            .filter(|t| {
                query
                    .to
                    .as_deref()
                    .map_or(true, |to| contains_ignore_case(&t.route.to, to))
            })
            .cloned()
            .collect();

        match query.sort {
            TicketSort::Newest => newest_first(&mut tickets, |t| t.created_at),
            TicketSort::PriceAsc => tickets.sort_by(|a, b| a.price.cmp(&b.price)),
            TicketSort::PriceDesc => tickets.sort_by(|a, b| b.price.cmp(&a.price)),
            TicketSort::Departure => tickets.sort_by_key(|t| {
                (t.schedule.departure_date, t.schedule.departure_time)
            }),
        }

        Ok(tickets
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn list_by_vendor(&self, vendor_id: &str) -> RepositoryResult<Vec<Ticket>> {
        let state = self.state.lock().await;
        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| t.vendor_id == vendor_id)
            .cloned()
            .collect();
        newest_first(&mut tickets, |t| t.created_at);
        Ok(tickets)
    }

    async fn list_advertised(&self) -> RepositoryResult<Vec<Ticket>> {
        let state = self.state.lock().await;
        let mut tickets: Vec<Ticket> = state
            .tickets
            .values()
            .filter(|t| t.is_advertised && state.publicly_listable(t))
            .cloned()
            .collect();
        newest_first(&mut tickets, |t| t.updated_at);
        Ok(tickets)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: &[TicketStatus],
        to: TicketStatus,
        rejection_reason: Option<&str>,
    ) -> RepositoryResult<Option<Ticket>> {
        let mut state = self.state.lock().await;
        let ticket = state.ticket_mut(id)?;
        if !from.contains(&ticket.status) {
            return Ok(None);
        }

        ticket.status = to;
        ticket.rejection_reason = rejection_reason.map(str::to_string);
        ticket.updated_at = Utc::now();
        let gives_back_slot = ticket.is_advertised && !to.is_listable();
        if gives_back_slot {
            ticket.is_advertised = false;
        }
        let updated = ticket.clone();

        if gives_back_slot {
            state.release_slot();
        }
        Ok(Some(updated))
    }

    async fn transition_and_advertise(
        &self,
        id: Uuid,
        from: &[TicketStatus],
        to: TicketStatus,
        cap: i64,
    ) -> RepositoryResult<Option<Ticket>> {
        let mut state = self.state.lock().await;
        let mut ticket = state
            .tickets
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::ticket_not_found(id))?;
        if !from.contains(&ticket.status) {
            return Ok(None);
        }

        // Checked on a copy; nothing is stored unless both changes succeed.
        ticket.status = to;
        ticket.rejection_reason = None;
        ticket.updated_at = Utc::now();
        let claims_slot = !ticket.is_advertised;
        if claims_slot {
            if !state.publicly_listable(&ticket) {
                return Err(RepositoryError::Conflict(
                    "only publicly listed tickets can be advertised".to_string(),
                ));
            }
            if state.advertised_slots_used >= cap {
                return Err(RepositoryError::AdvertisingCapReached { cap });
            }
            state.advertised_slots_used += 1;
            ticket.is_advertised = true;
        }

        state.tickets.insert(id, ticket.clone());
        Ok(Some(ticket))
    }

    async fn claim_advertising_slot(&self, id: Uuid, cap: i64) -> RepositoryResult<Ticket> {
        let mut state = self.state.lock().await;
        let ticket = state
            .tickets
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::ticket_not_found(id))?;

        if ticket.is_advertised {
            return Ok(ticket);
        }
        if !state.publicly_listable(&ticket) {
            return Err(RepositoryError::Conflict(
                "only publicly listed tickets can be advertised".to_string(),
            ));
        }
        if state.advertised_slots_used >= cap {
            return Err(RepositoryError::AdvertisingCapReached { cap });
        }

        state.advertised_slots_used += 1;
        let ticket = state.ticket_mut(id)?;
        ticket.is_advertised = true;
        ticket.updated_at = Utc::now();
        Ok(ticket.clone())
    }

    async fn release_advertising_slot(&self, id: Uuid) -> RepositoryResult<Ticket> {
        let mut state = self.state.lock().await;
        let ticket = state.ticket_mut(id)?;
        if !ticket.is_advertised {
            return Ok(ticket.clone());
        }

        ticket.is_advertised = false;
        ticket.updated_at = Utc::now();
        let updated = ticket.clone();
        state.release_slot();
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> RepositoryResult<()> {
        let mut state = self.state.lock().await;
        let ticket = state
            .tickets
            .get(&id)
            .ok_or_else(|| RepositoryError::ticket_not_found(id))?;
        let was_advertised = ticket.is_advertised;

        let live = state
            .bookings
            .values()
            .filter(|b| b.ticket_id == id && b.status.holds_seats())
            .count();
        if live > 0 {
            return Err(RepositoryError::Conflict(format!(
                "ticket {} still has {} live booking(s)",
                id, live
            )));
        }

        state.tickets.remove(&id);
        if was_advertised {
            state.release_slot();
        }
        Ok(())
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn reserve(&self, booking: &Booking) -> RepositoryResult<Booking> {
        let mut state = self.state.lock().await;
        let ticket = state.ticket_mut(booking.ticket_id)?;

        if !ticket.status.is_listable() {
            return Err(RepositoryError::Conflict(format!(
                "ticket is {} and not open for booking",
                ticket.status
            )));
        }
        if ticket.available_seats < booking.number_of_seats {
            return Err(RepositoryError::InsufficientSeats {
                requested: booking.number_of_seats,
                available: ticket.available_seats,
            });
        }

        ticket.available_seats -= booking.number_of_seats;
        ticket.updated_at = Utc::now();
        state.bookings.insert(booking.id, booking.clone());
        Ok(booking.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> RepositoryResult<Booking> {
        let state = self.state.lock().await;
        state
            .bookings
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::booking_not_found(id))
    }

    async fn list_all(&self, limit: i64, offset: i64) -> RepositoryResult<Vec<Booking>> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> = state.bookings.values().cloned().collect();
        newest_first(&mut bookings, |b| b.created_at);
        Ok(bookings
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn list_by_consumer(&self, consumer_id: &str) -> RepositoryResult<Vec<Booking>> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.consumer_id == consumer_id)
            .cloned()
            .collect();
        newest_first(&mut bookings, |b| b.created_at);
        Ok(bookings)
    }

    async fn list_by_vendor(&self, vendor_id: &str) -> RepositoryResult<Vec<Booking>> {
        let state = self.state.lock().await;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| b.vendor_id == vendor_id)
            .cloned()
            .collect();
        newest_first(&mut bookings, |b| b.created_at);
        Ok(bookings)
    }

    async fn update_status(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
    ) -> RepositoryResult<Option<Booking>> {
        let mut state = self.state.lock().await;
        let booking = state
            .bookings
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::booking_not_found(id))?;
        if !from.contains(&booking.status) {
            return Ok(None);
        }

        booking.status = to;
        booking.updated_at = Utc::now();
        Ok(Some(booking.clone()))
    }

    async fn release(
        &self,
        id: Uuid,
        from: &[BookingStatus],
        to: BookingStatus,
        reason: Option<&str>,
    ) -> RepositoryResult<Option<Booking>> {
        let mut state = self.state.lock().await;
        let booking = state
            .bookings
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::booking_not_found(id))?;
        if !from.contains(&booking.status) {
            return Ok(None);
        }

        booking.status = to;
        if let Some(reason) = reason {
            booking.rejection_reason = Some(reason.to_string());
        }
        booking.updated_at = Utc::now();
        let released = booking.clone();

        if let Some(ticket) = state.tickets.get_mut(&released.ticket_id) {
            ticket.available_seats =
                (ticket.available_seats + released.number_of_seats).min(ticket.total_seats);
            ticket.updated_at = Utc::now();
        }
        Ok(Some(released))
    }

    async fn mark_paid(
        &self,
        id: Uuid,
        payment_id: &str,
        paid_at: DateTime<Utc>,
    ) -> RepositoryResult<Option<Booking>> {
        let mut state = self.state.lock().await;
        let booking = state
            .bookings
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::booking_not_found(id))?;
        if booking.status != BookingStatus::Accepted {
            return Ok(None);
        }

        booking.status = BookingStatus::Paid;
        booking.payment_id = Some(payment_id.to_string());
        booking.paid_at = Some(paid_at);
        booking.updated_at = Utc::now();
        Ok(Some(booking.clone()))
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn upsert(&self, user: &User) -> RepositoryResult<User> {
        let mut state = self.state.lock().await;
        let stored = state
            .users
            .entry(user.id.clone())
            .and_modify(|existing| {
                existing.email = user.email.clone();
                existing.name = user.name.clone();
                if user.photo_url.is_some() {
                    existing.photo_url = user.photo_url.clone();
                }
                existing.updated_at = Utc::now();
            })
            .or_insert_with(|| user.clone());
        Ok(stored.clone())
    }

    async fn get_by_id(&self, id: &str) -> RepositoryResult<User> {
        let state = self.state.lock().await;
        state
            .users
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::user_not_found(id))
    }

    async fn list(&self) -> RepositoryResult<Vec<User>> {
        let state = self.state.lock().await;
        let mut users: Vec<User> = state.users.values().cloned().collect();
        newest_first(&mut users, |u| u.created_at);
        Ok(users)
    }

    async fn set_role(&self, id: &str, role: Role) -> RepositoryResult<User> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(id)
            .ok_or_else(|| RepositoryError::user_not_found(id))?;
        user.role = role;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_fraud(&self, id: &str, is_fraud: bool) -> RepositoryResult<User> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(id)
            .ok_or_else(|| RepositoryError::user_not_found(id))?;
        user.is_fraud = is_fraud;
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}
