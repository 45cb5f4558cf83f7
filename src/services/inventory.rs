//! Ticket submission, moderation and public listing.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::{ensure_not_departed, require_admin, require_role};
use crate::config::CoreSettings;
use crate::domain::{NewTicket, Role, Ticket, TicketStatus, TransportType, User};
use crate::error::AppError;
use crate::ports::{RepositoryError, TicketQuery, TicketRepository, TicketSort, UserRepository, Visibility};
use crate::validation::{validate_reason, ValidationError};

pub const MAX_PAGE_SIZE: i64 = 100;

/// Query-string filters of the ticket listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TicketFilters {
    #[serde(rename = "type")]
    pub transport_type: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// `all` or a single status. Honoured for admins only.
    pub status: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl TicketFilters {
    fn into_query(self, caller: Option<&User>) -> Result<TicketQuery, AppError> {
        let is_admin = caller.map(User::is_admin).unwrap_or(false);

        let visibility = match self.status.as_deref().map(str::trim) {
            Some(status) if is_admin && !status.is_empty() => {
                if status.eq_ignore_ascii_case("all") {
                    Visibility::All
                } else {
                    Visibility::Status(status.parse::<TicketStatus>().map_err(|e| {
                        ValidationError::new("status", e.to_string())
                    })?)
                }
            }
            _ => Visibility::Public,
        };

        let transport_type = match self.transport_type.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<TransportType>()
                    .map_err(|e| ValidationError::new("type", e.to_string()))?,
            ),
        };

        let sort = match self.sort.as_deref().map(str::trim) {
            None | Some("") | Some("newest") => TicketSort::Newest,
            Some("price_asc") => TicketSort::PriceAsc,
            Some("price_desc") => TicketSort::PriceDesc,
            Some("departure") => TicketSort::Departure,
            Some(other) => {
                return Err(ValidationError::new(
                    "sort",
                    format!("unknown sort '{}'", other),
                )
                .into())
            }
        };

        let non_blank = |s: Option<String>| {
            s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };

        Ok(TicketQuery {
            visibility,
            transport_type,
            from: non_blank(self.from),
            to: non_blank(self.to),
            sort,
            limit: self.limit.unwrap_or(50).clamp(1, MAX_PAGE_SIZE),
            offset: self.offset.unwrap_or(0).max(0),
        })
    }
}

/// Body of `PUT /tickets/:id`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketUpdate {
    pub status: Option<TicketStatus>,
    pub rejection_reason: Option<String>,
    pub is_advertised: Option<bool>,
}

pub struct InventoryService {
    tickets: Arc<dyn TicketRepository>,
    users: Arc<dyn UserRepository>,
    settings: CoreSettings,
}

impl InventoryService {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        users: Arc<dyn UserRepository>,
        settings: CoreSettings,
    ) -> Self {
        Self {
            tickets,
            users,
            settings,
        }
    }

    pub async fn submit_ticket(&self, vendor: &User, details: NewTicket) -> Result<Ticket, AppError> {
        require_role(vendor, &[Role::Vendor], "submit tickets")?;
        if vendor.is_fraud {
            tracing::warn!(vendor_id = %vendor.id, "Flagged vendor attempted a ticket submission");
            return Err(AppError::Forbidden(
                "vendor account is flagged and cannot submit tickets".to_string(),
            ));
        }

        details.validate()?;
        let ticket = Ticket::submit(vendor, details);
        if ensure_not_departed(ticket.departs_at(self.settings.departure_offset), Utc::now()).is_err() {
            return Err(ValidationError::new("departureDate", "departure must be in the future").into());
        }

        let ticket = self.tickets.insert(&ticket).await?;
        tracing::info!(
            ticket_id = %ticket.id,
            vendor_id = %vendor.id,
            seats = ticket.total_seats,
            "Ticket submitted for approval"
        );
        Ok(ticket)
    }

    /// Public listing. Admins may pass `status=all` (or one status) to see
    /// the moderation queue instead.
    pub async fn list_tickets(
        &self,
        caller: Option<&User>,
        filters: TicketFilters,
    ) -> Result<Vec<Ticket>, AppError> {
        let query = filters.into_query(caller)?;
        Ok(self.tickets.list(&query).await?)
    }

    pub async fn list_advertised(&self) -> Result<Vec<Ticket>, AppError> {
        Ok(self.tickets.list_advertised().await?)
    }

    pub async fn list_mine(&self, vendor: &User) -> Result<Vec<Ticket>, AppError> {
        require_role(vendor, &[Role::Vendor], "list vendor tickets")?;
        Ok(self.tickets.list_by_vendor(&vendor.id).await?)
    }

    /// Hidden tickets are reported as missing to everyone but their vendor
    /// and admins.
    pub async fn get_ticket(&self, caller: Option<&User>, id: Uuid) -> Result<Ticket, AppError> {
        let ticket = self.tickets.get_by_id(id).await?;

        let privileged = caller
            .map(|user| user.is_admin() || ticket.is_owned_by(user))
            .unwrap_or(false);
        if privileged || ticket.is_publicly_listable(self.vendor_flagged(&ticket.vendor_id).await?) {
            return Ok(ticket);
        }

        Err(RepositoryError::ticket_not_found(id).into())
    }

    pub async fn approve_ticket(&self, admin: &User, id: Uuid) -> Result<Ticket, AppError> {
        require_admin(admin, "approve tickets")?;

        let current = self.tickets.get_by_id(id).await?;
        if current.status == TicketStatus::Approved {
            return Ok(current);
        }

        let ticket = self.transition(id, TicketStatus::Approved, None).await?;
        tracing::info!(ticket_id = %id, admin_id = %admin.id, "Ticket approved");
        Ok(ticket)
    }

    pub async fn reject_ticket(
        &self,
        admin: &User,
        id: Uuid,
        reason: Option<&str>,
    ) -> Result<Ticket, AppError> {
        require_admin(admin, "reject tickets")?;
        let reason = validate_reason("rejectionReason", reason)?;

        let ticket = self
            .transition(id, TicketStatus::Rejected, Some(&reason))
            .await?;
        tracing::info!(ticket_id = %id, admin_id = %admin.id, reason = %reason, "Ticket rejected");
        Ok(ticket)
    }

    /// Activation, cancellation and completion of a listed ticket.
    pub async fn mark_status(
        &self,
        caller: &User,
        id: Uuid,
        target: TicketStatus,
    ) -> Result<Ticket, AppError> {
        match target {
            TicketStatus::Active => require_admin(caller, "activate tickets")?,
            TicketStatus::Cancelled | TicketStatus::Completed => {
                let ticket = self.tickets.get_by_id(id).await?;
                if !caller.is_admin() && !ticket.is_owned_by(caller) {
                    return Err(AppError::Forbidden(
                        "only the owning vendor or an admin can close a ticket".to_string(),
                    ));
                }
            }
            TicketStatus::Approved => return self.approve_ticket(caller, id).await,
            TicketStatus::Rejected | TicketStatus::Pending => {
                return Err(AppError::InvalidTransition(format!(
                    "ticket cannot be moved to {} here",
                    target
                )))
            }
        }

        let ticket = self.transition(id, target, None).await?;
        tracing::info!(ticket_id = %id, actor_id = %caller.id, to = %target, "Ticket status changed");
        Ok(ticket)
    }

    pub async fn set_advertised(
        &self,
        admin: &User,
        id: Uuid,
        advertised: bool,
    ) -> Result<Ticket, AppError> {
        require_admin(admin, "advertise tickets")?;

        let ticket = if advertised {
            self.tickets
                .claim_advertising_slot(id, self.settings.max_advertised_tickets)
                .await?
        } else {
            self.tickets.release_advertising_slot(id).await?
        };

        tracing::info!(ticket_id = %id, advertised, "Ticket advertising updated");
        Ok(ticket)
    }

    /// Applies a `PUT /tickets/:id` body. Everything that can refuse the
    /// request is checked before the first write; a status change that also
    /// claims an advertising slot is stored as one step.
    pub async fn apply_update(
        &self,
        caller: &User,
        id: Uuid,
        update: TicketUpdate,
    ) -> Result<Ticket, AppError> {
        if update.status.is_none() && update.is_advertised.is_none() {
            return Err(ValidationError::new("status", "nothing to update").into());
        }
        if update.is_advertised.is_some() {
            require_admin(caller, "advertise tickets")?;
        }

        if let (Some(target), Some(true)) = (update.status, update.is_advertised) {
            return self.list_and_advertise(caller, id, target).await;
        }

        let mut ticket = match update.status {
            Some(TicketStatus::Rejected) => {
                self.reject_ticket(caller, id, update.rejection_reason.as_deref())
                    .await?
            }
            Some(target) => self.mark_status(caller, id, target).await?,
            None => self.tickets.get_by_id(id).await?,
        };

        if let Some(advertised) = update.is_advertised {
            if advertised != ticket.is_advertised {
                ticket = self.set_advertised(caller, id, advertised).await?;
            }
        }

        Ok(ticket)
    }

    async fn list_and_advertise(
        &self,
        admin: &User,
        id: Uuid,
        target: TicketStatus,
    ) -> Result<Ticket, AppError> {
        if !target.is_listable() {
            return Err(AppError::InvalidTransition(
                "only publicly listed tickets can be advertised".to_string(),
            ));
        }

        let current = self.tickets.get_by_id(id).await?;
        if target == TicketStatus::Approved && current.status == TicketStatus::Approved {
            return self.set_advertised(admin, id, true).await;
        }

        let sources = TicketStatus::allowed_sources(target);
        let cap = self.settings.max_advertised_tickets;
        match self.tickets.transition_and_advertise(id, sources, target, cap).await? {
            Some(ticket) => {
                tracing::info!(
                    ticket_id = %id,
                    admin_id = %admin.id,
                    to = %target,
                    "Ticket status changed and advertised"
                );
                Ok(ticket)
            }
            None => Err(self.refused_transition(id, target).await),
        }
    }

    pub async fn delete_ticket(&self, caller: &User, id: Uuid) -> Result<(), AppError> {
        let ticket = self.tickets.get_by_id(id).await?;
        if !caller.is_admin() && !ticket.is_owned_by(caller) {
            return Err(AppError::Forbidden(
                "only the owning vendor or an admin can delete a ticket".to_string(),
            ));
        }

        self.tickets.delete(id).await?;
        tracing::info!(ticket_id = %id, actor_id = %caller.id, "Ticket deleted");
        Ok(())
    }

    async fn vendor_flagged(&self, vendor_id: &str) -> Result<bool, AppError> {
        match self.users.get_by_id(vendor_id).await {
            Ok(vendor) => Ok(vendor.is_flagged()),
            Err(RepositoryError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Conditional status change; on a refused precondition, reports the
    /// transition that was attempted from the ticket's current state.
    async fn transition(
        &self,
        id: Uuid,
        target: TicketStatus,
        reason: Option<&str>,
    ) -> Result<Ticket, AppError> {
        let sources = TicketStatus::allowed_sources(target);
        match self.tickets.update_status(id, sources, target, reason).await? {
            Some(ticket) => Ok(ticket),
            None => Err(self.refused_transition(id, target).await),
        }
    }

    async fn refused_transition(&self, id: Uuid, target: TicketStatus) -> AppError {
        match self.tickets.get_by_id(id).await {
            Ok(current) => match current.status.transition_to(target) {
                Err(refused) => refused.into(),
                Ok(()) => AppError::InvalidTransition(format!(
                    "ticket {} changed concurrently, retry",
                    id
                )),
            },
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use serde_json::json;

    struct Fixture {
        store: MemoryStore,
        service: InventoryService,
        admin: User,
        vendor: User,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let settings = CoreSettings {
            max_advertised_tickets: 2,
            ..CoreSettings::default()
        };
        let service = InventoryService::new(Arc::new(store.clone()), Arc::new(store.clone()), settings);

        let mut admin = User::new("admin".into(), "admin@example.com".into(), "Admin".into(), None);
        admin.role = Role::Admin;
        let mut vendor = User::new("vendor".into(), "vendor@example.com".into(), "Vendor".into(), None);
        vendor.role = Role::Vendor;
        UserRepository::upsert(&store, &admin).await.unwrap();
        UserRepository::upsert(&store, &vendor).await.unwrap();

        Fixture {
            store,
            service,
            admin,
            vendor,
        }
    }

    fn details(seats: i32) -> NewTicket {
        serde_json::from_value(json!({
            "title": "Sundarban Launch",
            "type": "launch",
            "from": "Dhaka",
            "to": "Barisal",
            "departureDate": "2099-01-15",
            "departureTime": "19:00",
            "price": 1200,
            "totalSeats": seats
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn approve_is_idempotent_and_reject_is_terminal() {
        let f = fixture().await;
        let t = f.service.submit_ticket(&f.vendor, details(10)).await.unwrap();

        let approved = f.service.approve_ticket(&f.admin, t.id).await.unwrap();
        assert_eq!(approved.status, TicketStatus::Approved);
        let again = f.service.approve_ticket(&f.admin, t.id).await.unwrap();
        assert_eq!(again.status, TicketStatus::Approved);

        let err = f
            .service
            .reject_ticket(&f.admin, t.id, Some("too late"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn rejected_ticket_cannot_be_approved() {
        let f = fixture().await;
        let t = f.service.submit_ticket(&f.vendor, details(10)).await.unwrap();
        f.service
            .reject_ticket(&f.admin, t.id, Some("Price too high"))
            .await
            .unwrap();

        let err = f.service.approve_ticket(&f.admin, t.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));
    }

    #[tokio::test]
    async fn rejection_requires_reason() {
        let f = fixture().await;
        let t = f.service.submit_ticket(&f.vendor, details(10)).await.unwrap();

        let err = f.service.reject_ticket(&f.admin, t.id, Some("  ")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        let err = f.service.reject_ticket(&f.admin, t.id, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let rejected = f
            .service
            .reject_ticket(&f.admin, t.id, Some("Price too high"))
            .await
            .unwrap();
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Price too high"));
    }

    #[tokio::test]
    async fn only_admins_moderate() {
        let f = fixture().await;
        let t = f.service.submit_ticket(&f.vendor, details(10)).await.unwrap();
        let err = f.service.approve_ticket(&f.vendor, t.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = f.service.submit_ticket(&f.admin, details(10)).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn flagged_vendor_is_blocked_and_hidden() {
        let f = fixture().await;
        let t = f.service.submit_ticket(&f.vendor, details(10)).await.unwrap();
        f.service.approve_ticket(&f.admin, t.id).await.unwrap();

        let flagged = f.store.set_fraud(&f.vendor.id, true).await.unwrap();
        let listed = f
            .service
            .list_tickets(None, TicketFilters::default())
            .await
            .unwrap();
        assert!(listed.iter().all(|ticket| ticket.id != t.id));

        let err = f.service.submit_ticket(&flagged, details(5)).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = f.service.get_ticket(None, t.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(f.service.get_ticket(Some(&f.admin), t.id).await.is_ok());
    }

    #[tokio::test]
    async fn status_all_only_for_admins() {
        let f = fixture().await;
        f.service.submit_ticket(&f.vendor, details(10)).await.unwrap();

        let filters = TicketFilters {
            status: Some("all".to_string()),
            ..TicketFilters::default()
        };
        let as_vendor = f
            .service
            .list_tickets(Some(&f.vendor), filters.clone())
            .await
            .unwrap();
        assert!(as_vendor.is_empty());

        let as_admin = f.service.list_tickets(Some(&f.admin), filters).await.unwrap();
        assert_eq!(as_admin.len(), 1);
    }

    #[tokio::test]
    async fn advertising_cap_fails_closed() {
        let f = fixture().await;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let t = f.service.submit_ticket(&f.vendor, details(10)).await.unwrap();
            f.service.approve_ticket(&f.admin, t.id).await.unwrap();
            ids.push(t.id);
        }

        f.service.set_advertised(&f.admin, ids[0], true).await.unwrap();
        f.service.set_advertised(&f.admin, ids[1], true).await.unwrap();
        let err = f.service.set_advertised(&f.admin, ids[2], true).await.unwrap_err();
        assert!(matches!(err, AppError::AdvertisingCapReached(2)));

        assert_eq!(f.service.list_advertised().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn past_departures_are_refused() {
        let f = fixture().await;
        let mut past = details(10);
        past.departure_date = chrono::NaiveDate::from_ymd_opt(2001, 1, 1).unwrap();
        let err = f.service.submit_ticket(&f.vendor, past).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(e) if e.field == "departureDate"));
    }

    #[tokio::test]
    async fn vendor_closes_own_ticket() {
        let f = fixture().await;
        let t = f.service.submit_ticket(&f.vendor, details(10)).await.unwrap();
        let err = f
            .service
            .mark_status(&f.vendor, t.id, TicketStatus::Cancelled)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        f.service.approve_ticket(&f.admin, t.id).await.unwrap();
        let closed = f
            .service
            .mark_status(&f.vendor, t.id, TicketStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(closed.status, TicketStatus::Cancelled);
    }

    #[tokio::test]
    async fn delete_is_owner_or_admin_and_frees_slot() {
        let f = fixture().await;
        let t = f.service.submit_ticket(&f.vendor, details(10)).await.unwrap();
        f.service.approve_ticket(&f.admin, t.id).await.unwrap();
        f.service.set_advertised(&f.admin, t.id, true).await.unwrap();

        let mut other = User::new("other".into(), "other@example.com".into(), "Other".into(), None);
        other.role = Role::Vendor;
        let err = f.service.delete_ticket(&other, t.id).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        f.service.delete_ticket(&f.vendor, t.id).await.unwrap();
        let err = f.service.get_ticket(Some(&f.admin), t.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(f.service.list_advertised().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refused_advertising_claim_keeps_status_unchanged() {
        let f = fixture().await;
        let mut advertised = Vec::new();
        for _ in 0..2 {
            let t = f.service.submit_ticket(&f.vendor, details(10)).await.unwrap();
            f.service.approve_ticket(&f.admin, t.id).await.unwrap();
            f.service.set_advertised(&f.admin, t.id, true).await.unwrap();
            advertised.push(t.id);
        }
        let pending = f.service.submit_ticket(&f.vendor, details(10)).await.unwrap();

        let approve_and_advertise = || TicketUpdate {
            status: Some(TicketStatus::Approved),
            rejection_reason: None,
            is_advertised: Some(true),
        };
        let err = f
            .service
            .apply_update(&f.admin, pending.id, approve_and_advertise())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AdvertisingCapReached(2)));

        let stored = f.service.get_ticket(Some(&f.admin), pending.id).await.unwrap();
        assert_eq!(stored.status, TicketStatus::Pending);
        assert!(!stored.is_advertised);
        assert_eq!(f.store.advertised_slots_used().await, 2);

        f.service.set_advertised(&f.admin, advertised[0], false).await.unwrap();
        let both = f
            .service
            .apply_update(&f.admin, pending.id, approve_and_advertise())
            .await
            .unwrap();
        assert_eq!(both.status, TicketStatus::Approved);
        assert!(both.is_advertised);
        assert_eq!(f.store.advertised_slots_used().await, 2);
    }

    #[tokio::test]
    async fn vendor_update_touching_advertising_changes_nothing() {
        let f = fixture().await;
        let t = f.service.submit_ticket(&f.vendor, details(10)).await.unwrap();
        f.service.approve_ticket(&f.admin, t.id).await.unwrap();

        let update = TicketUpdate {
            status: Some(TicketStatus::Cancelled),
            rejection_reason: None,
            is_advertised: Some(false),
        };
        let err = f.service.apply_update(&f.vendor, t.id, update).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let stored = f.service.get_ticket(Some(&f.vendor), t.id).await.unwrap();
        assert_eq!(stored.status, TicketStatus::Approved);
    }

    #[tokio::test]
    async fn fraud_flag_hides_tickets_after_role_change() {
        let f = fixture().await;
        let t = f.service.submit_ticket(&f.vendor, details(10)).await.unwrap();
        f.service.approve_ticket(&f.admin, t.id).await.unwrap();

        f.store.set_fraud(&f.vendor.id, true).await.unwrap();
        let demoted = f.store.set_role(&f.vendor.id, Role::Consumer).await.unwrap();
        assert!(demoted.is_fraud);

        let listed = f
            .service
            .list_tickets(None, TicketFilters::default())
            .await
            .unwrap();
        assert!(listed.iter().all(|ticket| ticket.id != t.id));
        let err = f.service.get_ticket(None, t.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
