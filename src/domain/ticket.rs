//! Tickets: sellable capacity on one scheduled departure.

use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{normalize_money, InvalidTransition, UnknownVariant, User};
use crate::validation::{
    sanitize_string, validate_max_len, validate_min, validate_money, validate_required,
    ValidationError, ValidationResult,
};

pub const TITLE_MAX_LEN: usize = 120;
pub const PLACE_MAX_LEN: usize = 80;
pub const FEATURE_MAX_LEN: usize = 60;
pub const MAX_FEATURES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    #[serde(alias = "Bus")]
    Bus,
    #[serde(alias = "Train")]
    Train,
    #[serde(alias = "Launch")]
    Launch,
    #[serde(alias = "Plane", alias = "flight")]
    Plane,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportType::Bus => "bus",
            TransportType::Train => "train",
            TransportType::Launch => "launch",
            TransportType::Plane => "plane",
        }
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bus" => Ok(TransportType::Bus),
            "train" => Ok(TransportType::Train),
            "launch" => Ok(TransportType::Launch),
            "plane" | "flight" => Ok(TransportType::Plane),
            _ => Err(UnknownVariant {
                kind: "transport type",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Pending,
    Approved,
    Rejected,
    Active,
    Cancelled,
    Completed,
}

impl TicketStatus {
    pub const LISTABLE: [TicketStatus; 2] = [TicketStatus::Approved, TicketStatus::Active];

    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Pending => "pending",
            TicketStatus::Approved => "approved",
            TicketStatus::Rejected => "rejected",
            TicketStatus::Active => "active",
            TicketStatus::Cancelled => "cancelled",
            TicketStatus::Completed => "completed",
        }
    }

    /// Approved and active tickets are the only ones consumers may see or book.
    pub fn is_listable(&self) -> bool {
        Self::LISTABLE.contains(self)
    }

    /// States a ticket may be in immediately before moving to `target`.
    pub fn allowed_sources(target: TicketStatus) -> &'static [TicketStatus] {
        match target {
            TicketStatus::Pending => &[],
            TicketStatus::Approved | TicketStatus::Rejected => &[TicketStatus::Pending],
            TicketStatus::Active => &[TicketStatus::Approved],
            TicketStatus::Cancelled | TicketStatus::Completed => {
                &[TicketStatus::Approved, TicketStatus::Active]
            }
        }
    }

    pub fn transition_to(self, target: TicketStatus) -> Result<(), InvalidTransition> {
        if Self::allowed_sources(target).contains(&self) {
            Ok(())
        } else {
            Err(InvalidTransition {
                entity: "ticket",
                from: self.as_str(),
                to: target.as_str(),
            })
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TicketStatus::Pending),
            "approved" => Ok(TicketStatus::Approved),
            "rejected" => Ok(TicketStatus::Rejected),
            "active" => Ok(TicketStatus::Active),
            "cancelled" => Ok(TicketStatus::Cancelled),
            "completed" => Ok(TicketStatus::Completed),
            _ => Err(UnknownVariant {
                kind: "ticket status",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub departure_date: NaiveDate,
    #[serde(with = "clock_time")]
    pub departure_time: NaiveTime,
    #[serde(default, with = "clock_time::option")]
    pub arrival_time: Option<NaiveTime>,
    #[serde(default)]
    pub duration: Option<String>,
}

impl Schedule {
    /// Departure instant, reading date and time as wall-clock time at `offset`.
    pub fn departs_at(&self, offset: FixedOffset) -> DateTime<Utc> {
        departure_instant(self.departure_date, self.departure_time, offset)
    }
}

pub fn departure_instant(date: NaiveDate, time: NaiveTime, offset: FixedOffset) -> DateTime<Utc> {
    let local = date.and_time(time);
    match offset.from_local_datetime(&local).single() {
        Some(at) => at.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&local),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub title: String,
    #[serde(flatten)]
    pub route: Route,
    #[serde(rename = "type")]
    pub transport_type: TransportType,
    #[serde(flatten)]
    pub schedule: Schedule,
    pub price: BigDecimal,
    pub total_seats: i32,
    pub available_seats: i32,
    pub features: Vec<String>,
    pub vendor_id: String,
    pub vendor_name: Option<String>,
    pub vendor_email: Option<String>,
    pub status: TicketStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub is_advertised: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// A fresh vendor submission: pending, with every seat still available.
    pub fn submit(vendor: &User, details: NewTicket) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: sanitize_string(&details.title),
            route: Route {
                from: sanitize_string(&details.from),
                to: sanitize_string(&details.to),
            },
            transport_type: details.transport_type,
            schedule: Schedule {
                departure_date: details.departure_date,
                departure_time: details.departure_time,
                arrival_time: details.arrival_time,
                duration: details.duration.map(|d| sanitize_string(&d)),
            },
            price: normalize_money(&details.price),
            total_seats: details.total_seats,
            available_seats: details.total_seats,
            features: details
                .features
                .iter()
                .map(|f| sanitize_string(f))
                .filter(|f| !f.is_empty())
                .collect(),
            vendor_id: vendor.id.clone(),
            vendor_name: Some(vendor.name.clone()),
            vendor_email: Some(vendor.email.clone()),
            status: TicketStatus::Pending,
            rejection_reason: None,
            is_advertised: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_publicly_listable(&self, vendor_flagged: bool) -> bool {
        self.status.is_listable() && !vendor_flagged
    }

    pub fn is_owned_by(&self, user: &User) -> bool {
        self.vendor_id == user.id
    }

    pub fn departs_at(&self, offset: FixedOffset) -> DateTime<Utc> {
        self.schedule.departs_at(offset)
    }
}

/// Vendor-supplied fields of a ticket submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTicket {
    pub title: String,
    #[serde(rename = "type")]
    pub transport_type: TransportType,
    pub from: String,
    pub to: String,
    pub departure_date: NaiveDate,
    #[serde(with = "clock_time")]
    pub departure_time: NaiveTime,
    #[serde(default, with = "clock_time::option")]
    pub arrival_time: Option<NaiveTime>,
    #[serde(default)]
    pub duration: Option<String>,
    pub price: BigDecimal,
    pub total_seats: i32,
    #[serde(default)]
    pub features: Vec<String>,
}

impl NewTicket {
    pub fn validate(&self) -> ValidationResult {
        let title = sanitize_string(&self.title);
        validate_required("title", &title)?;
        validate_max_len("title", &title, TITLE_MAX_LEN)?;

        let from = sanitize_string(&self.from);
        let to = sanitize_string(&self.to);
        validate_required("from", &from)?;
        validate_max_len("from", &from, PLACE_MAX_LEN)?;
        validate_required("to", &to)?;
        validate_max_len("to", &to, PLACE_MAX_LEN)?;
        if from.eq_ignore_ascii_case(&to) {
            return Err(ValidationError::new("to", "must differ from the origin"));
        }

        validate_money("price", &self.price)?;
        validate_min("totalSeats", self.total_seats, 1)?;

        if self.features.len() > MAX_FEATURES {
            return Err(ValidationError::new(
                "features",
                format!("must contain at most {} entries", MAX_FEATURES),
            ));
        }
        for feature in &self.features {
            validate_max_len("features", &sanitize_string(feature), FEATURE_MAX_LEN)?;
        }

        Ok(())
    }
}

/// `HH:MM` wall-clock times, also accepting `HH:MM:SS` on input.
pub mod clock_time {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn parse(raw: &str) -> Option<NaiveTime> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
            .ok()
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time '{}'", raw)))
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            time: &Option<NaiveTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match time {
                Some(t) => super::serialize(t, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveTime>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(raw) if raw.trim().is_empty() => Ok(None),
                Some(raw) => super::parse(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid time '{}'", raw))),
            }
        }
    }
}
