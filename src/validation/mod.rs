use bigdecimal::{BigDecimal, ToPrimitive};
use std::fmt;

pub const REASON_MAX_LEN: usize = 500;
pub const NAME_MAX_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

/// Drops control characters and collapses runs of whitespace.
pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.chars().count() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_min(field: &'static str, value: i32, min: i32) -> ValidationResult {
    if value < min {
        return Err(ValidationError::new(field, format!("must be at least {}", min)));
    }

    Ok(())
}

pub fn validate_positive_amount(field: &'static str, amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new(field, "must be greater than zero"));
    }

    Ok(())
}

/// A positive amount with at most two decimal places whose minor units fit
/// the gateway's integer amounts.
pub fn validate_money(field: &'static str, amount: &BigDecimal) -> ValidationResult {
    validate_positive_amount(field, amount)?;
    if amount.with_scale(2) != *amount {
        return Err(ValidationError::new(field, "must have at most 2 decimal places"));
    }
    if (amount.clone() * BigDecimal::from(100)).to_i64().is_none() {
        return Err(ValidationError::new(field, "is too large"));
    }

    Ok(())
}

/// A free-text reason (rejection, cancellation). Returns the sanitized text.
pub fn validate_reason(field: &'static str, reason: Option<&str>) -> Result<String, ValidationError> {
    let reason = sanitize_string(reason.unwrap_or_default());
    validate_required(field, &reason)?;
    validate_max_len(field, &reason, REASON_MAX_LEN)?;
    Ok(reason)
}

pub fn validate_email(field: &'static str, email: &str) -> ValidationResult {
    let email = email.trim();
    validate_required(field, email)?;

    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ValidationError::new(field, "must be a valid email address")),
    }
}
