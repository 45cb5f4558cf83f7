use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::InvalidTransition;
use crate::gateway::GatewayError;
use crate::ports::RepositoryError;
use crate::validation::ValidationError;

/// Why a caller could not be authenticated. `Expired` is reported separately
/// so clients can refresh their token once and retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Missing,
    Invalid,
    Expired,
}

impl AuthFailure {
    pub fn message(&self) -> &'static str {
        match self {
            AuthFailure::Missing => "No token provided",
            AuthFailure::Invalid => "Invalid token",
            AuthFailure::Expired => "Token expired",
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("{}", .0.message())]
    Unauthenticated(AuthFailure),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not enough seats available: requested {requested}, available {available}")]
    InventoryConflict { requested: i32, available: i32 },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Advertising limit of {0} tickets reached")]
    AdvertisingCapReached(i64),

    #[error("Departure has already passed")]
    DepartureClosed,

    #[error("Payment not completed: gateway reports '{0}'")]
    PaymentNotCompleted(String),

    #[error("Payment gateway error: {0}")]
    PaymentGateway(#[from] GatewayError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::PaymentNotCompleted(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InventoryConflict { .. }
            | AppError::InvalidTransition(_)
            | AppError::AdvertisingCapReached(_)
            | AppError::DepartureClosed => StatusCode::CONFLICT,
            AppError::PaymentGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthenticated(AuthFailure::Expired) => "TOKEN_EXPIRED",
            AppError::Unauthenticated(_) => "UNAUTHENTICATED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InventoryConflict { .. } => "INVENTORY_CONFLICT",
            AppError::InvalidTransition(_) => "INVALID_TRANSITION",
            AppError::AdvertisingCapReached(_) => "ADVERTISING_CAP_REACHED",
            AppError::DepartureClosed => "DEPARTURE_CLOSED",
            AppError::PaymentNotCompleted(_) => "PAYMENT_NOT_COMPLETED",
            AppError::PaymentGateway(_) => "PAYMENT_GATEWAY_ERROR",
            AppError::Database(_) | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Internal(_) => "Internal server error".to_string(),
            AppError::PaymentGateway(e) => e.public_message(),
            other => other.to_string(),
        }
    }
}

impl From<InvalidTransition> for AppError {
    fn from(err: InvalidTransition) -> Self {
        AppError::InvalidTransition(err.to_string())
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                AppError::NotFound(format!("{} {} not found", entity, id))
            }
            RepositoryError::InsufficientSeats {
                requested,
                available,
            } => AppError::InventoryConflict {
                requested,
                available,
            },
            RepositoryError::AdvertisingCapReached { cap } => AppError::AdvertisingCapReached(cap),
            RepositoryError::Conflict(msg) => AppError::InvalidTransition(msg),
            RepositoryError::Corrupt(msg) => AppError::Internal(msg),
            RepositoryError::Database(e) => AppError::Database(e),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            AppError::Database(_) | AppError::Internal(_) => {
                tracing::error!(error = ?self, "Request failed with internal error");
            }
            AppError::PaymentGateway(_) => {
                tracing::warn!(error = %self, "Payment gateway call failed");
            }
            _ => tracing::debug!(error = %self, status = status.as_u16(), "Request rejected"),
        }

        let body = Json(json!({
            "error": self.public_message(),
            "code": self.code(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
