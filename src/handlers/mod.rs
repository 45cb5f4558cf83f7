pub mod bookings;
pub mod payments;
pub mod tickets;
pub mod users;

use async_trait::async_trait;
use axum::{
    extract::{FromRequest, Request, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::de::DeserializeOwned;

use crate::error::AppError;
use crate::validation::ValidationError;
use crate::AppState;

/// JSON request body whose rejections render as validation errors.
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBody(value)),
            Err(rejection) => Err(ValidationError::new("body", rejection.body_text()).into()),
        }
    }
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.check(state.start_time).await;
    let status_code = if report.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(report))
}
