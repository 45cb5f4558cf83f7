use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use super::JsonBody;
use crate::error::AppError;
use crate::middleware::Caller;
use crate::services::BookingDecision;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    pub ticket_id: Uuid,
    pub number_of_seats: i32,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn create_booking(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(request): JsonBody<CreateBookingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let booking = state
        .reservations
        .create_booking(&caller.user, request.ticket_id, request.number_of_seats)
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

pub async fn list_bookings(
    State(state): State<AppState>,
    caller: Caller,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let limit = pagination.limit.unwrap_or(50);
    let offset = pagination.offset.unwrap_or(0);

    let bookings = state
        .reservations
        .list_all(&caller.user, limit, offset)
        .await?;
    Ok(Json(bookings))
}

pub async fn list_my_bookings(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.reservations.list_mine(&caller.user).await?))
}

pub async fn list_requested(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.reservations.list_requested(&caller.user).await?))
}

pub async fn revenue(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.reservations.revenue(&caller.user).await?))
}

pub async fn get_booking(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.reservations.get_booking(&caller.user, id).await?))
}

/// Vendor decision: `{"status": "accepted"}` or `{"status": "rejected", "reason": ...}`.
pub async fn decide_booking(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(decision): JsonBody<BookingDecision>,
) -> Result<impl IntoResponse, AppError> {
    let booking = state.reservations.decide(&caller.user, id, decision).await?;
    Ok(Json(booking))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let booking = state.reservations.cancel_booking(&caller.user, id).await?;
    Ok(Json(booking))
}
