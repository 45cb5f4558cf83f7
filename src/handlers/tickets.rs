use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use super::JsonBody;
use crate::domain::NewTicket;
use crate::error::AppError;
use crate::middleware::{Caller, MaybeCaller};
use crate::services::{TicketFilters, TicketUpdate};
use crate::AppState;

pub async fn create_ticket(
    State(state): State<AppState>,
    caller: Caller,
    JsonBody(details): JsonBody<NewTicket>,
) -> Result<impl IntoResponse, AppError> {
    let ticket = state.inventory.submit_ticket(&caller.user, details).await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn list_tickets(
    State(state): State<AppState>,
    caller: MaybeCaller,
    Query(filters): Query<TicketFilters>,
) -> Result<impl IntoResponse, AppError> {
    let tickets = state.inventory.list_tickets(caller.user(), filters).await?;
    Ok(Json(tickets))
}

pub async fn list_advertised(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.inventory.list_advertised().await?))
}

pub async fn list_my_tickets(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.inventory.list_mine(&caller.user).await?))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    caller: MaybeCaller,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let ticket = state.inventory.get_ticket(caller.user(), id).await?;
    Ok(Json(ticket))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
    JsonBody(update): JsonBody<TicketUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let ticket = state.inventory.apply_update(&caller.user, id, update).await?;
    Ok(Json(ticket))
}

pub async fn delete_ticket(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.inventory.delete_ticket(&caller.user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
