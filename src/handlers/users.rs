use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};

use super::JsonBody;
use crate::error::AppError;
use crate::middleware::{Caller, Identity};
use crate::services::{Registration, UserUpdate};
use crate::AppState;

/// Creates or refreshes the caller's account. The only route open to
/// verified but unregistered identities.
pub async fn register(
    State(state): State<AppState>,
    identity: Identity,
    body: Option<Json<Registration>>,
) -> Result<impl IntoResponse, AppError> {
    let profile = body.map(|Json(profile)| profile).unwrap_or_default();
    let user = state.users.register(&identity, profile).await?;
    Ok(Json(user))
}

pub async fn me(caller: Caller) -> impl IntoResponse {
    Json(caller.user)
}

pub async fn list_users(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.users.list(&caller.user).await?))
}

pub async fn update_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    JsonBody(update): JsonBody<UserUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.users.update(&caller.user, &id, update).await?;
    Ok(Json(user))
}
