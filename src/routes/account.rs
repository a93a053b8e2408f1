use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use validator::Validate;

use crate::{
    dto::account_dto::{RegisterPayload, RoleRequestPayload},
    error::Result,
    models::user::Caller,
    AppState,
};

#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let registration = state.account_service.register(payload).await?;
    Ok((StatusCode::CREATED, Json(registration)))
}

#[axum::debug_handler]
pub async fn me(State(state): State<AppState>, caller: Caller) -> Result<impl IntoResponse> {
    let user = state.account_service.me(&caller).await?;
    Ok(Json(user))
}

#[axum::debug_handler]
pub async fn file_role_request(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<RoleRequestPayload>,
) -> Result<impl IntoResponse> {
    let request = state
        .account_service
        .file_role_request(&caller, payload.requested_role)
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}
