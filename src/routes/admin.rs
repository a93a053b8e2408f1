use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use validator::Validate;

use crate::{
    dto::{
        account_dto::{ChangeRolePayload, CreateAccountPayload, RoleRequestQuery, SearchAccountQuery},
        pagination::Pagination,
    },
    error::Result,
    models::user::Caller,
    AppState,
};

#[axum::debug_handler]
pub async fn create_user(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<CreateAccountPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let user = state.account_service.create_account(&caller, payload).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[axum::debug_handler]
pub async fn list_users(
    State(state): State<AppState>,
    caller: Caller,
    Query(page): Query<Pagination>,
    Query(query): Query<SearchAccountQuery>,
) -> Result<impl IntoResponse> {
    page.validate()?;
    let users = state.account_service.list_accounts(&caller, query, page).await?;
    Ok(Json(users))
}

#[axum::debug_handler]
pub async fn get_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let user = state.account_service.account(&caller, user_id).await?;
    Ok(Json(user))
}

#[axum::debug_handler]
pub async fn delete_user(
    State(state): State<AppState>,
    caller: Caller,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let deletion = state.account_service.delete_account(&caller, user_id).await?;
    Ok(Json(deletion))
}

#[axum::debug_handler]
pub async fn change_role(
    State(state): State<AppState>,
    caller: Caller,
    Path(user_id): Path<i64>,
    Json(payload): Json<ChangeRolePayload>,
) -> Result<impl IntoResponse> {
    let user = state
        .account_service
        .change_role(&caller, user_id, payload.role)
        .await?;
    Ok(Json(user))
}

#[axum::debug_handler]
pub async fn list_role_requests(
    State(state): State<AppState>,
    caller: Caller,
    Query(page): Query<Pagination>,
    Query(query): Query<RoleRequestQuery>,
) -> Result<impl IntoResponse> {
    page.validate()?;
    let requests = state
        .account_service
        .list_role_requests(&caller, query.status, page)
        .await?;
    Ok(Json(requests))
}

#[axum::debug_handler]
pub async fn approve_role_request(
    State(state): State<AppState>,
    caller: Caller,
    Path(request_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let request = state
        .account_service
        .approve_role_request(&caller, request_id)
        .await?;
    Ok(Json(request))
}

#[axum::debug_handler]
pub async fn reject_role_request(
    State(state): State<AppState>,
    caller: Caller,
    Path(request_id): Path<i64>,
) -> Result<impl IntoResponse> {
    let request = state
        .account_service
        .reject_role_request(&caller, request_id)
        .await?;
    Ok(Json(request))
}
