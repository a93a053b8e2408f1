use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{
        pagination::Pagination,
        student_dto::{SearchAvailableQuery, StartAttemptResponse, SubmitAnswerRequest},
    },
    error::Result,
    models::user::{Caller, Role},
    AppState,
};

#[axum::debug_handler]
pub async fn list_available_tests(
    State(state): State<AppState>,
    caller: Caller,
    Query(page): Query<Pagination>,
    Query(query): Query<SearchAvailableQuery>,
) -> Result<impl IntoResponse> {
    caller.require(Role::Student)?;
    page.validate()?;
    let tests = state.attempt_service.list_available_tests(query, page).await?;
    Ok(Json(tests))
}

#[axum::debug_handler]
pub async fn get_test_for_passing(
    State(state): State<AppState>,
    caller: Caller,
    Path(test_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    caller.require(Role::Student)?;
    let test = state.attempt_service.test_for_passing(test_id).await?;
    Ok(Json(test))
}

#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    caller: Caller,
    Path(test_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let attempt = state.attempt_service.start_attempt(&caller, test_id).await?;
    Ok((StatusCode::CREATED, Json(StartAttemptResponse::from(attempt))))
}

#[axum::debug_handler]
pub async fn submit_answer(
    State(state): State<AppState>,
    caller: Caller,
    Path(attempt_id): Path<Uuid>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<impl IntoResponse> {
    let outcome = state
        .attempt_service
        .submit_answer(&caller, attempt_id, payload)
        .await?;
    Ok(Json(outcome))
}

#[axum::debug_handler]
pub async fn finish_attempt(
    State(state): State<AppState>,
    caller: Caller,
    Path(attempt_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let result = state.attempt_service.finish_attempt(&caller, attempt_id).await?;
    Ok(Json(result))
}

#[axum::debug_handler]
pub async fn attempt_history(
    State(state): State<AppState>,
    caller: Caller,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse> {
    page.validate()?;
    let history = state.attempt_service.attempt_history(&caller, page).await?;
    Ok(Json(history))
}

#[axum::debug_handler]
pub async fn stats(State(state): State<AppState>, caller: Caller) -> Result<impl IntoResponse> {
    let stats = state.attempt_service.student_stats(&caller).await?;
    Ok(Json(stats))
}
