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
        teacher_dto::{
            AnalyticsQuery, CreateQuestionPayload, CreateTestPayload, EditQuestionPayload,
            EditTestPayload, SearchStudentQuery, SearchTestQuery, SetTestStatusPayload,
        },
    },
    error::Result,
    models::user::Caller,
    AppState,
};

#[axum::debug_handler]
pub async fn create_test(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<CreateTestPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let test = state.test_service.create_test(&caller, payload).await?;
    Ok((StatusCode::CREATED, Json(test)))
}

#[axum::debug_handler]
pub async fn list_tests(
    State(state): State<AppState>,
    caller: Caller,
    Query(page): Query<Pagination>,
    Query(query): Query<SearchTestQuery>,
) -> Result<impl IntoResponse> {
    page.validate()?;
    let tests = state.test_service.list_tests(&caller, query, page).await?;
    Ok(Json(tests))
}

#[axum::debug_handler]
pub async fn delete_all_tests(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse> {
    let summary = state.test_service.delete_all_tests(&caller).await?;
    Ok(Json(summary))
}

#[axum::debug_handler]
pub async fn get_test(
    State(state): State<AppState>,
    caller: Caller,
    Path(test_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let test = state.test_service.get_test(&caller, test_id).await?;
    Ok(Json(test))
}

#[axum::debug_handler]
pub async fn edit_test(
    State(state): State<AppState>,
    caller: Caller,
    Path(test_id): Path<Uuid>,
    Json(payload): Json<EditTestPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let test = state.test_service.edit_test(&caller, test_id, payload).await?;
    Ok(Json(test))
}

#[axum::debug_handler]
pub async fn delete_test(
    State(state): State<AppState>,
    caller: Caller,
    Path(test_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let summary = state.test_service.delete_test(&caller, test_id).await?;
    Ok(Json(summary))
}

#[axum::debug_handler]
pub async fn set_test_status(
    State(state): State<AppState>,
    caller: Caller,
    Path(test_id): Path<Uuid>,
    Json(payload): Json<SetTestStatusPayload>,
) -> Result<impl IntoResponse> {
    let test = state
        .test_service
        .set_test_status(&caller, test_id, payload.status)
        .await?;
    Ok(Json(test))
}

#[axum::debug_handler]
pub async fn duplicate_test(
    State(state): State<AppState>,
    caller: Caller,
    Path(test_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let copy = state.test_service.duplicate_test(&caller, test_id).await?;
    Ok((StatusCode::CREATED, Json(copy)))
}

#[axum::debug_handler]
pub async fn add_question(
    State(state): State<AppState>,
    caller: Caller,
    Path(test_id): Path<Uuid>,
    Json(payload): Json<CreateQuestionPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let question = state.test_service.add_question(&caller, test_id, payload).await?;
    Ok((StatusCode::CREATED, Json(question)))
}

#[axum::debug_handler]
pub async fn delete_all_questions(
    State(state): State<AppState>,
    caller: Caller,
    Path(test_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let summary = state.test_service.delete_all_questions(&caller, test_id).await?;
    Ok(Json(summary))
}

#[axum::debug_handler]
pub async fn get_question(
    State(state): State<AppState>,
    caller: Caller,
    Path((test_id, question_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let question = state
        .test_service
        .get_question(&caller, test_id, question_id)
        .await?;
    Ok(Json(question))
}

#[axum::debug_handler]
pub async fn edit_question(
    State(state): State<AppState>,
    caller: Caller,
    Path((test_id, question_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<EditQuestionPayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;
    let question = state
        .test_service
        .edit_question(&caller, test_id, question_id, payload)
        .await?;
    Ok(Json(question))
}

#[axum::debug_handler]
pub async fn delete_question(
    State(state): State<AppState>,
    caller: Caller,
    Path((test_id, question_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse> {
    let summary = state
        .test_service
        .delete_question(&caller, test_id, question_id)
        .await?;
    Ok(Json(summary))
}

#[axum::debug_handler]
pub async fn test_results(
    State(state): State<AppState>,
    caller: Caller,
    Path(test_id): Path<Uuid>,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse> {
    page.validate()?;
    let results = state.test_service.test_results(&caller, test_id, page).await?;
    Ok(Json(results))
}

#[axum::debug_handler]
pub async fn test_analytics(
    State(state): State<AppState>,
    caller: Caller,
    Path(test_id): Path<Uuid>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse> {
    let analytics = state
        .analytics_service
        .test_analytics(&caller, test_id, query.search.as_deref())
        .await?;
    Ok(Json(analytics))
}

#[axum::debug_handler]
pub async fn list_students(
    State(state): State<AppState>,
    caller: Caller,
    Query(page): Query<Pagination>,
    Query(query): Query<SearchStudentQuery>,
) -> Result<impl IntoResponse> {
    page.validate()?;
    let students = state.test_service.students(&caller, query, page).await?;
    Ok(Json(students))
}

#[axum::debug_handler]
pub async fn student_results(
    State(state): State<AppState>,
    caller: Caller,
    Path(student_id): Path<i64>,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse> {
    page.validate()?;
    let results = state
        .test_service
        .student_results(&caller, student_id, page)
        .await?;
    Ok(Json(results))
}
