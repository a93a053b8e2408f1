use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(#[from] NotFound),

    #[error("Conflict: {0}")]
    Conflict(#[from] Conflict),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Object storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Multipart error: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Which resource could not be located (or is not visible to the caller).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotFound {
    #[error("test {0} not found or not published")]
    Test(Uuid),
    #[error("test attempt {0} not found")]
    Attempt(Uuid),
    #[error("question {0} not found")]
    Question(Uuid),
    #[error("question {question_id} not found in test {test_id}")]
    QuestionNotInTest { question_id: Uuid, test_id: Uuid },
    #[error("answer option {0} not found")]
    AnswerOption(Uuid),
    #[error("user {0} not found")]
    User(i64),
    #[error("role request {0} not found")]
    RoleRequest(i64),
    #[error("resource not found")]
    Resource,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Conflict {
    #[error("an attempt is already in progress; finish it before starting a new one")]
    ActiveAttemptExists,
    #[error("test attempt {0} is already completed")]
    AlreadyFinished(Uuid),
    #[error("a test with this title already exists for this author")]
    DuplicateTitle,
    #[error("an account with this email or login already exists")]
    DuplicateAccount,
    #[error("a pending role request already exists for this account")]
    PendingRoleRequestExists,
    #[error("role request {0} has already been resolved")]
    RoleRequestAlreadyResolved(i64),
}

impl Conflict {
    fn code(&self) -> &'static str {
        match self {
            Conflict::ActiveAttemptExists => "active_attempt_exists",
            Conflict::AlreadyFinished(_) => "already_finished",
            Conflict::DuplicateTitle => "duplicate_title",
            Conflict::DuplicateAccount => "duplicate_account",
            Conflict::PendingRoleRequestExists => "pending_role_request_exists",
            Conflict::RoleRequestAlreadyResolved(_) => "role_request_already_resolved",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, kind, error_message) = match self {
            Error::NotFound(err) => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
            Error::Conflict(err) => (StatusCode::CONFLICT, err.code(), err.to_string()),
            Error::InvalidInput(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_input", msg),
            Error::Validation(err) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_input", err.to_string()),
            Error::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "bad_request", err.to_string()),
            Error::Multipart(err) => (StatusCode::BAD_REQUEST, "bad_request", err.to_string()),
            Error::Database(err) => {
                tracing::error!(error = ?err, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", "Database error".to_string())
            }
            Error::Storage(msg) => (StatusCode::BAD_GATEWAY, "storage", msg),
            Error::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "An unexpected error occurred".to_string(),
            ),
        };

        let body = Json(json!({ "error": error_message, "kind": kind }));
        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if let Some(conflict) = db.constraint().and_then(conflict_for_constraint) {
                return Error::Conflict(conflict);
            }
            if db.is_foreign_key_violation() {
                return Error::NotFound(NotFound::Resource);
            }
            if db.is_check_violation() {
                return Error::InvalidInput(db.message().to_string());
            }
        }
        match err {
            sqlx::Error::RowNotFound => Error::NotFound(NotFound::Resource),
            other => Error::Database(other),
        }
    }
}

/// Maps the named uniqueness constraints from `migrations/` onto the conflict taxonomy.
fn conflict_for_constraint(name: &str) -> Option<Conflict> {
    match name {
        "test_attempts_one_in_progress_per_student" => Some(Conflict::ActiveAttemptExists),
        "tests_teacher_title_key" => Some(Conflict::DuplicateTitle),
        "users_email_key" | "users_login_key" => Some(Conflict::DuplicateAccount),
        "role_requests_one_pending_per_user" => Some(Conflict::PendingRoleRequestExists),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_constraints_map_to_conflicts() {
        assert_eq!(
            conflict_for_constraint("test_attempts_one_in_progress_per_student"),
            Some(Conflict::ActiveAttemptExists)
        );
        assert_eq!(
            conflict_for_constraint("tests_teacher_title_key"),
            Some(Conflict::DuplicateTitle)
        );
        assert_eq!(conflict_for_constraint("users_login_key"), Some(Conflict::DuplicateAccount));
        assert_eq!(conflict_for_constraint("questions_pkey"), None);
    }

    #[test]
    fn conflicts_render_as_409() {
        let resp = Error::Conflict(Conflict::ActiveAttemptExists).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = Error::NotFound(NotFound::Attempt(Uuid::nil())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = Error::Forbidden("not yours".into()).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
