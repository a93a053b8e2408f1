pub mod account;
pub mod admin;
pub mod health;
pub mod student;
pub mod teacher;
pub mod uploads;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, patch, post},
    Router,
};

use crate::{middleware::auth::require_bearer_auth, AppState};

/// All API routes. Everything except health and registration requires a bearer token.
pub fn router(state: AppState) -> Router {
    let public_api = Router::new()
        .route("/health", get(health::health))
        .route("/api/accounts/register", post(account::register));

    let account_api = Router::new()
        .route("/api/accounts/me", get(account::me))
        .route("/api/accounts/role-requests", post(account::file_role_request));

    let student_api = Router::new()
        .route("/api/student/tests", get(student::list_available_tests))
        .route("/api/student/tests/:test_id", get(student::get_test_for_passing))
        .route("/api/student/tests/:test_id/start", post(student::start_attempt))
        .route(
            "/api/student/attempts",
            get(student::attempt_history),
        )
        .route(
            "/api/student/attempts/:attempt_id/answers",
            post(student::submit_answer),
        )
        .route(
            "/api/student/attempts/:attempt_id/finish",
            post(student::finish_attempt),
        )
        .route("/api/student/stats", get(student::stats));

    let teacher_api = Router::new()
        .route(
            "/api/teacher/tests",
            get(teacher::list_tests)
                .post(teacher::create_test)
                .delete(teacher::delete_all_tests),
        )
        .route(
            "/api/teacher/tests/:test_id",
            get(teacher::get_test)
                .patch(teacher::edit_test)
                .delete(teacher::delete_test),
        )
        .route(
            "/api/teacher/tests/:test_id/status",
            patch(teacher::set_test_status),
        )
        .route(
            "/api/teacher/tests/:test_id/duplicate",
            post(teacher::duplicate_test),
        )
        .route(
            "/api/teacher/tests/:test_id/questions",
            post(teacher::add_question).delete(teacher::delete_all_questions),
        )
        .route(
            "/api/teacher/tests/:test_id/questions/:question_id",
            get(teacher::get_question)
                .patch(teacher::edit_question)
                .delete(teacher::delete_question),
        )
        .route(
            "/api/teacher/tests/:test_id/results",
            get(teacher::test_results),
        )
        .route(
            "/api/teacher/tests/:test_id/analytics",
            get(teacher::test_analytics),
        )
        .route("/api/teacher/students", get(teacher::list_students))
        .route(
            "/api/teacher/students/:student_id/results",
            get(teacher::student_results),
        )
        .route("/api/uploads/images", post(uploads::upload_image));

    let admin_api = Router::new()
        .route(
            "/api/admin/users",
            get(admin::list_users).post(admin::create_user),
        )
        .route(
            "/api/admin/users/:user_id",
            get(admin::get_user).delete(admin::delete_user),
        )
        .route("/api/admin/users/:user_id/role", patch(admin::change_role))
        .route("/api/admin/role-requests", get(admin::list_role_requests))
        .route(
            "/api/admin/role-requests/:request_id/approve",
            post(admin::approve_role_request),
        )
        .route(
            "/api/admin/role-requests/:request_id/reject",
            post(admin::reject_role_request),
        );

    let protected_api = account_api
        .merge(student_api)
        .merge(teacher_api)
        .merge(admin_api)
        .route_layer(from_fn_with_state(state.clone(), require_bearer_auth));

    public_api.merge(protected_api).with_state(state)
}
