use std::path::PathBuf;
use std::sync::Arc;

use assessment_backend::{
    database::Store, middleware::auth::Claims, models::user::Role, routes,
    services::storage_service::LocalObjectStorage, AppState,
};
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "test_secret_key";
const BASE_URL: &str = "http://localhost:8080";

fn app() -> (Router, PathBuf) {
    let root = std::env::temp_dir().join(format!("assessment-api-{}", Uuid::new_v4()));
    let storage = Arc::new(LocalObjectStorage::new(root.clone(), BASE_URL));
    let state = AppState::new(Store::in_memory(), storage, SECRET.to_string());
    (routes::router(state), root)
}

fn token(user_id: i64, role: Role) -> String {
    let exp = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize;
    let claims = Claims {
        sub: user_id.to_string(),
        exp,
        role,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("encode token")
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, JsonValue) {
    let resp = app.clone().oneshot(req).await.expect("response");
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
    let body = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
    (status, body)
}

fn json_request(method: &str, uri: &str, bearer: Option<&str>, body: Option<JsonValue>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(t) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", t));
    }
    match body {
        Some(b) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(b.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

async fn register(app: &Router, login: &str, desired_role: &str) -> i64 {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/api/accounts/register",
            None,
            Some(json!({
                "email": format!("{}@school.test", login),
                "login": login,
                "password": "correct-horse",
                "desired_role": desired_role,
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "register: {}", body);
    body["user"]["id"].as_i64().expect("user id")
}

#[tokio::test]
async fn health_is_public() {
    let (app, _) = app();
    let (status, body) = send(&app, json_request("GET", "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let (app, _) = app();

    let (status, body) = send(&app, json_request("GET", "/api/accounts/me", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "unauthorized");

    let (status, _) = send(
        &app,
        json_request("GET", "/api/accounts/me", Some("not-a-jwt"), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn registration_files_a_role_request_and_admin_approves_it() {
    let (app, _) = app();
    let user_id = register(&app, "teacher01", "teacher").await;
    let admin = token(0, Role::Admin);

    let me = token(user_id, Role::Student);
    let (status, body) = send(&app, json_request("GET", "/api/accounts/me", Some(&me), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "student");
    assert!(body.get("password_hash").is_none());

    let (status, body) = send(
        &app,
        json_request("GET", "/api/admin/role-requests?status=pending", Some(&admin), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let request_id = body[0]["id"].as_i64().expect("request id");

    let (status, _) = send(
        &app,
        json_request("GET", "/api/admin/role-requests", Some(&me), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let uri = format!("/api/admin/role-requests/{}/approve", request_id);
    let (status, body) = send(&app, json_request("POST", &uri, Some(&admin), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "approved");

    let (status, body) = send(&app, json_request("POST", &uri, Some(&admin), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "role_request_already_resolved");

    let uri = format!("/api/admin/users/{}", user_id);
    let (_, body) = send(&app, json_request("GET", &uri, Some(&admin), None)).await;
    assert_eq!(body["role"], "teacher");
}

#[tokio::test]
async fn attempt_lifecycle_over_http() {
    let (app, _) = app();
    let teacher_id = register(&app, "teacher02", "student").await;
    let student_id = register(&app, "student02", "student").await;
    let teacher = token(teacher_id, Role::Teacher);
    let student = token(student_id, Role::Student);

    let (status, _) = send(
        &app,
        json_request("POST", "/api/teacher/tests", Some(&student), Some(json!({ "title": "Nope" }))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, test) = send(
        &app,
        json_request(
            "POST",
            "/api/teacher/tests",
            Some(&teacher),
            Some(json!({ "title": "Capitals", "description": "Europe" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(test["status"], "DRAFT");
    let test_id = test["id"].as_str().expect("test id").to_string();

    let (status, question) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/teacher/tests/{}/questions", test_id),
            Some(&teacher),
            Some(json!({
                "question_text": "Capital of France?",
                "points": 2,
                "answer_options": [
                    { "answer_text": "Paris", "is_correct": true },
                    { "answer_text": "Lyon" }
                ]
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let question_id = question["id"].as_str().expect("question id").to_string();
    let paris = question["options"]
        .as_array()
        .expect("options")
        .iter()
        .find(|o| o["is_correct"] == true)
        .and_then(|o| o["id"].as_str())
        .expect("correct option")
        .to_string();

    let start_uri = format!("/api/student/tests/{}/start", test_id);
    let (status, _) = send(&app, json_request("POST", &start_uri, Some(&student), None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        json_request(
            "PATCH",
            &format!("/api/teacher/tests/{}/status", test_id),
            Some(&teacher),
            Some(json!({ "status": "PUBLISHED" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, view) = send(
        &app,
        json_request("GET", &format!("/api/student/tests/{}", test_id), Some(&student), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!view.to_string().contains("is_correct"));

    let (status, attempt) = send(&app, json_request("POST", &start_uri, Some(&student), None)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(attempt["status"], "IN_PROGRESS");
    let attempt_id = attempt["attempt_id"].as_str().expect("attempt id").to_string();

    let (status, body) = send(&app, json_request("POST", &start_uri, Some(&student), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "active_attempt_exists");

    let (status, outcome) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/student/attempts/{}/answers", attempt_id),
            Some(&student),
            Some(json!({ "question_id": question_id, "chosen_answer_option_ids": [paris] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["is_correct"], true);

    let finish_uri = format!("/api/student/attempts/{}/finish", attempt_id);
    let (status, result) = send(&app, json_request("POST", &finish_uri, Some(&student), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["score"], 100.0);
    assert_eq!(result["status"], "COMPLETED");

    let (status, _) = send(&app, json_request("POST", &finish_uri, Some(&student), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, analytics) = send(
        &app,
        json_request(
            "GET",
            &format!("/api/teacher/tests/{}/analytics?search=france", test_id),
            Some(&teacher),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(analytics["total_attempts"], 1);
    assert_eq!(analytics["question_analytics"][0]["correct_answer_percentage"], 100.0);
}

#[tokio::test]
async fn invalid_pagination_is_rejected() {
    let (app, _) = app();
    let student_id = register(&app, "student03", "student").await;
    let student = token(student_id, Role::Student);

    let (status, body) = send(
        &app,
        json_request("GET", "/api/student/tests?limit=0", Some(&student), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "invalid_input");
}

#[tokio::test]
async fn teachers_upload_images_with_matching_signatures() {
    let (app, root) = app();
    let teacher_id = register(&app, "teacher04", "student").await;
    let teacher = token(teacher_id, Role::Teacher);

    let boundary = "assessment-boundary";
    let multipart = |file_name: &str, data: &[u8]| {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
        Request::builder()
            .method("POST")
            .uri("/api/uploads/images")
            .header(header::AUTHORIZATION, format!("Bearer {}", teacher))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .expect("request")
    };

    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
    let (status, body) = send(&app, multipart("diagram.png", &png)).await;
    assert_eq!(status, StatusCode::CREATED);
    let url = body["url"].as_str().expect("url");
    let prefix = format!("{}/uploads/images/", BASE_URL);
    assert!(url.starts_with(&prefix));
    let stored = root.join("images").join(&url[prefix.len()..]);
    assert!(stored.exists());

    let (status, _) = send(&app, multipart("diagram.png", b"not an image")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
