//! HTTP-level tests driving the router in process against the memory store.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use civic_api::config::AppConfig;
use civic_api::store::MemoryStore;
use civic_api::AppState;

fn test_app() -> Router {
    civic_api::app(AppState::new(AppConfig::in_memory(), Arc::new(MemoryStore::new()), None))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>, token: Option<&str>) -> (StatusCode, Value) {
    send_raw(app, method, uri, body.map(|b| b.to_string()), token).await
}

/// Non-JSON response bodies come back as a JSON string so assertions fail
/// instead of the helper panicking.
async fn send_raw(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<String>,
    token: Option<&str>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Some(body), None).await
}

async fn register_citizen(app: &Router, email: &str) -> Value {
    let (status, body) = post(
        app,
        "/api/authUsers/register",
        json!({ "name": "Ana Ortiz", "email": email, "phone": "5550100" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"].clone()
}

/// Bootstrap the first admin and log in. Returns the bearer token.
async fn admin_token(app: &Router) -> String {
    let (status, body) = post(
        app,
        "/api/admin/create-admin",
        json!({ "email": "ops@city.gov", "password": "roads2024", "department": "roads" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, body) = post(app, "/api/admin/login", json!({ "email": "ops@city.gov", "password": "roads2024" })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"]["token"].as_str().unwrap().to_string()
}

async fn register_technician(app: &Router, name: &str, department: &str) -> String {
    let (status, body) = post(
        app,
        "/api/technicians/register",
        json!({
            "name": name,
            "email": format!("{}@city.gov", name.to_lowercase()),
            "phone": "5550199",
            "department": department,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["id"].as_str().unwrap().to_string()
}

async fn report_issue(app: &Router, email: &str, extra: Value) -> (StatusCode, Value) {
    let mut payload = json!({ "email": email, "title": "Pothole on 5th" });
    if let (Some(target), Value::Object(extra)) = (payload.as_object_mut(), extra) {
        target.extend(extra);
    }
    post(app, "/api/issues/create", payload).await
}

#[tokio::test]
async fn health_reports_store_status() {
    let app = test_app();
    let (status, body) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"][0]["name"], "store");
}

#[tokio::test]
async fn citizen_registration_and_lookup() {
    let app = test_app();
    let user = register_citizen(&app, "Ana@Example.com").await;
    assert!(user["id"].is_string());
    assert_eq!(user["email"], "ana@example.com");

    let (status, body) = send(&app, Method::GET, "/api/authUsers/by-email?email=ana@example.com", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], user["id"]);

    let (status, body) = send(&app, Method::GET, "/api/authUsers/by-email?email=nobody@example.com", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "User not found");
}

#[tokio::test]
async fn duplicate_email_is_a_bad_request() {
    let app = test_app();
    register_citizen(&app, "dup@example.com").await;

    let (status, body) = post(
        &app,
        "/api/authUsers/register",
        json!({ "name": "Other", "email": "DUP@example.com", "phone": "5550101" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Email already registered");
}

#[tokio::test]
async fn registration_validation_failures_are_400() {
    let app = test_app();
    let (status, body) = post(&app, "/api/authUsers/register", json!({ "email": "x@example.com", "phone": "5550100" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "\"name\" is required");

    let (status, body) = post(
        &app,
        "/api/authUsers/register",
        json!({ "name": "X", "email": "x@example.com", "phone": "5550100", "role": "admin" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "\"role\" is not allowed");
}

#[tokio::test]
async fn admin_login_failures_are_indistinguishable() {
    let app = test_app();
    admin_token(&app).await;

    let wrong_password = post(&app, "/api/admin/login", json!({ "email": "ops@city.gov", "password": "wrong-pass-1" })).await;
    let unknown_email = post(&app, "/api/admin/login", json!({ "email": "ghost@city.gov", "password": "roads2024" })).await;

    assert_eq!(wrong_password.0, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password.0, unknown_email.0);
    assert_eq!(wrong_password.1, unknown_email.1);
    assert_eq!(wrong_password.1["message"], "Invalid email or password");
}

#[tokio::test]
async fn admin_password_is_never_returned() {
    let app = test_app();
    let (_, body) = post(
        &app,
        "/api/admin/create-admin",
        json!({ "email": "first@city.gov", "password": "water2024", "department": "water" }),
    )
    .await;
    assert!(body["data"].get("password").is_none());

    let (status, body) = post(&app, "/api/admin/get-department", json!({ "email": "first@city.gov" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["department"], "water");

    let (status, _) = post(&app, "/api/admin/get-department", json!({ "email": "none@city.gov" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn further_admins_require_a_token() {
    let app = test_app();
    let token = admin_token(&app).await;
    let second = json!({ "email": "two@city.gov", "password": "parks2024", "department": "parks" });

    let (status, _) = post(&app, "/api/admin/create-admin", second.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, Method::POST, "/api/admin/create-admin", Some(second), Some(&token)).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/admin/create-admin",
        Some(json!({ "email": "three@city.gov", "password": "weak", "department": "parks" })),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
}

#[tokio::test]
async fn issue_latitude_is_range_checked_and_echoed() {
    let app = test_app();
    register_citizen(&app, "geo@example.com").await;

    let (status, body) = report_issue(&app, "geo@example.com", json!({ "latitude": 91 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("latitude"));

    let (status, body) = report_issue(&app, "geo@example.com", json!({ "latitude": 45.0, "longitude": -73.5 })).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["latitude"], json!(45.0));
    assert_eq!(body["data"]["status"], "pending");

    let (status, _) = send(&app, Method::GET, "/api/issues?status=pending", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn issue_for_unknown_citizen_is_404() {
    let app = test_app();
    let (status, body) = report_issue(&app, "stranger@example.com", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "User not found");
}

#[tokio::test]
async fn empty_lists_are_ok() {
    let app = test_app();
    let (status, body) = send(&app, Method::GET, "/api/issues?department=parks", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));

    let (status, body) = send(&app, Method::GET, "/api/pending-issues", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn query_endpoint_speaks_the_filter_dsl() {
    let app = test_app();
    register_citizen(&app, "dsl@example.com").await;
    report_issue(&app, "dsl@example.com", json!({ "title": "Broken light", "priority": "high" })).await;
    report_issue(&app, "dsl@example.com", json!({ "title": "Graffiti", "priority": "low" })).await;

    let (status, body) = post(
        &app,
        "/api/issues/query",
        json!({
            "filters": { "priority": { "op": "in", "value": ["high", "medium"] } },
            "columns": ["title", "priority"],
            "sort": { "column": "title", "order": "desc" },
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"], json!([{ "title": "Broken light", "priority": "high" }]));

    let (status, body) = post(&app, "/api/issues/query", json!({ "filters": { "title": { "op": "regex", "value": "." } } })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "unsupported filter operator: regex");

    let (status, body) = send(&app, Method::GET, "/api/issues/stats", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total"], 2);
    assert_eq!(body["data"]["by_status"]["pending"], 2);
}

#[tokio::test]
async fn issue_updates_need_an_admin_and_known_fields() {
    let app = test_app();
    let token = admin_token(&app).await;
    register_citizen(&app, "upd@example.com").await;
    let (_, body) = report_issue(&app, "upd@example.com", json!({})).await;
    let uri = format!("/api/issues/{}", body["data"]["id"].as_str().unwrap());

    let (status, _) = send(&app, Method::PATCH, &uri, Some(json!({ "priority": "high" })), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, Method::PATCH, &uri, Some(json!({ "severity": 3 })), Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "\"severity\" is not allowed");

    let (status, body) = send(&app, Method::PATCH, &uri, Some(json!({ "priority": "high" })), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["priority"], "high");

    let (status, _) = send(&app, Method::DELETE, &uri, None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unassigned_technicians_is_a_set_difference() {
    let app = test_app();
    let token = admin_token(&app).await;
    register_citizen(&app, "crew@example.com").await;
    let (_, body) = report_issue(&app, "crew@example.com", json!({ "department": "roads" })).await;
    let issue_id = body["data"]["id"].as_str().unwrap().to_string();

    let t1 = register_technician(&app, "Tess", "roads").await;
    let t2 = register_technician(&app, "Ugo", "roads").await;
    let t3 = register_technician(&app, "Vera", "roads").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/pending-issues/assign",
        Some(json!({ "issue_id": issue_id, "technician_id": t2 })),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, body) = post(&app, "/api/technicians/unassigned", json!({ "department": "roads" })).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<&str> = body["data"].as_array().unwrap().iter().map(|t| t["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec![t1.as_str(), t3.as_str()]);

    let (_, issue) = send(&app, Method::GET, &format!("/api/issues/{issue_id}"), None, None).await;
    assert_eq!(issue["data"]["status"], "in_progress");
}

#[tokio::test]
async fn no_free_technicians_is_404() {
    let app = test_app();
    let (status, body) = post(&app, "/api/technicians/unassigned", json!({ "department": "sewage" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "No technicians available");

    let token = admin_token(&app).await;
    register_citizen(&app, "busy@example.com").await;
    let (_, body) = report_issue(&app, "busy@example.com", json!({})).await;
    let only = register_technician(&app, "Wes", "sewage").await;
    send(
        &app,
        Method::POST,
        "/api/pending-issues/assign",
        Some(json!({ "issue_id": body["data"]["id"], "technician_id": only })),
        Some(&token),
    )
    .await;

    let (status, _) = post(&app, "/api/technicians/unassigned", json!({ "department": "sewage" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn assert_validation_envelope(status: StatusCode, body: &Value) {
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert_eq!(body["success"], false, "{body}");
    assert_eq!(body["code"], "E0002", "{body}");
    assert!(body["message"].as_str().is_some_and(|m| !m.is_empty()), "{body}");
}

#[tokio::test]
async fn request_parse_failures_use_the_error_envelope() {
    let app = test_app();

    let (status, body) = post(&app, "/api/admin/login", json!({ "email": "a@b.co" })).await;
    assert_validation_envelope(status, &body);
    assert!(body["message"].as_str().unwrap().contains("password"));

    let (status, body) = send_raw(&app, Method::POST, "/api/authUsers/register", Some("{not json".into()), None).await;
    assert_validation_envelope(status, &body);

    let (status, body) = send(&app, Method::GET, "/api/issues/not-a-uuid", None, None).await;
    assert_validation_envelope(status, &body);

    let (status, body) = send(&app, Method::GET, "/api/authUsers/by-email", None, None).await;
    assert_validation_envelope(status, &body);

    let (status, body) = send(&app, Method::POST, "/api/technicians/by-department", None, None).await;
    assert_validation_envelope(status, &body);
}

/// Registers a citizen, an issue and a technician, then assigns the issue.
/// Returns `(token, issue_id, technician_id, assignment_id)`.
async fn assigned_issue(app: &Router, email: &str, technician_name: &str) -> (String, String, String, String) {
    let token = admin_token(app).await;
    register_citizen(app, email).await;
    let (_, body) = report_issue(app, email, json!({})).await;
    let issue_id = body["data"]["id"].as_str().unwrap().to_string();
    let technician = register_technician(app, technician_name, "roads").await;

    let (status, body) = send(
        app,
        Method::POST,
        "/api/pending-issues/assign",
        Some(json!({ "issue_id": issue_id, "technician_id": technician })),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let assignment_id = body["data"]["id"].as_str().unwrap().to_string();
    (token, issue_id, technician, assignment_id)
}

#[tokio::test]
async fn rejected_resolution_writes_nothing() {
    let app = test_app();
    let (_, issue_id, _, assignment_id) = assigned_issue(&app, "half@example.com", "Yul").await;
    let resolve_uri = format!("/api/pending-issues/{assignment_id}/resolve");

    let (status, body) = post(&app, &resolve_uri, json!({ "resolution_image": "not a url" })).await;
    assert_validation_envelope(status, &body);
    assert_eq!(body["message"], "\"resolution_image\" must be a valid URL");

    let (status, body) = send_raw(&app, Method::POST, &resolve_uri, Some("{\"resolution_image\":".into()), None).await;
    assert_validation_envelope(status, &body);

    let (_, body) = send(&app, Method::GET, "/api/pending-issues", None, None).await;
    assert_eq!(body["data"][0]["id"], assignment_id.as_str());
    assert_eq!(body["data"][0]["status"], "assigned");

    let (_, body) = send(&app, Method::GET, &format!("/api/issues/{issue_id}"), None, None).await;
    assert_eq!(body["data"]["status"], "in_progress");
    assert_eq!(body["data"]["resolution_image"], Value::Null);

    let (status, body) = send(&app, Method::POST, &resolve_uri, None, None).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["assignment"]["status"], "resolved");
    assert_eq!(body["data"]["issue"]["status"], "resolved");
}

#[tokio::test]
async fn assignments_must_reference_existing_rows() {
    let app = test_app();
    let (token, issue_id, technician, _) = assigned_issue(&app, "refs@example.com", "Zed").await;
    let missing = "6f1c2a1e-4a4b-4a57-9d33-4f0cf3f8e2a1";

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/pending-issues/assign",
        Some(json!({ "issue_id": missing, "technician_id": technician })),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Issue not found");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/pending-issues/assign",
        Some(json!({ "issue_id": issue_id, "technician_id": missing })),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Technician not found");

    let (_, body) = send(&app, Method::GET, "/api/pending-issues", None, None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn resolving_an_unknown_assignment_is_404() {
    let app = test_app();
    let (status, body) = post(
        &app,
        "/api/pending-issues/6f1c2a1e-4a4b-4a57-9d33-4f0cf3f8e2a1/resolve",
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Assignment not found");
}

#[tokio::test]
async fn resolving_an_assignment_closes_the_issue() {
    let app = test_app();
    let token = admin_token(&app).await;
    register_citizen(&app, "fix@example.com").await;
    let (_, body) = report_issue(&app, "fix@example.com", json!({})).await;
    let issue_id = body["data"]["id"].as_str().unwrap().to_string();
    let technician = register_technician(&app, "Xan", "roads").await;

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/pending-issues/assign",
        Some(json!({ "issue_id": issue_id, "technician_id": technician })),
        Some(&token),
    )
    .await;
    let assignment_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = post(
        &app,
        &format!("/api/pending-issues/{assignment_id}/resolve"),
        json!({ "resolution_image": "https://cdn.city.gov/fixed.jpg" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["assignment"]["status"], "resolved");
    assert_eq!(body["data"]["issue"]["status"], "resolved");
    assert_eq!(body["data"]["issue"]["resolution_image"], "https://cdn.city.gov/fixed.jpg");

    let (status, body) = send(&app, Method::GET, &format!("/api/technicians/{technician}/assignments"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, Method::DELETE, "/api/pending-issues/resolved", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, Method::DELETE, "/api/pending-issues/resolved", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], 1);

    let (_, body) = send(&app, Method::GET, "/api/pending-issues?status=resolved", None, None).await;
    assert_eq!(body["data"], json!([]));
}
