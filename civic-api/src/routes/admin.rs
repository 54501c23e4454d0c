use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use civic_shared::errors::{AppError, AppResult, ErrorCode};
use civic_shared::middleware::{ApiJson, OptionalAdminUser};
use civic_shared::types::ApiResponse;

use crate::models::Admin;
use crate::registry::Entity;
use crate::rows::{decode, key, RowError};
use crate::routes::{ensure_email_free, inserted, normalize_email, or_not_found};
use crate::services::auth_service;
use crate::store::StoreError;
use crate::AppState;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// Create an administrator. The very first admin may be created without a
/// token; after that an admin bearer token is required.
pub async fn create_admin(
    State(state): State<Arc<AppState>>,
    OptionalAdminUser(caller): OptionalAdminUser,
    ApiJson(mut body): ApiJson<Value>,
) -> AppResult<(StatusCode, Json<ApiResponse<Admin>>)> {
    if caller.is_none() {
        let existing = state
            .rows
            .select_rows(Entity::Admins, vec![], Some(vec!["id".into()]), None)
            .await?;
        if !existing.is_empty() {
            return Err(AppError::unauthorized("admin token required"));
        }
    }

    normalize_email(&mut body);
    ensure_email_free(&state.rows, Entity::Admins, &body).await?;

    if let Some(password) = body.get("password").and_then(Value::as_str) {
        auth_service::validate_password(password)?;
        let hash = auth_service::hash_password(password)?;
        body["password"] = Value::String(hash);
    }

    let admin: Admin = inserted(state.rows.insert_row(Entity::Admins, &body).await?)?;

    tracing::info!(
        admin_id = %admin.id,
        created_by = ?caller.as_ref().map(|c| c.id),
        department = %admin.department,
        "admin created"
    );

    Ok((StatusCode::CREATED, Json(ApiResponse::ok_with_message(admin, "Admin created successfully"))))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub admin: Admin,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> AppResult<Json<ApiResponse<LoginResponse>>> {
    let email = req.email.trim().to_lowercase();

    let admin: Admin = match state.rows.select_by_id(Entity::Admins, &key("email", email), None).await {
        Ok(row) => decode(row)?,
        Err(RowError::Store(StoreError::NotFound { .. })) => {
            auth_service::verify_against_dummy(&req.password);
            return Err(AppError::new(ErrorCode::InvalidCredentials, INVALID_CREDENTIALS));
        }
        Err(e) => return Err(e.into()),
    };

    if !auth_service::verify_password(&req.password, &admin.password)? {
        return Err(AppError::new(ErrorCode::InvalidCredentials, INVALID_CREDENTIALS));
    }

    let token = auth_service::issue_token(&admin, &state.config.jwt_secret, state.config.jwt_access_ttl)?;

    tracing::info!(admin_id = %admin.id, "admin logged in");

    Ok(Json(ApiResponse::ok(LoginResponse {
        token: token.access_token,
        token_type: token.token_type,
        expires_in: token.expires_in,
        admin,
    })))
}

#[derive(Debug, Deserialize)]
pub struct DepartmentRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct DepartmentResponse {
    pub department: String,
}

pub async fn get_department(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<DepartmentRequest>,
) -> AppResult<Json<ApiResponse<DepartmentResponse>>> {
    let row = state
        .rows
        .select_by_id(
            Entity::Admins,
            &key("email", req.email.trim().to_lowercase()),
            Some(vec!["department".into()]),
        )
        .await
        .map_err(or_not_found(ErrorCode::AdminNotFound, "Admin not found"))?;

    let department = row
        .get("department")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::internal("admin row has no department"))?
        .to_string();

    Ok(Json(ApiResponse::ok(DepartmentResponse { department })))
}
