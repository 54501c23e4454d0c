use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use civic_shared::errors::{AppResult, ErrorCode};
use civic_shared::middleware::{ApiJson, ApiQuery};
use civic_shared::types::ApiResponse;

use crate::models::User;
use crate::registry::Entity;
use crate::rows::{decode, key};
use crate::routes::{ensure_email_free, inserted, normalize_email, or_not_found};
use crate::AppState;

pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(mut body): ApiJson<Value>,
) -> AppResult<(StatusCode, Json<ApiResponse<User>>)> {
    normalize_email(&mut body);
    ensure_email_free(&state.rows, Entity::Users, &body).await?;

    let user: User = inserted(state.rows.insert_row(Entity::Users, &body).await?)?;

    tracing::info!(user_id = %user.id, "citizen registered");

    Ok((StatusCode::CREATED, Json(ApiResponse::ok_with_message(user, "User registered successfully"))))
}

#[derive(Debug, Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

pub async fn get_by_email(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<EmailQuery>,
) -> AppResult<Json<ApiResponse<User>>> {
    let row = state
        .rows
        .select_by_id(Entity::Users, &key("email", query.email.trim().to_lowercase()), None)
        .await
        .map_err(or_not_found(ErrorCode::UserNotFound, "User not found"))?;

    Ok(Json(ApiResponse::ok(decode(row)?)))
}
