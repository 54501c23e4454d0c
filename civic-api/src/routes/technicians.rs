use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use civic_shared::errors::{AppError, AppResult, ErrorCode};
use civic_shared::middleware::{ApiJson, ApiPath};
use civic_shared::types::ApiResponse;

use crate::models::{Assignment, Technician};
use crate::registry::Entity;
use crate::rows::filter::{Condition, Sort};
use crate::rows::{decode_all, key};
use crate::routes::{ensure_email_free, inserted, normalize_email, or_not_found};
use crate::services::technician_service;
use crate::AppState;

pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(mut body): ApiJson<Value>,
) -> AppResult<(StatusCode, Json<ApiResponse<Technician>>)> {
    normalize_email(&mut body);
    ensure_email_free(&state.rows, Entity::Technicians, &body).await?;

    let technician: Technician = inserted(state.rows.insert_row(Entity::Technicians, &body).await?)?;

    tracing::info!(technician_id = %technician.id, department = %technician.department, "technician registered");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(technician, "Technician registered successfully")),
    ))
}

pub async fn list_technicians(State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<Vec<Technician>>>> {
    let rows = state
        .rows
        .select_rows(Entity::Technicians, vec![], None, Some(Sort::asc("name")))
        .await?;

    Ok(Json(ApiResponse::ok(decode_all(rows)?)))
}

#[derive(Debug, Deserialize)]
pub struct DepartmentRequest {
    pub department: String,
}

pub async fn by_department(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<DepartmentRequest>,
) -> AppResult<Json<ApiResponse<Vec<Technician>>>> {
    let rows = state
        .rows
        .select_rows(
            Entity::Technicians,
            vec![Condition::eq("department", req.department)],
            None,
            Some(Sort::asc("name")),
        )
        .await?;

    Ok(Json(ApiResponse::ok(decode_all(rows)?)))
}

/// Technicians of a department with no assignment. An empty result is a
/// 404 so dispatchers see the shortage.
pub async fn unassigned(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<DepartmentRequest>,
) -> AppResult<Json<ApiResponse<Vec<Technician>>>> {
    let free = technician_service::unassigned_in_department(&state.rows, &req.department).await?;
    if free.is_empty() {
        return Err(AppError::new(ErrorCode::NoTechniciansAvailable, "No technicians available"));
    }

    Ok(Json(ApiResponse::ok(free)))
}

pub async fn assignments(
    State(state): State<Arc<AppState>>,
    ApiPath(technician_id): ApiPath<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<Assignment>>>> {
    let id = technician_id.to_string();
    state
        .rows
        .select_by_id(Entity::Technicians, &key("id", id.clone()), Some(vec!["id".into()]))
        .await
        .map_err(or_not_found(ErrorCode::TechnicianNotFound, "Technician not found"))?;

    let rows = state
        .rows
        .select_rows(
            Entity::Assigned,
            vec![Condition::eq("technician_id", id)],
            None,
            Some(Sort::desc("created_at")),
        )
        .await?;

    Ok(Json(ApiResponse::ok(decode_all(rows)?)))
}
