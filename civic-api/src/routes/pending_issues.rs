use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use civic_shared::errors::{AppError, AppResult, ErrorCode};
use civic_shared::middleware::{AdminUser, ApiJson, ApiPath, ApiQuery, OptionalAdminUser, OptionalApiJson};
use civic_shared::types::ApiResponse;

use crate::events::publisher;
use crate::models::{Assignment, AssignmentStatus, Issue, IssueStatus, Technician};
use crate::registry::{Entity, SchemaMode};
use crate::rows::filter::{Condition, Sort};
use crate::rows::{decode, decode_all, key};
use crate::routes::{inserted, or_not_found};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub status: Option<String>,
}

pub async fn list_assignments(
    State(state): State<Arc<AppState>>,
    ApiQuery(query): ApiQuery<StatusQuery>,
) -> AppResult<Json<ApiResponse<Vec<Assignment>>>> {
    let filters = query
        .status
        .map(|status| vec![Condition::eq("status", status)])
        .unwrap_or_default();
    let rows = state
        .rows
        .select_rows(Entity::Assigned, filters, None, Some(Sort::desc("created_at")))
        .await?;

    Ok(Json(ApiResponse::ok(decode_all(rows)?)))
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub issue_id: Uuid,
    pub technician_id: Uuid,
}

/// Hand an issue to a technician and move the issue to `in_progress`.
pub async fn assign(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    ApiJson(req): ApiJson<AssignRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<Assignment>>)> {
    let issue_key = key("id", req.issue_id.to_string());
    state
        .rows
        .select_by_id(Entity::Issues, &issue_key, Some(vec!["id".into()]))
        .await
        .map_err(or_not_found(ErrorCode::IssueNotFound, "Issue not found"))?;

    let technician: Technician = decode(
        state
            .rows
            .select_by_id(Entity::Technicians, &key("id", req.technician_id.to_string()), None)
            .await
            .map_err(or_not_found(ErrorCode::TechnicianNotFound, "Technician not found"))?,
    )?;

    let assignment: Assignment = inserted(
        state
            .rows
            .insert_row(
                Entity::Assigned,
                &json!({
                    "issue_id": req.issue_id,
                    "technician_id": technician.id,
                    "department": technician.department,
                }),
            )
            .await?,
    )?;

    state
        .rows
        .update_row_by_id(Entity::Issues, &issue_key, &json!({ "status": IssueStatus::InProgress }))
        .await?;

    tracing::info!(
        assignment_id = %assignment.id,
        issue_id = %assignment.issue_id,
        technician_id = %assignment.technician_id,
        admin_id = %admin.id,
        "issue assigned"
    );

    publisher::publish_issue_assigned(state.rabbitmq.as_ref(), &assignment).await;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok_with_message(assignment, "Issue assigned"))))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolveRequest {
    pub resolution_image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Resolution {
    pub assignment: Assignment,
    pub issue: Issue,
}

/// Close out an assignment and mark its issue resolved. The issue changes
/// are validated before either row is written.
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    OptionalAdminUser(admin): OptionalAdminUser,
    ApiPath(assignment_id): ApiPath<Uuid>,
    OptionalApiJson(body): OptionalApiJson<ResolveRequest>,
) -> AppResult<Json<ApiResponse<Resolution>>> {
    let req = body.unwrap_or_default();
    let assignment_key = key("id", assignment_id.to_string());

    let pending: Assignment = decode(
        state
            .rows
            .select_by_id(Entity::Assigned, &assignment_key, None)
            .await
            .map_err(or_not_found(ErrorCode::AssignmentNotFound, "Assignment not found"))?,
    )?;

    let mut changes = json!({ "status": IssueStatus::Resolved });
    if let Some(image) = req.resolution_image {
        changes["resolution_image"] = json!(image);
    }
    Entity::Issues
        .validate(&changes, SchemaMode::Partial)
        .map_err(AppError::Validation)?;

    let issue: Issue = decode(
        state
            .rows
            .update_row_by_id(Entity::Issues, &key("id", pending.issue_id.to_string()), &changes)
            .await
            .map_err(or_not_found(ErrorCode::IssueNotFound, "Issue not found"))?,
    )?;

    let assignment: Assignment = decode(
        state
            .rows
            .update_row_by_id(
                Entity::Assigned,
                &assignment_key,
                &json!({ "status": AssignmentStatus::Resolved }),
            )
            .await
            .map_err(or_not_found(ErrorCode::AssignmentNotFound, "Assignment not found"))?,
    )?;

    tracing::info!(assignment_id = %assignment.id, issue_id = %issue.id, "issue resolved");

    publisher::publish_issue_resolved(state.rabbitmq.as_ref(), &assignment, admin.map(|a| a.id)).await;

    Ok(Json(ApiResponse::ok(Resolution { assignment, issue })))
}

#[derive(Debug, Serialize)]
pub struct Dropped {
    pub deleted: usize,
}

pub async fn drop_resolved(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
) -> AppResult<Json<ApiResponse<Dropped>>> {
    let deleted = state
        .rows
        .drop_rows(
            Entity::Assigned,
            vec![Condition::eq("status", AssignmentStatus::Resolved.as_str())],
        )
        .await?;

    tracing::info!(count = deleted.len(), admin_id = %admin.id, "resolved assignments cleared");

    Ok(Json(ApiResponse::ok(Dropped { deleted: deleted.len() })))
}
