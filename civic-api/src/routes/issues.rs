use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use civic_shared::errors::{AppError, AppResult, ErrorCode};
use civic_shared::middleware::{AdminUser, ApiJson, ApiPath, ApiQuery};
use civic_shared::types::ApiResponse;

use crate::events::publisher;
use crate::models::{Issue, IssueStatus};
use crate::registry::Entity;
use crate::rows::filter::{parse_filters, Condition, Sort, SortSpec};
use crate::rows::{decode, decode_all, key};
use crate::routes::{inserted, or_not_found};
use crate::store::Row;
use crate::AppState;

/// Report an issue on behalf of the citizen identified by `email`.
pub async fn create_issue(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<Value>,
) -> AppResult<(StatusCode, Json<ApiResponse<Issue>>)> {
    let Value::Object(mut fields) = body else {
        return Err(AppError::new(ErrorCode::ValidationError, "\"value\" must be of type object"));
    };

    let email = match fields.remove("email") {
        Some(Value::String(email)) => email.trim().to_lowercase(),
        Some(_) => return Err(AppError::new(ErrorCode::ValidationError, "\"email\" must be a string")),
        None => return Err(AppError::new(ErrorCode::ValidationError, "\"email\" is required")),
    };

    let user = state
        .rows
        .select_by_id(Entity::Users, &key("email", email), Some(vec!["id".into()]))
        .await
        .map_err(or_not_found(ErrorCode::UserNotFound, "User not found"))?;
    let user_id = user
        .get("id")
        .cloned()
        .ok_or_else(|| AppError::internal("user row has no id"))?;
    fields.insert("user_id".into(), user_id);

    let issue: Issue = inserted(state.rows.insert_row(Entity::Issues, &Value::Object(fields)).await?)?;

    tracing::info!(issue_id = %issue.id, user_id = %issue.user_id, "issue reported");

    publisher::publish_issue_created(state.rabbitmq.as_ref(), &issue).await;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok_with_message(issue, "Issue created successfully"))))
}

#[derive(Debug, Default, Deserialize)]
pub struct IssueFilters {
    pub status: Option<String>,
    pub department: Option<String>,
    pub priority: Option<String>,
    pub user_id: Option<String>,
}

impl IssueFilters {
    fn into_conditions(self) -> Vec<Condition> {
        [
            ("status", self.status),
            ("department", self.department),
            ("priority", self.priority),
            ("user_id", self.user_id),
        ]
        .into_iter()
        .filter_map(|(column, value)| value.map(|v| Condition::eq(column, v)))
        .collect()
    }
}

/// Newest first. An empty match is `[]`, not 404.
pub async fn list_issues(
    State(state): State<Arc<AppState>>,
    ApiQuery(filters): ApiQuery<IssueFilters>,
) -> AppResult<Json<ApiResponse<Vec<Issue>>>> {
    let rows = state
        .rows
        .select_rows(Entity::Issues, filters.into_conditions(), None, Some(Sort::desc("created_at")))
        .await?;

    Ok(Json(ApiResponse::ok(decode_all(rows)?)))
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub filters: Map<String, Value>,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
}

/// Filter DSL over HTTP. Rows come back as projected, so they stay untyped.
pub async fn query_issues(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<QueryRequest>,
) -> AppResult<Json<ApiResponse<Vec<Row>>>> {
    let conditions = parse_filters(&req.filters)?;
    let rows = state
        .rows
        .select_rows(Entity::Issues, conditions, req.columns, req.sort.map(Sort::from))
        .await?;

    Ok(Json(ApiResponse::ok(rows)))
}

#[derive(Debug, Serialize)]
pub struct IssueStats {
    pub total: usize,
    pub by_status: BTreeMap<&'static str, usize>,
}

pub async fn issue_stats(State(state): State<Arc<AppState>>) -> AppResult<Json<ApiResponse<IssueStats>>> {
    let rows = state
        .rows
        .select_rows(Entity::Issues, vec![], Some(vec!["status".into()]), None)
        .await?;

    let mut by_status: BTreeMap<&'static str, usize> =
        IssueStatus::ALL.iter().map(|s| (s.as_str(), 0)).collect();
    for row in &rows {
        if let Some(count) = row
            .get("status")
            .and_then(Value::as_str)
            .and_then(|status| by_status.get_mut(status))
        {
            *count += 1;
        }
    }

    Ok(Json(ApiResponse::ok(IssueStats { total: rows.len(), by_status })))
}

pub async fn get_issue(
    State(state): State<Arc<AppState>>,
    ApiPath(issue_id): ApiPath<Uuid>,
) -> AppResult<Json<ApiResponse<Issue>>> {
    let row = state
        .rows
        .select_by_id(Entity::Issues, &key("id", issue_id.to_string()), None)
        .await
        .map_err(or_not_found(ErrorCode::IssueNotFound, "Issue not found"))?;

    Ok(Json(ApiResponse::ok(decode(row)?)))
}

pub async fn update_issue(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    ApiPath(issue_id): ApiPath<Uuid>,
    ApiJson(changes): ApiJson<Value>,
) -> AppResult<Json<ApiResponse<Issue>>> {
    let row = state
        .rows
        .update_row_by_id(Entity::Issues, &key("id", issue_id.to_string()), &changes)
        .await
        .map_err(or_not_found(ErrorCode::IssueNotFound, "Issue not found"))?;

    tracing::info!(issue_id = %issue_id, admin_id = %admin.id, "issue updated");

    Ok(Json(ApiResponse::ok(decode(row)?)))
}

/// Delete an issue together with its assignments.
pub async fn delete_issue(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    ApiPath(issue_id): ApiPath<Uuid>,
) -> AppResult<Json<ApiResponse<Issue>>> {
    let id = issue_id.to_string();
    state
        .rows
        .drop_rows(Entity::Assigned, vec![Condition::eq("issue_id", id.clone())])
        .await?;
    let row = state
        .rows
        .drop_row_by_id(Entity::Issues, &key("id", id))
        .await
        .map_err(or_not_found(ErrorCode::IssueNotFound, "Issue not found"))?;

    tracing::info!(issue_id = %issue_id, admin_id = %admin.id, "issue deleted");

    Ok(Json(ApiResponse::ok_with_message(decode(row)?, "Issue deleted")))
}
