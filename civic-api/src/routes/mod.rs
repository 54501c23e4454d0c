pub mod admin;
pub mod health;
pub mod issues;
pub mod pending_issues;
pub mod technicians;
pub mod users;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;

use serde::de::DeserializeOwned;
use serde_json::Value;

use civic_shared::errors::{AppError, AppResult, ErrorCode};

use crate::registry::Entity;
use crate::rows::filter::{Condition, FilterOp};
use crate::rows::{decode, RowError, RowService};
use crate::store::{Row, StoreError};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    let users = Router::new()
        .route("/register", post(users::register))
        .route("/by-email", get(users::get_by_email));

    let admin = Router::new()
        .route("/create-admin", post(admin::create_admin))
        .route("/login", post(admin::login))
        .route("/get-department", post(admin::get_department));

    let issues = Router::new()
        .route("/", get(issues::list_issues))
        .route("/create", post(issues::create_issue))
        .route("/query", post(issues::query_issues))
        .route("/stats", get(issues::issue_stats))
        .route(
            "/:id",
            get(issues::get_issue)
                .patch(issues::update_issue)
                .delete(issues::delete_issue),
        );

    let pending = Router::new()
        .route("/", get(pending_issues::list_assignments))
        .route("/assign", post(pending_issues::assign))
        .route("/resolved", delete(pending_issues::drop_resolved))
        .route("/:id/resolve", post(pending_issues::resolve));

    let technicians = Router::new()
        .route("/", get(technicians::list_technicians))
        .route("/register", post(technicians::register))
        .route("/by-department", post(technicians::by_department))
        .route("/unassigned", post(technicians::unassigned))
        .route("/:id/assignments", get(technicians::assignments));

    Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/authUsers", users)
        .nest("/api/admin", admin)
        .nest("/api/issues", issues)
        .nest("/api/pending-issues", pending)
        .nest("/api/technicians", technicians)
}

impl From<RowError> for AppError {
    fn from(err: RowError) -> Self {
        match err {
            RowError::Validation(message) => AppError::Validation(message),
            RowError::UnsupportedOperator(op) => AppError::with_details(
                ErrorCode::UnsupportedOperator,
                format!("unsupported filter operator: {op}"),
                serde_json::json!({ "supported": FilterOp::ALL.map(|op| op.as_str()) }),
            ),
            RowError::Store(StoreError::NotFound { table }) => {
                AppError::new(ErrorCode::NotFound, format!("no {table} row matched"))
            }
            RowError::Store(StoreError::Constraint(message)) => AppError::new(ErrorCode::StoreRejected, message),
            RowError::Store(other) => AppError::Internal(anyhow::Error::new(other)),
        }
    }
}

/// Map a store not-found onto an entity-specific 404, pass everything else through.
pub(crate) fn or_not_found(code: ErrorCode, message: &'static str) -> impl FnOnce(RowError) -> AppError {
    move |err| match err {
        RowError::Store(StoreError::NotFound { .. }) => AppError::new(code, message),
        other => other.into(),
    }
}

/// Lowercase the `email` field of a JSON body in place, if present.
pub(crate) fn normalize_email(body: &mut Value) {
    if let Some(email) = body.get_mut("email") {
        if let Some(s) = email.as_str() {
            *email = Value::String(s.trim().to_lowercase());
        }
    }
}

/// Refuse a registration whose email is already taken in `entity`.
/// Bodies without a string email fall through to schema validation.
pub(crate) async fn ensure_email_free(rows: &RowService, entity: Entity, body: &Value) -> AppResult<()> {
    let Some(email) = body.get("email").and_then(Value::as_str) else {
        return Ok(());
    };
    let existing = rows
        .select_rows(entity, vec![Condition::eq("email", email)], Some(vec!["id".into()]), None)
        .await?;
    if !existing.is_empty() {
        return Err(AppError::new(ErrorCode::EmailAlreadyExists, "Email already registered"));
    }
    Ok(())
}

/// Decode the single row an insert returned.
pub(crate) fn inserted<T: DeserializeOwned>(rows: Vec<Row>) -> AppResult<T> {
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| AppError::internal("insert returned no row"))?;
    Ok(decode(row)?)
}
