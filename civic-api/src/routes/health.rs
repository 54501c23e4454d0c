use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

use civic_shared::types::api::{HealthCheck, HealthResponse, HealthStatus};

use crate::AppState;

/// Liveness plus a store round trip.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let store = match state.rows.ping().await {
        Ok(()) => HealthCheck::passing("store"),
        Err(e) => HealthCheck::failing("store", e.to_string()),
    };

    let response = HealthResponse::healthy("civic-api", env!("CARGO_PKG_VERSION")).with_checks(vec![store]);

    let status = match response.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(response)).into_response()
}
