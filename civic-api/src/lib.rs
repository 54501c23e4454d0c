pub mod config;
pub mod events;
pub mod models;
pub mod registry;
pub mod routes;
pub mod rows;
pub mod services;
pub mod store;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use civic_shared::clients::rabbitmq::RabbitMQClient;
use civic_shared::middleware::{metrics_middleware, JwtSecret};

use config::AppConfig;
use rows::RowService;
use store::RowStore;

pub struct AppState {
    pub rows: RowService,
    pub config: AppConfig,
    /// `None` when no broker is configured; publishing becomes a no-op.
    pub rabbitmq: Option<RabbitMQClient>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn RowStore>, rabbitmq: Option<RabbitMQClient>) -> Arc<Self> {
        Arc::new(Self {
            rows: RowService::new(store),
            config,
            rabbitmq,
        })
    }
}

impl JwtSecret for AppState {
    fn jwt_secret(&self) -> &str {
        &self.config.jwt_secret
    }
}

/// Full HTTP application: API routes plus CORS, tracing and metrics layers.
pub fn app(state: Arc<AppState>) -> Router {
    routes::router()
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
