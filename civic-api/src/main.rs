use axum::routing::get;
use std::sync::Arc;
use std::time::Duration;

use civic_shared::clients::classifier::ClassifierClient;
use civic_shared::clients::db::create_pool;
use civic_shared::clients::rabbitmq::RabbitMQClient;

use civic_api::config::{AppConfig, StoreBackend};
use civic_api::events::listener::{self, IssueClassifier};
use civic_api::store::{MemoryStore, PgStore, RowStore};
use civic_api::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    civic_shared::middleware::init_tracing("civic-api");

    let config = AppConfig::load()?;
    let port = config.port;

    let store: Arc<dyn RowStore> = match config.store {
        StoreBackend::Postgres => {
            let pool = create_pool(&config.database_url, config.db_pool_size)?;
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("using in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let rabbitmq = if config.events_enabled() {
        Some(RabbitMQClient::connect(&config.rabbitmq_url).await?)
    } else {
        tracing::warn!("no RabbitMQ URL configured, domain events disabled");
        None
    };

    let metrics_handle = civic_shared::middleware::init_metrics()?;

    // Classification listener needs its own channel so consuming never
    // blocks publishing from request handlers.
    if config.events_enabled() && config.classifier_enabled() {
        let classifier: Arc<dyn IssueClassifier> = Arc::new(ClassifierClient::new(
            &config.classifier_url,
            config.classifier_api_key.clone(),
            Duration::from_secs(config.classifier_timeout_secs),
        )?);
        let consumer_client = RabbitMQClient::connect(&config.rabbitmq_url).await?;
        tokio::spawn(async move {
            if let Err(e) = listener::listen_issue_created(&consumer_client, classifier).await {
                tracing::error!(error = %e, "issue.created listener failed");
            }
        });
    }

    let state = AppState::new(config, store, rabbitmq);

    let app = civic_api::app(state).route(
        "/metrics",
        get(move || {
            let handle = metrics_handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "civic-api starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
