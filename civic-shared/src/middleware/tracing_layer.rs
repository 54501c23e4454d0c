use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over the default filter;
/// `CIVIC_ENV=production` switches to JSON lines.
pub fn init_tracing(service_name: &str) {
    let target = service_name.replace('-', "_");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("info,{target}=debug,civic_shared=debug,tower_http=debug"))
    });

    let is_production = std::env::var("CIVIC_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if is_production {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true).with_thread_ids(true))
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing already initialized: {e}");
        return;
    }

    tracing::info!(service = service_name, production = is_production, "tracing initialized");
}
