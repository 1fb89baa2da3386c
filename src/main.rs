use chat_relay::config::AppConfig;
use chat_relay::providers::ProviderRegistry;
use chat_relay::store::{MemoryStore, PgStore};
use chat_relay::{app, db, AppState};
use std::net::SocketAddr;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging()?;

    let config = AppConfig::from_env()?;
    let providers = ProviderRegistry::from_config(&config);
    if providers.available().is_empty() {
        tracing::warn!("No AI providers configured; every chat request will be rejected");
    }

    let state = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.db_max_connections).await?;
            tracing::info!("Connected to Postgres");
            let store = Arc::new(PgStore::new(pool));
            AppState::new(&config, store.clone(), store, providers, "postgres")
        }
        None => {
            tracing::warn!("DATABASE_URL not set. Using in-memory storage; data is lost on restart.");
            let store = Arc::new(MemoryStore::new());
            AppState::new(&config, store.clone(), store, providers, "memory")
        }
    };

    let router = app(Arc::new(state));

    // ConnectInfo provides socket addresses for rate limiting
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if cfg!(debug_assertions) {
        "debug,chat_relay=trace,sqlx=info,reqwest=info,hyper=info,tower=info"
    } else {
        "info,chat_relay=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn"
    };

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(log_level))?;

    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();

    tracing::info!("chat_relay {} starting up", env!("CARGO_PKG_VERSION"));
    Ok(())
}
