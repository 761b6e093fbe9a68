use anyhow::{bail, Result};
use chainpay::{
    config::{Config, Environment},
    handlers::{router, AppState},
    services::{MemoryPaymentStore, PaymentService, PaymentStore, RedisPaymentStore},
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);

    tracing::info!("Starting chainpay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Environment: {:?}", config.environment);
    tracing::info!(
        "Chains: {}",
        config.chains.keys().cloned().collect::<Vec<_>>().join(", ")
    );

    let store = open_store(&config).await?;
    let payments = Arc::new(PaymentService::new(config.clone(), store));
    let app = router(AppState { payments });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn PaymentStore>> {
    let Some(url) = config.redis_url.as_deref() else {
        if config.environment == Environment::Production {
            bail!("REDIS_URL is required in production");
        }
        tracing::warn!("REDIS_URL not set, payments are kept in memory");
        return Ok(Arc::new(MemoryPaymentStore::new()));
    };

    match RedisPaymentStore::connect(url).await {
        Ok(store) => Ok(Arc::new(store)),
        Err(e) if config.environment == Environment::Production => {
            bail!("Redis unavailable: {}", e)
        }
        Err(e) => {
            tracing::warn!("Redis unavailable ({}), falling back to in-memory store", e);
            Ok(Arc::new(MemoryPaymentStore::new()))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl+c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down gracefully...");
}
