use std::sync::Arc;

use anyhow::{Error, Result};
use enrichment_service::{
    api::run_api_server,
    clients::{cache::TtlCache, connection::ConnectionManager, database::PostgresStatusStore},
    config::Config,
    consumer::UserCreatedConsumer,
    utils::{retry_with_backoff, system_clock},
};
use serde_json::Value as JsonValue;
use tokio::time::Duration;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let clock = system_clock();

    let store = retry_with_backoff(&config.quick_retry_config(), || {
        PostgresStatusStore::connect(&config.database_url)
    })
    .await?;

    let manager = Arc::new(ConnectionManager::connect(config.clone(), Arc::clone(&clock)).await);

    let cache: Arc<TtlCache<JsonValue>> = Arc::new(TtlCache::new(Arc::clone(&clock)));
    let _sweeper = cache.spawn_sweeper(Duration::from_secs(config.cache_sweep_interval_seconds));

    let api_config = config.clone();
    let api_store = store.clone();
    let api_cache = Arc::clone(&cache);
    tokio::spawn(async move {
        if let Err(e) = run_api_server(api_config, api_store, api_cache).await {
            error!(error = %e, "Read API server exited");
        }
    });

    let consumer = UserCreatedConsumer::new(
        store,
        Arc::clone(&manager),
        config.max_retry_attempts,
        clock,
    );

    consumer.run().await;

    Ok(())
}
