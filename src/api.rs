use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    clients::{
        cache::{TtlCache, enriched_user_key},
        database::{PostgresStatusStore, StatusStore},
    },
    config::Config,
    models::{record::EnrichmentStatus, response::ApiResponse},
};

pub struct AppState<S> {
    store: S,
    cache: Arc<TtlCache<JsonValue>>,
    cache_ttl_seconds: u64,
}

impl<S: StatusStore> AppState<S> {
    pub fn new(store: S, cache: Arc<TtlCache<JsonValue>>, cache_ttl_seconds: u64) -> Self {
        Self {
            store,
            cache,
            cache_ttl_seconds,
        }
    }
}

pub async fn run_api_server(
    config: Config,
    store: PostgresStatusStore,
    cache: Arc<TtlCache<JsonValue>>,
) -> Result<(), Error> {
    let state = Arc::new(AppState::new(store, cache, config.cache_ttl_seconds));

    let app = Router::new()
        .route(
            "/users/enriched/{uuid}",
            get(get_enriched_user::<PostgresStatusStore>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Read API server started");

    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct LookupParams {
    /// Invalidates the cached entry before reading, bypassing the cache for
    /// this one lookup.
    #[serde(default)]
    pub refresh: bool,
}

/// Point lookup through the read-through cache. A 404 means "not found or
/// still processing" and callers are expected to retry later; enrichment is
/// supplementary data and absence is not an error.
pub async fn get_enriched_user<S: StatusStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(uuid): Path<Uuid>,
    Query(params): Query<LookupParams>,
) -> (StatusCode, Json<ApiResponse<JsonValue>>) {
    let key = enriched_user_key(&uuid);

    if params.refresh {
        state.cache.delete(&key);
    } else if let Some(payload) = state.cache.get(&key) {
        return (
            StatusCode::OK,
            Json(ApiResponse::success(
                payload,
                "Enrichment payload retrieved".to_string(),
            )),
        );
    }

    match state.store.find_by_uuid(uuid).await {
        Ok(Some(record)) if record.status == EnrichmentStatus::Completed => {
            let payload = JsonValue::Object(record.enrichment_payload);
            state
                .cache
                .set(&key, payload.clone(), state.cache_ttl_seconds);

            (
                StatusCode::OK,
                Json(ApiResponse::success(
                    payload,
                    "Enrichment payload retrieved".to_string(),
                )),
            )
        }
        Ok(_) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::error(
                "not_found".to_string(),
                format!("User {} not found or not yet enriched", uuid),
            )),
        ),
        Err(e) => {
            error!(uuid = %uuid, error = %e, "Enrichment lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::error(
                    "lookup_failed".to_string(),
                    "Failed to look up enrichment record".to_string(),
                )),
            )
        }
    }
}
