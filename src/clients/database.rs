use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use serde_json::{Map, Value as JsonValue};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::models::{
    message::UserCreatedEvent,
    record::{EnrichmentRecord, EnrichmentStatus},
};

/// Lifecycle store for enrichment records, keyed by user uuid. "Not found"
/// from `find_by_uuid` is an expected state for users whose event has not
/// been processed yet.
pub trait StatusStore: Send + Sync {
    fn find_by_uuid(
        &self,
        uuid: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<EnrichmentRecord>, Error>> + Send;

    fn find_pending(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<EnrichmentRecord>, Error>> + Send;

    fn mark_completed(
        &self,
        event: &UserCreatedEvent,
        payload: &Map<String, JsonValue>,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send;

    fn mark_retrying(
        &self,
        event: &UserCreatedEvent,
        retry_count: u32,
        last_error: &str,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send;

    fn mark_failed(
        &self,
        event: &UserCreatedEvent,
        retry_count: u32,
        last_error: &str,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send;
}

// Lets one store instance back both the consumer and the read API.
impl<S: StatusStore> StatusStore for Arc<S> {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<EnrichmentRecord>, Error> {
        (**self).find_by_uuid(uuid).await
    }

    async fn find_pending(&self) -> Result<Vec<EnrichmentRecord>, Error> {
        (**self).find_pending().await
    }

    async fn mark_completed(
        &self,
        event: &UserCreatedEvent,
        payload: &Map<String, JsonValue>,
    ) -> Result<(), Error> {
        (**self).mark_completed(event, payload).await
    }

    async fn mark_retrying(
        &self,
        event: &UserCreatedEvent,
        retry_count: u32,
        last_error: &str,
    ) -> Result<(), Error> {
        (**self).mark_retrying(event, retry_count, last_error).await
    }

    async fn mark_failed(
        &self,
        event: &UserCreatedEvent,
        retry_count: u32,
        last_error: &str,
    ) -> Result<(), Error> {
        (**self).mark_failed(event, retry_count, last_error).await
    }
}

#[derive(Clone)]
pub struct PostgresStatusStore {
    client: Arc<tokio_postgres::Client>,
}

const RECORD_COLUMNS: &str =
    "uuid, name, email, enrichment_payload, status, retry_count, last_error, created_at, updated_at";

impl PostgresStatusStore {
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        info!("Connecting to PostgreSQL database");

        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection task ended");
            }
        });

        let store = Self {
            client: Arc::new(client),
        };
        store.init_schema().await?;

        info!("PostgreSQL connection established");

        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), Error> {
        self.client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS enriched_users (
                    uuid UUID PRIMARY KEY,
                    name TEXT NOT NULL,
                    email TEXT,
                    enrichment_payload JSONB NOT NULL DEFAULT '{}'::jsonb,
                    status TEXT NOT NULL DEFAULT 'pending',
                    retry_count INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );
                CREATE INDEX IF NOT EXISTS enriched_users_status_idx
                    ON enriched_users (status);
                "#,
            )
            .await
            .map_err(|e| anyhow!("Failed to initialize schema: {}", e))?;

        Ok(())
    }

    fn record_from_row(row: &Row) -> EnrichmentRecord {
        let payload: JsonValue = row.get("enrichment_payload");
        let status: &str = row.get("status");
        let retry_count: i32 = row.get("retry_count");

        EnrichmentRecord {
            uuid: row.get("uuid"),
            name: row.get("name"),
            email: row.get("email"),
            enrichment_payload: payload.as_object().cloned().unwrap_or_default(),
            status: EnrichmentStatus::from_string(status),
            retry_count: retry_count.max(0) as u32,
            last_error: row.get("last_error"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

impl StatusStore for PostgresStatusStore {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<EnrichmentRecord>, Error> {
        let row = self
            .client
            .query_opt(
                &format!("SELECT {RECORD_COLUMNS} FROM enriched_users WHERE uuid = $1"),
                &[&uuid],
            )
            .await
            .map_err(|e| anyhow!("Failed to look up enrichment record: {}", e))?;

        Ok(row.as_ref().map(Self::record_from_row))
    }

    async fn find_pending(&self) -> Result<Vec<EnrichmentRecord>, Error> {
        let rows = self
            .client
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM enriched_users \
                     WHERE status = 'pending' ORDER BY updated_at"
                ),
                &[],
            )
            .await
            .map_err(|e| anyhow!("Failed to scan pending records: {}", e))?;

        Ok(rows.iter().map(Self::record_from_row).collect())
    }

    async fn mark_completed(
        &self,
        event: &UserCreatedEvent,
        payload: &Map<String, JsonValue>,
    ) -> Result<(), Error> {
        let payload = JsonValue::Object(payload.clone());

        self.client
            .execute(
                r#"
                INSERT INTO enriched_users (uuid, name, email, enrichment_payload, status)
                VALUES ($1, $2, $3, $4, 'completed')
                ON CONFLICT (uuid) DO UPDATE SET
                    name = EXCLUDED.name,
                    email = EXCLUDED.email,
                    enrichment_payload = EXCLUDED.enrichment_payload,
                    status = 'completed',
                    last_error = NULL,
                    updated_at = now()
                "#,
                &[&event.uuid, &event.name, &event.email, &payload],
            )
            .await
            .map_err(|e| anyhow!("Failed to persist completed enrichment: {}", e))?;

        debug!(uuid = %event.uuid, "Enrichment record marked completed");

        Ok(())
    }

    async fn mark_retrying(
        &self,
        event: &UserCreatedEvent,
        retry_count: u32,
        last_error: &str,
    ) -> Result<(), Error> {
        // GREATEST keeps retry_count monotonic under redelivered duplicates;
        // a completed record is never downgraded by a late failure.
        self.client
            .execute(
                r#"
                INSERT INTO enriched_users (uuid, name, email, status, retry_count, last_error)
                VALUES ($1, $2, $3, 'pending', $4, $5)
                ON CONFLICT (uuid) DO UPDATE SET
                    status = 'pending',
                    retry_count = GREATEST(enriched_users.retry_count, EXCLUDED.retry_count),
                    last_error = EXCLUDED.last_error,
                    updated_at = now()
                WHERE enriched_users.status <> 'completed'
                "#,
                &[
                    &event.uuid,
                    &event.name,
                    &event.email,
                    &(retry_count as i32),
                    &last_error,
                ],
            )
            .await
            .map_err(|e| anyhow!("Failed to record retry state: {}", e))?;

        Ok(())
    }

    async fn mark_failed(
        &self,
        event: &UserCreatedEvent,
        retry_count: u32,
        last_error: &str,
    ) -> Result<(), Error> {
        self.client
            .execute(
                r#"
                INSERT INTO enriched_users (uuid, name, email, status, retry_count, last_error)
                VALUES ($1, $2, $3, 'failed', $4, $5)
                ON CONFLICT (uuid) DO UPDATE SET
                    status = 'failed',
                    retry_count = GREATEST(enriched_users.retry_count, EXCLUDED.retry_count),
                    last_error = EXCLUDED.last_error,
                    updated_at = now()
                WHERE enriched_users.status <> 'completed'
                "#,
                &[
                    &event.uuid,
                    &event.name,
                    &event.email,
                    &(retry_count as i32),
                    &last_error,
                ],
            )
            .await
            .map_err(|e| anyhow!("Failed to record terminal failure: {}", e))?;

        Ok(())
    }
}
