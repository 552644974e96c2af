use std::sync::Arc;

use anyhow::Error;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use lapin::message::Delivery;
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};

use crate::{
    clients::{
        connection::ConnectionManager,
        database::StatusStore,
        rbmq::retry_count_from_headers,
    },
    enrichment::enrich,
    models::message::{DeadLetterRecord, RetryEnvelope, UserCreatedEvent},
    utils::Clock,
};

/// Pause before requeueing a delivery whose escalation publish failed.
/// Without it a healthy channel redelivers instantly and the loop spins
/// against an open circuit until the reset timeout.
const ESCALATION_REQUEUE_PAUSE: Duration = Duration::from_millis(1_000);

/// Broker operations needed to settle one delivery.
pub trait DeliverySink: Send + Sync {
    fn acknowledge(
        &self,
        delivery_tag: u64,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send;

    fn reject(
        &self,
        delivery_tag: u64,
        requeue: bool,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send;

    fn publish_retry(
        &self,
        envelope: &RetryEnvelope,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send;

    fn publish_dead_letter(
        &self,
        record: &DeadLetterRecord,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send;
}

impl DeliverySink for ConnectionManager {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        ConnectionManager::acknowledge(self, delivery_tag).await
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        ConnectionManager::reject(self, delivery_tag, requeue).await
    }

    async fn publish_retry(&self, envelope: &RetryEnvelope) -> Result<(), Error> {
        ConnectionManager::publish_retry(self, envelope).await
    }

    async fn publish_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), Error> {
        ConnectionManager::publish_dead_letter(self, record).await
    }
}

/// The single terminal outcome chosen for one delivery.
#[derive(Debug)]
pub enum Disposition {
    /// Enrichment persisted; acknowledge the delivery.
    Ack,
    /// Transient failure with retry budget left; escalate to the next retry
    /// queue and reject the original.
    Retry(RetryEnvelope),
    /// Permanent failure (undecodable payload) or exhausted budget; publish
    /// to the dead-letter exchange and reject the original.
    DeadLetter(DeadLetterRecord),
}

/// Decides the terminal outcome for one delivery. Undecodable payloads are
/// permanent: they dead-letter immediately without touching the engine or
/// the store and without consuming a retry slot. Everything downstream of a
/// successful decode follows the bounded retry ladder.
pub async fn process_delivery<S: StatusStore>(
    store: &S,
    payload: &[u8],
    retry_count: u32,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> Disposition {
    let event = match serde_json::from_slice::<UserCreatedEvent>(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Undecodable payload, dead-lettering without retry");

            let original = serde_json::from_slice::<serde_json::Value>(payload)
                .unwrap_or_else(|_| {
                    serde_json::Value::String(String::from_utf8_lossy(payload).into_owned())
                });

            return Disposition::DeadLetter(DeadLetterRecord::new(
                original,
                format!("Undecodable payload: {}", e),
                now,
            ));
        }
    };

    let enriched = enrich(&event.name, event.email.as_deref(), now);

    match store.mark_completed(&event, &enriched).await {
        Ok(()) => {
            info!(uuid = %event.uuid, "User enriched successfully");
            Disposition::Ack
        }
        Err(e) => fail_attempt(store, event, retry_count, max_attempts, e, now).await,
    }
}

async fn fail_attempt<S: StatusStore>(
    store: &S,
    event: UserCreatedEvent,
    retry_count: u32,
    max_attempts: u32,
    error: Error,
    now: DateTime<Utc>,
) -> Disposition {
    let reason = error.to_string();

    if retry_count >= max_attempts {
        warn!(
            uuid = %event.uuid,
            retry_count,
            max_attempts,
            error = %reason,
            "Retry budget exhausted, dead-lettering"
        );

        // Best effort: the DLQ entry is the authoritative failure record.
        if let Err(store_err) = store.mark_failed(&event, retry_count, &reason).await {
            warn!(uuid = %event.uuid, error = %store_err, "Failed to record terminal failure");
        }

        let original = serde_json::to_value(&event)
            .unwrap_or_else(|_| serde_json::Value::String(event.uuid.to_string()));

        return Disposition::DeadLetter(DeadLetterRecord::new(original, reason, now));
    }

    let attempt = retry_count + 1;

    warn!(
        uuid = %event.uuid,
        attempt,
        max_attempts,
        error = %reason,
        "Enrichment attempt failed, scheduling retry"
    );

    if let Err(store_err) = store.mark_retrying(&event, attempt, &reason).await {
        warn!(uuid = %event.uuid, error = %store_err, "Failed to record retry state");
    }

    Disposition::Retry(RetryEnvelope {
        event,
        retry_count: attempt,
    })
}

/// Pulls deliveries one at a time (prefetch 1), runs each to its terminal
/// outcome, and re-enters the connection manager's persistent reconnect when
/// the delivery stream drops.
pub struct UserCreatedConsumer<S> {
    store: S,
    manager: Arc<ConnectionManager>,
    max_attempts: u32,
    clock: Arc<dyn Clock>,
}

impl<S: StatusStore> UserCreatedConsumer<S> {
    pub fn new(
        store: S,
        manager: Arc<ConnectionManager>,
        max_attempts: u32,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            manager,
            max_attempts,
            clock,
        }
    }

    pub async fn run(&self) {
        loop {
            let mut consumer = match self.manager.create_consumer().await {
                Ok(consumer) => consumer,
                Err(e) => {
                    error!(error = %e, "Failed to start consumer, reconnecting");
                    self.manager.reconnect().await;
                    continue;
                }
            };

            info!("Consuming user created events");

            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => self.handle_delivery(delivery).await,
                    Err(e) => {
                        error!(error = %e, "Delivery stream error");
                        break;
                    }
                }
            }

            warn!("Delivery stream closed, entering degraded mode until broker returns");
            self.manager.reconnect().await;
        }
    }

    async fn handle_delivery(&self, delivery: Delivery) {
        let retry_count = retry_count_from_headers(&delivery.properties);

        let disposition = process_delivery(
            &self.store,
            &delivery.data,
            retry_count,
            self.max_attempts,
            self.clock.now(),
        )
        .await;

        dispatch(
            self.manager.as_ref(),
            delivery.delivery_tag,
            disposition,
            ESCALATION_REQUEUE_PAUSE,
        )
        .await;
    }
}

/// Publishes the disposition's escalation (if any) and settles the original
/// delivery. When the escalation publish fails (broker degraded or circuit
/// open) the original is requeued after `requeue_pause` so the attempt is
/// not lost and redelivery does not spin.
pub async fn dispatch<B: DeliverySink>(
    broker: &B,
    delivery_tag: u64,
    disposition: Disposition,
    requeue_pause: Duration,
) {
    match disposition {
        Disposition::Ack => {
            if let Err(e) = broker.acknowledge(delivery_tag).await {
                error!(error = %e, "Failed to acknowledge delivery");
            }
        }
        Disposition::Retry(envelope) => match broker.publish_retry(&envelope).await {
            Ok(()) => reject(broker, delivery_tag, false).await,
            Err(e) => {
                error!(error = %e, "Failed to publish retry envelope, requeueing");
                sleep(requeue_pause).await;
                reject(broker, delivery_tag, true).await;
            }
        },
        Disposition::DeadLetter(record) => match broker.publish_dead_letter(&record).await {
            Ok(()) => reject(broker, delivery_tag, false).await,
            Err(e) => {
                error!(error = %e, "Failed to publish dead letter, requeueing");
                sleep(requeue_pause).await;
                reject(broker, delivery_tag, true).await;
            }
        },
    }
}

async fn reject<B: DeliverySink>(broker: &B, delivery_tag: u64, requeue: bool) {
    if let Err(e) = broker.reject(delivery_tag, requeue).await {
        error!(error = %e, requeue, "Failed to reject delivery");
    }
}
