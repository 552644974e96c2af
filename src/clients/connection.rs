use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use lapin::Consumer;
use tokio::{sync::RwLock, time::sleep};
use tracing::{error, info};

use crate::{
    clients::{circuit_breaker::CircuitBreaker, rbmq::RabbitMqClient},
    config::Config,
    models::{
        circuit_breaker::CircuitState,
        message::{DeadLetterRecord, RetryEnvelope, UserCreatedEvent},
        retry::RetryConfig,
    },
    utils::{Clock, backoff_delay},
};

/// Exclusive owner of the broker connection. Publishes pass through the
/// circuit breaker and fail fast while the broker is unavailable; the
/// connection itself is re-established with unbounded, jittered exponential
/// backoff so the rest of the service degrades instead of crashing.
pub struct ConnectionManager {
    config: Config,
    reconnect_config: RetryConfig,
    breaker: CircuitBreaker,
    client: RwLock<Option<RabbitMqClient>>,
}

impl ConnectionManager {
    pub async fn connect(config: Config, clock: Arc<dyn Clock>) -> Self {
        let breaker = CircuitBreaker::new(
            "rabbitmq".to_string(),
            config.circuit_breaker_config(),
            clock,
        );

        let manager = Self {
            reconnect_config: config.reconnect_config(),
            config,
            breaker,
            client: RwLock::new(None),
        };

        manager.reconnect().await;
        manager
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Drops the current connection (if any) and retries until the broker
    /// accepts us again. Never gives up; enrichment is paused meanwhile.
    pub async fn reconnect(&self) {
        {
            let mut guard = self.client.write().await;
            *guard = None;
        }

        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            match RabbitMqClient::connect(&self.config).await {
                Ok(client) => {
                    let mut guard = self.client.write().await;
                    *guard = Some(client);
                    info!(attempt, "Broker connection established");
                    return;
                }
                Err(e) => {
                    let delay = backoff_delay(&self.reconnect_config, attempt);
                    error!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Broker connection failed, backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    pub async fn create_consumer(&self) -> Result<Consumer, Error> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| anyhow!("Broker connection unavailable"))?;

        client.create_consumer().await
    }

    // Terminal acks and rejects bypass the breaker: short-circuiting them
    // would leave deliveries unsettled on an otherwise healthy channel.
    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| anyhow!("Broker connection unavailable"))?;

        client.acknowledge(delivery_tag).await
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        let guard = self.client.read().await;
        let client = guard
            .as_ref()
            .ok_or_else(|| anyhow!("Broker connection unavailable"))?;

        client.reject(delivery_tag, requeue).await
    }

    pub async fn publish_event(&self, event: &UserCreatedEvent) -> Result<(), Error> {
        self.breaker
            .call(|| async {
                let guard = self.client.read().await;
                let client = guard
                    .as_ref()
                    .ok_or_else(|| anyhow!("Broker connection unavailable"))?;

                client.publish_event(event).await
            })
            .await
    }

    pub async fn publish_retry(&self, envelope: &RetryEnvelope) -> Result<(), Error> {
        self.breaker
            .call(|| async {
                let guard = self.client.read().await;
                let client = guard
                    .as_ref()
                    .ok_or_else(|| anyhow!("Broker connection unavailable"))?;

                client.publish_retry(envelope).await
            })
            .await
    }

    pub async fn publish_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), Error> {
        self.breaker
            .call(|| async {
                let guard = self.client.read().await;
                let client = guard
                    .as_ref()
                    .ok_or_else(|| anyhow!("Broker connection unavailable"))?;

                client.publish_dead_letter(record).await
            })
            .await
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("breaker_state", &self.breaker_state().as_str())
            .finish()
    }
}
