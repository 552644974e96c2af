use anyhow::{Error, Result, anyhow};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString},
};

use crate::{
    config::Config,
    models::message::{DeadLetterRecord, RetryEnvelope, UserCreatedEvent},
};

pub const RETRY_COUNT_HEADER: &str = "retryCount";
pub const DEAD_LETTER_ROUTING_KEY: &str = "dead";

/// Owns one channel and the declared topology: the main queue, one TTL'd
/// retry queue per attempt level that dead-letters back to the main queue,
/// and the dead-letter exchange/queue pair for exhausted or poison messages.
pub struct RabbitMqClient {
    channel: Channel,
    queue_name: String,
    dlx_name: String,
    dlq_name: String,
    max_retry_attempts: u32,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        println!("Connecting to RabbitMQ...");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|_| anyhow!("Failed to connect to RabbitMQ"))?;

        println!("RabbitMQ connection established");

        let channel = connection
            .create_channel()
            .await
            .map_err(|_| anyhow!("RabbitMQ channel creation failed"))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to set up QoS"))?;

        let client = Self {
            channel,
            queue_name: config.queue_name.clone(),
            dlx_name: config.dlx_name.clone(),
            dlq_name: config.dlq_name.clone(),
            max_retry_attempts: config.max_retry_attempts,
        };

        client.declare_topology(config).await?;

        println!("Queue topology declared");

        Ok(client)
    }

    async fn declare_topology(&self, config: &Config) -> Result<(), Error> {
        self.channel
            .queue_declare(
                &self.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|_| anyhow!("Failed to declare main queue"))?;

        // Each retry level is a queue whose message TTL implements the delay:
        // expiry dead-letters the message back onto the main queue, so no
        // task waits while a retry is pending.
        for level in 1..=self.max_retry_attempts {
            let mut args = FieldTable::default();
            args.insert(
                "x-message-ttl".into(),
                AMQPValue::LongLongInt(config.retry_queue_ttl_ms(level) as i64),
            );
            args.insert(
                "x-dead-letter-exchange".into(),
                AMQPValue::LongString(LongString::from("")),
            );
            args.insert(
                "x-dead-letter-routing-key".into(),
                AMQPValue::LongString(LongString::from(self.queue_name.as_str())),
            );

            self.channel
                .queue_declare(
                    &self.retry_queue_name(level),
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    args,
                )
                .await
                .map_err(|_| anyhow!("Failed to declare retry queue level {}", level))?;
        }

        self.channel
            .exchange_declare(
                &self.dlx_name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|_| anyhow!("Failed to declare dead-letter exchange"))?;

        let mut dlq_args = FieldTable::default();
        dlq_args.insert(
            "x-message-ttl".into(),
            AMQPValue::LongLongInt(config.dlq_retention_ms as i64),
        );

        self.channel
            .queue_declare(
                &self.dlq_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                dlq_args,
            )
            .await
            .map_err(|_| anyhow!("Failed to declare dead-letter queue"))?;

        self.channel
            .queue_bind(
                &self.dlq_name,
                &self.dlx_name,
                DEAD_LETTER_ROUTING_KEY,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|_| anyhow!("Failed to bind dead-letter queue"))?;

        Ok(())
    }

    pub fn retry_queue_name(&self, level: u32) -> String {
        format!("{}.retry.{}", self.queue_name, level)
    }

    pub async fn create_consumer(&self) -> Result<Consumer, Error> {
        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                "enrichment_worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|_| anyhow!("Failed to create consumer"))?;

        println!("Consumer created for queue");

        Ok(consumer)
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|_| anyhow!("Failed to acknowledge message"))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|_| anyhow!("Failed to reject message"))?;

        Ok(())
    }

    /// Producer contract: fire-and-forget durable publish of a fresh event
    /// to the main queue, `retryCount` starting at zero.
    pub async fn publish_event(&self, event: &UserCreatedEvent) -> Result<(), Error> {
        let payload = serde_json::to_vec(event)?;

        self.channel
            .basic_publish(
                "",
                &self.queue_name,
                BasicPublishOptions::default(),
                &payload,
                persistent_properties(0),
            )
            .await
            .map_err(|_| anyhow!("Failed to publish user created event"))?;

        Ok(())
    }

    /// Routes an envelope to the retry queue matching its attempt number.
    pub async fn publish_retry(&self, envelope: &RetryEnvelope) -> Result<(), Error> {
        let payload = serde_json::to_vec(&envelope.event)?;
        let retry_queue = self.retry_queue_name(envelope.retry_count);

        self.channel
            .basic_publish(
                "",
                &retry_queue,
                BasicPublishOptions::default(),
                &payload,
                persistent_properties(envelope.retry_count),
            )
            .await
            .map_err(|_| anyhow!("Failed to publish message to {}", retry_queue))?;

        Ok(())
    }

    pub async fn publish_dead_letter(&self, record: &DeadLetterRecord) -> Result<(), Error> {
        let payload = serde_json::to_vec(record)?;

        self.channel
            .basic_publish(
                &self.dlx_name,
                DEAD_LETTER_ROUTING_KEY,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|_| anyhow!("Failed to publish message to dlq"))?;

        Ok(())
    }
}

fn persistent_properties(retry_count: u32) -> BasicProperties {
    let mut headers = FieldTable::default();
    headers.insert(
        RETRY_COUNT_HEADER.into(),
        AMQPValue::LongInt(retry_count as i32),
    );

    BasicProperties::default()
        .with_delivery_mode(2)
        .with_headers(headers)
}

/// Reads the `retryCount` header off a delivery; absent or oddly-typed
/// headers count as a first attempt.
pub fn retry_count_from_headers(properties: &BasicProperties) -> u32 {
    let Some(headers) = properties.headers().as_ref() else {
        return 0;
    };

    let value = headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == RETRY_COUNT_HEADER)
        .map(|(_, value)| value);

    match value {
        Some(AMQPValue::LongInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::LongLongInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::ShortInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::ShortShortInt(v)) => (*v).max(0) as u32,
        Some(AMQPValue::LongUInt(v)) => *v,
        _ => 0,
    }
}
