use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use anyhow::{Error, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use enrichment_service::{
    clients::database::StatusStore,
    consumer::DeliverySink,
    models::{
        message::{DeadLetterRecord, RetryEnvelope, UserCreatedEvent},
        record::{EnrichmentRecord, EnrichmentStatus},
    },
    utils::Clock,
};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

/// Deterministic clock advanced by hand from tests.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(epoch_seconds: i64) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(DateTime::from_timestamp(epoch_seconds, 0).unwrap()),
        })
    }

    pub fn advance_secs(&self, seconds: i64) {
        *self.now.lock().unwrap() += Duration::seconds(seconds);
    }

    pub fn advance_ms(&self, millis: i64) {
        *self.now.lock().unwrap() += Duration::milliseconds(millis);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// In-memory status store mirroring the Postgres upsert semantics: one row
/// per uuid, retry counts only grow, completed rows are never downgraded.
/// Write failures can be injected to exercise the retry ladder.
#[derive(Default)]
pub struct RecordingStore {
    records: Mutex<HashMap<Uuid, EnrichmentRecord>>,
    fail_completed: AtomicBool,
    pub completed_calls: AtomicU32,
    pub retrying_calls: AtomicU32,
    pub failed_calls: AtomicU32,
    pub find_calls: AtomicU32,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let store = Self::default();
        store.fail_completed.store(true, Ordering::SeqCst);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_completed.store(failing, Ordering::SeqCst);
    }

    pub fn record(&self, uuid: Uuid) -> Option<EnrichmentRecord> {
        self.records.lock().unwrap().get(&uuid).cloned()
    }

    pub fn record_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    fn upsert_failure(
        &self,
        event: &UserCreatedEvent,
        status: EnrichmentStatus,
        retry_count: u32,
        last_error: &str,
    ) {
        let now = Utc::now();
        let mut records = self.records.lock().unwrap();

        match records.get_mut(&event.uuid) {
            Some(existing) => {
                if existing.status == EnrichmentStatus::Completed {
                    return;
                }
                existing.status = status;
                existing.retry_count = existing.retry_count.max(retry_count);
                existing.last_error = Some(last_error.to_string());
                existing.updated_at = now;
            }
            None => {
                records.insert(
                    event.uuid,
                    EnrichmentRecord {
                        uuid: event.uuid,
                        name: event.name.clone(),
                        email: event.email.clone(),
                        enrichment_payload: Map::new(),
                        status,
                        retry_count,
                        last_error: Some(last_error.to_string()),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
    }
}

impl StatusStore for RecordingStore {
    async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<EnrichmentRecord>, Error> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.record(uuid))
    }

    async fn find_pending(&self) -> Result<Vec<EnrichmentRecord>, Error> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.status == EnrichmentStatus::Pending)
            .cloned()
            .collect())
    }

    async fn mark_completed(
        &self,
        event: &UserCreatedEvent,
        payload: &Map<String, JsonValue>,
    ) -> Result<(), Error> {
        self.completed_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_completed.load(Ordering::SeqCst) {
            return Err(anyhow!("Injected store failure"));
        }

        let now = Utc::now();
        let mut records = self.records.lock().unwrap();

        let retry_count = records.get(&event.uuid).map_or(0, |r| r.retry_count);
        records.insert(
            event.uuid,
            EnrichmentRecord {
                uuid: event.uuid,
                name: event.name.clone(),
                email: event.email.clone(),
                enrichment_payload: payload.clone(),
                status: EnrichmentStatus::Completed,
                retry_count,
                last_error: None,
                created_at: now,
                updated_at: now,
            },
        );

        Ok(())
    }

    async fn mark_retrying(
        &self,
        event: &UserCreatedEvent,
        retry_count: u32,
        last_error: &str,
    ) -> Result<(), Error> {
        self.retrying_calls.fetch_add(1, Ordering::SeqCst);
        self.upsert_failure(event, EnrichmentStatus::Pending, retry_count, last_error);
        Ok(())
    }

    async fn mark_failed(
        &self,
        event: &UserCreatedEvent,
        retry_count: u32,
        last_error: &str,
    ) -> Result<(), Error> {
        self.failed_calls.fetch_add(1, Ordering::SeqCst);
        self.upsert_failure(event, EnrichmentStatus::Failed, retry_count, last_error);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkOp {
    Ack(u64),
    Reject { delivery_tag: u64, requeue: bool },
    PublishRetry(u32),
    PublishDeadLetter,
}

/// Records broker settlement operations in order; publish failures can be
/// injected to exercise the requeue path.
#[derive(Default)]
pub struct RecordingSink {
    operations: Mutex<Vec<SinkOp>>,
    fail_publishes: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_publishes() -> Self {
        let sink = Self::default();
        sink.fail_publishes.store(true, Ordering::SeqCst);
        sink
    }

    pub fn operations(&self) -> Vec<SinkOp> {
        self.operations.lock().unwrap().clone()
    }

    fn push(&self, op: SinkOp) {
        self.operations.lock().unwrap().push(op);
    }
}

impl DeliverySink for RecordingSink {
    async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.push(SinkOp::Ack(delivery_tag));
        Ok(())
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.push(SinkOp::Reject {
            delivery_tag,
            requeue,
        });
        Ok(())
    }

    async fn publish_retry(&self, envelope: &RetryEnvelope) -> Result<(), Error> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(anyhow!("Injected publish failure"));
        }
        self.push(SinkOp::PublishRetry(envelope.retry_count));
        Ok(())
    }

    async fn publish_dead_letter(&self, _record: &DeadLetterRecord) -> Result<(), Error> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(anyhow!("Injected publish failure"));
        }
        self.push(SinkOp::PublishDeadLetter);
        Ok(())
    }
}

pub fn test_event(name: &str, email: Option<&str>) -> UserCreatedEvent {
    UserCreatedEvent {
        uuid: Uuid::new_v4(),
        name: name.to_string(),
        email: email.map(str::to_string),
        timestamp: Utc::now(),
    }
}
