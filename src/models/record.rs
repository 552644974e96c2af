use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentStatus {
    Pending,
    Completed,
    Failed,
}

impl EnrichmentStatus {
    pub fn from_string(s: &str) -> Self {
        match s {
            "completed" => EnrichmentStatus::Completed,
            "failed" => EnrichmentStatus::Failed,
            _ => EnrichmentStatus::Pending,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EnrichmentStatus::Pending => "pending",
            EnrichmentStatus::Completed => "completed",
            EnrichmentStatus::Failed => "failed",
        }
    }
}

impl Display for EnrichmentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable per-user record of the enrichment lifecycle, keyed by the user's
/// uuid. At most one row exists per uuid; `retry_count` only ever grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    pub uuid: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub enrichment_payload: Map<String, JsonValue>,
    pub status: EnrichmentStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
