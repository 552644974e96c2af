use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{circuit_breaker::CircuitBreakerConfig, retry::RetryConfig};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub rabbitmq_url: String,

    #[serde(default = "default_queue_name")]
    pub queue_name: String,

    #[serde(default = "default_dlx_name")]
    pub dlx_name: String,

    #[serde(default = "default_dlq_name")]
    pub dlq_name: String,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// TTL of the first retry queue; level `n` waits `retry_delay_ms * 2^(n-1)`.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_dlq_retention_ms")]
    pub dlq_retention_ms: u64,

    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,

    pub database_url: String,

    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    #[serde(default = "default_cache_sweep_interval_seconds")]
    pub cache_sweep_interval_seconds: u64,

    #[serde(default = "default_circuit_breaker_timeout_ms")]
    pub circuit_breaker_timeout_ms: u64,

    #[serde(default = "default_circuit_breaker_error_threshold_percentage")]
    pub circuit_breaker_error_threshold_percentage: u32,

    #[serde(default = "default_circuit_breaker_reset_timeout_ms")]
    pub circuit_breaker_reset_timeout_ms: u64,

    #[serde(default = "default_circuit_breaker_volume_threshold")]
    pub circuit_breaker_volume_threshold: u32,

    #[serde(default = "default_circuit_breaker_window_ms")]
    pub circuit_breaker_window_ms: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
}

fn default_queue_name() -> String {
    "user.created".to_string()
}

fn default_dlx_name() -> String {
    "user.created.dlx".to_string()
}

fn default_dlq_name() -> String {
    "user.created.dlq".to_string()
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

fn default_dlq_retention_ms() -> u64 {
    7 * 24 * 60 * 60 * 1_000
}

fn default_prefetch_count() -> u16 {
    1
}

fn default_cache_ttl_seconds() -> u64 {
    30
}

fn default_cache_sweep_interval_seconds() -> u64 {
    60
}

fn default_circuit_breaker_timeout_ms() -> u64 {
    3_000
}

fn default_circuit_breaker_error_threshold_percentage() -> u32 {
    50
}

fn default_circuit_breaker_reset_timeout_ms() -> u64 {
    30_000
}

fn default_circuit_breaker_volume_threshold() -> u32 {
    10
}

fn default_circuit_breaker_window_ms() -> u64 {
    10_000
}

fn default_server_port() -> u16 {
    3000
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|_| anyhow!("Invalid or missing environmental variable"))?;
        Ok(config)
    }

    /// Message TTL of retry queue level `n` (1-based).
    pub fn retry_queue_ttl_ms(&self, level: u32) -> u64 {
        self.retry_delay_ms.saturating_mul(1u64 << level.saturating_sub(1).min(32))
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            call_timeout_ms: self.circuit_breaker_timeout_ms,
            error_threshold_percentage: self.circuit_breaker_error_threshold_percentage,
            reset_timeout_ms: self.circuit_breaker_reset_timeout_ms,
            volume_threshold: self.circuit_breaker_volume_threshold,
            window_ms: self.circuit_breaker_window_ms,
        }
    }

    pub fn quick_retry_config(&self) -> RetryConfig {
        RetryConfig::quick()
    }

    pub fn reconnect_config(&self) -> RetryConfig {
        RetryConfig::persistent()
    }
}
