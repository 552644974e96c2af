use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::models::retry::RetryConfig;

/// Time source injected into the cache and the circuit breaker so their
/// expiry/transition logic is testable without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Delay for the given 1-based attempt: `base * multiplier^(attempt-1)`,
/// jittered by a factor in [0.75, 1.25], capped at `max_delay_ms`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponential =
        config.base_delay_ms as f64 * config.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

    let jittered = if config.jitter {
        exponential * rand::random_range(0.75..=1.25)
    } else {
        exponential
    };

    Duration::from_millis(jittered.min(config.max_delay_ms as f64) as u64)
}

pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                let delay = backoff_delay(config, attempt);

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retry attempt failed, backing off"
                );

                sleep(delay).await;
            }
        }
    }
}
