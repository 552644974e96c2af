use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use anyhow::{Error, Result, anyhow};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

use crate::{
    models::circuit_breaker::{CircuitBreakerConfig, CircuitState},
    utils::Clock,
};

struct Sample {
    at: DateTime<Utc>,
    ok: bool,
}

struct BreakerInner {
    state: CircuitState,
    samples: VecDeque<Sample>,
    opened_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
}

enum Admission {
    Normal,
    Probe,
}

/// Explicit CLOSED/OPEN/HALF_OPEN state machine over an async operation.
/// Opens when the error rate over the rolling window crosses the configured
/// threshold (given enough samples), short-circuits while open, and lets a
/// single probe through after the reset timeout. The clock is injected so
/// transitions are testable without waiting.
pub struct CircuitBreaker {
    service_name: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(service_name: String, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                samples: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock_inner().state
    }

    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let admission = self.admit()?;

        let call_timeout = Duration::from_millis(self.config.call_timeout_ms);
        let outcome = match timeout(call_timeout, operation()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    service = %self.service_name,
                    timeout_ms = self.config.call_timeout_ms,
                    "Operation timed out"
                );
                Err(anyhow!(
                    "Operation timed out after {}ms",
                    self.config.call_timeout_ms
                ))
            }
        };

        self.record(outcome.is_ok(), &admission);

        outcome
    }

    fn admit(&self) -> Result<Admission, Error> {
        let now = self.clock.now();
        let mut inner = self.lock_inner();
        Self::prune(&mut inner, now, &self.config);

        match inner.state {
            CircuitState::Closed => Ok(Admission::Normal),
            CircuitState::Open => {
                let reset_elapsed = inner.opened_at.is_some_and(|opened_at| {
                    now - opened_at
                        >= ChronoDuration::milliseconds(self.config.reset_timeout_ms as i64)
                });

                if reset_elapsed {
                    info!(service = %self.service_name, "Circuit breaker attempting reset");
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    return Ok(Admission::Probe);
                }

                warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                Err(anyhow!("Circuit breaker is open for {}", self.service_name))
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(anyhow!(
                        "Circuit breaker is open for {}",
                        self.service_name
                    ));
                }

                debug!(service = %self.service_name, "Circuit breaker in half-open state");
                inner.probe_in_flight = true;
                Ok(Admission::Probe)
            }
        }
    }

    fn record(&self, ok: bool, admission: &Admission) {
        let now = self.clock.now();
        let mut inner = self.lock_inner();

        if let Admission::Probe = admission {
            inner.probe_in_flight = false;

            if ok {
                inner.state = CircuitState::Closed;
                inner.samples.clear();
                inner.opened_at = None;
                info!(service = %self.service_name, "Circuit breaker closed after successful recovery");
            } else {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            }

            return;
        }

        if inner.state != CircuitState::Closed {
            return;
        }

        inner.samples.push_back(Sample { at: now, ok });
        Self::prune(&mut inner, now, &self.config);

        let total = inner.samples.len() as u32;
        if total < self.config.volume_threshold {
            return;
        }

        let failures = inner.samples.iter().filter(|s| !s.ok).count() as u32;
        let error_rate = failures * 100 / total;

        debug!(
            service = %self.service_name,
            failures,
            total,
            error_rate,
            "Circuit breaker window sampled"
        );

        if error_rate >= self.config.error_threshold_percentage {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            warn!(
                service = %self.service_name,
                failures,
                total,
                "Circuit breaker opened due to error rate over threshold"
            );
        }
    }

    fn prune(inner: &mut BreakerInner, now: DateTime<Utc>, config: &CircuitBreakerConfig) {
        let horizon = now - ChronoDuration::milliseconds(config.window_ms as i64);
        while inner.samples.front().is_some_and(|s| s.at < horizon) {
            inner.samples.pop_front();
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        // Mutex poisoning only happens if a panic occurred mid-update; the
        // breaker state is still coherent enough to keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
