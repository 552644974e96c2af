use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Independent timeout applied to every guarded call; a timeout counts
    /// as a failure.
    pub call_timeout_ms: u64,
    /// Error rate over the rolling window that opens the circuit.
    pub error_threshold_percentage: u32,
    /// How long the circuit stays open before a half-open probe is allowed.
    pub reset_timeout_ms: u64,
    /// Minimum samples in the window before the error rate is considered.
    pub volume_threshold: u32,
    /// Width of the rolling sample window.
    pub window_ms: u64,
}
