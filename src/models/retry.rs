#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl RetryConfig {
    /// Bounded profile for ancillary calls (store writes, probe publishes).
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 5_000,
            backoff_multiplier: 1.5,
            jitter: true,
        }
    }

    /// Delay schedule for the long-lived broker connection. Attempt counts
    /// are ignored by the connection manager, which retries forever.
    pub fn persistent() -> Self {
        Self {
            max_attempts: u32::MAX,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}
