use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use anyhow::{Result, anyhow};
use enrichment_service::{
    clients::circuit_breaker::CircuitBreaker,
    models::circuit_breaker::{CircuitBreakerConfig, CircuitState},
    utils::Clock,
};

use crate::support::ManualClock;

fn test_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        call_timeout_ms: 1_000,
        error_threshold_percentage: 50,
        reset_timeout_ms: 30_000,
        volume_threshold: 10,
        window_ms: 60_000,
    }
}

fn breaker_with_clock() -> (Arc<ManualClock>, CircuitBreaker) {
    let clock = ManualClock::starting_at(1_000);
    let breaker = CircuitBreaker::new(
        "test".to_string(),
        test_config(),
        clock.clone() as Arc<dyn Clock>,
    );
    (clock, breaker)
}

async fn succeed(breaker: &CircuitBreaker) -> Result<()> {
    breaker.call(|| async { Ok(()) }).await
}

async fn fail(breaker: &CircuitBreaker) -> Result<()> {
    breaker
        .call(|| async { Err::<(), _>(anyhow!("downstream failure")) })
        .await
}

/// Test: 6 failures out of 10 calls with a 50% threshold open the circuit
#[tokio::test]
async fn test_error_rate_over_threshold_opens_circuit() -> Result<()> {
    let (_clock, breaker) = breaker_with_clock();

    for _ in 0..4 {
        succeed(&breaker).await?;
    }
    for _ in 0..6 {
        let _ = fail(&breaker).await;
    }

    assert_eq!(breaker.state(), CircuitState::Open);

    Ok(())
}

/// Test: failures below the volume threshold do not open the circuit
#[tokio::test]
async fn test_below_volume_threshold_stays_closed() {
    let (_clock, breaker) = breaker_with_clock();

    for _ in 0..9 {
        let _ = fail(&breaker).await;
    }

    assert_eq!(
        breaker.state(),
        CircuitState::Closed,
        "9 samples is under the volume threshold of 10"
    );
}

/// Test: an open circuit short-circuits without invoking the operation
#[tokio::test]
async fn test_open_circuit_short_circuits() {
    let (_clock, breaker) = breaker_with_clock();

    for _ in 0..10 {
        let _ = fail(&breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);

    let result = breaker
        .call(|| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await;

    assert!(result.is_err(), "Open circuit must reject the call");
    assert_eq!(
        invocations.load(Ordering::SeqCst),
        0,
        "Operation must not run while the circuit is open"
    );
}

/// Test: after the reset timeout a successful probe closes the circuit
#[tokio::test]
async fn test_successful_probe_closes_circuit() -> Result<()> {
    let (clock, breaker) = breaker_with_clock();

    for _ in 0..10 {
        let _ = fail(&breaker).await;
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    clock.advance_ms(30_000);

    succeed(&breaker).await?;
    assert_eq!(breaker.state(), CircuitState::Closed);

    // Normal traffic flows again.
    succeed(&breaker).await?;

    Ok(())
}

/// Test: a failed probe reopens the circuit
#[tokio::test]
async fn test_failed_probe_reopens_circuit() {
    let (clock, breaker) = breaker_with_clock();

    for _ in 0..10 {
        let _ = fail(&breaker).await;
    }

    clock.advance_ms(30_000);
    let _ = fail(&breaker).await;

    assert_eq!(breaker.state(), CircuitState::Open);

    // Still short-circuiting until the next reset interval elapses.
    let result = succeed(&breaker).await;
    assert!(result.is_err());
}

/// Test: a call exceeding the timeout counts as a failure
#[tokio::test]
async fn test_timeout_counts_as_failure() {
    let clock = ManualClock::starting_at(1_000);
    let breaker = CircuitBreaker::new(
        "slow".to_string(),
        CircuitBreakerConfig {
            call_timeout_ms: 20,
            error_threshold_percentage: 50,
            reset_timeout_ms: 30_000,
            volume_threshold: 1,
            window_ms: 60_000,
        },
        clock as Arc<dyn Clock>,
    );

    let result = breaker
        .call(|| async {
            tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
            Ok(())
        })
        .await;

    assert!(result.is_err(), "Timed-out call must fail");
    assert_eq!(
        breaker.state(),
        CircuitState::Open,
        "Timeout failure counts against the error budget"
    );
}

/// Test: recovery clears the window so old failures do not re-open the circuit
#[tokio::test]
async fn test_recovery_resets_error_window() -> Result<()> {
    let (clock, breaker) = breaker_with_clock();

    for _ in 0..10 {
        let _ = fail(&breaker).await;
    }
    clock.advance_ms(30_000);
    succeed(&breaker).await?;

    // A single new failure should not trip the freshly-closed circuit.
    let _ = fail(&breaker).await;
    assert_eq!(breaker.state(), CircuitState::Closed);

    Ok(())
}
