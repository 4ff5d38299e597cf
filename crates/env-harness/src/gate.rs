//! Readiness gate: bounded, fixed-interval polling of a probe.
//!
//! The gate blocks until a dependency reports healthy or its attempt budget is
//! exhausted. The interval is fixed rather than exponential: targets are local
//! containers that become healthy within a narrow window, so backoff would only
//! delay detection.

use crate::probe::{Probe, ProbeTarget};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Invalid retry policy parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,
}

/// How many times to probe and how long to wait between probes.
///
/// `max_attempts` is at least 1, so the worst-case wait
/// (`(max_attempts - 1) * interval`) is always finite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    interval: Duration,
}

impl RetryPolicy {
    /// Create a policy, rejecting a zero attempt budget.
    pub fn new(max_attempts: u32, interval: Duration) -> Result<Self, PolicyError> {
        if max_attempts == 0 {
            return Err(PolicyError::ZeroAttempts);
        }
        Ok(Self {
            max_attempts,
            interval,
        })
    }

    /// A single probe with no retry.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            interval: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Total time spent sleeping when every attempt fails.
    pub fn worst_case_wait(&self) -> Duration {
        self.interval
            .saturating_mul(self.max_attempts.saturating_sub(1))
    }
}

/// Readiness gate failures.
#[derive(Debug, Clone, Error)]
pub enum GateError {
    #[error("{url} not ready after {attempts} attempts")]
    Timeout {
        url: String,
        attempts: u32,
        diagnostics: String,
    },
}

impl GateError {
    /// Diagnostics collected when the gate gave up.
    pub fn diagnostics(&self) -> &str {
        match self {
            GateError::Timeout { diagnostics, .. } => diagnostics,
        }
    }
}

/// Wait until `target` passes `probe`, or give up after `policy.max_attempts()`.
///
/// Success on attempt `k` returns immediately after `k` probes and `(k - 1)`
/// intervals of sleep. When every attempt fails, `on_failure` is invoked once to
/// collect diagnostics (e.g. recent container logs) and
/// [`GateError::Timeout`] is returned after exactly `max_attempts` probes and
/// `(max_attempts - 1)` intervals. There is no sleep after the final attempt.
///
/// # Example
///
/// ```no_run
/// use env_harness::gate::{await_ready, RetryPolicy};
/// use env_harness::probe::{HttpProbe, ProbeTarget};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let probe = HttpProbe::new();
/// let target = ProbeTarget::new("http://localhost:8500/v1/status/leader", Duration::from_secs(5));
/// let policy = RetryPolicy::new(30, Duration::from_secs(2))?;
///
/// await_ready(&probe, &target, policy, || async { "no logs".to_string() }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn await_ready<P, F, Fut>(
    probe: &P,
    target: &ProbeTarget,
    policy: RetryPolicy,
    on_failure: F,
) -> Result<(), GateError>
where
    P: Probe + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = String>,
{
    for attempt in 1..=policy.max_attempts() {
        if attempt > 1 {
            sleep(policy.interval()).await;
        }

        if probe.probe(target).await {
            info!(
                target: "harness.gate",
                url = %target.url(),
                attempt,
                "Endpoint ready"
            );
            return Ok(());
        }

        debug!(
            target: "harness.gate",
            url = %target.url(),
            attempt,
            max_attempts = policy.max_attempts(),
            "Endpoint not ready"
        );
    }

    warn!(
        target: "harness.gate",
        url = %target.url(),
        attempts = policy.max_attempts(),
        waited = ?policy.worst_case_wait(),
        "Endpoint never became ready, collecting diagnostics"
    );

    let diagnostics = on_failure().await;

    Err(GateError::Timeout {
        url: target.url().to_string(),
        attempts: policy.max_attempts(),
        diagnostics,
    })
}
