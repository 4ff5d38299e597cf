//! Soft-fail step runner.
//!
//! Steps run in declaration order and every step runs, whatever happened to the
//! steps before it. Only a failing *critical* step fails the session; a failing
//! non-critical step, or a step skipped because a capability is missing, is
//! recorded as a warning.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use tracing::{error, info, warn};

/// Recorded outcome of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Pass,
    Fail,
    Warn,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Pass => write!(f, "PASS"),
            StepOutcome::Fail => write!(f, "FAIL"),
            StepOutcome::Warn => write!(f, "WARN"),
        }
    }
}

/// Overall session outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
}

impl Outcome {
    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Pass => 0,
            Outcome::Fail => 1,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pass => write!(f, "PASS"),
            Outcome::Fail => write!(f, "FAIL"),
        }
    }
}

/// What a step's check observed, before the critical/non-critical policy applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Passed(String),
    Failed(String),
    /// A precondition capability was unavailable (e.g. no `grpcurl`).
    Skipped(String),
}

impl CheckOutcome {
    pub fn passed(detail: impl Into<String>) -> Self {
        CheckOutcome::Passed(detail.into())
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        CheckOutcome::Failed(detail.into())
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        CheckOutcome::Skipped(reason.into())
    }
}

/// The recorded result of one step. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepResult {
    name: String,
    outcome: StepOutcome,
    detail: String,
    critical: bool,
}

impl StepResult {
    /// Apply the soft-fail policy to a check outcome.
    pub fn from_check(name: impl Into<String>, critical: bool, check: CheckOutcome) -> Self {
        let (outcome, detail) = match check {
            CheckOutcome::Passed(detail) => (StepOutcome::Pass, detail),
            CheckOutcome::Failed(detail) if critical => (StepOutcome::Fail, detail),
            CheckOutcome::Failed(detail) => (StepOutcome::Warn, detail),
            CheckOutcome::Skipped(reason) => (StepOutcome::Warn, format!("skipped: {reason}")),
        };
        Self {
            name: name.into(),
            outcome,
            detail,
            critical,
        }
    }

    /// A critical failure synthesized by the session itself (provisioning,
    /// readiness timeout, interrupt).
    pub fn synthetic_failure(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            outcome: StepOutcome::Fail,
            detail: detail.into(),
            critical: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn outcome(&self) -> StepOutcome {
        self.outcome
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }
}

/// Boxed future returned by a step check.
pub type CheckFuture<'a> = BoxFuture<'a, CheckOutcome>;

/// A named check awaiting execution.
pub struct Step<'a> {
    name: String,
    critical: bool,
    check: Box<dyn FnOnce() -> CheckFuture<'a> + Send + 'a>,
}

impl<'a> Step<'a> {
    /// A step whose failure fails the session.
    pub fn critical<F, Fut>(name: impl Into<String>, check: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = CheckOutcome> + Send + 'a,
    {
        Self::new(name, true, check)
    }

    /// A step whose failure is only a warning.
    pub fn non_critical<F, Fut>(name: impl Into<String>, check: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = CheckOutcome> + Send + 'a,
    {
        Self::new(name, false, check)
    }

    fn new<F, Fut>(name: impl Into<String>, critical: bool, check: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = CheckOutcome> + Send + 'a,
    {
        Self {
            name: name.into(),
            critical,
            check: Box::new(move || check().boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }
}

impl fmt::Debug for Step<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("critical", &self.critical)
            .finish_non_exhaustive()
    }
}

/// Run every step in order and return their results in the same order.
pub async fn run_steps(steps: Vec<Step<'_>>) -> Vec<StepResult> {
    let mut results = Vec::with_capacity(steps.len());
    run_steps_into(steps, &mut results).await;
    results
}

/// Run every step in order, appending each result as soon as it is known.
///
/// Results already appended survive if the caller stops polling midway.
pub async fn run_steps_into(steps: Vec<Step<'_>>, results: &mut Vec<StepResult>) {
    let total = steps.len();

    for (index, step) in steps.into_iter().enumerate() {
        let Step {
            name,
            critical,
            check,
        } = step;

        info!(
            target: "harness.steps",
            step = %name,
            position = index + 1,
            total,
            critical,
            "Running step"
        );

        let result = StepResult::from_check(name, critical, check().await);
        log_result(&result);
        results.push(result);
    }
}

fn log_result(result: &StepResult) {
    match result.outcome() {
        StepOutcome::Pass => info!(
            target: "harness.steps",
            step = %result.name(),
            detail = %result.detail(),
            "[PASS]"
        ),
        StepOutcome::Warn => warn!(
            target: "harness.steps",
            step = %result.name(),
            detail = %result.detail(),
            "[WARN]"
        ),
        StepOutcome::Fail => error!(
            target: "harness.steps",
            step = %result.name(),
            detail = %result.detail(),
            "[FAIL]"
        ),
    }
}

/// Aggregate results into an overall outcome.
///
/// Fail if any critical result failed or any readiness gate timed out.
pub fn aggregate(results: &[StepResult], gate_timed_out: bool) -> Outcome {
    let critical_failure = results
        .iter()
        .any(|r| r.is_critical() && r.outcome() == StepOutcome::Fail);

    if critical_failure || gate_timed_out {
        Outcome::Fail
    } else {
        Outcome::Pass
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_non_critical_failure_degrades_to_warn() {
        let result = StepResult::from_check("metrics", false, CheckOutcome::failed("missing"));
        assert_eq!(result.outcome(), StepOutcome::Warn);
        assert_eq!(result.detail(), "missing");
    }

    #[test]
    fn test_critical_failure_is_fail() {
        let result = StepResult::from_check("register", true, CheckOutcome::failed("boom"));
        assert_eq!(result.outcome(), StepOutcome::Fail);
    }

    #[test]
    fn test_skip_is_warn_even_when_critical() {
        let result = StepResult::from_check("register", true, CheckOutcome::skipped("no grpcurl"));
        assert_eq!(result.outcome(), StepOutcome::Warn);
        assert!(result.detail().contains("no grpcurl"));
        assert_eq!(aggregate(&[result], false), Outcome::Pass);
    }

    #[test]
    fn test_gate_timeout_fails_aggregate() {
        assert_eq!(aggregate(&[], true), Outcome::Fail);
        assert_eq!(aggregate(&[], false), Outcome::Pass);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Outcome::Pass.exit_code(), 0);
        assert_eq!(Outcome::Fail.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_results_keep_declaration_order() {
        let ran = AtomicUsize::new(0);
        let ran = &ran;

        let steps = vec![
            Step::critical("first", move || async move {
                ran.fetch_add(1, Ordering::SeqCst);
                CheckOutcome::passed("ok")
            }),
            Step::non_critical("second", move || async move {
                ran.fetch_add(1, Ordering::SeqCst);
                CheckOutcome::failed("flaky")
            }),
            Step::critical("third", move || async move {
                ran.fetch_add(1, Ordering::SeqCst);
                CheckOutcome::passed("ok")
            }),
        ];

        let results = run_steps(steps).await;

        assert_eq!(ran.load(Ordering::SeqCst), 3);
        let names: Vec<&str> = results.iter().map(StepResult::name).collect();
        assert_eq!(names, ["first", "second", "third"]);
        assert_eq!(results[1].outcome(), StepOutcome::Warn);
    }
}
