//! Canned steps and dependencies.

use env_harness::gate::RetryPolicy;
use env_harness::probe::ProbeTarget;
use env_harness::session::Dependency;
use env_harness::steps::{CheckOutcome, Step};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A critical step that passes.
pub fn passing_step(name: &str) -> Step<'static> {
    Step::critical(name, || async { CheckOutcome::passed("ok") })
}

/// A step that fails, critical or not.
pub fn failing_step(name: &str, critical: bool) -> Step<'static> {
    let check = || async { CheckOutcome::failed("check failed") };
    if critical {
        Step::critical(name, check)
    } else {
        Step::non_critical(name, check)
    }
}

/// A critical passing step that bumps `counter` when it runs.
pub fn counting_step(name: &str, counter: &Arc<AtomicUsize>) -> Step<'static> {
    let counter = Arc::clone(counter);
    Step::critical(name, move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        CheckOutcome::passed("counted")
    })
}

/// A critical step that sleeps for `duration` before passing.
pub fn slow_step(name: &str, duration: Duration) -> Step<'static> {
    Step::critical(name, move || async move {
        tokio::time::sleep(duration).await;
        CheckOutcome::passed("slow")
    })
}

/// Probe URL used for a test dependency called `name`.
pub fn dependency_url(name: &str) -> String {
    format!("http://{name}.test/ready")
}

/// A dependency on `dependency_url(name)` with the given policy.
pub fn dependency(name: &str, policy: RetryPolicy) -> Dependency {
    Dependency::new(
        name,
        ProbeTarget::new(dependency_url(name), Duration::from_secs(1)),
        policy,
    )
}
