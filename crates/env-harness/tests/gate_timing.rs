//! Readiness gate timing properties, on a paused tokio clock.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use env_harness::gate::{await_ready, GateError, RetryPolicy};
use env_harness::probe::ProbeTarget;
use harness_test_utils::MockProbe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

const URL: &str = "http://consul.test/v1/status/leader";

fn target() -> ProbeTarget {
    ProbeTarget::new(URL, Duration::from_secs(5))
}

fn assert_elapsed(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(100),
        "expected ~{expected:?}, got {actual:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_probes_n_times_and_waits_n_minus_one_intervals() {
    for (attempts, interval_secs) in [(1, 2), (3, 2), (5, 1), (60, 2)] {
        let probe = MockProbe::builder().always_fail(URL).build();
        let policy = RetryPolicy::new(attempts, Duration::from_secs(interval_secs)).unwrap();

        let start = Instant::now();
        let result = await_ready(&probe, &target(), policy, || async { String::new() }).await;

        assert!(matches!(result, Err(GateError::Timeout { .. })));
        assert_eq!(probe.call_count(URL), attempts as usize);
        assert_elapsed(start.elapsed(), policy.worst_case_wait());
    }
}

#[tokio::test(start_paused = true)]
async fn test_success_at_attempt_k_stops_probing() {
    let policy = RetryPolicy::new(10, Duration::from_secs(2)).unwrap();

    for k in 1..=4u32 {
        let probe = MockProbe::builder().fail_times(URL, k - 1).build();

        let start = Instant::now();
        await_ready(&probe, &target(), policy, || async { String::new() })
            .await
            .expect("gate should open");

        assert_eq!(probe.call_count(URL), k as usize);
        assert_elapsed(start.elapsed(), Duration::from_secs(2) * (k - 1));
    }
}

#[tokio::test(start_paused = true)]
async fn test_probes_are_spaced_by_the_interval() {
    let probe = MockProbe::builder().fail_times(URL, 3).build();
    let policy = RetryPolicy::new(5, Duration::from_secs(2)).unwrap();

    await_ready(&probe, &target(), policy, || async { String::new() })
        .await
        .unwrap();

    let calls = probe.calls();
    assert_eq!(calls.len(), 4);
    for pair in calls.windows(2) {
        assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_secs(2));
    }
    assert!(calls.last().unwrap().ready);
}

#[tokio::test(start_paused = true)]
async fn test_three_attempts_two_seconds_times_out_after_four_seconds() {
    let probe = MockProbe::builder().always_fail(URL).build();
    let policy = RetryPolicy::new(3, Duration::from_secs(2)).unwrap();
    let diagnostics_calls = AtomicUsize::new(0);

    let start = Instant::now();
    let err = await_ready(&probe, &target(), policy, || async {
        diagnostics_calls.fetch_add(1, Ordering::SeqCst);
        "consul | agent: still electing".to_string()
    })
    .await
    .unwrap_err();

    assert_elapsed(start.elapsed(), Duration::from_secs(4));
    assert_eq!(probe.call_count(URL), 3);
    assert_eq!(diagnostics_calls.load(Ordering::SeqCst), 1);
    assert!(err.diagnostics().contains("still electing"));
    assert!(err.to_string().contains(URL));
}

#[tokio::test(start_paused = true)]
async fn test_diagnostics_not_collected_on_success() {
    let probe = MockProbe::always_ready();
    let diagnostics_calls = AtomicUsize::new(0);

    await_ready(&probe, &target(), RetryPolicy::once(), || async {
        diagnostics_calls.fetch_add(1, Ordering::SeqCst);
        String::new()
    })
    .await
    .unwrap();

    assert_eq!(diagnostics_calls.load(Ordering::SeqCst), 0);
}
