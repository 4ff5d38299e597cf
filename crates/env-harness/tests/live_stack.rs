//! Checks against an already running stack.
//!
//! Bring the stack up first (`docker compose -f compose/docker-compose.infra.yml
//! -f compose/registration.yml up -d`), then run with `--features live-stack`.

#![cfg(feature = "live-stack")]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use env_harness::config::HarnessConfig;
use env_harness::gate::await_ready;
use env_harness::probe::HttpProbe;
use env_harness::steps::{aggregate, run_steps, Outcome};
use env_harness::suites::{Suite, SuiteContext};
use env_harness::topology::StackEndpoints;

fn config() -> HarnessConfig {
    HarnessConfig::from_env().expect("harness configuration should load")
}

#[tokio::test]
async fn test_infrastructure_ready() {
    let config = config();
    let endpoints = StackEndpoints::from_config(&config);
    let probe = HttpProbe::new();

    for dep in endpoints.infrastructure_dependencies(config.readiness, config.probe_timeout) {
        await_ready(&probe, dep.target(), dep.policy(), || async { String::new() })
            .await
            .unwrap_or_else(|e| panic!("{} should be ready: {e}", dep.name()));
    }
}

#[tokio::test]
async fn test_registration_suite_passes() {
    let config = config();
    let ctx = SuiteContext::new(&config, StackEndpoints::from_config(&config))
        .detect_grpcurl()
        .await;

    let results = run_steps(Suite::Registration.steps(&ctx)).await;

    assert_eq!(
        aggregate(&results, false),
        Outcome::Pass,
        "results: {results:#?}"
    );
}
