//! Session controller.
//!
//! A session walks
//! `Idle -> Provisioning -> GatingReadiness -> RunningSteps -> Reporting -> Terminated`.
//!
//! # Guaranteed teardown
//!
//! The teardown guard is registered before anything is provisioned and fires
//! exactly once, on every path into `Terminated`: normal completion, a failed
//! provisioning step, a readiness timeout, or cancellation of the shutdown token
//! (SIGINT/SIGTERM in the CLI). Teardown errors are logged and recorded in the
//! report but never change the outcome.

use crate::gate::{await_ready, GateError, RetryPolicy};
use crate::probe::{Probe, ProbeTarget};
use crate::provision::{Provisioner, ResourceHandle};
use crate::sanitize::{redact, sanitize_detail};
use crate::steps::{aggregate, run_steps_into, CheckOutcome, Outcome, Step, StepResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default number of log lines collected when a gate times out.
pub const DEFAULT_DIAGNOSTIC_LINES: usize = 50;

/// Invalid session declarations, rejected before anything is provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Dependency declared twice: {0}")]
    DuplicateDependency(String),

    #[error("Dependency {dependency} requires undeclared dependency {requires}")]
    UnknownDependency { dependency: String, requires: String },

    #[error("Dependency cycle among: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),
}

/// An external service the session must gate on before running steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    name: String,
    target: ProbeTarget,
    policy: RetryPolicy,
    depends_on: Vec<String>,
    log_service: Option<String>,
}

impl Dependency {
    pub fn new(name: impl Into<String>, target: ProbeTarget, policy: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            target,
            policy,
            depends_on: Vec::new(),
            log_service: None,
        }
    }

    /// Declare that this dependency may only be gated after `other` is ready.
    #[must_use]
    pub fn depends_on(mut self, other: impl Into<String>) -> Self {
        self.depends_on.push(other.into());
        self
    }

    /// Compose service whose logs are dumped on timeout (defaults to the name).
    #[must_use]
    pub fn log_service(mut self, service: impl Into<String>) -> Self {
        self.log_service = Some(service.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &ProbeTarget {
        &self.target
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn requirements(&self) -> &[String] {
        &self.depends_on
    }

    fn log_service_name(&self) -> &str {
        self.log_service.as_deref().unwrap_or(&self.name)
    }
}

/// A validated session declaration.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    name: String,
    /// Dependencies in gating order.
    dependencies: Vec<Dependency>,
    diagnostic_lines: usize,
    keep_environment: bool,
}

impl SessionSpec {
    pub fn builder(name: impl Into<String>) -> SessionSpecBuilder {
        SessionSpecBuilder {
            name: name.into(),
            dependencies: Vec::new(),
            diagnostic_lines: DEFAULT_DIAGNOSTIC_LINES,
            keep_environment: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dependencies in the order they will be gated.
    pub fn gating_order(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(Dependency::name)
    }
}

/// Builder for [`SessionSpec`].
#[derive(Debug)]
pub struct SessionSpecBuilder {
    name: String,
    dependencies: Vec<Dependency>,
    diagnostic_lines: usize,
    keep_environment: bool,
}

impl SessionSpecBuilder {
    #[must_use]
    pub fn dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    #[must_use]
    pub fn dependencies(mut self, dependencies: impl IntoIterator<Item = Dependency>) -> Self {
        self.dependencies.extend(dependencies);
        self
    }

    #[must_use]
    pub fn diagnostic_lines(mut self, lines: usize) -> Self {
        self.diagnostic_lines = lines;
        self
    }

    /// Leave the environment running after the session (debugging aid).
    #[must_use]
    pub fn keep_environment(mut self, keep: bool) -> Self {
        self.keep_environment = keep;
        self
    }

    /// Validate the declarations and fix the gating order.
    pub fn build(self) -> Result<SessionSpec, SessionError> {
        let dependencies = gating_order(self.dependencies)?;
        Ok(SessionSpec {
            name: self.name,
            dependencies,
            diagnostic_lines: self.diagnostic_lines,
            keep_environment: self.keep_environment,
        })
    }
}

/// Stable topological order: among dependencies whose requirements are already
/// gated, the earliest declared goes next.
fn gating_order(declared: Vec<Dependency>) -> Result<Vec<Dependency>, SessionError> {
    let mut names = HashSet::new();
    for dep in &declared {
        if !names.insert(dep.name.as_str()) {
            return Err(SessionError::DuplicateDependency(dep.name.clone()));
        }
    }
    for dep in &declared {
        if let Some(unknown) = dep.depends_on.iter().find(|r| !names.contains(r.as_str())) {
            return Err(SessionError::UnknownDependency {
                dependency: dep.name.clone(),
                requires: unknown.clone(),
            });
        }
    }

    let mut remaining = declared;
    let mut ordered: Vec<Dependency> = Vec::with_capacity(remaining.len());
    let mut gated: HashSet<String> = HashSet::new();

    while !remaining.is_empty() {
        let next = remaining
            .iter()
            .position(|dep| dep.depends_on.iter().all(|r| gated.contains(r)));

        match next {
            Some(index) => {
                let dep = remaining.remove(index);
                gated.insert(dep.name.clone());
                ordered.push(dep);
            }
            None => {
                return Err(SessionError::DependencyCycle(
                    remaining.into_iter().map(|dep| dep.name).collect(),
                ));
            }
        }
    }

    Ok(ordered)
}

/// Lifecycle phases of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "outcome", rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Provisioning,
    GatingReadiness,
    RunningSteps,
    Reporting,
    Terminated(Outcome),
}

/// What happened when the teardown guard fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum TeardownStatus {
    Completed,
    Failed(String),
    /// The environment was deliberately left running.
    Kept,
}

/// Final report of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcome: Outcome,
    pub results: Vec<StepResult>,
    pub phases: Vec<SessionPhase>,
    pub teardown: TeardownStatus,
    pub interrupted: bool,
}

/// Mutable state of a running session.
#[derive(Debug, Default)]
struct SessionState {
    resources: BTreeSet<ResourceHandle>,
    results: Vec<StepResult>,
    gate_timed_out: bool,
    provisioning_failed: bool,
}

/// Releases provisioned resources. Fires at most once (consumed by `fire`).
struct TeardownGuard<'a> {
    provisioner: &'a dyn Provisioner,
    keep_environment: bool,
    fired: bool,
}

impl<'a> TeardownGuard<'a> {
    fn register(provisioner: &'a dyn Provisioner, keep_environment: bool) -> Self {
        Self {
            provisioner,
            keep_environment,
            fired: false,
        }
    }

    async fn fire(mut self, resources: &BTreeSet<ResourceHandle>) -> TeardownStatus {
        self.fired = true;

        if self.keep_environment {
            warn!(
                target: "harness.session",
                resources = resources.len(),
                "Keeping environment, skipping teardown"
            );
            return TeardownStatus::Kept;
        }

        let handles: Vec<ResourceHandle> = resources.iter().cloned().collect();
        match self.provisioner.teardown(&handles).await {
            Ok(()) => {
                info!(target: "harness.session", resources = handles.len(), "Teardown complete");
                TeardownStatus::Completed
            }
            Err(e) => {
                error!(target: "harness.session", error = %e, "Teardown failed");
                TeardownStatus::Failed(e.to_string())
            }
        }
    }
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        if !self.fired {
            error!(
                target: "harness.session",
                "Session dropped before teardown ran; environment may be left behind"
            );
        }
    }
}

/// A single integration session against a provisioned environment.
pub struct Session<'a> {
    spec: SessionSpec,
    provisioner: &'a dyn Provisioner,
    probe: &'a dyn Probe,
    state: SessionState,
    phases: Vec<SessionPhase>,
}

impl<'a> Session<'a> {
    pub fn new(spec: SessionSpec, provisioner: &'a dyn Provisioner, probe: &'a dyn Probe) -> Self {
        Self {
            spec,
            provisioner,
            probe,
            state: SessionState::default(),
            phases: vec![SessionPhase::Idle],
        }
    }

    /// Run the session to termination.
    ///
    /// Cancelling `shutdown` stops whatever is in progress, records a critical
    /// failure and proceeds straight to teardown.
    pub async fn run(mut self, steps: Vec<Step<'_>>, shutdown: CancellationToken) -> SessionReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let guard = TeardownGuard::register(self.provisioner, self.spec.keep_environment);

        info!(
            target: "harness.session",
            session = %self.spec.name,
            dependencies = self.spec.dependencies.len(),
            steps = steps.len(),
            "Session starting"
        );

        let interrupted = {
            let body = self.drive(steps);
            tokio::pin!(body);
            tokio::select! {
                biased;
                () = shutdown.cancelled() => true,
                () = &mut body => false,
            }
        };

        if interrupted {
            warn!(target: "harness.session", session = %self.spec.name, "Session interrupted");
            self.state.results.push(StepResult::synthetic_failure(
                "interrupted",
                "session interrupted by shutdown signal",
            ));
        }

        if !self.state.provisioning_failed {
            self.enter(SessionPhase::Reporting);
        }
        let outcome = aggregate(&self.state.results, self.state.gate_timed_out);

        let teardown = guard.fire(&self.state.resources).await;
        self.state.resources.clear();
        self.enter(SessionPhase::Terminated(outcome));

        info!(
            target: "harness.session",
            session = %self.spec.name,
            outcome = %outcome,
            "Session finished"
        );

        SessionReport {
            session: self.spec.name,
            started_at,
            elapsed_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            outcome,
            results: self.state.results,
            phases: self.phases,
            teardown,
            interrupted,
        }
    }

    fn enter(&mut self, phase: SessionPhase) {
        info!(target: "harness.session", phase = ?phase, "Session phase");
        self.phases.push(phase);
    }

    async fn drive(&mut self, steps: Vec<Step<'_>>) {
        self.enter(SessionPhase::Provisioning);
        match self.provisioner.provision().await {
            Ok(handles) => {
                info!(target: "harness.session", resources = handles.len(), "Environment provisioned");
                self.state.resources.extend(handles);
            }
            Err(e) => {
                error!(target: "harness.session", error = %e, "Provisioning failed");
                self.state.provisioning_failed = true;
                self.state
                    .results
                    .push(StepResult::synthetic_failure("provision", e.to_string()));
                return;
            }
        }

        self.enter(SessionPhase::GatingReadiness);
        if let Err(e) = self.gate_dependencies().await {
            error!(target: "harness.session", error = %e, "Readiness gate timed out, aborting");
            return;
        }

        self.enter(SessionPhase::RunningSteps);
        run_steps_into(steps, &mut self.state.results).await;
    }

    async fn gate_dependencies(&mut self) -> Result<(), GateError> {
        let provisioner = self.provisioner;
        let lines = self.spec.diagnostic_lines;

        for dep in &self.spec.dependencies {
            let service = dep.log_service_name();
            info!(
                target: "harness.session",
                dependency = %dep.name(),
                url = %dep.target().url(),
                max_attempts = dep.policy().max_attempts(),
                "Waiting for dependency"
            );

            let gated = await_ready(self.probe, dep.target(), dep.policy(), || async move {
                provisioner.diagnostics(service, lines).await
            })
            .await;

            let step_name = format!("readiness: {}", dep.name());
            match gated {
                Ok(()) => self.state.results.push(StepResult::from_check(
                    step_name,
                    true,
                    CheckOutcome::passed(dep.target().url()),
                )),
                Err(e) => {
                    error!(
                        target: "harness.session",
                        dependency = %dep.name(),
                        "Recent logs:\n{}",
                        redact(e.diagnostics())
                    );
                    self.state.gate_timed_out = true;
                    self.state.results.push(StepResult::synthetic_failure(
                        step_name,
                        format!("{e}; last logs: {}", sanitize_detail(e.diagnostics())),
                    ));
                    return Err(e);
                }
            }
        }

        Ok(())
    }
}
