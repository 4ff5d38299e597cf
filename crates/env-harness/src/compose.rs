//! Docker Compose provisioner.
//!
//! A [`ComposeProject`] layers one or more compose files (base infrastructure
//! first, then per-service overrides) under a single project name, brings it up
//! detached, and removes containers, networks and volumes on teardown.
//!
//! Every compose command is bounded by a timeout and killed when its future is
//! dropped, so an interrupted `up` cannot keep creating containers after
//! `down` has run.

use crate::provision::{ProvisionError, Provisioner, ResourceHandle, TeardownError};
use crate::sanitize::{sanitize_detail, tail_lines};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default bound on `up`; image pulls dominate.
pub const DEFAULT_UP_TIMEOUT: Duration = Duration::from_secs(900);

/// Default bound on `down` and `logs`.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Why a compose command produced no output.
#[derive(Debug)]
enum CommandError {
    Spawn(std::io::Error),
    TimedOut(Duration),
}

/// A compose project owned exclusively by one session.
#[derive(Debug, Clone)]
pub struct ComposeProject {
    project_name: String,
    files: Vec<PathBuf>,
    env: BTreeMap<String, String>,
    services: Vec<String>,
    binary: String,
    up_timeout: Duration,
    command_timeout: Duration,
}

impl ComposeProject {
    /// Create a project with no files yet.
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            files: Vec::new(),
            env: BTreeMap::new(),
            services: Vec::new(),
            binary: "docker".to_string(),
            up_timeout: DEFAULT_UP_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Append a compose file; later files override earlier ones.
    #[must_use]
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files.push(path.into());
        self
    }

    /// Set an environment variable for every compose invocation
    /// (image tags are selected this way).
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Restrict `up` to the named services (and their compose dependencies).
    #[must_use]
    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.services.push(name.into());
        self
    }

    /// Use a different executable (tests, podman shims).
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Bound `up` by `up` and every other command by `command`.
    #[must_use]
    pub fn with_timeouts(mut self, up: Duration, command: Duration) -> Self {
        self.up_timeout = up;
        self.command_timeout = command;
        self
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "-p".to_string(),
            self.project_name.clone(),
        ];
        for file in &self.files {
            args.push("-f".to_string());
            args.push(file.display().to_string());
        }
        args
    }

    pub fn up_args(&self) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(["up".to_string(), "-d".to_string()]);
        args.extend(self.services.iter().cloned());
        args
    }

    pub fn down_args(&self) -> Vec<String> {
        let mut args = self.base_args();
        args.extend([
            "down".to_string(),
            "-v".to_string(),
            "--remove-orphans".to_string(),
        ]);
        args
    }

    pub fn logs_args(&self, service: &str, lines: usize) -> Vec<String> {
        let mut args = self.base_args();
        args.extend([
            "logs".to_string(),
            "--no-color".to_string(),
            "--tail".to_string(),
            lines.to_string(),
            service.to_string(),
        ]);
        args
    }

    fn command_line(&self, args: &[String]) -> String {
        format!("{} {}", self.binary, args.join(" "))
    }

    async fn run(&self, args: &[String], timeout: Duration) -> Result<Output, CommandError> {
        debug!(
            target: "harness.compose",
            command = %self.command_line(args),
            ?timeout,
            "Running compose command"
        );
        let output = Command::new(&self.binary)
            .args(args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(timeout, output).await {
            Ok(result) => result.map_err(CommandError::Spawn),
            Err(_) => Err(CommandError::TimedOut(timeout)),
        }
    }

    fn handles(&self) -> Vec<ResourceHandle> {
        if self.services.is_empty() {
            return vec![ResourceHandle::new(self.project_name.clone())];
        }
        self.services
            .iter()
            .map(|service| ResourceHandle::new(format!("{}/{}", self.project_name, service)))
            .collect()
    }
}

fn missing_file(files: &[PathBuf]) -> Option<&Path> {
    files.iter().map(PathBuf::as_path).find(|path| !path.is_file())
}

#[async_trait]
impl Provisioner for ComposeProject {
    async fn provision(&self) -> Result<Vec<ResourceHandle>, ProvisionError> {
        if let Some(path) = missing_file(&self.files) {
            return Err(ProvisionError::MissingComposeFile(path.display().to_string()));
        }

        let args = self.up_args();
        let command = self.command_line(&args);
        info!(
            target: "harness.compose",
            project = %self.project_name,
            files = self.files.len(),
            "Bringing environment up"
        );

        let output = self
            .run(&args, self.up_timeout)
            .await
            .map_err(|e| match e {
                CommandError::Spawn(source) => ProvisionError::Spawn {
                    command: command.clone(),
                    source,
                },
                CommandError::TimedOut(timeout) => ProvisionError::TimedOut {
                    command: command.clone(),
                    timeout,
                },
            })?;

        if !output.status.success() {
            return Err(ProvisionError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: sanitize_detail(&String::from_utf8_lossy(&output.stderr)),
            });
        }

        Ok(self.handles())
    }

    async fn teardown(&self, handles: &[ResourceHandle]) -> Result<(), TeardownError> {
        let args = self.down_args();
        let command = self.command_line(&args);
        info!(
            target: "harness.compose",
            project = %self.project_name,
            resources = handles.len(),
            "Tearing environment down"
        );

        let output = self
            .run(&args, self.command_timeout)
            .await
            .map_err(|e| match e {
                CommandError::Spawn(source) => TeardownError::Spawn {
                    command: command.clone(),
                    source,
                },
                CommandError::TimedOut(timeout) => TeardownError::TimedOut {
                    command: command.clone(),
                    timeout,
                },
            })?;

        if !output.status.success() {
            return Err(TeardownError::CommandFailed {
                command,
                status: output.status.to_string(),
                stderr: sanitize_detail(&String::from_utf8_lossy(&output.stderr)),
            });
        }

        Ok(())
    }

    async fn diagnostics(&self, service: &str, lines: usize) -> String {
        let reason = match self
            .run(&self.logs_args(service, lines), self.command_timeout)
            .await
        {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                return tail_lines(&text, lines);
            }
            Err(CommandError::Spawn(e)) => e.to_string(),
            Err(CommandError::TimedOut(timeout)) => format!("timed out after {timeout:?}"),
        };

        warn!(
            target: "harness.compose",
            service,
            reason = %reason,
            "Failed to collect service logs"
        );
        format!("<logs for {service} unavailable: {reason}>")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn project() -> ComposeProject {
        ComposeProject::new("stack-check-test")
            .file("compose/docker-compose.infra.yml")
            .file("compose/registration.yml")
    }

    #[test]
    fn test_up_args_layer_files_in_order() {
        let args = project().service("platform-registration-service").up_args();
        assert_eq!(
            args,
            vec![
                "compose",
                "-p",
                "stack-check-test",
                "-f",
                "compose/docker-compose.infra.yml",
                "-f",
                "compose/registration.yml",
                "up",
                "-d",
                "platform-registration-service",
            ]
        );
    }

    #[test]
    fn test_down_removes_volumes_and_orphans() {
        let args = project().down_args();
        assert!(args.ends_with(&[
            "down".to_string(),
            "-v".to_string(),
            "--remove-orphans".to_string()
        ]));
    }

    #[test]
    fn test_logs_args_tail() {
        let args = project().logs_args("consul", 50);
        assert!(args.ends_with(&[
            "logs".to_string(),
            "--no-color".to_string(),
            "--tail".to_string(),
            "50".to_string(),
            "consul".to_string()
        ]));
    }

    #[test]
    fn test_handles_per_service_or_project() {
        assert_eq!(
            project().handles(),
            vec![ResourceHandle::new("stack-check-test")]
        );
        assert_eq!(
            project().service("consul").service("mysql").handles(),
            vec![
                ResourceHandle::new("stack-check-test/consul"),
                ResourceHandle::new("stack-check-test/mysql"),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_compose_file_is_provision_error() {
        let project = ComposeProject::new("p").file("/nonexistent/compose.yml");
        let err = project.provision().await.expect_err("missing file should fail");
        assert!(matches!(err, ProvisionError::MissingComposeFile(path) if path.contains("nonexistent")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_binary_reports_command_failure() {
        let project = ComposeProject::new("p").with_binary("false");
        let err = project.provision().await.expect_err("false exits non-zero");
        assert!(matches!(err, ProvisionError::CommandFailed { .. }));

        let err = project.teardown(&[]).await.expect_err("false exits non-zero");
        assert!(matches!(err, TeardownError::CommandFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_binary_returns_handles() {
        let project = ComposeProject::new("p").service("consul").with_binary("true");
        let handles = project.provision().await.expect("true exits zero");
        assert_eq!(handles, vec![ResourceHandle::new("p/consul")]);
        project.teardown(&handles).await.expect("true exits zero");
    }

    #[tokio::test]
    async fn test_diagnostics_never_fail() {
        let project = ComposeProject::new("p").with_binary("docker-does-not-exist-42");
        let logs = project.diagnostics("consul", 10).await;
        assert!(logs.contains("unavailable"));
    }
}
