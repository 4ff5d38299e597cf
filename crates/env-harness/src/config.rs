//! Harness configuration.
//!
//! Configuration is loaded from environment variables with defaults suited to
//! a developer machine running the compose stack locally.

use crate::gate::{PolicyError, RetryPolicy};
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Version selector used when neither argument nor environment provides one.
pub const DEFAULT_VERSION: &str = "latest";

/// Default host the stack's ports are published on.
pub const DEFAULT_STACK_HOST: &str = "localhost";

/// Default directory holding the compose files.
pub const DEFAULT_COMPOSE_DIR: &str = "compose";

/// Default readiness attempt budget (60 x 2s = 2 minutes worst case).
pub const DEFAULT_READINESS_MAX_ATTEMPTS: u32 = 60;

/// Default readiness interval in seconds.
pub const DEFAULT_READINESS_INTERVAL_SECONDS: u64 = 2;

/// Default single-probe timeout in seconds.
pub const DEFAULT_PROBE_TIMEOUT_SECONDS: u64 = 5;

/// Default number of log lines dumped when a gate times out.
pub const DEFAULT_DIAGNOSTIC_LOG_LINES: usize = 50;

/// Prefix of generated compose project names.
pub const PROJECT_PREFIX: &str = "stack-check";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid readiness policy: {0}")]
    InvalidPolicy(#[from] PolicyError),
}

/// Harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Host the stack's ports are published on (default: "localhost").
    pub stack_host: String,

    /// Directory holding the compose files (default: "compose").
    pub compose_dir: PathBuf,

    /// Compose project name; exclusive to one session.
    pub project_name: String,

    /// Retry policy applied to every readiness gate.
    pub readiness: RetryPolicy,

    /// Timeout for a single probe or HTTP check.
    pub probe_timeout: Duration,

    /// Log lines collected when a gate times out.
    pub diagnostic_lines: usize,

    /// Use `-plaintext` for gRPC calls.
    pub grpc_plaintext: bool,

    /// Leave the environment running after the session.
    pub keep_environment: bool,
}

impl HarnessConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let stack_host = vars
            .get("STACK_HOST")
            .cloned()
            .unwrap_or_else(|| DEFAULT_STACK_HOST.to_string());

        let compose_dir = vars
            .get("COMPOSE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_COMPOSE_DIR));

        let project_name = vars.get("COMPOSE_PROJECT").cloned().unwrap_or_else(|| {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("{PROJECT_PREFIX}-{}", id.get(..8).unwrap_or(&id))
        });

        let max_attempts: u32 = parse_or(vars, "READINESS_MAX_ATTEMPTS", DEFAULT_READINESS_MAX_ATTEMPTS)?;
        let interval_secs: u64 = parse_or(
            vars,
            "READINESS_INTERVAL_SECONDS",
            DEFAULT_READINESS_INTERVAL_SECONDS,
        )?;
        let readiness = RetryPolicy::new(max_attempts, Duration::from_secs(interval_secs))?;

        let probe_timeout_secs: u64 =
            parse_or(vars, "PROBE_TIMEOUT_SECONDS", DEFAULT_PROBE_TIMEOUT_SECONDS)?;
        if probe_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "PROBE_TIMEOUT_SECONDS".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let diagnostic_lines = parse_or(vars, "DIAGNOSTIC_LOG_LINES", DEFAULT_DIAGNOSTIC_LOG_LINES)?;
        let grpc_plaintext = parse_flag(vars, "GRPC_PLAINTEXT", true)?;
        let keep_environment = parse_flag(vars, "KEEP_ENVIRONMENT", false)?;

        Ok(Self {
            stack_host,
            compose_dir,
            project_name,
            readiness,
            probe_timeout: Duration::from_secs(probe_timeout_secs),
            diagnostic_lines,
            grpc_plaintext,
            keep_environment,
        })
    }
}

/// Pick a version selector: positional argument, then `env_key`, then `latest`.
///
/// Blank values are ignored at each level.
pub fn select_version(
    positional: Option<&str>,
    vars: &HashMap<String, String>,
    env_key: &str,
) -> String {
    positional
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| {
            vars.get(env_key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        })
        .unwrap_or(DEFAULT_VERSION)
        .to_string()
}

fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.clone(),
            reason: e.to_string(),
        }),
    }
}

fn parse_flag(vars: &HashMap<String, String>, name: &str, default: bool) -> Result<bool, ConfigError> {
    match vars.get(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: v,
            reason: "expected true/false".to_string(),
        }),
    }
}
