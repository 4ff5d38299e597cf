//! Provisioning seam between the session controller and whatever brings the
//! environment up (Docker Compose in production, mocks in tests).

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Opaque handle to a provisioned resource (a compose service, a volume, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ResourceHandle(String);

impl ResourceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bringing the environment up failed. Always fatal to the session.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Compose file not found: {0}")]
    MissingComposeFile(String),

    #[error("Failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// Tearing the environment down failed. Logged, never propagated.
#[derive(Debug, Error)]
pub enum TeardownError {
    #[error("Failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    TimedOut { command: String, timeout: Duration },
}

/// Brings an environment up and down for one session.
///
/// `teardown` must release everything the provisioner created, including
/// resources from a `provision` call that was interrupted before returning
/// its handles.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Bring the environment up, returning handles to what was created.
    async fn provision(&self) -> Result<Vec<ResourceHandle>, ProvisionError>;

    /// Release every resource. Best-effort.
    async fn teardown(&self, handles: &[ResourceHandle]) -> Result<(), TeardownError>;

    /// Recent log output for `service`, at most `lines` lines.
    async fn diagnostics(&self, service: &str, lines: usize) -> String;
}
