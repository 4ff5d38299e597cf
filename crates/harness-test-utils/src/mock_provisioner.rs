//! Mock provisioner for session tests.
//!
//! Tracks how many resources are live, so tests can assert that every session
//! path leaves nothing behind, and how often teardown ran.
//!
//! # Example
//!
//! ```rust,ignore
//! use harness_test_utils::MockProvisioner;
//!
//! let provisioner = MockProvisioner::builder()
//!     .resources(9)
//!     .diagnostics("kafka: broker not available")
//!     .build();
//!
//! // Run a session...
//!
//! assert_eq!(provisioner.teardown_calls(), 1);
//! assert_eq!(provisioner.live_resources(), 0);
//! ```

use async_trait::async_trait;
use env_harness::provision::{ProvisionError, Provisioner, ResourceHandle, TeardownError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock provisioner.
#[derive(Debug)]
pub struct MockProvisioner {
    resources: usize,
    provision_error: Option<String>,
    teardown_error: Option<String>,
    provision_delay: Option<Duration>,
    diagnostics: String,
    live: Arc<AtomicUsize>,
    teardown_calls: AtomicUsize,
    torn_down: Mutex<Vec<ResourceHandle>>,
    diagnostics_requests: Mutex<Vec<(String, usize)>>,
}

impl MockProvisioner {
    /// Create a new MockProvisioner builder.
    #[must_use]
    pub fn builder() -> MockProvisionerBuilder {
        MockProvisionerBuilder::default()
    }

    /// Resources currently up.
    pub fn live_resources(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Shared counter of live resources, readable after the mock is borrowed.
    pub fn live_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.live)
    }

    /// How many times teardown ran.
    pub fn teardown_calls(&self) -> usize {
        self.teardown_calls.load(Ordering::SeqCst)
    }

    /// Handles passed to the last teardown.
    pub fn torn_down(&self) -> Vec<ResourceHandle> {
        self.torn_down.lock().unwrap().clone()
    }

    /// `(service, lines)` of every diagnostics request.
    pub fn diagnostics_requests(&self) -> Vec<(String, usize)> {
        self.diagnostics_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn provision(&self) -> Result<Vec<ResourceHandle>, ProvisionError> {
        // Resources come up before the (possibly slow) provision call returns,
        // like containers started by an interrupted `compose up`.
        self.live.store(self.resources, Ordering::SeqCst);

        if let Some(delay) = self.provision_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(stderr) = &self.provision_error {
            return Err(ProvisionError::CommandFailed {
                command: "mock up".to_string(),
                status: "exit status: 1".to_string(),
                stderr: stderr.clone(),
            });
        }

        Ok((0..self.resources)
            .map(|i| ResourceHandle::new(format!("mock/{i}")))
            .collect())
    }

    async fn teardown(&self, handles: &[ResourceHandle]) -> Result<(), TeardownError> {
        self.teardown_calls.fetch_add(1, Ordering::SeqCst);
        *self.torn_down.lock().unwrap() = handles.to_vec();

        if let Some(stderr) = &self.teardown_error {
            return Err(TeardownError::CommandFailed {
                command: "mock down".to_string(),
                status: "exit status: 1".to_string(),
                stderr: stderr.clone(),
            });
        }

        self.live.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn diagnostics(&self, service: &str, lines: usize) -> String {
        self.diagnostics_requests
            .lock()
            .unwrap()
            .push((service.to_string(), lines));
        self.diagnostics.clone()
    }
}

/// Builder for MockProvisioner configuration.
#[derive(Debug, Default)]
pub struct MockProvisionerBuilder {
    resources: usize,
    provision_error: Option<String>,
    teardown_error: Option<String>,
    provision_delay: Option<Duration>,
    diagnostics: String,
}

impl MockProvisionerBuilder {
    /// Number of resources `provision` brings up.
    #[must_use]
    pub fn resources(mut self, count: usize) -> Self {
        self.resources = count;
        self
    }

    /// Make `provision` fail (after bringing resources up).
    #[must_use]
    pub fn fail_provision(mut self, stderr: impl Into<String>) -> Self {
        self.provision_error = Some(stderr.into());
        self
    }

    /// Make `teardown` fail, leaving resources live.
    #[must_use]
    pub fn fail_teardown(mut self, stderr: impl Into<String>) -> Self {
        self.teardown_error = Some(stderr.into());
        self
    }

    /// Delay before `provision` returns.
    #[must_use]
    pub fn provision_delay(mut self, delay: Duration) -> Self {
        self.provision_delay = Some(delay);
        self
    }

    /// Text returned by `diagnostics`.
    #[must_use]
    pub fn diagnostics(mut self, text: impl Into<String>) -> Self {
        self.diagnostics = text.into();
        self
    }

    /// Build the MockProvisioner.
    #[must_use]
    pub fn build(self) -> MockProvisioner {
        MockProvisioner {
            resources: self.resources,
            provision_error: self.provision_error,
            teardown_error: self.teardown_error,
            provision_delay: self.provision_delay,
            diagnostics: self.diagnostics,
            live: Arc::new(AtomicUsize::new(0)),
            teardown_calls: AtomicUsize::new(0),
            torn_down: Mutex::new(Vec::new()),
            diagnostics_requests: Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_provision_then_teardown() {
        let provisioner = MockProvisioner::builder().resources(3).build();

        let handles = provisioner.provision().await.unwrap();
        assert_eq!(handles.len(), 3);
        assert_eq!(provisioner.live_resources(), 3);

        provisioner.teardown(&handles).await.unwrap();
        assert_eq!(provisioner.live_resources(), 0);
        assert_eq!(provisioner.teardown_calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_provision_leaves_resources_live() {
        let provisioner = MockProvisioner::builder()
            .resources(2)
            .fail_provision("port already allocated")
            .build();

        assert!(provisioner.provision().await.is_err());
        assert_eq!(provisioner.live_resources(), 2);
    }
}
