//! Scripted probe for gate and session tests.
//!
//! Each URL can be told to fail a number of times before succeeding, or to
//! fail forever. Every call is recorded with the (possibly paused) tokio clock
//! so tests can assert on spacing and ordering.
//!
//! # Example
//!
//! ```rust,ignore
//! use harness_test_utils::MockProbe;
//!
//! let probe = MockProbe::builder()
//!     .fail_times("http://localhost:8500/v1/status/leader", 3)
//!     .always_fail("tcp://localhost:3306")
//!     .build();
//! ```

use async_trait::async_trait;
use env_harness::probe::{Probe, ProbeTarget};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::Instant;

/// How a URL answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    /// Fail this many more times, then succeed.
    FailTimes(u32),
    AlwaysFail,
}

/// One recorded probe call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCall {
    pub url: String,
    pub at: Instant,
    pub ready: bool,
}

/// Mock probe. Unscripted URLs are ready on the first call.
#[derive(Debug, Default)]
pub struct MockProbe {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<ProbeCall>>,
}

impl MockProbe {
    /// Create a new MockProbe builder.
    #[must_use]
    pub fn builder() -> MockProbeBuilder {
        MockProbeBuilder::default()
    }

    /// A probe for which every endpoint is immediately ready.
    #[must_use]
    pub fn always_ready() -> Self {
        Self::default()
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<ProbeCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls made against `url`.
    pub fn call_count(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.url == url)
            .count()
    }

    /// URLs in the order they were first probed.
    pub fn probe_order(&self) -> Vec<String> {
        let mut order: Vec<String> = Vec::new();
        for call in self.calls.lock().unwrap().iter() {
            if !order.contains(&call.url) {
                order.push(call.url.clone());
            }
        }
        order
    }
}

#[async_trait]
impl Probe for MockProbe {
    async fn probe(&self, target: &ProbeTarget) -> bool {
        let ready = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(target.url()) {
                None => true,
                Some(Script::AlwaysFail) => false,
                Some(Script::FailTimes(0)) => true,
                Some(Script::FailTimes(remaining)) => {
                    *remaining -= 1;
                    false
                }
            }
        };

        self.calls.lock().unwrap().push(ProbeCall {
            url: target.url().to_string(),
            at: Instant::now(),
            ready,
        });
        ready
    }
}

/// Builder for MockProbe configuration.
#[derive(Debug, Default)]
pub struct MockProbeBuilder {
    scripts: HashMap<String, Script>,
}

impl MockProbeBuilder {
    /// Fail the first `failures` probes of `url`, then report ready.
    #[must_use]
    pub fn fail_times(mut self, url: impl Into<String>, failures: u32) -> Self {
        self.scripts.insert(url.into(), Script::FailTimes(failures));
        self
    }

    /// Never report `url` as ready.
    #[must_use]
    pub fn always_fail(mut self, url: impl Into<String>) -> Self {
        self.scripts.insert(url.into(), Script::AlwaysFail);
        self
    }

    /// Build the MockProbe.
    #[must_use]
    pub fn build(self) -> MockProbe {
        MockProbe {
            scripts: Mutex::new(self.scripts),
            calls: Mutex::new(Vec::new()),
        }
    }
}
