//! Single-shot endpoint probes.
//!
//! A probe answers one question once: is this endpoint healthy right now?
//! Retrying is the caller's job (see [`crate::gate`]).

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

/// URL scheme prefix for TCP connect probes.
const TCP_SCHEME: &str = "tcp://";

/// Errors from fetching an endpoint body.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("{url} returned status {status}")]
    UnexpectedStatus { url: String, status: u16 },
}

/// An endpoint to probe and how long a single attempt may take.
///
/// `http://` and `https://` targets are probed with a GET request.
/// `tcp://host:port` targets are probed with a plain TCP connect, for services
/// such as MySQL and Kafka that expose no HTTP health endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    url: String,
    timeout: Duration,
}

impl ProbeTarget {
    /// Create a probe target.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    /// The probed URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Upper bound for a single probe attempt.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The `host:port` of a `tcp://` target, `None` for HTTP targets.
    pub fn tcp_address(&self) -> Option<&str> {
        self.url.strip_prefix(TCP_SCHEME)
    }
}

/// A single health check against a target.
///
/// Implementations must not retry: one call is one attempt.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Returns true only if the target answered healthily within its timeout.
    async fn probe(&self, target: &ProbeTarget) -> bool;
}

/// Probe backed by a shared HTTP client.
#[derive(Debug, Clone, Default)]
pub struct HttpProbe {
    http_client: Client,
}

impl HttpProbe {
    /// Create a probe with a fresh HTTP client.
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Create a probe reusing an existing HTTP client.
    pub fn with_client(http_client: Client) -> Self {
        Self { http_client }
    }

    /// Fetch the body of `url`, failing on non-2xx statuses.
    ///
    /// Used by integration checks that look for substrings in a response
    /// (Consul catalog, metrics exposition).
    pub async fn fetch_text(&self, url: &str, timeout: Duration) -> Result<String, ProbeError> {
        let response = self.http_client.get(url).timeout(timeout).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::UnexpectedStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }

    /// Get the HTTP client for custom requests.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, target: &ProbeTarget) -> bool {
        if let Some(address) = target.tcp_address() {
            return check_tcp(address, target.timeout()).await;
        }

        match self
            .http_client
            .get(target.url())
            .timeout(target.timeout())
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                debug!(
                    target: "harness.probe",
                    url = %target.url(),
                    status = status.as_u16(),
                    "Probe answered"
                );
                status.is_success()
            }
            Err(e) => {
                debug!(
                    target: "harness.probe",
                    url = %target.url(),
                    error = %e,
                    "Probe request failed"
                );
                false
            }
        }
    }
}

/// Check whether a TCP connection to `address` can be established in time.
async fn check_tcp(address: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(target: "harness.probe", address, error = %e, "TCP connect failed");
            false
        }
        Err(_) => {
            debug!(target: "harness.probe", address, "TCP connect timed out");
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(url: String) -> ProbeTarget {
        ProbeTarget::new(url, Duration::from_secs(2))
    }

    #[test]
    fn test_tcp_address_only_for_tcp_scheme() {
        let tcp = ProbeTarget::new("tcp://localhost:3306", Duration::from_secs(1));
        assert_eq!(tcp.tcp_address(), Some("localhost:3306"));

        let http = ProbeTarget::new("http://localhost:8500/v1/status/leader", Duration::from_secs(1));
        assert_eq!(http.tcp_address(), None);
    }

    #[tokio::test]
    async fn test_probe_succeeds_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/q/health/ready"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let probe = HttpProbe::new();
        assert!(probe.probe(&target(format!("{}/q/health/ready", server.uri()))).await);
    }

    #[tokio::test]
    async fn test_probe_fails_on_non_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/q/health/ready"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let probe = HttpProbe::new();
        assert!(!probe.probe(&target(format!("{}/q/health/ready", server.uri()))).await);
    }

    #[tokio::test]
    async fn test_probe_fails_when_response_exceeds_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let probe = HttpProbe::new();
        let slow = ProbeTarget::new(format!("{}/health", server.uri()), Duration::from_millis(200));
        assert!(!probe.probe(&slow).await);
    }

    #[tokio::test]
    async fn test_probe_fails_on_connection_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = HttpProbe::new();
        assert!(!probe.probe(&target(format!("http://127.0.0.1:{port}/health"))).await);
    }

    #[tokio::test]
    async fn test_tcp_probe_against_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = HttpProbe::new();
        assert!(probe.probe(&target(format!("tcp://127.0.0.1:{port}"))).await);

        drop(listener);
        assert!(!probe.probe(&target(format!("tcp://127.0.0.1:{port}"))).await);
    }

    #[tokio::test]
    async fn test_fetch_text_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/catalog/services"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"consul":[]}"#))
            .mount(&server)
            .await;

        let probe = HttpProbe::new();
        let body = probe
            .fetch_text(
                &format!("{}/v1/catalog/services", server.uri()),
                Duration::from_secs(2),
            )
            .await
            .expect("fetch should succeed");
        assert!(body.contains("consul"));
    }

    #[tokio::test]
    async fn test_fetch_text_rejects_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let probe = HttpProbe::new();
        let err = probe
            .fetch_text(&format!("{}/anything", server.uri()), Duration::from_secs(2))
            .await
            .expect_err("500 should be rejected");
        assert!(matches!(err, ProbeError::UnexpectedStatus { status: 500, .. }));
    }
}
