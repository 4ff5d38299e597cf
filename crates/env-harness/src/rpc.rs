//! gRPC calls through `grpcurl`.
//!
//! Responses are treated as text: a call succeeds when the response contains
//! the expected substrings. Nothing is decoded structurally.

use crate::sanitize::sanitize_detail;
use regex::Regex;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Default per-call deadline passed to `grpcurl -max-time`.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra time allowed on top of `-max-time` before the process is killed.
const PROCESS_GRACE: Duration = Duration::from_secs(5);

/// gRPC call errors.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Failed to launch grpcurl: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{method} failed ({status}): {stderr}")]
    CallFailed {
        method: String,
        status: String,
        stderr: String,
    },

    #[error("{method} timed out after {timeout:?}")]
    TimedOut { method: String, timeout: Duration },

    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Client invoking a gRPC server through the `grpcurl` binary.
#[derive(Debug, Clone)]
pub struct GrpcurlClient {
    address: String,
    plaintext: bool,
    timeout: Duration,
    binary: String,
}

impl GrpcurlClient {
    /// Create a plaintext client for `address` (`host:port`).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            plaintext: true,
            timeout: DEFAULT_CALL_TIMEOUT,
            binary: "grpcurl".to_string(),
        }
    }

    #[must_use]
    pub fn with_plaintext(mut self, plaintext: bool) -> Self {
        self.plaintext = plaintext;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a different executable (tests, non-standard installs).
    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the `grpcurl` binary can be executed at all.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// List services through server reflection.
    pub async fn list_services(&self) -> Result<String, RpcError> {
        let mut args = self.base_args();
        args.push(self.address.clone());
        args.push("list".to_string());
        self.run("list", args).await
    }

    /// Invoke `method` (`package.Service/Method`) with a JSON request body.
    pub async fn call(&self, method: &str, body: &Value) -> Result<String, RpcError> {
        let args = self.call_args(method, body)?;
        self.run(method, args).await
    }

    /// Arguments for a unary call, in `grpcurl` order.
    pub fn call_args(&self, method: &str, body: &Value) -> Result<Vec<String>, RpcError> {
        let mut args = self.base_args();
        args.push("-d".to_string());
        args.push(serde_json::to_string(body)?);
        args.push(self.address.clone());
        args.push(method.to_string());
        Ok(args)
    }

    fn base_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.plaintext {
            args.push("-plaintext".to_string());
        }
        args.push("-max-time".to_string());
        args.push(self.timeout.as_secs().max(1).to_string());
        args
    }

    async fn run(&self, method: &str, args: Vec<String>) -> Result<String, RpcError> {
        debug!(target: "harness.rpc", method, address = %self.address, "Invoking grpcurl");

        let deadline = self.timeout + PROCESS_GRACE;
        let output = tokio::time::timeout(
            deadline,
            Command::new(&self.binary)
                .args(&args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| RpcError::TimedOut {
            method: method.to_string(),
            timeout: deadline,
        })??;

        if !output.status.success() {
            return Err(RpcError::CallFailed {
                method: method.to_string(),
                status: output.status.to_string(),
                stderr: sanitize_detail(&String::from_utf8_lossy(&output.stderr)),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Return the needles missing from `response`; empty means all were found.
pub fn missing_needles(response: &str, needles: &[&str]) -> Vec<String> {
    needles
        .iter()
        .filter(|needle| !response.contains(*needle))
        .map(|needle| (*needle).to_string())
        .collect()
}

/// Pull the string value of `"field": "value"` out of a textual response.
pub fn extract_string_field(response: &str, field: &str) -> Option<String> {
    let pattern = format!(r#""{}"\s*:\s*"([^"]*)""#, regex::escape(field));
    let re = Regex::new(&pattern).ok()?;
    re.captures(response)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_args_order() {
        let client = GrpcurlClient::new("localhost:38101").with_timeout(Duration::from_secs(7));
        let args = client
            .call_args("pkg.Service/List", &json!({"pageSize": 10}))
            .unwrap();

        assert_eq!(
            args,
            vec![
                "-plaintext",
                "-max-time",
                "7",
                "-d",
                r#"{"pageSize":10}"#,
                "localhost:38101",
                "pkg.Service/List",
            ]
        );
    }

    #[test]
    fn test_tls_client_omits_plaintext_flag() {
        let client = GrpcurlClient::new("localhost:443").with_plaintext(false);
        let args = client.call_args("pkg.Service/List", &json!({})).unwrap();
        assert!(!args.iter().any(|a| a == "-plaintext"));
    }

    #[test]
    fn test_missing_needles() {
        let response = r#"{ "success": true, "serviceId": "svc-1" }"#;
        assert!(missing_needles(response, &["success", "serviceId"]).is_empty());
        assert_eq!(missing_needles(response, &["success", "apiKey"]), vec!["apiKey"]);
    }

    #[test]
    fn test_extract_string_field() {
        let response = "{\n  \"connectorId\": \"c-42\",\n  \"apiKey\": \"k\"\n}";
        assert_eq!(
            extract_string_field(response, "connectorId"),
            Some("c-42".to_string())
        );
        assert_eq!(extract_string_field(response, "missing"), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let client = GrpcurlClient::new("localhost:1").with_binary("grpcurl-does-not-exist-42");
        assert!(!client.is_available().await);

        let err = client.list_services().await.expect_err("spawn should fail");
        assert!(matches!(err, RpcError::Spawn(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_returns_stdout() {
        // `echo` prints its arguments, standing in for a server echoing the method.
        let client = GrpcurlClient::new("localhost:38101").with_binary("echo");
        let response = client
            .call("pkg.Service/Get", &json!({"id": "x"}))
            .await
            .expect("echo should succeed");
        assert!(missing_needles(&response, &["pkg.Service/Get", "localhost:38101"]).is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_call_failure() {
        let client = GrpcurlClient::new("localhost:38101").with_binary("false");
        let err = client
            .call("pkg.Service/Get", &json!({}))
            .await
            .expect_err("false exits non-zero");
        assert!(matches!(err, RpcError::CallFailed { ref method, .. } if method == "pkg.Service/Get"));
    }
}
