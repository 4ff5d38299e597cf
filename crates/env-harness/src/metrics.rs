//! Scraping a service's Prometheus exposition endpoint.

use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

/// Metrics scraping errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Scrape failed: {0}")]
    ScrapeFailed(String),
}

/// Client for scraping `/metrics`-style endpoints directly.
pub struct MetricsScraper {
    http_client: Client,
    timeout: Duration,
}

impl MetricsScraper {
    /// Create a new scraper with a per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            http_client: Client::new(),
            timeout,
        }
    }

    /// Get the raw exposition text from `metrics_url`.
    pub async fn fetch_metrics(&self, metrics_url: &str) -> Result<String, MetricsError> {
        let response = self
            .http_client
            .get(metrics_url)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MetricsError::ScrapeFailed(format!(
                "Metrics endpoint returned status: {}",
                response.status()
            )));
        }

        Ok(response.text().await?)
    }

    /// Scrape `metrics_url` and return the expected substrings it lacks.
    pub async fn missing_series(
        &self,
        metrics_url: &str,
        expected: &[&str],
    ) -> Result<Vec<String>, MetricsError> {
        let text = self.fetch_metrics(metrics_url).await?;
        Ok(missing_substrings(&text, expected))
    }
}

/// Expected substrings absent from an exposition body.
///
/// Comment lines (`# HELP`, `# TYPE`) count, so `"# TYPE"` can be used to
/// assert the body is in exposition format at all.
pub fn missing_substrings(text: &str, expected: &[&str]) -> Vec<String> {
    expected
        .iter()
        .filter(|series| !text.contains(**series))
        .map(|series| (*series).to_string())
        .collect()
}
