//! Metrics retrieval from buffer endpoints

use crate::error::{Result, WatchdogError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Capability to fetch the raw metrics payload of a buffer
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Fetch the metrics exposed by `buffer` (`host:port`)
    async fn fetch(&self, buffer: &str) -> Result<Vec<u8>>;
}

/// Fetches `http://<buffer>/metrics` over HTTP
#[derive(Debug, Clone)]
pub struct HttpMetricsSource {
    client: Client,
}

impl HttpMetricsSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            WatchdogError::Configuration(format!("failed to create HTTP client: {}", e))
        })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch(&self, buffer: &str) -> Result<Vec<u8>> {
        let url = format!("http://{}/metrics", buffer);
        let fetch_error = |message: String| WatchdogError::MetricsFetch {
            buffer: buffer.to_string(),
            message,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("unexpected status {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        debug!(buffer = %buffer, bytes = body.len(), "Fetched buffer metrics");
        Ok(body.to_vec())
    }
}
