//! Extractor: fetches raw multi-dimensional payloads from the Eurostat API
//!
//! One HTTP GET per dataset, bounded retries with exponential backoff for
//! transient failures (transport errors, 5xx). No side effects beyond the
//! request itself.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{DatasetSpec, HttpConfig};
use crate::error::ExtractionError;
use crate::model::RawDatasetResponse;

pub struct Extractor {
    client: reqwest::Client,
    max_retries: u32,
    retry_backoff: Duration,
}

impl Extractor {
    pub fn new(config: &HttpConfig) -> Result<Self, ExtractionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(ExtractionError::Client)?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        })
    }

    /// Fetch and parse one dataset. Transient failures are retried up to the
    /// configured budget; the final failure is returned, never swallowed.
    pub async fn fetch(&self, dataset: &DatasetSpec) -> Result<RawDatasetResponse, ExtractionError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(&dataset.url).await {
                Ok(raw) => {
                    debug!(
                        dataset = %dataset.code,
                        cells = raw.value.len(),
                        attempt,
                        "Fetched dataset"
                    );
                    return Ok(raw);
                },
                Err(err) if err.is_transient() && attempt <= self.max_retries => {
                    let delay = self.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        dataset = %dataset.code,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient extraction failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<RawDatasetResponse, ExtractionError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| ExtractionError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|source| ExtractionError::Request {
                url: url.to_string(),
                source,
            })?;

        // Serde enforces the required top-level keys (dimension, size, value).
        serde_json::from_str(&body).map_err(|source| ExtractionError::Malformed {
            url: url.to_string(),
            source,
        })
    }
}
