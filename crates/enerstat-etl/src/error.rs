//! ETL error taxonomy
//!
//! Three dataset-fatal error families, one per pipeline stage, plus the
//! umbrella `EtlError` the orchestrator records per dataset. Per-row
//! anomalies (unparseable year, duplicate key, unresolved label) are not
//! errors: the transformer recovers them locally and reports counts.

use reqwest::StatusCode;
use thiserror::Error;

use crate::load::LoadMode;

/// Network/API-level failure while fetching a dataset. Transient cases are
/// retried a bounded number of times before being surfaced.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: StatusCode },

    #[error("malformed response from {url}: {source}")]
    Malformed {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ExtractionError {
    /// Whether retrying the request could plausibly succeed.
    /// Transport failures and server errors are transient; client errors
    /// and undecodable payloads are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ExtractionError::Request { .. } => true,
            ExtractionError::Status { status, .. } => status.is_server_error(),
            ExtractionError::Client(_) | ExtractionError::Malformed { .. } => false,
        }
    }
}

/// Systemic decoding failure: the response structure cannot yield any
/// observations at all. Not retryable, fatal to the dataset.
#[derive(Error, Debug)]
pub enum TransformationError {
    #[error("dataset {dataset}: dimension list and size list disagree ({dims} dimensions, {sizes} sizes)")]
    SizeMismatch {
        dataset: String,
        dims: usize,
        sizes: usize,
    },

    #[error("dataset {dataset}: required dimension {name} missing from response")]
    MissingDimension { dataset: String, name: String },

    #[error("dataset {dataset}: no dimension contains any of the configured indicators")]
    IndicatorDimensionNotFound { dataset: String },
}

/// Database-level failure. Fatal to the dataset whose load it interrupts;
/// the surrounding transaction rolls back so the table keeps its pre-load
/// state.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to connect to warehouse: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("failed to prepare observations table in {mode} mode: {source}")]
    Prepare {
        mode: LoadMode,
        #[source]
        source: sqlx::Error,
    },

    #[error("load failed for dataset {dataset} in {mode} mode: {source}")]
    Write {
        dataset: String,
        mode: LoadMode,
        #[source]
        source: sqlx::Error,
    },
}

/// Any dataset-fatal pipeline error, as recorded in the run summary.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Transformation(#[from] TransformationError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        let err = ExtractionError::Status {
            url: "http://example.invalid/nrg_cb_e".into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        };
        assert!(err.is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        let err = ExtractionError::Status {
            url: "http://example.invalid/nrg_cb_e".into(),
            status: StatusCode::NOT_FOUND,
        };
        assert!(!err.is_transient());
    }
}
