//! Orchestrator: sequences Extract -> Transform -> Load across datasets
//!
//! Datasets are processed strictly sequentially; the source API has
//! undocumented rate limits and warehouse writes must not interleave.
//! One dataset's failure is recorded in the run summary and the run moves
//! on to the next dataset. The caller decides the process exit code from
//! the summary.

use chrono::Utc;
use tracing::{error, info};

use crate::config::DatasetSpec;
use crate::error::EtlError;
use crate::extract::Extractor;
use crate::load::{LoadMode, ObservationStore};
use crate::transform::transform_dataset;

/// Outcome of one dataset within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetStatus {
    Success,
    Failed,
}

/// Per-dataset counters and status for the run summary.
#[derive(Debug, Clone)]
pub struct DatasetReport {
    pub dataset: String,
    pub status: DatasetStatus,
    /// Sparse cells present in the raw response.
    pub extracted: usize,
    /// Deduplicated rows handed to the loader.
    pub transformed: usize,
    /// Rows actually written.
    pub loaded: u64,
    /// Rows skipped by the loader on key collision (append mode).
    pub load_skipped: u64,
    /// Per-row transform skips (unparseable year, undecodable index).
    pub skipped: usize,
    /// Duplicate natural keys dropped by the transformer.
    pub duplicates: usize,
    pub error: Option<String>,
}

impl DatasetReport {
    fn failed(dataset: &str, err: &EtlError) -> Self {
        Self {
            dataset: dataset.to_string(),
            status: DatasetStatus::Failed,
            extracted: 0,
            transformed: 0,
            loaded: 0,
            load_skipped: 0,
            skipped: 0,
            duplicates: 0,
            error: Some(err.to_string()),
        }
    }
}

/// Aggregated outcome of one orchestrated run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub mode: LoadMode,
    pub reports: Vec<DatasetReport>,
}

impl RunSummary {
    pub fn failed_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| r.status == DatasetStatus::Failed)
            .count()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_count() == 0
    }
}

/// Runs the pipeline over the configured dataset list against any
/// observation store.
pub struct Orchestrator<S> {
    extractor: Extractor,
    store: S,
    datasets: Vec<DatasetSpec>,
}

impl<S: ObservationStore> Orchestrator<S> {
    pub fn new(extractor: Extractor, store: S, datasets: Vec<DatasetSpec>) -> Self {
        Self {
            extractor,
            store,
            datasets,
        }
    }

    /// Run the whole pipeline once. Table preparation happens exactly once
    /// up front (so truncate and full-refresh cannot wipe a previous
    /// dataset's rows mid-run); each dataset is then extracted, transformed
    /// and loaded in isolation.
    pub async fn run(&self, mode: LoadMode) -> Result<RunSummary, EtlError> {
        info!(mode = %mode, datasets = self.datasets.len(), "Starting ETL run");

        self.store.prepare(mode).await?;

        let mut reports = Vec::with_capacity(self.datasets.len());
        for dataset in &self.datasets {
            let report = match self.process_dataset(dataset, mode).await {
                Ok(report) => report,
                Err(err) => {
                    error!(dataset = %dataset.code, error = %err, "Dataset failed");
                    DatasetReport::failed(&dataset.code, &err)
                },
            };
            reports.push(report);
        }

        let summary = RunSummary { mode, reports };
        info!(
            mode = %mode,
            datasets = summary.reports.len(),
            failed = summary.failed_count(),
            "ETL run finished"
        );
        Ok(summary)
    }

    async fn process_dataset(
        &self,
        dataset: &DatasetSpec,
        mode: LoadMode,
    ) -> Result<DatasetReport, EtlError> {
        info!(dataset = %dataset.code, "Processing dataset");

        let raw = self.extractor.fetch(dataset).await?;
        let extracted = raw.value.len();

        let output = transform_dataset(&dataset.code, &raw, &dataset.indicators, Utc::now())?;

        let stats = self
            .store
            .load(&dataset.code, mode, &output.observations)
            .await?;

        Ok(DatasetReport {
            dataset: dataset.code.clone(),
            status: DatasetStatus::Success,
            extracted,
            transformed: output.observations.len(),
            loaded: stats.inserted,
            load_skipped: stats.skipped,
            skipped: output.report.skipped(),
            duplicates: output.report.duplicates,
            error: None,
        })
    }
}
