//! Enerstat ETL Library
//!
//! Extract-Transform-Load pipeline for Eurostat energy statistics: fetches
//! multi-dimensional datasets from the dissemination API, normalizes them
//! into flat observation rows, and loads them idempotently into a Postgres
//! warehouse table under one of three write modes.
//!
//! # Example
//!
//! ```no_run
//! use enerstat_etl::config::Settings;
//! use enerstat_etl::extract::Extractor;
//! use enerstat_etl::load::{Loader, LoadMode};
//! use enerstat_etl::pipeline::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::from_env()?;
//!     let extractor = Extractor::new(&settings.http)?;
//!     let loader = Loader::connect(&settings.database).await?;
//!
//!     let orchestrator = Orchestrator::new(extractor, loader, settings.datasets.clone());
//!     let summary = orchestrator.run(LoadMode::FullRefresh).await?;
//!     assert!(summary.all_succeeded());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod model;
pub mod pipeline;
pub mod transform;

// Re-export the types most callers need
pub use error::{EtlError, ExtractionError, LoadError, TransformationError};
pub use load::LoadMode;
pub use model::Observation;
