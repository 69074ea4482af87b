//! Warehouse row and raw API wire types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One normalized warehouse row: a single (country, indicator, year) data
/// point with its value and unit, stamped with the load time.
///
/// `value` may be `None` for a reported-but-missing observation; the row is
/// still kept so coverage information survives the load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub country_code: String,
    pub country_name: String,
    pub indicator_code: String,
    pub indicator_label: String,
    pub unit: Option<String>,
    pub unit_label: Option<String>,
    /// Jan 1 of the reporting year.
    pub year: NaiveDate,
    pub value: Option<f64>,
    pub source_dataset: String,
    pub loaded_at: DateTime<Utc>,
}

impl Observation {
    /// The natural key under which the warehouse deduplicates rows.
    pub fn key(&self) -> ObservationKey {
        ObservationKey {
            country_code: self.country_code.clone(),
            indicator_code: self.indicator_code.clone(),
            year: self.year,
            source_dataset: self.source_dataset.clone(),
        }
    }
}

/// Natural uniqueness key: (country, indicator, year, source dataset).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObservationKey {
    pub country_code: String,
    pub indicator_code: String,
    pub year: NaiveDate,
    pub source_dataset: String,
}

/// The API's native multi-dimensional encoding (JSON-stat style): an ordered
/// dimension list, per-dimension category tables, and a sparse map from flat
/// observation index to value. Held only while one dataset is transformed.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDatasetResponse {
    /// Dimension ids in storage order; positions pair with `size`.
    pub id: Vec<String>,
    /// Category count per dimension, same order as `id`.
    pub size: Vec<usize>,
    pub dimension: HashMap<String, RawDimension>,
    /// Sparse mapping from stringified flat index to observation value.
    /// Values arrive as numbers or as placeholder strings (":" for missing).
    pub value: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDimension {
    pub category: RawCategory,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCategory {
    /// Category code -> position along the dimension axis.
    #[serde(default)]
    pub index: HashMap<String, usize>,
    /// Category code -> human-readable label.
    #[serde(default)]
    pub label: HashMap<String, String>,
}

impl RawCategory {
    /// Invert `index` into a position-addressed code table. Positions the
    /// response never mentions stay `None` and are treated as undecodable
    /// by the transformer.
    pub fn codes_by_position(&self, len: usize) -> Vec<Option<&str>> {
        let mut codes = vec![None; len];
        for (code, &pos) in &self.index {
            if pos < len {
                codes[pos] = Some(code.as_str());
            }
        }
        codes
    }
}
