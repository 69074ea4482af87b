//! Transformer: turns a raw multi-dimensional payload into warehouse rows
//!
//! The source encodes observations as a sparse map from a flat index to a
//! value; the flat index addresses a tuple of per-dimension category
//! positions in row-major order. Decoding walks the sparse map in ascending
//! flat-index order, resolves each coordinate back to its category code,
//! filters to the configured indicators, normalizes the time dimension to a
//! Jan 1 date, and deduplicates on the natural key (first occurrence wins).
//!
//! Per-row anomalies are counted and skipped, never fatal. Only structural
//! problems (missing dimensions, size mismatch) abort the dataset.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use crate::error::TransformationError;
use crate::model::{Observation, ObservationKey, RawDatasetResponse};

/// Well-known Eurostat dimension ids.
pub const GEO_DIMENSION: &str = "geo";
pub const TIME_DIMENSION: &str = "time";
pub const UNIT_DIMENSION: &str = "unit";

/// Per-dataset transformation counters, reported in the run summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformReport {
    /// Sparse cells visited in the raw response.
    pub decoded: usize,
    /// Cells whose indicator is not in the dataset's configured list.
    pub filtered: usize,
    /// Cells whose time category is not a 4-digit year.
    pub skipped_time: usize,
    /// Cells whose flat index or coordinates could not be resolved.
    pub skipped_index: usize,
    /// Cells dropped because their natural key was already emitted.
    pub duplicates: usize,
}

impl TransformReport {
    /// Total per-row skips (excluding indicator filtering).
    pub fn skipped(&self) -> usize {
        self.skipped_time + self.skipped_index
    }
}

/// Transformer output: deduplicated rows in first-occurrence order, plus
/// the counters describing what was dropped along the way.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub observations: Vec<Observation>,
    pub report: TransformReport,
}

/// Convert a flat row-major index into per-dimension coordinates.
///
/// Returns `None` when the index falls outside the space described by
/// `sizes`.
pub fn unravel_index(flat: usize, sizes: &[usize]) -> Option<Vec<usize>> {
    let mut coords = vec![0; sizes.len()];
    let mut rest = flat;
    for (slot, &size) in coords.iter_mut().zip(sizes).rev() {
        if size == 0 {
            return None;
        }
        *slot = rest % size;
        rest /= size;
    }
    // A non-zero remainder means the index exceeds the dimension space.
    (rest == 0).then_some(coords)
}

/// Parse a time category code as a 4-digit reporting year, normalized to
/// Jan 1. Quarterly or monthly codes ("2020-Q1") do not qualify.
pub fn parse_year(code: &str) -> Option<NaiveDate> {
    if code.len() != 4 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = code.parse().ok()?;
    NaiveDate::from_ymd_opt(year, 1, 1)
}

/// Transform one raw dataset response into deduplicated observations.
///
/// `target_indicators` selects which indicator codes survive; the dimension
/// carrying the indicator role is detected by probing which dimension's
/// category contains any of them. Every surviving row is stamped with
/// `loaded_at`.
pub fn transform_dataset(
    dataset_code: &str,
    raw: &RawDatasetResponse,
    target_indicators: &[String],
    loaded_at: DateTime<Utc>,
) -> Result<TransformOutput, TransformationError> {
    if raw.id.len() != raw.size.len() {
        return Err(TransformationError::SizeMismatch {
            dataset: dataset_code.to_string(),
            dims: raw.id.len(),
            sizes: raw.size.len(),
        });
    }

    let dim_pos = |name: &str| raw.id.iter().position(|id| id == name);

    let geo_pos = dim_pos(GEO_DIMENSION).ok_or_else(|| missing(dataset_code, GEO_DIMENSION))?;
    let time_pos = dim_pos(TIME_DIMENSION).ok_or_else(|| missing(dataset_code, TIME_DIMENSION))?;
    let unit_pos = dim_pos(UNIT_DIMENSION);

    let indicator_pos = detect_indicator_dimension(raw, target_indicators).ok_or(
        TransformationError::IndicatorDimensionNotFound {
            dataset: dataset_code.to_string(),
        },
    )?;

    // Position-addressed code tables, one per dimension in storage order.
    let mut code_tables = Vec::with_capacity(raw.id.len());
    for (dim_id, &size) in raw.id.iter().zip(&raw.size) {
        let dimension = raw
            .dimension
            .get(dim_id)
            .ok_or_else(|| missing(dataset_code, dim_id))?;
        code_tables.push(dimension.category.codes_by_position(size));
    }

    let geo_labels = label_table(raw, GEO_DIMENSION);
    let unit_labels = label_table(raw, UNIT_DIMENSION);
    let indicator_labels = label_table(raw, &raw.id[indicator_pos]);

    let mut report = TransformReport::default();

    // Ascending flat-index order keeps output deterministic.
    let mut cells: Vec<(usize, &serde_json::Value)> = Vec::with_capacity(raw.value.len());
    for (key, value) in &raw.value {
        match key.parse::<usize>() {
            Ok(flat) => cells.push((flat, value)),
            Err(_) => {
                debug!(dataset = %dataset_code, key = %key, "Non-numeric flat index, skipping cell");
                report.skipped_index += 1;
            },
        }
    }
    cells.sort_unstable_by_key(|(flat, _)| *flat);

    let mut seen: HashSet<ObservationKey> = HashSet::new();
    let mut observations = Vec::new();

    for (flat, value) in cells {
        report.decoded += 1;

        let Some(codes) = resolve_codes(flat, &raw.size, &code_tables) else {
            report.skipped_index += 1;
            continue;
        };

        let indicator_code = codes[indicator_pos];
        if !target_indicators.iter().any(|t| t == indicator_code) {
            report.filtered += 1;
            continue;
        }

        let time_code = codes[time_pos];
        let Some(year) = parse_year(time_code) else {
            debug!(
                dataset = %dataset_code,
                time = %time_code,
                "Time category is not a 4-digit year, skipping cell"
            );
            report.skipped_time += 1;
            continue;
        };

        let country_code = codes[geo_pos];
        let unit_code = unit_pos.map(|pos| codes[pos]);

        let observation = Observation {
            country_code: country_code.to_string(),
            country_name: resolve_label(geo_labels, country_code),
            indicator_code: indicator_code.to_string(),
            indicator_label: resolve_label(indicator_labels, indicator_code),
            unit: unit_code.map(str::to_string),
            unit_label: unit_code.map(|code| resolve_label(unit_labels, code)),
            year,
            value: parse_value(value),
            source_dataset: dataset_code.to_string(),
            loaded_at,
        };

        // First occurrence wins; later cells with the same natural key are
        // dropped and counted.
        if seen.insert(observation.key()) {
            observations.push(observation);
        } else {
            report.duplicates += 1;
        }
    }

    info!(
        dataset = %dataset_code,
        decoded = report.decoded,
        kept = observations.len(),
        filtered = report.filtered,
        skipped = report.skipped(),
        duplicates = report.duplicates,
        "Transformed dataset"
    );

    Ok(TransformOutput {
        observations,
        report,
    })
}

/// Find the dimension that plays the indicator role: the first one (in
/// storage order) whose category mentions any of the target indicators.
fn detect_indicator_dimension(
    raw: &RawDatasetResponse,
    target_indicators: &[String],
) -> Option<usize> {
    raw.id.iter().position(|dim_id| {
        raw.dimension.get(dim_id).is_some_and(|dim| {
            target_indicators
                .iter()
                .any(|t| dim.category.index.contains_key(t) || dim.category.label.contains_key(t))
        })
    })
}

fn resolve_codes<'a>(
    flat: usize,
    sizes: &[usize],
    code_tables: &'a [Vec<Option<&'a str>>],
) -> Option<Vec<&'a str>> {
    let coords = unravel_index(flat, sizes)?;
    coords
        .iter()
        .zip(code_tables)
        .map(|(&coord, table)| table.get(coord).copied().flatten())
        .collect()
}

fn label_table<'a>(
    raw: &'a RawDatasetResponse,
    dim_id: &str,
) -> Option<&'a HashMap<String, String>> {
    raw.dimension.get(dim_id).map(|dim| &dim.category.label)
}

/// Label lookup with fallback to the raw code; an unresolved label never
/// fails the transform.
fn resolve_label(labels: Option<&HashMap<String, String>>, code: &str) -> String {
    labels
        .and_then(|table| table.get(code))
        .cloned()
        .unwrap_or_else(|| code.to_string())
}

/// Observation values arrive as JSON numbers or as placeholder strings
/// (":" marks a missing value). Anything non-numeric becomes a NULL value;
/// the row itself is retained to preserve coverage.
fn parse_value(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn missing(dataset: &str, name: &str) -> TransformationError {
    TransformationError::MissingDimension {
        dataset: dataset.to_string(),
        name: name.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use serde_json::json;

    fn targets(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    fn parse(raw: serde_json::Value) -> RawDatasetResponse {
        serde_json::from_value(raw).unwrap()
    }

    /// Two countries, two years, two indicators, one unit.
    /// Storage order geo, time, indic_codes, unit with sizes [2, 2, 2, 1],
    /// so flat = 4*geo + 2*time + indic.
    fn mock_response() -> RawDatasetResponse {
        parse(json!({
            "id": ["geo", "time", "indic_codes", "unit"],
            "size": [2, 2, 2, 1],
            "dimension": {
                "geo": {"category": {
                    "index": {"DE": 0, "FR": 1},
                    "label": {"DE": "Germany", "FR": "France"}
                }},
                "time": {"category": {
                    "index": {"2020": 0, "2021": 1},
                    "label": {"2020": "2020", "2021": "2021"}
                }},
                "indic_codes": {"category": {
                    "index": {"GEP": 0, "X": 1},
                    "label": {"GEP": "Gross electricity production", "X": "Other"}
                }},
                "unit": {"category": {
                    "index": {"GWH": 0},
                    "label": {"GWH": "Gigawatt-hour"}
                }}
            },
            "value": {
                "0": 100.5,   // DE, 2020, GEP
                "1": "200.0", // DE, 2020, X (filtered)
                "2": 150.2,   // DE, 2021, GEP
                "4": 300.1    // FR, 2020, GEP
            }
        }))
    }

    #[test]
    fn unravel_index_decodes_row_major_coordinates() {
        assert_eq!(unravel_index(0, &[2, 2, 2, 1]), Some(vec![0, 0, 0, 0]));
        assert_eq!(unravel_index(2, &[2, 2, 2, 1]), Some(vec![0, 1, 0, 0]));
        assert_eq!(unravel_index(7, &[2, 2, 2, 1]), Some(vec![1, 1, 1, 0]));
    }

    #[test]
    fn unravel_index_rejects_out_of_range_indices() {
        assert_eq!(unravel_index(8, &[2, 2, 2, 1]), None);
        assert_eq!(unravel_index(1, &[]), None);
    }

    #[test]
    fn parse_year_accepts_only_four_digit_years() {
        assert_eq!(parse_year("2020"), NaiveDate::from_ymd_opt(2020, 1, 1));
        assert_eq!(parse_year("2020-Q1"), None);
        assert_eq!(parse_year("20"), None);
        assert_eq!(parse_year("year"), None);
    }

    #[test]
    fn transform_keeps_target_indicators_in_flat_index_order() {
        let raw = mock_response();
        let out = transform_dataset("nrg_cb_e", &raw, &targets(&["GEP"]), Utc::now()).unwrap();

        assert_eq!(out.observations.len(), 3);
        assert_eq!(out.report.filtered, 1);
        assert_eq!(out.report.decoded, 4);
        assert_eq!(out.report.skipped(), 0);

        let first = &out.observations[0];
        assert_eq!(first.country_code, "DE");
        assert_eq!(first.country_name, "Germany");
        assert_eq!(first.indicator_code, "GEP");
        assert_eq!(first.indicator_label, "Gross electricity production");
        assert_eq!(first.unit.as_deref(), Some("GWH"));
        assert_eq!(first.unit_label.as_deref(), Some("Gigawatt-hour"));
        assert_eq!(first.year, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(first.value, Some(100.5));
        assert_eq!(first.source_dataset, "nrg_cb_e");

        let keys: Vec<(&str, i32)> = out
            .observations
            .iter()
            .map(|o| (o.country_code.as_str(), o.year.year()))
            .collect();
        assert_eq!(keys, vec![("DE", 2020), ("DE", 2021), ("FR", 2020)]);
    }

    #[test]
    fn transform_output_has_no_duplicate_natural_keys() {
        let raw = mock_response();
        let out = transform_dataset("nrg_cb_e", &raw, &targets(&["GEP", "X"]), Utc::now()).unwrap();

        let mut keys: Vec<_> = out.observations.iter().map(Observation::key).collect();
        let before = keys.len();
        keys.sort_by(|a, b| {
            (&a.country_code, &a.indicator_code, a.year)
                .cmp(&(&b.country_code, &b.indicator_code, b.year))
        });
        keys.dedup();
        assert_eq!(keys.len(), before);
    }

    #[test]
    fn duplicate_natural_keys_resolve_first_occurrence_wins() {
        // Two units for the same (country, indicator, year): the natural key
        // ignores the unit, so the second cell is a duplicate.
        let raw = parse(json!({
            "id": ["geo", "time", "indic_codes", "unit"],
            "size": [1, 1, 1, 2],
            "dimension": {
                "geo": {"category": {"index": {"DE": 0}, "label": {"DE": "Germany"}}},
                "time": {"category": {"index": {"2020": 0}}},
                "indic_codes": {"category": {"index": {"GEP": 0}}},
                "unit": {"category": {"index": {"GWH": 0, "KTOE": 1}}}
            },
            "value": {"0": 100.0, "1": 105.0}
        }));

        let out = transform_dataset("nrg_cb_e", &raw, &targets(&["GEP"]), Utc::now()).unwrap();

        assert_eq!(out.observations.len(), 1);
        assert_eq!(out.observations[0].value, Some(100.0));
        assert_eq!(out.report.duplicates, 1);
    }

    #[test]
    fn unparseable_time_is_skipped_and_counted_not_fatal() {
        let raw = parse(json!({
            "id": ["geo", "time", "indic_codes", "unit"],
            "size": [1, 2, 1, 1],
            "dimension": {
                "geo": {"category": {"index": {"DE": 0}}},
                "time": {"category": {"index": {"2020": 0, "2020-Q1": 1}}},
                "indic_codes": {"category": {"index": {"GEP": 0}}},
                "unit": {"category": {"index": {"GWH": 0}}}
            },
            "value": {"0": 1.0, "1": 2.0}
        }));

        let out = transform_dataset("nrg_cb_e", &raw, &targets(&["GEP"]), Utc::now()).unwrap();

        assert_eq!(out.observations.len(), 1);
        assert_eq!(out.report.skipped_time, 1);
        assert_eq!(out.observations[0].year.year(), 2020);
    }

    #[test]
    fn missing_value_placeholder_yields_null_value_row() {
        let raw = parse(json!({
            "id": ["geo", "time", "indic_codes", "unit"],
            "size": [1, 1, 1, 1],
            "dimension": {
                "geo": {"category": {"index": {"DE": 0}}},
                "time": {"category": {"index": {"2020": 0}}},
                "indic_codes": {"category": {"index": {"GEP": 0}}},
                "unit": {"category": {"index": {"GWH": 0}}}
            },
            "value": {"0": ":"}
        }));

        let out = transform_dataset("nrg_cb_e", &raw, &targets(&["GEP"]), Utc::now()).unwrap();

        assert_eq!(out.observations.len(), 1);
        assert_eq!(out.observations[0].value, None);
    }

    #[test]
    fn unresolved_labels_fall_back_to_raw_codes() {
        let raw = parse(json!({
            "id": ["geo", "time", "indic_codes", "unit"],
            "size": [1, 1, 1, 1],
            "dimension": {
                "geo": {"category": {"index": {"XK": 0}}},
                "time": {"category": {"index": {"2021": 0}}},
                "indic_codes": {"category": {"index": {"GEP": 0}}},
                "unit": {"category": {"index": {"GWH": 0}}}
            },
            "value": {"0": 7.5}
        }));

        let out = transform_dataset("nrg_cb_e", &raw, &targets(&["GEP"]), Utc::now()).unwrap();

        let obs = &out.observations[0];
        assert_eq!(obs.country_name, "XK");
        assert_eq!(obs.indicator_label, "GEP");
        assert_eq!(obs.unit_label.as_deref(), Some("GWH"));
    }

    #[test]
    fn out_of_range_flat_index_is_counted_not_fatal() {
        let raw = parse(json!({
            "id": ["geo", "time", "indic_codes", "unit"],
            "size": [1, 1, 1, 1],
            "dimension": {
                "geo": {"category": {"index": {"DE": 0}}},
                "time": {"category": {"index": {"2020": 0}}},
                "indic_codes": {"category": {"index": {"GEP": 0}}},
                "unit": {"category": {"index": {"GWH": 0}}}
            },
            "value": {"0": 1.0, "99": 2.0}
        }));

        let out = transform_dataset("nrg_cb_e", &raw, &targets(&["GEP"]), Utc::now()).unwrap();

        assert_eq!(out.observations.len(), 1);
        assert_eq!(out.report.skipped_index, 1);
    }

    #[test]
    fn missing_geo_dimension_is_systemic_failure() {
        let raw = parse(json!({
            "id": ["time", "indic_codes"],
            "size": [1, 1],
            "dimension": {
                "time": {"category": {"index": {"2020": 0}}},
                "indic_codes": {"category": {"index": {"GEP": 0}}}
            },
            "value": {}
        }));

        let err = transform_dataset("nrg_cb_e", &raw, &targets(&["GEP"]), Utc::now()).unwrap_err();
        assert!(matches!(err, TransformationError::MissingDimension { ref name, .. } if name == "geo"));
    }

    #[test]
    fn undetectable_indicator_dimension_is_systemic_failure() {
        let raw = mock_response();
        let err =
            transform_dataset("nrg_cb_e", &raw, &targets(&["NON_EXISTENT"]), Utc::now())
                .unwrap_err();
        assert!(matches!(
            err,
            TransformationError::IndicatorDimensionNotFound { .. }
        ));
    }

    #[test]
    fn dimension_and_size_lists_must_agree() {
        let raw = parse(json!({
            "id": ["geo", "time"],
            "size": [1],
            "dimension": {
                "geo": {"category": {"index": {"DE": 0}}},
                "time": {"category": {"index": {"2020": 0}}}
            },
            "value": {}
        }));

        let err = transform_dataset("nrg_cb_e", &raw, &targets(&["GEP"]), Utc::now()).unwrap_err();
        assert!(matches!(err, TransformationError::SizeMismatch { .. }));
    }
}
