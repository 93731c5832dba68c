//! Lab-result snapshot ingestion
//!
//! The storage layer hands the engine a snapshot of lab results as JSON. This
//! module parses it (JSON array or NDJSON), fills in statuses the producer left
//! out, validates it, and projects per-biomarker numeric series.

use crate::error::AnalysisError;
use crate::types::{BiomarkerId, LabResult, TrendDataPoint, ValueStatus};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, warn};

/// Parse a date as RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS` (UTC), or `YYYY-MM-DD` (midnight UTC)
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>, AnalysisError> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&midnight));
        }
    }
    Err(AnalysisError::DateParseError(format!(
        "unrecognized date '{}', expected RFC 3339 or YYYY-MM-DD",
        raw
    )))
}

/// Serde adapter for lab-result dates
pub mod flexible_date {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        date: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_date(&raw).map_err(serde::de::Error::custom)
    }
}

/// Problems found while validating a snapshot
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Lab result has an empty id")]
    EmptyLabResultId,

    #[error("Duplicate lab result id: {0}")]
    DuplicateLabResultId(String),

    #[error("Biomarker {biomarker_id}: reference range low {low} exceeds high {high}")]
    InvertedReferenceRange {
        biomarker_id: BiomarkerId,
        low: f64,
        high: f64,
    },

    #[error("Biomarker {0}: numeric value is not finite")]
    NonFiniteValue(BiomarkerId),
}

/// Validation outcome for one lab result in a snapshot
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Position of the lab result in the snapshot
    pub index: usize,
    pub lab_result_id: String,
    pub errors: Vec<ValidationError>,
}

/// Adapter for turning snapshot JSON into lab results
pub struct SnapshotAdapter;

impl SnapshotAdapter {
    /// Parse a JSON array of lab results
    pub fn parse_array(json: &str) -> Result<Vec<LabResult>, AnalysisError> {
        let mut results: Vec<LabResult> = serde_json::from_str(json)?;
        Self::resolve_statuses(&mut results);
        Ok(results)
    }

    /// Parse NDJSON (one lab result per line)
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<LabResult>, AnalysisError> {
        let mut results = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<LabResult>(trimmed) {
                Ok(result) => results.push(result),
                Err(e) => {
                    return Err(AnalysisError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Self::resolve_statuses(&mut results);
        Ok(results)
    }

    /// Parse either form, choosing by the first non-whitespace character
    pub fn parse(input: &str) -> Result<Vec<LabResult>, AnalysisError> {
        match input.trim_start().chars().next() {
            Some('[') => Self::parse_array(input),
            Some('{') | None => Self::parse_ndjson(input),
            Some(other) => Err(AnalysisError::InvalidSnapshot(format!(
                "expected a JSON array or NDJSON objects, found '{}'",
                other
            ))),
        }
    }

    /// Classify numeric values whose producer did not supply a status.
    ///
    /// An explicit status, `unknown` included, is never overridden. Values
    /// without any reference bound stay unset.
    pub fn resolve_statuses(results: &mut [LabResult]) {
        let mut resolved = 0usize;
        for result in results.iter_mut() {
            for test_value in result.test_values.iter_mut() {
                if test_value.status.is_some() {
                    continue;
                }
                let Some(value) = test_value.value.as_numeric() else {
                    continue;
                };
                let derived = ValueStatus::classify(
                    value,
                    test_value.reference_range_low,
                    test_value.reference_range_high,
                );
                if derived != ValueStatus::Unknown {
                    test_value.status = Some(derived);
                    resolved += 1;
                }
            }
        }
        if resolved > 0 {
            debug!(resolved, "derived statuses from reference ranges");
        }
    }

    /// Validate every lab result, returning only the ones with problems
    pub fn validate(results: &[LabResult]) -> Vec<ValidationResult> {
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut report = Vec::new();

        for (index, result) in results.iter().enumerate() {
            let mut errors = Vec::new();

            if result.id.trim().is_empty() {
                errors.push(ValidationError::EmptyLabResultId);
            } else if !seen_ids.insert(result.id.as_str()) {
                errors.push(ValidationError::DuplicateLabResultId(result.id.clone()));
            }

            for test_value in &result.test_values {
                if let (Some(low), Some(high)) =
                    (test_value.reference_range_low, test_value.reference_range_high)
                {
                    if low > high {
                        errors.push(ValidationError::InvertedReferenceRange {
                            biomarker_id: test_value.biomarker_id,
                            low,
                            high,
                        });
                    }
                }
                if let crate::types::MeasuredValue::Numeric(v) = test_value.value {
                    if !v.is_finite() {
                        errors.push(ValidationError::NonFiniteValue(test_value.biomarker_id));
                    }
                }
            }

            if !errors.is_empty() {
                warn!(
                    index,
                    lab_result_id = %result.id,
                    issues = errors.len(),
                    "invalid lab result"
                );
                report.push(ValidationResult {
                    index,
                    lab_result_id: result.id.clone(),
                    errors,
                });
            }
        }

        report
    }

    /// Numeric series of one biomarker across all lab results, in snapshot order
    pub fn biomarker_series(
        results: &[LabResult],
        biomarker_id: BiomarkerId,
    ) -> Vec<TrendDataPoint> {
        results
            .iter()
            .flat_map(|lab| {
                lab.test_values
                    .iter()
                    .filter(move |tv| tv.biomarker_id == biomarker_id)
                    .filter_map(move |tv| TrendDataPoint::from_measurement(lab, tv))
            })
            .collect()
    }
}
