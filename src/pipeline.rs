//! Pipeline orchestration
//!
//! Stateless JSON-in/JSON-out entry points over the engine. Use
//! [`AlertStore`](crate::store::AlertStore) when dismiss/acknowledge state must
//! survive between calls.

use crate::alerts::{group_alerts, resolve_display, unacknowledged_count, AlertGenerator};
use crate::error::AnalysisError;
use crate::lookup::{BiomarkerDictionary, BiomarkerLookup, NoLookup};
use crate::patterns::PatternDetector;
use crate::snapshot::SnapshotAdapter;
use crate::store::SessionState;
use crate::trend::analyze_trend;
use crate::types::{AlertReport, BiomarkerId, BiomarkerTrendReport, LabResult};

/// Convert a lab-result snapshot into an alert report.
///
/// # Arguments
/// * `snapshot_json` - Lab results as a JSON array or NDJSON
/// * `dictionary_json` - Optional biomarker dictionary (JSON array of entries)
///
/// # Returns
/// JSON object `{alerts, grouped_alerts, unacknowledged_count}`
///
/// # Example
/// ```ignore
/// let report = lab_results_to_alerts(&snapshot_json, Some(&dictionary_json))?;
/// ```
pub fn lab_results_to_alerts(
    snapshot_json: &str,
    dictionary_json: Option<&str>,
) -> Result<String, AnalysisError> {
    let lab_results = SnapshotAdapter::parse(snapshot_json)?;
    let lookup = load_lookup(dictionary_json)?;

    let report = build_alert_report(
        &lab_results,
        lookup.as_ref(),
        &AlertGenerator::default(),
        &SessionState::new(),
    );
    Ok(serde_json::to_string(&report)?)
}

/// Trend and pattern analysis for one biomarker of a snapshot, as JSON.
///
/// The dictionary, when given, names the biomarker the same way alerts do.
pub fn biomarker_trend_report(
    snapshot_json: &str,
    biomarker_id: BiomarkerId,
    dictionary_json: Option<&str>,
) -> Result<String, AnalysisError> {
    let lab_results = SnapshotAdapter::parse(snapshot_json)?;
    let lookup = load_lookup(dictionary_json)?;
    let report = build_trend_report(
        &lab_results,
        biomarker_id,
        lookup.as_ref(),
        &PatternDetector::default(),
    )?;
    Ok(serde_json::to_string(&report)?)
}

/// Parse an optional dictionary, falling back to raw-text names
pub fn load_lookup(
    dictionary_json: Option<&str>,
) -> Result<Box<dyn BiomarkerLookup>, AnalysisError> {
    match dictionary_json {
        Some(json) => Ok(Box::new(BiomarkerDictionary::from_json(json)?)),
        None => Ok(Box::new(NoLookup)),
    }
}

/// Run the alert stages over parsed lab results:
/// 1. AlertGenerator - Derive, filter, and sort alerts
/// 2. group_alerts - Bucket by biomarker
/// 3. unacknowledged_count - Badge count
pub fn build_alert_report(
    lab_results: &[LabResult],
    lookup: &dyn BiomarkerLookup,
    generator: &AlertGenerator,
    session: &SessionState,
) -> AlertReport {
    let alerts = generator.generate(lab_results, lookup, session);
    AlertReport {
        grouped_alerts: group_alerts(&alerts),
        unacknowledged_count: unacknowledged_count(&alerts),
        alerts,
    }
}

/// Build the trend report for one biomarker.
///
/// Fails with `UnknownBiomarker` when the snapshot has no numeric value for it.
pub fn build_trend_report(
    lab_results: &[LabResult],
    biomarker_id: BiomarkerId,
    lookup: &dyn BiomarkerLookup,
    detector: &PatternDetector,
) -> Result<BiomarkerTrendReport, AnalysisError> {
    let mut points = SnapshotAdapter::biomarker_series(lab_results, biomarker_id);
    if points.is_empty() {
        return Err(AnalysisError::UnknownBiomarker(biomarker_id));
    }
    points.sort_by(|a, b| a.date.cmp(&b.date));

    let raw_text = lab_results
        .iter()
        .flat_map(|lab| lab.test_values.iter())
        .filter(|tv| tv.biomarker_id == biomarker_id)
        .find_map(|tv| tv.raw_text.as_deref().filter(|t| !t.trim().is_empty()));
    let (biomarker_name, category) = resolve_display(biomarker_id, raw_text, lookup);

    let trend = analyze_trend(&points)?;
    let patterns = detector.analyze_patterns(&points);

    Ok(BiomarkerTrendReport {
        biomarker_id,
        biomarker_name,
        category,
        points,
        trend,
        patterns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertSeverity, TrendDirection};

    fn sample_snapshot() -> &'static str {
        r#"[
            {"id": "lab-1", "date": "2024-01-15", "lab_name": "Quest", "test_values": [
                {"biomarker_id": 1, "value": 200, "unit": "mg/dL",
                 "reference_range_low": 70, "reference_range_high": 100, "raw_text": "GLU"},
                {"biomarker_id": 5, "value": "trace", "raw_text": "Urine Ketones"}
            ]},
            {"id": "lab-2", "date": "2024-02-15", "lab_name": "Quest", "test_values": [
                {"biomarker_id": 1, "value": 150, "unit": "mg/dL",
                 "reference_range_low": 70, "reference_range_high": 100, "raw_text": "GLU"}
            ]},
            {"id": "lab-3", "date": "2024-03-15", "lab_name": "Quest", "test_values": [
                {"biomarker_id": 1, "value": 130, "unit": "mg/dL",
                 "reference_range_low": 70, "reference_range_high": 100, "raw_text": "GLU"}
            ]}
        ]"#
    }

    fn sample_dictionary() -> &'static str {
        r#"[{"name": "Glucose", "category": "Metabolic", "aliases": ["GLU"]}]"#
    }

    #[test]
    fn test_lab_results_to_alerts() {
        let json = lab_results_to_alerts(sample_snapshot(), Some(sample_dictionary())).unwrap();
        let report: AlertReport = serde_json::from_str(&json).unwrap();

        // three out-of-range alerts and one trend alert
        assert_eq!(report.alerts.len(), 4);
        assert_eq!(report.unacknowledged_count, 4);
        assert_eq!(report.grouped_alerts.len(), 1);
        assert_eq!(report.grouped_alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(report.alerts[0].biomarker_name, "Glucose");
        assert_eq!(report.alerts[0].category.as_deref(), Some("Metabolic"));

        let payload: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(payload["alerts"][0]["type"].is_string());
    }

    #[test]
    fn test_without_dictionary_uses_raw_text() {
        let json = lab_results_to_alerts(sample_snapshot(), None).unwrap();
        let report: AlertReport = serde_json::from_str(&json).unwrap();

        assert!(report.alerts.iter().all(|a| a.biomarker_name == "GLU"));
        assert!(report.alerts.iter().all(|a| a.category.is_none()));
    }

    #[test]
    fn test_empty_snapshot() {
        let json = lab_results_to_alerts("[]", None).unwrap();
        let report: AlertReport = serde_json::from_str(&json).unwrap();

        assert!(report.alerts.is_empty());
        assert!(report.grouped_alerts.is_empty());
        assert_eq!(report.unacknowledged_count, 0);
    }

    #[test]
    fn test_invalid_json() {
        assert!(lab_results_to_alerts("[not json", None).is_err());
        assert!(lab_results_to_alerts("[]", Some("{")).is_err());
    }

    #[test]
    fn test_biomarker_trend_report() {
        let json = biomarker_trend_report(sample_snapshot(), 1, None).unwrap();
        let report: BiomarkerTrendReport = serde_json::from_str(&json).unwrap();

        assert_eq!(report.biomarker_name, "GLU");
        assert_eq!(report.category, None);

        assert_eq!(report.points.len(), 3);
        assert_eq!(report.trend.direction.direction, TrendDirection::Decreasing);
        assert_eq!(report.trend.high_count, 3);
        assert_eq!(report.patterns.consecutive_abnormal.count, 3);
        assert!(!report.patterns.seasonal.has_seasonal_pattern);
    }

    #[test]
    fn test_trend_report_unknown_biomarker() {
        // text-only biomarker has no numeric series
        let result = biomarker_trend_report(sample_snapshot(), 5, None);
        assert!(matches!(result, Err(AnalysisError::UnknownBiomarker(5))));
    }

    #[test]
    fn test_trend_report_uses_dictionary_names() {
        let json = biomarker_trend_report(sample_snapshot(), 1, Some(sample_dictionary())).unwrap();
        let report: BiomarkerTrendReport = serde_json::from_str(&json).unwrap();

        assert_eq!(report.biomarker_name, "Glucose");
        assert_eq!(report.category.as_deref(), Some("Metabolic"));

        let alerts_json =
            lab_results_to_alerts(sample_snapshot(), Some(sample_dictionary())).unwrap();
        let alerts: AlertReport = serde_json::from_str(&alerts_json).unwrap();
        assert_eq!(alerts.alerts[0].biomarker_name, report.biomarker_name);
    }

    #[test]
    fn test_trend_report_rejects_bad_dictionary() {
        assert!(biomarker_trend_report(sample_snapshot(), 1, Some("{")).is_err());
    }
}
