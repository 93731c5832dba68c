//! Alert store
//!
//! Holds the current lab-result snapshot together with the session's dismiss
//! and acknowledge sets, and keeps a derived alert list in step with both.
//! Session state lives only as long as the store; nothing is persisted.

use crate::alerts::{group_alerts, unacknowledged_count, AlertGenerator};
use crate::config::EngineConfig;
use crate::error::AnalysisError;
use crate::lookup::BiomarkerLookup;
use crate::patterns::PatternDetector;
use crate::pipeline::build_trend_report;
use crate::types::{
    AlertReport, BiomarkerAlert, BiomarkerId, BiomarkerTrendReport, GroupedAlert, LabResult,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Session-scoped alert ids the user dismissed or acknowledged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    dismissed: BTreeSet<String>,
    acknowledged: BTreeSet<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already dismissed
    pub fn dismiss(&mut self, alert_id: &str) -> bool {
        self.dismissed.insert(alert_id.to_string())
    }

    /// Returns false if the id was already acknowledged
    pub fn acknowledge(&mut self, alert_id: &str) -> bool {
        self.acknowledged.insert(alert_id.to_string())
    }

    pub fn clear_dismissed(&mut self) {
        self.dismissed.clear();
    }

    pub fn is_dismissed(&self, alert_id: &str) -> bool {
        self.dismissed.contains(alert_id)
    }

    pub fn is_acknowledged(&self, alert_id: &str) -> bool {
        self.acknowledged.contains(alert_id)
    }

    pub fn dismissed_count(&self) -> usize {
        self.dismissed.len()
    }
}

/// Whether the store can currently show alerts.
///
/// `Unavailable` means the upstream fetch failed, which is distinct from a
/// snapshot that simply yields no alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AlertAvailability {
    Ready { alert_count: usize },
    Unavailable { reason: String },
}

/// Stateful alert store for one user session
pub struct AlertStore {
    lab_results: Vec<LabResult>,
    lookup: Box<dyn BiomarkerLookup>,
    generator: AlertGenerator,
    patterns: PatternDetector,
    session: SessionState,
    load_error: Option<String>,
    alerts: Vec<BiomarkerAlert>,
}

impl AlertStore {
    /// Create an empty store with default thresholds
    pub fn new(lookup: Box<dyn BiomarkerLookup>) -> Self {
        Self::with_config(lookup, EngineConfig::default())
    }

    /// Create an empty store with explicit thresholds
    pub fn with_config(lookup: Box<dyn BiomarkerLookup>, config: EngineConfig) -> Self {
        Self {
            lab_results: Vec::new(),
            lookup,
            generator: AlertGenerator::new(config.alerts),
            patterns: PatternDetector::new(config.patterns),
            session: SessionState::new(),
            load_error: None,
            alerts: Vec::new(),
        }
    }

    /// Replace the snapshot and clear any previous load error
    pub fn load_snapshot(&mut self, lab_results: Vec<LabResult>) {
        self.lab_results = lab_results;
        self.load_error = None;
        self.refresh();
    }

    /// Record that the snapshot could not be fetched
    pub fn set_load_error(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(reason = %reason, "lab results unavailable");
        self.lab_results.clear();
        self.alerts.clear();
        self.load_error = Some(reason);
    }

    pub fn availability(&self) -> AlertAvailability {
        match &self.load_error {
            Some(reason) => AlertAvailability::Unavailable {
                reason: reason.clone(),
            },
            None => AlertAvailability::Ready {
                alert_count: self.alerts.len(),
            },
        }
    }

    pub fn lab_results(&self) -> &[LabResult] {
        &self.lab_results
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Visible alerts, most severe first
    pub fn alerts(&self) -> &[BiomarkerAlert] {
        &self.alerts
    }

    pub fn grouped_alerts(&self) -> Vec<GroupedAlert> {
        group_alerts(&self.alerts)
    }

    pub fn unacknowledged_count(&self) -> usize {
        unacknowledged_count(&self.alerts)
    }

    /// Hide an alert for the rest of the session
    pub fn dismiss_alert(&mut self, alert_id: &str) {
        if self.session.dismiss(alert_id) {
            self.refresh();
        }
    }

    /// Mark an alert as seen; it stays visible
    pub fn acknowledge_alert(&mut self, alert_id: &str) {
        if self.session.acknowledge(alert_id) {
            self.refresh();
        }
    }

    /// Bring every dismissed alert back
    pub fn clear_dismissed(&mut self) {
        if self.session.dismissed_count() > 0 {
            self.session.clear_dismissed();
            self.refresh();
        }
    }

    /// Alerts in one category; `None` returns every alert
    pub fn filter_by_category(&self, category: Option<&str>) -> Vec<&BiomarkerAlert> {
        match category {
            Some(category) => self
                .alerts
                .iter()
                .filter(|a| a.category.as_deref() == Some(category))
                .collect(),
            None => self.alerts.iter().collect(),
        }
    }

    pub fn alerts_for_biomarker(&self, biomarker_id: BiomarkerId) -> Vec<&BiomarkerAlert> {
        self.alerts
            .iter()
            .filter(|a| a.biomarker_id == biomarker_id)
            .collect()
    }

    /// Alerts, groups, and unacknowledged count in one value
    pub fn report(&self) -> AlertReport {
        AlertReport {
            alerts: self.alerts.clone(),
            grouped_alerts: self.grouped_alerts(),
            unacknowledged_count: self.unacknowledged_count(),
        }
    }

    /// Trend and pattern analysis for one biomarker in the current snapshot
    pub fn trend_report(
        &self,
        biomarker_id: BiomarkerId,
    ) -> Result<BiomarkerTrendReport, AnalysisError> {
        build_trend_report(
            &self.lab_results,
            biomarker_id,
            self.lookup.as_ref(),
            &self.patterns,
        )
    }

    fn refresh(&mut self) {
        self.alerts = self
            .generator
            .generate(&self.lab_results, self.lookup.as_ref(), &self.session);
        debug!(
            lab_results = self.lab_results.len(),
            alerts = self.alerts.len(),
            "alerts refreshed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::alert_id;
    use crate::lookup::{BiomarkerDictionary, NoLookup};
    use crate::snapshot::SnapshotAdapter;
    use crate::types::AlertType;
    use pretty_assertions::assert_eq;

    fn sample_results() -> Vec<LabResult> {
        SnapshotAdapter::parse_array(
            r#"[
                {"id": "lab-1", "date": "2024-01-10", "lab_name": "Quest", "test_values": [
                    {"biomarker_id": 1, "value": 200, "unit": "mg/dL",
                     "reference_range_low": 0, "reference_range_high": 100, "raw_text": "LDL"},
                    {"biomarker_id": 2, "value": 3.1, "unit": "g/dL",
                     "reference_range_low": 3.5, "reference_range_high": 5.0, "raw_text": "Albumin"}
                ]},
                {"id": "lab-2", "date": "2024-02-10", "lab_name": "Quest", "test_values": [
                    {"biomarker_id": 2, "value": 4.2, "unit": "g/dL",
                     "reference_range_low": 3.5, "reference_range_high": 5.0, "raw_text": "Albumin"}
                ]}
            ]"#,
        )
        .unwrap()
    }

    fn dictionary() -> Box<dyn BiomarkerLookup> {
        Box::new(
            BiomarkerDictionary::from_json(
                r#"[
                    {"name": "LDL Cholesterol", "category": "Lipids", "aliases": ["LDL"]},
                    {"name": "Albumin", "category": "Liver"}
                ]"#,
            )
            .unwrap(),
        )
    }

    fn loaded_store() -> AlertStore {
        let mut store = AlertStore::new(dictionary());
        store.load_snapshot(sample_results());
        store
    }

    #[test]
    fn test_load_snapshot_derives_alerts() {
        let store = loaded_store();

        // LDL out of range, albumin out of range then back to normal
        assert_eq!(store.alerts().len(), 3);
        assert_eq!(store.unacknowledged_count(), 2);
        assert_eq!(store.availability(), AlertAvailability::Ready { alert_count: 3 });
        assert_eq!(store.alerts()[0].biomarker_name, "LDL Cholesterol");
    }

    #[test]
    fn test_dismiss_and_clear_dismissed() {
        let mut store = loaded_store();
        let id = alert_id(AlertType::OutOfRange, 1, "lab-1");

        store.dismiss_alert(&id);
        assert!(store.alerts().iter().all(|a| a.id != id));
        assert_eq!(store.alerts().len(), 2);

        store.clear_dismissed();
        assert_eq!(store.alerts().len(), 3);
        assert!(store.alerts().iter().any(|a| a.id == id));
    }

    #[test]
    fn test_acknowledge_keeps_alert_visible() {
        let mut store = loaded_store();
        let id = alert_id(AlertType::OutOfRange, 1, "lab-1");

        store.acknowledge_alert(&id);
        let alert = store.alerts().iter().find(|a| a.id == id).unwrap();
        assert!(alert.acknowledged);
        assert_eq!(store.unacknowledged_count(), 1);
    }

    #[test]
    fn test_session_survives_reload() {
        let mut store = loaded_store();
        let id = alert_id(AlertType::OutOfRange, 1, "lab-1");
        store.dismiss_alert(&id);

        store.load_snapshot(sample_results());
        assert!(store.alerts().iter().all(|a| a.id != id));
    }

    #[test]
    fn test_filters() {
        let store = loaded_store();

        assert_eq!(store.filter_by_category(Some("Liver")).len(), 2);
        assert_eq!(store.filter_by_category(Some("Lipids")).len(), 1);
        assert!(store.filter_by_category(Some("Thyroid")).is_empty());
        assert_eq!(store.filter_by_category(None).len(), 3);

        assert_eq!(store.alerts_for_biomarker(2).len(), 2);
        assert!(store.alerts_for_biomarker(99).is_empty());
    }

    #[test]
    fn test_grouped_alerts() {
        let store = loaded_store();
        let groups = store.grouped_alerts();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].biomarker_id, 1);
        assert_eq!(groups[1].alerts.len(), 2);
    }

    #[test]
    fn test_load_error_is_not_empty() {
        let mut store = AlertStore::new(Box::new(NoLookup));
        store.load_snapshot(Vec::new());
        assert_eq!(store.availability(), AlertAvailability::Ready { alert_count: 0 });

        store.set_load_error("vault locked");
        assert_eq!(
            store.availability(),
            AlertAvailability::Unavailable {
                reason: "vault locked".to_string()
            }
        );

        store.load_snapshot(sample_results());
        assert!(matches!(store.availability(), AlertAvailability::Ready { .. }));
    }

    #[test]
    fn test_trend_report() {
        let store = loaded_store();

        let report = store.trend_report(2).unwrap();
        assert_eq!(report.biomarker_name, "Albumin");
        assert_eq!(report.category.as_deref(), Some("Liver"));
        assert_eq!(report.points.len(), 2);
        assert_eq!(report.trend.statistics.latest, 4.2);

        assert!(matches!(
            store.trend_report(99),
            Err(AnalysisError::UnknownBiomarker(99))
        ));
    }
}
