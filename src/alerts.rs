//! Alert generation
//!
//! Turns a lab-result snapshot into a ranked alert list:
//! 1. Group numeric test values by biomarker across every lab result
//! 2. Resolve display names through the biomarker dictionary
//! 3. Emit out-of-range, trend, and improvement alerts per biomarker
//! 4. Drop dismissed alerts, mark acknowledged ones, sort by severity then recency
//!
//! Alert ids are UUIDv5 values derived from (type, biomarker, lab result), so
//! re-deriving from the same snapshot reproduces the same ids.

use crate::config::AlertThresholds;
use crate::lookup::BiomarkerLookup;
use crate::patterns::detect_consecutive_abnormal;
use crate::store::SessionState;
use crate::trend::analyze_trend;
use crate::types::{
    format_value, AlertSeverity, AlertStatus, AlertType, BiomarkerAlert, BiomarkerId,
    GroupedAlert, LabResult, ReferenceRange, RunDirection, TestValue, TrendAnalysisResult,
    TrendDataPoint, TrendDirection, ValueStatus,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};
use uuid::Uuid;

/// Namespace for alert ids
const ALERT_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6c, 0x61, 0x62, 0x77, 0x61, 0x74, 0x63, 0x68, 0x2d, 0x61, 0x6c, 0x65, 0x72, 0x74, 0x73, 0x31,
]);

/// Deterministic alert id for (type, biomarker, lab result)
pub fn alert_id(alert_type: AlertType, biomarker_id: BiomarkerId, lab_result_id: &str) -> String {
    let key = format!("{}:{}:{}", alert_type.as_str(), biomarker_id, lab_result_id);
    Uuid::new_v5(&ALERT_ID_NAMESPACE, key.as_bytes()).to_string()
}

/// One numeric measurement linked back to its lab result
#[derive(Debug, Clone, Copy)]
pub struct Measurement<'a> {
    pub lab: &'a LabResult,
    pub test_value: &'a TestValue,
    pub value: f64,
}

/// All numeric measurements of one biomarker, most recent first
#[derive(Debug, Clone)]
pub struct BiomarkerGroup<'a> {
    pub biomarker_id: BiomarkerId,
    pub name: String,
    pub category: Option<String>,
    pub measurements: Vec<Measurement<'a>>,
}

/// Display name and category for a biomarker.
///
/// Tries the dictionary with the raw report text, then the raw text itself,
/// then a synthesized `Biomarker {id}` label.
pub fn resolve_display(
    biomarker_id: BiomarkerId,
    raw_text: Option<&str>,
    lookup: &dyn BiomarkerLookup,
) -> (String, Option<String>) {
    match raw_text.map(str::trim).filter(|t| !t.is_empty()) {
        Some(raw) => match lookup.lookup(raw) {
            Some(info) => (info.name, info.category),
            None => (raw.to_string(), None),
        },
        None => (format!("Biomarker {}", biomarker_id), None),
    }
}

/// Group numeric test values by biomarker. Groups are ordered by biomarker id and
/// each group's measurements by lab-result date, newest first.
pub fn group_measurements<'a>(
    lab_results: &'a [LabResult],
    lookup: &dyn BiomarkerLookup,
) -> Vec<BiomarkerGroup<'a>> {
    let mut by_biomarker: BTreeMap<BiomarkerId, Vec<Measurement<'a>>> = BTreeMap::new();
    for lab in lab_results {
        for test_value in &lab.test_values {
            if let Some(value) = test_value.value.as_numeric() {
                by_biomarker
                    .entry(test_value.biomarker_id)
                    .or_default()
                    .push(Measurement {
                        lab,
                        test_value,
                        value,
                    });
            }
        }
    }

    by_biomarker
        .into_iter()
        .map(|(biomarker_id, mut measurements)| {
            measurements.sort_by(|a, b| b.lab.date.cmp(&a.lab.date));
            let raw_text = measurements
                .iter()
                .find_map(|m| m.test_value.raw_text.as_deref().filter(|t| !t.trim().is_empty()));
            let (name, category) = resolve_display(biomarker_id, raw_text, lookup);
            BiomarkerGroup {
                biomarker_id,
                name,
                category,
                measurements,
            }
        })
        .collect()
}

fn with_unit(value: f64, unit: &str) -> String {
    if unit.trim().is_empty() {
        format_value(value)
    } else {
        format!("{} {}", format_value(value), unit.trim())
    }
}

/// Sort by severity rank, then newest first. The sort is stable.
pub fn sort_alerts(alerts: &mut [BiomarkerAlert]) {
    alerts.sort_by(|a, b| {
        a.severity
            .rank()
            .cmp(&b.severity.rank())
            .then_with(|| b.date.cmp(&a.date))
    });
}

/// Bucket alerts by biomarker.
///
/// Groups keep the order of the alert list internally, so `latest_alert` is the
/// first alert of its group. Groups are sorted by their most severe alert, then
/// by unacknowledged count (descending).
pub fn group_alerts(alerts: &[BiomarkerAlert]) -> Vec<GroupedAlert> {
    let mut buckets: Vec<Vec<&BiomarkerAlert>> = Vec::new();
    let mut index: HashMap<BiomarkerId, usize> = HashMap::new();
    for alert in alerts {
        let slot = *index.entry(alert.biomarker_id).or_insert_with(|| {
            buckets.push(Vec::new());
            buckets.len() - 1
        });
        buckets[slot].push(alert);
    }

    let mut groups: Vec<GroupedAlert> = buckets
        .into_iter()
        .map(|bucket| {
            let first = bucket[0];
            let severity = bucket
                .iter()
                .map(|a| a.severity)
                .min_by_key(|s| s.rank())
                .unwrap_or(first.severity);
            GroupedAlert {
                biomarker_id: first.biomarker_id,
                biomarker_name: first.biomarker_name.clone(),
                category: first.category.clone(),
                unacknowledged_count: bucket.iter().filter(|a| !a.acknowledged).count(),
                latest_alert: first.clone(),
                severity,
                alerts: bucket.into_iter().cloned().collect(),
            }
        })
        .collect();

    groups.sort_by(|a, b| {
        a.severity
            .rank()
            .cmp(&b.severity.rank())
            .then_with(|| b.unacknowledged_count.cmp(&a.unacknowledged_count))
    });
    groups
}

/// Alerts still awaiting acknowledgement; improvements never count
pub fn unacknowledged_count(alerts: &[BiomarkerAlert]) -> usize {
    alerts
        .iter()
        .filter(|a| {
            !a.acknowledged
                && match a.alert_type {
                    AlertType::OutOfRange | AlertType::Trend => true,
                    AlertType::Improvement => false,
                }
        })
        .count()
}

/// Alert generator configured with [`AlertThresholds`]
#[derive(Debug, Clone, Default)]
pub struct AlertGenerator {
    thresholds: AlertThresholds,
}

impl AlertGenerator {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    /// Derive the full, sorted alert list for a snapshot and session
    pub fn generate(
        &self,
        lab_results: &[LabResult],
        lookup: &dyn BiomarkerLookup,
        session: &SessionState,
    ) -> Vec<BiomarkerAlert> {
        let groups = group_measurements(lab_results, lookup);

        let mut alerts: Vec<BiomarkerAlert> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut push_unique = |alert: BiomarkerAlert, alerts: &mut Vec<BiomarkerAlert>| {
            if seen.insert(alert.id.clone()) {
                alerts.push(alert);
            }
        };

        for group in &groups {
            let before = alerts.len();

            for measurement in &group.measurements {
                if let Some(alert) = self.out_of_range_alert(group, measurement) {
                    push_unique(alert, &mut alerts);
                }
            }
            if let Some(alert) = self.trend_alert(group) {
                push_unique(alert, &mut alerts);
            }
            if let Some(alert) = self.improvement_alert(group) {
                push_unique(alert, &mut alerts);
            }

            debug!(
                biomarker_id = group.biomarker_id,
                measurements = group.measurements.len(),
                alerts = alerts.len() - before,
                "derived biomarker alerts"
            );
        }

        alerts.retain(|alert| !session.is_dismissed(&alert.id));
        for alert in alerts.iter_mut() {
            alert.acknowledged = session.is_acknowledged(&alert.id);
        }
        sort_alerts(&mut alerts);
        alerts
    }

    /// Severity of a single out-of-range value from how far it sits past its bound
    pub fn out_of_range_severity(
        &self,
        value: f64,
        status: ValueStatus,
        range: Option<ReferenceRange>,
    ) -> AlertSeverity {
        let range = match range {
            Some(range) => range,
            None => return AlertSeverity::Info,
        };

        let pct_beyond = match status {
            ValueStatus::High => match range.high {
                Some(high) if high != 0.0 => (value - high) / high * 100.0,
                _ => return AlertSeverity::Info,
            },
            ValueStatus::Low => match range.low {
                Some(low) if low != 0.0 => (low - value) / low * 100.0,
                _ => return AlertSeverity::Info,
            },
            ValueStatus::Normal | ValueStatus::Unknown => return AlertSeverity::Info,
        };

        if pct_beyond > self.thresholds.critical_pct {
            AlertSeverity::Critical
        } else if pct_beyond > self.thresholds.warning_pct {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Info
        }
    }

    /// Severity policy for a sustained trend; `None` means no alert
    pub fn determine_trend_alert_severity(
        &self,
        analysis: &TrendAnalysisResult,
        consecutive_abnormal: usize,
    ) -> Option<AlertSeverity> {
        let abnormal_ratio = analysis.abnormal_ratio();
        let has_abnormal = analysis.has_abnormal();
        let is_stable = analysis.direction.direction == TrendDirection::Stable;

        if consecutive_abnormal >= self.thresholds.min_consecutive_abnormal {
            Some(AlertSeverity::Critical)
        } else if abnormal_ratio > self.thresholds.abnormal_ratio_warning {
            Some(AlertSeverity::Warning)
        } else if !is_stable
            && analysis.direction.confidence > self.thresholds.confidence_warning
            && has_abnormal
        {
            Some(AlertSeverity::Warning)
        } else if has_abnormal {
            Some(AlertSeverity::Info)
        } else if is_stable && abnormal_ratio == 0.0 && analysis.statistics.count > 1 {
            Some(AlertSeverity::Positive)
        } else {
            None
        }
    }

    fn build_alert(
        &self,
        alert_type: AlertType,
        severity: AlertSeverity,
        group: &BiomarkerGroup<'_>,
        measurement: &Measurement<'_>,
        status: AlertStatus,
        message: String,
    ) -> BiomarkerAlert {
        BiomarkerAlert {
            id: alert_id(alert_type, group.biomarker_id, &measurement.lab.id),
            alert_type,
            severity,
            biomarker_id: group.biomarker_id,
            biomarker_name: group.name.clone(),
            category: group.category.clone(),
            value: measurement.value,
            unit: measurement.test_value.unit.clone(),
            reference_range: measurement.test_value.reference_range(),
            status,
            date: measurement.lab.date,
            lab_name: measurement.lab.lab_name.clone(),
            lab_result_id: measurement.lab.id.clone(),
            message,
            acknowledged: false,
            dismissed: false,
        }
    }

    fn out_of_range_alert(
        &self,
        group: &BiomarkerGroup<'_>,
        measurement: &Measurement<'_>,
    ) -> Option<BiomarkerAlert> {
        let test_value = measurement.test_value;
        let status = match test_value.status() {
            ValueStatus::High => AlertStatus::High,
            ValueStatus::Low => AlertStatus::Low,
            ValueStatus::Normal | ValueStatus::Unknown => return None,
        };

        let range = test_value.reference_range();
        let severity = self.out_of_range_severity(measurement.value, test_value.status(), range);
        let reading = with_unit(measurement.value, &test_value.unit);
        let message = match range {
            Some(range) => format!(
                "{} is {} at {} (reference range {})",
                group.name,
                status.as_str(),
                reading,
                range.describe()
            ),
            None => format!("{} is flagged {} at {}", group.name, status.as_str(), reading),
        };

        Some(self.build_alert(
            AlertType::OutOfRange,
            severity,
            group,
            measurement,
            status,
            message,
        ))
    }

    fn trend_alert(&self, group: &BiomarkerGroup<'_>) -> Option<BiomarkerAlert> {
        if group.measurements.len() < self.thresholds.min_trend_points {
            return None;
        }

        let points: Vec<TrendDataPoint> = group
            .measurements
            .iter()
            .filter_map(|m| TrendDataPoint::from_measurement(m.lab, m.test_value))
            .collect();
        let run = detect_consecutive_abnormal(&points);
        let direction: RunDirection = match run.direction {
            Some(direction) if run.count >= self.thresholds.min_consecutive_abnormal => direction,
            _ => return None,
        };

        let analysis = match analyze_trend(&points) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(biomarker_id = group.biomarker_id, error = %e, "trend analysis failed");
                return None;
            }
        };

        let severity = match self.determine_trend_alert_severity(&analysis, run.count) {
            Some(AlertSeverity::Positive) | None => return None,
            Some(severity) => severity,
        };

        let latest = &group.measurements[0];
        let message = format!(
            "{} has been {} for {} consecutive results. {}",
            group.name,
            direction.as_str(),
            run.count,
            analysis.direction.description
        );

        Some(self.build_alert(
            AlertType::Trend,
            severity,
            group,
            latest,
            AlertStatus::from(direction),
            message,
        ))
    }

    /// Only the two most recent measurements are compared.
    fn improvement_alert(&self, group: &BiomarkerGroup<'_>) -> Option<BiomarkerAlert> {
        let (latest, previous) = match group.measurements.as_slice() {
            [latest, previous, ..] => (latest, previous),
            _ => return None,
        };

        if latest.test_value.status() != ValueStatus::Normal
            || !previous.test_value.status().is_abnormal()
        {
            return None;
        }

        let message = format!(
            "{} is back in the normal range at {} after a {} result",
            group.name,
            with_unit(latest.value, &latest.test_value.unit),
            previous.test_value.status().as_str()
        );

        Some(self.build_alert(
            AlertType::Improvement,
            AlertSeverity::Positive,
            group,
            latest,
            AlertStatus::Normal,
            message,
        ))
    }
}
