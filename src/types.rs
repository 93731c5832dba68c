//! Core types for the Labwatch engine
//!
//! This module defines the data structures that flow through each stage of the
//! engine: ingested lab results, per-biomarker trend series, trend and pattern
//! analysis results, and the alerts handed to the rendering layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a biomarker in the reference dictionary
pub type BiomarkerId = u32;

// ============================================================================
// Ingested lab results
// ============================================================================

/// Status of a single measurement relative to its reference range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueStatus {
    Normal,
    Low,
    High,
    #[default]
    Unknown,
}

impl ValueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueStatus::Normal => "normal",
            ValueStatus::Low => "low",
            ValueStatus::High => "high",
            ValueStatus::Unknown => "unknown",
        }
    }

    /// True for `high` and `low`
    pub fn is_abnormal(&self) -> bool {
        match self {
            ValueStatus::High | ValueStatus::Low => true,
            ValueStatus::Normal | ValueStatus::Unknown => false,
        }
    }

    /// Classify a value against optional reference bounds.
    ///
    /// With neither bound present the status is `unknown`.
    pub fn classify(value: f64, low: Option<f64>, high: Option<f64>) -> Self {
        if low.is_none() && high.is_none() {
            return ValueStatus::Unknown;
        }
        if let Some(high) = high {
            if value > high {
                return ValueStatus::High;
            }
        }
        if let Some(low) = low {
            if value < low {
                return ValueStatus::Low;
            }
        }
        ValueStatus::Normal
    }
}

/// Reference range bounds considered clinically normal
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
}

impl ReferenceRange {
    /// Build a range, returning `None` when both bounds are absent
    pub fn from_bounds(low: Option<f64>, high: Option<f64>) -> Option<Self> {
        if low.is_none() && high.is_none() {
            None
        } else {
            Some(Self { low, high })
        }
    }

    /// Human-readable form used in alert messages
    pub fn describe(&self) -> String {
        match (self.low, self.high) {
            (Some(low), Some(high)) => format!("{}-{}", format_value(low), format_value(high)),
            (Some(low), None) => format!(">= {}", format_value(low)),
            (None, Some(high)) => format!("<= {}", format_value(high)),
            (None, None) => "not specified".to_string(),
        }
    }
}

/// A measured value as reported by the lab.
///
/// Labs report most results as numbers but some as free text ("negative",
/// "<0.5", "see note"). Only the numeric variant reaches trend analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasuredValue {
    Numeric(f64),
    Text(String),
}

impl MeasuredValue {
    /// The numeric value, if this measurement is numeric and finite
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            MeasuredValue::Numeric(v) if v.is_finite() => Some(*v),
            MeasuredValue::Numeric(_) | MeasuredValue::Text(_) => None,
        }
    }
}

/// A single measurement of one biomarker within a lab result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestValue {
    /// Biomarker identifier in the reference dictionary
    pub biomarker_id: BiomarkerId,
    /// Reported value
    pub value: MeasuredValue,
    /// Unit of measurement as printed on the report
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_range_low: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_range_high: Option<f64>,
    /// Status precomputed by the producer; `None` when it was not supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ValueStatus>,
    /// Raw display text of the test name, used for dictionary lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
}

impl TestValue {
    pub fn reference_range(&self) -> Option<ReferenceRange> {
        ReferenceRange::from_bounds(self.reference_range_low, self.reference_range_high)
    }

    /// Status, treating an absent status as `unknown`
    pub fn status(&self) -> ValueStatus {
        self.status.unwrap_or_default()
    }
}

/// One dated lab visit/report containing multiple test values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabResult {
    /// Lab-result identifier assigned by the storage layer
    pub id: String,
    /// Collection date (RFC 3339 or YYYY-MM-DD)
    #[serde(with = "crate::snapshot::flexible_date")]
    pub date: DateTime<Utc>,
    /// Name of the lab that produced the report
    #[serde(default)]
    pub lab_name: String,
    #[serde(default)]
    pub test_values: Vec<TestValue>,
}

/// Display information returned by the biomarker dictionary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiomarkerInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

// ============================================================================
// Trend series
// ============================================================================

/// A single numeric point of one biomarker's series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendDataPoint {
    pub date: DateTime<Utc>,
    pub value: f64,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_range: Option<ReferenceRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lab_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ValueStatus>,
}

impl TrendDataPoint {
    pub fn new(date: DateTime<Utc>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            date,
            value,
            unit: unit.into(),
            reference_range: None,
            lab_name: None,
            status: None,
        }
    }

    pub fn with_status(mut self, status: ValueStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_reference_range(mut self, range: Option<ReferenceRange>) -> Self {
        self.reference_range = range;
        self
    }

    pub fn with_lab_name(mut self, lab_name: impl Into<String>) -> Self {
        self.lab_name = Some(lab_name.into());
        self
    }

    /// Project a numeric test value onto its parent lab result's date and lab name.
    ///
    /// Returns `None` for non-numeric measurements.
    pub fn from_measurement(lab: &LabResult, test_value: &TestValue) -> Option<Self> {
        let value = test_value.value.as_numeric()?;
        let mut point = Self::new(lab.date, value, test_value.unit.clone())
            .with_status(test_value.status())
            .with_reference_range(test_value.reference_range());
        if !lab.lab_name.is_empty() {
            point = point.with_lab_name(lab.lab_name.clone());
        }
        Some(point)
    }

    /// Timestamp in milliseconds since the Unix epoch
    pub fn timestamp_ms(&self) -> f64 {
        self.date.timestamp_millis() as f64
    }

    /// Status, treating an absent status as `unknown`
    pub fn status_or_unknown(&self) -> ValueStatus {
        self.status.unwrap_or_default()
    }
}

// ============================================================================
// Trend analysis
// ============================================================================

/// Direction of a biomarker's value series over time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Decreasing => "decreasing",
            TrendDirection::Stable => "stable",
            TrendDirection::InsufficientData => "insufficient_data",
        }
    }
}

/// Direction classification with a confidence score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectionAnalysis {
    pub direction: TrendDirection,
    /// Confidence in the classification (0-1)
    pub confidence: f64,
    pub description: String,
}

/// Linear rate of change between the first and last point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateOfChange {
    pub per_day: f64,
    pub per_week: f64,
    /// Per 30-day month
    pub per_month: f64,
    /// Change relative to the first value (percentage)
    pub percentage_change: f64,
    pub unit: String,
}

/// Descriptive statistics over a series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendStatistics {
    pub min: f64,
    pub max: f64,
    pub average: f64,
    pub median: f64,
    /// Population standard deviation
    pub standard_deviation: f64,
    pub latest: f64,
    pub latest_date: DateTime<Utc>,
    pub oldest: f64,
    pub oldest_date: DateTime<Utc>,
    pub count: usize,
    pub unit: String,
}

/// Complete trend analysis of one biomarker series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysisResult {
    pub direction: DirectionAnalysis,
    pub rate_of_change: Option<RateOfChange>,
    pub statistics: TrendStatistics,
    pub normal_count: usize,
    pub high_count: usize,
    pub low_count: usize,
}

impl TrendAnalysisResult {
    /// Share of points flagged high or low
    pub fn abnormal_ratio(&self) -> f64 {
        if self.statistics.count == 0 {
            return 0.0;
        }
        (self.high_count + self.low_count) as f64 / self.statistics.count as f64
    }

    pub fn has_abnormal(&self) -> bool {
        self.high_count > 0 || self.low_count > 0
    }
}

// ============================================================================
// Pattern analysis
// ============================================================================

/// Average value for one calendar month, pooled across years
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyAverage {
    /// Calendar month (1-12)
    pub month: u32,
    pub month_name: String,
    pub average: f64,
    pub count: usize,
    /// Deviation from the overall average (percentage)
    pub deviation_pct: f64,
}

/// Result of calendar-month seasonal analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalAnalysisResult {
    pub has_seasonal_pattern: bool,
    pub monthly_averages: Vec<MonthlyAverage>,
    pub peak_month: Option<u32>,
    pub trough_month: Option<u32>,
    /// Peak-to-trough spread relative to the overall average (percentage)
    pub variation_pct: f64,
    pub overall_average: f64,
    pub sample_count: usize,
    pub description: String,
}

/// A repeating pattern found by lagged correlation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CyclicalPattern {
    pub period_days: u32,
    /// Variance-normalized lag correlation (confidence)
    pub correlation: f64,
    /// Number of point pairs that supported the winning lag
    pub pair_count: usize,
    /// "weekly", "monthly", "quarterly" or "N-day"
    pub label: String,
    pub description: String,
}

/// Side of the rolling baseline a point falls on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationDirection {
    Above,
    Below,
}

/// Deviation of one point from its trailing rolling baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineDeviation {
    pub date: DateTime<Utc>,
    pub value: f64,
    pub baseline_mean: f64,
    pub baseline_std_dev: f64,
    pub deviation: f64,
    /// Deviation relative to the baseline mean (percentage)
    pub deviation_pct: f64,
    pub direction: DeviationDirection,
    pub is_significant: bool,
}

/// Direction of an abnormal run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunDirection {
    High,
    Low,
}

impl RunDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunDirection::High => "high",
            RunDirection::Low => "low",
        }
    }

    pub fn from_status(status: ValueStatus) -> Option<Self> {
        match status {
            ValueStatus::High => Some(RunDirection::High),
            ValueStatus::Low => Some(RunDirection::Low),
            ValueStatus::Normal | ValueStatus::Unknown => None,
        }
    }
}

/// Longest unbroken run of same-direction abnormal statuses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsecutiveAbnormal {
    pub count: usize,
    pub direction: Option<RunDirection>,
}

/// All pattern detectors applied to one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternAnalysis {
    pub seasonal: SeasonalAnalysisResult,
    pub cyclical: Option<CyclicalPattern>,
    pub baseline_deviations: Vec<BaselineDeviation>,
    pub significant_deviation_count: usize,
    pub consecutive_abnormal: ConsecutiveAbnormal,
}

/// Trend and pattern analysis of one biomarker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomarkerTrendReport {
    pub biomarker_id: BiomarkerId,
    pub biomarker_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub points: Vec<TrendDataPoint>,
    pub trend: TrendAnalysisResult,
    pub patterns: PatternAnalysis,
}

// ============================================================================
// Alerts
// ============================================================================

/// Kind of alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    OutOfRange,
    Trend,
    Improvement,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::OutOfRange => "out_of_range",
            AlertType::Trend => "trend",
            AlertType::Improvement => "improvement",
        }
    }
}

/// Alert severity, ordered most to least severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
    Positive,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "critical",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Info => "info",
            AlertSeverity::Positive => "positive",
        }
    }

    /// Sort rank; lower is more severe
    pub fn rank(&self) -> u8 {
        match self {
            AlertSeverity::Critical => 0,
            AlertSeverity::Warning => 1,
            AlertSeverity::Info => 2,
            AlertSeverity::Positive => 3,
        }
    }
}

/// Status carried by an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    High,
    Low,
    Normal,
    /// Reserved for runs spanning both directions; the run detector never
    /// produces one, so no alert currently carries it.
    Mixed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::High => "high",
            AlertStatus::Low => "low",
            AlertStatus::Normal => "normal",
            AlertStatus::Mixed => "mixed",
        }
    }
}

impl From<RunDirection> for AlertStatus {
    fn from(direction: RunDirection) -> Self {
        match direction {
            RunDirection::High => AlertStatus::High,
            RunDirection::Low => AlertStatus::Low,
        }
    }
}

/// An advisory alert about one biomarker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomarkerAlert {
    /// Deterministic id derived from (type, biomarker, lab result)
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub biomarker_id: BiomarkerId,
    pub biomarker_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub value: f64,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_range: Option<ReferenceRange>,
    pub status: AlertStatus,
    pub date: DateTime<Utc>,
    pub lab_name: String,
    pub lab_result_id: String,
    pub message: String,
    pub acknowledged: bool,
    pub dismissed: bool,
}

/// Alerts for one biomarker, bundled for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupedAlert {
    pub biomarker_id: BiomarkerId,
    pub biomarker_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub alerts: Vec<BiomarkerAlert>,
    pub latest_alert: BiomarkerAlert,
    pub unacknowledged_count: usize,
    /// Most severe severity among the alerts
    pub severity: AlertSeverity,
}

/// Serialized output of one alert derivation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertReport {
    pub alerts: Vec<BiomarkerAlert>,
    pub grouped_alerts: Vec<GroupedAlert>,
    pub unacknowledged_count: usize,
}

/// Format a value for messages without trailing float noise
pub(crate) fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let rounded = format!("{:.2}", value);
        rounded.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
