//! Engine configuration
//!
//! Every threshold used by the trend, pattern, and alert stages lives here so
//! hosts can tune them without touching the algorithms. Defaults reproduce the
//! engine's documented policy.

use crate::error::AnalysisError;
use serde::{Deserialize, Serialize};

/// Default baseline window (points)
pub const DEFAULT_BASELINE_WINDOW: usize = 5;

/// Default baseline significance threshold (standard deviations)
pub const DEFAULT_BASELINE_THRESHOLD: f64 = 2.0;

/// Default shortest cycle searched (days)
pub const DEFAULT_MIN_CYCLE_DAYS: u32 = 7;

/// Default longest cycle searched (days)
pub const DEFAULT_MAX_CYCLE_DAYS: u32 = 90;

/// Thresholds for alert generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Percent beyond the reference bound that makes an out-of-range value critical
    pub critical_pct: f64,
    /// Percent beyond the reference bound that makes an out-of-range value a warning
    pub warning_pct: f64,
    /// Minimum points in a biomarker series before trend alerts are considered
    pub min_trend_points: usize,
    /// Minimum consecutive same-direction abnormal results for a trend alert
    pub min_consecutive_abnormal: usize,
    /// Abnormal share above which a trend is a warning
    pub abnormal_ratio_warning: f64,
    /// Direction confidence above which an abnormal trend is a warning
    pub confidence_warning: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            critical_pct: 50.0,
            warning_pct: 20.0,
            min_trend_points: 3,
            min_consecutive_abnormal: 3,
            abnormal_ratio_warning: 0.5,
            confidence_warning: 0.7,
        }
    }
}

/// Settings for the pattern detectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSettings {
    pub seasonal_min_points: usize,
    /// Peak-to-trough spread (fraction of the overall average) that counts as seasonal
    pub seasonal_variation_threshold: f64,
    pub cycle_min_points: usize,
    pub min_cycle_days: u32,
    pub max_cycle_days: u32,
    /// Allowed slack when pairing points at a lag (days)
    pub cycle_tolerance_days: f64,
    pub cycle_min_correlation: f64,
    pub baseline_window: usize,
    pub baseline_threshold: f64,
}

impl Default for PatternSettings {
    fn default() -> Self {
        Self {
            seasonal_min_points: 6,
            seasonal_variation_threshold: 0.15,
            cycle_min_points: 10,
            min_cycle_days: DEFAULT_MIN_CYCLE_DAYS,
            max_cycle_days: DEFAULT_MAX_CYCLE_DAYS,
            cycle_tolerance_days: 3.0,
            cycle_min_correlation: 0.5,
            baseline_window: DEFAULT_BASELINE_WINDOW,
            baseline_threshold: DEFAULT_BASELINE_THRESHOLD,
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub alerts: AlertThresholds,
    pub patterns: PatternSettings,
}

impl EngineConfig {
    /// Load configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, AnalysisError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Reject values the algorithms cannot work with
    pub fn validate(&self) -> Result<(), AnalysisError> {
        let alerts = &self.alerts;
        if alerts.warning_pct < 0.0 || alerts.critical_pct < alerts.warning_pct {
            return Err(AnalysisError::InvalidConfig(format!(
                "expected 0 <= warning_pct ({}) <= critical_pct ({})",
                alerts.warning_pct, alerts.critical_pct
            )));
        }
        if alerts.min_trend_points < 2 {
            return Err(AnalysisError::InvalidConfig(
                "min_trend_points must be at least 2".to_string(),
            ));
        }
        if alerts.min_consecutive_abnormal == 0 {
            return Err(AnalysisError::InvalidConfig(
                "min_consecutive_abnormal must be positive".to_string(),
            ));
        }

        let patterns = &self.patterns;
        if patterns.min_cycle_days == 0 || patterns.min_cycle_days > patterns.max_cycle_days {
            return Err(AnalysisError::InvalidConfig(format!(
                "expected 0 < min_cycle_days ({}) <= max_cycle_days ({})",
                patterns.min_cycle_days, patterns.max_cycle_days
            )));
        }
        if patterns.baseline_window == 0 {
            return Err(AnalysisError::InvalidConfig(
                "baseline_window must be positive".to_string(),
            ));
        }
        if patterns.baseline_threshold < 0.0 || patterns.cycle_tolerance_days < 0.0 {
            return Err(AnalysisError::InvalidConfig(
                "thresholds and tolerances must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}
