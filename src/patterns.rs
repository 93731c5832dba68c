//! Pattern detection
//!
//! Detectors that look past the overall trend of a biomarker series:
//! - Seasonal variation by calendar month
//! - Cyclical repetition found by lagged correlation
//! - Deviations from a trailing rolling baseline
//! - The longest same-direction run of abnormal results

use crate::config::PatternSettings;
use crate::trend::{mean, sorted_by_date, std_dev, MS_PER_DAY};
use crate::types::{
    BaselineDeviation, ConsecutiveAbnormal, CyclicalPattern, DeviationDirection, MonthlyAverage,
    PatternAnalysis, RunDirection, SeasonalAnalysisResult, TrendDataPoint,
};
use chrono::Datelike;
use std::collections::BTreeMap;
use tracing::trace;

const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

fn month_name(month: u32) -> &'static str {
    MONTH_NAMES
        .get(month.saturating_sub(1) as usize)
        .copied()
        .unwrap_or("Unknown")
}

/// Percentage of `value` relative to `reference`, 0 when the reference is 0
fn percent_of(value: f64, reference: f64) -> f64 {
    if reference == 0.0 {
        0.0
    } else {
        value / reference.abs() * 100.0
    }
}

/// Human label for a detected cycle length
fn cycle_label(period_days: u32) -> String {
    match period_days {
        6..=8 => "weekly".to_string(),
        28..=31 => "monthly".to_string(),
        84..=93 => "quarterly".to_string(),
        n => format!("{}-day", n),
    }
}

/// Pattern detector configured with [`PatternSettings`]
#[derive(Debug, Clone, Default)]
pub struct PatternDetector {
    settings: PatternSettings,
}

impl PatternDetector {
    pub fn new(settings: PatternSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PatternSettings {
        &self.settings
    }

    /// Pool points by calendar month across years and look for peak-to-trough variation.
    pub fn analyze_seasonal_patterns(&self, points: &[TrendDataPoint]) -> SeasonalAnalysisResult {
        let min_points = self.settings.seasonal_min_points.max(1);
        if points.len() < min_points {
            return SeasonalAnalysisResult {
                has_seasonal_pattern: false,
                monthly_averages: Vec::new(),
                peak_month: None,
                trough_month: None,
                variation_pct: 0.0,
                overall_average: 0.0,
                sample_count: points.len(),
                description: format!(
                    "Need at least {} data points for seasonal analysis (have {})",
                    min_points,
                    points.len()
                ),
            };
        }

        let mut by_month: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for point in points {
            by_month.entry(point.date.month()).or_default().push(point.value);
        }

        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        let overall_average = mean(&values);

        let monthly_averages: Vec<MonthlyAverage> = by_month
            .iter()
            .map(|(month, values)| {
                let average = mean(values);
                MonthlyAverage {
                    month: *month,
                    month_name: month_name(*month).to_string(),
                    average,
                    count: values.len(),
                    deviation_pct: percent_of(average - overall_average, overall_average),
                }
            })
            .collect();

        let mut peak = &monthly_averages[0];
        let mut trough = &monthly_averages[0];
        for entry in &monthly_averages[1..] {
            if entry.average > peak.average {
                peak = entry;
            }
            if entry.average < trough.average {
                trough = entry;
            }
        }

        let variation = if overall_average == 0.0 {
            0.0
        } else {
            (peak.average - trough.average).abs() / overall_average.abs()
        };
        let has_seasonal_pattern = variation > self.settings.seasonal_variation_threshold;

        let description = if has_seasonal_pattern {
            format!(
                "Values tend to peak in {} and are lowest in {} ({:.0}% variation)",
                peak.month_name,
                trough.month_name,
                variation * 100.0
            )
        } else {
            format!(
                "No significant seasonal variation ({:.1}% across {} months)",
                variation * 100.0,
                monthly_averages.len()
            )
        };

        SeasonalAnalysisResult {
            has_seasonal_pattern,
            peak_month: Some(peak.month),
            trough_month: Some(trough.month),
            variation_pct: variation * 100.0,
            overall_average,
            sample_count: points.len(),
            description,
            monthly_averages,
        }
    }

    /// Search lags between `min_cycle_days` and `max_cycle_days` for a repeating pattern.
    ///
    /// The search is capped at half the observed span so at least two cycles are visible.
    pub fn detect_cyclical_pattern(
        &self,
        points: &[TrendDataPoint],
        min_cycle_days: u32,
        max_cycle_days: u32,
    ) -> Option<CyclicalPattern> {
        if points.len() < self.settings.cycle_min_points.max(2) {
            return None;
        }

        let sorted = sorted_by_date(points);
        let origin = sorted[0].timestamp_ms();
        let days: Vec<f64> = sorted
            .iter()
            .map(|p| (p.timestamp_ms() - origin) / MS_PER_DAY)
            .collect();
        let values: Vec<f64> = sorted.iter().map(|p| p.value).collect();
        let n = values.len();

        let average = mean(&values);
        let variance = std_dev(&values).powi(2);
        if variance == 0.0 {
            return None;
        }

        let span_days = days[n - 1];
        let search_max = (max_cycle_days as f64).min((span_days / 2.0).floor());
        if search_max < min_cycle_days as f64 {
            return None;
        }

        let tolerance = self.settings.cycle_tolerance_days;
        let mut best: Option<(u32, f64, usize)> = None;

        for lag in min_cycle_days..=search_max as u32 {
            let lag_days = lag as f64;
            let mut cross = 0.0;
            let mut pairs = 0usize;

            for i in 0..n {
                let lower = days[i] + lag_days - tolerance;
                let upper = days[i] + lag_days + tolerance;
                let start = i + 1 + days[i + 1..].partition_point(|d| *d < lower);

                let mut nearest: Option<usize> = None;
                let mut nearest_gap = f64::INFINITY;
                for (j, day) in days.iter().enumerate().skip(start) {
                    if *day > upper {
                        break;
                    }
                    let gap = (day - days[i] - lag_days).abs();
                    if gap < nearest_gap {
                        nearest = Some(j);
                        nearest_gap = gap;
                    }
                }

                if let Some(j) = nearest {
                    cross += (values[i] - average) * (values[j] - average);
                    pairs += 1;
                }
            }

            if pairs > 2 {
                let correlation = cross / (pairs as f64 * variance);
                trace!(lag, correlation, pairs, "cycle lag candidate");
                if best.map_or(true, |(_, top, _)| correlation > top) {
                    best = Some((lag, correlation, pairs));
                }
            }
        }

        let (period_days, correlation, pair_count) = best?;
        if correlation < self.settings.cycle_min_correlation {
            return None;
        }

        let correlation = correlation.min(1.0);
        let label = cycle_label(period_days);
        let description = format!(
            "Values repeat on a {} cycle (about {} days, correlation {:.2})",
            label, period_days, correlation
        );

        Some(CyclicalPattern {
            period_days,
            correlation,
            pair_count,
            label,
            description,
        })
    }

    /// Compare each point with the mean and spread of the `window_size` points before it.
    ///
    /// Returns one entry per point past the initial window; empty when there are
    /// not more points than the window.
    pub fn detect_baseline_deviations(
        &self,
        points: &[TrendDataPoint],
        window_size: usize,
        threshold: f64,
    ) -> Vec<BaselineDeviation> {
        if window_size == 0 || points.len() <= window_size {
            return Vec::new();
        }

        let sorted = sorted_by_date(points);
        let values: Vec<f64> = sorted.iter().map(|p| p.value).collect();

        (window_size..values.len())
            .map(|i| {
                let window = &values[i - window_size..i];
                let baseline_mean = mean(window);
                let baseline_std_dev = std_dev(window);
                let deviation = values[i] - baseline_mean;

                BaselineDeviation {
                    date: sorted[i].date,
                    value: values[i],
                    baseline_mean,
                    baseline_std_dev,
                    deviation,
                    deviation_pct: percent_of(deviation, baseline_mean),
                    direction: if deviation >= 0.0 {
                        DeviationDirection::Above
                    } else {
                        DeviationDirection::Below
                    },
                    is_significant: deviation.abs() > threshold * baseline_std_dev,
                }
            })
            .collect()
    }

    /// Run every detector with the configured settings.
    pub fn analyze_patterns(&self, points: &[TrendDataPoint]) -> PatternAnalysis {
        let settings = &self.settings;
        let baseline_deviations = self.detect_baseline_deviations(
            points,
            settings.baseline_window,
            settings.baseline_threshold,
        );
        let significant_deviation_count =
            baseline_deviations.iter().filter(|d| d.is_significant).count();

        PatternAnalysis {
            seasonal: self.analyze_seasonal_patterns(points),
            cyclical: self.detect_cyclical_pattern(
                points,
                settings.min_cycle_days,
                settings.max_cycle_days,
            ),
            baseline_deviations,
            significant_deviation_count,
            consecutive_abnormal: detect_consecutive_abnormal(points),
        }
    }
}

/// Longest unbroken run of same-direction abnormal statuses, oldest first.
///
/// A normal or unknown status ends the run, and so does a flip between high
/// and low: the flipped point starts a fresh run of length one.
pub fn detect_consecutive_abnormal(points: &[TrendDataPoint]) -> ConsecutiveAbnormal {
    let mut longest = ConsecutiveAbnormal::default();
    let mut current_count = 0;
    let mut current_direction: Option<RunDirection> = None;

    for point in sorted_by_date(points) {
        match RunDirection::from_status(point.status_or_unknown()) {
            Some(direction) if current_direction == Some(direction) => current_count += 1,
            Some(direction) => {
                current_direction = Some(direction);
                current_count = 1;
            }
            None => {
                current_direction = None;
                current_count = 0;
            }
        }

        if current_count > longest.count {
            longest = ConsecutiveAbnormal {
                count: current_count,
                direction: current_direction,
            };
        }
    }

    longest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueStatus;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::f64::consts::PI;

    fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    fn daily(values: &[f64]) -> Vec<TrendDataPoint> {
        let start = date(2024, 1, 1);
        values
            .iter()
            .enumerate()
            .map(|(i, v)| TrendDataPoint::new(start + Duration::days(i as i64), *v, "ng/mL"))
            .collect()
    }

    fn with_statuses(statuses: &[ValueStatus]) -> Vec<TrendDataPoint> {
        let start = date(2024, 1, 1);
        statuses
            .iter()
            .enumerate()
            .map(|(i, s)| {
                TrendDataPoint::new(start + Duration::days(30 * i as i64), 100.0, "mg/dL")
                    .with_status(*s)
            })
            .collect()
    }

    #[test]
    fn test_seasonal_needs_six_points() {
        let detector = PatternDetector::default();
        let result = detector.analyze_seasonal_patterns(&daily(&[1.0, 2.0, 3.0, 4.0, 5.0]));

        assert!(!result.has_seasonal_pattern);
        assert!(result.description.contains("at least 6"));
        assert_eq!(result.sample_count, 5);
    }

    #[test]
    fn test_seasonal_pattern_detected() {
        let points: Vec<TrendDataPoint> = (1..=12u32)
            .map(|m| {
                let value = 100.0 + 20.0 * (2.0 * PI * (m - 1) as f64 / 12.0).cos();
                TrendDataPoint::new(date(2024, m, 15), value, "nmol/L")
            })
            .collect();
        let result = PatternDetector::default().analyze_seasonal_patterns(&points);

        assert!(result.has_seasonal_pattern);
        assert_eq!(result.peak_month, Some(1));
        assert_eq!(result.trough_month, Some(7));
        assert_eq!(result.monthly_averages.len(), 12);
        assert!((result.variation_pct - 40.0).abs() < 0.5);
    }

    #[test]
    fn test_seasonal_pools_across_years() {
        let points = vec![
            TrendDataPoint::new(date(2023, 1, 10), 105.0, "u"),
            TrendDataPoint::new(date(2024, 1, 10), 111.0, "u"),
            TrendDataPoint::new(date(2023, 6, 10), 100.0, "u"),
            TrendDataPoint::new(date(2024, 6, 10), 100.0, "u"),
            TrendDataPoint::new(date(2023, 9, 10), 101.0, "u"),
            TrendDataPoint::new(date(2024, 9, 10), 99.0, "u"),
        ];
        let result = PatternDetector::default().analyze_seasonal_patterns(&points);

        let january = &result.monthly_averages[0];
        assert_eq!(january.month, 1);
        assert_eq!(january.month_name, "January");
        assert_eq!(january.count, 2);
        assert!((january.average - 108.0).abs() < 1e-9);
        assert!(!result.has_seasonal_pattern);
    }

    #[test]
    fn test_cyclical_weekly_pattern() {
        let values: Vec<f64> = (0..60)
            .map(|d| 100.0 + 10.0 * (2.0 * PI * d as f64 / 7.0).sin())
            .collect();
        let pattern = PatternDetector::default()
            .detect_cyclical_pattern(&daily(&values), 7, 90)
            .unwrap();

        assert_eq!(pattern.period_days, 7);
        assert_eq!(pattern.label, "weekly");
        assert!(pattern.correlation > 0.8);
        assert!(pattern.pair_count > 2);
    }

    #[test]
    fn test_cyclical_monthly_pattern() {
        let values: Vec<f64> = (0..180)
            .map(|d| 100.0 + 10.0 * (2.0 * PI * d as f64 / 30.0).sin())
            .collect();
        let pattern = PatternDetector::default()
            .detect_cyclical_pattern(&daily(&values), 7, 90)
            .unwrap();

        assert_eq!(pattern.period_days, 30);
        assert_eq!(pattern.label, "monthly");
        assert!(pattern.correlation > 0.9);
        assert!(pattern.description.contains("monthly cycle"));
    }

    #[test]
    fn test_cyclical_weak_correlation_is_rejected() {
        // irregular series whose best lag correlation stays near 0.19
        let values = [
            12.0, 3.0, 17.0, 8.0, 1.0, 14.0, 6.0, 19.0, 2.0, 11.0, 16.0, 4.0, 9.0, 18.0, 5.0,
            13.0, 7.0, 15.0, 10.0, 20.0,
        ];
        let points = daily(&values);
        assert!(PatternDetector::default()
            .detect_cyclical_pattern(&points, 7, 90)
            .is_none());

        let lenient = PatternDetector::new(PatternSettings {
            cycle_min_correlation: 0.1,
            ..PatternSettings::default()
        });
        let pattern = lenient.detect_cyclical_pattern(&points, 7, 90).unwrap();
        assert_eq!(pattern.period_days, 8);
        assert!(pattern.correlation < 0.5);
    }

    #[test]
    fn test_cyclical_requires_ten_points() {
        let values: Vec<f64> = (0..9).map(|d| (d % 2) as f64).collect();
        assert!(PatternDetector::default()
            .detect_cyclical_pattern(&daily(&values), 7, 90)
            .is_none());
    }

    #[test]
    fn test_cyclical_span_too_short() {
        // 12 days of data caps the search at 5 days, below the 7-day minimum
        let values: Vec<f64> = (0..12).map(|d| (d % 3) as f64).collect();
        assert!(PatternDetector::default()
            .detect_cyclical_pattern(&daily(&values), 7, 90)
            .is_none());
    }

    #[test]
    fn test_cyclical_constant_series() {
        let values = vec![5.0; 40];
        assert!(PatternDetector::default()
            .detect_cyclical_pattern(&daily(&values), 7, 90)
            .is_none());
    }

    #[test]
    fn test_cycle_labels() {
        assert_eq!(cycle_label(7), "weekly");
        assert_eq!(cycle_label(30), "monthly");
        assert_eq!(cycle_label(91), "quarterly");
        assert_eq!(cycle_label(45), "45-day");
    }

    #[test]
    fn test_baseline_deviation_flags_spike() {
        let points = daily(&[10.0, 10.0, 10.0, 10.0, 10.0, 20.0]);
        let deviations = PatternDetector::default().detect_baseline_deviations(&points, 5, 2.0);

        assert_eq!(deviations.len(), 1);
        let spike = &deviations[0];
        assert!(spike.is_significant);
        assert_eq!(spike.direction, DeviationDirection::Above);
        assert!((spike.deviation_pct - 100.0).abs() < 1e-9);
        assert_eq!(spike.baseline_mean, 10.0);
    }

    #[test]
    fn test_baseline_deviation_within_noise() {
        let points = daily(&[10.0, 11.0, 9.0, 10.0, 11.0, 9.8]);
        let deviations = PatternDetector::default().detect_baseline_deviations(&points, 5, 2.0);

        assert_eq!(deviations.len(), 1);
        assert!(!deviations[0].is_significant);
        assert_eq!(deviations[0].direction, DeviationDirection::Below);
    }

    #[test]
    fn test_baseline_requires_more_points_than_window() {
        let points = daily(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(PatternDetector::default()
            .detect_baseline_deviations(&points, 5, 2.0)
            .is_empty());
    }

    #[test]
    fn test_consecutive_abnormal_run() {
        use ValueStatus::*;
        let points = with_statuses(&[Normal, High, High, High, Normal]);
        let result = detect_consecutive_abnormal(&points);
        assert_eq!(result.count, 3);
        assert_eq!(result.direction, Some(RunDirection::High));
    }

    #[test]
    fn test_consecutive_abnormal_no_cross_direction_accumulation() {
        use ValueStatus::*;
        let result = detect_consecutive_abnormal(&with_statuses(&[High, Low, High, Low]));
        assert_eq!(result.count, 1);
        assert_eq!(result.direction, Some(RunDirection::High));
    }

    #[test]
    fn test_consecutive_abnormal_unknown_breaks_run() {
        use ValueStatus::*;
        let result =
            detect_consecutive_abnormal(&with_statuses(&[Low, Low, Unknown, Low, Low, Low, Low]));
        assert_eq!(result.count, 4);
        assert_eq!(result.direction, Some(RunDirection::Low));
    }

    #[test]
    fn test_consecutive_abnormal_all_normal() {
        use ValueStatus::*;
        let result = detect_consecutive_abnormal(&with_statuses(&[Normal, Normal]));
        assert_eq!(result, ConsecutiveAbnormal::default());
    }

    #[test]
    fn test_analyze_patterns_composes_detectors() {
        let values: Vec<f64> = (0..30).map(|d| 50.0 + (d % 5) as f64).collect();
        let analysis = PatternDetector::default().analyze_patterns(&daily(&values));

        assert_eq!(analysis.baseline_deviations.len(), 25);
        assert_eq!(
            analysis.significant_deviation_count,
            analysis.baseline_deviations.iter().filter(|d| d.is_significant).count()
        );
        assert_eq!(analysis.seasonal.sample_count, 30);
        assert_eq!(analysis.consecutive_abnormal.count, 0);
    }
}
