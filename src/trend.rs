//! Trend calculation
//!
//! Pure functions over a single biomarker's value series:
//! - Least-squares regression of value against time (direction + confidence)
//! - Linear rate of change between the first and last measurement
//! - Descriptive statistics

use crate::error::AnalysisError;
use crate::types::{
    DirectionAnalysis, RateOfChange, TrendAnalysisResult, TrendDataPoint, TrendDirection,
    TrendStatistics, ValueStatus,
};
use tracing::trace;

/// Milliseconds in one day
pub const MS_PER_DAY: f64 = 86_400_000.0;

/// Slope below this fraction of the mean per 30 days is classified as stable
const STABLE_SLOPE_FRACTION: f64 = 0.05;

/// Window the stable-slope fraction is expressed over (days)
const STABLE_WINDOW_DAYS: f64 = 30.0;

/// Days per month used for monthly extrapolation
const DAYS_PER_MONTH: f64 = 30.0;

/// Confidence bonus per point beyond the first two, and its cap
const POINT_COUNT_BONUS: f64 = 0.05;
const MAX_POINT_COUNT_BONUS: f64 = 0.2;

/// Points ordered oldest first. Sorting is stable so same-day points keep input order.
pub(crate) fn sorted_by_date(points: &[TrendDataPoint]) -> Vec<&TrendDataPoint> {
    let mut sorted: Vec<&TrendDataPoint> = points.iter().collect();
    sorted.sort_by_key(|p| p.date);
    sorted
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let avg = mean(values);
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Means of timestamps (ms) and values
fn means(points: &[TrendDataPoint]) -> (f64, f64) {
    let n = points.len() as f64;
    let x_mean = points.iter().map(|p| p.timestamp_ms()).sum::<f64>() / n;
    let y_mean = points.iter().map(|p| p.value).sum::<f64>() / n;
    (x_mean, y_mean)
}

/// Least-squares slope of value against timestamp, in value units per millisecond.
///
/// Returns 0 for fewer than two points or when every point shares a timestamp.
pub fn calculate_slope(points: &[TrendDataPoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    // Centered form keeps precision with epoch-millisecond magnitudes
    let (x_mean, y_mean) = means(points);
    let mut covariance = 0.0;
    let mut x_variance = 0.0;
    for point in points {
        let dx = point.timestamp_ms() - x_mean;
        covariance += dx * (point.value - y_mean);
        x_variance += dx * dx;
    }

    if x_variance == 0.0 {
        return 0.0;
    }
    covariance / x_variance
}

/// Coefficient of determination of the regression line with the given slope.
///
/// A constant series is fit perfectly by a flat line and scores 1.
pub fn calculate_r_squared(points: &[TrendDataPoint], slope: f64) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    let (x_mean, y_mean) = means(points);
    let mut ss_total = 0.0;
    let mut ss_residual = 0.0;
    for point in points {
        let predicted = y_mean + slope * (point.timestamp_ms() - x_mean);
        ss_total += (point.value - y_mean).powi(2);
        ss_residual += (point.value - predicted).powi(2);
    }

    if ss_total == 0.0 {
        return if ss_residual == 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - ss_residual / ss_total).clamp(0.0, 1.0)
}

/// Classify the series as increasing, decreasing, or stable.
pub fn calculate_trend_direction(points: &[TrendDataPoint]) -> DirectionAnalysis {
    if points.len() < 2 {
        return DirectionAnalysis {
            direction: TrendDirection::InsufficientData,
            confidence: 0.0,
            description: "Not enough data points to determine a trend".to_string(),
        };
    }

    let sorted = sorted_by_date(points);
    let n = sorted.len();
    let slope = calculate_slope(points);
    let r_squared = calculate_r_squared(points, slope);

    let values: Vec<f64> = sorted.iter().map(|p| p.value).collect();
    let stable_threshold =
        STABLE_SLOPE_FRACTION * mean(&values).abs() / (STABLE_WINDOW_DAYS * MS_PER_DAY);

    let direction = if slope == 0.0 || slope.abs() < stable_threshold {
        TrendDirection::Stable
    } else if slope > 0.0 {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };

    let count_bonus = ((n - 2) as f64 * POINT_COUNT_BONUS).min(MAX_POINT_COUNT_BONUS);
    let confidence = (r_squared + count_bonus).min(1.0);

    let first = values[0];
    let last = values[n - 1];
    let verb = match direction {
        TrendDirection::Increasing => Some("increased"),
        TrendDirection::Decreasing => Some("decreased"),
        TrendDirection::Stable | TrendDirection::InsufficientData => None,
    };
    let description = match verb {
        None => format!("Values have remained stable across {} results", n),
        Some(verb) if first != 0.0 => {
            let pct = ((last - first) / first.abs() * 100.0).abs();
            format!("Values have {} by {:.1}% across {} results", verb, pct, n)
        }
        Some(verb) => format!("Values have {} across {} results", verb, n),
    };

    trace!(slope, r_squared, direction = direction.as_str(), "trend direction");

    DirectionAnalysis {
        direction,
        confidence,
        description,
    }
}

/// Linear rate of change from the oldest to the newest point.
///
/// `None` for fewer than two points or when no time elapsed between them.
pub fn calculate_rate_of_change(points: &[TrendDataPoint]) -> Option<RateOfChange> {
    if points.len() < 2 {
        return None;
    }

    let sorted = sorted_by_date(points);
    let first = sorted[0];
    let last = sorted[sorted.len() - 1];

    let elapsed_ms = last.timestamp_ms() - first.timestamp_ms();
    if elapsed_ms <= 0.0 {
        return None;
    }

    let per_ms = (last.value - first.value) / elapsed_ms;
    let per_day = per_ms * MS_PER_DAY;
    let percentage_change = if first.value != 0.0 {
        (last.value - first.value) / first.value.abs() * 100.0
    } else {
        0.0
    };

    Some(RateOfChange {
        per_day,
        per_week: per_day * 7.0,
        per_month: per_day * DAYS_PER_MONTH,
        percentage_change,
        unit: last.unit.clone(),
    })
}

/// Descriptive statistics over the series.
pub fn calculate_statistics(points: &[TrendDataPoint]) -> Result<TrendStatistics, AnalysisError> {
    if points.is_empty() {
        return Err(AnalysisError::EmptyDataSet);
    }

    let by_date = sorted_by_date(points);
    let oldest = by_date[0];
    let latest = by_date[by_date.len() - 1];

    let mut values: Vec<f64> = points.iter().map(|p| p.value).collect();
    values.sort_by(f64::total_cmp);

    let count = values.len();
    let median = if count % 2 == 0 {
        (values[count / 2 - 1] + values[count / 2]) / 2.0
    } else {
        values[count / 2]
    };

    Ok(TrendStatistics {
        min: values[0],
        max: values[count - 1],
        average: mean(&values),
        median,
        standard_deviation: std_dev(&values),
        latest: latest.value,
        latest_date: latest.date,
        oldest: oldest.value,
        oldest_date: oldest.date,
        count,
        unit: latest.unit.clone(),
    })
}

/// Full trend analysis: direction, rate of change, statistics, and status tallies.
pub fn analyze_trend(points: &[TrendDataPoint]) -> Result<TrendAnalysisResult, AnalysisError> {
    let statistics = calculate_statistics(points)?;
    let direction = calculate_trend_direction(points);
    let rate_of_change = calculate_rate_of_change(points);

    let mut normal_count = 0;
    let mut high_count = 0;
    let mut low_count = 0;
    for point in points {
        match point.status_or_unknown() {
            ValueStatus::Normal => normal_count += 1,
            ValueStatus::High => high_count += 1,
            ValueStatus::Low => low_count += 1,
            ValueStatus::Unknown => {}
        }
    }

    Ok(TrendAnalysisResult {
        direction,
        rate_of_change,
        statistics,
        normal_count,
        high_count,
        low_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn date(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    fn point(date: DateTime<Utc>, value: f64) -> TrendDataPoint {
        TrendDataPoint::new(date, value, "mg/dL")
    }

    fn monthly(values: &[f64]) -> Vec<TrendDataPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| point(date(2024, 1 + i as u32, 1), *v))
            .collect()
    }

    #[test]
    fn test_insufficient_data() {
        let empty = calculate_trend_direction(&[]);
        assert_eq!(empty.direction, TrendDirection::InsufficientData);
        assert_eq!(empty.confidence, 0.0);

        let single = calculate_trend_direction(&monthly(&[100.0]));
        assert_eq!(single.direction, TrendDirection::InsufficientData);
        assert_eq!(single.confidence, 0.0);
    }

    #[test]
    fn test_increasing_trend() {
        let points = monthly(&[100.0, 120.0, 140.0, 160.0]);
        let result = calculate_trend_direction(&points);

        assert_eq!(result.direction, TrendDirection::Increasing);
        assert!(result.confidence > 0.5);
        assert!(result.description.contains("60.0%"));
    }

    #[test]
    fn test_decreasing_trend_ignores_input_order() {
        let mut points = monthly(&[160.0, 140.0, 120.0, 100.0]);
        points.reverse();
        let result = calculate_trend_direction(&points);

        assert_eq!(result.direction, TrendDirection::Decreasing);
        assert!(result.description.contains("decreased by 37.5%"));
    }

    #[test]
    fn test_stable_trend() {
        let points = monthly(&[100.0, 101.0, 99.0, 100.0, 100.5]);
        let result = calculate_trend_direction(&points);
        assert_eq!(result.direction, TrendDirection::Stable);
    }

    #[test]
    fn test_constant_series_is_stable_with_full_fit() {
        let points = monthly(&[0.0, 0.0, 0.0]);
        let result = calculate_trend_direction(&points);

        assert_eq!(result.direction, TrendDirection::Stable);
        assert!((result.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_slope_zero_time_variance() {
        let d = date(2024, 3, 1);
        let points = vec![point(d, 10.0), point(d, 20.0)];
        assert_eq!(calculate_slope(&points), 0.0);
    }

    #[test]
    fn test_slope_per_millisecond() {
        let start = date(2024, 1, 1);
        let points = vec![point(start, 0.0), point(start + Duration::days(10), 10.0)];
        let per_day = calculate_slope(&points) * MS_PER_DAY;
        assert!((per_day - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_r_squared_perfect_line() {
        let start = date(2024, 1, 1);
        let points: Vec<_> = (0..5)
            .map(|i| point(start + Duration::days(i * 7), 50.0 + i as f64 * 3.0))
            .collect();
        let slope = calculate_slope(&points);
        assert!((calculate_r_squared(&points, slope) - 1.0).abs() < 1e-9);
        assert_eq!(calculate_r_squared(&points[..1], slope), 0.0);
    }

    #[test]
    fn test_rate_of_change_percentage() {
        let points = vec![point(date(2024, 1, 1), 100.0), point(date(2024, 1, 31), 130.0)];
        let rate = calculate_rate_of_change(&points).unwrap();

        assert!((rate.percentage_change - 30.0).abs() < 1e-9);
        assert!((rate.per_day - 1.0).abs() < 1e-9);
        assert!((rate.per_week - 7.0).abs() < 1e-9);
        assert!((rate.per_month - 30.0).abs() < 1e-9);
        assert_eq!(rate.unit, "mg/dL");
    }

    #[test]
    fn test_rate_of_change_requires_elapsed_time() {
        let d = date(2024, 1, 1);
        assert!(calculate_rate_of_change(&[point(d, 1.0)]).is_none());
        assert!(calculate_rate_of_change(&[point(d, 1.0), point(d, 2.0)]).is_none());
    }

    #[test]
    fn test_statistics() {
        let points = monthly(&[100.0, 120.0, 110.0, 130.0, 115.0]);
        let stats = calculate_statistics(&points).unwrap();

        assert_eq!(stats.min, 100.0);
        assert_eq!(stats.max, 130.0);
        assert!((stats.average - 115.0).abs() < 1e-9);
        assert_eq!(stats.median, 115.0);
        assert_eq!(stats.count, 5);
        assert_eq!(stats.latest, 115.0);
        assert_eq!(stats.oldest, 100.0);
        assert_eq!(stats.latest_date, date(2024, 5, 1));
        // population std dev of the five values
        assert!((stats.standard_deviation - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_statistics_even_median() {
        let stats = calculate_statistics(&monthly(&[4.0, 1.0, 3.0, 2.0])).unwrap();
        assert_eq!(stats.median, 2.5);
    }

    #[test]
    fn test_empty_data_set() {
        assert!(matches!(calculate_statistics(&[]), Err(AnalysisError::EmptyDataSet)));
        assert!(matches!(analyze_trend(&[]), Err(AnalysisError::EmptyDataSet)));
    }

    #[test]
    fn test_analyze_trend_tallies_statuses() {
        let points = vec![
            point(date(2024, 1, 1), 90.0).with_status(ValueStatus::Normal),
            point(date(2024, 2, 1), 110.0).with_status(ValueStatus::High),
            point(date(2024, 3, 1), 120.0).with_status(ValueStatus::High),
            point(date(2024, 4, 1), 60.0).with_status(ValueStatus::Low),
            point(date(2024, 5, 1), 80.0),
        ];
        let analysis = analyze_trend(&points).unwrap();

        assert_eq!(analysis.normal_count, 1);
        assert_eq!(analysis.high_count, 2);
        assert_eq!(analysis.low_count, 1);
        assert!((analysis.abnormal_ratio() - 0.6).abs() < 1e-9);
        assert!(analysis.rate_of_change.is_some());
    }
}
