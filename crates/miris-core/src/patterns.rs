//! Temporal pattern detection
//!
//! Moving averages, z-score anomalies, daily and weekly seasonality,
//! cross-metric correlation and naive predictions over feed time series.
//! Calendar buckets use UTC.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, Timelike, Utc};

use crate::feeds::FeedSnapshot;
use crate::models::{
    AnalysisParams, PatternAnalysis, PatternCorrelation, PatternKind, PatternPrediction,
    TemporalPattern, TimePoint,
};
use crate::series::{order_book_volume_series, staking_series, values};
use crate::stats::{mean, pearson, volatility};

/// Fewest points for anomaly detection and predictions
pub const MIN_POINTS: usize = 10;
/// Fewest points for weekly seasonality, one full week of hourly data
pub const MIN_WEEKLY_POINTS: usize = 7 * 24;
/// Fewest points on each side of a metric correlation
pub const MIN_CORRELATION_POINTS: usize = 5;

const DAILY_RATIO_THRESHOLD: f64 = 1.5;
const WEEKLY_RATIO_THRESHOLD: f64 = 1.3;
const TREND_WINDOW: usize = 7;
const ANOMALY_NEIGHBOURS: usize = 5;
const PEAK_HORIZON_HOURS: u32 = 6;

const DAY_NAMES: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

// =============================================================================
// Series statistics
// =============================================================================

/// Trailing mean. Windows shrink at the start of the series, and a window
/// of 0 is treated as 1.
pub fn calculate_moving_average(series: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);
    (0..series.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            mean(&series[start..=i])
        })
        .collect()
}

/// Indices whose z-score magnitude exceeds `threshold`.
///
/// Empty below [`MIN_POINTS`] or when the series is constant.
pub fn detect_anomalies(series: &[f64], threshold: f64) -> Vec<usize> {
    if series.len() < MIN_POINTS {
        return Vec::new();
    }

    let mean = mean(series);
    let std_dev = volatility(series);
    if std_dev == 0.0 || !std_dev.is_finite() {
        return Vec::new();
    }

    series
        .iter()
        .enumerate()
        .filter(|(_, value)| ((*value - mean) / std_dev).abs() > threshold)
        .map(|(index, _)| index)
        .collect()
}

/// Pearson correlation over the tail-aligned overlap of two series.
pub fn calculate_time_series_correlation(a: &[f64], b: &[f64]) -> f64 {
    let len = a.len().min(b.len());
    pearson(&a[a.len() - len..], &b[b.len() - len..])
}

// =============================================================================
// Seasonality
// =============================================================================

/// Average per bucket, keyed by bucket number.
fn bucket_averages(points: &[TimePoint], bucket: impl Fn(&DateTime<Utc>) -> u32) -> BTreeMap<u32, f64> {
    let mut sums: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for point in points {
        let entry = sums.entry(bucket(&point.timestamp)).or_default();
        entry.0 += point.value;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(key, (sum, count))| (key, sum / count as f64))
        .collect()
}

/// First highest and first lowest bucket, in bucket order.
fn peak_and_low(averages: &BTreeMap<u32, f64>) -> Option<((u32, f64), (u32, f64))> {
    let mut iter = averages.iter().map(|(&k, &v)| (k, v));
    let first = iter.next()?;
    Some(iter.fold((first, first), |(peak, low), bucket| {
        let peak = if bucket.1 > peak.1 { bucket } else { peak };
        let low = if bucket.1 < low.1 { bucket } else { low };
        (peak, low)
    }))
}

fn daily_pattern(points: &[TimePoint]) -> Option<TemporalPattern> {
    let averages = bucket_averages(points, |ts| ts.hour());
    if averages.len() < 2 {
        return None;
    }

    let ((peak_hour, peak), (low_hour, low)) = peak_and_low(&averages)?;
    if low <= 0.0 || peak <= low * DAILY_RATIO_THRESHOLD {
        return None;
    }
    let ratio = peak / low;

    Some(TemporalPattern {
        kind: PatternKind::Daily,
        description: format!("Peak activity at {}:00, lowest at {}:00", peak_hour, low_hour),
        confidence: ((ratio - 1.0) * 50.0).min(95.0),
        start_time: format!("{}:00", low_hour),
        end_time: format!("{}:00", peak_hour),
        metrics: BTreeMap::from([
            ("peakHour".to_string(), f64::from(peak_hour)),
            ("lowHour".to_string(), f64::from(low_hour)),
            ("ratio".to_string(), ratio),
        ]),
    })
}

fn weekly_pattern(points: &[TimePoint]) -> Option<TemporalPattern> {
    if points.len() < MIN_WEEKLY_POINTS {
        return None;
    }

    let averages = bucket_averages(points, |ts| ts.weekday().num_days_from_sunday());
    let ((peak_day, peak), (low_day, low)) = peak_and_low(&averages)?;
    if low <= 0.0 || peak <= low * WEEKLY_RATIO_THRESHOLD {
        return None;
    }
    let ratio = peak / low;
    let peak_name = DAY_NAMES[peak_day as usize % 7];
    let low_name = DAY_NAMES[low_day as usize % 7];

    Some(TemporalPattern {
        kind: PatternKind::Weekly,
        description: format!("Peak on {}, lowest on {}", peak_name, low_name),
        confidence: ((ratio - 1.0) * 40.0).min(90.0),
        start_time: low_name.to_string(),
        end_time: peak_name.to_string(),
        metrics: BTreeMap::from([
            ("peakDay".to_string(), f64::from(peak_day)),
            ("lowDay".to_string(), f64::from(low_day)),
            ("ratio".to_string(), ratio),
        ]),
    })
}

/// Daily and weekly seasonality over a sorted series.
pub fn detect_seasonal_patterns(points: &[TimePoint]) -> Vec<TemporalPattern> {
    daily_pattern(points)
        .into_iter()
        .chain(weekly_pattern(points))
        .collect()
}

/// Each anomalous point, compared against up to five neighbours on either
/// side.
pub fn detect_anomalous_patterns(points: &[TimePoint], threshold: f64) -> Vec<TemporalPattern> {
    let values = values(points);

    detect_anomalies(&values, threshold)
        .into_iter()
        .map(|index| {
            let point = points[index];
            let before = &values[index.saturating_sub(ANOMALY_NEIGHBOURS)..index];
            let after = &values[index + 1..(index + 1 + ANOMALY_NEIGHBOURS).min(values.len())];
            let neighbours: Vec<f64> = before.iter().chain(after).copied().collect();
            let baseline = mean(&neighbours);

            let deviation = if baseline > 0.0 {
                (point.value - baseline).abs() / baseline * 100.0
            } else {
                100.0
            };
            let direction = if point.value > baseline { "spike" } else { "drop" };
            let at = point.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);

            TemporalPattern {
                kind: PatternKind::Anomaly,
                description: format!("Anomalous {} detected", direction),
                confidence: deviation.min(95.0),
                start_time: at.clone(),
                end_time: at,
                metrics: BTreeMap::from([
                    ("value".to_string(), point.value),
                    ("baseline".to_string(), baseline),
                    ("deviation".to_string(), deviation),
                ]),
            }
        })
        .collect()
}

// =============================================================================
// Correlations
// =============================================================================

/// Number of deployments per UTC day, oldest day first
fn daily_deployment_counts(snapshot: &FeedSnapshot) -> Vec<f64> {
    let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for deployment in &snapshot.deployments {
        if let Some(ts) = deployment.timestamp {
            *counts.entry(ts.date_naive()).or_default() += 1;
        }
    }
    counts.into_values().map(|c| c as f64).collect()
}

fn correlate(
    metric1: &str,
    metric2: &str,
    a: &[f64],
    b: &[f64],
    tiers: (f64, f64, f64, f64, f64),
) -> Option<PatternCorrelation> {
    if a.len() < MIN_CORRELATION_POINTS || b.len() < MIN_CORRELATION_POINTS {
        return None;
    }

    let correlation = calculate_time_series_correlation(a, b);
    let (high, high_sig, mid, mid_sig, low_sig) = tiers;
    let significance = match correlation.abs() {
        r if r > high => high_sig,
        r if r > mid => mid_sig,
        _ => low_sig,
    };

    Some(PatternCorrelation {
        metric1: metric1.to_string(),
        metric2: metric2.to_string(),
        correlation,
        significance,
    })
}

/// Correlations between staking TVL, deployments and order-book volume.
/// Weak correlations (|r| <= 0.1) are dropped.
pub fn find_metric_correlations(snapshot: &FeedSnapshot) -> Vec<PatternCorrelation> {
    let staking = values(&staking_series(&snapshot.staking));
    let volume = values(&order_book_volume_series(&snapshot.order_book));
    let deployments = daily_deployment_counts(snapshot);

    [
        correlate(
            "Staking TVL",
            "Order Book Volume",
            &staking,
            &volume,
            (0.5, 0.95, 0.3, 0.8, 0.5),
        ),
        correlate(
            "Token Deployments",
            "Trading Volume",
            &deployments,
            &volume,
            (0.4, 0.9, 0.2, 0.7, 0.4),
        ),
    ]
    .into_iter()
    .flatten()
    .filter(|c| c.correlation.abs() > 0.1)
    .collect()
}

// =============================================================================
// Predictions
// =============================================================================

fn trend_prediction(values: &[f64]) -> Option<PatternPrediction> {
    let recent = &values[values.len().saturating_sub(TREND_WINDOW)..];
    let (&first, &last) = (recent.first()?, recent.last()?);

    let trend = (last - first) / recent.len() as f64;
    let confidence = if last > 0.0 {
        (100.0 - trend.abs() / last * 100.0).min(80.0).clamp(0.0, 100.0)
    } else {
        0.0
    };

    Some(PatternPrediction {
        metric: "General Trend".to_string(),
        predicted_value: (last + trend).max(0.0),
        confidence,
        timeframe: "Next period".to_string(),
    })
}

/// Hours from `current` until `peak`, wrapping past midnight. A peak at the
/// current hour is a full day away.
fn hours_until(peak: u32, current: u32) -> u32 {
    if peak > current {
        peak - current
    } else {
        24 - current + peak
    }
}

fn peak_prediction(daily: &TemporalPattern, last: f64, now: DateTime<Utc>) -> Option<PatternPrediction> {
    let peak_hour = daily.metric("peakHour")?;
    let ratio = daily.metric("ratio")?;
    if !(0.0..24.0).contains(&peak_hour) || ratio <= 0.0 {
        return None;
    }

    let hours = hours_until(peak_hour as u32, now.hour());
    (hours <= PEAK_HORIZON_HOURS).then(|| PatternPrediction {
        metric: "Daily Peak".to_string(),
        predicted_value: last * ratio.sqrt(),
        confidence: daily.confidence.clamp(0.0, 100.0),
        timeframe: format!("{} hours", hours),
    })
}

/// Trend extrapolation over the last points, plus a projection of the
/// daily peak when it is close. Needs at least [`MIN_POINTS`] points.
pub fn generate_predictions(
    patterns: &[TemporalPattern],
    points: &[TimePoint],
    now: DateTime<Utc>,
) -> Vec<PatternPrediction> {
    if points.len() < MIN_POINTS {
        return Vec::new();
    }

    let values = values(points);
    let last = values.last().copied().unwrap_or(0.0);

    let daily = patterns.iter().find(|p| p.kind == PatternKind::Daily);
    trend_prediction(&values)
        .into_iter()
        .chain(daily.and_then(|d| peak_prediction(d, last, now)))
        .collect()
}

/// Full temporal analysis with staking TVL as the primary series.
pub fn analyze_temporal_patterns(
    snapshot: &FeedSnapshot,
    params: &AnalysisParams,
    now: DateTime<Utc>,
) -> PatternAnalysis {
    let primary = staking_series(&snapshot.staking);

    let patterns = detect_seasonal_patterns(&primary);
    let anomalies = detect_anomalous_patterns(&primary, params.anomaly_threshold);
    let correlations = find_metric_correlations(snapshot);

    let known: Vec<TemporalPattern> = patterns.iter().chain(&anomalies).cloned().collect();
    let predictions = generate_predictions(&known, &primary, now);

    tracing::trace!(
        points = primary.len(),
        patterns = patterns.len(),
        anomalies = anomalies.len(),
        correlations = correlations.len(),
        predictions = predictions.len(),
        "Analyzed temporal patterns"
    );

    PatternAnalysis {
        patterns,
        anomalies,
        correlations,
        predictions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn at_hour(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    fn hourly(values: &[f64]) -> Vec<TimePoint> {
        let start = at_hour(1, 0);
        values
            .iter()
            .enumerate()
            .map(|(i, v)| TimePoint::new(start + Duration::hours(i as i64), *v))
            .collect()
    }

    #[test]
    fn test_moving_average_shrinks_at_start() {
        let ma = calculate_moving_average(&[2.0, 4.0, 6.0, 8.0], 2);
        assert_eq!(ma, vec![2.0, 3.0, 5.0, 7.0]);
        assert_eq!(calculate_moving_average(&[1.0, 3.0], 0), vec![1.0, 3.0]);
        assert!(calculate_moving_average(&[], 3).is_empty());
    }

    #[test]
    fn test_anomalies_need_ten_points() {
        let short = [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 100.0];
        assert!(detect_anomalies(&short, 2.0).is_empty());

        let mut long = vec![10.0; 11];
        long.push(100.0);
        assert_eq!(detect_anomalies(&long, 2.0), vec![11]);
        assert!(detect_anomalies(&[5.0; 12], 2.0).is_empty());
    }

    #[test]
    fn test_daily_pattern() {
        let points: Vec<TimePoint> = [0, 0, 0, 12, 12, 12]
            .iter()
            .zip([10.0, 10.0, 10.0, 100.0, 100.0, 100.0])
            .enumerate()
            .map(|(day, (&hour, value))| TimePoint::new(at_hour(day as u32 + 1, hour), value))
            .collect();

        let patterns = detect_seasonal_patterns(&points);
        assert_eq!(patterns.len(), 1);

        let daily = &patterns[0];
        assert_eq!(daily.kind, PatternKind::Daily);
        assert_eq!(daily.metric("peakHour"), Some(12.0));
        assert_eq!(daily.metric("lowHour"), Some(0.0));
        assert_eq!(daily.metric("ratio"), Some(10.0));
        assert_eq!(daily.confidence, 95.0);
        assert_eq!(daily.start_time, "0:00");
        assert_eq!(daily.end_time, "12:00");
    }

    #[test]
    fn test_flat_series_has_no_seasonality() {
        assert!(detect_seasonal_patterns(&hourly(&[5.0; 200])).is_empty());
        assert!(detect_seasonal_patterns(&[]).is_empty());
    }

    #[test]
    fn test_weekly_pattern() {
        // 2025-03-01 is a Saturday; weekends carry double the weekday value
        let values: Vec<f64> = (0..MIN_WEEKLY_POINTS)
            .map(|i| {
                let weekday = (i / 24 + 6) % 7;
                if weekday == 0 || weekday == 6 {
                    20.0
                } else {
                    10.0
                }
            })
            .collect();
        let patterns = detect_seasonal_patterns(&hourly(&values));

        let weekly = patterns.iter().find(|p| p.kind == PatternKind::Weekly).unwrap();
        assert_eq!(weekly.metric("ratio"), Some(2.0));
        assert_eq!(weekly.metric("peakDay"), Some(0.0));
        assert_eq!(weekly.metric("lowDay"), Some(1.0));
        assert_eq!(weekly.end_time, "Sunday");
        assert!((weekly.confidence - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_anomalous_patterns() {
        let mut values = vec![10.0; 12];
        values[6] = 100.0;
        let patterns = detect_anomalous_patterns(&hourly(&values), 2.0);

        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].kind, PatternKind::Anomaly);
        assert_eq!(patterns[0].description, "Anomalous spike detected");
        assert_eq!(patterns[0].metric("baseline"), Some(10.0));
        assert_eq!(patterns[0].confidence, 95.0);
        assert_eq!(patterns[0].start_time, "2025-03-01T06:00:00.000Z");
    }

    #[test]
    fn test_correlation() {
        let xs = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((calculate_time_series_correlation(&xs, &xs) - 1.0).abs() < 1e-12);
        assert_eq!(calculate_time_series_correlation(&[1.0], &[2.0]), 0.0);
        assert_eq!(calculate_time_series_correlation(&[], &[]), 0.0);

        // Longer series is aligned on its tail
        let longer = [100.0, -3.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((calculate_time_series_correlation(&longer, &xs) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_predictions() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64 * 10.0).collect();
        let points = hourly(&values);
        let now = at_hour(5, 10);

        let predictions = generate_predictions(&[], &points, now);
        assert_eq!(predictions.len(), 1);
        let trend = &predictions[0];
        assert_eq!(trend.metric, "General Trend");
        // Last 7 values run 40..=100, so the trend is 60 / 7 per period
        assert!((trend.predicted_value - (100.0 + 60.0 / 7.0)).abs() < 1e-9);
        assert!(trend.confidence <= 80.0 && trend.confidence >= 0.0);

        assert!(generate_predictions(&[], &points[..9], now).is_empty());
    }

    #[test]
    fn test_peak_prediction_within_horizon() {
        let daily = TemporalPattern {
            kind: PatternKind::Daily,
            description: String::new(),
            confidence: 70.0,
            start_time: "0:00".into(),
            end_time: "14:00".into(),
            metrics: BTreeMap::from([
                ("peakHour".to_string(), 14.0),
                ("lowHour".to_string(), 0.0),
                ("ratio".to_string(), 4.0),
            ]),
        };
        let points = hourly(&[10.0; 10]);

        let close = generate_predictions(std::slice::from_ref(&daily), &points, at_hour(5, 10));
        let peak = close.iter().find(|p| p.metric == "Daily Peak").unwrap();
        assert_eq!(peak.predicted_value, 20.0);
        assert_eq!(peak.timeframe, "4 hours");
        assert_eq!(peak.confidence, 70.0);

        let far = generate_predictions(&[daily], &points, at_hour(5, 14));
        assert!(far.iter().all(|p| p.metric != "Daily Peak"));
    }

    #[test]
    fn test_metric_correlations() {
        let candles: Vec<_> = (1..=6)
            .map(|d| json!({
                "id": d.to_string(),
                "c": format!("{}000000000000000000", d),
                "db_write_timestamp": format!("2025-03-0{}T00:00:00Z", d)
            }))
            .collect();
        let trades: Vec<_> = (1..=6)
            .map(|d| json!({
                "id": format!("t{}", d),
                "filledSize": d.to_string(),
                "price": "2",
                "db_write_timestamp": format!("2025-03-0{}T01:00:00Z", d)
            }))
            .collect();
        let snapshot = FeedSnapshot::from_json_str(
            &json!({
                "staking": { "AprMonTVL1D": candles },
                "orderBook": { "KuruOrderBook_Trade": trades }
            })
            .to_string(),
        )
        .unwrap();

        let correlations = find_metric_correlations(&snapshot);
        assert_eq!(correlations.len(), 1);
        assert_eq!(correlations[0].metric1, "Staking TVL");
        assert!((correlations[0].correlation - 1.0).abs() < 1e-9);
        assert_eq!(correlations[0].significance, 0.95);
    }

    #[test]
    fn test_analyze_empty_snapshot() {
        let analysis = analyze_temporal_patterns(&FeedSnapshot::default(), &AnalysisParams::default(), at_hour(1, 0));
        assert!(analysis.patterns.is_empty());
        assert!(analysis.anomalies.is_empty());
        assert!(analysis.correlations.is_empty());
        assert!(analysis.predictions.is_empty());
    }
}
