//! Time-series extraction
//!
//! Turns feed records into ascending `(timestamp, value)` sequences.
//!
//! Policy: points whose value is NaN or not strictly positive are dropped.
//! Zero ticks and unparseable values are indexer noise (empty candles,
//! placeholder rows) and would otherwise drag means down and inflate
//! seasonal ratios. Points without a usable timestamp are dropped too.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::feeds::{parse_number, parse_timestamp_value, OrderBookTrade, StakingCandle};
use crate::models::TimePoint;

pub use crate::feeds::WRITE_TIMESTAMP_KEY as DEFAULT_TIMESTAMP_KEY;

/// Extract a sorted time series from raw records.
///
/// `value_key` names the numeric field (number or numeric string),
/// `timestamp_key` the time field, usually [`DEFAULT_TIMESTAMP_KEY`].
pub fn extract_time_series(records: &[Value], value_key: &str, timestamp_key: &str) -> Vec<TimePoint> {
    let points = records.iter().filter_map(|record| {
        let timestamp = record.get(timestamp_key).and_then(parse_timestamp_value)?;
        let value = record.get(value_key).and_then(parse_number)?;
        Some((timestamp, value))
    });
    collect_series(points)
}

/// Apply the extraction policy to arbitrary `(timestamp, value)` pairs.
pub fn collect_series<I>(points: I) -> Vec<TimePoint>
where
    I: IntoIterator<Item = (DateTime<Utc>, f64)>,
{
    let mut series: Vec<TimePoint> = points
        .into_iter()
        .filter(|(_, value)| !value.is_nan() && *value > 0.0)
        .map(|(timestamp, value)| TimePoint::new(timestamp, value))
        .collect();

    // Stable, so records written at the same instant keep feed order
    series.sort_by_key(|p| p.timestamp);
    series
}

/// Staking TVL close values over time
pub fn staking_series(candles: &[StakingCandle]) -> Vec<TimePoint> {
    collect_series(
        candles
            .iter()
            .filter_map(|c| Some((c.timestamp?, c.close?))),
    )
}

/// Order-book notional per trade over time
pub fn order_book_volume_series(trades: &[OrderBookTrade]) -> Vec<TimePoint> {
    collect_series(
        trades
            .iter()
            .filter_map(|t| Some((t.timestamp?, t.notional()?))),
    )
}

pub fn values(series: &[TimePoint]) -> Vec<f64> {
    series.iter().map(|p| p.value).collect()
}
