//! TVL aggregation
//!
//! Estimates locked value per source from a feed snapshot and replays the
//! snapshot day by day to build a history. Past days see only the records
//! written on or before the end of that day.

use std::collections::BTreeMap;

use chrono::{DateTime, Days, Duration, TimeZone, Utc};

use crate::feeds::{FeedSnapshot, MonorailPool, OrderBookTrade, StakingCandle};
use crate::models::{AggregatedTvl, TvlData, TvlShare, TvlSource};
use crate::stats::{growth_rate, pearson};
use crate::volume::reserve_volume;

/// Trades sampled for the order-book pool estimate
pub const POOL_TRADE_SAMPLE: usize = 100;
pub const POOL_TVL_MULTIPLIER: f64 = 10.0;
pub const MONORAIL_TVL_PER_POOL: f64 = 50_000.0;

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Latest nonzero close of the staking TVL candles
pub fn staking_tvl(candles: &[StakingCandle]) -> f64 {
    candles
        .iter()
        .filter_map(|c| c.close.filter(|close| *close > 0.0).map(|close| (c.timestamp, close)))
        .max_by_key(|(timestamp, _)| *timestamp)
        .map(|(_, close)| close)
        .unwrap_or(0.0)
}

pub fn pool_tvl(trades: &[OrderBookTrade]) -> f64 {
    let sampled: f64 = trades
        .iter()
        .filter_map(OrderBookTrade::notional)
        .take(POOL_TRADE_SAMPLE)
        .sum();
    sampled * POOL_TVL_MULTIPLIER
}

pub fn monorail_tvl(pools: &[MonorailPool]) -> f64 {
    pools.len() as f64 * MONORAIL_TVL_PER_POOL
}

/// Evaluate every estimator over a snapshot, labelled with `day`.
pub fn tvl_point(snapshot: &FeedSnapshot, day: String) -> TvlData {
    let staking_tvl = staking_tvl(&snapshot.staking);
    let pool_tvl = pool_tvl(&snapshot.order_book);
    let degen_tvl = reserve_volume(&snapshot.curve_syncs, &snapshot.pair_syncs);
    let monorail_tvl = monorail_tvl(&snapshot.pools);

    TvlData {
        staking_tvl,
        pool_tvl,
        degen_tvl,
        monorail_tvl,
        total: staking_tvl + pool_tvl + degen_tvl + monorail_tvl,
        timestamp: day,
    }
}

/// One point per day from `now - days` through today, oldest first.
pub fn generate_tvl_time_series(snapshot: &FeedSnapshot, days: u32, now: DateTime<Utc>) -> Vec<TvlData> {
    let today = now.date_naive();

    (0..=days)
        .rev()
        .filter_map(|back| {
            let day = today.checked_sub_days(Days::new(u64::from(back)))?;
            let next_midnight = day.succ_opt()?.and_hms_opt(0, 0, 0)?;
            let end_of_day = Utc.from_utc_datetime(&next_midnight) - Duration::milliseconds(1);
            Some(tvl_point(&snapshot.as_of(end_of_day), day.format(DAY_FORMAT).to_string()))
        })
        .collect()
}

/// Share of total per source, with the 24h change taken from the last two
/// points of `series`.
pub fn calculate_percentages(
    breakdown: &BTreeMap<TvlSource, f64>,
    total: f64,
    series: &[TvlData],
) -> Vec<TvlShare> {
    let last_two = match series {
        [.., prev, last] => Some((prev, last)),
        _ => None,
    };

    TvlSource::ALL
        .iter()
        .map(|&source| {
            let value = breakdown.get(&source).copied().unwrap_or(0.0);
            let percentage = if total > 0.0 { value / total * 100.0 } else { 0.0 };
            let change_24h = last_two
                .map(|(prev, last)| growth_rate(prev.value(source), last.value(source)))
                .unwrap_or(0.0);

            TvlShare {
                protocol: source.label().to_string(),
                value,
                percentage,
                change_24h,
            }
        })
        .collect()
}

pub fn aggregate_tvl(snapshot: &FeedSnapshot, days: u32, now: DateTime<Utc>) -> AggregatedTvl {
    let current = tvl_point(snapshot, now.format(DAY_FORMAT).to_string());
    let breakdown: BTreeMap<TvlSource, f64> = TvlSource::ALL
        .iter()
        .map(|&source| (source, current.value(source)))
        .collect();

    let time_series = generate_tvl_time_series(snapshot, days, now);
    let percentages = calculate_percentages(&breakdown, current.total, &time_series);

    let total_change_24h_pct = match time_series.as_slice() {
        [.., prev, last] => growth_rate(prev.total, last.total),
        _ => 0.0,
    };

    tracing::trace!(
        total = current.total,
        days = time_series.len(),
        change = total_change_24h_pct,
        "Aggregated TVL"
    );

    AggregatedTvl {
        total: current.total,
        breakdown,
        percentages,
        time_series,
        total_change_24h_pct,
    }
}

/// Pearson correlation between two sources across a TVL history.
pub fn calculate_protocol_correlation(series: &[TvlData], a: TvlSource, b: TvlSource) -> f64 {
    let xs: Vec<f64> = series.iter().map(|p| p.value(a)).collect();
    let ys: Vec<f64> = series.iter().map(|p| p.value(b)).collect();
    pearson(&xs, &ys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn snapshot() -> FeedSnapshot {
        FeedSnapshot::from_json_str(
            &json!({
                "staking": { "AprMonTVL1D": [
                    { "id": "c1", "c": "5000000000000000000", "db_write_timestamp": "2025-03-08T00:00:00Z" },
                    { "id": "c2", "c": "7000000000000000000", "db_write_timestamp": "2025-03-09T00:00:00Z" },
                    { "id": "c3", "c": "0", "db_write_timestamp": "2025-03-10T00:00:00Z" }
                ]},
                "orderBook": { "KuruOrderBook_Trade": [
                    { "id": "t1", "filledSize": "10", "price": "2", "db_write_timestamp": "2025-03-09T06:00:00Z" },
                    { "id": "t2", "filledSize": "5", "price": "4", "db_write_timestamp": "2025-03-10T06:00:00Z" }
                ]},
                "monorail": { "Pool": [
                    { "id": "p1" },
                    { "id": "p2", "db_write_timestamp": "2025-03-10T01:00:00Z" }
                ]}
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_staking_uses_latest_nonzero_close() {
        assert_eq!(staking_tvl(&snapshot().staking), 7.0);
        assert_eq!(staking_tvl(&[]), 0.0);
    }

    #[test]
    fn test_pool_tvl_samples_first_trades() {
        let trades: Vec<OrderBookTrade> = (0..150)
            .map(|i| OrderBookTrade {
                id: i.to_string(),
                filled_size: Some(1.0),
                price: Some(1.0),
                ..Default::default()
            })
            .collect();
        assert_eq!(pool_tvl(&trades), 1_000.0);
    }

    #[test]
    fn test_time_series_replays_history() {
        let series = generate_tvl_time_series(&snapshot(), 2, now());
        let days: Vec<_> = series.iter().map(|p| p.timestamp.as_str()).collect();
        assert_eq!(days, vec!["2025-03-08", "2025-03-09", "2025-03-10"]);

        assert_eq!(series[0].staking_tvl, 5.0);
        assert_eq!(series[0].pool_tvl, 0.0);
        assert_eq!(series[0].monorail_tvl, 50_000.0);

        assert_eq!(series[1].staking_tvl, 7.0);
        assert_eq!(series[1].pool_tvl, 200.0);

        assert_eq!(series[2].pool_tvl, 400.0);
        assert_eq!(series[2].monorail_tvl, 100_000.0);
        assert!(series.iter().all(|p| {
            (p.total - TvlSource::ALL.iter().map(|s| p.value(*s)).sum::<f64>()).abs() < 1e-9
        }));
    }

    #[test]
    fn test_aggregate_tvl() {
        let tvl = aggregate_tvl(&snapshot(), 2, now());
        assert_eq!(tvl.total, 7.0 + 400.0 + 100_000.0);
        assert_eq!(tvl.breakdown[&TvlSource::Monorail], 100_000.0);
        assert_eq!(tvl.time_series.len(), 3);

        let pools = tvl.percentages.iter().find(|s| s.protocol == "Order Book").unwrap();
        assert_eq!(pools.change_24h, 100.0);

        let share_sum: f64 = tvl.percentages.iter().map(|s| s.percentage).sum();
        assert!((share_sum - 100.0).abs() < 1e-9);
        assert!(tvl.total_change_24h_pct > 0.0);
    }

    #[test]
    fn test_empty_snapshot() {
        let tvl = aggregate_tvl(&FeedSnapshot::default(), 0, now());
        assert_eq!(tvl.total, 0.0);
        assert_eq!(tvl.time_series.len(), 1);
        assert_eq!(tvl.total_change_24h_pct, 0.0);
        assert!(tvl.percentages.iter().all(|s| s.percentage == 0.0));
    }

    #[test]
    fn test_protocol_correlation() {
        let series = generate_tvl_time_series(&snapshot(), 2, now());
        let r = calculate_protocol_correlation(&series, TvlSource::Pools, TvlSource::Pools);
        assert!((r - 1.0).abs() < 1e-12);
        assert_eq!(
            calculate_protocol_correlation(&series, TvlSource::Degen, TvlSource::Pools),
            0.0
        );
    }
}
