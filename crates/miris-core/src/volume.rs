//! Per-protocol volume estimates.
//!
//! Each protocol has its own heuristic, and several are coarse proxies
//! rather than financial volumes:
//!
//! - Order Book: sum of `filled_size * price` over trades
//! - Cross-Chain: sum of `gas_used / 1e6` over relayer deliveries
//! - Degen: sum of 18-decimal-scaled reserves over curve and pair syncs
//! - Monorail: pool count times a flat per-pool estimate
//! - External: always zero, it only exists as a flow sink

use crate::feeds::{BondingCurveSync, FeedSnapshot, MonorailPool, OrderBookTrade, PairSync, RelayerDelivery};
use crate::models::{Protocol, ProtocolVolumes};

/// Flat volume estimate per Monorail pool
pub const MONORAIL_VOLUME_PER_POOL: f64 = 10_000.0;

pub fn order_book_volume(trades: &[OrderBookTrade]) -> f64 {
    trades.iter().filter_map(OrderBookTrade::notional).sum()
}

pub fn cross_chain_volume(deliveries: &[RelayerDelivery]) -> f64 {
    deliveries.iter().map(RelayerDelivery::volume_proxy).sum()
}

pub fn reserve_volume(curve_syncs: &[BondingCurveSync], pair_syncs: &[PairSync]) -> f64 {
    let curve: f64 = curve_syncs.iter().map(BondingCurveSync::reserves).sum();
    let pairs: f64 = pair_syncs.iter().map(PairSync::reserves).sum();
    curve + pairs
}

pub fn monorail_volume(pools: &[MonorailPool]) -> f64 {
    pools.len() as f64 * MONORAIL_VOLUME_PER_POOL
}

/// Volume estimate for every known protocol. Every key is always present.
pub fn calculate_protocol_volumes(snapshot: &FeedSnapshot) -> ProtocolVolumes {
    Protocol::ALL
        .iter()
        .map(|&protocol| {
            let volume = match protocol {
                Protocol::OrderBook => order_book_volume(&snapshot.order_book),
                Protocol::CrossChain => cross_chain_volume(&snapshot.deliveries),
                Protocol::Degen => reserve_volume(&snapshot.curve_syncs, &snapshot.pair_syncs),
                Protocol::Monorail => monorail_volume(&snapshot.pools),
                Protocol::External => 0.0,
            };
            (protocol, volume.max(0.0))
        })
        .collect()
}
