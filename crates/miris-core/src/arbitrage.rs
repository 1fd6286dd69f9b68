//! Arbitrage and liquidity-migration estimation
//!
//! Opportunities come from observed prices: the volume-weighted price on
//! each order book and the spot price implied by bonding-curve reserves.
//! Order-book markets are mapped to their token through the deployer feed
//! so both protocols quote the same address.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::feeds::{BondingCurveSync, FeedSnapshot};
use crate::models::{
    AnalysisParams, ArbitrageOpportunity, FlowLink, LiquidityMigration, MigrationDirection,
    PriceQuote, Protocol, ProtocolMigration,
};

/// Share of the gross gap left after fees and slippage
pub const PROFIT_RETENTION: f64 = 0.7;
/// Inflow or outflow must exceed the other side by this factor to count
/// as a migration
pub const MIGRATION_BIAS: f64 = 1.1;
pub const TOP_DESTINATIONS: usize = 5;

// =============================================================================
// Quotes
// =============================================================================

#[derive(Default)]
struct Vwap {
    notional: f64,
    size: f64,
    latest: Option<DateTime<Utc>>,
}

fn order_book_quotes(snapshot: &FeedSnapshot) -> Vec<PriceQuote> {
    let market_tokens: HashMap<&str, &str> = snapshot
        .deployments
        .iter()
        .filter_map(|d| Some((d.market.as_deref()?, d.token.as_deref()?)))
        .collect();

    let mut books: BTreeMap<&str, Vwap> = BTreeMap::new();
    for trade in &snapshot.order_book {
        let (Some(address), Some(size), Some(notional)) =
            (trade.order_book_address.as_deref(), trade.filled_size, trade.notional())
        else {
            continue;
        };
        if size <= 0.0 || notional <= 0.0 {
            continue;
        }

        let book = books.entry(address).or_default();
        book.notional += notional;
        book.size += size;
        book.latest = book.latest.max(trade.timestamp);
    }

    books
        .into_iter()
        .map(|(address, book)| PriceQuote {
            protocol: Protocol::OrderBook,
            token: market_tokens.get(address).copied().unwrap_or(address).to_string(),
            price: book.notional / book.size,
            volume: book.notional,
            timestamp: book.latest,
        })
        .collect()
}

fn bonding_curve_quotes(snapshot: &FeedSnapshot) -> Vec<PriceQuote> {
    let mut latest: BTreeMap<&str, &BondingCurveSync> = BTreeMap::new();
    for sync in &snapshot.curve_syncs {
        let Some(token) = sync.token.as_deref() else {
            continue;
        };
        match latest.get(token) {
            Some(current) if current.timestamp > sync.timestamp => {}
            _ => {
                latest.insert(token, sync);
            }
        }
    }

    latest
        .into_iter()
        .filter_map(|(token, sync)| {
            let price = sync.spot_price().filter(|p| p.is_finite() && *p > 0.0)?;
            Some(PriceQuote {
                protocol: Protocol::Degen,
                token: token.to_string(),
                price,
                volume: sync.reserve_wnative,
                timestamp: sync.timestamp,
            })
        })
        .collect()
}

/// Observed token prices on every protocol that quotes one.
pub fn collect_price_quotes(snapshot: &FeedSnapshot) -> Vec<PriceQuote> {
    let mut quotes = order_book_quotes(snapshot);
    quotes.extend(bonding_curve_quotes(snapshot));
    quotes
}

// =============================================================================
// Opportunities
// =============================================================================

fn opportunity(
    token: &str,
    a: &PriceQuote,
    b: &PriceQuote,
    params: &AnalysisParams,
    now: DateTime<Utc>,
) -> Option<ArbitrageOpportunity> {
    let (cheap, dear) = if a.price <= b.price { (a, b) } else { (b, a) };
    if cheap.price <= 0.0 {
        return None;
    }

    let price_difference_pct = (dear.price - cheap.price) / cheap.price * 100.0;
    if !price_difference_pct.is_finite() || price_difference_pct <= params.min_price_diff_pct {
        return None;
    }

    let volume = cheap.volume.min(dear.volume).max(0.0);
    Some(ArbitrageOpportunity {
        id: format!("arb-{}-{}-{}", token, cheap.protocol, dear.protocol)
            .to_lowercase()
            .replace(' ', "-"),
        source_protocol: cheap.protocol,
        target_protocol: dear.protocol,
        token: token.to_string(),
        price_difference_pct,
        potential_profit: price_difference_pct / 100.0 * volume * PROFIT_RETENTION,
        volume,
        timestamp: cheap.timestamp.max(dear.timestamp).unwrap_or(now),
    })
}

/// Price gaps above the configured threshold between protocols quoting the
/// same token, most profitable first.
pub fn detect_arbitrage_opportunities(
    quotes: &[PriceQuote],
    params: &AnalysisParams,
    now: DateTime<Utc>,
) -> Vec<ArbitrageOpportunity> {
    let mut by_token: BTreeMap<&str, Vec<&PriceQuote>> = BTreeMap::new();
    for quote in quotes {
        by_token.entry(quote.token.as_str()).or_default().push(quote);
    }

    let mut opportunities = Vec::new();
    for (token, quotes) in by_token {
        for (i, a) in quotes.iter().enumerate() {
            for b in &quotes[i + 1..] {
                if a.protocol == b.protocol {
                    continue;
                }
                opportunities.extend(opportunity(token, a, b, params, now));
            }
        }
    }

    opportunities.sort_by(|a, b| b.potential_profit.total_cmp(&a.potential_profit));
    opportunities.truncate(params.arbitrage_top_n);
    tracing::trace!(count = opportunities.len(), "Detected arbitrage opportunities");
    opportunities
}

// =============================================================================
// Liquidity Migration
// =============================================================================

fn migration_direction(inbound: f64, outbound: f64) -> MigrationDirection {
    if inbound > MIGRATION_BIAS * outbound {
        MigrationDirection::Inbound
    } else if outbound > MIGRATION_BIAS * inbound {
        MigrationDirection::Outbound
    } else {
        MigrationDirection::Balanced
    }
}

fn migration_rate(inbound: f64, outbound: f64) -> f64 {
    let max = inbound.max(outbound);
    if max > 0.0 {
        (inbound - outbound).abs() / max
    } else {
        0.0
    }
}

/// Net movement of value per protocol across the flow graph.
pub fn calculate_liquidity_migration(links: &[FlowLink]) -> LiquidityMigration {
    let mut totals: BTreeMap<Protocol, (f64, f64)> = BTreeMap::new();
    for link in links {
        totals.entry(link.target).or_default().0 += link.value;
        totals.entry(link.source).or_default().1 += link.value;
    }

    let protocols: Vec<ProtocolMigration> = totals
        .into_iter()
        .map(|(protocol, (inbound, outbound))| ProtocolMigration {
            protocol,
            inbound,
            outbound,
            direction: migration_direction(inbound, outbound),
            migration_rate: migration_rate(inbound, outbound),
        })
        .collect();

    let mut top_destinations = protocols.clone();
    top_destinations.sort_by(|a, b| b.net().total_cmp(&a.net()));
    top_destinations.truncate(TOP_DESTINATIONS);

    let (direction, migration_rate) = top_destinations
        .first()
        .map(|top| (top.direction, top.migration_rate))
        .unwrap_or((MigrationDirection::Balanced, 0.0));

    LiquidityMigration {
        migration_rate,
        direction,
        top_destinations,
        protocols,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn quote(protocol: Protocol, token: &str, price: f64, volume: f64) -> PriceQuote {
        PriceQuote {
            protocol,
            token: token.to_string(),
            price,
            volume,
            timestamp: None,
        }
    }

    fn link(source: Protocol, target: Protocol, value: f64) -> FlowLink {
        FlowLink {
            source,
            target,
            value,
            token: None,
            timestamp: now(),
        }
    }

    #[test]
    fn test_quotes_from_feeds() {
        let snapshot = FeedSnapshot::from_json_str(
            &json!({
                "orderBook": { "KuruOrderBook_Trade": [
                    { "id": "t1", "orderBookAddress": "0xMARKET", "filledSize": "10", "price": "1" },
                    { "id": "t2", "orderBookAddress": "0xmarket", "filledSize": "30", "price": "2" }
                ]},
                "deployment": { "KuruDeployer_PumpingTime": [
                    { "id": "d1", "token": "0xTOKEN", "market": "0xMarket" }
                ]},
                "degen": { "BondingCurve_Sync": [
                    { "id": "s1", "token": "0xtoken", "reserveToken": "1000000000000000000",
                      "reserveWNative": "1000000000000000000", "db_write_timestamp": "2025-03-09T00:00:00Z" },
                    { "id": "s2", "token": "0xtoken", "reserveToken": "1000000000000000000",
                      "reserveWNative": "2000000000000000000", "db_write_timestamp": "2025-03-10T00:00:00Z" }
                ]}
            })
            .to_string(),
        )
        .unwrap();

        let quotes = collect_price_quotes(&snapshot);
        assert_eq!(quotes.len(), 2);

        let book = quotes.iter().find(|q| q.protocol == Protocol::OrderBook).unwrap();
        assert_eq!(book.token, "0xtoken");
        assert_eq!(book.price, 70.0 / 40.0);
        assert_eq!(book.volume, 70.0);

        let curve = quotes.iter().find(|q| q.protocol == Protocol::Degen).unwrap();
        assert_eq!(curve.price, 2.0);
        assert_eq!(curve.volume, 2.0);
    }

    #[test]
    fn test_opportunity_above_threshold() {
        let quotes = vec![
            quote(Protocol::OrderBook, "0xa", 1.0, 1_000.0),
            quote(Protocol::Degen, "0xa", 1.1, 500.0),
            quote(Protocol::OrderBook, "0xb", 1.0, 1_000.0),
            quote(Protocol::Degen, "0xb", 1.01, 1_000.0),
        ];
        let found = detect_arbitrage_opportunities(&quotes, &AnalysisParams::default(), now());

        assert_eq!(found.len(), 1);
        let opp = &found[0];
        assert_eq!(opp.token, "0xa");
        assert_eq!(opp.source_protocol, Protocol::OrderBook);
        assert_eq!(opp.target_protocol, Protocol::Degen);
        assert_eq!(opp.volume, 500.0);
        assert!((opp.price_difference_pct - 10.0).abs() < 1e-9);
        assert!((opp.potential_profit - 35.0).abs() < 1e-9);
        assert_eq!(opp.id, "arb-0xa-order-book-degen");
        assert_eq!(opp.timestamp, now());
    }

    #[test]
    fn test_opportunities_ranked_and_truncated() {
        let quotes: Vec<PriceQuote> = (1..=15)
            .flat_map(|i| {
                let token = format!("0x{:02}", i);
                [
                    quote(Protocol::OrderBook, &token, 1.0, 100.0 * i as f64),
                    quote(Protocol::Degen, &token, 1.5, 100.0 * i as f64),
                ]
            })
            .collect();
        let found = detect_arbitrage_opportunities(&quotes, &AnalysisParams::default(), now());

        assert_eq!(found.len(), 10);
        assert_eq!(found[0].token, "0x15");
        assert!(found.windows(2).all(|w| w[0].potential_profit >= w[1].potential_profit));
    }

    #[test]
    fn test_same_protocol_quotes_are_not_compared() {
        let quotes = vec![
            quote(Protocol::OrderBook, "0xa", 1.0, 100.0),
            quote(Protocol::OrderBook, "0xa", 2.0, 100.0),
        ];
        assert!(detect_arbitrage_opportunities(&quotes, &AnalysisParams::default(), now()).is_empty());
    }

    #[test]
    fn test_liquidity_migration_inbound() {
        let links = vec![
            link(Protocol::OrderBook, Protocol::Monorail, 100.0),
            link(Protocol::Monorail, Protocol::OrderBook, 20.0),
        ];
        let migration = calculate_liquidity_migration(&links);

        assert_eq!(migration.direction, MigrationDirection::Inbound);
        assert!((migration.migration_rate - 0.8).abs() < 1e-12);
        assert_eq!(migration.top_destinations[0].protocol, Protocol::Monorail);

        let source = migration
            .protocols
            .iter()
            .find(|p| p.protocol == Protocol::OrderBook)
            .unwrap();
        assert_eq!(source.direction, MigrationDirection::Outbound);
    }

    #[test]
    fn test_liquidity_migration_balanced_and_empty() {
        let links = vec![
            link(Protocol::OrderBook, Protocol::Monorail, 100.0),
            link(Protocol::Monorail, Protocol::OrderBook, 105.0),
        ];
        let migration = calculate_liquidity_migration(&links);
        assert!(migration.protocols.iter().all(|p| p.direction == MigrationDirection::Balanced));

        let empty = calculate_liquidity_migration(&[]);
        assert_eq!(empty.direction, MigrationDirection::Balanced);
        assert_eq!(empty.migration_rate, 0.0);
        assert!(empty.top_destinations.is_empty());
    }
}
