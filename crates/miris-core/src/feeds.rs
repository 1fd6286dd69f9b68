//! Typed feed records and per-feed adapters
//!
//! Indexer responses arrive as named-array bags such as
//! `{ "KuruOrderBook_Trade": [...] }`, with numbers encoded as strings and
//! fields that may be missing or null. This module is the only place that
//! looks at that raw shape. Each feed gets an explicit adapter that maps its
//! named array into typed records, defaulting malformed fields centrally so
//! the analysis modules never parse strings themselves.

use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MirisError, MirisResult};
use crate::format::DEFAULT_DECIMALS;

/// Field holding the indexer write time on every feed record
pub const WRITE_TIMESTAMP_KEY: &str = "db_write_timestamp";

pub const ORDER_BOOK_TRADE_FEED: &str = "KuruOrderBook_Trade";
pub const RELAYER_DELIVERY_FEED: &str = "WormholeRelayer_Delivery";
pub const STAKING_CANDLE_FEED: &str = "AprMonTVL1D";
pub const BONDING_CURVE_SYNC_FEED: &str = "BondingCurve_Sync";
pub const PAIR_SYNC_FEED: &str = "UniswapV2Pair_Sync";
pub const MONORAIL_POOL_FEED: &str = "Pool";
pub const DEPLOYMENT_FEED: &str = "KuruDeployer_PumpingTime";

// =============================================================================
// Field parsing
// =============================================================================

/// Read a JSON number or numeric string. Non-finite values are rejected.
pub fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Parse a timestamp string. Strings without a zone suffix are UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Read a timestamp from a JSON value: a date string, or unix seconds or
/// milliseconds.
pub fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s).or_else(|| {
            s.trim()
                .parse::<i64>()
                .ok()
                .and_then(timestamp_from_unix)
        }),
        Value::Number(n) => n.as_i64().and_then(timestamp_from_unix),
        _ => None,
    }
}

fn timestamp_from_unix(n: i64) -> Option<DateTime<Utc>> {
    // Anything past year 5138 in seconds is taken as milliseconds
    if n.abs() < 100_000_000_000 {
        DateTime::<Utc>::from_timestamp(n, 0)
    } else {
        DateTime::<Utc>::from_timestamp_millis(n)
    }
}

/// Convert a fixed-point integer string scaled by `10^decimals` to a float.
///
/// Uses exact decimal arithmetic when the value fits, falling back to
/// floating point for inputs outside the decimal range.
pub fn scale_amount(raw: &str, decimals: u32) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(mut d) = Decimal::from_str(raw) {
        if let Some(scale) = d.scale().checked_add(decimals) {
            if d.set_scale(scale).is_ok() {
                return d.to_f64();
            }
        }
    }

    descale(raw.parse::<f64>().ok()?, decimals)
}

/// Float division by `10^decimals`. Exponents past `i32` scale to zero.
fn descale(n: f64, decimals: u32) -> Option<f64> {
    let scaled = match i32::try_from(decimals) {
        Ok(exp) => n / 10f64.powi(exp),
        Err(_) => n * 0.0,
    };
    scaled.is_finite().then_some(scaled)
}

fn scale_value(value: &Value, decimals: u32) -> Option<f64> {
    match value {
        Value::String(s) => scale_amount(s, decimals),
        Value::Number(n) => descale(n.as_f64()?, decimals),
        _ => None,
    }
}

fn string_field(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        // Nested entity references such as `token0 { id }`
        Value::Object(obj) => obj
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string()),
        _ => None,
    }
}

/// Token and contract addresses compare case-insensitively.
fn address_field(record: &Value, key: &str) -> Option<String> {
    string_field(record, key).map(|s| s.to_lowercase())
}

fn number_field(record: &Value, key: &str) -> Option<f64> {
    record.get(key).and_then(parse_number)
}

fn wei_field(record: &Value, key: &str) -> f64 {
    record
        .get(key)
        .and_then(|v| scale_value(v, DEFAULT_DECIMALS))
        .unwrap_or(0.0)
}

fn bool_field(record: &Value, key: &str) -> Option<bool> {
    match record.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn write_timestamp(record: &Value) -> Option<DateTime<Utc>> {
    record
        .get(WRITE_TIMESTAMP_KEY)
        .or_else(|| record.get("timestamp"))
        .and_then(parse_timestamp_value)
}

fn record_id(record: &Value) -> String {
    string_field(record, "id").unwrap_or_default()
}

// =============================================================================
// Locating feed arrays
// =============================================================================

/// Records of a named feed inside a GraphQL response.
///
/// Accepts the bag itself (`{ "Feed": [...] }`), the full GraphQL envelope
/// (`{ "data": { "Feed": [...] } }`) or a bare array of records.
pub fn feed_records<'a>(response: &'a Value, feed: &str) -> &'a [Value] {
    match response {
        Value::Array(records) => records,
        Value::Object(_) => named_feed_records(response, feed),
        _ => &[],
    }
}

/// Like [`feed_records`] but only accepts named bags. Used for responses
/// that carry several feeds, where a bare array would be ambiguous.
pub fn named_feed_records<'a>(response: &'a Value, feed: &str) -> &'a [Value] {
    let bag = match response.get("data") {
        Some(data @ Value::Object(_)) => data,
        _ => response,
    };

    bag.get(feed)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn adapt<T>(feed: &str, records: &[Value], parse: fn(&Value) -> Option<T>) -> Vec<T> {
    let parsed: Vec<T> = records.iter().filter_map(parse).collect();
    let dropped = records.len() - parsed.len();
    if dropped > 0 {
        tracing::debug!(feed = %feed, dropped, "Dropped non-object feed records");
    }
    parsed
}

// =============================================================================
// Typed records
// =============================================================================

/// A fill on a Kuru order book
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookTrade {
    pub id: String,
    pub order_book_address: Option<String>,
    pub filled_size: Option<f64>,
    pub price: Option<f64>,
    pub is_buy: Option<bool>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl OrderBookTrade {
    pub fn from_record(record: &Value) -> Option<Self> {
        record.as_object()?;
        Some(Self {
            id: record_id(record),
            order_book_address: address_field(record, "orderBookAddress"),
            filled_size: number_field(record, "filledSize"),
            price: number_field(record, "price"),
            is_buy: bool_field(record, "isBuy"),
            timestamp: write_timestamp(record),
        })
    }

    /// Traded value, `filled_size * price`, when both are known
    pub fn notional(&self) -> Option<f64> {
        let value = self.filled_size? * self.price?;
        value.is_finite().then_some(value)
    }
}

/// A cross-chain delivery executed by the Wormhole relayer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayerDelivery {
    pub id: String,
    pub recipient_contract: Option<String>,
    pub gas_used: u64,
    pub source_chain: Option<String>,
    pub status: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl RelayerDelivery {
    pub fn from_record(record: &Value) -> Option<Self> {
        record.as_object()?;
        let gas_used = number_field(record, "gasUsed")
            .filter(|g| *g > 0.0)
            .map(|g| g.trunc() as u64)
            .unwrap_or(0);

        Some(Self {
            id: record_id(record),
            recipient_contract: address_field(record, "recipientContract"),
            gas_used,
            source_chain: string_field(record, "sourceChain"),
            status: string_field(record, "status"),
            timestamp: write_timestamp(record),
        })
    }

    /// Gas used scaled down to a coarse value proxy.
    ///
    /// Gas is not a financial volume; this is only a relative activity
    /// measure for cross-chain traffic.
    pub fn volume_proxy(&self) -> f64 {
        self.gas_used as f64 / 1e6
    }
}

/// A daily candle of the aprMON staking TVL
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakingCandle {
    pub id: String,
    /// Close value, already scaled from 18 decimals
    pub close: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl StakingCandle {
    pub fn from_record(record: &Value) -> Option<Self> {
        record.as_object()?;
        Some(Self {
            id: record_id(record),
            close: record.get("c").and_then(|v| scale_value(v, DEFAULT_DECIMALS)),
            timestamp: write_timestamp(record),
        })
    }
}

/// Reserve update on a nad.fun bonding curve
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BondingCurveSync {
    pub id: String,
    pub token: Option<String>,
    pub reserve_token: f64,
    pub reserve_wnative: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl BondingCurveSync {
    pub fn from_record(record: &Value) -> Option<Self> {
        record.as_object()?;
        Some(Self {
            id: record_id(record),
            token: address_field(record, "token"),
            reserve_token: wei_field(record, "reserveToken"),
            reserve_wnative: wei_field(record, "reserveWNative"),
            timestamp: write_timestamp(record),
        })
    }

    pub fn reserves(&self) -> f64 {
        self.reserve_token + self.reserve_wnative
    }

    /// Token price in wrapped native units implied by the reserves
    pub fn spot_price(&self) -> Option<f64> {
        (self.reserve_token > 0.0).then(|| self.reserve_wnative / self.reserve_token)
    }
}

/// Reserve update on a Uniswap V2 style pair
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairSync {
    pub id: String,
    pub pair: Option<String>,
    pub reserve0: f64,
    pub reserve1: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

impl PairSync {
    pub fn from_record(record: &Value) -> Option<Self> {
        record.as_object()?;
        Some(Self {
            id: record_id(record),
            pair: address_field(record, "pair"),
            reserve0: wei_field(record, "reserve0"),
            reserve1: wei_field(record, "reserve1"),
            timestamp: write_timestamp(record),
        })
    }

    pub fn reserves(&self) -> f64 {
        self.reserve0 + self.reserve1
    }
}

/// A Monorail aggregator pool
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonorailPool {
    pub id: String,
    pub token0: Option<String>,
    pub token1: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl MonorailPool {
    pub fn from_record(record: &Value) -> Option<Self> {
        record.as_object()?;
        Some(Self {
            id: record_id(record),
            token0: address_field(record, "token0"),
            token1: address_field(record, "token1"),
            timestamp: write_timestamp(record),
        })
    }

    pub fn contains(&self, token: &str) -> bool {
        self.token0.as_deref() == Some(token) || self.token1.as_deref() == Some(token)
    }
}

/// A token launched through the Kuru deployer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDeployment {
    pub id: String,
    pub token: Option<String>,
    pub dev: Option<String>,
    pub market: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl TokenDeployment {
    pub fn from_record(record: &Value) -> Option<Self> {
        record.as_object()?;
        Some(Self {
            id: record_id(record),
            token: address_field(record, "token"),
            dev: address_field(record, "dev"),
            market: address_field(record, "market"),
            timestamp: write_timestamp(record),
        })
    }
}

// =============================================================================
// Adapters
// =============================================================================

pub fn order_book_trades(response: &Value) -> Vec<OrderBookTrade> {
    let records = feed_records(response, ORDER_BOOK_TRADE_FEED);
    adapt(ORDER_BOOK_TRADE_FEED, records, OrderBookTrade::from_record)
}

pub fn relayer_deliveries(response: &Value) -> Vec<RelayerDelivery> {
    let records = feed_records(response, RELAYER_DELIVERY_FEED);
    adapt(RELAYER_DELIVERY_FEED, records, RelayerDelivery::from_record)
}

pub fn staking_candles(response: &Value) -> Vec<StakingCandle> {
    let records = feed_records(response, STAKING_CANDLE_FEED);
    adapt(STAKING_CANDLE_FEED, records, StakingCandle::from_record)
}

/// Bonding-curve syncs from the degen bag. Requires the named feed.
pub fn bonding_curve_syncs(response: &Value) -> Vec<BondingCurveSync> {
    let records = named_feed_records(response, BONDING_CURVE_SYNC_FEED);
    adapt(BONDING_CURVE_SYNC_FEED, records, BondingCurveSync::from_record)
}

/// Pair syncs from the degen bag. Requires the named feed.
pub fn pair_syncs(response: &Value) -> Vec<PairSync> {
    let records = named_feed_records(response, PAIR_SYNC_FEED);
    adapt(PAIR_SYNC_FEED, records, PairSync::from_record)
}

pub fn monorail_pools(response: &Value) -> Vec<MonorailPool> {
    let records = feed_records(response, MONORAIL_POOL_FEED);
    adapt(MONORAIL_POOL_FEED, records, MonorailPool::from_record)
}

pub fn token_deployments(response: &Value) -> Vec<TokenDeployment> {
    let records = feed_records(response, DEPLOYMENT_FEED);
    adapt(DEPLOYMENT_FEED, records, TokenDeployment::from_record)
}

// =============================================================================
// Snapshots
// =============================================================================

/// Raw responses for every feed the analysis layer consumes.
///
/// Each field holds whatever the upstream query returned: a named bag, a
/// GraphQL envelope, a bare array, or nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFeeds {
    #[serde(default)]
    pub order_book: Value,
    #[serde(default)]
    pub interoperability: Value,
    #[serde(default)]
    pub staking: Value,
    #[serde(default)]
    pub degen: Value,
    #[serde(default)]
    pub monorail: Value,
    #[serde(default)]
    pub deployment: Value,
}

impl RawFeeds {
    fn entries(&self) -> [(&'static str, &Value); 6] {
        [
            ("orderBook", &self.order_book),
            ("interoperability", &self.interoperability),
            ("staking", &self.staking),
            ("degen", &self.degen),
            ("monorail", &self.monorail),
            ("deployment", &self.deployment),
        ]
    }

    /// Reject feeds that are neither absent, an object, nor an array.
    pub fn validate(&self) -> MirisResult<()> {
        for (name, value) in self.entries() {
            match value {
                Value::Null | Value::Object(_) | Value::Array(_) => {}
                other => {
                    return Err(MirisError::InvalidFeed {
                        feed: name.to_string(),
                        reason: format!("expected an object or array, got {}", json_kind(other)),
                    })
                }
            }
        }
        if let Value::Array(_) = self.degen {
            return Err(MirisError::InvalidFeed {
                feed: "degen".to_string(),
                reason: format!(
                    "expected a bag with {} and {} arrays",
                    BONDING_CURVE_SYNC_FEED, PAIR_SYNC_FEED
                ),
            });
        }
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Typed records of every feed, taken together at one point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub order_book: Vec<OrderBookTrade>,
    pub deliveries: Vec<RelayerDelivery>,
    pub staking: Vec<StakingCandle>,
    pub curve_syncs: Vec<BondingCurveSync>,
    pub pair_syncs: Vec<PairSync>,
    pub pools: Vec<MonorailPool>,
    pub deployments: Vec<TokenDeployment>,
}

impl FeedSnapshot {
    pub fn from_raw(raw: &RawFeeds) -> Self {
        let snapshot = Self {
            order_book: order_book_trades(&raw.order_book),
            deliveries: relayer_deliveries(&raw.interoperability),
            staking: staking_candles(&raw.staking),
            curve_syncs: bonding_curve_syncs(&raw.degen),
            pair_syncs: pair_syncs(&raw.degen),
            pools: monorail_pools(&raw.monorail),
            deployments: token_deployments(&raw.deployment),
        };

        tracing::debug!(
            trades = snapshot.order_book.len(),
            deliveries = snapshot.deliveries.len(),
            staking = snapshot.staking.len(),
            curve_syncs = snapshot.curve_syncs.len(),
            pair_syncs = snapshot.pair_syncs.len(),
            pools = snapshot.pools.len(),
            deployments = snapshot.deployments.len(),
            "Adapted feed snapshot"
        );

        snapshot
    }

    /// Parse a JSON document holding [`RawFeeds`].
    pub fn from_json_str(json: &str) -> MirisResult<Self> {
        let raw: RawFeeds = serde_json::from_str(json)?;
        raw.validate()?;
        Ok(Self::from_raw(&raw))
    }

    pub fn is_empty(&self) -> bool {
        self.order_book.is_empty()
            && self.deliveries.is_empty()
            && self.staking.is_empty()
            && self.curve_syncs.is_empty()
            && self.pair_syncs.is_empty()
            && self.pools.is_empty()
            && self.deployments.is_empty()
    }

    /// The snapshot as it would have looked at `cutoff`.
    ///
    /// Records without a timestamp are kept, since their write time is
    /// unknown.
    pub fn as_of(&self, cutoff: DateTime<Utc>) -> Self {
        fn keep<T: Clone>(records: &[T], ts: fn(&T) -> Option<DateTime<Utc>>, cutoff: DateTime<Utc>) -> Vec<T> {
            records
                .iter()
                .filter(|r| ts(r).map_or(true, |t| t <= cutoff))
                .cloned()
                .collect()
        }

        Self {
            order_book: keep(&self.order_book, |r| r.timestamp, cutoff),
            deliveries: keep(&self.deliveries, |r| r.timestamp, cutoff),
            staking: keep(&self.staking, |r| r.timestamp, cutoff),
            curve_syncs: keep(&self.curve_syncs, |r| r.timestamp, cutoff),
            pair_syncs: keep(&self.pair_syncs, |r| r.timestamp, cutoff),
            pools: keep(&self.pools, |r| r.timestamp, cutoff),
            deployments: keep(&self.deployments, |r| r.timestamp, cutoff),
        }
    }
}
