//! Derived data models for the analytics layer
//!
//! Every structure here is produced fresh by a pure function of its inputs
//! and owned by whoever asked for it. Nothing carries identity beyond the
//! `id` fields supplied by upstream feeds.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MirisError, MirisResult};

// =============================================================================
// Protocols
// =============================================================================

/// A protocol category tracked by the volume aggregator and flow graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    #[serde(rename = "Order Book")]
    OrderBook,
    #[serde(rename = "Cross-Chain")]
    CrossChain,
    #[serde(rename = "Degen")]
    Degen,
    #[serde(rename = "Monorail")]
    Monorail,
    #[serde(rename = "External")]
    External,
}

impl Protocol {
    pub const ALL: [Protocol; 5] = [
        Protocol::OrderBook,
        Protocol::CrossChain,
        Protocol::Degen,
        Protocol::Monorail,
        Protocol::External,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Protocol::OrderBook => "Order Book",
            Protocol::CrossChain => "Cross-Chain",
            Protocol::Degen => "Degen",
            Protocol::Monorail => "Monorail",
            Protocol::External => "External",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Protocol volume estimates keyed by protocol. Always holds every key.
pub type ProtocolVolumes = BTreeMap<Protocol, f64>;

// =============================================================================
// Time Series
// =============================================================================

/// A single observation in a time series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimePoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl TimePoint {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

// =============================================================================
// Flow Graph
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Source,
    Destination,
    Intermediate,
}

/// One node per protocol in the flow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowNode {
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
    /// Aggregated volume for the protocol
    pub value: f64,
    #[serde(rename = "type")]
    pub kind: NodeKind,
}

/// An inferred value transfer between two protocols sharing a token.
///
/// Several links may connect the same pair, one per shared token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowLink {
    pub source: Protocol,
    pub target: Protocol,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolFlow {
    pub nodes: Vec<FlowNode>,
    pub links: Vec<FlowLink>,
    pub total_volume: f64,
    pub timeframe: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DominantFlow {
    pub from: Protocol,
    pub to: Protocol,
    /// Share of total link volume, in percent
    pub share: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowPatterns {
    pub dominant: Vec<DominantFlow>,
    /// Protocols whose inflow exceeds twice their outflow
    pub bottlenecks: Vec<Protocol>,
    /// Protocols whose outflow exceeds twice their inflow
    pub hubs: Vec<Protocol>,
}

// =============================================================================
// Arbitrage & Migration
// =============================================================================

/// A price observation for a token on one protocol
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    pub protocol: Protocol,
    pub token: String,
    pub price: f64,
    /// Volume backing the quote, used to size opportunities
    pub volume: f64,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrageOpportunity {
    pub id: String,
    /// Protocol to buy on (cheaper side)
    pub source_protocol: Protocol,
    /// Protocol to sell on
    pub target_protocol: Protocol,
    pub token: String,
    pub price_difference_pct: f64,
    pub potential_profit: f64,
    pub volume: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationDirection {
    Inbound,
    Outbound,
    Balanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolMigration {
    pub protocol: Protocol,
    pub inbound: f64,
    pub outbound: f64,
    pub direction: MigrationDirection,
    pub migration_rate: f64,
}

impl ProtocolMigration {
    /// Net inflow (inbound minus outbound)
    pub fn net(&self) -> f64 {
        self.inbound - self.outbound
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityMigration {
    /// Rate of the top destination
    pub migration_rate: f64,
    /// Direction of the top destination
    pub direction: MigrationDirection,
    /// Up to five protocols ordered by net inflow
    pub top_destinations: Vec<ProtocolMigration>,
    pub protocols: Vec<ProtocolMigration>,
}

// =============================================================================
// Temporal Patterns
// =============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Daily,
    Weekly,
    Seasonal,
    Anomaly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalPattern {
    #[serde(rename = "type")]
    pub kind: PatternKind,
    pub description: String,
    /// Confidence score (0-100)
    pub confidence: f64,
    pub start_time: String,
    pub end_time: String,
    pub metrics: BTreeMap<String, f64>,
}

impl TemporalPattern {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternCorrelation {
    pub metric1: String,
    pub metric2: String,
    pub correlation: f64,
    pub significance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternPrediction {
    pub metric: String,
    pub predicted_value: f64,
    /// Confidence score (0-100)
    pub confidence: f64,
    pub timeframe: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternAnalysis {
    pub patterns: Vec<TemporalPattern>,
    pub anomalies: Vec<TemporalPattern>,
    pub correlations: Vec<PatternCorrelation>,
    pub predictions: Vec<PatternPrediction>,
}

// =============================================================================
// TVL
// =============================================================================

/// A source of locked value in the TVL breakdown
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TvlSource {
    Staking,
    Pools,
    Degen,
    Monorail,
}

impl TvlSource {
    pub const ALL: [TvlSource; 4] = [
        TvlSource::Staking,
        TvlSource::Pools,
        TvlSource::Degen,
        TvlSource::Monorail,
    ];

    /// Display label used in percentage breakdowns
    pub fn label(&self) -> &'static str {
        match self {
            TvlSource::Staking => "Staking",
            TvlSource::Pools => "Order Book",
            TvlSource::Degen => "Degen",
            TvlSource::Monorail => "Monorail",
        }
    }
}

/// One day of TVL history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TvlData {
    #[serde(rename = "stakingTVL")]
    pub staking_tvl: f64,
    #[serde(rename = "poolTVL")]
    pub pool_tvl: f64,
    #[serde(rename = "degenTVL")]
    pub degen_tvl: f64,
    #[serde(rename = "monorailTVL")]
    pub monorail_tvl: f64,
    pub total: f64,
    /// Calendar day, `YYYY-MM-DD`
    pub timestamp: String,
}

impl TvlData {
    pub fn value(&self, source: TvlSource) -> f64 {
        match source {
            TvlSource::Staking => self.staking_tvl,
            TvlSource::Pools => self.pool_tvl,
            TvlSource::Degen => self.degen_tvl,
            TvlSource::Monorail => self.monorail_tvl,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TvlShare {
    pub protocol: String,
    pub value: f64,
    /// Share of total TVL, in percent
    pub percentage: f64,
    pub change_24h: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedTvl {
    pub total: f64,
    pub breakdown: BTreeMap<TvlSource, f64>,
    pub percentages: Vec<TvlShare>,
    pub time_series: Vec<TvlData>,
    #[serde(rename = "totalChange24h")]
    pub total_change_24h_pct: f64,
}

// =============================================================================
// Data Quality
// =============================================================================

/// Feed quality scores, each rounded into 0-100
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataQuality {
    pub completeness: f64,
    pub freshness: f64,
    pub consistency: f64,
}

// =============================================================================
// Analysis Parameters
// =============================================================================

/// Tunables shared by the analysis entry points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisParams {
    /// Z-score magnitude above which a point is anomalous
    pub anomaly_threshold: f64,
    pub moving_average_window: usize,
    /// Days of TVL history to generate
    pub tvl_days: u32,
    /// Number of arbitrage opportunities kept after ranking
    pub arbitrage_top_n: usize,
    /// Minimum price gap, in percent, for an arbitrage candidate
    pub min_price_diff_pct: f64,
    /// How far apart two feed records may be and still count as the same flow
    pub flow_match_window_secs: i64,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            anomaly_threshold: 2.0,
            moving_average_window: 7,
            tvl_days: 30,
            arbitrage_top_n: 10,
            min_price_diff_pct: 2.0,
            flow_match_window_secs: 3600,
        }
    }
}

impl AnalysisParams {
    pub fn validate(&self) -> MirisResult<()> {
        if self.anomaly_threshold.is_nan() || self.anomaly_threshold <= 0.0 {
            return Err(MirisError::InvalidParameter(format!(
                "anomaly_threshold must be positive, got {}",
                self.anomaly_threshold
            )));
        }
        if self.moving_average_window == 0 {
            return Err(MirisError::InvalidParameter(
                "moving_average_window must be at least 1".into(),
            ));
        }
        if self.tvl_days > 365 {
            return Err(MirisError::InvalidParameter(format!(
                "tvl_days must be at most 365, got {}",
                self.tvl_days
            )));
        }
        if self.min_price_diff_pct < 0.0 {
            return Err(MirisError::InvalidParameter(
                "min_price_diff_pct cannot be negative".into(),
            ));
        }
        if self.flow_match_window_secs < 0 {
            return Err(MirisError::InvalidParameter(
                "flow_match_window_secs cannot be negative".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_serializes_as_display_name() {
        let json = serde_json::to_string(&Protocol::OrderBook).unwrap();
        assert_eq!(json, "\"Order Book\"");

        let mut volumes = ProtocolVolumes::new();
        volumes.insert(Protocol::CrossChain, 1.5);
        let json = serde_json::to_string(&volumes).unwrap();
        assert_eq!(json, r#"{"Cross-Chain":1.5}"#);
    }

    #[test]
    fn test_default_params_are_valid() {
        assert!(AnalysisParams::default().validate().is_ok());

        let params = AnalysisParams {
            anomaly_threshold: 0.0,
            ..AnalysisParams::default()
        };
        assert!(params.validate().is_err());
    }
}
