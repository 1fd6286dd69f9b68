use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use miris_core::arbitrage::{calculate_liquidity_migration, collect_price_quotes, detect_arbitrage_opportunities};
use miris_core::flow::{analyze_protocol_flows, calculate_flow_velocity, identify_flow_patterns};
use miris_core::format;
use miris_core::patterns::{analyze_temporal_patterns, calculate_moving_average, detect_anomalies};
use miris_core::quality::{assess_data_quality, quality_records};
use miris_core::series::{extract_time_series, DEFAULT_TIMESTAMP_KEY};
use miris_core::tvl::aggregate_tvl;
use miris_core::volume::calculate_protocol_volumes;
use miris_core::{
    AggregatedTvl, AnalysisParams, ArbitrageOpportunity, DataQuality, FeedSnapshot, FlowPatterns,
    LiquidityMigration, PatternAnalysis, PriceQuote, ProtocolFlow, ProtocolVolumes, RawFeeds,
};

use crate::error::{MirisMcpError, Result};
use crate::snapshot::SharedSnapshot;

/// Window, in hours, the flow velocity is reported over
const FLOW_VELOCITY_HOURS: f64 = 24.0;

// ============================================================================
// MCP Protocol Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

// ============================================================================
// Tool Definitions
// ============================================================================

fn feeds_schema() -> Value {
    json!({
        "type": "object",
        "description": "Raw feeds to analyze instead of the latest snapshot. Each key holds the GraphQL response bag (e.g. {\"KuruOrderBook_Trade\": [...]}) or a bare array of records.",
        "properties": {
            "orderBook": { "description": "KuruOrderBook_Trade records" },
            "interoperability": { "description": "WormholeRelayer_Delivery records" },
            "staking": { "description": "AprMonTVL1D candles" },
            "degen": { "type": "object", "description": "BondingCurve_Sync and UniswapV2Pair_Sync arrays" },
            "monorail": { "description": "Pool records" },
            "deployment": { "description": "KuruDeployer_PumpingTime records" }
        }
    })
}

pub fn get_tools() -> Vec<Tool> {
    vec![
        Tool {
            name: "analyze_protocol_flows".to_string(),
            description: "Build the value-flow graph between Order Book, Monorail and Cross-Chain protocols from shared tokens. Returns nodes with per-protocol volumes, reconciled links, dominant flows, bottlenecks, hubs and flow velocity.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "feeds": feeds_schema(),
                    "match_window_secs": {
                        "type": "integer",
                        "description": "Max seconds between records on two protocols for them to count as the same flow (default: 3600)"
                    }
                }
            }),
        },
        Tool {
            name: "detect_arbitrage".to_string(),
            description: "Compare observed token prices across protocols (order-book VWAP vs bonding-curve spot) and rank price gaps by estimated profit after fees.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "feeds": feeds_schema(),
                    "min_price_diff_pct": {
                        "type": "number",
                        "description": "Minimum price gap in percent (default: 2.0)"
                    },
                    "top_n": {
                        "type": "integer",
                        "description": "Maximum opportunities to return (default: 10)"
                    }
                }
            }),
        },
        Tool {
            name: "calculate_liquidity_migration".to_string(),
            description: "Sum inbound and outbound flow per protocol and report where liquidity is migrating.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "feeds": feeds_schema()
                }
            }),
        },
        Tool {
            name: "aggregate_tvl".to_string(),
            description: "Estimate TVL per source (staking, order book, degen, Monorail) with percentage breakdown, 24h changes and a daily history.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "feeds": feeds_schema(),
                    "days": {
                        "type": "integer",
                        "description": "Days of history to generate (default: 30, max: 365)"
                    }
                }
            }),
        },
        Tool {
            name: "analyze_temporal_patterns".to_string(),
            description: "Detect daily/weekly seasonality and anomalies in staking TVL, correlate it with trading volume and deployments, and project the next values.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "feeds": feeds_schema(),
                    "threshold": {
                        "type": "number",
                        "description": "Z-score threshold for anomalies (default: 2.0)"
                    }
                }
            }),
        },
        Tool {
            name: "detect_anomalies".to_string(),
            description: "Flag points whose z-score exceeds a threshold in a numeric series or in a field of raw feed records. Also returns the trailing moving average.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "values": {
                        "type": "array",
                        "items": { "type": "number" },
                        "description": "Numeric series to scan"
                    },
                    "records": {
                        "type": "array",
                        "description": "Raw feed records; requires value_key"
                    },
                    "value_key": {
                        "type": "string",
                        "description": "Numeric field of each record (e.g. 'c')"
                    },
                    "timestamp_key": {
                        "type": "string",
                        "description": "Timestamp field of each record (default: db_write_timestamp)"
                    },
                    "threshold": {
                        "type": "number",
                        "description": "Z-score threshold (default: 2.0)"
                    },
                    "window": {
                        "type": "integer",
                        "description": "Moving average window (default: 7)"
                    }
                }
            }),
        },
        Tool {
            name: "assess_data_quality".to_string(),
            description: "Score a feed's completeness, freshness and interval consistency from 0 to 100.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "feed": {
                        "description": "Feed response: a bare array of records, {\"data\": [...]}, or a named bag"
                    },
                    "feed_name": {
                        "type": "string",
                        "description": "Feed to assess inside the response (e.g. 'UniswapV2Pair_Sync'). Required when the bag holds several feeds."
                    }
                },
                "required": ["feed"]
            }),
        },
        Tool {
            name: "format_values".to_string(),
            description: "Format raw values for display: token amounts with K/M/B suffixes, relative times, shortened addresses, prices and TVL.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "amount": {
                        "type": "string",
                        "description": "Numeric amount, fixed-point when is_wei is true"
                    },
                    "is_wei": {
                        "type": "boolean",
                        "description": "Scale amount down by 10^decimals (default: true)"
                    },
                    "decimals": {
                        "type": "integer",
                        "description": "Token decimals (default: 18)"
                    },
                    "timestamp": {
                        "type": "string",
                        "description": "Timestamp to render as a relative age"
                    },
                    "address": {
                        "type": "string",
                        "description": "Address to shorten"
                    },
                    "price": {
                        "type": "number",
                        "description": "USD price"
                    },
                    "tvl": {
                        "type": "number",
                        "description": "USD value locked"
                    }
                }
            }),
        },
    ]
}

// ============================================================================
// Tool Responses
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowAnalysisResponse {
    pub volumes: ProtocolVolumes,
    pub flow: ProtocolFlow,
    pub patterns: FlowPatterns,
    /// Link volume in millions per hour over the last day
    pub velocity: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrageResponse {
    pub quotes_count: usize,
    pub quotes: Vec<PriceQuote>,
    pub opportunities: Vec<ArbitrageOpportunity>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyPoint {
    pub index: usize,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyResponse {
    pub points: usize,
    pub threshold: f64,
    pub anomalies: Vec<AnomalyPoint>,
    pub moving_average: Vec<f64>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattedValues {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_ago: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tvl: Option<String>,
}

// ============================================================================
// Tool Business Logic
// ============================================================================

/// Analytics tools over either inline feeds or the polled snapshot
pub struct MirisTools {
    snapshot: Option<SharedSnapshot>,
    params: AnalysisParams,
}

impl MirisTools {
    pub fn new(snapshot: Option<SharedSnapshot>, params: AnalysisParams) -> Self {
        Self { snapshot, params }
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, args: &Value) -> std::result::Result<Value, String> {
        let now = Utc::now();
        match name {
            "analyze_protocol_flows" => to_tool_value(self.analyze_protocol_flows(args, now).await),
            "detect_arbitrage" => to_tool_value(self.detect_arbitrage(args, now).await),
            "calculate_liquidity_migration" => {
                to_tool_value(self.calculate_liquidity_migration(args, now).await)
            }
            "aggregate_tvl" => to_tool_value(self.aggregate_tvl(args, now).await),
            "analyze_temporal_patterns" => {
                to_tool_value(self.analyze_temporal_patterns(args, now).await)
            }
            "detect_anomalies" => to_tool_value(self.detect_anomalies(args)),
            "assess_data_quality" => to_tool_value(self.assess_data_quality(args, now)),
            "format_values" => to_tool_value(Ok::<FormattedValues, MirisMcpError>(format_values(args, now))),
            _ => Err(format!("Unknown tool: {}", name)),
        }
    }

    /// Inline `feeds` when given, else the latest polled snapshot.
    async fn resolve_snapshot(&self, args: &Value) -> Result<FeedSnapshot> {
        match args.get("feeds") {
            Some(feeds @ Value::Object(_)) => {
                let raw: RawFeeds = serde_json::from_value(feeds.clone())?;
                raw.validate()?;
                Ok(FeedSnapshot::from_raw(&raw))
            }
            Some(Value::Null) | None => {
                let shared = self.snapshot.as_ref().ok_or(MirisMcpError::NoSnapshot)?;
                let snapshot = shared.read().await.clone();
                snapshot.ok_or(MirisMcpError::NoSnapshot)
            }
            Some(_) => Err(MirisMcpError::InvalidParameter(
                "feeds must be an object".into(),
            )),
        }
    }

    /// Configured parameters with per-call overrides applied.
    fn params_with(&self, args: &Value) -> Result<AnalysisParams> {
        let mut params = self.params.clone();

        if let Some(v) = args.get("match_window_secs").and_then(Value::as_i64) {
            params.flow_match_window_secs = v;
        }
        if let Some(v) = args.get("min_price_diff_pct").and_then(Value::as_f64) {
            params.min_price_diff_pct = v;
        }
        if let Some(v) = args.get("top_n").and_then(Value::as_u64) {
            params.arbitrage_top_n = v.min(100) as usize;
        }
        if let Some(v) = args.get("days").and_then(Value::as_u64) {
            params.tvl_days = u32::try_from(v).unwrap_or(u32::MAX);
        }
        if let Some(v) = args.get("threshold").and_then(Value::as_f64) {
            params.anomaly_threshold = v;
        }
        if let Some(v) = args.get("window").and_then(Value::as_u64) {
            params.moving_average_window = v as usize;
        }

        params.validate()?;
        Ok(params)
    }

    async fn analyze_protocol_flows(&self, args: &Value, now: DateTime<Utc>) -> Result<FlowAnalysisResponse> {
        let params = self.params_with(args)?;
        let snapshot = self.resolve_snapshot(args).await?;

        let flow = analyze_protocol_flows(&snapshot, &params, now);
        let patterns = identify_flow_patterns(&flow.links);
        let velocity = calculate_flow_velocity(&flow.links, FLOW_VELOCITY_HOURS);

        tracing::debug!(links = flow.links.len(), total_volume = flow.total_volume, "Analyzed protocol flows");

        Ok(FlowAnalysisResponse {
            volumes: calculate_protocol_volumes(&snapshot),
            flow,
            patterns,
            velocity,
        })
    }

    async fn detect_arbitrage(&self, args: &Value, now: DateTime<Utc>) -> Result<ArbitrageResponse> {
        let params = self.params_with(args)?;
        let snapshot = self.resolve_snapshot(args).await?;

        let quotes = collect_price_quotes(&snapshot);
        let opportunities = detect_arbitrage_opportunities(&quotes, &params, now);

        Ok(ArbitrageResponse {
            quotes_count: quotes.len(),
            quotes,
            opportunities,
        })
    }

    async fn calculate_liquidity_migration(&self, args: &Value, now: DateTime<Utc>) -> Result<LiquidityMigration> {
        let params = self.params_with(args)?;
        let snapshot = self.resolve_snapshot(args).await?;
        let flow = analyze_protocol_flows(&snapshot, &params, now);
        Ok(calculate_liquidity_migration(&flow.links))
    }

    async fn aggregate_tvl(&self, args: &Value, now: DateTime<Utc>) -> Result<AggregatedTvl> {
        let params = self.params_with(args)?;
        let snapshot = self.resolve_snapshot(args).await?;
        Ok(aggregate_tvl(&snapshot, params.tvl_days, now))
    }

    async fn analyze_temporal_patterns(&self, args: &Value, now: DateTime<Utc>) -> Result<PatternAnalysis> {
        let params = self.params_with(args)?;
        let snapshot = self.resolve_snapshot(args).await?;
        Ok(analyze_temporal_patterns(&snapshot, &params, now))
    }

    fn assess_data_quality(&self, args: &Value, now: DateTime<Utc>) -> Result<DataQuality> {
        let feed = args
            .get("feed")
            .ok_or_else(|| MirisMcpError::InvalidParameter("Missing feed parameter".into()))?;
        let feed_name = args.get("feed_name").and_then(Value::as_str);

        let records = quality_records(feed, feed_name)?;
        Ok(assess_data_quality(records, now))
    }

    fn detect_anomalies(&self, args: &Value) -> Result<AnomalyResponse> {
        let params = self.params_with(args)?;

        let (values, timestamps): (Vec<f64>, Vec<Option<DateTime<Utc>>>) = if let Some(records) =
            args.get("records").and_then(Value::as_array)
        {
            let value_key = args
                .get("value_key")
                .and_then(Value::as_str)
                .ok_or_else(|| MirisMcpError::InvalidParameter("records require value_key".into()))?;
            let timestamp_key = args
                .get("timestamp_key")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_TIMESTAMP_KEY);

            extract_time_series(records, value_key, timestamp_key)
                .into_iter()
                .map(|p| (p.value, Some(p.timestamp)))
                .unzip()
        } else if let Some(values) = args.get("values").and_then(Value::as_array) {
            values
                .iter()
                .map(|v| {
                    v.as_f64()
                        .filter(|n| n.is_finite())
                        .map(|n| (n, None))
                        .ok_or_else(|| MirisMcpError::InvalidParameter("values must be finite numbers".into()))
                })
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .unzip()
        } else {
            return Err(MirisMcpError::InvalidParameter(
                "Missing values or records parameter".into(),
            ));
        };

        let anomalies = detect_anomalies(&values, params.anomaly_threshold)
            .into_iter()
            .map(|index| AnomalyPoint {
                index,
                value: values[index],
                timestamp: timestamps[index],
            })
            .collect();

        Ok(AnomalyResponse {
            points: values.len(),
            threshold: params.anomaly_threshold,
            anomalies,
            moving_average: calculate_moving_average(&values, params.moving_average_window),
        })
    }
}

fn to_tool_value<T: Serialize>(result: Result<T>) -> std::result::Result<Value, String> {
    match result {
        Ok(result) => serde_json::to_value(result).map_err(|e| format!("Serialization error: {}", e)),
        Err(e) => Err(e.to_string()),
    }
}

fn format_values(args: &Value, now: DateTime<Utc>) -> FormattedValues {
    let decimals = args
        .get("decimals")
        .and_then(Value::as_u64)
        .map(|d| d.min(36) as u32)
        .unwrap_or(format::DEFAULT_DECIMALS);
    let is_wei = args.get("is_wei").and_then(Value::as_bool).unwrap_or(true);

    let amount = args.get("amount").map(|v| match v {
        Value::String(s) => format::format_number(s, is_wei, decimals),
        other => format::format_number(&other.to_string(), is_wei, decimals),
    });

    FormattedValues {
        amount,
        time_ago: args
            .get("timestamp")
            .and_then(Value::as_str)
            .map(|ts| format::format_time_ago_at(ts, now)),
        address: args.get("address").and_then(Value::as_str).map(format::format_address),
        price: args.get("price").and_then(Value::as_f64).map(format::format_price),
        tvl: args.get("tvl").and_then(Value::as_f64).map(|v| format::format_tvl(v, 2)),
    }
}

// ============================================================================
// MCP Message Handlers
// ============================================================================

pub fn handle_initialize(_params: &Value) -> Value {
    json!({
        "protocolVersion": "2024-11-05",
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": "miris-mcp",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

pub fn handle_list_tools() -> Value {
    json!({
        "tools": get_tools()
    })
}

pub async fn handle_call_tool(tools: &MirisTools, params: &Value) -> Value {
    let name = params["name"].as_str().unwrap_or("");
    let args = &params["arguments"];

    match tools.execute(name, args).await {
        Ok(result) => {
            json!({
                "content": [{
                    "type": "text",
                    "text": serde_json::to_string_pretty(&result).unwrap_or_default()
                }]
            })
        }
        Err(e) => {
            tracing::debug!(tool = %name, error = %e, "Tool call failed");
            json!({
                "content": [{
                    "type": "text",
                    "text": format!("Error: {}", e)
                }],
                "isError": true
            })
        }
    }
}

pub async fn handle_request(tools: &MirisTools, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
    let result = match request.method.as_str() {
        "initialize" => Some(handle_initialize(&request.params)),
        "initialized" | "notifications/initialized" => None, // Notification, no response needed
        "tools/list" => Some(handle_list_tools()),
        "tools/call" => Some(handle_call_tool(tools, &request.params).await),
        "notifications/cancelled" => None, // Notification
        _ => {
            return Some(JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: request.id,
                result: None,
                error: Some(JsonRpcError {
                    code: -32601,
                    message: format!("Method not found: {}", request.method),
                }),
            });
        }
    };

    result.map(|r| JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id: request.id,
        result: Some(r),
        error: None,
    })
}
