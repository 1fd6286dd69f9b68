//! Flow-graph builder
//!
//! Infers value transfers between protocols from tokens that appear in more
//! than one feed. A link's value is reconciled from the feeds themselves:
//! each side's activity on the token is counted only over records that sit
//! within the match window of some record on the other side, and the link
//! carries the smaller of the two matched amounts.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};

use crate::feeds::FeedSnapshot;
use crate::models::{
    AnalysisParams, DominantFlow, FlowLink, FlowNode, FlowPatterns, NodeKind, Protocol,
    ProtocolFlow, ProtocolVolumes,
};
use crate::volume::{calculate_protocol_volumes, MONORAIL_VOLUME_PER_POOL};

/// Protocol pairs that can exchange value, as `(source, target)`
pub const FLOW_PAIRS: [(Protocol, Protocol); 3] = [
    (Protocol::OrderBook, Protocol::Monorail),
    (Protocol::OrderBook, Protocol::CrossChain),
    (Protocol::Monorail, Protocol::CrossChain),
];

pub const DEFAULT_TIMEFRAME: &str = "24h";

/// Minimum share of total link volume, in percent, for a dominant flow
const DOMINANT_SHARE_PCT: f64 = 5.0;

/// One feed record touching a token, reduced to when and how much
#[derive(Debug, Clone, Copy)]
struct Activity {
    timestamp: Option<DateTime<Utc>>,
    value: f64,
}

/// Every distinct token address referenced by the order book, Monorail
/// pools and cross-chain deliveries.
pub fn extract_tokens(snapshot: &FeedSnapshot) -> BTreeSet<String> {
    let order_book = snapshot
        .order_book
        .iter()
        .filter_map(|t| t.order_book_address.clone());
    let pools = snapshot
        .pools
        .iter()
        .flat_map(|p| [p.token0.clone(), p.token1.clone()])
        .flatten();
    let deliveries = snapshot
        .deliveries
        .iter()
        .filter_map(|d| d.recipient_contract.clone());

    order_book.chain(pools).chain(deliveries).collect()
}

fn token_activity(snapshot: &FeedSnapshot, protocol: Protocol, token: &str) -> Vec<Activity> {
    match protocol {
        Protocol::OrderBook => snapshot
            .order_book
            .iter()
            .filter(|t| t.order_book_address.as_deref() == Some(token))
            .map(|t| Activity {
                timestamp: t.timestamp,
                value: t.notional().unwrap_or(0.0),
            })
            .collect(),
        Protocol::Monorail => snapshot
            .pools
            .iter()
            .filter(|p| p.contains(token))
            .map(|p| Activity {
                timestamp: p.timestamp,
                value: MONORAIL_VOLUME_PER_POOL,
            })
            .collect(),
        Protocol::CrossChain => snapshot
            .deliveries
            .iter()
            .filter(|d| d.recipient_contract.as_deref() == Some(token))
            .map(|d| Activity {
                timestamp: d.timestamp,
                value: d.volume_proxy(),
            })
            .collect(),
        Protocol::Degen | Protocol::External => Vec::new(),
    }
}

/// Records without a write time cannot be placed, so they match anything.
fn within(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>, window: Duration) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => (a - b).num_milliseconds().abs() <= window.num_milliseconds(),
        _ => true,
    }
}

fn matched<'a>(side: &'a [Activity], other: &'a [Activity], window: Duration) -> impl Iterator<Item = &'a Activity> {
    side.iter()
        .filter(move |a| other.iter().any(|b| within(a.timestamp, b.timestamp, window)))
}

fn reconcile(
    source: &[Activity],
    target: &[Activity],
    window: Duration,
) -> (f64, Option<DateTime<Utc>>) {
    let source_matched: Vec<&Activity> = matched(source, target, window).collect();
    let target_matched: Vec<&Activity> = matched(target, source, window).collect();

    let source_value: f64 = source_matched.iter().map(|a| a.value).sum();
    let target_value: f64 = target_matched.iter().map(|a| a.value).sum();

    let latest = source_matched
        .iter()
        .chain(target_matched.iter())
        .filter_map(|a| a.timestamp)
        .max();

    (source_value.min(target_value).max(0.0), latest)
}

/// One link per protocol pair per shared token.
pub fn detect_token_flows(snapshot: &FeedSnapshot, params: &AnalysisParams, now: DateTime<Utc>) -> Vec<FlowLink> {
    let window = Duration::seconds(params.flow_match_window_secs.max(0));
    let mut links = Vec::new();

    for token in extract_tokens(snapshot) {
        let activity: BTreeMap<Protocol, Vec<Activity>> = Protocol::ALL
            .iter()
            .map(|&p| (p, token_activity(snapshot, p, &token)))
            .filter(|(_, records)| !records.is_empty())
            .collect();

        for (source, target) in FLOW_PAIRS {
            let (Some(source_records), Some(target_records)) = (activity.get(&source), activity.get(&target)) else {
                continue;
            };

            let (value, latest) = reconcile(source_records, target_records, window);
            links.push(FlowLink {
                source,
                target,
                value,
                token: Some(token.clone()),
                timestamp: latest.unwrap_or(now),
            });
        }
    }

    tracing::trace!(links = links.len(), "Detected token flows");
    links
}

fn node_id(protocol: Protocol) -> String {
    protocol.name().to_lowercase().replace(' ', "-")
}

/// One node per protocol in the volume map. External is the only sink.
pub fn create_flow_nodes(volumes: &ProtocolVolumes) -> Vec<FlowNode> {
    volumes
        .iter()
        .map(|(&protocol, &value)| FlowNode {
            id: node_id(protocol),
            name: protocol.name().to_string(),
            protocol,
            value,
            kind: match protocol {
                Protocol::External => NodeKind::Destination,
                _ => NodeKind::Source,
            },
        })
        .collect()
}

pub fn analyze_protocol_flows(snapshot: &FeedSnapshot, params: &AnalysisParams, now: DateTime<Utc>) -> ProtocolFlow {
    let volumes = calculate_protocol_volumes(snapshot);
    let nodes = create_flow_nodes(&volumes);
    let links = detect_token_flows(snapshot, params, now);

    ProtocolFlow {
        total_volume: volumes.values().sum(),
        nodes,
        links,
        timeframe: DEFAULT_TIMEFRAME.to_string(),
    }
}

/// Link volume scaled by link frequency, in millions per hour.
pub fn calculate_flow_velocity(links: &[FlowLink], hours: f64) -> f64 {
    if links.is_empty() || hours <= 0.0 {
        return 0.0;
    }
    let total: f64 = links.iter().map(|l| l.value).sum();
    total * (links.len() as f64 / hours) / 1e6
}

pub fn identify_flow_patterns(links: &[FlowLink]) -> FlowPatterns {
    let mut pairs: BTreeMap<(Protocol, Protocol), f64> = BTreeMap::new();
    let mut inflow: BTreeMap<Protocol, f64> = BTreeMap::new();
    let mut outflow: BTreeMap<Protocol, f64> = BTreeMap::new();

    for link in links {
        *pairs.entry((link.source, link.target)).or_default() += link.value;
        *outflow.entry(link.source).or_default() += link.value;
        *inflow.entry(link.target).or_default() += link.value;
        outflow.entry(link.target).or_default();
        inflow.entry(link.source).or_default();
    }

    let total: f64 = pairs.values().sum();
    let mut dominant: Vec<DominantFlow> = if total > 0.0 {
        pairs
            .into_iter()
            .map(|((from, to), value)| DominantFlow {
                from,
                to,
                share: value / total * 100.0,
            })
            .filter(|flow| flow.share > DOMINANT_SHARE_PCT)
            .collect()
    } else {
        Vec::new()
    };
    dominant.sort_by(|a, b| b.share.total_cmp(&a.share));

    let mut bottlenecks = Vec::new();
    let mut hubs = Vec::new();
    for (&protocol, &inbound) in &inflow {
        let outbound = outflow.get(&protocol).copied().unwrap_or(0.0);
        if inbound > 2.0 * outbound {
            bottlenecks.push(protocol);
        } else if outbound > 2.0 * inbound {
            hubs.push(protocol);
        }
    }

    FlowPatterns {
        dominant,
        bottlenecks,
        hubs,
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

    fn link(source: Protocol, target: Protocol, value: f64) -> FlowLink {
        FlowLink {
            source,
            target,
            value,
            token: None,
            timestamp: now(),
        }
    }

    fn snapshot() -> FeedSnapshot {
        FeedSnapshot::from_json_str(
            &json!({
                "orderBook": { "KuruOrderBook_Trade": [
                    { "id": "t1", "orderBookAddress": "0xAAA", "filledSize": "100", "price": "50",
                      "db_write_timestamp": "2025-03-10T10:00:00Z" },
                    { "id": "t2", "orderBookAddress": "0xaaa", "filledSize": "1", "price": "1",
                      "db_write_timestamp": "2025-03-09T00:00:00Z" },
                    { "id": "t3", "orderBookAddress": "0xBBB", "filledSize": "3", "price": "1",
                      "db_write_timestamp": "2025-03-10T10:00:00Z" }
                ]},
                "monorail": { "Pool": [
                    { "id": "p1", "token0": { "id": "0xaaa" }, "token1": { "id": "0xccc" },
                      "db_write_timestamp": "2025-03-10T10:30:00Z" }
                ]},
                "interoperability": { "WormholeRelayer_Delivery": [
                    { "id": "d1", "recipientContract": "0xBBB", "gasUsed": "5000000",
                      "db_write_timestamp": "2025-03-10T18:00:00Z" }
                ]}
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_extract_tokens() {
        let tokens: Vec<_> = extract_tokens(&snapshot()).into_iter().collect();
        assert_eq!(tokens, vec!["0xaaa", "0xbbb", "0xccc"]);
    }

    #[test]
    fn test_links_reconcile_within_window() {
        let links = detect_token_flows(&snapshot(), &AnalysisParams::default(), now());
        assert_eq!(links.len(), 2);

        let ob_monorail = links
            .iter()
            .find(|l| l.token.as_deref() == Some("0xaaa"))
            .unwrap();
        assert_eq!((ob_monorail.source, ob_monorail.target), (Protocol::OrderBook, Protocol::Monorail));
        // t2 is a day away from the pool, so only t1's 5000 is matched
        assert_eq!(ob_monorail.value, 5_000.0);
        assert_eq!(ob_monorail.timestamp, Utc.with_ymd_and_hms(2025, 3, 10, 10, 30, 0).unwrap());

        // Trade and delivery on 0xbbb are eight hours apart
        let ob_cross = links
            .iter()
            .find(|l| l.token.as_deref() == Some("0xbbb"))
            .unwrap();
        assert_eq!(ob_cross.target, Protocol::CrossChain);
        assert_eq!(ob_cross.value, 0.0);
        assert_eq!(ob_cross.timestamp, now());
    }

    #[test]
    fn test_wider_window_matches_more() {
        let params = AnalysisParams {
            flow_match_window_secs: 86_400,
            ..AnalysisParams::default()
        };
        let links = detect_token_flows(&snapshot(), &params, now());
        let ob_cross = links
            .iter()
            .find(|l| l.token.as_deref() == Some("0xbbb"))
            .unwrap();
        assert_eq!(ob_cross.value, 3.0);
    }

    #[test]
    fn test_nodes_cover_every_protocol() {
        let flow = analyze_protocol_flows(&snapshot(), &AnalysisParams::default(), now());
        assert_eq!(flow.nodes.len(), Protocol::ALL.len());
        assert_eq!(flow.timeframe, "24h");

        let external = flow.nodes.iter().find(|n| n.protocol == Protocol::External).unwrap();
        assert_eq!(external.kind, NodeKind::Destination);
        assert_eq!(external.id, "external");

        let order_book = flow.nodes.iter().find(|n| n.protocol == Protocol::OrderBook).unwrap();
        assert_eq!(order_book.id, "order-book");
        assert_eq!(order_book.value, 5_004.0);
        assert_eq!(flow.total_volume, 5_004.0 + 10_000.0 + 5.0);
    }

    #[test]
    fn test_empty_snapshot_has_no_links() {
        let flow = analyze_protocol_flows(&FeedSnapshot::default(), &AnalysisParams::default(), now());
        assert!(flow.links.is_empty());
        assert_eq!(flow.total_volume, 0.0);
    }

    #[test]
    fn test_flow_velocity() {
        assert_eq!(calculate_flow_velocity(&[], 24.0), 0.0);
        let links = vec![
            link(Protocol::OrderBook, Protocol::Monorail, 1e6),
            link(Protocol::OrderBook, Protocol::CrossChain, 1e6),
        ];
        assert_eq!(calculate_flow_velocity(&links, 2.0), 2.0);
        assert_eq!(calculate_flow_velocity(&links, 0.0), 0.0);
    }

    #[test]
    fn test_flow_patterns() {
        let links = vec![
            link(Protocol::OrderBook, Protocol::Monorail, 90.0),
            link(Protocol::OrderBook, Protocol::CrossChain, 7.0),
            link(Protocol::Monorail, Protocol::CrossChain, 3.0),
        ];
        let patterns = identify_flow_patterns(&links);

        assert_eq!(patterns.dominant.len(), 2);
        assert_eq!(patterns.dominant[0].from, Protocol::OrderBook);
        assert_eq!(patterns.dominant[0].to, Protocol::Monorail);
        assert!((patterns.dominant[0].share - 90.0).abs() < 1e-9);

        assert_eq!(patterns.hubs, vec![Protocol::OrderBook]);
        assert_eq!(patterns.bottlenecks, vec![Protocol::CrossChain, Protocol::Monorail]);
    }
}
