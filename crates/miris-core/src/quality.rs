//! Data-quality scoring for incoming feeds.
//!
//! Three scores, each rounded into 0-100:
//! - completeness: filled fields over possible fields
//! - freshness: decays linearly to 0 as the average record age reaches a day
//! - consistency: penalises irregular write intervals

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{MirisError, MirisResult};
use crate::feeds::{feed_records, parse_timestamp_value, WRITE_TIMESTAMP_KEY};
use crate::models::DataQuality;
use crate::stats::{mean, volatility};

/// Assumed average age when no record carries a timestamp
const UNKNOWN_AGE_HOURS: f64 = 24.0;

/// Records of a feed response.
///
/// With `feed` named, resolves it like the typed adapters do. Without a
/// name, accepts a bare array, a `data` array, or a bag (optionally under
/// a GraphQL `data` envelope) holding exactly one array. A bag with
/// several arrays is ambiguous and rejected.
pub fn quality_records<'a>(response: &'a Value, feed: Option<&str>) -> MirisResult<&'a [Value]> {
    if let Some(name) = feed {
        return Ok(feed_records(response, name));
    }

    let bag = match response {
        Value::Array(records) => return Ok(records),
        Value::Object(obj) => match obj.get("data") {
            Some(Value::Array(records)) => return Ok(records),
            Some(data @ Value::Object(_)) => data,
            _ => response,
        },
        _ => return Ok(&[]),
    };

    let arrays: Vec<(&String, &Vec<Value>)> = bag
        .as_object()
        .map(|obj| obj.iter().filter_map(|(k, v)| Some((k, v.as_array()?))).collect())
        .unwrap_or_default();

    match arrays.as_slice() {
        &[] => Ok(&[]),
        &[(_, records)] => Ok(records),
        several => Err(MirisError::InvalidFeed {
            feed: "response".to_string(),
            reason: format!(
                "holds {} feeds ({}), name the one to assess",
                several.len(),
                several.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join(", ")
            ),
        }),
    }
}

fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn completeness(records: &[Value]) -> f64 {
    let objects: Vec<_> = records.iter().filter_map(Value::as_object).collect();
    let fields: BTreeSet<&str> = objects
        .iter()
        .flat_map(|obj| obj.keys().map(String::as_str))
        .collect();

    let possible = records.len() * fields.len();
    if possible == 0 {
        return 0.0;
    }

    let filled = objects
        .iter()
        .flat_map(|obj| obj.values())
        .filter(|v| is_filled(v))
        .count();
    filled as f64 / possible as f64 * 100.0
}

fn record_timestamp(record: &Value) -> Option<DateTime<Utc>> {
    record
        .get(WRITE_TIMESTAMP_KEY)
        .filter(|v| is_filled(v))
        .or_else(|| record.get("timestamp"))
        .and_then(parse_timestamp_value)
}

fn freshness(timestamps: &[DateTime<Utc>], now: DateTime<Utc>) -> f64 {
    let avg_age_hours = if timestamps.is_empty() {
        UNKNOWN_AGE_HOURS
    } else {
        let millis: Vec<f64> = timestamps.iter().map(|t| t.timestamp_millis() as f64).collect();
        (now.timestamp_millis() as f64 - mean(&millis)) / 3_600_000.0
    };
    (100.0 - avg_age_hours / 24.0 * 100.0).clamp(0.0, 100.0)
}

fn consistency(timestamps: &[DateTime<Utc>]) -> f64 {
    let mut sorted = timestamps.to_vec();
    sorted.sort();

    let intervals: Vec<f64> = sorted
        .windows(2)
        .map(|w| (w[1] - w[0]).num_milliseconds() as f64)
        .filter(|delta| *delta > 0.0)
        .collect();
    if intervals.len() < 2 {
        return 0.0;
    }

    let avg = mean(&intervals);
    let cv = volatility(&intervals) / avg;
    (100.0 - cv * 100.0).clamp(0.0, 100.0)
}

/// Score a feed's records at `now`. An empty feed scores 0 everywhere.
pub fn assess_data_quality(records: &[Value], now: DateTime<Utc>) -> DataQuality {
    if records.is_empty() {
        return DataQuality::default();
    }

    let timestamps: Vec<DateTime<Utc>> = records.iter().filter_map(record_timestamp).collect();

    DataQuality {
        completeness: completeness(records).round(),
        freshness: freshness(&timestamps, now).round(),
        consistency: consistency(&timestamps).round(),
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

    #[test]
    fn test_empty_feed() {
        assert_eq!(assess_data_quality(&[], now()), DataQuality::default());
    }

    #[test]
    fn test_completeness_uses_union_of_fields() {
        let records = vec![
            json!({ "id": "1", "price": "2", "db_write_timestamp": "2025-03-10T12:00:00Z" }),
            json!({ "id": "2", "price": "", "db_write_timestamp": "2025-03-10T12:00:00Z" }),
            json!({ "id": "3", "size": null, "db_write_timestamp": "2025-03-10T12:00:00Z" }),
        ];
        // 4 possible fields x 3 records, 7 filled
        let quality = assess_data_quality(&records, now());
        assert_eq!(quality.completeness, (7.0_f64 / 12.0 * 100.0).round());
        assert_eq!(quality.freshness, 100.0);
    }

    #[test]
    fn test_freshness_decays_over_a_day() {
        let half_day = vec![json!({ "timestamp": "2025-03-10T00:00:00Z" })];
        assert_eq!(assess_data_quality(&half_day, now()).freshness, 50.0);

        let stale = vec![json!({ "timestamp": "2025-03-01T00:00:00Z" })];
        assert_eq!(assess_data_quality(&stale, now()).freshness, 0.0);

        let undated = vec![json!({ "id": "x" })];
        assert_eq!(assess_data_quality(&undated, now()).freshness, 0.0);
    }

    #[test]
    fn test_consistency() {
        let regular: Vec<_> = (0..5)
            .map(|h| json!({ "db_write_timestamp": format!("2025-03-10T0{}:00:00Z", h) }))
            .collect();
        assert_eq!(assess_data_quality(&regular, now()).consistency, 100.0);

        let too_few = vec![
            json!({ "db_write_timestamp": "2025-03-10T01:00:00Z" }),
            json!({ "db_write_timestamp": "2025-03-10T02:00:00Z" }),
        ];
        assert_eq!(assess_data_quality(&too_few, now()).consistency, 0.0);

        let irregular = vec![
            json!({ "db_write_timestamp": "2025-03-10T00:00:00Z" }),
            json!({ "db_write_timestamp": "2025-03-10T00:01:00Z" }),
            json!({ "db_write_timestamp": "2025-03-10T10:00:00Z" }),
        ];
        let score = assess_data_quality(&irregular, now()).consistency;
        assert!(score < 10.0);
    }

    #[test]
    fn test_quality_records_shapes() {
        let bag = json!({ "WormholeRelayer_Delivery": [{ "id": "1" }] });
        assert_eq!(quality_records(&bag, None).unwrap().len(), 1);
        assert_eq!(quality_records(&json!({ "data": [1, 2] }), None).unwrap().len(), 2);
        let envelope = json!({ "data": { "Pool": [{ "id": "p" }] } });
        assert_eq!(quality_records(&envelope, None).unwrap().len(), 1);
        assert!(quality_records(&json!("nope"), None).unwrap().is_empty());
    }

    #[test]
    fn test_multi_feed_bag_needs_a_name() {
        let degen = json!({
            "BondingCurve_Sync": [{ "id": "s1" }],
            "UniswapV2Pair_Sync": [{ "id": "p1" }, { "id": "p2" }]
        });

        let err = quality_records(&degen, None).unwrap_err();
        assert!(matches!(err, MirisError::InvalidFeed { .. }));
        assert!(err.to_string().contains("UniswapV2Pair_Sync"));

        assert_eq!(quality_records(&degen, Some("UniswapV2Pair_Sync")).unwrap().len(), 2);
        assert_eq!(quality_records(&degen, Some("BondingCurve_Sync")).unwrap().len(), 1);
        assert!(quality_records(&degen, Some("Pool")).unwrap().is_empty());
    }
}
