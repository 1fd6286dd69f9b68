//! Display formatting for amounts, ages, durations and addresses.
//!
//! These are total functions: bad input produces `"0"` or a placeholder
//! string, never a panic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::feeds::{parse_timestamp, scale_amount};

/// Decimals used by native and most ERC-20 amounts on the testnet
pub const DEFAULT_DECIMALS: u32 = 18;

/// Placeholder returned when a timestamp cannot be parsed
pub const UNKNOWN_TIME: &str = "unknown";

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Format a raw amount string for display.
///
/// With `is_wei` the input is a fixed-point integer scaled by
/// `10^decimals`. Values are rounded to two decimals and suffixed with
/// `K`, `M` or `B`.
pub fn format_number(raw: &str, is_wei: bool, decimals: u32) -> String {
    let amount = if is_wei {
        scale_amount(raw, decimals)
    } else {
        raw.trim().parse::<f64>().ok()
    };

    match amount {
        Some(value) => format_amount(value),
        None => "0".to_string(),
    }
}

/// Format an already-scaled amount with magnitude suffixes.
pub fn format_amount(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }

    let rounded = round_to(value, 2);

    if rounded >= 1e9 {
        format!("{}B", round_to(rounded / 1e9, 2))
    } else if rounded >= 1e6 {
        format!("{}M", round_to(rounded / 1e6, 2))
    } else if rounded >= 1e3 {
        format!("{}K", round_to(rounded / 1e3, 2))
    } else if rounded > 0.0 {
        format!("{}", rounded)
    } else {
        "0".to_string()
    }
}

/// Shorten an address to its first 6 and last 4 characters.
///
/// Addresses too short to shorten are returned as-is.
pub fn format_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Whole seconds elapsed between `timestamp` and `now`.
///
/// Future timestamps give a negative count.
pub fn seconds_ago_at(timestamp: &DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - *timestamp).num_milliseconds().div_euclid(1000)
}

/// Relative age of a timestamp string, measured against the current time.
pub fn format_time_ago(timestamp: &str) -> String {
    format_time_ago_at(timestamp, Utc::now())
}

/// Relative age of a timestamp string, measured against `now`.
///
/// Timestamps without a zone suffix are read as UTC.
pub fn format_time_ago_at(timestamp: &str, now: DateTime<Utc>) -> String {
    match parse_timestamp(timestamp) {
        Some(ts) => format_age(seconds_ago_at(&ts, now)),
        None => UNKNOWN_TIME.to_string(),
    }
}

fn format_age(seconds_ago: i64) -> String {
    if seconds_ago <= 5 {
        return "now".to_string();
    }
    if seconds_ago < 60 {
        return format!("{}s ago", seconds_ago);
    }
    if seconds_ago < 3600 {
        return format!("{}m ago", seconds_ago / 60);
    }
    if seconds_ago < 86_400 {
        return format!("{}h ago", seconds_ago / 3600);
    }
    format!("{}d ago", seconds_ago / 86_400)
}

/// Compact age for trade tables: `just now`, `42s`, `3:07`, then wall time.
pub fn format_trade_time_at(timestamp: &str, now: DateTime<Utc>) -> String {
    let Some(ts) = parse_timestamp(timestamp) else {
        return UNKNOWN_TIME.to_string();
    };

    let seconds_ago = seconds_ago_at(&ts, now);
    if seconds_ago <= 2 {
        "just now".to_string()
    } else if seconds_ago < 60 {
        format!("{}s", seconds_ago)
    } else if seconds_ago < 3600 {
        format!("{}:{:02}", seconds_ago / 60, seconds_ago % 60)
    } else {
        ts.format("%H:%M:%S").to_string()
    }
}

/// Human readable duration, e.g. `2h 5m`. Zero remainders are dropped.
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{}s", seconds);
    }

    let (major, minor, major_unit, minor_unit) = if seconds < 3600 {
        (seconds / 60, seconds % 60, "m", "s")
    } else if seconds < 86_400 {
        (seconds / 3600, (seconds % 3600) / 60, "h", "m")
    } else {
        (seconds / 86_400, (seconds % 86_400) / 3600, "d", "h")
    };

    if minor > 0 {
        format!("{}{} {}{}", major, major_unit, minor, minor_unit)
    } else {
        format!("{}{}", major, major_unit)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Fresh,
    Recent,
    Stale,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshInfo {
    pub status: RefreshStatus,
    pub time_ago: String,
    pub seconds_ago: i64,
    pub is_stale: bool,
}

/// Default age, in seconds, after which data is reported stale
pub const DEFAULT_MAX_AGE_SECS: i64 = 300;

/// Classify how current a feed's last update is.
///
/// An unparseable timestamp is treated as stale.
pub fn refresh_status_at(last_update: &str, max_age_secs: i64, now: DateTime<Utc>) -> RefreshInfo {
    let seconds_ago = match parse_timestamp(last_update) {
        Some(ts) => seconds_ago_at(&ts, now),
        None => i64::MAX,
    };

    let status = if seconds_ago > max_age_secs {
        RefreshStatus::Stale
    } else if seconds_ago > 60 {
        RefreshStatus::Recent
    } else {
        RefreshStatus::Fresh
    };

    RefreshInfo {
        status,
        time_ago: format_time_ago_at(last_update, now),
        seconds_ago,
        is_stale: status == RefreshStatus::Stale,
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Dollar price with thousands separators and 2 to 6 fractional digits.
pub fn format_price(value: f64) -> String {
    if !value.is_finite() {
        return "$0.00".to_string();
    }

    let fixed = format!("{:.6}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), ""));

    let mut frac = frac_part.trim_end_matches('0').to_string();
    while frac.len() < 2 {
        frac.push('0');
    }

    let sign = if value < 0.0 && fixed.chars().any(|c| c != '0' && c != '.') {
        "-"
    } else {
        ""
    };

    format!("${}{}.{}", sign, group_thousands(int_part), frac)
}

/// Dollar TVL figure with a magnitude suffix and fixed decimals.
pub fn format_tvl(value: f64, decimals: usize) -> String {
    if value >= 1e9 {
        format!("${:.*}B", decimals, value / 1e9)
    } else if value >= 1e6 {
        format!("${:.*}M", decimals, value / 1e6)
    } else if value >= 1e3 {
        format!("${:.*}K", decimals, value / 1e3)
    } else {
        format!("${:.*}", decimals, value)
    }
}
