use std::path::PathBuf;

use config::{Config, Environment, File};
use serde::Deserialize;

use miris_core::AnalysisParams;

use crate::error::Result;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub snapshot: SnapshotConfig,
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SnapshotConfig {
    /// JSON file holding the latest raw feeds. Without it, every tool call
    /// must pass its own `feeds`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Seconds between reloads of the snapshot file
    pub poll_interval_secs: u64,
    /// Seconds to wait after a failed reload
    pub retry_delay_secs: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: None,
            poll_interval_secs: 10,
            retry_delay_secs: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    pub anomaly_threshold: f64,
    pub moving_average_window: usize,
    pub tvl_days: u32,
    pub arbitrage_top_n: usize,
    pub min_price_diff_pct: f64,
    pub flow_match_window_secs: i64,
}

impl AnalysisConfig {
    pub fn to_params(&self) -> AnalysisParams {
        AnalysisParams {
            anomaly_threshold: self.anomaly_threshold,
            moving_average_window: self.moving_average_window,
            tvl_days: self.tvl_days,
            arbitrage_top_n: self.arbitrage_top_n,
            min_price_diff_pct: self.min_price_diff_pct,
            flow_match_window_secs: self.flow_match_window_secs,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let defaults = AnalysisParams::default();
        let snapshot = SnapshotConfig::default();

        let config = Config::builder()
            // Snapshot defaults
            .set_default("snapshot.poll_interval_secs", snapshot.poll_interval_secs)?
            .set_default("snapshot.retry_delay_secs", snapshot.retry_delay_secs)?
            // Analysis defaults
            .set_default("analysis.anomaly_threshold", defaults.anomaly_threshold)?
            .set_default("analysis.moving_average_window", defaults.moving_average_window as u64)?
            .set_default("analysis.tvl_days", defaults.tvl_days)?
            .set_default("analysis.arbitrage_top_n", defaults.arbitrage_top_n as u64)?
            .set_default("analysis.min_price_diff_pct", defaults.min_price_diff_pct)?
            .set_default("analysis.flow_match_window_secs", defaults.flow_match_window_secs)?
            // Load from config files if they exist
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables
            // MIRIS__SNAPSHOT__PATH, MIRIS__ANALYSIS__TVL_DAYS, etc.
            .add_source(
                Environment::with_prefix("MIRIS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_map_to_valid_params() {
        let config = AppConfig::load().unwrap();
        assert_eq!(config.snapshot.retry_delay_secs, 5);

        let params = config.analysis.to_params();
        assert!(params.validate().is_ok());
        assert_eq!(params.tvl_days, 30);
        assert_eq!(params.flow_match_window_secs, 3600);
    }
}
