//! # Miris Core
//!
//! Analytics aggregation for the Miris testnet dashboard.
//!
//! This crate turns loosely-shaped indexer feeds (order-book trades,
//! cross-chain deliveries, bonding-curve and AMM syncs, pools, staking
//! candles, token deployments) into higher-order metrics: protocol volumes,
//! TVL breakdowns, value-flow graphs, arbitrage candidates, temporal
//! patterns and data-quality scores.
//!
//! Every analysis function is a pure transform over its inputs. Malformed
//! or missing data degrades to zero, empty or neutral results; errors only
//! appear at the parsing boundary (see [`chain`] and [`error`]).

pub mod arbitrage;
pub mod chain;
pub mod error;
pub mod feeds;
pub mod flow;
pub mod format;
pub mod models;
pub mod patterns;
pub mod quality;
pub mod series;
pub mod stats;
pub mod tvl;
pub mod volume;

pub use error::*;
pub use feeds::{FeedSnapshot, RawFeeds};
pub use models::*;
