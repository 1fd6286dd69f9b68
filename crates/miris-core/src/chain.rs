//! Chain activity stream and aggregate stats
//!
//! Message types for the block/epoch event stream, the aggregate block
//! statistics endpoint, and the small amount of state a stream consumer
//! keeps: the most recent blocks and its reconnect policy. Transport is
//! left to the caller.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MirisError, MirisResult};
use crate::feeds::parse_timestamp;

pub const LATEST_EPOCH_EVENT: &str = "latestEpoch";
pub const BLOCK_PROPOSAL_EVENT: &str = "block_proposal";

/// Blocks used for the realtime TPS estimate
pub const TPS_WINDOW: usize = 5;
pub const RECENT_BLOCKS_CAPACITY: usize = 4;
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

// =============================================================================
// Stream messages
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochData {
    pub block_num: String,
    pub blocks_completed: String,
    pub boundary_phase_completion_percentage: f64,
    pub boundary_phase_remaining_percentage: f64,
    pub epoch: String,
    pub round: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockData {
    pub block_num: u64,
    pub author: String,
    #[serde(rename = "AuthorNodeID")]
    pub author_node_id: String,
    pub num_tx: u64,
    pub round: String,
    pub timestamp: String,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Epoch(EpochData),
    Block(BlockData),
    /// Event type this consumer does not handle
    Other(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

impl StreamMessage {
    pub fn parse(data: &str) -> MirisResult<Self> {
        let envelope: Envelope = serde_json::from_str(data)?;

        let message = match envelope.kind.as_str() {
            LATEST_EPOCH_EVENT => StreamMessage::Epoch(serde_json::from_value(envelope.payload).map_err(|e| {
                MirisError::Parse(format!("{} payload: {}", LATEST_EPOCH_EVENT, e))
            })?),
            BLOCK_PROPOSAL_EVENT => StreamMessage::Block(serde_json::from_value(envelope.payload).map_err(|e| {
                MirisError::Parse(format!("{} payload: {}", BLOCK_PROPOSAL_EVENT, e))
            })?),
            _ => StreamMessage::Other(envelope.kind),
        };
        Ok(message)
    }
}

// =============================================================================
// Aggregate stats
// =============================================================================

/// One bucket of the block statistics endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStats {
    pub bucket: String,
    pub blocks: String,
    pub txs: String,
    pub avg_bps: f64,
    pub avg_tps: f64,
    pub total_gas: String,
    pub avg_tx_per_block: f64,
    pub avg_gas_per_block: f64,
    pub avg_base_fee_per_tx: f64,
    pub avg_priority_fee_per_tx: f64,
    pub avg_gas_price: f64,
    pub max_tx: f64,
    pub avg_block_time_s: String,
    pub avg_block_fullness_pct: f64,
}

impl ChainStats {
    /// The latest bucket of a `{ "data": [...] }` response, if any.
    pub fn from_response(response: &Value) -> MirisResult<Option<Self>> {
        match response.get("data").and_then(Value::as_array).and_then(|d| d.first()) {
            Some(latest) => Ok(Some(ChainStats::deserialize(latest)?)),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Consumer state
// =============================================================================

/// Transactions per second over the most recent blocks, newest first.
///
/// Zero with fewer than two blocks or when their timestamps do not span
/// any time.
pub fn realtime_tps(blocks: &[BlockData]) -> f64 {
    window_tps(blocks)
}

fn window_tps<'a, I>(blocks: I) -> f64
where
    I: IntoIterator<Item = &'a BlockData>,
{
    let mut window = blocks.into_iter().take(TPS_WINDOW);
    let Some(newest) = window.next() else {
        return 0.0;
    };

    let mut oldest = None;
    let mut total_txs = newest.num_tx;
    for block in window {
        total_txs += block.num_tx;
        oldest = Some(block);
    }
    let Some(oldest) = oldest else {
        return 0.0;
    };

    let span = match (parse_timestamp(&newest.timestamp), parse_timestamp(&oldest.timestamp)) {
        (Some(newest), Some(oldest)) => (newest - oldest).num_milliseconds() as f64 / 1000.0,
        _ => return 0.0,
    };

    if span > 0.0 {
        total_txs as f64 / span
    } else {
        0.0
    }
}

/// Bounded buffer of the latest block proposals, newest first
#[derive(Debug, Clone)]
pub struct RecentBlocks {
    blocks: VecDeque<BlockData>,
    capacity: usize,
}

impl Default for RecentBlocks {
    fn default() -> Self {
        Self::with_capacity(RECENT_BLOCKS_CAPACITY)
    }
}

impl RecentBlocks {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            blocks: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, block: BlockData) {
        self.blocks.push_front(block);
        self.blocks.truncate(self.capacity);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlockData> {
        self.blocks.iter()
    }

    pub fn tps(&self) -> f64 {
        window_tps(&self.blocks)
    }
}

/// Fixed-delay reconnect with unbounded attempts and no jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: RECONNECT_DELAY,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Delay before the given (1-based) attempt. Every attempt waits the same.
    pub fn delay_for(&self, _attempt: u32) -> Duration {
        self.delay
    }

    pub fn should_retry(&self, _attempt: u32) -> bool {
        true
    }
}
