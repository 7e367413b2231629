//! Metrics hooks for the batching pipeline.

use crate::{builder::ChannelFullError, tx_data::TxId};
use hana_protocol::{BlockId, ChannelId, L2Block};

/// Observer for batching pipeline events. All hooks default to no-ops so
/// implementations only override what they record.
pub trait Metricer: core::fmt::Debug + Send + Sync {
    /// An L2 block was accepted into the manager's queue.
    fn record_l2_block_added(&self, _block: &L2Block) {}

    /// A new channel was opened.
    fn record_channel_opened(&self, _id: ChannelId, _pending_blocks: usize) {}

    /// The current channel stopped accepting input.
    fn record_channel_full(&self, _id: ChannelId, _reason: ChannelFullError) {}

    /// A channel was dropped after timing out.
    fn record_channel_timed_out(&self, _id: ChannelId) {}

    /// A channel was dropped after being fully confirmed.
    fn record_channel_fully_confirmed(&self, _id: ChannelId) {}

    /// A transaction payload was handed to the submitter.
    fn record_pending_tx(&self, _id: &TxId, _frames: usize) {}

    /// A transaction was confirmed at the given L1 block.
    fn record_tx_confirmed(&self, _id: &TxId, _inclusion: BlockId) {}

    /// A transaction failed and its frames were re-queued.
    fn record_tx_failed(&self, _id: &TxId) {}
}

/// A [Metricer] that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metricer for NoopMetrics {}
