//! The [ChannelManager]: current-channel lifecycle, block intake, reorg
//! detection, and submission bookkeeping.

use crate::{
    builder::ChannelBuilderError,
    channel::Channel,
    config::ChannelConfig,
    metrics::Metricer,
    tx_data::{TxData, TxId},
};
use alloy_primitives::hex;
use hana_protocol::{BlockId, L2Block};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// An error from the [ChannelManager].
#[derive(Error, Debug)]
pub enum ChannelManagerError {
    /// The submitted block does not extend the chain accepted so far. The
    /// manager's state is unchanged; recovery is the driver's concern.
    #[error("l2 block does not extend the current chain")]
    Reorg,
    /// No transaction data is currently producible. Not fatal: more blocks
    /// or confirmations may unblock production.
    #[error("no transaction data available")]
    EndOfStream,
    /// A failure in the current channel's builder.
    #[error(transparent)]
    Builder(#[from] ChannelBuilderError),
}

/// Converts a stream of L2 blocks into framed transaction payloads and tracks
/// the submission state of the current channel.
///
/// All operations mutate plain state and are expected to be serialised by a
/// single driver; the manager holds no locks.
#[derive(Debug)]
pub struct ChannelManager {
    /// The channel configuration.
    cfg: ChannelConfig,
    /// Metrics sink.
    metrics: Arc<dyn Metricer>,
    /// Blocks accepted but not yet ingested into a channel, in chain order.
    blocks: VecDeque<L2Block>,
    /// The last block accepted, whether or not it was ingested yet.
    tip: Option<BlockId>,
    /// The channel currently being filled or drained.
    current_channel: Option<Channel>,
    /// Whether the manager was closed for new production.
    closed: bool,
    /// The L1 origin the driver last reset the manager to.
    l1_origin_last_cleared: BlockId,
}

impl ChannelManager {
    /// Creates a new [ChannelManager].
    pub fn new(cfg: ChannelConfig, metrics: Arc<dyn Metricer>) -> Self {
        Self {
            cfg,
            metrics,
            blocks: VecDeque::new(),
            tip: None,
            current_channel: None,
            closed: false,
            l1_origin_last_cleared: BlockId::default(),
        }
    }

    /// The number of blocks accepted but not yet ingested into a channel.
    pub fn pending_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// The L1 origin passed to the last [ChannelManager::clear] call.
    pub fn l1_origin_last_cleared(&self) -> BlockId {
        self.l1_origin_last_cleared
    }

    /// Accepts a new L2 block into the queue.
    ///
    /// The block must extend the previously accepted block by parent hash and
    /// number; otherwise [ChannelManagerError::Reorg] is returned and no
    /// state changes. Blocks are buffered even after [ChannelManager::close],
    /// but will never be emitted then.
    pub fn add_l2_block(&mut self, block: L2Block) -> Result<(), ChannelManagerError> {
        if let Some(tip) = self.tip {
            if block.parent_hash != tip.hash || block.number != tip.number + 1 {
                warn!(
                    target: "channel-manager",
                    tip = %tip,
                    block_number = block.number,
                    block_parent = %block.parent_hash,
                    "Block does not extend the accepted chain"
                );
                return Err(ChannelManagerError::Reorg);
            }
        }

        trace!(target: "channel-manager", number = block.number, "Accepted L2 block");
        self.metrics.record_l2_block_added(&block);
        self.tip = Some(block.block_ref());
        self.blocks.push_back(block);
        Ok(())
    }

    /// Produces the next transaction payload, or [ChannelManagerError::EndOfStream]
    /// when nothing is currently producible.
    ///
    /// A new channel is created lazily, pegged to `l1_head` for timeout
    /// accounting. Queued blocks are drained into the current channel as far
    /// as it accepts them; a full channel is close-flushed so its remaining
    /// frames become available with the closing marker on the terminal one.
    pub fn tx_data(&mut self, l1_head: BlockId) -> Result<TxData, ChannelManagerError> {
        if self.current_channel.as_ref().is_some_and(Channel::has_tx_data) {
            return self.next_tx_data();
        }

        // Without pending frames, production needs both an open manager and
        // queued blocks to make progress.
        if self.closed || self.blocks.is_empty() {
            return Err(ChannelManagerError::EndOfStream);
        }

        self.ensure_channel_with_space(l1_head)?;
        self.process_blocks()?;
        self.output_frames()?;
        self.next_tx_data()
    }

    /// Assembles the next transaction from the current channel, if any.
    fn next_tx_data(&mut self) -> Result<TxData, ChannelManagerError> {
        match self.current_channel.as_mut() {
            Some(channel) if channel.has_tx_data() => {
                let tx = channel.next_tx_data();
                self.metrics.record_pending_tx(&tx.id(), tx.frames.len());
                Ok(tx)
            }
            _ => Err(ChannelManagerError::EndOfStream),
        }
    }

    /// Creates the current channel if none exists.
    fn ensure_channel_with_space(&mut self, l1_head: BlockId) -> Result<(), ChannelManagerError> {
        if self.current_channel.is_some() {
            return Ok(());
        }
        let channel = Channel::new(self.cfg.clone(), l1_head)?;
        info!(
            target: "channel-manager",
            channel = %hex::encode(channel.id()),
            l1_head = %l1_head,
            pending_blocks = self.blocks.len(),
            "Created channel"
        );
        self.metrics.record_channel_opened(channel.id(), self.blocks.len());
        self.current_channel = Some(channel);
        Ok(())
    }

    /// Drains queued blocks into the current channel until it refuses more.
    fn process_blocks(&mut self) -> Result<(), ChannelManagerError> {
        let Some(channel) = self.current_channel.as_mut() else {
            return Ok(());
        };

        let mut blocks_added = 0usize;
        while let Some(block) = self.blocks.front() {
            match channel.add_block(block) {
                Ok(()) => {
                    self.blocks.pop_front();
                    blocks_added += 1;
                }
                Err(ChannelBuilderError::ChannelFull(reason)) => {
                    debug!(
                        target: "channel-manager",
                        channel = %hex::encode(channel.id()),
                        input_bytes = channel.input_bytes(),
                        %reason,
                        "Channel is full"
                    );
                    self.metrics.record_channel_full(channel.id(), reason);
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }
        debug!(
            target: "channel-manager",
            blocks_added,
            pending_blocks = self.blocks.len(),
            "Ingested blocks into channel"
        );
        Ok(())
    }

    /// Lets the current channel produce whatever frames are due.
    fn output_frames(&mut self) -> Result<(), ChannelManagerError> {
        if let Some(channel) = self.current_channel.as_mut() {
            channel.output_frames()?;
        }
        Ok(())
    }

    /// Records a transaction as confirmed at the given L1 block, delegating
    /// to the owning channel. Unknown transactions are ignored. A channel
    /// that timed out is abandoned with its unsent frames; a closed channel
    /// whose every transaction is confirmed is dropped.
    pub fn tx_confirmed(&mut self, id: &TxId, inclusion: BlockId) {
        let Some(channel) = self.owning_channel(id) else {
            trace!(target: "channel-manager", tx = %id, "Confirmation for unknown channel");
            return;
        };
        let changed = channel.tx_confirmed(id, inclusion);
        let channel_id = channel.id();
        let l1_origin = channel.l1_origin();
        let timed_out = channel.is_timed_out();
        let fully_confirmed = channel.is_fully_confirmed();

        if changed {
            self.metrics.record_tx_confirmed(id, inclusion);
        }
        if timed_out {
            warn!(
                target: "channel-manager",
                channel = %hex::encode(channel_id),
                l1_origin = %l1_origin,
                "Channel timed out, discarding its unsent frames"
            );
            self.metrics.record_channel_timed_out(channel_id);
            self.current_channel = None;
        } else if fully_confirmed {
            info!(
                target: "channel-manager",
                channel = %hex::encode(channel_id),
                "Channel fully confirmed, dropping"
            );
            self.metrics.record_channel_fully_confirmed(channel_id);
            self.current_channel = None;
        }
    }

    /// Re-queues the frames of a failed transaction so the next
    /// [ChannelManager::tx_data] call serves them again, byte-identically.
    /// Unknown transactions are ignored.
    pub fn tx_failed(&mut self, id: &TxId) {
        let Some(channel) = self.owning_channel(id) else {
            trace!(target: "channel-manager", tx = %id, "Failure for unknown channel");
            return;
        };
        if channel.tx_failed(id) {
            self.metrics.record_tx_failed(id);
        }
    }

    /// Looks up the channel owning a transaction by the id's channel prefix.
    fn owning_channel(&mut self, id: &TxId) -> Option<&mut Channel> {
        let channel_id = id.channel_id()?;
        self.current_channel.as_mut().filter(|c| c.id() == channel_id)
    }

    /// Closes the manager: no new channels are created and no new blocks are
    /// ingested. A current channel that never had anything submitted is
    /// dropped outright; otherwise it is close-flushed so its remaining
    /// frames (ending in the closing marker) can still be submitted.
    pub fn close(&mut self) -> Result<(), ChannelManagerError> {
        if self.closed {
            return Ok(());
        }
        info!(target: "channel-manager", "Closing channel manager");
        self.closed = true;

        if self.current_channel.as_ref().is_some_and(Channel::none_submitted) {
            debug!(target: "channel-manager", "Dropping channel with nothing submitted");
            self.current_channel = None;
        }
        if let Some(channel) = self.current_channel.as_mut() {
            channel.close();
            channel.output_frames()?;
        }
        Ok(())
    }

    /// Discards all in-flight state and re-opens the manager. Used by the
    /// driver on reorg recovery; `l1_origin` is the new baseline the driver
    /// replays from.
    pub fn clear(&mut self, l1_origin: BlockId) {
        debug!(target: "channel-manager", l1_origin = %l1_origin, "Clearing channel manager state");
        self.blocks.clear();
        self.tip = None;
        self.current_channel = None;
        self.closed = false;
        self.l1_origin_last_cleared = l1_origin;
    }
}
