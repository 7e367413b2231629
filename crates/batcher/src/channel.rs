//! The [Channel]: a [ChannelBuilder] plus the bookkeeping of in-flight and
//! confirmed transactions.

use crate::{
    builder::{ChannelBuilder, ChannelBuilderError},
    config::ChannelConfig,
    tx_data::{TxData, TxId},
};
use hana_protocol::{BlockId, ChannelId, L2Block};
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// A channel in flight: the builder producing its frames and the maps
/// tracking which of its transactions are pending or confirmed.
///
/// The pending and confirmed maps are disjoint, keyed by the transaction id's
/// string form.
#[derive(Debug)]
pub struct Channel {
    /// The channel configuration.
    cfg: ChannelConfig,
    /// The builder owning compression and the pending frame queue.
    builder: ChannelBuilder,
    /// Transactions handed out for submission but not yet confirmed.
    pending_txs: HashMap<String, TxData>,
    /// Confirmed transactions and the L1 block each was included in.
    confirmed_txs: HashMap<String, BlockId>,
    /// The L1 block the channel is pegged to for timeout accounting.
    l1_origin: BlockId,
}

impl Channel {
    /// Creates a new [Channel] pegged to the given L1 origin.
    pub fn new(cfg: ChannelConfig, l1_origin: BlockId) -> Result<Self, ChannelBuilderError> {
        let builder = ChannelBuilder::new(cfg.clone())?;
        Ok(Self {
            cfg,
            builder,
            pending_txs: HashMap::new(),
            confirmed_txs: HashMap::new(),
            l1_origin,
        })
    }

    /// The channel id.
    pub fn id(&self) -> ChannelId {
        self.builder.id()
    }

    /// The L1 block the channel's timeout is measured from.
    pub fn l1_origin(&self) -> BlockId {
        self.l1_origin
    }

    /// Ingests a block into the channel's builder.
    pub fn add_block(&mut self, block: &L2Block) -> Result<(), ChannelBuilderError> {
        self.builder.add_block(block)
    }

    /// Whether the channel accepts no further blocks.
    pub fn is_full(&self) -> bool {
        self.builder.is_full()
    }

    /// Total RLP bytes ingested into the channel so far.
    pub fn input_bytes(&self) -> u64 {
        self.builder.input_bytes()
    }

    /// Produces frames from the builder's compressed stream.
    pub fn output_frames(&mut self) -> Result<(), ChannelBuilderError> {
        self.builder.output_frames()
    }

    /// Closes the channel for further blocks.
    pub fn close(&mut self) {
        self.builder.close();
    }

    /// The number of frames queued but not yet taken.
    pub fn pending_frames(&self) -> usize {
        self.builder.pending_frames()
    }

    /// Direct access to the builder, for queueing prebuilt frames.
    pub fn builder_mut(&mut self) -> &mut ChannelBuilder {
        &mut self.builder
    }

    /// Whether enough pending frames exist to assemble one [TxData].
    ///
    /// Under calldata transport any pending frame suffices. Under blob
    /// transport, assembly waits until a full transaction's worth of frames
    /// is pending, unless the channel is already full or closed, in which
    /// case whatever remains is assembled.
    pub fn has_tx_data(&self) -> bool {
        if !self.cfg.use_blobs || self.is_full() || self.builder.is_closed() {
            return self.builder.has_frame();
        }
        self.builder.pending_frames() >= self.cfg.max_frames_per_tx()
    }

    /// Drains the frames of one transaction from the builder, records the
    /// transaction as pending, and returns it.
    ///
    /// Callers must check [Channel::has_tx_data] first.
    pub fn next_tx_data(&mut self) -> TxData {
        let mut tx = TxData { frames: Vec::new(), as_blob: self.cfg.use_blobs };
        for _ in 0..self.cfg.max_frames_per_tx() {
            match self.builder.next_frame() {
                Some(frame) => tx.frames.push(frame),
                None => break,
            }
        }
        let id = tx.id();
        debug!(
            target: "channel",
            tx = %id,
            frames = tx.frames.len(),
            "Assembled transaction data"
        );
        self.pending_txs.insert(id.to_string(), tx.clone());
        tx
    }

    /// Marks a pending transaction as confirmed at the given L1 block.
    /// Unknown ids are ignored, making duplicate confirmations harmless.
    /// Returns whether the channel's state changed.
    pub fn tx_confirmed(&mut self, id: &TxId, inclusion: BlockId) -> bool {
        let key = id.to_string();
        if self.pending_txs.remove(&key).is_none() {
            trace!(target: "channel", tx = %id, "Confirmation for unknown transaction");
            return false;
        }
        debug!(target: "channel", tx = %id, inclusion = %inclusion, "Transaction confirmed");
        self.confirmed_txs.insert(key, inclusion);
        true
    }

    /// Handles a failed transaction by re-queueing its frames at the front of
    /// the builder's pending queue, preserving their original frame numbers.
    /// Unknown ids are ignored. Returns whether the channel's state changed.
    pub fn tx_failed(&mut self, id: &TxId) -> bool {
        let Some(tx) = self.pending_txs.remove(&id.to_string()) else {
            trace!(target: "channel", tx = %id, "Failure for unknown transaction");
            return false;
        };
        warn!(
            target: "channel",
            tx = %id,
            frames = tx.frames.len(),
            "Transaction failed, re-queueing frames"
        );
        self.builder.requeue_frames(tx.frames);
        true
    }

    /// Whether the channel has expired: true iff some confirmed transaction
    /// landed at least `channel_timeout` L1 blocks past the channel's origin.
    pub fn is_timed_out(&self) -> bool {
        self.confirmed_txs
            .values()
            .any(|block| block.number >= self.l1_origin.number + self.cfg.channel_timeout)
    }

    /// Whether every produced frame has been submitted and confirmed and the
    /// channel is closed: nothing further will ever come out of it.
    pub fn is_fully_confirmed(&self) -> bool {
        self.builder.last_frame_emitted()
            && !self.builder.has_frame()
            && self.pending_txs.is_empty()
    }

    /// Whether no transaction of this channel was ever handed out or
    /// confirmed, i.e. dropping the channel loses nothing that was sent.
    pub fn none_submitted(&self) -> bool {
        self.pending_txs.is_empty() && self.confirmed_txs.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tx_data::{FrameData, FrameId};
    use alloy_primitives::{Bytes, B256};

    fn mock_frames(channel_id: ChannelId, n: u16) -> Vec<FrameData> {
        (0..n)
            .map(|i| FrameData {
                id: FrameId { channel_id, number: i },
                data: Bytes::from(vec![i as u8]),
                is_last: false,
            })
            .collect()
    }

    fn blob_cfg(target_num_frames: u64) -> ChannelConfig {
        ChannelConfig { use_blobs: true, target_num_frames, ..Default::default() }
    }

    #[test]
    fn test_channel_timeout() {
        let cfg = ChannelConfig { channel_timeout: 100, ..Default::default() };
        let mut channel = Channel::new(cfg, BlockId::default()).unwrap();

        // No confirmed transactions: cannot be timed out.
        assert!(!channel.is_timed_out());

        channel.confirmed_txs.insert("tx0".to_string(), BlockId { number: 0, ..Default::default() });
        channel
            .confirmed_txs
            .insert("tx1".to_string(), BlockId { number: 99, ..Default::default() });
        assert!(!channel.is_timed_out());

        channel
            .confirmed_txs
            .insert("tx2".to_string(), BlockId { number: 101, ..Default::default() });
        assert!(channel.is_timed_out());
    }

    #[test]
    fn test_channel_next_tx_data_single_frame() {
        let n = 6u16;
        let cfg = ChannelConfig { use_blobs: false, target_num_frames: 6, ..Default::default() };
        let mut channel = Channel::new(cfg, BlockId::default()).unwrap();
        let id = channel.id();

        let frames = mock_frames(id, n + 1);
        channel.builder_mut().push_frames(frames[..(n - 1) as usize].iter().cloned());

        for i in 0..n - 1 {
            assert!(channel.has_tx_data(), "expected tx data {i}");
            let tx = channel.next_tx_data();
            assert_eq!(tx.frames.len(), 1);
            assert_eq!(tx.frames[0].id, FrameId { channel_id: id, number: i });
            assert_eq!(tx.frames[0].data.as_ref(), &[i as u8]);
        }
        assert!(!channel.has_tx_data());

        // Push in the last two.
        channel.builder_mut().push_frames(frames[(n - 1) as usize..].iter().cloned());
        for i in n - 1..n + 1 {
            assert!(channel.has_tx_data());
            let tx = channel.next_tx_data();
            assert_eq!(tx.frames.len(), 1);
            assert_eq!(tx.frames[0].id, FrameId { channel_id: id, number: i });
        }
        assert!(!channel.has_tx_data());
    }

    #[test]
    fn test_channel_next_tx_data_multi_frame() {
        let n = 6u16;
        let mut channel = Channel::new(blob_cfg(n as u64), BlockId::default()).unwrap();
        let id = channel.id();

        let frames = mock_frames(id, n + 1);
        // Fewer than the target: no tx data yet.
        channel.builder_mut().push_frames(frames[..(n - 1) as usize].iter().cloned());
        assert!(!channel.has_tx_data());

        // Reaching the target releases a full transaction's worth of frames.
        channel.builder_mut().push_frames(frames[(n - 1) as usize..].iter().cloned());
        assert!(channel.has_tx_data());
        let tx = channel.next_tx_data();
        assert!(tx.as_blob);
        assert_eq!(tx.frames.len(), n as usize);
        for (i, frame) in tx.frames.iter().enumerate() {
            assert_eq!(frame.id, FrameId { channel_id: id, number: i as u16 });
        }

        // A single leftover frame is not enough while the channel is open.
        assert!(!channel.has_tx_data());

        // Closing the channel releases whatever remains.
        channel.close();
        assert!(channel.has_tx_data());
        let tx = channel.next_tx_data();
        assert_eq!(tx.frames.len(), 1);
        assert!(!channel.has_tx_data());
    }

    #[test]
    fn test_channel_tx_confirmed_moves_between_maps() {
        let mut channel = Channel::new(ChannelConfig::default(), BlockId::default()).unwrap();
        let id = channel.id();
        channel.builder_mut().push_frames(mock_frames(id, 1));

        let tx = channel.next_tx_data();
        let tx_id = tx.id();
        assert_eq!(channel.pending_txs.len(), 1);

        // An unknown id changes nothing.
        let unknown = TxId::from(vec![FrameId { channel_id: [0x69; 16], number: 0 }]);
        assert!(!channel.tx_confirmed(&unknown, BlockId::default()));
        assert_eq!(channel.pending_txs.len(), 1);
        assert!(channel.confirmed_txs.is_empty());

        let inclusion = BlockId { hash: B256::repeat_byte(0x69), number: 7 };
        assert!(channel.tx_confirmed(&tx_id, inclusion));
        assert!(channel.pending_txs.is_empty());
        assert_eq!(channel.confirmed_txs.get(&tx_id.to_string()), Some(&inclusion));

        // Confirming again is a no-op and leaves the single-call state.
        assert!(!channel.tx_confirmed(&tx_id, BlockId { number: 9, ..inclusion }));
        assert_eq!(channel.confirmed_txs.len(), 1);
        assert_eq!(channel.confirmed_txs.get(&tx_id.to_string()), Some(&inclusion));
    }

    #[test]
    fn test_channel_tx_failed_requeues_frames() {
        let mut channel = Channel::new(ChannelConfig::default(), BlockId::default()).unwrap();
        let id = channel.id();
        channel.builder_mut().push_frames(mock_frames(id, 1));

        let tx = channel.next_tx_data();
        assert_eq!(channel.pending_frames(), 0);

        // Unknown ids change nothing.
        let unknown = TxId::from(vec![FrameId { channel_id: [0x69; 16], number: 0 }]);
        assert!(!channel.tx_failed(&unknown));
        assert_eq!(channel.pending_frames(), 0);
        assert_eq!(channel.pending_txs.len(), 1);

        assert!(channel.tx_failed(&tx.id()));
        assert!(channel.pending_txs.is_empty());
        assert_eq!(channel.pending_frames(), 1);

        // The re-queued frame assembles into a byte-identical transaction.
        let resent = channel.next_tx_data();
        assert_eq!(resent.call_data(), tx.call_data());
    }

    #[test]
    fn test_channel_none_submitted() {
        let mut channel = Channel::new(ChannelConfig::default(), BlockId::default()).unwrap();
        let id = channel.id();
        assert!(channel.none_submitted());

        channel.builder_mut().push_frames(mock_frames(id, 1));
        assert!(channel.none_submitted());

        let tx = channel.next_tx_data();
        assert!(!channel.none_submitted());

        channel.tx_confirmed(&tx.id(), BlockId::default());
        assert!(!channel.none_submitted());
    }
}
