//! Reconstructs channels from the frames carried by data transactions.

use crate::{
    batch::{BatchData, BatchDecodingError, BatchReader},
    frame::{Frame, FrameParseError},
    params::ChannelId,
};
use alloc::vec::Vec;
use alloy_primitives::hex;
use hashbrown::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

/// A frame together with the L1 block it was included in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameWithMetadata {
    /// The number of the L1 block whose transaction carried the frame.
    pub inclusion_block: u64,
    /// The frame itself.
    pub frame: Frame,
}

/// A reassembled channel: its frames in accepted order and the batches
/// decoded from the concatenated payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelWithMetadata {
    /// The channel id.
    pub id: ChannelId,
    /// Whether the closing frame was seen, i.e. the channel is complete.
    pub is_ready: bool,
    /// The channel's frames, ordered by frame number.
    pub frames: Vec<FrameWithMetadata>,
    /// The batches decoded from the channel payload, ordered by timestamp.
    pub batches: Vec<BatchData>,
}

/// The ways reassembling a single channel can fail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyErrorKind {
    /// A frame number is missing from the channel.
    #[error("missing frame {missing}")]
    FrameGap {
        /// The lowest frame number that never arrived.
        missing: u16,
    },
    /// A duplicate frame number arrived with different contents.
    #[error("duplicate frame {number} has divergent contents")]
    FrameDivergence {
        /// The frame number that diverged.
        number: u16,
    },
    /// A frame numbered past the closing frame arrived.
    #[error("frame {number} found after the closing frame")]
    FrameAfterLast {
        /// The offending frame number.
        number: u16,
    },
    /// The channel payload failed to decode into batches.
    #[error(transparent)]
    Batch(#[from] BatchDecodingError),
}

/// A reassembly failure, scoped to the channel it occurred in. Other channels
/// are unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("channel {}: {kind}", hex::encode(.channel))]
pub struct ReassemblyError {
    /// The channel the failure occurred in.
    pub channel: ChannelId,
    /// What went wrong.
    pub kind: ReassemblyErrorKind,
}

/// Groups the frames of data transactions by channel and orders each channel
/// back into its payload and batches.
///
/// Transactions must be added in their L1 inclusion order (block number, then
/// transaction index), matching the order the decoder observes them on chain.
#[derive(Debug, Clone, Default)]
pub struct Reassembler {
    /// All frames seen so far, in arrival order.
    frames: Vec<FrameWithMetadata>,
}

impl Reassembler {
    /// Creates an empty [Reassembler].
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one transaction payload (`version || frame || ...`) and queues
    /// its frames.
    pub fn add_transaction(
        &mut self,
        inclusion_block: u64,
        payload: &[u8],
    ) -> Result<(), FrameParseError> {
        let frames = Frame::parse_frames(payload)?;
        debug!(
            target: "reassembler",
            frames = frames.len(),
            inclusion_block,
            "Queued transaction frames"
        );
        self.frames
            .extend(frames.into_iter().map(|frame| FrameWithMetadata { inclusion_block, frame }));
        Ok(())
    }

    /// Consumes the reassembler and produces one result per channel, in the
    /// order channels were first seen. A failing channel does not affect the
    /// others.
    pub fn channels(self) -> Vec<Result<ChannelWithMetadata, ReassemblyError>> {
        let mut order: Vec<ChannelId> = Vec::new();
        let mut by_channel: HashMap<ChannelId, Vec<FrameWithMetadata>> = HashMap::new();
        for frame in self.frames {
            let entry = by_channel.entry(frame.frame.id).or_default();
            if entry.is_empty() {
                order.push(frame.frame.id);
            }
            entry.push(frame);
        }

        order
            .into_iter()
            .map(|id| {
                let frames = by_channel.remove(&id).unwrap_or_default();
                process_frames(id, frames)
            })
            .collect()
    }
}

/// Orders the frames of one channel, validates the sequence, and decodes the
/// concatenated payload into batches.
fn process_frames(
    id: ChannelId,
    mut frames: Vec<FrameWithMetadata>,
) -> Result<ChannelWithMetadata, ReassemblyError> {
    let fail = |kind: ReassemblyErrorKind| ReassemblyError { channel: id, kind };

    // Stable sort keeps duplicates in arrival order so a duplicate is always
    // compared against the frame accepted before it.
    frames.sort_by_key(|f| f.frame.number);

    let mut payload: Vec<u8> = Vec::new();
    let mut last_data: &[u8] = &[];
    let mut next: u64 = 0;
    let mut ready = false;
    for frame in &frames {
        let number = u64::from(frame.frame.number);
        if number == next {
            if ready {
                return Err(fail(ReassemblyErrorKind::FrameAfterLast {
                    number: frame.frame.number,
                }));
            }
            payload.extend_from_slice(&frame.frame.data);
            next += 1;
        } else if next > 0 && number == next - 1 {
            if frame.frame.data != last_data {
                return Err(fail(ReassemblyErrorKind::FrameDivergence {
                    number: frame.frame.number,
                }));
            }
        } else {
            return Err(fail(ReassemblyErrorKind::FrameGap { missing: next as u16 }));
        }
        last_data = &frame.frame.data;
        ready = ready || frame.frame.is_last;
    }

    if !ready {
        warn!(target: "reassembler", channel = %hex::encode(id), "Channel was never closed");
    }

    let mut reader = BatchReader::new(&payload).map_err(|e| fail(e.into()))?;
    let mut batches = Vec::new();
    while let Some(result) = reader.next_batch() {
        match result {
            Ok(batch) => batches.push(batch),
            // A channel still missing its closing frame is expected to cut
            // off mid-batch; everything decoded before the cut stands.
            Err(BatchDecodingError::Truncated) if !ready => break,
            Err(err) => return Err(fail(err.into())),
        }
    }
    batches.sort_by_key(|b| b.batch.timestamp);

    Ok(ChannelWithMetadata { id, is_ready: ready, frames, batches })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::params::DERIVATION_VERSION_0;
    use crate::SingleBatch;
    use alloc::{vec, vec::Vec};
    use alloy_primitives::{Bytes, B256};

    fn test_batches(n: u64) -> Vec<BatchData> {
        (0..n)
            .map(|i| BatchData {
                batch: SingleBatch {
                    parent_hash: B256::repeat_byte(i as u8),
                    epoch_num: 100 + i,
                    epoch_hash: B256::repeat_byte(0x01),
                    timestamp: 1700000000 + i,
                    transactions: vec![Bytes::from(vec![i as u8; 64])],
                },
            })
            .collect()
    }

    /// Compresses the batches and splits the stream into `n` frames for the
    /// given channel, the last one carrying the closing marker.
    fn frames_for(id: ChannelId, batches: &[BatchData], n: usize) -> Vec<Frame> {
        let mut stream = Vec::new();
        for batch in batches {
            batch.encode(&mut stream);
        }
        let compressed = miniz_oxide::deflate::compress_to_vec_zlib(&stream, 9);

        let chunk = compressed.len().div_ceil(n);
        compressed
            .chunks(chunk)
            .enumerate()
            .map(|(i, data)| Frame {
                id,
                number: i as u16,
                data: data.to_vec(),
                is_last: (i + 1) * chunk >= compressed.len(),
            })
            .collect()
    }

    fn payload(frames: &[Frame]) -> Vec<u8> {
        let mut out = vec![DERIVATION_VERSION_0];
        for frame in frames {
            out.extend_from_slice(&frame.encode());
        }
        out
    }

    #[test]
    fn test_reassemble_ready_channel() {
        let batches = test_batches(3);
        let frames = frames_for([0xAA; 16], &batches, 3);

        let mut reassembler = Reassembler::new();
        for (i, frame) in frames.iter().enumerate() {
            reassembler.add_transaction(i as u64, &payload(core::slice::from_ref(frame))).unwrap();
        }

        let channels = reassembler.channels();
        assert_eq!(channels.len(), 1);
        let channel = channels[0].as_ref().unwrap();
        assert!(channel.is_ready);
        assert_eq!(channel.id, [0xAA; 16]);
        assert_eq!(channel.frames.len(), 3);
        assert_eq!(channel.batches, batches);
    }

    #[test]
    fn test_reassemble_out_of_order_frames() {
        let batches = test_batches(2);
        let frames = frames_for([0xBB; 16], &batches, 4);

        let mut reassembler = Reassembler::new();
        for frame in frames.iter().rev() {
            reassembler.add_transaction(0, &payload(core::slice::from_ref(frame))).unwrap();
        }

        let channels = reassembler.channels();
        let channel = channels[0].as_ref().unwrap();
        assert!(channel.is_ready);
        assert_eq!(channel.batches, batches);
    }

    #[test]
    fn test_reassemble_duplicate_frame_same_bytes() {
        let batches = test_batches(1);
        let frames = frames_for([0xCC; 16], &batches, 2);

        let mut reassembler = Reassembler::new();
        reassembler.add_transaction(0, &payload(&frames)).unwrap();
        // The first frame lands a second time, byte-identical.
        reassembler.add_transaction(1, &payload(core::slice::from_ref(&frames[0]))).unwrap();

        let channels = reassembler.channels();
        let channel = channels[0].as_ref().unwrap();
        assert!(channel.is_ready);
        assert_eq!(channel.batches, batches);
    }

    #[test]
    fn test_reassemble_duplicate_frame_divergent_bytes() {
        let batches = test_batches(1);
        let frames = frames_for([0xDD; 16], &batches, 2);

        let mut reassembler = Reassembler::new();
        reassembler.add_transaction(0, &payload(&frames)).unwrap();
        let mut tampered = frames[0].clone();
        tampered.data[0] ^= 0xFF;
        reassembler.add_transaction(1, &payload(core::slice::from_ref(&tampered))).unwrap();

        let channels = reassembler.channels();
        let err = channels[0].as_ref().unwrap_err();
        assert_eq!(err.kind, ReassemblyErrorKind::FrameDivergence { number: 0 });
    }

    #[test]
    fn test_reassemble_frame_gap() {
        let batches = test_batches(2);
        let frames = frames_for([0xEE; 16], &batches, 3);

        let mut reassembler = Reassembler::new();
        reassembler.add_transaction(0, &payload(core::slice::from_ref(&frames[0]))).unwrap();
        reassembler.add_transaction(1, &payload(core::slice::from_ref(&frames[2]))).unwrap();

        let channels = reassembler.channels();
        let err = channels[0].as_ref().unwrap_err();
        assert_eq!(err.kind, ReassemblyErrorKind::FrameGap { missing: 1 });
    }

    #[test]
    fn test_reassemble_unready_channel_tolerates_truncation() {
        let batches = test_batches(2);
        let mut frames = frames_for([0x11; 16], &batches, 4);
        // Drop the closing frame: the channel stays incomplete.
        frames.pop();

        let mut reassembler = Reassembler::new();
        reassembler.add_transaction(0, &payload(&frames)).unwrap();

        let channels = reassembler.channels();
        let channel = channels[0].as_ref().unwrap();
        assert!(!channel.is_ready);
        // Only a prefix of the batch stream survives the cut.
        assert!(channel.batches.len() <= batches.len());
        assert_eq!(channel.batches[..], batches[..channel.batches.len()]);
    }

    #[test]
    fn test_reassemble_one_bad_channel_does_not_poison_others() {
        let good = test_batches(1);
        let good_frames = frames_for([0x22; 16], &good, 2);
        let bad_frames = frames_for([0x33; 16], &test_batches(2), 3);

        let mut reassembler = Reassembler::new();
        reassembler.add_transaction(0, &payload(&good_frames)).unwrap();
        // The bad channel is missing frame 1.
        reassembler.add_transaction(1, &payload(core::slice::from_ref(&bad_frames[0]))).unwrap();
        reassembler.add_transaction(2, &payload(core::slice::from_ref(&bad_frames[2]))).unwrap();

        let channels = reassembler.channels();
        assert_eq!(channels.len(), 2);
        assert!(channels[0].is_ok());
        assert_eq!(
            channels[1].as_ref().unwrap_err().kind,
            ReassemblyErrorKind::FrameGap { missing: 1 }
        );
    }

    #[test]
    fn test_reassemble_rejects_malformed_payload() {
        let mut reassembler = Reassembler::new();
        assert!(reassembler.add_transaction(0, &[]).is_err());
        assert!(reassembler.add_transaction(0, &[0x01, 0x02]).is_err());
    }
}
