//! Transaction payload types: frames as queued for submission, and the
//! identity of a data transaction.

use alloy_primitives::{hex, Bytes};
use hana_protocol::{ChannelId, DERIVATION_VERSION_0};

/// Identifies a frame by its channel and frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameId {
    /// The channel the frame belongs to.
    pub channel_id: ChannelId,
    /// The frame number within the channel.
    pub number: u16,
}

impl core::fmt::Display for FrameId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", hex::encode(self.channel_id), self.number)
    }
}

/// A frame ready for submission: its identity, its wire-encoded bytes, and
/// whether it closes its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameData {
    /// The frame's identity.
    pub id: FrameId,
    /// The wire-encoded frame bytes.
    pub data: Bytes,
    /// Whether this is the channel's closing frame.
    pub is_last: bool,
}

/// The payload of a single data transaction: one or more frames.
///
/// Under calldata transport each transaction carries exactly one frame; under
/// blob transport a transaction carries up to the configured target number of
/// frames.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxData {
    /// The frames in this transaction, in channel order.
    pub frames: Vec<FrameData>,
    /// Whether this payload should be sent as a blob.
    pub as_blob: bool,
}

impl TxData {
    /// Returns the identity of this transaction's payload.
    pub fn id(&self) -> TxId {
        TxId(self.frames.iter().map(|f| f.id).collect())
    }

    /// Returns the transaction payload: the version byte followed by the
    /// concatenated frames.
    pub fn call_data(&self) -> Bytes {
        let mut data = Vec::with_capacity(1 + self.len());
        data.push(DERIVATION_VERSION_0);
        for frame in &self.frames {
            data.extend_from_slice(&frame.data);
        }
        data.into()
    }

    /// The sum of all frame byte lengths, excluding the version byte.
    pub fn len(&self) -> usize {
        self.frames.iter().map(|f| f.data.len()).sum()
    }

    /// Whether the payload carries no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// An opaque identifier for a data transaction: the sequence of its frame
/// ids. Its [Display][core::fmt::Display] form works as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TxId(Vec<FrameId>);

impl TxId {
    /// The channel id of the transaction's first frame, which identifies the
    /// channel the transaction belongs to.
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.0.first().map(|f| f.channel_id)
    }

    /// The frame ids making up this identity.
    pub fn frame_ids(&self) -> &[FrameId] {
        &self.0
    }
}

impl From<Vec<FrameId>> for TxId {
    fn from(frames: Vec<FrameId>) -> Self {
        Self(frames)
    }
}

impl core::fmt::Display for TxId {
    /// Renders consecutive same-channel frames grouped together:
    /// `chid:2+3+4|chid2:0`. An empty id renders as the empty string.
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut current: Option<ChannelId> = None;
        for frame in &self.0 {
            if current == Some(frame.channel_id) {
                write!(f, "+{}", frame.number)?;
            } else {
                if current.is_some() {
                    write!(f, "|")?;
                }
                current = Some(frame.channel_id);
                write!(f, "{}:{}", hex::encode(frame.channel_id), frame.number)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn frame_id(channel_id: ChannelId, number: u16) -> FrameId {
        FrameId { channel_id, number }
    }

    #[test]
    fn test_txid_string_groups_channels() {
        let mut ca = [0u8; 16];
        ca[0] = 0xCA;
        ca[15] = 0xAF;
        let mut be = [0u8; 16];
        be[0] = 0xBE;
        be[15] = 0xEF;

        let id = TxId::from(vec![
            frame_id(ca, 42),
            frame_id(ca, 33),
            frame_id(be, 0),
            frame_id(be, 128),
        ]);
        assert_eq!(
            id.to_string(),
            "ca0000000000000000000000000000af:42+33|be0000000000000000000000000000ef:0+128"
        );
    }

    #[test]
    fn test_txid_string_single_frame() {
        let id = TxId::from(vec![frame_id([0x01; 16], 7)]);
        assert_eq!(id.to_string(), format!("{}:7", hex::encode([0x01; 16])));
    }

    #[test]
    fn test_txid_string_empty() {
        assert_eq!(TxId::default().to_string(), "");
        assert_eq!(TxId::from(Vec::new()).to_string(), "");
    }

    #[test]
    fn test_call_data_concatenates_frames() {
        let frames = vec![
            FrameData {
                id: frame_id([0x01; 16], 0),
                data: Bytes::from(vec![0xAA, 0xBB]),
                is_last: false,
            },
            FrameData { id: frame_id([0x01; 16], 1), data: Bytes::from(vec![0xCC]), is_last: true },
        ];
        let tx = TxData { frames, as_blob: false };

        assert_eq!(tx.len(), 3);
        assert_eq!(tx.call_data().as_ref(), &[DERIVATION_VERSION_0, 0xAA, 0xBB, 0xCC]);
        assert_eq!(tx.id().channel_id(), Some([0x01; 16]));
    }
}
