//! The [Frame] type and its wire codec.

use crate::params::{ChannelId, DERIVATION_VERSION_0, FRAME_V0_OVERHEAD, MAX_FRAME_LEN};
use alloc::vec::Vec;
use thiserror::Error;

/// An error decoding a single frame.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDecodingError {
    /// The frame data is too short to hold the fixed-size fields.
    #[error("frame data too short: {0} bytes")]
    DataTooShort(usize),
    /// The encoded data length is larger than [MAX_FRAME_LEN] or overruns the buffer.
    #[error("frame data too large: {0} bytes")]
    DataTooLarge(usize),
    /// The is-last marker was not 0 or 1.
    #[error("invalid is-last marker: {0}")]
    InvalidIsLast(u8),
}

/// An error parsing a transaction payload into frames.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameParseError {
    /// The payload is empty.
    #[error("no frames to parse")]
    NoFrames,
    /// The payload's leading version byte is not [DERIVATION_VERSION_0].
    #[error("unsupported derivation version: {0}")]
    UnsupportedVersion(u8),
    /// A frame inside the payload failed to decode.
    #[error("frame decoding error: {0}")]
    FrameDecoding(#[from] FrameDecodingError),
}

/// A channel frame is a segment of a channel's data.
///
/// *Encoding*
/// frame = `channel_id ++ frame_number ++ frame_data_length ++ frame_data ++ is_last`
/// * channel_id        = bytes16
/// * frame_number      = uint16
/// * frame_data_length = uint32
/// * frame_data        = bytes
/// * is_last           = bool
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    /// The id of the channel this frame belongs to.
    pub id: ChannelId,
    /// The number of the frame within its channel.
    pub number: u16,
    /// The data within the frame.
    pub data: Vec<u8>,
    /// Whether or not the frame is the last in the channel.
    pub is_last: bool,
}

impl Frame {
    /// Encode the frame into a byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(FRAME_V0_OVERHEAD + self.data.len());
        encoded.extend_from_slice(&self.id);
        encoded.extend_from_slice(&self.number.to_be_bytes());
        encoded.extend_from_slice(&(self.data.len() as u32).to_be_bytes());
        encoded.extend_from_slice(&self.data);
        encoded.push(self.is_last as u8);
        encoded
    }

    /// Decode a single frame from the front of `encoded`, returning the number
    /// of bytes consumed alongside the frame.
    pub fn decode(encoded: &[u8]) -> Result<(usize, Self), FrameDecodingError> {
        if encoded.len() < FRAME_V0_OVERHEAD {
            return Err(FrameDecodingError::DataTooShort(encoded.len()));
        }

        let mut id = [0u8; 16];
        id.copy_from_slice(&encoded[..16]);
        let number = u16::from_be_bytes([encoded[16], encoded[17]]);
        let data_len =
            u32::from_be_bytes([encoded[18], encoded[19], encoded[20], encoded[21]]) as usize;

        // The data length may neither exceed the protocol maximum nor overrun
        // the buffer (leaving room for the trailing is-last byte).
        if data_len > MAX_FRAME_LEN || data_len > encoded.len() - FRAME_V0_OVERHEAD {
            return Err(FrameDecodingError::DataTooLarge(data_len));
        }

        let data = encoded[22..22 + data_len].to_vec();
        let is_last = match encoded[22 + data_len] {
            0 => false,
            1 => true,
            b => return Err(FrameDecodingError::InvalidIsLast(b)),
        };
        Ok((FRAME_V0_OVERHEAD + data_len, Self { id, number, data, is_last }))
    }

    /// Parses the on-chain serialization of frame(s) in a data transaction.
    /// Currently only version 0 of the serialization format is supported; the
    /// version byte is consumed exactly once per payload and any other value
    /// is rejected. All frames must parse without error, there must not be any
    /// left-over data, and there must be at least one frame.
    ///
    /// Frames are stored in data transactions with the following format:
    /// * `data = DERIVATION_VERSION_0 ++ Frame(s)` where one or more frames
    ///   are concatenated together.
    pub fn parse_frames(encoded: &[u8]) -> Result<Vec<Self>, FrameParseError> {
        if encoded.is_empty() {
            return Err(FrameParseError::NoFrames);
        }
        if encoded[0] != DERIVATION_VERSION_0 {
            return Err(FrameParseError::UnsupportedVersion(encoded[0]));
        }

        let data = &encoded[1..];
        let mut frames = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let (frame_length, frame) = Self::decode(&data[offset..])?;
            frames.push(frame);
            offset += frame_length;
        }

        if frames.is_empty() {
            return Err(FrameParseError::NoFrames);
        }

        Ok(frames)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_encode_frame_roundtrip() {
        let frame = Frame { id: [0xFF; 16], number: 0xEE, data: vec![0xDD; 50], is_last: true };

        let (consumed, frame_decoded) = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(consumed, FRAME_V0_OVERHEAD + 50);
        assert_eq!(frame, frame_decoded);
    }

    #[test]
    fn test_decode_data_too_short() {
        let frame = Frame { id: [0xFF; 16], number: 0xEE, data: vec![0xDD; 22], is_last: true };
        let err = Frame::decode(&frame.encode()[..22]).unwrap_err();
        assert_eq!(err, FrameDecodingError::DataTooShort(22));
    }

    #[test]
    fn test_decode_exceeds_max_data_len() {
        let frame = Frame {
            id: [0xFF; 16],
            number: 0xEE,
            data: vec![0xDD; MAX_FRAME_LEN + 1],
            is_last: true,
        };
        let err = Frame::decode(&frame.encode()).unwrap_err();
        assert_eq!(err, FrameDecodingError::DataTooLarge(MAX_FRAME_LEN + 1));
    }

    #[test]
    fn test_decode_malicious_data_len() {
        let frame = Frame { id: [0xFF; 16], number: 0xEE, data: vec![0xDD; 50], is_last: true };
        let mut encoded = frame.encode();
        let data_len = (encoded.len() - 22) as u32;
        encoded[18..22].copy_from_slice(&data_len.to_be_bytes());

        let err = Frame::decode(&encoded).unwrap_err();
        assert_eq!(err, FrameDecodingError::DataTooLarge(encoded.len() - 22));

        let valid_data_len = (encoded.len() - 23) as u32;
        encoded[18..22].copy_from_slice(&valid_data_len.to_be_bytes());
        let (_, frame_decoded) = Frame::decode(&encoded).unwrap();
        assert_eq!(frame, frame_decoded);
    }

    #[test]
    fn test_decode_invalid_is_last() {
        let frame = Frame { id: [0xFF; 16], number: 0xEE, data: vec![0xDD; 4], is_last: false };
        let mut encoded = frame.encode();
        *encoded.last_mut().unwrap() = 2;
        let err = Frame::decode(&encoded).unwrap_err();
        assert_eq!(err, FrameDecodingError::InvalidIsLast(2));
    }

    #[test]
    fn test_parse_many() {
        let frame = Frame { id: [0xFF; 16], number: 0xEE, data: vec![0xDD; 50], is_last: true };
        let mut bytes = vec![DERIVATION_VERSION_0];
        (0..5).for_each(|_| {
            bytes.extend_from_slice(&frame.encode());
        });

        let frames = Frame::parse_frames(bytes.as_slice()).unwrap();
        assert_eq!(frames.len(), 5);
        (0..5).for_each(|i| {
            assert_eq!(frames[i], frame);
        });
    }

    #[test]
    fn test_parse_empty_payload() {
        assert_eq!(Frame::parse_frames(&[]).unwrap_err(), FrameParseError::NoFrames);
        assert_eq!(
            Frame::parse_frames(&[DERIVATION_VERSION_0]).unwrap_err(),
            FrameParseError::NoFrames
        );
    }

    #[test]
    fn test_parse_unsupported_version() {
        let frame = Frame::default();
        let mut bytes = vec![0x01];
        bytes.extend_from_slice(&frame.encode());
        assert_eq!(
            Frame::parse_frames(&bytes).unwrap_err(),
            FrameParseError::UnsupportedVersion(0x01)
        );
    }

    #[test]
    fn test_parse_truncated_payload() {
        let frame = Frame { id: [0xFF; 16], number: 1, data: vec![0xDD; 50], is_last: false };
        let mut bytes = vec![DERIVATION_VERSION_0];
        bytes.extend_from_slice(&frame.encode());
        bytes.extend_from_slice(&frame.encode()[..30]);

        let err = Frame::parse_frames(&bytes).unwrap_err();
        assert!(matches!(err, FrameParseError::FrameDecoding(_)));
    }
}
