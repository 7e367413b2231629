//! Protocol parameters and identifying types.

/// The length of a [ChannelId] in bytes.
pub const CHANNEL_ID_LENGTH: usize = 16;

/// An opaque identifier for a channel, random per channel.
pub type ChannelId = [u8; CHANNEL_ID_LENGTH];

/// The version byte prefixing every data transaction payload.
pub const DERIVATION_VERSION_0: u8 = 0;

/// The number of wire bytes a version-0 frame occupies on top of its data:
/// 16 (channel id) + 2 (frame number) + 4 (data length) + 1 (is-last marker).
pub const FRAME_V0_OVERHEAD: usize = 23;

/// Frames cannot carry more than 1MB of data.
///
/// Data transactions that carry frames are generally not larger than 128 KB
/// due to L1 network conditions, but we leave space to grow larger anyway.
pub const MAX_FRAME_LEN: usize = 1_000_000;

/// The maximum amount of decompressed bytes read out of a single channel.
/// This limit is enforced both when building a channel and when decoding it.
pub const MAX_RLP_BYTES_PER_CHANNEL: u64 = 10_000_000;

/// The leading byte of a brotli-compressed channel payload. Recognised so the
/// decoder can reject it explicitly; only zlib channels are produced today.
pub const CHANNEL_VERSION_BROTLI: u8 = 1;
