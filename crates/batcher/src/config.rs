//! Channel configuration.

use hana_protocol::{FRAME_V0_OVERHEAD, MAX_FRAME_LEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The compression algorithm used for channel data.
///
/// Only zlib channels are produced today; the enum is the hook for future
/// algorithms, which the decoder already recognises and rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgo {
    /// Streaming zlib at the highest compression level.
    #[default]
    Zlib,
}

impl core::fmt::Display for CompressionAlgo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Zlib => write!(f, "zlib"),
        }
    }
}

/// An invalid [ChannelConfig].
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ConfigError {
    /// The max frame size cannot hold a frame's fixed-size fields.
    #[error("max frame size {0} is below the frame overhead of {FRAME_V0_OVERHEAD} bytes")]
    FrameSizeTooSmall(u64),
    /// The max frame size would produce undecodable frames.
    #[error("max frame size {0} exceeds the maximum frame length")]
    FrameSizeTooLarge(u64),
    /// The assumed compression ratio must be a positive number.
    #[error("approximate compression ratio must be positive, got {0}")]
    InvalidComprRatio(f64),
}

/// Configuration for a channel and the manager driving it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// The soft per-frame byte target: frames are emitted once at least this
    /// many compressed bytes are ready.
    pub target_frame_size: u64,
    /// The hard per-frame ceiling, including the frame overhead.
    pub max_frame_size: u64,
    /// The desired number of frames per channel.
    pub target_num_frames: u64,
    /// The expected compressed/raw ratio, used to budget how much input a
    /// channel accepts before it is declared full.
    pub approx_compr_ratio: f64,
    /// The L1-block span after which an open channel is declared expired.
    pub channel_timeout: u64,
    /// Whether transactions carry multiple frames (blob transport) or exactly
    /// one (calldata).
    pub use_blobs: bool,
    /// The channel compression algorithm.
    pub compression_algo: CompressionAlgo,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            target_frame_size: 100_000,
            max_frame_size: 120_000,
            target_num_frames: 1,
            approx_compr_ratio: 0.6,
            channel_timeout: 300,
            use_blobs: false,
            compression_algo: CompressionAlgo::Zlib,
        }
    }
}

impl ChannelConfig {
    /// Validates the configuration.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.max_frame_size < FRAME_V0_OVERHEAD as u64 {
            return Err(ConfigError::FrameSizeTooSmall(self.max_frame_size));
        }
        if self.max_frame_size - FRAME_V0_OVERHEAD as u64 > MAX_FRAME_LEN as u64 {
            return Err(ConfigError::FrameSizeTooLarge(self.max_frame_size));
        }
        if !(self.approx_compr_ratio > 0.0) {
            return Err(ConfigError::InvalidComprRatio(self.approx_compr_ratio));
        }
        Ok(())
    }

    /// The raw input budget of a channel: once this many batch bytes have
    /// been ingested the channel is declared full.
    pub fn input_threshold(&self) -> u64 {
        ((self.target_num_frames * self.target_frame_size) as f64 / self.approx_compr_ratio) as u64
    }

    /// The number of frames assembled into one transaction.
    pub fn max_frames_per_tx(&self) -> usize {
        if self.use_blobs {
            self.target_num_frames.max(1) as usize
        } else {
            1
        }
    }
}
