//! The [ChannelBuilder]: block intake, compression, and frame production for
//! a single channel.

use crate::{
    compressor::{ChannelCompressor, CompressorError},
    config::{ChannelConfig, ConfigError},
    tx_data::{FrameData, FrameId},
};
use hana_protocol::{
    BatchData, ChannelId, Frame, L2Block, SingleBatch, FRAME_V0_OVERHEAD,
    MAX_RLP_BYTES_PER_CHANNEL,
};
use rand::Rng;
use std::collections::VecDeque;
use thiserror::Error;
use tracing::debug;

/// Why a channel stopped accepting blocks.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelFullError {
    /// The channel's raw input budget was consumed.
    #[error("input target reached")]
    InputTargetReached,
    /// The compressor refused further data for the current frame ceiling.
    #[error("max frame size reached")]
    MaxFrameSizeReached,
    /// The channel would exceed the maximum decompressed size.
    #[error("too many RLP bytes in channel")]
    TooManyRlpBytes,
    /// The frame numbering space is exhausted.
    #[error("frame number overflow")]
    MaxFrameIndex,
    /// The channel was closed.
    #[error("channel terminated")]
    Terminated,
}

/// An error from the [ChannelBuilder].
#[derive(Error, Debug)]
pub enum ChannelBuilderError {
    /// The channel accepts no further blocks; the offending block was not
    /// consumed.
    #[error("channel full: {0}")]
    ChannelFull(ChannelFullError),
    /// The channel configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A compressor failure.
    #[error(transparent)]
    Compressor(#[from] CompressorError),
}

/// Ingests L2 blocks into a compressed channel and splits the compressed
/// stream into numbered frames.
///
/// Frames are produced in strict numerical order starting at zero; numbering
/// never resets within a channel, and exactly one frame, the terminal one,
/// carries the closing marker.
#[derive(Debug)]
pub struct ChannelBuilder {
    /// The channel configuration.
    cfg: ChannelConfig,
    /// The channel id, random per channel.
    id: ChannelId,
    /// The streaming compressor owning the channel's buffers.
    compressor: ChannelCompressor,
    /// Total RLP bytes ingested so far.
    rlp_length: u64,
    /// Frames produced but not yet taken for submission.
    frames: VecDeque<FrameData>,
    /// The number the next produced frame will carry.
    next_frame_number: u16,
    /// Whether the channel was closed for further blocks.
    closed: bool,
    /// Whether the closing frame has been produced.
    emitted_last: bool,
    /// Set once the channel stops accepting blocks, with the reason.
    full_reason: Option<ChannelFullError>,
}

impl ChannelBuilder {
    /// Creates a new [ChannelBuilder] with a random channel id.
    pub fn new(cfg: ChannelConfig) -> Result<Self, ChannelBuilderError> {
        cfg.check()?;
        let id: ChannelId = rand::thread_rng().gen();
        let compressor = ChannelCompressor::new(cfg.max_frame_size);
        Ok(Self {
            cfg,
            id,
            compressor,
            rlp_length: 0,
            frames: VecDeque::new(),
            next_frame_number: 0,
            closed: false,
            emitted_last: false,
            full_reason: None,
        })
    }

    /// The channel id.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Total RLP bytes ingested so far.
    pub fn input_bytes(&self) -> u64 {
        self.rlp_length
    }

    /// Whether the channel accepts no further blocks.
    pub fn is_full(&self) -> bool {
        self.full_reason.is_some()
    }

    /// Why the channel is full, if it is.
    pub fn full_reason(&self) -> Option<ChannelFullError> {
        self.full_reason
    }

    /// Whether the channel was closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether the closing frame has been produced.
    pub fn last_frame_emitted(&self) -> bool {
        self.emitted_last
    }

    /// The number of frames queued but not yet taken.
    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }

    /// Whether any frame is queued.
    pub fn has_frame(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Serialises the block into the compressor as a batch.
    ///
    /// Fails with [ChannelBuilderError::ChannelFull] when the channel accepts
    /// no further data; the block is never partially consumed.
    pub fn add_block(&mut self, block: &L2Block) -> Result<(), ChannelBuilderError> {
        if self.closed {
            return Err(ChannelBuilderError::ChannelFull(ChannelFullError::Terminated));
        }
        if let Some(reason) = self.full_reason {
            return Err(ChannelBuilderError::ChannelFull(reason));
        }

        let encoded = BatchData::from(SingleBatch::from(block)).encoded();
        if self.rlp_length + encoded.len() as u64 > MAX_RLP_BYTES_PER_CHANNEL {
            self.full_reason = Some(ChannelFullError::TooManyRlpBytes);
            return Err(ChannelBuilderError::ChannelFull(ChannelFullError::TooManyRlpBytes));
        }

        match self.compressor.write(&encoded) {
            Ok(_) => self.rlp_length += encoded.len() as u64,
            Err(CompressorError::MaxFrameSizeReached) => {
                self.full_reason = Some(ChannelFullError::MaxFrameSizeReached);
                return Err(ChannelBuilderError::ChannelFull(
                    ChannelFullError::MaxFrameSizeReached,
                ));
            }
            Err(err) => return Err(err.into()),
        }

        if self.rlp_length >= self.cfg.input_threshold() {
            debug!(
                target: "channel-builder",
                input_bytes = self.rlp_length,
                threshold = self.cfg.input_threshold(),
                "Channel reached its input target"
            );
            self.full_reason = Some(ChannelFullError::InputTargetReached);
        }

        Ok(())
    }

    /// Closes the channel for further blocks. The closing frame is produced
    /// by the next [ChannelBuilder::output_frames] call.
    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            if self.full_reason.is_none() {
                self.full_reason = Some(ChannelFullError::Terminated);
            }
        }
    }

    /// Produces frames from the compressed stream.
    ///
    /// While the channel is open, frames are emitted as long as at least
    /// `target_frame_size` compressed bytes are ready. Once the channel is
    /// full or closed, the compressor is finalized and drained completely,
    /// with the terminal frame carrying the closing marker.
    pub fn output_frames(&mut self) -> Result<(), ChannelBuilderError> {
        if self.emitted_last {
            return Ok(());
        }
        if self.is_full() || self.closed {
            self.close_and_output_all()
        } else {
            self.output_ready_frames()
        }
    }

    fn output_ready_frames(&mut self) -> Result<(), ChannelBuilderError> {
        self.compressor.flush()?;
        while !self.compressor.is_empty()
            && self.compressor.len() as u64 >= self.cfg.target_frame_size
        {
            self.emit_frame(false)?;
        }
        Ok(())
    }

    fn close_and_output_all(&mut self) -> Result<(), ChannelBuilderError> {
        self.closed = true;
        self.compressor.close()?;
        while !self.emit_frame(true)? {}
        Ok(())
    }

    /// Emits one frame of up to `max_frame_size - FRAME_V0_OVERHEAD` data
    /// bytes. Returns whether the emitted frame was the closing one.
    fn emit_frame(&mut self, closing: bool) -> Result<bool, ChannelBuilderError> {
        let max_data = self.cfg.max_frame_size as usize - FRAME_V0_OVERHEAD;

        // The terminal number is reserved for a closing frame so numbering
        // can never wrap within a channel.
        if self.next_frame_number == u16::MAX
            && !(closing && self.compressor.len() <= max_data)
        {
            self.full_reason = Some(ChannelFullError::MaxFrameIndex);
            return Err(ChannelBuilderError::ChannelFull(ChannelFullError::MaxFrameIndex));
        }

        let data = self.compressor.take(max_data);
        let is_last = closing && self.compressor.is_empty();

        let number = self.next_frame_number;
        let frame = Frame { id: self.id, number, data, is_last };
        debug!(
            target: "channel-builder",
            channel = %alloy_primitives::hex::encode(self.id),
            number,
            bytes = frame.data.len(),
            is_last,
            "Emitting frame"
        );
        self.frames.push_back(FrameData {
            id: FrameId { channel_id: self.id, number },
            data: frame.encode().into(),
            is_last,
        });

        if is_last {
            self.emitted_last = true;
        } else {
            self.next_frame_number += 1;
        }
        Ok(is_last)
    }

    /// Takes the next queued frame for submission.
    pub fn next_frame(&mut self) -> Option<FrameData> {
        self.frames.pop_front()
    }

    /// Appends prebuilt frames to the back of the pending queue.
    pub fn push_frames(&mut self, frames: impl IntoIterator<Item = FrameData>) {
        self.frames.extend(frames);
    }

    /// Re-queues frames at the front of the pending queue, preserving their
    /// order and original frame numbers. Used when a submission fails.
    pub fn requeue_frames(&mut self, frames: impl IntoIterator<Item = FrameData>) {
        let frames: Vec<_> = frames.into_iter().collect();
        for frame in frames.into_iter().rev() {
            self.frames.push_front(frame);
        }
    }
}
