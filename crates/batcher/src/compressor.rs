//! Streaming channel compression with a size ceiling.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::Write;
use thiserror::Error;

/// An error from the [ChannelCompressor].
#[derive(Error, Debug)]
pub enum CompressorError {
    /// Committing the write would push the compressed output past the
    /// configured frame ceiling. The write was not committed.
    #[error("max frame size reached")]
    MaxFrameSizeReached,
    /// An I/O error from the underlying zlib stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A streaming zlib compressor with two parallel sinks: the committed stream
/// holding the actual channel bytes, and a probe stream that is flushed on
/// every write to estimate the post-flush compressed size.
///
/// A write is rejected with [CompressorError::MaxFrameSizeReached] when the
/// committed stream already holds output and the probe estimate exceeds the
/// frame ceiling; the rejected write leaves the committed stream untouched.
/// This avoids overshooting the ceiling without a full re-encode per write.
pub struct ChannelCompressor {
    /// The frame ceiling the probe estimate is compared against.
    max_frame_size: u64,
    /// The committed stream. Flushed and drained on frame boundaries only.
    compress: ZlibEncoder<Vec<u8>>,
    /// The probe stream, flushed on every write.
    probe: ZlibEncoder<Vec<u8>>,
    /// Whether the committed stream has been finalized.
    finalized: bool,
}

impl std::fmt::Debug for ChannelCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelCompressor")
            .field("max_frame_size", &self.max_frame_size)
            .field("len", &self.compress.get_ref().len())
            .field("finalized", &self.finalized)
            .finish()
    }
}

impl ChannelCompressor {
    /// Creates a new [ChannelCompressor] with the given frame ceiling.
    pub fn new(max_frame_size: u64) -> Self {
        Self {
            max_frame_size,
            compress: ZlibEncoder::new(Vec::new(), Compression::best()),
            probe: ZlibEncoder::new(Vec::new(), Compression::best()),
            finalized: false,
        }
    }

    /// Writes `data` to both sinks.
    ///
    /// The probe sink is written and flushed first; if the committed stream is
    /// non-empty and the flushed probe size exceeds the frame ceiling, the
    /// write fails and is not committed.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, CompressorError> {
        self.probe.write_all(data)?;
        self.probe.flush()?;

        if !self.compress.get_ref().is_empty()
            && self.probe.get_ref().len() as u64 > self.max_frame_size
        {
            return Err(CompressorError::MaxFrameSizeReached);
        }

        self.compress.write_all(data)?;
        Ok(data.len())
    }

    /// Flushes the committed stream so its bytes become readable.
    pub fn flush(&mut self) -> Result<(), CompressorError> {
        self.compress.flush()?;
        Ok(())
    }

    /// Finalizes the committed stream, emitting the zlib trailer. No further
    /// writes are accepted afterwards.
    pub fn close(&mut self) -> Result<(), CompressorError> {
        if !self.finalized {
            self.compress.try_finish()?;
            self.finalized = true;
        }
        Ok(())
    }

    /// Re-initialises both sinks, discarding all state.
    pub fn reset(&mut self) -> Result<(), CompressorError> {
        self.compress.reset(Vec::new())?;
        self.probe.reset(Vec::new())?;
        self.finalized = false;
        Ok(())
    }

    /// The number of committed compressed bytes available for reading.
    pub fn len(&self) -> usize {
        self.compress.get_ref().len()
    }

    /// Whether any committed compressed bytes are available.
    pub fn is_empty(&self) -> bool {
        self.compress.get_ref().is_empty()
    }

    /// Drains up to `max` committed bytes from the front of the stream.
    pub fn take(&mut self, max: usize) -> Vec<u8> {
        let buf = self.compress.get_mut();
        let n = max.min(buf.len());
        buf.drain(..n).collect()
    }
}
