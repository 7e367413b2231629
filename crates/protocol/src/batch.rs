//! Batch types carried inside a channel, and the [BatchReader] that decodes
//! a channel payload back into them.

use crate::{
    block::L2Block,
    params::{CHANNEL_VERSION_BROTLI, MAX_RLP_BYTES_PER_CHANNEL},
};
use alloc::vec::Vec;
use alloy_primitives::{BlockHash, Bytes};
use alloy_rlp::{Decodable, Encodable, RlpDecodable, RlpEncodable};
use miniz_oxide::inflate::{decompress_to_vec_zlib_with_limit, TINFLStatus};
use thiserror::Error;

/// The batch type byte prefixing a single batch payload.
pub const SINGLE_BATCH_TYPE: u8 = 0;

/// ZLIB deflate compression method, as encoded in the low nibble of the
/// stream's first byte.
const ZLIB_DEFLATE_COMPRESSION_METHOD: u8 = 8;

/// ZLIB reserved compression method.
const ZLIB_RESERVED_COMPRESSION_METHOD: u8 = 15;

/// Represents a single batch: a single encoded L2 block.
#[derive(Debug, Clone, PartialEq, Eq, Default, RlpEncodable, RlpDecodable)]
pub struct SingleBatch {
    /// Block hash of the previous L2 block.
    pub parent_hash: BlockHash,
    /// The batch epoch number, i.e. the number of the L1 origin block.
    pub epoch_num: u64,
    /// The hash of the L1 origin block.
    pub epoch_hash: BlockHash,
    /// The L2 block timestamp of this batch.
    pub timestamp: u64,
    /// The L2 block transactions in this batch.
    pub transactions: Vec<Bytes>,
}

impl From<&L2Block> for SingleBatch {
    fn from(block: &L2Block) -> Self {
        Self {
            parent_hash: block.parent_hash,
            epoch_num: block.l1_origin.number,
            epoch_hash: block.l1_origin.hash,
            timestamp: block.timestamp,
            transactions: block.transactions.clone(),
        }
    }
}

/// An error decoding channel data into batches.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchDecodingError {
    /// The batch payload is empty.
    #[error("empty batch payload")]
    EmptyPayload,
    /// The batch payload's leading type byte is unknown.
    #[error("unsupported batch type: {0}")]
    UnsupportedBatchType(u8),
    /// Data left over after the batch content was decoded.
    #[error("trailing data after batch payload")]
    TrailingData,
    /// An RLP decoding failure inside a fully-framed batch item.
    #[error("batch rlp error: {0}")]
    Rlp(alloy_rlp::Error),
    /// The channel payload ended in the middle of a batch item.
    #[error("batch data truncated")]
    Truncated,
    /// The channel payload is not a valid zlib stream.
    #[error("channel data is not valid zlib")]
    InvalidCompression,
    /// The channel payload carries a known compression version this decoder
    /// does not produce or accept.
    #[error("unsupported channel compression version: {0}")]
    UnsupportedCompression(u8),
    /// The decompressed channel exceeds [MAX_RLP_BYTES_PER_CHANNEL].
    #[error("decompressed channel exceeds {MAX_RLP_BYTES_PER_CHANNEL} bytes")]
    BatchTooLarge,
}

/// A versioned batch record: the unit item of a channel's payload stream.
///
/// On the wire a [BatchData] is an RLP byte-string whose content is the batch
/// type byte followed by the RLP encoding of the batch itself.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchData {
    /// The inner batch.
    pub batch: SingleBatch,
}

impl BatchData {
    /// Encodes the batch record into `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut payload = Vec::with_capacity(1 + self.batch.length());
        payload.push(SINGLE_BATCH_TYPE);
        self.batch.encode(&mut payload);

        let header = alloy_rlp::Header { list: false, payload_length: payload.len() };
        header.encode(out);
        out.extend_from_slice(&payload);
    }

    /// Returns the encoded batch record as a byte vector.
    pub fn encoded(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    /// Decodes a batch record from the content of an RLP byte-string.
    pub fn decode_payload(payload: &[u8]) -> Result<Self, BatchDecodingError> {
        let Some((batch_type, mut content)) = payload.split_first() else {
            return Err(BatchDecodingError::EmptyPayload);
        };
        if *batch_type != SINGLE_BATCH_TYPE {
            return Err(BatchDecodingError::UnsupportedBatchType(*batch_type));
        }
        let batch = SingleBatch::decode(&mut content).map_err(BatchDecodingError::Rlp)?;
        if !content.is_empty() {
            return Err(BatchDecodingError::TrailingData);
        }
        Ok(Self { batch })
    }
}

impl From<SingleBatch> for BatchData {
    fn from(batch: SingleBatch) -> Self {
        Self { batch }
    }
}

/// Iteratively consumes [BatchData] records from a compressed channel payload.
///
/// The reader sniffs the compression from the payload's first byte: a zlib
/// header is decompressed, the brotli channel version is recognised but
/// rejected, and anything else fails. Decompression tolerates a truncated
/// tail so that channels which never received their closing frame can still
/// be decoded up to the cut; the cut itself surfaces as
/// [BatchDecodingError::Truncated] from [BatchReader::next_batch].
#[derive(Debug, Clone)]
pub struct BatchReader {
    /// The decompressed channel payload.
    decompressed: Vec<u8>,
    /// The read cursor into `decompressed`.
    cursor: usize,
}

impl BatchReader {
    /// Creates a new [BatchReader] over a compressed channel payload.
    pub fn new(data: &[u8]) -> Result<Self, BatchDecodingError> {
        let Some(&version) = data.first() else {
            return Ok(Self { decompressed: Vec::new(), cursor: 0 });
        };

        if version == CHANNEL_VERSION_BROTLI {
            return Err(BatchDecodingError::UnsupportedCompression(version));
        }
        let method = version & 0x0F;
        if method != ZLIB_DEFLATE_COMPRESSION_METHOD && method != ZLIB_RESERVED_COMPRESSION_METHOD
        {
            return Err(BatchDecodingError::UnsupportedCompression(version));
        }

        let decompressed =
            match decompress_to_vec_zlib_with_limit(data, MAX_RLP_BYTES_PER_CHANNEL as usize) {
                Ok(decompressed) => decompressed,
                // A truncated stream still yields everything decodable before
                // the cut; the RLP cursor below reports the cut as Truncated.
                Err(err) if err.status == TINFLStatus::FailedCannotMakeProgress => err.output,
                Err(err) if err.status == TINFLStatus::HasMoreOutput => {
                    return Err(BatchDecodingError::BatchTooLarge)
                }
                Err(_) => return Err(BatchDecodingError::InvalidCompression),
            };

        Ok(Self { decompressed, cursor: 0 })
    }

    /// Pulls the next batch record out of the payload, or `None` once the
    /// payload is exhausted.
    pub fn next_batch(&mut self) -> Option<Result<BatchData, BatchDecodingError>> {
        if self.cursor >= self.decompressed.len() {
            return None;
        }

        let mut buf = &self.decompressed[self.cursor..];
        let remaining = buf.len();
        match Bytes::decode(&mut buf) {
            Ok(bytes) => {
                self.cursor += remaining - buf.len();
                Some(BatchData::decode_payload(&bytes))
            }
            Err(alloy_rlp::Error::InputTooShort) => {
                self.cursor = self.decompressed.len();
                Some(Err(BatchDecodingError::Truncated))
            }
            Err(err) => {
                self.cursor = self.decompressed.len();
                Some(Err(BatchDecodingError::Rlp(err)))
            }
        }
    }
}
