//! Wire-level primitives shared by the hana batch submitter and its decoder.
//!
//! This crate contains the pieces of the protocol that must stay bit-exact
//! between the encode side (the batcher) and the decode side (the
//! reassembler): the frame codec, the batch types carried inside a channel,
//! the batch reader that decompresses and decodes a channel payload, and the
//! reassembler that reconstructs channels from data transactions.

#![warn(missing_debug_implementations, missing_docs, unreachable_pub, rustdoc::all)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod params;
pub use params::{
    ChannelId, CHANNEL_ID_LENGTH, CHANNEL_VERSION_BROTLI, DERIVATION_VERSION_0, FRAME_V0_OVERHEAD,
    MAX_FRAME_LEN, MAX_RLP_BYTES_PER_CHANNEL,
};

mod frame;
pub use frame::{Frame, FrameDecodingError, FrameParseError};

mod block;
pub use block::{BlockId, L2Block};

mod batch;
pub use batch::{BatchData, BatchDecodingError, BatchReader, SingleBatch, SINGLE_BATCH_TYPE};

mod reassemble;
pub use reassemble::{
    ChannelWithMetadata, FrameWithMetadata, ReassemblyError, ReassemblyErrorKind, Reassembler,
};
