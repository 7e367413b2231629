//! Block identifier types and the L2 block intake type.

use alloc::vec::Vec;
use alloy_primitives::{keccak256, BlockHash, BlockNumber, Bytes, B256};
use alloy_rlp::{RlpDecodable, RlpEncodable};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A block identified by its hash and number.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, RlpEncodable, RlpDecodable)]
pub struct BlockId {
    /// The block hash.
    pub hash: BlockHash,
    /// The block number.
    pub number: BlockNumber,
}

impl core::fmt::Display for BlockId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{{ hash: {}, number: {} }}", self.hash, self.number)
    }
}

/// An L2 block as ingested by the batch submitter: the header fields the
/// batching pipeline cares about plus the opaque transaction payloads.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Eq, PartialEq, Default, RlpEncodable, RlpDecodable)]
pub struct L2Block {
    /// The hash of the parent L2 block.
    pub parent_hash: B256,
    /// The L2 block number.
    pub number: u64,
    /// The L2 block timestamp.
    pub timestamp: u64,
    /// The L1 origin the block was derived from.
    pub l1_origin: BlockId,
    /// The raw transactions within the block.
    pub transactions: Vec<Bytes>,
}

impl L2Block {
    /// Computes the block hash as the keccak digest of the RLP-encoded block.
    pub fn hash(&self) -> B256 {
        keccak256(alloy_rlp::encode(self))
    }

    /// Returns the block's [BlockId].
    pub fn block_ref(&self) -> BlockId {
        BlockId { hash: self.hash(), number: self.number }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_l2_block_hash_commits_to_contents() {
        let block = L2Block {
            parent_hash: B256::repeat_byte(0xAA),
            number: 7,
            timestamp: 1700000000,
            l1_origin: BlockId { hash: B256::repeat_byte(0x01), number: 100 },
            transactions: vec![Bytes::from(vec![0x01, 0x02])],
        };
        let mut sibling = block.clone();
        sibling.transactions = vec![Bytes::from(vec![0x01, 0x03])];

        assert_eq!(block.hash(), block.hash());
        assert_ne!(block.hash(), sibling.hash());
        assert_eq!(block.block_ref().number, 7);
        assert_eq!(block.block_ref().hash, block.hash());
    }

    #[test]
    fn test_l2_block_rlp_roundtrip() {
        let block = L2Block {
            parent_hash: B256::repeat_byte(0xBB),
            number: 42,
            timestamp: 1700000042,
            l1_origin: BlockId { hash: B256::repeat_byte(0x02), number: 101 },
            transactions: vec![Bytes::from(vec![0xDE, 0xAD]), Bytes::from(vec![0xBE, 0xEF])],
        };
        let encoded = alloy_rlp::encode(&block);
        let decoded = alloy_rlp::decode_exact::<L2Block>(&encoded).unwrap();
        assert_eq!(block, decoded);
    }
}
