//! Shared helpers for constructing test blocks.

use alloy_primitives::{Bytes, B256};
use hana_protocol::{BlockId, L2Block};
use rand::Rng;

/// A block whose transaction payloads are incompressible random bytes, so
/// compressed sizes track raw sizes closely in size-sensitive tests.
pub(crate) fn random_l2_block(rng: &mut impl Rng, num_txs: usize, tx_len: usize) -> L2Block {
    let transactions = (0..num_txs)
        .map(|_| {
            let mut tx = vec![0u8; tx_len];
            rng.fill(tx.as_mut_slice());
            Bytes::from(tx)
        })
        .collect();
    L2Block {
        parent_hash: B256::from(rng.gen::<[u8; 32]>()),
        number: 0,
        timestamp: 1_700_000_000,
        l1_origin: BlockId { hash: B256::from(rng.gen::<[u8; 32]>()), number: 100 },
        transactions,
    }
}

/// A block carrying a single fixed transaction payload.
pub(crate) fn block_with_payload(rng: &mut impl Rng, number: u64, payload: Vec<u8>) -> L2Block {
    L2Block {
        parent_hash: B256::from(rng.gen::<[u8; 32]>()),
        number,
        timestamp: 1_700_000_000 + number,
        l1_origin: BlockId { hash: B256::from(rng.gen::<[u8; 32]>()), number: 100 },
        transactions: vec![Bytes::from(payload)],
    }
}

/// A parent-hash-linked chain of `len` blocks numbered from 0, each carrying
/// `num_txs` random transactions of `tx_len` bytes.
pub(crate) fn block_chain(
    rng: &mut impl Rng,
    len: usize,
    num_txs: usize,
    tx_len: usize,
) -> Vec<L2Block> {
    let mut chain: Vec<L2Block> = Vec::with_capacity(len);
    for number in 0..len as u64 {
        let mut block = random_l2_block(rng, num_txs, tx_len);
        block.number = number;
        block.timestamp = 1_700_000_000 + number;
        if let Some(parent) = chain.last() {
            block.parent_hash = parent.hash();
        }
        chain.push(block);
    }
    chain
}
