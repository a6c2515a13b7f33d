//! Merkle root over a block's transaction hashes.
//!
//! Not a plain binary Merkle tree: the leaf count is first folded down to
//! the largest power of two not above it by pairing the trailing leaves,
//! then reduced pairwise.

use crate::hash::{cn_fast_hash, Hash, NULL_HASH};

fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    let mut combined = [0u8; 64];
    combined[..32].copy_from_slice(a);
    combined[32..].copy_from_slice(b);
    cn_fast_hash(&combined)
}

/// Merkle root of `hashes` (miner transaction hash first).
pub fn tree_hash(hashes: &[Hash]) -> Hash {
    let count = hashes.len();
    match count {
        0 => return NULL_HASH,
        1 => return hashes[0],
        2 => return hash_pair(&hashes[0], &hashes[1]),
        _ => {}
    }

    let mut cnt = 1usize;
    while cnt * 2 <= count {
        cnt *= 2;
    }

    // Leaves below `start` pass through; the rest are paired into the tail.
    let mut ints = vec![NULL_HASH; cnt];
    let start = 2 * cnt - count;
    ints[..start].copy_from_slice(&hashes[..start]);
    for (j, pair) in (start..cnt).zip(hashes[start..].chunks_exact(2)) {
        ints[j] = hash_pair(&pair[0], &pair[1]);
    }

    while cnt > 2 {
        cnt >>= 1;
        for j in 0..cnt {
            ints[j] = hash_pair(&ints[2 * j], &ints[2 * j + 1]);
        }
    }

    hash_pair(&ints[0], &ints[1])
}
