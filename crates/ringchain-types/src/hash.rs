//! Fixed-size hash and key types plus the fast Keccak hash.

use serde::{Deserialize, Serialize};
use tiny_keccak::{Hasher, Keccak};

use crate::encoding::ParseError;

/// 32-byte Keccak digest identifying a block or transaction.
pub type Hash = [u8; 32];

/// Compressed curve point (one-time output key, commitment, tx key).
pub type PublicKey = [u8; 32];

/// Per-input spend tag; a key image may appear on chain only once.
pub type KeyImage = [u8; 32];

/// The all-zero hash (genesis parent, empty tree root).
pub const NULL_HASH: Hash = [0u8; 32];

/// A single ring member signature `(c, r)` of a version 1 transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Signature {
    pub c: [u8; 32],
    pub r: [u8; 32],
}

/// Keccak-256 with the original (pre-SHA3) padding.
pub fn cn_fast_hash(data: &[u8]) -> Hash {
    let mut keccak = Keccak::v256();
    let mut output = [0u8; 32];
    keccak.update(data);
    keccak.finalize(&mut output);
    output
}

/// Parse a 64-character hex string into a hash.
pub fn hash_from_hex(s: &str) -> Result<Hash, ParseError> {
    let bytes = hex::decode(s.trim()).map_err(|e| ParseError::InvalidHex(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| ParseError::InvalidLength { expected: 32, actual: b.len() })
}

pub fn hash_to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}
