//! Core types and constants for a CryptoNote-style ring-signature blockchain.
//!
//! This crate provides the foundational types used by the chain engine:
//! network and hard-fork tables, consensus arithmetic (block reward,
//! difficulty, weight medians, dynamic fees), the block and transaction
//! data model with its binary encoding, and the hashes derived from it.

pub mod block;
pub mod consensus;
pub mod constants;
pub mod encoding;
pub mod hash;
pub mod transaction;
pub mod tree_hash;

pub use block::Block;
pub use constants::{format_amount, network_config, HfVersion, Network, NetworkConfig, RctType};
pub use encoding::ParseError;
pub use hash::{cn_fast_hash, hash_from_hex, hash_to_hex, Hash, KeyImage, PublicKey, Signature, NULL_HASH};
pub use transaction::{
    AccountAddress, RctPrunable, RctSignatures, RingProof, RangeProof, Transaction, TxIn, TxOut,
    TxOutTarget,
};
