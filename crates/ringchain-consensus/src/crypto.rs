//! Cryptographic oracle.
//!
//! Elliptic-curve operations, proof-of-work hashing and RingCT proof
//! verification live outside this crate. The engine consumes them through
//! [`CryptoOracle`], whose methods are pure functions of their arguments.

use ringchain_types::{AccountAddress, Hash, KeyImage, PublicKey, Signature, Transaction};

pub type SecretKey = [u8; 32];

/// A ring member: one-time output key and amount commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CtKey {
    pub dest: PublicKey,
    pub mask: PublicKey,
}

pub trait CryptoOracle: Send + Sync {
    /// Proof-of-work hash of a block hashing blob. `seed_hash` is only used
    /// by versions that key the hash by a seed block.
    fn pow_hash(&self, hashing_blob: &[u8], major_version: u8, height: u64, seed_hash: &Hash) -> Hash;

    /// Whether `key` is a valid curve point.
    fn check_key(&self, key: &PublicKey) -> bool;

    /// Verify a version 1 ring signature over `ring`.
    fn check_ring_signature(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring: &[PublicKey],
        signatures: &[Signature],
    ) -> bool;

    /// Range proofs and balance of a RingCT transaction: everything that
    /// does not depend on the ring members.
    fn verify_rct_semantics(&self, tx: &Transaction) -> bool;

    /// Per-input ring proofs of a simple RingCT transaction (simple,
    /// bulletproof, bulletproof2, CLSAG and bulletproof-plus types).
    /// `mix_ring[i]` holds the ring of input `i`.
    fn verify_rct_simple(&self, tx: &Transaction, prefix_hash: &Hash, mix_ring: &[Vec<CtKey>]) -> bool;

    /// The single aggregate MLSAG of a full RingCT transaction.
    fn verify_rct_full(&self, tx: &Transaction, prefix_hash: &Hash, mix_ring: &[Vec<CtKey>]) -> bool;

    fn generate_tx_keypair(&self) -> (PublicKey, SecretKey);

    /// One-time output key and view tag for output `output_index` paid to
    /// `address`.
    fn derive_output_key(
        &self,
        address: &AccountAddress,
        tx_secret_key: &SecretKey,
        output_index: usize,
    ) -> Option<(PublicKey, u8)>;

    /// Commitment to `amount` with a zero mask.
    fn zero_commit(&self, amount: u64) -> PublicKey;
}
