//! Storage contract consumed by the chain engine.
//!
//! The engine never assumes a particular backend. Reads take `&self` so
//! batch workers can share a backend across threads; writes take
//! `&mut self` and are only issued under the chain lock.

use ringchain_types::{Block, Hash, KeyImage, PublicKey, Transaction};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

// =============================================================================
// Records
// =============================================================================

/// Per-block metadata kept next to each main-chain block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlockInfo {
    pub hash: Hash,
    pub timestamp: u64,
    pub weight: u64,
    pub long_term_weight: u64,
    pub cumulative_difficulty: u128,
    /// Coins generated up to and including this block.
    pub generated_coins: u64,
}

/// A spendable output as seen by ring members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputData {
    pub pubkey: PublicKey,
    /// RingCT commitment; the zero commitment of the amount for outputs
    /// created without one.
    pub commitment: PublicKey,
    pub unlock_time: u64,
    pub height: u64,
}

/// A block tracked off the main chain, annotated with values computed when
/// it was first seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AltBlockEntry {
    pub block: Block,
    pub height: u64,
    pub block_weight: u64,
    pub long_term_weight: u64,
    pub cumulative_difficulty: u128,
    pub already_generated_coins: u64,
}

// =============================================================================
// Contract
// =============================================================================

pub trait BlockchainStorage: Send + Sync {
    // ---- chain position ----

    /// Number of blocks on the main chain.
    fn height(&self) -> u64;

    /// Hash of the top block, or the null hash on an empty chain.
    fn top_block_hash(&self) -> Hash;

    // ---- blocks ----

    /// Height of a main-chain block.
    fn block_height(&self, hash: &Hash) -> Option<u64>;

    fn block_hash_at(&self, height: u64) -> Option<Hash>;

    fn block_at(&self, height: u64) -> Option<Block>;

    fn block_info_at(&self, height: u64) -> Option<StoredBlockInfo>;

    /// Weights of `count` blocks starting at `start`, oldest first. Heights
    /// past the tip are skipped.
    fn block_weights(&self, start: u64, count: u64) -> Vec<u64>;

    fn long_term_block_weights(&self, start: u64, count: u64) -> Vec<u64>;

    /// Append a block and the transactions it references (in the order of
    /// `block.tx_hashes`). Returns the new chain height.
    fn add_block(
        &mut self,
        block: &Block,
        info: StoredBlockInfo,
        txs: &[(Transaction, Hash)],
    ) -> Result<u64, StorageError>;

    /// Remove the top block. Returns it with its non-miner transactions.
    fn pop_block(&mut self) -> Result<(Block, Vec<Transaction>), StorageError>;

    /// Overwrite recorded cumulative difficulties from `start_height` on.
    fn correct_block_cumulative_difficulties(
        &mut self,
        start_height: u64,
        cumulative_difficulties: &[u128],
    ) -> Result<(), StorageError>;

    // ---- transactions and outputs ----

    fn tx_exists(&self, hash: &Hash) -> bool;

    fn get_tx(&self, hash: &Hash) -> Option<Transaction>;

    /// Height of the block that included a transaction.
    fn tx_block_height(&self, hash: &Hash) -> Option<u64>;

    fn has_key_image(&self, key_image: &KeyImage) -> bool;

    fn num_outputs(&self, amount: u64) -> u64;

    /// Outputs of an amount bucket at the given absolute indices. `None`
    /// when any index is out of range.
    fn get_output_keys(&self, amount: u64, indices: &[u64]) -> Option<Vec<OutputData>>;

    // ---- alternative blocks ----

    fn add_alt_block(&mut self, hash: Hash, entry: AltBlockEntry) -> Result<(), StorageError>;

    fn get_alt_block(&self, hash: &Hash) -> Option<AltBlockEntry>;

    fn remove_alt_block(&mut self, hash: &Hash) -> Result<(), StorageError>;

    fn alt_blocks(&self) -> Vec<(Hash, AltBlockEntry)>;

    fn alt_block_count(&self) -> usize;

    fn drop_alt_blocks(&mut self);

    // ---- batches ----

    /// Open a write batch. Returns false when one is already open, in which
    /// case the caller must not close it.
    fn batch_start(&mut self) -> bool;

    fn batch_stop(&mut self) -> Result<(), StorageError>;

    /// Discard every write since the matching `batch_start`.
    fn batch_abort(&mut self);

    /// Flush committed writes to durable storage.
    fn sync(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}
