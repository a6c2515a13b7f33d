//! Mutable engine state guarded by the chain lock.
//!
//! Everything the engine caches between calls lives in [`ChainState`]:
//! the difficulty window, the weight medians, the invalid-block set, the
//! staging tables filled by batch prevalidation and the block template
//! cache. It is owned by [`ChainInner`] next to the storage and hard-fork
//! collaborators, and only ever touched with the chain lock held.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ringchain_types::{AccountAddress, Block, Hash, KeyImage, NULL_HASH};

use crate::checkpoints::Checkpoints;
use crate::config::{BlockchainConfig, TimeSource};
use crate::crypto::CryptoOracle;
use crate::error::StorageError;
use crate::hardfork::HardForkOracle;
use crate::rolling_median::RollingMedian;
use crate::storage::{BlockchainStorage, OutputData, StoredBlockInfo};

/// Outputs resolved ahead of validation: tx prefix hash, then key image,
/// then the ring members of that input.
pub(crate) type ScanTable = HashMap<Hash, HashMap<KeyImage, Vec<OutputData>>>;

// =============================================================================
// Block template cache
// =============================================================================

#[derive(Debug, Clone)]
pub(crate) struct TemplateCacheEntry {
    pub block: Block,
    pub address: AccountAddress,
    pub extra_nonce: Vec<u8>,
    pub difficulty: u128,
    pub height: u64,
    pub expected_reward: u64,
    pub cumulative_weight: u64,
    pub seed_height: u64,
    pub seed_hash: Hash,
    pub pool_cookie: u64,
}

// =============================================================================
// ChainState
// =============================================================================

#[derive(Debug)]
pub(crate) struct ChainState {
    // ---- difficulty ----
    pub fixed_difficulty: Option<u128>,
    /// Tip the cached next difficulty was computed for.
    pub difficulty_top_hash: Hash,
    pub difficulty_for_next_block: u128,
    /// Chain height the window below was built for; 0 when invalid.
    pub difficulty_window_height: u64,
    pub timestamps: VecDeque<u64>,
    pub difficulties: VecDeque<u128>,
    /// Set when blocks are popped; the window is rebuilt on next use and
    /// the flag cleared when the batch completes.
    pub reset_difficulty_window: bool,

    // ---- weights ----
    pub long_term_window: u64,
    pub long_term_median: RollingMedian,
    pub long_term_median_tip: Hash,
    pub long_term_effective_median: u64,
    pub cumulative_weight_median: u64,
    pub cumulative_weight_limit: u64,

    // ---- rejected blocks ----
    pub invalid_blocks: HashSet<Hash>,
    /// A block newer than the last known version has been warned about.
    pub seen_future_version: bool,

    // ---- batch staging ----
    pub longhash_table: HashMap<Hash, Hash>,
    pub scan_table: ScanTable,
    /// Transaction hashes expected, in order, for blocks covered by the
    /// hash-of-hashes list.
    pub blocks_txs_check: Vec<Hash>,
    /// Known block hash and weight per height, filled from the
    /// hash-of-hashes list as batches are prevalidated.
    pub blocks_hash_check: Vec<(Hash, u64)>,
    /// Keccak of each group of block hashes and of their weights.
    pub blocks_hash_of_hashes: Vec<(Hash, Hash)>,
    pub batch_success: bool,
    /// Whether the open storage batch was started by prevalidation.
    pub batch_owned: bool,

    // ---- mining ----
    pub template_cache: Option<TemplateCacheEntry>,
}

impl ChainState {
    pub fn new(long_term_window: u64, fixed_difficulty: Option<u128>) -> Self {
        let window = usize::try_from(long_term_window.max(1)).unwrap_or(usize::MAX);
        Self {
            fixed_difficulty,
            difficulty_top_hash: NULL_HASH,
            difficulty_for_next_block: 1,
            difficulty_window_height: 0,
            timestamps: VecDeque::new(),
            difficulties: VecDeque::new(),
            reset_difficulty_window: false,
            long_term_window: long_term_window.max(1),
            long_term_median: RollingMedian::new(window),
            long_term_median_tip: NULL_HASH,
            long_term_effective_median: 0,
            cumulative_weight_median: 0,
            cumulative_weight_limit: 0,
            invalid_blocks: HashSet::new(),
            seen_future_version: false,
            longhash_table: HashMap::new(),
            scan_table: HashMap::new(),
            blocks_txs_check: Vec::new(),
            blocks_hash_check: Vec::new(),
            blocks_hash_of_hashes: Vec::new(),
            batch_success: true,
            batch_owned: false,
            template_cache: None,
        }
    }

    /// Forget the cached next difficulty and its window.
    pub fn reset_difficulty_cache(&mut self) {
        self.difficulty_top_hash = NULL_HASH;
        self.difficulty_window_height = 0;
        self.timestamps.clear();
        self.difficulties.clear();
    }

    pub fn invalidate_template_cache(&mut self) {
        if self.template_cache.take().is_some() {
            log::debug!("invalidating block template cache");
        }
    }

    pub fn clear_batch_tables(&mut self) {
        self.longhash_table.clear();
        self.scan_table.clear();
        self.blocks_txs_check.clear();
    }
}

// =============================================================================
// ChainInner
// =============================================================================

/// Everything behind the chain lock.
pub(crate) struct ChainInner {
    pub db: Box<dyn BlockchainStorage>,
    pub hardfork: Box<dyn HardForkOracle>,
    pub checkpoints: Checkpoints,
    pub crypto: Arc<dyn CryptoOracle>,
    pub config: BlockchainConfig,
    pub now: TimeSource,
    /// Shared with [`crate::Blockchain::cancel`].
    pub cancel: Arc<AtomicBool>,
    pub state: ChainState,
}

impl ChainInner {
    pub fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Height and hash of the top block.
    pub fn tail(&self) -> (u64, Hash) {
        (self.db.height().saturating_sub(1), self.db.top_block_hash())
    }

    pub fn current_version(&self) -> u8 {
        self.hardfork.current_version()
    }

    /// Coins generated up to the top block.
    pub fn top_generated_coins(&self) -> u64 {
        let height = self.db.height();
        if height == 0 {
            return 0;
        }
        self.db
            .block_info_at(height - 1)
            .map_or(0, |info| info.generated_coins)
    }

    pub fn top_cumulative_difficulty(&self) -> u128 {
        let height = self.db.height();
        if height == 0 {
            return 0;
        }
        self.db
            .block_info_at(height - 1)
            .map_or(0, |info| info.cumulative_difficulty)
    }

    /// Main chain or alt block.
    pub fn have_block(&self, hash: &Hash) -> bool {
        self.db.block_height(hash).is_some() || self.db.get_alt_block(hash).is_some()
    }

    /// Metadata of a main-chain block that must exist.
    pub fn info_at(&self, height: u64) -> Result<StoredBlockInfo, StorageError> {
        self.db
            .block_info_at(height)
            .ok_or_else(|| StorageError::Corrupt(format!("no block at height {}", height)))
    }

    /// Timestamps of the last `count` main-chain blocks, oldest first.
    pub fn last_block_timestamps(&self, count: usize) -> Vec<u64> {
        let height = self.db.height();
        let count = (count as u64).min(height);
        (height - count..height)
            .filter_map(|h| self.db.block_info_at(h).map(|info| info.timestamp))
            .collect()
    }
}
