//! The chain engine.
//!
//! [`Blockchain`] owns the pending pool and the chain state, each behind its
//! own lock. Whenever both are needed the pool lock is taken first. Every
//! public operation takes `&self`, so one engine can be shared between the
//! network, mining and RPC threads of a node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ringchain_types::block::generate_genesis_block;
use ringchain_types::{hash_to_hex, network_config, AccountAddress, Block, Hash, KeyImage, Transaction};

use crate::alt_chain::AlternativeChain;
use crate::block_template::{BlockTemplate, MinerData};
use crate::chain_state::{ChainInner, ChainState};
use crate::checkpoints::Checkpoints;
use crate::config::{system_time, BlockchainConfig, TimeSource};
use crate::crypto::CryptoOracle;
use crate::error::{ChainError, ChainResult};
use crate::hardfork::HardForkOracle;
use crate::prevalidate::BlockCompleteEntry;
use crate::storage::BlockchainStorage;
use crate::tx_pool::TxPool;
use crate::verification::{BlockVerificationContext, TxVerificationContext};

/// Number of most recent blocks listed one by one in a short chain history.
const SHORT_HISTORY_CONSECUTIVE: usize = 10;

/// Block ids answering a peer's short chain history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSupplement {
    /// Height of the first id, the newest block the peer and this node
    /// share.
    pub start_height: u64,
    pub total_height: u64,
    pub hashes: Vec<Hash>,
}

// =============================================================================
// Blockchain
// =============================================================================

pub struct Blockchain {
    pool: Mutex<Box<dyn TxPool>>,
    chain: Mutex<ChainInner>,
    cancel: Arc<AtomicBool>,
}

impl Blockchain {
    /// Assemble an engine over its collaborators. Call [`Self::init`] before
    /// use.
    pub fn new(
        db: Box<dyn BlockchainStorage>,
        pool: Box<dyn TxPool>,
        hardfork: Box<dyn HardForkOracle>,
        crypto: Arc<dyn CryptoOracle>,
        config: BlockchainConfig,
    ) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let state = ChainState::new(config.long_term_block_weight_window, config.fixed_difficulty);
        let inner = ChainInner {
            db,
            hardfork,
            checkpoints: Checkpoints::for_network(config.network),
            crypto,
            config,
            now: system_time,
            cancel: Arc::clone(&cancel),
            state,
        };
        Self {
            pool: Mutex::new(pool),
            chain: Mutex::new(inner),
            cancel,
        }
    }

    /// Replace the built-in checkpoints.
    pub fn with_checkpoints(mut self, checkpoints: Checkpoints) -> Self {
        self.chain_mut().checkpoints = checkpoints;
        self
    }

    pub fn with_time_source(mut self, now: TimeSource) -> Self {
        self.chain_mut().now = now;
        self
    }

    fn chain_mut(&mut self) -> &mut ChainInner {
        self.chain.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_chain(&self) -> MutexGuard<'_, ChainInner> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pool first, then chain.
    fn lock_both(&self) -> (MutexGuard<'_, Box<dyn TxPool>>, MutexGuard<'_, ChainInner>) {
        let pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        let chain = self.lock_chain();
        (pool, chain)
    }

    /// Bring the engine up on its storage: add the genesis block to an empty
    /// store, drop top blocks whose version the fork schedule rejects,
    /// repair cumulative difficulties that disagree with the difficulty
    /// checkpoints and compute the weight limit for the next block.
    pub fn init(&self) -> ChainResult<()> {
        let (mut pool, mut chain) = self.lock_both();
        let inner = &mut *chain;
        let stored = inner.db.height();
        inner.hardfork.reorganize_from_chain_height(0, stored);

        if inner.db.height() == 0 {
            log::info!("Blockchain not loaded, generating genesis block.");
            let genesis = generate_genesis_block(network_config(inner.config.network))?;
            let mut bvc = BlockVerificationContext::default();
            inner.add_new_block(&mut **pool, &genesis, &mut bvc)?;
            if !bvc.added_to_main_chain {
                return Err(ChainError::InvalidArgument(format!(
                    "failed to add genesis block: {:?}",
                    bvc
                )));
            }
        }

        let mut popped = 0u64;
        while inner.db.height() > 1 {
            let top_height = inner.db.height() - 1;
            let Some(top) = inner.db.block_at(top_height) else {
                break;
            };
            let ideal = inner.hardfork.ideal_version(top_height);
            if ideal <= 1 || ideal == top.major_version {
                if popped > 0 {
                    log::info!(
                        "Initial popping done, top block: {}, top height: {}, block version: {}",
                        hash_to_hex(&top.hash()),
                        top_height,
                        top.major_version
                    );
                }
                break;
            }
            if popped == 0 {
                log::info!(
                    "Current top block {} at height {} has version {} which disagrees with the ideal version {}",
                    hash_to_hex(&top.hash()),
                    top_height,
                    top.major_version,
                    ideal
                );
            }
            if popped % 100 == 0 {
                log::info!("Popping blocks... {}", top_height);
            }
            inner.db.pop_block()?;
            popped += 1;
        }
        if popped > 0 {
            inner.state.reset_difficulty_cache();
            let height = inner.db.height();
            inner.hardfork.reorganize_from_chain_height(height, height);
            let (top_height, top_hash) = inner.tail();
            pool.on_blockchain_dec(top_height + 1, &top_hash);
        }

        if !inner.check_difficulty_checkpoints().0 {
            log::error!("Difficulty drift detected!");
            inner.recalculate_difficulties(None)?;
        }
        inner.update_next_cumulative_weight_limit()?;

        let (top_height, top_hash) = inner.tail();
        log::info!(
            "Blockchain initialized. last block: {}, {}",
            top_height,
            hash_to_hex(&top_hash)
        );
        Ok(())
    }

    /// Ask long operations to stop at the next unit of work.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    // -------------------------------------------------------------------------
    // Chain queries
    // -------------------------------------------------------------------------

    pub fn height(&self) -> u64 {
        self.lock_chain().db.height()
    }

    /// Height and hash of the top block.
    pub fn tail(&self) -> (u64, Hash) {
        self.lock_chain().tail()
    }

    pub fn block_id_by_height(&self, height: u64) -> Option<Hash> {
        self.lock_chain().db.block_hash_at(height)
    }

    /// A main-chain or alternative block. The flag is set for alternative
    /// blocks.
    pub fn block_by_hash(&self, hash: &Hash) -> Option<(Block, bool)> {
        let inner = self.lock_chain();
        if let Some(height) = inner.db.block_height(hash) {
            return inner.db.block_at(height).map(|block| (block, false));
        }
        inner.db.get_alt_block(hash).map(|entry| (entry.block, true))
    }

    pub fn have_block(&self, hash: &Hash) -> bool {
        self.lock_chain().have_block(hash)
    }

    pub fn have_tx(&self, hash: &Hash) -> bool {
        self.lock_chain().db.tx_exists(hash)
    }

    pub fn have_tx_keyimg_as_spent(&self, key_image: &KeyImage) -> bool {
        self.lock_chain().db.has_key_image(key_image)
    }

    pub fn block_cumulative_difficulty(&self, height: u64) -> Option<u128> {
        self.lock_chain()
            .db
            .block_info_at(height)
            .map(|info| info.cumulative_difficulty)
    }

    pub fn block_weight(&self, height: u64) -> Option<u64> {
        self.lock_chain().db.block_info_at(height).map(|info| info.weight)
    }

    /// Ids a peer can use to find the newest block it shares with this
    /// node: the last ten blocks, then blocks at doubling distances, then
    /// the genesis block.
    pub fn short_chain_history(&self) -> Vec<Hash> {
        let inner = self.lock_chain();
        let size = inner.db.height();
        let mut ids = Vec::new();
        if size == 0 {
            return ids;
        }

        let mut genesis_included = false;
        let mut back_offset = 1u64;
        let mut multiplier = 1u64;
        let mut i = 0usize;
        while back_offset < size {
            let height = size - back_offset;
            if let Some(id) = inner.db.block_hash_at(height) {
                ids.push(id);
            }
            if height == 0 {
                genesis_included = true;
            }
            if i < SHORT_HISTORY_CONSECUTIVE {
                back_offset += 1;
            } else {
                multiplier *= 2;
                back_offset += multiplier;
            }
            i += 1;
        }
        if !genesis_included {
            if let Some(genesis) = inner.db.block_hash_at(0) {
                ids.push(genesis);
            }
        }
        ids
    }

    /// Block ids following the newest block of `short_history` this node
    /// knows, at most `max_count` of them. `None` when the peer is on a
    /// different genesis block.
    pub fn find_blockchain_supplement(&self, short_history: &[Hash], max_count: usize) -> Option<ChainSupplement> {
        let inner = self.lock_chain();
        let genesis = inner.db.block_hash_at(0)?;
        if short_history.last() != Some(&genesis) {
            log::error!(
                "Client sent wrong NOTIFY_REQUEST_CHAIN: genesis block mismatch: id: {}, expected: {}",
                short_history.last().map_or_else(|| "none".to_string(), hash_to_hex),
                hash_to_hex(&genesis)
            );
            return None;
        }
        let start_height = short_history.iter().find_map(|id| inner.db.block_height(id))?;
        let total_height = inner.db.height();
        let end = total_height.min(start_height.saturating_add(max_count as u64));
        let hashes = (start_height..end)
            .filter_map(|h| inner.db.block_hash_at(h))
            .collect();
        Some(ChainSupplement {
            start_height,
            total_height,
            hashes,
        })
    }

    pub fn alternative_chains(&self) -> Vec<AlternativeChain> {
        self.lock_chain().alternative_chains()
    }

    pub fn alternative_blocks_count(&self) -> usize {
        self.lock_chain().db.alt_block_count()
    }

    pub fn is_block_invalid(&self, hash: &Hash) -> bool {
        self.lock_chain().state.invalid_blocks.contains(hash)
    }

    pub fn flush_invalid_blocks(&self) {
        let mut inner = self.lock_chain();
        log::info!("flushing {} invalid blocks", inner.state.invalid_blocks.len());
        inner.state.invalid_blocks.clear();
    }

    // -------------------------------------------------------------------------
    // Consensus parameters
    // -------------------------------------------------------------------------

    pub fn current_hard_fork_version(&self) -> u8 {
        self.lock_chain().current_version()
    }

    pub fn ideal_hard_fork_version(&self, height: u64) -> u8 {
        self.lock_chain().hardfork.ideal_version(height)
    }

    pub fn difficulty_for_next_block(&self) -> ChainResult<u128> {
        self.lock_chain().difficulty_for_next_block()
    }

    /// Rewrite stored cumulative difficulties from `start_height` (default:
    /// the last matching difficulty checkpoint). Returns how many changed.
    pub fn recalculate_difficulties(&self, start_height: Option<u64>) -> ChainResult<usize> {
        let mut inner = self.lock_chain();
        let fixed = inner.recalculate_difficulties(start_height)?;
        if fixed > 0 {
            inner.state.reset_difficulty_cache();
        }
        Ok(fixed)
    }

    pub fn check_difficulty_checkpoints(&self) -> (bool, u64) {
        self.lock_chain().check_difficulty_checkpoints()
    }

    /// Effective median block weight for the next block.
    pub fn current_cumulative_block_weight_median(&self) -> u64 {
        self.lock_chain().state.cumulative_weight_median
    }

    pub fn current_cumulative_block_weight_limit(&self) -> u64 {
        self.lock_chain().state.cumulative_weight_limit
    }

    pub fn check_fee(&self, tx_weight: u64, fee: u64) -> bool {
        self.lock_chain().check_fee(tx_weight, fee)
    }

    /// Per-byte fee levels `[low, normal, medium, high]` good for the next
    /// `grace_blocks` blocks.
    pub fn dynamic_base_fee_estimate_2021_scaling(&self, grace_blocks: u64) -> ChainResult<[u64; 4]> {
        self.lock_chain().dynamic_base_fee_estimate_2021_scaling(grace_blocks)
    }

    pub fn adjusted_time(&self) -> u64 {
        let inner = self.lock_chain();
        inner.get_adjusted_time(inner.db.height())
    }

    pub fn is_tx_spendtime_unlocked(&self, unlock_time: u64) -> bool {
        let inner = self.lock_chain();
        inner.is_tx_spendtime_unlocked(unlock_time, inner.current_version())
    }

    // -------------------------------------------------------------------------
    // Checkpoints
    // -------------------------------------------------------------------------

    /// Merge `checkpoints` into the active set and check the chain against
    /// it. Checkpoints from DNS records are ignored offline, and only roll
    /// the chain back when DNS checkpoints are enforced.
    pub fn update_checkpoints(&self, checkpoints: &Checkpoints, from_dns: bool) -> ChainResult<()> {
        let (mut pool, mut inner) = self.lock_both();
        if from_dns && inner.config.offline {
            log::debug!("offline, ignoring DNS checkpoints");
            return Ok(());
        }
        inner.checkpoints.check_for_conflicts(checkpoints)?;
        for (&height, hash) in checkpoints.points() {
            let difficulty = checkpoints.difficulty_points().get(&height).copied();
            inner.checkpoints.add_checkpoint(height, *hash, difficulty)?;
        }
        let enforce = !from_dns || inner.config.enforce_dns_checkpoints;
        inner.check_against_checkpoints(&mut **pool, enforce)
    }

    pub fn check_against_checkpoints(&self, enforce: bool) -> ChainResult<()> {
        let (mut pool, mut inner) = self.lock_both();
        inner.check_against_checkpoints(&mut **pool, enforce)
    }

    // -------------------------------------------------------------------------
    // Blocks
    // -------------------------------------------------------------------------

    /// Validate a block and add it to the main chain or an alternative
    /// chain. Rule failures are reported in the returned context.
    pub fn add_new_block(&self, block: &Block) -> ChainResult<BlockVerificationContext> {
        let (mut pool, mut inner) = self.lock_both();
        let mut bvc = BlockVerificationContext::default();
        inner.add_new_block(&mut **pool, block, &mut bvc)?;
        Ok(bvc)
    }

    /// Remove up to `count` blocks from the top, never the genesis block.
    pub fn pop_blocks(&self, count: u64) -> ChainResult<u64> {
        let (mut pool, mut inner) = self.lock_both();
        inner.pop_blocks(&mut **pool, count)
    }

    /// Stage a batch of blocks for [`IncomingBlocks::add_block`]. Both locks
    /// are held until the returned batch is cleaned up or dropped.
    pub fn prepare_handle_incoming_blocks(
        &self,
        blocks: &[(Block, Vec<Transaction>)],
    ) -> ChainResult<IncomingBlocks<'_>> {
        let (pool, chain) = self.lock_both();
        let mut batch = IncomingBlocks {
            pool,
            chain,
            finished: false,
        };
        if let Err(e) = batch.chain.prepare_handle_incoming_blocks(blocks) {
            batch.chain.state.batch_success = false;
            return Err(e);
        }
        Ok(batch)
    }

    /// Parse, prevalidate and add a batch of blocks received from a peer.
    /// Stops at the first block that fails. Returns one context per block
    /// processed.
    pub fn handle_incoming_blocks(&self, entries: &[BlockCompleteEntry]) -> ChainResult<Vec<BlockVerificationContext>> {
        let parsed = entries
            .iter()
            .map(BlockCompleteEntry::parse)
            .collect::<Result<Vec<_>, _>>()?;
        let mut batch = self.prepare_handle_incoming_blocks(&parsed)?;

        let mut results = Vec::with_capacity(parsed.len());
        for (block, txs) in parsed {
            let bvc = batch.add_block(&block, txs)?;
            let failed = bvc.verification_failed || bvc.marked_as_orphaned;
            results.push(bvc);
            if failed {
                log::warn!("Block verification failed, dropping the rest of the batch");
                break;
            }
        }
        batch.cleanup(false)?;
        Ok(results)
    }

    /// Check block hashes announced by a peer against the hash-of-hashes
    /// list. Returns how many of them may be downloaded.
    pub fn prevalidate_block_hashes(&self, height: u64, hashes: &[Hash], weights: &[u64]) -> u64 {
        self.lock_chain().prevalidate_block_hashes(height, hashes, weights)
    }

    pub fn load_block_hashes(&self, blob: &[u8]) -> ChainResult<usize> {
        self.lock_chain().load_block_hashes(blob)
    }

    // -------------------------------------------------------------------------
    // Transactions
    // -------------------------------------------------------------------------

    /// Check a transaction against the chain and add it to the pool.
    /// Transactions carried by a block skip the fee check and are pooled
    /// even when their inputs cannot be checked yet.
    pub fn add_tx_to_pool(&self, tx: Transaction, kept_by_block: bool) -> TxVerificationContext {
        let (mut pool, inner) = self.lock_both();
        let mut tvc = TxVerificationContext::default();
        let hash = tx.hash();
        if inner.db.tx_exists(&hash) {
            log::debug!("transaction {} already in blockchain", hash_to_hex(&hash));
            tvc.fail();
            return tvc;
        }

        if !inner.check_tx_semantics(&tx, &hash, &mut tvc) {
            return tvc;
        }
        if inner.check_tx_inputs(&tx, &mut tvc).is_none() {
            if !kept_by_block {
                return tvc;
            }
            tvc = TxVerificationContext::default();
        }

        let weight = tx.weight();
        if !kept_by_block {
            let Some(fee) = tx.fee() else {
                tvc.fail().overspend = true;
                return tvc;
            };
            if !inner.check_fee(weight, fee) {
                tvc.fail().fee_too_low = true;
                return tvc;
            }
        }

        let hf_version = inner.current_version();
        if pool.add_tx(tx, hash, weight, &mut tvc, kept_by_block, hf_version) {
            tvc.added_to_pool = true;
        }
        tvc
    }

    /// Put transactions back into the pool as if a block had carried them.
    pub fn return_tx_to_pool(&self, txs: Vec<Transaction>) {
        let (mut pool, inner) = self.lock_both();
        let txs = txs
            .into_iter()
            .map(|tx| {
                let hash = tx.hash();
                (tx, hash)
            })
            .collect();
        inner.return_txs_to_pool(&mut **pool, txs);
    }

    /// Drop transactions from the pool. Returns how many were there.
    pub fn flush_txes_from_pool(&self, hashes: &[Hash]) -> usize {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        hashes.iter().filter(|hash| pool.remove_tx(hash)).count()
    }

    /// Run `f` against the pool with the pool lock held.
    pub fn with_pool<R>(&self, f: impl FnOnce(&mut dyn TxPool) -> R) -> R {
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut **pool)
    }

    // -------------------------------------------------------------------------
    // Mining
    // -------------------------------------------------------------------------

    pub fn create_block_template(
        &self,
        address: &AccountAddress,
        alt_parent: Option<&Hash>,
        extra_nonce: &[u8],
    ) -> ChainResult<BlockTemplate> {
        let (mut pool, mut inner) = self.lock_both();
        inner.create_block_template(&mut **pool, address, alt_parent, extra_nonce)
    }

    pub fn get_miner_data(&self) -> ChainResult<MinerData> {
        let (pool, mut inner) = self.lock_both();
        inner.get_miner_data(&**pool)
    }
}

// =============================================================================
// IncomingBlocks
// =============================================================================

/// A prevalidated batch of incoming blocks. Holds the pool and chain locks;
/// dropping it without [`Self::cleanup`] aborts the storage batch unless
/// every block so far went through.
pub struct IncomingBlocks<'a> {
    pool: MutexGuard<'a, Box<dyn TxPool>>,
    chain: MutexGuard<'a, ChainInner>,
    finished: bool,
}

impl IncomingBlocks<'_> {
    /// Pool the block's transactions and add the block.
    pub fn add_block(&mut self, block: &Block, txs: Vec<Transaction>) -> ChainResult<BlockVerificationContext> {
        let mut bvc = BlockVerificationContext::default();
        match self.chain.handle_incoming_block(&mut **self.pool, block, txs, &mut bvc) {
            Ok(_) => Ok(bvc),
            Err(e) => {
                self.chain.state.batch_success = false;
                Err(e)
            }
        }
    }

    /// Commit or abort the batch and release the locks.
    pub fn cleanup(mut self, force_sync: bool) -> ChainResult<()> {
        self.finished = true;
        self.chain.cleanup_handle_incoming_blocks(force_sync)
    }
}

impl Drop for IncomingBlocks<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.chain.cleanup_handle_incoming_blocks(false) {
                log::error!("failed to clean up incoming blocks: {}", e);
            }
        }
    }
}

// =============================================================================
// ChainInner: checkpoints
// =============================================================================

impl ChainInner {
    /// Compare the main chain with every checkpoint below the tip. On a
    /// mismatch, roll back to just below the checkpoint when `enforce` is
    /// set, otherwise only complain.
    pub(crate) fn check_against_checkpoints(&mut self, pool: &mut dyn TxPool, enforce: bool) -> ChainResult<()> {
        let points: Vec<(u64, Hash)> = self.checkpoints.points().iter().map(|(&h, &id)| (h, id)).collect();
        for (height, expected) in points {
            if height >= self.db.height() {
                break;
            }
            if self.db.block_hash_at(height) == Some(expected) {
                continue;
            }
            if enforce {
                log::error!(
                    "Local blockchain failed to pass a checkpoint at height {}, rolling back!",
                    height
                );
                self.rollback_blockchain_switching(pool, Vec::new(), height)?;
                self.update_next_cumulative_weight_limit()?;
                break;
            }
            log::error!(
                "WARNING: local blockchain failed to pass a checkpoint at height {}, and you could be on a fork. \
                 You should either sync up from scratch or enable checkpoint enforcing.",
                height
            );
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardfork::HardForkSchedule;
    use crate::mem_storage::MemoryStorage;
    use crate::test_support::{test_now, zero_commit, TestCrypto};
    use crate::tx_pool::MemoryPool;
    use ringchain_types::{Network, TxIn, TxOut, TxOutTarget, NULL_HASH};

    fn miner() -> AccountAddress {
        AccountAddress {
            spend_public_key: [9; 32],
            view_public_key: [8; 32],
        }
    }

    fn engine_over(db: MemoryStorage) -> Blockchain {
        let config = BlockchainConfig {
            network: Network::Fakechain,
            fixed_difficulty: Some(1),
            verify_threads: Some(1),
            ..BlockchainConfig::default()
        };
        Blockchain::new(
            Box::new(db),
            Box::new(MemoryPool::with_time_source(test_now)),
            Box::new(HardForkSchedule::new(vec![(1, 0)])),
            Arc::new(TestCrypto),
            config,
        )
        .with_time_source(test_now)
    }

    fn engine() -> Blockchain {
        let chain = engine_over(MemoryStorage::new(zero_commit));
        chain.init().unwrap();
        chain
    }

    fn mine(chain: &Blockchain, n: usize) -> Vec<Block> {
        (0..n)
            .map(|_| {
                let block = chain.create_block_template(&miner(), None, &[]).unwrap().block;
                let bvc = chain.add_new_block(&block).unwrap();
                assert!(bvc.added_to_main_chain, "{:?}", bvc);
                block
            })
            .collect()
    }

    /// Spends an output that does not exist.
    fn unspendable() -> Transaction {
        Transaction {
            version: 1,
            vin: vec![TxIn::ToKey {
                amount: 1000,
                key_offsets: vec![0],
                key_image: [1; 32],
            }],
            vout: vec![TxOut {
                amount: 500,
                target: TxOutTarget::ToKey { key: [2; 32] },
            }],
            ..Transaction::default()
        }
    }

    // ---- init ----

    #[test]
    fn test_init_adds_genesis() {
        let chain = engine();
        assert_eq!(chain.height(), 1);
        let genesis = generate_genesis_block(network_config(Network::Fakechain)).unwrap();
        assert_eq!(chain.tail(), (0, genesis.hash()));
        assert!(chain.current_cumulative_block_weight_limit() > 0);
    }

    #[test]
    fn test_init_reuses_existing_store() {
        let db = MemoryStorage::new(zero_commit);
        let first = engine_over(db.clone());
        first.init().unwrap();
        mine(&first, 3);
        let tip = first.tail();
        drop(first);

        let second = engine_over(db);
        second.init().unwrap();
        assert_eq!(second.tail(), tip);
        assert_eq!(second.current_hard_fork_version(), 1);
    }

    #[test]
    fn test_init_pops_blocks_with_wrong_version() {
        let db = MemoryStorage::new(zero_commit);
        let first = engine_over(db.clone());
        first.init().unwrap();
        mine(&first, 3);
        drop(first);

        // A schedule that moved v2 to height 2 disowns the top two blocks.
        let second = Blockchain::new(
            Box::new(db),
            Box::new(MemoryPool::with_time_source(test_now)),
            Box::new(HardForkSchedule::new(vec![(1, 0), (2, 2)])),
            Arc::new(TestCrypto),
            BlockchainConfig {
                network: Network::Fakechain,
                fixed_difficulty: Some(1),
                ..BlockchainConfig::default()
            },
        )
        .with_time_source(test_now);
        second.init().unwrap();
        assert_eq!(second.height(), 2);
    }

    // ---- queries ----

    #[test]
    fn test_block_queries() {
        let chain = engine();
        let blocks = mine(&chain, 2);
        let id = blocks[1].hash();
        assert_eq!(chain.block_id_by_height(2), Some(id));
        assert_eq!(chain.block_by_hash(&id), Some((blocks[1].clone(), false)));
        assert!(chain.have_block(&id));
        assert!(chain.block_by_hash(&[1; 32]).is_none());
        assert_eq!(chain.block_cumulative_difficulty(2), Some(3));
        assert!(chain.block_weight(2).unwrap() > 0);
        assert!(chain.have_tx(&blocks[0].miner_tx.hash()));
    }

    #[test]
    fn test_alt_block_reported_as_orphan() {
        let chain = engine();
        mine(&chain, 2);
        let genesis = chain.block_id_by_height(0).unwrap();
        let side = chain
            .create_block_template(&miner(), Some(&genesis), &[7])
            .unwrap()
            .block;
        let bvc = chain.add_new_block(&side).unwrap();
        assert!(bvc.added_to_alt_chain, "{:?}", bvc);
        assert_eq!(chain.block_by_hash(&side.hash()).map(|(_, alt)| alt), Some(true));
        assert_eq!(chain.alternative_blocks_count(), 1);
        assert_eq!(chain.alternative_chains().len(), 1);
    }

    #[test]
    fn test_short_chain_history() {
        let chain = engine();
        mine(&chain, 30);
        let history = chain.short_chain_history();
        let height = chain.height();
        assert_eq!(history[0], chain.block_id_by_height(height - 1).unwrap());
        assert_eq!(history[10], chain.block_id_by_height(height - 11).unwrap());
        assert_eq!(history[11], chain.block_id_by_height(height - 13).unwrap());
        assert_eq!(history[12], chain.block_id_by_height(height - 17).unwrap());
        assert_eq!(history.last(), chain.block_id_by_height(0).as_ref());
    }

    #[test]
    fn test_find_blockchain_supplement() {
        let chain = engine();
        let blocks = mine(&chain, 5);
        let genesis = chain.block_id_by_height(0).unwrap();

        let supplement = chain
            .find_blockchain_supplement(&[[3; 32], blocks[1].hash(), genesis], 100)
            .unwrap();
        assert_eq!(supplement.start_height, 2);
        assert_eq!(supplement.total_height, 6);
        assert_eq!(supplement.hashes.len(), 4);
        assert_eq!(supplement.hashes[0], blocks[1].hash());

        let capped = chain.find_blockchain_supplement(&[genesis], 2).unwrap();
        assert_eq!(capped.hashes, vec![genesis, blocks[0].hash()]);

        assert!(chain.find_blockchain_supplement(&[blocks[0].hash()], 10).is_none());
    }

    // ---- blocks ----

    #[test]
    fn test_add_block_twice() {
        let chain = engine();
        let block = mine(&chain, 1).remove(0);
        let bvc = chain.add_new_block(&block).unwrap();
        assert!(bvc.already_exists);
        assert!(!bvc.verification_failed);
        assert_eq!(chain.height(), 2);
    }

    #[test]
    fn test_bad_version_is_not_cached() {
        let chain = engine();
        let mut block = chain.create_block_template(&miner(), None, &[]).unwrap().block;
        block.major_version = 9;
        let bvc = chain.add_new_block(&block).unwrap();
        assert!(bvc.verification_failed && bvc.bad_version);
        assert!(!chain.is_block_invalid(&block.hash()));
    }

    #[test]
    fn test_child_of_invalid_block_is_orphaned() {
        let chain = engine();
        let tx = unspendable();
        assert!(chain.add_tx_to_pool(tx.clone(), true).added_to_pool);
        let mut block = chain.create_block_template(&miner(), None, &[]).unwrap().block;
        block.tx_hashes = vec![tx.hash()];
        let bvc = chain.add_new_block(&block).unwrap();
        assert!(bvc.verification_failed && bvc.invalid_tx, "{:?}", bvc);
        assert!(chain.is_block_invalid(&block.hash()));
        assert!(chain.with_pool(|pool| pool.have_tx(&tx.hash())));

        let mut child = block.clone();
        child.prev_id = block.hash();
        child.tx_hashes.clear();
        let bvc = chain.add_new_block(&child).unwrap();
        assert!(bvc.verification_failed && bvc.marked_as_orphaned);
        assert!(chain.is_block_invalid(&child.hash()));

        let bvc = chain.add_new_block(&block).unwrap();
        assert!(bvc.already_exists && bvc.verification_failed);

        chain.flush_invalid_blocks();
        assert!(!chain.is_block_invalid(&block.hash()));
    }

    #[test]
    fn test_pop_blocks() {
        let chain = engine();
        mine(&chain, 4);
        assert_eq!(chain.pop_blocks(2).unwrap(), 2);
        assert_eq!(chain.height(), 3);
        assert_eq!(chain.pop_blocks(10).unwrap(), 2);
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn test_handle_incoming_blocks() {
        let source = engine();
        let blocks = mine(&source, 3);
        let entries: Vec<BlockCompleteEntry> = blocks.iter().map(|b| BlockCompleteEntry::new(b, &[])).collect();

        let chain = engine();
        let results = chain.handle_incoming_blocks(&entries).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|bvc| bvc.added_to_main_chain));
        assert_eq!(chain.tail(), source.tail());
    }

    #[test]
    fn test_handle_incoming_blocks_rejects_garbage() {
        let chain = engine();
        let entries = vec![BlockCompleteEntry {
            block: vec![1, 2, 3],
            txs: Vec::new(),
        }];
        assert!(matches!(chain.handle_incoming_blocks(&entries), Err(ChainError::Parse(_))));
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn test_dropped_batch_keeps_added_blocks() {
        let source = engine();
        let blocks = mine(&source, 2);
        let chain = engine();
        let parsed: Vec<(Block, Vec<Transaction>)> = blocks.iter().map(|b| (b.clone(), Vec::new())).collect();
        {
            let mut batch = chain.prepare_handle_incoming_blocks(&parsed).unwrap();
            assert!(batch.add_block(&blocks[0], Vec::new()).unwrap().added_to_main_chain);
        }
        assert_eq!(chain.height(), 2);
    }

    #[test]
    fn test_cancel_stops_block_processing() {
        let chain = engine();
        let block = chain.create_block_template(&miner(), None, &[]).unwrap().block;
        chain.cancel();
        assert!(matches!(chain.add_new_block(&block), Err(ChainError::Cancelled)));
    }

    // ---- checkpoints ----

    #[test]
    fn test_enforced_checkpoint_rolls_back() {
        let chain = engine();
        mine(&chain, 5);
        let mut checkpoints = Checkpoints::new();
        checkpoints.add_checkpoint(3, [0x42; 32], None).unwrap();
        chain.update_checkpoints(&checkpoints, false).unwrap();
        assert_eq!(chain.height(), 3);
    }

    #[test]
    fn test_dns_checkpoint_not_enforced() {
        let chain = engine();
        mine(&chain, 5);
        let mut checkpoints = Checkpoints::new();
        checkpoints.add_checkpoint(3, [0x42; 32], None).unwrap();
        chain.update_checkpoints(&checkpoints, true).unwrap();
        assert_eq!(chain.height(), 6);
    }

    #[test]
    fn test_matching_checkpoint_keeps_chain() {
        let chain = engine();
        let blocks = mine(&chain, 5);
        let mut checkpoints = Checkpoints::new();
        checkpoints.add_checkpoint(3, blocks[2].hash(), None).unwrap();
        chain.update_checkpoints(&checkpoints, false).unwrap();
        assert_eq!(chain.height(), 6);
        assert!(chain.check_against_checkpoints(true).is_ok());
    }

    // ---- transactions ----

    #[test]
    fn test_pool_rejects_unknown_inputs() {
        let chain = engine();
        let tx = unspendable();
        let tvc = chain.add_tx_to_pool(tx.clone(), false);
        assert!(tvc.verification_failed);
        assert!(!chain.with_pool(|pool| pool.have_tx(&tx.hash())));

        let tvc = chain.add_tx_to_pool(tx.clone(), true);
        assert!(tvc.added_to_pool, "{:?}", tvc);
        assert_eq!(chain.flush_txes_from_pool(&[tx.hash(), NULL_HASH]), 1);
    }

    #[test]
    fn test_pool_rejects_chain_tx() {
        let chain = engine();
        let block = mine(&chain, 1).remove(0);
        let tvc = chain.add_tx_to_pool(block.miner_tx, false);
        assert!(tvc.verification_failed);
    }

    #[test]
    fn test_miner_data_and_fees() {
        let chain = engine();
        mine(&chain, 2);
        let data = chain.get_miner_data().unwrap();
        assert_eq!(data.height, 3);
        assert_eq!(data.prev_id, chain.tail().1);
        assert_eq!(chain.difficulty_for_next_block().unwrap(), 1);
        assert_eq!(chain.adjusted_time(), test_now());
        assert!(chain.is_tx_spendtime_unlocked(0));
        assert!(!chain.is_tx_spendtime_unlocked(1_000));
    }
}
