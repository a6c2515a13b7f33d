//! Extending and shrinking the main chain.
//!
//! [`ChainInner::handle_block_to_main_chain`] runs every block rule against
//! a block whose parent is the current tip, pulls its transactions out of
//! the pool, and commits it to storage. Any rule failure puts the
//! transactions back into the pool and leaves the chain untouched.
//! [`ChainInner::pop_block_from_blockchain`] undoes one block, returning its
//! transactions to the pool.

use std::collections::HashSet;

use ringchain_types::consensus::{check_hash, median, rx_seedheight, MONEY_SUPPLY, REWARD_BLOCKS_WINDOW};
use ringchain_types::{hash_to_hex, Block, Hash, HfVersion, KeyImage, Transaction, NULL_HASH};

use crate::chain_state::ChainInner;
use crate::error::{ChainError, ChainResult};
use crate::storage::StoredBlockInfo;
use crate::tx_pool::{PoolTxEntry, TxPool};
use crate::validation::{prevalidate_miner_transaction, validate_miner_transaction, ValidationError};
use crate::verification::{BlockVerificationContext, TxVerificationContext};

impl ChainInner {
    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Proof-of-work hash of a block that will sit at `height` on the main
    /// chain.
    pub(crate) fn block_pow_hash(&self, block: &Block, height: u64) -> Hash {
        let seed_hash = if block.major_version >= HfVersion::RANDOMX {
            self.db.block_hash_at(rx_seedheight(height)).unwrap_or(NULL_HASH)
        } else {
            NULL_HASH
        };
        self.crypto
            .pow_hash(&block.hashing_blob(), block.major_version, height, &seed_hash)
    }

    pub(crate) fn add_block_as_invalid(&mut self, block: &Block, id: &Hash) {
        self.state.invalid_blocks.insert(*id);
        log::info!(
            "BLOCK ADDED AS INVALID: {}\n, prev_id={}, m_invalid_blocks count={}",
            hash_to_hex(id),
            hash_to_hex(&block.prev_id),
            self.state.invalid_blocks.len()
        );
    }

    /// Hand transactions back to the pool as if a block had carried them.
    pub(crate) fn return_txs_to_pool(&self, pool: &mut dyn TxPool, txs: Vec<(Transaction, Hash)>) {
        let hf_version = self.current_version();
        for (tx, hash) in txs {
            let weight = tx.weight();
            let mut tvc = TxVerificationContext::default();
            if !pool.add_tx(tx, hash, weight, &mut tvc, true, hf_version) {
                log::error!("failed to return taken transaction with hash {} to tx_pool", hash_to_hex(&hash));
            }
        }
    }

    // -------------------------------------------------------------------------
    // Push
    // -------------------------------------------------------------------------

    /// Validate `block` on top of the tip and commit it. Returns `Ok(true)`
    /// when the block was added; rule failures return `Ok(false)` with the
    /// reason in `bvc`.
    pub(crate) fn handle_block_to_main_chain(
        &mut self,
        pool: &mut dyn TxPool,
        block: &Block,
        id: &Hash,
        bvc: &mut BlockVerificationContext,
    ) -> ChainResult<bool> {
        let (_, top_hash) = self.tail();
        if block.prev_id != top_hash {
            log::error!(
                "Block with id: {}\nhas wrong prev_id: {}\nexpected: {}",
                hash_to_hex(id),
                hash_to_hex(&block.prev_id),
                hash_to_hex(&top_hash)
            );
            bvc.fail();
            return Ok(false);
        }
        let height = self.db.height();

        let newest_known = self.hardfork.ideal_version(u64::MAX);
        if block.major_version > newest_known && !self.state.seen_future_version {
            log::warn!(
                "block {} has version {}, newer than the latest known version {}; this node may need an update",
                hash_to_hex(id),
                block.major_version,
                newest_known
            );
            self.state.seen_future_version = true;
        }

        let hf_version = self.current_version();
        if !self.hardfork.check(block) {
            log::error!(
                "Block with id: {}, has old version: {}, current version: {}",
                hash_to_hex(id),
                block.major_version,
                hf_version
            );
            bvc.fail().bad_version = true;
            return Ok(false);
        }

        if self.check_block_timestamp(block).is_err() {
            bvc.fail().bad_timestamp = true;
            return Ok(false);
        }

        let difficulty = self.difficulty_for_next_block()?;
        if difficulty == 0 {
            return Err(ChainError::ZeroDifficulty(height));
        }

        let mut fast_check = false;
        if let Some(&(expected, _)) = self.state.blocks_hash_check.get(height as usize) {
            if expected != NULL_HASH {
                if expected != *id {
                    log::error!(
                        "Block with id {} does not match the known hash {} at height {}",
                        hash_to_hex(id),
                        hash_to_hex(&expected),
                        height
                    );
                    bvc.fail();
                    return Ok(false);
                }
                fast_check = true;
            }
        }

        let mut pow = None;
        if !fast_check {
            let hash = match self.state.longhash_table.get(id) {
                Some(pow) => *pow,
                None => self.block_pow_hash(block, height),
            };
            pow = Some(hash);
            if !check_hash(&hash, difficulty) {
                log::info!(
                    "Block with id: {}\ndoes not have enough proof of work: {} at height {}, unexpected difficulty: {}",
                    hash_to_hex(id),
                    hash_to_hex(&hash),
                    height,
                    difficulty
                );
                bvc.fail().bad_pow = true;
                return Ok(false);
            }
        }

        if self.checkpoints.is_in_checkpoint_zone(height) && !self.checkpoints.check_block(height, id).0 {
            log::error!("CHECKPOINT VALIDATION FAILED");
            bvc.fail().checkpoint_mismatch = true;
            return Ok(false);
        }

        if let Err(e) = prevalidate_miner_transaction(block, height, hf_version) {
            log::error!("Block with id: {} failed to pass prevalidation: {}", hash_to_hex(id), e);
            bvc.fail().bad_miner_tx = true;
            return Ok(false);
        }

        let coinbase_weight = block.miner_tx.weight();
        let mut cumulative_block_weight = coinbase_weight;
        let mut fee_summary = 0u64;
        let mut txs: Vec<(Transaction, Hash)> = Vec::with_capacity(block.tx_hashes.len());
        let mut key_images: HashSet<KeyImage> = HashSet::new();
        let mut n_pruned = 0usize;
        let mut tx_index = 0usize;

        for tx_id in &block.tx_hashes {
            if self.db.tx_exists(tx_id) {
                log::error!(
                    "Block with id: {} attempting to add transaction already in blockchain with id: {}",
                    hash_to_hex(id),
                    hash_to_hex(tx_id)
                );
                bvc.fail();
                self.return_txs_to_pool(pool, txs);
                return Ok(false);
            }

            let Some(PoolTxEntry { tx, weight, fee, .. }) = pool.take_tx(tx_id) else {
                log::error!(
                    "Block with id: {} has at least one unknown transaction with id: {}",
                    hash_to_hex(id),
                    hash_to_hex(tx_id)
                );
                bvc.fail().missing_txs = true;
                self.return_txs_to_pool(pool, txs);
                return Ok(false);
            };
            if tx.pruned {
                n_pruned += 1;
            }

            let rejected = if tx.key_images().any(|ki| !key_images.insert(*ki)) {
                log::error!(
                    "Block with id: {} spends a key image twice, transaction {}",
                    hash_to_hex(id),
                    hash_to_hex(tx_id)
                );
                bvc.fail().double_spend = true;
                true
            } else if fast_check {
                let expected = self.state.blocks_txs_check.get(tx_index).copied();
                tx_index += 1;
                if expected != Some(*tx_id) {
                    log::error!("Block with id: {} failed to match tx hash", hash_to_hex(id));
                    bvc.fail();
                }
                expected != Some(*tx_id)
            } else {
                let mut tvc = TxVerificationContext::default();
                let spendable = self.check_tx_inputs(&tx, &mut tvc).is_some();
                if !spendable {
                    log::error!(
                        "Block with id: {} has at least one transaction (id: {}) with wrong inputs.",
                        hash_to_hex(id),
                        hash_to_hex(tx_id)
                    );
                    let flags = bvc.fail();
                    flags.invalid_tx = true;
                    flags.double_spend |= tvc.double_spend;
                }
                !spendable
            };

            txs.push((tx, *tx_id));
            if rejected {
                self.add_block_as_invalid(block, id);
                self.return_txs_to_pool(pool, txs);
                return Ok(false);
            }

            fee_summary = fee_summary.saturating_add(fee);
            cumulative_block_weight += weight;
        }

        if n_pruned > 0 {
            let known_weight = self
                .state
                .blocks_hash_check
                .get(height as usize)
                .map_or(0, |&(_, weight)| weight);
            if known_weight == 0 {
                log::error!(
                    "Block with id: {} has pruned transactions but no known weight at height {}",
                    hash_to_hex(id),
                    height
                );
                bvc.fail();
                self.return_txs_to_pool(pool, txs);
                return Ok(false);
            }
            cumulative_block_weight = known_weight;
        }
        self.state.blocks_txs_check.clear();

        let median_weight = if hf_version >= HfVersion::EFFECTIVE_SHORT_TERM_MEDIAN_IN_PENALTY {
            self.state.cumulative_weight_median
        } else {
            median(&self.last_n_block_weights(REWARD_BLOCKS_WINDOW))
        };
        let already_generated_coins = self.top_generated_coins();
        let reward = match validate_miner_transaction(
            block,
            cumulative_block_weight,
            fee_summary,
            median_weight,
            already_generated_coins,
            hf_version,
        ) {
            Ok(reward) => reward,
            Err(e) => {
                log::error!("Block with id: {} has incorrect miner transaction: {}", hash_to_hex(id), e);
                let flags = bvc.fail();
                flags.bad_miner_tx = true;
                if matches!(e, ValidationError::BlockTooBig(_)) {
                    flags.too_big = true;
                }
                self.return_txs_to_pool(pool, txs);
                return Ok(false);
            }
        };
        if reward.partial {
            bvc.partial_block_reward = true;
        }

        let cumulative_difficulty = self.top_cumulative_difficulty().saturating_add(difficulty);
        let generated_coins = already_generated_coins
            .saturating_add(reward.base_reward)
            .min(MONEY_SUPPLY);
        let long_term_weight = self.next_long_term_block_weight(cumulative_block_weight)?;

        let info = StoredBlockInfo {
            hash: *id,
            timestamp: block.timestamp,
            weight: cumulative_block_weight,
            long_term_weight,
            cumulative_difficulty,
            generated_coins,
        };
        let new_height = match self.db.add_block(block, info, &txs) {
            Ok(h) => h,
            Err(e) => {
                log::error!("Error adding block with hash: {} to blockchain: {}", hash_to_hex(id), e);
                self.state.batch_success = false;
                bvc.fail();
                self.return_txs_to_pool(pool, txs);
                return Ok(false);
            }
        };
        self.hardfork.add(block, height);

        if let Err(e) = self.update_next_cumulative_weight_limit() {
            log::error!("Failed to update next cumulative weight limit: {}", e);
            self.pop_block_from_blockchain(pool)?;
            return Err(e);
        }

        log::info!(
            "+++++ BLOCK SUCCESSFULLY ADDED\nid:\t{}\nPoW:\t{}\nHEIGHT {}, difficulty:\t{}\nblock reward: {}({} + {}), coinbase_weight: {}, cumulative weight: {}",
            hash_to_hex(id),
            pow.map_or_else(|| "skipped".to_string(), |h| hash_to_hex(&h)),
            height,
            difficulty,
            reward.base_reward.saturating_add(fee_summary),
            reward.base_reward,
            fee_summary,
            coinbase_weight,
            cumulative_block_weight
        );

        bvc.added_to_main_chain = true;
        pool.on_blockchain_inc(new_height, id);
        self.difficulty_for_next_block()?;
        self.state.invalidate_template_cache();

        let new_hf_version = self.current_version();
        if new_hf_version != hf_version && new_height != 1 {
            let removed = pool.validate(new_hf_version);
            log::info!("hard fork to v{}: {} pool transactions no longer valid", new_hf_version, removed);
        }
        Ok(true)
    }

    /// Entry point for a single block: short-circuits known and invalid
    /// blocks, then routes to the main chain or the alternative-block path
    /// depending on the parent. Runs inside a storage batch unless one is
    /// already open.
    pub(crate) fn add_new_block(
        &mut self,
        pool: &mut dyn TxPool,
        block: &Block,
        bvc: &mut BlockVerificationContext,
    ) -> ChainResult<bool> {
        let id = block.hash();
        if self.cancelled() {
            return Err(ChainError::Cancelled);
        }
        if self.have_block(&id) {
            log::trace!("block with id = {} already exists", hash_to_hex(&id));
            bvc.already_exists = true;
            return Ok(false);
        }
        if self.state.invalid_blocks.contains(&id) {
            log::debug!("block with id = {} is known to be invalid", hash_to_hex(&id));
            bvc.already_exists = true;
            bvc.fail();
            return Ok(false);
        }
        if self.state.invalid_blocks.contains(&block.prev_id) {
            log::error!(
                "Block with id: {} has a parent known to be invalid: {}",
                hash_to_hex(&id),
                hash_to_hex(&block.prev_id)
            );
            self.add_block_as_invalid(block, &id);
            bvc.fail().marked_as_orphaned = true;
            return Ok(false);
        }

        let stop_batch = self.db.batch_start();
        let result = if block.prev_id == self.db.top_block_hash() {
            self.handle_block_to_main_chain(pool, block, &id, bvc)
        } else {
            self.handle_alternative_block(pool, block, &id, bvc)
        };
        if stop_batch {
            let commit = result.is_ok() && self.state.batch_success;
            self.state.batch_success = true;
            if commit {
                self.db.batch_stop()?;
            } else {
                self.db.batch_abort();
                self.resync_after_abort()?;
            }
        }
        result
    }

    /// Bring the cached chain state back in line with storage after a batch
    /// was aborted.
    pub(crate) fn resync_after_abort(&mut self) -> ChainResult<()> {
        let height = self.db.height();
        self.hardfork.reorganize_from_chain_height(height, height);
        self.state.reset_difficulty_cache();
        self.state.invalidate_template_cache();
        self.update_next_cumulative_weight_limit()?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Pop
    // -------------------------------------------------------------------------

    /// Remove the top block and return its transactions to the pool.
    pub(crate) fn pop_block_from_blockchain(&mut self, pool: &mut dyn TxPool) -> ChainResult<Block> {
        if self.db.height() <= 1 {
            return Err(ChainError::GenesisPop);
        }
        self.state.difficulty_window_height = 0;
        self.state.reset_difficulty_window = true;

        let previous_hf_version = self.current_version();
        let (block, txs) = self.db.pop_block().inspect_err(|e| {
            log::error!("Error popping block from blockchain: {}", e);
        })?;
        self.hardfork.on_block_popped(1);

        let hf_version = self.hardfork.ideal_version(self.db.height());
        for tx in txs {
            if tx.pruned {
                log::warn!("not returning pruned transaction {} to the pool", hash_to_hex(&tx.prefix_hash()));
                continue;
            }
            let hash = tx.hash();
            let weight = tx.weight();
            let mut tvc = TxVerificationContext::default();
            if !pool.add_tx(tx, hash, weight, &mut tvc, true, hf_version) {
                log::error!("Error returning transaction to tx_pool: {}", hash_to_hex(&hash));
            }
        }

        self.state.clear_batch_tables();
        let (top_height, top_hash) = self.tail();
        pool.on_blockchain_dec(top_height + 1, &top_hash);
        self.state.invalidate_template_cache();

        let current_hf_version = self.current_version();
        if current_hf_version != previous_hf_version {
            let removed = pool.validate(current_hf_version);
            log::info!("reverted to v{}: {} pool transactions no longer valid", current_hf_version, removed);
        }
        Ok(block)
    }

    /// Pop up to `count` blocks, never the genesis block. Returns how many
    /// were removed.
    pub(crate) fn pop_blocks(&mut self, pool: &mut dyn TxPool, count: u64) -> ChainResult<u64> {
        let stop_batch = self.db.batch_start();
        let count = count.min(self.db.height().saturating_sub(1));

        let popped = (|| -> ChainResult<u64> {
            for _ in 0..count {
                self.pop_block_from_blockchain(pool)?;
            }
            self.update_next_cumulative_weight_limit()?;
            Ok(count)
        })();

        match popped {
            Ok(n) => {
                if stop_batch {
                    self.db.batch_stop()?;
                }
                log::info!("popped {} blocks, new height {}", n, self.db.height());
                Ok(n)
            }
            Err(e) => {
                log::error!("failed to pop {} blocks: {}", count, e);
                if stop_batch {
                    self.db.batch_abort();
                }
                Err(e)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{push_block, test_inner, TEST_NOW};
    use crate::tx_pool::MemoryPool;
    use ringchain_types::{AccountAddress, TxIn, TxOut, TxOutTarget};

    fn address() -> AccountAddress {
        AccountAddress {
            spend_public_key: [3; 32],
            view_public_key: [4; 32],
        }
    }

    /// Chain with a bare genesis block, fixed difficulty and an up to date
    /// weight limit.
    fn chain(hf: u8) -> ChainInner {
        let mut inner = test_inner(vec![(hf, 0)]);
        inner.state.fixed_difficulty = Some(1);
        push_block(&mut inner, TEST_NOW - 1000, 100, 1, 0);
        inner.update_next_cumulative_weight_limit().unwrap();
        inner
    }

    fn next_block(inner: &mut ChainInner, pool: &mut MemoryPool) -> Block {
        inner
            .create_block_template(pool, &address(), None, &[])
            .unwrap()
            .block
    }

    fn add(inner: &mut ChainInner, pool: &mut MemoryPool, block: &Block) -> (bool, BlockVerificationContext) {
        let mut bvc = BlockVerificationContext::default();
        let added = inner
            .handle_block_to_main_chain(pool, block, &block.hash(), &mut bvc)
            .unwrap();
        (added, bvc)
    }

    /// Plain-amount spend of output 0 of `amount`, ring size one.
    fn spend(amount: u64, key_image: u8, fee: u64) -> Transaction {
        let mut tx = Transaction {
            version: 1,
            vin: vec![TxIn::ToKey {
                amount,
                key_offsets: vec![0],
                key_image: [key_image; 32],
            }],
            vout: vec![TxOut {
                amount: amount - fee,
                target: TxOutTarget::ToKey { key: [7; 32] },
            }],
            ..Transaction::default()
        };
        let prefix = tx.prefix_hash();
        tx.signatures = vec![vec![ringchain_types::Signature { c: [key_image; 32], r: prefix }]];
        tx
    }

    fn largest_output(block: &Block) -> u64 {
        block.miner_tx.vout.iter().map(|o| o.amount).max().unwrap()
    }

    /// Extend the chain with `n` template blocks.
    fn mine(inner: &mut ChainInner, pool: &mut MemoryPool, n: usize) {
        for _ in 0..n {
            let block = next_block(inner, pool);
            let (added, bvc) = add(inner, pool, &block);
            assert!(added, "{:?}", bvc);
        }
    }

    fn pool_add(pool: &mut MemoryPool, tx: Transaction, kept_by_block: bool) -> Hash {
        let hash = tx.hash();
        let weight = tx.weight();
        let mut tvc = TxVerificationContext::default();
        assert!(pool.add_tx(tx, hash, weight, &mut tvc, kept_by_block, 1));
        hash
    }

    // ---- push ----

    #[test]
    fn test_template_block_is_accepted() {
        let mut inner = chain(1);
        let mut pool = MemoryPool::new();
        let block = next_block(&mut inner, &mut pool);
        let (added, bvc) = add(&mut inner, &mut pool, &block);
        assert!(added, "{:?}", bvc);
        assert!(bvc.added_to_main_chain);
        assert_eq!(inner.db.height(), 2);
        assert_eq!(inner.db.top_block_hash(), block.hash());
        assert!(inner.top_generated_coins() > 0);
    }

    #[test]
    fn test_wrong_parent_fails() {
        let mut inner = chain(1);
        let mut pool = MemoryPool::new();
        let mut block = next_block(&mut inner, &mut pool);
        block.prev_id = [9; 32];
        let (added, bvc) = add(&mut inner, &mut pool, &block);
        assert!(!added && bvc.verification_failed);
        assert_eq!(inner.db.height(), 1);
    }

    #[test]
    fn test_bad_version_flag() {
        let mut inner = chain(1);
        let mut pool = MemoryPool::new();
        let mut block = next_block(&mut inner, &mut pool);
        block.major_version = 3;
        let (added, bvc) = add(&mut inner, &mut pool, &block);
        assert!(!added && bvc.bad_version);
        // Unknown future versions are only warned about once.
        assert!(inner.state.seen_future_version);
    }

    #[test]
    fn test_future_timestamp_flag() {
        let mut inner = chain(1);
        let mut pool = MemoryPool::new();
        let mut block = next_block(&mut inner, &mut pool);
        block.timestamp = TEST_NOW + 3 * 3600;
        let (added, bvc) = add(&mut inner, &mut pool, &block);
        assert!(!added && bvc.bad_timestamp);
    }

    #[test]
    fn test_insufficient_pow_flag() {
        let mut inner = chain(1);
        inner.state.fixed_difficulty = Some(u128::MAX);
        let mut pool = MemoryPool::new();
        let block = next_block(&mut inner, &mut pool);
        let id = block.hash();
        inner.state.longhash_table.insert(id, [0xff; 32]);
        let (added, bvc) = add(&mut inner, &mut pool, &block);
        assert!(!added && bvc.bad_pow);
    }

    #[test]
    fn test_excess_reward_flag() {
        let mut inner = chain(1);
        let mut pool = MemoryPool::new();
        let mut block = next_block(&mut inner, &mut pool);
        block.miner_tx.vout[0].amount += 1;
        let (added, bvc) = add(&mut inner, &mut pool, &block);
        assert!(!added && bvc.bad_miner_tx);
        assert!(!bvc.too_big);
        assert_eq!(inner.db.height(), 1);
    }

    #[test]
    fn test_missing_tx_flag() {
        let mut inner = chain(1);
        let mut pool = MemoryPool::new();
        let mut block = next_block(&mut inner, &mut pool);
        block.tx_hashes.push([5; 32]);
        let (added, bvc) = add(&mut inner, &mut pool, &block);
        assert!(!added && bvc.missing_txs);
    }

    #[test]
    fn test_checkpoint_mismatch_flag() {
        let mut inner = chain(1);
        inner.checkpoints.add_checkpoint(1, [0x42; 32], None).unwrap();
        let mut pool = MemoryPool::new();
        let block = next_block(&mut inner, &mut pool);
        let (added, bvc) = add(&mut inner, &mut pool, &block);
        assert!(!added && bvc.checkpoint_mismatch);
    }

    #[test]
    fn test_spend_mined_output() {
        let mut inner = chain(1);
        let mut pool = MemoryPool::new();
        let first = next_block(&mut inner, &mut pool);
        add(&mut inner, &mut pool, &first);
        let amount = largest_output(&first);
        mine(&mut inner, &mut pool, 60);

        let tx_hash = pool_add(&mut pool, spend(amount, 1, 1_000_000_000), false);
        let block = next_block(&mut inner, &mut pool);
        assert_eq!(block.tx_hashes, vec![tx_hash]);
        let (added, bvc) = add(&mut inner, &mut pool, &block);
        assert!(added, "{:?}", bvc);
        assert!(inner.db.tx_exists(&tx_hash));
        assert!(inner.db.has_key_image(&[1; 32]));
        assert_eq!(pool.tx_count(), 0);
    }

    #[test]
    fn test_intra_block_double_spend() {
        let mut inner = chain(1);
        let mut pool = MemoryPool::new();
        let first = next_block(&mut inner, &mut pool);
        add(&mut inner, &mut pool, &first);
        let amount = largest_output(&first);
        mine(&mut inner, &mut pool, 60);

        let a = pool_add(&mut pool, spend(amount, 1, 1_000_000_000), true);
        let b = pool_add(&mut pool, spend(amount, 1, 2_000_000_000), true);
        let mut block = next_block(&mut inner, &mut pool);
        block.tx_hashes = vec![a, b];
        let (added, bvc) = add(&mut inner, &mut pool, &block);
        assert!(!added && bvc.double_spend);
        assert!(inner.state.invalid_blocks.contains(&block.hash()));
        // Both transactions went back to the pool.
        assert_eq!(pool.tx_count(), 2);
    }

    #[test]
    fn test_unspendable_input_marks_invalid() {
        let mut inner = chain(1);
        let mut pool = MemoryPool::new();
        let first = next_block(&mut inner, &mut pool);
        add(&mut inner, &mut pool, &first);
        let amount = largest_output(&first);

        // Coinbase still locked.
        let tx_hash = pool_add(&mut pool, spend(amount, 1, 1_000_000_000), true);
        let mut block = next_block(&mut inner, &mut pool);
        block.tx_hashes = vec![tx_hash];
        let (added, bvc) = add(&mut inner, &mut pool, &block);
        assert!(!added && bvc.invalid_tx);
        assert!(inner.state.invalid_blocks.contains(&block.hash()));
        assert!(pool.have_tx(&tx_hash));
    }

    #[test]
    fn test_known_hash_skips_pow() {
        let mut inner = chain(1);
        inner.state.fixed_difficulty = Some(1 << 100);
        let mut pool = MemoryPool::new();
        let block = next_block(&mut inner, &mut pool);
        let id = block.hash();
        inner.state.longhash_table.insert(id, [0xff; 32]);
        inner.state.blocks_hash_check = vec![(NULL_HASH, 0), (id, 0)];
        let (added, bvc) = add(&mut inner, &mut pool, &block);
        assert!(added, "{:?}", bvc);
    }

    #[test]
    fn test_known_hash_mismatch_fails() {
        let mut inner = chain(1);
        let mut pool = MemoryPool::new();
        let block = next_block(&mut inner, &mut pool);
        inner.state.blocks_hash_check = vec![(NULL_HASH, 0), ([8; 32], 0)];
        let (added, bvc) = add(&mut inner, &mut pool, &block);
        assert!(!added && bvc.verification_failed);
    }

    // ---- pop ----

    #[test]
    fn test_pop_returns_txs_to_pool() {
        let mut inner = chain(1);
        let mut pool = MemoryPool::new();
        let first = next_block(&mut inner, &mut pool);
        add(&mut inner, &mut pool, &first);
        let amount = largest_output(&first);
        mine(&mut inner, &mut pool, 60);
        let tx_hash = pool_add(&mut pool, spend(amount, 1, 1_000_000_000), false);
        let block = next_block(&mut inner, &mut pool);
        assert!(add(&mut inner, &mut pool, &block).0);
        let height = inner.db.height();

        let popped = inner.pop_block_from_blockchain(&mut pool).unwrap();
        assert_eq!(popped, block);
        assert_eq!(inner.db.height(), height - 1);
        assert!(pool.have_tx(&tx_hash));
        assert!(pool.get(&tx_hash).unwrap().kept_by_block);
        assert!(!inner.db.has_key_image(&[1; 32]));

        // The popped block applies again.
        let (added, bvc) = add(&mut inner, &mut pool, &popped);
        assert!(added, "{:?}", bvc);
        assert_eq!(inner.db.top_block_hash(), block.hash());
    }

    #[test]
    fn test_genesis_is_never_popped() {
        let mut inner = chain(1);
        let mut pool = MemoryPool::new();
        assert!(matches!(
            inner.pop_block_from_blockchain(&mut pool),
            Err(ChainError::GenesisPop)
        ));
    }

    #[test]
    fn test_pop_blocks_clamps_to_genesis() {
        let mut inner = chain(1);
        let mut pool = MemoryPool::new();
        mine(&mut inner, &mut pool, 3);
        assert_eq!(inner.pop_blocks(&mut pool, 10).unwrap(), 3);
        assert_eq!(inner.db.height(), 1);
    }
}
