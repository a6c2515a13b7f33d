//! Alternative chains and reorganization.
//!
//! A block whose parent is not the tip is validated against the branch it
//! extends and stored as an alternative block. When a branch carries more
//! cumulative work than the main chain, or contains a checkpointed block,
//! the main chain is popped back to the fork point and the branch applied
//! block by block. If any branch block fails, the popped blocks are put
//! back and the branch is dropped.

use std::collections::{HashSet, VecDeque};

use ringchain_types::consensus::{check_hash, rx_seedheight, MONEY_SUPPLY, TIMESTAMP_CHECK_WINDOW};
use ringchain_types::{hash_to_hex, Block, Hash, HfVersion, NULL_HASH};

use crate::chain_state::ChainInner;
use crate::error::{ChainError, ChainResult};
use crate::storage::AltBlockEntry;
use crate::tx_pool::TxPool;
use crate::validation::{check_timestamp_median, prevalidate_miner_transaction};
use crate::verification::BlockVerificationContext;

/// One alternative branch, identified by its tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternativeChain {
    pub tip: AltBlockEntry,
    /// Block hashes from the tip down to the first block off the main
    /// chain.
    pub hashes: Vec<Hash>,
}

impl ChainInner {
    // -------------------------------------------------------------------------
    // Branch reconstruction
    // -------------------------------------------------------------------------

    /// Alternative blocks from the fork point up to `prev_id` (oldest
    /// first), and the timestamps of the last `TIMESTAMP_CHECK_WINDOW`
    /// blocks below the next block on that branch. `None` when the branch
    /// does not connect to the main chain.
    pub(crate) fn build_alt_chain(&self, prev_id: &Hash) -> Option<(Vec<AltBlockEntry>, Vec<u64>)> {
        let mut alt_chain = VecDeque::new();
        let mut timestamps = Vec::new();
        let mut cursor = *prev_id;
        while let Some(entry) = self.db.get_alt_block(&cursor) {
            timestamps.push(entry.block.timestamp);
            cursor = entry.block.prev_id;
            alt_chain.push_front(entry);
        }
        let alt_chain: Vec<AltBlockEntry> = alt_chain.into();

        let connection_height = match alt_chain.first() {
            Some(first) => {
                if self.db.height() <= first.height {
                    log::error!("main blockchain wrong height");
                    return None;
                }
                let Some(h) = self.db.block_height(&first.block.prev_id) else {
                    log::error!("alternate chain does not appear to connect to main chain");
                    return None;
                };
                if h + 1 != first.height {
                    log::error!("alternative chain has wrong connection to main chain");
                    return None;
                }
                h
            }
            None => match self.db.block_height(prev_id) {
                Some(h) => h,
                None => {
                    log::error!("parent block {} is in neither chain", hash_to_hex(prev_id));
                    return None;
                }
            },
        };

        self.complete_timestamps(connection_height, &mut timestamps);
        Some((alt_chain, timestamps))
    }

    /// Add main-chain timestamps from `start_height` downwards until the
    /// vector holds a full timestamp window.
    fn complete_timestamps(&self, start_height: u64, timestamps: &mut Vec<u64>) {
        if timestamps.len() >= TIMESTAMP_CHECK_WINDOW {
            return;
        }
        let needed = (TIMESTAMP_CHECK_WINDOW - timestamps.len()) as u64;
        let stop = start_height.saturating_sub(needed);
        let mut height = start_height;
        while height != stop {
            if let Some(info) = self.db.block_info_at(height) {
                timestamps.push(info.timestamp);
            }
            height -= 1;
        }
    }

    /// Seed hash for a block on `alt_chain` whose seed height is
    /// `seed_height`, taken from the branch when the seed block is on it.
    pub(crate) fn alt_seed_hash(&self, alt_chain: &[AltBlockEntry], seed_height: u64) -> Hash {
        if alt_chain.first().is_some_and(|first| first.height <= seed_height) {
            if let Some(next) = alt_chain.iter().find(|e| e.height == seed_height + 1) {
                return next.block.prev_id;
            }
            if let Some(seed) = alt_chain.iter().find(|e| e.height == seed_height) {
                return seed.block.hash();
            }
        }
        self.db.block_hash_at(seed_height).unwrap_or(NULL_HASH)
    }

    // -------------------------------------------------------------------------
    // Alternative blocks
    // -------------------------------------------------------------------------

    /// Validate a block that does not extend the tip and store it on its
    /// branch, switching to the branch when it wins.
    pub(crate) fn handle_alternative_block(
        &mut self,
        pool: &mut dyn TxPool,
        block: &Block,
        id: &Hash,
        bvc: &mut BlockVerificationContext,
    ) -> ChainResult<bool> {
        self.state.difficulty_window_height = 0;
        self.state.reset_difficulty_window = true;

        let chain_height = self.db.height();
        let block_height = block.claimed_height().unwrap_or(0);
        if block_height == 0 {
            log::error!("block with id: {} (as alternative) has incorrect miner transaction", hash_to_hex(id));
            bvc.fail();
            return Ok(false);
        }

        if !self.checkpoints.is_alternative_block_allowed(chain_height, block_height) {
            log::error!(
                "Block with id: {}\ncan't be accepted for alternative chain, block height: {}\nblockchain height: {}",
                hash_to_hex(id),
                block_height,
                chain_height
            );
            bvc.fail();
            return Ok(false);
        }

        let hf_version = self.hardfork.ideal_version(block_height);
        if !self.hardfork.check_for_height(block, block_height) {
            log::error!(
                "Block with id: {}, has old version for height {}",
                hash_to_hex(id),
                block_height
            );
            bvc.fail().bad_version = true;
            return Ok(false);
        }

        if self.db.get_alt_block(&block.prev_id).is_none() && self.db.block_height(&block.prev_id).is_none() {
            bvc.marked_as_orphaned = true;
            log::error!(
                "Block recognized as orphaned and rejected, id = {}, height {} (parent {}, current top {}, chain height {})",
                hash_to_hex(id),
                block_height,
                hash_to_hex(&block.prev_id),
                hash_to_hex(&self.db.top_block_hash()),
                chain_height
            );
            return Ok(true);
        }

        let Some((mut alt_chain, timestamps)) = self.build_alt_chain(&block.prev_id) else {
            bvc.fail();
            return Ok(false);
        };

        let (height, prev_generated, prev_cumulative_difficulty) = match alt_chain.last() {
            Some(parent) => (
                parent.height + 1,
                parent.already_generated_coins,
                parent.cumulative_difficulty,
            ),
            None => {
                let parent_height = self
                    .db
                    .block_height(&block.prev_id)
                    .ok_or_else(|| ChainError::InvalidArgument("alternative block parent vanished".into()))?;
                let info = self.info_at(parent_height)?;
                (parent_height + 1, info.generated_coins, info.cumulative_difficulty)
            }
        };

        if let Err(e) = check_timestamp_median(block.timestamp, &timestamps) {
            log::error!(
                "Block with id: {}\nfor alternative chain, has invalid timestamp: {}",
                hash_to_hex(id),
                e
            );
            bvc.fail().bad_timestamp = true;
            return Ok(false);
        }

        let (checkpoint_ok, is_checkpoint) = self.checkpoints.check_block(height, id);
        if !checkpoint_ok {
            log::error!("CHECKPOINT VALIDATION FAILED");
            bvc.fail().checkpoint_mismatch = true;
            return Ok(false);
        }

        let difficulty = self.alt_chain_next_difficulty(&alt_chain, height)?;
        if difficulty == 0 {
            return Err(ChainError::ZeroDifficulty(height));
        }

        let seed_hash = if block.major_version >= HfVersion::RANDOMX {
            self.alt_seed_hash(&alt_chain, rx_seedheight(height))
        } else {
            NULL_HASH
        };
        let pow = self
            .crypto
            .pow_hash(&block.hashing_blob(), block.major_version, height, &seed_hash);
        if !check_hash(&pow, difficulty) {
            log::error!(
                "Block with id: {}\nfor alternative chain, does not have enough proof of work: {}\nexpected difficulty: {}",
                hash_to_hex(id),
                hash_to_hex(&pow),
                difficulty
            );
            bvc.fail().bad_pow = true;
            return Ok(false);
        }

        if let Err(e) = prevalidate_miner_transaction(block, height, hf_version) {
            log::error!(
                "Block with id: {} (as alternative) has incorrect miner transaction: {}",
                hash_to_hex(id),
                e
            );
            bvc.fail().bad_miner_tx = true;
            return Ok(false);
        }

        let reward = block.miner_tx.outputs_amount().unwrap_or(0);
        let already_generated_coins = prev_generated.saturating_add(reward).min(MONEY_SUPPLY);
        let cumulative_difficulty = prev_cumulative_difficulty.saturating_add(difficulty);

        let mut block_weight = block.miner_tx.weight();
        for tx_id in &block.tx_hashes {
            let weight = pool
                .tx_weight(tx_id)
                .or_else(|| self.db.get_tx(tx_id).map(|tx| tx.weight()));
            match weight {
                Some(w) => block_weight += w,
                None => {
                    log::debug!("unknown weight for alt block transaction {}", hash_to_hex(tx_id));
                    block_weight = 0;
                    break;
                }
            }
        }

        let entry = AltBlockEntry {
            block: block.clone(),
            height,
            block_weight,
            long_term_weight: block_weight,
            cumulative_difficulty,
            already_generated_coins,
        };
        self.db.add_alt_block(*id, entry.clone())?;
        alt_chain.push(entry);

        let main_cumulative_difficulty = self.top_cumulative_difficulty();
        if is_checkpoint {
            log::info!(
                "###### REORGANIZE on height: {} of {}, checkpoint is found in alternative chain on height {}",
                alt_chain[0].height,
                chain_height - 1,
                height
            );
            let switched = self.switch_to_alternative_blockchain(pool, &alt_chain, true)?;
            if switched {
                bvc.added_to_main_chain = true;
            } else {
                bvc.fail();
            }
            return Ok(switched);
        }

        if main_cumulative_difficulty < cumulative_difficulty {
            log::info!(
                "###### REORGANIZE on height: {} of {} with cum_difficulty {}\n alternative blockchain size: {} with cum_difficulty {}",
                alt_chain[0].height,
                chain_height - 1,
                main_cumulative_difficulty,
                alt_chain.len(),
                cumulative_difficulty
            );
            let discard = !self.config.keep_alt_blocks;
            let switched = self.switch_to_alternative_blockchain(pool, &alt_chain, discard)?;
            if switched {
                bvc.added_to_main_chain = true;
            } else {
                bvc.fail();
            }
            return Ok(switched);
        }

        bvc.added_to_alt_chain = true;
        log::info!(
            "----- BLOCK ADDED AS ALTERNATIVE ON HEIGHT {}\nid:\t{}\nPoW:\t{}\ndifficulty:\t{}",
            height,
            hash_to_hex(id),
            hash_to_hex(&pow),
            difficulty
        );
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Reorganization
    // -------------------------------------------------------------------------

    /// Make `alt_chain` (oldest first) the main chain. Blocks popped off the
    /// old main chain are re-added as alternative blocks unless
    /// `discard_disconnected` is set.
    pub(crate) fn switch_to_alternative_blockchain(
        &mut self,
        pool: &mut dyn TxPool,
        alt_chain: &[AltBlockEntry],
        discard_disconnected: bool,
    ) -> ChainResult<bool> {
        self.state.difficulty_window_height = 0;
        self.state.reset_difficulty_window = true;

        let Some(first) = alt_chain.first() else {
            log::error!("empty chain passed to switch_to_alternative_blockchain");
            return Ok(false);
        };
        if self.db.block_height(&first.block.prev_id).is_none() {
            log::error!("attempting to move to an alternate chain, but it doesn't appear to connect to the main chain");
            return Ok(false);
        }

        let mut disconnected = VecDeque::new();
        while self.db.top_block_hash() != first.block.prev_id {
            disconnected.push_front(self.pop_block_from_blockchain(pool)?);
        }
        self.update_next_cumulative_weight_limit()?;
        let split_height = self.db.height();

        for (index, entry) in alt_chain.iter().enumerate() {
            let id = entry.block.hash();
            let mut bvc = BlockVerificationContext::default();
            let added = self.handle_block_to_main_chain(pool, &entry.block, &id, &mut bvc)?;
            if !added || !bvc.added_to_main_chain {
                log::error!("Failed to switch to alternative blockchain");
                self.rollback_blockchain_switching(pool, disconnected.into(), split_height)?;

                // Later blocks build on the failed one and can never connect.
                for failed in &alt_chain[index..] {
                    self.db.remove_alt_block(&failed.block.hash())?;
                }
                self.add_block_as_invalid(&entry.block, &id);
                log::error!(
                    "The block was inserted as invalid while connecting new alternative chain, block_id: {}",
                    hash_to_hex(&id)
                );
                return Ok(false);
            }
        }

        let discarded = disconnected.len();
        if !discard_disconnected {
            for old in disconnected {
                let id = old.hash();
                let mut bvc = BlockVerificationContext::default();
                match self.handle_alternative_block(pool, &old, &id, &mut bvc) {
                    Ok(true) => {}
                    Ok(false) => log::error!("Failed to push ex-main chain blocks to alternative chain"),
                    Err(e) => log::error!("Failed to push ex-main chain block {} to alternative chain: {}", hash_to_hex(&id), e),
                }
            }
        }

        for entry in alt_chain {
            self.db.remove_alt_block(&entry.block.hash())?;
        }
        self.hardfork.reorganize_from_chain_height(split_height, self.db.height());

        log::info!(
            "REORGANIZE SUCCESS! on height: {}, new blockchain size: {}, {} blocks disconnected",
            split_height,
            self.db.height(),
            discarded
        );
        Ok(true)
    }

    /// Pop back to `rollback_height` and re-apply `original_chain` (oldest
    /// first). The original blocks were valid before, so failing to re-apply
    /// one leaves the chain in an unknown state and aborts the process.
    pub(crate) fn rollback_blockchain_switching(
        &mut self,
        pool: &mut dyn TxPool,
        original_chain: Vec<Block>,
        rollback_height: u64,
    ) -> ChainResult<()> {
        if rollback_height > self.db.height() {
            return Ok(());
        }
        self.state.difficulty_window_height = 0;
        self.state.reset_difficulty_window = true;

        while self.db.height() > rollback_height.max(1) {
            self.pop_block_from_blockchain(pool)?;
        }
        self.update_next_cumulative_weight_limit()?;
        let popped_to = self.db.height();
        self.hardfork.reorganize_from_chain_height(popped_to, popped_to);

        let restored = original_chain.len();
        for block in original_chain {
            let id = block.hash();
            let mut bvc = BlockVerificationContext::default();
            let added = self.handle_block_to_main_chain(pool, &block, &id, &mut bvc)?;
            if !added || !bvc.added_to_main_chain {
                panic!(
                    "PANIC! failed to re-add block {} at height {} while rolling back a chain switch",
                    hash_to_hex(&id),
                    self.db.height()
                );
            }
        }
        self.hardfork.reorganize_from_chain_height(rollback_height, self.db.height());

        log::info!("Rollback to height {} was successful.", rollback_height);
        if restored > 0 {
            log::info!("Restoration to previous blockchain successful as well.");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Every alternative branch, one per tip.
    pub(crate) fn alternative_chains(&self) -> Vec<AlternativeChain> {
        let alt_blocks = self.db.alt_blocks();
        let parents: HashSet<Hash> = alt_blocks.iter().map(|(_, e)| e.block.prev_id).collect();

        alt_blocks
            .iter()
            .filter(|(hash, _)| !parents.contains(hash))
            .map(|(hash, tip)| {
                let mut hashes = vec![*hash];
                let mut cursor = tip.block.prev_id;
                while let Some(entry) = self.db.get_alt_block(&cursor) {
                    hashes.push(cursor);
                    cursor = entry.block.prev_id;
                }
                AlternativeChain {
                    tip: tip.clone(),
                    hashes,
                }
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
