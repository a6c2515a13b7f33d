//! Batch prevalidation of incoming blocks.
//!
//! Before a batch of blocks from a peer is applied one by one, the engine
//! computes their proof-of-work hashes on a small worker pool and resolves
//! every ring member the batch references with one storage lookup per
//! amount. Both results are staged in the chain state and consulted by
//! the per-block rules; they never change a verdict.
//!
//! The hash-of-hashes list lets a node that trusts it skip proof-of-work
//! and input checks for the blocks it covers.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use ringchain_types::consensus::{rx_seedheight, HASH_OF_HASHES_STEP};
use ringchain_types::transaction::relative_output_offsets_to_absolute;
use ringchain_types::{
    cn_fast_hash, hash_to_hex, Block, Hash, HfVersion, ParseError, Transaction, TxIn, NULL_HASH,
};

use crate::chain_state::{ChainInner, ScanTable};
use crate::crypto::CryptoOracle;
use crate::error::{ChainError, ChainResult};
use crate::storage::{BlockchainStorage, OutputData};
use crate::tx_pool::TxPool;
use crate::verification::{BlockVerificationContext, TxVerificationContext};

/// Known hashes are dropped once the chain is this far past them.
const BLOCKS_HASH_CHECK_SLACK: u64 = 4096;

// =============================================================================
// BlockCompleteEntry
// =============================================================================

/// A block and its transactions as received from a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockCompleteEntry {
    pub block: Vec<u8>,
    pub txs: Vec<Vec<u8>>,
}

impl BlockCompleteEntry {
    pub fn new(block: &Block, txs: &[Transaction]) -> Self {
        Self {
            block: block.to_bytes(),
            txs: txs.iter().map(Transaction::to_bytes).collect(),
        }
    }

    pub fn parse(&self) -> Result<(Block, Vec<Transaction>), ParseError> {
        let block = Block::from_bytes(&self.block)?;
        let txs = self
            .txs
            .iter()
            .map(|blob| Transaction::from_bytes(blob))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((block, txs))
    }
}

// =============================================================================
// Proof-of-work workers
// =============================================================================

/// Read-only view shared by the proof-of-work workers.
struct PowBatch<'a> {
    db: &'a dyn BlockchainStorage,
    crypto: &'a dyn CryptoOracle,
    cancel: &'a AtomicBool,
    /// Ids of the batch, the first one at `start_height`.
    ids: &'a [Hash],
    start_height: u64,
}

impl PowBatch<'_> {
    /// Seed blocks may themselves be part of the batch.
    fn seed_hash(&self, height: u64) -> Hash {
        let seed_height = rx_seedheight(height);
        if seed_height < self.start_height {
            self.db.block_hash_at(seed_height).unwrap_or(NULL_HASH)
        } else {
            usize::try_from(seed_height - self.start_height)
                .ok()
                .and_then(|i| self.ids.get(i))
                .copied()
                .unwrap_or(NULL_HASH)
        }
    }

    fn pow_hash(&self, offset: usize, block: &Block) -> Hash {
        let height = self.start_height + offset as u64;
        let seed_hash = if block.major_version >= HfVersion::RANDOMX {
            self.seed_hash(height)
        } else {
            NULL_HASH
        };
        self.crypto
            .pow_hash(&block.hashing_blob(), block.major_version, height, &seed_hash)
    }

    /// Hashes for `blocks`, which start `first` entries into the batch.
    /// `None` when cancelled.
    fn run(&self, first: usize, blocks: &[&Block]) -> Option<Vec<(Hash, Hash)>> {
        let mut out = Vec::with_capacity(blocks.len());
        for (i, block) in blocks.iter().enumerate() {
            if self.cancel.load(Ordering::Relaxed) {
                return None;
            }
            let offset = first + i;
            out.push((self.ids[offset], self.pow_hash(offset, block)));
        }
        Some(out)
    }
}

// =============================================================================
// ChainInner
// =============================================================================

impl ChainInner {
    // -------------------------------------------------------------------------
    // Prepare
    // -------------------------------------------------------------------------

    /// Open the storage batch for `blocks` and stage their proof-of-work
    /// hashes and ring members. A batch that does not start at the tip, or
    /// that repeats blocks already known, is left for the per-block rules.
    pub(crate) fn prepare_handle_incoming_blocks(
        &mut self,
        blocks: &[(Block, Vec<Transaction>)],
    ) -> ChainResult<()> {
        self.state.batch_owned = self.db.batch_start();
        self.state.batch_success = true;
        if blocks.is_empty() {
            return Ok(());
        }

        let height = self.db.height();
        if height + blocks.len() as u64 <= self.state.blocks_hash_check.len() as u64 {
            log::debug!("all {} blocks are covered by known hashes, skipping prevalidation", blocks.len());
            return Ok(());
        }

        let top_hash = self.db.top_block_hash();
        if blocks[0].0.prev_id != top_hash {
            log::debug!("Skipping prepare blocks. New blocks don't belong to chain.");
            return Ok(());
        }

        let ids: Vec<Hash> = blocks.iter().map(|(block, _)| block.hash()).collect();
        if ids.iter().any(|id| self.have_block(id)) {
            log::debug!("Skipping remainder of prepare blocks. Blocks exist.");
            return Ok(());
        }

        self.prepare_pow_hashes(blocks, &ids, height)?;
        self.prepare_scan_table(blocks);
        Ok(())
    }

    fn prepare_pow_hashes(
        &mut self,
        blocks: &[(Block, Vec<Transaction>)],
        ids: &[Hash],
        start_height: u64,
    ) -> ChainResult<()> {
        let threads = self
            .config
            .max_prepare_blocks_threads
            .min(num_cpus::get())
            .max(1);
        let batch = PowBatch {
            db: &*self.db,
            crypto: &*self.crypto,
            cancel: &*self.cancel,
            ids,
            start_height,
        };
        let headers: Vec<&Block> = blocks.iter().map(|(block, _)| block).collect();
        let chunk = headers.len().div_ceil(threads);

        let results: Vec<Option<Vec<(Hash, Hash)>>> = if threads > 1 && headers.len() > 1 {
            log::debug!("computing {} PoW hashes on {} threads", headers.len(), threads);
            std::thread::scope(|s| {
                let handles: Vec<_> = headers
                    .chunks(chunk)
                    .enumerate()
                    .map(|(n, part)| {
                        let batch = &batch;
                        s.spawn(move || batch.run(n * chunk, part))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                    .collect()
            })
        } else {
            vec![batch.run(0, &headers)]
        };

        let mut staged = HashMap::with_capacity(headers.len());
        for part in results {
            let Some(part) = part else {
                log::info!("batch prevalidation cancelled");
                return Err(ChainError::Cancelled);
            };
            staged.extend(part);
        }
        self.state.longhash_table.extend(staged);
        Ok(())
    }

    /// Fill the scan table for every input of every transaction in the
    /// batch. The table is left empty when the batch spends a key image
    /// twice or repeats a transaction; the per-block rules report those.
    fn prepare_scan_table(&mut self, blocks: &[(Block, Vec<Transaction>)]) {
        self.state.scan_table.clear();

        let mut prefixes = HashSet::new();
        let mut key_images = HashSet::new();
        let mut wanted: BTreeMap<u64, BTreeSet<u64>> = BTreeMap::new();
        for tx in blocks.iter().flat_map(|(_, txs)| txs) {
            if !prefixes.insert(tx.prefix_hash()) {
                log::error!("Duplicate tx found from incoming blocks.");
                return;
            }
            for input in &tx.vin {
                let TxIn::ToKey { amount, key_offsets, key_image } = input else {
                    continue;
                };
                if !key_images.insert(*key_image) {
                    log::error!("Double spend detected in incoming blocks: {}", hash_to_hex(key_image));
                    return;
                }
                if let Some(absolute) = relative_output_offsets_to_absolute(key_offsets) {
                    wanted.entry(*amount).or_default().extend(absolute);
                }
            }
        }
        if wanted.is_empty() {
            return;
        }

        let outputs = self.lookup_outputs(&wanted);
        let mut table = ScanTable::new();
        for tx in blocks.iter().flat_map(|(_, txs)| txs) {
            let by_key_image = table.entry(tx.prefix_hash()).or_default();
            for input in &tx.vin {
                let TxIn::ToKey { amount, key_offsets, key_image } = input else {
                    continue;
                };
                let Some(absolute) = relative_output_offsets_to_absolute(key_offsets) else {
                    continue;
                };
                let Some(bucket) = outputs.get(amount) else {
                    continue;
                };
                let ring: Option<Vec<OutputData>> =
                    absolute.iter().map(|i| bucket.get(i).copied()).collect();
                if let Some(ring) = ring {
                    by_key_image.insert(*key_image, ring);
                }
            }
        }
        log::debug!("scan table holds {} transactions", table.len());
        self.state.scan_table = table;
    }

    /// Outputs for every requested (amount, index), one storage call per
    /// amount. Indices past the end of a bucket are left out; those inputs
    /// are resolved again, and rejected, during validation.
    fn lookup_outputs(&self, wanted: &BTreeMap<u64, BTreeSet<u64>>) -> HashMap<u64, HashMap<u64, OutputData>> {
        let db: &dyn BlockchainStorage = &*self.db;
        let fetch = |amount: u64, indices: &BTreeSet<u64>| -> HashMap<u64, OutputData> {
            let available = db.num_outputs(amount);
            let indices: Vec<u64> = indices.iter().copied().filter(|&i| i < available).collect();
            db.get_output_keys(amount, &indices)
                .map(|outs| indices.into_iter().zip(outs).collect())
                .unwrap_or_default()
        };

        let threads = self.config.verify_threads();
        if threads > 1 && wanted.len() > 1 {
            let amounts: Vec<(&u64, &BTreeSet<u64>)> = wanted.iter().collect();
            let chunk = amounts.len().div_ceil(threads);
            std::thread::scope(|s| {
                let handles: Vec<_> = amounts
                    .chunks(chunk)
                    .map(|part| {
                        let fetch = &fetch;
                        s.spawn(move || {
                            part.iter()
                                .map(|&(&amount, indices)| (amount, fetch(amount, indices)))
                                .collect::<Vec<_>>()
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .flat_map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                    .collect()
            })
        } else {
            wanted
                .iter()
                .map(|(&amount, indices)| (amount, fetch(amount, indices)))
                .collect()
        }
    }

    // -------------------------------------------------------------------------
    // Apply
    // -------------------------------------------------------------------------

    /// Hand the transactions of an incoming block to the pool as kept by
    /// block, then add the block.
    pub(crate) fn handle_incoming_block(
        &mut self,
        pool: &mut dyn TxPool,
        block: &Block,
        txs: Vec<Transaction>,
        bvc: &mut BlockVerificationContext,
    ) -> ChainResult<bool> {
        self.state.blocks_txs_check.clear();
        let known = self.db.height() < self.state.blocks_hash_check.len() as u64;
        let hf_version = self.current_version();
        for tx in txs {
            let hash = tx.hash();
            if known {
                self.state.blocks_txs_check.push(hash);
            }
            if pool.have_tx(&hash) || self.db.tx_exists(&hash) {
                continue;
            }
            let mut tvc = TxVerificationContext::default();
            if !self.check_tx_semantics(&tx, &hash, &mut tvc) {
                log::error!(
                    "Block {} carries invalid transaction {}",
                    hash_to_hex(&block.hash()),
                    hash_to_hex(&hash)
                );
                bvc.fail().invalid_tx = true;
                // Only a transaction the block lists condemns it.
                if block.tx_hashes.contains(&hash) {
                    self.add_block_as_invalid(block, &block.hash());
                }
                return Ok(false);
            }
            let weight = tx.weight();
            if !pool.add_tx(tx, hash, weight, &mut tvc, true, hf_version) {
                log::error!("Transaction verification failed: {}", hash_to_hex(&hash));
                bvc.fail();
                return Ok(false);
            }
        }
        self.add_new_block(pool, block, bvc)
    }

    // -------------------------------------------------------------------------
    // Cleanup
    // -------------------------------------------------------------------------

    /// Close the batch opened by [`Self::prepare_handle_incoming_blocks`]:
    /// commit it when every block went through, abort it otherwise, and
    /// drop the staging tables.
    pub(crate) fn cleanup_handle_incoming_blocks(&mut self, force_sync: bool) -> ChainResult<()> {
        let mut result = Ok(());
        if self.state.batch_owned {
            self.state.batch_owned = false;
            if self.state.batch_success {
                result = self.db.batch_stop().map_err(ChainError::from);
                if force_sync && result.is_ok() {
                    result = self.db.sync().map_err(ChainError::from);
                }
            } else {
                log::warn!("aborting incoming blocks batch");
                self.db.batch_abort();
                result = self.resync_after_abort();
            }
        }
        if self.state.reset_difficulty_window && self.state.batch_success {
            self.state.difficulty_window_height = 0;
            self.state.reset_difficulty_window = false;
        }
        self.state.batch_success = true;
        self.state.clear_batch_tables();

        let known = self.state.blocks_hash_check.len() as u64;
        if known > 0 && self.db.height() > known + BLOCKS_HASH_CHECK_SLACK {
            log::debug!("dropping {} known block hashes", known);
            self.state.blocks_hash_check = Vec::new();
        }
        result
    }

    // -------------------------------------------------------------------------
    // Hash-of-hashes
    // -------------------------------------------------------------------------

    /// Load the hash-of-hashes list: a little-endian `u32` group count
    /// followed by one (hash of block hashes, hash of block weights) pair
    /// per group of [`HASH_OF_HASHES_STEP`] blocks. Returns how many groups
    /// were loaded; nothing is loaded when fast sync is off or the chain is
    /// already past the list.
    pub(crate) fn load_block_hashes(&mut self, blob: &[u8]) -> ChainResult<usize> {
        if !self.config.fast_sync {
            return Ok(0);
        }
        let Some((count, body)) = blob.split_first_chunk::<4>() else {
            return Err(ChainError::InvalidArgument("block hashes blob too short".into()));
        };
        let count = u32::from_le_bytes(*count) as usize;
        if body.len() != count * 64 {
            return Err(ChainError::InvalidArgument(format!(
                "block hashes blob holds {} bytes, expected {}",
                body.len(),
                count * 64
            )));
        }
        let groups_in_chain = self.db.height().div_ceil(HASH_OF_HASHES_STEP as u64);
        if count == 0 || count as u64 <= groups_in_chain {
            return Ok(0);
        }

        self.state.blocks_hash_of_hashes = body
            .chunks_exact(64)
            .map(|pair| {
                let mut hashes = NULL_HASH;
                let mut weights = NULL_HASH;
                hashes.copy_from_slice(&pair[..32]);
                weights.copy_from_slice(&pair[32..]);
                (hashes, weights)
            })
            .collect();
        self.state
            .blocks_hash_check
            .resize(count * HASH_OF_HASHES_STEP, (NULL_HASH, 0));
        log::info!("{} block hashes loaded", count);
        Ok(count)
    }

    /// Check block hashes (and weights, when given) received for the
    /// blocks starting at `height` against the hash-of-hashes list.
    /// Matching groups are recorded as known. Returns how many of `hashes`
    /// may be requested from the peer.
    pub(crate) fn prevalidate_block_hashes(&mut self, height: u64, hashes: &[Hash], weights: &[u64]) -> u64 {
        const STEP: usize = HASH_OF_HASHES_STEP;
        if !weights.is_empty() && weights.len() != hashes.len() {
            log::error!("Unexpected weights size");
            return 0;
        }
        if hashes.is_empty() {
            return 0;
        }
        let Ok(start) = usize::try_from(height) else {
            return hashes.len() as u64;
        };
        if start >= self.state.blocks_hash_of_hashes.len() * STEP || self.state.blocks_hash_check.is_empty() {
            return hashes.len() as u64;
        }

        let mut first_index = start / STEP;
        let last_index = (start + hashes.len() - 1) / STEP;
        log::debug!(
            "Blocks {} - {} start at {} and end at {}",
            start,
            start + hashes.len() - 1,
            first_index,
            last_index
        );
        if first_index == last_index && hashes.len() < STEP && (start + hashes.len()) % STEP != 0 {
            return hashes.len() as u64;
        }

        let mut data_hashes: Vec<Hash> = Vec::with_capacity(hashes.len() + STEP);
        let mut data_weights: Vec<u64> = Vec::new();
        let disconnected = height > self.db.height();
        let skip = if disconnected && start % STEP != 0 {
            first_index += 1;
            STEP - start % STEP
        } else {
            for h in (first_index * STEP) as u64..height {
                data_hashes.push(self.db.block_hash_at(h).unwrap_or(NULL_HASH));
                if !weights.is_empty() {
                    data_weights.push(self.db.block_info_at(h).map_or(0, |info| info.weight));
                }
            }
            0
        };
        data_hashes.extend(hashes.iter().skip(skip));
        if !weights.is_empty() {
            data_weights.extend(weights.iter().skip(skip));
        }

        let mut usable = (first_index * STEP) as i64 - start as i64;
        for n in first_index..=last_index {
            if n >= self.state.blocks_hash_of_hashes.len() {
                usable = (usable + STEP as i64).min(hashes.len() as i64);
                continue;
            }
            let offset = (n - first_index) * STEP;
            if data_hashes.len() < offset + STEP {
                break;
            }
            let group = &data_hashes[offset..offset + STEP];
            let (expected_hashes, expected_weights) = self.state.blocks_hash_of_hashes[n];
            let mut valid = cn_fast_hash(&group.concat()) == expected_hashes;
            if valid && !weights.is_empty() {
                let bytes: Vec<u8> = data_weights[offset..offset + STEP]
                    .iter()
                    .flat_map(|w| w.to_le_bytes())
                    .collect();
                valid = cn_fast_hash(&bytes) == expected_weights;
            }
            if !valid {
                log::debug!("invalid hash for blocks {} - {}", n * STEP, n * STEP + STEP - 1);
                break;
            }

            for (i, hash) in group.iter().enumerate() {
                let slot = &mut self.state.blocks_hash_check[n * STEP + i];
                if slot.0 != NULL_HASH && slot.0 != *hash {
                    log::error!("Consistency failure in known block hashes at height {}", n * STEP + i);
                    return 0;
                }
                slot.0 = *hash;
                if !weights.is_empty() {
                    slot.1 = data_weights[offset + i];
                }
            }
            usable += STEP as i64;
        }
        log::debug!("usable: {} / {}", usable, hashes.len());
        u64::try_from(usable).unwrap_or(0)
    }
}

// =============================================================================
// Tests
// =============================================================================
