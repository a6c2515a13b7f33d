//! Pending-transaction pool contract and an in-memory implementation.
//!
//! The pool only performs checks that need nothing but the transaction
//! itself and the pool contents. Checks against the chain (fees, inputs,
//! spent key images) are done by [`crate::Blockchain::add_tx_to_pool`]
//! before a transaction reaches the pool.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use ringchain_types::consensus::{block_reward, min_block_weight, COINBASE_BLOB_RESERVED_SIZE};
use ringchain_types::{hash_to_hex, Hash, HfVersion, KeyImage, Transaction, TxIn};

use crate::config::{system_time, TimeSource};
use crate::verification::TxVerificationContext;

/// Largest extra field accepted from the network.
pub const MAX_TX_EXTRA_SIZE: usize = 1060;

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolTxEntry {
    pub tx: Transaction,
    pub hash: Hash,
    pub weight: u64,
    pub fee: u64,
    /// Came back from a popped or disconnected block.
    pub kept_by_block: bool,
    pub receive_time: u64,
}

/// Transactions chosen for a block template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateFill {
    pub tx_hashes: Vec<Hash>,
    pub total_weight: u64,
    pub fee: u64,
    /// Coinbase (base reward plus fees) the selection yields.
    pub expected_reward: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxBacklogEntry {
    pub weight: u64,
    pub fee: u64,
    pub time_in_pool: u64,
}

// =============================================================================
// Contract
// =============================================================================

pub trait TxPool: Send {
    /// Insert a transaction the chain has already checked. Returns false and
    /// sets flags on `tvc` when the pool refuses it.
    fn add_tx(
        &mut self,
        tx: Transaction,
        hash: Hash,
        weight: u64,
        tvc: &mut TxVerificationContext,
        kept_by_block: bool,
        hf_version: u8,
    ) -> bool;

    /// Remove and return a transaction for inclusion in a block.
    fn take_tx(&mut self, hash: &Hash) -> Option<PoolTxEntry>;

    fn have_tx(&self, hash: &Hash) -> bool;

    /// Weight of a pooled transaction, without removing it.
    fn tx_weight(&self, hash: &Hash) -> Option<u64>;

    fn have_key_image(&self, key_image: &KeyImage) -> bool;

    /// Drop a transaction without returning it.
    fn remove_tx(&mut self, hash: &Hash) -> bool;

    fn on_blockchain_inc(&mut self, new_height: u64, top_id: &Hash);

    fn on_blockchain_dec(&mut self, new_height: u64, top_id: &Hash);

    /// Choose transactions for a block template. `is_ready` is asked
    /// whether a candidate may go into a block right now.
    fn fill_block_template(
        &mut self,
        median_weight: u64,
        already_generated_coins: u64,
        hf_version: u8,
        is_ready: &mut dyn FnMut(&Hash, &Transaction) -> bool,
    ) -> Option<TemplateFill>;

    /// Drop transactions no longer acceptable under `hf_version`. Returns
    /// how many were removed.
    fn validate(&mut self, hf_version: u8) -> usize;

    /// Generation counter, bumped on every change of the pool contents.
    fn cookie(&self) -> u64;

    fn transaction_backlog(&self) -> Vec<TxBacklogEntry>;

    fn tx_count(&self) -> usize;
}

/// Heaviest transaction accepted for a version.
pub fn transaction_weight_limit(hf_version: u8) -> u64 {
    if hf_version >= HfVersion::PER_BYTE_FEE {
        min_block_weight(hf_version) / 2 - COINBASE_BLOB_RESERVED_SIZE
    } else {
        min_block_weight(hf_version) - COINBASE_BLOB_RESERVED_SIZE
    }
}

/// Highest transaction version a hard-fork version accepts.
pub fn max_tx_version(hf_version: u8) -> u8 {
    if hf_version < HfVersion::DYNAMIC_FEE {
        1
    } else {
        2
    }
}

// =============================================================================
// MemoryPool
// =============================================================================

pub struct MemoryPool {
    txs: HashMap<Hash, PoolTxEntry>,
    /// Insertion order, the tie-break between equal fee rates.
    order: HashMap<Hash, u64>,
    next_seq: u64,
    spent_key_images: HashMap<KeyImage, HashSet<Hash>>,
    cookie: u64,
    now: TimeSource,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::with_time_source(system_time)
    }

    pub fn with_time_source(now: TimeSource) -> Self {
        Self {
            txs: HashMap::new(),
            order: HashMap::new(),
            next_seq: 0,
            spent_key_images: HashMap::new(),
            cookie: 0,
            now,
        }
    }

    pub fn get(&self, hash: &Hash) -> Option<&PoolTxEntry> {
        self.txs.get(hash)
    }

    fn remove_entry(&mut self, hash: &Hash) -> Option<PoolTxEntry> {
        let entry = self.txs.remove(hash)?;
        self.order.remove(hash);
        for key_image in entry.tx.key_images() {
            if let Some(set) = self.spent_key_images.get_mut(key_image) {
                set.remove(hash);
                if set.is_empty() {
                    self.spent_key_images.remove(key_image);
                }
            }
        }
        self.cookie += 1;
        Some(entry)
    }

    /// Hashes ordered by fee per weight, highest first, then by arrival.
    fn sorted_hashes(&self) -> Vec<Hash> {
        let mut hashes: Vec<&PoolTxEntry> = self.txs.values().collect();
        hashes.sort_by(|a, b| {
            // a.fee / a.weight vs b.fee / b.weight without division
            let lhs = a.fee as u128 * b.weight.max(1) as u128;
            let rhs = b.fee as u128 * a.weight.max(1) as u128;
            match rhs.cmp(&lhs) {
                Ordering::Equal => self.order[&a.hash].cmp(&self.order[&b.hash]),
                o => o,
            }
        });
        hashes.into_iter().map(|e| e.hash).collect()
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TxPool for MemoryPool {
    fn add_tx(
        &mut self,
        tx: Transaction,
        hash: Hash,
        weight: u64,
        tvc: &mut TxVerificationContext,
        kept_by_block: bool,
        hf_version: u8,
    ) -> bool {
        if self.txs.contains_key(&hash) {
            return true;
        }
        if tx.version == 0 {
            log::debug!("transaction version 0 is invalid");
            tvc.fail();
            return false;
        }
        if tx.vin.iter().any(|i| !matches!(i, TxIn::ToKey { .. })) {
            tvc.fail().invalid_input = true;
            return false;
        }

        let fee = if tx.version == 1 {
            let (Some(inputs), Some(outputs)) = (tx.inputs_amount(), tx.outputs_amount()) else {
                tvc.fail();
                return false;
            };
            match outputs.cmp(&inputs) {
                Ordering::Greater => {
                    log::debug!("transaction spends more than it has: {} > {}", outputs, inputs);
                    tvc.fail().overspend = true;
                    return false;
                }
                Ordering::Equal => {
                    log::debug!("transaction fee is zero");
                    tvc.fail().fee_too_low = true;
                    return false;
                }
                Ordering::Less => inputs - outputs,
            }
        } else {
            tx.rct_signatures.as_ref().map_or(0, |r| r.txn_fee)
        };

        let limit = transaction_weight_limit(hf_version);
        if (!kept_by_block || hf_version >= HfVersion::PER_BYTE_FEE) && weight > limit {
            log::debug!("transaction is too heavy: {} > {}", weight, limit);
            tvc.fail().too_big = true;
            return false;
        }
        if !kept_by_block && tx.extra.len() > MAX_TX_EXTRA_SIZE {
            tvc.fail().tx_extra_too_big = true;
            return false;
        }
        if !kept_by_block && tx.unlock_time != 0 {
            tvc.fail().nonzero_unlock_time = true;
            return false;
        }
        if !kept_by_block && tx.key_images().any(|ki| self.spent_key_images.contains_key(ki)) {
            log::debug!("transaction {} double-spends a pool key image", hash_to_hex(&hash));
            tvc.fail().double_spend = true;
            return false;
        }

        for key_image in tx.key_images() {
            self.spent_key_images.entry(*key_image).or_default().insert(hash);
        }
        self.order.insert(hash, self.next_seq);
        self.next_seq += 1;
        self.txs.insert(
            hash,
            PoolTxEntry {
                tx,
                hash,
                weight,
                fee,
                kept_by_block,
                receive_time: (self.now)(),
            },
        );
        self.cookie += 1;
        tvc.added_to_pool = true;
        true
    }

    fn take_tx(&mut self, hash: &Hash) -> Option<PoolTxEntry> {
        self.remove_entry(hash)
    }

    fn have_tx(&self, hash: &Hash) -> bool {
        self.txs.contains_key(hash)
    }

    fn tx_weight(&self, hash: &Hash) -> Option<u64> {
        self.txs.get(hash).map(|e| e.weight)
    }

    fn have_key_image(&self, key_image: &KeyImage) -> bool {
        self.spent_key_images.contains_key(key_image)
    }

    fn remove_tx(&mut self, hash: &Hash) -> bool {
        self.remove_entry(hash).is_some()
    }

    fn on_blockchain_inc(&mut self, new_height: u64, top_id: &Hash) {
        log::trace!("pool: chain grew to {} ({})", new_height, hash_to_hex(top_id));
    }

    fn on_blockchain_dec(&mut self, new_height: u64, top_id: &Hash) {
        log::trace!("pool: chain shrank to {} ({})", new_height, hash_to_hex(top_id));
    }

    fn fill_block_template(
        &mut self,
        median_weight: u64,
        already_generated_coins: u64,
        hf_version: u8,
        is_ready: &mut dyn FnMut(&Hash, &Transaction) -> bool,
    ) -> Option<TemplateFill> {
        let mut fill = TemplateFill::default();
        let Some(mut best_coinbase) =
            block_reward(median_weight, 0, already_generated_coins, hf_version)
        else {
            log::error!("failed to get block reward for empty block");
            return None;
        };

        let max_total_weight = if hf_version >= 5 {
            (2 * median_weight).saturating_sub(COINBASE_BLOB_RESERVED_SIZE)
        } else {
            (130 * median_weight / 100).saturating_sub(COINBASE_BLOB_RESERVED_SIZE)
        };
        let mut key_images: HashSet<KeyImage> = HashSet::new();

        for hash in self.sorted_hashes() {
            let entry = &self.txs[&hash];
            if entry.tx.pruned {
                continue;
            }
            if max_total_weight < fill.total_weight + entry.weight {
                continue;
            }

            let mut coinbase = best_coinbase;
            if hf_version >= 5 {
                let Some(reward) = block_reward(
                    median_weight,
                    fill.total_weight + entry.weight,
                    already_generated_coins,
                    hf_version,
                ) else {
                    continue;
                };
                coinbase = reward + fill.fee + entry.fee;
                if coinbase < best_coinbase {
                    continue;
                }
            } else if fill.total_weight > median_weight {
                break;
            }

            if !is_ready(&hash, &entry.tx) {
                continue;
            }
            if entry.tx.key_images().any(|ki| key_images.contains(ki)) {
                continue;
            }

            key_images.extend(entry.tx.key_images().copied());
            fill.tx_hashes.push(hash);
            fill.total_weight += entry.weight;
            fill.fee += entry.fee;
            best_coinbase = coinbase;
        }

        fill.expected_reward = best_coinbase;
        log::debug!(
            "block template filled with {} txes, weight {}/{}, coinbase {}",
            fill.tx_hashes.len(),
            fill.total_weight,
            max_total_weight,
            best_coinbase
        );
        Some(fill)
    }

    fn validate(&mut self, hf_version: u8) -> usize {
        log::info!("validating txpool contents for v{}", hf_version);
        let limit = transaction_weight_limit(hf_version);
        let max_version = max_tx_version(hf_version);
        let stale: Vec<Hash> = self
            .txs
            .values()
            .filter(|e| !e.tx.pruned)
            .filter(|e| e.tx.version > max_version || (hf_version >= HfVersion::PER_BYTE_FEE && e.weight > limit))
            .map(|e| e.hash)
            .collect();
        for hash in &stale {
            log::info!("failed to re-validate tx {} for v{}, dropped", hash_to_hex(hash), hf_version);
            self.remove_entry(hash);
        }
        stale.len()
    }

    fn cookie(&self) -> u64 {
        self.cookie
    }

    fn transaction_backlog(&self) -> Vec<TxBacklogEntry> {
        let now = (self.now)();
        self.txs
            .values()
            .map(|e| TxBacklogEntry {
                weight: e.weight,
                fee: e.fee,
                time_in_pool: now.saturating_sub(e.receive_time),
            })
            .collect()
    }

    fn tx_count(&self) -> usize {
        self.txs.len()
    }
}
