//! Block templates for miners.
//!
//! A template is the next block on top of the main chain tip (or of a
//! chosen alternative block) with its transaction list filled from the
//! pool and a miner transaction paying the full reward to the miner's
//! address. The miner transaction's weight feeds back into the reward, so
//! it is rebuilt until the weight it was sized for matches its real weight.

use ringchain_types::consensus::{
    block_reward, decompose_amount_into_digits, median, rx_seedheights, BASE_REWARD_CLAMP_THRESHOLD,
    DEFAULT_DUST_THRESHOLD, MINED_MONEY_UNLOCK_WINDOW, TIMESTAMP_CHECK_WINDOW,
};
use ringchain_types::transaction::{add_extra_nonce_to_tx_extra, add_tx_pub_key_to_extra};
use ringchain_types::{
    hash_to_hex, AccountAddress, Block, Hash, HfVersion, RctSignatures, Transaction, TxIn, TxOut,
    TxOutTarget, NULL_HASH,
};

use crate::chain_state::{ChainInner, TemplateCacheEntry};
use crate::crypto::CryptoOracle;
use crate::error::{ChainError, ChainResult};
use crate::tx_pool::{TxBacklogEntry, TxPool};
use crate::verification::TxVerificationContext;

/// Attempts at matching the miner transaction to the weight it was built
/// for.
const MINER_TX_SIZING_ATTEMPTS: usize = 10;

/// Outputs a miner transaction may have before the dynamic fee fork.
const PRE_V4_MINER_TX_MAX_OUTS: usize = 11;

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTemplate {
    pub block: Block,
    pub difficulty: u128,
    pub height: u64,
    /// Base reward plus the fees of the selected transactions.
    pub expected_reward: u64,
    /// Weight of the block including its miner transaction.
    pub cumulative_weight: u64,
    pub seed_height: u64,
    pub seed_hash: Hash,
    pub next_seed_hash: Hash,
    /// Pool generation the template was filled from.
    pub cookie: u64,
}

/// What an external miner needs to build its own template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerData {
    pub major_version: u8,
    pub height: u64,
    pub prev_id: Hash,
    pub seed_hash: Hash,
    pub difficulty: u128,
    pub median_weight: u64,
    pub already_generated_coins: u64,
    pub tx_backlog: Vec<TxBacklogEntry>,
}

// =============================================================================
// Miner transaction
// =============================================================================

/// Build the miner transaction of a block at `height` paying the base
/// reward for a block of `current_block_weight` plus `fee` to `address`.
///
/// The reward is split into decomposed amounts; from v4 (and always for
/// the genesis block) the smallest parts are merged until at most
/// `max_outs` remain, before that exceeding `max_outs` is an error.
#[allow(clippy::too_many_arguments)]
pub fn construct_miner_tx(
    crypto: &dyn CryptoOracle,
    height: u64,
    median_weight: u64,
    already_generated_coins: u64,
    current_block_weight: u64,
    fee: u64,
    address: &AccountAddress,
    extra_nonce: &[u8],
    max_outs: usize,
    hf_version: u8,
) -> ChainResult<Transaction> {
    if max_outs == 0 {
        return Err(ChainError::Template("miner transaction needs at least one output".into()));
    }

    let (tx_public_key, tx_secret_key) = crypto.generate_tx_keypair();
    let mut extra = Vec::new();
    add_tx_pub_key_to_extra(&mut extra, &tx_public_key);
    if !extra_nonce.is_empty() && !add_extra_nonce_to_tx_extra(&mut extra, extra_nonce) {
        return Err(ChainError::Template(format!(
            "extra nonce of {} bytes does not fit",
            extra_nonce.len()
        )));
    }

    let base_reward = block_reward(median_weight, current_block_weight, already_generated_coins, hf_version)
        .ok_or_else(|| {
            ChainError::Template(format!(
                "block is too big: {} bytes against a median of {}",
                current_block_weight, median_weight
            ))
        })?;
    log::debug!("creating block template: reward {}, fee {}", base_reward, fee);
    let mut reward = base_reward.saturating_add(fee);

    // Versions 2 and 3 drop the sub-clamp digits of the reward.
    if (2..HfVersion::DYNAMIC_FEE).contains(&hf_version) {
        reward -= reward % BASE_REWARD_CLAMP_THRESHOLD;
    }

    let dust_threshold = if hf_version >= 2 { 0 } else { DEFAULT_DUST_THRESHOLD };
    let mut amounts = decompose_amount_into_digits(reward, dust_threshold);
    if height == 0 || hf_version >= HfVersion::DYNAMIC_FEE {
        while amounts.len() > max_outs {
            let lowest = amounts.remove(0);
            amounts[0] += lowest;
        }
    } else if amounts.len() > max_outs {
        return Err(ChainError::Template(format!(
            "reward splits into {} outputs, at most {} allowed",
            amounts.len(),
            max_outs
        )));
    }

    let tagged = hf_version >= HfVersion::VIEW_TAGS;
    let vout = amounts
        .iter()
        .enumerate()
        .map(|(index, &amount)| {
            let (key, view_tag) = crypto
                .derive_output_key(address, &tx_secret_key, index)
                .ok_or_else(|| ChainError::Template(format!("cannot derive key for output {}", index)))?;
            let target = if tagged {
                TxOutTarget::ToTaggedKey { key, view_tag }
            } else {
                TxOutTarget::ToKey { key }
            };
            Ok(TxOut { amount, target })
        })
        .collect::<ChainResult<Vec<_>>>()?;

    let version = if hf_version >= HfVersion::DYNAMIC_FEE { 2 } else { 1 };
    Ok(Transaction {
        version,
        unlock_time: height + MINED_MONEY_UNLOCK_WINDOW,
        vin: vec![TxIn::Gen { height }],
        vout,
        extra,
        signatures: Vec::new(),
        rct_signatures: (version >= 2).then(RctSignatures::null),
        pruned: false,
    })
}

// =============================================================================
// Templates
// =============================================================================

/// Chain position a template is built on.
struct TemplateBase {
    height: u64,
    major_version: u8,
    prev_id: Hash,
    median_weight: u64,
    already_generated_coins: u64,
    difficulty: u128,
    recent_timestamps: Vec<u64>,
    seed_hash: Hash,
    next_seed_hash: Hash,
}

impl ChainInner {
    /// Whether a pooled transaction can go into the next block.
    fn is_tx_ready_for_block(&self, hash: &Hash, tx: &Transaction) -> bool {
        if self.db.tx_exists(hash) {
            return false;
        }
        let mut tvc = TxVerificationContext::default();
        self.check_tx_inputs(tx, &mut tvc).is_some()
    }

    fn cached_template(&self, address: &AccountAddress, extra_nonce: &[u8], cookie: u64) -> Option<BlockTemplate> {
        let cached = self.state.template_cache.as_ref()?;
        if cached.address != *address
            || cached.extra_nonce != extra_nonce
            || cached.pool_cookie != cookie
            || cached.block.prev_id != self.db.top_block_hash()
        {
            return None;
        }
        log::debug!("using cached template");
        let mut block = cached.block.clone();
        block.timestamp = block.timestamp.max((self.now)());
        let (_, next_seed_height) = rx_seedheights(cached.height);
        Some(BlockTemplate {
            block,
            difficulty: cached.difficulty,
            height: cached.height,
            expected_reward: cached.expected_reward,
            cumulative_weight: cached.cumulative_weight,
            seed_height: cached.seed_height,
            seed_hash: cached.seed_hash,
            next_seed_hash: self.db.block_hash_at(next_seed_height).unwrap_or(NULL_HASH),
            cookie,
        })
    }

    fn main_chain_template_base(&mut self) -> ChainResult<TemplateBase> {
        let height = self.db.height();
        let major_version = self.current_version();
        let (seed_height, next_seed_height) = rx_seedheights(height);
        let seed_hash = if major_version >= HfVersion::RANDOMX {
            self.db.block_hash_at(seed_height).unwrap_or(NULL_HASH)
        } else {
            NULL_HASH
        };
        Ok(TemplateBase {
            height,
            major_version,
            prev_id: self.db.top_block_hash(),
            median_weight: self.state.cumulative_weight_limit / 2,
            already_generated_coins: self.top_generated_coins(),
            difficulty: self.difficulty_for_next_block()?,
            recent_timestamps: self.last_block_timestamps(TIMESTAMP_CHECK_WINDOW),
            seed_hash,
            next_seed_hash: self.db.block_hash_at(next_seed_height).unwrap_or(NULL_HASH),
        })
    }

    fn alt_chain_template_base(&self, parent: &Hash) -> ChainResult<TemplateBase> {
        let parent_height = self.db.block_height(parent);
        if parent_height.is_none() && self.db.get_alt_block(parent).is_none() {
            return Err(ChainError::InvalidArgument(format!(
                "unknown parent block {}",
                hash_to_hex(parent)
            )));
        }
        let (alt_chain, recent_timestamps) = self.build_alt_chain(parent).ok_or_else(|| {
            ChainError::Template(format!("cannot build alternative chain to {}", hash_to_hex(parent)))
        })?;

        let (height, median_weight, already_generated_coins) = match (alt_chain.last(), parent_height) {
            (Some(tip), _) => (
                tip.height + 1,
                tip.block_weight - tip.block_weight / 20,
                tip.already_generated_coins,
            ),
            (None, Some(h)) => {
                let info = self.info_at(h)?;
                (h + 1, info.weight - info.weight / 20, info.generated_coins)
            }
            (None, None) => {
                return Err(ChainError::Template(format!(
                    "parent block {} is in neither chain",
                    hash_to_hex(parent)
                )))
            }
        };

        let major_version = self.hardfork.ideal_version(height);
        let (seed_height, next_seed_height) = rx_seedheights(height);
        let (seed_hash, next_seed_hash) = if major_version >= HfVersion::RANDOMX {
            (
                self.alt_seed_hash(&alt_chain, seed_height),
                self.alt_seed_hash(&alt_chain, next_seed_height),
            )
        } else {
            (NULL_HASH, NULL_HASH)
        };

        Ok(TemplateBase {
            height,
            major_version,
            prev_id: *parent,
            median_weight,
            already_generated_coins,
            difficulty: self.alt_chain_next_difficulty(&alt_chain, height)?,
            recent_timestamps,
            seed_hash,
            next_seed_hash,
        })
    }

    /// Build a template paying to `address`, on top of the main chain tip or
    /// of `alt_parent`. Main chain templates are cached until the tip, the
    /// pool, the address or the nonce change.
    pub(crate) fn create_block_template(
        &mut self,
        pool: &mut dyn TxPool,
        address: &AccountAddress,
        alt_parent: Option<&Hash>,
        extra_nonce: &[u8],
    ) -> ChainResult<BlockTemplate> {
        if alt_parent.is_none() {
            if let Some(template) = self.cached_template(address, extra_nonce, pool.cookie()) {
                return Ok(template);
            }
            self.state.invalidate_template_cache();
        }

        let base = match alt_parent {
            Some(parent) => self.alt_chain_template_base(parent)?,
            None => self.main_chain_template_base()?,
        };
        if base.difficulty == 0 {
            return Err(ChainError::ZeroDifficulty(base.height));
        }

        let mut block = Block {
            major_version: base.major_version,
            minor_version: self.hardfork.ideal_version(u64::MAX),
            timestamp: (self.now)(),
            prev_id: base.prev_id,
            nonce: 0,
            miner_tx: Transaction::default(),
            tx_hashes: Vec::new(),
        };
        if base.recent_timestamps.len() >= TIMESTAMP_CHECK_WINDOW {
            block.timestamp = block.timestamp.max(median(&base.recent_timestamps));
        }

        let fill = {
            let inner: &ChainInner = self;
            pool.fill_block_template(
                base.median_weight,
                base.already_generated_coins,
                base.major_version,
                &mut |hash, tx| inner.is_tx_ready_for_block(hash, tx),
            )
        }
        .ok_or_else(|| ChainError::Template("failed to fill block template from the pool".into()))?;
        block.tx_hashes = fill.tx_hashes;
        let txs_weight = fill.total_weight;

        let max_outs = if base.major_version >= HfVersion::DYNAMIC_FEE {
            1
        } else {
            PRE_V4_MINER_TX_MAX_OUTS
        };
        let build = |block_weight: u64| {
            construct_miner_tx(
                self.crypto.as_ref(),
                base.height,
                base.median_weight,
                base.already_generated_coins,
                block_weight,
                fill.fee,
                address,
                extra_nonce,
                max_outs,
                base.major_version,
            )
        };

        let mut miner_tx = build(txs_weight)?;
        let mut cumulative_weight = txs_weight + miner_tx.weight();
        let mut sized = false;
        for attempt in 0..MINER_TX_SIZING_ATTEMPTS {
            miner_tx = build(cumulative_weight)?;
            let coinbase_weight = miner_tx.weight();
            let budget = cumulative_weight - txs_weight;
            if coinbase_weight > budget {
                cumulative_weight = txs_weight + coinbase_weight;
                log::debug!(
                    "miner tx too heavy on attempt {}, retrying with cumulative weight {}",
                    attempt,
                    cumulative_weight
                );
                continue;
            }

            if coinbase_weight < budget {
                let delta = budget - coinbase_weight;
                miner_tx.extra.resize(miner_tx.extra.len() + delta as usize, 0);
                // The extra length prefix can grow by a byte.
                if txs_weight + miner_tx.weight() == cumulative_weight + 1 {
                    miner_tx.extra.pop();
                    if txs_weight + miner_tx.weight() != cumulative_weight {
                        log::debug!(
                            "miner tx padding by {} and {} both miss, growing the block by {}",
                            delta,
                            delta - 1,
                            delta - 1
                        );
                        cumulative_weight += delta - 1;
                        continue;
                    }
                }
            }

            if txs_weight + miner_tx.weight() != cumulative_weight {
                return Err(ChainError::Template(format!(
                    "miner tx weight {} does not match the block budget {}",
                    miner_tx.weight(),
                    cumulative_weight - txs_weight
                )));
            }
            sized = true;
            break;
        }
        if !sized {
            return Err(ChainError::Template(format!(
                "miner tx could not be sized in {} attempts",
                MINER_TX_SIZING_ATTEMPTS
            )));
        }
        block.miner_tx = miner_tx;

        let (seed_height, _) = rx_seedheights(base.height);
        let cookie = pool.cookie();
        log::debug!(
            "created block template at height {}: {} txes, weight {}, expected reward {}",
            base.height,
            block.tx_hashes.len(),
            cumulative_weight,
            fill.expected_reward
        );

        if alt_parent.is_none() {
            self.state.template_cache = Some(TemplateCacheEntry {
                block: block.clone(),
                address: *address,
                extra_nonce: extra_nonce.to_vec(),
                difficulty: base.difficulty,
                height: base.height,
                expected_reward: fill.expected_reward,
                cumulative_weight,
                seed_height,
                seed_hash: base.seed_hash,
                pool_cookie: cookie,
            });
        }

        Ok(BlockTemplate {
            block,
            difficulty: base.difficulty,
            height: base.height,
            expected_reward: fill.expected_reward,
            cumulative_weight,
            seed_height,
            seed_hash: base.seed_hash,
            next_seed_hash: base.next_seed_hash,
            cookie,
        })
    }

    pub(crate) fn get_miner_data(&mut self, pool: &dyn TxPool) -> ChainResult<MinerData> {
        let height = self.db.height();
        let (seed_height, _) = rx_seedheights(height);
        let seed_hash = if self.current_version() >= HfVersion::RANDOMX {
            self.db.block_hash_at(seed_height).unwrap_or(NULL_HASH)
        } else {
            NULL_HASH
        };
        Ok(MinerData {
            major_version: self.hardfork.ideal_version(height),
            height,
            prev_id: self.db.top_block_hash(),
            seed_hash,
            difficulty: self.difficulty_for_next_block()?,
            median_weight: self.state.cumulative_weight_median,
            already_generated_coins: self.top_generated_coins(),
            tx_backlog: pool.transaction_backlog(),
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
