//! Consensus rules for blocks and transactions.
//!
//! The free functions here need nothing but their arguments, so they can be
//! called from the block validator, the pool or a transaction builder. The
//! checks that read the chain (timestamps, unlock times) are methods on the
//! chain state at the bottom of the file.

use ringchain_types::consensus::{
    block_reward, is_unlock_time_reached, is_valid_decomposed_amount, median,
    BLOCK_FUTURE_TIME_LIMIT, DIFFICULTY_TARGET_V2, MINED_MONEY_UNLOCK_WINDOW,
    TIMESTAMP_CHECK_WINDOW,
};
use ringchain_types::{
    hash_to_hex, Block, Hash, HfVersion, PublicKey, RctType, Transaction, TxIn, TxOutTarget,
};
use thiserror::Error;

use crate::chain_state::ChainInner;

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("miner transaction must have exactly one generation input")]
    CoinbaseInput,

    #[error("miner transaction version {version} not allowed at v{hf_version}")]
    CoinbaseVersion { version: u8, hf_version: u8 },

    #[error("RingCT signatures not allowed in miner transactions")]
    CoinbaseRctNotNull,

    #[error("miner transaction height {input_height} != block height {block_height}")]
    CoinbaseHeightMismatch { input_height: u64, block_height: u64 },

    #[error("miner transaction unlock time {actual}, expected {expected}")]
    CoinbaseUnlockTime { actual: u64, expected: u64 },

    #[error("miner output {0} is not a valid decomposed amount")]
    CoinbaseNotDecomposed(u64),

    #[error("block weight {0} is bigger than allowed for this chain")]
    BlockTooBig(u64),

    #[error("miner transaction spends {claimed}, block reward is {allowed}")]
    CoinbaseRewardTooHigh { claimed: u64, allowed: u64 },

    #[error("miner transaction claims {claimed}, expected exactly {expected}")]
    CoinbaseRewardNotExact { claimed: u64, expected: u64 },

    #[error("miner transaction claims {claimed}, less than the fees {fee}")]
    CoinbaseBelowFees { claimed: u64, fee: u64 },

    #[error("output amounts overflow")]
    OutputOverflow,

    #[error("transaction has no outputs")]
    NoOutputs,

    #[error("transaction has fewer than two outputs")]
    TooFewOutputs,

    #[error("output {index} has the wrong target type for v{hf_version}")]
    WrongOutputType { index: usize, hf_version: u8 },

    #[error("outputs mix tagged and untagged keys")]
    MixedOutputTypes,

    #[error("output amount {0} is not a valid decomposed amount")]
    NotDecomposed(u64),

    #[error("RingCT output carries a plain amount {0}")]
    NonZeroRctAmount(u64),

    #[error("output {0} has an invalid public key")]
    InvalidOutputKey(usize),

    #[error("RingCT type {rct_type:?} not allowed at v{hf_version}")]
    RctTypeNotAllowed { rct_type: RctType, hf_version: u8 },

    #[error("ring sizes vary between {min} and {max}")]
    VaryingRingSize { min: usize, max: usize },

    #[error("ring size {0} is too low and no input is unmixable")]
    LowRingSize(usize),

    #[error("ring size {0} is too low and more than one input is mixable")]
    LowRingSizeMixable(usize),

    #[error("ring size {actual} is invalid, expected {expected}")]
    InvalidRingSize { actual: usize, expected: usize },

    #[error("transaction version {version} is above the maximum {max}")]
    TxVersionTooHigh { version: u8, max: u8 },

    #[error("transaction version {version} is below the minimum {min}")]
    TxVersionTooLow { version: u8, min: u8 },

    #[error("key images must be sorted in strictly increasing order")]
    KeyImagesUnsorted,

    #[error("timestamp {timestamp} is more than two hours ahead of {now}")]
    TimestampInFuture { timestamp: u64, now: u64 },

    #[error("timestamp {timestamp} is below the median {median} of recent blocks")]
    TimestampBelowMedian { timestamp: u64, median: u64 },
}

impl ValidationError {
    /// Ring size rule violations, reported to peers as low mixin.
    pub fn is_mixin(&self) -> bool {
        matches!(
            self,
            Self::VaryingRingSize { .. }
                | Self::LowRingSize(_)
                | Self::LowRingSizeMixable(_)
                | Self::InvalidRingSize { .. }
        )
    }
}

// =============================================================================
// Constants
// =============================================================================

/// Two MLSAG transactions entered the chain after the CLSAG fork because
/// they sat in pools across it.
pub const GRANDFATHERED_MLSAG_TXS: [&str; 2] = [
    "c5151944f0583097ba0c88cd0f43e7fabb3881278aa2f73b3b0a007c5d34e910",
    "6f2f117cde6fbcf8d4a6ef8974fcac744726574ac38cf25d3322c996b21edd4c",
];

/// Smallest mixin (ring size - 1) a version accepts.
pub fn min_mixin(hf_version: u8) -> usize {
    if hf_version >= HfVersion::MIN_MIXIN_15 {
        15
    } else if hf_version >= HfVersion::MIN_MIXIN_10 {
        10
    } else if hf_version >= HfVersion::MIN_MIXIN_6 {
        6
    } else if hf_version >= HfVersion::MIN_MIXIN_4 {
        4
    } else {
        2
    }
}

fn is_grandfathered(tx_hash: &Hash) -> bool {
    let hex = hash_to_hex(tx_hash);
    GRANDFATHERED_MLSAG_TXS.contains(&hex.as_str())
}

// =============================================================================
// Miner Transaction
// =============================================================================

/// Structure of a block's miner transaction before any amount is looked at.
pub fn prevalidate_miner_transaction(
    block: &Block,
    height: u64,
    hf_version: u8,
) -> Result<(), ValidationError> {
    let tx = &block.miner_tx;
    let [TxIn::Gen { height: input_height }] = tx.vin.as_slice() else {
        return Err(ValidationError::CoinbaseInput);
    };
    if tx.version <= 1 && hf_version >= HfVersion::MIN_V2_COINBASE_TX {
        return Err(ValidationError::CoinbaseVersion {
            version: tx.version,
            hf_version,
        });
    }
    if hf_version >= HfVersion::REJECT_SIGS_IN_COINBASE
        && tx.version >= 2
        && tx.rct_type() != RctType::Null
    {
        return Err(ValidationError::CoinbaseRctNotNull);
    }
    if *input_height != height {
        log::warn!(
            "miner transaction in block has invalid height: {}, expected: {}",
            input_height,
            height
        );
        return Err(ValidationError::CoinbaseHeightMismatch {
            input_height: *input_height,
            block_height: height,
        });
    }
    let expected_unlock = height + MINED_MONEY_UNLOCK_WINDOW;
    if tx.unlock_time != expected_unlock {
        return Err(ValidationError::CoinbaseUnlockTime {
            actual: tx.unlock_time,
            expected: expected_unlock,
        });
    }
    if tx.outputs_amount().is_none() {
        return Err(ValidationError::OutputOverflow);
    }
    check_output_types(tx, hf_version)
}

/// Outcome of a successful reward check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinerReward {
    /// Coins the block actually creates.
    pub base_reward: u64,
    /// The miner claimed less than allowed.
    pub partial: bool,
}

/// Check the miner's claim against the block reward for a block of
/// `cumulative_block_weight` paying `fee` in fees.
///
/// `median_weight` is the effective median from the short-term median
/// fork, the plain median of the last reward window before it.
pub fn validate_miner_transaction(
    block: &Block,
    cumulative_block_weight: u64,
    fee: u64,
    median_weight: u64,
    already_generated_coins: u64,
    hf_version: u8,
) -> Result<MinerReward, ValidationError> {
    let money_in_use = block
        .miner_tx
        .outputs_amount()
        .ok_or(ValidationError::OutputOverflow)?;

    if hf_version == 3 {
        if let Some(out) = block
            .miner_tx
            .vout
            .iter()
            .find(|o| !is_valid_decomposed_amount(o.amount))
        {
            return Err(ValidationError::CoinbaseNotDecomposed(out.amount));
        }
    }

    let base_reward = block_reward(
        median_weight,
        cumulative_block_weight,
        already_generated_coins,
        hf_version,
    )
    .ok_or(ValidationError::BlockTooBig(cumulative_block_weight))?;

    let allowed = base_reward.saturating_add(fee);
    if allowed < money_in_use {
        return Err(ValidationError::CoinbaseRewardTooHigh {
            claimed: money_in_use,
            allowed,
        });
    }

    // Between v2 and the exact-coinbase fork a miner may leave coins
    // unclaimed; they go back into the emission.
    if hf_version < 2 || hf_version >= HfVersion::EXACT_COINBASE {
        if allowed != money_in_use {
            log::debug!(
                "miner transaction doesn't use full amount of block reward: spent {}, reward {}",
                money_in_use,
                allowed
            );
            return Err(ValidationError::CoinbaseRewardNotExact {
                claimed: money_in_use,
                expected: allowed,
            });
        }
        return Ok(MinerReward {
            base_reward,
            partial: false,
        });
    }

    let claimed = money_in_use
        .checked_sub(fee)
        .ok_or(ValidationError::CoinbaseBelowFees {
            claimed: money_in_use,
            fee,
        })?;
    Ok(MinerReward {
        base_reward: claimed,
        partial: allowed != money_in_use,
    })
}

// =============================================================================
// Outputs
// =============================================================================

/// Output target types a version accepts: untagged keys before view tags,
/// either (but not mixed) during the view tag fork, tagged keys after it.
pub fn check_output_types(tx: &Transaction, hf_version: u8) -> Result<(), ValidationError> {
    let Some(first) = tx.vout.first() else {
        return Err(ValidationError::NoOutputs);
    };
    for (index, out) in tx.vout.iter().enumerate() {
        let tagged = matches!(out.target, TxOutTarget::ToTaggedKey { .. });
        if hf_version > HfVersion::VIEW_TAGS {
            if !tagged {
                return Err(ValidationError::WrongOutputType { index, hf_version });
            }
        } else if hf_version < HfVersion::VIEW_TAGS {
            if tagged {
                return Err(ValidationError::WrongOutputType { index, hf_version });
            }
        } else if tagged != first.target.is_tagged() {
            return Err(ValidationError::MixedOutputTypes);
        }
    }
    Ok(())
}

fn rct_type_allowed(rct_type: RctType, tx_hash: &Hash, hf_version: u8) -> bool {
    if hf_version < HfVersion::BULLETPROOFS && rct_type.is_bulletproof() {
        return false;
    }
    if hf_version > HfVersion::BULLETPROOFS && rct_type.is_borromean() {
        return false;
    }
    if hf_version < HfVersion::SMALLER_BP && rct_type == RctType::Bulletproof2 {
        return false;
    }
    if hf_version > HfVersion::SMALLER_BP && rct_type == RctType::Bulletproof {
        return false;
    }
    if hf_version < HfVersion::CLSAG && rct_type == RctType::Clsag {
        return false;
    }
    if hf_version > HfVersion::CLSAG && rct_type <= RctType::Bulletproof2 {
        if !is_grandfathered(tx_hash) {
            return false;
        }
        log::debug!("grandfathering {} in", hash_to_hex(tx_hash));
    }
    if hf_version < HfVersion::BULLETPROOF_PLUS && rct_type.is_bulletproof_plus() {
        return false;
    }
    if hf_version > HfVersion::BULLETPROOF_PLUS && rct_type.is_bulletproof() {
        return false;
    }
    true
}

/// Output rules of a non-miner transaction at `hf_version`.
pub fn check_tx_outputs(
    tx: &Transaction,
    tx_hash: &Hash,
    hf_version: u8,
    check_key: impl Fn(&PublicKey) -> bool,
) -> Result<(), ValidationError> {
    if hf_version >= 2 && tx.version == 1 {
        if let Some(out) = tx.vout.iter().find(|o| !is_valid_decomposed_amount(o.amount)) {
            return Err(ValidationError::NotDecomposed(out.amount));
        }
    }
    if hf_version >= 3 && tx.version >= 2 {
        if let Some(out) = tx.vout.iter().find(|o| o.amount != 0) {
            return Err(ValidationError::NonZeroRctAmount(out.amount));
        }
    }
    if hf_version >= 4 {
        if let Some(index) = tx.vout.iter().position(|o| !check_key(o.target.key())) {
            return Err(ValidationError::InvalidOutputKey(index));
        }
    }
    if tx.version >= 2 {
        let rct_type = tx.rct_type();
        if !rct_type_allowed(rct_type, tx_hash, hf_version) {
            return Err(ValidationError::RctTypeNotAllowed {
                rct_type,
                hf_version,
            });
        }
    }
    check_output_types(tx, hf_version)
}

// =============================================================================
// Inputs
// =============================================================================

/// From the two-output fork, RingCT transactions need at least two
/// outputs.
pub fn check_output_count(tx: &Transaction, hf_version: u8) -> Result<(), ValidationError> {
    if hf_version >= HfVersion::MIN_2_OUTPUTS && tx.version >= 2 && tx.vout.len() < 2 {
        return Err(ValidationError::TooFewOutputs);
    }
    Ok(())
}

/// Ring size and transaction version rules.
///
/// `num_outputs(amount)` counts outputs of a plain amount on the chain.
/// An input whose amount bucket is too small to mix is "unmixable"; low
/// ring sizes are only tolerated when spending one, and then alongside at
/// most one mixable input.
pub fn check_mixin(
    tx: &Transaction,
    hf_version: u8,
    num_outputs: impl Fn(u64) -> u64,
) -> Result<(), ValidationError> {
    if hf_version < 2 {
        return Ok(());
    }
    let min_mixin = min_mixin(hf_version);
    let mut n_unmixable = 0usize;
    let mut n_mixable = 0usize;
    let mut min_actual = usize::MAX;
    let mut max_actual = 0usize;

    for input in &tx.vin {
        let TxIn::ToKey { amount, key_offsets, .. } = input else {
            continue;
        };
        if *amount == 0 {
            n_mixable += 1;
        } else if num_outputs(*amount) <= min_mixin as u64 {
            n_unmixable += 1;
        } else {
            n_mixable += 1;
        }
        let ring_mixin = key_offsets.len().saturating_sub(1);
        min_actual = min_actual.min(ring_mixin);
        max_actual = max_actual.max(ring_mixin);
    }
    log::debug!("mixin: {}-{}", min_actual, max_actual);

    if hf_version >= HfVersion::SAME_MIXIN && min_actual != max_actual {
        return Err(ValidationError::VaryingRingSize {
            min: min_actual.saturating_add(1),
            max: max_actual + 1,
        });
    }

    let v15_grace = hf_version == HfVersion::MIN_MIXIN_15 && min_actual == 10;
    if min_actual < min_mixin && !v15_grace {
        if n_unmixable == 0 {
            return Err(ValidationError::LowRingSize(min_actual + 1));
        }
        if n_mixable > 1 {
            return Err(ValidationError::LowRingSizeMixable(min_actual + 1));
        }
    } else if (hf_version > HfVersion::MIN_MIXIN_15 && min_actual > 15)
        || (hf_version == HfVersion::MIN_MIXIN_15 && min_actual != 15 && min_actual != 10)
        || (hf_version < HfVersion::MIN_MIXIN_15
            && hf_version >= HfVersion::MIN_MIXIN_10 + 2
            && min_actual > 10)
        || ((hf_version == HfVersion::MIN_MIXIN_10 || hf_version == HfVersion::MIN_MIXIN_10 + 1)
            && min_actual != 10)
    {
        return Err(ValidationError::InvalidRingSize {
            actual: min_actual.saturating_add(1),
            expected: min_mixin + 1,
        });
    }

    let max_version = if hf_version <= 3 { 1 } else { 2 };
    if tx.version > max_version {
        return Err(ValidationError::TxVersionTooHigh {
            version: tx.version,
            max: max_version,
        });
    }
    let min_version = if n_unmixable > 0 {
        1
    } else if hf_version >= HfVersion::ENFORCE_RCT {
        2
    } else {
        1
    };
    if tx.version < min_version {
        return Err(ValidationError::TxVersionTooLow {
            version: tx.version,
            min: min_version,
        });
    }
    Ok(())
}

/// From v7, inputs must be ordered by strictly increasing key image.
pub fn check_key_images_sorted(tx: &Transaction, hf_version: u8) -> Result<(), ValidationError> {
    if hf_version < HfVersion::SORTED_KEY_IMAGES {
        return Ok(());
    }
    let key_images: Vec<_> = tx.key_images().collect();
    if key_images.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ValidationError::KeyImagesUnsorted);
    }
    Ok(())
}

// =============================================================================
// Timestamps
// =============================================================================

/// A timestamp may not fall below the median of the preceding window.
/// Fewer than a full window of timestamps always passes.
pub fn check_timestamp_median(timestamp: u64, timestamps: &[u64]) -> Result<u64, ValidationError> {
    if timestamps.len() < TIMESTAMP_CHECK_WINDOW {
        return Ok(0);
    }
    let median = median(timestamps);
    if timestamp < median {
        return Err(ValidationError::TimestampBelowMedian { timestamp, median });
    }
    Ok(median)
}

/// Main-chain timestamp rule: not more than two hours ahead of `now`, and
/// not below the median of the last `TIMESTAMP_CHECK_WINDOW` blocks.
/// Returns that median (zero while the window is short).
pub fn check_block_timestamp(
    timestamp: u64,
    recent_timestamps: &[u64],
    now: u64,
) -> Result<u64, ValidationError> {
    if timestamp > now.saturating_add(BLOCK_FUTURE_TIME_LIMIT) {
        return Err(ValidationError::TimestampInFuture { timestamp, now });
    }
    check_timestamp_median(timestamp, recent_timestamps)
}

/// Network time estimated from the chain: the median of the window pushed
/// forward to the next block, capped by the last timestamp plus one
/// target. `timestamps` must hold the full window.
pub fn adjusted_time_from(timestamps: &[u64]) -> u64 {
    let window = timestamps.len() as u64;
    let median_ts = median(timestamps) + (window + 1) * DIFFICULTY_TARGET_V2 / 2;
    let projected = timestamps.last().copied().unwrap_or(0) + DIFFICULTY_TARGET_V2;
    projected.min(median_ts)
}

impl ChainInner {
    /// Adjusted network time for a chain of `height` blocks; the wall clock
    /// until a full timestamp window exists.
    pub(crate) fn get_adjusted_time(&self, height: u64) -> u64 {
        if height < TIMESTAMP_CHECK_WINDOW as u64 {
            return (self.now)();
        }
        let timestamps: Vec<u64> = (height - TIMESTAMP_CHECK_WINDOW as u64..height)
            .filter_map(|h| self.db.block_info_at(h).map(|info| info.timestamp))
            .collect();
        adjusted_time_from(&timestamps)
    }

    /// Whether an output locked until `unlock_time` may be spent by the next
    /// block. Timestamp locks use adjusted time from the deterministic
    /// unlock fork, the wall clock before it.
    pub(crate) fn is_tx_spendtime_unlocked(&self, unlock_time: u64, hf_version: u8) -> bool {
        let height = self.db.height();
        let current_time = if hf_version >= HfVersion::DETERMINISTIC_UNLOCK_TIME {
            self.get_adjusted_time(height)
        } else {
            (self.now)()
        };
        is_unlock_time_reached(unlock_time, height, current_time, self.current_version())
    }

    /// Timestamp rule for a block extending the main chain.
    pub(crate) fn check_block_timestamp(&self, block: &Block) -> Result<u64, ValidationError> {
        let recent = self.last_block_timestamps(TIMESTAMP_CHECK_WINDOW);
        check_block_timestamp(block.timestamp, &recent, (self.now)()).inspect_err(|e| {
            log::error!("block {}: {}", hash_to_hex(&block.hash()), e);
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
