//! Dynamic block weight limit and the fees derived from it.
//!
//! Short-term median: plain median of the last `REWARD_BLOCKS_WINDOW` block
//! weights. Long-term median: rolling median over a window of tens of
//! thousands of long-term weights, cached by the hash of the window's tip
//! so that advancing by one block is a single insert. The effective median
//! combines the two per hard-fork version and bounds the next block at
//! twice its value.

use ringchain_types::consensus::{
    block_reward, dynamic_base_fee, dynamic_base_fee_estimate_2021_scaling, fee_quantization_mask,
    median, min_block_weight, BLOCK_GRANTED_FULL_REWARD_ZONE_V5, BLOCK_REWARD_OVERESTIMATE,
    REWARD_BLOCKS_WINDOW, SHORT_TERM_BLOCK_WEIGHT_SURGE_FACTOR,
};
use ringchain_types::{format_amount, HfVersion, NULL_HASH};

use crate::chain_state::ChainInner;
use crate::error::{ChainError, ChainResult};

const FRZ: u64 = BLOCK_GRANTED_FULL_REWARD_ZONE_V5;

// =============================================================================
// BlockWeightInfo
// =============================================================================

/// The three numbers that bound the next block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWeightInfo {
    /// `max(FRZ, long-term median)`
    pub long_term_effective_median: u64,
    /// Median used for the reward penalty, floored at the full reward zone
    /// of the version.
    pub effective_median: u64,
    /// `2 * effective_median`
    pub block_limit: u64,
}

// =============================================================================
// Pure rules
// =============================================================================

/// Long-term weight recorded for a block of `block_weight`.
///
/// From the 2021 scaling fork the weight is clamped to
/// `[median / 1.7, median * 1.7]`; before it, capped at `median * 1.4`.
/// Versions before the long-term weight fork record the weight unchanged.
pub fn next_long_term_block_weight(block_weight: u64, long_term_median: u64, hf_version: u8) -> u64 {
    if hf_version < HfVersion::LONG_TERM_BLOCK_WEIGHT {
        return block_weight;
    }
    let effective = FRZ.max(long_term_median);
    let (floor, cap) = if hf_version >= HfVersion::SCALING_2021 {
        (effective * 10 / 17, effective + effective * 7 / 10)
    } else {
        (0, effective + effective * 2 / 5)
    };
    block_weight.max(floor).min(cap)
}

/// Combine the short- and long-term medians for `hf_version`.
///
/// * before the long-term weight fork: the short-term median
/// * before the 2021 scaling fork: the short-term median bounded to
///   `[FRZ, 50 * long-term]`
/// * after it: the short-term median bounded to
///   `[long-term, 50 * long-term]`
///
/// The result is floored at the version's full reward zone.
pub fn effective_median_block_weight(
    long_term_median: u64,
    short_term_median: u64,
    hf_version: u8,
) -> BlockWeightInfo {
    let long_term_effective_median = FRZ.max(long_term_median);
    let mut effective_median = if hf_version < HfVersion::LONG_TERM_BLOCK_WEIGHT {
        short_term_median
    } else {
        let lower = if hf_version >= HfVersion::SCALING_2021 {
            long_term_effective_median
        } else {
            FRZ
        };
        short_term_median
            .max(lower)
            .min(SHORT_TERM_BLOCK_WEIGHT_SURGE_FACTOR * long_term_effective_median)
    };
    effective_median = effective_median.max(min_block_weight(hf_version));

    BlockWeightInfo {
        long_term_effective_median,
        effective_median,
        block_limit: effective_median * 2,
    }
}

/// Smallest fee a transaction of `tx_weight` must pay at `fee_per_byte`,
/// quantised up, before the 2% acceptance tolerance.
pub fn required_fee(tx_weight: u64, fee_per_byte: u64) -> u64 {
    let needed = tx_weight.saturating_mul(fee_per_byte);
    let mask = fee_quantization_mask();
    needed.div_ceil(mask).saturating_mul(mask)
}

// =============================================================================
// Chain-backed medians
// =============================================================================

impl ChainInner {
    /// Weights of the last `count` blocks, oldest first.
    pub(crate) fn last_n_block_weights(&self, count: usize) -> Vec<u64> {
        let height = self.db.height();
        let count = (count as u64).min(height);
        self.db.block_weights(height - count, count)
    }

    /// Median of `count` long-term weights from `start_height`.
    pub(crate) fn long_term_block_weight_median(&mut self, start_height: u64, count: u64) -> ChainResult<u64> {
        if count == 0 {
            return Err(ChainError::InvalidArgument("long-term median over zero blocks".into()));
        }
        let height = self.db.height();
        let tip_height = start_height + count - 1;
        let tip_hash = if tip_height < height {
            self.db.block_hash_at(tip_height).unwrap_or(NULL_HASH)
        } else {
            NULL_HASH
        };

        let cached_len = self.state.long_term_median.len() as u64;
        if tip_height < height && count == cached_len && tip_hash == self.state.long_term_median_tip {
            log::trace!("long-term median of {} from {}, cached", count, start_height);
            return Ok(self.state.long_term_median.median());
        }

        if tip_height > 0
            && tip_height < height
            && (count == cached_len || (count == cached_len + 1 && cached_len < self.state.long_term_window))
        {
            let old_tip = self.db.block_hash_at(tip_height - 1);
            if old_tip == Some(self.state.long_term_median_tip) {
                log::trace!("long-term median of {} from {}, incremental", count, start_height);
                let weight = self.info_at(tip_height)?.long_term_weight;
                self.state.long_term_median_tip = tip_hash;
                self.state.long_term_median.insert(weight);
                return Ok(self.state.long_term_median.median());
            }
        }

        log::trace!("long-term median of {} from {}, uncached", count, start_height);
        let weights = self.db.long_term_block_weights(start_height, count);
        self.state.long_term_median_tip = tip_hash;
        self.state.long_term_median.clear();
        self.state.long_term_median.extend(weights);
        Ok(self.state.long_term_median.median())
    }

    fn long_term_median_at_tip(&mut self) -> ChainResult<u64> {
        let height = self.db.height();
        let nblocks = self.state.long_term_window.min(height);
        if nblocks == 0 {
            return Ok(0);
        }
        self.long_term_block_weight_median(height - nblocks, nblocks)
    }

    /// Long-term weight to record for the next block.
    pub(crate) fn next_long_term_block_weight(&mut self, block_weight: u64) -> ChainResult<u64> {
        let hf_version = self.current_version();
        if hf_version < HfVersion::LONG_TERM_BLOCK_WEIGHT {
            return Ok(block_weight);
        }
        let long_term_median = self.long_term_median_at_tip()?;
        Ok(next_long_term_block_weight(block_weight, long_term_median, hf_version))
    }

    /// Recompute the effective median and weight limit for the next block.
    pub(crate) fn update_next_cumulative_weight_limit(&mut self) -> ChainResult<BlockWeightInfo> {
        let hf_version = self.current_version();
        let long_term_median = if hf_version < HfVersion::LONG_TERM_BLOCK_WEIGHT {
            0
        } else {
            self.long_term_median_at_tip()?
        };
        let short_term_median = median(&self.last_n_block_weights(REWARD_BLOCKS_WINDOW));
        let info = effective_median_block_weight(long_term_median, short_term_median, hf_version);

        if hf_version >= HfVersion::LONG_TERM_BLOCK_WEIGHT {
            self.state.long_term_effective_median = info.long_term_effective_median;
        }
        self.state.cumulative_weight_median = info.effective_median;
        self.state.cumulative_weight_limit = info.block_limit;
        Ok(info)
    }

    // -------------------------------------------------------------------------
    // Fees
    // -------------------------------------------------------------------------

    /// Whether `fee` covers a transaction of `tx_weight` at the current
    /// per-byte base fee, with a 2% tolerance.
    pub(crate) fn check_fee(&self, tx_weight: u64, fee: u64) -> bool {
        let version = self.current_version();
        let median = self.state.cumulative_weight_limit / 2;
        let Some(base_reward) = block_reward(median, 1, self.top_generated_coins(), version) else {
            return false;
        };
        let fee_per_byte = dynamic_base_fee(base_reward, median.min(self.state.long_term_effective_median));
        log::debug!("using {}/byte fee", format_amount(fee_per_byte));
        let needed = required_fee(tx_weight, fee_per_byte);
        if fee < needed - needed / 50 {
            log::error!(
                "transaction fee is not enough: {}, minimum fee: {}",
                format_amount(fee),
                format_amount(needed)
            );
            return false;
        }
        true
    }

    /// Per-byte fee levels `[low, normal, medium, high]` for a transaction
    /// expected to be mined within `grace_blocks`.
    pub(crate) fn dynamic_base_fee_estimate_2021_scaling(&self, grace_blocks: u64) -> ChainResult<[u64; 4]> {
        if grace_blocks > REWARD_BLOCKS_WINDOW as u64 {
            return Err(ChainError::InvalidArgument(format!(
                "grace blocks {} exceed the reward window",
                grace_blocks
            )));
        }
        let version = self.current_version();

        let mut rm = self.state.long_term_median.clone();
        rm.extend(std::iter::repeat(0).take(grace_blocks as usize));
        let mlw = FRZ.max(rm.median());

        let mut weights = self.last_n_block_weights(REWARD_BLOCKS_WINDOW - grace_blocks as usize);
        weights.extend(std::iter::repeat(0).take(grace_blocks as usize));
        let msw = median(&weights).max(mlw);
        let mnw = msw.min(SHORT_TERM_BLOCK_WEIGHT_SURGE_FACTOR * mlw);

        let base_reward = block_reward(
            self.state.cumulative_weight_limit / 2,
            1,
            self.top_generated_coins(),
            version,
        )
        .unwrap_or_else(|| {
            log::error!(
                "failed to determine block reward, using placeholder {} as a high bound",
                format_amount(BLOCK_REWARD_OVERESTIMATE)
            );
            BLOCK_REWARD_OVERESTIMATE
        });
        Ok(dynamic_base_fee_estimate_2021_scaling(base_reward, mnw, mlw))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{push_block, test_inner};
    use ringchain_types::consensus::{BLOCK_GRANTED_FULL_REWARD_ZONE_V1, BLOCK_GRANTED_FULL_REWARD_ZONE_V2};

    // ---- next_long_term_block_weight ----

    #[test]
    fn test_old_versions_keep_weight() {
        assert_eq!(next_long_term_block_weight(5, FRZ, 9), 5);
        assert_eq!(next_long_term_block_weight(10 * FRZ, FRZ, 9), 10 * FRZ);
    }

    #[test]
    fn test_pre_2021_caps_at_1_4() {
        assert_eq!(next_long_term_block_weight(1_000, FRZ, 10), 1_000);
        assert_eq!(next_long_term_block_weight(10 * FRZ, FRZ, 10), FRZ + FRZ * 2 / 5);
    }

    #[test]
    fn test_2021_clamps_both_ways() {
        let median: u64 = 500_000;
        assert_eq!(next_long_term_block_weight(400_000, median, 15), 400_000);
        assert_eq!(next_long_term_block_weight(100_000, median, 15), median * 10 / 17);
        assert_eq!(next_long_term_block_weight(1_000_000, median, 15), median + median * 7 / 10);
        // median below the zone uses the zone
        assert_eq!(next_long_term_block_weight(1_000, 0, 15), FRZ * 10 / 17);
    }

    // ---- effective_median_block_weight ----

    #[test]
    fn test_empty_chain_uses_full_reward_zone() {
        let info = effective_median_block_weight(0, 0, 15);
        assert_eq!(info.long_term_effective_median, FRZ);
        assert_eq!(info.effective_median, FRZ);
        assert_eq!(info.block_limit, 2 * FRZ);
    }

    #[test]
    fn test_old_versions_floor_at_their_zone() {
        assert_eq!(effective_median_block_weight(0, 100, 1).effective_median, BLOCK_GRANTED_FULL_REWARD_ZONE_V1);
        assert_eq!(effective_median_block_weight(0, 100, 4).effective_median, BLOCK_GRANTED_FULL_REWARD_ZONE_V2);
        assert_eq!(effective_median_block_weight(0, 700_000, 9).effective_median, 700_000);
    }

    #[test]
    fn test_surge_factor_caps() {
        let info = effective_median_block_weight(FRZ, FRZ * 100, 15);
        assert_eq!(info.effective_median, SHORT_TERM_BLOCK_WEIGHT_SURGE_FACTOR * FRZ);
    }

    #[test]
    fn test_2021_uses_long_term_as_floor() {
        let info = effective_median_block_weight(2 * FRZ, FRZ, 15);
        assert_eq!(info.effective_median, 2 * FRZ);
        // before 2021 the short-term median wins
        let info = effective_median_block_weight(2 * FRZ, FRZ, 10);
        assert_eq!(info.effective_median, FRZ);
    }

    // ---- required_fee ----

    #[test]
    fn test_required_fee_quantised_up() {
        let mask = fee_quantization_mask();
        assert_eq!(required_fee(0, 1_000), 0);
        assert_eq!(required_fee(1, 1), mask);
        assert_eq!(required_fee(1_000, mask), 1_000 * mask);
    }

    // ---- chain-backed ----

    #[test]
    fn test_constant_weights_converge() {
        let w = 2 * FRZ;
        let mut inner = test_inner(vec![(1, 0), (15, 1)]);
        inner.state = crate::chain_state::ChainState::new(50, None);
        for i in 0..120 {
            push_block(&mut inner, 1_000 + i * 120, w, 1, 0);
        }
        let info = inner.update_next_cumulative_weight_limit().unwrap();
        assert_eq!(info.effective_median, w);
        assert_eq!(info.long_term_effective_median, w);
        assert_eq!(inner.state.cumulative_weight_limit, 2 * w);

        let mut small = test_inner(vec![(1, 0), (15, 1)]);
        for i in 0..120 {
            push_block(&mut small, 1_000 + i * 120, 1_000, 1, 0);
        }
        let info = small.update_next_cumulative_weight_limit().unwrap();
        assert_eq!(info.effective_median, FRZ);
    }

    #[test]
    fn test_long_term_median_cache_is_incremental() {
        let mut inner = test_inner(vec![(1, 0), (15, 1)]);
        inner.state = crate::chain_state::ChainState::new(10, None);
        for i in 0..5 {
            push_block(&mut inner, 1_000 + i, 100 * (i + 1), 1, 0);
        }
        assert_eq!(inner.long_term_block_weight_median(0, 5).unwrap(), 300);
        let tip = inner.state.long_term_median_tip;
        assert_eq!(Some(tip), inner.db.block_hash_at(4));

        push_block(&mut inner, 2_000, 600, 1, 0);
        // one more block: the cached window grows by one insert
        assert_eq!(inner.long_term_block_weight_median(0, 6).unwrap(), 350);
        assert_eq!(inner.state.long_term_median.len(), 6);
        assert!(inner.long_term_block_weight_median(0, 0).is_err());
    }

    #[test]
    fn test_check_fee() {
        let mut inner = test_inner(vec![(1, 0), (15, 1)]);
        for i in 0..3 {
            push_block(&mut inner, 1_000 + i, 1_000, 1, 0);
        }
        inner.update_next_cumulative_weight_limit().unwrap();
        let reward = block_reward(FRZ, 1, 0, 15).unwrap();
        let per_byte = dynamic_base_fee(reward, FRZ);
        let needed = required_fee(2_000, per_byte);
        assert!(inner.check_fee(2_000, needed));
        assert!(inner.check_fee(2_000, needed - needed / 50));
        assert!(!inner.check_fee(2_000, needed - needed / 50 - 1));
    }

    #[test]
    fn test_fee_estimate_levels_are_ordered() {
        let mut inner = test_inner(vec![(1, 0), (15, 1)]);
        for i in 0..10 {
            push_block(&mut inner, 1_000 + i, 1_000, 1, 0);
        }
        inner.update_next_cumulative_weight_limit().unwrap();
        let fees = inner.dynamic_base_fee_estimate_2021_scaling(10).unwrap();
        assert!(fees[0] <= fees[1] && fees[1] <= fees[2] && fees[2] <= fees[3]);
        assert!(fees[0] > 0);
        assert!(inner.dynamic_base_fee_estimate_2021_scaling(101).is_err());
    }
}
