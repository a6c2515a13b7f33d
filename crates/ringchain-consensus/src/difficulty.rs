//! Next-block difficulty with a cached sliding window.
//!
//! The window of timestamps and cumulative difficulties is kept between
//! calls. When the chain has grown by exactly one block since the window
//! was built, the newest block is pushed and the oldest evicted; any other
//! change (pop, reorg, cold start) rebuilds it from storage. The genesis
//! block never takes part.

use ringchain_types::consensus::{difficulty_target, next_difficulty, DIFFICULTY_BLOCKS_COUNT};
use ringchain_types::hash_to_hex;

use crate::chain_state::ChainInner;
use crate::error::{ChainResult, StorageError};
use crate::storage::AltBlockEntry;

impl ChainInner {
    // -------------------------------------------------------------------------
    // Main chain
    // -------------------------------------------------------------------------

    /// Difficulty the next main-chain block must meet. Zero signals an
    /// overflow and must be treated as fatal by the caller.
    pub(crate) fn difficulty_for_next_block(&mut self) -> ChainResult<u128> {
        if let Some(fixed) = self.state.fixed_difficulty {
            return Ok(if self.db.height() > 0 { fixed } else { 1 });
        }

        let top_hash = self.db.top_block_hash();
        if top_hash == self.state.difficulty_top_hash {
            return Ok(self.state.difficulty_for_next_block);
        }

        let height = self.db.height();
        if self.state.reset_difficulty_window {
            self.state.difficulty_window_height = 0;
        }
        let state_height = self.state.difficulty_window_height;
        if state_height != 0
            && height.checked_sub(state_height) == Some(1)
            && self.state.timestamps.len() >= DIFFICULTY_BLOCKS_COUNT
        {
            let info = self.info_at(height - 1)?;
            self.state.timestamps.push_back(info.timestamp);
            self.state.difficulties.push_back(info.cumulative_difficulty);
            while self.state.timestamps.len() > DIFFICULTY_BLOCKS_COUNT {
                self.state.timestamps.pop_front();
            }
            while self.state.difficulties.len() > DIFFICULTY_BLOCKS_COUNT {
                self.state.difficulties.pop_front();
            }
        } else {
            let start = (height - height.min(DIFFICULTY_BLOCKS_COUNT as u64)).max(1);
            self.state.timestamps.clear();
            self.state.difficulties.clear();
            for h in start..height {
                let info = self.info_at(h)?;
                self.state.timestamps.push_back(info.timestamp);
                self.state.difficulties.push_back(info.cumulative_difficulty);
            }
        }
        self.state.difficulty_window_height = height;

        let target = difficulty_target(self.current_version());
        let timestamps = self.state.timestamps.make_contiguous();
        let difficulties = self.state.difficulties.make_contiguous();
        let diff = next_difficulty(timestamps, difficulties, target);

        self.state.difficulty_top_hash = top_hash;
        self.state.difficulty_for_next_block = diff;
        Ok(diff)
    }

    // -------------------------------------------------------------------------
    // Alternative chains
    // -------------------------------------------------------------------------

    /// Difficulty for a block at `height` on top of `alt_chain` (oldest
    /// first). Short alt chains are backfilled with main-chain blocks below
    /// their fork point.
    pub(crate) fn alt_chain_next_difficulty(
        &self,
        alt_chain: &[AltBlockEntry],
        height: u64,
    ) -> ChainResult<u128> {
        if let Some(fixed) = self.state.fixed_difficulty {
            return Ok(if self.db.height() > 0 { fixed } else { 1 });
        }

        let mut timestamps = Vec::with_capacity(DIFFICULTY_BLOCKS_COUNT);
        let mut difficulties = Vec::with_capacity(DIFFICULTY_BLOCKS_COUNT);
        if alt_chain.len() < DIFFICULTY_BLOCKS_COUNT {
            let stop = alt_chain.first().map_or(height, |e| e.height);
            let count = ((DIFFICULTY_BLOCKS_COUNT - alt_chain.len()) as u64).min(stop);
            let start = (stop - count).max(1);
            for h in start..stop {
                let info = self.info_at(h)?;
                timestamps.push(info.timestamp);
                difficulties.push(info.cumulative_difficulty);
            }
            for entry in alt_chain {
                timestamps.push(entry.block.timestamp);
                difficulties.push(entry.cumulative_difficulty);
            }
        } else {
            for entry in &alt_chain[alt_chain.len() - DIFFICULTY_BLOCKS_COUNT..] {
                timestamps.push(entry.block.timestamp);
                difficulties.push(entry.cumulative_difficulty);
            }
        }

        let target = difficulty_target(self.hardfork.ideal_version(height));
        Ok(next_difficulty(&timestamps, &difficulties, target))
    }

    // -------------------------------------------------------------------------
    // Drift repair
    // -------------------------------------------------------------------------

    /// Compare stored cumulative difficulties against the difficulty
    /// checkpoints below the tip. Returns whether all matched and the last
    /// height that did.
    pub(crate) fn check_difficulty_checkpoints(&self) -> (bool, u64) {
        let height = self.db.height();
        let mut last_good = 0;
        for (&h, &expected) in self.checkpoints.difficulty_points() {
            if h >= height {
                break;
            }
            let stored = self.db.block_info_at(h).map(|info| info.cumulative_difficulty);
            if stored != Some(expected) {
                return (false, last_good);
            }
            last_good = h;
        }
        (true, last_good)
    }

    /// Recompute cumulative difficulties from `start_height` (by default the
    /// last matching difficulty checkpoint) to the tip, and write back every
    /// value from the first one that drifted. Returns how many were fixed.
    pub(crate) fn recalculate_difficulties(&mut self, start_height: Option<u64>) -> ChainResult<usize> {
        if self.state.fixed_difficulty.is_some() || self.db.height() == 0 {
            return Ok(0);
        }
        let start_height = start_height.unwrap_or_else(|| self.check_difficulty_checkpoints().1);
        let top_height = self.db.height() - 1;
        log::info!(
            "recalculating difficulties from height {} to height {}",
            start_height,
            top_height
        );

        let mut timestamps = Vec::with_capacity(DIFFICULTY_BLOCKS_COUNT + 1);
        let mut difficulties = Vec::with_capacity(DIFFICULTY_BLOCKS_COUNT + 1);
        if start_height > 1 {
            let first = start_height.saturating_sub(DIFFICULTY_BLOCKS_COUNT as u64).max(1);
            for h in first..start_height {
                let info = self.info_at(h)?;
                timestamps.push(info.timestamp);
                difficulties.push(info.cumulative_difficulty);
            }
        }
        let mut last_cumulative = match difficulties.last() {
            Some(&cd) if start_height > 1 => cd,
            _ => start_height.min(1) as u128,
        };

        let mut drift_start = None;
        let mut corrected = Vec::new();
        for height in start_height..=top_height {
            let target = difficulty_target(self.hardfork.ideal_version(height));
            let diff = next_difficulty(&timestamps, &difficulties, target);
            let cumulative = diff.checked_add(last_cumulative).ok_or_else(|| {
                StorageError::Corrupt(format!("cumulative difficulty overflow at height {}", height))
            })?;

            let info = self.info_at(height)?;
            if drift_start.is_none() && cumulative != info.cumulative_difficulty {
                log::error!(
                    "difficulty drift found at height {}, hash {}, existing {}, recalculated {}",
                    height,
                    hash_to_hex(&info.hash),
                    info.cumulative_difficulty,
                    cumulative
                );
                drift_start = Some(height);
            }
            if drift_start.is_some() {
                corrected.push(cumulative);
            }

            if height > 0 {
                timestamps.push(info.timestamp);
                difficulties.push(cumulative);
            }
            if timestamps.len() > DIFFICULTY_BLOCKS_COUNT {
                timestamps.remove(0);
                difficulties.remove(0);
            }
            last_cumulative = cumulative;
        }

        if let Some(start) = drift_start {
            self.db.correct_block_cumulative_difficulties(start, &corrected)?;
            log::warn!("corrected difficulties for {} blocks", corrected.len());
            self.state.reset_difficulty_cache();
        }
        Ok(corrected.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{push_block, test_inner};
    use ringchain_types::consensus::DIFFICULTY_TARGET_V1;

    /// A chain whose stored cumulative difficulties are the ones the
    /// difficulty engine would have produced.
    fn honest_chain(blocks: u64, spacing: u64) -> crate::chain_state::ChainInner {
        let mut inner = test_inner(vec![(1, 0)]);
        for i in 0..blocks {
            let diff = inner.difficulty_for_next_block().unwrap();
            push_block(&mut inner, 1_000 + i * spacing, 100, diff, 0);
        }
        inner
    }

    // ---- next block ----

    #[test]
    fn test_genesis_and_first_blocks_are_one() {
        let mut inner = test_inner(vec![(1, 0)]);
        assert_eq!(inner.difficulty_for_next_block().unwrap(), 1);
        push_block(&mut inner, 1_000, 100, 1, 0);
        // only the genesis block, which is skipped
        assert_eq!(inner.difficulty_for_next_block().unwrap(), 1);
    }

    #[test]
    fn test_cached_by_tip() {
        let mut inner = honest_chain(20, DIFFICULTY_TARGET_V1);
        let first = inner.difficulty_for_next_block().unwrap();
        let tip = inner.state.difficulty_top_hash;
        assert_eq!(tip, inner.db.top_block_hash());
        assert_eq!(inner.difficulty_for_next_block().unwrap(), first);
    }

    #[test]
    fn test_incremental_matches_rebuild() {
        let mut inner = honest_chain(DIFFICULTY_BLOCKS_COUNT as u64 + 30, 50);
        let incremental = inner.difficulty_for_next_block().unwrap();
        inner.state.reset_difficulty_cache();
        let rebuilt = inner.difficulty_for_next_block().unwrap();
        assert_eq!(incremental, rebuilt);
        assert_eq!(inner.state.timestamps.len(), DIFFICULTY_BLOCKS_COUNT);
    }

    #[test]
    fn test_faster_blocks_raise_difficulty() {
        let mut slow = honest_chain(200, 2 * DIFFICULTY_TARGET_V1);
        let mut fast = honest_chain(200, DIFFICULTY_TARGET_V1 / 2);
        assert!(fast.difficulty_for_next_block().unwrap() > slow.difficulty_for_next_block().unwrap());
    }

    #[test]
    fn test_fixed_difficulty() {
        let mut inner = test_inner(vec![(1, 0)]);
        inner.state.fixed_difficulty = Some(77);
        assert_eq!(inner.difficulty_for_next_block().unwrap(), 1);
        push_block(&mut inner, 1_000, 100, 1, 0);
        assert_eq!(inner.difficulty_for_next_block().unwrap(), 77);
        assert_eq!(inner.alt_chain_next_difficulty(&[], 1).unwrap(), 77);
    }

    // ---- alt chains ----

    #[test]
    fn test_alt_chain_backfills_from_main_chain() {
        let mut inner = honest_chain(30, DIFFICULTY_TARGET_V1);
        // an empty alt chain forking at the tip sees exactly the main chain
        let main = inner.difficulty_for_next_block().unwrap();
        assert_eq!(inner.alt_chain_next_difficulty(&[], 30).unwrap(), main);
    }

    // ---- drift ----

    #[test]
    fn test_recalculate_without_drift() {
        let mut inner = honest_chain(40, DIFFICULTY_TARGET_V1);
        assert_eq!(inner.recalculate_difficulties(Some(0)).unwrap(), 0);
    }

    #[test]
    fn test_recalculate_repairs_drift() {
        let mut inner = honest_chain(40, DIFFICULTY_TARGET_V1);
        let good: Vec<u128> = (0..40).map(|h| inner.info_at(h).unwrap().cumulative_difficulty).collect();
        let broken: Vec<u128> = good[25..].iter().map(|cd| cd + 5).collect();
        inner.db.correct_block_cumulative_difficulties(25, &broken).unwrap();

        assert_eq!(inner.recalculate_difficulties(Some(0)).unwrap(), 15);
        let repaired: Vec<u128> = (0..40).map(|h| inner.info_at(h).unwrap().cumulative_difficulty).collect();
        assert_eq!(repaired, good);
    }

    #[test]
    fn test_difficulty_checkpoints() {
        let mut inner = honest_chain(10, DIFFICULTY_TARGET_V1);
        let at3 = inner.info_at(3).unwrap();
        let at6 = inner.info_at(6).unwrap();
        inner.checkpoints.add_checkpoint(3, at3.hash, Some(at3.cumulative_difficulty)).unwrap();
        inner.checkpoints.add_checkpoint(6, at6.hash, Some(at6.cumulative_difficulty + 1)).unwrap();
        assert_eq!(inner.check_difficulty_checkpoints(), (false, 3));
    }
}
