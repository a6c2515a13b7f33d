//! Hard-fork version oracle.
//!
//! The schedule is a static, height-ordered table of `(version, height)`
//! pairs. The "current" version is the one the next block must carry,
//! i.e. the version scheduled for the current chain height.

use ringchain_types::{network_config, Block, Network};

pub trait HardForkOracle: Send {
    /// Version the next block on the main chain must carry.
    fn current_version(&self) -> u8;

    /// Version scheduled for a block at `height`.
    fn ideal_version(&self, height: u64) -> u8;

    /// Whether `block` may extend the current chain.
    fn check(&self, block: &Block) -> bool;

    /// Whether `block` is acceptable at `height` (used for alt chains).
    fn check_for_height(&self, block: &Block, height: u64) -> bool;

    /// Record a block appended at `height`. Returns false when it fails
    /// [`HardForkOracle::check`].
    fn add(&mut self, block: &Block, height: u64) -> bool;

    fn on_block_popped(&mut self, count: u64);

    /// Resynchronise after the blocks from `from_height` up were replaced;
    /// the main chain now holds `chain_height` blocks.
    fn reorganize_from_chain_height(&mut self, from_height: u64, chain_height: u64);

    /// First height at which `version` is scheduled.
    fn earliest_height(&self, version: u8) -> Option<u64>;
}

/// Miner vote carried in the minor version; zero counts as one.
pub fn block_vote(block: &Block) -> u8 {
    block.minor_version.max(1)
}

#[derive(Debug, Clone)]
pub struct HardForkSchedule {
    heights: Vec<(u8, u64)>,
    chain_height: u64,
}

impl HardForkSchedule {
    /// Build a schedule from `(version, activation height)` pairs. Versions
    /// and heights must both be strictly increasing; an implicit version 1
    /// from height 0 is added when missing.
    pub fn new(mut heights: Vec<(u8, u64)>) -> Self {
        heights.sort_by_key(|&(_, h)| h);
        assert!(
            heights.windows(2).all(|w| w[0].0 < w[1].0 && w[0].1 < w[1].1),
            "hard fork schedule must be strictly increasing"
        );
        assert!(heights.iter().all(|&(v, _)| v >= 1), "version 0 is reserved");
        match heights.first().copied() {
            None => heights.push((1, 0)),
            Some((1, h)) if h > 0 => heights[0].1 = 0,
            Some((v, h)) if h > 0 => heights.insert(0, (v - 1, 0)),
            Some(_) => {}
        }
        Self {
            heights,
            chain_height: 0,
        }
    }

    pub fn for_network(network: Network) -> Self {
        Self::new(network_config(network).hard_fork_heights.to_vec())
    }

    pub fn chain_height(&self) -> u64 {
        self.chain_height
    }

    fn do_check(&self, block: &Block, version: u8) -> bool {
        block.major_version == version && block_vote(block) >= version
    }
}

impl HardForkOracle for HardForkSchedule {
    fn current_version(&self) -> u8 {
        self.ideal_version(self.chain_height)
    }

    fn ideal_version(&self, height: u64) -> u8 {
        self.heights
            .iter()
            .take_while(|&&(_, h)| h <= height)
            .last()
            .map_or(1, |&(v, _)| v)
    }

    fn check(&self, block: &Block) -> bool {
        self.do_check(block, self.current_version())
    }

    fn check_for_height(&self, block: &Block, height: u64) -> bool {
        self.do_check(block, self.ideal_version(height))
    }

    fn add(&mut self, block: &Block, height: u64) -> bool {
        if !self.check_for_height(block, height) {
            return false;
        }
        self.chain_height = height + 1;
        true
    }

    fn on_block_popped(&mut self, count: u64) {
        self.chain_height = self.chain_height.saturating_sub(count);
    }

    fn reorganize_from_chain_height(&mut self, _from_height: u64, chain_height: u64) {
        self.chain_height = chain_height;
    }

    fn earliest_height(&self, version: u8) -> Option<u64> {
        self.heights
            .iter()
            .find(|&&(v, _)| v >= version)
            .map(|&(_, h)| h)
    }
}
