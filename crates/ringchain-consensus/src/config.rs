//! Engine configuration.

use std::time::{SystemTime, UNIX_EPOCH};

use ringchain_types::consensus::LONG_TERM_BLOCK_WEIGHT_WINDOW_SIZE;
use ringchain_types::Network;
use serde::{Deserialize, Serialize};

/// Source of wall-clock time in seconds since the epoch.
pub type TimeSource = fn() -> u64;

pub fn system_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockchainConfig {
    pub network: Network,
    /// Bypass difficulty computation with a constant (test networks).
    pub fixed_difficulty: Option<u128>,
    /// Upper bound on proof-of-work worker threads during batch
    /// prevalidation.
    pub max_prepare_blocks_threads: usize,
    pub offline: bool,
    /// Trust the built-in hash-of-hashes list for blocks below it.
    pub fast_sync: bool,
    pub enforce_dns_checkpoints: bool,
    /// Keep blocks disconnected by a reorg as alternative blocks.
    pub keep_alt_blocks: bool,
    /// Threads for output lookups and ring signature checks; `None` means
    /// one per CPU.
    pub verify_threads: Option<usize>,
    /// Blocks in the long-term weight median window.
    pub long_term_block_weight_window: u64,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            fixed_difficulty: None,
            max_prepare_blocks_threads: 4,
            offline: false,
            fast_sync: true,
            enforce_dns_checkpoints: false,
            keep_alt_blocks: true,
            verify_threads: None,
            long_term_block_weight_window: LONG_TERM_BLOCK_WEIGHT_WINDOW_SIZE as u64,
        }
    }
}

impl BlockchainConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }

    pub fn verify_threads(&self) -> usize {
        self.verify_threads.unwrap_or_else(num_cpus::get).max(1)
    }
}
