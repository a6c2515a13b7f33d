//! Ringchain consensus: the block validation and chain selection engine.
//!
//! Builds on `ringchain-types` (constants, rewards, encoding) and adds:
//! - Collaborator contracts for storage, the pending pool, the hard-fork
//!   schedule and cryptography, with in-memory reference implementations
//! - Block and transaction rules with per-rule verification flags
//! - Difficulty retargeting and block weight medians
//! - Alternative chains, reorganisation and rollback
//! - Batch prevalidation of incoming blocks and hash-of-hashes fast sync
//! - Block templates for miners

pub mod alt_chain;
pub mod block_template;
pub mod block_weight;
pub mod blockchain;
pub mod checkpoints;
pub mod config;
pub mod crypto;
pub mod error;
pub mod hardfork;
pub mod mem_storage;
pub mod prevalidate;
pub mod rolling_median;
pub mod storage;
pub mod tx_pool;
pub mod validation;
pub mod verification;

mod chain_state;
mod difficulty;
mod main_chain;
mod tx_checks;

#[cfg(test)]
mod test_support;

pub use blockchain::{Blockchain, ChainSupplement, IncomingBlocks};
pub use config::BlockchainConfig;
pub use error::{ChainError, ChainResult, StorageError};
pub use prevalidate::BlockCompleteEntry;
pub use verification::{BlockVerificationContext, TxVerificationContext};
