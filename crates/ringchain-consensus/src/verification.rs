//! Verification outcome flags for blocks and transactions.
//!
//! A rejected block or transaction sets `verification_failed` plus one flag
//! naming the rule category, so the network layer can decide how hard to
//! penalise the peer that sent it.

/// Outcome of handing a block to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockVerificationContext {
    /// Block was accepted and extends the main chain tip.
    pub added_to_main_chain: bool,
    /// Block was stored as part of an alternative chain.
    pub added_to_alt_chain: bool,
    /// Parent unknown, or parent known to be invalid.
    pub marked_as_orphaned: bool,
    /// Block hash already present on the main chain or an alt chain.
    pub already_exists: bool,
    pub verification_failed: bool,
    /// Miner claimed less than the full reward.
    pub partial_block_reward: bool,
    pub bad_pow: bool,
    /// A referenced transaction was neither in the block batch nor the pool.
    pub missing_txs: bool,
    pub bad_version: bool,
    pub bad_timestamp: bool,
    pub checkpoint_mismatch: bool,
    pub bad_miner_tx: bool,
    pub double_spend: bool,
    pub invalid_tx: bool,
    pub too_big: bool,
}

impl BlockVerificationContext {
    /// Mark the block as failing verification.
    pub fn fail(&mut self) -> &mut Self {
        self.verification_failed = true;
        self
    }
}

/// Outcome of validating a single transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxVerificationContext {
    pub verification_failed: bool,
    pub added_to_pool: bool,
    pub invalid_input: bool,
    pub invalid_output: bool,
    pub double_spend: bool,
    pub low_mixin: bool,
    pub overspend: bool,
    pub fee_too_low: bool,
    pub too_big: bool,
    pub tx_extra_too_big: bool,
    pub nonzero_unlock_time: bool,
    pub version_mismatch: bool,
}

impl TxVerificationContext {
    pub fn fail(&mut self) -> &mut Self {
        self.verification_failed = true;
        self
    }
}
