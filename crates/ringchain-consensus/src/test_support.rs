//! Fixtures shared by the in-crate unit tests.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use ringchain_types::{
    cn_fast_hash, AccountAddress, Block, Hash, KeyImage, PublicKey, Signature, Transaction, TxIn,
    NULL_HASH,
};

use crate::chain_state::{ChainInner, ChainState};
use crate::checkpoints::Checkpoints;
use crate::config::BlockchainConfig;
use crate::crypto::{CryptoOracle, CtKey, SecretKey};
use crate::hardfork::HardForkSchedule;
use crate::mem_storage::MemoryStorage;
use crate::storage::StoredBlockInfo;

/// Wall clock seen by unit tests (2023-11-14).
pub(crate) const TEST_NOW: u64 = 1_700_000_000;

pub(crate) fn test_now() -> u64 {
    TEST_NOW
}

pub(crate) fn zero_commit(amount: u64) -> PublicKey {
    let mut k = [0xc0u8; 32];
    k[..8].copy_from_slice(&amount.to_le_bytes());
    k
}

/// Insecure stand-in for the real primitives. Proof-of-work hashes are
/// zero, keys are valid unless all `0xff`, a ring signature is valid when
/// every member signs `(key_image, prefix_hash)` and RingCT proofs are valid
/// unless one of their blobs reads `bad`.
pub(crate) struct TestCrypto;

fn has_bad_proof(tx: &Transaction) -> bool {
    tx.rct_signatures
        .as_ref()
        .and_then(|rct| rct.prunable.as_ref())
        .is_some_and(|p| {
            p.ring_proofs.iter().any(|r| r.proof == b"bad")
                || p.range_proofs.iter().any(|r| r.proof == b"bad")
        })
}

impl CryptoOracle for TestCrypto {
    fn pow_hash(&self, _blob: &[u8], _major_version: u8, _height: u64, _seed_hash: &Hash) -> Hash {
        NULL_HASH
    }

    fn check_key(&self, key: &PublicKey) -> bool {
        *key != [0xff; 32]
    }

    fn check_ring_signature(
        &self,
        prefix_hash: &Hash,
        key_image: &KeyImage,
        ring: &[PublicKey],
        signatures: &[Signature],
    ) -> bool {
        signatures.len() == ring.len()
            && signatures.iter().all(|s| s.c == *key_image && s.r == *prefix_hash)
    }

    fn verify_rct_semantics(&self, tx: &Transaction) -> bool {
        !has_bad_proof(tx)
    }

    fn verify_rct_simple(&self, tx: &Transaction, _prefix_hash: &Hash, mix_ring: &[Vec<CtKey>]) -> bool {
        !has_bad_proof(tx) && mix_ring.len() == tx.vin.len()
    }

    fn verify_rct_full(&self, tx: &Transaction, _prefix_hash: &Hash, mix_ring: &[Vec<CtKey>]) -> bool {
        !has_bad_proof(tx) && mix_ring.len() == tx.vin.len()
    }

    fn generate_tx_keypair(&self) -> (PublicKey, SecretKey) {
        ([0x11; 32], [0x22; 32])
    }

    fn derive_output_key(
        &self,
        address: &AccountAddress,
        tx_secret_key: &SecretKey,
        output_index: usize,
    ) -> Option<(PublicKey, u8)> {
        let mut data = Vec::with_capacity(72);
        data.extend_from_slice(&address.spend_public_key);
        data.extend_from_slice(tx_secret_key);
        data.extend_from_slice(&(output_index as u64).to_le_bytes());
        let key = cn_fast_hash(&data);
        Some((key, key[0]))
    }

    fn zero_commit(&self, amount: u64) -> PublicKey {
        zero_commit(amount)
    }
}

/// Empty chain over an in-memory store with the given fork schedule.
pub(crate) fn test_inner(schedule: Vec<(u8, u64)>) -> ChainInner {
    ChainInner {
        db: Box::new(MemoryStorage::new(zero_commit)),
        hardfork: Box::new(HardForkSchedule::new(schedule)),
        checkpoints: Checkpoints::new(),
        crypto: Arc::new(TestCrypto),
        config: BlockchainConfig {
            verify_threads: Some(2),
            ..BlockchainConfig::default()
        },
        now: test_now,
        cancel: Arc::new(AtomicBool::new(false)),
        state: ChainState::new(1_000, None),
    }
}

/// Append a bare block straight into storage, bypassing validation.
/// `difficulty` is the block's own difficulty, added to the parent's
/// cumulative difficulty.
pub(crate) fn push_block(
    inner: &mut ChainInner,
    timestamp: u64,
    weight: u64,
    difficulty: u128,
    generated_coins: u64,
) -> Hash {
    push_block_with_txs(inner, timestamp, weight, difficulty, generated_coins, Vec::new())
}

/// Like [`push_block`], storing `txs` with the block.
pub(crate) fn push_block_with_txs(
    inner: &mut ChainInner,
    timestamp: u64,
    weight: u64,
    difficulty: u128,
    generated_coins: u64,
    txs: Vec<Transaction>,
) -> Hash {
    let height = inner.db.height();
    let major = inner.hardfork.ideal_version(height);
    let txs: Vec<(Transaction, Hash)> = txs
        .into_iter()
        .map(|tx| {
            let hash = tx.hash();
            (tx, hash)
        })
        .collect();
    let block = Block {
        major_version: major,
        minor_version: major,
        timestamp,
        prev_id: inner.db.top_block_hash(),
        nonce: height as u32,
        miner_tx: Transaction {
            version: 1,
            unlock_time: height + 60,
            vin: vec![TxIn::Gen { height }],
            ..Transaction::default()
        },
        tx_hashes: txs.iter().map(|(_, h)| *h).collect(),
    };
    let hash = block.hash();
    let info = StoredBlockInfo {
        hash,
        timestamp,
        weight,
        long_term_weight: weight,
        cumulative_difficulty: inner.top_cumulative_difficulty() + difficulty,
        generated_coins,
    };
    inner
        .db
        .add_block(&block, info, &txs)
        .expect("fixture block extends the tip");
    inner.hardfork.add(&block, height);
    hash
}
