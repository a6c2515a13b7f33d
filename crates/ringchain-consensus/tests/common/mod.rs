//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use ringchain_consensus::crypto::{CryptoOracle, CtKey, SecretKey};
use ringchain_consensus::hardfork::HardForkSchedule;
use ringchain_consensus::mem_storage::MemoryStorage;
use ringchain_consensus::tx_pool::MemoryPool;
use ringchain_consensus::{Blockchain, BlockchainConfig};
use ringchain_types::{
    cn_fast_hash, AccountAddress, Block, Hash, KeyImage, Network, PublicKey, Signature, Transaction,
    TxIn, TxOut, TxOutTarget, NULL_HASH,
};

/// Wall clock seen by the engine (2023-11-14).
pub const NOW: u64 = 1_700_000_000;

pub fn now() -> u64 {
    NOW
}

pub fn zero_commit(amount: u64) -> PublicKey {
    let mut k = [0xc0u8; 32];
    k[..8].copy_from_slice(&amount.to_le_bytes());
    k
}

/// Deterministic primitives: every proof-of-work hash is zero and a ring
/// signature is valid when each member signs `(key_image, prefix_hash)`.
pub struct FakeCrypto;

impl CryptoOracle for FakeCrypto {
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

    fn verify_rct_semantics(&self, _tx: &Transaction) -> bool {
        true
    }

    fn verify_rct_simple(&self, tx: &Transaction, _prefix_hash: &Hash, mix_ring: &[Vec<CtKey>]) -> bool {
        mix_ring.len() == tx.vin.len()
    }

    fn verify_rct_full(&self, tx: &Transaction, _prefix_hash: &Hash, mix_ring: &[Vec<CtKey>]) -> bool {
        mix_ring.len() == tx.vin.len()
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

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn miner() -> AccountAddress {
    AccountAddress {
        spend_public_key: [9; 32],
        view_public_key: [8; 32],
    }
}

/// Fakechain engine at unit difficulty over `db`, not yet initialised.
pub fn engine_over(db: MemoryStorage) -> Blockchain {
    engine_with_forks(db, vec![(1, 0)])
}

/// Like [`engine_over`], following the `(version, height)` fork table.
pub fn engine_with_forks(db: MemoryStorage, forks: Vec<(u8, u64)>) -> Blockchain {
    let config = BlockchainConfig {
        network: Network::Fakechain,
        fixed_difficulty: Some(1),
        verify_threads: Some(1),
        ..BlockchainConfig::default()
    };
    Blockchain::new(
        Box::new(db),
        Box::new(MemoryPool::with_time_source(now)),
        Box::new(HardForkSchedule::new(forks)),
        Arc::new(FakeCrypto),
        config,
    )
    .with_time_source(now)
}

/// Initialised engine holding only the genesis block.
pub fn engine() -> Blockchain {
    init_logging();
    let chain = engine_over(MemoryStorage::new(zero_commit));
    chain.init().unwrap();
    chain
}

/// Template on top of `parent` (the main tip when `None`).
pub fn template(chain: &Blockchain, parent: Option<&Hash>, extra_nonce: &[u8]) -> Block {
    chain
        .create_block_template(&miner(), parent, extra_nonce)
        .unwrap()
        .block
}

/// Extend the main chain with `n` empty blocks.
pub fn mine(chain: &Blockchain, n: usize) -> Vec<Block> {
    (0..n)
        .map(|_| {
            let block = template(chain, None, &[]);
            let bvc = chain.add_new_block(&block).unwrap();
            assert!(bvc.added_to_main_chain, "{:?}", bvc);
            block
        })
        .collect()
}

/// One-input v1 transaction spending `amount` under `key_image`, signed
/// the way [`FakeCrypto`] accepts.
pub fn spend(amount: u64, key_image: u8, destination: u8) -> Transaction {
    let mut tx = Transaction {
        version: 1,
        vin: vec![TxIn::ToKey {
            amount,
            key_offsets: vec![0],
            key_image: [key_image; 32],
        }],
        vout: vec![TxOut {
            amount: amount / 2,
            target: TxOutTarget::ToKey { key: [destination; 32] },
        }],
        ..Transaction::default()
    };
    sign(&mut tx);
    tx
}

/// Re-sign every input of `tx` after its prefix changed.
pub fn sign(tx: &mut Transaction) {
    let prefix = tx.prefix_hash();
    tx.signatures = tx
        .vin
        .iter()
        .map(|input| match input {
            TxIn::ToKey { key_offsets, key_image, .. } => vec![
                Signature {
                    c: *key_image,
                    r: prefix,
                };
                key_offsets.len()
            ],
            _ => Vec::new(),
        })
        .collect();
}
