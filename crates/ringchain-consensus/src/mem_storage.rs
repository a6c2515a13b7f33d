//! In-memory storage backend.
//!
//! Clones share the same underlying store, so a caller can hand one handle
//! to the engine and keep another for inspection. Batches are implemented
//! by snapshotting the whole store on `batch_start`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ringchain_types::{hash_to_hex, Block, Hash, KeyImage, PublicKey, Transaction, NULL_HASH};

use crate::error::StorageError;
use crate::storage::{AltBlockEntry, BlockchainStorage, OutputData, StoredBlockInfo};

/// Commitment recorded for outputs that carry a plain amount.
pub type ZeroCommitFn = fn(u64) -> PublicKey;

#[derive(Debug, Clone)]
struct StoredBlock {
    block: Block,
    info: StoredBlockInfo,
    tx_hashes: Vec<Hash>,
}

#[derive(Debug, Clone, Default)]
struct State {
    blocks: Vec<StoredBlock>,
    block_index: HashMap<Hash, u64>,
    txs: HashMap<Hash, (Transaction, u64)>,
    outputs: HashMap<u64, Vec<OutputData>>,
    key_images: HashSet<KeyImage>,
    alt_blocks: HashMap<Hash, AltBlockEntry>,
}

#[derive(Debug, Default)]
struct Inner {
    state: State,
    snapshot: Option<State>,
}

#[derive(Debug, Clone)]
pub struct MemoryStorage {
    inner: Arc<RwLock<Inner>>,
    zero_commit: ZeroCommitFn,
}

impl MemoryStorage {
    pub fn new(zero_commit: ZeroCommitFn) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            zero_commit,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a write batch is currently open.
    pub fn in_batch(&self) -> bool {
        self.read().snapshot.is_some()
    }

    fn outputs_of(&self, tx: &Transaction, height: u64) -> Vec<(u64, OutputData)> {
        let rct_out_pk = tx
            .rct_signatures
            .as_ref()
            .filter(|_| !tx.is_coinbase())
            .map(|rct| rct.out_pk.as_slice())
            .unwrap_or(&[]);
        tx.vout
            .iter()
            .enumerate()
            .map(|(i, out)| {
                let bucket = if tx.version > 1 { 0 } else { out.amount };
                let commitment = rct_out_pk
                    .get(i)
                    .copied()
                    .unwrap_or_else(|| (self.zero_commit)(out.amount));
                let data = OutputData {
                    pubkey: *out.target.key(),
                    commitment,
                    unlock_time: tx.unlock_time,
                    height,
                };
                (bucket, data)
            })
            .collect()
    }
}

impl BlockchainStorage for MemoryStorage {
    fn height(&self) -> u64 {
        self.read().state.blocks.len() as u64
    }

    fn top_block_hash(&self) -> Hash {
        self.read()
            .state
            .blocks
            .last()
            .map(|b| b.info.hash)
            .unwrap_or(NULL_HASH)
    }

    fn block_height(&self, hash: &Hash) -> Option<u64> {
        self.read().state.block_index.get(hash).copied()
    }

    fn block_hash_at(&self, height: u64) -> Option<Hash> {
        self.read()
            .state
            .blocks
            .get(height as usize)
            .map(|b| b.info.hash)
    }

    fn block_at(&self, height: u64) -> Option<Block> {
        self.read()
            .state
            .blocks
            .get(height as usize)
            .map(|b| b.block.clone())
    }

    fn block_info_at(&self, height: u64) -> Option<StoredBlockInfo> {
        self.read().state.blocks.get(height as usize).map(|b| b.info)
    }

    fn block_weights(&self, start: u64, count: u64) -> Vec<u64> {
        let inner = self.read();
        inner
            .state
            .blocks
            .iter()
            .skip(start as usize)
            .take(count as usize)
            .map(|b| b.info.weight)
            .collect()
    }

    fn long_term_block_weights(&self, start: u64, count: u64) -> Vec<u64> {
        let inner = self.read();
        inner
            .state
            .blocks
            .iter()
            .skip(start as usize)
            .take(count as usize)
            .map(|b| b.info.long_term_weight)
            .collect()
    }

    fn add_block(
        &mut self,
        block: &Block,
        info: StoredBlockInfo,
        txs: &[(Transaction, Hash)],
    ) -> Result<u64, StorageError> {
        let height = self.height();
        let expected_prev = self.top_block_hash();
        if block.prev_id != expected_prev {
            return Err(StorageError::Corrupt(format!(
                "block {} does not extend tip {}",
                hash_to_hex(&info.hash),
                hash_to_hex(&expected_prev)
            )));
        }

        let miner_hash = block.miner_tx.hash();
        let mut new_outputs = self.outputs_of(&block.miner_tx, height);
        for (tx, _) in txs {
            new_outputs.extend(self.outputs_of(tx, height));
        }

        let mut inner = self.write();
        let state = &mut inner.state;
        if state.block_index.contains_key(&info.hash) {
            return Err(StorageError::AlreadyExists(hash_to_hex(&info.hash)));
        }
        let mut seen = HashSet::new();
        for key_image in txs.iter().flat_map(|(tx, _)| tx.key_images()) {
            if state.key_images.contains(key_image) || !seen.insert(*key_image) {
                return Err(StorageError::AlreadyExists(format!(
                    "key image {}",
                    hash_to_hex(key_image)
                )));
            }
        }

        state.key_images.extend(seen);
        for (amount, data) in new_outputs {
            state.outputs.entry(amount).or_default().push(data);
        }
        state.txs.insert(miner_hash, (block.miner_tx.clone(), height));
        for (tx, hash) in txs {
            state.txs.insert(*hash, (tx.clone(), height));
        }
        state.block_index.insert(info.hash, height);
        state.blocks.push(StoredBlock {
            block: block.clone(),
            info,
            tx_hashes: txs.iter().map(|(_, h)| *h).collect(),
        });
        Ok(height + 1)
    }

    fn pop_block(&mut self) -> Result<(Block, Vec<Transaction>), StorageError> {
        let mut inner = self.write();
        let state = &mut inner.state;
        let stored = state
            .blocks
            .pop()
            .ok_or_else(|| StorageError::Corrupt("pop from empty chain".into()))?;
        state.block_index.remove(&stored.info.hash);

        let mut popped_txs = Vec::with_capacity(stored.tx_hashes.len());
        for hash in stored.tx_hashes.iter().rev() {
            let (tx, _) = state
                .txs
                .remove(hash)
                .ok_or_else(|| StorageError::Corrupt(format!("missing tx {}", hash_to_hex(hash))))?;
            for key_image in tx.key_images() {
                state.key_images.remove(key_image);
            }
            popped_txs.push(tx);
        }
        popped_txs.reverse();
        state.txs.remove(&stored.block.miner_tx.hash());

        let popped_height = state.blocks.len() as u64;
        for outputs in state.outputs.values_mut() {
            while outputs.last().is_some_and(|o| o.height == popped_height) {
                outputs.pop();
            }
        }
        state.outputs.retain(|_, v| !v.is_empty());

        Ok((stored.block, popped_txs))
    }

    fn correct_block_cumulative_difficulties(
        &mut self,
        start_height: u64,
        cumulative_difficulties: &[u128],
    ) -> Result<(), StorageError> {
        let mut inner = self.write();
        let blocks = &mut inner.state.blocks;
        let end = start_height as usize + cumulative_difficulties.len();
        if end > blocks.len() {
            return Err(StorageError::Corrupt(format!(
                "difficulty correction past tip: {} > {}",
                end,
                blocks.len()
            )));
        }
        for (block, &cd) in blocks[start_height as usize..end]
            .iter_mut()
            .zip(cumulative_difficulties)
        {
            block.info.cumulative_difficulty = cd;
        }
        Ok(())
    }

    fn tx_exists(&self, hash: &Hash) -> bool {
        self.read().state.txs.contains_key(hash)
    }

    fn get_tx(&self, hash: &Hash) -> Option<Transaction> {
        self.read().state.txs.get(hash).map(|(tx, _)| tx.clone())
    }

    fn tx_block_height(&self, hash: &Hash) -> Option<u64> {
        self.read().state.txs.get(hash).map(|(_, h)| *h)
    }

    fn has_key_image(&self, key_image: &KeyImage) -> bool {
        self.read().state.key_images.contains(key_image)
    }

    fn num_outputs(&self, amount: u64) -> u64 {
        self.read()
            .state
            .outputs
            .get(&amount)
            .map_or(0, |v| v.len() as u64)
    }

    fn get_output_keys(&self, amount: u64, indices: &[u64]) -> Option<Vec<OutputData>> {
        let inner = self.read();
        let bucket = inner.state.outputs.get(&amount)?;
        indices
            .iter()
            .map(|&i| bucket.get(usize::try_from(i).ok()?).copied())
            .collect()
    }

    fn add_alt_block(&mut self, hash: Hash, entry: AltBlockEntry) -> Result<(), StorageError> {
        let mut inner = self.write();
        if inner.state.alt_blocks.contains_key(&hash) {
            return Err(StorageError::AlreadyExists(hash_to_hex(&hash)));
        }
        inner.state.alt_blocks.insert(hash, entry);
        Ok(())
    }

    fn get_alt_block(&self, hash: &Hash) -> Option<AltBlockEntry> {
        self.read().state.alt_blocks.get(hash).cloned()
    }

    fn remove_alt_block(&mut self, hash: &Hash) -> Result<(), StorageError> {
        self.write().state.alt_blocks.remove(hash);
        Ok(())
    }

    fn alt_blocks(&self) -> Vec<(Hash, AltBlockEntry)> {
        self.read()
            .state
            .alt_blocks
            .iter()
            .map(|(h, e)| (*h, e.clone()))
            .collect()
    }

    fn alt_block_count(&self) -> usize {
        self.read().state.alt_blocks.len()
    }

    fn drop_alt_blocks(&mut self) {
        self.write().state.alt_blocks.clear();
    }

    fn batch_start(&mut self) -> bool {
        let mut inner = self.write();
        if inner.snapshot.is_some() {
            return false;
        }
        inner.snapshot = Some(inner.state.clone());
        true
    }

    fn batch_stop(&mut self) -> Result<(), StorageError> {
        let mut inner = self.write();
        match inner.snapshot.take() {
            Some(_) => Ok(()),
            None => Err(StorageError::Io("batch_stop without open batch".into())),
        }
    }

    fn batch_abort(&mut self) {
        let mut inner = self.write();
        if let Some(snapshot) = inner.snapshot.take() {
            inner.state = snapshot;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringchain_types::{TxIn, TxOut, TxOutTarget};

    fn zero_commit(amount: u64) -> PublicKey {
        let mut out = [0u8; 32];
        out[..8].copy_from_slice(&amount.to_le_bytes());
        out
    }

    fn coinbase(height: u64, key: u8) -> Transaction {
        Transaction {
            version: 1,
            unlock_time: height + 60,
            vin: vec![TxIn::Gen { height }],
            vout: vec![TxOut {
                amount: 1000,
                target: TxOutTarget::ToKey { key: [key; 32] },
            }],
            ..Default::default()
        }
    }

    fn block(prev: Hash, height: u64) -> Block {
        Block {
            major_version: 1,
            minor_version: 1,
            timestamp: height * 60,
            prev_id: prev,
            nonce: 0,
            miner_tx: coinbase(height, height as u8 + 1),
            tx_hashes: Vec::new(),
        }
    }

    fn info(b: &Block, cd: u128) -> StoredBlockInfo {
        StoredBlockInfo {
            hash: b.hash(),
            timestamp: b.timestamp,
            weight: 100,
            long_term_weight: 100,
            cumulative_difficulty: cd,
            generated_coins: 1000 * cd as u64,
        }
    }

    fn spend(key_image: u8) -> Transaction {
        Transaction {
            version: 1,
            vin: vec![TxIn::ToKey {
                amount: 1000,
                key_offsets: vec![0],
                key_image: [key_image; 32],
            }],
            vout: vec![TxOut {
                amount: 900,
                target: TxOutTarget::ToKey { key: [0xee; 32] },
            }],
            ..Default::default()
        }
    }

    // ---- append / pop ----

    #[test]
    fn test_add_and_pop_restores_state() {
        let mut store = MemoryStorage::new(zero_commit);
        let b0 = block(NULL_HASH, 0);
        assert_eq!(store.add_block(&b0, info(&b0, 1), &[]).unwrap(), 1);
        let mut b1 = block(b0.hash(), 1);
        let tx = spend(7);
        let tx_hash = tx.hash();
        b1.tx_hashes.push(tx_hash);
        store.add_block(&b1, info(&b1, 2), &[(tx.clone(), tx_hash)]).unwrap();

        assert_eq!(store.height(), 2);
        assert!(store.has_key_image(&[7; 32]));
        assert_eq!(store.num_outputs(1000), 2);
        assert_eq!(store.num_outputs(900), 1);
        assert_eq!(store.tx_block_height(&tx_hash), Some(1));

        let (popped, txs) = store.pop_block().unwrap();
        assert_eq!(popped, b1);
        assert_eq!(txs, vec![tx]);
        assert_eq!(store.height(), 1);
        assert!(!store.has_key_image(&[7; 32]));
        assert_eq!(store.num_outputs(1000), 1);
        assert_eq!(store.num_outputs(900), 0);
        assert_eq!(store.top_block_hash(), b0.hash());
    }

    #[test]
    fn test_rejects_non_extending_block() {
        let mut store = MemoryStorage::new(zero_commit);
        let b0 = block(NULL_HASH, 0);
        store.add_block(&b0, info(&b0, 1), &[]).unwrap();
        let orphan = block([9; 32], 1);
        assert!(matches!(
            store.add_block(&orphan, info(&orphan, 2), &[]),
            Err(StorageError::Corrupt(_))
        ));
    }

    #[test]
    fn test_duplicate_key_image_rejected() {
        let mut store = MemoryStorage::new(zero_commit);
        let b0 = block(NULL_HASH, 0);
        store.add_block(&b0, info(&b0, 1), &[]).unwrap();
        let tx = spend(3);
        let mut tx2 = spend(3);
        tx2.vout[0].amount = 800;
        let b1 = block(b0.hash(), 1);
        let res = store.add_block(
            &b1,
            info(&b1, 2),
            &[(tx.clone(), tx.hash()), (tx2.clone(), tx2.hash())],
        );
        assert!(matches!(res, Err(StorageError::AlreadyExists(_))));
        assert_eq!(store.height(), 1);
    }

    // ---- outputs ----

    #[test]
    fn test_output_lookup_uses_zero_commitment() {
        let mut store = MemoryStorage::new(zero_commit);
        let b0 = block(NULL_HASH, 0);
        store.add_block(&b0, info(&b0, 1), &[]).unwrap();
        let outs = store.get_output_keys(1000, &[0]).unwrap();
        assert_eq!(outs[0].pubkey, [1; 32]);
        assert_eq!(outs[0].commitment, zero_commit(1000));
        assert_eq!(outs[0].unlock_time, 60);
        assert!(store.get_output_keys(1000, &[0, 1]).is_none());
    }

    // ---- batches ----

    #[test]
    fn test_batch_abort_discards_writes() {
        let mut store = MemoryStorage::new(zero_commit);
        let b0 = block(NULL_HASH, 0);
        store.add_block(&b0, info(&b0, 1), &[]).unwrap();
        assert!(store.batch_start());
        assert!(!store.batch_start());
        let b1 = block(b0.hash(), 1);
        store.add_block(&b1, info(&b1, 2), &[]).unwrap();
        store.batch_abort();
        assert_eq!(store.height(), 1);
        assert!(!store.in_batch());
    }

    #[test]
    fn test_clones_share_state() {
        let mut store = MemoryStorage::new(zero_commit);
        let view = store.clone();
        let b0 = block(NULL_HASH, 0);
        store.add_block(&b0, info(&b0, 1), &[]).unwrap();
        assert_eq!(view.height(), 1);
    }

    #[test]
    fn test_difficulty_correction() {
        let mut store = MemoryStorage::new(zero_commit);
        let b0 = block(NULL_HASH, 0);
        store.add_block(&b0, info(&b0, 1), &[]).unwrap();
        store.correct_block_cumulative_difficulties(0, &[5]).unwrap();
        assert_eq!(store.block_info_at(0).unwrap().cumulative_difficulty, 5);
        assert!(store.correct_block_cumulative_difficulties(0, &[5, 6]).is_err());
    }
}
