//! Transaction checks that read the chain.
//!
//! Outputs are checked against the rules of the current version. Inputs are
//! resolved to their ring members (from the batch scan table when
//! prevalidation already fetched them, otherwise from storage), checked for
//! double spends and unlock times, and their spend proofs verified: ring
//! signatures for version 1, RingCT for version 2.

use ringchain_types::consensus::DEFAULT_TX_SPENDABLE_AGE;
use ringchain_types::transaction::relative_output_offsets_to_absolute;
use ringchain_types::{hash_to_hex, Hash, HfVersion, KeyImage, PublicKey, RctType, Signature, Transaction, TxIn};

use crate::chain_state::ChainInner;
use crate::crypto::{CryptoOracle, CtKey};
use crate::storage::OutputData;
use crate::tx_pool::max_tx_version;
use crate::validation::{self, ValidationError};
use crate::verification::TxVerificationContext;

/// One version 1 input ready for ring signature verification.
struct RingSignatureJob<'a> {
    key_image: &'a KeyImage,
    ring: Vec<PublicKey>,
    signatures: &'a [Signature],
}

impl ChainInner {
    // -------------------------------------------------------------------------
    // Outputs
    // -------------------------------------------------------------------------

    /// Output rules of a non-miner transaction at the current version.
    pub(crate) fn check_tx_outputs(
        &self,
        tx: &Transaction,
        tx_hash: &Hash,
        tvc: &mut TxVerificationContext,
    ) -> bool {
        let hf_version = self.current_version();
        let crypto = &self.crypto;
        match validation::check_tx_outputs(tx, tx_hash, hf_version, |k| crypto.check_key(k)) {
            Ok(()) => true,
            Err(e) => {
                log::error!("transaction {}: {}", hash_to_hex(tx_hash), e);
                tvc.fail().invalid_output = true;
                false
            }
        }
    }

    /// Chain-independent checks a transaction must pass before it enters
    /// the pool or a block.
    pub(crate) fn check_tx_semantics(
        &self,
        tx: &Transaction,
        tx_hash: &Hash,
        tvc: &mut TxVerificationContext,
    ) -> bool {
        let hf_version = self.current_version();
        if tx.version == 0 || tx.version > max_tx_version(hf_version) {
            log::debug!("transaction version {} not accepted at v{}", tx.version, hf_version);
            tvc.fail().version_mismatch = true;
            return false;
        }
        if !self.check_tx_outputs(tx, tx_hash, tvc) {
            return false;
        }
        if tx.version >= 2 && !tx.pruned && !self.crypto.verify_rct_semantics(tx) {
            log::error!("transaction {} failed RingCT semantics", hash_to_hex(tx_hash));
            tvc.fail();
            return false;
        }
        true
    }

    // -------------------------------------------------------------------------
    // Inputs
    // -------------------------------------------------------------------------

    /// Ring members of one input. Entries the scan table holds are used as
    /// they are; the rest come from storage. `None` when any member does
    /// not exist.
    fn ring_members(
        &self,
        prefix_hash: &Hash,
        amount: u64,
        key_offsets: &[u64],
        key_image: &KeyImage,
    ) -> Option<Vec<OutputData>> {
        let absolute = relative_output_offsets_to_absolute(key_offsets)?;
        let mut outputs = self
            .state
            .scan_table
            .get(prefix_hash)
            .and_then(|by_key_image| by_key_image.get(key_image))
            .cloned()
            .unwrap_or_default();
        outputs.truncate(absolute.len());
        if outputs.len() < absolute.len() {
            log::trace!("additional outputs needed: {}", absolute.len() - outputs.len());
            outputs.extend(self.db.get_output_keys(amount, &absolute[outputs.len()..])?);
        }
        (outputs.len() == absolute.len()).then_some(outputs)
    }

    /// Check every input of `tx` against the chain and verify its spend
    /// proofs. On success returns the highest block height among the
    /// outputs it references (zero for pruned transactions, which are only
    /// accepted below the hash-of-hashes list).
    pub(crate) fn check_tx_inputs(
        &self,
        tx: &Transaction,
        tvc: &mut TxVerificationContext,
    ) -> Option<u64> {
        if tx.pruned {
            return Some(0);
        }
        let prefix_hash = tx.prefix_hash();
        let hf_version = self.current_version();
        let reject = |tvc: &mut TxVerificationContext, e: ValidationError| {
            log::error!("transaction {}: {}", hash_to_hex(&tx.hash()), e);
            if e.is_mixin() {
                tvc.low_mixin = true;
            }
            tvc.fail();
        };

        if let Err(e) = validation::check_output_count(tx, hf_version)
            .and_then(|()| validation::check_mixin(tx, hf_version, |amount| self.db.num_outputs(amount)))
            .and_then(|()| validation::check_key_images_sorted(tx, hf_version))
        {
            reject(tvc, e);
            return None;
        }

        let mut rings: Vec<Vec<CtKey>> = Vec::with_capacity(tx.vin.len());
        let mut max_used_height = 0u64;
        for (index, input) in tx.vin.iter().enumerate() {
            let TxIn::ToKey { amount, key_offsets, key_image } = input else {
                log::error!("wrong input type in transaction {}", hash_to_hex(&tx.hash()));
                tvc.fail().invalid_input = true;
                return None;
            };
            if key_offsets.is_empty() {
                log::error!("empty key offsets in transaction {}", hash_to_hex(&tx.hash()));
                tvc.fail().invalid_input = true;
                return None;
            }
            if self.db.has_key_image(key_image) {
                log::error!("key image already spent in blockchain: {}", hash_to_hex(key_image));
                tvc.fail().double_spend = true;
                return None;
            }
            if tx.version == 1 && index >= tx.signatures.len() {
                log::error!("no signature entry for input {}", index);
                tvc.fail().invalid_input = true;
                return None;
            }

            let Some(outputs) = self.ring_members(&prefix_hash, *amount, key_offsets, key_image) else {
                log::error!(
                    "output does not exist: amount {}, {} offsets",
                    amount,
                    key_offsets.len()
                );
                tvc.fail().invalid_input = true;
                return None;
            };
            if let Some(locked) = outputs
                .iter()
                .find(|o| !self.is_tx_spendtime_unlocked(o.unlock_time, hf_version))
            {
                log::error!("ring member of input {} is locked until {}", index, locked.unlock_time);
                tvc.fail().invalid_input = true;
                return None;
            }
            if let Some(newest) = outputs.last() {
                max_used_height = max_used_height.max(newest.height);
            }
            if tx.version == 1 && tx.signatures[index].len() != outputs.len() {
                log::error!(
                    "input {} has {} signatures for {} ring members",
                    index,
                    tx.signatures[index].len(),
                    outputs.len()
                );
                tvc.fail().invalid_input = true;
                return None;
            }
            rings.push(
                outputs
                    .iter()
                    .map(|o| CtKey { dest: o.pubkey, mask: o.commitment })
                    .collect(),
            );
        }

        if hf_version >= HfVersion::ENFORCE_MIN_AGE
            && max_used_height + DEFAULT_TX_SPENDABLE_AGE > self.db.height()
        {
            log::error!(
                "transaction {} spends an output that is too young (height {})",
                hash_to_hex(&tx.hash()),
                max_used_height
            );
            tvc.fail().invalid_input = true;
            return None;
        }

        let verified = if tx.version == 1 {
            self.verify_ring_signatures(tx, &prefix_hash, &rings)
        } else {
            self.verify_rct(tx, &prefix_hash, &rings, hf_version)
        };
        if !verified {
            log::error!("failed to check signatures of transaction {}", hash_to_hex(&tx.hash()));
            tvc.fail().invalid_input = true;
            return None;
        }
        Some(max_used_height)
    }

    // -------------------------------------------------------------------------
    // Spend proofs
    // -------------------------------------------------------------------------

    /// Version 1 ring signatures, split across the verify threads.
    fn verify_ring_signatures(&self, tx: &Transaction, prefix_hash: &Hash, rings: &[Vec<CtKey>]) -> bool {
        let jobs: Vec<RingSignatureJob<'_>> = tx
            .key_images()
            .zip(rings)
            .zip(&tx.signatures)
            .map(|((key_image, ring), signatures)| RingSignatureJob {
                key_image,
                ring: ring.iter().map(|k| k.dest).collect(),
                signatures,
            })
            .collect();
        if jobs.len() != tx.vin.len() {
            return false;
        }

        let crypto: &dyn CryptoOracle = &*self.crypto;
        let check = |job: &RingSignatureJob<'_>| {
            crypto.check_ring_signature(prefix_hash, job.key_image, &job.ring, job.signatures)
        };
        let threads = self.config.verify_threads().min(jobs.len());
        if threads <= 1 {
            return jobs.iter().all(check);
        }

        let chunk = jobs.len().div_ceil(threads);
        std::thread::scope(|s| {
            let handles: Vec<_> = jobs
                .chunks(chunk)
                .map(|part| s.spawn(move || part.iter().all(check)))
                .collect();
            let results: Vec<bool> = handles
                .into_iter()
                .map(|h| h.join().unwrap_or(false))
                .collect();
            results.into_iter().all(|ok| ok)
        })
    }

    /// RingCT proofs, dispatched by type.
    fn verify_rct(
        &self,
        tx: &Transaction,
        prefix_hash: &Hash,
        rings: &[Vec<CtKey>],
        hf_version: u8,
    ) -> bool {
        let Some(rct) = tx.rct_signatures.as_ref() else {
            log::error!("version 2 transaction without RingCT signatures");
            return false;
        };
        let Some(prunable) = rct.prunable.as_ref() else {
            log::error!("RingCT proofs missing from unpruned transaction");
            return false;
        };

        match rct.rct_type {
            RctType::Null => {
                log::error!("null RingCT signature on non-coinbase transaction");
                return false;
            }
            RctType::Simple
            | RctType::Bulletproof
            | RctType::Bulletproof2
            | RctType::Clsag
            | RctType::BulletproofPlus => {
                if !self.crypto.verify_rct_simple(tx, prefix_hash, rings) {
                    log::error!("failed to check RingCT signatures");
                    return false;
                }
            }
            RctType::Full => {
                let [mlsag] = prunable.ring_proofs.as_slice() else {
                    log::error!("full RingCT needs exactly one MLSAG, got {}", prunable.ring_proofs.len());
                    return false;
                };
                if mlsag.key_images.len() != tx.vin.len()
                    || tx.key_images().zip(&mlsag.key_images).any(|(a, b)| a != b)
                {
                    log::error!("MLSAG key images do not match the inputs");
                    return false;
                }
                if !self.crypto.verify_rct_full(tx, prefix_hash, rings) {
                    log::error!("failed to check RingCT signatures");
                    return false;
                }
            }
        }

        if rct.rct_type.is_bulletproof()
            && hf_version < HfVersion::BULLETPROOFS
            && prunable.range_proofs.iter().any(|p| p.commitments.len() > 1)
        {
            log::error!("multi output bulletproofs are invalid before v{}", HfVersion::BULLETPROOFS);
            return false;
        }
        true
    }
}
