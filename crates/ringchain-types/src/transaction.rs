//! Transaction data model, binary encoding, hashing and weight.
//!
//! A transaction is a prefix (version, unlock time, inputs, outputs, extra)
//! followed either by per-input ring signatures (version 1) or by a RingCT
//! bundle (version 2). The RingCT bundle is split into a base part that
//! is always kept and a prunable part carrying range proofs, ring proofs
//! and pseudo outputs; pruned copies drop the prunable part.

use serde::{Deserialize, Serialize};

use crate::constants::RctType;
use crate::encoding::{write_blob, write_varint, Cursor, ParseError};
use crate::hash::{cn_fast_hash, Hash, KeyImage, PublicKey, Signature, NULL_HASH};

// =============================================================================
// Wire tags
// =============================================================================

pub const TXIN_GEN_TAG: u8 = 0xff;
pub const TXIN_TO_KEY_TAG: u8 = 0x02;
pub const TXOUT_TO_KEY_TAG: u8 = 0x02;
pub const TXOUT_TO_TAGGED_KEY_TAG: u8 = 0x03;

pub const TX_EXTRA_TAG_PADDING: u8 = 0x00;
pub const TX_EXTRA_TAG_PUBKEY: u8 = 0x01;
pub const TX_EXTRA_NONCE: u8 = 0x02;

/// Largest extra nonce a miner may embed.
pub const TX_EXTRA_NONCE_MAX_COUNT: usize = 255;

/// Most outputs an aggregated bulletproof may cover.
pub const BULLETPROOF_MAX_OUTPUTS: usize = 16;

// =============================================================================
// Inputs and outputs
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxIn {
    /// Coinbase input carrying the height of the block it belongs to.
    Gen { height: u64 },
    /// Spend of one real output hidden among `key_offsets.len() - 1` decoys.
    /// Offsets are relative: the first is absolute, the rest are deltas.
    ToKey {
        amount: u64,
        key_offsets: Vec<u64>,
        key_image: KeyImage,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxOutTarget {
    ToKey { key: PublicKey },
    ToTaggedKey { key: PublicKey, view_tag: u8 },
}

impl TxOutTarget {
    pub fn key(&self) -> &PublicKey {
        match self {
            Self::ToKey { key } | Self::ToTaggedKey { key, .. } => key,
        }
    }

    pub fn is_tagged(&self) -> bool {
        matches!(self, Self::ToTaggedKey { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub amount: u64,
    pub target: TxOutTarget,
}

/// Public address a miner transaction pays to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AccountAddress {
    pub spend_public_key: PublicKey,
    pub view_public_key: PublicKey,
}

// =============================================================================
// RingCT
// =============================================================================

/// One range proof together with the commitments (`V`) it covers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RangeProof {
    pub commitments: Vec<PublicKey>,
    pub proof: Vec<u8>,
}

/// One MLSAG or CLSAG. `key_images` is the `II` vector an MLSAG claims;
/// CLSAGs leave it empty because their key images come from the inputs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RingProof {
    pub key_images: Vec<KeyImage>,
    pub proof: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RctPrunable {
    pub range_proofs: Vec<RangeProof>,
    pub ring_proofs: Vec<RingProof>,
    pub pseudo_outs: Vec<PublicKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RctSignatures {
    pub rct_type: RctType,
    pub txn_fee: u64,
    /// Encrypted amounts, one per output.
    pub ecdh_info: Vec<[u8; 8]>,
    /// Output commitments, one per output.
    pub out_pk: Vec<PublicKey>,
    /// `None` once the transaction has been pruned.
    pub prunable: Option<RctPrunable>,
}

impl RctSignatures {
    /// The empty bundle every version 2 miner transaction carries.
    pub fn null() -> Self {
        Self {
            rct_type: RctType::Null,
            txn_fee: 0,
            ecdh_info: Vec::new(),
            out_pk: Vec::new(),
            prunable: None,
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u8,
    pub unlock_time: u64,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub extra: Vec<u8>,
    /// Version 1 only: one ring of signatures per input.
    pub signatures: Vec<Vec<Signature>>,
    /// Version 2 only.
    pub rct_signatures: Option<RctSignatures>,
    /// Set when signatures or RingCT proofs have been stripped.
    #[serde(default)]
    pub pruned: bool,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            version: 1,
            unlock_time: 0,
            vin: Vec::new(),
            vout: Vec::new(),
            extra: Vec::new(),
            signatures: Vec::new(),
            rct_signatures: None,
            pruned: false,
        }
    }
}

impl Transaction {
    /// Exactly one generation input.
    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && matches!(self.vin[0], TxIn::Gen { .. })
    }

    pub fn rct_type(&self) -> RctType {
        self.rct_signatures
            .as_ref()
            .map(|rct| rct.rct_type)
            .unwrap_or(RctType::Null)
    }

    pub fn key_images(&self) -> impl Iterator<Item = &KeyImage> {
        self.vin.iter().filter_map(|input| match input {
            TxIn::ToKey { key_image, .. } => Some(key_image),
            TxIn::Gen { .. } => None,
        })
    }

    /// Sum of output amounts, `None` on overflow.
    pub fn outputs_amount(&self) -> Option<u64> {
        self.vout
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.amount))
    }

    /// Sum of input amounts, `None` on overflow.
    pub fn inputs_amount(&self) -> Option<u64> {
        self.vin.iter().try_fold(0u64, |acc, input| match input {
            TxIn::ToKey { amount, .. } => acc.checked_add(*amount),
            TxIn::Gen { .. } => Some(acc),
        })
    }

    /// Fee paid by the transaction: the RingCT fee field for version 2,
    /// inputs minus outputs for version 1. `None` if negative or overflowing.
    pub fn fee(&self) -> Option<u64> {
        if self.version >= 2 {
            return Some(self.rct_signatures.as_ref().map(|r| r.txn_fee).unwrap_or(0));
        }
        if self.is_coinbase() {
            return Some(0);
        }
        self.inputs_amount()?.checked_sub(self.outputs_amount()?)
    }

    // ─── Encoding ───────────────────────────────────────────────────────

    pub fn prefix_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        self.write_prefix(&mut buf);
        buf
    }

    fn write_prefix(&self, buf: &mut Vec<u8>) {
        write_varint(buf, self.version as u64);
        write_varint(buf, self.unlock_time);
        write_varint(buf, self.vin.len() as u64);
        for input in &self.vin {
            match input {
                TxIn::Gen { height } => {
                    buf.push(TXIN_GEN_TAG);
                    write_varint(buf, *height);
                }
                TxIn::ToKey { amount, key_offsets, key_image } => {
                    buf.push(TXIN_TO_KEY_TAG);
                    write_varint(buf, *amount);
                    write_varint(buf, key_offsets.len() as u64);
                    for offset in key_offsets {
                        write_varint(buf, *offset);
                    }
                    buf.extend_from_slice(key_image);
                }
            }
        }
        write_varint(buf, self.vout.len() as u64);
        for out in &self.vout {
            write_varint(buf, out.amount);
            match &out.target {
                TxOutTarget::ToKey { key } => {
                    buf.push(TXOUT_TO_KEY_TAG);
                    buf.extend_from_slice(key);
                }
                TxOutTarget::ToTaggedKey { key, view_tag } => {
                    buf.push(TXOUT_TO_TAGGED_KEY_TAG);
                    buf.extend_from_slice(key);
                    buf.push(*view_tag);
                }
            }
        }
        write_blob(buf, &self.extra);
    }

    fn rct_base_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let Some(rct) = &self.rct_signatures else {
            buf.push(RctType::Null as u8);
            return buf;
        };
        buf.push(rct.rct_type as u8);
        if rct.rct_type == RctType::Null {
            return buf;
        }
        write_varint(&mut buf, rct.txn_fee);
        for ecdh in &rct.ecdh_info {
            buf.extend_from_slice(ecdh);
        }
        for pk in &rct.out_pk {
            buf.extend_from_slice(pk);
        }
        buf
    }

    fn rct_prunable_bytes(prunable: &RctPrunable) -> Vec<u8> {
        let mut buf = Vec::new();
        write_varint(&mut buf, prunable.range_proofs.len() as u64);
        for rp in &prunable.range_proofs {
            write_varint(&mut buf, rp.commitments.len() as u64);
            for c in &rp.commitments {
                buf.extend_from_slice(c);
            }
            write_blob(&mut buf, &rp.proof);
        }
        write_varint(&mut buf, prunable.ring_proofs.len() as u64);
        for sig in &prunable.ring_proofs {
            write_varint(&mut buf, sig.key_images.len() as u64);
            for ki in &sig.key_images {
                buf.extend_from_slice(ki);
            }
            write_blob(&mut buf, &sig.proof);
        }
        write_varint(&mut buf, prunable.pseudo_outs.len() as u64);
        for p in &prunable.pseudo_outs {
            buf.extend_from_slice(p);
        }
        buf
    }

    /// Full encoding (or the pruned encoding for pruned transactions).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = self.prefix_bytes();
        if self.version == 1 {
            if !self.pruned {
                for ring in &self.signatures {
                    for sig in ring {
                        buf.extend_from_slice(&sig.c);
                        buf.extend_from_slice(&sig.r);
                    }
                }
            }
            return buf;
        }
        buf.extend_from_slice(&self.rct_base_bytes());
        if let Some(prunable) = self.rct_signatures.as_ref().and_then(|r| r.prunable.as_ref()) {
            buf.extend_from_slice(&Self::rct_prunable_bytes(prunable));
        }
        buf
    }

    /// Decode a transaction. A blob that ends right after the prefix
    /// (version 1 with ring inputs) or after the RingCT base (version 2)
    /// decodes as a pruned transaction.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let mut c = Cursor::new(data);
        let tx = Self::read(&mut c)?;
        c.finish()?;
        Ok(tx)
    }

    pub(crate) fn read(c: &mut Cursor) -> Result<Self, ParseError> {
        let version = c.read_varint()?;
        if version == 0 || version > 2 {
            return Err(ParseError::OutOfRange("transaction version"));
        }
        let version = version as u8;
        let unlock_time = c.read_varint()?;

        let vin_count = c.read_count(2)?;
        let mut vin = Vec::with_capacity(vin_count);
        for _ in 0..vin_count {
            match c.read_byte()? {
                TXIN_GEN_TAG => vin.push(TxIn::Gen { height: c.read_varint()? }),
                TXIN_TO_KEY_TAG => {
                    let amount = c.read_varint()?;
                    let n = c.read_count(1)?;
                    let mut key_offsets = Vec::with_capacity(n);
                    for _ in 0..n {
                        key_offsets.push(c.read_varint()?);
                    }
                    let key_image = c.read_array32()?;
                    vin.push(TxIn::ToKey { amount, key_offsets, key_image });
                }
                tag => return Err(ParseError::UnknownTag { kind: "input", tag }),
            }
        }

        let vout_count = c.read_count(34)?;
        let mut vout = Vec::with_capacity(vout_count);
        for _ in 0..vout_count {
            let amount = c.read_varint()?;
            let target = match c.read_byte()? {
                TXOUT_TO_KEY_TAG => TxOutTarget::ToKey { key: c.read_array32()? },
                TXOUT_TO_TAGGED_KEY_TAG => TxOutTarget::ToTaggedKey {
                    key: c.read_array32()?,
                    view_tag: c.read_byte()?,
                },
                tag => return Err(ParseError::UnknownTag { kind: "output", tag }),
            };
            vout.push(TxOut { amount, target });
        }
        let extra = c.read_blob()?;

        let mut tx = Transaction {
            version,
            unlock_time,
            vin,
            vout,
            extra,
            ..Default::default()
        };

        if version == 1 {
            let ring_sizes: Vec<usize> = tx
                .vin
                .iter()
                .map(|input| match input {
                    TxIn::ToKey { key_offsets, .. } => key_offsets.len(),
                    TxIn::Gen { .. } => 0,
                })
                .collect();
            if c.is_empty() && ring_sizes.iter().any(|&n| n > 0) {
                tx.pruned = true;
                return Ok(tx);
            }
            for n in ring_sizes {
                let mut ring = Vec::with_capacity(n);
                for _ in 0..n {
                    ring.push(Signature { c: c.read_array32()?, r: c.read_array32()? });
                }
                tx.signatures.push(ring);
            }
            return Ok(tx);
        }

        let rct_type = c.read_byte()?;
        let rct_type = RctType::from_u8(rct_type)
            .ok_or(ParseError::UnknownTag { kind: "ringct", tag: rct_type })?;
        if rct_type == RctType::Null {
            tx.rct_signatures = Some(RctSignatures::null());
            return Ok(tx);
        }
        let txn_fee = c.read_varint()?;
        let outputs = tx.vout.len();
        let mut ecdh_info = Vec::with_capacity(outputs);
        for _ in 0..outputs {
            let mut e = [0u8; 8];
            e.copy_from_slice(c.read_bytes(8)?);
            ecdh_info.push(e);
        }
        let mut out_pk = Vec::with_capacity(outputs);
        for _ in 0..outputs {
            out_pk.push(c.read_array32()?);
        }

        let prunable = if c.is_empty() {
            tx.pruned = true;
            None
        } else {
            Some(Self::read_prunable(c)?)
        };
        tx.rct_signatures = Some(RctSignatures { rct_type, txn_fee, ecdh_info, out_pk, prunable });
        Ok(tx)
    }

    fn read_prunable(c: &mut Cursor) -> Result<RctPrunable, ParseError> {
        let mut prunable = RctPrunable::default();
        let n = c.read_count(2)?;
        for _ in 0..n {
            let k = c.read_count(32)?;
            let mut commitments = Vec::with_capacity(k);
            for _ in 0..k {
                commitments.push(c.read_array32()?);
            }
            let proof = c.read_blob()?;
            prunable.range_proofs.push(RangeProof { commitments, proof });
        }
        let n = c.read_count(2)?;
        for _ in 0..n {
            let k = c.read_count(32)?;
            let mut key_images = Vec::with_capacity(k);
            for _ in 0..k {
                key_images.push(c.read_array32()?);
            }
            let proof = c.read_blob()?;
            prunable.ring_proofs.push(RingProof { key_images, proof });
        }
        let n = c.read_count(32)?;
        for _ in 0..n {
            prunable.pseudo_outs.push(c.read_array32()?);
        }
        Ok(prunable)
    }

    // ─── Hashes and weight ──────────────────────────────────────────────

    pub fn prefix_hash(&self) -> Hash {
        cn_fast_hash(&self.prefix_bytes())
    }

    /// Transaction id. Version 1 hashes the whole blob; version 2 hashes
    /// the concatenation of the prefix, RingCT base and prunable hashes.
    /// Pruned version 2 transactions hash their missing prunable part as
    /// the null hash, so their id must come from storage instead.
    pub fn hash(&self) -> Hash {
        if self.version == 1 {
            return cn_fast_hash(&self.to_bytes());
        }
        let mut parts = [0u8; 96];
        parts[..32].copy_from_slice(&self.prefix_hash());
        parts[32..64].copy_from_slice(&cn_fast_hash(&self.rct_base_bytes()));
        let prunable_hash = match &self.rct_signatures {
            Some(rct) if rct.rct_type != RctType::Null => rct
                .prunable
                .as_ref()
                .map(|p| cn_fast_hash(&Self::rct_prunable_bytes(p)))
                .unwrap_or(NULL_HASH),
            _ => NULL_HASH,
        };
        parts[64..].copy_from_slice(&prunable_hash);
        cn_fast_hash(&parts)
    }

    pub fn blob_size(&self) -> u64 {
        self.to_bytes().len() as u64
    }

    /// Consensus weight: the blob size, plus a clawback for transactions
    /// with more than two bulletproof outputs so aggregation is not
    /// rewarded with a weight discount.
    pub fn weight(&self) -> u64 {
        let blob_size = self.blob_size();
        if self.version < 2 || !self.rct_type().uses_bulletproofs() {
            return blob_size;
        }
        blob_size + bulletproof_clawback(self.rct_type(), self.vout.len())
    }
}

/// Weight a bulletproof transaction is charged beyond its blob size.
pub fn bulletproof_clawback(rct_type: RctType, n_outputs: usize) -> u64 {
    let mut n_padded = 1usize;
    while n_padded < n_outputs {
        n_padded <<= 1;
    }
    if n_padded <= 2 {
        return 0;
    }
    let fixed = if rct_type.is_bulletproof_plus() { 6 } else { 9 };
    let bp_base = (32 * (fixed + 7 * 2)) / 2;
    let nlr = n_padded.trailing_zeros() as u64 + 6;
    let bp_size = 32 * (fixed + 2 * nlr);
    (bp_base * n_padded as u64 - bp_size) * 4 / 5
}

// =============================================================================
// Output offsets
// =============================================================================

/// Convert relative key offsets (first absolute, rest deltas) to absolute
/// global output indices. `None` on overflow.
pub fn relative_output_offsets_to_absolute(offsets: &[u64]) -> Option<Vec<u64>> {
    let mut res = Vec::with_capacity(offsets.len());
    let mut acc = 0u64;
    for &o in offsets {
        acc = acc.checked_add(o)?;
        res.push(acc);
    }
    Some(res)
}

/// Inverse of [`relative_output_offsets_to_absolute`]; input must be sorted.
pub fn absolute_output_offsets_to_relative(offsets: &[u64]) -> Vec<u64> {
    let mut res = offsets.to_vec();
    for i in (1..res.len()).rev() {
        res[i] -= res[i - 1];
    }
    res
}

// =============================================================================
// Extra field
// =============================================================================

pub fn add_tx_pub_key_to_extra(extra: &mut Vec<u8>, tx_pub_key: &PublicKey) {
    extra.push(TX_EXTRA_TAG_PUBKEY);
    extra.extend_from_slice(tx_pub_key);
}

/// Append an extra nonce; fails when it exceeds one length byte.
pub fn add_extra_nonce_to_tx_extra(extra: &mut Vec<u8>, nonce: &[u8]) -> bool {
    if nonce.len() > TX_EXTRA_NONCE_MAX_COUNT {
        return false;
    }
    extra.push(TX_EXTRA_NONCE);
    extra.push(nonce.len() as u8);
    extra.extend_from_slice(nonce);
    true
}

/// First transaction public key found in an extra field.
pub fn tx_pub_key_from_extra(extra: &[u8]) -> Option<PublicKey> {
    let mut i = 0;
    while i < extra.len() {
        match extra[i] {
            TX_EXTRA_TAG_PUBKEY => {
                let key = extra.get(i + 1..i + 33)?;
                let mut out = [0u8; 32];
                out.copy_from_slice(key);
                return Some(out);
            }
            TX_EXTRA_NONCE => {
                let len = *extra.get(i + 1)? as usize;
                i += 2 + len;
            }
            _ => return None,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::network_config;
    use crate::constants::Network;

    fn sample_v1() -> Transaction {
        Transaction {
            version: 1,
            unlock_time: 0,
            vin: vec![TxIn::ToKey {
                amount: 5_000,
                key_offsets: vec![3, 4],
                key_image: [7u8; 32],
            }],
            vout: vec![TxOut { amount: 4_000, target: TxOutTarget::ToKey { key: [9u8; 32] } }],
            extra: vec![TX_EXTRA_TAG_PUBKEY; 1].into_iter().chain([1u8; 32]).collect(),
            signatures: vec![vec![Signature { c: [1; 32], r: [2; 32] }; 2]],
            rct_signatures: None,
            pruned: false,
        }
    }

    fn sample_v2(outputs: usize) -> Transaction {
        let vout = (0..outputs)
            .map(|i| TxOut {
                amount: 0,
                target: TxOutTarget::ToTaggedKey { key: [i as u8; 32], view_tag: i as u8 },
            })
            .collect();
        Transaction {
            version: 2,
            unlock_time: 0,
            vin: vec![TxIn::ToKey { amount: 0, key_offsets: vec![1; 16], key_image: [3; 32] }],
            vout,
            extra: Vec::new(),
            signatures: Vec::new(),
            rct_signatures: Some(RctSignatures {
                rct_type: RctType::BulletproofPlus,
                txn_fee: 30_000_000,
                ecdh_info: vec![[4u8; 8]; outputs],
                out_pk: vec![[5u8; 32]; outputs],
                prunable: Some(RctPrunable {
                    range_proofs: vec![RangeProof { commitments: vec![], proof: vec![6; 100] }],
                    ring_proofs: vec![RingProof { key_images: vec![], proof: vec![8; 64] }],
                    pseudo_outs: vec![[2; 32]],
                }),
            }),
            pruned: false,
        }
    }

    // ---- encoding ----

    #[test]
    fn test_genesis_tx_decodes() {
        let blob = hex::decode(network_config(Network::Mainnet).genesis_tx).unwrap();
        let tx = Transaction::from_bytes(&blob).unwrap();
        assert_eq!(tx.version, 1);
        assert_eq!(tx.unlock_time, 60);
        assert!(tx.is_coinbase());
        assert_eq!(tx.vout.len(), 1);
        assert_eq!(tx.vout[0].amount, 17_592_186_044_415);
        assert!(tx_pub_key_from_extra(&tx.extra).is_some());
        assert_eq!(tx.to_bytes(), blob);
    }

    #[test]
    fn test_v1_signatures_survive_encoding() {
        let tx = sample_v1();
        let decoded = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_v1_pruned_blob() {
        let tx = sample_v1();
        let decoded = Transaction::from_bytes(&tx.prefix_bytes()).unwrap();
        assert!(decoded.pruned);
        assert!(decoded.signatures.is_empty());
    }

    #[test]
    fn test_v2_pruned_keeps_base() {
        let mut tx = sample_v2(2);
        let full = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(full, tx);

        tx.rct_signatures.as_mut().unwrap().prunable = None;
        tx.pruned = true;
        let pruned = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert!(pruned.pruned);
        assert_eq!(pruned.rct_signatures.unwrap().txn_fee, 30_000_000);
    }

    #[test]
    fn test_unknown_input_tag() {
        let mut blob = sample_v1().to_bytes();
        blob[3] = 0x09;
        assert!(matches!(
            Transaction::from_bytes(&blob),
            Err(ParseError::UnknownTag { kind: "input", tag: 0x09 })
        ));
    }

    // ---- amounts and fee ----

    #[test]
    fn test_v1_fee_is_difference() {
        assert_eq!(sample_v1().fee(), Some(1_000));
        let mut tx = sample_v1();
        tx.vout[0].amount = 6_000;
        assert_eq!(tx.fee(), None);
    }

    #[test]
    fn test_v2_fee_from_rct() {
        assert_eq!(sample_v2(2).fee(), Some(30_000_000));
    }

    #[test]
    fn test_outputs_amount_overflow() {
        let mut tx = sample_v1();
        tx.vout.push(TxOut { amount: u64::MAX, target: TxOutTarget::ToKey { key: [0; 32] } });
        assert_eq!(tx.outputs_amount(), None);
    }

    // ---- hashing and weight ----

    #[test]
    fn test_v2_hash_changes_with_prunable() {
        let a = sample_v2(2);
        let mut b = a.clone();
        b.rct_signatures.as_mut().unwrap().prunable.as_mut().unwrap().pseudo_outs[0] = [9; 32];
        assert_eq!(a.prefix_hash(), b.prefix_hash());
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_weight_clawback_only_above_two_outputs() {
        let two = sample_v2(2);
        assert_eq!(two.weight(), two.blob_size());
        let four = sample_v2(4);
        assert!(four.weight() > four.blob_size());
        assert_eq!(bulletproof_clawback(RctType::BulletproofPlus, 2), 0);
        // 4 padded outputs, BP+: base 320, size 32*(6+16) = 704
        assert_eq!(bulletproof_clawback(RctType::BulletproofPlus, 4), (320 * 4 - 704) * 4 / 5);
    }

    // ---- offsets and extra ----

    #[test]
    fn test_offsets_conversion() {
        let rel = vec![10, 5, 1, 20];
        let abs = relative_output_offsets_to_absolute(&rel).unwrap();
        assert_eq!(abs, vec![10, 15, 16, 36]);
        assert_eq!(absolute_output_offsets_to_relative(&abs), rel);
        assert!(relative_output_offsets_to_absolute(&[u64::MAX, 1]).is_none());
    }

    #[test]
    fn test_extra_nonce_then_pubkey() {
        let mut extra = Vec::new();
        assert!(add_extra_nonce_to_tx_extra(&mut extra, b"pool"));
        add_tx_pub_key_to_extra(&mut extra, &[0x42; 32]);
        assert_eq!(tx_pub_key_from_extra(&extra), Some([0x42; 32]));
        assert!(!add_extra_nonce_to_tx_extra(&mut extra, &[0u8; 256]));
    }
}
