//! Block header and body, encoding and identifiers.

use serde::{Deserialize, Serialize};

use crate::constants::NetworkConfig;
use crate::encoding::{write_varint, Cursor, ParseError};
use crate::hash::{cn_fast_hash, Hash, NULL_HASH};
use crate::transaction::Transaction;
use crate::tree_hash::tree_hash;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub major_version: u8,
    /// Hard-fork vote of the miner.
    pub minor_version: u8,
    pub timestamp: u64,
    pub prev_id: Hash,
    pub nonce: u32,
    pub miner_tx: Transaction,
    pub tx_hashes: Vec<Hash>,
}

impl Block {
    fn write_header(&self, buf: &mut Vec<u8>) {
        write_varint(buf, self.major_version as u64);
        write_varint(buf, self.minor_version as u64);
        write_varint(buf, self.timestamp);
        buf.extend_from_slice(&self.prev_id);
        buf.extend_from_slice(&self.nonce.to_le_bytes());
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(512);
        self.write_header(&mut buf);
        buf.extend_from_slice(&self.miner_tx.to_bytes());
        write_varint(&mut buf, self.tx_hashes.len() as u64);
        for h in &self.tx_hashes {
            buf.extend_from_slice(h);
        }
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ParseError> {
        let mut c = Cursor::new(data);
        let major_version = read_u8_varint(&mut c, "major version")?;
        let minor_version = read_u8_varint(&mut c, "minor version")?;
        let timestamp = c.read_varint()?;
        let prev_id = c.read_array32()?;
        let nonce = c.read_u32_le()?;
        let miner_tx = Transaction::read(&mut c)?;
        let n = c.read_count(32)?;
        let mut tx_hashes = Vec::with_capacity(n);
        for _ in 0..n {
            tx_hashes.push(c.read_array32()?);
        }
        c.finish()?;
        Ok(Self {
            major_version,
            minor_version,
            timestamp,
            prev_id,
            nonce,
            miner_tx,
            tx_hashes,
        })
    }

    /// Merkle root over the miner transaction and the listed transactions.
    pub fn tx_tree_hash(&self) -> Hash {
        let mut leaves = Vec::with_capacity(self.tx_hashes.len() + 1);
        leaves.push(self.miner_tx.hash());
        leaves.extend_from_slice(&self.tx_hashes);
        tree_hash(&leaves)
    }

    /// Header, Merkle root and transaction count: the input of both the
    /// block id and the proof-of-work hash.
    pub fn hashing_blob(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128);
        self.write_header(&mut buf);
        buf.extend_from_slice(&self.tx_tree_hash());
        write_varint(&mut buf, self.tx_hashes.len() as u64 + 1);
        buf
    }

    pub fn hash(&self) -> Hash {
        let blob = self.hashing_blob();
        let mut buf = Vec::with_capacity(blob.len() + 2);
        write_varint(&mut buf, blob.len() as u64);
        buf.extend_from_slice(&blob);
        cn_fast_hash(&buf)
    }

    /// Height claimed by the miner transaction's generation input.
    pub fn claimed_height(&self) -> Option<u64> {
        match self.miner_tx.vin.as_slice() {
            [crate::transaction::TxIn::Gen { height }] => Some(*height),
            _ => None,
        }
    }
}

fn read_u8_varint(c: &mut Cursor, what: &'static str) -> Result<u8, ParseError> {
    u8::try_from(c.read_varint()?).map_err(|_| ParseError::OutOfRange(what))
}

/// Build the genesis block of a network from its configured coinbase blob.
pub fn generate_genesis_block(config: &NetworkConfig) -> Result<Block, ParseError> {
    let blob = hex::decode(config.genesis_tx).map_err(|e| ParseError::InvalidHex(e.to_string()))?;
    let miner_tx = Transaction::from_bytes(&blob)?;
    Ok(Block {
        major_version: crate::constants::CURRENT_BLOCK_MAJOR_VERSION,
        minor_version: crate::constants::CURRENT_BLOCK_MINOR_VERSION,
        timestamp: 0,
        prev_id: NULL_HASH,
        nonce: config.genesis_nonce,
        miner_tx,
        tx_hashes: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{network_config, Network};

    #[test]
    fn test_genesis_block_layout() {
        let genesis = generate_genesis_block(network_config(Network::Mainnet)).unwrap();
        assert_eq!(genesis.claimed_height(), Some(0));
        assert_eq!(genesis.prev_id, NULL_HASH);
        let decoded = Block::from_bytes(&genesis.to_bytes()).unwrap();
        assert_eq!(decoded, genesis);
    }

    #[test]
    fn test_genesis_differs_by_nonce() {
        let main = generate_genesis_block(network_config(Network::Mainnet)).unwrap();
        let test = generate_genesis_block(network_config(Network::Testnet)).unwrap();
        assert_ne!(main.hash(), test.hash());
    }

    #[test]
    fn test_hash_commits_to_tx_list() {
        let mut block = generate_genesis_block(network_config(Network::Mainnet)).unwrap();
        let before = block.hash();
        block.tx_hashes.push([1u8; 32]);
        assert_ne!(before, block.hash());
        // tree root = hash(miner, tx)
        let mut pair = [0u8; 64];
        pair[..32].copy_from_slice(&block.miner_tx.hash());
        pair[32..].copy_from_slice(&[1u8; 32]);
        assert_eq!(block.tx_tree_hash(), cn_fast_hash(&pair));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let genesis = generate_genesis_block(network_config(Network::Mainnet)).unwrap();
        let mut blob = genesis.to_bytes();
        blob.push(0);
        assert_eq!(Block::from_bytes(&blob), Err(ParseError::TrailingBytes(1)));
    }
}
