//! Hard-coded and externally loaded block checkpoints.
//!
//! A checkpoint pins the block hash (and optionally the cumulative
//! difficulty) at a height. Blocks at or below the highest checkpoint are in
//! the "checkpoint zone", where alternative blocks are refused.

use std::collections::BTreeMap;
use std::path::Path;

use ringchain_types::{hash_from_hex, hash_to_hex, Hash, Network, ParseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint at height {height} already exists with a different value")]
    Conflict { height: u64 },

    #[error("invalid checkpoint hash: {0}")]
    InvalidHash(#[from] ParseError),

    #[error("invalid checkpoint difficulty: {0}")]
    InvalidDifficulty(String),

    #[error("failed to read checkpoint file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse checkpoint file: {0}")]
    Json(#[from] serde_json::Error),
}

/// One line of a JSON checkpoint file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashLine {
    pub height: u64,
    pub hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HashFile {
    pub hashlines: Vec<HashLine>,
}

#[derive(Debug, Clone, Default)]
pub struct Checkpoints {
    points: BTreeMap<u64, Hash>,
    difficulty_points: BTreeMap<u64, u128>,
}

impl Checkpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in checkpoints for a network.
    pub fn for_network(network: Network) -> Self {
        let mut cp = Self::new();
        let table: &[(u64, &str, &str)] = match network {
            Network::Mainnet => MAINNET_CHECKPOINTS,
            Network::Testnet => TESTNET_CHECKPOINTS,
            Network::Stagenet => STAGENET_CHECKPOINTS,
            Network::Fakechain => &[],
        };
        for &(height, hash, difficulty) in table {
            if let Err(e) = cp.add_checkpoint_str(height, hash, difficulty) {
                log::error!("bad built-in checkpoint at {}: {}", height, e);
            }
        }
        cp
    }

    /// Add a checkpoint. Re-adding an identical one is a no-op; a different
    /// hash or difficulty at an existing height is an error.
    pub fn add_checkpoint(
        &mut self,
        height: u64,
        hash: Hash,
        difficulty: Option<u128>,
    ) -> Result<(), CheckpointError> {
        if self.points.get(&height).is_some_and(|h| *h != hash) {
            return Err(CheckpointError::Conflict { height });
        }
        if let Some(d) = difficulty {
            if self.difficulty_points.get(&height).is_some_and(|x| *x != d) {
                return Err(CheckpointError::Conflict { height });
            }
            self.difficulty_points.insert(height, d);
        }
        self.points.insert(height, hash);
        Ok(())
    }

    /// Add a checkpoint from hex strings; an empty difficulty string adds a
    /// hash-only checkpoint. Difficulties may be decimal or `0x` hex.
    pub fn add_checkpoint_str(
        &mut self,
        height: u64,
        hash_hex: &str,
        difficulty: &str,
    ) -> Result<(), CheckpointError> {
        let hash = hash_from_hex(hash_hex)?;
        let difficulty = match difficulty {
            "" => None,
            d => Some(parse_difficulty(d)?),
        };
        self.add_checkpoint(height, hash, difficulty)
    }

    pub fn is_in_checkpoint_zone(&self, height: u64) -> bool {
        self.points
            .last_key_value()
            .is_some_and(|(&max, _)| height <= max)
    }

    /// Check a block hash against the checkpoint at `height`. Returns
    /// `(passes, is_checkpoint)`.
    pub fn check_block(&self, height: u64, hash: &Hash) -> (bool, bool) {
        match self.points.get(&height) {
            None => (true, false),
            Some(expected) if expected == hash => {
                log::info!("checkpoint passed for height {} {}", height, hash_to_hex(hash));
                (true, true)
            }
            Some(expected) => {
                log::warn!(
                    "checkpoint failed for height {}: expected {}, got {}",
                    height,
                    hash_to_hex(expected),
                    hash_to_hex(hash)
                );
                (false, true)
            }
        }
    }

    /// Whether an alternative block at `block_height` may be accepted on a
    /// chain of `blockchain_height` blocks: it must lie above the last
    /// checkpoint at or below the chain height.
    pub fn is_alternative_block_allowed(&self, blockchain_height: u64, block_height: u64) -> bool {
        if block_height == 0 {
            return false;
        }
        match self.points.range(..=blockchain_height).next_back() {
            None => true,
            Some((&checkpoint_height, _)) => checkpoint_height < block_height,
        }
    }

    pub fn get_max_height(&self) -> u64 {
        self.points.last_key_value().map_or(0, |(&h, _)| h)
    }

    pub fn points(&self) -> &BTreeMap<u64, Hash> {
        &self.points
    }

    pub fn difficulty_points(&self) -> &BTreeMap<u64, u128> {
        &self.difficulty_points
    }

    /// Error if `other` pins a different hash at a height both sets share.
    pub fn check_for_conflicts(&self, other: &Checkpoints) -> Result<(), CheckpointError> {
        for (height, hash) in &other.points {
            if self.points.get(height).is_some_and(|h| h != hash) {
                return Err(CheckpointError::Conflict { height: *height });
            }
        }
        Ok(())
    }

    /// Load hash lines from a JSON document. Lines at or below the current
    /// highest checkpoint are ignored. Returns how many were added.
    pub fn load_from_json_str(&mut self, json: &str) -> Result<usize, CheckpointError> {
        let file: HashFile = serde_json::from_str(json)?;
        let prev_max = self.get_max_height();
        let mut added = 0;
        for line in file.hashlines {
            if line.height <= prev_max {
                log::debug!("ignoring checkpoint height {}", line.height);
                continue;
            }
            log::debug!("adding checkpoint height {}, hash={}", line.height, line.hash);
            self.add_checkpoint_str(line.height, &line.hash, "")?;
            added += 1;
        }
        Ok(added)
    }

    /// Load a JSON checkpoint file. A missing file is not an error.
    pub fn load_from_json(&mut self, path: &Path) -> Result<usize, CheckpointError> {
        if !path.exists() {
            log::debug!("blockchain checkpoints file not found");
            return Ok(0);
        }
        let text = std::fs::read_to_string(path)?;
        self.load_from_json_str(&text)
    }

    /// Load `"height:hash"` TXT records. Malformed records are skipped.
    pub fn load_from_dns_records<S: AsRef<str>>(
        &mut self,
        records: &[S],
    ) -> Result<usize, CheckpointError> {
        let mut added = 0;
        for record in records {
            let Some((height, hash)) = record.as_ref().split_once(':') else {
                continue;
            };
            let Ok(height) = height.trim().parse::<u64>() else {
                continue;
            };
            let Ok(hash) = hash_from_hex(hash.trim()) else {
                continue;
            };
            self.add_checkpoint(height, hash, None)?;
            added += 1;
        }
        Ok(added)
    }
}

fn parse_difficulty(s: &str) -> Result<u128, CheckpointError> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u128::from_str_radix(hex, 16),
        None => s.parse::<u128>(),
    };
    parsed.map_err(|_| CheckpointError::InvalidDifficulty(s.to_string()))
}

// =============================================================================
// Built-in tables
// =============================================================================

static MAINNET_CHECKPOINTS: &[(u64, &str, &str)] = &[
    (1, "771fbcd656ec1464d3a02ead5e18644030007a0fc664c0a964d30922821a8148", "0x2"),
    (10, "c0e3b387e47042f72d8ccdca88071ff96bff1ac7cde09ae113dbb7ad3fe92381", "0x2a974"),
    (100, "ac3e11ca545e57c49fca2b4e8c48c03c23be047c43e471e1394528b1f9f80b2d", "0x35d14b"),
    (1000, "5acfc45acffd2b2e7345caf42fa02308c5793f15ec33946e969e829f40b03876", "0x36a0373"),
    (10000, "c758b7c81f928be3295d45e230646de8b852ec96a821eac3fea4daf3fcac0ca2", "0x60a91390"),
    (22231, "7cb10e29d67e1c069e6e11b17d30b809724255fee2f6868dc14cfc6ed44dfb25", "0x1e288793d"),
    (29556, "53c484a8ed91e4da621bb2fa88106dbde426fe90d7ef07b9c1e5127fb6f3a7f6", "0x71f64cce8"),
    (50000, "0fe8758ab06a8b9cb35b7328fd4f757af530a5d37759f9d3e421023231f7b31c", "0x893044b400"),
    (80000, "a62dcd7b536f22e003ebae8726e9e7276f63d594e264b6f0cd7aab27b66e75e3", "0x5cc113f1076"),
    (202612, "bbd604d2ba11ba27935e006ed39c9bfdd99b76bf4a50654bc1e1e61217962698", "0x73310a259eb2"),
    (202613, "e2aa337e78df1f98f462b3b1e560c6b914dec47b610698b7b7d1e3e86b6197c2", "0x733154039b97"),
    (202614, "c29e3dc37d8da3e72e506e31a213a58771b24450144305bcba9e70fa4d6ea6fb", "0x73319dc90cb6"),
    (205000, "5d3d7a26e6dc7535e34f03def711daa8c263785f73ec1fadef8a45880fde8063", "0x75fcc3d85123"),
    (220000, "9613f455933c00e3e33ac315cc6b455ee8aa0c567163836858c2d9caff111553", "0x89cfed0cae3c"),
    (500000, "2428f0dbe49796be05ed81b347f53e1f7f44aed0abf641446ec2b94cae066b02", "0x188ce145e4ba9"),
    (1000000, "a886ef5149902d8342475fee9bb296341b891ac67c4842f47a833f23c00ed721", "0x2edd71370f0e5"),
    (1450000, "ac94e8860093bc7c83e4e91215cba1d663421ecf4067a0ae609c3a8b52bcfac2", "0x11a4aabdca9511"),
    (2046000, "5e867f0b8baefed9244a681df97fc885d8ab36c3dfcd24c7a3abf3b8ac8b8314", "0x9cb8b6ff2978c6"),
    (2661600, "41c9060e8426012238e8a26da26fcb90797436896cc70886a894c2c560bcccf2", "0x2e0d87526ff161f"),
    (3102800, "083f4a34f9490403b564286e7f13fd1ed45c52c86fa47195f151594e5bc87504", "0x4bbed52d4da5dfb"),
];

static TESTNET_CHECKPOINTS: &[(u64, &str, &str)] = &[
    (0, "48ca7cd3c8de5b6a4d53d2861fbdaedca141553559f9be9520068053cda8430b", "0x1"),
    (1000000, "46b690b710a07ea051bc4a6b6842ac37be691089c0f7758cfeec4d5fc0b4a258", "0x7aaad7153"),
    (1058600, "12904f6b4d9e60fd875674e07147d2c83d6716253f046af7b894c3e81da7e1bd", "0x971efd119"),
    (1450000, "87562ca6786f41556b8d5b48067303a57dc5ca77155b35199aedaeca1550f5a0", "0xa639e2930e"),
];

static STAGENET_CHECKPOINTS: &[(u64, &str, &str)] = &[
    (0, "76ee3cc98646292206cd3e86f74d88b4dcc1d937088645e9b0cbca84b7ce74eb", "0x1"),
    (10000, "1f8b0ce313f8b9ba9a46108bfd285c45ad7c2176871fd41c3a690d4830ce2fd5", "0x1d73ba"),
    (550000, "409f68cddd8e74b37469b41c1e61250d81c5776b42264f416d5d27c4626383ed", "0x5f3d4d03e"),
];
