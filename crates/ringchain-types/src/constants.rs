//! Network identifiers, hard-fork feature gates and per-network tables.

use serde::{Deserialize, Serialize};

// =============================================================================
// Network Types
// =============================================================================

/// Network type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Stagenet,
    /// Local regression network with caller-supplied rules.
    Fakechain,
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mainnet   => write!(f, "mainnet"),
            Self::Testnet   => write!(f, "testnet"),
            Self::Stagenet  => write!(f, "stagenet"),
            Self::Fakechain => write!(f, "fakechain"),
        }
    }
}

// =============================================================================
// RingCT Types
// =============================================================================

/// RingCT signature type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RctType {
    Null            = 0,
    Full            = 1,
    Simple          = 2,
    Bulletproof     = 3,
    Bulletproof2    = 4,
    Clsag           = 5,
    BulletproofPlus = 6,
}

impl RctType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Null),
            1 => Some(Self::Full),
            2 => Some(Self::Simple),
            3 => Some(Self::Bulletproof),
            4 => Some(Self::Bulletproof2),
            5 => Some(Self::Clsag),
            6 => Some(Self::BulletproofPlus),
            _ => None,
        }
    }

    /// Borromean range proofs (the two original RingCT layouts).
    pub fn is_borromean(self) -> bool {
        matches!(self, Self::Full | Self::Simple)
    }

    /// Original (non-plus) bulletproof range proofs.
    pub fn is_bulletproof(self) -> bool {
        matches!(self, Self::Bulletproof | Self::Bulletproof2 | Self::Clsag)
    }

    pub fn is_bulletproof_plus(self) -> bool {
        self == Self::BulletproofPlus
    }

    /// Any layout whose range proofs are aggregated bulletproofs.
    pub fn uses_bulletproofs(self) -> bool {
        self.is_bulletproof() || self.is_bulletproof_plus()
    }
}

// =============================================================================
// Transaction Versions
// =============================================================================

/// Pre-RingCT transaction version.
pub const TRANSACTION_VERSION_1: u8 = 1;

/// RingCT transaction version.
pub const TRANSACTION_VERSION_2: u8 = 2;

pub const CURRENT_TRANSACTION_VERSION: u8 = TRANSACTION_VERSION_2;

pub const CURRENT_BLOCK_MAJOR_VERSION: u8 = 1;
pub const CURRENT_BLOCK_MINOR_VERSION: u8 = 0;

// =============================================================================
// Hard Fork Versions
// =============================================================================

/// Hard fork version constants for feature gating.
pub struct HfVersion;

impl HfVersion {
    pub const DYNAMIC_FEE: u8 = 4;
    pub const MIN_MIXIN_4: u8 = 6;
    pub const ENFORCE_RCT: u8 = 6;
    pub const MIN_MIXIN_6: u8 = 7;
    pub const SORTED_KEY_IMAGES: u8 = 7;
    pub const MIN_MIXIN_10: u8 = 8;
    pub const PER_BYTE_FEE: u8 = 8;
    pub const BULLETPROOFS: u8 = 8;
    pub const SMALLER_BP: u8 = 10;
    pub const LONG_TERM_BLOCK_WEIGHT: u8 = 10;
    pub const MIN_V2_COINBASE_TX: u8 = 12;
    pub const SAME_MIXIN: u8 = 12;
    pub const REJECT_SIGS_IN_COINBASE: u8 = 12;
    pub const ENFORCE_MIN_AGE: u8 = 12;
    pub const EFFECTIVE_SHORT_TERM_MEDIAN_IN_PENALTY: u8 = 12;
    pub const EXACT_COINBASE: u8 = 12;
    pub const MIN_2_OUTPUTS: u8 = 12;
    pub const RANDOMX: u8 = 12;
    pub const CLSAG: u8 = 13;
    pub const DETERMINISTIC_UNLOCK_TIME: u8 = 13;
    pub const MIN_MIXIN_15: u8 = 15;
    pub const BULLETPROOF_PLUS: u8 = 15;
    pub const VIEW_TAGS: u8 = 15;
    pub const SCALING_2021: u8 = 15;
}

// =============================================================================
// Network Configuration
// =============================================================================

/// Hard fork height mapping: version → activation height.
pub type HardForkHeights = &'static [(u8, u64)];

/// Network-specific configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network: Network,
    pub genesis_nonce: u32,
    pub genesis_tx: &'static str,
    pub hard_fork_heights: HardForkHeights,
}

static MAINNET_HF_HEIGHTS: [(u8, u64); 16] = [
    (1, 1),
    (2, 1_009_827),
    (3, 1_141_317),
    (4, 1_220_516),
    (5, 1_288_616),
    (6, 1_400_000),
    (7, 1_546_000),
    (8, 1_685_555),
    (9, 1_686_275),
    (10, 1_788_000),
    (11, 1_788_720),
    (12, 1_978_433),
    (13, 2_210_000),
    (14, 2_210_720),
    (15, 2_688_888),
    (16, 2_689_608),
];

static TESTNET_HF_HEIGHTS: [(u8, u64); 16] = [
    (1, 1),
    (2, 624_634),
    (3, 800_500),
    (4, 801_219),
    (5, 802_660),
    (6, 971_400),
    (7, 1_057_027),
    (8, 1_057_058),
    (9, 1_057_778),
    (10, 1_154_318),
    (11, 1_155_038),
    (12, 1_308_737),
    (13, 1_543_939),
    (14, 1_544_659),
    (15, 1_982_800),
    (16, 1_983_520),
];

static STAGENET_HF_HEIGHTS: [(u8, u64); 16] = [
    (1, 1),
    (2, 32_000),
    (3, 33_000),
    (4, 34_000),
    (5, 35_000),
    (6, 36_000),
    (7, 37_000),
    (8, 176_456),
    (9, 177_176),
    (10, 269_000),
    (11, 269_720),
    (12, 454_721),
    (13, 675_405),
    (14, 676_125),
    (15, 1_151_000),
    (16, 1_151_720),
];

// Fakechain runs version 1 rules unless the caller supplies its own schedule.
static FAKECHAIN_HF_HEIGHTS: [(u8, u64); 1] = [(1, 0)];

const GENESIS_TX: &str = "013c01ff0001ffffffffffff03029b2e4c0281c0b02e7c53291a94d1d0cbff8883f8024f5142ee494ffbbd08807121017767aafcde9be00dcfd098715ebcf7f410daebc582fda69d24a28e9d0bc890d1";

pub static MAINNET_CONFIG: NetworkConfig = NetworkConfig {
    network: Network::Mainnet,
    genesis_nonce: 10000,
    genesis_tx: GENESIS_TX,
    hard_fork_heights: &MAINNET_HF_HEIGHTS,
};

pub static TESTNET_CONFIG: NetworkConfig = NetworkConfig {
    network: Network::Testnet,
    genesis_nonce: 10001,
    genesis_tx: GENESIS_TX,
    hard_fork_heights: &TESTNET_HF_HEIGHTS,
};

pub static STAGENET_CONFIG: NetworkConfig = NetworkConfig {
    network: Network::Stagenet,
    genesis_nonce: 10002,
    genesis_tx: GENESIS_TX,
    hard_fork_heights: &STAGENET_HF_HEIGHTS,
};

pub static FAKECHAIN_CONFIG: NetworkConfig = NetworkConfig {
    network: Network::Fakechain,
    genesis_nonce: 10000,
    genesis_tx: GENESIS_TX,
    hard_fork_heights: &FAKECHAIN_HF_HEIGHTS,
};

/// Get the network configuration for a given network.
pub fn network_config(network: Network) -> &'static NetworkConfig {
    match network {
        Network::Mainnet   => &MAINNET_CONFIG,
        Network::Testnet   => &TESTNET_CONFIG,
        Network::Stagenet  => &STAGENET_CONFIG,
        Network::Fakechain => &FAKECHAIN_CONFIG,
    }
}

// =============================================================================
// Amount Helpers
// =============================================================================

/// Atomic units per coin (10^12).
pub const COIN: u64 = 1_000_000_000_000;

/// Number of decimal places for display.
pub const DISPLAY_DECIMAL_POINT: u32 = 12;

/// Format an atomic amount as a human-readable string (e.g., 1.5).
pub fn format_amount(atomic: u64) -> String {
    let whole = atomic / COIN;
    let frac = atomic % COIN;
    if frac == 0 {
        format!("{}.0", whole)
    } else {
        let frac_str = format!("{:012}", frac);
        let trimmed = frac_str.trim_end_matches('0');
        format!("{}.{}", whole, trimmed)
    }
}
