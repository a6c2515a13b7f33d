//! Consensus constants and pure consensus arithmetic.
//!
//! Block reward and its weight penalty, difficulty retargeting, the
//! proof-of-work target check, medians, dynamic fee formulas, amount
//! decomposition and the proof-of-work seed-height schedule. Everything
//! here is a pure function of its arguments; the stateful wrappers live
//! in the engine crate.

use crate::constants::{network_config, Network};

// =============================================================================
// Core Constants
// =============================================================================

/// Total money supply in atomic units.
pub const MONEY_SUPPLY: u64 = u64::MAX;

pub const EMISSION_SPEED_FACTOR_PER_MINUTE: u32 = 20;

/// Tail emission per minute: 0.3 coins.
pub const FINAL_SUBSIDY_PER_MINUTE: u64 = 300_000_000_000;

// Block timing
pub const DIFFICULTY_TARGET_V1: u64 = 60;
pub const DIFFICULTY_TARGET_V2: u64 = 120;

/// Maximum allowed future timestamp offset (2 hours).
pub const BLOCK_FUTURE_TIME_LIMIT: u64 = 60 * 60 * 2;

/// Number of recent blocks whose median bounds a new timestamp.
pub const TIMESTAMP_CHECK_WINDOW: usize = 60;

// Difficulty adjustment
pub const DIFFICULTY_WINDOW: usize = 720;
pub const DIFFICULTY_LAG: usize = 15;
pub const DIFFICULTY_CUT: usize = 60;

/// Entries a difficulty window holds: the retarget window plus the lag.
pub const DIFFICULTY_BLOCKS_COUNT: usize = DIFFICULTY_WINDOW + DIFFICULTY_LAG;

// Block weight
pub const BLOCK_GRANTED_FULL_REWARD_ZONE_V1: u64 = 20_000;
pub const BLOCK_GRANTED_FULL_REWARD_ZONE_V2: u64 = 60_000;
pub const BLOCK_GRANTED_FULL_REWARD_ZONE_V5: u64 = 300_000;

/// Short-term median window (blocks).
pub const REWARD_BLOCKS_WINDOW: usize = 100;

pub const LONG_TERM_BLOCK_WEIGHT_WINDOW_SIZE: usize = 100_000;

pub const SHORT_TERM_BLOCK_WEIGHT_SURGE_FACTOR: u64 = 50;

/// Bytes kept free in a template for the miner transaction.
pub const COINBASE_BLOB_RESERVED_SIZE: u64 = 600;

// Maturity and unlock
pub const MINED_MONEY_UNLOCK_WINDOW: u64 = 60;
pub const DEFAULT_TX_SPENDABLE_AGE: u64 = 10;
pub const LOCKED_TX_ALLOWED_DELTA_BLOCKS: u64 = 1;
pub const LOCKED_TX_ALLOWED_DELTA_SECONDS_V1: u64 = DIFFICULTY_TARGET_V1 * LOCKED_TX_ALLOWED_DELTA_BLOCKS;
pub const LOCKED_TX_ALLOWED_DELTA_SECONDS_V2: u64 = DIFFICULTY_TARGET_V2 * LOCKED_TX_ALLOWED_DELTA_BLOCKS;

/// Unlock times below this are heights, at or above it timestamps.
pub const MAX_BLOCK_NUMBER: u64 = 500_000_000;

// Fees
pub const DYNAMIC_FEE_REFERENCE_TRANSACTION_WEIGHT: u64 = 3000;
pub const PER_KB_FEE_QUANTIZATION_DECIMALS: u32 = 8;
pub const SCALING_2021_FEE_ROUNDING_PLACES: u32 = 2;
pub const FEE_ESTIMATE_GRACE_BLOCKS: u64 = 10;

/// Placeholder reward used when the real one cannot be computed.
pub const BLOCK_REWARD_OVERESTIMATE: u64 = 10 * 1_000_000_000_000;

/// Versions 2-4 round the miner reward down to this granularity.
pub const BASE_REWARD_CLAMP_THRESHOLD: u64 = 100_000_000;

/// Pre-v2 miner outputs below this are emitted as one dust output.
pub const DEFAULT_DUST_THRESHOLD: u64 = 2_000_000_000;

// Sync
/// Block hashes covered by one hash-of-hashes entry.
pub const HASH_OF_HASHES_STEP: usize = 512;

// Proof-of-work seed schedule
pub const SEEDHASH_EPOCH_BLOCKS: u64 = 2048;
pub const SEEDHASH_EPOCH_LAG: u64 = 64;

// =============================================================================
// Hard Fork Queries
// =============================================================================

/// Get the hard fork version active at a given block height.
pub fn hf_version_for_height(height: u64, network: Network) -> u8 {
    let config = network_config(network);
    let mut active_version = 1u8;
    for &(version, activation_height) in config.hard_fork_heights {
        if height >= activation_height && version > active_version {
            active_version = version;
        }
    }
    active_version
}

/// Target block time for a hard-fork version.
pub fn difficulty_target(version: u8) -> u64 {
    if version < 2 {
        DIFFICULTY_TARGET_V1
    } else {
        DIFFICULTY_TARGET_V2
    }
}

// =============================================================================
// Block Reward Calculation
// =============================================================================

/// Minimum penalty-free block weight for a version.
pub fn min_block_weight(version: u8) -> u64 {
    if version < 2 {
        BLOCK_GRANTED_FULL_REWARD_ZONE_V1
    } else if version < 5 {
        BLOCK_GRANTED_FULL_REWARD_ZONE_V2
    } else {
        BLOCK_GRANTED_FULL_REWARD_ZONE_V5
    }
}

/// Calculate block reward.
///
/// base_reward = (MONEY_SUPPLY - already_generated) >> emission_speed_factor,
/// floored at the tail emission. Blocks above the median pay a quadratic
/// penalty; blocks above twice the median are invalid (`None`).
pub fn block_reward(
    median_weight: u64,
    current_block_weight: u64,
    already_generated_coins: u64,
    version: u8,
) -> Option<u64> {
    let target_minutes = difficulty_target(version) / 60;
    let emission_speed_factor = EMISSION_SPEED_FACTOR_PER_MINUTE - (target_minutes as u32 - 1);

    let mut base_reward = MONEY_SUPPLY.saturating_sub(already_generated_coins) >> emission_speed_factor;
    let min_subsidy = FINAL_SUBSIDY_PER_MINUTE * target_minutes;
    if base_reward < min_subsidy {
        base_reward = min_subsidy;
    }

    let median = median_weight.max(min_block_weight(version));

    if current_block_weight <= median {
        return Some(base_reward);
    }

    if current_block_weight > 2 * median {
        return None;
    }

    // reward × (2M - W) × W / M / M
    let m = median as u128;
    let w = current_block_weight as u128;
    let multiplicand = (2 * m - w) * w;
    let reward = (base_reward as u128 * multiplicand) / m / m;

    Some(reward as u64)
}

// =============================================================================
// Difficulty Calculation
// =============================================================================

/// Next difficulty from a window of timestamps and cumulative difficulties.
///
/// Timestamps are sorted on their own, the `DIFFICULTY_CUT` outliers on
/// each side are dropped once the window is full, and the remaining work
/// is scaled to the target spacing (rounded up). Returns 0 on overflow,
/// which callers treat as fatal.
pub fn next_difficulty(
    timestamps: &[u64],
    cumulative_difficulties: &[u128],
    target_seconds: u64,
) -> u128 {
    let length = timestamps.len().min(DIFFICULTY_WINDOW);
    assert_eq!(
        timestamps.len().min(DIFFICULTY_WINDOW),
        cumulative_difficulties.len().min(DIFFICULTY_WINDOW),
        "timestamps and difficulties must have same length"
    );

    if length <= 1 {
        return 1;
    }

    let mut ts = timestamps[..length].to_vec();
    ts.sort_unstable();
    let cd = &cumulative_difficulties[..length];

    let kept = DIFFICULTY_WINDOW - 2 * DIFFICULTY_CUT;
    let (cut_begin, cut_end) = if length <= kept {
        (0, length)
    } else {
        let begin = (length - kept).div_ceil(2);
        (begin, begin + kept)
    };

    let mut time_span = (ts[cut_end - 1] - ts[cut_begin]) as u128;
    if time_span == 0 {
        time_span = 1;
    }

    let Some(total_work) = cd[cut_end - 1].checked_sub(cd[cut_begin]) else {
        return 0;
    };
    match total_work.checked_mul(target_seconds as u128) {
        Some(scaled) => scaled.div_ceil(time_span),
        None => 0,
    }
}

/// Check if a hash meets difficulty target: hash × difficulty < 2^256.
pub fn check_hash(hash: &[u8; 32], difficulty: u128) -> bool {
    // The hash is a little-endian 256-bit integer.
    let mut lo_bytes = [0u8; 16];
    let mut hi_bytes = [0u8; 16];
    lo_bytes.copy_from_slice(&hash[..16]);
    hi_bytes.copy_from_slice(&hash[16..]);
    let lo = u128::from_le_bytes(lo_bytes);
    let hi = u128::from_le_bytes(hi_bytes);

    // (hi·2^128 + lo) · d = hi·d·2^128 + lo·d
    let (_, lo_carry) = widening_mul(lo, difficulty);
    let Some(hi_part) = hi.checked_mul(difficulty) else {
        return false;
    };
    hi_part.checked_add(lo_carry).is_some()
}

/// Full 256-bit product of two u128 values as (low, high).
fn widening_mul(a: u128, b: u128) -> (u128, u128) {
    const MASK: u128 = u64::MAX as u128;
    let (a0, a1) = (a & MASK, a >> 64);
    let (b0, b1) = (b & MASK, b >> 64);

    let p00 = a0 * b0;
    let p01 = a0 * b1;
    let p10 = a1 * b0;
    let p11 = a1 * b1;

    let mid = (p00 >> 64) + (p01 & MASK) + (p10 & MASK);
    let low = (p00 & MASK) | (mid << 64);
    let high = p11 + (p01 >> 64) + (p10 >> 64) + (mid >> 64);
    (low, high)
}

// =============================================================================
// Medians
// =============================================================================

/// Median of `values`; the mean of the two middle values for an even count.
pub fn median(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        ((sorted[n / 2 - 1] as u128 + sorted[n / 2] as u128) / 2) as u64
    }
}

// =============================================================================
// Unlock Time
// =============================================================================

/// Whether an output with `unlock_time` is spendable by a block built on a
/// chain of `chain_height` blocks, at `current_time`.
pub fn is_unlock_time_reached(
    unlock_time: u64,
    chain_height: u64,
    current_time: u64,
    version: u8,
) -> bool {
    if unlock_time < MAX_BLOCK_NUMBER {
        chain_height.saturating_sub(1) + LOCKED_TX_ALLOWED_DELTA_BLOCKS >= unlock_time
    } else {
        let delta = if version < 2 {
            LOCKED_TX_ALLOWED_DELTA_SECONDS_V1
        } else {
            LOCKED_TX_ALLOWED_DELTA_SECONDS_V2
        };
        current_time.saturating_add(delta) >= unlock_time
    }
}

// =============================================================================
// Fee Calculation
// =============================================================================

/// Fees are quantised up to this many atomic units.
pub fn fee_quantization_mask() -> u64 {
    10u64.pow(PER_KB_FEE_QUANTIZATION_DECIMALS)
}

/// Per-byte minimum fee: 95% of `reward × reference_weight / median²`,
/// with the median floored at the v5 full reward zone. Never below 1.
pub fn dynamic_base_fee(block_reward: u64, median_block_weight: u64) -> u64 {
    let median = median_block_weight.max(BLOCK_GRANTED_FULL_REWARD_ZONE_V5) as u128;
    let mut lo = block_reward as u128 * DYNAMIC_FEE_REFERENCE_TRANSACTION_WEIGHT as u128;
    lo /= median;
    lo /= median;
    let mut lo = lo as u64;
    lo -= lo / 20;
    lo.max(1)
}

/// Round `amount` up so only `significant_digits` leading digits are
/// non-zero.
pub fn round_money_up(amount: u64, significant_digits: u32) -> u64 {
    let digits = if amount == 0 { 1 } else { amount.ilog10() + 1 };
    if digits <= significant_digits {
        return amount;
    }
    let scale = 10u64.pow(digits - significant_digits);
    let mut q = amount / scale;
    if amount % scale != 0 {
        q += 1;
    }
    q.saturating_mul(scale)
}

/// The four 2021-scaling fee levels `[low, normal, medium, high]` per byte.
///
/// `mnw` is the effective short-term median for wallets and `mlw` the
/// penalty-free zone. Intermediate divisions happen in exactly this order.
pub fn dynamic_base_fee_estimate_2021_scaling(base_reward: u64, mnw: u64, mlw: u64) -> [u64; 4] {
    let r = base_reward as u128;
    let refw = DYNAMIC_FEE_REFERENCE_TRANSACTION_WEIGHT as u128;
    let zone = BLOCK_GRANTED_FULL_REWARD_ZONE_V5 as u128;
    let mnw_ = mnw as u128;
    let mfw = mnw.min(mlw).max(1) as u128;

    let fl = r * refw / (mfw * mfw);
    let fn_ = 4 * r * refw / (mfw * mfw);
    let fm = 16 * r * refw / (zone * mfw);
    let fh_div = (32 * refw * mnw_ / zone).max(1);
    let fh = (4 * fm).max(4 * fm * mfw / fh_div);

    [fl, fn_, fm, fh].map(|f| {
        round_money_up(u64::try_from(f).unwrap_or(u64::MAX), SCALING_2021_FEE_ROUNDING_PLACES)
    })
}

// =============================================================================
// Amount Decomposition
// =============================================================================

/// True for amounts of the form `d × 10^k` with a single non-zero digit.
pub fn is_valid_decomposed_amount(amount: u64) -> bool {
    if amount == 0 {
        return false;
    }
    let mut a = amount;
    while a % 10 == 0 {
        a /= 10;
    }
    a < 10
}

/// Split `amount` into single-digit chunks, lowest order first. Leading
/// low-order chunks whose running sum stays within `dust_threshold` are
/// merged into a single dust entry emitted before the first chunk.
pub fn decompose_amount_into_digits(amount: u64, dust_threshold: u64) -> Vec<u64> {
    let mut out = Vec::new();
    let mut amount = amount;
    let mut dust = 0u64;
    let mut dust_handled = false;
    let mut order = 1u64;
    while amount != 0 {
        let chunk = (amount % 10) * order;
        amount /= 10;
        order = order.saturating_mul(10);
        if dust + chunk <= dust_threshold {
            dust += chunk;
        } else {
            if !dust_handled && dust != 0 {
                out.push(dust);
                dust_handled = true;
            }
            if chunk != 0 {
                out.push(chunk);
            }
        }
    }
    if !dust_handled && dust != 0 {
        out.push(dust);
    }
    out
}

// =============================================================================
// Proof-of-work seed schedule
// =============================================================================

/// Height whose block hash seeds the proof-of-work dataset for `height`.
pub fn rx_seedheight(height: u64) -> u64 {
    if height <= SEEDHASH_EPOCH_BLOCKS + SEEDHASH_EPOCH_LAG {
        0
    } else {
        (height - SEEDHASH_EPOCH_LAG - 1) & !(SEEDHASH_EPOCH_BLOCKS - 1)
    }
}

/// Current and next seed heights for a block at `height`.
pub fn rx_seedheights(height: u64) -> (u64, u64) {
    let seed = rx_seedheight(height);
    let next = rx_seedheight(height + SEEDHASH_EPOCH_LAG);
    (seed, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---- hard forks ----

    #[test]
    fn test_hf_version_mainnet() {
        assert_eq!(hf_version_for_height(0, Network::Mainnet), 1);
        assert_eq!(hf_version_for_height(1_009_826, Network::Mainnet), 1);
        assert_eq!(hf_version_for_height(1_009_827, Network::Mainnet), 2);
        assert_eq!(hf_version_for_height(1_978_433, Network::Mainnet), 12);
        assert_eq!(hf_version_for_height(3_000_000, Network::Mainnet), 16);
    }

    #[test]
    fn test_hf_version_stagenet_boundaries() {
        let net = Network::Stagenet;
        assert_eq!(hf_version_for_height(31_999, net), 1);
        assert_eq!(hf_version_for_height(32_000, net), 2);
        assert_eq!(hf_version_for_height(454_720, net), 11);
        assert_eq!(hf_version_for_height(454_721, net), 12);
        assert_eq!(hf_version_for_height(1_151_720, net), 16);
    }

    #[test]
    fn test_fakechain_defaults_to_v1() {
        assert_eq!(hf_version_for_height(0, Network::Fakechain), 1);
        assert_eq!(hf_version_for_height(1_000_000, Network::Fakechain), 1);
    }

    // ---- block reward ----

    #[test]
    fn test_block_reward_genesis_era() {
        // v1: target 1 minute, factor 20
        let r = block_reward(0, 0, 0, 1).unwrap();
        assert_eq!(r, MONEY_SUPPLY >> 20);
    }

    #[test]
    fn test_block_reward_tail_emission() {
        let r = block_reward(0, 0, MONEY_SUPPLY - 1, 2).unwrap();
        assert_eq!(r, FINAL_SUBSIDY_PER_MINUTE * 2);
    }

    #[test]
    fn test_block_reward_penalty() {
        let base = block_reward(0, 0, 1 << 40, 10).unwrap();
        // W = 1.5 M: reward × 0.75
        let m = BLOCK_GRANTED_FULL_REWARD_ZONE_V5;
        let r = block_reward(m, m + m / 2, 1 << 40, 10).unwrap();
        assert_eq!(r, (base as u128 * 3 / 4) as u64);
    }

    #[test]
    fn test_block_reward_oversize() {
        let m = BLOCK_GRANTED_FULL_REWARD_ZONE_V5;
        assert!(block_reward(m, 2 * m, 0, 10).is_some());
        assert_eq!(block_reward(m, 2 * m + 1, 0, 10), None);
    }

    #[test]
    fn test_min_block_weight_by_version() {
        assert_eq!(min_block_weight(1), 20_000);
        assert_eq!(min_block_weight(4), 60_000);
        assert_eq!(min_block_weight(5), 300_000);
    }

    // ---- difficulty ----

    #[test]
    fn test_minimum_difficulty() {
        assert_eq!(next_difficulty(&[], &[], DIFFICULTY_TARGET_V2), 1);
        assert_eq!(next_difficulty(&[100], &[1000], DIFFICULTY_TARGET_V2), 1);
    }

    #[test]
    fn test_difficulty_steady_state() {
        // 100 blocks on target at difficulty 1000
        let ts: Vec<u64> = (0..100).map(|i| i * 120).collect();
        let cd: Vec<u128> = (0..100).map(|i| (i as u128 + 1) * 1000).collect();
        assert_eq!(next_difficulty(&ts, &cd, 120), 1000);
    }

    #[test]
    fn test_difficulty_monotonic_in_block_rate() {
        let cd: Vec<u128> = (0..200).map(|i| (i as u128 + 1) * 5000).collect();
        let at = |spacing: u64| {
            let ts: Vec<u64> = (0..200).map(|i| 1_000_000 + i * spacing).collect();
            next_difficulty(&ts, &cd, 120)
        };
        assert!(at(60) > at(120), "faster blocks must raise difficulty");
        assert!(at(240) < at(120), "slower blocks must lower difficulty");
        assert!(at(30) > at(60));
    }

    #[test]
    fn test_difficulty_cuts_outliers_on_full_window() {
        let cd: Vec<u128> = (0..720).map(|i| (i as u128 + 1) * 100).collect();
        let mut ts: Vec<u64> = (0..720).map(|i| i * 120).collect();
        let base = next_difficulty(&ts, &cd, 120);
        // Extreme outliers at both ends fall inside the cut.
        ts[0] = 0;
        ts[719] = u32::MAX as u64;
        assert_eq!(next_difficulty(&ts, &cd, 120), base);
    }

    #[test]
    fn test_difficulty_overflow_returns_zero() {
        let cd = [0u128, u128::MAX];
        assert_eq!(next_difficulty(&[0, 1], &cd, 120), 0);
    }

    #[test]
    fn test_check_hash_bounds() {
        let zero = [0u8; 32];
        assert!(check_hash(&zero, u128::MAX));
        let max = [0xffu8; 32];
        assert!(check_hash(&max, 1));
        assert!(!check_hash(&max, 2));
        // hash = 2^255: passes at difficulty 1, fails at 2
        let mut half = [0u8; 32];
        half[31] = 0x80;
        assert!(check_hash(&half, 1));
        assert!(!check_hash(&half, 2));
    }

    #[test]
    fn test_check_hash_low_half_carry() {
        // hash = 2^128 - 1 (low half full) with difficulty 2^128 - 1
        let mut h = [0u8; 32];
        h[..16].copy_from_slice(&[0xff; 16]);
        assert!(check_hash(&h, u128::MAX));
    }

    // ---- medians ----

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&[]), 0);
        assert_eq!(median(&[9, 1, 5, 3, 7]), 5);
        assert_eq!(median(&[1, 2, 3, 4]), 2);
        assert_eq!(median(&[4, 1, 3, 6]), 3);
        assert_eq!(median(&[u64::MAX, u64::MAX]), u64::MAX);
    }

    // ---- unlock ----

    #[test]
    fn test_unlock_by_height() {
        assert!(is_unlock_time_reached(0, 1, 0, 1));
        assert!(!is_unlock_time_reached(100, 99, 0, 1));
        assert!(is_unlock_time_reached(100, 100, 0, 1));
    }

    #[test]
    fn test_unlock_by_time() {
        let t = 1_600_000_000;
        assert!(is_unlock_time_reached(t, 0, t - DIFFICULTY_TARGET_V2, 2));
        assert!(!is_unlock_time_reached(t, 0, t - DIFFICULTY_TARGET_V2 - 1, 2));
        assert!(!is_unlock_time_reached(t, 0, t - DIFFICULTY_TARGET_V2, 1));
    }

    // ---- fees ----

    #[test]
    fn test_dynamic_base_fee() {
        // 0.6 coin reward at the 300 kB floor: 0.6e12 × 3000 / 9e10 = 20000, minus 5%
        assert_eq!(dynamic_base_fee(600_000_000_000, 0), 19_000);
        assert_eq!(dynamic_base_fee(600_000_000_000, 600_000), 4_750);
        assert_eq!(dynamic_base_fee(1, 1_000_000), 1);
    }

    #[test]
    fn test_round_money_up() {
        assert_eq!(round_money_up(0, 2), 0);
        assert_eq!(round_money_up(12, 2), 12);
        assert_eq!(round_money_up(120, 2), 120);
        assert_eq!(round_money_up(121, 2), 130);
        assert_eq!(round_money_up(999, 2), 1000);
        assert_eq!(round_money_up(19_001, 2), 20_000);
    }

    #[test]
    fn test_fee_estimate_2021_scaling_reference_values() {
        let fees = dynamic_base_fee_estimate_2021_scaling(600_000_000_000, 300_000, 300_000);
        assert_eq!(fees, [20_000, 80_000, 320_000, 4_000_000]);
    }

    #[test]
    fn test_fee_estimate_2021_scaling_orders_levels() {
        let fees = dynamic_base_fee_estimate_2021_scaling(600_000_000_000, 1_500_000, 600_000);
        assert!(fees[0] <= fees[1] && fees[1] <= fees[2] && fees[2] <= fees[3]);
    }

    // ---- decomposition ----

    #[test]
    fn test_valid_decomposed_amounts() {
        assert!(is_valid_decomposed_amount(1));
        assert!(is_valid_decomposed_amount(9_000_000));
        assert!(is_valid_decomposed_amount(10_000_000_000_000_000_000));
        assert!(!is_valid_decomposed_amount(0));
        assert!(!is_valid_decomposed_amount(11));
        assert!(!is_valid_decomposed_amount(1_500));
    }

    #[test]
    fn test_decompose_without_dust() {
        assert_eq!(decompose_amount_into_digits(0, 0), Vec::<u64>::new());
        assert_eq!(decompose_amount_into_digits(1203, 0), vec![3, 200, 1000]);
    }

    #[test]
    fn test_decompose_with_dust_threshold() {
        // 3 + 20 stay within 50 and become one dust entry
        assert_eq!(decompose_amount_into_digits(4_023, 50), vec![23, 4_000]);
        assert_eq!(decompose_amount_into_digits(23, 50), vec![23]);
    }

    #[test]
    fn test_decompose_sums_back() {
        let amount = 17_592_186_044_415;
        let parts = decompose_amount_into_digits(amount, 0);
        assert_eq!(parts.iter().sum::<u64>(), amount);
        assert!(parts.iter().all(|&p| is_valid_decomposed_amount(p)));
    }

    // ---- seed heights ----

    #[test]
    fn test_rx_seedheight() {
        assert_eq!(rx_seedheight(0), 0);
        assert_eq!(rx_seedheight(2048 + 64), 0);
        assert_eq!(rx_seedheight(2048 + 65), 2048);
        assert_eq!(rx_seedheight(4096 + 64), 2048);
        assert_eq!(rx_seedheight(4096 + 65), 4096);
        assert_eq!(rx_seedheights(4096 + 10), (2048, 4096));
    }
}
