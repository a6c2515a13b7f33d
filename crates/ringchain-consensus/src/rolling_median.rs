//! Fixed-window rolling median.
//!
//! Keeps the window in arrival order plus two counted multisets holding
//! the lower and upper halves, so inserting (and evicting the oldest
//! value) costs O(log n) and reading the median is O(log n).

use std::collections::{BTreeMap, VecDeque};

#[derive(Debug, Clone)]
pub struct RollingMedian {
    capacity: usize,
    history: VecDeque<u64>,
    low: BTreeMap<u64, usize>,
    high: BTreeMap<u64, usize>,
    low_len: usize,
    high_len: usize,
}

fn multiset_add(set: &mut BTreeMap<u64, usize>, v: u64) {
    *set.entry(v).or_insert(0) += 1;
}

fn multiset_remove(set: &mut BTreeMap<u64, usize>, v: u64) -> bool {
    match set.get_mut(&v) {
        Some(n) if *n > 1 => {
            *n -= 1;
            true
        }
        Some(_) => {
            set.remove(&v);
            true
        }
        None => false,
    }
}

impl RollingMedian {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "rolling median needs a non-empty window");
        Self {
            capacity,
            history: VecDeque::with_capacity(capacity.min(1 << 16)),
            low: BTreeMap::new(),
            high: BTreeMap::new(),
            low_len: 0,
            high_len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.low.clear();
        self.high.clear();
        self.low_len = 0;
        self.high_len = 0;
    }

    /// Push a value, evicting the oldest once the window is full.
    pub fn insert(&mut self, value: u64) {
        if self.history.len() == self.capacity {
            if let Some(old) = self.history.pop_front() {
                self.evict(old);
            }
        }
        self.history.push_back(value);
        match self.low.last_key_value() {
            Some((&max_low, _)) if value > max_low => {
                multiset_add(&mut self.high, value);
                self.high_len += 1;
            }
            _ => {
                multiset_add(&mut self.low, value);
                self.low_len += 1;
            }
        }
        self.rebalance();
    }

    fn evict(&mut self, value: u64) {
        if multiset_remove(&mut self.low, value) {
            self.low_len -= 1;
        } else if multiset_remove(&mut self.high, value) {
            self.high_len -= 1;
        }
        self.rebalance();
    }

    /// Keep `low_len == high_len` or `low_len == high_len + 1`.
    fn rebalance(&mut self) {
        while self.low_len > self.high_len + 1 {
            let Some((&v, _)) = self.low.last_key_value() else { break };
            multiset_remove(&mut self.low, v);
            multiset_add(&mut self.high, v);
            self.low_len -= 1;
            self.high_len += 1;
        }
        while self.high_len > self.low_len {
            let Some((&v, _)) = self.high.first_key_value() else { break };
            multiset_remove(&mut self.high, v);
            multiset_add(&mut self.low, v);
            self.high_len -= 1;
            self.low_len += 1;
        }
    }

    /// Median of the window; the mean of the two middle values for an even
    /// count, zero when empty.
    pub fn median(&self) -> u64 {
        let Some((&lo, _)) = self.low.last_key_value() else {
            return 0;
        };
        if self.low_len > self.high_len {
            return lo;
        }
        let hi = self.high.first_key_value().map_or(lo, |(&v, _)| v);
        ((lo as u128 + hi as u128) / 2) as u64
    }
}

impl Extend<u64> for RollingMedian {
    fn extend<I: IntoIterator<Item = u64>>(&mut self, iter: I) {
        for v in iter {
            self.insert(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringchain_types::consensus::median;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(RollingMedian::new(3).median(), 0);
    }

    #[test]
    fn test_odd_and_even_counts() {
        let mut rm = RollingMedian::new(10);
        rm.insert(5);
        assert_eq!(rm.median(), 5);
        rm.insert(1);
        assert_eq!(rm.median(), 3);
        rm.insert(9);
        assert_eq!(rm.median(), 5);
        rm.insert(u64::MAX);
        rm.insert(u64::MAX);
        rm.insert(u64::MAX);
        // 1 5 9 | MAX MAX MAX, no overflow in the mean
        assert_eq!(rm.median(), (1u64 << 63) + 4);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut rm = RollingMedian::new(3);
        rm.extend([100, 100, 100]);
        assert_eq!(rm.median(), 100);
        rm.extend([1, 1]);
        // window is now [100, 1, 1]
        assert_eq!(rm.len(), 3);
        assert_eq!(rm.median(), 1);
    }

    #[test]
    fn test_matches_sorting_median() {
        let mut rm = RollingMedian::new(17);
        let mut window: VecDeque<u64> = VecDeque::new();
        let mut x: u64 = 12345;
        for _ in 0..500 {
            // small LCG, values repeat often
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let v = (x >> 33) % 50;
            rm.insert(v);
            window.push_back(v);
            if window.len() > 17 {
                window.pop_front();
            }
            let slice: Vec<u64> = window.iter().copied().collect();
            assert_eq!(rm.median(), median(&slice));
        }
    }

    #[test]
    fn test_clear() {
        let mut rm = RollingMedian::new(4);
        rm.extend([1, 2, 3]);
        rm.clear();
        assert!(rm.is_empty());
        rm.insert(7);
        assert_eq!(rm.median(), 7);
    }
}
