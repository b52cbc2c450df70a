// Copyright 2025 Skyvault (https://github.com/skyvault)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Fixed-capacity bloom filter for the cold archive index.
//!
//! Sizing follows the standard derivation from capacity `n` and target
//! false-positive rate `p`:
//!
//! ```text
//! m = ceil(-n * ln(p) / ln(2)^2)    bits
//! k = max(1, round(m/n * ln(2)))    hash functions
//! ```
//!
//! Positions use double hashing over a 256-bit blake3 digest of the uuid,
//! split into two 64-bit halves: `position_i = (h1 + i*h2) mod m`. A
//! negative answer is definite; a positive answer is resolved by scanning
//! the candidate blob.

use serde::{Deserialize, Serialize};
use skyvault_core::{Result, SkyvaultError};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloomFilter {
    bits: Vec<u64>,
    /// Number of addressable bits.
    bit_count: u64,
    /// Number of hash probes per item.
    hash_count: u32,
    capacity: u64,
    target_fpr: f64,
    /// Items observed via `add`; merge sums the counts.
    item_count: u64,
}

impl BloomFilter {
    /// Create a filter sized for `capacity` items at `target_fpr`.
    pub fn new(capacity: u64, target_fpr: f64) -> Self {
        let n = capacity.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let bit_count = (-(n * target_fpr.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let hash_count = ((bit_count as f64 / n) * ln2).round().max(1.0) as u32;

        Self {
            bits: vec![0u64; bit_count.div_ceil(64) as usize],
            bit_count,
            hash_count,
            capacity,
            target_fpr,
            item_count: 0,
        }
    }

    fn positions(&self, uuid: &Uuid) -> impl Iterator<Item = u64> + '_ {
        let digest = blake3::hash(uuid.as_bytes());
        let bytes = digest.as_bytes();
        let mut h1 = [0u8; 8];
        let mut h2 = [0u8; 8];
        h1.copy_from_slice(&bytes[0..8]);
        h2.copy_from_slice(&bytes[8..16]);
        let h1 = u64::from_le_bytes(h1);
        let h2 = u64::from_le_bytes(h2);
        let m = self.bit_count;
        (0..self.hash_count as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
    }

    pub fn add(&mut self, uuid: &Uuid) {
        let positions: Vec<u64> = self.positions(uuid).collect();
        for pos in positions {
            self.bits[(pos / 64) as usize] |= 1u64 << (pos % 64);
        }
        self.item_count += 1;
    }

    /// `false` means definitely absent; `true` means maybe present.
    pub fn may_contain(&self, uuid: &Uuid) -> bool {
        self.positions(uuid)
            .all(|pos| self.bits[(pos / 64) as usize] & (1u64 << (pos % 64)) != 0)
    }

    /// Union with another filter built with identical parameters.
    pub fn merge(&mut self, other: &BloomFilter) -> Result<()> {
        if self.bit_count != other.bit_count || self.hash_count != other.hash_count {
            return Err(SkyvaultError::InvalidInput(format!(
                "bloom parameter mismatch: ({}, {}) vs ({}, {})",
                self.bit_count, self.hash_count, other.bit_count, other.hash_count
            )));
        }
        for (word, other_word) in self.bits.iter_mut().zip(&other.bits) {
            *word |= other_word;
        }
        self.item_count += other.item_count;
        Ok(())
    }

    /// Current false-positive estimate: `(bits_set / m)^k`.
    pub fn estimated_fpr(&self) -> f64 {
        let set = self.bits_set() as f64;
        (set / self.bit_count as f64).powi(self.hash_count as i32)
    }

    pub fn bits_set(&self) -> u64 {
        self.bits.iter().map(|w| w.count_ones() as u64).sum()
    }

    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }

    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn target_fpr(&self) -> f64 {
        self.target_fpr
    }

    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    pub fn is_empty(&self) -> bool {
        self.item_count == 0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuids(range: std::ops::Range<u128>) -> Vec<Uuid> {
        range.map(Uuid::from_u128).collect()
    }

    #[test]
    fn sizing_follows_the_formula() {
        let filter = BloomFilter::new(1_000_000, 0.01);
        // m = ceil(1e6 * ln(0.01) / ln(2)^2) ~ 9_585_059
        assert!((9_585_000..9_586_000).contains(&filter.bit_count()));
        assert_eq!(filter.hash_count(), 7);
    }

    #[test]
    fn no_false_negatives() {
        let mut filter = BloomFilter::new(10_000, 0.01);
        for uuid in uuids(0..10_000) {
            filter.add(&uuid);
        }
        for uuid in uuids(0..10_000) {
            assert!(filter.may_contain(&uuid));
        }
        assert_eq!(filter.item_count(), 10_000);
    }

    #[test]
    fn empirical_fpr_stays_near_target() {
        let mut filter = BloomFilter::new(1_000, 0.01);
        for uuid in uuids(0..1_000) {
            filter.add(&uuid);
        }

        let probes = 10_000u32;
        let false_hits = (1_000_000..1_000_000 + probes as u128)
            .filter(|i| filter.may_contain(&Uuid::from_u128(*i)))
            .count();

        let fpr = false_hits as f64 / probes as f64;
        assert!(fpr <= 0.03, "empirical fpr {fpr} exceeded 3x target");
        assert!(filter.estimated_fpr() <= 0.03);
    }

    #[test]
    fn merge_is_union() {
        let mut a = BloomFilter::new(1_000, 0.01);
        let mut b = BloomFilter::new(1_000, 0.01);
        for uuid in uuids(0..100) {
            a.add(&uuid);
        }
        for uuid in uuids(100..200) {
            b.add(&uuid);
        }

        a.merge(&b).unwrap();
        for uuid in uuids(0..200) {
            assert!(a.may_contain(&uuid));
        }
        assert_eq!(a.item_count(), 200);
    }

    #[test]
    fn merge_rejects_mismatched_parameters() {
        let mut a = BloomFilter::new(1_000, 0.01);
        let b = BloomFilter::new(2_000, 0.01);
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn serialization_preserves_every_field() {
        let mut filter = BloomFilter::new(5_000, 0.005);
        for uuid in uuids(0..500) {
            filter.add(&uuid);
        }

        let restored = BloomFilter::from_bytes(&filter.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, filter);
        assert_eq!(restored.item_count(), 500);
        for uuid in uuids(0..500) {
            assert!(restored.may_contain(&uuid));
        }
    }

    #[test]
    fn empty_filter_contains_nothing_definitely() {
        let filter = BloomFilter::new(1_000, 0.01);
        assert!(!filter.may_contain(&Uuid::from_u128(42)));
        assert!(filter.is_empty());
        assert_eq!(filter.estimated_fpr(), 0.0);
    }

    proptest::proptest! {
        #[test]
        fn prop_no_false_negatives(ids in proptest::collection::vec(proptest::prelude::any::<u128>(), 1..200)) {
            let mut filter = BloomFilter::new(1_000, 0.01);
            for id in &ids {
                filter.add(&Uuid::from_u128(*id));
            }
            for id in &ids {
                proptest::prop_assert!(filter.may_contain(&Uuid::from_u128(*id)));
            }
        }

        #[test]
        fn prop_merge_is_union(
            left in proptest::collection::vec(proptest::prelude::any::<u128>(), 0..100),
            right in proptest::collection::vec(proptest::prelude::any::<u128>(), 0..100),
        ) {
            let mut a = BloomFilter::new(1_000, 0.01);
            let mut b = BloomFilter::new(1_000, 0.01);
            for id in &left {
                a.add(&Uuid::from_u128(*id));
            }
            for id in &right {
                b.add(&Uuid::from_u128(*id));
            }

            let mut merged = a.clone();
            merged.merge(&b).unwrap();
            for id in left.iter().chain(&right) {
                let uuid = Uuid::from_u128(*id);
                proptest::prop_assert!(merged.may_contain(&uuid));
                proptest::prop_assert!(a.may_contain(&uuid) || b.may_contain(&uuid));
            }
        }
    }
}
