//! Compact integer collections.
//!
//! [`NonNegativeIntSet`] is the bitset used wherever a dense domain index
//! needs to be recorded cheaply: call-graph edges, covered entities, and
//! similar per-run bookkeeping.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const WORD_BITS: usize = u64::BITS as usize;

/// Rejected input for [`NonNegativeIntSet`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntSetError {
    #[error("Non-negative integer argument is expected, got {0}")]
    Negative(i64),
}

/// A growable bitset over non-negative integers.
///
/// The cardinality is maintained incrementally so `size()` is O(1).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonNegativeIntSet {
    words: Vec<u64>,
    size: usize,
}

impl NonNegativeIntSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set able to hold `0..capacity` without reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: Vec::with_capacity(capacity.div_ceil(WORD_BITS)),
            size: 0,
        }
    }

    /// Build a set from a slice, failing on the first negative element.
    pub fn from_elements(elements: &[i64]) -> Result<Self, IntSetError> {
        let mut set = Self::with_capacity(elements.len());
        set.add_all(elements)?;
        Ok(set)
    }

    fn check(element: i64) -> Result<usize, IntSetError> {
        usize::try_from(element).map_err(|_| IntSetError::Negative(element))
    }

    /// Insert `element`. Returns `true` if it was not already present.
    pub fn add(&mut self, element: i64) -> Result<bool, IntSetError> {
        let index = Self::check(element)?;
        Ok(self.insert(index))
    }

    /// Insert an index that is non-negative by construction.
    pub fn insert(&mut self, index: usize) -> bool {
        let (word, bit) = (index / WORD_BITS, index % WORD_BITS);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1u64 << bit;
        let fresh = self.words[word] & mask == 0;
        if fresh {
            self.words[word] |= mask;
            self.size += 1;
        }
        fresh
    }

    pub fn add_all(&mut self, elements: &[i64]) -> Result<(), IntSetError> {
        for &element in elements {
            self.add(element)?;
        }
        Ok(())
    }

    /// Remove `element`; negative input is silently ignored.
    pub fn remove(&mut self, element: i64) -> bool {
        match usize::try_from(element) {
            Ok(index) => self.remove_index(index),
            Err(_) => false,
        }
    }

    pub fn remove_index(&mut self, index: usize) -> bool {
        let (word, bit) = (index / WORD_BITS, index % WORD_BITS);
        let Some(slot) = self.words.get_mut(word) else {
            return false;
        };
        let mask = 1u64 << bit;
        if *slot & mask == 0 {
            return false;
        }
        *slot &= !mask;
        self.size -= 1;
        true
    }

    pub fn remove_all(&mut self, elements: &[i64]) {
        for &element in elements {
            self.remove(element);
        }
    }

    pub fn contains(&self, element: i64) -> bool {
        usize::try_from(element).is_ok_and(|index| self.contains_index(index))
    }

    pub fn contains_index(&self, index: usize) -> bool {
        self.words
            .get(index / WORD_BITS)
            .is_some_and(|word| word & (1u64 << (index % WORD_BITS)) != 0)
    }

    /// `true` when every element is non-negative and present.
    pub fn contains_all(&self, elements: &[i64]) -> bool {
        elements.iter().all(|&element| self.contains(element))
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Iterate set members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(word_index, &word)| SetBits {
                base: word_index * WORD_BITS,
                word,
            })
    }
}

/// Iterator over the set bits of one word, lowest first.
struct SetBits {
    base: usize,
    word: u64,
}

impl Iterator for SetBits {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.word == 0 {
            return None;
        }
        let offset = self.word.trailing_zeros() as usize;
        self.word &= self.word - 1;
        Some(self.base + offset)
    }
}

impl FromIterator<usize> for NonNegativeIntSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::new();
        for index in iter {
            set.insert(index);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_then_remove_restores_size() {
        let mut set = NonNegativeIntSet::new();
        set.add(3).unwrap();
        let before = set.size();
        set.add(130).unwrap();
        assert_eq!(set.size(), before + 1);
        assert!(set.remove(130));
        assert_eq!(set.size(), before);
    }

    #[test]
    fn test_negative_add_fails() {
        let mut set = NonNegativeIntSet::new();
        assert_eq!(set.add(-1), Err(IntSetError::Negative(-1)));
        assert!(set.is_empty());
    }

    #[test]
    fn test_duplicate_add_counts_once() {
        let mut set = NonNegativeIntSet::new();
        assert!(set.add(7).unwrap());
        assert!(!set.add(7).unwrap());
        assert_eq!(set.size(), 1);
    }

    #[test]
    fn test_negative_membership_and_removal() {
        let mut set = NonNegativeIntSet::from_elements(&[0, 1]).unwrap();
        assert!(!set.contains(-4));
        assert!(!set.remove(-4));
        assert!(!set.contains_all(&[0, -1]));
        assert!(set.contains_all(&[0, 1]));
        assert_eq!(set.size(), 2);
    }

    #[test]
    fn test_iteration_crosses_word_boundaries() {
        let set = NonNegativeIntSet::from_elements(&[0, 63, 64, 65, 200]).unwrap();
        let members: Vec<usize> = set.iter().collect();
        assert_eq!(members, vec![0, 63, 64, 65, 200]);
    }

    #[test]
    fn test_remove_all_skips_missing() {
        let mut set = NonNegativeIntSet::from_elements(&[1, 2, 3]).unwrap();
        set.remove_all(&[2, 9, -1]);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(set.size(), 2);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            /// Property: size always equals the number of distinct members
            #[test]
            fn prop_size_matches_members(elements in proptest::collection::vec(0i64..2048, 0..64)) {
                let set = NonNegativeIntSet::from_elements(&elements).unwrap();
                let mut distinct = elements.clone();
                distinct.sort_unstable();
                distinct.dedup();
                prop_assert_eq!(set.size(), distinct.len());
                prop_assert_eq!(set.iter().count(), distinct.len());
            }

            /// Property: add followed by remove restores the prior size
            #[test]
            fn prop_add_remove_restores(seed in proptest::collection::vec(0i64..512, 0..32), x in 512i64..4096) {
                let mut set = NonNegativeIntSet::from_elements(&seed).unwrap();
                let before = set.size();
                set.add(x).unwrap();
                set.remove(x);
                prop_assert_eq!(set.size(), before);
            }
        }
    }
}
