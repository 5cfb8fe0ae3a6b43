//! Dense bit set used for liveness sets.
//!
//! Liveness is computed over definition indices, which are small and dense, so a word
//! vector beats hashing by a wide margin during the fixpoint iteration.

use std::fmt;

/// Fixed-capacity set of `usize` indices in `0..len`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
}

impl BitSet {
    /// Creates an empty set that can hold indices `0..capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            len: capacity,
        }
    }

    /// Number of indices the set can hold
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.len
    }

    /// Returns true if no index is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Number of indices in the set
    #[must_use]
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Adds `index`, returning true if it was not present.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn insert(&mut self, index: usize) -> bool {
        assert!(index < self.len, "index out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let added = *word & mask == 0;
        *word |= mask;
        added
    }

    /// Removes `index`, returning true if it was present.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn remove(&mut self, index: usize) -> bool {
        assert!(index < self.len, "index out of bounds");
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        let present = *word & mask != 0;
        *word &= !mask;
        present
    }

    /// Returns true if `index` is in the set; out-of-range indices are never present
    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// `self |= other`, returning true if `self` changed.
    pub fn union_with(&mut self, other: &Self) -> bool {
        assert_eq!(self.len, other.len, "bit sets must have same length");
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let old = *a;
            *a |= *b;
            changed |= old != *a;
        }
        changed
    }

    /// `self -= other`, returning true if `self` changed.
    pub fn difference_with(&mut self, other: &Self) -> bool {
        assert_eq!(self.len, other.len, "bit sets must have same length");
        let mut changed = false;
        for (a, b) in self.words.iter_mut().zip(&other.words) {
            let old = *a;
            *a &= !*b;
            changed |= old != *a;
        }
        changed
    }

    /// Iterates the set indices in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(i * 64 + bit)
            })
        })
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove() {
        let mut bs = BitSet::new(130);
        assert!(bs.is_empty());
        assert!(bs.insert(0));
        assert!(bs.insert(64));
        assert!(bs.insert(129));
        assert!(!bs.insert(64));
        assert_eq!(bs.count(), 3);
        assert!(bs.contains(129));
        assert!(!bs.contains(500));
        assert!(bs.remove(64));
        assert!(!bs.remove(64));
        assert_eq!(bs.iter().collect::<Vec<_>>(), vec![0, 129]);
    }

    #[test]
    fn test_set_operations_report_change() {
        let mut a = BitSet::new(70);
        let mut b = BitSet::new(70);
        a.insert(1);
        b.insert(1);
        b.insert(69);
        assert!(a.union_with(&b));
        assert!(!a.union_with(&b));
        assert_eq!(a.count(), 2);

        let mut c = BitSet::new(70);
        c.insert(69);
        assert!(a.difference_with(&c));
        assert!(!a.difference_with(&c));
        assert_eq!(format!("{a:?}"), "{1}");
    }
}
