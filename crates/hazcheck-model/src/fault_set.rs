//! Compact bitset representation of fault combinations.

use crate::fault::Fault;
use std::fmt;

/// An immutable set of faults, represented as a bitset over fault identifiers.
///
/// Fault sets are the unit of currency for minimal-critical-set search and for
/// tagging which faults fired on a transition. At most 63 faults per model are
/// supported; the search entry points reject larger models up front.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FaultSet(u64);

impl FaultSet {
    /// The empty fault set.
    pub const EMPTY: FaultSet = FaultSet(0);

    /// Creates a set containing the single fault with the given identifier.
    #[inline]
    pub fn singleton(identifier: usize) -> Self {
        FaultSet(1 << identifier)
    }

    /// Creates a set from the identifiers of the given faults.
    pub fn from_faults<'a>(faults: impl IntoIterator<Item = &'a Fault>) -> Self {
        let mut bits = 0u64;
        for fault in faults {
            bits |= 1 << fault.identifier();
        }
        FaultSet(bits)
    }

    /// Creates a set containing exactly the faults that are currently activated.
    pub fn from_activated_faults(faults: &[Fault]) -> Self {
        let mut bits = 0u64;
        for fault in faults {
            if fault.is_activated() {
                bits |= 1 << fault.identifier();
            }
        }
        FaultSet(bits)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The raw bitset, useful for stable orderings.
    #[inline]
    pub fn bits(self) -> u64 {
        self.0
    }

    /// The number of faults in the set.
    #[inline]
    pub fn cardinality(self) -> u32 {
        self.0.count_ones()
    }

    #[inline]
    pub fn contains(self, identifier: usize) -> bool {
        self.0 & (1 << identifier) != 0
    }

    #[inline]
    pub fn union(self, other: FaultSet) -> FaultSet {
        FaultSet(self.0 | other.0)
    }

    #[inline]
    pub fn intersection(self, other: FaultSet) -> FaultSet {
        FaultSet(self.0 & other.0)
    }

    #[inline]
    pub fn difference(self, other: FaultSet) -> FaultSet {
        FaultSet(self.0 & !other.0)
    }

    /// Returns a copy of the set that contains the given fault.
    #[inline]
    pub fn add(self, identifier: usize) -> FaultSet {
        FaultSet(self.0 | (1 << identifier))
    }

    /// Returns a copy of the set without the given fault.
    #[inline]
    pub fn remove(self, identifier: usize) -> FaultSet {
        FaultSet(self.0 & !(1 << identifier))
    }

    #[inline]
    pub fn is_subset_of(self, other: FaultSet) -> bool {
        self.0 & other.0 == self.0
    }

    /// Iterates over the identifiers contained in the set, in increasing order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                None
            } else {
                let id = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(id)
            }
        })
    }

    /// Formats the set using the names of the given fault universe.
    pub fn display_with(self, faults: &[Fault]) -> String {
        let mut names: Vec<&str> = self
            .iter()
            .filter_map(|id| faults.iter().find(|f| f.identifier() == id))
            .map(|f| f.name())
            .collect();
        names.sort_unstable();
        names.join(", ")
    }
}

impl fmt::Debug for FaultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FaultSet({:#b})", self.0)
    }
}

impl FromIterator<usize> for FaultSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut bits = 0u64;
        for id in iter {
            bits |= 1 << id;
        }
        FaultSet(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(ids: &[usize]) -> FaultSet {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_membership() {
        let s = set(&[0, 3, 7]);
        assert!(s.contains(0));
        assert!(s.contains(3));
        assert!(s.contains(7));
        assert!(!s.contains(1));
        assert_eq!(s.cardinality(), 3);
    }

    #[test]
    fn test_add_remove() {
        let s = FaultSet::EMPTY.add(5);
        assert!(s.contains(5));
        assert!(s.remove(5).is_empty());
        // Removing an absent fault is a no-op
        assert_eq!(s.remove(2), s);
    }

    #[test]
    fn test_subset() {
        assert!(set(&[1, 2]).is_subset_of(set(&[0, 1, 2])));
        assert!(!set(&[1, 3]).is_subset_of(set(&[0, 1, 2])));
        assert!(FaultSet::EMPTY.is_subset_of(set(&[4])));
    }

    #[test]
    fn test_iter_order() {
        let ids: Vec<usize> = set(&[9, 2, 40]).iter().collect();
        assert_eq!(ids, vec![2, 9, 40]);
    }

    proptest! {
        #[test]
        fn union_commutative(a in 0u64..1 << 16, b in 0u64..1 << 16) {
            let (a, b) = (FaultSet(a), FaultSet(b));
            prop_assert_eq!(a.union(b), b.union(a));
        }

        #[test]
        fn union_associative(a in 0u64..1 << 16, b in 0u64..1 << 16, c in 0u64..1 << 16) {
            let (a, b, c) = (FaultSet(a), FaultSet(b), FaultSet(c));
            prop_assert_eq!(a.union(b).union(c), a.union(b.union(c)));
        }

        #[test]
        fn union_idempotent(a in 0u64..1 << 16) {
            let a = FaultSet(a);
            prop_assert_eq!(a.union(a), a);
        }

        #[test]
        fn cardinality_is_popcount(a in any::<u64>()) {
            prop_assert_eq!(FaultSet(a).cardinality(), a.count_ones());
        }

        #[test]
        fn membership_matches_construction(ids in prop::collection::btree_set(0usize..63, 0..10)) {
            let s: FaultSet = ids.iter().copied().collect();
            for id in 0..63 {
                prop_assert_eq!(s.contains(id), ids.contains(&id));
            }
        }
    }
}
