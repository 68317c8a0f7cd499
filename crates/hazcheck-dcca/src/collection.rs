//! Cardinality-bucketed collections of fault sets.

use hazcheck_model::FaultSet;
use std::collections::HashSet;

/// A collection of fault sets ordered by cardinality, supporting the
/// subset/superset queries the minimality bookkeeping relies on.
pub struct FaultSetCollection {
    elements_by_cardinality: Vec<HashSet<FaultSet>>,
    max_cardinality: usize,
}

impl FaultSetCollection {
    /// Creates a collection for sets over at most `max_cardinality` faults.
    pub fn new(max_cardinality: usize) -> Self {
        Self {
            elements_by_cardinality: (0..=max_cardinality).map(|_| HashSet::new()).collect(),
            max_cardinality,
        }
    }

    pub fn add(&mut self, fault_set: FaultSet) {
        self.elements_by_cardinality[fault_set.cardinality() as usize].insert(fault_set);
    }

    pub fn contains(&self, fault_set: FaultSet) -> bool {
        self.elements_by_cardinality[fault_set.cardinality() as usize].contains(&fault_set)
    }

    /// Whether the collection contains the set itself or a proper subset.
    pub fn contains_subset_of(&self, fault_set: FaultSet) -> bool {
        self.contains(fault_set) || self.contains_proper_subset_of(fault_set)
    }

    /// Whether the collection contains a proper subset of the given set.
    pub fn contains_proper_subset_of(&self, fault_set: FaultSet) -> bool {
        let cardinality = fault_set.cardinality() as usize;
        self.elements_by_cardinality[..cardinality]
            .iter()
            .any(|bucket| bucket.iter().any(|e| e.is_subset_of(fault_set)))
    }

    /// Whether the collection contains the set itself or a superset.
    pub fn contains_superset_of(&self, fault_set: FaultSet) -> bool {
        let cardinality = fault_set.cardinality() as usize;
        if self.elements_by_cardinality[cardinality].contains(&fault_set) {
            return true;
        }

        self.elements_by_cardinality[cardinality + 1..]
            .iter()
            .any(|bucket| bucket.iter().any(|e| fault_set.is_subset_of(*e)))
    }

    /// The minimal sets contained in the collection (its antichain floor).
    pub fn minimal_sets(&self) -> HashSet<FaultSet> {
        self.iter()
            .filter(|&set| !self.contains_proper_subset_of(set))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = FaultSet> + '_ {
        self.elements_by_cardinality
            .iter()
            .flat_map(|bucket| bucket.iter().copied())
    }

    pub fn is_empty(&self) -> bool {
        self.elements_by_cardinality.iter().all(HashSet::is_empty)
    }

    /// The maximum cardinality the collection was created for.
    pub fn max_cardinality(&self) -> usize {
        self.max_cardinality
    }
}
