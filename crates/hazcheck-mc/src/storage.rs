//! Deduplicating storage for serialized states.

use crate::error::{CapacityError, CapacityKind};
use dashmap::DashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// The unique sequential index assigned to a stored state.
pub type StateIndex = u32;

/// How a state was first discovered, kept for trace reconstruction.
#[derive(Debug, Clone)]
pub struct StateRecord {
    /// The full state vector, including any reserved header bytes.
    pub state: Arc<[u8]>,
    /// The state this one was first reached from (`None` for initial states).
    pub predecessor: Option<StateIndex>,
    /// The choice outcomes of the path that first produced this state.
    pub replay: Box<[i32]>,
    /// Traversal level at which the state was discovered.
    pub depth: u32,
}

/// One step of a reconstructed trace.
#[derive(Debug, Clone)]
pub struct TraceStep {
    pub state: Arc<[u8]>,
    pub replay: Box<[i32]>,
}

/// Result of inserting a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// The bytes were not seen before and received this fresh index.
    New(StateIndex),
    /// The bytes were already stored. The existing index is only known in
    /// exact mode; the compact mode deduplicates without remembering it.
    Known(Option<StateIndex>),
}

impl InsertResult {
    #[inline]
    pub fn is_new(self) -> bool {
        matches!(self, InsertResult::New(_))
    }

    /// The index of the state, when known.
    #[inline]
    pub fn index(self) -> Option<StateIndex> {
        match self {
            InsertResult::New(index) => Some(index),
            InsertResult::Known(index) => index,
        }
    }
}

/// Thread-safe deduplicating state storage.
///
/// Two modes:
/// - **Exact** (default): states are keyed by their full byte vectors, so
///   deduplication is byte-exact, and each state's discovery record
///   (predecessor, replay info) is retained for counterexample
///   reconstruction.
/// - **Compact**: a lockless open-addressing set of 64-bit fingerprints:
///   8 bytes per state and zero lock contention, at the price of
///   probabilistic deduplication and no trace reconstruction.
pub struct StateStorage {
    capacity: usize,
    next_index: AtomicUsize,
    mode: Mode,
}

enum Mode {
    Exact {
        index_of: DashMap<Arc<[u8]>, StateIndex, ahash::RandomState>,
        records: DashMap<StateIndex, StateRecord, ahash::RandomState>,
    },
    Compact(FingerprintSet),
}

impl StateStorage {
    /// Creates an exact-mode storage holding at most `capacity` states.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_index: AtomicUsize::new(0),
            mode: Mode::Exact {
                index_of: DashMap::with_hasher(ahash::RandomState::new()),
                records: DashMap::with_hasher(ahash::RandomState::new()),
            },
        }
    }

    /// Creates a compact (fingerprint-only) storage holding at most
    /// `capacity` states.
    pub fn compact(capacity: usize) -> Self {
        Self {
            capacity,
            next_index: AtomicUsize::new(0),
            mode: Mode::Compact(FingerprintSet::new(capacity)),
        }
    }

    /// Whether discovery records are retained for trace reconstruction.
    #[inline]
    pub fn has_full_tracking(&self) -> bool {
        matches!(self.mode, Mode::Exact { .. })
    }

    /// Adds the state if its bytes are not already known. Safe to call from
    /// multiple workers concurrently.
    pub fn insert(
        &self,
        state: &[u8],
        predecessor: Option<StateIndex>,
        replay: &[i32],
        depth: u32,
    ) -> Result<InsertResult, CapacityError> {
        match &self.mode {
            Mode::Exact { index_of, records } => {
                // Fast path without allocating the key.
                if let Some(existing) = index_of.get(state) {
                    return Ok(InsertResult::Known(Some(*existing)));
                }

                let key: Arc<[u8]> = Arc::from(state);
                match index_of.entry(Arc::clone(&key)) {
                    dashmap::mapref::entry::Entry::Occupied(entry) => {
                        Ok(InsertResult::Known(Some(*entry.get())))
                    }
                    dashmap::mapref::entry::Entry::Vacant(entry) => {
                        let index = self.claim_index()?;
                        records.insert(
                            index,
                            StateRecord {
                                state: key,
                                predecessor,
                                replay: replay.into(),
                                depth,
                            },
                        );
                        entry.insert(index);
                        Ok(InsertResult::New(index))
                    }
                }
            }
            Mode::Compact(set) => {
                if set.insert(fingerprint(state)) {
                    Ok(InsertResult::New(self.claim_index()?))
                } else {
                    Ok(InsertResult::Known(None))
                }
            }
        }
    }

    fn claim_index(&self) -> Result<StateIndex, CapacityError> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        if index >= self.capacity {
            return Err(CapacityError {
                kind: CapacityKind::States,
                limit: self.capacity,
            });
        }
        Ok(index as StateIndex)
    }

    /// The number of distinct states stored.
    #[inline]
    pub fn len(&self) -> usize {
        self.next_index.load(Ordering::Relaxed).min(self.capacity)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The bytes of the state at `index`, in exact mode.
    pub fn get(&self, index: StateIndex) -> Option<Arc<[u8]>> {
        match &self.mode {
            Mode::Exact { records, .. } => records.get(&index).map(|r| Arc::clone(&r.state)),
            Mode::Compact(_) => None,
        }
    }

    /// Reconstructs the discovery path from an initial state to `index`,
    /// leaves first. Returns `None` when tracking is disabled or the index is
    /// unknown.
    pub fn trace_to(&self, index: StateIndex) -> Option<Vec<TraceStep>> {
        let Mode::Exact { records, .. } = &self.mode else {
            return None;
        };

        let mut trace = Vec::new();
        let mut current = Some(index);
        while let Some(idx) = current {
            let record = records.get(&idx)?;
            trace.push(TraceStep {
                state: Arc::clone(&record.state),
                replay: record.replay.clone(),
            });
            current = record.predecessor;
        }

        trace.reverse();
        Some(trace)
    }

    /// Clears all stored states so a new traversal can start.
    pub fn clear(&mut self) {
        self.next_index.store(0, Ordering::Relaxed);
        match &mut self.mode {
            Mode::Exact { index_of, records } => {
                index_of.clear();
                records.clear();
            }
            Mode::Compact(set) => *set = FingerprintSet::new(self.capacity),
        }
    }
}

/// Hashes a state vector to a 64-bit fingerprint.
#[inline]
fn fingerprint(state: &[u8]) -> u64 {
    // Fixed keys keep fingerprints stable across workers and runs.
    let mut hasher = ahash::RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
    .build_hasher();
    state.hash(&mut hasher);
    hasher.finish()
}

/// Sentinel value for empty slots.
const EMPTY: u64 = u64::MAX;

/// A lockless set of 64-bit fingerprints using open addressing with linear
/// probing and CAS insertion. Sized once for the configured state capacity at
/// ~37.5% maximum load, so probe sequences stay short and no growth is needed
/// mid-traversal.
struct FingerprintSet {
    slots: Vec<AtomicU64>,
    mask: u64,
}

impl FingerprintSet {
    fn new(capacity: usize) -> Self {
        let slots_len = (capacity.saturating_mul(3)).max(1024).next_power_of_two();
        let mut slots = Vec::with_capacity(slots_len);
        for _ in 0..slots_len {
            slots.push(AtomicU64::new(EMPTY));
        }
        Self {
            mask: (slots_len - 1) as u64,
            slots,
        }
    }

    /// Remap to avoid collision with the empty sentinel.
    #[inline]
    fn remap(fp: u64) -> u64 {
        if fp == EMPTY {
            EMPTY - 1
        } else {
            fp
        }
    }

    /// Inserts a fingerprint. Returns true if newly inserted.
    fn insert(&self, fp: u64) -> bool {
        let value = Self::remap(fp);
        let mut idx = (value & self.mask) as usize;

        loop {
            let slot = &self.slots[idx];
            let current = slot.load(Ordering::Relaxed);

            if current == value {
                return false;
            }

            if current == EMPTY {
                match slot.compare_exchange(EMPTY, value, Ordering::Relaxed, Ordering::Relaxed) {
                    Ok(_) => return true,
                    Err(actual) => {
                        if actual == value {
                            return false;
                        }
                        std::hint::spin_loop();
                    }
                }
            }

            idx = ((idx as u64 + 1) & self.mask) as usize;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_dedups_equal_bytes() {
        let storage = StateStorage::new(1024);
        let a = storage.insert(&[1, 2, 3], None, &[], 0).unwrap();
        let b = storage.insert(&[1, 2, 3], None, &[], 0).unwrap();
        assert!(a.is_new());
        assert!(!b.is_new());
        assert_eq!(a.index(), b.index());
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_one_byte_difference_gets_fresh_index() {
        let storage = StateStorage::new(1024);
        let a = storage.insert(&[1, 2, 3], None, &[], 0).unwrap();
        let b = storage.insert(&[1, 2, 4], None, &[], 0).unwrap();
        assert!(b.is_new());
        assert_ne!(a.index(), b.index());
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_trace_reconstruction() {
        let storage = StateStorage::new(1024);
        let i0 = storage.insert(&[0], None, &[0], 0).unwrap().index().unwrap();
        let i1 = storage
            .insert(&[1], Some(i0), &[1, 0], 1)
            .unwrap()
            .index()
            .unwrap();
        let i2 = storage
            .insert(&[2], Some(i1), &[1], 2)
            .unwrap()
            .index()
            .unwrap();

        let trace = storage.trace_to(i2).unwrap();
        assert_eq!(trace.len(), 3);
        assert_eq!(&*trace[0].state, &[0]);
        assert_eq!(&*trace[1].state, &[1]);
        assert_eq!(&*trace[2].state, &[2]);
        assert_eq!(&*trace[1].replay, &[1, 0]);
    }

    #[test]
    fn test_capacity_exhaustion_fails_fast() {
        let storage = StateStorage::new(2);
        storage.insert(&[0], None, &[], 0).unwrap();
        storage.insert(&[1], None, &[], 0).unwrap();
        let err = storage.insert(&[2], None, &[], 0).unwrap_err();
        assert_eq!(err.kind, CapacityKind::States);
    }

    #[test]
    fn test_compact_mode_dedups_without_records() {
        let storage = StateStorage::compact(1024);
        assert!(storage.insert(&[7, 7], None, &[], 0).unwrap().is_new());
        assert!(!storage.insert(&[7, 7], None, &[], 0).unwrap().is_new());
        assert!(storage.insert(&[7, 8], None, &[], 0).unwrap().is_new());
        assert_eq!(storage.len(), 2);
        assert!(storage.get(0).is_none());
        assert!(storage.trace_to(0).is_none());
    }

    #[test]
    fn test_concurrent_insert() {
        let storage = Arc::new(StateStorage::new(4096));
        let mut handles = Vec::new();

        for t in 0u8..4 {
            let storage = Arc::clone(&storage);
            handles.push(std::thread::spawn(move || {
                for i in 0..200u8 {
                    storage.insert(&[t, i], None, &[], 0).unwrap();
                    // Every worker also races on a shared state.
                    storage.insert(&[255, i], None, &[], 0).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(storage.len(), 4 * 200 + 200);
    }
}
