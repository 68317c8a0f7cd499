//! Exhaustive, replayable resolution of nondeterministic choices.

use smallvec::SmallVec;
use thiserror::Error;

/// Error raised when a nondeterministic choice cannot be resolved.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NondeterminismError {
    /// `prepare_next_path` was invoked while choices recorded for the current
    /// path were never consumed; the model's branching is not replayable.
    #[error("a choice recorded for the current path was never consumed")]
    UnconsumedChoices,

    /// A choice was requested beyond the preloaded replay information; the run
    /// cannot be resolved deterministically outside of a search context.
    #[error("a choice was requested beyond the recorded replay information")]
    UnresolvedReplayChoice,

    /// A choice over zero options was requested.
    #[error("a choice over an empty set of options was requested")]
    EmptyChoice,
}

/// Resolves nondeterministic choices made during transition generation.
///
/// The resolver enumerates every combination of choice outcomes for one source
/// state, depth-first over the choice tree: two parallel stacks record, for
/// each choice encountered along the current path, the value chosen and the
/// number of values that were available. `prepare_next_path` backtracks to the
/// deepest choice with an untaken sibling and advances it, so each distinct
/// combination is visited exactly once, with no duplicates and no omissions.
///
/// The same machinery replays recorded paths: `set_choices` preloads a path
/// and every subsequent choice returns the recorded value.
pub struct ChoiceResolver {
    /// The value chosen for each choice along the current path.
    chosen_values: Vec<i32>,
    /// The number of available values for each choice along the current path.
    /// A count of zero marks a choice whose untaken siblings were forwarded.
    value_counts: Vec<i32>,
    /// Index of the last choice handled on the current path, -1 before the first.
    choice_index: isize,
    /// Whether the next path is the first one of the current state.
    first_path: bool,
    /// Whether `forward_untaken_choices_at` is honored (undo support).
    forward_optimization: bool,
    /// Whether the resolver replays a preloaded path instead of enumerating.
    replaying: bool,
    /// Product of the probabilities of all weighted choices on the current path.
    path_probability: f64,
    /// Whether any weighted choice occurred on the current path.
    weighted: bool,
}

impl ChoiceResolver {
    pub fn new(forward_optimization: bool) -> Self {
        Self {
            chosen_values: Vec::with_capacity(64),
            value_counts: Vec::with_capacity(64),
            choice_index: -1,
            first_path: false,
            forward_optimization,
            replaying: false,
            path_probability: 1.0,
            weighted: false,
        }
    }

    /// Whether the resolver supports collapsing branches via
    /// `forward_untaken_choices_at`.
    #[inline]
    pub fn use_forward_optimization(&self) -> bool {
        self.forward_optimization
    }

    /// Prepares the resolver for enumerating all paths of the next source state.
    pub fn prepare_next_state(&mut self) {
        self.chosen_values.clear();
        self.value_counts.clear();
        self.choice_index = -1;
        self.first_path = true;
        self.replaying = false;
        self.path_probability = 1.0;
        self.weighted = false;
    }

    /// Positions the resolver to replay the next not-yet-explored combination
    /// of choices. Returns `false` once all combinations are exhausted.
    pub fn prepare_next_path(&mut self) -> Result<bool, NondeterminismError> {
        if self.choice_index != self.value_counts.len() as isize - 1 {
            return Err(NondeterminismError::UnconsumedChoices);
        }

        // Each path starts from the beginning of the choice sequence.
        self.choice_index = -1;
        self.path_probability = 1.0;
        self.weighted = false;

        if self.first_path {
            self.first_path = false;
            return Ok(true);
        }

        // Backtrack to the deepest choice that still has an untaken sibling.
        while let Some(chosen) = self.chosen_values.pop() {
            let count = self.value_counts[self.chosen_values.len()];
            if count > chosen + 1 {
                self.chosen_values.push(chosen + 1);
                return Ok(true);
            }
            self.value_counts.pop();
        }

        Ok(false)
    }

    /// Handles a nondeterministic choice between `value_count` values.
    ///
    /// On a fresh suffix of the path this explores a new option and pushes a
    /// chronological record; on a replayed prefix it returns the recorded
    /// option for this position.
    pub fn choose_index(&mut self, value_count: usize) -> Result<usize, NondeterminismError> {
        match value_count {
            0 => return Err(NondeterminismError::EmptyChoice),
            1 => return Ok(0),
            _ => {}
        }

        self.choice_index += 1;
        let index = self.choice_index as usize;

        if index < self.chosen_values.len() {
            return Ok(self.chosen_values[index] as usize);
        }

        if self.replaying {
            return Err(NondeterminismError::UnresolvedReplayChoice);
        }

        self.value_counts.push(value_count as i32);
        self.chosen_values.push(0);
        Ok(0)
    }

    /// Handles a weighted nondeterministic choice; the chosen option's
    /// probability is folded into the path probability, which the engine
    /// attaches to the resulting transition as opaque payload.
    pub fn choose_weighted(&mut self, probabilities: &[f64]) -> Result<usize, NondeterminismError> {
        let index = self.choose_index(probabilities.len())?;
        self.path_probability *= probabilities[index];
        self.weighted = true;
        Ok(index)
    }

    /// The index of the last choice that has been made on the current path.
    #[inline]
    pub fn last_choice_index(&self) -> usize {
        debug_assert!(self.choice_index >= 0, "no choice made on the current path");
        self.choice_index as usize
    }

    /// Marks all untaken siblings of the choice at `index` as already
    /// explored, collapsing the branch into the value taken on the current
    /// path. Used to prune activations whose effect turned out unobservable.
    pub fn forward_untaken_choices_at(&mut self, index: usize) {
        self.value_counts[index] = 0;
    }

    /// Snapshot of the current path's choice outcomes, the replay record for
    /// the transition generated by this path.
    pub fn choices(&self) -> SmallVec<[i32; 8]> {
        SmallVec::from_slice(&self.chosen_values)
    }

    /// The product of all weighted-choice probabilities on the current path,
    /// or `None` if the path contained no weighted choice.
    pub fn path_probability(&self) -> Option<f64> {
        self.weighted.then_some(self.path_probability)
    }

    /// Preloads the choices of a recorded path for deterministic replay.
    /// Any further fresh choice during the replay is a `NondeterminismError`.
    pub fn set_choices(&mut self, choices: &[i32]) {
        for &choice in choices {
            self.chosen_values.push(choice);
            self.value_counts.push(0);
        }
        self.replaying = true;
    }

    /// Clears all choice information.
    pub fn clear(&mut self) {
        self.chosen_values.clear();
        self.value_counts.clear();
        self.choice_index = -1;
        self.first_path = false;
        self.replaying = false;
        self.path_probability = 1.0;
        self.weighted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Runs one enumeration over `arities` independent choices per path and
    /// returns the sequence of outcomes of every path.
    fn enumerate(resolver: &mut ChoiceResolver, arities: &[usize]) -> Vec<Vec<usize>> {
        let mut paths = Vec::new();
        resolver.prepare_next_state();
        while resolver.prepare_next_path().unwrap() {
            let mut outcomes = Vec::new();
            for &n in arities {
                outcomes.push(resolver.choose_index(n).unwrap());
            }
            paths.push(outcomes);
        }
        paths
    }

    #[test]
    fn test_single_binary_choice() {
        let mut resolver = ChoiceResolver::new(true);
        let paths = enumerate(&mut resolver, &[2]);
        assert_eq!(paths, vec![vec![0], vec![1]]);
    }

    #[test]
    fn test_three_binary_choices_visit_all_combinations() {
        let mut resolver = ChoiceResolver::new(true);
        let paths = enumerate(&mut resolver, &[2, 2, 2]);
        assert_eq!(paths.len(), 8);
        let unique: std::collections::HashSet<_> = paths.iter().cloned().collect();
        assert_eq!(unique.len(), 8);
    }

    #[test]
    fn test_mixed_arities() {
        let mut resolver = ChoiceResolver::new(true);
        let paths = enumerate(&mut resolver, &[3, 2]);
        assert_eq!(paths.len(), 6);
    }

    #[test]
    fn test_unary_choice_not_recorded() {
        let mut resolver = ChoiceResolver::new(true);
        let paths = enumerate(&mut resolver, &[1, 2, 1]);
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p[0] == 0 && p[2] == 0));
    }

    #[test]
    fn test_forwarding_collapses_branch() {
        let mut resolver = ChoiceResolver::new(true);
        resolver.prepare_next_state();

        assert!(resolver.prepare_next_path().unwrap());
        assert_eq!(resolver.choose_index(2).unwrap(), 0);
        // The other sibling of this choice is declared unobservable.
        resolver.forward_untaken_choices_at(resolver.last_choice_index());
        assert_eq!(resolver.choose_index(2).unwrap(), 0);

        // Only the second (unforwarded) choice branches.
        assert!(resolver.prepare_next_path().unwrap());
        assert_eq!(resolver.choose_index(2).unwrap(), 0);
        assert_eq!(resolver.choose_index(2).unwrap(), 1);

        assert!(!resolver.prepare_next_path().unwrap());
    }

    #[test]
    fn test_replay_returns_recorded_values() {
        let mut resolver = ChoiceResolver::new(true);
        resolver.prepare_next_state();
        resolver.set_choices(&[1, 0, 2]);
        assert_eq!(resolver.choose_index(2).unwrap(), 1);
        assert_eq!(resolver.choose_index(2).unwrap(), 0);
        assert_eq!(resolver.choose_index(3).unwrap(), 2);
    }

    #[test]
    fn test_replay_beyond_recorded_choices_fails() {
        let mut resolver = ChoiceResolver::new(true);
        resolver.prepare_next_state();
        resolver.set_choices(&[1]);
        assert_eq!(resolver.choose_index(2).unwrap(), 1);
        assert_eq!(
            resolver.choose_index(2),
            Err(NondeterminismError::UnresolvedReplayChoice)
        );
    }

    #[test]
    fn test_unconsumed_choice_detected() {
        let mut resolver = ChoiceResolver::new(true);
        resolver.prepare_next_state();
        assert!(resolver.prepare_next_path().unwrap());
        resolver.choose_index(2).unwrap();
        assert!(resolver.prepare_next_path().unwrap());
        // The second path never consumes its recorded choice.
        assert_eq!(
            resolver.prepare_next_path(),
            Err(NondeterminismError::UnconsumedChoices)
        );
    }

    #[test]
    fn test_weighted_choice_tracks_path_probability() {
        let mut resolver = ChoiceResolver::new(true);
        resolver.prepare_next_state();

        assert!(resolver.prepare_next_path().unwrap());
        assert_eq!(resolver.choose_weighted(&[0.9, 0.1]).unwrap(), 0);
        assert_eq!(resolver.path_probability(), Some(0.9));

        assert!(resolver.prepare_next_path().unwrap());
        assert_eq!(resolver.choose_weighted(&[0.9, 0.1]).unwrap(), 1);
        assert_eq!(resolver.path_probability(), Some(0.1));

        assert!(!resolver.prepare_next_path().unwrap());
    }

    proptest! {
        /// `k` independent binary choices per step yield exactly `2^k`
        /// distinct paths per state.
        #[test]
        fn exhaustive_binary_enumeration(k in 1usize..8) {
            let mut resolver = ChoiceResolver::new(true);
            let arities = vec![2usize; k];
            let paths = enumerate(&mut resolver, &arities);
            prop_assert_eq!(paths.len(), 1 << k);
            let unique: std::collections::HashSet<_> = paths.iter().cloned().collect();
            prop_assert_eq!(unique.len(), 1 << k);
        }

        /// The number of enumerated paths is the product of the arities, with
        /// no duplicates, for arbitrary small choice trees.
        #[test]
        fn exhaustive_mixed_enumeration(arities in prop::collection::vec(1usize..4, 1..6)) {
            let mut resolver = ChoiceResolver::new(true);
            let paths = enumerate(&mut resolver, &arities);
            let expected: usize = arities.iter().product();
            prop_assert_eq!(paths.len(), expected);
            let unique: std::collections::HashSet<_> = paths.iter().cloned().collect();
            prop_assert_eq!(unique.len(), expected);
        }
    }
}
