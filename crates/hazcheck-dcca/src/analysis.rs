//! The minimal-critical-set search.

use crate::backend::{AnalysisBackend, FaultOptimizationBackend, StateGraphBackend};
use crate::collection::FaultSetCollection;
use crate::heuristics::FaultSetHeuristic;
use hazcheck_mc::{AnalysisConfiguration, AnalysisError, CounterExample};
use hazcheck_model::{
    check_fault_count, Activation, ExecutableModel, FaultLimitExceeded, FaultSet, ModelCreator,
    MAX_FAULT_COUNT,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Which oracle backend evaluates candidate fault sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SafetyAnalysisBackend {
    /// Re-run the traversal per candidate, reconfiguring fault activations
    /// between runs.
    #[default]
    FaultOptimizedOnTheFly,
    /// Build the state graph once and answer candidates by fault-filtered
    /// hazard reachability.
    FaultOptimizedStateGraph,
}

/// How the faults of a candidate set are activated during its evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultActivationBehavior {
    /// Members branch nondeterministically; the hazard must be reachable for
    /// some activation pattern.
    #[default]
    Nondeterministic,
    /// Members are forced; cheaper, but may miss hazards that require a fault
    /// to stay dormant for some steps.
    ForceOnly,
    /// Check with forced members first and fall back to nondeterministic
    /// activation when the forced check stays safe.
    ForceThenFallback,
}

#[derive(Debug, Error)]
pub enum SafetyAnalysisError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    FaultLimit(#[from] FaultLimitExceeded),
}

/// The outcome of a minimal-critical-set analysis.
#[derive(Debug)]
pub struct SafetyAnalysisResults {
    /// The antichain of minimal critical fault sets, ordered by cardinality.
    pub minimal_critical_sets: Vec<FaultSet>,
    /// The number of candidate evaluations actually delegated to the backend
    /// (versus `2^n` candidates overall).
    pub checked_set_count: usize,
    /// Every set that was delegated to the backend, when collection is
    /// enabled.
    pub checked_sets: HashSet<FaultSet>,
    /// Witnessing paths per minimal critical set, where available.
    pub counter_examples: HashMap<FaultSet, CounterExample>,
    /// Model exceptions per minimal critical set.
    pub exceptions: HashMap<FaultSet, String>,
    /// Whether the search covered every cardinality (false when the
    /// configured maximum cardinality cut it short).
    pub is_complete: bool,
    pub elapsed: Duration,
    /// All fault identifiers of the model.
    pub fault_universe: Vec<usize>,
    /// Fault names by identifier.
    pub fault_names: Vec<(usize, String)>,
    pub forced_faults: FaultSet,
    pub suppressed_faults: FaultSet,
    /// The hazard formula label the analysis was conducted for.
    pub hazard: usize,
    pub fault_activation_behavior: FaultActivationBehavior,
    /// Candidates answered without a backend run.
    pub trivial_checks_count: usize,
    pub heuristic_suggestion_count: usize,
    pub heuristic_trivial_count: usize,
    pub heuristic_non_trivial_safe_count: usize,
}

impl SafetyAnalysisResults {
    /// Formats a fault set using the analyzed model's fault names.
    pub fn describe_set(&self, set: FaultSet) -> String {
        let mut names: Vec<&str> = self
            .fault_names
            .iter()
            .filter(|(id, _)| set.contains(*id))
            .map(|(_, name)| name.as_str())
            .collect();
        names.sort_unstable();
        format!("{{ {} }}", names.join(", "))
    }
}

/// Performs deductive cause-consequence analysis: searches the power set of
/// the fault universe for all minimal sets whose activation makes the hazard
/// reachable, while no strict subset does.
///
/// Candidates are enumerated in non-decreasing cardinality so minimality can
/// be asserted incrementally; known-safe supersets and known-critical subsets
/// short-circuit without a backend run, and pluggable heuristics reorder the
/// evaluation to maximize early pruning without affecting the result.
pub struct SafetyAnalysis {
    pub backend: SafetyAnalysisBackend,
    pub fault_activation_behavior: FaultActivationBehavior,
    /// Stop the whole analysis at the first model exception.
    pub stop_on_first_exception: bool,
    pub heuristics: Vec<Box<dyn FaultSetHeuristic>>,
}

impl Default for SafetyAnalysis {
    fn default() -> Self {
        Self {
            backend: SafetyAnalysisBackend::default(),
            fault_activation_behavior: FaultActivationBehavior::default(),
            stop_on_first_exception: false,
            heuristics: Vec::new(),
        }
    }
}

/// Mutable bookkeeping of one analysis run.
struct SearchState {
    safe_sets: FaultSetCollection,
    critical_sets: FaultSetCollection,
    checked_sets: HashSet<FaultSet>,
    checked_set_count: usize,
    counter_examples: HashMap<FaultSet, CounterExample>,
    exceptions: HashMap<FaultSet, String>,
    trivial_checks_count: usize,
    heuristic_suggestion_count: usize,
    heuristic_trivial_count: usize,
    heuristic_non_trivial_safe_count: usize,
}

impl SafetyAnalysis {
    /// Computes the minimal critical sets for the hazard with the default
    /// analysis settings.
    pub fn analyze_hazard<C: ModelCreator>(
        creator: &C,
        config: &AnalysisConfiguration,
        hazard: usize,
    ) -> Result<SafetyAnalysisResults, SafetyAnalysisError> {
        SafetyAnalysis::default().compute_minimal_critical_sets(creator, config, hazard, usize::MAX)
    }

    /// Computes all minimal critical fault sets for the hazard, up to the
    /// given maximum cardinality.
    pub fn compute_minimal_critical_sets<C: ModelCreator>(
        &mut self,
        creator: &C,
        config: &AnalysisConfiguration,
        hazard: usize,
        max_cardinality: usize,
    ) -> Result<SafetyAnalysisResults, SafetyAnalysisError> {
        let started = Instant::now();

        // The fault universe is read off a probe instance; all instances the
        // creator produces agree on it.
        let probe = creator.create();
        check_fault_count(probe.faults().len())?;

        let fault_universe: Vec<usize> = probe.faults().iter().map(|f| f.identifier()).collect();
        let fault_names: Vec<(usize, String)> = probe
            .faults()
            .iter()
            .map(|f| (f.identifier(), f.name().to_string()))
            .collect();

        let forced_set = FaultSet::from_faults(
            probe
                .faults()
                .iter()
                .filter(|f| f.activation() == Activation::Forced),
        );
        let suppressed_set = FaultSet::from_faults(
            probe
                .faults()
                .iter()
                .filter(|f| f.activation() == Activation::Suppressed),
        );
        let non_suppressed: Vec<usize> = probe
            .faults()
            .iter()
            .filter(|f| f.activation() != Activation::Suppressed)
            .map(|f| f.identifier())
            .collect();

        info!(
            faults = fault_universe.len(),
            suppressed = suppressed_set.cardinality(),
            forced = forced_set.cardinality(),
            nondeterministic = fault_universe.len()
                - (suppressed_set.cardinality() + forced_set.cardinality()) as usize,
            backend = ?self.backend,
            "running deductive cause-consequence analysis"
        );

        let mut backend: Box<dyn AnalysisBackend + '_> = match self.backend {
            SafetyAnalysisBackend::FaultOptimizedOnTheFly => Box::new(FaultOptimizationBackend::new(
                creator,
                config,
                hazard,
                fault_universe.clone(),
            )),
            SafetyAnalysisBackend::FaultOptimizedStateGraph => Box::new(StateGraphBackend::new(
                creator,
                config,
                hazard,
                fault_universe.clone(),
            )?),
        };

        let mut state = SearchState {
            safe_sets: FaultSetCollection::new(MAX_FAULT_COUNT),
            critical_sets: FaultSetCollection::new(MAX_FAULT_COUNT),
            checked_sets: HashSet::new(),
            checked_set_count: 0,
            counter_examples: HashMap::new(),
            exceptions: HashMap::new(),
            trivial_checks_count: 0,
            heuristic_suggestion_count: 0,
            heuristic_trivial_count: 0,
            heuristic_non_trivial_safe_count: 0,
        };

        // Safe sets of the current cardinality seed the next power-set level.
        let mut current_safe: HashSet<FaultSet> = HashSet::new();
        let mut is_complete = true;

        // Check fault sets by increasing cardinality: the empty set first,
        // then all singletons, and so on. Sets that are critical by
        // monotonicity are never generated.
        'levels: for cardinality in 0..=non_suppressed.len() {
            let generated = generate_power_set_level(
                cardinality,
                &non_suppressed,
                &mut current_safe,
                &state.critical_sets,
            );
            current_safe.clear();

            // Sets conflicting with forced or suppressed faults are treated
            // as safe so their supersets are still generated.
            let mut sets = remove_invalid_sets(generated, &mut current_safe, forced_set, suppressed_set);
            if sets.is_empty() {
                continue;
            }

            if cardinality > max_cardinality {
                is_complete = false;
                break;
            }

            debug!(cardinality, count = sets.len(), "checking fault sets");

            let mut sets_to_check: VecDeque<FaultSet> = sets.iter().copied().collect();
            for heuristic in &mut self.heuristics {
                let before = sets_to_check.len();
                heuristic.augment(cardinality as u32, &mut sets_to_check);
                state.heuristic_suggestion_count += sets_to_check.len().saturating_sub(before);
            }

            // Heuristics may add further sets during the loop.
            while let Some(set) = sets_to_check.pop_front() {
                let is_current_level = sets.remove(&set);
                let is_valid = (is_current_level || is_valid_set(set, forced_set, suppressed_set))
                    && set.cardinality() as usize <= max_cardinality;

                let mut is_safe = true;
                if is_valid {
                    is_safe = self.check_set(
                        set,
                        backend.as_mut(),
                        &mut state,
                        !is_current_level,
                        config.collect_fault_sets,
                        &fault_names,
                    )?;
                }

                if is_safe && is_current_level {
                    current_safe.insert(set);
                }

                for heuristic in &mut self.heuristics {
                    heuristic.update(&mut sets_to_check, set, is_safe);
                }

                if self.stop_on_first_exception && !state.exceptions.is_empty() {
                    break 'levels;
                }
            }
        }

        // Heuristics may have discovered non-minimal critical sets; only the
        // antichain floor survives, along with its bookkeeping.
        let minimal = state.critical_sets.minimal_sets();
        for set in state.critical_sets.iter() {
            if !minimal.contains(&set) {
                state.exceptions.remove(&set);
                state.counter_examples.remove(&set);
            }
        }

        let mut minimal_critical_sets: Vec<FaultSet> = minimal.into_iter().collect();
        minimal_critical_sets.sort_by_key(|set| (set.cardinality(), set.bits()));

        let elapsed = started.elapsed();
        info!(
            minimal_critical_sets = minimal_critical_sets.len(),
            checked_sets = state.checked_set_count,
            trivial_checks = state.trivial_checks_count,
            elapsed_ms = elapsed.as_millis() as u64,
            "analysis complete"
        );

        Ok(SafetyAnalysisResults {
            minimal_critical_sets,
            checked_set_count: state.checked_set_count,
            checked_sets: state.checked_sets,
            counter_examples: state.counter_examples,
            exceptions: state.exceptions,
            is_complete,
            elapsed,
            fault_universe,
            fault_names,
            forced_faults: forced_set,
            suppressed_faults: suppressed_set,
            hazard,
            fault_activation_behavior: self.fault_activation_behavior,
            trivial_checks_count: state.trivial_checks_count,
            heuristic_suggestion_count: state.heuristic_suggestion_count,
            heuristic_trivial_count: state.heuristic_trivial_count,
            heuristic_non_trivial_safe_count: state.heuristic_non_trivial_safe_count,
        })
    }

    /// Decides whether `set` is safe, consulting the trivial verdicts before
    /// delegating to the backend per the activation behavior policy.
    fn check_set(
        &self,
        set: FaultSet,
        backend: &mut dyn AnalysisBackend,
        state: &mut SearchState,
        is_heuristic_suggestion: bool,
        collect_fault_sets: bool,
        fault_names: &[(usize, String)],
    ) -> Result<bool, SafetyAnalysisError> {
        // A known safe superset covers this set; its subsets are covered too,
        // so nothing is recorded.
        if state.safe_sets.contains_superset_of(set) {
            state.trivial_checks_count += 1;
            if is_heuristic_suggestion {
                state.heuristic_trivial_count += 1;
            }
            return Ok(true);
        }

        // Trivially critical sets are never generated by the level
        // generation; only heuristic suggestions can hit this.
        if is_heuristic_suggestion && state.critical_sets.contains_subset_of(set) {
            state.trivial_checks_count += 1;
            state.heuristic_trivial_count += 1;
            return Ok(false);
        }

        let mut is_safe = true;

        if matches!(
            self.fault_activation_behavior,
            FaultActivationBehavior::ForceOnly | FaultActivationBehavior::ForceThenFallback
        ) {
            is_safe = self.check_with_activation(
                set,
                Activation::Forced,
                backend,
                state,
                collect_fault_sets,
                fault_names,
            )?;
        }

        if is_safe && self.fault_activation_behavior == FaultActivationBehavior::ForceThenFallback {
            debug!("forced activation stayed safe, checking nondeterministic activation");
        }

        if is_safe && self.fault_activation_behavior != FaultActivationBehavior::ForceOnly {
            is_safe = self.check_with_activation(
                set,
                Activation::Nondeterministic,
                backend,
                state,
                collect_fault_sets,
                fault_names,
            )?;
        }

        if is_safe {
            // Remembering non-trivially safe sets prunes their subsets.
            state.safe_sets.add(set);
            if is_heuristic_suggestion {
                state.heuristic_non_trivial_safe_count += 1;
            }
        }

        Ok(is_safe)
    }

    fn check_with_activation(
        &self,
        set: FaultSet,
        activation: Activation,
        backend: &mut dyn AnalysisBackend,
        state: &mut SearchState,
        collect_fault_sets: bool,
        fault_names: &[(usize, String)],
    ) -> Result<bool, SafetyAnalysisError> {
        match backend.check_criticality(set, activation) {
            Ok(result) => {
                state.checked_set_count += 1;
                if collect_fault_sets {
                    state.checked_sets.insert(set);
                }

                if !result.formula_holds {
                    debug!(set = %describe(fault_names, set), "critical");
                    state.critical_sets.add(set);
                    if let Some(counter_example) = result.counter_example {
                        state.counter_examples.insert(set, counter_example);
                    }
                } else {
                    debug!(set = %describe(fault_names, set), "safe");
                }

                Ok(result.formula_holds)
            }
            Err(error) if error.is_execution_failure() => {
                // A model exception during the check marks the set critical.
                debug!(set = %describe(fault_names, set), error = %error, "critical (exception)");
                state.checked_set_count += 1;
                if collect_fault_sets {
                    state.checked_sets.insert(set);
                }
                state.critical_sets.add(set);
                state.exceptions.insert(set, error.error.to_string());
                if let Some(counter_example) = error.counter_example {
                    state.counter_examples.insert(set, counter_example);
                }
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }
}

fn describe(fault_names: &[(usize, String)], set: FaultSet) -> String {
    let mut names: Vec<&str> = fault_names
        .iter()
        .filter(|(id, _)| set.contains(*id))
        .map(|(_, name)| name.as_str())
        .collect();
    names.sort_unstable();
    format!("{{ {} }}", names.join(", "))
}

/// The set must contain all forced faults and no suppressed faults.
#[inline]
fn is_valid_set(set: FaultSet, forced: FaultSet, suppressed: FaultSet) -> bool {
    forced.is_subset_of(set) && suppressed.intersection(set).is_empty()
}

fn remove_invalid_sets(
    sets: HashSet<FaultSet>,
    current_safe: &mut HashSet<FaultSet>,
    forced: FaultSet,
    suppressed: FaultSet,
) -> HashSet<FaultSet> {
    if suppressed.is_empty() && forced.is_empty() {
        return sets;
    }

    let mut valid = HashSet::new();
    for set in sets {
        if is_valid_set(set, forced, suppressed) {
            valid.insert(set);
        } else {
            // Treated as safe so the supersets are still generated.
            current_safe.insert(set);
        }
    }
    valid
}

/// Generates the power-set level with the given cardinality from the safe
/// sets of the previous level, skipping sets with a known-critical subset.
fn generate_power_set_level(
    cardinality: usize,
    faults: &[usize],
    previous_safe: &mut HashSet<FaultSet>,
    critical_sets: &FaultSetCollection,
) -> HashSet<FaultSet> {
    let mut result = HashSet::new();

    match cardinality {
        0 => {
            result.insert(FaultSet::EMPTY);
        }
        1 => {
            // If the empty set is already critical there are no further
            // minimal critical sets.
            if !previous_safe.is_empty() {
                for &fault in faults {
                    let set = FaultSet::singleton(fault);
                    if !critical_sets.contains(set) {
                        result.insert(set);
                    }
                }
            }
        }
        _ => {
            // Union every safe set of the previous level with one fresh
            // fault, avoiding duplicate generation: once a fault has been
            // unioned over all safe sets, safe sets containing it can no
            // longer produce new sets.
            let mut sets_to_remove: Vec<FaultSet> = Vec::new();
            for (i, &fault) in faults.iter().enumerate() {
                sets_to_remove.clear();

                for &safe_set in previous_safe.iter() {
                    if safe_set.contains(fault) {
                        sets_to_remove.push(safe_set);
                        continue;
                    }

                    let set = safe_set.add(fault);

                    // The set is trivially critical iff one of its direct
                    // subsets is critical: faults[..i] are not in the set,
                    // and removing `fault` yields `safe_set`, which is safe.
                    let mut trivially_critical = critical_sets.contains(set);
                    for &other in &faults[i + 1..] {
                        if trivially_critical {
                            break;
                        }
                        if set.contains(other) && !previous_safe.contains(&set.remove(other)) {
                            trivially_critical = true;
                        }
                    }

                    if !trivially_critical {
                        result.insert(set);
                    }
                }

                // All supersets of these sets have either been generated
                // already or are critical.
                for set in &sets_to_remove {
                    previous_safe.remove(set);
                }
                if previous_safe.is_empty() {
                    break;
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[usize]) -> FaultSet {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_level_zero_is_empty_set() {
        let critical = FaultSetCollection::new(4);
        let mut safe = HashSet::new();
        let level = generate_power_set_level(0, &[0, 1], &mut safe, &critical);
        assert_eq!(level.len(), 1);
        assert!(level.contains(&FaultSet::EMPTY));
    }

    #[test]
    fn test_singletons_skipped_when_empty_set_critical() {
        let critical = FaultSetCollection::new(4);
        let mut safe = HashSet::new(); // empty set was critical, so no safe sets
        let level = generate_power_set_level(1, &[0, 1], &mut safe, &critical);
        assert!(level.is_empty());
    }

    #[test]
    fn test_pairs_generated_from_safe_singletons() {
        let critical = FaultSetCollection::new(4);
        let mut safe: HashSet<FaultSet> =
            [set(&[0]), set(&[1]), set(&[2])].into_iter().collect();
        let level = generate_power_set_level(2, &[0, 1, 2], &mut safe, &critical);
        assert_eq!(level.len(), 3);
        assert!(level.contains(&set(&[0, 1])));
        assert!(level.contains(&set(&[0, 2])));
        assert!(level.contains(&set(&[1, 2])));
    }

    #[test]
    fn test_supersets_of_critical_singleton_not_generated() {
        let mut critical = FaultSetCollection::new(4);
        critical.add(set(&[0]));
        // Fault 0 was critical alone, so only {1, 2} can still be generated.
        let mut safe: HashSet<FaultSet> = [set(&[1]), set(&[2])].into_iter().collect();
        let level = generate_power_set_level(2, &[0, 1, 2], &mut safe, &critical);
        assert_eq!(level.len(), 1);
        assert!(level.contains(&set(&[1, 2])));
    }

    #[test]
    fn test_invalid_sets_become_safe_seeds() {
        let forced = set(&[0]);
        let mut current_safe = HashSet::new();
        let sets: HashSet<FaultSet> = [set(&[0, 1]), set(&[1])].into_iter().collect();
        let valid = remove_invalid_sets(sets, &mut current_safe, forced, FaultSet::EMPTY);

        // {1} misses the forced fault: filtered out but seeded as safe.
        assert_eq!(valid.len(), 1);
        assert!(valid.contains(&set(&[0, 1])));
        assert!(current_safe.contains(&set(&[1])));
    }
}
