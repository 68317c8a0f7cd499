//! Invariant checking over the traversal engine.

use crate::config::AnalysisConfiguration;
use crate::counterexample::CounterExample;
use crate::error::AnalysisError;
use crate::storage::StateIndex;
use crate::transition::{CandidateTransition, ModifierFactory, TransitionAction};
use crate::traverser::{TraversalContext, TraversalParameters, Traverser};
use hazcheck_model::ModelCreator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// The outcome of checking one formula label over the full state space.
#[derive(Debug)]
pub struct InvariantAnalysisResult {
    /// Whether the checked formula held in every discovered state.
    pub formula_holds: bool,
    /// Distinct states discovered.
    pub state_count: usize,
    /// Valid transitions discovered.
    pub transition_count: usize,
    /// All computed candidate transitions, including invalidated ones.
    pub computed_transition_count: usize,
    /// Completed traversal levels.
    pub level_count: usize,
    /// The witnessing path, when a violation was found and counterexample
    /// generation is enabled.
    pub counter_example: Option<CounterExample>,
}

/// Detects the first transition whose target satisfies the checked formula
/// label (the violation indicator) and remembers the violating state.
struct ViolationAction {
    formula: usize,
    terminate_early: bool,
    violated: AtomicBool,
    violating_state: Mutex<Option<StateIndex>>,
}

impl ViolationAction {
    fn new(formula: usize, terminate_early: bool) -> Self {
        Self {
            formula,
            terminate_early,
            violated: AtomicBool::new(false),
            violating_state: Mutex::new(None),
        }
    }

    fn violated(&self) -> bool {
        self.violated.load(Ordering::Relaxed)
    }

    fn violating_state(&self) -> Option<StateIndex> {
        *self
            .violating_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl TransitionAction for ViolationAction {
    fn process_transition(
        &self,
        context: &TraversalContext,
        _source: Option<StateIndex>,
        transition: &CandidateTransition,
        _is_initial: bool,
    ) {
        if !transition.formulas.contains(self.formula) {
            return;
        }

        let mut slot = self
            .violating_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !self.violated.swap(true, Ordering::Relaxed) {
            *slot = transition.target_index;
            if self.terminate_early {
                context.request_early_termination();
            }
        }
    }
}

/// Checks whether a formula label is violated anywhere in the reachable state
/// space of a model, producing a replayable counterexample on violation.
pub struct InvariantChecker<'a, C: ModelCreator> {
    creator: &'a C,
    config: &'a AnalysisConfiguration,
    formula: usize,
    modifier_factories: Vec<ModifierFactory>,
}

impl<'a, C: ModelCreator> InvariantChecker<'a, C> {
    /// Creates a checker for the formula label with the given index.
    pub fn new(creator: &'a C, config: &'a AnalysisConfiguration, formula: usize) -> Self {
        Self {
            creator,
            config,
            formula,
            modifier_factories: Vec::new(),
        }
    }

    /// Installs an additional transition modifier, one instance per worker.
    pub fn add_modifier(&mut self, factory: ModifierFactory) {
        self.modifier_factories.push(factory);
    }

    /// Runs the check. The formula holds iff no reachable transition carries
    /// the checked label.
    pub fn check(self) -> Result<InvariantAnalysisResult, AnalysisError> {
        let action = Arc::new(ViolationAction::new(
            self.formula,
            self.config.enable_early_termination,
        ));

        let parameters = TraversalParameters {
            modifier_factories: self.modifier_factories,
            transition_actions: vec![Arc::clone(&action) as Arc<dyn TransitionAction>],
            batched_actions: Vec::new(),
        };

        let mut traverser =
            Traverser::new(self.creator, parameters, self.config).map_err(AnalysisError::new)?;
        let stats = traverser.traverse_model_and_report()?;

        let formula_holds = !action.violated();
        let counter_example = if !formula_holds && self.config.generate_counter_example {
            action
                .violating_state()
                .and_then(|index| traverser.counter_example_for(index))
        } else {
            None
        };

        if formula_holds {
            info!(formula = self.formula, "formula holds in all states");
        } else {
            debug!(formula = self.formula, "formula violated");
        }

        Ok(InvariantAnalysisResult {
            formula_holds,
            state_count: stats.state_count,
            transition_count: stats.transition_count,
            computed_transition_count: stats.computed_transition_count,
            level_count: stats.level_count,
            counter_example,
        })
    }
}
