//! Oracle backends answering "is this fault set critical?".

use crate::order::FaultOrderModifier;
use hazcheck_mc::{
    AnalysisConfiguration, AnalysisError, BatchedTransitionAction, CounterExample,
    InvariantChecker, StateGraphBuilder, TransitionModifier, TraversalParameters, Traverser,
};
use hazcheck_model::{Activation, ExecutableModel, FaultSet, ModelCreator};
use std::sync::Arc;
use tracing::debug;

/// The verdict of one criticality check.
#[derive(Debug)]
pub struct CriticalityResult {
    /// Whether the hazard stayed unreachable: `true` means the set is safe.
    pub formula_holds: bool,
    /// The witnessing path when the set turned out critical.
    pub counter_example: Option<CounterExample>,
}

/// Evaluates candidate fault sets against the hazard formula.
///
/// Backends trade off re-running the full state-space search per candidate
/// against answering from a pre-built state graph.
pub trait AnalysisBackend {
    fn check_criticality(
        &mut self,
        set: FaultSet,
        activation: Activation,
    ) -> Result<CriticalityResult, AnalysisError>;
}

/// Wraps a model creator so every produced instance starts with the given
/// fault activation modes.
pub(crate) struct ReconfiguredCreator<'a, C: ModelCreator> {
    inner: &'a C,
    activations: Vec<Activation>,
}

impl<'a, C: ModelCreator> ReconfiguredCreator<'a, C> {
    /// Members of `set` get `activation`, all other faults are suppressed.
    pub(crate) fn for_set(
        inner: &'a C,
        universe: &[usize],
        set: FaultSet,
        activation: Activation,
    ) -> Self {
        let capacity = universe.iter().map(|id| id + 1).max().unwrap_or(0);
        let mut activations = vec![Activation::Suppressed; capacity];
        for &identifier in universe {
            activations[identifier] = if set.contains(identifier) {
                activation
            } else {
                Activation::Suppressed
            };
        }
        Self { inner, activations }
    }

    /// All faults of the universe get the given activation mode.
    pub(crate) fn uniform(inner: &'a C, universe: &[usize], activation: Activation) -> Self {
        Self::for_set(
            inner,
            universe,
            universe.iter().copied().collect(),
            activation,
        )
    }
}

impl<C: ModelCreator> ModelCreator for ReconfiguredCreator<'_, C> {
    type Model = C::Model;

    fn create(&self) -> C::Model {
        let mut model = self.inner.create();
        let activations = &self.activations;
        model.change_fault_activations(&|fault| {
            activations
                .get(fault.identifier())
                .copied()
                .unwrap_or(Activation::Suppressed)
        });
        model
    }
}

/// Answers each criticality query by re-running the traversal with the
/// candidate's fault activations; the model template is created once and
/// cheaply reconfigured between runs.
pub struct FaultOptimizationBackend<'a, C: ModelCreator> {
    creator: &'a C,
    config: AnalysisConfiguration,
    hazard: usize,
    /// Identifiers of the faults that participate in the analysis.
    universe: Vec<usize>,
}

impl<'a, C: ModelCreator> FaultOptimizationBackend<'a, C> {
    pub fn new(
        creator: &'a C,
        config: &AnalysisConfiguration,
        hazard: usize,
        universe: Vec<usize>,
    ) -> Self {
        Self {
            creator,
            config: config.clone(),
            hazard,
            universe,
        }
    }

    /// Checks criticality of `set` under an additional fault-order
    /// constraint between two of its members.
    pub fn check_order(
        &mut self,
        first: usize,
        second: usize,
        set: FaultSet,
        activation: Activation,
        force_simultaneous: bool,
    ) -> Result<CriticalityResult, AnalysisError> {
        let creator = ReconfiguredCreator::for_set(self.creator, &self.universe, set, activation);
        let mut checker = InvariantChecker::new(&creator, &self.config, self.hazard);
        checker.add_modifier(Box::new(move || {
            Box::new(FaultOrderModifier::new(first, second, force_simultaneous))
                as Box<dyn TransitionModifier>
        }));

        let result = checker.check()?;
        Ok(CriticalityResult {
            formula_holds: result.formula_holds,
            counter_example: result.counter_example,
        })
    }
}

impl<C: ModelCreator> AnalysisBackend for FaultOptimizationBackend<'_, C> {
    fn check_criticality(
        &mut self,
        set: FaultSet,
        activation: Activation,
    ) -> Result<CriticalityResult, AnalysisError> {
        let creator = ReconfiguredCreator::for_set(self.creator, &self.universe, set, activation);
        let result = InvariantChecker::new(&creator, &self.config, self.hazard).check()?;

        Ok(CriticalityResult {
            formula_holds: result.formula_holds,
            counter_example: result.counter_example,
        })
    }
}

/// Builds the state graph once, with every participating fault permitted,
/// and answers each criticality query by hazard reachability over the edges
/// whose activated faults are a subset of the candidate.
///
/// Forced activation is not expressible on the pre-built graph; queries are
/// answered with permitted-subset semantics regardless of the requested
/// activation mode. No counterexamples are reconstructed from the graph.
pub struct StateGraphBackend {
    graph: hazcheck_mc::StateGraph,
    hazard: usize,
}

impl StateGraphBackend {
    pub fn new<C: ModelCreator>(
        creator: &C,
        config: &AnalysisConfiguration,
        hazard: usize,
        universe: Vec<usize>,
    ) -> Result<Self, AnalysisError> {
        let creator = ReconfiguredCreator::uniform(creator, &universe, Activation::Nondeterministic);
        let builder = Arc::new(StateGraphBuilder::new());

        let parameters = TraversalParameters {
            modifier_factories: Vec::new(),
            transition_actions: Vec::new(),
            batched_actions: vec![Arc::clone(&builder) as Arc<dyn BatchedTransitionAction>],
        };

        let mut traverser =
            Traverser::new(&creator, parameters, config).map_err(AnalysisError::new)?;
        let stats = traverser.traverse_model_and_report()?;
        let graph = builder.build();

        debug!(
            states = stats.state_count,
            edges = graph.edge_count(),
            "state graph constructed"
        );

        Ok(Self { graph, hazard })
    }
}

impl AnalysisBackend for StateGraphBackend {
    fn check_criticality(
        &mut self,
        set: FaultSet,
        _activation: Activation,
    ) -> Result<CriticalityResult, AnalysisError> {
        Ok(CriticalityResult {
            formula_holds: !self.graph.formula_reachable(set, self.hazard),
            counter_example: None,
        })
    }
}
