//! State-graph recording for graph-backed analyses.

use crate::storage::StateIndex;
use crate::transition::{BatchedTransitionAction, TransitionSet};
use crate::traverser::TraversalContext;
use dashmap::DashMap;
use hazcheck_model::{FaultSet, StateFormulaSet};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// One recorded edge of the state graph.
#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub target: StateIndex,
    pub activated_faults: FaultSet,
    pub formulas: StateFormulaSet,
}

/// Records every deduplicated valid transition during one traversal, so the
/// resulting graph can be re-analyzed without re-running the model.
///
/// Registered as a batched transition action; each source state's batch
/// arrives exactly once per run.
#[derive(Default)]
pub struct StateGraphBuilder {
    initial: Mutex<Vec<Edge>>,
    edges: DashMap<StateIndex, Vec<Edge>, ahash::RandomState>,
}

impl StateGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshots the recorded graph.
    pub fn build(&self) -> StateGraph {
        let initial = self
            .initial
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let edges: HashMap<StateIndex, Vec<Edge>> = self
            .edges
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        StateGraph { initial, edges }
    }
}

impl BatchedTransitionAction for StateGraphBuilder {
    fn process_transitions(
        &self,
        _context: &TraversalContext,
        source: Option<StateIndex>,
        transitions: &TransitionSet,
        _is_initial: bool,
    ) {
        let recorded: Vec<Edge> = transitions
            .valid()
            .filter_map(|t| {
                t.target_index.map(|target| Edge {
                    target,
                    activated_faults: t.activated_faults,
                    formulas: t.formulas,
                })
            })
            .collect();

        match source {
            None => self
                .initial
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(recorded),
            Some(index) => self.edges.entry(index).or_default().extend(recorded),
        }
    }
}

/// An immutable snapshot of one traversal's transition structure: every edge
/// tagged with the faults that fired on it and the formula labels holding in
/// its target state.
#[derive(Debug, Clone)]
pub struct StateGraph {
    initial: Vec<Edge>,
    edges: HashMap<StateIndex, Vec<Edge>>,
}

impl StateGraph {
    pub fn initial_edges(&self) -> &[Edge] {
        &self.initial
    }

    pub fn successors(&self, state: StateIndex) -> &[Edge] {
        self.edges.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edge_count(&self) -> usize {
        self.initial.len() + self.edges.values().map(Vec::len).sum::<usize>()
    }

    /// Whether a state carrying the hazard label is reachable using only
    /// edges whose activated faults are a subset of `allowed`.
    pub fn formula_reachable(&self, allowed: FaultSet, formula: usize) -> bool {
        let mut visited = std::collections::HashSet::new();
        let mut queue = std::collections::VecDeque::new();

        for edge in &self.initial {
            if !edge.activated_faults.is_subset_of(allowed) {
                continue;
            }
            if edge.formulas.contains(formula) {
                return true;
            }
            if visited.insert(edge.target) {
                queue.push_back(edge.target);
            }
        }

        while let Some(state) = queue.pop_front() {
            for edge in self.successors(state) {
                if !edge.activated_faults.is_subset_of(allowed) {
                    continue;
                }
                if edge.formulas.contains(formula) {
                    return true;
                }
                if visited.insert(edge.target) {
                    queue.push_back(edge.target);
                }
            }
        }

        false
    }
}
