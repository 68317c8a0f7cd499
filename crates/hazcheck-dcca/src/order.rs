//! Fault activation order constraints and order analysis.

use crate::analysis::{FaultActivationBehavior, SafetyAnalysisResults};
use crate::backend::FaultOptimizationBackend;
use hazcheck_mc::{AnalysisConfiguration, AnalysisError, TransitionModifier, TransitionSet};
use hazcheck_model::{Activation, FaultSet, ModelCreator};
use std::collections::HashMap;
use tracing::{debug, info};

/// Automaton states of the order constraint, encoded into the modifier's
/// reserved header byte of the state vector. Carrying the automaton inside
/// the state vector keeps deduplication and level synchronization correct
/// without special-casing.
const NEITHER_ACTIVATED: u8 = 0;
const FIRST_ACTIVATED: u8 = 1;
const BOTH_ACTIVATED: u8 = 2;

/// Invalidates all candidate transitions that activate two faults in the
/// wrong order: the second fault must not fire before the first (or, in
/// force-simultaneous mode, on a different step).
pub struct FaultOrderModifier {
    first: usize,
    second: usize,
    force_simultaneous: bool,
    header_offset: usize,
}

impl FaultOrderModifier {
    /// `first` and `second` are the fault identifiers expected to activate in
    /// that order.
    pub fn new(first: usize, second: usize, force_simultaneous: bool) -> Self {
        Self {
            first,
            second,
            force_simultaneous,
            header_offset: 0,
        }
    }
}

impl TransitionModifier for FaultOrderModifier {
    fn header_bytes(&self) -> usize {
        1
    }

    fn assign_header_offset(&mut self, offset: usize) {
        self.header_offset = offset;
    }

    fn modify(&mut self, transitions: &mut TransitionSet, source: Option<&[u8]>, _is_initial: bool) {
        let state = source.map_or(NEITHER_ACTIVATED, |bytes| bytes[self.header_offset]);

        for transition in transitions.iter_mut() {
            let activated = transition.activated_faults;
            let mut is_valid = true;
            let mut next_state = state;

            match state {
                NEITHER_ACTIVATED => {
                    if activated.contains(self.first) && activated.contains(self.second) {
                        if self.force_simultaneous {
                            next_state = BOTH_ACTIVATED;
                        } else {
                            is_valid = false;
                        }
                    } else if activated.contains(self.first) {
                        if self.force_simultaneous {
                            is_valid = false;
                        } else {
                            next_state = FIRST_ACTIVATED;
                        }
                    } else if activated.contains(self.second) {
                        is_valid = false;
                    }
                }
                FIRST_ACTIVATED => {
                    if activated.contains(self.second) {
                        next_state = BOTH_ACTIVATED;
                    }
                }
                BOTH_ACTIVATED => {}
                _ => unreachable!("corrupt fault-order automaton state"),
            }

            transition.is_valid = transition.is_valid && is_valid;
            transition.target[self.header_offset] = next_state;
        }
    }
}

/// The activation order relation that must hold between two faults for the
/// hazard to occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderRelationshipKind {
    /// The first fault is activated before or at the same step as the second.
    Precedes,
    /// The first fault is activated strictly before the second.
    StrictlyPrecedes,
    /// Both faults are activated at the same step.
    Simultaneously,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRelationship {
    pub first: usize,
    pub second: usize,
    pub kind: OrderRelationshipKind,
}

/// Derives, for every minimal critical fault set, the activation order
/// relations without which the hazard cannot occur, by re-checking
/// criticality under order constraints.
pub struct OrderAnalysis<'a, C: ModelCreator> {
    backend: FaultOptimizationBackend<'a, C>,
    results: &'a SafetyAnalysisResults,
}

impl<'a, C: ModelCreator> OrderAnalysis<'a, C> {
    pub fn new(
        creator: &'a C,
        results: &'a SafetyAnalysisResults,
        config: &AnalysisConfiguration,
    ) -> Self {
        Self {
            backend: FaultOptimizationBackend::new(
                creator,
                config,
                results.hazard,
                results.fault_universe.clone(),
            ),
            results,
        }
    }

    /// Computes the order relationships for all minimal critical fault sets
    /// of cardinality two or more.
    pub fn compute_order_relationships(
        &mut self,
    ) -> Result<HashMap<FaultSet, Vec<OrderRelationship>>, AnalysisError> {
        let mut relationships = HashMap::new();

        let sets = self.results.minimal_critical_sets.clone();
        for set in sets {
            if set.cardinality() < 2 {
                continue;
            }
            let relations = self.order_relationships_of(set)?;
            debug!(
                set = %self.results.describe_set(set),
                relations = relations.len(),
                "order relationships computed"
            );
            relationships.insert(set, relations);
        }

        info!(sets = relationships.len(), "order analysis complete");
        Ok(relationships)
    }

    fn order_relationships_of(
        &mut self,
        set: FaultSet,
    ) -> Result<Vec<OrderRelationship>, AnalysisError> {
        let activation = match self.results.fault_activation_behavior {
            FaultActivationBehavior::ForceOnly => Activation::Forced,
            _ => Activation::Nondeterministic,
        };

        let faults: Vec<usize> = set.iter().collect();
        let mut relations = Vec::new();

        for i in 0..faults.len() {
            for j in i + 1..faults.len() {
                let (f1, f2) = (faults[i], faults[j]);

                // Is the hazard reachable when one fault strictly precedes
                // the other?
                let f1_before_f2 = self
                    .backend
                    .check_order(f1, f2, set, activation, false)?
                    .formula_holds;
                let f2_before_f1 = self
                    .backend
                    .check_order(f2, f1, set, activation, false)?
                    .formula_holds;

                // Both orders reach the hazard: no ordering requirement.
                if !f1_before_f2 && !f2_before_f1 {
                    continue;
                }

                let simultaneous = self
                    .backend
                    .check_order(f1, f2, set, activation, true)?
                    .formula_holds;

                let relation = if !simultaneous && f1_before_f2 && f2_before_f1 {
                    Some((f1, f2, OrderRelationshipKind::Simultaneously))
                } else if !f1_before_f2 && !simultaneous {
                    Some((f1, f2, OrderRelationshipKind::Precedes))
                } else if !f1_before_f2 && simultaneous {
                    Some((f1, f2, OrderRelationshipKind::StrictlyPrecedes))
                } else if !f2_before_f1 && !simultaneous {
                    Some((f2, f1, OrderRelationshipKind::Precedes))
                } else if !f2_before_f1 && simultaneous {
                    Some((f2, f1, OrderRelationshipKind::StrictlyPrecedes))
                } else {
                    None
                };

                if let Some((first, second, kind)) = relation {
                    relations.push(OrderRelationship {
                        first,
                        second,
                        kind,
                    });
                }
            }
        }

        Ok(relations)
    }
}
