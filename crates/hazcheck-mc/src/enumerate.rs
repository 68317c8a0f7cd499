//! Exhaustive enumeration of one state's nondeterministic paths.

use crate::error::TraversalError;
use crate::transition::{CandidateTransition, TransitionSet};
use hazcheck_model::{
    Activation, ChoiceResolver, ExecutableModel, FaultActivationMoment, FaultSet, StepContext,
};

/// Drives the model through every nondeterministic path for one source state
/// and collects one candidate transition per path.
///
/// `source` is the full state vector including reserved header bytes, or
/// `None` for initial transitions. On a model exception the enumeration stops
/// with the resolver still positioned on the failing path, so the caller can
/// capture its choice record for the counterexample.
pub fn enumerate_transitions<M: ExecutableModel>(
    model: &mut M,
    resolver: &mut ChoiceResolver,
    transitions: &mut TransitionSet,
    source: Option<&[u8]>,
    header_size: usize,
    moment: FaultActivationMoment,
    allow_faults_on_initial: bool,
) -> Result<(), TraversalError> {
    let is_initial = source.is_none();
    let faults_enabled = !is_initial || allow_faults_on_initial;

    transitions.clear();
    resolver.prepare_next_state();

    while resolver.prepare_next_path()? {
        match source {
            Some(bytes) => model.deserialize(&bytes[header_size..]),
            None => model.reset(),
        }

        for fault in model.faults_mut() {
            fault.reset();
        }

        if faults_enabled && moment == FaultActivationMoment::AtStepBeginning {
            // Eager activation: every nondeterministic fault branches before
            // any model code runs; no activation can be undone later.
            for i in 0..model.faults().len() {
                if model.faults()[i].activation() == Activation::Nondeterministic {
                    model.faults_mut()[i].try_activate(resolver)?;
                }
            }
        }

        let mut ctx = StepContext::new(resolver, faults_enabled);
        let executed = if is_initial {
            model.execute_initial_step(&mut ctx)
        } else {
            model.execute_step(&mut ctx)
        };
        executed?;

        let mut target = vec![0u8; header_size + model.state_vector_size()].into_boxed_slice();
        model.serialize(&mut target[header_size..]);

        transitions.push(CandidateTransition {
            target,
            activated_faults: FaultSet::from_activated_faults(model.faults()),
            formulas: model.evaluate_formulas(),
            probability: resolver.path_probability(),
            is_valid: true,
            choices: resolver.choices(),
            target_index: None,
        })?;
    }

    Ok(())
}
