//! The executable-model contract consumed by the traversal engine.

use crate::choice::{ChoiceResolver, NondeterminismError};
use crate::fault::{Activation, Fault};
use crate::formula::StateFormulaSet;
use thiserror::Error;

/// Error raised while executing a single step of a model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// A nondeterministic choice could not be resolved.
    #[error(transparent)]
    Nondeterminism(#[from] NondeterminismError),

    /// The model itself failed; the message is preserved verbatim and
    /// re-surfaced when a counterexample is replayed to the same point.
    #[error("model execution failed: {message}")]
    Failed { message: String },
}

impl ExecutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutionError::Failed {
            message: message.into(),
        }
    }
}

/// The moment at which the activation of an independent nondeterministic
/// fault is sampled during a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultActivationMoment {
    /// All nondeterministic faults branch eagerly at the beginning of the
    /// step, before any model code runs. No activation can be undone.
    AtStepBeginning,
    /// Activation is sampled lazily at the first fault-effect invocation;
    /// masked activations cannot be undone.
    OnFirstMethodWithoutUndo,
    /// Activation is sampled lazily and may be undone while unobserved,
    /// pruning branches whose effect is masked.
    #[default]
    OnFirstMethodWithUndo,
}

/// Per-step execution context handed to a model while it generates one
/// transition. Wraps the worker's choice resolver and the fault-activation
/// policy in effect for the step.
pub struct StepContext<'a> {
    resolver: &'a mut ChoiceResolver,
    faults_enabled: bool,
}

impl<'a> StepContext<'a> {
    pub fn new(resolver: &'a mut ChoiceResolver, faults_enabled: bool) -> Self {
        Self {
            resolver,
            faults_enabled,
        }
    }

    /// Resolves a model-level nondeterministic choice between `value_count`
    /// options.
    pub fn choose_index(&mut self, value_count: usize) -> Result<usize, NondeterminismError> {
        self.resolver.choose_index(value_count)
    }

    /// Resolves a weighted model-level choice; the option probability is
    /// attached to the resulting transition as opaque payload.
    pub fn choose_weighted(&mut self, probabilities: &[f64]) -> Result<usize, NondeterminismError> {
        self.resolver.choose_weighted(probabilities)
    }

    /// Samples the fault's activation for this step (if not yet sampled) and
    /// reports whether it is activated. During initial transitions with
    /// faults disabled this reports `false` without sampling.
    pub fn fault_activated(&mut self, fault: &mut Fault) -> Result<bool, NondeterminismError> {
        if !self.faults_enabled {
            return Ok(false);
        }
        fault.try_activate(self.resolver)?;
        Ok(fault.is_activated())
    }

    /// Declares that the fault's activation had no observable effect this
    /// step, allowing the resolver to collapse the branch.
    pub fn undo_activation(&mut self, fault: &mut Fault) {
        fault.undo_activation(self.resolver);
    }

    /// Whether faults participate in the current step.
    #[inline]
    pub fn faults_enabled(&self) -> bool {
        self.faults_enabled
    }
}

/// A black-box executable model: serialize/deserialize a fixed-size state,
/// execute initial and successor steps under a choice resolver, and report
/// the faults it contains.
///
/// Implemented by the (excluded) compiler/serializer layer; the engine only
/// ever drives models through this trait.
pub trait ExecutableModel: Send {
    /// The size of the model's serialized state in bytes. Constant for the
    /// lifetime of the instance.
    fn state_vector_size(&self) -> usize;

    /// Serializes the current state into `out`, which has exactly
    /// `state_vector_size` bytes.
    fn serialize(&self, out: &mut [u8]);

    /// Restores the state previously captured by `serialize`.
    fn deserialize(&mut self, state: &[u8]);

    /// Computes one initial transition under the current choice assignment.
    fn execute_initial_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), ExecutionError>;

    /// Computes one successor transition from the current state under the
    /// current choice assignment.
    fn execute_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), ExecutionError>;

    /// The faults contained in the model, with stable identifiers.
    fn faults(&self) -> &[Fault];

    /// Mutable access to the model's faults.
    fn faults_mut(&mut self) -> &mut [Fault];

    /// Reconfigures the activation mode of every fault.
    fn change_fault_activations(&mut self, f: &dyn Fn(&Fault) -> Activation) {
        for fault in self.faults_mut() {
            let activation = f(fault);
            fault.set_activation(activation);
        }
    }

    /// Evaluates the model's formula labels against the current state.
    /// Called directly after a step, while the state is the step's target.
    fn evaluate_formulas(&self) -> StateFormulaSet;

    /// An opaque serialized representation of the model itself, embedded in
    /// counterexample files so they can be replayed later.
    fn serialized_model(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Resets the model to its pre-initial state.
    fn reset(&mut self);
}

/// Factory producing independent instances of one model, one per worker.
///
/// All instances must agree on `state_vector_size` and on the fault universe
/// (identifiers, names, activation modes, subsumption metadata).
pub trait ModelCreator: Sync {
    type Model: ExecutableModel;

    fn create(&self) -> Self::Model;
}

impl<M: ExecutableModel, F: Fn() -> M + Sync> ModelCreator for F {
    type Model = M;

    fn create(&self) -> M {
        self()
    }
}
