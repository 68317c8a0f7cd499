//! Modeling substrate for the hazcheck safety checker.

pub mod choice;
pub mod fault;
pub mod fault_set;
pub mod formula;
pub mod model;

pub use choice::{ChoiceResolver, NondeterminismError};
pub use fault::{
    check_fault_count, Activation, Fault, FaultLimitExceeded, SubsumptionClosure, MAX_FAULT_COUNT,
};
pub use fault_set::FaultSet;
pub use formula::StateFormulaSet;
pub use model::{
    ExecutableModel, ExecutionError, FaultActivationMoment, ModelCreator, StepContext,
};
