//! Engine error types.

use crate::counterexample::CounterExample;
use hazcheck_model::{ExecutionError, FaultLimitExceeded, NondeterminismError};
use thiserror::Error;

/// The capacity that was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityKind {
    /// The state storage (`model_capacity`).
    States,
    /// The per-state candidate transition buffer (`successor_capacity`).
    Successors,
    /// The traversal frontier (`stack_capacity`).
    Frontier,
}

impl std::fmt::Display for CapacityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CapacityKind::States => "state storage",
            CapacityKind::Successors => "successor transition",
            CapacityKind::Frontier => "frontier stack",
        })
    }
}

/// A configured capacity was insufficient for the model. Raised fail-fast;
/// results are never silently truncated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind} capacity of {limit} exhausted; increase the configured capacity")]
pub struct CapacityError {
    pub kind: CapacityKind,
    pub limit: usize,
}

/// Error raised while traversing a model.
#[derive(Debug, Error)]
pub enum TraversalError {
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    #[error(transparent)]
    Nondeterminism(#[from] NondeterminismError),

    /// A model exception thrown while generating a transition. The message is
    /// preserved and re-surfaced when the counterexample is replayed.
    #[error("model execution failed: {message}")]
    Execution { message: String },

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    FaultLimit(#[from] FaultLimitExceeded),

    #[error("failed to build the worker thread pool: {0}")]
    ThreadPool(String),
}

impl From<ExecutionError> for TraversalError {
    fn from(error: ExecutionError) -> Self {
        match error {
            ExecutionError::Nondeterminism(e) => TraversalError::Nondeterminism(e),
            ExecutionError::Failed { message } => TraversalError::Execution { message },
        }
    }
}

/// A traversal failure, together with the counterexample witnessing the
/// failing run when one could be captured.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct AnalysisError {
    pub error: TraversalError,
    pub counter_example: Option<CounterExample>,
}

impl AnalysisError {
    pub fn new(error: impl Into<TraversalError>) -> Self {
        Self {
            error: error.into(),
            counter_example: None,
        }
    }

    pub fn with_counter_example(
        error: impl Into<TraversalError>,
        counter_example: Option<CounterExample>,
    ) -> Self {
        Self {
            error: error.into(),
            counter_example,
        }
    }

    /// Whether the failure was a model exception (as opposed to an engine
    /// resource or configuration problem).
    pub fn is_execution_failure(&self) -> bool {
        matches!(self.error, TraversalError::Execution { .. })
    }
}
