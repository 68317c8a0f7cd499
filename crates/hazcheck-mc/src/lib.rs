//! Explicit-state traversal engine for hazcheck.
//!
//! Drives a black-box [`ExecutableModel`](hazcheck_model::ExecutableModel)
//! through every nondeterministic path of every reachable state using a
//! level-synchronized parallel frontier search, deduplicates states in a
//! shared storage, checks safety invariants, and reconstructs replayable
//! counterexamples.

pub mod config;
pub mod counterexample;
pub mod enumerate;
pub mod error;
pub mod invariant;
pub mod state_graph;
pub mod storage;
pub mod transition;
pub mod traverser;

pub use config::{AnalysisConfiguration, ConfigError};
pub use counterexample::{
    CounterExample, CounterExampleFileError, ReplayError, FILE_EXTENSION, FILE_MAGIC,
};
pub use error::{AnalysisError, CapacityError, CapacityKind, TraversalError};
pub use invariant::{InvariantAnalysisResult, InvariantChecker};
pub use state_graph::{Edge, StateGraph, StateGraphBuilder};
pub use storage::{InsertResult, StateIndex, StateRecord, StateStorage, TraceStep};
pub use transition::{
    BatchedTransitionAction, CandidateTransition, ModifierFactory, TransitionAction,
    TransitionModifier, TransitionSet,
};
pub use traverser::{TraversalContext, TraversalParameters, TraversalStats, Traverser};
