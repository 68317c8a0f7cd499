//! Minimal critical fault set analysis (deductive cause-consequence
//! analysis) for hazcheck.
//!
//! Searches the power set of a model's fault universe for all minimal sets of
//! faults whose activation makes a hazard reachable, using the traversal
//! engine as an oracle and subsumption/heuristic metadata to prune the search.

pub mod analysis;
pub mod backend;
pub mod collection;
pub mod heuristics;
pub mod order;

pub use analysis::{
    FaultActivationBehavior, SafetyAnalysis, SafetyAnalysisBackend, SafetyAnalysisError,
    SafetyAnalysisResults,
};
pub use backend::{AnalysisBackend, CriticalityResult, FaultOptimizationBackend, StateGraphBackend};
pub use collection::FaultSetCollection;
pub use heuristics::{FaultSetHeuristic, MaximalSafeSetHeuristic, SubsumptionHeuristic};
pub use order::{FaultOrderModifier, OrderAnalysis, OrderRelationship, OrderRelationshipKind};
