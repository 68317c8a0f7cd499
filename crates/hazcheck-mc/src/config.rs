//! Analysis configuration.

use hazcheck_model::FaultActivationMoment;
use thiserror::Error;

/// The smallest accepted value for the stack, successor, and model capacities.
const MIN_CAPACITY: usize = 1024;

/// Error raised when a configuration parameter is out of range. Raised at
/// configuration-set time, never deferred into the search.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be at least {min}, got {value}")]
    CapacityTooSmall {
        name: &'static str,
        min: usize,
        value: usize,
    },

    #[error("compact state storage cannot reconstruct counterexamples; disable one of the two")]
    CompactStorageWithCounterExamples,
}

/// Configures the traversal engine: CPU and memory budget, counterexample
/// generation, and fault-activation policy.
///
/// A configuration value is passed by reference into every engine entry
/// point; there is no process-wide default instance.
#[derive(Debug, Clone)]
pub struct AnalysisConfiguration {
    cpu_count: usize,
    stack_capacity: usize,
    successor_capacity: usize,
    model_capacity: usize,

    /// Whether faults may already be activated on initial transitions.
    pub allow_faults_on_initial_transitions: bool,
    /// Whether a counterexample is generated when a violation is detected or
    /// an unhandled model exception occurs.
    pub generate_counter_example: bool,
    /// Whether checked fault sets are collected during minimal-critical-set
    /// analysis.
    pub collect_fault_sets: bool,
    /// Whether workers stop claiming frontier work once a violation has been
    /// detected.
    pub enable_early_termination: bool,
    /// Whether states are deduplicated by 64-bit fingerprints only (8 bytes
    /// per state, probabilistic, no trace reconstruction).
    pub use_compact_state_storage: bool,
    /// The moment at which independent fault activation is sampled.
    pub moment_of_independent_fault_activation: FaultActivationMoment,
}

impl Default for AnalysisConfiguration {
    fn default() -> Self {
        Self {
            cpu_count: available_cores(),
            stack_capacity: 1 << 20,
            successor_capacity: 1 << 14,
            model_capacity: 1 << 20,
            allow_faults_on_initial_transitions: false,
            generate_counter_example: true,
            collect_fault_sets: true,
            enable_early_termination: true,
            use_compact_state_storage: false,
            moment_of_independent_fault_activation: FaultActivationMoment::default(),
        }
    }
}

impl AnalysisConfiguration {
    /// The number of worker threads used for traversal.
    #[inline]
    pub fn cpu_count(&self) -> usize {
        self.cpu_count
    }

    /// Sets the number of worker threads, clamped to `[1, #cores]`.
    pub fn set_cpu_count(&mut self, count: usize) {
        self.cpu_count = count.clamp(1, available_cores());
    }

    /// The number of states the traversal frontier can hold.
    #[inline]
    pub fn stack_capacity(&self) -> usize {
        self.stack_capacity
    }

    pub fn set_stack_capacity(&mut self, capacity: usize) -> Result<(), ConfigError> {
        check_capacity("stack capacity", capacity)?;
        self.stack_capacity = capacity;
        Ok(())
    }

    /// The number of candidate transitions that can be computed per state.
    #[inline]
    pub fn successor_capacity(&self) -> usize {
        self.successor_capacity
    }

    pub fn set_successor_capacity(&mut self, capacity: usize) -> Result<(), ConfigError> {
        check_capacity("successor capacity", capacity)?;
        self.successor_capacity = capacity;
        Ok(())
    }

    /// The number of distinct states that can be stored during traversal.
    #[inline]
    pub fn model_capacity(&self) -> usize {
        self.model_capacity
    }

    pub fn set_model_capacity(&mut self, capacity: usize) -> Result<(), ConfigError> {
        check_capacity("model capacity", capacity)?;
        self.model_capacity = capacity;
        Ok(())
    }

    /// Checks cross-field consistency. Called by every engine entry point.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.use_compact_state_storage && self.generate_counter_example {
            return Err(ConfigError::CompactStorageWithCounterExamples);
        }
        Ok(())
    }
}

fn check_capacity(name: &'static str, value: usize) -> Result<(), ConfigError> {
    if value < MIN_CAPACITY {
        return Err(ConfigError::CapacityTooSmall {
            name,
            min: MIN_CAPACITY,
            value,
        });
    }
    Ok(())
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
