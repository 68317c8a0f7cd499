//! Integration tests: minimal-critical-set analysis end to end.

use hazcheck_dcca::{
    FaultActivationBehavior, MaximalSafeSetHeuristic, OrderAnalysis, OrderRelationshipKind,
    SafetyAnalysis, SafetyAnalysisBackend, SubsumptionHeuristic,
};
use hazcheck_mc::AnalysisConfiguration;
use hazcheck_model::{
    Activation, ExecutableModel, ExecutionError, Fault, FaultSet, StateFormulaSet, StepContext,
};

fn fault(identifier: usize, name: &str, activation: Activation) -> Fault {
    let mut fault = Fault::new(identifier, name);
    fault.set_activation(activation);
    fault
}

fn set(ids: &[usize]) -> FaultSet {
    ids.iter().copied().collect()
}

fn single_threaded() -> AnalysisConfiguration {
    let mut config = AnalysisConfiguration::default();
    config.set_cpu_count(1);
    config
}

/// Latches the activation of each of its two faults; the hazard (formula 0)
/// requires both to have fired at some point.
struct TwoFaultHazard {
    f1_seen: bool,
    f2_seen: bool,
    faults: Vec<Fault>,
}

impl TwoFaultHazard {
    fn new() -> Self {
        Self::with_activations(Activation::Nondeterministic, Activation::Nondeterministic)
    }

    fn with_activations(first: Activation, second: Activation) -> Self {
        Self {
            f1_seen: false,
            f2_seen: false,
            faults: vec![
                fault(0, "pump failure", first),
                fault(1, "valve stuck", second),
            ],
        }
    }
}

impl ExecutableModel for TwoFaultHazard {
    fn state_vector_size(&self) -> usize {
        1
    }

    fn serialize(&self, out: &mut [u8]) {
        out[0] = (self.f1_seen as u8) | ((self.f2_seen as u8) << 1);
    }

    fn deserialize(&mut self, state: &[u8]) {
        self.f1_seen = state[0] & 1 != 0;
        self.f2_seen = state[0] & 2 != 0;
    }

    fn execute_initial_step(&mut self, _ctx: &mut StepContext<'_>) -> Result<(), ExecutionError> {
        self.f1_seen = false;
        self.f2_seen = false;
        Ok(())
    }

    fn execute_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), ExecutionError> {
        if ctx.fault_activated(&mut self.faults[0])? {
            self.f1_seen = true;
        }
        if ctx.fault_activated(&mut self.faults[1])? {
            self.f2_seen = true;
        }
        Ok(())
    }

    fn faults(&self) -> &[Fault] {
        &self.faults
    }

    fn faults_mut(&mut self) -> &mut [Fault] {
        &mut self.faults
    }

    fn evaluate_formulas(&self) -> StateFormulaSet {
        if self.f1_seen && self.f2_seen {
            StateFormulaSet::EMPTY.with(0)
        } else {
            StateFormulaSet::EMPTY
        }
    }

    fn reset(&mut self) {
        self.f1_seen = false;
        self.f2_seen = false;
    }
}

#[test]
fn conjunction_hazard_has_exactly_one_minimal_pair() {
    let creator = || TwoFaultHazard::new();
    let config = single_threaded();

    let results = SafetyAnalysis::analyze_hazard(&creator, &config, 0).unwrap();

    assert_eq!(results.minimal_critical_sets, vec![set(&[0, 1])]);
    assert!(results.is_complete);
    // Empty set, both singletons and the pair each hit the backend once.
    assert_eq!(results.checked_set_count, 4);
    assert!(results.counter_examples.contains_key(&set(&[0, 1])));
    assert!(results.exceptions.is_empty());
    assert_eq!(results.describe_set(set(&[0, 1])), "{ pump failure, valve stuck }");
}

#[test]
fn state_graph_backend_agrees_with_on_the_fly_backend() {
    let creator = || TwoFaultHazard::new();
    let config = single_threaded();

    let mut analysis = SafetyAnalysis {
        backend: SafetyAnalysisBackend::FaultOptimizedStateGraph,
        ..SafetyAnalysis::default()
    };
    let results = analysis
        .compute_minimal_critical_sets(&creator, &config, 0, usize::MAX)
        .unwrap();

    assert_eq!(results.minimal_critical_sets, vec![set(&[0, 1])]);
}

#[test]
fn forced_activation_behavior_finds_the_same_pair() {
    let creator = || TwoFaultHazard::new();
    let config = single_threaded();

    let mut analysis = SafetyAnalysis {
        fault_activation_behavior: FaultActivationBehavior::ForceOnly,
        ..SafetyAnalysis::default()
    };
    let results = analysis
        .compute_minimal_critical_sets(&creator, &config, 0, usize::MAX)
        .unwrap();

    assert_eq!(results.minimal_critical_sets, vec![set(&[0, 1])]);
}

#[test]
fn suppressed_fault_disables_the_hazard() {
    let creator =
        || TwoFaultHazard::with_activations(Activation::Nondeterministic, Activation::Suppressed);
    let config = single_threaded();

    let results = SafetyAnalysis::analyze_hazard(&creator, &config, 0).unwrap();

    assert!(results.minimal_critical_sets.is_empty());
    assert_eq!(results.suppressed_faults, set(&[1]));
}

#[test]
fn forced_fault_appears_in_every_critical_set() {
    let creator =
        || TwoFaultHazard::with_activations(Activation::Forced, Activation::Nondeterministic);
    let config = single_threaded();

    let results = SafetyAnalysis::analyze_hazard(&creator, &config, 0).unwrap();

    assert_eq!(results.minimal_critical_sets, vec![set(&[0, 1])]);
    assert_eq!(results.forced_faults, set(&[0]));
}

#[test]
fn heuristics_do_not_change_the_result() {
    let creator = || TwoFaultHazard::new();
    let config = single_threaded();

    let probe = creator();
    let all_faults = FaultSet::from_faults(probe.faults().iter());

    let mut analysis = SafetyAnalysis::default();
    analysis.heuristics.push(Box::new(
        MaximalSafeSetHeuristic::with_cardinality_level(all_faults, FaultSet::EMPTY, 1),
    ));
    analysis
        .heuristics
        .push(Box::new(SubsumptionHeuristic::new(probe.faults())));

    let results = analysis
        .compute_minimal_critical_sets(&creator, &config, 0, usize::MAX)
        .unwrap();

    assert_eq!(results.minimal_critical_sets, vec![set(&[0, 1])]);
}

#[test]
fn max_cardinality_reports_incomplete_search() {
    let creator = || TwoFaultHazard::new();
    let config = single_threaded();

    let results = SafetyAnalysis::default()
        .compute_minimal_critical_sets(&creator, &config, 0, 1)
        .unwrap();

    assert!(results.minimal_critical_sets.is_empty());
    assert!(!results.is_complete);
}

/// A single fault whose activation crashes the component model.
struct CrashingFault {
    tick: u8,
    faults: Vec<Fault>,
}

impl ExecutableModel for CrashingFault {
    fn state_vector_size(&self) -> usize {
        1
    }

    fn serialize(&self, out: &mut [u8]) {
        out[0] = self.tick;
    }

    fn deserialize(&mut self, state: &[u8]) {
        self.tick = state[0];
    }

    fn execute_initial_step(&mut self, _ctx: &mut StepContext<'_>) -> Result<(), ExecutionError> {
        self.tick = 0;
        Ok(())
    }

    fn execute_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), ExecutionError> {
        if ctx.fault_activated(&mut self.faults[0])? {
            return Err(ExecutionError::failed("actuator controller died"));
        }
        self.tick = (self.tick + 1) % 2;
        Ok(())
    }

    fn faults(&self) -> &[Fault] {
        &self.faults
    }

    fn faults_mut(&mut self) -> &mut [Fault] {
        &mut self.faults
    }

    fn evaluate_formulas(&self) -> StateFormulaSet {
        StateFormulaSet::EMPTY
    }

    fn reset(&mut self) {
        self.tick = 0;
    }
}

#[test]
fn model_exception_marks_the_set_critical() {
    let creator = || CrashingFault {
        tick: 0,
        faults: vec![fault(0, "actuator fault", Activation::Nondeterministic)],
    };
    let config = single_threaded();

    let results = SafetyAnalysis::analyze_hazard(&creator, &config, 0).unwrap();

    assert_eq!(results.minimal_critical_sets, vec![set(&[0])]);
    let message = results.exceptions.get(&set(&[0])).unwrap();
    assert!(message.contains("actuator controller died"));

    let counter_example = results.counter_examples.get(&set(&[0])).unwrap();
    assert!(counter_example.ends_with_exception());
}

/// The hazard occurs only when the first fault's initial activation happens
/// strictly before the second fault's.
struct OrderedHazard {
    f1_seen: bool,
    f2_seen: bool,
    hazard: bool,
    faults: Vec<Fault>,
}

impl OrderedHazard {
    fn new() -> Self {
        Self {
            f1_seen: false,
            f2_seen: false,
            hazard: false,
            faults: vec![
                fault(0, "leak", Activation::Nondeterministic),
                fault(1, "ignition", Activation::Nondeterministic),
            ],
        }
    }
}

impl ExecutableModel for OrderedHazard {
    fn state_vector_size(&self) -> usize {
        1
    }

    fn serialize(&self, out: &mut [u8]) {
        out[0] =
            (self.f1_seen as u8) | ((self.f2_seen as u8) << 1) | ((self.hazard as u8) << 2);
    }

    fn deserialize(&mut self, state: &[u8]) {
        self.f1_seen = state[0] & 1 != 0;
        self.f2_seen = state[0] & 2 != 0;
        self.hazard = state[0] & 4 != 0;
    }

    fn execute_initial_step(&mut self, _ctx: &mut StepContext<'_>) -> Result<(), ExecutionError> {
        self.f1_seen = false;
        self.f2_seen = false;
        self.hazard = false;
        Ok(())
    }

    fn execute_step(&mut self, ctx: &mut StepContext<'_>) -> Result<(), ExecutionError> {
        let f1 = ctx.fault_activated(&mut self.faults[0])?;
        let f2 = ctx.fault_activated(&mut self.faults[1])?;

        let f1_new = f1 && !self.f1_seen;
        let f2_new = f2 && !self.f2_seen;

        if f2_new && self.f1_seen && !f1_new {
            self.hazard = true;
        }
        if f1_new {
            self.f1_seen = true;
        }
        if f2_new {
            self.f2_seen = true;
        }
        Ok(())
    }

    fn faults(&self) -> &[Fault] {
        &self.faults
    }

    fn faults_mut(&mut self) -> &mut [Fault] {
        &mut self.faults
    }

    fn evaluate_formulas(&self) -> StateFormulaSet {
        if self.hazard {
            StateFormulaSet::EMPTY.with(0)
        } else {
            StateFormulaSet::EMPTY
        }
    }

    fn reset(&mut self) {
        self.f1_seen = false;
        self.f2_seen = false;
        self.hazard = false;
    }
}

#[test]
fn order_analysis_derives_strict_precedence() {
    let creator = || OrderedHazard::new();
    let config = single_threaded();

    let results = SafetyAnalysis::analyze_hazard(&creator, &config, 0).unwrap();
    assert_eq!(results.minimal_critical_sets, vec![set(&[0, 1])]);

    let mut order_analysis = OrderAnalysis::new(&creator, &results, &config);
    let relationships = order_analysis.compute_order_relationships().unwrap();

    let relations = relationships.get(&set(&[0, 1])).unwrap();
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].first, 0);
    assert_eq!(relations[0].second, 1);
    assert_eq!(relations[0].kind, OrderRelationshipKind::StrictlyPrecedes);
}
