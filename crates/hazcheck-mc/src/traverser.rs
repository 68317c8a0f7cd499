//! Level-synchronized parallel frontier traversal.

use crate::config::AnalysisConfiguration;
use crate::counterexample::CounterExample;
use crate::enumerate::enumerate_transitions;
use crate::error::{AnalysisError, CapacityError, CapacityKind, TraversalError};
use crate::storage::{StateIndex, StateStorage};
use crate::transition::{
    BatchedTransitionAction, ModifierFactory, TransitionAction, TransitionModifier, TransitionSet,
};
use hazcheck_model::{
    check_fault_count, Activation, ChoiceResolver, ExecutableModel, FaultActivationMoment,
    ModelCreator,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// The pluggable parts of one traversal: per-worker transition modifiers and
/// the sinks observing discovered transitions.
#[derive(Default)]
pub struct TraversalParameters {
    pub modifier_factories: Vec<ModifierFactory>,
    pub transition_actions: Vec<Arc<dyn TransitionAction>>,
    pub batched_actions: Vec<Arc<dyn BatchedTransitionAction>>,
}

/// Shared counters and control flags of one traversal run.
pub struct TraversalContext {
    /// Distinct states discovered.
    pub state_count: AtomicUsize,
    /// Valid transitions reported to the registered actions.
    pub transition_count: AtomicUsize,
    /// All computed candidate transitions, including invalidated ones.
    pub computed_transition_count: AtomicUsize,
    /// Completed traversal levels.
    pub level_count: AtomicUsize,
    early_termination: AtomicBool,
    failure: Mutex<Option<WorkerFailure>>,
}

struct WorkerFailure {
    error: TraversalError,
    counter_example: Option<CounterExample>,
}

impl TraversalContext {
    fn new() -> Self {
        Self {
            state_count: AtomicUsize::new(0),
            transition_count: AtomicUsize::new(0),
            computed_transition_count: AtomicUsize::new(0),
            level_count: AtomicUsize::new(0),
            early_termination: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    /// Asks all workers to stop claiming frontier work. In-flight state
    /// expansions always run to completion.
    pub fn request_early_termination(&self) {
        self.early_termination.store(true, Ordering::Relaxed);
    }

    pub fn early_termination_requested(&self) -> bool {
        self.early_termination.load(Ordering::Relaxed)
    }

    /// Records the first worker failure; later failures are dropped.
    fn record_failure(&self, error: TraversalError, counter_example: Option<CounterExample>) {
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(WorkerFailure {
                error,
                counter_example,
            });
        }
        self.request_early_termination();
    }

    fn take_failure(&self) -> Option<WorkerFailure> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn reset(&self) {
        self.state_count.store(0, Ordering::Relaxed);
        self.transition_count.store(0, Ordering::Relaxed);
        self.computed_transition_count.store(0, Ordering::Relaxed);
        self.level_count.store(0, Ordering::Relaxed);
        self.early_termination.store(false, Ordering::Relaxed);
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Summary of one completed traversal.
#[derive(Debug, Clone, Copy)]
pub struct TraversalStats {
    pub state_count: usize,
    pub transition_count: usize,
    pub computed_transition_count: usize,
    pub level_count: usize,
}

/// One worker: exclusively owns a model instance, a choice resolver, a
/// candidate buffer, and its own modifier instances. No locking is needed at
/// this level; the surrounding `Mutex` is only ever taken by the worker's own
/// broadcast thread.
struct Worker<M: ExecutableModel> {
    model: M,
    resolver: ChoiceResolver,
    transitions: TransitionSet,
    modifiers: Vec<Box<dyn TransitionModifier>>,
    next_frontier: Vec<(StateIndex, Arc<[u8]>)>,
}

/// Everything a worker needs besides its own state, borrowed for one level.
struct SharedTraversal<'a> {
    states: &'a StateStorage,
    context: &'a TraversalContext,
    config: &'a AnalysisConfiguration,
    transition_actions: &'a [Arc<dyn TransitionAction>],
    batched_actions: &'a [Arc<dyn BatchedTransitionAction>],
    header_size: usize,
    vector_size: usize,
    fault_activations: &'a [Activation],
    serialized_model: &'a [u8],
}

impl<M: ExecutableModel> Worker<M> {
    /// Expands one source state: enumerates all paths, runs the modifier
    /// chain, deduplicates targets, and reports surviving transitions.
    fn expand(
        &mut self,
        shared: &SharedTraversal<'_>,
        source: Option<(StateIndex, &[u8])>,
        depth: u32,
    ) -> Result<(), TraversalError> {
        let is_initial = source.is_none();
        let source_index = source.map(|(index, _)| index);
        let source_bytes = source.map(|(_, bytes)| bytes);

        enumerate_transitions(
            &mut self.model,
            &mut self.resolver,
            &mut self.transitions,
            source_bytes,
            shared.header_size,
            shared.config.moment_of_independent_fault_activation,
            shared.config.allow_faults_on_initial_transitions,
        )?;

        for modifier in &mut self.modifiers {
            modifier.modify(&mut self.transitions, source_bytes, is_initial);
        }

        let computed = self.transitions.len();
        let mut discovered = 0usize;
        let mut valid = 0usize;

        for transition in self.transitions.iter_mut() {
            if !transition.is_valid {
                continue;
            }

            let result =
                shared
                    .states
                    .insert(&transition.target, source_index, &transition.choices, depth)?;
            transition.target_index = result.index();

            if result.is_new() {
                discovered += 1;
                if let Some(index) = result.index() {
                    self.next_frontier
                        .push((index, Arc::from(&*transition.target)));
                }
            }
            valid += 1;
        }

        for transition in self.transitions.valid() {
            for action in shared.transition_actions {
                action.process_transition(shared.context, source_index, transition, is_initial);
            }
        }
        for action in shared.batched_actions {
            action.process_transitions(shared.context, source_index, &self.transitions, is_initial);
        }

        shared
            .context
            .state_count
            .fetch_add(discovered, Ordering::Relaxed);
        shared
            .context
            .transition_count
            .fetch_add(valid, Ordering::Relaxed);
        shared
            .context
            .computed_transition_count
            .fetch_add(computed, Ordering::Relaxed);

        Ok(())
    }

    /// Expands a state and converts any failure into the shared failure slot,
    /// capturing an exception counterexample for model failures.
    fn expand_and_record(
        &mut self,
        shared: &SharedTraversal<'_>,
        source: Option<(StateIndex, &[u8])>,
        depth: u32,
    ) {
        if let Err(error) = self.expand(shared, source, depth) {
            let counter_example = match &error {
                TraversalError::Execution { .. } if shared.config.generate_counter_example => {
                    exception_counter_example(shared, source.map(|(index, _)| index), &self.resolver)
                }
                _ => None,
            };
            shared.context.record_failure(error, counter_example);
        }
    }
}

/// Builds the counterexample for a model exception: the discovery chain of
/// the source state plus the choice record of the failing path.
fn exception_counter_example(
    shared: &SharedTraversal<'_>,
    source: Option<StateIndex>,
    resolver: &ChoiceResolver,
) -> Option<CounterExample> {
    let trace = match source {
        Some(index) => shared.states.trace_to(index)?,
        None => Vec::new(),
    };
    let failing_path = resolver.choices();

    Some(CounterExample::from_trace(
        trace,
        Some(failing_path.as_slice()),
        shared.fault_activations.to_vec(),
        shared.serialized_model.to_vec(),
        shared.header_size,
        shared.vector_size,
        shared.config.allow_faults_on_initial_transitions,
    ))
}

/// Level-synchronized parallel frontier search over an executable model.
///
/// Owns `cpu_count` workers and a dedicated thread pool of the same size.
/// Per level, one `broadcast` runs every worker until the frontier is drained;
/// the broadcast return is the level barrier, after which the workers' local
/// discoveries become the next frontier. The shared state storage handles
/// concurrent insertion; everything else a worker touches is its own.
pub struct Traverser<M: ExecutableModel> {
    config: AnalysisConfiguration,
    pool: rayon::ThreadPool,
    workers: Vec<Mutex<Worker<M>>>,
    states: StateStorage,
    context: TraversalContext,
    transition_actions: Vec<Arc<dyn TransitionAction>>,
    batched_actions: Vec<Arc<dyn BatchedTransitionAction>>,
    header_size: usize,
    vector_size: usize,
    fault_activations: Vec<Activation>,
    serialized_model: Vec<u8>,
}

impl<M: ExecutableModel> Traverser<M> {
    pub fn new<C: ModelCreator<Model = M>>(
        creator: &C,
        parameters: TraversalParameters,
        config: &AnalysisConfiguration,
    ) -> Result<Self, TraversalError> {
        config.validate()?;

        let moment = config.moment_of_independent_fault_activation;
        let forward_optimization = moment == FaultActivationMoment::OnFirstMethodWithUndo;

        let mut workers = Vec::with_capacity(config.cpu_count());
        let mut header_size = 0;
        for worker_index in 0..config.cpu_count() {
            let mut modifiers: Vec<Box<dyn TransitionModifier>> = parameters
                .modifier_factories
                .iter()
                .map(|factory| factory())
                .collect();

            let mut offset = 0;
            for modifier in &mut modifiers {
                modifier.assign_header_offset(offset);
                offset += modifier.header_bytes();
            }
            if worker_index == 0 {
                header_size = offset;
            }

            workers.push(Worker {
                model: creator.create(),
                resolver: ChoiceResolver::new(forward_optimization),
                transitions: TransitionSet::new(config.successor_capacity()),
                modifiers,
                next_frontier: Vec::new(),
            });
        }

        let probe = &workers[0].model;
        check_fault_count(probe.faults().len())?;
        let vector_size = header_size + probe.state_vector_size();

        let fault_count = probe
            .faults()
            .iter()
            .map(|f| f.identifier() + 1)
            .max()
            .unwrap_or(0);
        let mut fault_activations = vec![Activation::Suppressed; fault_count];
        for fault in probe.faults() {
            fault_activations[fault.identifier()] = fault.activation();
        }
        let serialized_model = probe.serialized_model();

        let states = if config.use_compact_state_storage {
            StateStorage::compact(config.model_capacity())
        } else {
            StateStorage::new(config.model_capacity())
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.cpu_count())
            .build()
            .map_err(|e| TraversalError::ThreadPool(e.to_string()))?;

        Ok(Self {
            config: config.clone(),
            pool,
            workers: workers.into_iter().map(Mutex::new).collect(),
            states,
            context: TraversalContext::new(),
            transition_actions: parameters.transition_actions,
            batched_actions: parameters.batched_actions,
            header_size,
            vector_size,
            fault_activations,
            serialized_model,
        })
    }

    /// The shared state storage of the current run.
    #[inline]
    pub fn states(&self) -> &StateStorage {
        &self.states
    }

    /// The shared counters and control flags of the current run.
    #[inline]
    pub fn context(&self) -> &TraversalContext {
        &self.context
    }

    /// The number of reserved leading state-vector bytes.
    #[inline]
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    /// Reconstructs a counterexample whose witnessing path ends in the given
    /// state. Returns `None` when the storage has no trace information.
    pub fn counter_example_for(&self, index: StateIndex) -> Option<CounterExample> {
        let trace = self.states.trace_to(index)?;
        Some(CounterExample::from_trace(
            trace,
            None,
            self.fault_activations.clone(),
            self.serialized_model.clone(),
            self.header_size,
            self.vector_size,
            self.config.allow_faults_on_initial_transitions,
        ))
    }

    fn shared(&self) -> SharedTraversal<'_> {
        SharedTraversal {
            states: &self.states,
            context: &self.context,
            config: &self.config,
            transition_actions: &self.transition_actions,
            batched_actions: &self.batched_actions,
            header_size: self.header_size,
            vector_size: self.vector_size,
            fault_activations: &self.fault_activations,
            serialized_model: &self.serialized_model,
        }
    }

    /// Resets storage, counters, and worker state so a new run can start.
    fn reset(&mut self) {
        self.states.clear();
        self.context.reset();
        for worker in &self.workers {
            let mut worker = worker.lock().unwrap_or_else(PoisonError::into_inner);
            worker.next_frontier.clear();
            worker.transitions.clear();
            worker.model.reset();
        }
    }

    /// Runs the traversal until the frontier is empty or early termination
    /// fires, then reports a summary.
    pub fn traverse_model_and_report(&mut self) -> Result<TraversalStats, AnalysisError> {
        let started = std::time::Instant::now();
        let stats = self.traverse()?;
        info!(
            states = stats.state_count,
            transitions = stats.transition_count,
            computed_transitions = stats.computed_transition_count,
            levels = stats.level_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model traversal complete"
        );
        Ok(stats)
    }

    /// Runs the traversal until the frontier is empty or early termination
    /// fires.
    pub fn traverse(&mut self) -> Result<TraversalStats, AnalysisError> {
        self.reset();

        info!(
            workers = self.workers.len(),
            state_vector_bytes = self.vector_size,
            "traversing model"
        );

        // The initial transitions are computed by worker 0 alone.
        let mut frontier = {
            let shared = self.shared();
            let mut worker = self.workers[0].lock().unwrap_or_else(PoisonError::into_inner);
            worker.expand_and_record(&shared, None, 0);
            std::mem::take(&mut worker.next_frontier)
        };

        let mut level = 0usize;
        while !frontier.is_empty() && !self.context.early_termination_requested() {
            if frontier.len() > self.config.stack_capacity() {
                return Err(AnalysisError::new(CapacityError {
                    kind: CapacityKind::Frontier,
                    limit: self.config.stack_capacity(),
                }));
            }

            level += 1;
            let depth = level as u32;
            let cursor = AtomicUsize::new(0);
            let shared = self.shared();
            let frontier_ref = &frontier;
            let workers = &self.workers;

            // One broadcast per frontier level; returning from it is the
            // level barrier.
            self.pool.broadcast(|ctx| {
                let mut worker = workers[ctx.index()]
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);

                loop {
                    if shared.context.early_termination_requested() {
                        break;
                    }
                    let i = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some((index, bytes)) = frontier_ref.get(i) else {
                        break;
                    };
                    worker.expand_and_record(&shared, Some((*index, bytes.as_ref())), depth);
                }
            });

            self.context.level_count.store(level, Ordering::Relaxed);
            debug!(
                level,
                frontier = frontier.len(),
                states = self.states.len(),
                "level complete"
            );

            frontier.clear();
            for worker in &self.workers {
                let mut worker = worker.lock().unwrap_or_else(PoisonError::into_inner);
                frontier.append(&mut worker.next_frontier);
            }
        }

        if let Some(failure) = self.context.take_failure() {
            return Err(AnalysisError::with_counter_example(
                failure.error,
                failure.counter_example,
            ));
        }

        Ok(TraversalStats {
            state_count: self.context.state_count.load(Ordering::Relaxed),
            transition_count: self.context.transition_count.load(Ordering::Relaxed),
            computed_transition_count: self
                .context
                .computed_transition_count
                .load(Ordering::Relaxed),
            level_count: self.context.level_count.load(Ordering::Relaxed),
        })
    }
}
