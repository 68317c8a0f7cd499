//! Replayable counterexamples and their on-disk format.
//!
//! # File format
//!
//! Binary, little-endian, bit-exact:
//!
//! ```text
//! i32  magic (0x3FE0DD04)
//! u8   ends_with_exception
//! i32  serialized model length, followed by that many bytes
//! i32  fault count, followed by one i32 activation mode per fault
//! i32  state-structure header size (reserved leading state-vector bytes)
//! i32  state-structure flags (bit 0: faults allowed on initial transitions)
//! i32  step count + 1
//! i32  state vector size
//!      (step count + 1) state vectors, concatenated
//! i32  replay info length, then per step: i32 choice count + choices
//! ```

use crate::storage::TraceStep;
use hazcheck_model::{
    Activation, ChoiceResolver, ExecutableModel, ExecutionError, NondeterminismError,
};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

/// The first few bytes that indicate a valid counterexample file.
pub const FILE_MAGIC: i32 = 0x3FE0DD04;

/// The file extension used by counterexample files.
pub const FILE_EXTENSION: &str = "hazce";

/// Error raised when replaying a counterexample.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Nondeterminism(#[from] NondeterminismError),

    /// Replaying a step did not reproduce the recorded target state.
    #[error("replay diverged from the recorded state sequence at step {step}")]
    StateDivergence { step: usize },

    /// The model failed at a step where the recording completed normally.
    #[error("unexpected model failure during replay of step {step}: {message}")]
    UnexpectedFailure { step: usize, message: String },

    /// The recording ends with an exception that did not re-occur.
    #[error("the recorded exception did not re-occur at the final step")]
    MissingException,

    #[error("step {step} is out of range for a counterexample with {step_count} steps")]
    StepOutOfRange { step: usize, step_count: usize },
}

/// Error raised when reading or writing a counterexample file.
#[derive(Debug, Error)]
pub enum CounterExampleFileError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("not a counterexample file (magic {0:#010x})")]
    BadMagic(i32),

    #[error("malformed counterexample file: {0}")]
    Malformed(&'static str),
}

/// A replayable witness path disproving an invariant.
///
/// Holds `step_count + 1` state-vector snapshots (the first is a zeroed
/// pre-initial placeholder) plus, per step, the exact sequence of choice
/// outcomes taken by the resolver on the witnessing path. Replaying the
/// recorded choices from each snapshot deterministically regenerates the
/// next snapshot byte-for-byte.
#[derive(Debug, Clone)]
pub struct CounterExample {
    states: Vec<Box<[u8]>>,
    replay_info: Vec<Vec<i32>>,
    fault_activations: Vec<Activation>,
    serialized_model: Vec<u8>,
    header_size: usize,
    allow_faults_on_initial: bool,
    ends_with_exception: bool,
}

impl CounterExample {
    pub(crate) fn new(
        states: Vec<Box<[u8]>>,
        replay_info: Vec<Vec<i32>>,
        fault_activations: Vec<Activation>,
        serialized_model: Vec<u8>,
        header_size: usize,
        allow_faults_on_initial: bool,
        ends_with_exception: bool,
    ) -> Self {
        assert_eq!(
            replay_info.len() + 1,
            states.len(),
            "invalid replay info length"
        );
        Self {
            states,
            replay_info,
            fault_activations,
            serialized_model,
            header_size,
            allow_faults_on_initial,
            ends_with_exception,
        }
    }

    /// Assembles a counterexample from a reconstructed discovery trace,
    /// optionally extended by the choice record of a failing path.
    pub(crate) fn from_trace(
        trace: Vec<TraceStep>,
        failing_path: Option<&[i32]>,
        fault_activations: Vec<Activation>,
        serialized_model: Vec<u8>,
        header_size: usize,
        vector_size: usize,
        allow_faults_on_initial: bool,
    ) -> Self {
        let ends_with_exception = failing_path.is_some();
        let mut states = Vec::with_capacity(trace.len() + 2);
        let mut replay_info = Vec::with_capacity(trace.len() + 1);

        // The pre-initial placeholder the first replayed step starts from.
        states.push(vec![0u8; vector_size].into_boxed_slice());
        for step in trace {
            states.push(step.state.to_vec().into_boxed_slice());
            replay_info.push(step.replay.to_vec());
        }
        if let Some(choices) = failing_path {
            replay_info.push(choices.to_vec());
            states.push(vec![0u8; vector_size].into_boxed_slice());
        }

        Self::new(
            states,
            replay_info,
            fault_activations,
            serialized_model,
            header_size,
            allow_faults_on_initial,
            ends_with_exception,
        )
    }

    /// The number of steps the counterexample consists of.
    #[inline]
    pub fn step_count(&self) -> usize {
        self.states.len() - 1
    }

    /// The recorded state-vector snapshots, the pre-initial placeholder first.
    #[inline]
    pub fn states(&self) -> &[Box<[u8]>] {
        &self.states
    }

    /// The per-step choice records.
    #[inline]
    pub fn replay_info(&self) -> &[Vec<i32>] {
        &self.replay_info
    }

    /// The fault activation modes in effect during the recorded run,
    /// indexed by fault identifier.
    #[inline]
    pub fn fault_activations(&self) -> &[Activation] {
        &self.fault_activations
    }

    /// Whether the recorded run ended with a model exception.
    #[inline]
    pub fn ends_with_exception(&self) -> bool {
        self.ends_with_exception
    }

    /// The opaque serialized model the counterexample was generated for.
    #[inline]
    pub fn serialized_model(&self) -> &[u8] {
        &self.serialized_model
    }

    /// Restores the recorded fault activation modes on a model instance.
    pub fn apply_fault_activations<M: ExecutableModel>(&self, model: &mut M) {
        let activations = self.fault_activations.clone();
        model.change_fault_activations(&|fault| {
            activations
                .get(fault.identifier())
                .copied()
                .unwrap_or(Activation::Suppressed)
        });
    }

    /// Replays the step with the given zero-based index and verifies that the
    /// model reproduces the recorded target state. Returns `Ok(Some(_))`
    /// when the model raised an execution failure during the step.
    pub fn replay_step<M: ExecutableModel>(
        &self,
        model: &mut M,
        resolver: &mut ChoiceResolver,
        step: usize,
    ) -> Result<Option<ExecutionError>, ReplayError> {
        self.replay_step_inner(model, resolver, step, true)
    }

    fn replay_step_inner<M: ExecutableModel>(
        &self,
        model: &mut M,
        resolver: &mut ChoiceResolver,
        step: usize,
        verify: bool,
    ) -> Result<Option<ExecutionError>, ReplayError> {
        if step >= self.step_count() {
            return Err(ReplayError::StepOutOfRange {
                step,
                step_count: self.step_count(),
            });
        }

        resolver.clear();
        resolver.prepare_next_state();
        resolver.set_choices(&self.replay_info[step]);

        model.deserialize(&self.states[step][self.header_size..]);
        for fault in model.faults_mut() {
            fault.reset();
        }

        let faults_enabled = step > 0 || self.allow_faults_on_initial;
        let mut ctx = hazcheck_model::StepContext::new(resolver, faults_enabled);
        let executed = if step == 0 {
            model.execute_initial_step(&mut ctx)
        } else {
            model.execute_step(&mut ctx)
        };

        match executed {
            Ok(()) => {}
            Err(ExecutionError::Nondeterminism(e)) => return Err(e.into()),
            Err(failure) => return Ok(Some(failure)),
        }

        if verify {
            let expected = &self.states[step + 1][self.header_size..];
            let mut produced = vec![0u8; expected.len()];
            model.serialize(&mut produced);
            if produced != expected {
                return Err(ReplayError::StateDivergence { step });
            }
        }

        Ok(None)
    }

    /// Replays the entire counterexample in lock-step with the model,
    /// verifying each intermediate state. Returns the recorded exception
    /// when the counterexample ends with one.
    pub fn replay<M: ExecutableModel>(
        &self,
        model: &mut M,
        resolver: &mut ChoiceResolver,
    ) -> Result<Option<ExecutionError>, ReplayError> {
        self.apply_fault_activations(model);

        let last = self.step_count().saturating_sub(1);
        for step in 0..self.step_count() {
            let expect_failure = step == last && self.ends_with_exception;
            let outcome = self.replay_step_inner(model, resolver, step, !expect_failure)?;

            match outcome {
                None if expect_failure => return Err(ReplayError::MissingException),
                None => {}
                Some(failure) if expect_failure => return Ok(Some(failure)),
                Some(failure) => {
                    return Err(ReplayError::UnexpectedFailure {
                        step,
                        message: failure.to_string(),
                    })
                }
            }
        }

        Ok(None)
    }

    /// Saves the counterexample to the given file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CounterExampleFileError> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.to_writer(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads a counterexample from the given file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CounterExampleFileError> {
        Self::from_reader(&mut BufReader::new(File::open(path)?))
    }

    pub fn to_writer(&self, writer: &mut impl Write) -> Result<(), CounterExampleFileError> {
        write_i32(writer, FILE_MAGIC)?;
        writer.write_all(&[self.ends_with_exception as u8])?;

        write_i32(writer, self.serialized_model.len() as i32)?;
        writer.write_all(&self.serialized_model)?;

        write_i32(writer, self.fault_activations.len() as i32)?;
        for activation in &self.fault_activations {
            write_i32(writer, encode_activation(*activation))?;
        }

        write_i32(writer, self.header_size as i32)?;
        write_i32(writer, self.allow_faults_on_initial as i32)?;

        write_i32(writer, self.states.len() as i32)?;
        let vector_size = self.states.first().map_or(0, |s| s.len());
        write_i32(writer, vector_size as i32)?;
        for state in &self.states {
            writer.write_all(state)?;
        }

        write_i32(writer, self.replay_info.len() as i32)?;
        for choices in &self.replay_info {
            write_i32(writer, choices.len() as i32)?;
            for &choice in choices {
                write_i32(writer, choice)?;
            }
        }

        Ok(())
    }

    pub fn from_reader(reader: &mut impl Read) -> Result<Self, CounterExampleFileError> {
        let magic = read_i32(reader)?;
        if magic != FILE_MAGIC {
            return Err(CounterExampleFileError::BadMagic(magic));
        }

        let mut flag = [0u8; 1];
        reader.read_exact(&mut flag)?;
        let ends_with_exception = flag[0] != 0;

        let model_len = read_len(reader, "serialized model length")?;
        let mut serialized_model = vec![0u8; model_len];
        reader.read_exact(&mut serialized_model)?;

        let fault_count = read_len(reader, "fault count")?;
        let mut fault_activations = Vec::with_capacity(fault_count);
        for _ in 0..fault_count {
            fault_activations.push(decode_activation(read_i32(reader)?)?);
        }

        let header_size = read_len(reader, "state-structure header size")?;
        let allow_faults_on_initial = read_i32(reader)? != 0;

        let state_count = read_len(reader, "state count")?;
        if state_count == 0 {
            return Err(CounterExampleFileError::Malformed("no states"));
        }
        let vector_size = read_len(reader, "state vector size")?;
        let mut states = Vec::with_capacity(state_count);
        for _ in 0..state_count {
            let mut state = vec![0u8; vector_size];
            reader.read_exact(&mut state)?;
            states.push(state.into_boxed_slice());
        }

        let replay_len = read_len(reader, "replay info length")?;
        if replay_len != state_count - 1 {
            return Err(CounterExampleFileError::Malformed(
                "replay info length does not match state count",
            ));
        }
        let mut replay_info = Vec::with_capacity(replay_len);
        for _ in 0..replay_len {
            let choice_count = read_len(reader, "choice count")?;
            let mut choices = Vec::with_capacity(choice_count);
            for _ in 0..choice_count {
                choices.push(read_i32(reader)?);
            }
            replay_info.push(choices);
        }

        Ok(Self::new(
            states,
            replay_info,
            fault_activations,
            serialized_model,
            header_size,
            allow_faults_on_initial,
            ends_with_exception,
        ))
    }
}

fn encode_activation(activation: Activation) -> i32 {
    match activation {
        Activation::Forced => 0,
        Activation::Suppressed => 1,
        Activation::Nondeterministic => 2,
    }
}

fn decode_activation(value: i32) -> Result<Activation, CounterExampleFileError> {
    match value {
        0 => Ok(Activation::Forced),
        1 => Ok(Activation::Suppressed),
        2 => Ok(Activation::Nondeterministic),
        _ => Err(CounterExampleFileError::Malformed(
            "unknown fault activation mode",
        )),
    }
}

fn write_i32(writer: &mut impl Write, value: i32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

fn read_i32(reader: &mut impl Read) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_len(reader: &mut impl Read, what: &'static str) -> Result<usize, CounterExampleFileError> {
    let value = read_i32(reader)?;
    usize::try_from(value).map_err(|_| CounterExampleFileError::Malformed(what))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CounterExample {
        CounterExample::new(
            vec![
                vec![0, 0].into_boxed_slice(),
                vec![0, 2].into_boxed_slice(),
                vec![0, 3].into_boxed_slice(),
            ],
            vec![vec![1, 0], vec![2]],
            vec![Activation::Nondeterministic, Activation::Suppressed],
            vec![0xAB, 0xCD],
            1,
            false,
            false,
        )
    }

    #[test]
    fn test_codec_round_trip() {
        let original = sample();
        let mut bytes = Vec::new();
        original.to_writer(&mut bytes).unwrap();

        let loaded = CounterExample::from_reader(&mut bytes.as_slice()).unwrap();
        assert_eq!(loaded.step_count(), original.step_count());
        assert_eq!(loaded.states(), original.states());
        assert_eq!(loaded.replay_info(), original.replay_info());
        assert_eq!(loaded.fault_activations(), original.fault_activations());
        assert_eq!(loaded.serialized_model(), original.serialized_model());
        assert_eq!(loaded.ends_with_exception(), original.ends_with_exception());
    }

    #[test]
    fn test_magic_is_bit_exact() {
        let mut bytes = Vec::new();
        sample().to_writer(&mut bytes).unwrap();
        assert_eq!(&bytes[..4], &0x3FE0DD04i32.to_le_bytes());
    }

    #[test]
    fn test_wrong_magic_rejected() {
        let mut bytes = Vec::new();
        sample().to_writer(&mut bytes).unwrap();
        bytes[0] ^= 0xFF;

        match CounterExample::from_reader(&mut bytes.as_slice()) {
            Err(CounterExampleFileError::BadMagic(_)) => {}
            other => panic!("expected BadMagic, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_file_rejected() {
        let mut bytes = Vec::new();
        sample().to_writer(&mut bytes).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(CounterExample::from_reader(&mut bytes.as_slice()).is_err());
    }
}
