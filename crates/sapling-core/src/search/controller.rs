//! Synchronous timestep loop.
//!
//! The controller owns every example's [`ExampleBeam`] and replaces it
//! wholesale after each step. Within a step, model calls for all live
//! `(example, slot)` pairs and per-example pruning run on rayon; the end of
//! each parallel collect is the step barrier. Timesteps themselves are
//! strictly sequential.
//!
//! ```text
//! Initializing --first step--> Running(Seeding) --> Running(Expanding) --> Done
//! ```

use super::beam::{BeamConfig, ExampleBeam, TokenId};
use super::log::StepLog;
use super::policy::{CandidateExpansionPolicy, ExampleStep, Stage};
use crate::error::{Result, SaplingError};
use crate::model::{StepModel, StepOutput};
use rayon::prelude::*;
use tracing::{debug, trace, warn};

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Configured but no step taken yet.
    Initializing,
    /// Stepping; the tag selects the policy stage for the next step.
    Running(Stage),
    /// Every example is done.
    Done,
}

/// Everything the backtracker and finalizer need once the loop ends.
#[derive(Debug, Clone)]
pub struct DecodeTrace {
    /// Recorded decisions.
    pub log: StepLog,
    /// Per example, per slot: score frozen when the slot first finished.
    pub final_scores: Vec<Vec<Option<f32>>>,
    /// Per example, per slot: extensions made while unfinished.
    pub penalty_lengths: Vec<Vec<usize>>,
    /// Terminator token used during the decode.
    pub eos_token_id: TokenId,
}

/// Flat ids, flat parents and next beams of one committed step.
type Assembled<S> = (Vec<TokenId>, Vec<u32>, Vec<ExampleBeam<S>>);

/// Drives the expansion policy until every example is done.
pub struct TimeStepController<M: StepModel> {
    model: M,
    policy: CandidateExpansionPolicy,
    max_lengths: Vec<usize>,
    initial_states: Vec<M::State>,
    beams: Vec<ExampleBeam<M::State>>,
    log: StepLog,
    time: usize,
    state: ControllerState,
}

impl<M: StepModel> TimeStepController<M> {
    /// Validate the batch and build a controller in `Initializing`.
    ///
    /// `initial_states[e]` seeds example `e`; `max_lengths[e]` bounds how many
    /// steps it may record.
    pub fn new(
        model: M,
        config: &BeamConfig,
        initial_states: Vec<M::State>,
        max_lengths: Vec<usize>,
    ) -> Result<Self> {
        let policy = CandidateExpansionPolicy::new(config)?;

        if initial_states.is_empty() {
            return Err(SaplingError::Configuration("batch is empty".to_string()));
        }
        if max_lengths.len() != initial_states.len() {
            return Err(SaplingError::Configuration(format!(
                "{} length bounds for a batch of {}",
                max_lengths.len(),
                initial_states.len()
            )));
        }
        if let Some(e) = max_lengths.iter().position(|&len| len == 0) {
            return Err(SaplingError::Configuration(format!(
                "example {} has a zero length bound",
                e
            )));
        }
        if model.vocab_size() < config.beam_width {
            return Err(SaplingError::Configuration(format!(
                "vocabulary of {} cannot fill a beam of {}",
                model.vocab_size(),
                config.beam_width
            )));
        }

        let log = StepLog::new(initial_states.len(), config.beam_width);

        Ok(Self {
            model,
            policy,
            max_lengths,
            initial_states,
            beams: Vec::new(),
            log,
            time: 0,
            state: ControllerState::Initializing,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Number of timesteps recorded so far.
    pub fn time(&self) -> usize {
        self.time
    }

    /// Live beams (empty before the first step).
    pub fn beams(&self) -> &[ExampleBeam<M::State>] {
        &self.beams
    }

    /// Decision log so far.
    pub fn log(&self) -> &StepLog {
        &self.log
    }

    /// Stop the loop: every example is marked done.
    pub fn cancel(&mut self) {
        if self.state == ControllerState::Initializing {
            self.seed();
        }
        for beam in &mut self.beams {
            beam.done = true;
        }
        self.state = ControllerState::Done;
    }

    /// Take one timestep. Returns `false` once every example is done.
    pub fn step(&mut self) -> Result<bool> {
        let stage = match self.state {
            ControllerState::Done => return Ok(false),
            ControllerState::Initializing => {
                self.seed();
                self.state = ControllerState::Running(Stage::Seeding);
                Stage::Seeding
            }
            ControllerState::Running(stage) => stage,
        };

        let outputs = self.run_model(stage)?;
        let steps = self.run_policy(stage, outputs)?;
        self.commit(steps)?;

        let live = self.beams.iter().filter(|b| !b.done).count();
        debug!(time = self.time, live_examples = live, "timestep complete");

        self.time += 1;
        if live == 0 {
            self.state = ControllerState::Done;
            Ok(false)
        } else {
            self.state = ControllerState::Running(Stage::Expanding);
            Ok(true)
        }
    }

    /// Step until done and hand back the trace.
    pub fn run(mut self) -> Result<DecodeTrace> {
        while self.step()? {}
        Ok(self.finish())
    }

    /// Consume the controller, keeping what has been logged.
    ///
    /// A controller that never stepped yields an empty trace of seeded
    /// beams.
    pub fn finish(mut self) -> DecodeTrace {
        if self.state == ControllerState::Initializing {
            self.seed();
        }
        let (final_scores, penalty_lengths): (Vec<_>, Vec<_>) = self
            .beams
            .iter()
            .map(|beam| {
                let scores: Vec<Option<f32>> = beam.slots.iter().map(|h| h.final_score).collect();
                let lengths: Vec<usize> = beam.slots.iter().map(|h| h.length).collect();
                (scores, lengths)
            })
            .unzip();

        DecodeTrace {
            log: self.log,
            final_scores,
            penalty_lengths,
            eos_token_id: self.policy.eos_token_id(),
        }
    }

    fn seed(&mut self) {
        self.beams = std::mem::take(&mut self.initial_states)
            .into_iter()
            .map(|state| self.policy.seed(state))
            .collect();
    }

    /// Invoke the model once per live slot of every live example.
    fn run_model(&self, stage: Stage) -> Result<Vec<Vec<Option<StepOutput<M::State>>>>> {
        let k = self.policy.beam_width();
        let work: Vec<(usize, usize)> = self
            .beams
            .iter()
            .enumerate()
            .filter(|(_, beam)| !beam.done)
            .flat_map(|(e, beam)| {
                let slots: Vec<usize> = match stage {
                    Stage::Seeding => vec![0],
                    Stage::Expanding => (0..k).filter(|&s| !beam.slots[s].finished).collect(),
                };
                slots.into_iter().map(move |s| (e, s))
            })
            .collect();

        let vocab = self.model.vocab_size();
        let results: Vec<(usize, usize, StepOutput<M::State>)> = work
            .into_par_iter()
            .map(|(e, s)| {
                let hyp = &self.beams[e].slots[s];
                let output = self.model.step(hyp.last_token, &hyp.state)?;

                if output.scores.len() != vocab {
                    return Err(SaplingError::StructureMismatch(format!(
                        "example {} slot {}: {} scores for vocabulary of {}",
                        e,
                        s,
                        output.scores.len(),
                        vocab
                    )));
                }
                let before = self.model.state_dims(&hyp.state);
                let after = self.model.state_dims(&output.state);
                if before != after {
                    return Err(SaplingError::StructureMismatch(format!(
                        "example {} slot {}: state shape changed from {:?} to {:?}",
                        e, s, before, after
                    )));
                }
                Ok((e, s, output))
            })
            .collect::<Result<_>>()
            .map_err(|err| {
                warn!(time = self.time, error = %err, "model step failed");
                err
            })?;

        let mut outputs: Vec<Vec<Option<StepOutput<M::State>>>> = (0..self.beams.len())
            .map(|_| (0..k).map(|_| None).collect())
            .collect();
        for (e, s, output) in results {
            outputs[e][s] = Some(output);
        }
        Ok(outputs)
    }

    /// Per-example pruning; done examples are copied through unchanged.
    fn run_policy(
        &self,
        stage: Stage,
        outputs: Vec<Vec<Option<StepOutput<M::State>>>>,
    ) -> Result<Vec<ExampleStep<M::State>>> {
        let eos = self.policy.eos_token_id();
        let time = self.time;

        self.beams
            .par_iter()
            .zip(outputs.into_par_iter())
            .zip(self.max_lengths.par_iter())
            .enumerate()
            .map(|(e, ((beam, outputs), &max_length))| {
                if beam.done {
                    return Ok(copy_through(beam, eos));
                }
                let step = self
                    .policy
                    .expand(stage, time, max_length, beam, &outputs)?;
                trace!(
                    time,
                    example = e,
                    ids = ?step.predicted_ids,
                    parents = ?step.parent_index,
                    "example step"
                );
                Ok(step)
            })
            .collect::<Result<_>>()
            .map_err(|err| {
                warn!(time, error = %err, "pruning failed");
                err
            })
    }

    /// Freeze newly finished scores, append to the log, swap in new beams.
    fn commit(&mut self, steps: Vec<ExampleStep<M::State>>) -> Result<()> {
        let time = self.time;
        self.assemble(steps)
            .and_then(|(predicted_ids, parent_index, beams)| {
                self.log.push_step(&predicted_ids, &parent_index)?;
                self.beams = beams;
                Ok(())
            })
            .map_err(|err| {
                warn!(time, error = %err, "commit failed");
                err
            })
    }

    fn assemble(&self, steps: Vec<ExampleStep<M::State>>) -> Result<Assembled<M::State>> {
        let k = self.policy.beam_width();
        let mut predicted_ids = Vec::with_capacity(steps.len() * k);
        let mut parent_index = Vec::with_capacity(steps.len() * k);
        let mut beams = Vec::with_capacity(steps.len());

        for (old, step) in self.beams.iter().zip(steps) {
            if step.slots.len() != k {
                return Err(SaplingError::StructureMismatch(format!(
                    "policy returned {} slots, expected {}",
                    step.slots.len(),
                    k
                )));
            }

            predicted_ids.extend_from_slice(&step.predicted_ids);
            parent_index.extend_from_slice(&step.parent_index);

            let mut beam = ExampleBeam {
                slots: step.slots,
                done: old.done || step.bound_reached,
            };
            for hyp in &mut beam.slots {
                if hyp.finished && hyp.final_score.is_none() {
                    hyp.final_score = Some(hyp.score);
                    hyp.score = f32::NEG_INFINITY;
                }
            }
            beam.done |= beam.all_finished();
            beams.push(beam);
        }

        Ok((predicted_ids, parent_index, beams))
    }
}

/// Hold a done example constant: terminator everywhere, identity parents.
fn copy_through<S: Clone>(beam: &ExampleBeam<S>, eos: TokenId) -> ExampleStep<S> {
    let k = beam.width();
    ExampleStep {
        slots: beam.slots.clone(),
        predicted_ids: vec![eos; k],
        parent_index: (0..k as u32).collect(),
        bound_reached: true,
    }
}

impl<M: StepModel> std::fmt::Debug for TimeStepController<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeStepController")
            .field("policy", &self.policy)
            .field("max_lengths", &self.max_lengths)
            .field("time", &self.time)
            .field("state", &self.state)
            .finish()
    }
}
