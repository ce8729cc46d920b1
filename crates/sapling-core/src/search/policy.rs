//! Per-timestep candidate expansion and pruning.
//!
//! # Stages
//!
//! - **Seeding**: the first recorded step. Every slot still holds the same
//!   start hypothesis, so only slot 0 is scored and its top-`K` tokens
//!   become the first real beam. Parents are logged as [`NO_PARENT`].
//! - **Expanding**: every unfinished slot contributes its own top-`K`
//!   continuations, shifted by the slot's cumulative score. The `K x K`
//!   candidates are flattened (rank `r = slot * K + j`) and pruned back to
//!   `K` survivors.
//!
//! # Finished slots
//!
//! A slot that finished on an earlier step never competes again: its
//! candidates are excluded from pruning and it is carried forward in place,
//! emitting the terminator with itself as parent.
//!
//! Survivors fill the remaining positions in order: unfinished survivors
//! best-first, then survivors that just emitted the terminator. Finished
//! slots therefore always occupy the trailing `n` positions of an example,
//! `n` being the count finished so far, and a position that is finished
//! stays finished.

use super::beam::{BeamConfig, ExampleBeam, Hypothesis, OutputKind, TokenId};
use super::log::NO_PARENT;
use crate::error::{Result, SaplingError};
use crate::gather::gather;
use crate::model::StepOutput;
use crate::scoring::{log_probs, top_k};

/// Which kind of step the policy is asked to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// First diversification from the replicated start hypothesis.
    Seeding,
    /// Steady-state `K x K` fan-out and pruning.
    Expanding,
}

/// Everything one example produces in one timestep.
#[derive(Debug, Clone)]
pub struct ExampleStep<S> {
    /// Next slot hypotheses. Scores of newly finished slots are still the
    /// live score; freezing is the controller's job.
    pub slots: Vec<Hypothesis<S>>,
    /// Token chosen per slot.
    pub predicted_ids: Vec<TokenId>,
    /// Parent slot per slot, [`NO_PARENT`] when seeding.
    pub parent_index: Vec<u32>,
    /// Whether the example reached its length bound with this step.
    pub bound_reached: bool,
}

/// Expansion/pruning policy shared by every example of a decode.
#[derive(Debug, Clone)]
pub struct CandidateExpansionPolicy {
    beam_width: usize,
    start_token_id: TokenId,
    eos_token_id: TokenId,
    output_kind: OutputKind,
}

impl CandidateExpansionPolicy {
    /// Create a policy from a validated configuration.
    pub fn new(config: &BeamConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            beam_width: config.beam_width,
            start_token_id: config.start_token_id,
            eos_token_id: config.eos_token_id,
            output_kind: config.output_kind,
        })
    }

    /// Beam width `K`.
    pub fn beam_width(&self) -> usize {
        self.beam_width
    }

    /// Terminator token.
    pub fn eos_token_id(&self) -> TokenId {
        self.eos_token_id
    }

    /// Seed call: `K` identical start hypotheses sharing one initial state.
    pub fn seed<S: Clone>(&self, initial_state: S) -> ExampleBeam<S> {
        ExampleBeam {
            slots: vec![Hypothesis::start(self.start_token_id, initial_state); self.beam_width],
            done: false,
        }
    }

    /// Run one timestep for one example.
    ///
    /// `outputs[k]` must be present for every slot the stage scores: slot 0
    /// when seeding, every unfinished slot when expanding.
    pub fn expand<S: Clone>(
        &self,
        stage: Stage,
        time: usize,
        max_length: usize,
        beam: &ExampleBeam<S>,
        outputs: &[Option<StepOutput<S>>],
    ) -> Result<ExampleStep<S>> {
        let k = self.beam_width;
        if beam.width() != k || outputs.len() != k {
            return Err(SaplingError::StructureMismatch(format!(
                "beam of {} slots with {} outputs, expected {}",
                beam.width(),
                outputs.len(),
                k
            )));
        }

        let mut step = match stage {
            Stage::Seeding => self.seed_step(beam, outputs)?,
            Stage::Expanding => self.expand_step(beam, outputs)?,
        };
        step.bound_reached = time + 1 >= max_length;
        Ok(step)
    }

    fn seed_step<S: Clone>(
        &self,
        beam: &ExampleBeam<S>,
        outputs: &[Option<StepOutput<S>>],
    ) -> Result<ExampleStep<S>> {
        let k = self.beam_width;
        let output = outputs[0].as_ref().ok_or_else(|| {
            SaplingError::StructureMismatch("seeding step without output for slot 0".to_string())
        })?;
        let lp = log_probs(&[output.scores.as_slice()], self.output_kind)?;
        let top = top_k(&lp[0], k);
        if top.len() < k {
            return Err(SaplingError::Configuration(format!(
                "vocabulary of {} cannot fill a beam of {}",
                top.len(),
                k
            )));
        }

        let root = &beam.slots[0];
        let (open, closed): (Vec<_>, Vec<_>) = top
            .into_iter()
            .map(|(token, score)| (token as TokenId, score))
            .partition(|&(token, _)| token != self.eos_token_id);

        let slots: Vec<Hypothesis<S>> = open
            .into_iter()
            .chain(closed)
            .map(|(token, score)| Hypothesis {
                score,
                finished: token == self.eos_token_id,
                length: root.length + 1,
                final_score: None,
                last_token: token,
                state: output.state.clone(),
            })
            .collect();
        let predicted_ids = slots.iter().map(|h| h.last_token).collect();

        Ok(ExampleStep {
            slots,
            predicted_ids,
            parent_index: vec![NO_PARENT; k],
            bound_reached: false,
        })
    }

    fn expand_step<S: Clone>(
        &self,
        beam: &ExampleBeam<S>,
        outputs: &[Option<StepOutput<S>>],
    ) -> Result<ExampleStep<S>> {
        let k = self.beam_width;

        let live: Vec<usize> = (0..k).filter(|&slot| !beam.slots[slot].finished).collect();

        let mut rows = Vec::with_capacity(live.len());
        for &slot in &live {
            let output = outputs[slot].as_ref().ok_or_else(|| {
                SaplingError::StructureMismatch(format!("no output for unfinished slot {}", slot))
            })?;
            rows.push(output.scores.as_slice());
        }
        let lp = log_probs(&rows, self.output_kind)?;
        if let Some(row) = lp.iter().find(|row| row.len() < k) {
            return Err(SaplingError::Configuration(format!(
                "vocabulary of {} cannot fill a beam of {}",
                row.len(),
                k
            )));
        }

        // Flattened K x K fan-out. Finished slots keep -inf / terminator.
        let mut combined = vec![f32::NEG_INFINITY; k * k];
        let mut flat_tokens = vec![self.eos_token_id; k * k];
        for (&slot, row) in live.iter().zip(&lp) {
            let base = beam.slots[slot].score;
            for (j, (token, value)) in top_k(row, k).into_iter().enumerate() {
                combined[slot * k + j] = base + value;
                flat_tokens[slot * k + j] = token as TokenId;
            }
        }

        let mut ranks: Vec<usize> = live
            .iter()
            .flat_map(|&slot| slot * k..(slot + 1) * k)
            .collect();
        ranks.sort_by(|&a, &b| combined[b].total_cmp(&combined[a]));
        ranks.truncate(live.len());

        let survivor_tokens = gather(&ranks, &flat_tokens)?;
        let survivor_scores = gather(&ranks, &combined)?;
        let survivor_parents: Vec<usize> = ranks.iter().map(|&r| r / k).collect();

        // unfinished survivors first, then those that just emitted the terminator
        let (open, closed): (Vec<usize>, Vec<usize>) =
            (0..ranks.len()).partition(|&i| survivor_tokens[i] != self.eos_token_id);
        let mut placed = open.into_iter().chain(closed);

        let mut slots = Vec::with_capacity(k);
        let mut predicted_ids = Vec::with_capacity(k);
        let mut parent_index = Vec::with_capacity(k);

        for position in 0..k {
            let current = &beam.slots[position];
            if current.finished {
                let mut hyp = current.clone();
                hyp.last_token = self.eos_token_id;
                slots.push(hyp);
                predicted_ids.push(self.eos_token_id);
                parent_index.push(position as u32);
                continue;
            }

            let i = placed.next().ok_or_else(|| {
                SaplingError::StructureMismatch(format!(
                    "no survivor left for unfinished position {}",
                    position
                ))
            })?;
            let parent = survivor_parents[i];
            let token = survivor_tokens[i];
            let output = outputs[parent].as_ref().ok_or_else(|| {
                SaplingError::StructureMismatch(format!("survivor parent {} has no output", parent))
            })?;

            slots.push(Hypothesis {
                score: survivor_scores[i],
                finished: token == self.eos_token_id,
                length: beam.slots[parent].length + 1,
                final_score: None,
                last_token: token,
                state: output.state.clone(),
            });
            predicted_ids.push(token);
            parent_index.push(parent as u32);
        }

        Ok(ExampleStep {
            slots,
            predicted_ids,
            parent_index,
            bound_reached: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EOS: TokenId = 0;
    const A: TokenId = 1;
    const B: TokenId = 2;

    fn policy(k: usize) -> CandidateExpansionPolicy {
        CandidateExpansionPolicy::new(&BeamConfig {
            beam_width: k,
            start_token_id: 9,
            eos_token_id: EOS,
            output_kind: OutputKind::LogProbs,
        })
        .unwrap()
    }

    fn out(scores: &[f32], state: u32) -> Option<StepOutput<u32>> {
        Some(StepOutput {
            scores: scores.to_vec(),
            state,
        })
    }

    #[test]
    fn seed_replicates_start() {
        let beam = policy(3).seed(7u32);
        assert_eq!(beam.width(), 3);
        assert!(beam.slots.iter().all(|h| h.last_token == 9 && h.state == 7));
        assert!(beam.slots.iter().all(|h| h.score == 0.0 && !h.finished));
        assert!(!beam.done);
    }

    #[test]
    fn zero_width_rejected() {
        let err = CandidateExpansionPolicy::new(&BeamConfig {
            beam_width: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, SaplingError::Configuration(_)));
    }

    #[test]
    fn seeding_takes_top_k_of_slot_zero() {
        let p = policy(2);
        let beam = p.seed(0u32);
        let outputs = vec![out(&[-2.0, -0.1, -3.0], 1), None];

        let step = p.expand(Stage::Seeding, 0, 10, &beam, &outputs).unwrap();

        assert_eq!(step.predicted_ids, vec![A, EOS]);
        assert_eq!(step.parent_index, vec![NO_PARENT, NO_PARENT]);
        assert_eq!(step.slots[0].score, -0.1);
        assert_eq!(step.slots[1].score, -2.0);
        assert!(!step.slots[0].finished);
        assert!(step.slots[1].finished);
        assert!(step.slots.iter().all(|h| h.length == 1 && h.state == 1));
    }

    #[test]
    fn seeding_requires_slot_zero_output() {
        let p = policy(2);
        let beam = p.seed(0u32);
        let err = p
            .expand(Stage::Seeding, 0, 10, &beam, &[None, out(&[0.0, 0.0], 1)])
            .unwrap_err();
        assert!(matches!(err, SaplingError::StructureMismatch(_)));
    }

    #[test]
    fn seeding_rejects_small_vocab() {
        let p = policy(3);
        let beam = p.seed(0u32);
        let err = p
            .expand(Stage::Seeding, 0, 10, &beam, &[out(&[0.0, 0.0], 1), None, None])
            .unwrap_err();
        assert!(matches!(err, SaplingError::Configuration(_)));
    }

    #[test]
    fn expanding_prunes_k_squared_to_k() {
        let p = policy(2);
        let mut beam = p.seed(0u32);
        beam.slots[0].score = -1.0;
        beam.slots[0].last_token = A;
        beam.slots[1].score = -0.5;
        beam.slots[1].last_token = B;

        // slot 0: best local B (-0.1) -> -1.1 ; slot 1: best local A (-1.0) -> -1.5, B (-2.0) -> -2.5
        let outputs = vec![
            out(&[-5.0, -3.0, -0.1], 10),
            out(&[-4.0, -1.0, -2.0], 11),
        ];
        let step = p.expand(Stage::Expanding, 1, 10, &beam, &outputs).unwrap();

        assert_eq!(step.predicted_ids, vec![B, A]);
        assert_eq!(step.parent_index, vec![0, 1]);
        assert!((step.slots[0].score - -1.1).abs() < 1e-6);
        assert!((step.slots[1].score - -1.5).abs() < 1e-6);
        assert_eq!(step.slots[0].state, 10);
        assert_eq!(step.slots[1].state, 11);
    }

    #[test]
    fn expanding_can_take_both_survivors_from_one_slot() {
        let p = policy(2);
        let mut beam = p.seed(0u32);
        beam.slots[0].score = -0.1;
        beam.slots[1].score = -5.0;

        let outputs = vec![out(&[-3.0, -0.2, -0.3], 20), out(&[-0.1, -0.1, -0.1], 21)];
        let step = p.expand(Stage::Expanding, 1, 10, &beam, &outputs).unwrap();

        assert_eq!(step.parent_index, vec![0, 0]);
        assert_eq!(step.predicted_ids, vec![A, B]);
        assert!(step.slots.iter().all(|h| h.state == 20));
    }

    #[test]
    fn finished_slot_stays_in_place() {
        let p = policy(3);
        let mut beam = p.seed(0u32);
        // slot 0 finished earlier; slots 1 and 2 live
        beam.slots[0].finished = true;
        beam.slots[0].score = f32::NEG_INFINITY;
        beam.slots[0].final_score = Some(-0.3);
        beam.slots[0].last_token = EOS;
        beam.slots[0].state = 99;
        beam.slots[1].score = -1.0;
        beam.slots[2].score = -2.0;

        let outputs = vec![
            None,
            out(&[-3.0, -0.5, -0.7, -4.0], 1),
            out(&[-3.0, -0.1, -4.0, -4.0], 2),
        ];
        let step = p.expand(Stage::Expanding, 2, 10, &beam, &outputs).unwrap();

        // survivors slot1/A (-1.5) and slot1/B (-1.7) fill the free positions
        assert_eq!(step.predicted_ids, vec![EOS, A, B]);
        assert_eq!(step.parent_index, vec![0, 1, 1]);
        assert!(step.slots[0].finished);
        assert_eq!(step.slots[0].final_score, Some(-0.3));
        assert_eq!(step.slots[0].state, 99);
        assert_eq!(step.slots[0].score, f32::NEG_INFINITY);
    }

    #[test]
    fn new_terminator_is_placed_behind_live_survivors() {
        let p = policy(3);
        let mut beam = p.seed(0u32);
        beam.slots[0].score = -0.1;
        beam.slots[1].score = -0.2;
        beam.slots[2].score = -0.3;

        // terminator is the single best continuation of slot 0
        let outputs = vec![
            out(&[-0.01, -2.0, -2.5], 1),
            out(&[-3.0, -1.0, -2.0], 2),
            out(&[-3.0, -4.0, -1.5], 3),
        ];
        let step = p.expand(Stage::Expanding, 1, 10, &beam, &outputs).unwrap();

        // ranked: slot0/EOS -0.11, slot1/A -1.2, slot2/B -1.8
        assert_eq!(step.predicted_ids, vec![A, B, EOS]);
        assert_eq!(step.parent_index, vec![1, 2, 0]);
        assert!(!step.slots[0].finished && !step.slots[1].finished);
        assert!(step.slots[2].finished);
        assert_eq!(step.slots[2].state, 1);
    }

    #[test]
    fn finished_positions_form_a_suffix_across_steps() {
        let p = policy(3);
        let beam = p.seed(0u32);
        let first = p
            .expand(Stage::Seeding, 0, 10, &beam, &[out(&[-0.5, -0.4, -3.0], 1), None, None])
            .unwrap();
        // seeding ranks A, EOS, B; terminator goes last
        assert_eq!(first.predicted_ids, vec![A, B, EOS]);

        let beam = ExampleBeam {
            slots: first.slots,
            done: false,
        };
        let outputs = vec![out(&[-0.01, -5.0, -6.0], 2), out(&[-6.0, -5.0, -4.0], 3), None];
        let second = p.expand(Stage::Expanding, 1, 10, &beam, &outputs).unwrap();

        let finished: Vec<bool> = second.slots.iter().map(|h| h.finished).collect();
        assert_eq!(finished, vec![false, true, true]);
        assert_eq!(second.parent_index[2], 2);
    }

    #[test]
    fn carried_slot_keeps_length() {
        let p = policy(2);
        let mut beam = p.seed(0u32);
        beam.slots[1].finished = true;
        beam.slots[1].length = 1;
        beam.slots[1].score = f32::NEG_INFINITY;
        beam.slots[0].length = 1;

        let outputs = vec![out(&[-0.05, -3.0, -3.0], 1), None];
        let step = p.expand(Stage::Expanding, 1, 10, &beam, &outputs).unwrap();

        assert_eq!(step.slots[0].length, 2);
        assert_eq!(step.slots[1].length, 1);
    }

    #[test]
    fn newly_chosen_terminator_finishes_slot() {
        let p = policy(2);
        let beam = p.seed(0u32);
        let outputs = vec![out(&[-0.01, -5.0, -6.0], 1), out(&[-0.01, -5.0, -6.0], 1)];
        let step = p.expand(Stage::Expanding, 1, 10, &beam, &outputs).unwrap();

        assert_eq!(step.predicted_ids[0], EOS);
        assert!(step.slots[0].finished);
    }

    #[test]
    fn expanding_rejects_small_vocab() {
        let p = policy(3);
        let beam = p.seed(0u32);
        let outputs = vec![out(&[-0.1, -0.2], 1), out(&[-0.1, -0.2], 2), out(&[-0.1, -0.2], 3)];
        let err = p
            .expand(Stage::Expanding, 1, 10, &beam, &outputs)
            .unwrap_err();
        assert!(matches!(err, SaplingError::Configuration(_)));
    }

    #[test]
    fn missing_output_for_live_slot_rejected() {
        let p = policy(2);
        let beam = p.seed(0u32);
        let err = p
            .expand(Stage::Expanding, 1, 10, &beam, &[out(&[0.0, 0.0, 0.0], 1), None])
            .unwrap_err();
        assert!(matches!(err, SaplingError::StructureMismatch(_)));
    }

    #[test]
    fn bound_reached_tracks_elapsed_steps() {
        let p = policy(2);
        let beam = p.seed(0u32);
        let outputs = vec![out(&[-1.0, -0.5, -2.0], 1), None];

        let early = p.expand(Stage::Seeding, 0, 2, &beam, &outputs).unwrap();
        assert!(!early.bound_reached);

        let last = p.expand(Stage::Seeding, 1, 2, &beam, &outputs).unwrap();
        assert!(last.bound_reached);
    }

    #[test]
    fn logits_are_normalized_before_ranking() {
        let p = CandidateExpansionPolicy::new(&BeamConfig {
            beam_width: 2,
            start_token_id: 9,
            eos_token_id: EOS,
            output_kind: OutputKind::Logits,
        })
        .unwrap();
        let beam = p.seed(0u32);
        let step = p
            .expand(Stage::Seeding, 0, 10, &beam, &[out(&[0.0, 2.0, 1.0], 1), None])
            .unwrap();

        assert_eq!(step.predicted_ids, vec![A, B]);
        assert!(step.slots.iter().all(|h| h.score < 0.0));
    }
}
