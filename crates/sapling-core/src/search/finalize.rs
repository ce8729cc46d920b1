//! Length normalization and per-example winner selection.

use super::backtrack::Sequences;
use super::beam::{normalized_score, TokenId};
use super::controller::DecodeTrace;
use crate::error::{Result, SaplingError};
use crate::gather::gather_rows;

/// One slot's reconstructed hypothesis with its scores.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredSequence {
    /// Token per recorded timestep.
    pub tokens: Vec<TokenId>,
    /// `final_score / penalty_length`, or negative infinity if unfinished.
    pub normalized_score: f32,
    /// Score frozen when the slot finished.
    pub final_score: Option<f32>,
    /// Extensions made while unfinished.
    pub penalty_length: usize,
}

/// Decoded output for one example.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedExample {
    /// Slot that won.
    pub best_slot: usize,
    /// Winning sequence, one token per recorded timestep.
    pub tokens: Vec<TokenId>,
    /// Winning normalized score.
    pub score: f32,
    /// Every slot, for diagnostics.
    pub beams: Vec<ScoredSequence>,
}

impl DecodedExample {
    /// Tokens up to, excluding, the first terminator.
    pub fn trimmed(&self, eos_token_id: TokenId) -> &[TokenId] {
        let end = self
            .tokens
            .iter()
            .position(|&t| t == eos_token_id)
            .unwrap_or(self.tokens.len());
        &self.tokens[..end]
    }
}

/// Result of a full decode.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOutput {
    /// One entry per example, in batch order.
    pub examples: Vec<DecodedExample>,
    /// Number of recorded timesteps.
    pub num_steps: usize,
    /// Terminator token used during the decode.
    pub eos_token_id: TokenId,
}

/// Picks the best normalized hypothesis of every example.
#[derive(Debug, Clone, Copy, Default)]
pub struct Finalizer;

impl Finalizer {
    /// Normalize, rank and gather the winners.
    ///
    /// Ties go to the lowest slot. When no slot of an example finished,
    /// every score is negative infinity and slot 0 is returned.
    pub fn finalize(&self, trace: &DecodeTrace, sequences: Sequences) -> Result<DecodeOutput> {
        let batch = trace.log.batch_size();
        if sequences.len() != batch
            || trace.final_scores.len() != batch
            || trace.penalty_lengths.len() != batch
        {
            return Err(SaplingError::StructureMismatch(format!(
                "finalizing {} sequences, {} score rows and {} length rows for a batch of {}",
                sequences.len(),
                trace.final_scores.len(),
                trace.penalty_lengths.len(),
                batch
            )));
        }

        let ranked = sequences
            .iter()
            .zip(&trace.final_scores)
            .zip(&trace.penalty_lengths)
            .map(|((slots, scores), lengths)| rank(slots.len(), scores, lengths))
            .collect::<Result<Vec<_>>>()?;

        let selectors: Vec<Vec<usize>> = ranked.iter().map(|(best, _)| vec![*best]).collect();
        let sources: Vec<&[Vec<TokenId>]> = sequences.iter().map(|s| s.as_slice()).collect();
        let winners = gather_rows(&selectors, &sources)?;

        let examples = sequences
            .into_iter()
            .zip(ranked)
            .zip(winners)
            .zip(trace.final_scores.iter().zip(&trace.penalty_lengths))
            .map(|(((slots, (best, normalized)), mut winner), (scores, lengths))| {
                let beams = slots
                    .into_iter()
                    .zip(&normalized)
                    .zip(scores.iter().zip(lengths))
                    .map(|((tokens, &normalized_score), (&final_score, &penalty_length))| {
                        ScoredSequence {
                            tokens,
                            normalized_score,
                            final_score,
                            penalty_length,
                        }
                    })
                    .collect();
                DecodedExample {
                    best_slot: best,
                    tokens: winner.pop().unwrap_or_default(),
                    score: normalized[best],
                    beams,
                }
            })
            .collect();

        Ok(DecodeOutput {
            examples,
            num_steps: trace.log.num_steps(),
            eos_token_id: trace.eos_token_id,
        })
    }
}

/// Winning slot and every slot's normalized score for one example.
fn rank(width: usize, scores: &[Option<f32>], lengths: &[usize]) -> Result<(usize, Vec<f32>)> {
    if width != scores.len() || width != lengths.len() || width == 0 {
        return Err(SaplingError::StructureMismatch(format!(
            "{} sequences, {} scores, {} lengths",
            width,
            scores.len(),
            lengths.len()
        )));
    }

    let normalized: Vec<f32> = scores
        .iter()
        .zip(lengths)
        .map(|(&score, &len)| normalized_score(score, len))
        .collect();

    // strict comparison keeps the lowest slot on ties
    let mut best = 0;
    for (slot, &score) in normalized.iter().enumerate().skip(1) {
        if score > normalized[best] {
            best = slot;
        }
    }
    Ok((best, normalized))
}
