//! Beam configuration and per-slot hypothesis state.
//!
//! A batch holds `B` independent examples, each with `K` competing slots.
//! Slot state is replaced wholesale every timestep; nothing here is shared
//! between examples.

use crate::error::{Result, SaplingError};
use serde::{Deserialize, Serialize};

/// Vocabulary token identifier.
pub type TokenId = u32;

/// What the model-step function emits per vocabulary entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Unnormalized scores; a log-softmax is applied before ranking.
    #[default]
    Logits,
    /// Already log-probabilities; used as-is.
    LogProbs,
}

/// Configuration for beam decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeamConfig {
    /// Number of hypotheses tracked per example (`K`).
    pub beam_width: usize,
    /// Token fed to every slot at the first step.
    pub start_token_id: TokenId,
    /// Terminator token marking a finished hypothesis.
    pub eos_token_id: TokenId,
    /// Interpretation of model-step outputs.
    #[serde(default)]
    pub output_kind: OutputKind,
}

impl Default for BeamConfig {
    fn default() -> Self {
        Self {
            beam_width: 4,
            start_token_id: 2,
            eos_token_id: 0,
            output_kind: OutputKind::Logits,
        }
    }
}

impl BeamConfig {
    /// Reject configurations the decoder cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.beam_width == 0 {
            return Err(SaplingError::Configuration(
                "beam_width must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }
}

/// One competing hypothesis of an example.
#[derive(Debug, Clone)]
pub struct Hypothesis<S> {
    /// Cumulative log-probability. Negative infinity once finished, so the
    /// slot can never win a pruning round again.
    pub score: f32,
    /// Whether the hypothesis has emitted the terminator.
    pub finished: bool,
    /// Extensions made while unfinished; the length-normalization divisor.
    pub length: usize,
    /// Score captured the first time the slot finished.
    pub final_score: Option<f32>,
    /// Token the slot feeds to the model next.
    pub last_token: TokenId,
    /// Opaque model state.
    pub state: S,
}

impl<S> Hypothesis<S> {
    /// Fresh start hypothesis.
    pub fn start(start_token_id: TokenId, state: S) -> Self {
        Self {
            score: 0.0,
            finished: false,
            length: 0,
            final_score: None,
            last_token: start_token_id,
            state,
        }
    }
}

/// Frozen final score divided by length; negative infinity for a slot that
/// never finished.
pub fn normalized_score(final_score: Option<f32>, length: usize) -> f32 {
    match final_score {
        Some(score) if length > 0 => score / length as f32,
        _ => f32::NEG_INFINITY,
    }
}

/// The `K` slots of one example plus its aggregate done flag.
#[derive(Debug, Clone)]
pub struct ExampleBeam<S> {
    /// Slot hypotheses, indexed by slot.
    pub slots: Vec<Hypothesis<S>>,
    /// Set once the example hit its length bound or every slot finished.
    pub done: bool,
}

impl<S> ExampleBeam<S> {
    /// Number of slots.
    pub fn width(&self) -> usize {
        self.slots.len()
    }

    /// True when every slot has finished.
    pub fn all_finished(&self) -> bool {
        self.slots.iter().all(|h| h.finished)
    }
}
