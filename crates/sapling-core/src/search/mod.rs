//! Batched beam search over an external step model.
//!
//! # Architecture
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`gather`](crate::gather) | Batched "value at index" selection |
//! | [`CandidateExpansionPolicy`] | One timestep of fan-out and pruning |
//! | [`TimeStepController`] | Sequential loop, logging, score freezing |
//! | [`TreeBacktracker`] | Rebuilds sequences from parent pointers |
//! | [`Finalizer`] | Length-normalizes and picks one winner per example |
//!
//! Data flows controller → policy → log while stepping, then
//! log → backtracker → finalizer once every example is done.
//!
//! # Example
//!
//! ```
//! use sapling_core::model::{StepModel, StepOutput};
//! use sapling_core::search::{decode, BeamConfig, OutputKind, TokenId};
//! use sapling_core::Result;
//!
//! /// Always prefers token 1, then the terminator.
//! struct Fixed;
//!
//! impl StepModel for Fixed {
//!     type State = ();
//!
//!     fn vocab_size(&self) -> usize {
//!         3
//!     }
//!
//!     fn step(&self, token: TokenId, _state: &()) -> Result<StepOutput<()>> {
//!         let scores = if token == 1 {
//!             vec![-0.1, -3.0, -3.0]
//!         } else {
//!             vec![-2.0, -0.1, -3.0]
//!         };
//!         Ok(StepOutput { scores, state: () })
//!     }
//! }
//!
//! let config = BeamConfig {
//!     beam_width: 2,
//!     start_token_id: 2,
//!     eos_token_id: 0,
//!     output_kind: OutputKind::LogProbs,
//! };
//! let output = decode(&Fixed, &config, vec![()], vec![8]).unwrap();
//! assert_eq!(output.examples[0].trimmed(0), &[1]);
//! ```

mod backtrack;
mod beam;
mod controller;
mod finalize;
mod log;
mod policy;

pub use backtrack::{Sequences, TreeBacktracker};
pub use beam::{normalized_score, BeamConfig, ExampleBeam, Hypothesis, OutputKind, TokenId};
pub use controller::{ControllerState, DecodeTrace, TimeStepController};
pub use finalize::{DecodeOutput, DecodedExample, Finalizer, ScoredSequence};
pub use log::{StepLog, NO_PARENT};
pub use policy::{CandidateExpansionPolicy, ExampleStep, Stage};

use crate::error::Result;
use crate::model::StepModel;
use tracing::warn;

/// Run a complete decode: loop, backtrack, finalize.
///
/// Any error aborts the whole call; no partial output is returned.
pub fn decode<M: StepModel>(
    model: M,
    config: &BeamConfig,
    initial_states: Vec<M::State>,
    max_lengths: Vec<usize>,
) -> Result<DecodeOutput> {
    let trace = TimeStepController::new(model, config, initial_states, max_lengths)?.run()?;
    TreeBacktracker
        .backtrack(&trace.log)
        .and_then(|sequences| Finalizer.finalize(&trace, sequences))
        .map_err(|err| {
            warn!(steps = trace.log.num_steps(), error = %err, "reconstruction failed");
            err
        })
}
