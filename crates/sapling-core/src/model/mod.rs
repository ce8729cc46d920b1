//! Model-step interface.
//!
//! The decoder treats the scoring model as a black box mapping
//! `(token, state)` to `(scores, state)`. [`ProjectedRnn`] is a small
//! candle-backed implementation for tests and demos.

mod rnn;
mod step;

pub use rnn::ProjectedRnn;
pub use step::{StepModel, StepOutput};
