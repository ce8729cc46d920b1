//! The external model-step seam.

use crate::error::Result;
use crate::search::TokenId;

/// Output of one model step for one slot.
#[derive(Debug, Clone)]
pub struct StepOutput<S> {
    /// One score per vocabulary entry; logits or log-probabilities depending
    /// on [`OutputKind`](crate::search::OutputKind).
    pub scores: Vec<f32>,
    /// State to carry into the next step.
    pub state: S,
}

/// Autoregressive scoring function driven by the decoder.
///
/// Implementations must be pure with respect to other slots and examples:
/// a call reads only its own `state`. Calls for different slots run
/// concurrently.
pub trait StepModel: Send + Sync {
    /// Per-slot recurrent state.
    type State: Clone + Send + Sync;

    /// Length of every `scores` vector this model returns.
    fn vocab_size(&self) -> usize;

    /// Advance one slot by one token.
    fn step(&self, token: TokenId, state: &Self::State) -> Result<StepOutput<Self::State>>;

    /// Shape of a state value. The decoder requires this to stay constant
    /// across a decode; the default reports no shape and disables the check.
    fn state_dims(&self, _state: &Self::State) -> Vec<usize> {
        Vec::new()
    }
}

impl<M: StepModel + ?Sized> StepModel for &M {
    type State = M::State;

    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }

    fn step(&self, token: TokenId, state: &Self::State) -> Result<StepOutput<Self::State>> {
        (**self).step(token, state)
    }

    fn state_dims(&self, state: &Self::State) -> Vec<usize> {
        (**self).state_dims(state)
    }
}
