//! Reference recurrent step model.
//!
//! A single tanh cell with an output projection:
//!
//! `h' = tanh(embed(token) @ W_in + h @ W_rec)`
//! `logits = h' @ W_out + b_out`
//!
//! Good enough to drive the decoder end to end in tests and demos; real
//! deployments plug their own [`StepModel`].

use super::step::{StepModel, StepOutput};
use crate::error::{Result, SaplingError};
use crate::search::TokenId;
use candle_core::{DType, Device, Tensor};

/// Embedding + tanh RNN cell + vocabulary projection.
#[derive(Debug, Clone)]
pub struct ProjectedRnn {
    /// Token embeddings: [vocab, embed].
    embedding: Tensor,
    /// Input weights: [embed, hidden].
    w_input: Tensor,
    /// Recurrent weights: [hidden, hidden].
    w_hidden: Tensor,
    /// Output projection: [hidden, vocab].
    w_output: Tensor,
    /// Output bias: [vocab].
    b_output: Tensor,
    vocab_size: usize,
    hidden_size: usize,
}

impl ProjectedRnn {
    /// Create from explicit weights.
    pub fn new(
        embedding: Tensor,
        w_input: Tensor,
        w_hidden: Tensor,
        w_output: Tensor,
        b_output: Tensor,
    ) -> Result<Self> {
        let (vocab_size, embed_dim) = embedding.dims2()?;
        let (in_dim, hidden_size) = w_input.dims2()?;
        let hidden_dims = w_hidden.dims2()?;
        let (out_in, out_vocab) = w_output.dims2()?;
        let bias_len = b_output.dims1()?;

        if in_dim != embed_dim
            || hidden_dims != (hidden_size, hidden_size)
            || out_in != hidden_size
            || out_vocab != vocab_size
            || bias_len != vocab_size
        {
            return Err(SaplingError::StructureMismatch(format!(
                "rnn weights disagree: embedding {:?}, w_input {:?}, w_hidden {:?}, w_output {:?}, b_output {:?}",
                embedding.dims(),
                w_input.dims(),
                w_hidden.dims(),
                w_output.dims(),
                b_output.dims()
            )));
        }

        Ok(Self {
            embedding,
            w_input,
            w_hidden,
            w_output,
            b_output,
            vocab_size,
            hidden_size,
        })
    }

    /// Create with random weights (for testing).
    pub fn random(
        vocab_size: usize,
        embed_dim: usize,
        hidden_size: usize,
        device: &Device,
    ) -> Result<Self> {
        let embedding = Tensor::randn(0.0f32, 1.0, &[vocab_size, embed_dim], device)?;
        let w_input = Tensor::randn(0.0f32, 0.5, &[embed_dim, hidden_size], device)?;
        let w_hidden = Tensor::randn(0.0f32, 0.5, &[hidden_size, hidden_size], device)?;
        let w_output = Tensor::randn(0.0f32, 1.0, &[hidden_size, vocab_size], device)?;
        let b_output = Tensor::zeros(vocab_size, DType::F32, device)?;

        Self::new(embedding, w_input, w_hidden, w_output, b_output)
    }

    /// Hidden dimension.
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// All-zero hidden state, shaped [1, hidden].
    pub fn zero_state(&self) -> Result<Tensor> {
        Ok(Tensor::zeros(
            (1, self.hidden_size),
            DType::F32,
            self.embedding.device(),
        )?)
    }
}

impl StepModel for ProjectedRnn {
    type State = Tensor;

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn step(&self, token: TokenId, state: &Tensor) -> Result<StepOutput<Tensor>> {
        if token as usize >= self.vocab_size {
            return Err(SaplingError::Model(format!(
                "token {} outside vocabulary of {}",
                token, self.vocab_size
            )));
        }

        let x = self.embedding.get(token as usize)?.unsqueeze(0)?;
        let pre = x
            .matmul(&self.w_input)?
            .add(&state.matmul(&self.w_hidden)?)?;
        let hidden = pre.tanh()?;
        let logits = hidden
            .matmul(&self.w_output)?
            .broadcast_add(&self.b_output)?;

        Ok(StepOutput {
            scores: logits.squeeze(0)?.to_vec1::<f32>()?,
            state: hidden,
        })
    }

    fn state_dims(&self, state: &Tensor) -> Vec<usize> {
        state.dims().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_shapes() {
        let model = ProjectedRnn::random(7, 4, 5, &Device::Cpu).unwrap();
        let state = model.zero_state().unwrap();
        let out = model.step(3, &state).unwrap();

        assert_eq!(out.scores.len(), 7);
        assert_eq!(out.state.dims(), &[1, 5]);
        assert_eq!(model.state_dims(&out.state), vec![1, 5]);
    }

    #[test]
    fn step_is_deterministic() {
        let model = ProjectedRnn::random(6, 3, 4, &Device::Cpu).unwrap();
        let state = model.zero_state().unwrap();
        let a = model.step(1, &state).unwrap();
        let b = model.step(1, &state).unwrap();
        assert_eq!(a.scores, b.scores);
    }

    #[test]
    fn hidden_state_is_bounded() {
        let model = ProjectedRnn::random(6, 3, 4, &Device::Cpu).unwrap();
        let state = model.zero_state().unwrap();
        let out = model.step(2, &state).unwrap();
        let values = out.state.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(values.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn rejects_token_outside_vocab() {
        let model = ProjectedRnn::random(4, 2, 2, &Device::Cpu).unwrap();
        let state = model.zero_state().unwrap();
        assert!(matches!(
            model.step(4, &state),
            Err(SaplingError::Model(_))
        ));
    }

    #[test]
    fn rejects_mismatched_weights() {
        let dev = Device::Cpu;
        let embedding = Tensor::zeros((5, 3), DType::F32, &dev).unwrap();
        let w_input = Tensor::zeros((3, 4), DType::F32, &dev).unwrap();
        let w_hidden = Tensor::zeros((4, 4), DType::F32, &dev).unwrap();
        let w_output = Tensor::zeros((4, 6), DType::F32, &dev).unwrap();
        let b_output = Tensor::zeros(5, DType::F32, &dev).unwrap();

        let err = ProjectedRnn::new(embedding, w_input, w_hidden, w_output, b_output).unwrap_err();
        assert!(matches!(err, SaplingError::StructureMismatch(_)));
    }
}
