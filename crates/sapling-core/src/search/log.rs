//! Append-only per-timestep decision log.
//!
//! The hypothesis tree is never materialized as nodes. Instead each
//! timestep appends a `[B, K]` grid of chosen tokens and a `[B, K]` grid of
//! parent slots; the backward walk is index arithmetic over these arenas.

use super::beam::TokenId;
use crate::error::{Result, SaplingError};

/// Parent marker for timestep 0, which has no prior beam.
pub const NO_PARENT: u32 = u32::MAX;

/// Two parallel append-only `[T, B, K]` grids.
#[derive(Debug, Clone)]
pub struct StepLog {
    batch_size: usize,
    beam_width: usize,
    predicted_ids: Vec<TokenId>,
    parent_index: Vec<u32>,
}

impl StepLog {
    /// Create an empty log for `batch_size` examples of `beam_width` slots.
    pub fn new(batch_size: usize, beam_width: usize) -> Self {
        Self {
            batch_size,
            beam_width,
            predicted_ids: Vec::new(),
            parent_index: Vec::new(),
        }
    }

    /// Number of examples.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of slots per example.
    pub fn beam_width(&self) -> usize {
        self.beam_width
    }

    fn row_len(&self) -> usize {
        self.batch_size * self.beam_width
    }

    /// Number of recorded timesteps.
    pub fn num_steps(&self) -> usize {
        match self.row_len() {
            0 => 0,
            n => self.predicted_ids.len() / n,
        }
    }

    /// Check if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.predicted_ids.is_empty()
    }

    /// Append one timestep. Both grids are flattened example-major.
    pub fn push_step(&mut self, predicted_ids: &[TokenId], parent_index: &[u32]) -> Result<()> {
        let expected = self.row_len();
        if predicted_ids.len() != expected || parent_index.len() != expected {
            return Err(SaplingError::StructureMismatch(format!(
                "step {} has {} ids and {} parents, expected {} ({} x {})",
                self.num_steps(),
                predicted_ids.len(),
                parent_index.len(),
                expected,
                self.batch_size,
                self.beam_width
            )));
        }

        self.predicted_ids.extend_from_slice(predicted_ids);
        self.parent_index.extend_from_slice(parent_index);
        Ok(())
    }

    fn range(&self, time: usize, example: usize) -> Result<std::ops::Range<usize>> {
        if time >= self.num_steps() {
            return Err(SaplingError::IndexOutOfRange {
                index: time,
                len: self.num_steps(),
            });
        }
        if example >= self.batch_size {
            return Err(SaplingError::IndexOutOfRange {
                index: example,
                len: self.batch_size,
            });
        }
        let start = time * self.row_len() + example * self.beam_width;
        Ok(start..start + self.beam_width)
    }

    /// Tokens chosen for `example` at `time`, one per slot.
    pub fn predicted_ids(&self, time: usize, example: usize) -> Result<&[TokenId]> {
        let range = self.range(time, example)?;
        Ok(&self.predicted_ids[range])
    }

    /// Parent slots for `example` at `time`; all [`NO_PARENT`] at time 0.
    pub fn parent_index(&self, time: usize, example: usize) -> Result<&[u32]> {
        let range = self.range(time, example)?;
        Ok(&self.parent_index[range])
    }
}
