//! Backward reconstruction of hypotheses from the step log.
//!
//! Pruning reorders survivors every step, so slot `k` at the last step may
//! descend from any slot earlier on. Each slot keeps a trace pointer,
//! starting at itself on the last step; walking backwards, the pointer
//! selects which token to read and is then replaced by the parent found at
//! that position.

use super::beam::TokenId;
use super::log::StepLog;
use crate::error::Result;
use crate::gather::gather;
use rayon::prelude::*;

/// Reconstructed sequences, indexed `[example][slot][time]`.
pub type Sequences = Vec<Vec<Vec<TokenId>>>;

/// Walks parent pointers from the last recorded step back to the first.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeBacktracker;

impl TreeBacktracker {
    /// Reconstruct every slot's full token sequence.
    ///
    /// The log is only read, so repeated calls return identical output.
    pub fn backtrack(&self, log: &StepLog) -> Result<Sequences> {
        (0..log.batch_size())
            .into_par_iter()
            .map(|example| self.backtrack_example(log, example))
            .collect()
    }

    fn backtrack_example(&self, log: &StepLog, example: usize) -> Result<Vec<Vec<TokenId>>> {
        let k = log.beam_width();
        let steps = log.num_steps();
        let mut sequences = vec![vec![0 as TokenId; steps]; k];
        let mut trace: Vec<usize> = (0..k).collect();

        for time in (0..steps).rev() {
            let ids = gather(&trace, log.predicted_ids(time, example)?)?;
            for (sequence, id) in sequences.iter_mut().zip(ids) {
                sequence[time] = id;
            }

            // timestep 0 has no parents to follow
            if time > 0 {
                let parents = gather(&trace, log.parent_index(time, example)?)?;
                trace = parents.into_iter().map(|p| p as usize).collect();
            }
        }

        Ok(sequences)
    }
}
