//! Log-probability normalization and deterministic top-k.

use crate::error::{Result, SaplingError};
use crate::search::OutputKind;
use candle_core::{Device, Tensor, D};

/// Convert per-slot model outputs into log-probabilities.
///
/// All rows must share the vocabulary size. NaN entries (including rows
/// that were entirely negative infinity before the softmax) come back as
/// negative infinity so they rank last.
pub fn log_probs(rows: &[&[f32]], kind: OutputKind) -> Result<Vec<Vec<f32>>> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };
    let vocab = first.len();
    if let Some(bad) = rows.iter().find(|r| r.len() != vocab) {
        return Err(SaplingError::StructureMismatch(format!(
            "output rows of length {} and {}",
            vocab,
            bad.len()
        )));
    }

    let mut out: Vec<Vec<f32>> = match kind {
        OutputKind::LogProbs => rows.iter().map(|r| r.to_vec()).collect(),
        OutputKind::Logits => {
            let flat: Vec<f32> = rows.iter().flat_map(|r| r.iter().copied()).collect();
            let logits = Tensor::from_vec(flat, (rows.len(), vocab), &Device::Cpu)?;
            candle_nn::ops::log_softmax(&logits, D::Minus1)?.to_vec2::<f32>()?
        }
    };

    for row in &mut out {
        for v in row.iter_mut() {
            if v.is_nan() {
                *v = f32::NEG_INFINITY;
            }
        }
    }
    Ok(out)
}

/// Indices and values of the `k` largest entries, best first.
///
/// Ties keep the lower index first, matching argmax semantics.
pub fn top_k(values: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = values.iter().copied().enumerate().collect();
    // stable sort: equal scores stay in index order
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
    indexed.truncate(k);
    indexed
}
