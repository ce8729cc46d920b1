//! Batched "select value at index" primitive.
//!
//! Both the pruning step and the backward walk reduce to the same operation:
//! given `K` selectors and a source row, produce `source[selector[i]]` for
//! every `i`. Out-of-range selectors are bookkeeping bugs and are reported,
//! never clamped.

use crate::error::{Result, SaplingError};

/// Gather `source[selector]` for every selector.
pub fn gather<T: Clone>(selectors: &[usize], source: &[T]) -> Result<Vec<T>> {
    selectors
        .iter()
        .map(|&index| {
            source.get(index).cloned().ok_or(SaplingError::IndexOutOfRange {
                index,
                len: source.len(),
            })
        })
        .collect()
}

/// Gather independently for each example of a batch.
///
/// `selectors[e]` is applied to `sources[e]` only; rows are never mixed.
pub fn gather_rows<T: Clone>(selectors: &[Vec<usize>], sources: &[&[T]]) -> Result<Vec<Vec<T>>> {
    if selectors.len() != sources.len() {
        return Err(SaplingError::StructureMismatch(format!(
            "gather over {} selector rows but {} source rows",
            selectors.len(),
            sources.len()
        )));
    }

    selectors
        .iter()
        .zip(sources)
        .map(|(row, source)| gather(row, source))
        .collect()
}
