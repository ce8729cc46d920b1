//! Error types for Sapling Core.

use thiserror::Error;

/// Result type alias for Sapling operations.
pub type Result<T> = std::result::Result<T, SaplingError>;

/// Errors that can occur while decoding.
///
/// Every variant is terminal for the decode call that raised it. Nothing in
/// this crate retries.
#[derive(Error, Debug)]
pub enum SaplingError {
    /// Invalid beam width, batch size or length bound.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A model step, policy call or log append disagreed with the shape
    /// established earlier in the decode.
    #[error("structure mismatch: {0}")]
    StructureMismatch(String),

    /// A selector or parent index pointed outside its source.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange {
        /// Offending index.
        index: usize,
        /// Length of the source it was applied to.
        len: usize,
    },

    /// The external model-step function failed.
    #[error("model error: {0}")]
    Model(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
}
