//! # Sapling
//!
//! Batched beam-search decoding over any step-wise sequence model.
//!
//! Sapling runs a fixed-width beam per example in lockstep, records every
//! pruning decision in a flat backpointer log, and reconstructs the best
//! length-normalized hypothesis of each example once the batch is done:
//! - **Deterministic**: stable tie-breaking, results independent of batch
//!   composition and thread count
//! - **Model-agnostic**: anything implementing [`StepModel`] can be decoded
//! - **Parallel**: model calls and pruning fan out over rayon each step
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sapling::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let model = ProjectedRnn::random(32, 16, 32, &candle_core::Device::Cpu)?;
//!     let state = model.zero_state()?;
//!
//!     let decoder = Decoder::builder(model)
//!         .beam_width(4)
//!         .length_bound(LengthBound::Fixed(20))
//!         .build()?;
//!
//!     let output = decoder.decode(vec![DecodeRequest::new(state)])?;
//!     println!("{:?}", output.examples[0].trimmed(output.eos_token_id));
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core crate
pub use sapling_core::*;

mod decoder;

pub use decoder::{DecodeRequest, Decoder, DecoderBuilder, DecoderConfig, LengthBound};

/// Commonly used types.
pub mod prelude {
    pub use crate::decoder::{DecodeRequest, Decoder, DecoderBuilder, DecoderConfig, LengthBound};
    pub use crate::{
        error::{Result, SaplingError},
        model::{ProjectedRnn, StepModel, StepOutput},
        search::{BeamConfig, DecodeOutput, DecodedExample, OutputKind, TokenId},
    };

    // Re-export useful external types
    pub use anyhow;
    pub use tracing;
}
