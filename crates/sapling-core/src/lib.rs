//! # Sapling Core
//!
//! Batched beam-search decoding over an autoregressive step model.
//!
//! This crate provides:
//! - **Expansion policy** that fans each hypothesis out and prunes `K²`
//!   candidates back to `K` per example
//! - **Timestep controller** that drives the loop and records decisions in
//!   flat, append-only index grids
//! - **Backtracker** that rebuilds full sequences from parent pointers
//! - **Finalizer** that length-normalizes scores and picks the winners

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod gather;
pub mod model;
pub mod scoring;
pub mod search;

pub use error::{Result, SaplingError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Result, SaplingError};
    pub use crate::model::{ProjectedRnn, StepModel, StepOutput};
    pub use crate::search::{
        decode, BeamConfig, DecodeOutput, DecodedExample, OutputKind, TimeStepController,
        TokenId,
    };
}
