//! High-level decoder.

use anyhow::{bail, Context, Result};
use sapling_core::{
    model::StepModel,
    search::{self, BeamConfig, DecodeOutput, OutputKind, TokenId},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// How the per-example bound on recorded steps is derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthBound {
    /// Same bound for every example.
    Fixed(usize),
    /// `max(min, ceil(ratio * source_len))`.
    SourceRatio {
        /// Steps allowed per source token.
        ratio: f32,
        /// Lower bound, also used when no source length is given.
        min: usize,
    },
}

impl Default for LengthBound {
    fn default() -> Self {
        Self::SourceRatio { ratio: 2.0, min: 1 }
    }
}

impl LengthBound {
    /// Resolve the bound for one example.
    pub fn resolve(&self, source_len: Option<usize>) -> usize {
        match *self {
            Self::Fixed(n) => n,
            Self::SourceRatio { ratio, min } => match source_len {
                Some(len) => ((ratio * len as f32).ceil() as usize).max(min),
                None => min,
            },
        }
    }
}

/// Configuration for the decoder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Beam parameters.
    pub beam: BeamConfig,
    /// Per-example length bound.
    #[serde(default)]
    pub length_bound: LengthBound,
}

impl DecoderConfig {
    /// Load from JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading decoder config {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("parsing decoder config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the decoder cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.beam.validate()?;
        match self.length_bound {
            LengthBound::Fixed(0) => bail!("fixed length bound must be at least 1"),
            LengthBound::SourceRatio { min: 0, .. } => {
                bail!("source-ratio length bound needs a minimum of at least 1")
            }
            LengthBound::SourceRatio { ratio, .. } if ratio.is_nan() || ratio <= 0.0 => {
                bail!("source-ratio length bound needs a positive ratio, got {}", ratio)
            }
            _ => Ok(()),
        }
    }
}

/// One example to decode.
#[derive(Debug, Clone)]
pub struct DecodeRequest<S> {
    /// Model state the beam starts from.
    pub initial_state: S,
    /// Source length, for [`LengthBound::SourceRatio`].
    pub source_len: Option<usize>,
    /// Explicit bound, overriding the configured one.
    pub max_length: Option<usize>,
}

impl<S> DecodeRequest<S> {
    /// Request starting from `initial_state` with the configured bound.
    pub fn new(initial_state: S) -> Self {
        Self {
            initial_state,
            source_len: None,
            max_length: None,
        }
    }

    /// Set the source length.
    pub fn source_len(mut self, len: usize) -> Self {
        self.source_len = Some(len);
        self
    }

    /// Override the length bound for this example.
    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }
}

/// Builder for creating a Decoder.
pub struct DecoderBuilder<M> {
    model: M,
    config: DecoderConfig,
}

impl<M: StepModel> DecoderBuilder<M> {
    /// Create a new decoder builder around a model.
    pub fn new(model: M) -> Self {
        Self {
            model,
            config: DecoderConfig::default(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: DecoderConfig) -> Self {
        self.config = config;
        self
    }

    /// Set beam width.
    pub fn beam_width(mut self, width: usize) -> Self {
        self.config.beam.beam_width = width;
        self
    }

    /// Set start token.
    pub fn start_token_id(mut self, id: TokenId) -> Self {
        self.config.beam.start_token_id = id;
        self
    }

    /// Set terminator token.
    pub fn eos_token_id(mut self, id: TokenId) -> Self {
        self.config.beam.eos_token_id = id;
        self
    }

    /// Set how model outputs are interpreted.
    pub fn output_kind(mut self, kind: OutputKind) -> Self {
        self.config.beam.output_kind = kind;
        self
    }

    /// Set the length bound.
    pub fn length_bound(mut self, bound: LengthBound) -> Self {
        self.config.length_bound = bound;
        self
    }

    /// Build the decoder.
    pub fn build(self) -> Result<Decoder<M>> {
        self.config.validate()?;
        let vocab = self.model.vocab_size();
        if vocab < self.config.beam.beam_width {
            bail!(
                "vocabulary of {} cannot fill a beam of {}",
                vocab,
                self.config.beam.beam_width
            );
        }
        Ok(Decoder {
            model: self.model,
            config: self.config,
        })
    }
}

/// High-level beam decoder.
pub struct Decoder<M> {
    model: M,
    config: DecoderConfig,
}

impl<M: StepModel> Decoder<M> {
    /// Create a new decoder builder.
    pub fn builder(model: M) -> DecoderBuilder<M> {
        DecoderBuilder::new(model)
    }

    /// Get decoder configuration.
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Get model reference.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// Decode a batch of examples.
    pub fn decode(&self, requests: Vec<DecodeRequest<M::State>>) -> Result<DecodeOutput> {
        if requests.is_empty() {
            bail!("nothing to decode");
        }

        let (initial_states, max_lengths): (Vec<_>, Vec<_>) = requests
            .into_iter()
            .map(|req| {
                let bound = req
                    .max_length
                    .unwrap_or_else(|| self.config.length_bound.resolve(req.source_len));
                (req.initial_state, bound)
            })
            .unzip();

        info!(
            batch = initial_states.len(),
            beam_width = self.config.beam.beam_width,
            max_length = max_lengths.iter().copied().max().unwrap_or(0),
            "starting beam decode"
        );

        let output = search::decode(&self.model, &self.config.beam, initial_states, max_lengths)
            .context("beam decode failed")?;

        info!(steps = output.num_steps, "beam decode complete");
        Ok(output)
    }

    /// Decode a single example.
    pub fn decode_one(&self, request: DecodeRequest<M::State>) -> Result<Vec<TokenId>> {
        let output = self.decode(vec![request])?;
        let eos = output.eos_token_id;
        let example = output
            .examples
            .into_iter()
            .next()
            .context("decoder returned no example")?;
        Ok(example.trimmed(eos).to_vec())
    }
}

impl<M> std::fmt::Debug for Decoder<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("config", &self.config)
            .finish()
    }
}
