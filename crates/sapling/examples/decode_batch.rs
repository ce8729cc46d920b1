//! Batch decoding with the high-level decoder.
//!
//! Loads a decoder configuration (or uses the defaults), builds a random
//! reference RNN and decodes a few examples whose length bounds follow
//! their source lengths.
//!
//! ```text
//! cargo run -p sapling --example decode_batch -- [config.json]
//! ```

use sapling::prelude::*;

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => DecoderConfig::from_file(path)?,
        None => DecoderConfig::default(),
    };

    let device = candle_core::Device::Cpu;
    let model = ProjectedRnn::random(24, 16, 32, &device)?;
    let state = model.zero_state()?;

    let decoder = Decoder::builder(model).config(config).build()?;
    println!("{:?}\n", decoder.config());

    let requests = [2, 4, 7]
        .into_iter()
        .map(|source_len| DecodeRequest::new(state.clone()).source_len(source_len))
        .collect();
    let output = decoder.decode(requests)?;

    println!("Recorded {} steps", output.num_steps);
    for (e, example) in output.examples.iter().enumerate() {
        println!(
            "  example {}: {:?} (slot {}, score {:.3})",
            e,
            example.trimmed(output.eos_token_id),
            example.best_slot,
            example.score
        );
    }

    Ok(())
}
