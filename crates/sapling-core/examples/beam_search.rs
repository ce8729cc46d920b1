//! Beam search example.
//!
//! Decodes a small batch against a hand-written bigram "language model",
//! stepping the controller manually to show each timestep's decisions.

use sapling_core::model::{StepModel, StepOutput};
use sapling_core::search::{
    BeamConfig, Finalizer, OutputKind, TimeStepController, TokenId, TreeBacktracker,
};
use sapling_core::Result;

/// Toy vocabulary.
const VOCAB: &[&str] = &[
    "<eos>", "<bos>", "the", "a", "cat", "dog", "sat", "ran", "on", "mat", "quick", "lazy",
];

/// Bigram logits keyed on the previous token. The state counts emitted
/// tokens so the terminator gets likelier as the sentence grows.
struct Bigram;

impl StepModel for Bigram {
    type State = usize;

    fn vocab_size(&self) -> usize {
        VOCAB.len()
    }

    fn step(&self, token: TokenId, state: &usize) -> Result<StepOutput<usize>> {
        let len = *state;
        let mut logits = vec![-10.0f32; VOCAB.len()];

        match token {
            2 | 3 => {
                logits[4] = 2.0; // cat
                logits[5] = 1.5; // dog
                logits[10] = 0.5; // quick
                logits[11] = 0.0; // lazy
            }
            4 | 5 => {
                logits[6] = 2.5; // sat
                logits[7] = 2.0; // ran
                logits[0] = if len > 3 { 0.0 } else { -5.0 };
            }
            6 | 7 => {
                logits[8] = 3.0; // on
                logits[0] = if len > 4 { 0.5 } else { -3.0 };
            }
            8 => {
                logits[2] = 1.5; // the
                logits[9] = 2.0; // mat
                logits[3] = 1.0; // a
            }
            9 => {
                logits[0] = 3.0;
                logits[8] = -1.0; // on
            }
            10 | 11 => {
                logits[4] = 2.0; // cat
                logits[5] = 2.0; // dog
            }
            _ => {
                logits[2] = 3.0; // the
                logits[3] = 2.0; // a
                logits[10] = 1.0; // quick
            }
        }

        Ok(StepOutput {
            scores: logits,
            state: len + 1,
        })
    }
}

fn words(tokens: &[TokenId]) -> String {
    tokens
        .iter()
        .filter_map(|&t| VOCAB.get(t as usize).copied())
        .collect::<Vec<_>>()
        .join(" ")
}

fn main() -> Result<()> {
    println!("=== Beam Search Demo ===\n");

    let config = BeamConfig {
        beam_width: 3,
        start_token_id: 1,
        eos_token_id: 0,
        output_kind: OutputKind::Logits,
    };
    println!("Beam width: {}", config.beam_width);
    println!("Terminator: {:?}\n", VOCAB[config.eos_token_id as usize]);

    // two examples with different length bounds
    let mut controller = TimeStepController::new(Bigram, &config, vec![0, 0], vec![8, 4])?;

    while controller.step()? {
        let t = controller.time() - 1;
        println!("Step {}:", t);
        for e in 0..controller.log().batch_size() {
            let ids = controller.log().predicted_ids(t, e)?;
            let parents = controller.log().parent_index(t, e)?;
            println!("  example {}: ids {:?} parents {:?}", e, ids, parents);
        }
    }

    let trace = controller.finish();
    let sequences = TreeBacktracker.backtrack(&trace.log)?;
    let output = Finalizer.finalize(&trace, sequences)?;

    println!("\n=== Final Results ===\n");
    for (e, example) in output.examples.iter().enumerate() {
        println!(
            "Example {}: \"{}\" (slot {}, score {:.3})",
            e,
            words(example.trimmed(output.eos_token_id)),
            example.best_slot,
            example.score
        );
        for (slot, beam) in example.beams.iter().enumerate() {
            println!(
                "  [{}] \"{}\" norm {:.3} length {}",
                slot,
                words(&beam.tokens),
                beam.normalized_score,
                beam.penalty_length
            );
        }
    }

    Ok(())
}
