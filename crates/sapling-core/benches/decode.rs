//! Decoding throughput benchmarks.
//!
//! - **beam_width**: one example, growing `K` (fan-out is `K x K` per step)
//! - **batch_size**: fixed `K`, growing batch (rayon spreads the model calls)
//! - **backtrack**: reconstruction alone over a pre-recorded log

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sapling_core::model::{StepModel, StepOutput};
use sapling_core::search::{
    decode, BeamConfig, OutputKind, TimeStepController, TokenId, TreeBacktracker,
};
use sapling_core::Result;

const VOCAB: usize = 512;
const MAX_LENGTH: usize = 32;

/// Cheap deterministic model: logits from a hash of the running state.
struct HashModel;

fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

impl StepModel for HashModel {
    type State = u64;

    fn vocab_size(&self) -> usize {
        VOCAB
    }

    fn step(&self, token: TokenId, state: &u64) -> Result<StepOutput<u64>> {
        let h = mix(state ^ token as u64);
        let scores = (0..VOCAB as u64)
            .map(|v| (mix(h ^ v) >> 40) as f32 / (1u64 << 20) as f32)
            .collect();
        Ok(StepOutput { scores, state: h })
    }
}

fn config(k: usize) -> BeamConfig {
    BeamConfig {
        beam_width: k,
        start_token_id: 1,
        eos_token_id: 0,
        output_kind: OutputKind::Logits,
    }
}

fn bench_beam_width(c: &mut Criterion) {
    let mut group = c.benchmark_group("beam_width");
    group.sample_size(20);

    for k in [1, 4, 8, 16] {
        group.throughput(Throughput::Elements((k * MAX_LENGTH) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(k), &k, |b, &k| {
            b.iter(|| decode(HashModel, &config(k), vec![7], vec![MAX_LENGTH]).unwrap())
        });
    }
    group.finish();
}

fn bench_batch_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_size");
    group.sample_size(20);

    for batch in [1, 8, 32] {
        let seeds: Vec<u64> = (0..batch as u64).collect();
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), &seeds, |b, seeds| {
            b.iter(|| {
                decode(HashModel, &config(4), seeds.clone(), vec![MAX_LENGTH; seeds.len()])
                    .unwrap()
            })
        });
    }
    group.finish();
}

fn bench_backtrack(c: &mut Criterion) {
    let seeds: Vec<u64> = (0..16).collect();
    let trace = TimeStepController::new(HashModel, &config(8), seeds, vec![MAX_LENGTH; 16])
        .unwrap()
        .run()
        .unwrap();

    c.bench_function("backtrack_16x8", |b| {
        b.iter(|| TreeBacktracker.backtrack(black_box(&trace.log)).unwrap())
    });
}

criterion_group!(benches, bench_beam_width, bench_batch_size, bench_backtrack);
criterion_main!(benches);
