use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use rivet::extract::DESCRIPTOR_DIM;
use rivet::{Features, KeyPoint, MatchVerifier, Vocabulary, WeightMode};

fn random_batch(rows: usize, rng: &mut StdRng) -> DMatrix<f32> {
    DMatrix::from_fn(rows, DESCRIPTOR_DIM, |_, _| rng.gen_range(-1.0..1.0))
}

fn random_features(count: usize, rng: &mut StdRng) -> Features {
    let keypoints = (0..count)
        .map(|_| KeyPoint {
            x: rng.gen_range(0.0..640.0),
            y: rng.gen_range(0.0..480.0),
            size: rng.gen_range(4.0..32.0),
            response: rng.gen_range(0.001..0.2),
        })
        .collect();
    Features {
        keypoints,
        descriptors: random_batch(count, rng),
    }
}

/// Histogram encoding of one image against a mid-size vocabulary.
fn bench_encode(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);
    let vocabulary = Vocabulary::from_words(random_batch(500, &mut rng));
    let descriptors = random_batch(300, &mut rng);
    c.bench_function("encode histogram", |b| {
        b.iter(|| vocabulary.encode(black_box(&descriptors), WeightMode::Normalized))
    });
}

/// Full three-stage verification of an image against itself.
fn bench_verify(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(2);
    let features = random_features(200, &mut rng);
    let verifier = MatchVerifier::default();
    c.bench_function("verify self match", |b| {
        b.iter(|| verifier.verify(black_box(&features), black_box(&features)))
    });
}

criterion_group!(benches, bench_encode, bench_verify);
criterion_main!(benches);
