use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};

use es_core::Dataset;
use es_stats::{PowerSpectrum, PowerSpectrumConfig, Statistic};

fn noise_image(seed: u64, n: usize) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = Array2::from_shape_fn((n, n), |_| {
        <StandardNormal as Distribution<f64>>::sample(&StandardNormal, &mut rng)
    });
    Dataset::from_image(data, 1.0).unwrap()
}

fn bench_power_spectrum(c: &mut Criterion) {
    let mut group = c.benchmark_group("power_spectrum");
    for n in [64usize, 128, 256] {
        let ds = noise_image(1, n);
        let cfg = PowerSpectrumConfig::default();
        group.bench_function(format!("{n}x{n}"), |b| {
            b.iter(|| PowerSpectrum::compute(black_box(&ds), black_box(&cfg)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_power_spectrum);
criterion_main!(benches);
