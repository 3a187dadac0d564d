//! Filter engine throughput: time-domain FIR vs FFT overlap-save.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use num_complex::Complex;

use iq_core::config::{FilterImpl, FilterOptions, FilterRequest};
use iq_dsp::filter::{design_chain, FilterEngine};

fn make_engine(implementation: FilterImpl) -> FilterEngine {
    let options = FilterOptions {
        requests: vec![FilterRequest::lowpass(200e3)],
        num_taps: Some(257),
        implementation,
        ..Default::default()
    };
    let designed = design_chain(&options, 2_000_000.0, 0.0).unwrap().unwrap();
    FilterEngine::new(&designed)
}

fn block(n: usize) -> Vec<Complex<f32>> {
    (0..n)
        .map(|i| {
            let t = i as f32 * 0.013;
            Complex::new(t.sin(), t.cos())
        })
        .collect()
}

fn bench_filters(c: &mut Criterion) {
    let input = block(16384);

    let mut group = c.benchmark_group("filter_16k_block");
    group.bench_function("fir_257_taps", |b| {
        let mut engine = make_engine(FilterImpl::Fir);
        b.iter(|| {
            black_box(engine.filter(black_box(&input)).len());
        });
    });
    group.bench_function("overlap_save_257_taps", |b| {
        let mut engine = make_engine(FilterImpl::Fft);
        b.iter(|| {
            black_box(engine.filter(black_box(&input)).len());
        });
    });
    group.finish();
}

criterion_group!(benches, bench_filters);
criterion_main!(benches);
