//! Benchmark for the clock hot paths.
//!
//! TARGET: next-fire computation well under 100 ns, model update under 5 us
//!
//! Run with: cargo bench --package metronome_core --bench clock_benchmark

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use metronome_core::generator::{next_fire_time, ModelSink};
use metronome_core::Sampler;
use metronome_shared::{ClockModel, SamplerConfig, VsyncResult};
use std::sync::Arc;

const PERIOD: i64 = 16_666_667;

struct NullSink;

impl ModelSink for NullSink {
    fn update_mode(&self, _model: ClockModel) -> VsyncResult<()> {
        Ok(())
    }
}

fn benchmark_next_fire(c: &mut Criterion) {
    let model = ClockModel::new(PERIOD, 120_000, 1_000_000_000);

    c.bench_function("next_fire_time", |b| {
        let mut now = 1_000_000_000i64;
        b.iter(|| {
            now += 1_234_567;
            black_box(next_fire_time(
                black_box(&model),
                black_box(500_000),
                black_box(now - PERIOD),
                black_box(80_000),
                now,
            ))
        });
    });

    let mut group = c.benchmark_group("listener_scan");
    group.throughput(Throughput::Elements(64));
    group.bench_function("64_listeners", |b| {
        let offsets: Vec<i64> = (0..64).map(|i| i * 100_000).collect();
        b.iter(|| {
            offsets
                .iter()
                .map(|&offset| next_fire_time(&model, offset, 0, 0, black_box(2_000_000_000)))
                .min()
        });
    });
    group.finish();
}

fn benchmark_sampler_update(c: &mut Criterion) {
    let sampler = Sampler::new(&SamplerConfig::default(), Arc::new(NullSink));
    let mut t = 1_000_000_000i64;
    // Fill the ring so every sample triggers a full model update
    for _ in 0..64 {
        t += PERIOD;
        sampler.add_sample(t);
    }

    c.bench_function("sampler_add_sample_full_ring", |b| {
        b.iter(|| {
            t += PERIOD + (t % 7) * 1_000;
            black_box(sampler.add_sample(black_box(t)))
        });
    });
}

criterion_group!(benches, benchmark_next_fire, benchmark_sampler_update);
criterion_main!(benches);
