//! Criterion benchmarks for the engine's per-cycle hot paths.
//!
//! Buffer synthesis runs on every reconfiguration and batch statistics run
//! on every monitoring cycle, so both need to stay comfortably below the
//! cycle period.
//!
//! Run with: cargo bench --bench waveform

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stimgen::measurement::SignalStats;
use stimgen::waveform::sine_buffer;

fn waveform_synthesis(c: &mut Criterion) {
    let mut group = c.benchmark_group("sine_buffer");

    let cases: [(&str, f64, f64); 3] = [
        ("60Hz_10kSps", 60.0, 10_000.0),
        ("1kHz_100kSps", 1_000.0, 100_000.0),
        ("8192Hz_1MSps", 8_192.0, 1_000_000.0),
    ];

    for (name, frequency, rate) in cases {
        let samples = (rate / frequency).round() as u64 * 4;
        group.throughput(Throughput::Elements(samples));
        group.bench_with_input(
            BenchmarkId::new("synthesize", name),
            &(frequency, rate),
            |b, &(frequency, rate)| {
                b.iter(|| sine_buffer(black_box(frequency), black_box(rate), 1.0, 0.0, 4));
            },
        );
    }

    group.finish();
}

fn batch_statistics(c: &mut Criterion) {
    let mut group = c.benchmark_group("signal_stats");

    for size in [5_000usize, 50_000, 200_000] {
        let batch = sine_buffer(1_000.0, 1_000_000.0, 1.0, 0.0, size / 1_000);
        assert_eq!(batch.len(), size);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("from_batch", size), &batch, |b, batch| {
            b.iter(|| SignalStats::from_batch(black_box(batch)));
        });
    }

    group.finish();
}

criterion_group!(benches, waveform_synthesis, batch_statistics);
criterion_main!(benches);
