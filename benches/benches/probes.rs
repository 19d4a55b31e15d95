use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rtcheck_core::probe::monotonic::{MonotonicConfig, MonotonicProbe};
use rtcheck_core::sim::SteppedClock;
use rtcheck_core::{FairnessStats, RunGate, SystemTimeSource, TimeSource};

fn fairness_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("fairness");
    let mut rng = StdRng::seed_from_u64(7);

    group.bench_function("from_counters_64_workers", |b| {
        b.iter_batched(
            || (0..64).map(|_| rng.gen_range(9_000..11_000)).collect::<Vec<u64>>(),
            |counters| black_box(FairnessStats::from_counters(counters)),
            BatchSize::SmallInput,
        );
    });

    let gate = RunGate::new();
    gate.release().expect("release");
    group.bench_function("gate_is_running", |b| {
        b.iter(|| black_box(gate.is_running()));
    });

    group.finish();
}

fn clock_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("clock");
    group.measurement_time(Duration::from_secs(5));

    let host = SystemTimeSource::new();
    group.bench_function("host_monotonic_nanos", |b| {
        b.iter(|| black_box(host.monotonic_nanos()));
    });

    group.bench_function("monotonic_probe_10k_reads", |b| {
        b.iter_batched(
            || SteppedClock::new(0, 1, 1),
            |clock| {
                MonotonicProbe::new(MonotonicConfig {
                    duration: Duration::from_secs(10),
                    ..MonotonicConfig::default()
                })
                .run(&clock)
                .expect("stepped clock is monotonic")
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, fairness_stats, clock_reads);
criterion_main!(benches);
