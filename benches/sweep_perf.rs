
use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use bitcover::config::canonical_tiers;
use bitcover::health;
use bitcover::tiers::TierRegistry;
use bitcover::types::Timestamp;

use fixtures::{LARGE, MEDIUM, PRICE_50K, SMALL, build_scenario, populate};

// ── Group 1: health_sweep — provider count scaling ──────────────────────────

fn bench_health_sweep(c: &mut Criterion) {
    let registry = TierRegistry::new(canonical_tiers()).unwrap();
    let mut group = c.benchmark_group("health_sweep");
    for (name, scenario) in [("small", &SMALL), ("medium", &MEDIUM), ("large", &LARGE)] {
        let (ledger, book, providers) = populate(scenario);
        group.throughput(Throughput::Elements(providers.len() as u64));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| health::sweep(&providers, &ledger, &book, &registry, PRICE_50K))
        });
    }
    group.finish();
}

// ── Group 2: single assessment — obligation fan-in cost ─────────────────────

fn bench_single_assessment(c: &mut Criterion) {
    let registry = TierRegistry::new(canonical_tiers()).unwrap();
    let mut group = c.benchmark_group("single_assessment");
    for (name, scenario) in [("small", &SMALL), ("medium", &MEDIUM)] {
        let (ledger, book, providers) = populate(scenario);
        let target = providers[providers.len() / 2];
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| health::assess(target, &ledger, &book, &registry, PRICE_50K, 0))
        });
    }
    group.finish();
}

// ── Group 3: classification — tier matching throughput ──────────────────────

fn bench_classification(c: &mut Criterion) {
    let registry = TierRegistry::new(canonical_tiers()).unwrap();
    let mut group = c.benchmark_group("classification");
    group.throughput(Throughput::Elements(920));
    group.bench_function("strike_spread", |b| {
        b.iter(|| {
            for strike_bps in (7_200u64..11_800).step_by(5) {
                let _ = std::hint::black_box(
                    registry.classify(strike_bps, Timestamp::days(20)),
                );
            }
        })
    });
    group.finish();
}

// ── Group 4: full_run — end-to-end stress ticks ─────────────────────────────

fn bench_full_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_run");
    group.sample_size(10);
    for &(name, ticks, providers) in &[("short", 100u32, 10usize), ("long", 500, 30)] {
        group.bench_with_input(
            BenchmarkId::from_parameter(name),
            &(ticks, providers),
            |b, &(t, p)| {
                b.iter_batched(
                    || build_scenario(42, t, p),
                    |mut sim| sim.run(),
                    BatchSize::LargeInput,
                )
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_health_sweep,
    bench_single_assessment,
    bench_classification,
    bench_full_run,
);
criterion_main!(benches);
