//! Benchmark for end-to-end pull execution.
//!
//! TARGET: 100,000 committed pulls per second on one key (volatile store)
//!
//! Run with: cargo bench --package fortuna_pulls --bench engine_benchmark

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fortuna_odds::{Catalog, ProbabilityTable, RewardItem, RewardPool, SeededDraws, Tier, TierWeight};
use fortuna_pulls::{MemoryStore, PullEngine, PullRequest};
use std::sync::Arc;
use std::thread;

fn create_catalog() -> Arc<Catalog> {
    let catalog = Catalog::new();
    let items = Tier::ALL
        .iter()
        .flat_map(|&tier| (0..8).map(move |i| RewardItem::new(tier as u32 * 100 + i, tier)))
        .collect();
    catalog
        .publish_pool(RewardPool::new("bench", 1, items))
        .expect("bench pool");
    catalog
        .publish_table(
            ProbabilityTable::new(
                "bench",
                1,
                1,
                vec![
                    TierWeight::new(Tier::Common, 600_000),
                    TierWeight::new(Tier::Uncommon, 250_000),
                    TierWeight::new(Tier::Rare, 120_000),
                    TierWeight::new(Tier::Epic, 25_000),
                    TierWeight::new(Tier::Legendary, 5_000),
                ],
            )
            .with_pity(Tier::Rare, 10)
            .with_pity(Tier::Legendary, 90),
        )
        .expect("bench table");
    Arc::new(catalog)
}

fn create_engine() -> PullEngine {
    PullEngine::builder(create_catalog())
        .store(Arc::new(MemoryStore::new()))
        .draws(Arc::new(SeededDraws::new(0x5EED)))
        .build()
}

fn benchmark_single_key(c: &mut Criterion) {
    let engine = create_engine();
    let mut next = 0u64;

    c.bench_function("execute_pull_single_key", |b| {
        b.iter(|| {
            next += 1;
            let request = PullRequest::new(format!("req-{next}"), "user-1", "bench", "tok_0123456789");
            black_box(engine.execute_pull(&request))
        });
    });
}

fn benchmark_replay(c: &mut Criterion) {
    let engine = create_engine();
    let request = PullRequest::new("replayed", "user-1", "bench", "tok_0123456789");
    engine.execute_pull(&request).expect("first pull");

    c.bench_function("execute_pull_replay", |b| b.iter(|| black_box(engine.execute_pull(&request))));
}

fn benchmark_parallel_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_users");

    for threads in [1usize, 4, 8] {
        group.throughput(Throughput::Elements((threads * 250) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let engine = create_engine();
            let mut round = 0u64;
            b.iter(|| {
                round += 1;
                thread::scope(|scope| {
                    for t in 0..threads {
                        let engine = &engine;
                        scope.spawn(move || {
                            for i in 0..250 {
                                let request = PullRequest::new(
                                    format!("r{round}-t{t}-{i}"),
                                    format!("user-{t}"),
                                    "bench",
                                    "tok_0123456789",
                                );
                                let _ = black_box(engine.execute_pull(&request));
                            }
                        });
                    }
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_single_key, benchmark_replay, benchmark_parallel_keys);
criterion_main!(benches);
