//! Performance benchmarks for the memory engine maintenance paths
//!
//! Targets:
//! - Search over 1k records: <5ms
//! - Decay pass over 1k records: <2ms
//! - Cluster detection over 1k records: <10ms

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hippocampus::{ConnectionType, MemoryConfig, MemoryEngine, MemoryKind, NewMemory};
use serde_json::json;
use tokio::runtime::Runtime;

const TOPICS: &[&str] = &["rust", "tokio", "sqlite", "tracing", "serde", "criterion"];

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Engine with `count` records and a chain of strong edges between neighbours
fn populated_engine(rt: &Runtime, count: usize) -> MemoryEngine {
    rt.block_on(async {
        let engine = MemoryEngine::new(MemoryConfig::default());
        let mut previous = None;
        for n in 0..count {
            let topic = TOPICS[n % TOPICS.len()];
            let id = engine
                .store(
                    NewMemory::new(
                        MemoryKind::ALL[n % MemoryKind::ALL.len()],
                        json!(format!("{} note number {} about {}", topic, n, topic)),
                    )
                    .with_strength(0.5 + (n % 5) as f64 * 0.1)
                    .with_tags([topic]),
                )
                .await;
            if let Some(prev) = previous {
                engine.connect(prev, id, ConnectionType::Associative, 0.8).await;
            }
            previous = Some(id);
        }
        engine
    })
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    let rt = runtime();

    for count in [100, 1_000].iter() {
        let engine = populated_engine(&rt, *count);
        group.throughput(Throughput::Elements(*count as u64));

        group.bench_with_input(BenchmarkId::new("all_kinds", count), count, |b, _| {
            b.iter(|| {
                let hits = rt.block_on(engine.search(black_box("tokio note"), None, 10));
                black_box(hits);
            });
        });

        group.bench_with_input(BenchmarkId::new("one_kind", count), count, |b, _| {
            b.iter(|| {
                let hits = rt.block_on(engine.search(
                    black_box("tokio note"),
                    Some(MemoryKind::Semantic),
                    10,
                ));
                black_box(hits);
            });
        });
    }

    group.finish();
}

fn bench_maintenance(c: &mut Criterion) {
    let mut group = c.benchmark_group("maintenance");
    let rt = runtime();
    let engine = populated_engine(&rt, 1_000);

    group.bench_function("apply_decay", |b| {
        b.iter(|| black_box(rt.block_on(engine.apply_decay())));
    });

    group.bench_function("identify_clusters", |b| {
        b.iter(|| black_box(rt.block_on(engine.identify_clusters())));
    });

    group.finish();
}

criterion_group!(benches, bench_search, bench_maintenance);

criterion_main!(benches);
