//! Performance benchmarks for the memory engine
//!
//! Write path, search (semantic and lexical), answers and reflection at a
//! few store sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lucid_memory::config::EngineConfig;
use lucid_memory::embeddings::{Embedder, LocalEmbedder};
use lucid_memory::memory::{FragmentType, MemoryEngine, QueryContext, TimeRange};
use tempfile::TempDir;

const TOPICS: [&str; 5] = ["deploy", "database", "frontend", "billing", "security"];

/// Helper: open an engine in a fresh temp dir
fn setup_engine() -> (MemoryEngine, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let engine = MemoryEngine::open(EngineConfig::with_storage_path(temp_dir.path()))
        .expect("Failed to open engine");
    (engine, temp_dir)
}

/// Helper: populate with `count` tagged fragments
fn populate(engine: &MemoryEngine, count: usize) {
    for i in 0..count {
        let topic = TOPICS[i % TOPICS.len()];
        let content = format!(
            "Entry {i} about {topic}: the {topic} team reviewed incident {i} and agreed on \
             follow-up actions covering monitoring, rollback steps and ownership."
        );
        engine
            .remember(content, [topic], FragmentType::Knowledge, Some(0.6))
            .expect("Failed to remember");
    }
}

fn bench_local_embedding(c: &mut Criterion) {
    let embedder = LocalEmbedder::new(384).expect("embedder");
    let text = "The billing service retries failed charges three times before alerting";
    c.bench_function("local_embed", |b| {
        b.iter(|| embedder.encode(black_box(text)).expect("encode"))
    });
}

fn bench_remember(c: &mut Criterion) {
    let (engine, _dir) = setup_engine();
    let mut i = 0u64;
    c.bench_function("remember", |b| {
        b.iter(|| {
            i += 1;
            engine
                .remember(
                    format!("benchmark fragment {i} about rollout health"),
                    ["bench"],
                    FragmentType::Event,
                    None,
                )
                .expect("remember")
        })
    });
}

fn bench_answer(c: &mut Criterion) {
    let mut group = c.benchmark_group("answer");
    for size in [100usize, 1000] {
        let (engine, _dir) = setup_engine();
        populate(&engine, size);
        let context = QueryContext::default();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| engine.answer(black_box("what did the billing team agree on"), &context))
        });
    }
    group.finish();
}

fn bench_search_lexical(c: &mut Criterion) {
    let (engine, _dir) = setup_engine();
    populate(&engine, 1000);
    c.bench_function("search_lexical_1000", |b| {
        b.iter(|| engine.index().search_lexical(black_box("security rollback monitoring"), 5))
    });
}

fn bench_reflect(c: &mut Criterion) {
    let (engine, _dir) = setup_engine();
    populate(&engine, 500);
    c.bench_function("reflect_500", |b| {
        b.iter(|| {
            engine
                .reflect(TimeRange::last(chrono::Duration::hours(1)))
                .expect("reflect")
        })
    });
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .sample_size(20)
        .measurement_time(std::time::Duration::from_secs(5));
    targets =
        bench_local_embedding,
        bench_remember,
        bench_answer,
        bench_search_lexical,
        bench_reflect
);
criterion_main!(benches);
