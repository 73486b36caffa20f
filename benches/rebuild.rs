//! Rebuild and search benchmarks for dualdex
//!
//! Run with: cargo bench

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use dualdex::index::{
    CancellationToken, DualDirectoryIndex, IndexConfig, IndexingOptions, MemoryCrawler,
};
use dualdex::store::{IndexPropertyStore, IndexStores, MemoryBackend};
use std::sync::Arc;
use tempfile::TempDir;

/// An index over a temp dir whose crawler serves `documents` generated files
fn create_index(documents: usize) -> (TempDir, DualDirectoryIndex) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let crawler = Arc::new(MemoryCrawler::new("bench"));
    for i in 0..documents {
        crawler.insert(
            format!("src/file_{}.rs", i),
            format!(
                "fn function_{i}() {{ let rebuildCount = {i}; println!(\"switch directories {i}\"); }}\n\
                 struct Struct{i} {{ field: i32, name: String }}\n",
                i = i
            ),
        );
    }

    let store = Arc::new(
        IndexPropertyStore::new("bench")
            .with_key("bench")
            .with_backend(MemoryBackend::new()),
    );
    let mut index = DualDirectoryIndex::new(
        "bench",
        temp_dir.path(),
        IndexConfig::default(),
        IndexStores::extended(store),
    );
    index.add_crawler(crawler);
    (temp_dir, index)
}

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild");
    group.sample_size(10);

    for &documents in &[100usize, 1_000] {
        let (_dir, index) = create_index(documents);
        for parallel in [false, true] {
            let options = IndexingOptions {
                parallel,
                ..IndexingOptions::default()
            };
            let label = if parallel { "parallel" } else { "sequential" };
            group.bench_with_input(BenchmarkId::new(label, documents), &documents, |b, _| {
                b.iter(|| {
                    index
                        .rebuild(&options, &CancellationToken::new())
                        .expect("rebuild failed")
                })
            });
        }
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let (_dir, index) = create_index(1_000);
    index
        .rebuild(&IndexingOptions::default(), &CancellationToken::new())
        .expect("rebuild failed");

    let mut group = c.benchmark_group("search");
    for query in ["rebuild", "switch directories", "struct field name"] {
        group.bench_with_input(BenchmarkId::from_parameter(query), query, |b, query| {
            b.iter(|| black_box(index.search(query, 10).expect("search failed")))
        });
    }
    group.finish();
}

fn bench_switch(c: &mut Criterion) {
    let (_dir, index) = create_index(100);
    index
        .rebuild(&IndexingOptions::default(), &CancellationToken::new())
        .expect("rebuild failed");

    c.bench_function("switch_directories", |b| {
        b.iter(|| index.switch_directories().expect("switch failed"))
    });
}

criterion_group!(benches, bench_rebuild, bench_search, bench_switch);
criterion_main!(benches);
