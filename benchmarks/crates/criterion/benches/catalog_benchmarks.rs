//! Benchmarks for catalog ingestion and snapshot reads.

#![allow(
    clippy::min_ident_chars,
    clippy::unwrap_used,
    clippy::expect_used,
    missing_docs,
    reason = "Benchmarks use standard loop variables and fixed inputs"
)]

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use docqa_context::{Catalog, MemoryStore, RetrievalService};
use docqa_core::{ChunkingConfig, DocumentStore, FileType};
use docqa_providers::MockEmbedder;
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

const DIMENSION: usize = 256;

fn runtime() -> Runtime {
    Runtime::new().expect("tokio runtime")
}

fn service() -> RetrievalService<MockEmbedder> {
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    RetrievalService::new(
        Arc::new(Catalog::new(store, None)),
        Arc::new(MockEmbedder::new(DIMENSION)),
        ChunkingConfig::default(),
        5,
    )
}

fn document_text(seed: usize) -> String {
    (0..400)
        .map(|i| format!("section {seed} covers topic {} in detail.", (seed + i) % 37))
        .collect::<Vec<_>>()
        .join(" ")
}

fn bench_ingest(c: &mut Criterion) {
    let rt = runtime();
    let text = document_text(1);

    c.bench_function("ingest_document", |b| {
        b.to_async(&rt).iter(|| async {
            let service = service();
            service
                .ingest(black_box(&text), "Bench", FileType::Text)
                .await
                .unwrap()
        });
    });
}

fn bench_search(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("catalog_search");

    for documents in &[10, 50] {
        let service = service();
        rt.block_on(async {
            for seed in 0..*documents {
                service
                    .ingest(&document_text(seed), &format!("Doc {seed}"), FileType::Text)
                    .await
                    .unwrap();
            }
        });
        let chunks = service.catalog().stats().chunks;

        group.throughput(Throughput::Elements(chunks as u64));
        group.bench_with_input(BenchmarkId::new("hybrid", documents), &service, |b, service| {
            b.to_async(&rt)
                .iter(|| async { service.search(black_box("topic 12 in detail")).await.unwrap() });
        });
        group.bench_with_input(BenchmarkId::new("keyword", documents), &service, |b, service| {
            b.iter(|| service.catalog().keyword_search(black_box("topic section"), 5));
        });
    }
    group.finish();
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(2))
        .warm_up_time(Duration::from_millis(500))
        .sample_size(10);
    targets = bench_ingest,
             bench_search
}
criterion_main!(benches);
