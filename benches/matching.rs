//! Benchmarks for encoding and 1-NN matching.
//!
//! Benchmark targets:
//! - Encoding a 512-byte template: <5µs
//! - 1-NN over 10,000 in-memory 16-dim vectors: <5ms

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::cast_possible_truncation)]

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use fingerlink::models::{SchemeId, TemplateId};
use fingerlink::services::{SimilarityMatcher, TemplateStore};
use fingerlink::storage::MemoryVectorBackend;
use std::hint::black_box;
use std::sync::Arc;

// ============================================================================
// Helper Functions
// ============================================================================

/// Deterministic pseudo-random template of `len` bytes.
fn template(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 56) as u8
        })
        .collect()
}

/// Store populated with `count` templates under `scheme`.
fn populated_store(scheme: SchemeId, count: u64) -> TemplateStore {
    let store = TemplateStore::new(Arc::new(MemoryVectorBackend::new()));
    let dimension = scheme.scheme().dimension;
    for seed in 0..count {
        let raw = template(seed, dimension);
        let vector = scheme.scheme().encode(&raw).unwrap();
        store.upsert(&TemplateId::from_bytes(&raw), &vector).unwrap();
    }
    store
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for id in SchemeId::all() {
        let scheme = id.scheme();
        let raw = template(7, scheme.dimension);
        group.bench_with_input(BenchmarkId::from_parameter(id), &raw, |b, raw| {
            b.iter(|| scheme.encode(black_box(raw)).unwrap());
        });
    }
    group.finish();
}

fn bench_template_id(c: &mut Criterion) {
    let raw = template(11, 512);
    c.bench_function("template_id_512", |b| {
        b.iter(|| TemplateId::from_bytes(black_box(&raw)));
    });
}

fn bench_nearest(c: &mut Criterion) {
    let mut group = c.benchmark_group("nearest");
    group.sample_size(30);
    for count in [100u64, 1_000, 10_000] {
        let store = populated_store(SchemeId::Normalized16, count);
        let matcher = SimilarityMatcher::new(store);
        let query = SchemeId::Normalized16
            .scheme()
            .encode(&template(count + 1, 16))
            .unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(count), &query, |b, query| {
            b.iter(|| matcher.identify(black_box(query)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_template_id, bench_nearest);
criterion_main!(benches);
