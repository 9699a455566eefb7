//! Performance benchmarks for the revision engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use revstore::{
    Collaborators, MemoryStorage, PermissiveUserProvider, Revisionable, RevisionableId,
    RevisionNumber, StateGraph, TypeDefinition, TypeId, TypeRegistry, UserId,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn build_registry() -> (TypeRegistry, TypeId) {
    let mut builder = StateGraph::builder();
    let draft = builder
        .register_state("draft", "Draft", "badge", true, true)
        .unwrap();
    let approved = builder
        .register_state("approved", "Approved", "badge", false, false)
        .unwrap();
    builder.add_dependency(draft, approved);
    builder.add_dependency(approved, draft);
    let mut registry = TypeRegistry::new();
    let doc = TypeId::new("document");
    registry.register(doc.clone(), TypeDefinition::new(builder.build()));
    (registry, doc)
}

fn create_record(registry: &TypeRegistry, doc: &TypeId, id: u64) -> Revisionable {
    let storage = Box::new(MemoryStorage::new(
        RevisionableId(id),
        Arc::new(PermissiveUserProvider),
    ));
    Revisionable::create(
        RevisionableId(id),
        registry,
        doc,
        storage,
        Collaborators::default(),
        UserId(1),
        "bench",
    )
    .unwrap()
}

/// Benchmark minting revisions through structural transactions
fn bench_mint_revision(c: &mut Criterion) {
    let (registry, doc) = build_registry();
    let mut record = create_record(&registry, &doc, 1);

    c.bench_function("mint_revision", |b| {
        b.iter(|| {
            record.start_transaction(UserId(1), "bench", None).unwrap();
            record.set_part_changed("body", true).unwrap();
            black_box(record.end_transaction().unwrap());
        });
    });
}

/// Benchmark in-place custom-column writes (no mint)
fn bench_write_in_place(c: &mut Criterion) {
    let (registry, doc) = build_registry();
    let mut record = create_record(&registry, &doc, 1);

    c.bench_function("write_in_place", |b| {
        b.iter(|| {
            record.start_transaction(UserId(1), "bench", None).unwrap();
            record.set_custom_key("label", json!("value")).unwrap();
            black_box(record.end_transaction().unwrap());
        });
    });
}

/// Benchmark loading revisions with varying history depths
fn bench_load_revision(c: &mut Criterion) {
    let mut group = c.benchmark_group("load_revision");

    for history in [10, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("history", history),
            &history,
            |b, &depth| {
                let (registry, doc) = build_registry();
                let mut record = create_record(&registry, &doc, 1);
                for _ in 0..depth {
                    record.start_transaction(UserId(1), "bench", None).unwrap();
                    record.set_part_changed("body", true).unwrap();
                    record.end_transaction().unwrap();
                }

                let middle = RevisionNumber((depth / 2).max(1) as u64);
                b.iter(|| {
                    black_box(record.load_revision(middle).unwrap());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark minting against the file-backed table
fn bench_table_mint(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let table = revstore::RevisionTable::open(dir.path().join("bench.rvt")).unwrap();
    let (registry, doc) = build_registry();

    let storage = Box::new(revstore::TableStorage::attach(
        table,
        RevisionableId(1),
        Default::default(),
        Arc::new(PermissiveUserProvider),
    ));
    let mut record = Revisionable::create(
        RevisionableId(1),
        &registry,
        &doc,
        storage,
        Collaborators::default(),
        UserId(1),
        "bench",
    )
    .unwrap();

    c.bench_function("table_mint_revision", |b| {
        b.iter(|| {
            record.start_transaction(UserId(1), "bench", None).unwrap();
            record.set_part_changed("body", true).unwrap();
            black_box(record.end_transaction().unwrap());
        });
    });
}

criterion_group!(
    benches,
    bench_mint_revision,
    bench_write_in_place,
    bench_load_revision,
    bench_table_mint
);
criterion_main!(benches);
