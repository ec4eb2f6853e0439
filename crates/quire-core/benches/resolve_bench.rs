#![allow(clippy::unwrap_used)]

use criterion::{Criterion, criterion_group, criterion_main};
use quire_core::resolver::fold_overrides;
use quire_core::store::{ContentStore, OverrideFields};
use quire_core::{
    Ancestry, ChainLink, Langcode, MemoryStore, ModuleData, ModuleDataId, ModuleId, PageId,
    RevisionId, RedbStore,
};
use std::hint::black_box;
use tempfile::TempDir;

/// A chain `depth` links long with a generic and an `en` row on every link.
fn chain_with_rows(depth: u64) -> (Ancestry, Vec<ModuleData>) {
    let links = (0..depth)
        .map(|i| ChainLink {
            revision: RevisionId(i),
            page: PageId(i),
        })
        .collect();
    let mut rows = Vec::new();
    for i in 0..depth {
        for (offset, lang) in [(0, ""), (1, "en")] {
            rows.push(ModuleData {
                id: ModuleDataId(i * 2 + offset),
                module: ModuleId(1),
                revision: RevisionId(i),
                langcode: Langcode::new(lang),
                template: (i % 3 == 0).then(|| format!("t{i}")),
                enabled: (i % 2 == 0).then_some(true),
                data: (i % 5 == 0).then(|| vec![0u8; 64]),
            });
        }
    }
    (Ancestry::from_links(links), rows)
}

fn bench_fold(c: &mut Criterion) {
    for depth in [4u64, 16, 64] {
        let (ancestry, rows) = chain_with_rows(depth);
        let en = Langcode::new("en");
        c.bench_function(&format!("fold_overrides_depth_{depth}"), |b| {
            b.iter(|| fold_overrides(black_box(&rows), black_box(&ancestry), black_box(&en)));
        });
    }
}

fn seed(store: &dyn ContentStore, depth: u64) {
    for i in 0..depth {
        for lang in ["", "en"] {
            store
                .upsert_module_data(ModuleId(1), RevisionId(i), &Langcode::new(lang), OverrideFields {
                    enabled: Some(true),
                    ..OverrideFields::default()
                })
                .unwrap();
        }
    }
}

fn bench_store_resolve(c: &mut Criterion) {
    let (ancestry, _) = chain_with_rows(16);
    let resolver_depth = 64;
    let en = Langcode::new("en");

    let memory = MemoryStore::new();
    seed(&memory, 16);
    c.bench_function("resolve_memory_store", |b| {
        let resolver = quire_core::ModuleOverrideResolver::new(&memory, resolver_depth);
        b.iter(|| resolver.resolve_in(black_box(&ancestry), ModuleId(1), &en).unwrap());
    });

    let tmp = TempDir::new().unwrap();
    let redb = RedbStore::open(&tmp.path().join("bench.redb")).unwrap();
    seed(&redb, 16);
    c.bench_function("resolve_redb_store", |b| {
        let resolver = quire_core::ModuleOverrideResolver::new(&redb, resolver_depth);
        b.iter(|| resolver.resolve_in(black_box(&ancestry), ModuleId(1), &en).unwrap());
    });
}

criterion_group!(benches, bench_fold, bench_store_resolve);
criterion_main!(benches);
