//! Benchmarks for core veritag operations.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tempfile::tempdir;

use veritag_core::{
    issuer::{SeededTokenIssuer, TokenIssuer as _},
    registry::{AuthenticityRegistry as _, BatchInput, SqliteRegistry},
};

fn bench_token_issuance(c: &mut Criterion) {
    c.bench_function("issue_1000_tokens", |b| {
        let mut issuer = SeededTokenIssuer::new(0xBE2C);
        b.iter(|| issuer.issue(black_box(1000)).unwrap())
    });
}

fn bench_registry_lookup(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let mut registry = SqliteRegistry::create_new(&dir.path().join("bench.db")).unwrap();
    let mut issuer = SeededTokenIssuer::new(0xBE2C);
    let token_ids = issuer.issue(1000).unwrap();
    let probe = token_ids[500].clone();
    registry
        .register_batch(&BatchInput {
            product_id: "bench-product".to_string(),
            token_ids,
            name: "Bench Widget".to_string(),
            compact_metadata: Default::default(),
            manufacturer: "bench".to_string(),
        })
        .unwrap();

    c.bench_function("registry_lookup", |b| {
        b.iter(|| registry.lookup(black_box(&probe)).unwrap())
    });
}

fn bench_batch_commit(c: &mut Criterion) {
    c.bench_function("register_batch_100", |b| {
        let dir = tempdir().unwrap();
        let mut registry = SqliteRegistry::create_new(&dir.path().join("bench.db")).unwrap();
        let mut issuer = SeededTokenIssuer::new(0xFEED);
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let token_ids = issuer.issue(100).unwrap();
            registry
                .register_batch(&BatchInput {
                    product_id: format!("bench-{n}"),
                    token_ids,
                    name: "Bench Widget".to_string(),
                    compact_metadata: Default::default(),
                    manufacturer: "bench".to_string(),
                })
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_token_issuance,
    bench_registry_lookup,
    bench_batch_commit
);
criterion_main!(benches);
