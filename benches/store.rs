use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, SamplingMode, Throughput};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tempfile::tempdir;

use estoque::security;
use estoque::storage::{NewMercadoria, Store};

fn gen_entries(n: usize, seed: u64) -> Vec<NewMercadoria> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|i| NewMercadoria {
            name: format!("item-{}-{:08x}", i, rng.gen::<u32>()),
            price: rng.gen_range(1.0..500.0),
            height: rng.gen_range(1.0..120.0),
            width: rng.gen_range(1.0..120.0),
            status: if rng.gen_bool(0.8) { "available".into() } else { "sold".into() },
            image: None,
        })
        .collect()
}

fn bench_store(c: &mut Criterion) {
    let ns = [100usize, 1_000usize];
    let mut group = c.benchmark_group("store");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(20);

    for &n in &ns {
        let entries = gen_entries(n, 0xBEEF_CAFE);

        // Insert rewrites the whole db file each time, so this measures the
        // end-to-end persisted cost, not just the in-memory push.
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("insert", n.to_string()), &n, |b, _| {
            b.iter(|| {
                let tmp = tempdir().unwrap();
                let mut store = Store::open(tmp.path().join("estoque.db")).unwrap();
                for entry in entries.clone() {
                    store.insert_mercadoria(entry).unwrap();
                }
                criterion::black_box(store.mercadoria_count());
            });
        });

        // Build once for the read benchmark
        let tmp = tempdir().unwrap();
        let mut base = Store::open(tmp.path().join("estoque.db")).unwrap();
        for entry in entries.clone() {
            base.insert_mercadoria(entry).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("list", n.to_string()), &n, |b, _| {
            b.iter(|| {
                criterion::black_box(base.all_mercadorias());
            });
        });
    }

    group.finish();
}

fn bench_password(c: &mut Criterion) {
    let mut group = c.benchmark_group("password");
    group.sampling_mode(SamplingMode::Flat);
    group.sample_size(10);

    group.bench_function("hash", |b| {
        b.iter(|| {
            criterion::black_box(security::hash_password("correct horse battery staple").unwrap());
        });
    });

    let hash = security::hash_password("correct horse battery staple").unwrap();
    group.bench_function("verify", |b| {
        b.iter(|| {
            criterion::black_box(security::verify_password(&hash, "correct horse battery staple"));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_store, bench_password);
criterion_main!(benches);
