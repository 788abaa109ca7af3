use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tally_core::btree::BTree;
use tally_core::cache::LruCache;
use tally_core::Pair;
use tempfile::TempDir;

fn bench_btree_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("btree");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("insert_1000", |b| {
        b.iter_batched(
            || {
                let dir = TempDir::new().unwrap();
                let tree = BTree::open(dir.path().join("idx")).unwrap();
                (dir, tree)
            },
            |(_dir, mut tree)| {
                for i in 0..1000u64 {
                    let key = format!("query-{:08}", i.wrapping_mul(2654435761) % 1_000_000);
                    tree.insert(Pair::new(key, i)).unwrap();
                }
            },
            BatchSize::PerIteration,
        );
    });

    group.bench_function("get_hit", |b| {
        let dir = TempDir::new().unwrap();
        let mut tree = BTree::open(dir.path().join("idx")).unwrap();
        for i in 0..5000u64 {
            tree.insert(Pair::new(format!("query-{:08}", i), i)).unwrap();
        }
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 7919) % 5000;
            tree.get(&format!("query-{:08}", i)).unwrap()
        });
    });

    group.finish();
}

fn bench_cache(c: &mut Criterion) {
    let cache = LruCache::new(10_000).unwrap();
    let keys: Vec<String> = (0..50_000).map(|i| format!("select {}", i % 20_000)).collect();

    let mut group = c.benchmark_group("lru");
    group.throughput(Throughput::Elements(keys.len() as u64));
    group.bench_function("push_or_increment", |b| {
        b.iter(|| {
            let mut evicted = 0u64;
            for key in &keys {
                if cache.push_or_increment(key, 1).is_some() {
                    evicted += 1;
                }
            }
            evicted
        });
    });
    group.finish();
}

criterion_group!(benches, bench_btree_insert, bench_cache);
criterion_main!(benches);
