//! Benchmarks for the block cache and query engine.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use paged_entity_cache::cache::block::read_range;
use paged_entity_cache::cache::evictor::LruEvictor;
use paged_entity_cache::cache::pager::BlockCache;
use paged_entity_cache::config::StoreConfig;
use paged_entity_cache::models::{sample_users, User};
use paged_entity_cache::query::{Filter, QueryContext, QueryEngine, SortSpec};

fn bench_lru_admit(c: &mut Criterion) {
    c.bench_function("lru_admit_10k_into_50", |b| {
        b.iter(|| {
            let mut lru = LruEvictor::new(50);
            for num in 1..=10_000u64 {
                black_box(lru.admit(num));
            }
        })
    });

    let mut lru = LruEvictor::new(1000);
    for num in 1..=1000u64 {
        lru.admit(num);
    }
    c.bench_function("lru_select_100_from_1k", |b| {
        b.iter(|| black_box(lru.select_victims(100, &[1, 2, 3])))
    });
}

fn bench_query_engine(c: &mut Criterion) {
    let engine = QueryEngine::new(&User::store_config(StoreConfig::default()));
    let users = sample_users(5000);

    let search = QueryContext::default().with_filter(Filter::new().with("q", "hopper"));
    c.bench_function("query_search_5k", |b| {
        b.iter(|| black_box(engine.apply(users.clone(), &search)))
    });

    let filtered_sorted = QueryContext::default()
        .with_filter(Filter::new().with("roles", "admin"))
        .with_sort(SortSpec::desc("email"));
    c.bench_function("query_filter_sort_5k", |b| {
        b.iter(|| black_box(engine.apply(users.clone(), &filtered_sorted)))
    });
}

fn bench_read_range(c: &mut Criterion) {
    let mut cache = BlockCache::new(100, 50);
    let items: Vec<u64> = (0..5000).collect();
    for (i, chunk) in items.chunks(100).enumerate() {
        cache.put(i as u64 + 1, chunk.to_vec());
    }

    c.bench_function("read_range_full_5k", |b| {
        b.iter(|| {
            let all = read_range(|n| cache.peek(n).map(|b| b.items.as_slice()), 100, 0, 5000);
            black_box(all);
        })
    });

    c.bench_function("read_range_page_straddling", |b| {
        b.iter(|| {
            let page = read_range(|n| cache.peek(n).map(|b| b.items.as_slice()), 100, black_box(2490), 2510);
            black_box(page);
        })
    });
}

criterion_group!(benches, bench_lru_admit, bench_query_engine, bench_read_range);
criterion_main!(benches);
