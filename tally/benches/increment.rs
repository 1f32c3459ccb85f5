//! Microbenchmarks for the `increment()` hot path and window reads.
//!
//! Run with: `cargo bench -p tally -- increment`

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tally::{Counter, DefaultWindow, Registry, RegistryConfig, WindowExt};

/// Creates a registry pre-populated with `key_count` counters.
fn setup_registry(key_count: usize) -> (Registry<String>, Vec<String>) {
    let registry = Registry::new(RegistryConfig::default()).unwrap();
    let keys: Vec<_> = (0..key_count).map(|i| format!("endpoint_{i}")).collect();

    for key in &keys {
        registry.increment(key.clone(), 1).unwrap();
    }

    (registry, keys)
}

fn bench_counter_increment(c: &mut Criterion) {
    let counter = Counter::new("k", None, false);

    c.bench_function("increment/counter", |b| {
        b.iter(|| counter.increment(black_box(1)).unwrap());
    });
}

fn bench_recursive_increment(c: &mut Criterion) {
    let mut group = c.benchmark_group("increment/parent_depth");

    for depth in [0usize, 1, 3] {
        let mut chain = vec![Arc::new(Counter::new(0, None, true))];
        for level in 1..=depth {
            let parent = Arc::clone(&chain[level - 1]);
            chain.push(Arc::new(Counter::new(level, Some(&parent), true)));
        }
        let leaf = Arc::clone(&chain[depth]);

        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| leaf.increment(black_box(1)).unwrap());
        });
    }

    group.finish();
}

fn bench_registry_increment(c: &mut Criterion) {
    let mut group = c.benchmark_group("increment/registry_keys");

    for count in [1, 100, 10_000] {
        let (registry, keys) = setup_registry(count);
        let mut i = 0;

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                i = (i + 1) % keys.len();
                registry
                    .increment(black_box(keys[i].clone()), black_box(1))
                    .unwrap();
            });
        });
    }

    group.finish();
}

fn bench_contended_increment(c: &mut Criterion) {
    let mut group = c.benchmark_group("increment/contended");
    let per_thread = 10_000u64;

    for threads in [1u64, 4, 8] {
        let (registry, _) = setup_registry(16);
        let registry = Arc::new(registry);
        group.throughput(Throughput::Elements(threads * per_thread));

        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| {
                let workers: Vec<_> = (0..threads)
                    .map(|t| {
                        let registry = Arc::clone(&registry);
                        thread::spawn(move || {
                            let key = format!("endpoint_{}", t % 16);
                            let counter = registry.counter(key);
                            for _ in 0..per_thread {
                                counter.increment(1).unwrap();
                            }
                        })
                    })
                    .collect();
                for worker in workers {
                    worker.join().unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_window_ranking(c: &mut Criterion) {
    let mut group = c.benchmark_group("highest/last_30_minutes");

    for count in [10, 1_000] {
        let (registry, _) = setup_registry(count);
        for _ in 0..30 {
            registry.roll_minutes();
        }

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| black_box(registry.highest(&DefaultWindow::Last30Minutes, 10)));
        });
    }

    group.finish();
}

fn bench_window_amount(c: &mut Criterion) {
    let counter = Counter::new("k", None, false);
    for minute in 0..60 {
        counter.increment(minute).unwrap();
        counter.roll_minute();
    }

    c.bench_function("amount/last_30_minutes", |b| {
        b.iter(|| black_box(DefaultWindow::Last30Minutes.amount(&counter)));
    });
}

criterion_group!(
    benches,
    bench_counter_increment,
    bench_recursive_increment,
    bench_registry_increment,
    bench_contended_increment,
    bench_window_ranking,
    bench_window_amount,
);
criterion_main!(benches);
