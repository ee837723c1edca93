//! Slab pool benchmarks using criterion.
//!
//! Run with: cargo bench --bench slab_bench

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use fixsized::{FixSizedAllocator, SlabPool};
use std::ptr::NonNull;

fn bench_single_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_churn");

    // Allocate and immediately free. One pinned slot keeps the block mapped
    // so each round does not pay for mmap/munmap.
    for size in [8usize, 32, 128, 512] {
        group.bench_with_input(BenchmarkId::new("slab_pool", size), &size, |b, &size| {
            let mut pool = SlabPool::new(size).unwrap();
            let pin = pool.allocate().unwrap();
            b.iter(|| {
                let p = pool.allocate().unwrap();
                black_box(p);
                // Safety: p came from this pool.
                unsafe { pool.deallocate(p) };
            });
            // Safety: pin came from this pool.
            unsafe { pool.deallocate(pin) };
        });
    }

    group.bench_function("box_u64x4", |b| {
        b.iter(|| black_box(Box::new([0u64; 4])));
    });

    group.finish();
}

#[allow(dead_code)]
struct Node {
    value: u64,
    next: Option<NonNull<Node>>,
}

fn bench_node_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_churn");

    for n in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("fix_sized", n), &n, |b, &n| {
            let mut alloc = FixSizedAllocator::<Node>::new().unwrap();
            let mut nodes = Vec::with_capacity(n);
            b.iter(|| {
                let mut prev = None;
                for i in 0..n as u64 {
                    let node = alloc.alloc_val(Node { value: i, next: prev }).unwrap();
                    prev = Some(node);
                    nodes.push(node);
                }
                for node in nodes.drain(..).rev() {
                    // Safety: every node came from this allocator and is freed once.
                    black_box(unsafe { alloc.take_val(node) }.value);
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("box", n), &n, |b, &n| {
            let mut nodes = Vec::with_capacity(n);
            b.iter(|| {
                let mut prev = None;
                for i in 0..n as u64 {
                    let mut node = Box::new(Node { value: i, next: prev });
                    prev = Some(NonNull::from(&mut *node));
                    nodes.push(node);
                }
                for node in nodes.drain(..).rev() {
                    black_box(node.value);
                }
            });
        });
    }

    group.finish();
}

fn bench_fragmented_reuse(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmented_reuse");

    // Free every other slot across many blocks, then refill the holes.
    group.bench_function("refill_holes", |b| {
        let mut pool = SlabPool::new(48).unwrap();
        let mut ptrs: Vec<_> = (0..pool.capacity() * 64).map(|_| pool.allocate().unwrap()).collect();
        b.iter(|| {
            for p in ptrs.iter().step_by(2) {
                // Safety: each slot is live and freed once per round.
                unsafe { pool.deallocate(*p) };
            }
            for p in ptrs.iter_mut().step_by(2) {
                *p = pool.allocate().unwrap();
            }
            black_box(pool.block_count());
        });
        for p in ptrs {
            // Safety: p came from this pool.
            unsafe { pool.deallocate(p) };
        }
    });

    group.finish();
}

criterion_group!(benches, bench_single_churn, bench_node_churn, bench_fragmented_reuse);
criterion_main!(benches);
