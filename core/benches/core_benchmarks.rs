use criterion::{Criterion, black_box, criterion_group, criterion_main};

use tde_core::memory::{
    Allocator, GrowthPolicy, create_linear_allocator, create_pool_allocator,
    create_stack_allocator,
};

// ---------------------------------------------------------------------------
// Linear allocator
// ---------------------------------------------------------------------------

fn bench_linear_allocate_clear(c: &mut Criterion) {
    let mut allocator = create_linear_allocator(64 * 1024, GrowthPolicy::Fixed).unwrap();
    c.bench_function("linear_allocate_256x64_then_clear", |b| {
        b.iter(|| {
            for _ in 0..256 {
                black_box(allocator.allocate(black_box(64), 16));
            }
            allocator.clear().unwrap();
        });
    });
}

// ---------------------------------------------------------------------------
// Stack allocator
// ---------------------------------------------------------------------------

fn bench_stack_push_pop(c: &mut Criterion) {
    let mut allocator = create_stack_allocator(64 * 1024, GrowthPolicy::Fixed).unwrap();
    let mut blocks = Vec::with_capacity(256);
    c.bench_function("stack_push_pop_256x64", |b| {
        b.iter(|| {
            for _ in 0..256 {
                blocks.push(allocator.allocate(black_box(64), 16).unwrap());
            }
            while let Some(ptr) = blocks.pop() {
                allocator.deallocate(ptr).unwrap();
            }
        });
    });
}

fn bench_stack_release_in_allocation_order(c: &mut Criterion) {
    let mut allocator = create_stack_allocator(64 * 1024, GrowthPolicy::Fixed).unwrap();
    let mut blocks = Vec::with_capacity(256);
    c.bench_function("stack_fifo_release_256x64", |b| {
        b.iter(|| {
            for _ in 0..256 {
                blocks.push(allocator.allocate(black_box(64), 16).unwrap());
            }
            for ptr in blocks.drain(..) {
                allocator.deallocate(ptr).unwrap();
            }
        });
    });
}

// ---------------------------------------------------------------------------
// Pool allocator
// ---------------------------------------------------------------------------

fn bench_pool_churn(c: &mut Criterion) {
    let mut allocator = create_pool_allocator(64, 16, 64 * 1024, GrowthPolicy::Fixed).unwrap();
    let mut blocks = Vec::with_capacity(256);
    c.bench_function("pool_churn_256x64", |b| {
        b.iter(|| {
            for _ in 0..256 {
                blocks.push(allocator.allocate(black_box(64), 16).unwrap());
            }
            for ptr in blocks.drain(..) {
                allocator.deallocate(ptr).unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    bench_linear_allocate_clear,
    bench_stack_push_pop,
    bench_stack_release_in_allocation_order,
    bench_pool_churn,
);
criterion_main!(benches);
