//! Scope Cycle Benchmarks
//!
//! Measures the enter/allocate/exit protocol that generated code runs on
//! every call.
//!
//! # Benchmark Categories
//!
//! 1. **Flat Scopes**: one scope, k allocations, exit (O(k) collection)
//! 2. **Returning Scopes**: same, with one promoted return value
//! 3. **Deep Nesting**: recursive scopes returning through every level

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use scoped_gc::{ScopeContext, ScopeGcConfig};

fn bench_context() -> ScopeContext {
    ScopeContext::new(ScopeGcConfig {
        verify_ledger: false,
        ..Default::default()
    })
    .expect("valid config")
}

// =============================================================================
// Flat Scopes
// =============================================================================

fn bench_flat_scope(c: &mut Criterion) {
    let mut group = c.benchmark_group("flat_scope");

    for allocs in [1usize, 16, 256] {
        group.throughput(Throughput::Elements(allocs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(allocs), &allocs, |b, &allocs| {
            let mut ctx = bench_context();
            b.iter(|| {
                ctx.enter();
                for _ in 0..allocs {
                    black_box(ctx.allocate(32).expect("alloc"));
                }
                black_box(ctx.exit());
            });
        });
    }

    group.finish();
}

// =============================================================================
// Returning Scopes
// =============================================================================

fn bench_returning_scope(c: &mut Criterion) {
    let mut group = c.benchmark_group("returning_scope");

    for allocs in [1usize, 16, 256] {
        group.throughput(Throughput::Elements(allocs as u64));
        group.bench_with_input(BenchmarkId::from_parameter(allocs), &allocs, |b, &allocs| {
            let mut ctx = bench_context();
            ctx.enter();
            b.iter(|| {
                ctx.enter();
                let mut last = None;
                for _ in 0..allocs {
                    last = Some(ctx.allocate(32).expect("alloc"));
                }
                if let Some(obj) = last {
                    unsafe { ctx.mark_for_return(obj).expect("mark") };
                }
                black_box(ctx.exit());
                // Drop the promoted value so the outer scope stays small.
                ctx.exit();
                ctx.enter();
            });
            ctx.exit();
        });
    }

    group.finish();
}

// =============================================================================
// Deep Nesting
// =============================================================================

fn nested(scope: &mut scoped_gc::Scope<'_>, levels: usize) -> usize {
    if levels == 0 {
        return scope.alloc(16).map(|l| l.size()).unwrap_or(0);
    }
    scope
        .scope_returning(|inner| {
            inner.alloc(64)?;
            nested(inner, levels - 1);
            inner.alloc(16)
        })
        .map(|l| l.size())
        .unwrap_or(0)
}

fn bench_deep_nesting(c: &mut Criterion) {
    let mut group = c.benchmark_group("deep_nesting");

    for depth in [8usize, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &depth| {
            let mut ctx = bench_context();
            b.iter(|| black_box(ctx.scope(|s| nested(s, depth))));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_flat_scope,
    bench_returning_scope,
    bench_deep_nesting
);
criterion_main!(benches);
