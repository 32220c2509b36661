//! Weak table benchmarks
//!
//! Run with: `cargo bench -p otter-vm-weak`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use otter_vm_weak::{DeallocatingPolicy, WeakReferent, WeakTable};
use std::hint::black_box;
use std::ptr;

#[derive(Default)]
struct BenchObject {
    _fields: [u64; 4],
}

impl WeakReferent for BenchObject {
    fn is_deallocating(&self) -> bool {
        false
    }
}

/// One object, `n` weak variables, registered then cleared
fn register_clear_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("register_clear");

    // 1 and 4 stay inline; the rest move out of line
    for referrers in [1usize, 4, 5, 64].iter() {
        group.bench_with_input(
            BenchmarkId::new("referrers", referrers),
            referrers,
            |b, &n| {
                let mut table = WeakTable::new();
                let mut obj = BenchObject::default();
                let referent = &raw mut obj;
                let mut vars: Vec<*mut BenchObject> = vec![ptr::null_mut(); n];
                let base = vars.as_mut_ptr();

                b.iter(|| unsafe {
                    for i in 0..n {
                        let var = base.add(i);
                        *var = table.register(referent, var, DeallocatingPolicy::Crash);
                    }
                    black_box(table.clear(referent))
                });
            },
        );
    }

    group.finish();
}

/// Many objects with one weak variable each
fn many_objects_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("many_objects");

    for count in [100usize, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("objects", count), count, |b, &n| {
            let mut objs: Vec<BenchObject> = (0..n).map(|_| BenchObject::default()).collect();
            let objs_base = objs.as_mut_ptr();
            let mut vars: Vec<*mut BenchObject> = vec![ptr::null_mut(); n];
            let vars_base = vars.as_mut_ptr();

            b.iter(|| {
                let mut table = WeakTable::new();
                unsafe {
                    for i in 0..n {
                        let var = vars_base.add(i);
                        *var = table.register(objs_base.add(i), var, DeallocatingPolicy::Crash);
                    }
                    for i in 0..n {
                        table.clear(objs_base.add(i));
                    }
                }
                black_box(table.capacity())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, register_clear_benchmark, many_objects_benchmark);
criterion_main!(benches);
