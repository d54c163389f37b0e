use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use vmops_api::memory::page_size;
use vmops_api::{Permission, VmBackend};
use vmops_bench::{isolated_base, SpinBarrier};
use vmops_platform::SimBackend;

fn bench_sim(c: &mut Criterion) {
    let sim = SimBackend::new();
    let obj = sim.create("bench", 64 * page_size::KB4, false).unwrap();

    c.bench_function("sim_map_unmap_4k", |b| {
        b.iter(|| {
            let addr = sim.map(&obj, 0, page_size::KB4).unwrap();
            sim.unmap(black_box(addr), page_size::KB4).unwrap();
        });
    });
    c.bench_function("sim_map_fixed_unmap_4k", |b| {
        let base = isolated_base(0);
        b.iter(|| {
            sim.map_fixed(base, &obj, 0, page_size::KB4).unwrap();
            sim.unmap(black_box(base), page_size::KB4).unwrap();
        });
    });
    c.bench_function("sim_protect_256k", |b| {
        let addr = sim.map(&obj, 0, 64 * page_size::KB4).unwrap();
        b.iter(|| {
            sim.protect(addr, 64 * page_size::KB4, Permission::RO).unwrap();
            sim.protect(addr, 64 * page_size::KB4, Permission::RW).unwrap();
        });
    });
}

fn bench_barrier(c: &mut Criterion) {
    c.bench_function("barrier_wait_single", |b| {
        let barrier = SpinBarrier::new(1);
        b.iter(|| black_box(barrier.wait().unwrap()));
    });
}

criterion_group!(benches, bench_sim, bench_barrier);
criterion_main!(benches);
