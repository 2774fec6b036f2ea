// benches/local_gcbf_bench.rs

//! Throughput of the local filter's put/check and of the paged-view
//! cell-position mapping, the two hot paths a caller outside the network
//! boundary actually pays for.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use gcbf::paging::PagedView;
use gcbf::LocalGcbf;

fn bench_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_gcbf_put");
    for k in [4usize, 7, 10] {
        group.bench_with_input(BenchmarkId::from_parameter(k), &k, |b, &k| {
            let mut f = LocalGcbf::new(1_000_000, k, 64);
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                f.put(black_box(&i.to_le_bytes()), 32).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_gcbf_check");
    for k in [4usize, 7, 10] {
        group.bench_with_input(BenchmarkId::from_parameter(k), &k, |b, &k| {
            let mut f = LocalGcbf::new(1_000_000, k, 64);
            for i in 0u64..10_000 {
                f.put(&i.to_le_bytes(), 32).unwrap();
            }
            let mut i = 0u64;
            b.iter(|| {
                i = (i + 1) % 10_000;
                black_box(f.check(&i.to_le_bytes()));
            });
        });
    }
    group.finish();
}

fn bench_paged_position(c: &mut Criterion) {
    let view = PagedView::new(8 * gcbf::paging::PAGE_SIZE_CELLS);
    c.bench_function("paged_view_position", |b| {
        let mut x = 0u64;
        b.iter(|| {
            x = x.wrapping_add(104_729) % (8 * gcbf::paging::PAGE_SIZE_CELLS);
            black_box(view.position(black_box(x)));
        });
    });
}

criterion_group!(benches, bench_put, bench_check, bench_paged_position);
criterion_main!(benches);
