use criterion::{black_box, criterion_group, criterion_main, Criterion};
use entity_formula::{Bitmap, Formula, FormulaRef};

fn stripe(step: u32, count: u32) -> FormulaRef {
    Formula::constant((0..count).map(|i| i * step).collect::<Bitmap>())
}

fn filter_tree() -> FormulaRef {
    Formula::not(
        stripe(7, 5_000),
        Formula::and(vec![
            stripe(2, 50_000),
            stripe(3, 40_000),
            Formula::or(vec![stripe(5, 20_000), stripe(11, 10_000)]),
        ]),
    )
}

fn bench_compute(c: &mut Criterion) {
    c.bench_function("compute_fresh_tree", |b| {
        b.iter(|| {
            let tree = filter_tree();
            black_box(tree.compute().map(|bitmap| bitmap.size()))
        })
    });

    let memoized = filter_tree();
    let _ = memoized.compute();
    c.bench_function("compute_memoized_tree", |b| {
        b.iter(|| black_box(memoized.compute().map(|bitmap| bitmap.size())))
    });
}

fn bench_build(c: &mut Criterion) {
    c.bench_function("build_and_hash_tree", |b| b.iter(|| black_box(filter_tree().hash())));
}

criterion_group!(benches, bench_compute, bench_build);
criterion_main!(benches);
