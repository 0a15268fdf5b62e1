//! Field arithmetic throughput.

use cicada_math::Field;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn elementwise(c: &mut Criterion) {
    let field = Field::default();
    let mut rng = rand::thread_rng();
    let lhs = field.uniform(&[1024], &mut rng);
    let rhs = field.uniform(&[1024], &mut rng);

    c.bench_function("add_1024", |b| {
        b.iter(|| field.add(black_box(&lhs), black_box(&rhs)).unwrap())
    });
    c.bench_function("mul_1024", |b| {
        b.iter(|| field.mul(black_box(&lhs), black_box(&rhs)).unwrap())
    });
    c.bench_function("neg_1024", |b| b.iter(|| field.neg(black_box(&lhs)).unwrap()));
    c.bench_function("sum_1024", |b| b.iter(|| field.sum(black_box(&lhs)).unwrap()));
}

fn sampling(c: &mut Criterion) {
    let field = Field::default();
    c.bench_function("uniform_1024", |b| {
        let mut rng = rand::thread_rng();
        b.iter(|| field.uniform(&[1024], &mut rng))
    });
}

criterion_group!(benches, elementwise, sampling);
criterion_main!(benches);
