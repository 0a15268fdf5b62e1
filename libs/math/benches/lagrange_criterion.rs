//! Lagrange interpolation cost at reveal time.

use cicada_math::{lagrange::Lagrange, polynomial::Polynomial, BigUint, Field};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn interpolation(c: &mut Criterion) {
    let field = Field::default();
    let mut rng = rand::thread_rng();
    let degree = 31usize;

    let polynomial = Polynomial::random_with_constant(BigUint::from(42u32), degree, &field, &mut rng);
    let abscissas: Vec<BigUint> = (1..=degree as u64 + 1).map(BigUint::from).collect();
    let ordinates: Vec<BigUint> =
        abscissas.iter().map(|x| polynomial.eval(x, &field)).collect();

    c.bench_function("lagrange_new_32", |b| {
        b.iter(|| Lagrange::new(black_box(abscissas.clone()), &field).unwrap())
    });

    let lagrange = Lagrange::new(abscissas, &field).unwrap();
    c.bench_function("lagrange_interpolate_32", |b| {
        b.iter(|| lagrange.interpolate(black_box(&ordinates), &field).unwrap())
    });
}

criterion_group!(benches, interpolation);
criterion_main!(benches);
