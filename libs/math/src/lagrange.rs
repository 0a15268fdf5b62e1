//! Lagrange interpolation at zero.

use crate::{errors::InterpolationError, Field};
use num_bigint::BigUint;
use num_traits::Zero;
use std::collections::HashSet;

/// Precomputed Lagrange coefficients for evaluation at zero.
///
/// For distinct nonzero abscissas `x_i`, the coefficient for index `i` is
/// `prod_{j != i} x_j / (x_j - x_i)`, so that a polynomial known by its
/// ordinates `y_i = f(x_i)` satisfies `f(0) = sum_i c_i * y_i`.
#[derive(Clone, Debug)]
pub struct Lagrange {
    abscissas: Vec<BigUint>,
    coefficients: Vec<BigUint>,
}

impl Lagrange {
    /// Precomputes coefficients for the given abscissas, O(n^2).
    pub fn new(abscissas: Vec<BigUint>, field: &Field) -> Result<Self, InterpolationError> {
        let distinct: HashSet<&BigUint> = abscissas.iter().collect();
        if distinct.len() != abscissas.len() || abscissas.iter().any(|x| x.is_zero()) {
            return Err(InterpolationError::InvalidAbscissas);
        }

        let mut coefficients = Vec::with_capacity(abscissas.len());
        for (i, xi) in abscissas.iter().enumerate() {
            let mut numerator = BigUint::from(1u32);
            let mut denominator = BigUint::from(1u32);
            for (j, xj) in abscissas.iter().enumerate() {
                if j != i {
                    numerator = (numerator * xj) % field.order();
                    denominator = (denominator * field.sub_scalar(xj, xi)) % field.order();
                }
            }
            let coefficient = (numerator * field.inv_scalar(&denominator)?) % field.order();
            coefficients.push(coefficient);
        }
        Ok(Lagrange { abscissas, coefficients })
    }

    /// The abscissas the coefficients were computed for.
    pub fn abscissas(&self) -> &[BigUint] {
        &self.abscissas
    }

    /// The coefficient applied to the ordinate at index `i`.
    pub fn coefficient(&self, index: usize) -> &BigUint {
        &self.coefficients[index]
    }

    /// Interpolation at zero as an inner product with the ordinates, O(n).
    pub fn interpolate(
        &self,
        ordinates: &[BigUint],
        field: &Field,
    ) -> Result<BigUint, InterpolationError> {
        if ordinates.len() != self.abscissas.len() {
            return Err(InterpolationError::MismatchedOrdinates {
                expected: self.abscissas.len(),
                actual: ordinates.len(),
            });
        }
        let mut result = BigUint::zero();
        for (coefficient, ordinate) in self.coefficients.iter().zip(ordinates.iter()) {
            result = (result + coefficient * ordinate) % field.order();
        }
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::polynomial::Polynomial;
    use rstest::rstest;

    fn field() -> Field {
        Field::new(BigUint::from(127u32)).unwrap()
    }

    #[rstest]
    #[case(vec![7, 0, 3], 2)]
    #[case(vec![42, 1, 1, 1], 3)]
    #[case(vec![100, 50], 1)]
    fn recovers_constant_term(#[case] coefficients: Vec<u32>, #[case] degree: usize) {
        let field = field();
        let secret = coefficients[0];
        let polynomial = Polynomial::new(coefficients.into_iter().map(BigUint::from).collect());
        assert_eq!(polynomial.coefficients().len(), degree + 1);

        let abscissas: Vec<BigUint> = (1u32..=(degree as u32 + 1)).map(BigUint::from).collect();
        let ordinates: Vec<BigUint> =
            abscissas.iter().map(|x| polynomial.eval(x, &field)).collect();

        let lagrange = Lagrange::new(abscissas, &field).unwrap();
        let recovered = lagrange.interpolate(&ordinates, &field).unwrap();
        assert_eq!(recovered, BigUint::from(secret));
    }

    #[test]
    fn rejects_duplicate_abscissas() {
        let field = field();
        let abscissas = vec![BigUint::from(1u32), BigUint::from(1u32)];
        assert!(Lagrange::new(abscissas, &field).is_err());
    }

    #[test]
    fn rejects_zero_abscissa() {
        let field = field();
        let abscissas = vec![BigUint::from(0u32), BigUint::from(1u32)];
        assert!(Lagrange::new(abscissas, &field).is_err());
    }

    #[test]
    fn any_large_enough_subset_recovers() {
        let field = field();
        let polynomial = Polynomial::new(vec![9u32.into(), 4u32.into(), 2u32.into()]);
        let abscissas: Vec<BigUint> = (1u32..=5).map(BigUint::from).collect();
        let ordinates: Vec<BigUint> =
            abscissas.iter().map(|x| polynomial.eval(x, &field)).collect();

        // Interpolate from abscissas {2, 4, 5}.
        let subset = vec![abscissas[1].clone(), abscissas[3].clone(), abscissas[4].clone()];
        let subset_ordinates =
            vec![ordinates[1].clone(), ordinates[3].clone(), ordinates[4].clone()];
        let lagrange = Lagrange::new(subset, &field).unwrap();
        assert_eq!(lagrange.interpolate(&subset_ordinates, &field).unwrap(), BigUint::from(9u32));
    }
}
