//! Dense polynomials over a prime field.

use crate::Field;
use num_bigint::BigUint;
use num_traits::Zero;
use rand::RngCore;

/// A polynomial with coefficients in ascending degree order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Polynomial {
    coefficients: Vec<BigUint>,
}

impl Polynomial {
    /// Constructs a polynomial from ascending coefficients.
    pub fn new(coefficients: Vec<BigUint>) -> Self {
        Polynomial { coefficients }
    }

    /// A random polynomial of the given degree with a fixed constant term.
    ///
    /// This is the sharing polynomial shape used by Shamir: the secret sits
    /// at degree zero and the remaining `degree` coefficients are uniform.
    pub fn random_with_constant<R: RngCore>(
        constant: BigUint,
        degree: usize,
        field: &Field,
        rng: &mut R,
    ) -> Self {
        let mut coefficients = Vec::with_capacity(degree + 1);
        coefficients.push(field.element(constant));
        for _ in 0..degree {
            coefficients.push(field.uniform(&[], rng).get(0).clone());
        }
        Polynomial { coefficients }
    }

    /// The coefficients, ascending.
    pub fn coefficients(&self) -> &[BigUint] {
        &self.coefficients
    }

    /// Evaluates the polynomial at `x` by Horner's rule.
    pub fn eval(&self, x: &BigUint, field: &Field) -> BigUint {
        let mut result = BigUint::zero();
        for coefficient in self.coefficients.iter().rev() {
            result = (result * x + coefficient) % field.order();
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use num_bigint::BigUint;

    fn field() -> Field {
        Field::new(BigUint::from(13u32)).unwrap()
    }

    #[test]
    fn eval_quadratic() {
        // f(x) = 3 + 2x + x^2 over GF(13).
        let field = field();
        let polynomial =
            Polynomial::new(vec![3u32.into(), 2u32.into(), 1u32.into()]);
        assert_eq!(polynomial.eval(&BigUint::from(0u32), &field), BigUint::from(3u32));
        assert_eq!(polynomial.eval(&BigUint::from(2u32), &field), BigUint::from(11u32));
        assert_eq!(polynomial.eval(&BigUint::from(5u32), &field), BigUint::from(38u32 % 13));
    }

    #[test]
    fn random_constant_term_survives() {
        let field = field();
        let mut rng = rand::thread_rng();
        let polynomial = Polynomial::random_with_constant(BigUint::from(7u32), 3, &field, &mut rng);
        assert_eq!(polynomial.eval(&BigUint::from(0u32), &field), BigUint::from(7u32));
        assert_eq!(polynomial.coefficients().len(), 4);
    }
}
