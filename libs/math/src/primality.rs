//! Miller-Rabin probabilistic primality testing.

use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::RngCore;

/// Returns true if `n` is prime with error probability at most 4^-rounds.
///
/// A false result is always correct: composites are never reported prime.
pub(crate) fn probably_prime<R: RngCore>(n: &BigUint, rounds: u32, rng: &mut R) -> bool {
    let one = BigUint::one();
    let two = BigUint::from(2u32);
    let three = BigUint::from(3u32);

    if n < &two {
        return false;
    }
    if n == &two || n == &three {
        return true;
    }
    if (n % &two).is_zero() {
        return false;
    }

    // Write n - 1 as 2^s * d with d odd.
    let n_minus_one = n - &one;
    let mut d = n_minus_one.clone();
    let mut s = 0u64;
    while (&d % &two).is_zero() {
        d >>= 1;
        s += 1;
    }

    'witness: for _ in 0..rounds {
        let a = rng.gen_biguint_range(&two, &n_minus_one);
        let mut x = a.modpow(&d, n);
        if x == one || x == n_minus_one {
            continue 'witness;
        }
        for _ in 0..s - 1 {
            x = x.modpow(&two, n);
            if x == n_minus_one {
                continue 'witness;
            }
        }
        return false;
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(2u64, true)]
    #[case(3u64, true)]
    #[case(4u64, false)]
    #[case(9u64, false)]
    #[case(127u64, true)]
    #[case(561u64, false)] // Carmichael number.
    #[case(7919u64, true)]
    #[case(18446744073709551557u64, true)]
    #[case(18446744073709551556u64, false)]
    fn small_cases(#[case] n: u64, #[case] expected: bool) {
        let mut rng = rand::thread_rng();
        assert_eq!(probably_prime(&BigUint::from(n), 32, &mut rng), expected);
    }
}
