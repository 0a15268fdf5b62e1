//! End-to-end additive suite exercises over loopback TCP.

use cicada_communicator::{run_local, SocketCommunicator};
use cicada_encoding::{Encoding, FixedPoint, Scalars};
use cicada_math::{BigUint, Field};
use cicada_protocols::{AdditiveProtocolSuite, ProtocolError, SuiteOptions};
use std::sync::Arc;

/// A 31-bit prime field keeps comparison tests quick while leaving room
/// for 16 fractional bits.
const SMALL_PRIME: u64 = 2147483647;

fn fixed_suite(
    comm: SocketCommunicator,
    order: u64,
    precision: u32,
) -> Result<AdditiveProtocolSuite, ProtocolError> {
    AdditiveProtocolSuite::new(
        Arc::new(comm),
        Field::new(BigUint::from(order))?,
        Encoding::FixedPoint(FixedPoint::new(precision)),
        SuiteOptions::default(),
    )
}

fn default_suite(comm: SocketCommunicator) -> Result<AdditiveProtocolSuite, ProtocolError> {
    AdditiveProtocolSuite::new(
        Arc::new(comm),
        Field::default(),
        Encoding::default_fixed_point(),
        SuiteOptions::default(),
    )
}

fn identity_suite(
    comm: SocketCommunicator,
    order: u64,
) -> Result<AdditiveProtocolSuite, ProtocolError> {
    AdditiveProtocolSuite::new(
        Arc::new(comm),
        Field::new(BigUint::from(order))?,
        Encoding::Identity,
        SuiteOptions::default(),
    )
}

fn reals(result: Result<Option<Scalars>, ProtocolError>) -> Vec<f64> {
    result.unwrap().unwrap().as_reals().unwrap().to_vec()
}

fn expect_all<T>(results: Vec<Result<T, ProtocolError>>) -> Vec<T> {
    results
        .into_iter()
        .enumerate()
        .map(|(rank, result)| match result {
            Ok(value) => value,
            Err(error) => panic!("player {rank} failed: {error}"),
        })
        .collect()
}

#[test]
fn shares_sum_to_the_encoded_secret() {
    let results = run_local(4, |comm| {
        let mut suite = default_suite(comm)?;
        let share = suite.share(0, Some(&Scalars::real(17.5)), &[])?;
        let gathered = suite.communicator().all_gather(share.storage())?;
        Ok::<_, ProtocolError>(gathered)
    });
    let field = Field::default();
    let encoding = Encoding::default_fixed_point();
    let expected = encoding.encode(&Scalars::real(17.5), &[], &field).unwrap();
    for gathered in expect_all(results) {
        let mut total = field.zeros(&[]);
        for share in &gathered {
            field.add_assign(&mut total, share).unwrap();
        }
        assert_eq!(total, expected);
    }
}

#[test]
fn additive_sum_of_two_secrets() {
    // Three players, 64-bit field, 16 fractional bits: 2 + 3.5 = 5.5.
    let results = run_local(3, |comm| {
        let mut suite = default_suite(comm)?;
        let a = suite.share(0, Some(&Scalars::real(2.0)), &[])?;
        let b = suite.share(1, Some(&Scalars::real(3.5)), &[])?;
        let total = suite.field_add(&a, &b)?;
        suite.reveal(&total, None)
    });
    for revealed in expect_all(results) {
        assert_eq!(revealed.unwrap().as_reals().unwrap(), &[5.5]);
    }
}

#[test]
fn private_multiply_with_truncation() {
    // 5 * 6 = 30 once the doubled fixed-point scale is stripped.
    let results = run_local(3, |comm| {
        let mut suite = default_suite(comm)?;
        let a = suite.share(0, Some(&Scalars::real(5.0)), &[])?;
        let b = suite.share(1, Some(&Scalars::real(6.0)), &[])?;
        let product = suite.untruncated_multiply(&a, &b)?;
        let product = suite.truncate(&product, None)?;
        suite.reveal(&product, None)
    });
    for revealed in expect_all(results) {
        assert_eq!(revealed.unwrap().as_reals().unwrap(), &[30.0]);
    }
}

#[test]
fn millionaires() {
    // Four players iteratively keep the rank whose fortune is not less
    // than the running maximum; 5.5 at rank one wins.
    let fortunes = [1.0, 5.5, 2.25, 3.75];
    let results = run_local(4, move |comm| {
        let rank = comm.rank();
        let mut suite = fixed_suite(comm, SMALL_PRIME, 16)?;

        let mut shares = Vec::new();
        for player in 0..4 {
            let fortune = (rank == player).then(|| Scalars::real(fortunes[player]));
            shares.push(suite.share(player, fortune.as_ref(), &[])?);
        }

        let mut winner = 0;
        for challenger in 1..4 {
            let poorer = suite.less(&shares[winner], &shares[challenger])?;
            let poorer = suite
                .reveal_bits(&poorer, None)?
                .expect("full reveal returns a value to every player");
            if poorer.as_bits().unwrap() == [1] {
                winner = challenger;
            }
        }
        Ok::<_, ProtocolError>(winner)
    });
    assert_eq!(expect_all(results), vec![1, 1, 1, 1]);
}

#[test]
fn random_bitwise_secret_composes() {
    let results = run_local(3, |comm| {
        let mut suite = identity_suite(comm, SMALL_PRIME)?;
        let (bit_share, secret_share) = suite.random_bitwise_secret(8, None, None)?;
        let bits = suite
            .reveal_bits(&bit_share, None)?
            .expect("full reveal returns a value to every player");
        let secret = suite
            .reveal_field(&secret_share, None)?
            .expect("full reveal returns a value to every player");
        Ok::<_, ProtocolError>((bits.as_bits().unwrap().to_vec(), secret.get(0).clone()))
    });
    for (bits, secret) in expect_all(results) {
        assert_eq!(bits.len(), 8);
        let composed = bits.iter().fold(BigUint::from(0u32), |total, bit| {
            (total << 1) + BigUint::from(*bit)
        });
        assert_eq!(secret, composed);
    }
}

#[test]
fn linear_ops_are_local_and_exact() {
    let results = run_local(3, |comm| {
        let mut suite = default_suite(comm)?;
        let a = suite.share(0, Some(&Scalars::Reals(vec![1.5, -2.0])), &[2])?;
        let b = suite.share(1, Some(&Scalars::Reals(vec![0.25, 7.0])), &[2])?;
        let sum = suite.field_add(&a, &b)?;
        let difference = suite.field_subtract(&a, &b)?;
        let negated = suite.negative(&a)?;
        Ok::<_, ProtocolError>((
            reals(suite.reveal(&sum, None)),
            reals(suite.reveal(&difference, None)),
            reals(suite.reveal(&negated, None)),
        ))
    });
    for (sum, difference, negated) in expect_all(results) {
        assert_eq!(sum, vec![1.75, 5.0]);
        assert_eq!(difference, vec![1.25, -9.0]);
        assert_eq!(negated, vec![-1.5, 2.0]);
    }
}

#[test]
fn public_operands_apply_once() {
    let results = run_local(3, |comm| {
        let mut suite = default_suite(comm)?;
        let field = suite.field().clone();
        let encoding = suite.encoding().clone();
        let share = suite.share(0, Some(&Scalars::real(10.0)), &[])?;
        let public = encoding.encode(&Scalars::real(4.0), &[], &field)?;
        let shifted = suite.public_private_add(&public, &share)?;
        let flipped = suite.public_private_subtract(&public, &share)?;
        let lowered = suite.private_public_subtract(&share, &public)?;
        Ok::<_, ProtocolError>((
            reals(suite.reveal(&shifted, None)),
            reals(suite.reveal(&flipped, None)),
            reals(suite.reveal(&lowered, None)),
        ))
    });
    for (shifted, flipped, lowered) in expect_all(results) {
        assert_eq!(shifted, vec![14.0]);
        assert_eq!(flipped, vec![-6.0]);
        assert_eq!(lowered, vec![6.0]);
    }
}

#[test]
fn reshare_preserves_the_secret() {
    let results = run_local(3, |comm| {
        let mut suite = default_suite(comm)?;
        let share = suite.share(0, Some(&Scalars::real(12.25)), &[])?;
        let fresh = suite.reshare(&share)?;
        let changed = fresh != share;
        let changed = comm_any(&mut suite, changed)?;
        Ok::<_, ProtocolError>((reals(suite.reveal(&fresh, None)), changed))
    });
    for (revealed, changed) in expect_all(results) {
        assert_eq!(revealed, vec![12.25]);
        // At least one player's share must move.
        assert!(changed);
    }
}

fn comm_any(suite: &mut AdditiveProtocolSuite, local: bool) -> Result<bool, ProtocolError> {
    let votes = suite.communicator().all_gather(&local)?;
    Ok(votes.into_iter().any(|vote| vote))
}

#[test]
fn comparisons_follow_signed_interpretation() {
    let results = run_local(3, |comm| {
        let mut suite = fixed_suite(comm, SMALL_PRIME, 8)?;
        let a = suite.share(0, Some(&Scalars::real(-1.5)), &[])?;
        let b = suite.share(1, Some(&Scalars::real(2.0)), &[])?;

        let a_lt_b = suite.less(&a, &b)?;
        let b_lt_a = suite.less(&b, &a)?;
        let a_neg = suite.less_than_zero(&a)?;
        let b_neg = suite.less_than_zero(&b)?;
        Ok::<_, ProtocolError>((
            reveal_bit(&mut suite, &a_lt_b)?,
            reveal_bit(&mut suite, &b_lt_a)?,
            reveal_bit(&mut suite, &a_neg)?,
            reveal_bit(&mut suite, &b_neg)?,
        ))
    });
    for bits in expect_all(results) {
        assert_eq!(bits, (1, 0, 1, 0));
    }
}

fn reveal_bit(
    suite: &mut AdditiveProtocolSuite,
    share: &cicada_protocols::AdditiveArrayShare,
) -> Result<u8, ProtocolError> {
    let bits = suite.reveal_bits(share, None)?.expect("full reveal");
    Ok(bits.as_bits().unwrap()[0])
}

#[test]
fn equality_by_fermat() {
    let results = run_local(3, |comm| {
        let mut suite = identity_suite(comm, 127)?;
        let a = suite.share(0, Some(&Scalars::integer(42u32)), &[])?;
        let b = suite.share(1, Some(&Scalars::integer(42u32)), &[])?;
        let c = suite.share(2, Some(&Scalars::integer(43u32)), &[])?;
        let same = suite.equal(&a, &b)?;
        let different = suite.equal(&a, &c)?;
        Ok::<_, ProtocolError>((
            reveal_bit(&mut suite, &same)?,
            reveal_bit(&mut suite, &different)?,
        ))
    });
    for bits in expect_all(results) {
        assert_eq!(bits, (1, 0));
    }
}

#[test]
fn logical_operations_on_shared_bits() {
    let results = run_local(3, |comm| {
        let mut suite = identity_suite(comm, 127)?;
        let a = suite.share_bits(0, Some(&Scalars::Bits(vec![0, 0, 1, 1])), &[4])?;
        let b = suite.share_bits(1, Some(&Scalars::Bits(vec![0, 1, 0, 1])), &[4])?;
        let and = suite.logical_and(&a, &b)?;
        let or = suite.logical_or(&a, &b)?;
        let xor = suite.logical_xor(&a, &b)?;
        let not = suite.logical_not(&a)?;
        Ok::<_, ProtocolError>((
            suite.reveal_bits(&and, None)?.unwrap(),
            suite.reveal_bits(&or, None)?.unwrap(),
            suite.reveal_bits(&xor, None)?.unwrap(),
            suite.reveal_bits(&not, None)?.unwrap(),
        ))
    });
    for (and, or, xor, not) in expect_all(results) {
        assert_eq!(and.as_bits().unwrap(), &[0, 0, 0, 1]);
        assert_eq!(or.as_bits().unwrap(), &[0, 1, 1, 1]);
        assert_eq!(xor.as_bits().unwrap(), &[0, 1, 1, 0]);
        assert_eq!(not.as_bits().unwrap(), &[1, 1, 0, 0]);
    }
}

#[test]
fn bit_decompose_then_compose_round_trips() {
    let results = run_local(3, |comm| {
        let mut suite = identity_suite(comm, 127)?;
        let share = suite.share(0, Some(&Scalars::integer(45u32)), &[])?;
        let bits = suite.bit_decompose(&share, None)?;
        let restored = suite.bit_compose(&bits)?;
        let bits = suite.reveal_bits(&bits, None)?.unwrap();
        let restored = suite.reveal_field(&restored, None)?.unwrap();
        Ok::<_, ProtocolError>((bits.as_bits().unwrap().to_vec(), restored.get(0).clone()))
    });
    for (bits, restored) in expect_all(results) {
        // 45 = 0101101 over the 7 bits of GF(127).
        assert_eq!(bits, vec![0, 1, 0, 1, 1, 0, 1]);
        assert_eq!(restored, BigUint::from(45u32));
    }
}

#[test]
fn multiplicative_inverse_in_the_field() {
    let results = run_local(3, |comm| {
        let mut suite = identity_suite(comm, 127)?;
        let share = suite.share(0, Some(&Scalars::integer(11u32)), &[])?;
        let inverse = suite.multiplicative_inverse(&share)?;
        let product = suite.untruncated_multiply(&share, &inverse)?;
        let product = suite.reveal_field(&product, None)?.unwrap();
        Ok::<_, ProtocolError>(product.get(0).clone())
    });
    for product in expect_all(results) {
        assert_eq!(product, BigUint::from(1u32));
    }
}

#[test]
fn min_max_absolute_and_relu() {
    let results = run_local(3, |comm| {
        let mut suite = fixed_suite(comm, SMALL_PRIME, 8)?;
        let a = suite.share(0, Some(&Scalars::real(-3.0)), &[])?;
        let b = suite.share(1, Some(&Scalars::real(2.0)), &[])?;
        let maximum = suite.max(&a, &b)?;
        let minimum = suite.min(&a, &b)?;
        let magnitude = suite.absolute(&a)?;
        let rectified = suite.relu(&a)?;
        Ok::<_, ProtocolError>((
            reals(suite.reveal(&maximum, None)),
            reals(suite.reveal(&minimum, None)),
            reals(suite.reveal(&magnitude, None)),
            reals(suite.reveal(&rectified, None)),
        ))
    });
    for (maximum, minimum, magnitude, rectified) in expect_all(results) {
        assert_eq!(maximum, vec![2.0]);
        assert_eq!(minimum, vec![-3.0]);
        assert_eq!(magnitude, vec![3.0]);
        assert_eq!(rectified, vec![0.0]);
    }
}

#[test]
fn zigmoid_is_piecewise() {
    let results = run_local(3, |comm| {
        let mut suite = fixed_suite(comm, SMALL_PRIME, 8)?;
        let share =
            suite.share(0, Some(&Scalars::Reals(vec![-2.0, 0.25, 2.0])), &[3])?;
        let squashed = suite.zigmoid(&share)?;
        Ok::<_, ProtocolError>(reals(suite.reveal(&squashed, None)))
    });
    for squashed in expect_all(results) {
        assert_eq!(squashed, vec![0.0, 0.75, 1.0]);
    }
}

#[test]
fn floor_rounds_toward_negative_infinity() {
    let results = run_local(3, |comm| {
        let mut suite = fixed_suite(comm, SMALL_PRIME, 8)?;
        let share = suite.share(0, Some(&Scalars::Reals(vec![2.5, -2.5, 3.0])), &[3])?;
        let floored = suite.floor(&share)?;
        Ok::<_, ProtocolError>(reals(suite.reveal(&floored, None)))
    });
    for floored in expect_all(results) {
        assert_eq!(floored, vec![2.0, -3.0, 3.0]);
    }
}

#[test]
fn dot_product_of_shared_vectors() {
    let results = run_local(3, |comm| {
        let mut suite = default_suite(comm)?;
        let a = suite.share(0, Some(&Scalars::Reals(vec![1.0, 2.0, 3.0])), &[3])?;
        let b = suite.share(1, Some(&Scalars::Reals(vec![4.0, 5.0, 6.0])), &[3])?;
        let dot = suite.dot(&a, &b)?;
        Ok::<_, ProtocolError>(reals(suite.reveal(&dot, None)))
    });
    for dot in expect_all(results) {
        assert_eq!(dot, vec![32.0]);
    }
}

#[test]
fn division_approximates_the_quotient() {
    let results = run_local(3, |comm| {
        let mut suite = default_suite(comm)?;
        let a = suite.share(0, Some(&Scalars::real(37.0)), &[])?;
        let b = suite.share(1, Some(&Scalars::real(8.0)), &[])?;
        let quotient = suite.divide(&a, &b)?;
        Ok::<_, ProtocolError>(reals(suite.reveal(&quotient, None)))
    });
    for quotient in expect_all(results) {
        assert!((quotient[0] - 4.625).abs() < 0.01, "quotient was {}", quotient[0]);
    }
}

#[test]
fn reveal_to_a_subset_of_players() {
    let results = run_local(3, |comm| {
        let mut suite = default_suite(comm)?;
        let share = suite.share(2, Some(&Scalars::real(9.0)), &[])?;
        suite.reveal(&share, Some(&[1]))
    });
    let revealed = expect_all(results);
    assert!(revealed[0].is_none());
    assert_eq!(revealed[1].as_ref().unwrap().as_reals().unwrap(), &[9.0]);
    assert!(revealed[2].is_none());
}

#[test]
fn uniform_shares_are_in_the_field() {
    let results = run_local(3, |comm| {
        let mut suite = default_suite(comm)?;
        let share = suite.uniform(&[4]);
        let value = suite.reveal_field(&share, None)?.unwrap();
        Ok::<_, ProtocolError>(value)
    });
    let field = Field::default();
    for value in expect_all(results) {
        assert!(value.iter().all(|element| element < field.order()));
    }
}

#[test]
fn power_in_the_field() {
    let results = run_local(3, |comm| {
        let mut suite = identity_suite(comm, 127)?;
        let share = suite.share(0, Some(&Scalars::integer(3u32)), &[])?;
        let cubed = suite.private_public_power_field(&share, &BigUint::from(5u32))?;
        let cubed = suite.reveal_field(&cubed, None)?.unwrap();
        Ok::<_, ProtocolError>(cubed.get(0).clone())
    });
    for value in expect_all(results) {
        // 3^5 = 243 = 116 mod 127.
        assert_eq!(value, BigUint::from(116u32));
    }
}
