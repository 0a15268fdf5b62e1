//! End-to-end Shamir suite exercises over loopback TCP.

use cicada_communicator::{run_local, SocketCommunicator};
use cicada_encoding::{Encoding, FixedPoint, Scalars};
use cicada_math::{BigUint, Field};
use cicada_protocols::{ProtocolError, ShamirProtocolSuite, SuiteOptions};
use std::sync::Arc;

const SMALL_PRIME: u64 = 2147483647;

fn suite(
    comm: SocketCommunicator,
    threshold: usize,
    encoding: Encoding,
    order: u64,
) -> Result<ShamirProtocolSuite, ProtocolError> {
    ShamirProtocolSuite::new(
        Arc::new(comm),
        Field::new(BigUint::from(order))?,
        threshold,
        encoding,
        SuiteOptions::default(),
    )
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
fn share_and_reveal_round_trip() {
    let results = run_local(5, |comm| {
        let mut suite = suite(comm, 3, Encoding::default_fixed_point(), SMALL_PRIME)?;
        let share = suite.share(0, Some(&Scalars::real(13.25)), &[])?;
        suite.reveal(&share, None)
    });
    for revealed in expect_all(results) {
        assert_eq!(revealed.unwrap().as_reals().unwrap(), &[13.25]);
    }
}

#[test]
fn any_threshold_subset_reconstructs() {
    let results = run_local(5, |comm| {
        let mut suite = suite(comm, 3, Encoding::Identity, SMALL_PRIME)?;
        let share = suite.share(1, Some(&Scalars::integer(777u32)), &[])?;
        // Gather from three arbitrary players only.
        let value = suite.reveal_field_from(&share, Some(&[0, 2, 4]), None)?;
        Ok::<_, ProtocolError>(value.unwrap().get(0).clone())
    });
    for value in expect_all(results) {
        assert_eq!(value, BigUint::from(777u32));
    }
}

#[test]
fn too_few_sources_are_rejected() {
    let results = run_local(5, |comm| {
        let mut suite = suite(comm, 3, Encoding::Identity, SMALL_PRIME)?;
        let share = suite.share(0, Some(&Scalars::integer(5u32)), &[])?;
        let result = suite.reveal_field_from(&share, Some(&[0, 1]), None);
        Ok::<_, ProtocolError>(matches!(result, Err(ProtocolError::InvalidSources)))
    });
    assert!(expect_all(results).into_iter().all(|rejected| rejected));
}

#[test]
fn linear_operations_stay_local() {
    let results = run_local(4, |comm| {
        let mut suite = suite(comm, 2, Encoding::default_fixed_point(), SMALL_PRIME)?;
        let a = suite.share(0, Some(&Scalars::real(4.5)), &[])?;
        let b = suite.share(1, Some(&Scalars::real(1.25)), &[])?;
        let total = suite.field_add(&a, &b)?;
        let difference = suite.field_subtract(&a, &b)?;
        Ok::<_, ProtocolError>((
            suite.reveal(&total, None)?.unwrap(),
            suite.reveal(&difference, None)?.unwrap(),
        ))
    });
    for (total, difference) in expect_all(results) {
        assert_eq!(total.as_reals().unwrap(), &[5.75]);
        assert_eq!(difference.as_reals().unwrap(), &[3.25]);
    }
}

#[test]
fn public_operands_apply_at_every_point() {
    let results = run_local(4, |comm| {
        let mut suite = suite(comm, 2, Encoding::default_fixed_point(), SMALL_PRIME)?;
        let field = suite.field().clone();
        let encoding = suite.encoding().clone();
        let share = suite.share(0, Some(&Scalars::real(10.0)), &[])?;
        let public = encoding.encode(&Scalars::real(4.0), &[], &field)?;
        let shifted = suite.public_private_add(&public, &share)?;
        let flipped = suite.public_private_subtract(&public, &share)?;
        Ok::<_, ProtocolError>((
            suite.reveal(&shifted, None)?.unwrap(),
            suite.reveal(&flipped, None)?.unwrap(),
        ))
    });
    for (shifted, flipped) in expect_all(results) {
        assert_eq!(shifted.as_reals().unwrap(), &[14.0]);
        assert_eq!(flipped.as_reals().unwrap(), &[-6.0]);
    }
}

#[test]
fn multiplication_with_degree_reduction() {
    // Eight fractional bits keep the doubled scale inside the 31-bit
    // field before truncation.
    let results = run_local(5, |comm| {
        let mut suite =
            suite(comm, 3, Encoding::FixedPoint(FixedPoint::new(8)), SMALL_PRIME)?;
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
fn reshare_preserves_the_secret() {
    let results = run_local(4, |comm| {
        let mut suite = suite(comm, 2, Encoding::Identity, SMALL_PRIME)?;
        let share = suite.share(0, Some(&Scalars::integer(321u32)), &[])?;
        let fresh = suite.reshare(&share)?;
        let value = suite.reveal_field(&fresh, None)?.unwrap();
        Ok::<_, ProtocolError>(value.get(0).clone())
    });
    for value in expect_all(results) {
        assert_eq!(value, BigUint::from(321u32));
    }
}

#[test]
fn comparisons_match_the_additive_suite() {
    let results = run_local(4, |comm| {
        let mut suite =
            suite(comm, 2, Encoding::FixedPoint(FixedPoint::new(8)), SMALL_PRIME)?;
        let a = suite.share(0, Some(&Scalars::real(-2.0)), &[])?;
        let b = suite.share(1, Some(&Scalars::real(1.5)), &[])?;
        let a_lt_b = suite.less(&a, &b)?;
        let b_lt_a = suite.less(&b, &a)?;
        Ok::<_, ProtocolError>((
            suite.reveal_bits(&a_lt_b, None)?.unwrap(),
            suite.reveal_bits(&b_lt_a, None)?.unwrap(),
        ))
    });
    for (a_lt_b, b_lt_a) in expect_all(results) {
        assert_eq!(a_lt_b.as_bits().unwrap(), &[1]);
        assert_eq!(b_lt_a.as_bits().unwrap(), &[0]);
    }
}

#[test]
fn random_bits_compose() {
    let results = run_local(4, |comm| {
        let mut suite = suite(comm, 2, Encoding::Identity, SMALL_PRIME)?;
        let (bit_share, secret_share) = suite.random_bitwise_secret(6, None, None)?;
        let bits = suite.reveal_bits(&bit_share, None)?.unwrap();
        let secret = suite.reveal_field(&secret_share, None)?.unwrap();
        Ok::<_, ProtocolError>((bits.as_bits().unwrap().to_vec(), secret.get(0).clone()))
    });
    for (bits, secret) in expect_all(results) {
        let composed = bits.iter().fold(BigUint::from(0u32), |total, bit| {
            (total << 1) + BigUint::from(*bit)
        });
        assert_eq!(secret, composed);
    }
}

#[test]
fn custom_indices_reconstruct() {
    let results = run_local(4, |comm| {
        let field = Field::new(BigUint::from(SMALL_PRIME))?;
        let indices = vec![
            BigUint::from(2u32),
            BigUint::from(4u32),
            BigUint::from(6u32),
            BigUint::from(8u32),
        ];
        let mut suite = ShamirProtocolSuite::with_indices(
            Arc::new(comm),
            field,
            2,
            Encoding::Identity,
            indices,
            SuiteOptions::default(),
        )?;
        let share = suite.share(3, Some(&Scalars::integer(90210u32)), &[])?;
        let value = suite.reveal_field(&share, None)?.unwrap();
        Ok::<_, ProtocolError>(value.get(0).clone())
    });
    for value in expect_all(results) {
        assert_eq!(value, BigUint::from(90210u32));
    }
}

#[test]
fn invalid_threshold_is_rejected() {
    let results = run_local(4, |comm| {
        let field = Field::new(BigUint::from(SMALL_PRIME))?;
        let result = ShamirProtocolSuite::new(
            Arc::new(comm),
            field,
            3, // ceil(4 / 2) = 2 is the maximum.
            Encoding::Identity,
            SuiteOptions::default(),
        );
        Ok::<_, ProtocolError>(matches!(result, Err(ProtocolError::InvalidThreshold { .. })))
    });
    assert!(expect_all(results).into_iter().all(|rejected| rejected));
}

#[test]
fn uniform_is_shared_consistently() {
    let results = run_local(4, |comm| {
        let mut suite = suite(comm, 2, Encoding::Identity, SMALL_PRIME)?;
        let share = suite.uniform(&[2])?;
        let value = suite.reveal_field(&share, None)?.unwrap();
        Ok::<_, ProtocolError>(value)
    });
    let values = expect_all(results);
    // Every player reconstructs the same random array.
    for value in &values[1..] {
        assert_eq!(value, &values[0]);
    }
}
