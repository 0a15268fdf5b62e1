//! Actively-secure protocol suite with abort.
//!
//! Pairs an additive sharing and a Shamir sharing of every secret and
//! cross-checks them at reveal time, so any single deviation from the
//! protocol is caught with overwhelming probability. Security is
//! honest-majority with abort: the suite either produces correct output
//! or raises a consistency error.

use crate::{
    additive::{AdditiveArrayShare, AdditiveProtocolSuite},
    errors::ProtocolError,
    shamir::{ShamirArrayShare, ShamirProtocolSuite},
    transcript, SuiteOptions,
};
use cicada_communicator::SocketCommunicator;
use cicada_encoding::{Encoding, Scalars};
use cicada_math::{lagrange::Lagrange, BigUint, Field, FieldArray};
use num_traits::Zero;
use rand::seq::index::sample;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Paired additive and Shamir shares of the same secret.
///
/// The two halves are manipulated in lock-step by
/// [ActiveProtocolSuite]; letting them drift apart is exactly what
/// [ActiveProtocolSuite::verify] detects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveArrayShare {
    additive: AdditiveArrayShare,
    shamir: ShamirArrayShare,
}

impl ActiveArrayShare {
    /// Pairs two sub-shares of the same secret.
    pub fn new(additive: AdditiveArrayShare, shamir: ShamirArrayShare) -> Self {
        ActiveArrayShare { additive, shamir }
    }

    /// The additive half.
    pub fn additive(&self) -> &AdditiveArrayShare {
        &self.additive
    }

    /// The Shamir half.
    pub fn shamir(&self) -> &ShamirArrayShare {
        &self.shamir
    }

    /// The share shape.
    pub fn shape(&self) -> &[usize] {
        self.additive.storage().shape()
    }
}

/// Consistency-verifying suite over paired additive and Shamir shares.
pub struct ActiveProtocolSuite {
    communicator: Arc<SocketCommunicator>,
    field: Field,
    additive: AdditiveProtocolSuite,
    shamir: ShamirProtocolSuite,
    rng: ChaCha20Rng,
}

impl ActiveProtocolSuite {
    /// Builds paired sub-suites over one communicator.
    pub fn new(
        communicator: Arc<SocketCommunicator>,
        field: Field,
        threshold: usize,
        encoding: Encoding,
        options: SuiteOptions,
    ) -> Result<Self, ProtocolError> {
        let additive = AdditiveProtocolSuite::new(
            Arc::clone(&communicator),
            field.clone(),
            encoding.clone(),
            options.clone(),
        )?;
        let shamir = ShamirProtocolSuite::new(
            Arc::clone(&communicator),
            field.clone(),
            threshold,
            encoding,
            options.clone(),
        )?;
        let rng = match options.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed.rotate_left(29)),
            None => ChaCha20Rng::from_entropy(),
        };
        Ok(ActiveProtocolSuite { communicator, field, additive, shamir, rng })
    }

    /// The communicator this suite operates over.
    pub fn communicator(&self) -> &SocketCommunicator {
        &self.communicator
    }

    /// The field shares are defined over.
    pub fn field(&self) -> &Field {
        &self.field
    }

    /// The default encoding for secrets and revealed values.
    pub fn encoding(&self) -> &Encoding {
        self.additive.encoding()
    }

    /// The Shamir reconstruction threshold.
    pub fn threshold(&self) -> usize {
        self.shamir.threshold()
    }

    fn rank(&self) -> usize {
        self.communicator.rank()
    }

    fn world_size(&self) -> usize {
        self.communicator.world_size()
    }

    fn precision(&self) -> Option<u64> {
        match self.encoding() {
            Encoding::FixedPoint(fixed) => Some(fixed.precision() as u64),
            _ => None,
        }
    }

    /// The Shamir sharing of zero induced by a consistent pair.
    ///
    /// `z = shamir - lambda_r^{-1} * additive` interpolates to zero over
    /// the full player set exactly when the two halves carry the same
    /// secret.
    fn zero_witness(&self, share: &ActiveArrayShare) -> Result<ShamirArrayShare, ProtocolError> {
        let coefficient = self.shamir.revealing_coefficient(self.rank());
        let inverse = self
            .field
            .inv_scalar(coefficient)
            .expect("revealing coefficients are nonzero");
        let weighted = self.field.mul_scalar(share.additive.storage(), &inverse)?;
        Ok(ShamirArrayShare::new(self.field.sub(share.shamir.storage(), &weighted)?))
    }

    /// Checks that every player's paired shares are consistent.
    ///
    /// Each player reveals its zero witness through the Shamir suite; any
    /// nonzero reconstruction raises [ProtocolError::Consistency].
    pub fn verify(&mut self, share: &ActiveArrayShare) -> Result<(), ProtocolError> {
        transcript::protocol("active", "verify", "enter");
        let witness = self.zero_witness(share)?;
        let revealed = self
            .shamir
            .reveal_field(&witness, None)?
            .expect("full reveal returns a value to every player");
        if revealed.iter().any(|value| !value.is_zero()) {
            return Err(ProtocolError::Consistency(
                "zero witness reconstructed to a nonzero value".into(),
            ));
        }
        transcript::protocol("active", "verify", "exit");
        Ok(())
    }

    /// Reveals a secret after three independent reconstructions agree.
    ///
    /// All-gathers the additive shares and zero witnesses, checks that the
    /// witnesses interpolate to zero, then reconstructs the secret from
    /// the additive sum and from two distinct random Shamir subsets of
    /// size `threshold`. Any disagreement raises
    /// [ProtocolError::Consistency].
    pub fn reveal(&mut self, share: &ActiveArrayShare) -> Result<Scalars, ProtocolError> {
        let encoding = self.encoding().clone();
        self.reveal_with_encoding(share, &encoding)
    }

    /// As [ActiveProtocolSuite::reveal] with an explicit encoding.
    pub fn reveal_with_encoding(
        &mut self,
        share: &ActiveArrayShare,
        encoding: &Encoding,
    ) -> Result<Scalars, ProtocolError> {
        transcript::protocol("active", "reveal", "enter");
        let count = share.additive.storage().len();
        let shape = share.shape().to_vec();
        let threshold = self.shamir.threshold();
        let world_size = self.world_size();

        let witness = self.zero_witness(share)?;
        let additive_shares: Vec<FieldArray> =
            self.communicator.all_gather(share.additive.storage())?;
        let witnesses: Vec<FieldArray> = self.communicator.all_gather(witness.storage())?;

        // First stage: the zero witnesses must interpolate to zero.
        for element in 0..count {
            let ordinates: Vec<BigUint> =
                witnesses.iter().map(|array| array.get(element).clone()).collect();
            let mut total = BigUint::zero();
            for (player, ordinate) in ordinates.iter().enumerate() {
                let coefficient = self.shamir.revealing_coefficient(player);
                total = (total + coefficient * ordinate) % self.field.order();
            }
            if !total.is_zero() {
                return Err(ProtocolError::Consistency(
                    "shares are inconsistent in the first stage".into(),
                ));
            }
        }

        // Additive reconstruction.
        let mut additive_secret = self.field.zeros(&shape);
        for gathered in &additive_shares {
            self.field.add_assign(&mut additive_secret, gathered)?;
        }

        // Rebuild every player's full Shamir share from its witness.
        let mut shamir_shares = Vec::with_capacity(world_size);
        for (player, gathered) in witnesses.iter().enumerate() {
            let coefficient = self.shamir.revealing_coefficient(player);
            let inverse = self
                .field
                .inv_scalar(coefficient)
                .expect("revealing coefficients are nonzero");
            let weighted = self.field.mul_scalar(&additive_shares[player], &inverse)?;
            shamir_shares.push(self.field.add(gathered, &weighted)?);
        }

        // Second stage: two distinct random subsets must agree with the
        // additive reconstruction.
        let first_subset = self.random_subset(world_size, threshold);
        let second_subset = loop {
            let candidate = self.random_subset(world_size, threshold);
            if candidate != first_subset {
                break candidate;
            }
            if world_size == threshold {
                break candidate;
            }
        };

        for subset in [&first_subset, &second_subset] {
            let reconstruction = self.interpolate_subset(subset, &shamir_shares, &shape)?;
            if reconstruction != additive_secret {
                return Err(ProtocolError::Consistency(
                    "shares are inconsistent in the second stage".into(),
                ));
            }
        }

        transcript::protocol("active", "reveal", "exit");
        Ok(encoding.decode(&additive_secret, &self.field)?)
    }

    fn random_subset(&mut self, world_size: usize, threshold: usize) -> Vec<usize> {
        let mut chosen = sample(&mut self.rng, world_size, threshold).into_vec();
        chosen.sort_unstable();
        chosen
    }

    fn interpolate_subset(
        &self,
        subset: &[usize],
        shamir_shares: &[FieldArray],
        shape: &[usize],
    ) -> Result<FieldArray, ProtocolError> {
        let abscissas: Vec<BigUint> =
            subset.iter().map(|player| self.shamir.indices()[*player].clone()).collect();
        let lagrange = Lagrange::new(abscissas, &self.field)?;
        let count: usize = shape.iter().product();
        let mut values = Vec::with_capacity(count);
        for element in 0..count {
            let ordinates: Vec<BigUint> = subset
                .iter()
                .map(|player| shamir_shares[*player].get(element).clone())
                .collect();
            values.push(lagrange.interpolate(&ordinates, &self.field)?);
        }
        Ok(self.field.array(values, shape)?)
    }

    /// Secret-shares application values held by `src` into a paired share.
    pub fn share(
        &mut self,
        src: usize,
        secret: Option<&Scalars>,
        shape: &[usize],
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.share(src, secret, shape)?,
            self.shamir.share(src, secret, shape)?,
        ))
    }

    /// Secret-shares an already-encoded field array held by `src`.
    pub fn share_field(
        &mut self,
        src: usize,
        secret: Option<&FieldArray>,
        shape: &[usize],
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.share_field(src, secret, shape)?,
            self.shamir.share_field(src, secret, shape)?,
        ))
    }

    /// Rerandomizes both halves and verifies they remain consistent.
    pub fn reshare(&mut self, operand: &ActiveArrayShare) -> Result<ActiveArrayShare, ProtocolError> {
        let fresh = ActiveArrayShare::new(
            self.additive.reshare(&operand.additive)?,
            self.shamir.reshare(&operand.shamir)?,
        );
        self.verify(&fresh)?;
        Ok(fresh)
    }

    /// Elementwise sum of two paired shares. Local.
    pub fn field_add(
        &self,
        lhs: &ActiveArrayShare,
        rhs: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.field_add(&lhs.additive, &rhs.additive)?,
            self.shamir.field_add(&lhs.shamir, &rhs.shamir)?,
        ))
    }

    /// Elementwise difference of two paired shares. Local.
    pub fn field_subtract(
        &self,
        lhs: &ActiveArrayShare,
        rhs: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.field_subtract(&lhs.additive, &rhs.additive)?,
            self.shamir.field_subtract(&lhs.shamir, &rhs.shamir)?,
        ))
    }

    /// Elementwise additive inverse. Local.
    pub fn negative(&self, operand: &ActiveArrayShare) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.negative(&operand.additive)?,
            self.shamir.negative(&operand.shamir)?,
        ))
    }

    /// Sum of a public and a paired shared array.
    pub fn public_private_add(
        &self,
        lhs: &FieldArray,
        rhs: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.public_private_add(lhs, &rhs.additive)?,
            self.shamir.public_private_add(lhs, &rhs.shamir)?,
        ))
    }

    /// Difference of a public and a paired shared array.
    pub fn public_private_subtract(
        &self,
        lhs: &FieldArray,
        rhs: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.public_private_subtract(lhs, &rhs.additive)?,
            self.shamir.public_private_subtract(lhs, &rhs.shamir)?,
        ))
    }

    /// Elementwise product without truncation.
    pub fn untruncated_multiply(
        &mut self,
        lhs: &ActiveArrayShare,
        rhs: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.untruncated_multiply(&lhs.additive, &rhs.additive)?,
            self.shamir.untruncated_multiply(&lhs.shamir, &rhs.shamir)?,
        ))
    }

    /// Elementwise fixed-point product: multiply, then truncate.
    pub fn multiply(
        &mut self,
        lhs: &ActiveArrayShare,
        rhs: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        let product = self.untruncated_multiply(lhs, rhs)?;
        self.truncate(&product, None)
    }

    /// Removes the low `bits` bits from each element.
    ///
    /// Both halves must strip exactly the same bits, so the masks are
    /// generated once as paired shares and injected into both
    /// sub-protocols.
    pub fn truncate(
        &mut self,
        operand: &ActiveArrayShare,
        bits: Option<u64>,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        let bits = bits.or_else(|| self.precision()).ok_or(ProtocolError::MissingPrecision)?;
        let field_bits = self.field.bits();
        let shape = operand.shape().to_vec();

        let (_, trunc_mask) = self.random_bitwise_secret(bits, None, Some(&shape))?;
        let (_, rem_mask) = self.random_bitwise_secret(field_bits - bits, None, Some(&shape))?;

        Ok(ActiveArrayShare::new(
            self.additive.truncate_masked(
                &operand.additive,
                Some(bits),
                Some(&trunc_mask.additive),
                Some(&rem_mask.additive),
            )?,
            self.shamir.truncate_masked(
                &operand.shamir,
                Some(bits),
                Some(&trunc_mask.shamir),
                Some(&rem_mask.shamir),
            )?,
        ))
    }

    /// Generates paired sharings of the same unbiased random bits.
    ///
    /// Contributors sample one local bit vector and share it through both
    /// sub-suites so the halves stay in lock-step.
    pub fn random_bitwise_secret(
        &mut self,
        bits: u64,
        src: Option<&[usize]>,
        shape: Option<&[usize]>,
    ) -> Result<(ActiveArrayShare, ActiveArrayShare), ProtocolError> {
        let all: Vec<usize> = self.communicator.ranks().collect();
        let contributors = src.unwrap_or(&all).to_vec();
        if contributors.is_empty() {
            return Err(ProtocolError::InvalidSources);
        }

        let shape = shape.unwrap_or(&[]).to_vec();
        let count: usize = shape.iter().product();
        let mut bit_shape = shape.clone();
        bit_shape.push(bits as usize);

        let mut combined: Option<ActiveArrayShare> = None;
        for contributor in contributors {
            let local = if self.rank() == contributor {
                use rand::Rng;
                let raw: Vec<BigUint> = (0..count * bits as usize)
                    .map(|_| BigUint::from(self.rng.gen_range(0..2u8)))
                    .collect();
                Some(self.field.array(raw, &bit_shape)?)
            } else {
                None
            };
            let share = self.share_field(contributor, local.as_ref(), &bit_shape)?;
            combined = Some(match combined {
                Some(previous) => self.logical_xor(&previous, &share)?,
                None => share,
            });
        }
        let bit_share = combined.expect("at least one contributor");

        let secret_share = self.bit_compose(&bit_share)?;
        Ok((bit_share, secret_share))
    }

    /// Elementwise logical AND of paired 0/1 shares.
    pub fn logical_and(
        &mut self,
        lhs: &ActiveArrayShare,
        rhs: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        self.untruncated_multiply(lhs, rhs)
    }

    /// Elementwise logical OR of paired 0/1 shares.
    pub fn logical_or(
        &mut self,
        lhs: &ActiveArrayShare,
        rhs: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.logical_or(&lhs.additive, &rhs.additive)?,
            self.shamir.logical_or(&lhs.shamir, &rhs.shamir)?,
        ))
    }

    /// Elementwise logical XOR of paired 0/1 shares.
    pub fn logical_xor(
        &mut self,
        lhs: &ActiveArrayShare,
        rhs: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.logical_xor(&lhs.additive, &rhs.additive)?,
            self.shamir.logical_xor(&lhs.shamir, &rhs.shamir)?,
        ))
    }

    /// Elementwise logical NOT of a paired 0/1 share.
    pub fn logical_not(
        &mut self,
        operand: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.logical_not(&operand.additive)?,
            self.shamir.logical_not(&operand.shamir)?,
        ))
    }

    /// Elementwise `operand < 0` in the signed interpretation.
    pub fn less_than_zero(
        &mut self,
        operand: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.less_than_zero(&operand.additive)?,
            self.shamir.less_than_zero(&operand.shamir)?,
        ))
    }

    /// Elementwise `lhs < rhs` in the signed interpretation.
    pub fn less(
        &mut self,
        lhs: &ActiveArrayShare,
        rhs: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.less(&lhs.additive, &rhs.additive)?,
            self.shamir.less(&lhs.shamir, &rhs.shamir)?,
        ))
    }

    /// Elementwise probabilistic equality.
    pub fn equal(
        &mut self,
        lhs: &ActiveArrayShare,
        rhs: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.equal(&lhs.additive, &rhs.additive)?,
            self.shamir.equal(&lhs.shamir, &rhs.shamir)?,
        ))
    }

    /// Elementwise absolute value.
    pub fn absolute(
        &mut self,
        operand: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.absolute(&operand.additive)?,
            self.shamir.absolute(&operand.shamir)?,
        ))
    }

    /// Elementwise maximum.
    pub fn max(
        &mut self,
        lhs: &ActiveArrayShare,
        rhs: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.max(&lhs.additive, &rhs.additive)?,
            self.shamir.max(&lhs.shamir, &rhs.shamir)?,
        ))
    }

    /// Elementwise minimum.
    pub fn min(
        &mut self,
        lhs: &ActiveArrayShare,
        rhs: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.min(&lhs.additive, &rhs.additive)?,
            self.shamir.min(&lhs.shamir, &rhs.shamir)?,
        ))
    }

    /// Elementwise rectified linear unit.
    pub fn relu(&mut self, operand: &ActiveArrayShare) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.relu(&operand.additive)?,
            self.shamir.relu(&operand.shamir)?,
        ))
    }

    /// Elementwise zigmoid.
    pub fn zigmoid(
        &mut self,
        operand: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.zigmoid(&operand.additive)?,
            self.shamir.zigmoid(&operand.shamir)?,
        ))
    }

    /// Decomposes each element into a big-endian sharing of its bits.
    pub fn bit_decompose(
        &mut self,
        operand: &ActiveArrayShare,
        bits: Option<u64>,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.bit_decompose(&operand.additive, bits)?,
            self.shamir.bit_decompose(&operand.shamir, bits)?,
        ))
    }

    /// Composes big-endian bit sharings back into element sharings.
    pub fn bit_compose(
        &mut self,
        operand: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.bit_compose(&operand.additive)?,
            self.shamir.bit_compose(&operand.shamir)?,
        ))
    }

    /// Elementwise multiplicative inverse in the field.
    pub fn multiplicative_inverse(
        &mut self,
        operand: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.multiplicative_inverse(&operand.additive)?,
            self.shamir.multiplicative_inverse(&operand.shamir)?,
        ))
    }

    /// Raises each shared element to a public exponent in the field.
    pub fn private_public_power_field(
        &mut self,
        lhs: &ActiveArrayShare,
        exponent: &BigUint,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.private_public_power_field(&lhs.additive, exponent)?,
            self.shamir.private_public_power_field(&lhs.shamir, exponent)?,
        ))
    }

    /// Sum of all elements, as a scalar-shaped paired share. Local.
    pub fn sum(&self, operand: &ActiveArrayShare) -> Result<ActiveArrayShare, ProtocolError> {
        Ok(ActiveArrayShare::new(
            self.additive.sum(&operand.additive)?,
            self.shamir.sum(&operand.shamir)?,
        ))
    }

    /// Fixed-point dot product of two paired shared vectors.
    pub fn dot(
        &mut self,
        lhs: &ActiveArrayShare,
        rhs: &ActiveArrayShare,
    ) -> Result<ActiveArrayShare, ProtocolError> {
        let products = self.untruncated_multiply(lhs, rhs)?;
        let total = self.sum(&products)?;
        self.truncate(&total, None)
    }

    /// A paired sharing of uniformly random field elements.
    ///
    /// Samples through the additive suite, then lifts each player's
    /// additive share into the Shamir domain so both halves carry the
    /// same value.
    pub fn uniform(&mut self, shape: &[usize]) -> Result<ActiveArrayShare, ProtocolError> {
        let additive = self.additive.uniform(shape);
        let mut shamir_total: Option<ShamirArrayShare> = None;
        for contributor in 0..self.world_size() {
            let contribution =
                (self.rank() == contributor).then(|| additive.storage().clone());
            let share = self.shamir.share_field(contributor, contribution.as_ref(), shape)?;
            shamir_total = Some(match shamir_total {
                Some(previous) => self.shamir.field_add(&previous, &share)?,
                None => share,
            });
        }
        Ok(ActiveArrayShare::new(
            additive,
            shamir_total.expect("communicators have at least one player"),
        ))
    }
}
