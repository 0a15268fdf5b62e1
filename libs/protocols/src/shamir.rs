//! Shamir threshold sharing and its protocol suite.

use crate::{errors::ProtocolError, suite_seed, transcript, SuiteOptions};
use cicada_communicator::SocketCommunicator;
use cicada_encoding::{Encoding, Scalars};
use cicada_math::{lagrange::Lagrange, polynomial::Polynomial, BigUint, Field, FieldArray};
use num_traits::{One, Zero};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One player's share of a Shamir-secret-shared array.
///
/// Each element is the evaluation `f(alpha_r)` of a random polynomial
/// whose constant term is the secret; any `threshold` evaluations
/// reconstruct, any fewer reveal nothing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShamirArrayShare {
    storage: FieldArray,
}

impl ShamirArrayShare {
    /// Wraps raw storage as a share.
    pub fn new(storage: FieldArray) -> Self {
        ShamirArrayShare { storage }
    }

    /// The underlying field array of polynomial evaluations.
    pub fn storage(&self) -> &FieldArray {
        &self.storage
    }

    /// Consumes the share, returning its storage.
    pub fn into_storage(self) -> FieldArray {
        self.storage
    }
}

/// Shamir-threshold-sharing suite.
///
/// Mirrors the additive suite's contract so the active suite can drive
/// both in lock-step. The reconstruction threshold is fixed at
/// construction and must not exceed `ceil(world_size / 2)` so that the
/// degree-doubling multiplication still leaves enough honest evaluations
/// to re-interpolate.
pub struct ShamirProtocolSuite {
    communicator: Arc<SocketCommunicator>,
    field: Field,
    encoding: Encoding,
    threshold: usize,
    indices: Vec<BigUint>,
    lagrange: Lagrange,
    rng: ChaCha20Rng,
}

impl ShamirProtocolSuite {
    /// Builds the suite with the conventional player indices `rank + 1`.
    pub fn new(
        communicator: Arc<SocketCommunicator>,
        field: Field,
        threshold: usize,
        encoding: Encoding,
        options: SuiteOptions,
    ) -> Result<Self, ProtocolError> {
        let indices =
            (1..=communicator.world_size() as u64).map(BigUint::from).collect();
        Self::with_indices(communicator, field, threshold, encoding, indices, options)
    }

    /// Builds the suite with custom distinct nonzero player indices.
    pub fn with_indices(
        communicator: Arc<SocketCommunicator>,
        field: Field,
        threshold: usize,
        encoding: Encoding,
        indices: Vec<BigUint>,
        options: SuiteOptions,
    ) -> Result<Self, ProtocolError> {
        let world_size = communicator.world_size();
        if threshold < 1 || threshold > world_size.div_ceil(2) {
            return Err(ProtocolError::InvalidThreshold { threshold, world_size });
        }
        if indices.len() != world_size {
            return Err(ProtocolError::InvalidThreshold { threshold, world_size });
        }
        let lagrange = Lagrange::new(indices.clone(), &field)?;
        let (_, local_seed) = suite_seed(&options, communicator.rank());
        let rng = match local_seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed.rotate_left(17)),
            None => ChaCha20Rng::from_entropy(),
        };
        Ok(ShamirProtocolSuite { communicator, field, encoding, threshold, indices, lagrange, rng })
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
        &self.encoding
    }

    /// The reconstruction threshold.
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// The evaluation points assigned to the players, in rank order.
    pub fn indices(&self) -> &[BigUint] {
        &self.indices
    }

    /// The full-set Lagrange coefficient applied to `rank`'s evaluations.
    pub fn revealing_coefficient(&self, rank: usize) -> &BigUint {
        self.lagrange.coefficient(rank)
    }

    fn rank(&self) -> usize {
        self.communicator.rank()
    }

    fn world_size(&self) -> usize {
        self.communicator.world_size()
    }

    fn all_ranks(&self) -> Vec<usize> {
        self.communicator.ranks().collect()
    }

    fn require_compatible(
        &self,
        lhs: &ShamirArrayShare,
        rhs: &ShamirArrayShare,
    ) -> Result<(), ProtocolError> {
        if lhs.storage.shape() != rhs.storage.shape() {
            return Err(ProtocolError::ShapeMismatch(
                lhs.storage.shape().to_vec(),
                rhs.storage.shape().to_vec(),
            ));
        }
        Ok(())
    }

    fn require_rank(&self, rank: usize) -> Result<(), ProtocolError> {
        if rank >= self.world_size() {
            return Err(ProtocolError::InvalidRank { rank, world_size: self.world_size() });
        }
        Ok(())
    }

    fn precision(&self) -> Option<u64> {
        match &self.encoding {
            Encoding::FixedPoint(fixed) => Some(fixed.precision() as u64),
            _ => None,
        }
    }

    /// A Shamir sharing of a public array: the constant polynomial, so
    /// every player's evaluation is the value itself.
    fn share_of_public(&self, value: &FieldArray) -> ShamirArrayShare {
        ShamirArrayShare::new(value.clone())
    }

    /// Secret-shares an already-encoded field array held by `src`.
    ///
    /// The source samples one random polynomial of degree `threshold - 1`
    /// per element and scatters the evaluations.
    pub fn share_field(
        &mut self,
        src: usize,
        secret: Option<&FieldArray>,
        shape: &[usize],
    ) -> Result<ShamirArrayShare, ProtocolError> {
        self.require_rank(src)?;
        transcript::protocol("shamir", "share", "enter");

        let values = if self.rank() == src {
            let secret = secret.ok_or(ProtocolError::MissingSecret { rank: src })?;
            if secret.shape() != shape {
                return Err(ProtocolError::ShapeMismatch(
                    secret.shape().to_vec(),
                    shape.to_vec(),
                ));
            }
            let mut evaluations: Vec<Vec<BigUint>> =
                vec![Vec::with_capacity(secret.len()); self.world_size()];
            for element in secret.iter() {
                let polynomial = Polynomial::random_with_constant(
                    element.clone(),
                    self.threshold - 1,
                    &self.field,
                    &mut self.rng,
                );
                for (player, index) in self.indices.iter().enumerate() {
                    evaluations[player].push(polynomial.eval(index, &self.field));
                }
            }
            let mut values = Vec::with_capacity(self.world_size());
            for evaluation in evaluations {
                values.push(self.field.array(evaluation, shape)?);
            }
            Some(values)
        } else {
            None
        };

        let storage = self.communicator.scatter(src, values)?;
        transcript::protocol("shamir", "share", "exit");
        Ok(ShamirArrayShare::new(storage))
    }

    /// Secret-shares application values held by `src`.
    pub fn share(
        &mut self,
        src: usize,
        secret: Option<&Scalars>,
        shape: &[usize],
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let encoded = match secret {
            Some(secret) if self.rank() == src => {
                Some(self.encoding.encode(secret, shape, &self.field)?)
            }
            _ => None,
        };
        self.share_field(src, encoded.as_ref(), shape)
    }

    /// Reveals the raw field representation of a secret to `dst` players.
    ///
    /// Evaluations are gathered from `src` (default: everyone, using the
    /// precomputed full-set coefficients; any subset of at least
    /// `threshold` players also works).
    pub fn reveal_field_from(
        &mut self,
        share: &ShamirArrayShare,
        src: Option<&[usize]>,
        dst: Option<&[usize]>,
    ) -> Result<Option<FieldArray>, ProtocolError> {
        transcript::protocol("shamir", "reveal", "enter");
        let all = self.all_ranks();
        let sources = src.unwrap_or(&all);
        let destinations = dst.unwrap_or(&all);
        if sources.is_empty() || sources.len() < self.threshold {
            return Err(ProtocolError::InvalidSources);
        }
        for rank in sources.iter().chain(destinations.iter()) {
            self.require_rank(*rank)?;
        }

        let lagrange = if sources == all.as_slice() {
            self.lagrange.clone()
        } else {
            let abscissas = sources.iter().map(|rank| self.indices[*rank].clone()).collect();
            Lagrange::new(abscissas, &self.field)?
        };

        let contribution = sources.contains(&self.rank()).then(|| share.storage.clone());
        let mut secret = None;
        for recipient in destinations {
            let gathered =
                self.communicator.gatherv(sources, contribution.as_ref(), *recipient)?;
            if let Some(shares) = gathered {
                let mut values = Vec::with_capacity(share.storage.len());
                for element in 0..share.storage.len() {
                    let ordinates: Vec<BigUint> =
                        shares.iter().map(|array: &FieldArray| array.get(element).clone()).collect();
                    values.push(lagrange.interpolate(&ordinates, &self.field)?);
                }
                secret = Some(self.field.array(values, share.storage.shape())?);
            }
        }
        transcript::protocol("shamir", "reveal", "exit");
        Ok(secret)
    }

    /// Reveals the raw field representation to `dst`, gathering from all.
    pub fn reveal_field(
        &mut self,
        share: &ShamirArrayShare,
        dst: Option<&[usize]>,
    ) -> Result<Option<FieldArray>, ProtocolError> {
        self.reveal_field_from(share, None, dst)
    }

    /// Reveals and decodes a secret with the suite encoding.
    pub fn reveal(
        &mut self,
        share: &ShamirArrayShare,
        dst: Option<&[usize]>,
    ) -> Result<Option<Scalars>, ProtocolError> {
        let encoding = self.encoding.clone();
        self.reveal_with_encoding(share, dst, &encoding)
    }

    /// Reveals and decodes a secret with an explicit encoding.
    pub fn reveal_with_encoding(
        &mut self,
        share: &ShamirArrayShare,
        dst: Option<&[usize]>,
        encoding: &Encoding,
    ) -> Result<Option<Scalars>, ProtocolError> {
        match self.reveal_field(share, dst)? {
            Some(array) => Ok(Some(encoding.decode(&array, &self.field)?)),
            None => Ok(None),
        }
    }

    /// Reveals a bit-valued secret.
    pub fn reveal_bits(
        &mut self,
        share: &ShamirArrayShare,
        dst: Option<&[usize]>,
    ) -> Result<Option<Scalars>, ProtocolError> {
        self.reveal_with_encoding(share, dst, &Encoding::Bits)
    }

    /// Rerandomizes a share without changing the secret.
    ///
    /// Every player contributes a fresh sharing of zero; their sum
    /// rerandomizes all non-constant coefficients.
    pub fn reshare(&mut self, operand: &ShamirArrayShare) -> Result<ShamirArrayShare, ProtocolError> {
        let shape = operand.storage.shape().to_vec();
        let zeros = self.field.zeros(&shape);
        let mut fresh = operand.clone();
        for contributor in 0..self.world_size() {
            let contribution = (self.rank() == contributor).then_some(&zeros);
            let zero_share = self.share_field(contributor, contribution, &shape)?;
            fresh = self.field_add(&fresh, &zero_share)?;
        }
        Ok(fresh)
    }

    /// Elementwise sum of two shared arrays. Local.
    pub fn field_add(
        &self,
        lhs: &ShamirArrayShare,
        rhs: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;
        Ok(ShamirArrayShare::new(self.field.add(&lhs.storage, &rhs.storage)?))
    }

    /// Elementwise difference of two shared arrays. Local.
    pub fn field_subtract(
        &self,
        lhs: &ShamirArrayShare,
        rhs: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;
        Ok(ShamirArrayShare::new(self.field.sub(&lhs.storage, &rhs.storage)?))
    }

    /// Elementwise additive inverse of a shared array. Local.
    pub fn negative(&self, operand: &ShamirArrayShare) -> Result<ShamirArrayShare, ProtocolError> {
        Ok(ShamirArrayShare::new(self.field.neg(&operand.storage)?))
    }

    /// Sum of a public and a shared array.
    ///
    /// Adding a constant to every evaluation shifts the polynomial's
    /// constant term, so every player applies the operand.
    pub fn public_private_add(
        &self,
        lhs: &FieldArray,
        rhs: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        Ok(ShamirArrayShare::new(self.field.add(lhs, &rhs.storage)?))
    }

    /// Difference of a public and a shared array, `lhs - rhs`.
    pub fn public_private_subtract(
        &self,
        lhs: &FieldArray,
        rhs: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        Ok(ShamirArrayShare::new(self.field.sub(lhs, &rhs.storage)?))
    }

    /// Difference of a shared and a public array, `lhs - rhs`.
    pub fn private_public_subtract(
        &self,
        lhs: &ShamirArrayShare,
        rhs: &FieldArray,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        Ok(ShamirArrayShare::new(self.field.sub(&lhs.storage, rhs)?))
    }

    /// Elementwise product of two shared arrays, without truncation.
    ///
    /// Pointwise products give a degree `2(threshold - 1)` sharing, so
    /// each player reshares its product evaluation and re-interpolates at
    /// the original degree with the precomputed reduction coefficients.
    pub fn untruncated_multiply(
        &mut self,
        lhs: &ShamirArrayShare,
        rhs: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;
        let shape = lhs.storage.shape().to_vec();
        let product = self.field.mul(&lhs.storage, &rhs.storage)?;

        let mut reduced = self.field.zeros(&shape);
        for contributor in 0..self.world_size() {
            let contribution = (self.rank() == contributor).then_some(&product);
            let sub_share = self.share_field(contributor, contribution, &shape)?;
            let weight = self.lagrange.coefficient(contributor).clone();
            let weighted = self.field.mul_scalar(&sub_share.storage, &weight)?;
            self.field.add_assign(&mut reduced, &weighted)?;
        }
        Ok(ShamirArrayShare::new(reduced))
    }

    /// Elementwise fixed-point product: multiply, then truncate.
    pub fn multiply(
        &mut self,
        lhs: &ShamirArrayShare,
        rhs: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let product = self.untruncated_multiply(lhs, rhs)?;
        self.truncate(&product, None)
    }

    /// Removes the low `bits` bits from each element of a shared array.
    pub fn truncate(
        &mut self,
        operand: &ShamirArrayShare,
        bits: Option<u64>,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        self.truncate_masked(operand, bits, None, None)
    }

    /// As [ShamirProtocolSuite::truncate], with caller-provided masks.
    pub fn truncate_masked(
        &mut self,
        operand: &ShamirArrayShare,
        bits: Option<u64>,
        trunc_mask: Option<&ShamirArrayShare>,
        rem_mask: Option<&ShamirArrayShare>,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let bits = bits.or_else(|| self.precision()).ok_or(ProtocolError::MissingPrecision)?;
        let field_bits = self.field.bits();
        let shape = operand.storage.shape().to_vec();

        let shift = BigUint::one() << bits;
        let shift_inv = self.field.inv_scalar(&shift).expect("powers of two are invertible");

        let truncation_mask = match trunc_mask {
            Some(mask) => mask.clone(),
            None => self.random_bitwise_secret(bits, None, Some(&shape))?.1,
        };
        let remaining_mask = match rem_mask {
            Some(mask) => mask.clone(),
            None => self.random_bitwise_secret(field_bits - bits, None, Some(&shape))?.1,
        };
        let remaining_mask =
            ShamirArrayShare::new(self.field.mul_scalar(&remaining_mask.storage, &shift)?);

        let mask = self.field_add(&remaining_mask, &truncation_mask)?;
        let masked = self.field_add(&mask, operand)?;
        let revealed = self
            .reveal_field(&masked, None)?
            .expect("full reveal returns a value to every player");

        let masked_low: Vec<BigUint> = revealed.iter().map(|value| value % &shift).collect();
        let masked_low = self.field.array(masked_low, &shape)?;
        let truncation_bits = self.public_private_subtract(&masked_low, &truncation_mask)?;

        let result = self.field_subtract(operand, &truncation_bits)?;
        Ok(ShamirArrayShare::new(self.field.mul_scalar(&result.storage, &shift_inv)?))
    }

    /// Generates unbiased shared random bits and their composed value.
    pub fn random_bitwise_secret(
        &mut self,
        bits: u64,
        src: Option<&[usize]>,
        shape: Option<&[usize]>,
    ) -> Result<(ShamirArrayShare, ShamirArrayShare), ProtocolError> {
        let all = self.all_ranks();
        let contributors = src.unwrap_or(&all);
        if contributors.is_empty() {
            return Err(ProtocolError::InvalidSources);
        }
        for rank in contributors {
            self.require_rank(*rank)?;
        }

        let shape = shape.unwrap_or(&[]).to_vec();
        let count: usize = shape.iter().product();
        let mut bit_shape = shape.clone();
        bit_shape.push(bits as usize);

        let mut combined: Option<ShamirArrayShare> = None;
        for contributor in contributors {
            let local = if self.rank() == *contributor {
                let raw: Vec<BigUint> = (0..count * bits as usize)
                    .map(|_| BigUint::from(self.rng.gen_range(0..2u8)))
                    .collect();
                Some(self.field.array(raw, &bit_shape)?)
            } else {
                None
            };
            let share = self.share_field(*contributor, local.as_ref(), &bit_shape)?;
            combined = Some(match combined {
                Some(previous) => self.logical_xor(&previous, &share)?,
                None => share,
            });
        }
        let bit_share = combined.expect("at least one contributor");

        let secret_share = self.bit_compose(&bit_share)?;
        Ok((bit_share, secret_share))
    }

    /// Elementwise logical AND of shared 0/1 arrays.
    pub fn logical_and(
        &mut self,
        lhs: &ShamirArrayShare,
        rhs: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        self.untruncated_multiply(lhs, rhs)
    }

    /// Elementwise logical OR of shared 0/1 arrays.
    pub fn logical_or(
        &mut self,
        lhs: &ShamirArrayShare,
        rhs: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let total = self.field_add(lhs, rhs)?;
        let product = self.untruncated_multiply(lhs, rhs)?;
        self.field_subtract(&total, &product)
    }

    /// Elementwise logical XOR of shared 0/1 arrays.
    pub fn logical_xor(
        &mut self,
        lhs: &ShamirArrayShare,
        rhs: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let total = self.field_add(lhs, rhs)?;
        let product = self.untruncated_multiply(lhs, rhs)?;
        let twice =
            ShamirArrayShare::new(self.field.mul_scalar(&product.storage, &BigUint::from(2u32))?);
        self.field_subtract(&total, &twice)
    }

    /// Elementwise logical NOT of a shared 0/1 array.
    pub fn logical_not(
        &mut self,
        operand: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let ones = self.field.ones(operand.storage.shape());
        self.public_private_subtract(&ones, operand)
    }

    /// Compares a public array against bitwise-shared values.
    fn public_bitwise_less_than(
        &mut self,
        lhs: &FieldArray,
        rhs_bits: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let bit_shape = rhs_bits.storage.shape();
        let bits = *bit_shape.last().expect("bit arrays have a trailing axis");
        let count = rhs_bits.storage.len() / bits;

        let mut xord = Vec::with_capacity(bits);
        let mut rhs_columns = Vec::with_capacity(bits);
        for position in 0..bits {
            let column = ShamirArrayShare::new(rhs_bits.storage.last_axis_column(position));
            let mut flipped = Vec::with_capacity(count);
            for (element, value) in lhs.iter().enumerate() {
                let public_bit = (value >> (bits - 1 - position)) & BigUint::one();
                let share_bit = column.storage.get(element).clone();
                if public_bit.is_one() {
                    flipped.push(self.field.sub_scalar(&BigUint::one(), &share_bit));
                } else {
                    flipped.push(share_bit);
                }
            }
            xord.push(ShamirArrayShare::new(self.field.array(flipped, &[count])?));
            rhs_columns.push(column);
        }

        let mut prefix = Vec::with_capacity(bits);
        prefix.push(xord[0].clone());
        for position in 1..bits {
            let next = self.logical_or(&prefix[position - 1], &xord[position])?;
            prefix.push(next);
        }
        let mut msb_diff = Vec::with_capacity(bits);
        msb_diff.push(prefix[0].clone());
        for position in 1..bits {
            msb_diff.push(self.field_subtract(&prefix[position], &prefix[position - 1])?);
        }

        let mut result: Option<ShamirArrayShare> = None;
        for position in 0..bits {
            let term = self.untruncated_multiply(&rhs_columns[position], &msb_diff[position])?;
            result = Some(match result {
                Some(previous) => self.field_add(&previous, &term)?,
                None => term,
            });
        }
        Ok(result.expect("bit arrays are non-empty"))
    }

    /// Extracts the least significant bit of each shared element.
    pub fn lsb(&mut self, operand: &ShamirArrayShare) -> Result<ShamirArrayShare, ProtocolError> {
        let shape = operand.storage.shape().to_vec();
        let count = operand.storage.len();
        let field_bits = self.field.bits();
        let flat = ShamirArrayShare::new(operand.storage.reshape(&[count])?);

        let (mask_bits, mask) = self.random_bitwise_secret(field_bits, None, Some(&[count]))?;
        let masked = self.field_add(&flat, &mask)?;
        let revealed = self
            .reveal_field(&masked, None)?
            .expect("full reveal returns a value to every player");

        let wrapped = self.public_bitwise_less_than(&revealed, &mask_bits)?;

        let mask_low =
            ShamirArrayShare::new(mask_bits.storage.last_axis_column(field_bits as usize - 1));
        let mut low = Vec::with_capacity(count);
        for (element, value) in revealed.iter().enumerate() {
            let parity = value & BigUint::one();
            let share_bit = mask_low.storage.get(element).clone();
            if parity.is_one() {
                low.push(self.field.sub_scalar(&BigUint::one(), &share_bit));
            } else {
                low.push(share_bit);
            }
        }
        let low = ShamirArrayShare::new(self.field.array(low, &[count])?);

        let product = self.untruncated_multiply(&wrapped, &low)?;
        let twice =
            ShamirArrayShare::new(self.field.mul_scalar(&product.storage, &BigUint::from(2u32))?);
        let xor = self.field_add(&wrapped, &self.field_subtract(&low, &twice)?)?;
        Ok(ShamirArrayShare::new(xor.storage.reshape(&shape)?))
    }

    /// Elementwise `operand < 0` in the signed interpretation.
    pub fn less_than_zero(
        &mut self,
        operand: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let doubled =
            ShamirArrayShare::new(self.field.mul_scalar(&operand.storage, &BigUint::from(2u32))?);
        self.lsb(&doubled)
    }

    /// Elementwise `lhs < rhs` in the signed interpretation.
    pub fn less(
        &mut self,
        lhs: &ShamirArrayShare,
        rhs: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;
        let ones = self.field.ones(lhs.storage.shape());
        let two = BigUint::from(2u32);

        let two_lhs = ShamirArrayShare::new(self.field.mul_scalar(&lhs.storage, &two)?);
        let two_rhs = ShamirArrayShare::new(self.field.mul_scalar(&rhs.storage, &two)?);
        let diff = self.field_subtract(lhs, rhs)?;
        let two_diff = ShamirArrayShare::new(self.field.mul_scalar(&diff.storage, &two)?);

        let w = {
            let lsb = self.lsb(&two_lhs)?;
            self.public_private_subtract(&ones, &lsb)?
        };
        let x = {
            let lsb = self.lsb(&two_rhs)?;
            self.public_private_subtract(&ones, &lsb)?
        };
        let y = {
            let lsb = self.lsb(&two_diff)?;
            self.public_private_subtract(&ones, &lsb)?
        };

        let w_xor_x = self.logical_xor(&w, &x)?;
        let not_w_xor_x = self.public_private_subtract(&ones, &w_xor_x)?;
        let x_and_diff = self.untruncated_multiply(&x, &w_xor_x)?;
        let not_y = self.public_private_subtract(&ones, &y)?;
        let same_sign_term = self.untruncated_multiply(&not_w_xor_x, &not_y)?;
        self.field_add(&x_and_diff, &same_sign_term)
    }

    /// Elementwise probabilistic equality of two shared arrays.
    pub fn equal(
        &mut self,
        lhs: &ShamirArrayShare,
        rhs: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;
        let diff = self.field_subtract(lhs, rhs)?;
        let exponent = self.field.order() - BigUint::one();
        let nonzero = self.private_public_power_field(&diff, &exponent)?;
        self.logical_not(&nonzero)
    }

    /// Raises each shared element to a public exponent in the field.
    pub fn private_public_power_field(
        &mut self,
        lhs: &ShamirArrayShare,
        exponent: &BigUint,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let ones = self.field.ones(lhs.storage.shape());
        let mut result = self.share_of_public(&ones);
        if exponent.is_zero() {
            return Ok(result);
        }
        let mut square = lhs.clone();
        let bits = exponent.bits();
        for position in 0..bits {
            if exponent.bit(position) {
                result = self.untruncated_multiply(&result, &square)?;
            }
            if position + 1 < bits {
                square = self.untruncated_multiply(&square, &square)?;
            }
        }
        Ok(result)
    }

    /// Elementwise multiplicative inverse in the field.
    pub fn multiplicative_inverse(
        &mut self,
        operand: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let mask = self.uniform(operand.storage.shape())?;
        let masked = self.untruncated_multiply(&mask, operand)?;
        let revealed = self
            .reveal_field(&masked, None)?
            .expect("full reveal returns a value to every player");
        let exponent = self.field.order() - BigUint::from(2u32);
        let inverse = self.field.pow(&revealed, &exponent)?;
        Ok(ShamirArrayShare::new(self.field.mul(&inverse, &mask.storage)?))
    }

    /// Elementwise absolute value in the signed interpretation.
    pub fn absolute(
        &mut self,
        operand: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let negative = self.less_than_zero(operand)?;
        let positive = self.logical_not(&negative)?;
        let negated = self.negative(operand)?;
        let negative_part = self.untruncated_multiply(&negative, &negated)?;
        let positive_part = self.untruncated_multiply(&positive, operand)?;
        self.field_add(&negative_part, &positive_part)
    }

    /// Elementwise maximum, `(a + b + |a - b|) / 2`.
    pub fn max(
        &mut self,
        lhs: &ShamirArrayShare,
        rhs: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;
        let total = self.field_add(lhs, rhs)?;
        let diff = self.field_subtract(lhs, rhs)?;
        let spread = self.absolute(&diff)?;
        let doubled = self.field_add(&total, &spread)?;
        let half = self.field.inv_scalar(&BigUint::from(2u32)).expect("two is invertible");
        Ok(ShamirArrayShare::new(self.field.mul_scalar(&doubled.storage, &half)?))
    }

    /// Elementwise minimum, `(a + b - |a - b|) / 2`.
    pub fn min(
        &mut self,
        lhs: &ShamirArrayShare,
        rhs: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;
        let total = self.field_add(lhs, rhs)?;
        let diff = self.field_subtract(lhs, rhs)?;
        let spread = self.absolute(&diff)?;
        let doubled = self.field_subtract(&total, &spread)?;
        let half = self.field.inv_scalar(&BigUint::from(2u32)).expect("two is invertible");
        Ok(ShamirArrayShare::new(self.field.mul_scalar(&doubled.storage, &half)?))
    }

    /// Elementwise rectified linear unit.
    pub fn relu(&mut self, operand: &ShamirArrayShare) -> Result<ShamirArrayShare, ProtocolError> {
        let negative = self.less_than_zero(operand)?;
        let positive = self.logical_not(&negative)?;
        self.untruncated_multiply(&positive, operand)
    }

    /// Elementwise zigmoid, a piecewise-linear sigmoid surrogate.
    pub fn zigmoid(
        &mut self,
        operand: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let shape = operand.storage.shape().to_vec();
        let count = operand.storage.len();
        let ones = self.encoding.encode(&Scalars::Reals(vec![1.0; count]), &shape, &self.field)?;
        let halves =
            self.encoding.encode(&Scalars::Reals(vec![0.5; count]), &shape, &self.field)?;

        let plus_half = self.public_private_add(&halves, operand)?;
        let minus_half = self.private_public_subtract(operand, &halves)?;
        let above_minus = self.less_than_zero(&minus_half)?;
        let saturated = self.logical_not(&above_minus)?;
        let below_plus = self.less_than_zero(&plus_half)?;

        let middle = self.field_subtract(&above_minus, &below_plus)?;
        let middle_value = self.untruncated_multiply(&middle, operand)?;
        let middle_offset = ShamirArrayShare::new(self.field.mul(&middle.storage, &halves)?);
        let middle_part = self.field_add(&middle_value, &middle_offset)?;

        let ones_part = ShamirArrayShare::new(self.field.mul(&saturated.storage, &ones)?);
        self.field_add(&ones_part, &middle_part)
    }

    /// Decomposes each element into a big-endian sharing of its bits.
    pub fn bit_decompose(
        &mut self,
        operand: &ShamirArrayShare,
        bits: Option<u64>,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let bits = bits.unwrap_or_else(|| self.field.bits());
        let shape = operand.storage.shape().to_vec();
        let half = self.field.inv_scalar(&BigUint::from(2u32)).expect("two is invertible");

        let mut remaining = operand.clone();
        let mut columns = Vec::with_capacity(bits as usize);
        for _ in 0..bits {
            let bit = self.lsb(&remaining)?;
            remaining = self.field_subtract(&remaining, &bit)?;
            remaining = ShamirArrayShare::new(self.field.mul_scalar(&remaining.storage, &half)?);
            columns.push(bit);
        }
        columns.reverse();

        let mut bit_shape = shape;
        bit_shape.push(bits as usize);
        let storages: Vec<FieldArray> =
            columns.iter().map(|column| column.storage.clone()).collect();
        Ok(ShamirArrayShare::new(FieldArray::from_columns(&storages, &bit_shape)?))
    }

    /// Composes big-endian bit sharings back into element sharings. Local.
    pub fn bit_compose(
        &mut self,
        operand: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let bit_shape = operand.storage.shape().to_vec();
        let bits = *bit_shape.last().expect("bit arrays have a trailing axis");
        let shape = &bit_shape[..bit_shape.len() - 1];
        let count = operand.storage.len() / bits;

        let mut total = self.field.zeros(&[count]);
        for position in 0..bits {
            let column = operand.storage.last_axis_column(position);
            let weight = BigUint::one() << (bits - 1 - position);
            self.field.add_assign(&mut total, &self.field.mul_scalar(&column, &weight)?)?;
        }
        Ok(ShamirArrayShare::new(total.reshape(shape)?))
    }

    /// Sum of all elements, as a scalar-shaped share. Local.
    pub fn sum(&self, operand: &ShamirArrayShare) -> Result<ShamirArrayShare, ProtocolError> {
        Ok(ShamirArrayShare::new(self.field.sum(&operand.storage)?))
    }

    /// Fixed-point dot product of two shared vectors.
    pub fn dot(
        &mut self,
        lhs: &ShamirArrayShare,
        rhs: &ShamirArrayShare,
    ) -> Result<ShamirArrayShare, ProtocolError> {
        let products = self.untruncated_multiply(lhs, rhs)?;
        let total = self.sum(&products)?;
        self.truncate(&total, None)
    }

    /// A sharing of uniformly random field elements.
    ///
    /// Every player shares a locally sampled contribution; their sum is
    /// uniform as long as one contributor is honest.
    pub fn uniform(&mut self, shape: &[usize]) -> Result<ShamirArrayShare, ProtocolError> {
        let mut total: Option<ShamirArrayShare> = None;
        for contributor in 0..self.world_size() {
            let contribution = (self.rank() == contributor)
                .then(|| self.field.uniform(shape, &mut self.rng));
            let share = self.share_field(contributor, contribution.as_ref(), shape)?;
            total = Some(match total {
                Some(previous) => self.field_add(&previous, &share)?,
                None => share,
            });
        }
        Ok(total.expect("communicators have at least one player"))
    }
}
