//! Additive secret sharing and its semi-honest protocol suite.

use crate::{errors::ProtocolError, przs::Przs, suite_seed, transcript, SuiteOptions};
use cicada_communicator::SocketCommunicator;
use cicada_encoding::{Encoding, Scalars};
use cicada_math::{BigUint, Field, FieldArray};
use num_traits::{One, Zero};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One player's share of an additively secret-shared array.
///
/// The share is a single field array; summing every player's share modulo
/// the field order recovers the (encoded) secret. Shares are only
/// meaningful to the suite that created them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditiveArrayShare {
    storage: FieldArray,
}

impl AdditiveArrayShare {
    /// Wraps raw storage as a share.
    pub fn new(storage: FieldArray) -> Self {
        AdditiveArrayShare { storage }
    }

    /// The underlying field array.
    pub fn storage(&self) -> &FieldArray {
        &self.storage
    }

    /// Consumes the share, returning its storage.
    pub fn into_storage(self) -> FieldArray {
        self.storage
    }
}

/// Additive-secret-sharing suite with semi-honest security.
///
/// All operations are collective: every player of the communicator must
/// invoke them in lock-step with compatible arguments.
pub struct AdditiveProtocolSuite {
    communicator: Arc<SocketCommunicator>,
    field: Field,
    encoding: Encoding,
    przs: Przs,
    rng: ChaCha20Rng,
}

impl AdditiveProtocolSuite {
    /// Builds the suite, exchanging PRZS seeds over the communicator.
    pub fn new(
        communicator: Arc<SocketCommunicator>,
        field: Field,
        encoding: Encoding,
        options: SuiteOptions,
    ) -> Result<Self, ProtocolError> {
        let (przs_seed, local_seed) = suite_seed(&options, communicator.rank());
        let przs = Przs::new(&communicator, field.clone(), przs_seed)?;
        let rng = match local_seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        Ok(AdditiveProtocolSuite { communicator, field, encoding, przs, rng })
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
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
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

    /// The fractional precision of the suite encoding, if it has one.
    fn precision(&self) -> Option<u64> {
        match &self.encoding {
            Encoding::FixedPoint(fixed) => Some(fixed.precision() as u64),
            _ => None,
        }
    }

    /// An additive sharing of a public array: rank zero holds the value.
    fn share_of_public(&self, value: &FieldArray) -> AdditiveArrayShare {
        if self.rank() == 0 {
            AdditiveArrayShare::new(value.clone())
        } else {
            AdditiveArrayShare::new(self.field.zeros(value.shape()))
        }
    }

    /// Secret-shares an already-encoded field array held by `src`.
    pub fn share_field(
        &mut self,
        src: usize,
        secret: Option<&FieldArray>,
        shape: &[usize],
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        self.require_rank(src)?;
        transcript::protocol("additive", "share", "enter");

        let mut sharing = self.przs.zero_sharing(shape);
        if self.rank() == src {
            let secret = secret.ok_or(ProtocolError::MissingSecret { rank: src })?;
            if secret.shape() != shape {
                return Err(ProtocolError::ShapeMismatch(
                    secret.shape().to_vec(),
                    shape.to_vec(),
                ));
            }
            self.field.add_assign(&mut sharing, secret)?;
        }
        transcript::protocol("additive", "share", "exit");
        Ok(AdditiveArrayShare::new(sharing))
    }

    /// Secret-shares application values held by `src`.
    pub fn share(
        &mut self,
        src: usize,
        secret: Option<&Scalars>,
        shape: &[usize],
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let encoded = match secret {
            Some(secret) if self.rank() == src => {
                Some(self.encoding.encode(secret, shape, &self.field)?)
            }
            _ => None,
        };
        self.share_field(src, encoded.as_ref(), shape)
    }

    /// Secret-shares a bit array held by `src`, independent of the suite
    /// encoding.
    pub fn share_bits(
        &mut self,
        src: usize,
        secret: Option<&Scalars>,
        shape: &[usize],
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let encoded = match secret {
            Some(secret) if self.rank() == src => {
                Some(Encoding::Bits.encode(secret, shape, &self.field)?)
            }
            _ => None,
        };
        self.share_field(src, encoded.as_ref(), shape)
    }

    /// Reveals the raw field representation of a secret to `dst` players.
    ///
    /// Returns the reconstructed array if the local player is a recipient.
    pub fn reveal_field(
        &mut self,
        share: &AdditiveArrayShare,
        dst: Option<&[usize]>,
    ) -> Result<Option<FieldArray>, ProtocolError> {
        transcript::protocol("additive", "reveal", "enter");
        let all = self.all_ranks();
        let destinations = dst.unwrap_or(&all);
        for rank in destinations {
            self.require_rank(*rank)?;
        }

        let mut secret = None;
        for recipient in destinations {
            let gathered = self.communicator.gather(&share.storage, *recipient)?;
            if let Some(shares) = gathered {
                let mut total = self.field.zeros(share.storage.shape());
                for received in &shares {
                    self.field.add_assign(&mut total, received)?;
                }
                secret = Some(total);
            }
        }
        transcript::protocol("additive", "reveal", "exit");
        Ok(secret)
    }

    /// Reveals and decodes a secret with the suite encoding.
    pub fn reveal(
        &mut self,
        share: &AdditiveArrayShare,
        dst: Option<&[usize]>,
    ) -> Result<Option<Scalars>, ProtocolError> {
        let encoding = self.encoding.clone();
        self.reveal_with_encoding(share, dst, &encoding)
    }

    /// Reveals and decodes a secret with an explicit encoding.
    pub fn reveal_with_encoding(
        &mut self,
        share: &AdditiveArrayShare,
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
        share: &AdditiveArrayShare,
        dst: Option<&[usize]>,
    ) -> Result<Option<Scalars>, ProtocolError> {
        self.reveal_with_encoding(share, dst, &Encoding::Bits)
    }

    /// Rerandomizes a share without changing the secret.
    pub fn reshare(
        &mut self,
        operand: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let fresh = self.przs.zero_sharing(operand.storage.shape());
        Ok(AdditiveArrayShare::new(self.field.add(&operand.storage, &fresh)?))
    }

    /// Elementwise sum of two shared arrays. Local.
    pub fn field_add(
        &self,
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;
        Ok(AdditiveArrayShare::new(self.field.add(&lhs.storage, &rhs.storage)?))
    }

    /// Elementwise difference of two shared arrays. Local.
    pub fn field_subtract(
        &self,
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;
        Ok(AdditiveArrayShare::new(self.field.sub(&lhs.storage, &rhs.storage)?))
    }

    /// Elementwise additive inverse of a shared array. Local.
    pub fn negative(&self, operand: &AdditiveArrayShare) -> Result<AdditiveArrayShare, ProtocolError> {
        Ok(AdditiveArrayShare::new(self.field.neg(&operand.storage)?))
    }

    /// Sum of a public and a shared array.
    ///
    /// Only rank zero applies the public operand, so the sum over all
    /// players' shares moves by exactly the public value.
    pub fn public_private_add(
        &self,
        lhs: &FieldArray,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        if self.rank() == 0 {
            Ok(AdditiveArrayShare::new(self.field.add(lhs, &rhs.storage)?))
        } else {
            Ok(rhs.clone())
        }
    }

    /// Difference of a public and a shared array, `lhs - rhs`.
    pub fn public_private_subtract(
        &self,
        lhs: &FieldArray,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        if self.rank() == 0 {
            Ok(AdditiveArrayShare::new(self.field.sub(lhs, &rhs.storage)?))
        } else {
            Ok(AdditiveArrayShare::new(self.field.neg(&rhs.storage)?))
        }
    }

    /// Difference of a shared and a public array, `lhs - rhs`.
    pub fn private_public_subtract(
        &self,
        lhs: &AdditiveArrayShare,
        rhs: &FieldArray,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        if self.rank() == 0 {
            Ok(AdditiveArrayShare::new(self.field.sub(&lhs.storage, rhs)?))
        } else {
            Ok(lhs.clone())
        }
    }

    /// Elementwise product of two shared arrays, without truncation.
    ///
    /// Each cross term `x_i * y_j` must be computed by exactly one player,
    /// so every player forwards its operand shares to the next
    /// `ceil((n-1)/2)` ranks around the ring (one fewer for the upper half
    /// of an even-sized ring) and multiplies whatever lands on hand.
    pub fn untruncated_multiply(
        &mut self,
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;

        let world_size = self.world_size();
        let rank = self.rank();
        let count = (world_size - 1).div_ceil(2);

        let mut other_x = Vec::new();
        let mut other_y = Vec::new();
        for src in 0..world_size {
            let offsets: Vec<usize> = if world_size % 2 == 0 && src >= count {
                (1..count).collect()
            } else {
                (1..=count).collect()
            };
            let dst: Vec<usize> =
                offsets.iter().map(|offset| (src + offset) % world_size).collect();

            let values = (rank == src).then(|| vec![lhs.storage.clone(); dst.len()]);
            if let Some(received) = self.communicator.scatterv(src, values, &dst)? {
                other_x.push(received);
            }
            let values = (rank == src).then(|| vec![rhs.storage.clone(); dst.len()]);
            if let Some(received) = self.communicator.scatterv(src, values, &dst)? {
                other_y.push(received);
            }
        }

        let mut result = self.field.mul(&lhs.storage, &rhs.storage)?;
        for (x, y) in other_x.iter().zip(other_y.iter()) {
            self.field.add_assign(&mut result, &self.field.mul(&lhs.storage, y)?)?;
            self.field.add_assign(&mut result, &self.field.mul(x, &rhs.storage)?)?;
        }
        Ok(AdditiveArrayShare::new(result))
    }

    /// Elementwise fixed-point product: multiply, then truncate.
    pub fn multiply(
        &mut self,
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let product = self.untruncated_multiply(lhs, rhs)?;
        self.truncate(&product, None)
    }

    /// Removes the low `bits` bits from each element of a shared array.
    ///
    /// Divides a fixed-point product by its implicit scale. Correct as
    /// long as the underlying magnitudes stay below `2^(field_bits -
    /// bits) / 2`, so intermediate values cannot wrap.
    pub fn truncate(
        &mut self,
        operand: &AdditiveArrayShare,
        bits: Option<u64>,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        self.truncate_masked(operand, bits, None, None)
    }

    /// As [AdditiveProtocolSuite::truncate], with caller-provided masks.
    ///
    /// The active suite injects masks so that its paired sub-protocols
    /// truncate identically; everyone else lets the masks default.
    pub fn truncate_masked(
        &mut self,
        operand: &AdditiveArrayShare,
        bits: Option<u64>,
        trunc_mask: Option<&AdditiveArrayShare>,
        rem_mask: Option<&AdditiveArrayShare>,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
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
            AdditiveArrayShare::new(self.field.mul_scalar(&remaining_mask.storage, &shift)?);

        // Mask the whole element, reveal it, and strip the low bits in
        // public; subtracting the mask afterwards leaves a sharing of just
        // the bits to be removed.
        let mask = self.field_add(&remaining_mask, &truncation_mask)?;
        let masked = self.field_add(&mask, operand)?;
        let revealed = self
            .reveal_field(&masked, None)?
            .expect("full reveal returns a value to every player");

        let masked_low: Vec<BigUint> =
            revealed.iter().map(|value| value % &shift).collect();
        let masked_low = self.field.array(masked_low, &shape)?;
        let truncation_bits = self.public_private_subtract(&masked_low, &truncation_mask)?;

        let result = self.field_subtract(operand, &truncation_bits)?;
        Ok(AdditiveArrayShare::new(self.field.mul_scalar(&result.storage, &shift_inv)?))
    }

    /// Generates unbiased shared random bits and their composed value.
    ///
    /// Every contributing player secret-shares a locally sampled bit
    /// vector; the vectors are XOR-ed together so the result is unbiased
    /// as long as one contributor is honest. Returns the bit sharing (with
    /// a trailing axis of `bits`, big-endian) and the sharing of the
    /// composed integer.
    pub fn random_bitwise_secret(
        &mut self,
        bits: u64,
        src: Option<&[usize]>,
        shape: Option<&[usize]>,
    ) -> Result<(AdditiveArrayShare, AdditiveArrayShare), ProtocolError> {
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

        // Each contributor shares its own random bits; everyone XORs.
        let mut combined: Option<AdditiveArrayShare> = None;
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
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        self.untruncated_multiply(lhs, rhs)
    }

    /// Elementwise logical OR of shared 0/1 arrays.
    pub fn logical_or(
        &mut self,
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let total = self.field_add(lhs, rhs)?;
        let product = self.untruncated_multiply(lhs, rhs)?;
        self.field_subtract(&total, &product)
    }

    /// Elementwise logical XOR of shared 0/1 arrays.
    pub fn logical_xor(
        &mut self,
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let total = self.field_add(lhs, rhs)?;
        let product = self.untruncated_multiply(lhs, rhs)?;
        let twice = AdditiveArrayShare::new(
            self.field.mul_scalar(&product.storage, &BigUint::from(2u32))?,
        );
        self.field_subtract(&total, &twice)
    }

    /// Elementwise logical NOT of a shared 0/1 array.
    pub fn logical_not(
        &mut self,
        operand: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let ones = self.field.ones(operand.storage.shape());
        self.public_private_subtract(&ones, operand)
    }

    /// Compares a public array against bitwise-shared values.
    ///
    /// Returns a sharing of `lhs < rhs` elementwise, where `rhs` is given
    /// by its big-endian bit sharing. Field semantics only: the signed
    /// interpretation of the upper range is not considered here.
    fn public_bitwise_less_than(
        &mut self,
        lhs: &FieldArray,
        rhs_bits: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let bit_shape = rhs_bits.storage.shape();
        let bits = *bit_shape.last().expect("bit arrays have a trailing axis");
        let count = rhs_bits.storage.len() / bits;

        // XOR each public bit into the shared bits, giving one where the
        // operands differ.
        let mut xord = Vec::with_capacity(bits);
        let mut rhs_columns = Vec::with_capacity(bits);
        for position in 0..bits {
            let column = AdditiveArrayShare::new(rhs_bits.storage.last_axis_column(position));
            let mut flipped = Vec::with_capacity(count);
            for (element, value) in lhs.iter().enumerate() {
                let public_bit = (value >> (bits - 1 - position)) & BigUint::one();
                let share_bit = column.storage.get(element).clone();
                if public_bit.is_one() {
                    // One minus the shared bit, applied with additive
                    // public-operand semantics.
                    if self.rank() == 0 {
                        flipped.push(self.field.sub_scalar(&BigUint::one(), &share_bit));
                    } else {
                        flipped.push(self.field.neg_scalar(&share_bit));
                    }
                } else {
                    flipped.push(share_bit);
                }
            }
            xord.push(AdditiveArrayShare::new(self.field.array(flipped, &[count])?));
            rhs_columns.push(column);
        }

        // Prefix-OR locates the most significant differing bit.
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

        // lhs < rhs exactly when rhs holds a one at that bit.
        let mut result: Option<AdditiveArrayShare> = None;
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
    ///
    /// Masks the element with a random bitwise secret, reveals the masked
    /// value, and undoes the mask's low bit with a public comparison
    /// against the mask bits.
    pub fn lsb(&mut self, operand: &AdditiveArrayShare) -> Result<AdditiveArrayShare, ProtocolError> {
        let shape = operand.storage.shape().to_vec();
        let count = operand.storage.len();
        let field_bits = self.field.bits();
        let flat = AdditiveArrayShare::new(operand.storage.reshape(&[count])?);

        let (mask_bits, mask) = self.random_bitwise_secret(field_bits, None, Some(&[count]))?;
        let masked = self.field_add(&flat, &mask)?;
        let revealed = self
            .reveal_field(&masked, None)?
            .expect("full reveal returns a value to every player");

        // One where the revealed masked value is below the mask, meaning
        // the sum wrapped the field order.
        let wrapped = self.public_bitwise_less_than(&revealed, &mask_bits)?;

        // XOR the mask's low bit with the revealed low bit.
        let mask_low = AdditiveArrayShare::new(
            mask_bits.storage.last_axis_column(field_bits as usize - 1),
        );
        let mut low = Vec::with_capacity(count);
        for (element, value) in revealed.iter().enumerate() {
            let parity = value & BigUint::one();
            let share_bit = mask_low.storage.get(element).clone();
            if parity.is_one() {
                if self.rank() == 0 {
                    low.push(self.field.sub_scalar(&BigUint::one(), &share_bit));
                } else {
                    low.push(self.field.neg_scalar(&share_bit));
                }
            } else {
                low.push(share_bit);
            }
        }
        let low = AdditiveArrayShare::new(self.field.array(low, &[count])?);

        // lsb = wrapped XOR low.
        let product = self.untruncated_multiply(&wrapped, &low)?;
        let twice = AdditiveArrayShare::new(
            self.field.mul_scalar(&product.storage, &BigUint::from(2u32))?,
        );
        let xor = self.field_add(&wrapped, &self.field_subtract(&low, &twice)?)?;
        Ok(AdditiveArrayShare::new(xor.storage.reshape(&shape)?))
    }

    /// Elementwise `operand < 0` in the signed interpretation.
    ///
    /// Doubling wraps the negative range onto odd values, so the answer is
    /// the least significant bit of `2 * operand`.
    pub fn less_than_zero(
        &mut self,
        operand: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let doubled = AdditiveArrayShare::new(
            self.field.mul_scalar(&operand.storage, &BigUint::from(2u32))?,
        );
        self.lsb(&doubled)
    }

    /// Elementwise `lhs < rhs` in the signed interpretation.
    ///
    /// Requires magnitudes below a quarter of the field order.
    pub fn less(
        &mut self,
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;
        let ones = self.field.ones(lhs.storage.shape());
        let two = BigUint::from(2u32);

        let two_lhs = AdditiveArrayShare::new(self.field.mul_scalar(&lhs.storage, &two)?);
        let two_rhs = AdditiveArrayShare::new(self.field.mul_scalar(&rhs.storage, &two)?);
        let diff = self.field_subtract(lhs, rhs)?;
        let two_diff = AdditiveArrayShare::new(self.field.mul_scalar(&diff.storage, &two)?);

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
    ///
    /// Computes `1 - (lhs - rhs)^(order - 1)` by Fermat's little theorem:
    /// the power is one exactly when the difference is nonzero.
    pub fn equal(
        &mut self,
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;
        let diff = self.field_subtract(lhs, rhs)?;
        let exponent = self.field.order() - BigUint::one();
        let nonzero = self.private_public_power_field(&diff, &exponent)?;
        self.logical_not(&nonzero)
    }

    /// Raises each shared element to a public exponent in the field.
    pub fn private_public_power_field(
        &mut self,
        lhs: &AdditiveArrayShare,
        exponent: &BigUint,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
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

    /// Raises each fixed-point element to a public integer exponent.
    pub fn private_public_power(
        &mut self,
        lhs: &AdditiveArrayShare,
        exponent: u64,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let one = Scalars::Reals(vec![1.0; lhs.storage.len()]);
        let encoded_one = self.encoding.encode(&one, lhs.storage.shape(), &self.field)?;
        let mut result = self.share_of_public(&encoded_one);
        if exponent == 0 {
            return Ok(result);
        }
        let mut square = lhs.clone();
        let bits = 64 - exponent.leading_zeros() as u64;
        for position in 0..bits {
            if (exponent >> position) & 1 == 1 {
                result = self.untruncated_multiply(&result, &square)?;
                result = self.truncate(&result, None)?;
            }
            if position + 1 < bits {
                square = self.untruncated_multiply(&square, &square)?;
                square = self.truncate(&square, None)?;
            }
        }
        Ok(result)
    }

    /// Elementwise multiplicative inverse in the field.
    ///
    /// Reveals a random multiple of the operand, so a zero element is
    /// disclosed publicly (and inverts to zero, as in the clear).
    pub fn multiplicative_inverse(
        &mut self,
        operand: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let mask = self.uniform(operand.storage.shape());
        let masked = self.untruncated_multiply(&mask, operand)?;
        let revealed = self
            .reveal_field(&masked, None)?
            .expect("full reveal returns a value to every player");
        let exponent = self.field.order() - BigUint::from(2u32);
        let inverse = self.field.pow(&revealed, &exponent)?;
        Ok(AdditiveArrayShare::new(self.field.mul(&inverse, &mask.storage)?))
    }

    /// Elementwise absolute value in the signed interpretation.
    pub fn absolute(
        &mut self,
        operand: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let negative = self.less_than_zero(operand)?;
        let positive = self.logical_not(&negative)?;
        let negated = self.negative(operand)?;
        let negative_part = self.untruncated_multiply(&negative, &negated)?;
        let positive_part = self.untruncated_multiply(&positive, operand)?;
        self.field_add(&negative_part, &positive_part)
    }

    /// Elementwise maximum, `(a + b + |a - b|) / 2`.
    ///
    /// Accurate for magnitudes below a quarter of the field order.
    pub fn max(
        &mut self,
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;
        let total = self.field_add(lhs, rhs)?;
        let diff = self.field_subtract(lhs, rhs)?;
        let spread = self.absolute(&diff)?;
        let doubled = self.field_add(&total, &spread)?;
        let half = self.field.inv_scalar(&BigUint::from(2u32)).expect("two is invertible");
        Ok(AdditiveArrayShare::new(self.field.mul_scalar(&doubled.storage, &half)?))
    }

    /// Elementwise minimum, `(a + b - |a - b|) / 2`.
    pub fn min(
        &mut self,
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;
        let total = self.field_add(lhs, rhs)?;
        let diff = self.field_subtract(lhs, rhs)?;
        let spread = self.absolute(&diff)?;
        let doubled = self.field_subtract(&total, &spread)?;
        let half = self.field.inv_scalar(&BigUint::from(2u32)).expect("two is invertible");
        Ok(AdditiveArrayShare::new(self.field.mul_scalar(&doubled.storage, &half)?))
    }

    /// Elementwise rectified linear unit, `x * (x >= 0)`.
    pub fn relu(
        &mut self,
        operand: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let negative = self.less_than_zero(operand)?;
        let positive = self.logical_not(&negative)?;
        self.untruncated_multiply(&positive, operand)
    }

    /// Elementwise zigmoid, a piecewise-linear sigmoid surrogate.
    ///
    /// Zero below -1/2, identity-plus-half inside [-1/2, 1/2], one above.
    /// Requires a fixed-point encoding.
    pub fn zigmoid(
        &mut self,
        operand: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let shape = operand.storage.shape().to_vec();
        let count = operand.storage.len();
        let ones =
            self.encoding.encode(&Scalars::Reals(vec![1.0; count]), &shape, &self.field)?;
        let halves =
            self.encoding.encode(&Scalars::Reals(vec![0.5; count]), &shape, &self.field)?;

        let plus_half = self.public_private_add(&halves, operand)?;
        let minus_half = self.private_public_subtract(operand, &halves)?;
        let above_minus = self.less_than_zero(&minus_half)?;
        let saturated = self.logical_not(&above_minus)?;
        let below_plus = self.less_than_zero(&plus_half)?;

        // One exactly on the linear middle segment.
        let middle = self.field_subtract(&above_minus, &below_plus)?;
        let middle_value = self.untruncated_multiply(&middle, operand)?;
        let middle_offset = AdditiveArrayShare::new(self.field.mul(&middle.storage, &halves)?);
        let middle_part = self.field_add(&middle_value, &middle_offset)?;

        let ones_part = AdditiveArrayShare::new(self.field.mul(&saturated.storage, &ones)?);
        self.field_add(&ones_part, &middle_part)
    }

    /// Decomposes each element into a big-endian sharing of its bits.
    pub fn bit_decompose(
        &mut self,
        operand: &AdditiveArrayShare,
        bits: Option<u64>,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let bits = bits.unwrap_or_else(|| self.field.bits());
        let shape = operand.storage.shape().to_vec();
        let half = self.field.inv_scalar(&BigUint::from(2u32)).expect("two is invertible");

        let mut remaining = operand.clone();
        let mut columns = Vec::with_capacity(bits as usize);
        for _ in 0..bits {
            let bit = self.lsb(&remaining)?;
            remaining = self.field_subtract(&remaining, &bit)?;
            remaining =
                AdditiveArrayShare::new(self.field.mul_scalar(&remaining.storage, &half)?);
            columns.push(bit);
        }
        columns.reverse();

        let mut bit_shape = shape;
        bit_shape.push(bits as usize);
        let storages: Vec<FieldArray> =
            columns.iter().map(|column| column.storage.clone()).collect();
        Ok(AdditiveArrayShare::new(FieldArray::from_columns(&storages, &bit_shape)?))
    }

    /// Composes big-endian bit sharings back into element sharings. Local.
    pub fn bit_compose(
        &mut self,
        operand: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
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
        Ok(AdditiveArrayShare::new(total.reshape(shape)?))
    }

    /// Rounds each fixed-point element down to its integer part.
    pub fn floor(
        &mut self,
        operand: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let precision = self.precision().ok_or(ProtocolError::MissingPrecision)?;
        let shift = BigUint::one() << precision;
        let exponent = self.field.order() - BigUint::one();

        let magnitude = self.absolute(operand)?;
        let low_bits = self.bit_decompose(&magnitude, Some(precision))?;
        let fraction = self.bit_compose(&low_bits)?;
        let fraction_negated = self.negative(&fraction)?;
        let two_fraction =
            AdditiveArrayShare::new(self.field.mul_scalar(&fraction.storage, &BigUint::from(2u32))?);
        let negative = self.less_than_zero(operand)?;

        // (fraction != 0) * 2^precision, to step negative values down.
        let has_fraction = self.private_public_power_field(&fraction, &exponent)?;
        let step = AdditiveArrayShare::new(self.field.mul_scalar(&has_fraction.storage, &shift)?);
        let negative_adjust = self.field_subtract(&two_fraction, &step)?;
        let selected = self.untruncated_multiply(&negative_adjust, &negative)?;

        let result = self.field_add(&selected, &fraction_negated)?;
        self.field_add(&result, operand)
    }

    /// Sum of all elements, as a scalar-shaped share. Local.
    pub fn sum(&self, operand: &AdditiveArrayShare) -> Result<AdditiveArrayShare, ProtocolError> {
        Ok(AdditiveArrayShare::new(self.field.sum(&operand.storage)?))
    }

    /// Fixed-point dot product of two shared vectors.
    pub fn dot(
        &mut self,
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let products = self.untruncated_multiply(lhs, rhs)?;
        let total = self.sum(&products)?;
        self.truncate(&total, None)
    }

    /// A sharing of uniformly random field elements.
    ///
    /// Purely local: each player's sample is its share, so the underlying
    /// value is the sum of independent uniform draws.
    pub fn uniform(&mut self, shape: &[usize]) -> AdditiveArrayShare {
        AdditiveArrayShare::new(self.field.uniform(shape, &mut self.rng))
    }

    /// Fixed-point division of two shared arrays.
    pub fn divide(
        &mut self,
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let quotient = self.untruncated_divide(lhs, rhs)?;
        self.truncate(&quotient, None)
    }

    /// Division by a masked, revealed divisor.
    ///
    /// May leak information when the divisor approaches the fixed-point
    /// range limit.
    pub fn untruncated_divide(
        &mut self,
        lhs: &AdditiveArrayShare,
        rhs: &AdditiveArrayShare,
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        self.require_compatible(lhs, rhs)?;
        let precision = self.precision().ok_or(ProtocolError::MissingPrecision)?;
        let shape = rhs.storage.shape().to_vec();

        let (_, mask) = self.random_bitwise_secret(precision, None, Some(&shape))?;
        let masked_divisor = self.untruncated_multiply(&mask, rhs)?;
        let masked_divisor = self.truncate(&masked_divisor, None)?;
        let revealed = self
            .reveal(&masked_divisor, None)?
            .expect("full reveal returns a value to every player");
        let divisors = revealed.as_reals().ok_or(ProtocolError::MissingPrecision)?.to_vec();

        let masked_dividend = self.untruncated_multiply(lhs, &mask)?;
        let masked_dividend = self.truncate(&masked_dividend, None)?;
        self.untruncated_private_public_divide(&masked_dividend, &divisors)
    }

    /// Division of a shared array by public real divisors. Local.
    pub fn untruncated_private_public_divide(
        &mut self,
        lhs: &AdditiveArrayShare,
        divisors: &[f64],
    ) -> Result<AdditiveArrayShare, ProtocolError> {
        let reciprocals: Vec<f64> = divisors.iter().map(|divisor| 1.0 / divisor).collect();
        let encoded = self.encoding.encode(
            &Scalars::Reals(reciprocals),
            lhs.storage.shape(),
            &self.field,
        )?;
        Ok(AdditiveArrayShare::new(self.field.mul(&lhs.storage, &encoded)?))
    }
}
