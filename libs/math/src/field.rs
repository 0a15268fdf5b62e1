//! Runtime prime fields and field arrays.

use crate::{errors::FieldError, primality::probably_prime, DivByZero};
use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display, Formatter};

/// The default field order: the largest prime below 2^64.
pub const DEFAULT_ORDER: u64 = 18446744073709551557;

/// Number of Miller-Rabin rounds used to validate field orders.
const PRIMALITY_ROUNDS: u32 = 32;

/// The integers modulo an odd prime.
///
/// A `Field` is a runtime value so that protocol suites can operate over an
/// arbitrary prime order chosen at startup. Orders are validated with
/// Miller-Rabin at construction; the error probability is at most 2^-64.
///
/// Elements are represented as [BigUint] values in `[0, order)` and the
/// half-open range `[0, order/2)` is conventionally treated as positive
/// while `[order/2, order)` is treated as negative.
///
/// # Examples
///
/// ```
/// use cicada_math::Field;
///
/// let field = Field::default();
/// let a = field.full(&[2], 10u64.into());
/// let b = field.full(&[2], 32u64.into());
/// let sum = field.add(&a, &b).unwrap();
/// assert_eq!(sum, field.full(&[2], 42u64.into()));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Field {
    order: BigUint,
    bits: u64,
    bytes: usize,
    posbound: BigUint,
}

impl Field {
    /// Constructs a field with the given prime order.
    pub fn new(order: BigUint) -> Result<Self, FieldError> {
        let mut rng = rand::thread_rng();
        if (&order % 2u32).is_zero() || !probably_prime(&order, PRIMALITY_ROUNDS, &mut rng) {
            return Err(FieldError::InvalidOrder);
        }
        let bits = order.bits();
        let bytes = bits.div_ceil(8) as usize;
        let posbound = &order / 2u32;
        Ok(Field { order, bits, bytes, posbound })
    }

    /// The order of the field.
    pub fn order(&self) -> &BigUint {
        &self.order
    }

    /// The number of bits required to represent the largest field element.
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// The number of bytes required to represent the largest field element.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// The exclusive upper bound of the conventionally-positive range.
    pub fn posbound(&self) -> &BigUint {
        &self.posbound
    }

    /// Reduces an arbitrary nonnegative integer into the field.
    pub fn element(&self, value: BigUint) -> BigUint {
        value % &self.order
    }

    /// True if `value` falls in the conventionally-negative range.
    pub fn is_negative(&self, value: &BigUint) -> bool {
        value >= &self.posbound
    }

    /// Scalar multiplicative inverse, by Fermat's little theorem.
    pub fn inv_scalar(&self, value: &BigUint) -> Result<BigUint, DivByZero> {
        let value = value % &self.order;
        if value.is_zero() {
            return Err(DivByZero);
        }
        let exponent = &self.order - 2u32;
        Ok(value.modpow(&exponent, &self.order))
    }

    /// Scalar additive inverse.
    pub fn neg_scalar(&self, value: &BigUint) -> BigUint {
        let value = value % &self.order;
        if value.is_zero() { value } else { &self.order - value }
    }

    /// Scalar subtraction, `lhs - rhs` in the field.
    pub fn sub_scalar(&self, lhs: &BigUint, rhs: &BigUint) -> BigUint {
        ((lhs % &self.order) + self.neg_scalar(rhs)) % &self.order
    }

    fn require_member(&self, array: &FieldArray) -> Result<(), FieldError> {
        if array.order != self.order {
            return Err(FieldError::FieldMismatch);
        }
        Ok(())
    }

    fn require_compatible(&self, lhs: &FieldArray, rhs: &FieldArray) -> Result<(), FieldError> {
        self.require_member(lhs)?;
        self.require_member(rhs)?;
        if lhs.shape != rhs.shape {
            return Err(FieldError::ShapeMismatch(lhs.shape.clone(), rhs.shape.clone()));
        }
        Ok(())
    }

    /// Constructs an array from untrusted values, verifying membership.
    pub fn array(&self, values: Vec<BigUint>, shape: &[usize]) -> Result<FieldArray, FieldError> {
        let count: usize = shape.iter().product();
        if values.len() != count {
            return Err(FieldError::InvalidReshape { count: values.len(), shape: shape.to_vec() });
        }
        if values.iter().any(|value| value >= &self.order) {
            return Err(FieldError::Overflow);
        }
        Ok(FieldArray { order: self.order.clone(), shape: shape.to_vec(), data: values })
    }

    /// Constructs an array filled with a single value, reduced into the field.
    pub fn full(&self, shape: &[usize], fill: BigUint) -> FieldArray {
        let fill = fill % &self.order;
        let count: usize = shape.iter().product();
        FieldArray { order: self.order.clone(), shape: shape.to_vec(), data: vec![fill; count] }
    }

    /// An array of zeros.
    pub fn zeros(&self, shape: &[usize]) -> FieldArray {
        self.full(shape, BigUint::zero())
    }

    /// An array of ones.
    pub fn ones(&self, shape: &[usize]) -> FieldArray {
        self.full(shape, BigUint::one())
    }

    /// Samples an array of uniformly distributed field elements.
    ///
    /// Each element consumes [Field::bytes] bytes from `rng`, interpreted
    /// big-endian and reduced modulo the order. The modulus bias is
    /// negligible when the order is close to a power of two.
    pub fn uniform<R: RngCore>(&self, shape: &[usize], rng: &mut R) -> FieldArray {
        let count: usize = shape.iter().product();
        let mut buffer = vec![0u8; self.bytes];
        let mut data = Vec::with_capacity(count);
        for _ in 0..count {
            rng.fill_bytes(&mut buffer);
            data.push(BigUint::from_bytes_be(&buffer) % &self.order);
        }
        FieldArray { order: self.order.clone(), shape: shape.to_vec(), data }
    }

    /// Elementwise sum of two arrays.
    pub fn add(&self, lhs: &FieldArray, rhs: &FieldArray) -> Result<FieldArray, FieldError> {
        self.require_compatible(lhs, rhs)?;
        let data = lhs
            .data
            .iter()
            .zip(rhs.data.iter())
            .map(|(a, b)| (a + b) % &self.order)
            .collect();
        Ok(FieldArray { order: self.order.clone(), shape: lhs.shape.clone(), data })
    }

    /// Elementwise difference of two arrays.
    pub fn sub(&self, lhs: &FieldArray, rhs: &FieldArray) -> Result<FieldArray, FieldError> {
        self.require_compatible(lhs, rhs)?;
        let data = lhs
            .data
            .iter()
            .zip(rhs.data.iter())
            .map(|(a, b)| self.sub_scalar(a, b))
            .collect();
        Ok(FieldArray { order: self.order.clone(), shape: lhs.shape.clone(), data })
    }

    /// Elementwise product of two arrays.
    pub fn mul(&self, lhs: &FieldArray, rhs: &FieldArray) -> Result<FieldArray, FieldError> {
        self.require_compatible(lhs, rhs)?;
        let data = lhs
            .data
            .iter()
            .zip(rhs.data.iter())
            .map(|(a, b)| (a * b) % &self.order)
            .collect();
        Ok(FieldArray { order: self.order.clone(), shape: lhs.shape.clone(), data })
    }

    /// Elementwise additive inverse.
    pub fn neg(&self, operand: &FieldArray) -> Result<FieldArray, FieldError> {
        self.require_member(operand)?;
        let data = operand.data.iter().map(|value| self.neg_scalar(value)).collect();
        Ok(FieldArray { order: self.order.clone(), shape: operand.shape.clone(), data })
    }

    /// Elementwise product with a scalar.
    pub fn mul_scalar(&self, operand: &FieldArray, scalar: &BigUint) -> Result<FieldArray, FieldError> {
        self.require_member(operand)?;
        let scalar = scalar % &self.order;
        let data = operand.data.iter().map(|value| (value * &scalar) % &self.order).collect();
        Ok(FieldArray { order: self.order.clone(), shape: operand.shape.clone(), data })
    }

    /// Elementwise exponentiation by a public scalar exponent.
    pub fn pow(&self, operand: &FieldArray, exponent: &BigUint) -> Result<FieldArray, FieldError> {
        self.require_member(operand)?;
        let data = operand.data.iter().map(|value| value.modpow(exponent, &self.order)).collect();
        Ok(FieldArray { order: self.order.clone(), shape: operand.shape.clone(), data })
    }

    /// Reduces all elements to their sum, returned as a scalar-shaped array.
    pub fn sum(&self, operand: &FieldArray) -> Result<FieldArray, FieldError> {
        self.require_member(operand)?;
        let mut total = BigUint::zero();
        for value in &operand.data {
            total = (total + value) % &self.order;
        }
        Ok(FieldArray { order: self.order.clone(), shape: Vec::new(), data: vec![total] })
    }

    /// In-place elementwise sum.
    pub fn add_assign(&self, lhs: &mut FieldArray, rhs: &FieldArray) -> Result<(), FieldError> {
        self.require_compatible(lhs, rhs)?;
        for (a, b) in lhs.data.iter_mut().zip(rhs.data.iter()) {
            *a = (&*a + b) % &self.order;
        }
        Ok(())
    }

    /// In-place elementwise difference.
    pub fn sub_assign(&self, lhs: &mut FieldArray, rhs: &FieldArray) -> Result<(), FieldError> {
        self.require_compatible(lhs, rhs)?;
        for (a, b) in lhs.data.iter_mut().zip(rhs.data.iter()) {
            *a = self.sub_scalar(a, b);
        }
        Ok(())
    }
}

impl Default for Field {
    fn default() -> Self {
        // The default order is prime, so this cannot fail.
        Field::new(BigUint::from(DEFAULT_ORDER)).expect("default field order is prime")
    }
}

impl Debug for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Field(order={})", self.order)
    }
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "GF({})", self.order)
    }
}

/// A multi-dimensional array of field elements.
///
/// Arrays are value types: callers may freely clone them, and the elements
/// are stored contiguously in row-major order. A scalar is represented by
/// the empty shape, which holds exactly one element.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldArray {
    order: BigUint,
    shape: Vec<usize>,
    data: Vec<BigUint>,
}

impl FieldArray {
    /// The order of the field this array belongs to.
    pub fn order(&self) -> &BigUint {
        &self.order
    }

    /// The shape of the array.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The elements in row-major order.
    pub fn as_slice(&self) -> &[BigUint] {
        &self.data
    }

    /// Iterates the elements in row-major order.
    pub fn iter(&self) -> std::slice::Iter<'_, BigUint> {
        self.data.iter()
    }

    /// The element at the given flat index.
    pub fn get(&self, index: usize) -> &BigUint {
        &self.data[index]
    }

    /// Returns a copy with a new shape holding the same elements.
    pub fn reshape(&self, shape: &[usize]) -> Result<FieldArray, FieldError> {
        let count: usize = shape.iter().product();
        if count != self.data.len() {
            return Err(FieldError::InvalidReshape { count: self.data.len(), shape: shape.to_vec() });
        }
        Ok(FieldArray { order: self.order.clone(), shape: shape.to_vec(), data: self.data.clone() })
    }

    /// Splits off the last axis, returning one row per outer index.
    ///
    /// For a shape `[d0, .., dk, w]` the result holds `d0 * .. * dk` arrays
    /// of shape `[w]`.
    pub fn rows(&self) -> Vec<FieldArray> {
        let width = *self.shape.last().unwrap_or(&1);
        if width == 0 {
            return Vec::new();
        }
        self.data
            .chunks(width)
            .map(|chunk| FieldArray {
                order: self.order.clone(),
                shape: vec![width],
                data: chunk.to_vec(),
            })
            .collect()
    }

    /// Extracts position `index` of the last axis across every outer index.
    ///
    /// For a shape `[d0, .., dk, w]` the result has shape `[d0 * .. * dk]`
    /// and holds element `index` of each row.
    pub fn last_axis_column(&self, index: usize) -> FieldArray {
        let width = *self.shape.last().unwrap_or(&1);
        let data: Vec<BigUint> =
            self.data.chunks(width).map(|chunk| chunk[index].clone()).collect();
        let count = data.len();
        FieldArray { order: self.order.clone(), shape: vec![count], data }
    }

    /// Interleaves per-position columns back into rows along a new last axis.
    ///
    /// The inverse of [FieldArray::last_axis_column] over all positions:
    /// `columns[i]` supplies position `i` of every row.
    pub fn from_columns(columns: &[FieldArray], shape: &[usize]) -> Result<FieldArray, FieldError> {
        let width = columns.len();
        let order = match columns.first() {
            Some(first) => first.order.clone(),
            None => return Err(FieldError::InvalidReshape { count: 0, shape: shape.to_vec() }),
        };
        let rows = columns[0].len();
        let mut data = Vec::with_capacity(rows * width);
        for row in 0..rows {
            for column in columns {
                if column.order != order || column.len() != rows {
                    return Err(FieldError::FieldMismatch);
                }
                data.push(column.data[row].clone());
            }
        }
        let count: usize = shape.iter().product();
        if data.len() != count {
            return Err(FieldError::InvalidReshape { count: data.len(), shape: shape.to_vec() });
        }
        Ok(FieldArray { order, shape: shape.to_vec(), data })
    }
}

impl Debug for FieldArray {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "FieldArray(shape={:?}, data={:?}, order={})", self.shape, self.data, self.order)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    fn small_field() -> Field {
        Field::new(BigUint::from(127u32)).unwrap()
    }

    #[test]
    fn default_field_order() {
        let field = Field::default();
        assert_eq!(field.order(), &BigUint::from(DEFAULT_ORDER));
        assert_eq!(field.bits(), 64);
        assert_eq!(field.bytes(), 8);
    }

    #[rstest]
    #[case(0u64)]
    #[case(1u64)]
    #[case(4u64)]
    #[case(18446744073709551556u64)]
    fn invalid_orders(#[case] order: u64) {
        assert!(Field::new(BigUint::from(order)).is_err());
    }

    #[test]
    fn closure() {
        let field = small_field();
        let mut rng = rand::thread_rng();
        let a = field.uniform(&[16], &mut rng);
        let b = field.uniform(&[16], &mut rng);
        for result in [
            field.add(&a, &b).unwrap(),
            field.sub(&a, &b).unwrap(),
            field.mul(&a, &b).unwrap(),
            field.neg(&a).unwrap(),
        ] {
            assert!(result.iter().all(|value| value < field.order()));
        }
    }

    #[test]
    fn subtraction_wraps() {
        let field = small_field();
        let a = field.full(&[], 3u32.into());
        let b = field.full(&[], 5u32.into());
        let difference = field.sub(&a, &b).unwrap();
        assert_eq!(difference.get(0), &BigUint::from(125u32));
    }

    #[test]
    fn scalar_inverse() {
        let field = small_field();
        for value in 1u32..127 {
            let value = BigUint::from(value);
            let inverse = field.inv_scalar(&value).unwrap();
            assert_eq!((value * inverse) % field.order(), BigUint::one());
        }
        assert!(field.inv_scalar(&BigUint::zero()).is_err());
    }

    #[test]
    fn mismatched_shapes() {
        let field = small_field();
        let a = field.zeros(&[2]);
        let b = field.zeros(&[3]);
        assert!(matches!(field.add(&a, &b), Err(FieldError::ShapeMismatch(_, _))));
    }

    #[test]
    fn mismatched_fields() {
        let f1 = small_field();
        let f2 = Field::default();
        let a = f1.zeros(&[2]);
        let b = f2.zeros(&[2]);
        assert!(matches!(f1.add(&a, &b), Err(FieldError::FieldMismatch)));
    }

    #[test]
    fn scalar_shape_holds_one_element() {
        let field = small_field();
        let scalar = field.zeros(&[]);
        assert_eq!(scalar.len(), 1);
        assert!(scalar.shape().is_empty());
    }

    #[test]
    fn sum_reduces() {
        let field = small_field();
        let a = field.array(vec![100u32.into(), 100u32.into(), 100u32.into()], &[3]).unwrap();
        let total = field.sum(&a).unwrap();
        assert_eq!(total.get(0), &BigUint::from(300u32 % 127));
    }

    #[test]
    fn uniform_is_in_field() {
        let field = Field::default();
        let mut rng = rand::thread_rng();
        let sample = field.uniform(&[64], &mut rng);
        assert!(sample.iter().all(|value| value < field.order()));
    }

    #[test]
    fn rows_splits_last_axis() {
        let field = small_field();
        let values = (0u32..6).map(BigUint::from).collect();
        let array = field.array(values, &[2, 3]).unwrap();
        let rows = array.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].as_slice(), &[0u32.into(), 1u32.into(), 2u32.into()]);
        assert_eq!(rows[1].as_slice(), &[3u32.into(), 4u32.into(), 5u32.into()]);
    }

    #[test]
    fn serde_round_trip() {
        let field = small_field();
        let array = field.array(vec![1u32.into(), 2u32.into()], &[2]).unwrap();
        let bytes = bincode::serialize(&array).unwrap();
        let restored: FieldArray = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored, array);
    }
}
