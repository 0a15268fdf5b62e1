//! Encodings between application values and field arrays.
//!
//! An [Encoding] is a stateless strategy that maps application-level
//! scalars into elements of a [Field] and back. The supported application
//! value kinds are gathered in [Scalars], a tagged array type, so protocol
//! suites can be configured with any encoding at runtime.

pub mod errors;

pub use errors::EncodingError;

use cicada_math::{BigUint, Field, FieldArray};
use num_traits::{FromPrimitive, One, ToPrimitive, Zero};

/// A flat array of application-level values awaiting encoding.
///
/// The shape is supplied separately when encoding; decoded results are
/// returned flat in row-major order alongside the field array's shape.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalars {
    /// Real values, used with [Encoding::FixedPoint].
    Reals(Vec<f64>),

    /// Nonnegative integers already reduced into the field.
    Integers(Vec<BigUint>),

    /// Bit values, each exactly zero or one.
    Bits(Vec<u8>),

    /// Boolean values.
    Booleans(Vec<bool>),
}

impl Scalars {
    /// A single real value.
    pub fn real(value: f64) -> Self {
        Scalars::Reals(vec![value])
    }

    /// A single integer value.
    pub fn integer(value: impl Into<BigUint>) -> Self {
        Scalars::Integers(vec![value.into()])
    }

    /// The number of values.
    pub fn len(&self) -> usize {
        match self {
            Scalars::Reals(values) => values.len(),
            Scalars::Integers(values) => values.len(),
            Scalars::Bits(values) => values.len(),
            Scalars::Booleans(values) => values.len(),
        }
    }

    /// True when there are no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The real values, if this holds reals.
    pub fn as_reals(&self) -> Option<&[f64]> {
        match self {
            Scalars::Reals(values) => Some(values),
            _ => None,
        }
    }

    /// The integer values, if this holds integers.
    pub fn as_integers(&self) -> Option<&[BigUint]> {
        match self {
            Scalars::Integers(values) => Some(values),
            _ => None,
        }
    }

    /// The bit values, if this holds bits.
    pub fn as_bits(&self) -> Option<&[u8]> {
        match self {
            Scalars::Bits(values) => Some(values),
            _ => None,
        }
    }

    /// The boolean values, if this holds booleans.
    pub fn as_booleans(&self) -> Option<&[bool]> {
        match self {
            Scalars::Booleans(values) => Some(values),
            _ => None,
        }
    }
}

/// A bijection between application values and field elements.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// Passes field members through unmodified.
    Identity,

    /// Maps bit values into the field, rejecting anything but zero and one.
    Bits,

    /// Maps truthiness into the field: nonzero encodes as one.
    Boolean,

    /// Fixed-point reals with the given fractional precision in bits.
    FixedPoint(FixedPoint),
}

impl Encoding {
    /// The conventional fixed-point encoding with 16 fractional bits.
    pub fn default_fixed_point() -> Self {
        Encoding::FixedPoint(FixedPoint::new(16))
    }

    /// Converts application values into a field array of the given shape.
    pub fn encode(
        &self,
        values: &Scalars,
        shape: &[usize],
        field: &Field,
    ) -> Result<FieldArray, EncodingError> {
        let count: usize = shape.iter().product();
        if values.len() != count {
            return Err(EncodingError::ShapeMismatch { count: values.len(), shape: shape.to_vec() });
        }
        match self {
            Encoding::Identity => {
                let values = values.as_integers().ok_or(EncodingError::Domain)?;
                if values.iter().any(|value| value >= field.order()) {
                    return Err(EncodingError::Overflow);
                }
                Ok(field.array(values.to_vec(), shape)?)
            }
            Encoding::Bits => {
                let values = values.as_bits().ok_or(EncodingError::Domain)?;
                if values.iter().any(|bit| *bit > 1) {
                    return Err(EncodingError::Domain);
                }
                let elements = values.iter().map(|bit| BigUint::from(*bit)).collect();
                Ok(field.array(elements, shape)?)
            }
            Encoding::Boolean => {
                let elements = match values {
                    Scalars::Booleans(values) => {
                        values.iter().map(|flag| BigUint::from(*flag as u8)).collect()
                    }
                    Scalars::Integers(values) => values
                        .iter()
                        .map(|value| if value.is_zero() { BigUint::zero() } else { BigUint::one() })
                        .collect(),
                    _ => return Err(EncodingError::Domain),
                };
                Ok(field.array(elements, shape)?)
            }
            Encoding::FixedPoint(fixed) => {
                let values = values.as_reals().ok_or(EncodingError::Domain)?;
                fixed.encode(values, shape, field)
            }
        }
    }

    /// Converts a field array back into application values.
    pub fn decode(&self, array: &FieldArray, field: &Field) -> Result<Scalars, EncodingError> {
        if array.order() != field.order() {
            return Err(EncodingError::FieldMismatch);
        }
        match self {
            Encoding::Identity => Ok(Scalars::Integers(array.as_slice().to_vec())),
            Encoding::Bits => {
                let mut bits = Vec::with_capacity(array.len());
                for value in array.iter() {
                    if value > &BigUint::one() {
                        return Err(EncodingError::Domain);
                    }
                    bits.push(value.to_u8().unwrap_or(0));
                }
                Ok(Scalars::Bits(bits))
            }
            Encoding::Boolean => {
                Ok(Scalars::Booleans(array.iter().map(|value| !value.is_zero()).collect()))
            }
            Encoding::FixedPoint(fixed) => Ok(Scalars::Reals(fixed.decode(array, field))),
        }
    }
}

/// Fixed-point encoding of reals with `precision` fractional bits.
///
/// A real x maps to `floor(x * 2^precision) mod order`, with the range
/// check `|x * 2^precision| < order / 2`. Decoding maps the upper half of
/// the field to negative values and divides the scale back out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixedPoint {
    precision: u32,
}

impl FixedPoint {
    /// Constructs an encoding with the given fractional precision.
    pub fn new(precision: u32) -> Self {
        FixedPoint { precision }
    }

    /// The number of fractional bits.
    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// The scale factor 2^precision as a float.
    fn scale(&self) -> f64 {
        (2.0f64).powi(self.precision as i32)
    }

    fn encode(
        &self,
        values: &[f64],
        shape: &[usize],
        field: &Field,
    ) -> Result<FieldArray, EncodingError> {
        let posbound = field
            .posbound()
            .to_f64()
            .ok_or(EncodingError::Overflow)?;
        let mut elements = Vec::with_capacity(values.len());
        for value in values {
            let scaled = value * self.scale();
            if !scaled.is_finite() || scaled.abs() >= posbound {
                return Err(EncodingError::Overflow);
            }
            let magnitude =
                BigUint::from_f64(scaled.abs().trunc()).ok_or(EncodingError::Overflow)?;
            let element = if scaled < 0.0 { field.neg_scalar(&magnitude) } else { field.element(magnitude) };
            elements.push(element);
        }
        Ok(field.array(elements, shape)?)
    }

    fn decode(&self, array: &FieldArray, field: &Field) -> Vec<f64> {
        array
            .iter()
            .map(|value| {
                if field.is_negative(value) {
                    let magnitude = field.order() - value;
                    -(magnitude.to_f64().unwrap_or(f64::INFINITY)) / self.scale()
                } else {
                    value.to_f64().unwrap_or(f64::INFINITY) / self.scale()
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    fn field() -> Field {
        Field::default()
    }

    #[rstest]
    #[case(0.0)]
    #[case(1.0)]
    #[case(-1.0)]
    #[case(3.75)]
    #[case(-2.0625)]
    #[case(40960.5)]
    fn fixed_point_round_trip(#[case] value: f64) {
        let field = field();
        let encoding = Encoding::default_fixed_point();
        let encoded = encoding.encode(&Scalars::real(value), &[], &field).unwrap();
        let decoded = encoding.decode(&encoded, &field).unwrap();
        assert_eq!(decoded.as_reals().unwrap(), &[value]);
    }

    #[test]
    fn fixed_point_truncates_excess_precision() {
        let field = field();
        let encoding = Encoding::FixedPoint(FixedPoint::new(2));
        // 0.3 * 4 = 1.2, truncated to 1, decoding to 0.25.
        let encoded = encoding.encode(&Scalars::real(0.3), &[], &field).unwrap();
        let decoded = encoding.decode(&encoded, &field).unwrap();
        assert_eq!(decoded.as_reals().unwrap(), &[0.25]);
    }

    #[test]
    fn fixed_point_overflow() {
        let field = field();
        let encoding = Encoding::default_fixed_point();
        let huge = Scalars::real(1e18);
        assert!(matches!(
            encoding.encode(&huge, &[], &field),
            Err(EncodingError::Overflow)
        ));
    }

    #[test]
    fn bits_rejects_non_binary() {
        let field = field();
        let encoding = Encoding::Bits;
        let result = encoding.encode(&Scalars::Bits(vec![0, 1, 2]), &[3], &field);
        assert!(matches!(result, Err(EncodingError::Domain)));
    }

    #[test]
    fn bits_round_trip() {
        let field = field();
        let encoding = Encoding::Bits;
        let bits = Scalars::Bits(vec![1, 0, 1, 1]);
        let encoded = encoding.encode(&bits, &[4], &field).unwrap();
        assert_eq!(encoding.decode(&encoded, &field).unwrap(), bits);
    }

    #[test]
    fn boolean_coerces_truthy_integers() {
        let field = field();
        let encoding = Encoding::Boolean;
        let values = Scalars::Integers(vec![0u32.into(), 7u32.into()]);
        let encoded = encoding.encode(&values, &[2], &field).unwrap();
        let decoded = encoding.decode(&encoded, &field).unwrap();
        assert_eq!(decoded.as_booleans().unwrap(), &[false, true]);
    }

    #[test]
    fn identity_passes_members_through() {
        let field = field();
        let encoding = Encoding::Identity;
        let values = Scalars::Integers(vec![5u32.into()]);
        let encoded = encoding.encode(&values, &[], &field).unwrap();
        assert_eq!(encoding.decode(&encoded, &field).unwrap(), values);
    }

    #[test]
    fn identity_rejects_out_of_range() {
        let field = field();
        let encoding = Encoding::Identity;
        let values = Scalars::Integers(vec![field.order().clone()]);
        assert!(matches!(encoding.encode(&values, &[], &field), Err(EncodingError::Overflow)));
    }

    #[test]
    fn wrong_field_on_decode() {
        let big = field();
        let small = Field::new(BigUint::from(127u32)).unwrap();
        let encoding = Encoding::Identity;
        let encoded = encoding.encode(&Scalars::integer(5u32), &[], &small).unwrap();
        assert!(matches!(encoding.decode(&encoded, &big), Err(EncodingError::FieldMismatch)));
    }

    #[test]
    fn shape_mismatch() {
        let field = field();
        let encoding = Encoding::Bits;
        let result = encoding.encode(&Scalars::Bits(vec![1, 0]), &[3], &field);
        assert!(matches!(result, Err(EncodingError::ShapeMismatch { .. })));
    }
}
