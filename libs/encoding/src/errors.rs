//! Encoding errors.

use cicada_math::FieldError;

/// An error while encoding or decoding application values.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// The value is too large for representation in the field.
    #[error("value is too large for representation in the field")]
    Overflow,

    /// The input is outside the encoding's domain.
    #[error("input is outside the encoding's domain")]
    Domain,

    /// The array was produced with a different field.
    #[error("array was encoded with a different field")]
    FieldMismatch,

    /// The number of values disagrees with the requested shape.
    #[error("cannot arrange {count} values into shape {shape:?}")]
    ShapeMismatch {
        /// The number of values provided.
        count: usize,
        /// The requested shape.
        shape: Vec<usize>,
    },

    /// An underlying field operation failed.
    #[error(transparent)]
    Field(#[from] FieldError),
}
