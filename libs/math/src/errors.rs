//! Math errors.

/// An error when constructing or operating on a field.
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    /// The requested order is not an odd prime.
    #[error("field order must be an odd prime")]
    InvalidOrder,

    /// The operands belong to different fields.
    #[error("arrays belong to different fields")]
    FieldMismatch,

    /// The operand shapes disagree.
    #[error("array shapes do not match: {0:?} vs {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    /// A value is too large to be a member of the field.
    #[error("value is not a member of the field")]
    Overflow,

    /// A reshape that changes the element count.
    #[error("cannot reshape {count} elements into {shape:?}")]
    InvalidReshape {
        /// The element count of the array.
        count: usize,
        /// The requested shape.
        shape: Vec<usize>,
    },
}

/// Attempted to invert or divide by zero.
#[derive(Debug, thiserror::Error)]
#[error("division by zero")]
pub struct DivByZero;

/// An error during Lagrange interpolation.
#[derive(Debug, thiserror::Error)]
pub enum InterpolationError {
    /// The abscissas are not distinct nonzero field elements.
    #[error("abscissas must be distinct and nonzero")]
    InvalidAbscissas,

    /// The number of ordinates does not match the number of abscissas.
    #[error("expected {expected} ordinates, got {actual}")]
    MismatchedOrdinates {
        /// The number of abscissas the polynomial was built with.
        expected: usize,
        /// The number of ordinates provided.
        actual: usize,
    },

    /// An inversion failed while computing coefficients.
    #[error(transparent)]
    DivByZero(#[from] DivByZero),
}
