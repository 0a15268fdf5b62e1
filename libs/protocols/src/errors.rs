//! Protocol errors.

use cicada_communicator::CommunicatorError;
use cicada_encoding::EncodingError;
use cicada_math::{FieldError, InterpolationError};

/// An error raised by a protocol suite operation.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Operand shares have incompatible shapes.
    #[error("operand shapes do not match: {0:?} vs {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    /// A player rank outside the communicator world.
    #[error("rank {rank} is outside the world of size {world_size}")]
    InvalidRank {
        /// The offending rank.
        rank: usize,
        /// The communicator world size.
        world_size: usize,
    },

    /// A source list with no members or repeated entries.
    #[error("source ranks must be unique and non-empty")]
    InvalidSources,

    /// A threshold the player set cannot support.
    #[error("threshold {threshold} is not valid for {world_size} players")]
    InvalidThreshold {
        /// The requested reconstruction threshold.
        threshold: usize,
        /// The communicator world size.
        world_size: usize,
    },

    /// The operation needs a fixed-point encoding or an explicit bit count.
    #[error("a fixed-point encoding or explicit bit count is required")]
    MissingPrecision,

    /// The player must supply a secret for this operation.
    #[error("player {rank} must supply a secret for this operation")]
    MissingSecret {
        /// The local rank.
        rank: usize,
    },

    /// Paired shares have fallen out of lock-step.
    #[error("secret shares are inconsistent: {0}")]
    Consistency(String),

    /// An encoding failure.
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    /// A field arithmetic failure.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// A Lagrange interpolation failure.
    #[error(transparent)]
    Interpolation(#[from] InterpolationError),

    /// A communication failure.
    #[error(transparent)]
    Communicator(#[from] CommunicatorError),
}
