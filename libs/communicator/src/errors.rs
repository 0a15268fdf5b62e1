//! Communicator errors.

use cicada_transport::AddressError;

/// An error raised by communicator operations.
#[derive(Debug, thiserror::Error)]
pub enum CommunicatorError {
    /// No message arrived within the configured timeout.
    #[error("timed out waiting for tag {tag} from player {sender}")]
    Timeout {
        /// The tag that was being waited on.
        tag: i32,
        /// The rank of the expected sender.
        sender: u32,
    },

    /// The communicator was revoked by some player.
    #[error("communicator {name:?} has been revoked")]
    Revoked {
        /// The communicator name.
        name: String,
    },

    /// The communicator has been freed.
    #[error("communicator {name:?} is not running")]
    NotRunning {
        /// The communicator name.
        name: String,
    },

    /// Players could not agree on a startup token.
    #[error("token mismatch: expected {expected:?}, received {actual:?} from player {sender}")]
    TokenMismatch {
        /// The local token.
        expected: String,
        /// The token received from the offending player.
        actual: String,
        /// The rank of the offending player.
        sender: u32,
    },

    /// A nonblocking receive found no message.
    #[error("no message available for tag {tag} from player {sender}")]
    TryAgain {
        /// The tag that was polled.
        tag: i32,
        /// The rank of the expected sender.
        sender: u32,
    },

    /// Startup did not complete within the startup timeout.
    #[error("startup timed out while {phase}")]
    StartupTimeout {
        /// What the startup sequence was waiting for.
        phase: &'static str,
    },

    /// A rank outside `[0, world_size)`.
    #[error("rank {rank} is outside the world of size {world_size}")]
    InvalidRank {
        /// The offending rank.
        rank: usize,
        /// The communicator world size.
        world_size: usize,
    },

    /// A rank list with repeated entries.
    #[error("duplicate ranks are not allowed")]
    DuplicateRanks,

    /// A world size that cannot host a mesh.
    #[error("world size must be at least one, got {0}")]
    InvalidWorldSize(usize),

    /// The number of scatter values disagrees with the destinations.
    #[error("expected {expected} values, received {actual}")]
    ValueCountMismatch {
        /// The number of destination players.
        expected: usize,
        /// The number of values supplied.
        actual: usize,
    },

    /// A collective argument that is required at this rank was missing.
    #[error("player {rank} must supply a value for this operation")]
    MissingValue {
        /// The local rank.
        rank: usize,
    },

    /// A tag the communicator will not route.
    #[error("tag {0} is reserved or unknown")]
    InvalidTag(i32),

    /// A missing or malformed environment variable.
    #[error("environment variable {0} is missing or malformed")]
    Environment(&'static str),

    /// An unusable player address.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// All players of one communicator must use the same address scheme.
    #[error("player addresses must all use the same scheme")]
    MixedSchemes,

    /// A payload that could not be serialized or deserialized.
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] bincode::Error),

    /// An I/O failure on the underlying sockets.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
