//! Privacy-preserving computation protocol suites.
//!
//! Three suites share a common surface: [additive::AdditiveProtocolSuite]
//! (semi-honest additive secret sharing), [shamir::ShamirProtocolSuite]
//! (threshold Shamir sharing), and [active::ActiveProtocolSuite], which
//! pairs the two and adds consistency verification for honest-majority
//! security with abort.

pub mod active;
pub mod additive;
pub mod errors;
pub mod przs;
pub mod shamir;
pub mod transcript;

pub use active::{ActiveArrayShare, ActiveProtocolSuite};
pub use additive::{AdditiveArrayShare, AdditiveProtocolSuite};
pub use errors::ProtocolError;
pub use przs::Przs;
pub use shamir::{ShamirArrayShare, ShamirProtocolSuite};

/// Randomness configuration shared by the protocol suites.
///
/// With no seed, every generator is drawn from operating-system entropy.
/// Supplying a seed enables deterministic runs: each player derives its
/// generators from `seed + seed_offset`, where the offset defaults to the
/// player's rank so that players never share streams.
#[derive(Clone, Debug, Default)]
pub struct SuiteOptions {
    /// Base seed for deterministic randomness, or `None` for OS entropy.
    pub seed: Option<u64>,

    /// Per-player seed offset; defaults to the player's rank.
    pub seed_offset: Option<u64>,
}

impl SuiteOptions {
    /// Deterministic options with the given base seed.
    pub fn seeded(seed: u64) -> Self {
        SuiteOptions { seed: Some(seed), seed_offset: None }
    }
}

/// Derives the (PRZS seed, local generator seed) pair for one player.
pub(crate) fn suite_seed(options: &SuiteOptions, rank: usize) -> (u64, Option<u64>) {
    match options.seed {
        Some(seed) => {
            let offset = options.seed_offset.unwrap_or(rank as u64);
            let effective = seed.wrapping_add(offset);
            // Distinct stream for local sampling so that PRZS consumption
            // never influences mask generation.
            (effective, Some(effective.wrapping_mul(0x9E3779B97F4A7C15).wrapping_add(1)))
        }
        None => (rand::random(), None),
    }
}
