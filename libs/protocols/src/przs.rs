//! Pseudorandom zero sharing.
//!
//! The Cramer-Damgard-Ishai trick: after a single ring exchange of seeds,
//! every player can locally draw values that sum to zero across the whole
//! communicator, with no further communication.

use crate::errors::ProtocolError;
use cicada_communicator::{tags, SocketCommunicator};
use cicada_math::{Field, FieldArray};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// A pseudorandom zero-sharing generator.
///
/// Construction is a collective operation: player r sends its seed to
/// player (r+1) mod n and seeds two generators with (own seed, received
/// seed). Because player r's first generator matches player (r+1)'s
/// second, the per-player outputs of [Przs::zero_sharing] cancel.
///
/// Every player must request identical shapes in lock-step; a divergence
/// silently desynchronizes the streams and only shows up as a mismatched
/// reveal later.
pub struct Przs {
    field: Field,
    g0: ChaCha20Rng,
    g1: ChaCha20Rng,
}

impl Przs {
    /// Exchanges seeds over the communicator and builds the generator pair.
    pub fn new(
        communicator: &SocketCommunicator,
        field: Field,
        seed: u64,
    ) -> Result<Self, ProtocolError> {
        let world_size = communicator.world_size();
        let prev_seed = if world_size >= 2 {
            let next = (communicator.rank() + 1) % world_size;
            let prev = (communicator.rank() + world_size - 1) % world_size;
            let request = communicator.isend(&seed, next, tags::PRZS)?;
            let mut response = communicator.irecv::<u64>(prev, tags::PRZS)?;
            request.wait()?;
            response.wait()?;
            response.into_value().expect("waited receive has a value")
        } else {
            seed
        };

        Ok(Przs {
            field,
            g0: ChaCha20Rng::seed_from_u64(seed),
            g1: ChaCha20Rng::seed_from_u64(prev_seed),
        })
    }

    /// The field values are drawn from.
    pub fn field(&self) -> &Field {
        &self.field
    }

    /// Generates an array of field values that sum to zero across players.
    pub fn zero_sharing(&mut self, shape: &[usize]) -> FieldArray {
        let mut sharing = self.field.uniform(shape, &mut self.g0);
        let mask = self.field.uniform(shape, &mut self.g1);
        self.field
            .sub_assign(&mut sharing, &mask)
            .expect("identically shaped samples are compatible");
        sharing
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::errors::ProtocolError;
    use cicada_communicator::run_local;
    use cicada_math::BigUint;
    use num_traits::Zero;
    use rstest::rstest;

    #[rstest]
    #[case(2)]
    #[case(3)]
    #[case(5)]
    fn outputs_sum_to_zero(#[case] world_size: usize) {
        let results = run_local(world_size, |comm| {
            let field = Field::default();
            let mut przs = Przs::new(&comm, field.clone(), 1000 + comm.rank() as u64)?;
            let sharing = przs.zero_sharing(&[8]);
            Ok::<_, ProtocolError>(comm.all_gather(&sharing)?)
        });
        for result in results {
            let sharings = result.expect("player failed");
            let field = Field::default();
            let mut total = field.zeros(&[8]);
            for sharing in &sharings {
                field.add_assign(&mut total, sharing).unwrap();
            }
            assert!(total.iter().all(BigUint::is_zero));
        }
    }

    #[test]
    fn solo_player_still_sums_to_zero() {
        let results = run_local(1, |comm| {
            let field = Field::default();
            let mut przs = Przs::new(&comm, field, 42)?;
            Ok::<_, ProtocolError>(przs.zero_sharing(&[4]))
        });
        let sharing = results.into_iter().next().unwrap().unwrap();
        assert!(sharing.iter().all(BigUint::is_zero));
    }

    #[test]
    fn deterministic_given_seeds() {
        let player = |comm: cicada_communicator::SocketCommunicator| {
            let field = Field::default();
            let mut przs = Przs::new(&comm, field, 7 + comm.rank() as u64)?;
            Ok::<_, ProtocolError>((przs.zero_sharing(&[4]), comm.rank()))
        };
        let results = run_local(3, player);
        let again = run_local(3, player);
        for (first, second) in results.into_iter().zip(again) {
            assert_eq!(first.unwrap(), second.unwrap());
        }
    }
}
