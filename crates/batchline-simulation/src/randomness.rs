//! Deterministic Randomness
//!
//! Every worker draws orders and work delays from its own seeded generator,
//! so a run started with the same seed makes the same choices per worker.

//-----------------------------------------------------------------------------
// Imports
//-----------------------------------------------------------------------------

use std::ops::RangeInclusive;
use std::time::Duration;

use rand::prelude::{RngCore, SeedableRng, StdRng};
use rand::Error as RandError;
use rand::Rng;

/// A seeded PRNG that remembers its seed.
#[derive(Debug, Clone)]
pub struct SeededRng {
    rng: StdRng,
    seed: u64,
}

impl SeededRng {
    /// Creates a new RNG instance seeded with the given 64-bit seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Creates a new RNG instance from entropy.
    /// The generated seed is kept so the run can be replayed.
    pub fn from_entropy() -> Self {
        let mut entropy_rng = StdRng::from_entropy();
        let seed = entropy_rng.next_u64();
        Self::new(seed)
    }

    /// Returns the seed used to initialize this RNG.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Derive an independent generator for one stream, e.g. one worker.
    ///
    /// Depends only on the seed and `stream`, never on how much this
    /// generator has been used.
    pub fn fork(&self, stream: u64) -> SeededRng {
        // splitmix64 finalizer spreads neighbouring stream ids apart
        let mut z = self
            .seed
            .wrapping_add(stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        SeededRng::new(z ^ (z >> 31))
    }

    /// Generate a random value in the given range
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.rng.gen_range(range)
    }

    /// Sample a random element from a slice
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let index = self.gen_range(0..slice.len());
            slice.get(index)
        }
    }

    /// A duration drawn uniformly from `range`, inclusive
    pub fn duration_between(&mut self, range: RangeInclusive<Duration>) -> Duration {
        let (low, high) = (range.start().as_millis(), range.end().as_millis());
        if low >= high {
            return *range.start();
        }
        let millis = self.gen_range(low..=high);
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

// Lets SeededRng be used wherever RngCore is expected.
impl RngCore for SeededRng {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), RandError> {
        self.rng.try_fill_bytes(dest)
    }
}

//-----------------------------------------------------------------------------
// Tests
//-----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_rng_deterministic() {
        let mut rng1 = SeededRng::new(12345);
        let mut rng2 = SeededRng::new(12345);

        assert_eq!(rng1.next_u32(), rng2.next_u32());
        assert_eq!(rng1.gen_range(0..100), rng2.gen_range(0..100));
    }

    #[test]
    fn test_fork_is_stable_and_distinct() {
        let mut root = SeededRng::new(7);
        let before = root.fork(3);
        root.next_u64();
        let after = root.fork(3);

        assert_eq!(before.seed(), after.seed());
        assert_ne!(root.fork(0).seed(), root.fork(1).seed());
    }

    #[test]
    fn test_duration_between_stays_in_range() {
        let mut rng = SeededRng::new(99);
        let range = Duration::from_millis(1000)..=Duration::from_millis(2000);
        for _ in 0..200 {
            let delay = rng.duration_between(range.clone());
            assert!(range.contains(&delay), "{:?} out of range", delay);
        }

        let fixed = Duration::from_millis(5);
        assert_eq!(rng.duration_between(fixed..=fixed), fixed);
    }

    #[test]
    fn test_choose_empty_slice() {
        let mut rng = SeededRng::new(1);
        let empty: [u8; 0] = [];
        assert!(rng.choose(&empty).is_none());
        assert_eq!(rng.choose(&[42]), Some(&42));
    }

    #[test]
    fn test_from_entropy_keeps_seed() {
        let rng = SeededRng::from_entropy();
        let mut replay = SeededRng::new(rng.seed());
        let mut original = rng.clone();
        assert_eq!(original.next_u64(), replay.next_u64());
    }
}
