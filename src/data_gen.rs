//! Seeded input generation for reproducible runs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Deterministic key generator.
pub struct DataGenerator {
    rng: StdRng,
}

impl DataGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// `count` keys uniformly distributed over the full `u32` range.
    pub fn uniform_u32(&mut self, count: usize) -> Vec<u32> {
        (0..count).map(|_| self.rng.gen::<u32>()).collect()
    }

    /// `count` keys uniformly distributed over `[0, max]`.
    pub fn up_to(&mut self, count: usize, max: u32) -> Vec<u32> {
        (0..count).map(|_| self.rng.gen_range(0..=max)).collect()
    }
}
