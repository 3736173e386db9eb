//! Random number generation for the Monte-Carlo computations
//!
//! This wraps a xoshiro generator from the rand ecosystem behind a small
//! facade, so that the Monte-Carlo kernels only see the handful of draws they
//! actually need.

use crate::numeric::Float;
use rand::{Rng, SeedableRng};
use rand_distr::{Exp1, StandardNormal};

/// Random number generation engine in use
type Engine = rand_xoshiro::Xoshiro256Plus;

/// Seed used when the configuration does not provide one
pub const DEFAULT_SEED: u64 = 12345;

/// Facade over the rand crate's generator
#[derive(Clone)]
pub struct RandomGenerator {
    rng: Engine,
}
//
impl RandomGenerator {
    /// Spawn a new random number generator from a seed
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Engine::seed_from_u64(seed),
        }
    }

    /// Generate a random floating-point number between 0 and 1
    pub fn random(&mut self) -> Float {
        self.rng.gen()
    }

    /// Draw from a normal distribution (a negative width is taken in absolute
    /// value, a zero width returns the mean)
    pub fn normal(&mut self, mean: Float, std_dev: Float) -> Float {
        let z: Float = self.rng.sample(StandardNormal);
        mean + std_dev.abs() * z
    }

    /// Draw from an exponential distribution of given mean
    pub fn exponential(&mut self, mean: Float) -> Float {
        let e: Float = self.rng.sample(Exp1);
        mean * e
    }

    /// Advance state as if 2^128 numbers had been drawn
    ///
    /// Every Monte-Carlo batch starts from its own jumped state, which keeps
    /// batches statistically independent and makes results independent of
    /// how batches are scheduled.
    ///
    pub fn jump(&mut self) {
        self.rng.jump();
    }
}
//
impl Default for RandomGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = RandomGenerator::new(7);
        let mut b = RandomGenerator::new(7);
        for _ in 0..100 {
            assert_eq!(a.random(), b.random());
        }
    }

    #[test]
    fn jump_changes_the_stream() {
        let mut a = RandomGenerator::new(7);
        let mut b = a.clone();
        b.jump();
        assert_ne!(a.random(), b.random());
    }

    #[test]
    fn exponential_mean_is_close() {
        let mut rng = RandomGenerator::new(1);
        let n = 200_000;
        let mean = (0..n).map(|_| rng.exponential(2.0)).sum::<Float>() / n as Float;
        assert!((mean - 2.0).abs() < 0.03, "mean was {mean}");
    }

    #[test]
    fn normal_moments_are_close() {
        let mut rng = RandomGenerator::new(3);
        let n = 200_000;
        let draws = (0..n).map(|_| rng.normal(5.0, 0.5)).collect::<Vec<_>>();
        let mean = draws.iter().sum::<Float>() / n as Float;
        let var = draws.iter().map(|x| (x - mean).powi(2)).sum::<Float>() / n as Float;
        assert!((mean - 5.0).abs() < 0.01);
        assert!((var.sqrt() - 0.5).abs() < 0.01);
        assert_eq!(rng.normal(1.0, 0.0), 1.0);
    }
}
