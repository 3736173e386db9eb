//! This module takes care of scheduling the Monte-Carlo work, encapsulating
//! use of multiple threads

#[cfg(feature = "multi-threading")]
mod multi_threading;
#[cfg(not(feature = "multi-threading"))]
mod sequential;

use crate::{random::RandomGenerator, resacc::Accumulator};

/// Default size of the Monte-Carlo sample batches
///
/// Samples are grouped in batches in order to reduce accumulation error and
/// achieve perfect reproducibility between sequential and parallel runs. Each
/// batch draws its random numbers from its own jumped generator state.
///
/// Kernels whose samples are expensive (like numerical integrals) should use
/// smaller batches so that the work can be spread across threads.
///
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Run a Monte-Carlo computation in the manner that was configured at build
/// time.
///
/// Takes as parameters the total number of samples, the batch size, the seed
/// of the random number generator, and a kernel that processes a certain number
/// of samples given a random number generator.
///
/// Returns the merged results of all batches.
///
pub fn run_batched<A: Accumulator>(
    num_samples: usize,
    batch_size: usize,
    seed: u64,
    kernel: impl Send + Sync + Fn(usize, &mut RandomGenerator) -> A,
) -> A {
    let batch_size = batch_size.max(1);
    let plan = BatchPlan::new(num_samples, batch_size);
    let rng = RandomGenerator::new(seed);

    #[cfg(not(feature = "multi-threading"))]
    {
        sequential::run_batches_impl(plan, rng, kernel)
    }

    #[cfg(feature = "multi-threading")]
    {
        multi_threading::run_batches_impl(plan, rng, kernel)
    }
}

/// Sizes of the batches that a Monte-Carlo computation is split into
struct BatchPlan {
    /// Total number of samples
    num_samples: usize,

    /// Maximal number of samples per batch
    batch_size: usize,
}
//
impl BatchPlan {
    fn new(num_samples: usize, batch_size: usize) -> Self {
        Self {
            num_samples,
            batch_size,
        }
    }

    /// Number of batches, there is always at least one (possibly empty) batch
    fn num_batches(&self) -> usize {
        self.num_samples.div_ceil(self.batch_size).max(1)
    }

    /// Size of the n-th batch
    fn batch_len(&self, batch_id: usize) -> usize {
        let start = batch_id * self.batch_size;
        self.num_samples.saturating_sub(start).min(self.batch_size)
    }
}
