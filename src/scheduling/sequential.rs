//! Sequential back-end of the Monte-Carlo scheduler

use crate::{random::RandomGenerator, resacc::Accumulator, scheduling::BatchPlan};

/// Process the batches one after another
///
/// We use batched logic even in sequential mode, in order to achieve
/// reproducibility with respect to multi-threaded runs.
///
pub(super) fn run_batches_impl<A: Accumulator>(
    plan: BatchPlan,
    mut rng: RandomGenerator,
    kernel: impl Fn(usize, &mut RandomGenerator) -> A,
) -> A {
    // Initialize the accumulator with the first batch
    let mut batch_rng = rng.clone();
    let mut accumulator = kernel(plan.batch_len(0), &mut batch_rng);

    // Integrate the other batches, each from its own generator state
    for batch_id in 1..plan.num_batches() {
        rng.jump();
        let mut batch_rng = rng.clone();
        accumulator.merge(kernel(plan.batch_len(batch_id), &mut batch_rng));
    }
    accumulator
}
