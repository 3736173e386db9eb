//! Multi-threaded back-end of the Monte-Carlo scheduler

#[cfg(feature = "faster-threading")]
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{random::RandomGenerator, resacc::Accumulator, scheduling::BatchPlan};

use std::sync::Mutex;

/// Process the batches as rayon tasks
///
/// Every batch gets the generator state that the sequential back-end would
/// give it, so in the default reproducible mode both back-ends produce the
/// same numbers.
///
pub(super) fn run_batches_impl<A: Accumulator>(
    plan: BatchPlan,
    mut rng: RandomGenerator,
    kernel: impl Send + Sync + Fn(usize, &mut RandomGenerator) -> A,
) -> A {
    let num_batches = plan.num_batches();

    // The results of parallel tasks will be aggregated...
    let accumulator = {
        // ...in a way that is optimized for numerical reproduciblity
        #[cfg(not(feature = "faster-threading"))]
        {
            ReproducibleAccumulator::new(num_batches)
        }

        // ...in a way that is optimized for computational performance
        #[cfg(feature = "faster-threading")]
        {
            FastAccumulator::new(num_batches)
        }
    };

    // This function is a synchronization scope: it will only return
    // once all inner tasks have been executed
    rayon::scope(|scope| {
        for batch_id in 0..num_batches {
            let batch_size = plan.batch_len(batch_id);
            let mut task_rng = rng.clone();
            let accumulator_ref = &accumulator;
            let kernel_ref = &kernel;
            scope.spawn(move |_| {
                let result = kernel_ref(batch_size, &mut task_rng);
                accumulator_ref.set_task_result(batch_id, result);
            });
            rng.jump();
        }
    });

    accumulator.get_merged_result()
}

/// Reproducibility-optimized results accumulation mechanism
#[cfg(not(feature = "faster-threading"))]
struct ReproducibleAccumulator<A> {
    /// Storage for the intermediary results of parallel tasks
    results: Box<[Mutex<Option<A>>]>,
}
//
#[cfg(not(feature = "faster-threading"))]
impl<A: Accumulator> ReproducibleAccumulator<A> {
    /// Set up results storage for N parallel tasks
    fn new(num_tasks: usize) -> Self {
        assert!(num_tasks > 0, "There should be at least one task");
        Self {
            results: (0..num_tasks)
                .map(|_| Mutex::new(None))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    /// Record the results of the n-th task
    fn set_task_result(&self, task_id: usize, result: A) {
        let mut lock = self.results[task_id]
            .lock()
            .expect("Mutex data should be valid");
        assert!(lock.is_none(), "Tasks should not report results twice");
        *lock = Some(result);
    }

    /// Aggregate the results in batch order
    fn get_merged_result(self) -> A {
        let mut results_iter = self.results.into_vec().into_iter().map(|entry| {
            entry
                .into_inner()
                .expect("Mutex data should be valid")
                .expect("Result should be ready")
        });
        let first_result = results_iter
            .next()
            .expect("There should be at least one task");
        results_iter.fold(first_result, |mut r1, r2| {
            r1.merge(r2);
            r1
        })
    }
}

/// Speed-optimized results accumulation mechanism
#[cfg(feature = "faster-threading")]
struct FastAccumulator<A> {
    /// Storage location in which results will be merged out of order
    merged_result: Mutex<Option<A>>,

    /// Truth that each task has reported its results
    task_finished: Box<[AtomicBool]>,
}
//
#[cfg(feature = "faster-threading")]
impl<A: Accumulator> FastAccumulator<A> {
    /// Set up results storage for N parallel tasks
    fn new(num_tasks: usize) -> Self {
        assert!(num_tasks > 0, "There should be at least one task");
        Self {
            merged_result: Mutex::new(None),
            task_finished: (0..num_tasks)
                .map(|_| AtomicBool::new(false))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    /// Merge the results of the n-th task as soon as they come in
    fn set_task_result(&self, task_id: usize, result: A) {
        {
            let mut lock = self
                .merged_result
                .lock()
                .expect("Mutex data should be valid");
            match lock.as_mut() {
                None => *lock = Some(result),
                Some(accumulator) => accumulator.merge(result),
            }
        }
        let was_finished = self.task_finished[task_id].swap(true, Ordering::Relaxed);
        assert!(!was_finished, "Tasks should not set their result twice");
    }

    /// Collect the merged result
    fn get_merged_result(self) -> A {
        for ready in self.task_finished.into_vec().into_iter() {
            assert!(
                ready.load(Ordering::Relaxed),
                "All tasks should have completed their work"
            );
        }
        self.merged_result
            .into_inner()
            .expect("Mutex data should be valid")
            .expect("Result should be ready")
    }
}
