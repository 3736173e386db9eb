//! This module allows integrating Monte-Carlo results across sample batches

use crate::numeric::Float;
use num_traits::Zero;
use prefix_num_ops::real::*;
use serde::Serialize;

/// Intermediary results which can be merged across batches
///
/// Merging must be associative, and the scheduler always merges batch results
/// in batch order unless the `faster-threading` feature is enabled.
///
pub trait Accumulator: Send {
    /// Integrate the results of another batch into this one
    fn merge(&mut self, other: Self);
}

/// Running sums over scalar Monte-Carlo samples
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleAccumulator {
    /// Number of integrated samples
    count: usize,

    /// Sum of the samples
    sum: Float,

    /// Sum of the squared samples
    sum_sq: Float,

    /// Number of samples that came out as NaN or infinite and were ignored
    rejected: usize,
}
//
impl SampleAccumulator {
    /// Prepare for results integration
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: Float::zero(),
            sum_sq: Float::zero(),
            rejected: 0,
        }
    }

    /// Integrate one sample
    pub fn integrate(&mut self, sample: Float) {
        if sample.is_finite() {
            self.count += 1;
            self.sum += sample;
            self.sum_sq += sample * sample;
        } else {
            self.rejected += 1;
        }
    }

    /// Number of integrated samples
    pub fn count(&self) -> usize {
        self.count
    }

    /// Compute the final statistics
    ///
    /// The standard deviation is the population one (no Bessel correction),
    /// which is what numpy's `std` reports and what earlier result tables of
    /// this experiment used.
    ///
    pub fn finalize(&self) -> SampleSummary {
        if self.count == 0 {
            return SampleSummary {
                count: 0,
                rejected: self.rejected,
                mean: Float::NAN,
                std_dev: Float::NAN,
            };
        }
        let n = self.count as Float;
        let mean = self.sum / n;
        let variance = (self.sum_sq / n - mean * mean).max(0.);
        SampleSummary {
            count: self.count,
            rejected: self.rejected,
            mean,
            std_dev: sqrt(variance),
        }
    }
}
//
impl Accumulator for SampleAccumulator {
    fn merge(&mut self, other: Self) {
        self.count += other.count;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
        self.rejected += other.rejected;
    }
}

/// Final statistics of a set of Monte-Carlo samples
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SampleSummary {
    /// Number of samples that contributed
    pub count: usize,

    /// Number of non-finite samples that were dropped
    pub rejected: usize,

    /// Sample mean
    pub mean: Float,

    /// Sample standard deviation
    pub std_dev: Float,
}
//
impl SampleSummary {
    /// Relative spread of the samples (std / mean)
    pub fn relative(&self) -> Float {
        self.std_dev / self.mean
    }
}

/// Hit counting for Bernoulli-like Monte-Carlo trials
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HitCounter {
    /// Trials whose outcome was positive
    pub hits: usize,

    /// Total number of trials
    pub trials: usize,
}
//
impl HitCounter {
    /// Record the outcome of one trial
    pub fn integrate(&mut self, hit: bool) {
        self.trials += 1;
        if hit {
            self.hits += 1;
        }
    }

    /// Fraction of positive trials (zero if nothing was tried)
    pub fn fraction(&self) -> Float {
        if self.trials == 0 {
            0.
        } else {
            self.hits as Float / self.trials as Float
        }
    }
}
//
impl Accumulator for HitCounter {
    fn merge(&mut self, other: Self) {
        self.hits += other.hits;
        self.trials += other.trials;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_matches_direct_computation() {
        let samples = [1.0, 2.0, 3.0, 4.0];
        let mut acc = SampleAccumulator::new();
        samples.iter().for_each(|&s| acc.integrate(s));
        let summary = acc.finalize();
        assert_eq!(summary.count, 4);
        assert!((summary.mean - 2.5).abs() < 1e-12);
        assert!((summary.std_dev - 1.25f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn merging_is_equivalent_to_sequential_integration() {
        let mut first = SampleAccumulator::new();
        let mut second = SampleAccumulator::new();
        let mut all = SampleAccumulator::new();
        for i in 0..10 {
            let x = i as Float * 0.5;
            all.integrate(x);
            if i < 4 {
                first.integrate(x);
            } else {
                second.integrate(x);
            }
        }
        first.merge(second);
        assert_eq!(first.count(), all.count());
        assert!((first.finalize().mean - all.finalize().mean).abs() < 1e-12);
    }

    #[test]
    fn non_finite_samples_are_rejected() {
        let mut acc = SampleAccumulator::new();
        acc.integrate(Float::NAN);
        acc.integrate(1.0);
        let summary = acc.finalize();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.rejected, 1);
        assert!(SampleAccumulator::new().finalize().mean.is_nan());
    }

    #[test]
    fn hit_counter_fraction() {
        let mut counter = HitCounter::default();
        assert_eq!(counter.fraction(), 0.);
        counter.integrate(true);
        counter.integrate(false);
        counter.merge(HitCounter { hits: 1, trials: 2 });
        assert_eq!(counter.fraction(), 0.5);
    }
}
