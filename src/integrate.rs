//! Peak yields and their Monte-Carlo uncertainties
//!
//! The yield of a fitted peak is the integral of its background-free shape
//! over the ellipse of two widths around its centroid. Its uncertainty is
//! obtained by integrating many parameter vectors drawn around the best fit.

use crate::{
    model::PeakModel,
    numeric::{functions::linspace, Float},
    random::{RandomGenerator, DEFAULT_SEED},
    resacc::{SampleAccumulator, SampleSummary},
    scheduling,
};
use serde::{Deserialize, Serialize};

/// Number of trapezoid nodes along each axis
pub const INTEGRATION_GRID: usize = 100;

/// Half-size of the integration domain, in peak widths
pub const INTEGRATION_SIGMAS: Float = 2.;

/// Trapezoid rule weights of `n` evenly spaced nodes over [lo, hi]
fn trapezoid_weights(lo: Float, hi: Float, n: usize) -> impl Iterator<Item = (Float, Float)> {
    let step = if n > 1 { (hi - lo) / (n - 1) as Float } else { 0. };
    linspace(lo, hi, n).enumerate().map(move |(i, x)| {
        let weight = if i == 0 || i + 1 == n { 0.5 * step } else { step };
        (x, weight)
    })
}

/// Integral of the peak (without background) over the ellipse of
/// [`INTEGRATION_SIGMAS`] widths around the centroid
///
/// The trapezoid rule runs on a `grid`×`grid` box whose lower edges are
/// clamped at zero energy. Nodes outside the ellipse do not contribute.
/// Degenerate widths give a zero integral.
///
pub fn integrate_peak(model: &dyn PeakModel, params: &[Float], grid: usize) -> Float {
    integrate_shape(
        |x, y| model.peak(params, x, y),
        model.centroid(params),
        model.widths(params),
        grid,
    )
}

/// Integral of any peak shape over the ellipse of [`INTEGRATION_SIGMAS`]
/// widths around a centroid, see [`integrate_peak`]
pub fn integrate_shape(
    peak: impl Fn(Float, Float) -> Float,
    (mu_x, mu_y): (Float, Float),
    (sigma_x, sigma_y): (Float, Float),
    grid: usize,
) -> Float {
    let (sigma_x, sigma_y) = (sigma_x.abs(), sigma_y.abs());
    if !(sigma_x > 0. && sigma_y > 0.) {
        return 0.;
    }
    let x_lo = (mu_x - INTEGRATION_SIGMAS * sigma_x).max(0.);
    let x_hi = mu_x + INTEGRATION_SIGMAS * sigma_x;
    let y_lo = (mu_y - INTEGRATION_SIGMAS * sigma_y).max(0.);
    let y_hi = mu_y + INTEGRATION_SIGMAS * sigma_y;
    if x_hi <= x_lo || y_hi <= y_lo {
        return 0.;
    }

    let radius2 = INTEGRATION_SIGMAS * INTEGRATION_SIGMAS;
    let y_nodes = trapezoid_weights(y_lo, y_hi, grid).collect::<Vec<_>>();
    trapezoid_weights(x_lo, x_hi, grid)
        .map(|(x, wx)| {
            let dx = (x - mu_x) / sigma_x;
            y_nodes
                .iter()
                .filter(|&&(y, _)| dx * dx + ((y - mu_y) / sigma_y).powi(2) <= radius2)
                .map(|&(y, wy)| wy * peak(x, y))
                .sum::<Float>()
                * wx
        })
        .sum()
}

/// Settings of the Monte-Carlo error propagation
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Number of parameter vectors to draw
    pub samples: usize,

    /// Factor applied to the parameter errors before drawing
    pub scale: Float,

    /// Trapezoid nodes along each axis
    pub grid: usize,

    /// Samples per Monte-Carlo batch
    pub batch_size: usize,

    /// Seed of the random number generator
    pub seed: u64,
}
//
impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            samples: 1000,
            scale: 1.,
            grid: INTEGRATION_GRID,
            // Each sample is a full 2D integral
            batch_size: 50,
            seed: DEFAULT_SEED,
        }
    }
}

/// Propagate parameter errors to the peak integral
///
/// Each parameter is drawn independently from a normal distribution centered
/// on its best-fit value, with a width of `scale` times its error, and the
/// resulting peak is integrated. The mean and standard deviation of the
/// integrals are returned.
///
pub fn propagate_mc(
    model: &dyn PeakModel,
    params: &[Float],
    errors: &[Float],
    config: &PropagationConfig,
) -> SampleSummary {
    let kernel = |num_samples: usize, rng: &mut RandomGenerator| {
        let mut acc = SampleAccumulator::new();
        let mut sample = params.to_vec();
        for _ in 0..num_samples {
            for ((s, &p), &err) in sample.iter_mut().zip(params).zip(errors) {
                *s = rng.normal(p, config.scale * err);
            }
            acc.integrate(integrate_peak(model, &sample, config.grid));
        }
        acc
    };
    scheduling::run_batched(config.samples, config.batch_size, config.seed, kernel).finalize()
}

/// Yield of a peak and its rate over a run
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PeakYield {
    /// Integral of the peak
    pub integral: Float,

    /// Uncertainty of the integral
    pub integral_err: Float,

    /// Integral per second of run time
    pub rate: Float,

    /// Uncertainty of the rate
    pub rate_err: Float,
}
//
impl PeakYield {
    /// Normalize an integral by the run time
    pub fn new(integral: Float, integral_err: Float, run_time_s: Float) -> Self {
        Self {
            integral,
            integral_err,
            rate: integral / run_time_s,
            rate_err: integral_err / run_time_s,
        }
    }
}
