//! Crystal-Ball peak models
//!
//! The Crystal-Ball function is a Gaussian core continued by a power-law tail
//! on its low side, which is what incomplete charge collection does to a
//! photo-peak.

use super::{rotate, FitSeed, PeakModel, FREE};
use crate::numeric::{
    functions::sqr,
    reals::consts::{FRAC_PI_2, PI},
    Float,
};
use prefix_num_ops::real::*;
use statrs::function::erf::erf;

/// Default tail parameter α
pub const DEFAULT_ALPHA: Float = 1.5;

/// Default tail exponent n of the 2D Crystal-Ball models
pub const DEFAULT_N: Float = 3.0;

/// Allowed range of the tail parameter α
const ALPHA_BOUNDS: (Float, Float) = (0.1, 10.);

/// Allowed range of the tail exponent n, which must stay above 1 for the
/// tail to be normalizable
const N_BOUNDS: (Float, Float) = (1.01, 50.);

/// Unnormalized Crystal-Ball shape, equal to 1 at the peak
///
/// A negative α puts the tail on the high side.
///
pub fn crystal_ball(x: Float, mu: Float, sigma: Float, alpha: Float, n: Float) -> Float {
    let mut t = (x - mu) / sigma;
    if alpha < 0. {
        t = -t;
    }
    let alpha = abs(alpha);
    if t > -alpha {
        exp(-0.5 * t * t)
    } else {
        let a = (n / alpha).powf(n) * exp(-0.5 * alpha * alpha);
        let b = n / alpha - alpha;
        a * (b - t).powf(-n)
    }
}

/// Crystal-Ball probability density, normalized to unit integral over x
pub fn crystal_ball_pdf(x: Float, mu: Float, sigma: Float, alpha: Float, n: Float) -> Float {
    let abs_alpha = abs(alpha);
    let c = n / abs_alpha / (n - 1.) * exp(-0.5 * sqr(abs_alpha));
    let d = sqrt(FRAC_PI_2) * (1. + erf(abs_alpha / sqrt(2.)));
    let norm = 1. / (abs(sigma) * (c + d));
    norm * crystal_ball(x, mu, sigma, alpha, n)
}

/// Crystal Ball with fixed tail, on a straight line, used to fit the 1D
/// projections of the coincidence histogram
///
/// Parameters: `[μ, σ, A, a0, a1]` for `A·cb(x) + a0 + a1·x`.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrystalBall1D {
    /// Tail parameter
    pub alpha: Float,

    /// Tail exponent
    pub n: Float,
}
//
impl CrystalBall1D {
    /// Parameter names
    pub const PARAM_NAMES: [&'static str; 5] = ["mu", "sigma", "A", "a0", "a1"];

    /// Evaluate at x
    pub fn eval(&self, p: &[Float], x: Float) -> Float {
        p[2] * crystal_ball(x, p[0], p[1], self.alpha, self.n) + p[3] + p[4] * x
    }
}
//
impl Default for CrystalBall1D {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            n: DEFAULT_N,
        }
    }
}

/// Product of two Crystal-Ball shapes whose positions and widths were fixed
/// beforehand, on a plane
///
/// Only the amplitude and the background are free. Parameters:
/// `[A, p0, p1, p2]` for `A·cb(x)·cb(y) + p0 + p1·x + p2·y`.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedCrystalBall2D {
    /// Centroid along x
    pub mu_x: Float,
    /// Width along x
    pub sigma_x: Float,
    /// Centroid along y
    pub mu_y: Float,
    /// Width along y
    pub sigma_y: Float,
    /// Shared tail shape
    pub shape: CrystalBall1D,
}
//
impl FixedCrystalBall2D {
    /// Parameter names
    pub const PARAM_NAMES: [&'static str; 4] = ["A", "p0", "p1", "p2"];

    /// Peak alone
    pub fn peak(&self, p: &[Float], x: Float, y: Float) -> Float {
        let CrystalBall1D { alpha, n } = self.shape;
        p[0] * crystal_ball(x, self.mu_x, self.sigma_x, alpha, n)
            * crystal_ball(y, self.mu_y, self.sigma_y, alpha, n)
    }

    /// Peak and background
    pub fn eval(&self, p: &[Float], x: Float, y: Float) -> Float {
        self.peak(p, x, y) + p[1] + p[2] * x + p[3] * y
    }
}

/// Product of two Crystal-Ball densities on a plane
///
/// Parameters: `[A, μx, σx, αx, nx, μy, σy, αy, ny, B, C, D]` for
/// `A·cb(x)·cb(y) + B + C·x + D·y`, where the Crystal-Ball functions are
/// normalized densities so that `A` is the peak yield.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct CrystalBall2D;
//
impl PeakModel for CrystalBall2D {
    fn name(&self) -> &'static str {
        "CB"
    }

    fn param_names(&self) -> &'static [&'static str] {
        &[
            "A", "mu_x", "sigma_x", "alpha_x", "n_x", "mu_y", "sigma_y", "alpha_y", "n_y", "B", "C",
            "D",
        ]
    }

    fn eval(&self, p: &[Float], x: Float, y: Float) -> Float {
        self.peak(p, x, y) + p[9] + p[10] * x + p[11] * y
    }

    fn peak(&self, p: &[Float], x: Float, y: Float) -> Float {
        p[0] * crystal_ball_pdf(x, p[1], p[2], p[3], p[4])
            * crystal_ball_pdf(y, p[5], p[6], p[7], p[8])
    }

    fn initial(&self, seed: &FitSeed) -> Vec<Float> {
        let sigma_x = seed.sigma_x.clamp(1., 100.);
        let sigma_y = seed.sigma_y.clamp(1., 100.);
        // Scale the yield so that the initial peak height matches the data
        let height = crystal_ball_pdf(0., 0., sigma_x, DEFAULT_ALPHA, DEFAULT_N)
            * crystal_ball_pdf(0., 0., sigma_y, DEFAULT_ALPHA, DEFAULT_N);
        vec![
            seed.max / height,
            seed.x,
            sigma_x,
            DEFAULT_ALPHA,
            DEFAULT_N,
            seed.y,
            sigma_y,
            DEFAULT_ALPHA,
            DEFAULT_N,
            0.,
            0.,
            0.,
        ]
    }

    fn bounds(&self, seed: &FitSeed) -> Vec<(Float, Float)> {
        vec![
            (0., Float::INFINITY),
            seed.centroid_bounds_x(),
            (1., 100.),
            ALPHA_BOUNDS,
            N_BOUNDS,
            seed.centroid_bounds_y(),
            (1., 100.),
            ALPHA_BOUNDS,
            N_BOUNDS,
            FREE,
            FREE,
            FREE,
        ]
    }

    fn centroid_indices(&self) -> (usize, usize) {
        (1, 5)
    }

    fn widths(&self, p: &[Float]) -> (Float, Float) {
        (p[2], p[6])
    }
}

/// Product of two Crystal-Ball shapes along rotated axes, on a bilinear
/// background
///
/// Parameters: `[Amp, X0, Y0, σX, σY, θ, Const, Ax, By, Cxy, αX, nX, αY,
/// nY]`.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct TiltedCrystalBall2D;
//
impl TiltedCrystalBall2D {
    /// Initial tail exponent
    const INITIAL_N: Float = 2.0;
}
//
impl PeakModel for TiltedCrystalBall2D {
    fn name(&self) -> &'static str {
        "TILTED_CB"
    }

    fn param_names(&self) -> &'static [&'static str] {
        &[
            "Amp", "X0", "Y0", "SigmaX", "SigmaY", "Theta", "Const", "Ax", "By", "Cxy", "AlphaX",
            "nX", "AlphaY", "nY",
        ]
    }

    fn eval(&self, p: &[Float], x: Float, y: Float) -> Float {
        self.peak(p, x, y) + p[6] + p[7] * x + p[8] * y + p[9] * x * y
    }

    fn peak(&self, p: &[Float], x: Float, y: Float) -> Float {
        let (xr, yr) = rotate(x, y, p[1], p[2], p[5]);
        p[0] * crystal_ball(xr, 0., p[3], p[10], p[11]) * crystal_ball(yr, 0., p[4], p[12], p[13])
    }

    fn initial(&self, seed: &FitSeed) -> Vec<Float> {
        vec![
            seed.max,
            seed.x,
            seed.y,
            seed.width_x(),
            seed.width_y(),
            0.,
            0.,
            0.,
            0.,
            0.,
            DEFAULT_ALPHA,
            Self::INITIAL_N,
            DEFAULT_ALPHA,
            Self::INITIAL_N,
        ]
    }

    fn bounds(&self, seed: &FitSeed) -> Vec<(Float, Float)> {
        let width_limit = 10. * seed.width_x().max(seed.width_y());
        vec![
            (0., 10. * seed.max.max(1.)),
            seed.centroid_bounds_x(),
            seed.centroid_bounds_y(),
            (1e-2, width_limit),
            (1e-2, width_limit),
            (-0.5 * PI, 0.5 * PI),
            FREE,
            FREE,
            FREE,
            FREE,
            ALPHA_BOUNDS,
            N_BOUNDS,
            ALPHA_BOUNDS,
            N_BOUNDS,
        ]
    }

    fn centroid_indices(&self) -> (usize, usize) {
        (1, 2)
    }

    fn widths(&self, p: &[Float]) -> (Float, Float) {
        (p[3], p[4])
    }
}
