//! Gaussian peak models

use super::{rotate, FitSeed, PeakModel, FREE};
use crate::numeric::{functions::sqr, reals, reals::consts::FRAC_PI_4, Float};
use prefix_num_ops::real::*;

/// Correlated 2D Gaussian
fn correlated_gaussian(
    x: Float,
    y: Float,
    mu_x: Float,
    sigma_x: Float,
    mu_y: Float,
    sigma_y: Float,
    rho: Float,
) -> Float {
    let dx = (x - mu_x) / sigma_x;
    let dy = (y - mu_y) / sigma_y;
    let z = sqr(dx) + sqr(dy) - 2. * rho * dx * dy;
    exp(-0.5 * z / (1. - sqr(rho)))
}

/// Bounds shared by every correlated Gaussian component
fn gaussian_bounds(seed: &FitSeed) -> [(Float, Float); 6] {
    [
        (0.1, Float::INFINITY),
        seed.centroid_bounds_x(),
        (1., 100.),
        seed.centroid_bounds_y(),
        (1., 100.),
        (-0.9, 0.9),
    ]
}

/// Single correlated Gaussian on a plane
///
/// Parameters: `[A, μx, σx, μy, σy, ρ, B, C, D]` for
/// `A·G(x, y) + B + C·x + D·y`.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct Gauss2D;
//
impl PeakModel for Gauss2D {
    fn name(&self) -> &'static str {
        "SINGLE"
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["A", "mu_x", "sigma_x", "mu_y", "sigma_y", "rho", "B", "C", "D"]
    }

    fn eval(&self, p: &[Float], x: Float, y: Float) -> Float {
        self.peak(p, x, y) + p[6] + p[7] * x + p[8] * y
    }

    fn peak(&self, p: &[Float], x: Float, y: Float) -> Float {
        p[0] * correlated_gaussian(x, y, p[1], p[2], p[3], p[4], p[5])
    }

    fn initial(&self, seed: &FitSeed) -> Vec<Float> {
        vec![
            0.8 * seed.max,
            seed.x,
            seed.sigma_x.clamp(1., 100.),
            seed.y,
            seed.sigma_y.clamp(1., 100.),
            0.,
            0.,
            0.,
            0.,
        ]
    }

    fn bounds(&self, seed: &FitSeed) -> Vec<(Float, Float)> {
        let mut bounds = gaussian_bounds(seed).to_vec();
        bounds.extend([FREE; 3]);
        bounds
    }

    fn centroid_indices(&self) -> (usize, usize) {
        (1, 3)
    }

    fn widths(&self, p: &[Float]) -> (Float, Float) {
        (p[2], p[4])
    }
}

/// Sum of two correlated Gaussians on a plane
///
/// Parameters: `[A1, μx1, σx1, μy1, σy1, ρ1, A2, μx2, σx2, μy2, σy2, ρ2, B,
/// C, D]`. The first component is the one whose centroid is reported.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct DoubleGauss2D;
//
impl PeakModel for DoubleGauss2D {
    fn name(&self) -> &'static str {
        "DOUBLE"
    }

    fn param_names(&self) -> &'static [&'static str] {
        &[
            "A1", "mu_x1", "sigma_x1", "mu_y1", "sigma_y1", "rho1", "A2", "mu_x2", "sigma_x2",
            "mu_y2", "sigma_y2", "rho2", "B", "C", "D",
        ]
    }

    fn eval(&self, p: &[Float], x: Float, y: Float) -> Float {
        self.peak(p, x, y) + p[12] + p[13] * x + p[14] * y
    }

    fn peak(&self, p: &[Float], x: Float, y: Float) -> Float {
        p[0] * correlated_gaussian(x, y, p[1], p[2], p[3], p[4], p[5])
            + p[6] * correlated_gaussian(x, y, p[7], p[8], p[9], p[10], p[11])
    }

    fn initial(&self, seed: &FitSeed) -> Vec<Float> {
        let (sx, sy) = (seed.sigma_x, seed.sigma_y);
        let width_x = (0.8 * sx).max(2.).min(100.);
        let width_y = (0.8 * sy).max(2.).min(100.);
        vec![
            0.4 * seed.max,
            seed.x - 0.5 * sx,
            width_x,
            seed.y - 0.5 * sy,
            width_y,
            0.,
            0.3 * seed.max,
            seed.x + 0.5 * sx,
            width_x,
            seed.y + 0.5 * sy,
            width_y,
            0.,
            0.,
            0.,
            0.,
        ]
    }

    fn bounds(&self, seed: &FitSeed) -> Vec<(Float, Float)> {
        let component = gaussian_bounds(seed);
        let mut bounds = component.to_vec();
        bounds.extend(component);
        bounds.extend([FREE; 3]);
        bounds
    }

    fn centroid_indices(&self) -> (usize, usize) {
        (1, 3)
    }

    fn widths(&self, p: &[Float]) -> (Float, Float) {
        (p[2], p[4])
    }
}

/// Gaussian whose axes are rotated by θ, on a plane
///
/// Parameters: `[A, μx, σx, μy, σy, θ, B, C, D]`.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct TiltedGauss2D;
//
impl PeakModel for TiltedGauss2D {
    fn name(&self) -> &'static str {
        "TILTED"
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["A", "mu_x", "sigma_x", "mu_y", "sigma_y", "theta", "B", "C", "D"]
    }

    fn eval(&self, p: &[Float], x: Float, y: Float) -> Float {
        self.peak(p, x, y) + p[6] + p[7] * x + p[8] * y
    }

    fn peak(&self, p: &[Float], x: Float, y: Float) -> Float {
        let (xr, yr) = rotate(x, y, p[1], p[3], p[5]);
        p[0] * exp(-0.5 * (sqr(xr / p[2]) + sqr(yr / p[4])))
    }

    fn initial(&self, seed: &FitSeed) -> Vec<Float> {
        vec![
            seed.max,
            seed.x,
            seed.width_x(),
            seed.y,
            seed.width_y(),
            FRAC_PI_4,
            0.,
            0.,
            0.,
        ]
    }

    fn bounds(&self, seed: &FitSeed) -> Vec<(Float, Float)> {
        let width_limit = 10. * seed.width_x().max(seed.width_y());
        vec![
            (0., 10. * seed.max.max(1.)),
            seed.centroid_bounds_x(),
            (1e-2, width_limit),
            seed.centroid_bounds_y(),
            (1e-2, width_limit),
            (-reals::consts::PI, reals::consts::PI),
            FREE,
            FREE,
            FREE,
        ]
    }

    fn centroid_indices(&self) -> (usize, usize) {
        (1, 3)
    }

    fn widths(&self, p: &[Float]) -> (Float, Float) {
        (p[2], p[4])
    }
}

/// Two rotated Gaussians sharing their center and orientation, on a
/// bilinear background
///
/// Parameters: `[Amp1, Amp2, X0, Y0, σX1, σY1, σX2, σY2, θ, Const, Ax, Ay,
/// Cxy]`.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct TiltedDoubleGauss2D;
//
impl PeakModel for TiltedDoubleGauss2D {
    fn name(&self) -> &'static str {
        "TILTED_DOUBLE"
    }

    fn param_names(&self) -> &'static [&'static str] {
        &[
            "Amp1", "Amp2", "X0", "Y0", "SigmaX1", "SigmaY1", "SigmaX2", "SigmaY2", "Theta",
            "Const", "Ax", "Ay", "Cxy",
        ]
    }

    fn eval(&self, p: &[Float], x: Float, y: Float) -> Float {
        self.peak(p, x, y) + p[9] + p[10] * x + p[11] * y + p[12] * x * y
    }

    fn peak(&self, p: &[Float], x: Float, y: Float) -> Float {
        let (xr, yr) = rotate(x, y, p[2], p[3], p[8]);
        let core = exp(-0.5 * (sqr(xr / p[4]) + sqr(yr / p[5])));
        let halo = exp(-0.5 * (sqr(xr / p[6]) + sqr(yr / p[7])));
        p[0] * core + p[1] * halo
    }

    fn initial(&self, seed: &FitSeed) -> Vec<Float> {
        let (rms_x, rms_y) = (seed.width_x(), seed.width_y());
        vec![
            seed.max,
            0.3 * seed.max,
            seed.x,
            seed.y,
            rms_x,
            rms_y,
            2. * rms_x,
            2. * rms_y,
            FRAC_PI_4,
            0.,
            0.,
            0.,
            0.,
        ]
    }

    fn bounds(&self, seed: &FitSeed) -> Vec<(Float, Float)> {
        let (rms_x, rms_y) = (seed.width_x(), seed.width_y());
        let amplitude = (0., 10. * seed.max.max(1.));
        vec![
            amplitude,
            amplitude,
            (seed.x - 1.5 * rms_x, seed.x + 1.5 * rms_x),
            (seed.y - 1.5 * rms_y, seed.y + 1.5 * rms_y),
            (0.01, 2. * rms_x),
            (0.01, 2. * rms_y),
            (0.01, 3. * rms_x),
            (0.01, 3. * rms_y),
            (reals::consts::FRAC_PI_6, reals::consts::FRAC_PI_3),
            FREE,
            FREE,
            FREE,
            FREE,
        ]
    }

    fn centroid_indices(&self) -> (usize, usize) {
        (2, 3)
    }

    fn widths(&self, p: &[Float]) -> (Float, Float) {
        (p[4], p[5])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlated_gaussian_reduces_to_product_without_correlation() {
        let g = correlated_gaussian(12., 7., 10., 2., 5., 4., 0.);
        let product = (-0.5 * (1. + 0.25_f64)).exp();
        assert!((g - product).abs() < 1e-12);
    }

    #[test]
    fn correlation_stretches_along_the_diagonal() {
        let p = [1., 0., 1., 0., 1., 0.8, 0., 0., 0.];
        let along = Gauss2D.peak(&p, 1., 1.);
        let across = Gauss2D.peak(&p, 1., -1.);
        assert!(along > across);
    }

    #[test]
    fn single_gauss_background_plane() {
        let p = [0., 0., 1., 0., 1., 0., 2., 0.5, -0.25];
        assert!((Gauss2D.eval(&p, 4., 8.) - 2.).abs() < 1e-12);
    }

    #[test]
    fn double_gauss_starts_with_split_components() {
        let seed = super::super::tests::seed();
        let init = DoubleGauss2D.initial(&seed);
        assert!((init[0] - 48.).abs() < 1e-12);
        assert!((init[6] - 36.).abs() < 1e-12);
        assert!(init[1] < seed.x && init[7] > seed.x);
        assert!((init[2] - 20.).abs() < 1e-12);
    }

    #[test]
    fn tilted_gauss_follows_its_axes() {
        // Elongated along the first diagonal
        let p = [1., 0., 10., 0., 1., FRAC_PI_4, 0., 0., 0.];
        let along = TiltedGauss2D.peak(&p, 5., 5.);
        let across = TiltedGauss2D.peak(&p, 5., -5.);
        assert!(along > 0.5);
        assert!(across < 1e-10);
    }

    #[test]
    fn tilted_double_gauss_bilinear_background() {
        let mut p = TiltedDoubleGauss2D.initial(&super::super::tests::seed());
        p[0] = 0.;
        p[1] = 0.;
        p[9..13].copy_from_slice(&[1., 0.1, 0.2, 0.01]);
        let value = TiltedDoubleGauss2D.eval(&p, 10., 20.);
        assert!((value - (1. + 1. + 4. + 2.)).abs() < 1e-12);
    }
}
