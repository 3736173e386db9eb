//! Analytic shapes of the coincidence peak
//!
//! Every model is a function of the two detector energies (x, y) and of a flat
//! parameter vector, so that the minimizer can treat them uniformly. The
//! parameter layout of each model is documented on its type, and exposed at
//! run time through [`PeakModel::param_names`].

mod crystal_ball;
mod gauss;

pub use crystal_ball::{
    crystal_ball, crystal_ball_pdf, CrystalBall1D, CrystalBall2D, FixedCrystalBall2D,
    TiltedCrystalBall2D,
};
pub use gauss::{DoubleGauss2D, Gauss2D, TiltedDoubleGauss2D, TiltedGauss2D};

use crate::{
    error::FitError,
    numeric::Float,
    peak::{PeakEstimate, RegionStats},
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest width used when deriving bounds from a seed, so that degenerate
/// single-bin regions still yield a non-empty parameter box
const MIN_SEED_WIDTH: Float = 0.5;

/// What a fit model starts from: where the peak is, how wide and how high it
/// is, and over which range of energies the data extend
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct FitSeed {
    /// Centroid along x
    pub x: Float,

    /// Centroid along y
    pub y: Float,

    /// Width along x
    pub sigma_x: Float,

    /// Width along y
    pub sigma_y: Float,

    /// Highest content
    pub max: Float,

    /// Range of the data along x
    pub x_range: (Float, Float),

    /// Range of the data along y
    pub y_range: (Float, Float),
}
//
impl FitSeed {
    /// Seed a fit from the moments of a peak and, when available, from the
    /// weighted statistics of the selected region (which take precedence)
    pub fn new(estimate: &PeakEstimate, region: Option<&RegionStats>) -> Self {
        match region {
            Some(stats) => Self::from_stats(stats),
            None => Self {
                x: estimate.x,
                y: estimate.y,
                sigma_x: estimate.sigma_x,
                sigma_y: estimate.sigma_y,
                max: estimate.max_content,
                x_range: (
                    estimate.x - 3. * estimate.sigma_x,
                    estimate.x + 3. * estimate.sigma_x,
                ),
                y_range: (
                    estimate.y - 3. * estimate.sigma_y,
                    estimate.y + 3. * estimate.sigma_y,
                ),
            },
        }
    }

    /// Seed a fit from the weighted statistics of a region
    pub fn from_stats(stats: &RegionStats) -> Self {
        Self {
            x: stats.mean_x,
            y: stats.mean_y,
            sigma_x: stats.std_x,
            sigma_y: stats.std_y,
            max: stats.max,
            x_range: stats.x_range,
            y_range: stats.y_range,
        }
    }

    /// Width along x, never below a small floor
    pub(crate) fn width_x(&self) -> Float {
        self.sigma_x.max(MIN_SEED_WIDTH)
    }

    /// Width along y, never below a small floor
    pub(crate) fn width_y(&self) -> Float {
        self.sigma_y.max(MIN_SEED_WIDTH)
    }

    /// Allowed centroid range along x: the data range widened by 20%
    pub(crate) fn centroid_bounds_x(&self) -> (Float, Float) {
        widen(self.x_range, 0.2)
    }

    /// Allowed centroid range along y: the data range widened by 20%
    pub(crate) fn centroid_bounds_y(&self) -> (Float, Float) {
        widen(self.y_range, 0.2)
    }
}

/// Widen a range by a fraction of its span on both sides
///
/// A point-like range is widened by a unit span instead.
///
fn widen((lo, hi): (Float, Float), fraction: Float) -> (Float, Float) {
    let span = (hi - lo).abs().max(1.);
    (lo - fraction * span, hi + fraction * span)
}

/// Unbounded parameter range
pub(crate) const FREE: (Float, Float) = (Float::NEG_INFINITY, Float::INFINITY);

/// Shape of a two-dimensional peak on top of a smooth background
pub trait PeakModel: Send + Sync {
    /// Short name used in logs and result tables
    fn name(&self) -> &'static str;

    /// Names of the parameters, in parameter vector order
    fn param_names(&self) -> &'static [&'static str];

    /// Number of parameters
    fn n_params(&self) -> usize {
        self.param_names().len()
    }

    /// Full model (peak and background) at (x, y)
    fn eval(&self, p: &[Float], x: Float, y: Float) -> Float;

    /// Peak alone, without background, at (x, y)
    fn peak(&self, p: &[Float], x: Float, y: Float) -> Float;

    /// Starting point of the minimization
    fn initial(&self, seed: &FitSeed) -> Vec<Float>;

    /// Box constraints of the minimization, one (lower, upper) pair per
    /// parameter
    fn bounds(&self, seed: &FitSeed) -> Vec<(Float, Float)>;

    /// Indices of the x and y centroids in the parameter vector
    fn centroid_indices(&self) -> (usize, usize);

    /// Centroid of the peak
    fn centroid(&self, p: &[Float]) -> (Float, Float) {
        let (ix, iy) = self.centroid_indices();
        (p[ix], p[iy])
    }

    /// Characteristic widths of the peak along x and y, which set the
    /// integration window
    fn widths(&self, p: &[Float]) -> (Float, Float);

    /// Check that a parameter vector has the right length for this model
    fn check_params(&self, p: &[Float]) -> Result<(), FitError> {
        if p.len() == self.n_params() {
            Ok(())
        } else {
            Err(FitError::ParameterCount {
                model: self.name(),
                expected: self.n_params(),
                found: p.len(),
            })
        }
    }
}

/// Peak models that can be selected by name
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    /// Single correlated Gaussian
    Gauss,
    /// Sum of two correlated Gaussians
    DoubleGauss,
    /// Rotated Gaussian
    TiltedGauss,
    /// Two rotated Gaussians sharing a center
    TiltedDoubleGauss,
    /// Product of two Crystal-Ball functions
    CrystalBall,
    /// Product of two Crystal-Ball functions in rotated coordinates
    TiltedCrystalBall,
}
//
impl ModelKind {
    /// Every selectable model
    pub const ALL: [Self; 6] = [
        Self::Gauss,
        Self::DoubleGauss,
        Self::TiltedGauss,
        Self::TiltedDoubleGauss,
        Self::CrystalBall,
        Self::TiltedCrystalBall,
    ];

    /// Instantiate the model
    pub fn model(self) -> Box<dyn PeakModel> {
        match self {
            Self::Gauss => Box::new(Gauss2D),
            Self::DoubleGauss => Box::new(DoubleGauss2D),
            Self::TiltedGauss => Box::new(TiltedGauss2D),
            Self::TiltedDoubleGauss => Box::new(TiltedDoubleGauss2D),
            Self::CrystalBall => Box::new(CrystalBall2D),
            Self::TiltedCrystalBall => Box::new(TiltedCrystalBall2D),
        }
    }
}
//
impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Gauss => "gauss",
            Self::DoubleGauss => "double-gauss",
            Self::TiltedGauss => "tilted-gauss",
            Self::TiltedDoubleGauss => "tilted-double-gauss",
            Self::CrystalBall => "crystal-ball",
            Self::TiltedCrystalBall => "tilted-crystal-ball",
        };
        f.write_str(text)
    }
}

/// Coordinates of (x, y) relative to a center, in a frame rotated by θ
pub(crate) fn rotate(x: Float, y: Float, x0: Float, y0: Float, theta: Float) -> (Float, Float) {
    let (sin, cos) = theta.sin_cos();
    let (dx, dy) = (x - x0, y - y0);
    (dx * cos + dy * sin, -dx * sin + dy * cos)
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(super) fn seed() -> FitSeed {
        FitSeed {
            x: 340.,
            y: 171.,
            sigma_x: 25.,
            sigma_y: 20.,
            max: 120.,
            x_range: (280., 400.),
            y_range: (120., 220.),
        }
    }

    #[test]
    fn initial_values_lie_within_bounds() {
        let seed = seed();
        for kind in ModelKind::ALL {
            let model = kind.model();
            let init = model.initial(&seed);
            let bounds = model.bounds(&seed);
            assert_eq!(init.len(), model.n_params(), "{kind}");
            assert_eq!(bounds.len(), model.n_params(), "{kind}");
            for (i, (&v, &(lo, hi))) in init.iter().zip(&bounds).enumerate() {
                assert!(lo <= hi, "{kind} parameter {i}");
                assert!(
                    (lo..=hi).contains(&v),
                    "{kind} parameter {} = {v} outside [{lo}, {hi}]",
                    model.param_names()[i]
                );
            }
            assert!(model.check_params(&init).is_ok());
        }
    }

    #[test]
    fn peak_sits_near_the_seed_centroid() {
        let seed = seed();
        for kind in ModelKind::ALL {
            let model = kind.model();
            let init = model.initial(&seed);
            let (cx, cy) = model.centroid(&init);
            assert!((cx - seed.x).abs() <= seed.sigma_x, "{kind}");
            assert!((cy - seed.y).abs() <= seed.sigma_y, "{kind}");
            let at_center = model.peak(&init, cx, cy);
            let off_center = model.peak(&init, cx + 3. * seed.sigma_x, cy);
            assert!(at_center > off_center, "{kind}");
            let (wx, wy) = model.widths(&init);
            assert!(wx > 0. && wy > 0., "{kind}");
        }
    }

    #[test]
    fn wrong_parameter_count_is_reported() {
        let err = Gauss2D.check_params(&[1., 2.]).unwrap_err();
        assert!(matches!(
            err,
            FitError::ParameterCount {
                expected: 9,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn rotation_by_a_right_angle() {
        let (xr, yr) = rotate(1., 0., 0., 0., std::f64::consts::FRAC_PI_2);
        assert!(xr.abs() < 1e-12);
        assert!((yr + 1.).abs() < 1e-12);
    }

    #[test]
    fn model_kinds_use_kebab_case_names() {
        assert_eq!(ModelKind::TiltedDoubleGauss.to_string(), "tilted-double-gauss");
        let kind: ModelKind = serde_json::from_str("\"crystal-ball\"").unwrap();
        assert_eq!(kind, ModelKind::CrystalBall);
    }
}
