//! Quantities that the minimizer drives down

use crate::{model::PeakModel, numeric::Float, peak::BinPoint};

/// Weight of the penalty applied to model predictions in empty bins
const EMPTY_BIN_PENALTY: Float = 1e-6;

/// Relative step of the numerical gradient
///
/// Central differences are most accurate for steps around the cube root of
/// the machine epsilon.
///
const GRADIENT_STEP: Float = 6e-6;

/// Scalar function of the fit parameters
pub trait Objective: Send + Sync {
    /// Value at the given parameters
    fn value(&self, params: &[Float]) -> Float;

    /// Gradient at the given parameters, by central differences unless
    /// overridden
    fn gradient(&self, params: &[Float]) -> Vec<Float> {
        let mut shifted = params.to_vec();
        (0..params.len())
            .map(|i| {
                let eps = GRADIENT_STEP * params[i].abs().max(1.);
                shifted[i] = params[i] + eps;
                let f_plus = self.value(&shifted);
                shifted[i] = params[i] - eps;
                let f_minus = self.value(&shifted);
                shifted[i] = params[i];
                (f_plus - f_minus) / (2. * eps)
            })
            .collect()
    }
}

/// Neyman χ² of a 2D model against histogram bins, Σ(h − f)²/h
///
/// Empty bins do not enter the χ². When the penalty is enabled, they instead
/// add a small f²·10⁻⁶ term which keeps the model from rising where there is
/// no data.
///
pub struct NeymanChi2<'a, F> {
    /// Model as a function of (parameters, x, y)
    model: F,

    /// Bins to compare with
    points: &'a [BinPoint],

    /// Truth that empty bins are penalized
    penalty: bool,
}
//
impl<'a, F> NeymanChi2<'a, F>
where
    F: Fn(&[Float], Float, Float) -> Float + Send + Sync,
{
    /// Set up the χ² of a model function against some bins
    pub fn new(model: F, points: &'a [BinPoint], penalty: bool) -> Self {
        Self {
            model,
            points,
            penalty,
        }
    }
}
//
impl<F> Objective for NeymanChi2<'_, F>
where
    F: Fn(&[Float], Float, Float) -> Float + Send + Sync,
{
    fn value(&self, params: &[Float]) -> Float {
        self.points
            .iter()
            .map(|&BinPoint { x, y, content }| {
                let f = (self.model)(params, x, y);
                if content > 0. {
                    (content - f).powi(2) / content
                } else if self.penalty {
                    EMPTY_BIN_PENALTY * f * f
                } else {
                    0.
                }
            })
            .sum()
    }
}

/// Neyman χ² of a peak model over the non-empty bins
pub fn neyman_chi2(model: &dyn PeakModel, params: &[Float], points: &[BinPoint]) -> Float {
    NeymanChi2::new(|p: &[Float], x, y| model.eval(p, x, y), points, false).value(params)
}

/// Measured point of a 1D curve, with its uncertainty
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CurvePoint {
    /// Abscissa
    pub x: Float,
    /// Measured ordinate
    pub y: Float,
    /// Uncertainty of the ordinate
    pub sigma: Float,
}

/// Ordinary χ² of a 1D curve, Σ((y − f)/σ)²
///
/// Points whose uncertainty is not positive are ignored.
///
pub struct CurveObjective<'a, F> {
    /// Curve as a function of (parameters, x)
    curve: F,

    /// Measurements
    points: &'a [CurvePoint],
}
//
impl<'a, F> CurveObjective<'a, F>
where
    F: Fn(&[Float], Float) -> Float + Send + Sync,
{
    /// Set up the χ² of a curve against some measurements
    pub fn new(curve: F, points: &'a [CurvePoint]) -> Self {
        Self { curve, points }
    }

    /// Number of points which enter the χ²
    pub fn num_points(&self) -> usize {
        self.points.iter().filter(|p| p.sigma > 0.).count()
    }
}
//
impl<F> Objective for CurveObjective<'_, F>
where
    F: Fn(&[Float], Float) -> Float + Send + Sync,
{
    fn value(&self, params: &[Float]) -> Float {
        self.points
            .iter()
            .filter(|p| p.sigma > 0.)
            .map(|p| ((p.y - (self.curve)(params, p.x)) / p.sigma).powi(2))
            .sum()
    }
}
