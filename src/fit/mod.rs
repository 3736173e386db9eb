//! Chi-square fits of the peak models and of calibration curves
//!
//! A fit minimizes an [`Objective`] with the bounded [`Minimizer`], then
//! derives parameter uncertainties from the finite-difference Hessian of the
//! same objective at the minimum.

mod compton;
mod curve;
mod hessian;
mod minimizer;
mod objective;

pub use compton::{
    fit_compton_peak, fit_peak_with, fit_projections, locate_peak, FitAttempt, PeakFit,
    ProjectionFit, PROJECTION_HALF_WIDTH,
};
pub use curve::{fit_curve, fit_power_law};
pub use hessian::{hessian, hessian_errors, HessianErrors, HESSIAN_STEP};
pub use minimizer::{Minimizer, MinimizerConfig, MinimizerResult};
pub use objective::{neyman_chi2, CurveObjective, CurvePoint, NeymanChi2, Objective};

use crate::{
    error::FitError,
    model::{FitSeed, PeakModel},
    numeric::{Float, ELECTRON_MASS_KEV},
    peak::{BinPoint, FitRegion, FIT_REGION_SIGMAS, MOMENT_BOX_SIZE},
};
use nalgebra::DMatrix;
use prefix_num_ops::real::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Reduced χ² under which a single Gaussian is considered good enough
pub const SINGLE_FIT_THRESHOLD: Float = 2.0;

/// Settings of the peak fits
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct FitOptions {
    /// Minimizer tuning
    pub minimizer: MinimizerConfig,

    /// Finite-difference step of the Hessian
    pub hessian_step: Float,

    /// Truth that the model is penalized where bins are empty
    pub penalize_empty_bins: bool,

    /// Half-size of the moment box, in bins
    pub moment_box: usize,

    /// Half-size of the fit region, in peak widths
    pub region_sigmas: Float,

    /// Reduced χ² from which the double Gaussian is tried as well
    pub single_fit_threshold: Float,

    /// Truth that peaks are located on a smoothed copy of the histogram
    pub smooth: bool,
}
//
impl Default for FitOptions {
    fn default() -> Self {
        Self {
            minimizer: MinimizerConfig::default(),
            hessian_step: HESSIAN_STEP,
            penalize_empty_bins: true,
            moment_box: MOMENT_BOX_SIZE,
            region_sigmas: FIT_REGION_SIGMAS,
            single_fit_threshold: SINGLE_FIT_THRESHOLD,
            smooth: false,
        }
    }
}

/// Whether the minimizer reached a minimum
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum FitStatus {
    /// The minimizer converged
    Converged,
    /// The minimizer stopped for another reason
    Failed(String),
}
//
impl FitStatus {
    /// Truth that the fit converged
    pub fn is_converged(&self) -> bool {
        matches!(self, Self::Converged)
    }
}
//
impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => f.write_str("CONVERGED"),
            Self::Failed(_) => f.write_str("FAILED"),
        }
    }
}

/// Outcome of a χ² fit
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FitResult {
    /// Name of the fitted model
    pub model: &'static str,

    /// Best-fit parameters
    pub params: Vec<Float>,

    /// Parameter uncertainties
    pub errors: Vec<Float>,

    /// Parameter covariance, unless the Hessian was singular
    #[serde(skip)]
    pub covariance: Option<DMatrix<Float>>,

    /// χ² at the minimum
    pub chi2: Float,

    /// Number of degrees of freedom (data points minus parameters)
    pub ndf: i64,

    /// χ² per degree of freedom, NaN without degrees of freedom
    pub reduced_chi2: Float,

    /// Minimizer outcome
    pub status: FitStatus,
}
//
impl FitResult {
    /// Assemble the result of a minimization
    fn new(
        model: &'static str,
        minimized: MinimizerResult,
        uncertainties: HessianErrors,
        chi2: Float,
        n_points: usize,
    ) -> Self {
        let ndf = n_points as i64 - minimized.params.len() as i64;
        let status = if minimized.converged {
            FitStatus::Converged
        } else {
            FitStatus::Failed(minimized.message)
        };
        Self {
            model,
            params: minimized.params,
            errors: uncertainties.errors,
            covariance: uncertainties.covariance,
            chi2,
            ndf,
            reduced_chi2: reduced_chi2(chi2, ndf),
            status,
        }
    }

    /// Peak energy sum derived from the centroid of a peak model
    pub fn energy_sum(&self, model: &dyn PeakModel) -> EnergySum {
        let (ix, iy) = model.centroid_indices();
        EnergySum::new(
            self.params[ix],
            self.errors[ix],
            self.params[iy],
            self.errors[iy],
        )
    }
}

/// χ² per degree of freedom, NaN when there are no degrees of freedom
pub fn reduced_chi2(chi2: Float, ndf: i64) -> Float {
    if ndf > 0 {
        chi2 / ndf as Float
    } else {
        Float::NAN
    }
}

/// Fit a 2D model function to histogram bins
///
/// This is the common machinery under [`fit_histogram`], for model functions
/// which are not full [`PeakModel`]s.
///
pub fn fit_points<F>(
    name: &'static str,
    model: F,
    points: &[BinPoint],
    init: &[Float],
    bounds: &[(Float, Float)],
    options: &FitOptions,
) -> Result<FitResult, FitError>
where
    F: Fn(&[Float], Float, Float) -> Float + Send + Sync,
{
    if points.is_empty() {
        return Err(FitError::NoData(format!("no bins to fit with {name}")));
    }
    let objective = NeymanChi2::new(&model, points, options.penalize_empty_bins);
    let minimized = Minimizer::new(options.minimizer).minimize(&objective, init, bounds)?;
    debug!("{name} fit: {minimized}");
    let uncertainties = hessian_errors(&objective, &minimized.params, options.hessian_step);
    let chi2 = NeymanChi2::new(&model, points, false).value(&minimized.params);
    Ok(FitResult::new(
        name,
        minimized,
        uncertainties,
        chi2,
        points.len(),
    ))
}

/// Fit a peak model to the bins of a fit region
///
/// The model is seeded from the statistics of the region. Regions which are
/// empty or too small to be fitted are rejected.
///
pub fn fit_histogram(
    model: &dyn PeakModel,
    region: &FitRegion,
    options: &FitOptions,
) -> Result<FitResult, FitError> {
    let stats = match region.stats {
        Some(stats) if region.quality.is_fittable() => stats,
        _ => {
            return Err(FitError::NoData(format!(
                "region quality is {}",
                region.quality
            )))
        }
    };
    let seed = FitSeed::from_stats(&stats);
    let init = model.initial(&seed);
    let bounds = model.bounds(&seed);
    model.check_params(&init)?;
    fit_points(
        model.name(),
        |p: &[Float], x, y| model.eval(p, x, y),
        &region.points,
        &init,
        &bounds,
        options,
    )
}

/// Sum of the two photo-peak energies, which should add up to the energy of
/// an annihilation photon
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EnergySum {
    /// E₁ + E₂ (keV)
    pub e_sum: Float,

    /// Uncertainty of the sum (keV), zero unless both centroid errors are
    /// known
    pub e_sum_err: Float,

    /// Difference from the annihilation line, E₁ + E₂ − 511 keV
    pub deviation: Float,
}
//
impl EnergySum {
    /// Combine two centroids and their errors, where NaN errors count as
    /// unknown
    pub fn new(mu_x: Float, err_x: Float, mu_y: Float, err_y: Float) -> Self {
        let known = |err: Float| if err.is_nan() { 0. } else { err };
        let (err_x, err_y) = (known(err_x), known(err_y));
        let e_sum = mu_x + mu_y;
        let e_sum_err = if err_x > 0. && err_y > 0. {
            sqrt(err_x * err_x + err_y * err_y)
        } else {
            0.
        };
        Self {
            e_sum,
            e_sum_err,
            deviation: e_sum - ELECTRON_MASS_KEV,
        }
    }
}
