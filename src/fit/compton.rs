//! Fitting strategies for the coincidence peak

use super::{
    fit_curve, fit_histogram, fit_points, CurvePoint, EnergySum, FitOptions, FitResult,
};
use crate::{
    error::FitError,
    histogram::{Histogram1D, Histogram2D},
    integrate::integrate_shape,
    model::{CrystalBall1D, FixedCrystalBall2D, ModelKind},
    numeric::Float,
    peak::{
        find_peak_moments, rms_region, select_fit_region, window_points, DataQuality,
        FitRegion, PeakEstimate, Window,
    },
};
use prefix_num_ops::real::*;
use tracing::{info, warn};

/// Half-width of the projection fit windows around the maximum (keV)
pub const PROJECTION_HALF_WIDTH: Float = 300.;

/// One model fitted to the peak
#[derive(Clone, Debug, PartialEq)]
pub struct FitAttempt {
    /// Fitted model
    pub kind: ModelKind,

    /// Fit outcome
    pub result: FitResult,
}
//
impl FitAttempt {
    /// Label of the model in result tables
    pub fn label(&self) -> &'static str {
        self.result.model
    }

    /// Peak energy sum of this fit
    pub fn energy_sum(&self) -> EnergySum {
        self.result.energy_sum(self.kind.model().as_ref())
    }
}

/// Everything learned while fitting the coincidence peak of a histogram
#[derive(Clone, Debug, PartialEq)]
pub struct PeakFit {
    /// Moment-based peak estimate
    pub estimate: PeakEstimate,

    /// Quality of the fit region
    pub quality: DataQuality,

    /// Number of bins in the fit region
    pub region_bins: usize,

    /// Every model that was fitted, in order
    pub attempts: Vec<FitAttempt>,
}
//
impl PeakFit {
    /// Converged fit with the lowest reduced χ², if any
    pub fn preferred(&self) -> Option<&FitAttempt> {
        self.attempts
            .iter()
            .filter(|a| a.result.status.is_converged() && !a.result.reduced_chi2.is_nan())
            .min_by(|a, b| a.result.reduced_chi2.total_cmp(&b.result.reduced_chi2))
    }
}

/// Locate the peak and select the bins around it
///
/// Returns `None` for an empty histogram.
///
pub fn locate_peak(h: &Histogram2D, options: &FitOptions) -> Option<(PeakEstimate, FitRegion)> {
    if options.smooth {
        return rms_region(h, options.moment_box, options.region_sigmas);
    }
    let estimate = find_peak_moments(h, options.moment_box)?;
    let region = select_fit_region(h, &estimate, options.region_sigmas);
    Some((estimate, region))
}

/// Fit one model, logging failures instead of propagating them
fn attempt(kind: ModelKind, region: &FitRegion, options: &FitOptions) -> Option<FitAttempt> {
    let model = kind.model();
    match fit_histogram(model.as_ref(), region, options) {
        Ok(result) => {
            info!(
                model = result.model,
                chi2 = result.chi2,
                ndf = result.ndf,
                reduced_chi2 = result.reduced_chi2,
                status = %result.status,
                "Fitted coincidence peak"
            );
            Some(FitAttempt { kind, result })
        }
        Err(e) => {
            warn!("{} fit failed: {e}", model.name());
            None
        }
    }
}

/// Fit the coincidence peak of a histogram with the single/double Gaussian
/// strategy
///
/// A single correlated Gaussian is fitted first. If it failed, or if its
/// reduced χ² reaches the threshold of the options, a double Gaussian is
/// fitted as well. A region that is too poor to be fitted yields no attempt.
///
pub fn fit_compton_peak(h: &Histogram2D, options: &FitOptions) -> Result<PeakFit, FitError> {
    let (estimate, region) =
        locate_peak(h, options).ok_or_else(|| FitError::NoData("empty histogram".into()))?;
    let mut peak_fit = PeakFit {
        estimate,
        quality: region.quality,
        region_bins: region.points.len(),
        attempts: Vec::new(),
    };
    if !region.quality.is_fittable() {
        warn!("Fit region is {}, not fitting", region.quality);
        return Ok(peak_fit);
    }

    let single = attempt(ModelKind::Gauss, &region, options);
    let needs_double = match &single {
        Some(fit) => {
            let reduced_chi2 = fit.result.reduced_chi2;
            !fit.result.status.is_converged()
                || reduced_chi2.is_nan()
                || reduced_chi2 >= options.single_fit_threshold
        }
        None => true,
    };
    peak_fit.attempts.extend(single);
    if needs_double {
        peak_fit
            .attempts
            .extend(attempt(ModelKind::DoubleGauss, &region, options));
    }
    Ok(peak_fit)
}

/// Fit the coincidence peak of a histogram with one chosen model
pub fn fit_peak_with(
    h: &Histogram2D,
    kind: ModelKind,
    options: &FitOptions,
) -> Result<PeakFit, FitError> {
    let (estimate, region) =
        locate_peak(h, options).ok_or_else(|| FitError::NoData("empty histogram".into()))?;
    let model = kind.model();
    let result = fit_histogram(model.as_ref(), &region, options)?;
    Ok(PeakFit {
        estimate,
        quality: region.quality,
        region_bins: region.points.len(),
        attempts: vec![FitAttempt { kind, result }],
    })
}

/// Peak shape obtained from the two 1D projections, followed by a fit of the
/// peak amplitude over the whole histogram
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectionFit {
    /// Crystal-Ball fit of the x projection, parameters `[μ, σ, A, a0, a1]`
    pub x: FitResult,

    /// Crystal-Ball fit of the y projection
    pub y: FitResult,

    /// Amplitude and background fit over the histogram, parameters
    /// `[A, p0, p1, p2]`
    pub surface: FitResult,

    /// Peak shape that was fixed from the projections
    pub shape: FixedCrystalBall2D,
}
//
impl ProjectionFit {
    /// Peak energy sum from the projection centroids
    pub fn energy_sum(&self) -> EnergySum {
        EnergySum::new(
            self.x.params[0],
            self.x.errors[0],
            self.y.params[0],
            self.y.errors[0],
        )
    }

    /// Integral of the fixed peak shape and its uncertainty
    ///
    /// The shape is fixed, so the integral is proportional to the amplitude
    /// and inherits its relative error.
    ///
    pub fn integral(&self, grid: usize) -> (Float, Float) {
        let amplitude = self.surface.params[0];
        let shape = &self.shape;
        let integral = integrate_shape(
            |x, y| shape.peak(&self.surface.params, x, y),
            (shape.mu_x, shape.mu_y),
            (shape.sigma_x, shape.sigma_y),
            grid,
        );
        let error = if amplitude != 0. {
            (integral * self.surface.errors[0] / amplitude).abs()
        } else {
            0.
        };
        (integral, error)
    }
}

/// Fit a fixed-tail Crystal Ball on a line to a 1D projection, within
/// ±[`PROJECTION_HALF_WIDTH`] of its maximum
fn fit_projection(
    projection: &Histogram1D,
    sigma_guess: Float,
    shape: CrystalBall1D,
    options: &FitOptions,
) -> Result<FitResult, FitError> {
    let (max_bin, max_content) = projection
        .max_bin()
        .ok_or_else(|| FitError::NoData("empty projection".into()))?;
    let axis = projection.axis();
    let center = axis.bin_center(max_bin);
    let (lo, hi) = (center - PROJECTION_HALF_WIDTH, center + PROJECTION_HALF_WIDTH);
    let points = axis
        .centers()
        .zip(projection.contents())
        .filter(|&(x, _)| (lo..=hi).contains(&x))
        .map(|(x, &y)| CurvePoint {
            x,
            y,
            sigma: sqrt(y.max(0.)),
        })
        .collect::<Vec<_>>();
    let init = [
        center,
        sigma_guess.clamp(1., PROJECTION_HALF_WIDTH),
        max_content,
        0.,
        0.,
    ];
    let bounds = [
        (lo, hi),
        (1., PROJECTION_HALF_WIDTH),
        (0., Float::INFINITY),
        (Float::NEG_INFINITY, Float::INFINITY),
        (Float::NEG_INFINITY, Float::INFINITY),
    ];
    fit_curve(
        "CB1D",
        |p: &[Float], x| shape.eval(p, x),
        &points,
        &init,
        &bounds,
        options,
    )
}

/// Fit the projections of the histogram with Crystal-Ball functions, then
/// the amplitude and background plane of their product over the full
/// histogram
pub fn fit_projections(
    h: &Histogram2D,
    estimate: &PeakEstimate,
    options: &FitOptions,
) -> Result<ProjectionFit, FitError> {
    let tail = CrystalBall1D::default();
    let x = fit_projection(&h.projection_x(), estimate.sigma_x, tail, options)?;
    let y = fit_projection(&h.projection_y(), estimate.sigma_y, tail, options)?;
    let shape = FixedCrystalBall2D {
        mu_x: x.params[0],
        sigma_x: x.params[1],
        mu_y: y.params[0],
        sigma_y: y.params[1],
        shape: tail,
    };

    let (x_axis, y_axis) = (h.x_axis(), h.y_axis());
    let everything = Window {
        x_min: x_axis.min(),
        x_max: x_axis.max(),
        y_min: y_axis.min(),
        y_max: y_axis.max(),
    };
    let points = window_points(h, &everything, false);
    let free = (Float::NEG_INFINITY, Float::INFINITY);
    let surface = fit_points(
        "CB_FIXED",
        |p: &[Float], x, y| shape.eval(p, x, y),
        &points,
        &[estimate.max_content, 0., 0., 0.],
        &[(0., Float::INFINITY), free, free, free],
        options,
    )?;
    Ok(ProjectionFit {
        x,
        y,
        surface,
        shape,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::FitStatus;

    fn attempt_with(kind: ModelKind, reduced_chi2: Float, status: FitStatus) -> FitAttempt {
        FitAttempt {
            kind,
            result: FitResult {
                model: kind.model().name(),
                params: vec![0.; kind.model().n_params()],
                errors: vec![0.; kind.model().n_params()],
                covariance: None,
                chi2: reduced_chi2 * 100.,
                ndf: 100,
                reduced_chi2,
                status,
            },
        }
    }

    fn peak_fit(attempts: Vec<FitAttempt>) -> PeakFit {
        PeakFit {
            estimate: PeakEstimate {
                x: 340.,
                y: 171.,
                sigma_x: 20.,
                sigma_y: 20.,
                max_content: 50.,
            },
            quality: DataQuality::Good,
            region_bins: 200,
            attempts,
        }
    }

    #[test]
    fn lowest_reduced_chi2_is_preferred() {
        let fit = peak_fit(vec![
            attempt_with(ModelKind::Gauss, 3.5, FitStatus::Converged),
            attempt_with(ModelKind::DoubleGauss, 1.2, FitStatus::Converged),
        ]);
        let best = fit.preferred().expect("converged fits");
        assert_eq!(best.label(), "DOUBLE");
    }

    #[test]
    fn failed_fits_are_never_preferred() {
        let fit = peak_fit(vec![
            attempt_with(ModelKind::Gauss, 3.5, FitStatus::Converged),
            attempt_with(ModelKind::DoubleGauss, 0.9, FitStatus::Failed("max iter".into())),
        ]);
        assert_eq!(fit.preferred().map(FitAttempt::label), Some("SINGLE"));
        let hopeless = peak_fit(vec![attempt_with(
            ModelKind::Gauss,
            Float::NAN,
            FitStatus::Converged,
        )]);
        assert!(hopeless.preferred().is_none());
    }

    #[test]
    fn empty_histogram_cannot_be_fitted() {
        let h = Histogram2D::new(20, 0., 2000., 20, 0., 2000.).expect("valid binning");
        let err = fit_compton_peak(&h, &FitOptions::default()).unwrap_err();
        assert!(matches!(err, FitError::NoData(_)));
    }

    #[test]
    fn sparse_histogram_is_reported_but_not_fitted() {
        let mut h = Histogram2D::new(200, 0., 2000., 200, 0., 2000.).expect("valid binning");
        h.fill_weighted(340., 171., 30.);
        h.fill_weighted(350., 171., 10.);
        let fit = fit_compton_peak(&h, &FitOptions::default()).expect("non-empty histogram");
        assert_eq!(fit.quality, DataQuality::Insufficient);
        assert!(fit.attempts.is_empty());
        assert!(fit.preferred().is_none());
    }
}
