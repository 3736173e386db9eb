//! Fits of one-dimensional curves

use super::{
    hessian_errors, CurveObjective, CurvePoint, FitOptions, FitResult, Minimizer, Objective,
};
use crate::{calibration::fit_linear, error::FitError, numeric::Float};
use prefix_num_ops::real::*;
use tracing::debug;

/// Fit a curve to measured points by minimizing the ordinary χ²
///
/// The covariance is the least-squares one, 2·H⁻¹, rescaled by the reduced χ²
/// so that the errors reflect the observed scatter of the points. Without
/// degrees of freedom, only the factor 2 is applied.
///
pub fn fit_curve<F>(
    name: &'static str,
    curve: F,
    points: &[CurvePoint],
    init: &[Float],
    bounds: &[(Float, Float)],
    options: &FitOptions,
) -> Result<FitResult, FitError>
where
    F: Fn(&[Float], Float) -> Float + Send + Sync,
{
    let objective = CurveObjective::new(curve, points);
    let n_points = objective.num_points();
    if n_points == 0 {
        return Err(FitError::NoData(format!("no points to fit with {name}")));
    }
    let minimized = Minimizer::new(options.minimizer).minimize(&objective, init, bounds)?;
    debug!("{name} fit: {minimized}");
    let chi2 = objective.value(&minimized.params);
    let ndf = n_points.saturating_sub(minimized.params.len());
    let scatter = if ndf > 0 { chi2 / ndf as Float } else { 1. };
    let uncertainties =
        hessian_errors(&objective, &minimized.params, options.hessian_step).scaled(2. * scatter);
    Ok(FitResult::new(name, minimized, uncertainties, chi2, n_points))
}

/// Fit a power law `N·E^(−α)` to (energy, value) points
///
/// Parameters: `[N, α]`. The minimization starts from a straight-line fit in
/// log-log space when all values are positive, and from α = 3, N = 1
/// otherwise.
///
pub fn fit_power_law(points: &[CurvePoint], options: &FitOptions) -> Result<FitResult, FitError> {
    let log_points = points
        .iter()
        .filter(|p| p.x > 0. && p.y > 0.)
        .map(|p| (ln(p.x), ln(p.y)))
        .collect::<Vec<_>>();
    let init = match fit_linear(&log_points) {
        Ok(line) if log_points.len() == points.len() => {
            vec![exp(line.calibration.offset), -line.calibration.gain]
        }
        _ => vec![1., 3.],
    };
    let bounds = [(0., Float::INFINITY), (-10., 10.)];
    fit_curve(
        "POWER_LAW",
        |p: &[Float], x| p[0] * x.powf(-p[1]),
        points,
        &init,
        &bounds,
        options,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn straight_line() {
        // Alternating ±0.1 residuals, so that χ²/ndf is about one
        let points = (0..10)
            .map(|i| CurvePoint {
                x: i as Float,
                y: 2. * i as Float - 1. + if i % 2 == 0 { 0.1 } else { -0.1 },
                sigma: 0.1,
            })
            .collect::<Vec<_>>();
        let result = fit_curve(
            "LINE",
            |p: &[Float], x| p[0] + p[1] * x,
            &points,
            &[0., 0.],
            &[(-100., 100.), (-100., 100.)],
            &FitOptions::default(),
        )
        .unwrap();
        assert_relative_eq!(result.params[0], -1., epsilon = 0.1);
        assert_relative_eq!(result.params[1], 2., epsilon = 0.02);
        assert_eq!(result.ndf, 8);
        assert!(result.chi2 > 1.);
        // Least-squares slope error σ/√Σ(x - x̄)², times √(χ²/ndf)
        let sxx = (0..10).map(|i| (i as Float - 4.5).powi(2)).sum::<Float>();
        let scatter = (result.chi2 / result.ndf as Float).sqrt();
        assert_relative_eq!(
            result.errors[1],
            0.1 / sxx.sqrt() * scatter,
            max_relative = 1e-3
        );
    }

    #[test]
    fn power_law_of_an_efficiency_curve() {
        let truth = |e: Float| 634. * e.powf(-2.11);
        let points = [511., 570., 662., 1064., 1173., 1274., 1332.]
            .into_iter()
            .map(|x| CurvePoint {
                x,
                y: truth(x),
                sigma: 0.01 * truth(x),
            })
            .collect::<Vec<_>>();
        let result = fit_power_law(&points, &FitOptions::default()).unwrap();
        assert_relative_eq!(result.params[1], 2.11, max_relative = 1e-3);
        assert_relative_eq!(result.params[0], 634., max_relative = 1e-2);
    }

    #[test]
    fn nothing_to_fit() {
        let err = fit_power_law(&[], &FitOptions::default()).unwrap_err();
        assert!(matches!(err, FitError::NoData(_)));
    }
}
