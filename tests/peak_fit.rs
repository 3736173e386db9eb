//! End-to-end fits of synthetic coincidence peaks

use compton_coincidence::{
    coincidence::COINCIDENCE_BINNING,
    fit::{fit_compton_peak, fit_peak_with, FitOptions},
    histogram::Histogram2D,
    integrate::{integrate_peak, INTEGRATION_GRID},
    model::ModelKind,
    peak::DataQuality,
};
use std::f64::consts::PI;

const AMPLITUDE: f64 = 500.;
const MU: (f64, f64) = (340., 171.);
const SIGMA: (f64, f64) = (25., 20.);

/// Noise-free Gaussian peak on the default coincidence binning
fn synthetic_peak() -> Histogram2D {
    let axis = COINCIDENCE_BINNING.axis().unwrap();
    let mut h = Histogram2D::with_axes(axis, axis);
    for x in axis.centers() {
        for y in axis.centers() {
            let z = ((x - MU.0) / SIGMA.0).powi(2) + ((y - MU.1) / SIGMA.1).powi(2);
            let content = AMPLITUDE * (-0.5 * z).exp();
            if content > 0.5 {
                h.fill_weighted(x, y, content.round());
            }
        }
    }
    h
}

#[test]
fn single_gaussian_recovers_the_peak() {
    let h = synthetic_peak();
    let fit = fit_compton_peak(&h, &FitOptions::default()).unwrap();
    assert_eq!(fit.quality, DataQuality::Good);
    assert!((fit.estimate.x - MU.0).abs() < 10.);
    assert!((fit.estimate.y - MU.1).abs() < 10.);

    let best = fit.preferred().expect("a converged fit");
    let sum = best.energy_sum();
    assert!((sum.e_sum - 511.).abs() < 2., "E_sum = {}", sum.e_sum);
    assert!(sum.deviation.abs() < 2.);
    assert!(best.result.reduced_chi2 < 2.);
}

#[test]
fn fitted_peak_integrates_to_the_analytic_yield() {
    let h = synthetic_peak();
    let fit = fit_peak_with(&h, ModelKind::Gauss, &FitOptions::default()).unwrap();
    let attempt = &fit.attempts[0];
    let model = attempt.kind.model();
    let integral = integrate_peak(model.as_ref(), &attempt.result.params, INTEGRATION_GRID);

    // Gaussian mass within two widths, in bin content × keV² units
    let expected = AMPLITUDE * 2. * PI * SIGMA.0 * SIGMA.1 * (1. - (-2.0_f64).exp());
    let relative = (integral - expected).abs() / expected;
    assert!(relative < 0.05, "integral {integral} vs {expected}");
}
