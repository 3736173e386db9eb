//! Compton kinematics, Klein-Nishina angular distribution, and the corrections
//! that turn measured peak rates into something comparable with it

use crate::{
    efficiency::PowerLawEfficiency,
    numeric::{functions::sqr, reals::consts::PI, Float, ELECTRON_MASS_KEV},
};
use prefix_num_ops::real::*;
use serde::Serialize;

/// Default uncertainty on the detector angle (degrees)
pub const ANGLE_ERROR_DEG: Float = 5.;

/// Energy (keV) of a photon of energy `e0` (keV) after Compton scattering by
/// an angle `theta` (radians)
pub fn compton_energy(e0: Float, theta: Float) -> Float {
    e0 / (1. + e0 / ELECTRON_MASS_KEV * (1. - cos(theta)))
}

/// Derivative of the scattered energy with respect to the angle, in keV/deg
///
/// This is the magnitude of the slope, which vanishes at 0° and 180°.
///
pub fn de_dtheta(e0: Float, theta_deg: Float) -> Float {
    let theta = theta_deg.to_radians();
    let denom = 1. + e0 / ELECTRON_MASS_KEV * (1. - cos(theta));
    sqr(e0) / ELECTRON_MASS_KEV * sin(theta) / sqr(denom) * PI / 180.
}

/// Spread of the scattered energy caused by an angular uncertainty (degrees)
pub fn angle_uncertainty(e0: Float, theta_deg: Float, delta_theta_deg: Float) -> Float {
    de_dtheta(e0, theta_deg).abs() * delta_theta_deg
}

/// Klein-Nishina dσ/dΩ at angle `theta` (radians), in units of r_e²
pub fn klein_nishina(e0: Float, theta: Float) -> Float {
    let eps = e0 / ELECTRON_MASS_KEV;
    let eps_prime = eps / (1. + eps * (1. - cos(theta)));
    let ratio = eps_prime / eps;
    0.5 * sqr(ratio) * (ratio + 1. / ratio - sqr(sin(theta)))
}

/// Klein-Nishina cross-section at each angle (degrees), normalized to the
/// largest one
pub fn normalized_cross_sections(e0: Float, angles_deg: &[Float]) -> Vec<Float> {
    let values = angles_deg
        .iter()
        .map(|&deg| klein_nishina(e0, deg.to_radians()))
        .collect::<Vec<_>>();
    let max = values.iter().copied().fold(0., Float::max);
    values.into_iter().map(|v| v / max).collect()
}

/// Peak rate measured at one angle
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RatePoint {
    /// Detector angle (degrees)
    pub angle_deg: Float,

    /// Energy at which the peak was fitted (keV)
    pub energy_kev: Float,

    /// Peak rate (1/s)
    pub rate: Float,

    /// Uncertainty of the rate
    pub rate_err: Float,

    /// Probability that the scattered photon is absorbed in the scatterer,
    /// 0 when no absorption correction is applied
    pub absorption: Float,
}

/// Corrected intensity at one angle, relative to the first angle
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CorrectedPoint {
    /// Detector angle (degrees)
    pub angle_deg: Float,

    /// Rate divided by the efficiency and escape probability, relative to the
    /// first point
    pub intensity: Float,

    /// Uncertainty of the relative intensity
    pub intensity_err: Float,
}

/// Divide each rate by the photo-peak efficiency at its energy and by the
/// probability that the scattered photon escapes the scatterer, then
/// normalize everything to the first point
///
/// The errors are scaled by the same factors. The normalization point's own
/// error is not propagated.
///
pub fn efficiency_corrected(
    points: &[RatePoint],
    efficiency: &PowerLawEfficiency,
) -> Vec<CorrectedPoint> {
    let correction = |p: &RatePoint| efficiency.eval(p.energy_kev) * (1. - p.absorption);
    let Some(reference) = points.first().map(|p| p.rate / correction(p)) else {
        return Vec::new();
    };
    points
        .iter()
        .map(|p| CorrectedPoint {
            angle_deg: p.angle_deg,
            intensity: p.rate / correction(p) / reference,
            intensity_err: p.rate_err / correction(p) / reference,
        })
        .collect()
}

/// Energy sum measured at one angle
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EnergySumPoint {
    /// Detector angle (degrees)
    pub angle_deg: Float,

    /// E₁ + E₂ (keV)
    pub e_sum: Float,

    /// Fit uncertainty of the sum (keV)
    pub e_sum_err: Float,
}

/// Agreement of the energy sums with the annihilation line
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnergySumSummary {
    /// Mean of 511 − E_sum (keV)
    pub mean_deviation: Float,

    /// Root mean square of 511 − E_sum (keV)
    pub rms_deviation: Float,

    /// Sample standard deviation of 511 − E_sum (keV)
    pub std_deviation: Float,

    /// Total uncertainty of each sum, combining the fit error with the
    /// angular spread of both detectors, in input order
    pub total_errors: Vec<Float>,
}

/// Summarize how far the energy sums fall from the annihilation line
///
/// Returns `None` without points. The standard deviation needs two points
/// and is NaN otherwise.
///
pub fn energy_sum_summary(
    points: &[EnergySumPoint],
    angle_error_deg: Float,
) -> Option<EnergySumSummary> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as Float;
    let deviations = points
        .iter()
        .map(|p| ELECTRON_MASS_KEV - p.e_sum)
        .collect::<Vec<_>>();
    let mean = deviations.iter().sum::<Float>() / n;
    let rms = sqrt(deviations.iter().map(|&d| sqr(d)).sum::<Float>() / n);
    let std = if points.len() > 1 {
        sqrt(deviations.iter().map(|&d| sqr(d - mean)).sum::<Float>() / (n - 1.))
    } else {
        Float::NAN
    };
    let total_errors = points
        .iter()
        .map(|p| {
            let angular = angle_uncertainty(ELECTRON_MASS_KEV, p.angle_deg, angle_error_deg);
            sqrt(sqr(p.e_sum_err) + 2. * sqr(angular))
        })
        .collect();
    Some(EnergySumSummary {
        mean_deviation: mean,
        rms_deviation: rms,
        std_deviation: std,
        total_errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn compton_kinematics() {
        assert_relative_eq!(compton_energy(511., 0.), 511.);
        assert_relative_eq!(compton_energy(511., PI / 2.), 255.5);
        assert_relative_eq!(compton_energy(511., PI), 511. / 3.);
    }

    #[test]
    fn slope_matches_finite_differences() {
        let e0 = 511.;
        for theta_deg in [15.0 as Float, 60., 90., 135.] {
            let h = 1e-4;
            let numeric = (compton_energy(e0, (theta_deg - h).to_radians())
                - compton_energy(e0, (theta_deg + h).to_radians()))
                / (2. * h);
            assert_relative_eq!(de_dtheta(e0, theta_deg), numeric, max_relative = 1e-6);
        }
        assert!(de_dtheta(e0, 0.).abs() < 1e-12);
        assert_relative_eq!(
            angle_uncertainty(e0, 90., ANGLE_ERROR_DEG),
            5. * de_dtheta(e0, 90.)
        );
    }

    #[test]
    fn cross_section_limits() {
        // Forward scattering is the Thomson limit whatever the energy
        assert_relative_eq!(klein_nishina(511., 0.), 1.);
        assert_relative_eq!(klein_nishina(1e-6, PI / 2.), 0.5, max_relative = 1e-6);
        let normalized = normalized_cross_sections(511., &[0., 45., 90., 180.]);
        assert_relative_eq!(normalized[0], 1.);
        assert!(normalized.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn corrected_intensities_are_relative_to_the_first_angle() {
        let eff = PowerLawEfficiency {
            norm: 1.,
            alpha: 1.,
        };
        let points = [
            RatePoint {
                angle_deg: 0.,
                energy_kev: 100.,
                rate: 2.,
                rate_err: 0.2,
                absorption: 0.,
            },
            RatePoint {
                angle_deg: 90.,
                energy_kev: 200.,
                rate: 2.,
                rate_err: 0.1,
                absorption: 0.5,
            },
        ];
        let corrected = efficiency_corrected(&points, &eff);
        assert_relative_eq!(corrected[0].intensity, 1.);
        assert_relative_eq!(corrected[0].intensity_err, 0.1);
        assert_relative_eq!(corrected[1].intensity, 4.);
        assert_relative_eq!(corrected[1].intensity_err, 0.2);
        assert!(efficiency_corrected(&[], &eff).is_empty());
    }

    #[test]
    fn absorbed_angles_are_corrected_upwards() {
        let eff = PowerLawEfficiency {
            norm: 1.,
            alpha: 0.,
        };
        let point = |angle_deg, absorption| RatePoint {
            angle_deg,
            energy_kev: 300.,
            rate: 1.,
            rate_err: 0.1,
            absorption,
        };
        let corrected = efficiency_corrected(&[point(20., 0.832), point(120., 0.896)], &eff);
        assert!(corrected[1].intensity > corrected[0].intensity);
        assert_relative_eq!(corrected[1].intensity, 0.168 / 0.104, max_relative = 1e-12);
    }

    #[test]
    fn energy_sum_statistics() {
        let points = [
            EnergySumPoint {
                angle_deg: 0.,
                e_sum: 509.,
                e_sum_err: 3.,
            },
            EnergySumPoint {
                angle_deg: 90.,
                e_sum: 515.,
                e_sum_err: 2.,
            },
        ];
        let summary = energy_sum_summary(&points, ANGLE_ERROR_DEG).expect("two points");
        assert_relative_eq!(summary.mean_deviation, -1.);
        assert_relative_eq!(summary.rms_deviation, 10.0_f64.sqrt());
        assert_relative_eq!(summary.std_deviation, 18.0_f64.sqrt());
        assert_relative_eq!(summary.total_errors[0], 3., epsilon = 1e-9);
        assert!(summary.total_errors[1] > 2.);
        assert!(energy_sum_summary(&[], ANGLE_ERROR_DEG).is_none());
        assert!(energy_sum_summary(&points[..1], ANGLE_ERROR_DEG)
            .expect("one point")
            .std_deviation
            .is_nan());
    }
}
