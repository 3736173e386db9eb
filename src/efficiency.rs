//! Photo-peak efficiency of the NaI detectors
//!
//! The efficiency follows a power law η(E) = N·E^(−α), measured from the
//! calibration sources. Its normalization folds in the source activity and the
//! solid angle seen by the detector, so that η multiplied by the emission rate
//! gives the photo-peak count rate.

use crate::{
    calibration::CalibrationPoint,
    error::FitError,
    fit::{fit_power_law, CurvePoint, FitOptions, FitResult},
    numeric::Float,
    random::{RandomGenerator, DEFAULT_SEED},
    resacc::{SampleAccumulator, SampleSummary},
    scheduling::{self, DEFAULT_BATCH_SIZE},
};
use prefix_num_ops::real::*;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Activity of the Na-22 source when the efficiency was measured (Bq)
pub const SOURCE_ACTIVITY_BQ: Float = 204_200.;

/// Solid angle of the detector as seen from the calibration source position
pub const SOURCE_SOLID_ANGLE: Float = 0.17;

/// Logarithm of the fitted count-rate normalization
const LOG_RATE_NORM: Float = 16.91;

/// Fitted efficiency exponent
const DEFAULT_ALPHA: Float = 2.11;

/// Power-law photo-peak efficiency η(E) = N·E^(−α), with E in keV
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct PowerLawEfficiency {
    /// Normalization N
    pub norm: Float,

    /// Exponent α
    pub alpha: Float,
}
//
impl PowerLawEfficiency {
    /// Efficiency at a given energy (keV)
    pub fn eval(&self, energy: Float) -> Float {
        self.norm * energy.powf(-self.alpha)
    }

    /// Measure the efficiency from the peaks located in calibration runs
    ///
    /// Each peak-bin rate is divided by the number of photons emitted towards
    /// the detector per second, with Poisson errors on the counts, and a
    /// power law is fitted through the resulting points.
    ///
    pub fn from_calibration_peaks(
        peaks: &[CalibrationPoint],
        source: &SourceStrength,
        options: &FitOptions,
    ) -> Result<(Self, FitResult), FitError> {
        let emitted = source.emission_rate();
        let points = peaks
            .iter()
            .map(|peak| CurvePoint {
                x: peak.energy_kev,
                y: peak.rate() / emitted,
                sigma: sqrt(peak.counts.max(0.)) / peak.run_time_s / emitted,
            })
            .collect::<Vec<_>>();
        let fit = fit_power_law(&points, options)?;
        let efficiency = Self {
            norm: fit.params[0],
            alpha: fit.params[1],
        };
        info!(
            norm = efficiency.norm,
            alpha = efficiency.alpha,
            alpha_err = fit.errors[1],
            reduced_chi2 = fit.reduced_chi2,
            "Fitted photo-peak efficiency"
        );
        Ok((efficiency, fit))
    }

    /// Spread of the efficiency at one energy when N and α fluctuate
    ///
    /// N and α are drawn independently from normal distributions of the given
    /// relative widths, and the population mean and standard deviation of the
    /// resulting efficiencies are returned.
    ///
    pub fn mc_uncertainty(&self, energy: Float, config: &EfficiencyUncertainty) -> SampleSummary {
        let alpha_err = config.alpha_rel_err * self.alpha;
        let norm_err = config.norm_rel_err * self.norm;
        let kernel = |num_samples: usize, rng: &mut RandomGenerator| {
            let mut acc = SampleAccumulator::new();
            for _ in 0..num_samples {
                let alpha = rng.normal(self.alpha, alpha_err);
                let norm = rng.normal(self.norm, norm_err);
                acc.integrate(norm * energy.powf(-alpha));
            }
            acc
        };
        scheduling::run_batched(config.samples, DEFAULT_BATCH_SIZE, config.seed, kernel).finalize()
    }
}
//
impl Default for PowerLawEfficiency {
    fn default() -> Self {
        Self {
            norm: exp(LOG_RATE_NORM) / SourceStrength::default().emission_rate(),
            alpha: DEFAULT_ALPHA,
        }
    }
}

/// Photons emitted by the calibration source towards the detector
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct SourceStrength {
    /// Activity (Bq)
    pub activity_bq: Float,

    /// Solid angle of the detector
    pub solid_angle: Float,
}
//
impl SourceStrength {
    /// Photons per second that head for the detector
    pub fn emission_rate(&self) -> Float {
        self.activity_bq * self.solid_angle
    }
}
//
impl Default for SourceStrength {
    fn default() -> Self {
        Self {
            activity_bq: SOURCE_ACTIVITY_BQ,
            solid_angle: SOURCE_SOLID_ANGLE,
        }
    }
}

/// Settings of the efficiency uncertainty estimate
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct EfficiencyUncertainty {
    /// Relative error on α
    pub alpha_rel_err: Float,

    /// Relative error on N
    pub norm_rel_err: Float,

    /// Number of (N, α) draws
    pub samples: usize,

    /// Seed of the random number generator
    pub seed: u64,
}
//
impl Default for EfficiencyUncertainty {
    fn default() -> Self {
        Self {
            alpha_rel_err: 0.1,
            norm_rel_err: 0.2,
            samples: 10_000,
            seed: DEFAULT_SEED,
        }
    }
}

/// Relative energy uncertainty coming from the calibration, at E (keV)
pub fn calibration_uncertainty(energy: Float) -> Float {
    3.4 / energy + 6e-6 / 1.8e-3
}

/// Relative energy resolution of a detector, `constant + stochastic/√E`
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Resolution {
    /// Energy-independent term
    pub constant: Float,

    /// Coefficient of the 1/√E term
    pub stochastic: Float,
}
//
impl Resolution {
    /// Measured resolution of a detector
    pub fn for_detector(detector: u16) -> Option<Self> {
        match detector {
            1 => Some(Self {
                constant: -0.00136,
                stochastic: 1.255,
            }),
            2 => Some(Self {
                constant: 0.0006366,
                stochastic: 0.9572,
            }),
            _ => None,
        }
    }

    /// Relative resolution at E (keV)
    pub fn at(&self, energy: Float) -> Float {
        self.constant + self.stochastic / sqrt(energy)
    }
}

/// Rate of a fitted amplitude and its errors
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AmplitudeErrors {
    /// Amplitude per second
    pub rate: Float,

    /// Statistical error on the rate
    pub stat: Float,

    /// Statistical error plus the resolution systematic
    pub stat_syst: Float,
}

/// Convert a peak amplitude measured at some energy into a rate with
/// Poisson and resolution errors
pub fn amplitude_errors(
    amplitude: Float,
    energy: Float,
    run_time_s: Float,
    resolution: &Resolution,
) -> AmplitudeErrors {
    let poisson = sqrt(amplitude.max(0.));
    AmplitudeErrors {
        rate: amplitude / run_time_s,
        stat: poisson / run_time_s,
        stat_syst: (poisson + amplitude * resolution.at(energy)) / run_time_s,
    }
}
