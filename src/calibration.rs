//! Channel to energy calibration of the two NaI detectors
//!
//! Each detector is calibrated with a straight line fitted through the photo
//! peaks of a few laboratory sources. The previous calibration gives the
//! channel around which each peak is searched.

use crate::{
    error::{FitError, HistogramError},
    faster::PulseEvent,
    histogram::Histogram1D,
    numeric::{functions::sqr, Float},
};
use prefix_num_ops::real::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Detectors of the setup
pub const DETECTORS: [u16; 2] = [1, 2];

/// Default number of bins of the channel spectra
pub const CHANNEL_BINS: usize = 2000;

/// Default half-width of the peak search window, in bins
pub const PEAK_WINDOW: usize = 20;

/// Linear map from channel to energy (keV)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearCalibration {
    /// keV per channel
    pub gain: Float,

    /// Energy of channel zero (keV)
    pub offset: Float,
}
//
impl LinearCalibration {
    /// Energy deposited for a channel
    pub fn energy(&self, channel: Float) -> Float {
        self.gain * channel + self.offset
    }

    /// Channel at which an energy is expected
    pub fn channel(&self, energy: Float) -> Float {
        (energy - self.offset) / self.gain
    }

    /// Calibration in use before this analysis, for a given detector
    pub fn default_for(detector: u16) -> Option<Self> {
        CalibrationPair::default().for_detector(detector).copied()
    }
}

/// Calibrations of both detectors
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPair {
    /// Calibration of detector 1
    pub detector_1: LinearCalibration,

    /// Calibration of detector 2
    pub detector_2: LinearCalibration,
}
//
impl CalibrationPair {
    /// Calibration of one detector of the setup
    pub fn for_detector(&self, detector: u16) -> Option<&LinearCalibration> {
        match detector {
            1 => Some(&self.detector_1),
            2 => Some(&self.detector_2),
            _ => None,
        }
    }
}
//
impl Default for CalibrationPair {
    fn default() -> Self {
        Self {
            detector_1: LinearCalibration {
                gain: 0.001841,
                offset: -31.41,
            },
            detector_2: LinearCalibration {
                gain: 0.001628,
                offset: -16.36,
            },
        }
    }
}

/// A laboratory calibration source
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationSource {
    /// Isotope name, also used to locate its data file
    pub name: &'static str,

    /// Gamma lines used for calibration (keV)
    pub lines_kev: &'static [Float],

    /// Acquisition time of the calibration run (s)
    pub run_time_s: Float,
}

/// Sources that were measured for calibration
pub const SOURCES: [CalibrationSource; 4] = [
    CalibrationSource {
        name: "Na-22",
        lines_kev: &[511., 1274.],
        run_time_s: 300.,
    },
    CalibrationSource {
        name: "Co-60",
        lines_kev: &[1173., 1332.],
        run_time_s: 300.,
    },
    CalibrationSource {
        name: "Cs-137",
        lines_kev: &[662.],
        run_time_s: 300.,
    },
    CalibrationSource {
        name: "Bi-207",
        lines_kev: &[570., 1064.],
        run_time_s: 301.,
    },
];

/// Location of a peak in a spectrum
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PeakCentroid {
    /// Center of the highest bin (spectrum units)
    pub position: Float,

    /// Content of the highest bin
    pub counts: Float,
}

/// Find the highest bin within `window` bins of the bin containing `guess`
///
/// A guess outside of the spectrum is clamped to its first or last bin.
///
pub fn peak_centroid(hist: &Histogram1D, guess: Float, window: usize) -> Option<PeakCentroid> {
    let axis = hist.axis();
    let nbins = axis.nbins();
    let guess_bin = match axis.find_bin(guess) {
        Some(bin) => bin,
        None if guess < axis.min() => 0,
        None => nbins - 1,
    };
    let start = guess_bin.saturating_sub(window);
    let end = (guess_bin + window).min(nbins - 1);
    let (bin, counts) = (start..=end)
        .map(|bin| (bin, hist.content(bin)))
        .fold(None, |best: Option<(usize, Float)>, (bin, c)| match best {
            Some((_, best_c)) if c <= best_c => best,
            _ => Some((bin, c)),
        })?;
    Some(PeakCentroid {
        position: axis.bin_center(bin),
        counts,
    })
}

/// Largest charge seen on the calibrated detectors
pub fn max_charge<'a>(events: impl IntoIterator<Item = &'a PulseEvent>) -> Float {
    events
        .into_iter()
        .flat_map(|event| event.sub_events.iter())
        .filter(|sub| DETECTORS.contains(&sub.detector()))
        .map(|sub| sub.charge as Float)
        .fold(0., Float::max)
}

/// Histogram the raw charges of each detector over [0, max_q)
pub fn channel_histograms<'a>(
    events: impl IntoIterator<Item = &'a PulseEvent>,
    max_q: Float,
    nbins: usize,
) -> Result<BTreeMap<u16, Histogram1D>, HistogramError> {
    let mut histograms = DETECTORS
        .iter()
        .map(|&det| Ok((det, Histogram1D::new(nbins, 0., max_q)?)))
        .collect::<Result<BTreeMap<_, _>, HistogramError>>()?;
    for sub in events.into_iter().flat_map(|event| event.sub_events.iter()) {
        if let Some(hist) = histograms.get_mut(&sub.detector()) {
            hist.fill(sub.charge as Float);
        }
    }
    Ok(histograms)
}

/// Straight line fitted through calibration points
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LinearFit {
    /// Best calibration
    pub calibration: LinearCalibration,

    /// Uncertainty on the gain (zero without residual degrees of freedom)
    pub gain_err: Float,

    /// Uncertainty on the offset (zero without residual degrees of freedom)
    pub offset_err: Float,

    /// Root mean square of the energy residuals (keV)
    pub residual_rms: Float,
}

/// Least-squares fit of `energy = gain * channel + offset`
pub fn fit_linear(points: &[(Float, Float)]) -> Result<LinearFit, FitError> {
    let n = points.len();
    if n < 2 {
        return Err(FitError::NoData(format!(
            "a calibration line needs two points, got {n}"
        )));
    }
    let nf = n as Float;
    let mean_q = points.iter().map(|p| p.0).sum::<Float>() / nf;
    let mean_e = points.iter().map(|p| p.1).sum::<Float>() / nf;
    let s_qq = points.iter().map(|p| sqr(p.0 - mean_q)).sum::<Float>();
    let s_qe = points
        .iter()
        .map(|p| (p.0 - mean_q) * (p.1 - mean_e))
        .sum::<Float>();
    if s_qq <= 0. {
        return Err(FitError::Degenerate(
            "all calibration points share the same channel".into(),
        ));
    }
    let gain = s_qe / s_qq;
    let offset = mean_e - gain * mean_q;
    let calibration = LinearCalibration { gain, offset };

    let sum_sq_res = points
        .iter()
        .map(|&(q, e)| sqr(e - calibration.energy(q)))
        .sum::<Float>();
    let (gain_err, offset_err) = if n > 2 {
        let sigma2 = sum_sq_res / (nf - 2.);
        let sum_qq = points.iter().map(|p| sqr(p.0)).sum::<Float>();
        (sqrt(sigma2 / s_qq), sqrt(sigma2 * sum_qq / (nf * s_qq)))
    } else {
        (0., 0.)
    };
    Ok(LinearFit {
        calibration,
        gain_err,
        offset_err,
        residual_rms: sqrt(sum_sq_res / nf),
    })
}

/// One (channel, energy) pair located in a calibration spectrum
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CalibrationPoint {
    /// Source which produced the line
    pub source: &'static str,

    /// Line energy (keV)
    pub energy_kev: Float,

    /// Centroid channel
    pub channel: Float,

    /// Counts in the peak bin
    pub counts: Float,

    /// Acquisition time of the source run (s)
    pub run_time_s: Float,
}
//
impl CalibrationPoint {
    /// Peak-bin counts per second
    pub fn rate(&self) -> Float {
        self.counts / self.run_time_s
    }
}

/// Locate the lines of every source in its spectrum and fit a calibration
///
/// `guess` is the previous calibration of the detector, used to predict
/// where each line sits.
///
pub fn calibrate(
    spectra: &[(CalibrationSource, &Histogram1D)],
    guess: &LinearCalibration,
    window: usize,
) -> Result<(LinearFit, Vec<CalibrationPoint>), FitError> {
    let mut points = Vec::new();
    for (source, spectrum) in spectra {
        for &energy in source.lines_kev {
            let predicted = guess.channel(energy);
            match peak_centroid(spectrum, predicted, window) {
                Some(peak) => {
                    debug!(
                        source = source.name,
                        energy, channel = peak.position, "Located calibration line"
                    );
                    points.push(CalibrationPoint {
                        source: source.name,
                        energy_kev: energy,
                        channel: peak.position,
                        counts: peak.counts,
                        run_time_s: source.run_time_s,
                    })
                }
                None => warn!(source = source.name, energy, "Calibration line not found"),
            }
        }
    }
    let pairs = points
        .iter()
        .map(|p| (p.channel, p.energy_kev))
        .collect::<Vec<_>>();
    Ok((fit_linear(&pairs)?, points))
}
