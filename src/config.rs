//! Mechanism for loading and sharing the analysis configuration

use crate::{
    absorption::AbsorptionConfig,
    calibration::{CalibrationPair, CHANNEL_BINS, PEAK_WINDOW},
    coincidence::{
        COINCIDENCE_BINNING, DEFAULT_ANGLES, DEFAULT_RUN_TIMES, FILE_TEMPLATE, SPECTRUM_BINNING,
    },
    efficiency::{EfficiencyUncertainty, PowerLawEfficiency, SourceStrength},
    fit::FitOptions,
    histogram::Binning,
    integrate::PropagationConfig,
    klein_nishina::ANGLE_ERROR_DEG,
    model::ModelKind,
    numeric::{Float, ELECTRON_MASS_KEV},
    response::{DEFAULT_TRUE_LINES, RESPONSE_HALF_WIDTH},
    Result,
};
use eyre::{ensure, WrapErr};
use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};
use tracing::info;

/// How the coincidence peak of each angle is fitted
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitStrategy {
    /// Single Gaussian, then a double Gaussian if the first one is poor
    #[default]
    GaussThenDouble,

    /// One chosen model
    Model(ModelKind),

    /// Crystal-Ball fits of the projections, then of the amplitude in 2D
    Projections,
}

/// Analysis configuration
///
/// Every field has a default matching the setup that was used for data
/// taking, so a configuration file only needs to list what differs.
///
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    /// Channel to energy calibrations of the detectors
    pub calibrations: CalibrationPair,

    /// Number of bins of the raw channel spectra
    pub channel_bins: usize,

    /// Half-width of the calibration peak search, in bins
    pub peak_window: usize,

    /// Measured detector angles (degrees)
    pub angles: Vec<u32>,

    /// Acquisition time of each angle (s)
    pub run_times: Vec<Float>,

    /// Data file of each angle, relative to the data directory
    pub file_template: String,

    /// Binning of both axes of the coincidence histograms (keV)
    pub coincidence_binning: Binning,

    /// Binning of the single-detector energy spectra (keV)
    pub spectrum_binning: Binning,

    /// Peak fitting strategy
    pub strategy: FitStrategy,

    /// Peak finding and fitting settings
    pub fit: FitOptions,

    /// Monte-Carlo propagation of the fit errors to the peak yields
    pub propagation: PropagationConfig,

    /// Photo-peak efficiency
    pub efficiency: PowerLawEfficiency,

    /// Uncertainty model of the efficiency
    pub efficiency_uncertainty: EfficiencyUncertainty,

    /// Calibration source strength, for efficiency measurements
    pub source: SourceStrength,

    /// Self-absorption Monte-Carlo
    pub absorption: AbsorptionConfig,

    /// Number of detector angles in the absorption scan
    pub absorption_scan_points: usize,

    /// Truth that corrected intensities include the self-absorption
    pub absorption_correction: bool,

    /// True lines of the response matrices (keV)
    pub response_lines: Vec<Float>,

    /// Half-width of the response windows (keV)
    pub response_half_width: Float,

    /// Energy of the photons entering the scatterer (keV)
    pub beam_energy: Float,

    /// Uncertainty of the detector angles (degrees)
    pub angle_error_deg: Float,
}
//
impl Configuration {
    /// Load the configuration from a JSON file, check it, and log it
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .wrap_err_with(|| format!("Failed to open configuration {}", path.display()))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .wrap_err_with(|| format!("Failed to parse configuration {}", path.display()))?;
        config.check()?;
        config.print();
        Ok(config)
    }

    /// Check that the configuration makes sense
    pub fn check(&self) -> Result<()> {
        for detector in [1, 2] {
            let gain = self.calibrations.for_detector(detector).map(|cal| cal.gain);
            ensure!(
                gain.is_some_and(|gain| gain > 0.),
                "Detector {detector} calibration gain must be positive"
            );
        }
        ensure!(!self.angles.is_empty(), "Please analyze at least one angle");
        ensure!(
            self.run_times.len() == self.angles.len(),
            "Got {} run times for {} angles",
            self.run_times.len(),
            self.angles.len()
        );
        ensure!(
            self.run_times.iter().all(|&t| t > 0.),
            "Run times must be positive"
        );
        ensure!(self.channel_bins > 0, "Channel spectra need bins");
        for (name, binning) in [
            ("coincidence", &self.coincidence_binning),
            ("spectrum", &self.spectrum_binning),
        ] {
            binning
                .axis()
                .wrap_err_with(|| format!("Invalid {name} binning"))?;
        }
        ensure!(
            self.propagation.samples > 0 && self.propagation.grid > 1,
            "Error propagation needs samples and at least two integration nodes"
        );
        ensure!(
            self.absorption.geometry.radius > 0. && self.absorption.density > 0.,
            "The scatterer needs a positive radius and density"
        );
        Ok(())
    }

    /// Log the configuration
    pub fn print(&self) {
        let cal_1 = &self.calibrations.detector_1;
        let cal_2 = &self.calibrations.detector_2;
        info!("Detector 1 calibration : {} q + {}", cal_1.gain, cal_1.offset);
        info!("Detector 2 calibration : {} q + {}", cal_2.gain, cal_2.offset);
        info!("Angles (deg)           : {:?}", self.angles);
        info!("Run times (s)          : {:?}", self.run_times);
        info!("Fit strategy           : {:?}", self.strategy);
        info!("Moment box (bins)      : {}", self.fit.moment_box);
        info!("Fit region (sigmas)    : {}", self.fit.region_sigmas);
        info!("Single fit threshold   : {}", self.fit.single_fit_threshold);
        info!("Error propagation      : {} samples", self.propagation.samples);
        info!(
            "Efficiency             : {} E^-{}",
            self.efficiency.norm, self.efficiency.alpha
        );
    }
}
//
impl Default for Configuration {
    fn default() -> Self {
        Self {
            calibrations: CalibrationPair::default(),
            channel_bins: CHANNEL_BINS,
            peak_window: PEAK_WINDOW,
            angles: DEFAULT_ANGLES.to_vec(),
            run_times: DEFAULT_RUN_TIMES.to_vec(),
            file_template: FILE_TEMPLATE.to_owned(),
            coincidence_binning: COINCIDENCE_BINNING,
            spectrum_binning: SPECTRUM_BINNING,
            strategy: FitStrategy::default(),
            fit: FitOptions::default(),
            propagation: PropagationConfig::default(),
            efficiency: PowerLawEfficiency::default(),
            efficiency_uncertainty: EfficiencyUncertainty::default(),
            source: SourceStrength::default(),
            absorption: AbsorptionConfig::default(),
            absorption_scan_points: 120,
            absorption_correction: false,
            response_lines: DEFAULT_TRUE_LINES.to_vec(),
            response_half_width: RESPONSE_HALF_WIDTH,
            beam_energy: ELECTRON_MASS_KEV,
            angle_error_deg: ANGLE_ERROR_DEG,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(text: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_are_valid() {
        let config = Configuration::default();
        config.check().unwrap();
        assert_eq!(config.angles.len(), 13);
        assert_eq!(config.coincidence_binning.nbins, 200);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write_config(
            r#"{
                "angles": [45, 90],
                "run_times": [7200, 7026],
                "strategy": { "model": "tilted-double-gauss" },
                "fit": { "smooth": true, "moment_box": 10 }
            }"#,
        );
        let config = Configuration::load(file.path()).unwrap();
        assert_eq!(config.angles, vec![45, 90]);
        assert_eq!(
            config.strategy,
            FitStrategy::Model(ModelKind::TiltedDoubleGauss)
        );
        assert!(config.fit.smooth);
        assert_eq!(config.fit.moment_box, 10);
        assert_eq!(config.fit.region_sigmas, FitOptions::default().region_sigmas);
        assert_eq!(config.calibrations, CalibrationPair::default());
    }

    #[test]
    fn inconsistent_files_are_rejected() {
        let mismatched = write_config(r#"{ "angles": [0, 15], "run_times": [100] }"#);
        assert!(Configuration::load(mismatched.path()).is_err());
        let no_angles = write_config(r#"{ "angles": [], "run_times": [] }"#);
        assert!(Configuration::load(no_angles.path()).is_err());
        let typo = write_config(r#"{ "angels": [0] }"#);
        assert!(Configuration::load(typo.path()).is_err());
        let bad_binning = write_config(
            r#"{ "coincidence_binning": { "nbins": 200, "min": 10, "max": 0 } }"#,
        );
        assert!(Configuration::load(bad_binning.path()).is_err());
    }
}
