//! Energy histograms of the coincidence runs
//!
//! One run was acquired per detector angle. Each coincidence group pairs the
//! energy deposited in detector 1 with the energy deposited in detector 2.

use crate::{
    calibration::{CalibrationPair, DETECTORS},
    error::HistogramError,
    faster::PulseEvent,
    histogram::{Binning, Histogram1D, Histogram2D},
    numeric::Float,
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

/// Binning of both axes of the coincidence histograms (keV)
pub const COINCIDENCE_BINNING: Binning = Binning {
    nbins: 200,
    min: 0.,
    max: 2000.,
};

/// Binning of the single-detector energy spectra (keV)
pub const SPECTRUM_BINNING: Binning = Binning {
    nbins: 2000,
    min: 0.,
    max: 2000.,
};

/// Detector angles that were measured (degrees)
pub const DEFAULT_ANGLES: [u32; 13] = [
    0, 15, 30, 45, 60, 75, 90, 105, 120, 135, 150, 165, 180,
];

/// Acquisition time of each angle of [`DEFAULT_ANGLES`] (s)
pub const DEFAULT_RUN_TIMES: [Float; 13] = [
    13500., 3593., 3605., 7200., 3600., 4813., 7026., 3315., 3601., 3819., 2700., 4810., 56310.,
];

/// Location of a run relative to the data directory, `{angle}` being replaced
/// by the angle in degrees
pub const FILE_TEMPLATE: &str =
    "compton_{angle}_Na-22-colimated.fast/compton_{angle}_Na-22-colimated_0001.fast";

/// One coincidence run
#[derive(Clone, Debug, PartialEq)]
pub struct AngleRun {
    /// Detector angle (degrees)
    pub angle_deg: u32,

    /// Acquisition time (s)
    pub run_time_s: Float,

    /// Data file
    pub path: PathBuf,
}
//
impl AngleRun {
    /// Describe the runs of a set of angles, pairing them with their run times
    /// in order
    pub fn from_template(
        angles: &[u32],
        run_times: &[Float],
        data_dir: &Path,
        template: &str,
    ) -> Vec<Self> {
        angles
            .iter()
            .zip(run_times)
            .map(|(&angle_deg, &run_time_s)| Self {
                angle_deg,
                run_time_s,
                path: data_dir.join(template.replace("{angle}", &angle_deg.to_string())),
            })
            .collect()
    }
}

/// Calibrated energies of the hits of one event, per detector
fn event_energies<'a>(
    event: &'a PulseEvent,
    calibrations: &CalibrationPair,
) -> impl Iterator<Item = (u16, Float)> + 'a {
    let calibrations = *calibrations;
    event.sub_events.iter().filter_map(move |sub| {
        let detector = sub.detector();
        calibrations
            .for_detector(detector)
            .map(|cal| (detector, cal.energy(sub.charge as Float)))
    })
}

/// Histogram every (E₁, E₂) pair of the events with at least two hits
pub fn coincidence_histogram<'a>(
    events: impl IntoIterator<Item = &'a PulseEvent>,
    calibrations: &CalibrationPair,
    binning: &Binning,
) -> Result<Histogram2D, HistogramError> {
    let axis = binning.axis()?;
    let mut h = Histogram2D::with_axes(axis, axis);
    for event in events.into_iter().filter(|event| event.multiplicity >= 2) {
        let (mut e1, mut e2) = (Vec::new(), Vec::new());
        for (detector, energy) in event_energies(event, calibrations) {
            match detector {
                1 => e1.push(energy),
                _ => e2.push(energy),
            }
        }
        for &x in &e1 {
            for &y in &e2 {
                h.fill(x, y);
            }
        }
    }
    Ok(h)
}

/// Calibrated energy spectrum of each detector
pub fn energy_histograms<'a>(
    events: impl IntoIterator<Item = &'a PulseEvent>,
    calibrations: &CalibrationPair,
    binning: &Binning,
) -> Result<BTreeMap<u16, Histogram1D>, HistogramError> {
    let mut histograms = DETECTORS
        .iter()
        .map(|&det| Ok((det, Histogram1D::new(binning.nbins, binning.min, binning.max)?)))
        .collect::<Result<BTreeMap<_, _>, HistogramError>>()?;
    for event in events {
        for (detector, energy) in event_energies(event, calibrations) {
            if let Some(h) = histograms.get_mut(&detector) {
                h.fill(energy);
            }
        }
    }
    Ok(histograms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{calibration::LinearCalibration, faster::SubEvent};

    fn unit_calibrations() -> CalibrationPair {
        let unit = LinearCalibration {
            gain: 1.,
            offset: 0.,
        };
        CalibrationPair {
            detector_1: unit,
            detector_2: unit,
        }
    }

    fn event(hits: &[(u16, i32)]) -> PulseEvent {
        PulseEvent {
            time_ns: 0.,
            label: 0,
            multiplicity: hits.len(),
            sub_events: hits
                .iter()
                .map(|&(label, charge)| SubEvent {
                    label,
                    delta_t_ns: 0.,
                    charge,
                })
                .collect(),
        }
    }

    #[test]
    fn coincidences_pair_every_hit_of_both_detectors() {
        let events = [
            event(&[(1001, 340), (1002, 171)]),
            event(&[(1001, 340), (1001, 600), (2002, 171)]),
            // Singles and foreign detectors do not contribute
            event(&[(1001, 340)]),
            event(&[(1001, 340), (1003, 171)]),
        ];
        let h = coincidence_histogram(&events, &unit_calibrations(), &COINCIDENCE_BINNING)
            .expect("valid binning");
        assert_eq!(h.entries(), 3);
        assert_eq!(h.content(34, 17), 2.);
        assert_eq!(h.content(60, 17), 1.);
    }

    #[test]
    fn spectra_are_split_by_detector() {
        let events = [event(&[(1, 100), (2, 200)]), event(&[(1, 100)])];
        let spectra = energy_histograms(&events, &unit_calibrations(), &SPECTRUM_BINNING)
            .expect("valid binning");
        assert_eq!(spectra[&1].entries(), 2);
        assert_eq!(spectra[&2].entries(), 1);
        assert_eq!(spectra[&1].content(100), 2.);
    }

    #[test]
    fn runs_follow_the_file_template() {
        let runs = AngleRun::from_template(
            &DEFAULT_ANGLES,
            &DEFAULT_RUN_TIMES,
            Path::new("/data"),
            FILE_TEMPLATE,
        );
        assert_eq!(runs.len(), 13);
        assert_eq!(runs[3].angle_deg, 45);
        assert_eq!(runs[3].run_time_s, 7200.);
        assert_eq!(
            runs[3].path,
            Path::new("/data/compton_45_Na-22-colimated.fast/compton_45_Na-22-colimated_0001.fast")
        );
    }
}
