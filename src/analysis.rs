//! Analysis pipeline, one entry point per command line subcommand
//!
//! Every stage reads the raw `.fast` files or the results of an earlier
//! stage, runs the library code, and leaves text tables plus JSON summaries
//! in the output directory. Unreadable data files are logged and skipped.

use crate::{
    absorption::{absorption_scan, absorption_probability},
    calibration::{
        calibrate as fit_calibration, channel_histograms, max_charge, CalibrationPair,
        CalibrationPoint, CalibrationSource, LinearFit, DETECTORS, SOURCES,
    },
    coincidence::{coincidence_histogram, energy_histograms, AngleRun},
    config::{Configuration, FitStrategy},
    efficiency::{amplitude_errors, calibration_uncertainty, PowerLawEfficiency, Resolution},
    faster::{read_events, PulseEvent},
    fit::{
        fit_compton_peak, fit_peak_with, fit_projections, locate_peak, EnergySum, FitAttempt,
        FitResult, PeakFit, ProjectionFit,
    },
    histogram::{Histogram1D, Histogram2D},
    integrate::{integrate_peak, propagate_mc, PeakYield, PropagationConfig},
    klein_nishina::{
        angle_uncertainty, compton_energy, de_dtheta, efficiency_corrected,
        energy_sum_summary, klein_nishina, normalized_cross_sections, EnergySumPoint,
        EnergySumSummary, RatePoint,
    },
    numeric::{functions::linspace, Float},
    output::{self, read_json, write_fit_rows, write_json, FitRow, TableWriter},
    response::response_matrix,
    Result,
};
use eyre::{bail, eyre, WrapErr};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// Name of the peak fit tables, without extension
pub const FIT_TABLE: &str = "fit_parameters";

/// Energies at which the efficiency is tabulated (keV)
const EFFICIENCY_RANGE: (Float, Float, usize) = (100., 1800., 35);

/// Read the events of a data file, logging and skipping unreadable ones
fn try_read_events(path: &Path) -> Option<Vec<PulseEvent>> {
    match read_events(path) {
        Ok(events) => {
            info!("Read {} events from {}", events.len(), path.display());
            Some(events)
        }
        Err(e) => {
            warn!("Skipping {}: {e}", path.display());
            None
        }
    }
}

/// Data file of a calibration source
fn source_path(data_dir: &Path, source: &CalibrationSource) -> PathBuf {
    data_dir.join(format!("{0}.fast/{0}_0001.fast", source.name))
}

/// Events of every calibration source whose data file could be read
fn source_events(data_dir: &Path) -> Result<Vec<(CalibrationSource, Vec<PulseEvent>)>> {
    let runs = SOURCES
        .iter()
        .filter_map(|source| {
            try_read_events(&source_path(data_dir, source)).map(|events| (*source, events))
        })
        .collect::<Vec<_>>();
    if runs.is_empty() {
        bail!("No calibration run could be read in {}", data_dir.display());
    }
    Ok(runs)
}

/// Calibration of one detector
#[derive(Clone, Debug, Serialize)]
pub struct DetectorCalibration {
    /// Detector number
    pub detector: u16,

    /// Fitted calibration line
    pub fit: LinearFit,

    /// Calibration lines that were located
    pub points: Vec<CalibrationPoint>,
}

/// Locate the calibration lines of every detector and fit their calibrations
fn detector_calibrations(
    config: &Configuration,
    data_dir: &Path,
) -> Result<Vec<DetectorCalibration>> {
    let runs = source_events(data_dir)?;
    let max_q = max_charge(runs.iter().flat_map(|(_, events)| events));
    let histograms = runs
        .iter()
        .map(|(source, events)| Ok((*source, channel_histograms(events, max_q, config.channel_bins)?)))
        .collect::<Result<Vec<_>>>()?;

    let mut calibrations = Vec::new();
    for detector in DETECTORS {
        let guess = config
            .calibrations
            .for_detector(detector)
            .ok_or_else(|| eyre!("No calibration guess for detector {detector}"))?;
        let spectra = histograms
            .iter()
            .filter_map(|(source, hists)| hists.get(&detector).map(|h| (*source, h)))
            .collect::<Vec<_>>();
        let (fit, points) = fit_calibration(&spectra, guess, config.peak_window)
            .wrap_err_with(|| format!("Failed to calibrate detector {detector}"))?;
        info!(
            detector,
            gain = fit.calibration.gain,
            offset = fit.calibration.offset,
            residual_rms = fit.residual_rms,
            "Calibrated detector"
        );
        calibrations.push(DetectorCalibration {
            detector,
            fit,
            points,
        });
    }
    Ok(calibrations)
}

/// Calibrate both detectors from the source runs
///
/// Writes `calibration.dat` with the located lines and `calibration.json`
/// whose `calibrations` entry can be pasted into a configuration file.
///
pub fn calibrate(
    config: &Configuration,
    data_dir: &Path,
    output_dir: &Path,
) -> Result<CalibrationPair> {
    let calibrations = detector_calibrations(config, data_dir)?;
    let mut pair = config.calibrations;
    let mut table = TableWriter::create(
        &output_dir.join("calibration.dat"),
        &["detector", "source", "energy_keV", "channel", "counts", "run_time_s"],
    )?;
    for calibration in &calibrations {
        match calibration.detector {
            1 => pair.detector_1 = calibration.fit.calibration,
            _ => pair.detector_2 = calibration.fit.calibration,
        }
        for point in &calibration.points {
            table.row(&[
                &u32::from(calibration.detector),
                &point.source,
                &point.energy_kev,
                &point.channel,
                &point.counts,
                &point.run_time_s,
            ])?;
        }
    }
    table.finish()?;

    #[derive(Serialize)]
    struct CalibrationReport<'a> {
        calibrations: CalibrationPair,
        detectors: &'a [DetectorCalibration],
    }
    write_json(
        &output_dir.join("calibration.json"),
        &CalibrationReport {
            calibrations: pair,
            detectors: &calibrations,
        },
    )?;
    Ok(pair)
}

/// Measure the photo-peak efficiency of detector 2 and tabulate it with its
/// uncertainties
pub fn efficiency(
    config: &Configuration,
    data_dir: &Path,
    output_dir: &Path,
) -> Result<PowerLawEfficiency> {
    let calibrations = detector_calibrations(config, data_dir)?;
    let points = calibrations
        .iter()
        .find(|c| c.detector == 2)
        .map(|c| c.points.as_slice())
        .unwrap_or_default();
    let (efficiency, fit) =
        PowerLawEfficiency::from_calibration_peaks(points, &config.source, &config.fit)
            .wrap_err("Failed to fit the photo-peak efficiency")?;

    let mut measured = TableWriter::create(
        &output_dir.join("efficiency_points.dat"),
        &["source", "energy_keV", "measured", "fitted"],
    )?;
    let emitted = config.source.emission_rate();
    for point in points {
        measured.row(&[
            &point.source,
            &point.energy_kev,
            &(point.rate() / emitted),
            &efficiency.eval(point.energy_kev),
        ])?;
    }
    measured.finish()?;

    let mut table = TableWriter::create(
        &output_dir.join("efficiency.dat"),
        &[
            "energy_keV",
            "efficiency",
            "mc_mean",
            "mc_std",
            "mc_relative",
            "calibration_err",
            "resolution_1",
            "resolution_2",
        ],
    )?;
    let resolutions = DETECTORS
        .iter()
        .map(|&d| Resolution::for_detector(d).ok_or_else(|| eyre!("No resolution for {d}")))
        .collect::<Result<Vec<_>>>()?;
    let (lo, hi, n) = EFFICIENCY_RANGE;
    for energy in linspace(lo, hi, n) {
        let spread = efficiency.mc_uncertainty(energy, &config.efficiency_uncertainty);
        table.row(&[
            &energy,
            &efficiency.eval(energy),
            &spread.mean,
            &spread.std_dev,
            &spread.relative(),
            &calibration_uncertainty(energy),
            &resolutions[0].at(energy),
            &resolutions[1].at(energy),
        ])?;
    }
    table.finish()?;

    #[derive(Serialize)]
    struct EfficiencyReport<'a> {
        efficiency: PowerLawEfficiency,
        fit: &'a FitResult,
    }
    write_json(
        &output_dir.join("efficiency.json"),
        &EfficiencyReport {
            efficiency,
            fit: &fit,
        },
    )?;
    Ok(efficiency)
}

/// Write a histogram-like table, prefixed with a timestamp
fn write_timestamped(
    path: &Path,
    write: impl FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
) -> Result<()> {
    let mut out = output::create_file(path)?;
    writeln!(out, "# {}", output::timestamp()?)?;
    write(&mut out).wrap_err_with(|| format!("Failed to write {}", path.display()))?;
    out.flush()?;
    Ok(())
}

/// Response matrices of both detectors to the calibration lines
pub fn response(config: &Configuration, data_dir: &Path, output_dir: &Path) -> Result<()> {
    let mut merged = BTreeMap::<u16, Histogram1D>::new();
    for (source, events) in source_events(data_dir)? {
        let spectra = energy_histograms(&events, &config.calibrations, &config.spectrum_binning)?;
        for (detector, spectrum) in spectra {
            info!(
                source = source.name,
                detector,
                entries = spectrum.entries(),
                "Energy spectrum"
            );
            match merged.get_mut(&detector) {
                Some(total) => total.merge(&spectrum)?,
                None => {
                    merged.insert(detector, spectrum);
                }
            }
        }
    }
    for (detector, spectrum) in &merged {
        let response = response_matrix(spectrum, &config.response_lines, config.response_half_width);
        write_timestamped(
            &output_dir.join(format!("response_{detector}.dat")),
            |out| response.write_table(out),
        )?;
    }
    Ok(())
}

/// Coincidence histogram of every readable angle run
fn coincidence_runs(config: &Configuration, data_dir: &Path) -> Result<Vec<(AngleRun, Histogram2D)>> {
    let runs = AngleRun::from_template(
        &config.angles,
        &config.run_times,
        data_dir,
        &config.file_template,
    );
    let mut histograms = Vec::new();
    for run in runs {
        let Some(events) = try_read_events(&run.path) else {
            continue;
        };
        let h = coincidence_histogram(&events, &config.calibrations, &config.coincidence_binning)?;
        info!(
            angle = run.angle_deg,
            coincidences = h.entries(),
            "Built coincidence histogram"
        );
        histograms.push((run, h));
    }
    if histograms.is_empty() {
        bail!("No coincidence run could be read in {}", data_dir.display());
    }
    Ok(histograms)
}

/// Write the coincidence histogram of every angle
pub fn histogram(config: &Configuration, data_dir: &Path, output_dir: &Path) -> Result<usize> {
    let runs = coincidence_runs(config, data_dir)?;
    for (run, h) in &runs {
        write_timestamped(
            &output_dir.join(format!("coincidence_{}.dat", run.angle_deg)),
            |out| h.write_table(out),
        )?;
    }
    Ok(runs.len())
}

/// Errors usable as normal widths, unknown ones counting as zero
fn finite_errors(errors: &[Float]) -> Vec<Float> {
    errors
        .iter()
        .map(|&e| if e.is_finite() { e } else { 0. })
        .collect()
}

/// Table row of one model fitted at one angle
fn attempt_row(run: &AngleRun, attempt: &FitAttempt, propagation: &PropagationConfig) -> FitRow {
    let model = attempt.kind.model();
    let result = &attempt.result;
    let integral = integrate_peak(model.as_ref(), &result.params, propagation.grid);
    let spread = propagate_mc(
        model.as_ref(),
        &result.params,
        &finite_errors(&result.errors),
        propagation,
    );
    let (ix, iy) = model.centroid_indices();
    fit_row(
        run,
        result,
        (result.params[ix], result.errors[ix]),
        (result.params[iy], result.errors[iy]),
        PeakYield::new(integral, spread.std_dev, run.run_time_s),
    )
}

/// Table row of a projection fit
fn projection_row(run: &AngleRun, fit: &ProjectionFit, propagation: &PropagationConfig) -> FitRow {
    let (integral, integral_err) = fit.integral(propagation.grid);
    fit_row(
        run,
        &fit.surface,
        (fit.x.params[0], fit.x.errors[0]),
        (fit.y.params[0], fit.y.errors[0]),
        PeakYield::new(integral, integral_err, run.run_time_s),
    )
}

/// Assemble a fit table row
fn fit_row(
    run: &AngleRun,
    result: &FitResult,
    (mu_x, mu_x_err): (Float, Float),
    (mu_y, mu_y_err): (Float, Float),
    peak_yield: PeakYield,
) -> FitRow {
    let sum = EnergySum::new(mu_x, mu_x_err, mu_y, mu_y_err);
    FitRow {
        angle: run.angle_deg,
        model: result.model.to_owned(),
        mu_x,
        mu_x_err,
        mu_y,
        mu_y_err,
        e_sum: sum.e_sum,
        e_sum_err: sum.e_sum_err,
        deviation: sum.deviation,
        chi2: result.chi2,
        reduced_chi2: result.reduced_chi2,
        status: result.status.to_string(),
        integral: peak_yield.integral,
        integral_err: peak_yield.integral_err,
        rate: peak_yield.rate,
        rate_err: peak_yield.rate_err,
    }
}

/// Fit the coincidence peak of one angle with the configured strategy
fn fit_angle(config: &Configuration, run: &AngleRun, h: &Histogram2D) -> Result<Vec<FitRow>> {
    let propagation = &config.propagation;
    let peak_rows = |peak_fit: PeakFit| {
        info!(
            angle = run.angle_deg,
            quality = %peak_fit.quality,
            bins = peak_fit.region_bins,
            "Data quality"
        );
        peak_fit
            .attempts
            .iter()
            .map(|attempt| attempt_row(run, attempt, propagation))
            .collect::<Vec<_>>()
    };
    let rows = match config.strategy {
        FitStrategy::GaussThenDouble => peak_rows(fit_compton_peak(h, &config.fit)?),
        FitStrategy::Model(kind) => peak_rows(fit_peak_with(h, kind, &config.fit)?),
        FitStrategy::Projections => {
            let (estimate, region) =
                locate_peak(h, &config.fit).ok_or_else(|| eyre!("Empty coincidence histogram"))?;
            info!(
                angle = run.angle_deg,
                quality = %region.quality,
                bins = region.points.len(),
                "Data quality"
            );
            let fit = fit_projections(h, &estimate, &config.fit)?;
            vec![projection_row(run, &fit, propagation)]
        }
    };
    Ok(rows)
}

/// Converged row with the lowest reduced χ² at each angle
pub fn preferred_rows(rows: &[FitRow]) -> Vec<&FitRow> {
    let mut best = BTreeMap::<u32, &FitRow>::new();
    for row in rows
        .iter()
        .filter(|row| row.is_converged() && !row.reduced_chi2.is_nan())
    {
        best.entry(row.angle)
            .and_modify(|current| {
                if row.reduced_chi2 < current.reduced_chi2 {
                    *current = row;
                }
            })
            .or_insert(row);
    }
    best.into_values().collect()
}

/// Fit the coincidence peak of every angle
///
/// Writes every fitted model to `fit_parameters.dat` and its JSON twin, and
/// the rates of the preferred fits with their statistical and resolution
/// errors to `amplitude_rates.dat`.
///
pub fn fit(config: &Configuration, data_dir: &Path, output_dir: &Path) -> Result<Vec<FitRow>> {
    let mut rows = Vec::new();
    for (run, h) in coincidence_runs(config, data_dir)? {
        match fit_angle(config, &run, &h) {
            Ok(angle_rows) => rows.extend(angle_rows),
            Err(e) => warn!("No fit at {} degrees: {e:#}", run.angle_deg),
        }
    }
    write_fit_rows(output_dir, FIT_TABLE, &rows)?;

    let resolution = Resolution::for_detector(2).ok_or_else(|| eyre!("No resolution for 2"))?;
    let run_times = config
        .angles
        .iter()
        .zip(&config.run_times)
        .collect::<BTreeMap<_, _>>();
    let mut table = TableWriter::create(
        &output_dir.join("amplitude_rates.dat"),
        &["angle", "energy_keV", "rate", "stat_err", "stat_syst_err"],
    )?;
    for row in preferred_rows(&rows) {
        let Some(&&run_time) = run_times.get(&row.angle) else {
            continue;
        };
        let errors = amplitude_errors(row.integral, row.mu_y, run_time, &resolution);
        table.row(&[
            &row.angle,
            &row.mu_y,
            &errors.rate,
            &errors.stat,
            &errors.stat_syst,
        ])?;
        info!(
            angle = row.angle,
            e_sum = row.e_sum,
            deviation = row.deviation,
            rate = row.rate,
            "Preferred fit"
        );
    }
    table.finish()?;
    Ok(rows)
}

/// Tabulate the self-absorption probability against the detector angle
pub fn absorption(config: &Configuration, output_dir: &Path) -> Result<Vec<(Float, Float)>> {
    let scan = absorption_scan(&config.absorption, config.absorption_scan_points);
    let mut table = TableWriter::create(
        &output_dir.join("absorption.dat"),
        &["angle_deg", "absorption"],
    )?;
    for (angle, probability) in &scan {
        table.row(&[angle, probability])?;
    }
    table.finish()?;
    Ok(scan)
}

/// Results of the comparison with theory
#[derive(Clone, Debug, Serialize)]
pub struct TheoryReport {
    /// Angles of the preferred fits (degrees)
    pub angles: Vec<Float>,

    /// Agreement of the energy sums with the annihilation line
    pub energy_sums: Option<EnergySumSummary>,
}

/// Tabulate the Klein-Nishina expectations and, when peak fits exist, the
/// corrected intensities and energy sums to compare with them
pub fn theory(config: &Configuration, output_dir: &Path) -> Result<Option<TheoryReport>> {
    let e0 = config.beam_energy;
    let angles = linspace(0., 180., 181).collect::<Vec<_>>();
    let cross_sections = normalized_cross_sections(e0, &angles);
    let mut table = TableWriter::create(
        &output_dir.join("klein_nishina.dat"),
        &["angle_deg", "energy_keV", "cross_section", "dE_dtheta", "energy_err"],
    )?;
    for (&angle, cross_section) in angles.iter().zip(&cross_sections) {
        table.row(&[
            &angle,
            &compton_energy(e0, angle.to_radians()),
            cross_section,
            &de_dtheta(e0, angle),
            &angle_uncertainty(e0, angle, config.angle_error_deg),
        ])?;
    }
    table.finish()?;

    let fit_path = output_dir.join(format!("{FIT_TABLE}.json"));
    if !fit_path.exists() {
        info!(
            "No {} yet, skipping the comparison with measurements",
            fit_path.display()
        );
        return Ok(None);
    }
    let rows: Vec<FitRow> = read_json(&fit_path)?;
    let preferred = preferred_rows(&rows);

    let rate_points = preferred
        .iter()
        .map(|row| {
            let angle_deg = Float::from(row.angle);
            let absorption = if config.absorption_correction {
                let p = absorption_probability(angle_deg.to_radians(), &config.absorption);
                if p < 1. {
                    p
                } else {
                    warn!(angle = row.angle, "No scattered photon escapes, not correcting");
                    0.
                }
            } else {
                0.
            };
            RatePoint {
                angle_deg,
                energy_kev: row.mu_x,
                rate: row.rate,
                rate_err: row.rate_err,
                absorption,
            }
        })
        .collect::<Vec<_>>();
    let corrected = efficiency_corrected(&rate_points, &config.efficiency);
    let mut table = TableWriter::create(
        &output_dir.join("corrected_intensities.dat"),
        &["angle_deg", "intensity", "intensity_err", "klein_nishina"],
    )?;
    let reference = corrected
        .first()
        .map(|p| klein_nishina(e0, p.angle_deg.to_radians()));
    for point in &corrected {
        let expected = reference
            .map(|r| klein_nishina(e0, point.angle_deg.to_radians()) / r)
            .unwrap_or(Float::NAN);
        table.row(&[
            &point.angle_deg,
            &point.intensity,
            &point.intensity_err,
            &expected,
        ])?;
    }
    table.finish()?;

    let sum_points = preferred
        .iter()
        .map(|row| EnergySumPoint {
            angle_deg: Float::from(row.angle),
            e_sum: row.e_sum,
            e_sum_err: row.e_sum_err,
        })
        .collect::<Vec<_>>();
    let summary = energy_sum_summary(&sum_points, config.angle_error_deg);
    if let Some(summary) = &summary {
        info!(
            mean = summary.mean_deviation,
            rms = summary.rms_deviation,
            std = summary.std_deviation,
            "Energy sums against 511 keV"
        );
        let mut table = TableWriter::create(
            &output_dir.join("energy_sums.dat"),
            &["angle_deg", "E_sum", "E_sum_err", "total_err"],
        )?;
        for (point, total) in sum_points.iter().zip(&summary.total_errors) {
            table.row(&[&point.angle_deg, &point.e_sum, &point.e_sum_err, total])?;
        }
        table.finish()?;
    }

    let report = TheoryReport {
        angles: rate_points.iter().map(|p| p.angle_deg).collect(),
        energy_sums: summary,
    };
    write_json(&output_dir.join("theory.json"), &report)?;
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(angle: u32, model: &str, reduced_chi2: Float, status: &str) -> FitRow {
        FitRow {
            angle,
            model: model.into(),
            mu_x: 400.,
            mu_x_err: 1.,
            mu_y: 110.,
            mu_y_err: 1.,
            e_sum: 510.,
            e_sum_err: 1.4,
            deviation: -1.,
            chi2: reduced_chi2 * 10.,
            reduced_chi2,
            status: status.into(),
            integral: 1000.,
            integral_err: 30.,
            rate: 1.,
            rate_err: 0.03,
        }
    }

    #[test]
    fn preferred_rows_pick_the_best_converged_fit_per_angle() {
        let rows = [
            row(30, "G2D", 3.1, "CONVERGED"),
            row(30, "G2D_double", 1.2, "CONVERGED"),
            row(45, "G2D", 0.9, "FAILED"),
            row(45, "G2D_double", Float::NAN, "CONVERGED"),
            row(15, "G2D", 1.5, "CONVERGED"),
        ];
        let preferred = preferred_rows(&rows);
        assert_eq!(preferred.len(), 2);
        assert_eq!(preferred[0].angle, 15);
        assert_eq!(preferred[1].angle, 30);
        assert_eq!(preferred[1].model, "G2D_double");
    }

    #[test]
    fn theory_without_fits_only_tabulates_klein_nishina() {
        let dir = tempfile::tempdir().unwrap();
        let report = theory(&Configuration::default(), dir.path()).unwrap();
        assert!(report.is_none());
        let table = std::fs::read_to_string(dir.path().join("klein_nishina.dat")).unwrap();
        assert_eq!(table.lines().count(), 2 + 181);
        assert!(table.lines().nth(2).unwrap().starts_with("0 511 1 0 0"));
    }

    #[test]
    fn theory_compares_preferred_fits() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            row(0, "G2D", 1.1, "CONVERGED"),
            row(90, "G2D", 1.3, "CONVERGED"),
        ];
        write_fit_rows(dir.path(), FIT_TABLE, &rows).unwrap();
        let report = theory(&Configuration::default(), dir.path())
            .unwrap()
            .expect("fit results exist");
        assert_eq!(report.angles, vec![0., 90.]);
        let sums = report.energy_sums.expect("two angles");
        assert!((sums.mean_deviation - 1.).abs() < 1e-9);
        let corrected =
            std::fs::read_to_string(dir.path().join("corrected_intensities.dat")).unwrap();
        assert_eq!(corrected.lines().count(), 4);
        assert!(corrected.lines().nth(2).unwrap().starts_with("0 1 0.03 1"));
    }

    #[test]
    fn missing_data_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = Configuration::default();
        assert!(histogram(&config, dir.path(), dir.path()).is_err());
        assert!(calibrate(&config, dir.path(), dir.path()).is_err());
    }
}
