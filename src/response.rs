//! Detector response to the calibration lines

use crate::{histogram::Histogram1D, numeric::Float};
use nalgebra::DMatrix;
use std::io::{self, Write};

/// Half-width of the window summed around each line (keV)
pub const RESPONSE_HALF_WIDTH: Float = 5.;

/// Lines whose response is measured by default (keV)
pub const DEFAULT_TRUE_LINES: [Float; 4] = [570., 1064., 1275., 1770.];

/// Response of a detector to a set of gamma lines
///
/// Row `i` holds the energy spectrum measured around true line `i`, with one
/// column per spectrum bin, normalized to unit sum.
///
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseMatrix {
    /// True line energies (keV), one per row
    pub lines: Vec<Float>,

    /// Bin centers of the measured spectrum (keV), one per column
    pub energies: Vec<Float>,

    /// Normalized contents
    pub matrix: DMatrix<Float>,
}
//
impl ResponseMatrix {
    /// Write the non-zero entries as `line energy weight` rows
    pub fn write_table(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "# true_keV measured_keV weight")?;
        for (i, line) in self.lines.iter().enumerate() {
            for (j, energy) in self.energies.iter().enumerate() {
                let weight = self.matrix[(i, j)];
                if weight != 0. {
                    writeln!(out, "{line} {energy} {weight}")?;
                }
            }
        }
        Ok(())
    }
}

/// Build the response matrix of an energy spectrum
///
/// Bins whose center lies within ±`half_width` of a true line are copied into
/// that line's row, and every row is then normalized to unit sum. Lines that
/// collected nothing keep an all-zero row.
///
pub fn response_matrix(
    spectrum: &Histogram1D,
    true_lines: &[Float],
    half_width: Float,
) -> ResponseMatrix {
    let energies = spectrum.axis().centers().collect::<Vec<_>>();
    let contents = spectrum.contents();
    let mut matrix = DMatrix::from_fn(true_lines.len(), energies.len(), |i, j| {
        if (energies[j] - true_lines[i]).abs() <= half_width {
            contents[j]
        } else {
            0.
        }
    });
    for mut row in matrix.row_iter_mut() {
        let sum = row.sum();
        if sum > 0. {
            row /= sum;
        }
    }
    ResponseMatrix {
        lines: true_lines.to_vec(),
        energies,
        matrix,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rows_are_normalized_windows() {
        let mut spectrum = Histogram1D::new(200, 0., 2000.).expect("valid binning");
        spectrum.fill_weighted(565., 30.);
        spectrum.fill_weighted(575., 10.);
        spectrum.fill_weighted(600., 1000.);
        spectrum.fill_weighted(1065., 7.);

        let response = response_matrix(&spectrum, &DEFAULT_TRUE_LINES, RESPONSE_HALF_WIDTH);
        assert_eq!(response.matrix.shape(), (4, 200));
        assert_relative_eq!(response.matrix[(0, 56)], 0.75);
        assert_relative_eq!(response.matrix[(0, 57)], 0.25);
        assert_relative_eq!(response.matrix.row(0).sum(), 1.);
        assert_relative_eq!(response.matrix[(1, 106)], 1.);
        // Nothing around 1275 and 1770 keV
        assert_eq!(response.matrix.row(2).sum(), 0.);
        assert_eq!(response.matrix.row(3).sum(), 0.);
    }

    #[test]
    fn table_lists_non_zero_weights() {
        let mut spectrum = Histogram1D::new(10, 560., 580.).expect("valid binning");
        spectrum.fill_weighted(570.5, 4.);
        let response = response_matrix(&spectrum, &[570.], RESPONSE_HALF_WIDTH);
        let mut out = Vec::new();
        response.write_table(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with("570 571 1\n"));
    }
}
