//! Fixed-binning 1D and 2D histograms
//!
//! Only what the analysis needs is provided: filling with under/overflow
//! dropped, bin lookup, simple statistics, projections and smoothing.

use crate::{error::HistogramError, numeric::Float};
use nalgebra::DMatrix;
use num_traits::Zero;
use prefix_num_ops::real::*;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Configurable binning of one histogram axis
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Binning {
    /// Number of bins
    pub nbins: usize,

    /// Lower edge
    pub min: Float,

    /// Upper edge
    pub max: Float,
}
//
impl Binning {
    /// Validate the binning
    pub fn axis(&self) -> Result<Axis, HistogramError> {
        Axis::new(self.nbins, self.min, self.max)
    }
}

/// Uniform binning of a real interval
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Axis {
    nbins: usize,
    min: Float,
    max: Float,
}
//
impl Axis {
    /// Split [min, max) into nbins bins
    pub fn new(nbins: usize, min: Float, max: Float) -> Result<Self, HistogramError> {
        if nbins == 0 {
            return Err(HistogramError::NoBins);
        }
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(HistogramError::BadRange { min, max });
        }
        Ok(Self { nbins, min, max })
    }

    /// Number of bins
    pub fn nbins(&self) -> usize {
        self.nbins
    }

    /// Lower edge of the axis
    pub fn min(&self) -> Float {
        self.min
    }

    /// Upper edge of the axis
    pub fn max(&self) -> Float {
        self.max
    }

    /// Width of one bin
    pub fn bin_width(&self) -> Float {
        (self.max - self.min) / self.nbins as Float
    }

    /// Bin containing a value, if any
    pub fn find_bin(&self, x: Float) -> Option<usize> {
        if !(x >= self.min && x < self.max) {
            return None;
        }
        let bin = ((x - self.min) / self.bin_width()) as usize;
        Some(bin.min(self.nbins - 1))
    }

    /// Center of a bin
    pub fn bin_center(&self, bin: usize) -> Float {
        self.min + (bin as Float + 0.5) * self.bin_width()
    }

    /// Lower edge of a bin
    pub fn bin_low_edge(&self, bin: usize) -> Float {
        self.min + bin as Float * self.bin_width()
    }

    /// Iterator over all bin centers
    pub fn centers(&self) -> impl Iterator<Item = Float> + '_ {
        (0..self.nbins).map(|bin| self.bin_center(bin))
    }
}

/// One-dimensional histogram
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram1D {
    axis: Axis,
    contents: Vec<Float>,
    entries: usize,
}
//
impl Histogram1D {
    /// Create an empty histogram
    pub fn new(nbins: usize, min: Float, max: Float) -> Result<Self, HistogramError> {
        let axis = Axis::new(nbins, min, max)?;
        Ok(Self {
            axis,
            contents: vec![Float::zero(); nbins],
            entries: 0,
        })
    }

    /// Binning of the histogram
    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    /// Add one count at x, values out of range are dropped
    pub fn fill(&mut self, x: Float) {
        self.fill_weighted(x, 1.);
    }

    /// Add a weight at x, values out of range are dropped
    pub fn fill_weighted(&mut self, x: Float, weight: Float) {
        if let Some(bin) = self.axis.find_bin(x) {
            self.contents[bin] += weight;
            self.entries += 1;
        }
    }

    /// Content of a bin
    pub fn content(&self, bin: usize) -> Float {
        self.contents[bin]
    }

    /// Overwrite the content of a bin
    pub fn set_content(&mut self, bin: usize, value: Float) {
        self.contents[bin] = value;
    }

    /// All bin contents
    pub fn contents(&self) -> &[Float] {
        &self.contents
    }

    /// Number of in-range fills
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Sum of bin contents
    pub fn integral(&self) -> Float {
        self.contents.iter().sum()
    }

    /// Sum of the contents of the bins whose center lies within [lo, hi]
    pub fn integral_between(&self, lo: Float, hi: Float) -> Float {
        self.axis
            .centers()
            .zip(&self.contents)
            .filter(|(x, _)| *x >= lo && *x <= hi)
            .map(|(_, c)| c)
            .sum()
    }

    /// First bin with the largest content, and that content
    pub fn max_bin(&self) -> Option<(usize, Float)> {
        first_max(self.contents.iter().copied().enumerate())
    }

    /// Content-weighted mean of the bin centers
    pub fn mean(&self) -> Float {
        let total = self.integral();
        self.axis
            .centers()
            .zip(&self.contents)
            .map(|(x, c)| x * c)
            .sum::<Float>()
            / total
    }

    /// Content-weighted standard deviation of the bin centers
    pub fn rms(&self) -> Float {
        let total = self.integral();
        let mean = self.mean();
        let var = self
            .axis
            .centers()
            .zip(&self.contents)
            .map(|(x, c)| c * (x - mean).powi(2))
            .sum::<Float>()
            / total;
        sqrt(var.max(0.))
    }

    /// Add the contents of an identically binned histogram
    pub fn merge(&mut self, other: &Self) -> Result<(), HistogramError> {
        if self.axis != other.axis {
            return Err(HistogramError::BinningMismatch);
        }
        for (a, b) in self.contents.iter_mut().zip(&other.contents) {
            *a += b;
        }
        self.entries += other.entries;
        Ok(())
    }

    /// Write one `center content` line per bin
    pub fn write_table(&self, out: &mut impl Write) -> io::Result<()> {
        for (x, c) in self.axis.centers().zip(&self.contents) {
            writeln!(out, "{x} {c}")?;
        }
        Ok(())
    }
}

/// Two-dimensional histogram
///
/// Contents are stored as an nx × ny matrix, rows follow the x axis.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram2D {
    x_axis: Axis,
    y_axis: Axis,
    contents: DMatrix<Float>,
    entries: usize,
}
//
impl Histogram2D {
    /// Create an empty histogram
    pub fn new(
        nx: usize,
        xmin: Float,
        xmax: Float,
        ny: usize,
        ymin: Float,
        ymax: Float,
    ) -> Result<Self, HistogramError> {
        Ok(Self::with_axes(
            Axis::new(nx, xmin, xmax)?,
            Axis::new(ny, ymin, ymax)?,
        ))
    }

    /// Create an empty histogram from existing axes
    pub fn with_axes(x_axis: Axis, y_axis: Axis) -> Self {
        Self {
            x_axis,
            y_axis,
            contents: DMatrix::zeros(x_axis.nbins(), y_axis.nbins()),
            entries: 0,
        }
    }

    /// Binning along x
    pub fn x_axis(&self) -> &Axis {
        &self.x_axis
    }

    /// Binning along y
    pub fn y_axis(&self) -> &Axis {
        &self.y_axis
    }

    /// Add one count at (x, y), values out of range are dropped
    pub fn fill(&mut self, x: Float, y: Float) {
        self.fill_weighted(x, y, 1.);
    }

    /// Add a weight at (x, y), values out of range are dropped
    pub fn fill_weighted(&mut self, x: Float, y: Float, weight: Float) {
        if let (Some(i), Some(j)) = (self.x_axis.find_bin(x), self.y_axis.find_bin(y)) {
            self.contents[(i, j)] += weight;
            self.entries += 1;
        }
    }

    /// Content of a bin
    pub fn content(&self, i: usize, j: usize) -> Float {
        self.contents[(i, j)]
    }

    /// Overwrite the content of a bin
    pub fn set_content(&mut self, i: usize, j: usize, value: Float) {
        self.contents[(i, j)] = value;
    }

    /// Matrix of bin contents
    pub fn contents(&self) -> &DMatrix<Float> {
        &self.contents
    }

    /// Number of in-range fills
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Sum of bin contents
    pub fn integral(&self) -> Float {
        self.contents.sum()
    }

    /// First bin (in x-major order) with the largest content
    pub fn max_bin(&self) -> Option<(usize, usize, Float)> {
        let ny = self.y_axis.nbins();
        let flat = (0..self.x_axis.nbins())
            .flat_map(|i| (0..ny).map(move |j| (i, j)))
            .map(|(i, j)| (i * ny + j, self.contents[(i, j)]));
        first_max(flat).map(|(k, c)| (k / ny, k % ny, c))
    }

    /// Iterate over all bins as (x center, y center, content)
    pub fn bins(&self) -> impl Iterator<Item = (Float, Float, Float)> + '_ {
        (0..self.x_axis.nbins()).flat_map(move |i| {
            (0..self.y_axis.nbins()).map(move |j| {
                (
                    self.x_axis.bin_center(i),
                    self.y_axis.bin_center(j),
                    self.contents[(i, j)],
                )
            })
        })
    }

    /// Content-weighted means of the bin centers along x and y
    pub fn mean(&self) -> (Float, Float) {
        let total = self.integral();
        let (sx, sy) = self
            .bins()
            .fold((0., 0.), |(sx, sy), (x, y, c)| (sx + c * x, sy + c * y));
        (sx / total, sy / total)
    }

    /// Content-weighted standard deviations along x and y
    pub fn rms(&self) -> (Float, Float) {
        let total = self.integral();
        let (mx, my) = self.mean();
        let (vx, vy) = self.bins().fold((0., 0.), |(vx, vy), (x, y, c)| {
            (vx + c * (x - mx).powi(2), vy + c * (y - my).powi(2))
        });
        (sqrt((vx / total).max(0.)), sqrt((vy / total).max(0.)))
    }

    /// Sum over y bins, as a histogram along x
    pub fn projection_x(&self) -> Histogram1D {
        Histogram1D {
            axis: self.x_axis,
            contents: self.contents.column_sum().iter().copied().collect(),
            entries: self.entries,
        }
    }

    /// Sum over x bins, as a histogram along y
    pub fn projection_y(&self) -> Histogram1D {
        Histogram1D {
            axis: self.y_axis,
            contents: self.contents.row_sum().iter().copied().collect(),
            entries: self.entries,
        }
    }

    /// One pass of 5×5 kernel smoothing
    ///
    /// Uses the `k5a` kernel of ROOT's `TH2::Smooth`. Near the edges only the
    /// in-range kernel cells contribute, and the result is rescaled so that the
    /// integral is preserved.
    ///
    pub fn smoothed(&self) -> Self {
        const K5A: [[Float; 5]; 5] = [
            [0., 0., 1., 0., 0.],
            [0., 2., 2., 2., 0.],
            [1., 2., 5., 2., 1.],
            [0., 2., 2., 2., 0.],
            [0., 0., 1., 0., 0.],
        ];
        let (nx, ny) = self.contents.shape();
        let smoothed = DMatrix::from_fn(nx, ny, |i, j| {
            let mut sum = 0.;
            let mut norm = 0.;
            for (di, row) in K5A.iter().enumerate() {
                for (dj, &k) in row.iter().enumerate() {
                    let (Some(ii), Some(jj)) = (
                        (i + di).checked_sub(2).filter(|&ii| ii < nx),
                        (j + dj).checked_sub(2).filter(|&jj| jj < ny),
                    ) else {
                        continue;
                    };
                    if k > 0. {
                        sum += k * self.contents[(ii, jj)];
                        norm += k;
                    }
                }
            }
            sum / norm
        });
        let old_integral = self.integral();
        let new_integral = smoothed.sum();
        let scale = if new_integral != 0. {
            old_integral / new_integral
        } else {
            1.
        };
        Self {
            x_axis: self.x_axis,
            y_axis: self.y_axis,
            contents: smoothed * scale,
            entries: self.entries,
        }
    }

    /// Add the contents of an identically binned histogram
    pub fn merge(&mut self, other: &Self) -> Result<(), HistogramError> {
        if self.x_axis != other.x_axis || self.y_axis != other.y_axis {
            return Err(HistogramError::BinningMismatch);
        }
        self.contents += &other.contents;
        self.entries += other.entries;
        Ok(())
    }

    /// Write one `x y content` line per non-empty bin
    pub fn write_table(&self, out: &mut impl Write) -> io::Result<()> {
        writeln!(
            out,
            "# nx={} xmin={} xmax={} ny={} ymin={} ymax={}",
            self.x_axis.nbins(),
            self.x_axis.min(),
            self.x_axis.max(),
            self.y_axis.nbins(),
            self.y_axis.min(),
            self.y_axis.max()
        )?;
        for (x, y, c) in self.bins().filter(|(_, _, c)| *c != 0.) {
            writeln!(out, "{x} {y} {c}")?;
        }
        Ok(())
    }
}

/// First maximum of an indexed sequence of finite contents
fn first_max(values: impl Iterator<Item = (usize, Float)>) -> Option<(usize, Float)> {
    values.fold(None, |best, (idx, c)| match best {
        Some((_, best_c)) if c <= best_c => best,
        _ => Some((idx, c)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_validation() {
        assert_eq!(Axis::new(0, 0., 1.), Err(HistogramError::NoBins));
        assert!(matches!(
            Axis::new(10, 1., 1.),
            Err(HistogramError::BadRange { .. })
        ));
        let axis = Axis::new(200, 0., 2000.).expect("valid axis");
        assert_eq!(axis.bin_width(), 10.);
        assert_eq!(axis.find_bin(0.), Some(0));
        assert_eq!(axis.find_bin(1999.9), Some(199));
        assert_eq!(axis.find_bin(2000.), None);
        assert_eq!(axis.find_bin(-0.1), None);
        assert_eq!(axis.find_bin(Float::NAN), None);
        assert_eq!(axis.bin_center(0), 5.);
    }

    #[test]
    fn fill_1d_and_statistics() {
        let mut h = Histogram1D::new(10, 0., 10.).expect("valid binning");
        h.fill(2.5);
        h.fill(2.2);
        h.fill(4.5);
        h.fill(42.);
        assert_eq!(h.entries(), 3);
        assert_eq!(h.integral(), 3.);
        assert_eq!(h.max_bin(), Some((2, 2.)));
        assert!((h.mean() - (2.5 + 2.5 + 4.5) / 3.).abs() < 1e-12);
        assert!((h.integral_between(2., 3.) - 2.).abs() < 1e-12);
    }

    #[test]
    fn fill_2d_and_projections() {
        let mut h = Histogram2D::new(4, 0., 4., 2, 0., 2.).expect("valid binning");
        h.fill(0.5, 0.5);
        h.fill(2.5, 1.5);
        h.fill_weighted(2.5, 1.5, 2.);
        assert_eq!(h.max_bin(), Some((2, 1, 3.)));
        assert_eq!(h.projection_x().contents(), &[1., 0., 3., 0.]);
        assert_eq!(h.projection_y().contents(), &[1., 3.]);
        let (mx, my) = h.mean();
        assert!((mx - (0.5 + 3. * 2.5) / 4.).abs() < 1e-12);
        assert!((my - (0.5 + 3. * 1.5) / 4.).abs() < 1e-12);
    }

    #[test]
    fn first_maximum_wins_ties() {
        let mut h = Histogram2D::new(3, 0., 3., 3, 0., 3.).expect("valid binning");
        h.set_content(1, 2, 5.);
        h.set_content(2, 0, 5.);
        assert_eq!(h.max_bin(), Some((1, 2, 5.)));
    }

    #[test]
    fn smoothing_preserves_integral_and_spreads_spikes() {
        let mut h = Histogram2D::new(9, 0., 9., 9, 0., 9.).expect("valid binning");
        h.set_content(4, 4, 100.);
        let s = h.smoothed();
        assert!((s.integral() - 100.).abs() < 1e-9);
        assert!(s.content(4, 4) < 100.);
        assert!(s.content(4, 5) > 0.);
        assert_eq!(s.content(0, 0), 0.);
        assert_eq!(s.max_bin().map(|(i, j, _)| (i, j)), Some((4, 4)));
    }

    #[test]
    fn merge_requires_same_binning() {
        let mut a = Histogram2D::new(2, 0., 2., 2, 0., 2.).expect("valid binning");
        let mut b = a.clone();
        b.fill(1.5, 0.5);
        a.merge(&b).expect("same binning");
        assert_eq!(a.content(1, 0), 1.);
        let c = Histogram2D::new(3, 0., 2., 2, 0., 2.).expect("valid binning");
        assert_eq!(a.merge(&c), Err(HistogramError::BinningMismatch));
    }

    #[test]
    fn table_output_lists_filled_bins() {
        let mut h = Histogram2D::new(2, 0., 2., 2, 0., 2.).expect("valid binning");
        h.fill(0.5, 1.5);
        let mut out = Vec::new();
        h.write_table(&mut out).expect("in-memory write");
        let text = String::from_utf8(out).expect("utf-8 output");
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with("0.5 1.5 1\n"));
    }
}
