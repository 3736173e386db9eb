//! Moment-based peak finding and selection of the bins to fit

use crate::{histogram::Histogram2D, numeric::Float};
use prefix_num_ops::real::*;
use serde::Serialize;
use std::fmt;

/// Default half-size of the moment box, in bins
pub const MOMENT_BOX_SIZE: usize = 20;

/// Default half-size of the fit region, in units of the peak width
pub const FIT_REGION_SIGMAS: Float = 2.5;

/// Minimal number of bins for a region to be fitted
pub const MIN_FIT_BINS: usize = 20;

/// Moment box used on smoothed histograms, in bins
pub const SMOOTHED_MOMENT_BOX: usize = 10;

/// Half-size of the RMS region, in units of the peak width
pub const RMS_REGION_SIGMAS: Float = 3.;

/// First guess of a peak position and width
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct PeakEstimate {
    /// Centroid along x
    pub x: Float,

    /// Centroid along y
    pub y: Float,

    /// Width along x
    pub sigma_x: Float,

    /// Width along y
    pub sigma_y: Float,

    /// Content of the highest bin
    pub max_content: Float,
}

/// Locate the highest bin and compute the first two moments of the positive
/// contents of a box of ±`box_size` bins around it
///
/// Returns `None` for an empty histogram. If the box holds no positive
/// content, the global mean and RMS are used instead.
///
pub fn find_peak_moments(h: &Histogram2D, box_size: usize) -> Option<PeakEstimate> {
    if h.entries() == 0 && h.integral() == 0. {
        return None;
    }
    let (imax, jmax, max_content) = h.max_bin()?;
    let (nx, ny) = (h.x_axis().nbins(), h.y_axis().nbins());
    let i_range = imax.saturating_sub(box_size)..=(imax + box_size).min(nx - 1);
    let j_range = jmax.saturating_sub(box_size)..=(jmax + box_size).min(ny - 1);

    let (mut sw, mut swx, mut swy, mut swx2, mut swy2) = (0., 0., 0., 0., 0.);
    for i in i_range {
        let x = h.x_axis().bin_center(i);
        for j in j_range.clone() {
            let w = h.content(i, j);
            if w > 0. {
                let y = h.y_axis().bin_center(j);
                sw += w;
                swx += w * x;
                swy += w * y;
                swx2 += w * x * x;
                swy2 += w * y * y;
            }
        }
    }

    if sw == 0. {
        let (x, y) = h.mean();
        let (sigma_x, sigma_y) = h.rms();
        return Some(PeakEstimate {
            x,
            y,
            sigma_x,
            sigma_y,
            max_content,
        });
    }
    let x = swx / sw;
    let y = swy / sw;
    Some(PeakEstimate {
        x,
        y,
        sigma_x: sqrt((swx2 / sw - x * x).max(0.)),
        sigma_y: sqrt((swy2 / sw - y * y).max(0.)),
        max_content,
    })
}

/// Rectangular region of the (x, y) plane
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Window {
    /// Lower x bound
    pub x_min: Float,
    /// Upper x bound
    pub x_max: Float,
    /// Lower y bound
    pub y_min: Float,
    /// Upper y bound
    pub y_max: Float,
}
//
impl Window {
    /// Box of ±k widths around a peak estimate
    pub fn around(estimate: &PeakEstimate, k: Float) -> Self {
        Self {
            x_min: estimate.x - k * estimate.sigma_x,
            x_max: estimate.x + k * estimate.sigma_x,
            y_min: estimate.y - k * estimate.sigma_y,
            y_max: estimate.y + k * estimate.sigma_y,
        }
    }

    /// Square box of ±half_width around a point
    pub fn square(x: Float, y: Float, half_width: Float) -> Self {
        Self {
            x_min: x - half_width,
            x_max: x + half_width,
            y_min: y - half_width,
            y_max: y + half_width,
        }
    }

    /// Truth that a point lies inside (bounds included)
    pub fn contains(&self, x: Float, y: Float) -> bool {
        (self.x_min..=self.x_max).contains(&x) && (self.y_min..=self.y_max).contains(&y)
    }
}

/// Content of one histogram bin, at its center
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BinPoint {
    /// Bin center along x
    pub x: Float,
    /// Bin center along y
    pub y: Float,
    /// Bin content
    pub content: Float,
}

/// How much a region can be trusted for fitting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum DataQuality {
    /// Nothing was selected
    NoData,
    /// Too few bins for the fit models
    Insufficient,
    /// Even the highest bin has very few counts
    LowStatistics,
    /// Few counts overall
    Marginal,
    /// Enough of everything
    Good,
}
//
impl DataQuality {
    /// Truth that the region is worth fitting
    pub fn is_fittable(self) -> bool {
        !matches!(self, Self::NoData | Self::Insufficient)
    }
}
//
impl fmt::Display for DataQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoData => "NO_DATA",
            Self::Insufficient => "INSUFFICIENT",
            Self::LowStatistics => "LOW_STATISTICS",
            Self::Marginal => "MARGINAL",
            Self::Good => "GOOD",
        };
        f.write_str(text)
    }
}

/// Weighted statistics of the selected bins
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct RegionStats {
    /// Number of selected bins
    pub n_bins: usize,
    /// Sum of the contents
    pub total: Float,
    /// Largest content
    pub max: Float,
    /// Weighted mean along x
    pub mean_x: Float,
    /// Weighted mean along y
    pub mean_y: Float,
    /// Weighted standard deviation along x
    pub std_x: Float,
    /// Weighted standard deviation along y
    pub std_y: Float,
    /// Extent of the selected bin centers along x
    pub x_range: (Float, Float),
    /// Extent of the selected bin centers along y
    pub y_range: (Float, Float),
}
//
impl RegionStats {
    /// Compute the statistics of a non-empty set of positive bins
    pub fn of(points: &[BinPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let total = points.iter().map(|p| p.content).sum::<Float>();
        let max = points.iter().map(|p| p.content).fold(Float::MIN, Float::max);
        let mean_x = points.iter().map(|p| p.x * p.content).sum::<Float>() / total;
        let mean_y = points.iter().map(|p| p.y * p.content).sum::<Float>() / total;
        let var_x = points
            .iter()
            .map(|p| p.content * (p.x - mean_x).powi(2))
            .sum::<Float>()
            / total;
        let var_y = points
            .iter()
            .map(|p| p.content * (p.y - mean_y).powi(2))
            .sum::<Float>()
            / total;
        let extent = |coord: fn(&BinPoint) -> Float| {
            points.iter().map(coord).fold((Float::MAX, Float::MIN), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            })
        };
        Some(Self {
            n_bins: points.len(),
            total,
            max,
            mean_x,
            mean_y,
            std_x: sqrt(var_x.max(0.)),
            std_y: sqrt(var_y.max(0.)),
            x_range: extent(|p| p.x),
            y_range: extent(|p| p.y),
        })
    }

    /// Grade the statistics
    pub fn quality(&self) -> DataQuality {
        if self.n_bins < MIN_FIT_BINS {
            DataQuality::Insufficient
        } else if self.max < 10. {
            DataQuality::LowStatistics
        } else if self.total < 100. {
            DataQuality::Marginal
        } else {
            DataQuality::Good
        }
    }
}

/// Bins selected for a fit
#[derive(Clone, Debug, PartialEq)]
pub struct FitRegion {
    /// Bins with positive content inside the window
    pub points: Vec<BinPoint>,

    /// Statistics of those bins (none if nothing was selected)
    pub stats: Option<RegionStats>,

    /// Quality grade
    pub quality: DataQuality,
}
//
impl FitRegion {
    /// Wrap a set of points, computing its statistics and quality
    pub fn from_points(points: Vec<BinPoint>) -> Self {
        let stats = RegionStats::of(&points);
        let quality = stats.map_or(DataQuality::NoData, |s| s.quality());
        Self {
            points,
            stats,
            quality,
        }
    }
}

/// Collect the bins of a window, optionally keeping the empty ones too
pub fn window_points(h: &Histogram2D, window: &Window, positive_only: bool) -> Vec<BinPoint> {
    h.bins()
        .filter(|&(x, y, content)| window.contains(x, y) && (!positive_only || content > 0.))
        .map(|(x, y, content)| BinPoint { x, y, content })
        .collect()
}

/// Select the positive bins within ±k widths of a peak estimate
pub fn select_fit_region(h: &Histogram2D, estimate: &PeakEstimate, k: Float) -> FitRegion {
    FitRegion::from_points(window_points(h, &Window::around(estimate, k), true))
}

/// Locate the peak on a smoothed copy of the histogram, then select the
/// positive raw bins within ±k RMS widths of it
///
/// Smoothing keeps isolated noisy bins from attracting the moment box, which
/// matters at large angles where the peak holds few counts.
///
pub fn rms_region(h: &Histogram2D, box_size: usize, k: Float) -> Option<(PeakEstimate, FitRegion)> {
    let estimate = find_peak_moments(&h.smoothed(), box_size)?;
    let region = select_fit_region(h, &estimate, k);
    Some((estimate, region))
}
