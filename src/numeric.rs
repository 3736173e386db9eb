//! Basic numerical concepts used throughout the analysis

#![allow(missing_docs)]

// Floating-point precision is configured here. The minimizer works on vectors
// of f64, so unlike the event simulators this analysis stays in double
// precision.
pub type Float = f64;
pub use std::f64 as reals;

/// Electron rest mass (keV), which also sets the Na-22 annihilation line
pub const ELECTRON_MASS_KEV: Float = 511.0;

/// Mathematical helpers that the standard library does not provide directly
pub mod functions {
    use super::Float;

    /// Square of a number
    pub fn sqr(x: Float) -> Float {
        x * x
    }

    /// Piecewise-linear interpolation through tabulated points, clamped to the
    /// first and last ordinates outside of the tabulated range
    ///
    /// The abscissae must be sorted in increasing order.
    ///
    pub fn interp(x: Float, xs: &[Float], ys: &[Float]) -> Float {
        debug_assert_eq!(xs.len(), ys.len());
        let (Some(&x_first), Some(&x_last)) = (xs.first(), xs.last()) else {
            return Float::NAN;
        };
        if x <= x_first {
            return ys[0];
        }
        if x >= x_last {
            return ys[ys.len() - 1];
        }
        let upper = xs.partition_point(|&xi| xi <= x);
        let (x0, x1) = (xs[upper - 1], xs[upper]);
        let (y0, y1) = (ys[upper - 1], ys[upper]);
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    }

    /// Evenly spaced samples over a closed interval, like numpy's linspace
    pub fn linspace(start: Float, end: Float, num: usize) -> impl Iterator<Item = Float> {
        let step = if num > 1 {
            (end - start) / ((num - 1) as Float)
        } else {
            0.
        };
        (0..num).map(move |i| start + step * (i as Float))
    }
}

#[cfg(test)]
mod tests {
    use super::functions::*;

    #[test]
    fn interp_clamps_and_interpolates() {
        let xs = [0.0, 1.0, 2.0];
        let ys = [10.0, 20.0, 40.0];
        assert_eq!(interp(-1.0, &xs, &ys), 10.0);
        assert_eq!(interp(3.0, &xs, &ys), 40.0);
        assert!((interp(0.5, &xs, &ys) - 15.0).abs() < 1e-12);
        assert!((interp(1.25, &xs, &ys) - 25.0).abs() < 1e-12);
        assert_eq!(interp(1.0, &xs, &ys), 20.0);
    }

    #[test]
    fn linspace_includes_both_ends() {
        let values = linspace(0.0, 180.0, 13).collect::<Vec<_>>();
        assert_eq!(values.len(), 13);
        assert_eq!(values[0], 0.0);
        assert!((values[12] - 180.0).abs() < 1e-12);
        assert!((values[1] - 15.0).abs() < 1e-12);
        assert_eq!(linspace(3.0, 5.0, 1).collect::<Vec<_>>(), vec![3.0]);
    }
}
