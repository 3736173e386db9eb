//! Parameter uncertainties from the curvature of the objective

use super::objective::Objective;
use crate::numeric::Float;
use nalgebra::DMatrix;
use prefix_num_ops::real::*;
use tracing::warn;

/// Default finite-difference step of the Hessian
pub const HESSIAN_STEP: Float = 1e-4;

/// Parameter uncertainties and covariance
#[derive(Clone, Debug, PartialEq)]
pub struct HessianErrors {
    /// One standard deviation per parameter (zero if the Hessian is singular)
    pub errors: Vec<Float>,

    /// Inverse of the Hessian, if it could be inverted
    pub covariance: Option<DMatrix<Float>>,
}
//
impl HessianErrors {
    /// Multiply the covariance by `factor`, and the errors by its square root
    pub fn scaled(self, factor: Float) -> Self {
        let scale = sqrt(factor);
        Self {
            errors: self.errors.into_iter().map(|e| e * scale).collect(),
            covariance: self.covariance.map(|cov| cov * factor),
        }
    }
}

/// Second derivatives of an objective by central finite differences
pub fn hessian(objective: &dyn Objective, params: &[Float], delta: Float) -> DMatrix<Float> {
    let n = params.len();
    let mut h = DMatrix::<Float>::zeros(n, n);
    let mut p = params.to_vec();
    let f0 = objective.value(params);
    let shifted = |p: &mut [Float], shifts: &[(usize, Float)]| {
        for &(i, d) in shifts {
            p[i] += d;
        }
        let value = objective.value(p);
        for &(i, d) in shifts {
            p[i] -= d;
        }
        value
    };
    for i in 0..n {
        let f_plus = shifted(&mut p, &[(i, delta)]);
        let f_minus = shifted(&mut p, &[(i, -delta)]);
        h[(i, i)] = (f_plus - 2. * f0 + f_minus) / (delta * delta);
        for j in (i + 1)..n {
            let f_pp = shifted(&mut p, &[(i, delta), (j, delta)]);
            let f_pm = shifted(&mut p, &[(i, delta), (j, -delta)]);
            let f_mp = shifted(&mut p, &[(i, -delta), (j, delta)]);
            let f_mm = shifted(&mut p, &[(i, -delta), (j, -delta)]);
            let h_ij = (f_pp - f_pm - f_mp + f_mm) / (4. * delta * delta);
            h[(i, j)] = h_ij;
            h[(j, i)] = h_ij;
        }
    }
    h
}

/// Uncertainties of the parameters at the minimum of a χ², taken as the
/// square roots of the diagonal of the inverse Hessian
///
/// No error definition factor is applied to the covariance. When the Hessian
/// cannot be inverted, a warning is logged and the errors are all zero.
///
pub fn hessian_errors(objective: &dyn Objective, params: &[Float], delta: Float) -> HessianErrors {
    let n = params.len();
    let covariance = hessian(objective, params, delta)
        .try_inverse()
        .filter(|cov| cov.iter().all(|c| c.is_finite()));
    match covariance {
        Some(cov) => HessianErrors {
            errors: (0..n).map(|i| sqrt(abs(cov[(i, i)]))).collect(),
            covariance: Some(cov),
        },
        None => {
            warn!("Singular Hessian, parameter errors are not available");
            HessianErrors {
                errors: vec![0.; n],
                covariance: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// χ² of independent Gaussian measurements with widths 0.5 and 2
    struct Paraboloid;
    //
    impl Objective for Paraboloid {
        fn value(&self, p: &[Float]) -> Float {
            (p[0] / 0.5).powi(2) + (p[1] / 2.).powi(2) + p[0] * p[1] * 0.1
        }
    }

    /// Objective which ignores its second parameter
    struct Flat;
    //
    impl Objective for Flat {
        fn value(&self, p: &[Float]) -> Float {
            p[0] * p[0]
        }
    }

    #[test]
    fn hessian_of_a_quadratic_form() {
        let h = hessian(&Paraboloid, &[0.3, -0.2], HESSIAN_STEP);
        assert_relative_eq!(h[(0, 0)], 8., epsilon = 1e-5);
        assert_relative_eq!(h[(1, 1)], 0.5, epsilon = 1e-5);
        assert_relative_eq!(h[(0, 1)], 0.1, epsilon = 1e-5);
        assert_relative_eq!(h[(1, 0)], h[(0, 1)]);
    }

    #[test]
    fn errors_come_from_the_inverse_hessian() {
        let result = hessian_errors(&Paraboloid, &[0., 0.], HESSIAN_STEP);
        let det: Float = 8. * 0.5 - 0.1 * 0.1;
        assert_relative_eq!(result.errors[0], (0.5 / det).sqrt(), epsilon = 1e-5);
        assert_relative_eq!(result.errors[1], (8. / det).sqrt(), epsilon = 1e-5);
        assert!(result.covariance.is_some());
    }

    #[test]
    fn scaling_the_covariance() {
        let result = hessian_errors(&Paraboloid, &[0., 0.], HESSIAN_STEP);
        let scaled = result.clone().scaled(4.);
        assert_relative_eq!(scaled.errors[0], 2. * result.errors[0]);
        let (cov, scaled_cov) = (result.covariance.unwrap(), scaled.covariance.unwrap());
        assert_relative_eq!(scaled_cov[(0, 1)], 4. * cov[(0, 1)]);
    }

    #[test]
    fn singular_hessian_yields_zero_errors() {
        let result = hessian_errors(&Flat, &[1., 1.], HESSIAN_STEP);
        assert_eq!(result.errors, vec![0., 0.]);
        assert!(result.covariance.is_none());
    }
}
