//! Bounded minimization on top of `argmin`
//!
//! The quasi-Newton L-BFGS solver does the bulk of the work. It knows nothing
//! about parameter bounds, so parameters are clamped into their box before
//! every evaluation and the gradient is projected at active bounds. When the
//! line search breaks down, which happens on the flat plateaus that clamping
//! creates, the derivative-free Nelder-Mead simplex takes over.

use super::objective::Objective;
use crate::{error::FitError, numeric::Float};
use argmin::{
    core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus},
    solver::{linesearch::MoreThuenteLineSearch, neldermead::NelderMead, quasinewton::LBFGS},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};
use tracing::{debug, warn};

/// Tuning of the minimizer
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct MinimizerConfig {
    /// Maximal number of L-BFGS iterations
    pub max_iter: u64,

    /// Convergence tolerance on the gradient norm. The cost tolerance is a
    /// tenth of it.
    pub tol: Float,

    /// Number of corrections kept by L-BFGS
    pub memory: usize,
}
//
impl Default for MinimizerConfig {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: 1e-6,
            memory: 10,
        }
    }
}

/// Outcome of a minimization
#[derive(Clone, Debug, PartialEq)]
pub struct MinimizerResult {
    /// Best parameters, within bounds
    pub params: Vec<Float>,

    /// Objective value at the best parameters
    pub fval: Float,

    /// Number of solver iterations
    pub n_iter: u64,

    /// Number of objective evaluations
    pub n_fev: usize,

    /// Truth that a solver reported convergence
    pub converged: bool,

    /// Why the solver stopped
    pub message: String,
}
//
impl fmt::Display for MinimizerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fval={:.6}, n_iter={}, n_fev={}, converged={} ({})",
            self.fval, self.n_iter, self.n_fev, self.converged, self.message
        )
    }
}

/// Clamp parameters into their bounds
fn clamp_params(params: &[Float], bounds: &[(Float, Float)]) -> Vec<Float> {
    params
        .iter()
        .zip(bounds)
        .map(|(&v, &(lo, hi))| v.clamp(lo, hi))
        .collect()
}

/// Adapter between an objective and argmin's problem traits
struct BoundedProblem<'a> {
    /// Function to minimize
    objective: &'a dyn Objective,

    /// Box constraints
    bounds: &'a [(Float, Float)],

    /// Number of objective evaluations
    n_fev: &'a AtomicUsize,
}
//
impl CostFunction for BoundedProblem<'_> {
    type Param = Vec<Float>;
    type Output = Float;

    fn cost(&self, params: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        self.n_fev.fetch_add(1, Ordering::Relaxed);
        let value = self.objective.value(&clamp_params(params, self.bounds));
        // Line searches cope with infinities better than with NaNs
        Ok(if value.is_nan() {
            Float::INFINITY
        } else {
            value
        })
    }
}
//
impl Gradient for BoundedProblem<'_> {
    type Param = Vec<Float>;
    type Gradient = Vec<Float>;

    fn gradient(&self, params: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        let mut grad = self.objective.gradient(&clamped);

        // Do not push further against an active bound
        const EPS: Float = 1e-12;
        for (g, (&x, &(lo, hi))) in grad.iter_mut().zip(clamped.iter().zip(self.bounds)) {
            if (x <= lo + EPS && *g > 0.) || (x >= hi - EPS && *g < 0.) {
                *g = 0.;
            }
        }
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(argmin::core::Error::msg("non-finite gradient"));
        }
        Ok(grad)
    }
}

/// Truth that argmin stopped because the solver converged
fn has_converged(status: &TerminationStatus) -> bool {
    matches!(
        status,
        TerminationStatus::Terminated(
            TerminationReason::SolverConverged | TerminationReason::TargetCostReached
        )
    )
}

/// Box-constrained minimizer
#[derive(Clone, Copy, Debug, Default)]
pub struct Minimizer {
    /// Tuning parameters
    config: MinimizerConfig,
}
//
impl Minimizer {
    /// Set up a minimizer
    pub fn new(config: MinimizerConfig) -> Self {
        Self { config }
    }

    /// Minimize an objective within box constraints, starting from some
    /// initial parameters (which are clamped into the box first)
    pub fn minimize(
        &self,
        objective: &dyn Objective,
        init: &[Float],
        bounds: &[(Float, Float)],
    ) -> Result<MinimizerResult, FitError> {
        if init.len() != bounds.len() {
            return Err(FitError::Minimizer(format!(
                "{} parameters but {} bounds",
                init.len(),
                bounds.len()
            )));
        }
        let is_empty = |&(lo, hi): &(Float, Float)| lo.is_nan() || hi.is_nan() || lo > hi;
        if let Some(i) = bounds.iter().position(is_empty) {
            return Err(FitError::Minimizer(format!(
                "empty bounds for parameter {i}"
            )));
        }
        let init = clamp_params(init, bounds);

        match self.run_lbfgs(objective, &init, bounds) {
            Ok(result) if result.converged => Ok(result),
            Ok(result) => {
                // Polish a stalled quasi-Newton run with the simplex
                debug!("L-BFGS did not converge ({result}), polishing with Nelder-Mead");
                match self.run_nelder_mead(objective, &result.params, bounds) {
                    Ok(polished) if polished.fval <= result.fval => Ok(polished),
                    _ => Ok(result),
                }
            }
            Err(e) => {
                debug!("L-BFGS failed ({e}), falling back to Nelder-Mead");
                self.run_nelder_mead(objective, &init, bounds)
            }
        }
    }

    /// Run L-BFGS with a More-Thuente line search
    fn run_lbfgs(
        &self,
        objective: &dyn Objective,
        init: &[Float],
        bounds: &[(Float, Float)],
    ) -> Result<MinimizerResult, FitError> {
        let n_fev = AtomicUsize::new(0);
        let problem = BoundedProblem {
            objective,
            bounds,
            n_fev: &n_fev,
        };
        let tol_cost = if self.config.tol == 0. {
            0.
        } else {
            (0.1 * self.config.tol).max(1e-12)
        };
        let solver = LBFGS::new(MoreThuenteLineSearch::new(), self.config.memory)
            .with_tolerance_grad(self.config.tol)
            .and_then(|solver| solver.with_tolerance_cost(tol_cost))
            .map_err(|e| FitError::Minimizer(format!("invalid tolerance: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.param(init.to_vec()).max_iters(self.config.max_iter))
            .run()
            .map_err(|e| FitError::Minimizer(e.to_string()))?;

        let state = res.state();
        let params = state
            .get_best_param()
            .ok_or_else(|| FitError::Minimizer("no best parameters".to_string()))?;
        let status = state.get_termination_status();
        Ok(MinimizerResult {
            params: clamp_params(params, bounds),
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: n_fev.load(Ordering::Relaxed),
            converged: has_converged(status),
            message: status.to_string(),
        })
    }

    /// Run the Nelder-Mead simplex from a starting point
    fn run_nelder_mead(
        &self,
        objective: &dyn Objective,
        init: &[Float],
        bounds: &[(Float, Float)],
    ) -> Result<MinimizerResult, FitError> {
        let n_fev = AtomicUsize::new(0);
        let problem = BoundedProblem {
            objective,
            bounds,
            n_fev: &n_fev,
        };
        let simplex = initial_simplex(init, bounds);
        let max_iter = self.config.max_iter.max(200 * init.len() as u64);
        let solver = NelderMead::new(simplex)
            .with_sd_tolerance(self.config.tol.max(Float::EPSILON))
            .map_err(|e| FitError::Minimizer(format!("invalid tolerance: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| state.max_iters(max_iter))
            .run()
            .map_err(|e| FitError::Minimizer(e.to_string()))?;

        let state = res.state();
        let params = state
            .get_best_param()
            .ok_or_else(|| FitError::Minimizer("no best parameters".to_string()))?;
        let status = state.get_termination_status();
        let converged = has_converged(status);
        if !converged {
            warn!("Nelder-Mead stopped before converging: {status}");
        }
        Ok(MinimizerResult {
            params: clamp_params(params, bounds),
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_fev: n_fev.load(Ordering::Relaxed),
            converged,
            message: status.to_string(),
        })
    }
}

/// Vertices of a starting simplex: the initial point plus one vertex per
/// parameter, shifted by 5% (or by a small absolute step for zero values) and
/// kept inside the bounds
fn initial_simplex(init: &[Float], bounds: &[(Float, Float)]) -> Vec<Vec<Float>> {
    let mut simplex = vec![init.to_vec()];
    for (i, &(lo, hi)) in bounds.iter().enumerate() {
        let step = if init[i] != 0. {
            0.05 * init[i]
        } else {
            2.5e-4
        };
        let mut vertex = init.to_vec();
        vertex[i] = if init[i] + step <= hi {
            init[i] + step
        } else {
            (init[i] - step).max(lo)
        };
        simplex.push(vertex);
    }
    simplex
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// (x - 2)² + (y - 3)²
    struct Quadratic;
    //
    impl Objective for Quadratic {
        fn value(&self, p: &[Float]) -> Float {
            (p[0] - 2.).powi(2) + (p[1] - 3.).powi(2)
        }
    }

    /// Rosenbrock's banana valley, minimal at (1, 1)
    struct Rosenbrock;
    //
    impl Objective for Rosenbrock {
        fn value(&self, p: &[Float]) -> Float {
            (1. - p[0]).powi(2) + 100. * (p[1] - p[0] * p[0]).powi(2)
        }
    }

    #[test]
    fn unconstrained_quadratic() {
        let bounds = [(-10., 10.), (-10., 10.)];
        let result = Minimizer::default()
            .minimize(&Quadratic, &[0., 0.], &bounds)
            .unwrap();
        assert!(result.converged, "{result}");
        assert_relative_eq!(result.params[0], 2., epsilon = 1e-4);
        assert_relative_eq!(result.params[1], 3., epsilon = 1e-4);
        assert!(result.fval < 1e-6);
    }

    #[test]
    fn minimum_outside_the_box_lands_on_the_bound() {
        let bounds = [(3., 5.), (1., 2.)];
        let result = Minimizer::default()
            .minimize(&Quadratic, &[4., 1.5], &bounds)
            .unwrap();
        assert_relative_eq!(result.params[0], 3., epsilon = 1e-4);
        assert_relative_eq!(result.params[1], 2., epsilon = 1e-4);
    }

    #[test]
    fn initial_point_is_clamped() {
        let bounds = [(-1., 1.), (-1., 1.)];
        let result = Minimizer::default()
            .minimize(&Quadratic, &[50., -50.], &bounds)
            .unwrap();
        assert!(result.params.iter().all(|p| (-1.0..=1.0).contains(p)));
        assert_relative_eq!(result.params[0], 1., epsilon = 1e-4);
    }

    #[test]
    fn rosenbrock_valley() {
        let bounds = [(-10., 10.), (-10., 10.)];
        let result = Minimizer::default()
            .minimize(&Rosenbrock, &[-1.2, 1.], &bounds)
            .unwrap();
        assert_relative_eq!(result.params[0], 1., epsilon = 1e-2);
        assert_relative_eq!(result.params[1], 1., epsilon = 2e-2);
        assert!(result.fval < 1e-3);
    }

    #[test]
    fn mismatched_bounds_are_rejected() {
        let err = Minimizer::default()
            .minimize(&Quadratic, &[0., 0.], &[(0., 1.)])
            .unwrap_err();
        assert!(matches!(err, FitError::Minimizer(_)));
        let err = Minimizer::default()
            .minimize(&Quadratic, &[0., 0.], &[(0., 1.), (2., 1.)])
            .unwrap_err();
        assert!(matches!(err, FitError::Minimizer(_)));
    }

    #[test]
    fn simplex_stays_in_bounds() {
        let simplex = initial_simplex(&[1., 0.], &[(0., 1.), (-1., 1.)]);
        assert_eq!(simplex.len(), 3);
        assert_relative_eq!(simplex[1][0], 0.95);
        assert_relative_eq!(simplex[2][1], 2.5e-4);
    }
}
