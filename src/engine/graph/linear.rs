//! Local nonlinear least squares over an active variable set.
//!
//! Minimizes the whitened error of every factor touching the active set:
//!
//! ```text
//! F(x) = Σ ‖ r_k(x) ‖²          r_k = Σ_k^{-½} (h_k(x) - z_k)
//! ```
//!
//! Variables outside the active set appear in factors but are held at
//! their committed values (conditioned on). Each iteration solves
//!
//! ```text
//! (H + λ·diag(max(H_ii, 1))) Δx = -b       H = Jᵀ J,  b = Jᵀ r
//! ```
//!
//! with Levenberg-Marquardt damping adapted per step.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{Cholesky, DMatrix, DVector};
use thiserror::Error;

use super::constraint::{Constraint, ConstraintKind};
use super::estimator::EstimatorConfig;
use super::variables::{Values, VariableKey};
use crate::core::types::Covariance;

/// Chi-squared below which a problem is already solved.
const SOLVED_ERROR: f64 = 1e-18;

/// Result of an optimization run.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    /// Number of iterations performed.
    pub iterations: u32,

    /// Initial chi-squared error.
    pub initial_error: f64,

    /// Final chi-squared error.
    pub final_error: f64,

    /// Whether the optimization converged.
    pub converged: bool,

    /// Reason for termination.
    pub termination_reason: TerminationReason,
}

/// Reason for optimization termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Converged (error change below threshold).
    Converged,

    /// Maximum iterations reached.
    MaxIterations,

    /// No factors to optimize.
    NoEdges,
}

/// Why a local problem cannot be solved.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    /// A factor could not be evaluated.
    #[error("degenerate geometry in {kind} constraint")]
    Degenerate {
        /// Offending constraint kind
        kind: ConstraintKind,
    },

    /// A variable has no information at all.
    #[error("variable {0} is unconstrained")]
    Unconstrained(VariableKey),

    /// The information matrix is not positive definite.
    #[error("information matrix is not positive definite")]
    NotPositiveDefinite,

    /// The scaled information matrix has a vanishing pivot.
    #[error("variable {key} is poorly constrained (pivot {pivot:.3e})")]
    NearSingular {
        /// Variable at the pivot
        key: VariableKey,
        /// Squared Cholesky pivot of the scaled matrix
        pivot: f64,
    },

    /// The damped system could not be solved.
    #[error("linear solve failed after {iterations} iterations")]
    SolveFailed {
        /// Iterations run before failing
        iterations: u32,
    },

    /// The iteration diverged; nothing from it may be committed.
    #[error("solve diverged after {iterations} iterations (error {error:.3e})")]
    Diverged {
        /// Iterations run before giving up
        iterations: u32,
        /// Error of the last accepted iterate
        error: f64,
    },

    /// The solution contains NaN or infinity.
    #[error("non-finite solution")]
    NonFinite,
}

/// Factors and active variables of one solve.
pub(crate) struct LocalProblem<'a> {
    offsets: BTreeMap<VariableKey, usize>,
    dim: usize,
    factors: Vec<&'a Constraint>,
}

impl<'a> LocalProblem<'a> {
    /// Build a problem over `active` with the given factors.
    pub fn new(active: &BTreeSet<VariableKey>, factors: Vec<&'a Constraint>) -> Self {
        let mut offsets = BTreeMap::new();
        let mut dim = 0;
        for key in active {
            offsets.insert(*key, dim);
            dim += key.dim();
        }
        Self {
            offsets,
            dim,
            factors,
        }
    }

    /// Number of factors.
    pub fn num_factors(&self) -> usize {
        self.factors.len()
    }

    /// Total chi-squared over all factors.
    pub fn chi_squared(&self, values: &Values) -> Option<f64> {
        self.factors.iter().map(|f| f.chi_squared(values)).sum()
    }

    /// Check that the undamped system is solvable.
    ///
    /// The information matrix is Jacobi-scaled to unit diagonal before
    /// factorization so the pivot test does not depend on units.
    pub fn check_conditioning(&self, values: &Values, epsilon: f64) -> Result<(), SolveError> {
        let (h, _) = self.build_linear_system(values)?;

        let mut scale = DVector::zeros(self.dim);
        for i in 0..self.dim {
            let d = h[(i, i)];
            if !d.is_finite() || d <= 0.0 {
                return Err(SolveError::Unconstrained(self.key_at(i)));
            }
            scale[i] = 1.0 / d.sqrt();
        }

        let mut scaled = h;
        for r in 0..self.dim {
            for c in 0..self.dim {
                scaled[(r, c)] *= scale[r] * scale[c];
            }
        }

        let chol = Cholesky::new(scaled).ok_or(SolveError::NotPositiveDefinite)?;
        let l = chol.l();
        for i in 0..self.dim {
            let pivot = l[(i, i)] * l[(i, i)];
            if !pivot.is_finite() || pivot < epsilon {
                return Err(SolveError::NearSingular {
                    key: self.key_at(i),
                    pivot,
                });
            }
        }
        Ok(())
    }

    /// Run Levenberg-Marquardt (or Gauss-Newton) in place.
    ///
    /// `values` must hold every variable any factor references. Only
    /// active variables move. On success `values` holds the lowest-error
    /// iterate, which is never worse than the starting point. A diverging
    /// run returns [`SolveError::Diverged`].
    pub fn optimize(
        &self,
        values: &mut Values,
        config: &EstimatorConfig,
    ) -> Result<OptimizationResult, SolveError> {
        if self.factors.is_empty() || self.dim == 0 {
            return Ok(OptimizationResult {
                iterations: 0,
                initial_error: 0.0,
                final_error: 0.0,
                converged: true,
                termination_reason: TerminationReason::NoEdges,
            });
        }

        let initial_error = self.chi_squared(values).ok_or_else(|| self.degenerate(values))?;
        let mut current_error = initial_error;

        if initial_error < SOLVED_ERROR {
            return Ok(OptimizationResult {
                iterations: 0,
                initial_error,
                final_error: initial_error,
                converged: true,
                termination_reason: TerminationReason::Converged,
            });
        }

        let mut lambda = config.damping_factor;
        let mut iterations = 0;
        let mut best_error = initial_error;
        let mut best_values = values.clone();

        for iter in 0..config.max_iterations {
            iterations = iter + 1;

            let (h, b) = self.build_linear_system(values)?;

            let h_damped = if config.use_levenberg_marquardt {
                apply_damping(h, lambda)
            } else {
                h
            };

            let Some(chol) = Cholesky::new(h_damped) else {
                return Err(SolveError::SolveFailed { iterations });
            };
            let dx = chol.solve(&(-b));

            let candidate = self.apply_update(values, &dx);
            let new_error = self.chi_squared(&candidate).unwrap_or(f64::INFINITY);

            if !(new_error <= current_error * 1.1) {
                if config.use_levenberg_marquardt {
                    lambda *= 10.0;
                    if lambda <= 1e10 {
                        continue;
                    }
                }
                return Err(SolveError::Diverged {
                    iterations,
                    error: current_error,
                });
            }

            *values = candidate;
            if new_error < best_error {
                best_error = new_error;
                best_values.clone_from(values);
            }

            if config.use_levenberg_marquardt {
                lambda *= 0.1;
                lambda = lambda.max(1e-10);
            }

            let relative_change = (current_error - new_error).abs() / current_error.max(1e-10);
            current_error = new_error;

            if relative_change < config.convergence_threshold || current_error < SOLVED_ERROR {
                return Ok(self.best_result(
                    values,
                    best_values,
                    (initial_error, current_error, best_error),
                    iterations,
                    TerminationReason::Converged,
                ));
            }
        }

        Ok(self.best_result(
            values,
            best_values,
            (initial_error, current_error, best_error),
            iterations,
            TerminationReason::MaxIterations,
        ))
    }

    /// Fall back to the lowest-error iterate if the run ended above it.
    fn best_result(
        &self,
        values: &mut Values,
        best_values: Values,
        (initial_error, current_error, best_error): (f64, f64, f64),
        iterations: u32,
        reason: TerminationReason,
    ) -> OptimizationResult {
        if current_error > best_error {
            *values = best_values;
        }
        OptimizationResult {
            iterations,
            initial_error,
            final_error: best_error,
            converged: reason == TerminationReason::Converged,
            termination_reason: reason,
        }
    }

    /// Marginal covariance of every active variable.
    ///
    /// Computed from the undamped information matrix at `values`, so it is
    /// conditioned on the fixed variables outside the active set.
    pub fn marginals(&self, values: &Values) -> Result<BTreeMap<VariableKey, Covariance>, SolveError> {
        let (h, _) = self.build_linear_system(values)?;
        let chol = Cholesky::new(h).ok_or(SolveError::NotPositiveDefinite)?;
        let inverse = chol.inverse();

        let mut out = BTreeMap::new();
        for (key, offset) in &self.offsets {
            let d = key.dim();
            let block = inverse.view((*offset, *offset), (d, d)).into_owned();
            if block.iter().any(|v| !v.is_finite()) {
                return Err(SolveError::NonFinite);
            }
            out.insert(*key, Covariance::from_matrix(&block));
        }
        Ok(out)
    }

    /// Accumulate `H = Σ JᵀJ` and `b = Σ Jᵀr` over active columns.
    fn build_linear_system(&self, values: &Values) -> Result<(DMatrix<f64>, DVector<f64>), SolveError> {
        let mut h = DMatrix::zeros(self.dim, self.dim);
        let mut b = DVector::zeros(self.dim);

        for factor in &self.factors {
            let lin = factor.linearize(values).ok_or(SolveError::Degenerate {
                kind: factor.kind(),
            })?;

            for (key_a, j_a) in &lin.jacobians {
                let Some(&oa) = self.offsets.get(key_a) else {
                    continue;
                };
                let g = j_a.transpose() * &lin.residual;
                for r in 0..g.nrows() {
                    b[oa + r] += g[r];
                }

                for (key_b, j_b) in &lin.jacobians {
                    let Some(&ob) = self.offsets.get(key_b) else {
                        continue;
                    };
                    let block = j_a.transpose() * j_b;
                    for r in 0..block.nrows() {
                        for c in 0..block.ncols() {
                            h[(oa + r, ob + c)] += block[(r, c)];
                        }
                    }
                }
            }
        }

        Ok((h, b))
    }

    /// Copy of `values` with active variables retracted by `dx`.
    fn apply_update(&self, values: &Values, dx: &DVector<f64>) -> Values {
        let mut out = values.clone();
        for (key, offset) in &self.offsets {
            if let Some(v) = out.get_mut(key) {
                *v = v.retract(&dx.as_slice()[*offset..*offset + key.dim()]);
            }
        }
        out
    }

    fn key_at(&self, index: usize) -> VariableKey {
        self.offsets
            .iter()
            .rev()
            .find(|(_, offset)| **offset <= index)
            .map(|(key, _)| *key)
            .unwrap_or(VariableKey::Pose(0))
    }

    fn degenerate(&self, values: &Values) -> SolveError {
        let kind = self
            .factors
            .iter()
            .find(|f| f.chi_squared(values).is_none())
            .map(|f| f.kind())
            .unwrap_or(ConstraintKind::PosePrior);
        SolveError::Degenerate { kind }
    }
}

/// `H_ii += λ · max(H_ii, 1)`
fn apply_damping(mut h: DMatrix<f64>, lambda: f64) -> DMatrix<f64> {
    for i in 0..h.nrows() {
        h[(i, i)] += lambda * h[(i, i)].max(1.0);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Point2D, Pose2D};
    use crate::engine::graph::VariableValue;
    use approx::assert_relative_eq;

    fn prior(pose: u64, mean: Pose2D) -> Constraint {
        Constraint::PosePrior {
            pose,
            mean,
            sigmas: [0.1, 0.1, 0.01],
        }
    }

    fn odometry(from: u64, to: u64, delta: Pose2D) -> Constraint {
        Constraint::Odometry {
            from,
            to,
            delta,
            sigmas: [0.1, 0.1, 0.01],
        }
    }

    fn active(keys: &[VariableKey]) -> BTreeSet<VariableKey> {
        keys.iter().copied().collect()
    }

    #[test]
    fn test_empty_problem() {
        let problem = LocalProblem::new(&BTreeSet::new(), Vec::new());
        let mut values = Values::new();
        let result = problem.optimize(&mut values, &EstimatorConfig::default()).unwrap();
        assert_eq!(result.termination_reason, TerminationReason::NoEdges);
    }

    #[test]
    fn test_chain_converges_to_odometry() {
        let factors = [
            prior(0, Pose2D::identity()),
            odometry(0, 1, Pose2D::new(1.0, 0.0, 0.0)),
        ];
        let keys = [VariableKey::Pose(0), VariableKey::Pose(1)];
        let problem = LocalProblem::new(&active(&keys), factors.iter().collect());

        let mut values = Values::new();
        values.insert(keys[0], VariableValue::Pose(Pose2D::new(0.3, -0.2, 0.05)));
        values.insert(keys[1], VariableValue::Pose(Pose2D::new(0.5, 0.4, -0.1)));

        let result = problem.optimize(&mut values, &EstimatorConfig::default()).unwrap();
        assert!(result.converged);
        assert!(result.final_error < result.initial_error);

        let p1 = values[&keys[1]].as_pose().unwrap();
        assert_relative_eq!(p1.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(p1.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_fixed_variable_does_not_move() {
        let factors = [odometry(0, 1, Pose2D::new(1.0, 0.0, 0.0))];
        let problem = LocalProblem::new(&active(&[VariableKey::Pose(1)]), factors.iter().collect());

        let mut values = Values::new();
        values.insert(VariableKey::Pose(0), VariableValue::Pose(Pose2D::new(5.0, 5.0, 0.0)));
        values.insert(VariableKey::Pose(1), VariableValue::Pose(Pose2D::identity()));

        problem.optimize(&mut values, &EstimatorConfig::default()).unwrap();
        assert_eq!(values[&VariableKey::Pose(0)].as_pose(), Some(Pose2D::new(5.0, 5.0, 0.0)));
        let p1 = values[&VariableKey::Pose(1)].as_pose().unwrap();
        assert_relative_eq!(p1.x, 6.0, epsilon = 1e-6);
    }

    #[test]
    fn test_unconstrained_variable_detected() {
        let factors = [prior(0, Pose2D::identity())];
        let keys = [VariableKey::Pose(0), VariableKey::Point(0)];
        let problem = LocalProblem::new(&active(&keys), factors.iter().collect());

        let mut values = Values::new();
        values.insert(keys[0], VariableValue::Pose(Pose2D::identity()));
        values.insert(keys[1], VariableValue::Point(Point2D::new(1.0, 1.0)));

        let err = problem.check_conditioning(&values, 1e-10).unwrap_err();
        assert_eq!(err, SolveError::Unconstrained(VariableKey::Point(0)));
    }

    #[test]
    fn test_marginals_of_anchored_pose() {
        let factors = [prior(0, Pose2D::identity())];
        let key = VariableKey::Pose(0);
        let problem = LocalProblem::new(&active(&[key]), factors.iter().collect());

        let mut values = Values::new();
        values.insert(key, VariableValue::Pose(Pose2D::identity()));

        let marginals = problem.marginals(&values).unwrap();
        let cov = &marginals[&key];
        assert_relative_eq!(cov.get(0, 0), 0.01, epsilon = 1e-12);
        assert_relative_eq!(cov.get(2, 2), 1e-4, epsilon = 1e-12);
    }

    fn buoy_behind_pose() -> ([Constraint; 2], Values) {
        let factors = [
            prior(0, Pose2D::identity()),
            Constraint::PointLandmark {
                pose: 0,
                landmark: 0,
                bearing: 0.0,
                range: 5.0,
                sigmas: [1f64.to_radians(), 0.1],
            },
        ];
        let mut values = Values::new();
        values.insert(VariableKey::Pose(0), VariableValue::Pose(Pose2D::identity()));
        values.insert(VariableKey::Point(0), VariableValue::Point(Point2D::new(-5.0, 0.01)));
        (factors, values)
    }

    #[test]
    fn test_diverging_gauss_newton_is_an_error() {
        let (factors, mut values) = buoy_behind_pose();
        let keys = [VariableKey::Pose(0), VariableKey::Point(0)];
        let problem = LocalProblem::new(&active(&keys), factors.iter().collect());
        let config = EstimatorConfig {
            use_levenberg_marquardt: false,
            ..Default::default()
        };

        let err = problem.optimize(&mut values, &config).unwrap_err();
        assert!(matches!(err, SolveError::Diverged { .. }), "got {:?}", err);
    }

    #[test]
    fn test_result_never_worse_than_start() {
        let (factors, mut values) = buoy_behind_pose();
        let keys = [VariableKey::Pose(0), VariableKey::Point(0)];
        let problem = LocalProblem::new(&active(&keys), factors.iter().collect());
        let start_error = problem.chi_squared(&values).unwrap();

        match problem.optimize(&mut values, &EstimatorConfig::default()) {
            Ok(result) => {
                assert!(result.final_error <= result.initial_error);
                assert!(problem.chi_squared(&values).unwrap() <= start_error);
            }
            Err(err) => assert!(matches!(err, SolveError::Diverged { .. }), "got {:?}", err),
        }
    }

    #[test]
    fn test_damping() {
        let h = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 0.5]);
        let d = apply_damping(h, 0.1);
        assert_relative_eq!(d[(0, 0)], 4.4);
        assert_relative_eq!(d[(1, 1)], 0.6);
    }
}
