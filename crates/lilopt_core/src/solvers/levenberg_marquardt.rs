//! Levenberg-Marquardt nonlinear least-squares solver.
//!
//! This module provides the [`LevenbergMarquardtSolver`], a fixed-size solver
//! refining a parameter vector against a fixed set of data points.
//!
//! # Algorithm
//!
//! Each call to [`iterate`](LevenbergMarquardtSolver::iterate) evaluates the
//! residuals `r` and Jacobian `J` once at the current parameters and solves
//!
//! ```text
//! (JᵗJ + λ·diag(JᵗJ)) δ = Jᵗr
//! p_trial = p - δ
//! ```
//!
//! While the trial cost is worse than the current cost, λ is multiplied by
//! the growth factor `v` and the system is re-solved from the cached terms.
//! Once a trial is accepted, λ is divided by `v` and the trial becomes the
//! current estimate. The retry loop is bounded by
//! [`LMOptions::max_damping_retries`] and [`LMOptions::max_lambda`].
//!
//! [`minimize`](LevenbergMarquardtSolver::minimize) repeats `iterate` up to
//! [`LMOptions::max_iterations`] times, optionally stopping early once the
//! relative cost change of an accepted step falls below
//! [`LMOptions::tolerance`].
//!
//! # Example
//!
//! ```
//! use lilopt_core::solvers::{LMOptions, LevenbergMarquardtSolver, Termination};
//! use lilopt_core::traits::ErrorFunction;
//! use lilopt_core::types::{DataPoints, EvaluationError, Jacobian, ParameterVector, ResidualVector};
//!
//! // r_i = a * x_i + b - y_i over (x, y) samples
//! struct Line;
//!
//! impl ErrorFunction<4, 2, 2> for Line {
//!     fn residuals(
//!         &self,
//!         data: &DataPoints<4, 2>,
//!         params: &ParameterVector<2>,
//!     ) -> Result<ResidualVector<4>, EvaluationError> {
//!         Ok(ResidualVector::from_fn(|i, _| {
//!             params[0] * data[(i, 0)] + params[1] - data[(i, 1)]
//!         }))
//!     }
//!
//!     fn residuals_and_jacobian(
//!         &self,
//!         data: &DataPoints<4, 2>,
//!         params: &ParameterVector<2>,
//!     ) -> Result<(ResidualVector<4>, Jacobian<4, 2>), EvaluationError> {
//!         let jacobian = Jacobian::from_fn(|i, j| if j == 0 { data[(i, 0)] } else { 1.0 });
//!         Ok((self.residuals(data, params)?, jacobian))
//!     }
//! }
//!
//! let data = DataPoints::<4, 2>::from_row_slice(&[
//!     0.0, 1.0, //
//!     1.0, 3.0, //
//!     2.0, 5.0, //
//!     3.0, 7.0,
//! ]);
//!
//! let mut solver = LevenbergMarquardtSolver::new(
//!     LMOptions::default(),
//!     ParameterVector::<2>::new(0.0, 0.0),
//!     &Line,
//!     data,
//! )
//! .unwrap();
//!
//! let report = solver.minimize().unwrap();
//! assert_eq!(report.termination, Termination::MaxIterationsReached);
//! assert!((solver.params()[0] - 2.0).abs() < 1e-8);
//! assert!((solver.params()[1] - 1.0).abs() < 1e-8);
//! ```

use std::fmt;

use nalgebra::{Const, DMatrix, DimMin};
use tracing::{debug, info, trace, warn};

use super::cancellation::CancellationToken;
use super::damped_system::DampedSystem;
use super::options::{LMOptions, ResidualMeasure};
use crate::traits::ErrorFunction;
use crate::types::{
    ConfigurationError, DataPoints, EvaluationError, Jacobian, ParameterVector, ResidualVector,
    SolverError,
};

/// Lifecycle of a solver instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    /// Constructed, no step taken.
    Ready,
    /// At least one step taken, or a `minimize()` call in progress.
    Iterating,
    /// `minimize()` stopped on the tolerance criterion.
    Converged,
    /// `minimize()` ran the full iteration budget.
    MaxIterationsReached,
    /// The last step returned an error.
    Failed,
}

/// Why a successful `minimize()` call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The relative cost change dropped to the configured tolerance.
    Converged,
    /// `max_iterations` steps were taken.
    MaxIterationsReached,
}

/// Outcome of a single accepted step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Cost at the parameters the step started from.
    pub cost_before: f64,
    /// Cost at the accepted parameters.
    pub cost_after: f64,
    /// Damping factor the accepted step was solved with.
    pub lambda_used: f64,
    /// Damping factor after annealing, carried into the next step.
    pub lambda: f64,
    /// Number of rejected trials before acceptance.
    pub retries: usize,
    /// Euclidean norm of the accepted step.
    pub step_norm: f64,
}

impl StepReport {
    /// `|cost_before - cost_after| / |cost_before|`, with the denominator
    /// floored at the smallest positive normal `f64`.
    pub fn relative_change(&self) -> f64 {
        (self.cost_before - self.cost_after).abs() / self.cost_before.abs().max(f64::MIN_POSITIVE)
    }
}

/// Result of a successful `minimize()` call.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimizeReport<const P: usize> {
    /// Final parameters.
    pub params: ParameterVector<P>,
    /// Cost at the final parameters.
    pub cost: f64,
    /// Steps taken by this call.
    pub iterations: usize,
    /// Damping factor after the last step.
    pub lambda: f64,
    /// Number of residuals in the problem.
    pub residual_count: usize,
    /// Measure `cost` was computed with.
    pub residual_measure: ResidualMeasure,
    /// Why the call stopped.
    pub termination: Termination,
}

impl<const P: usize> MinimizeReport<P> {
    /// Whether the tolerance criterion was met.
    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }

    /// Root mean square residual.
    ///
    /// `None` unless `cost` is a sum of squares.
    pub fn rmse(&self) -> Option<f64> {
        match self.residual_measure {
            ResidualMeasure::SumOfSquares if self.residual_count > 0 => {
                Some((self.cost / self.residual_count as f64).sqrt())
            }
            ResidualMeasure::SumOfSquares => Some(0.0),
            ResidualMeasure::PlainSum => None,
        }
    }
}

/// Fixed-size Levenberg-Marquardt solver.
///
/// Owns its copy of the options, the current parameter estimate, the running
/// damping factor and the data points; borrows the error function for its
/// whole lifetime.
///
/// # Type Parameters
///
/// * `F` - Error function type
/// * `R` - Number of residuals
/// * `P` - Number of parameters
/// * `D` - Dimension of each data point
pub struct LevenbergMarquardtSolver<'f, F, const R: usize, const P: usize, const D: usize>
where
    F: ErrorFunction<R, P, D> + ?Sized,
{
    options: LMOptions,
    function: &'f F,
    data_points: DataPoints<R, D>,
    params: ParameterVector<P>,
    lambda: f64,
    state: SolverState,
    iterations: usize,
    cancellation: Option<CancellationToken>,
}

impl<'f, F, const R: usize, const P: usize, const D: usize> fmt::Debug
    for LevenbergMarquardtSolver<'f, F, R, P, D>
where
    F: ErrorFunction<R, P, D> + ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LevenbergMarquardtSolver")
            .field("options", &self.options)
            .field("params", &self.params)
            .field("lambda", &self.lambda)
            .field("state", &self.state)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl<'f, F, const R: usize, const P: usize, const D: usize> LevenbergMarquardtSolver<'f, F, R, P, D>
where
    F: ErrorFunction<R, P, D> + ?Sized,
    Const<P>: DimMin<Const<P>, Output = Const<P>>,
{
    /// Create a solver from fixed-size data points.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the options are invalid or the
    /// initial parameters are not finite.
    pub fn new(
        options: LMOptions,
        initial_params: ParameterVector<P>,
        function: &'f F,
        data_points: DataPoints<R, D>,
    ) -> Result<Self, ConfigurationError> {
        options.validate()?;
        if let Some(index) = initial_params.iter().position(|p| !p.is_finite()) {
            return Err(ConfigurationError::NonFiniteParameter { index });
        }

        Ok(Self {
            options,
            function,
            data_points,
            params: initial_params,
            lambda: options.damping_factor,
            state: SolverState::Ready,
            iterations: 0,
            cancellation: None,
        })
    }

    /// Create a solver from a dynamically sized `R x D` matrix.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::DimensionMismatch`] if the matrix shape
    /// differs from `R x D`, plus the errors of [`new`](Self::new).
    pub fn from_dynamic(
        options: LMOptions,
        initial_params: ParameterVector<P>,
        function: &'f F,
        data_points: &DMatrix<f64>,
    ) -> Result<Self, ConfigurationError> {
        check_shape::<R, D>(data_points.nrows(), data_points.ncols())?;
        let fixed = DataPoints::<R, D>::from_fn(|i, j| data_points[(i, j)]);
        Self::new(options, initial_params, function, fixed)
    }

    /// Create a solver from one row per observation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::DimensionMismatch`] if there are not
    /// exactly `R` rows, plus the errors of [`new`](Self::new).
    pub fn from_rows(
        options: LMOptions,
        initial_params: ParameterVector<P>,
        function: &'f F,
        rows: &[[f64; D]],
    ) -> Result<Self, ConfigurationError> {
        check_shape::<R, D>(rows.len(), D)?;
        let fixed = DataPoints::<R, D>::from_fn(|i, j| rows[i][j]);
        Self::new(options, initial_params, function, fixed)
    }

    /// Attach a cancellation token checked before each step and each retry.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Current parameter estimate.
    pub fn params(&self) -> &ParameterVector<P> {
        &self.params
    }

    /// Current damping factor λ.
    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SolverState {
        self.state
    }

    /// Total steps accepted since construction.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// The solver's copy of its options.
    pub fn options(&self) -> &LMOptions {
        &self.options
    }

    /// The data points the error function is evaluated against.
    pub fn data_points(&self) -> &DataPoints<R, D> {
        &self.data_points
    }

    /// Evaluate the configured cost at the current parameters.
    pub fn cost(&self) -> Result<f64, SolverError> {
        let residuals = self.evaluate_residuals(&self.params)?;
        Ok(self.measure_cost(&residuals)?)
    }

    /// Take one damped Gauss-Newton step.
    ///
    /// # Errors
    ///
    /// Any [`SolverError`]. On error the parameters are left unchanged and
    /// the state becomes [`SolverState::Failed`].
    pub fn iterate(&mut self) -> Result<StepReport, SolverError> {
        match self.step() {
            Ok(report) => {
                self.state = SolverState::Iterating;
                Ok(report)
            }
            Err(err) => {
                self.state = SolverState::Failed;
                Err(err)
            }
        }
    }

    /// Run up to `max_iterations` steps.
    ///
    /// # Errors
    ///
    /// The first [`SolverError`] returned by a step. Reaching the iteration
    /// cap is reported as [`Termination::MaxIterationsReached`], not an error.
    pub fn minimize(&mut self) -> Result<MinimizeReport<P>, SolverError> {
        self.state = SolverState::Iterating;
        let mut last_cost = None;

        for iteration in 0..self.options.max_iterations {
            let step = match self.iterate() {
                Ok(step) => step,
                Err(err) => {
                    warn!(iteration, error = %err, "Levenberg-Marquardt solve failed");
                    return Err(err);
                }
            };
            last_cost = Some(step.cost_after);

            if let Some(tolerance) = self.options.tolerance {
                if step.relative_change() <= tolerance {
                    self.state = SolverState::Converged;
                    info!(
                        iterations = iteration + 1,
                        cost = step.cost_after,
                        lambda = self.lambda,
                        "Levenberg-Marquardt converged"
                    );
                    return Ok(self.report(step.cost_after, iteration + 1, Termination::Converged));
                }
            }
        }

        self.state = SolverState::MaxIterationsReached;
        // max_iterations >= 1, so at least one step ran
        let cost = last_cost.unwrap_or(f64::NAN);
        info!(
            iterations = self.options.max_iterations,
            cost,
            lambda = self.lambda,
            "Levenberg-Marquardt reached iteration cap"
        );
        Ok(self.report(
            cost,
            self.options.max_iterations,
            Termination::MaxIterationsReached,
        ))
    }

    fn report(&self, cost: f64, iterations: usize, termination: Termination) -> MinimizeReport<P> {
        MinimizeReport {
            params: self.params,
            cost,
            iterations,
            lambda: self.lambda,
            residual_count: R,
            residual_measure: self.options.residual_measure,
            termination,
        }
    }

    fn step(&mut self) -> Result<StepReport, SolverError> {
        self.check_cancelled()?;

        let (residuals, jacobian) = self.evaluate_with_jacobian(&self.params)?;
        let growth = self.options.damping_growth;
        let cost_before = self.measure_cost(&residuals)?;
        let system = DampedSystem::new(&jacobian, &residuals);

        let mut retries = 0;
        let (candidate, cost_after, step_norm) = loop {
            let delta = system
                .solve(self.lambda, self.options.decomposition)
                .ok_or_else(|| {
                    warn!(lambda = self.lambda, "Damped normal equations are singular");
                    SolverError::SingularSystem {
                        lambda: self.lambda,
                    }
                })?;

            let candidate = self.params - delta;
            let trial = self.evaluate_residuals(&candidate)?;
            let cost_after = self.measure_cost(&trial)?;

            if cost_after <= cost_before {
                break (candidate, cost_after, delta.norm());
            }

            trace!(
                retry = retries,
                lambda = self.lambda,
                cost_before,
                cost_after,
                "Trial step rejected"
            );

            if retries >= self.options.max_damping_retries
                || self.lambda * growth > self.options.max_lambda
            {
                warn!(
                    retries,
                    lambda = self.lambda,
                    "No acceptable step within damping limits"
                );
                return Err(SolverError::NonConvergentDamping {
                    retries,
                    lambda: self.lambda,
                });
            }

            self.lambda *= growth;
            retries += 1;
            self.check_cancelled()?;
        };

        let lambda_used = self.lambda;
        self.lambda = (self.lambda / growth).max(self.options.min_lambda);
        self.params = candidate;
        self.iterations += 1;

        debug!(
            iteration = self.iterations,
            cost_before,
            cost_after,
            lambda = self.lambda,
            retries,
            "Step accepted"
        );

        Ok(StepReport {
            cost_before,
            cost_after,
            lambda_used,
            lambda: self.lambda,
            retries,
            step_norm,
        })
    }

    fn check_cancelled(&self) -> Result<(), SolverError> {
        match &self.cancellation {
            Some(token) if token.is_cancelled() => Err(SolverError::Cancelled {
                iterations: self.iterations,
            }),
            _ => Ok(()),
        }
    }

    fn measure_cost(&self, residuals: &ResidualVector<R>) -> Result<f64, EvaluationError> {
        let cost = self.options.residual_measure.cost(residuals);
        if !cost.is_finite() {
            return Err(EvaluationError::NonFinite {
                quantity: "cost",
                index: 0,
            });
        }
        Ok(cost)
    }

    fn evaluate_residuals(
        &self,
        params: &ParameterVector<P>,
    ) -> Result<ResidualVector<R>, EvaluationError> {
        let residuals = self.function.residuals(&self.data_points, params)?;
        ensure_finite("residual", residuals.iter())?;
        Ok(residuals)
    }

    fn evaluate_with_jacobian(
        &self,
        params: &ParameterVector<P>,
    ) -> Result<(ResidualVector<R>, Jacobian<R, P>), EvaluationError> {
        let (residuals, jacobian) = self
            .function
            .residuals_and_jacobian(&self.data_points, params)?;
        ensure_finite("residual", residuals.iter())?;
        ensure_finite("jacobian", jacobian.iter())?;
        Ok((residuals, jacobian))
    }
}

fn check_shape<const R: usize, const D: usize>(
    rows: usize,
    cols: usize,
) -> Result<(), ConfigurationError> {
    if rows != R || cols != D {
        return Err(ConfigurationError::DimensionMismatch {
            rows,
            cols,
            expected_rows: R,
            expected_cols: D,
        });
    }
    Ok(())
}

fn ensure_finite<'a>(
    quantity: &'static str,
    values: impl Iterator<Item = &'a f64>,
) -> Result<(), EvaluationError> {
    match values.enumerate().find(|(_, v)| !v.is_finite()) {
        Some((index, _)) => Err(EvaluationError::NonFinite { quantity, index }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::cell::Cell;

    /// r_i = a * x_i + b - y_i, data rows (x, y)
    struct Line;

    impl ErrorFunction<5, 2, 2> for Line {
        fn residuals(
            &self,
            data: &DataPoints<5, 2>,
            params: &ParameterVector<2>,
        ) -> Result<ResidualVector<5>, EvaluationError> {
            Ok(ResidualVector::from_fn(|i, _| {
                params[0] * data[(i, 0)] + params[1] - data[(i, 1)]
            }))
        }

        fn residuals_and_jacobian(
            &self,
            data: &DataPoints<5, 2>,
            params: &ParameterVector<2>,
        ) -> Result<(ResidualVector<5>, Jacobian<5, 2>), EvaluationError> {
            let jacobian = Jacobian::from_fn(|i, j| if j == 0 { data[(i, 0)] } else { 1.0 });
            Ok((self.residuals(data, params)?, jacobian))
        }
    }

    /// r = atan(p); full Gauss-Newton steps overshoot from |p| >= ~1.4
    struct Arctan;

    impl ErrorFunction<1, 1, 1> for Arctan {
        fn residuals(
            &self,
            _data: &DataPoints<1, 1>,
            params: &ParameterVector<1>,
        ) -> Result<ResidualVector<1>, EvaluationError> {
            Ok(ResidualVector::<1>::new(params[0].atan()))
        }

        fn residuals_and_jacobian(
            &self,
            data: &DataPoints<1, 1>,
            params: &ParameterVector<1>,
        ) -> Result<(ResidualVector<1>, Jacobian<1, 1>), EvaluationError> {
            let p = params[0];
            Ok((
                self.residuals(data, params)?,
                Jacobian::<1, 1>::new(1.0 / (1.0 + p * p)),
            ))
        }
    }

    /// Returns NaN residuals at the trial point, finite at the start.
    struct NanAtTrial {
        start: f64,
        jacobian_calls: Cell<usize>,
    }

    impl ErrorFunction<1, 1, 1> for NanAtTrial {
        fn residuals(
            &self,
            _data: &DataPoints<1, 1>,
            params: &ParameterVector<1>,
        ) -> Result<ResidualVector<1>, EvaluationError> {
            if params[0] == self.start {
                Ok(ResidualVector::<1>::new(1.0))
            } else {
                Ok(ResidualVector::<1>::new(f64::NAN))
            }
        }

        fn residuals_and_jacobian(
            &self,
            data: &DataPoints<1, 1>,
            params: &ParameterVector<1>,
        ) -> Result<(ResidualVector<1>, Jacobian<1, 1>), EvaluationError> {
            self.jacobian_calls.set(self.jacobian_calls.get() + 1);
            Ok((self.residuals(data, params)?, Jacobian::<1, 1>::new(1.0)))
        }
    }

    /// r = (1e200, atan(p)); finite residuals whose squared norm overflows
    struct OverflowingCost;

    impl ErrorFunction<2, 1, 1> for OverflowingCost {
        fn residuals(
            &self,
            _data: &DataPoints<2, 1>,
            params: &ParameterVector<1>,
        ) -> Result<ResidualVector<2>, EvaluationError> {
            Ok(ResidualVector::<2>::new(1e200, params[0].atan()))
        }

        fn residuals_and_jacobian(
            &self,
            data: &DataPoints<2, 1>,
            params: &ParameterVector<1>,
        ) -> Result<(ResidualVector<2>, Jacobian<2, 1>), EvaluationError> {
            let p = params[0];
            Ok((
                self.residuals(data, params)?,
                Jacobian::<2, 1>::new(0.0, 1.0 / (1.0 + p * p)),
            ))
        }
    }

    /// r = p with a Jacobian large enough that JᵗJ overflows
    struct SteepJacobian;

    impl ErrorFunction<1, 1, 1> for SteepJacobian {
        fn residuals(
            &self,
            _data: &DataPoints<1, 1>,
            params: &ParameterVector<1>,
        ) -> Result<ResidualVector<1>, EvaluationError> {
            Ok(ResidualVector::<1>::new(params[0]))
        }

        fn residuals_and_jacobian(
            &self,
            data: &DataPoints<1, 1>,
            params: &ParameterVector<1>,
        ) -> Result<(ResidualVector<1>, Jacobian<1, 1>), EvaluationError> {
            Ok((self.residuals(data, params)?, Jacobian::<1, 1>::new(1e170)))
        }
    }

    fn line_data() -> DataPoints<5, 2> {
        // y = 2x + 1
        DataPoints::<5, 2>::from_row_slice(&[
            0.0, 1.0, //
            1.0, 3.0, //
            2.0, 5.0, //
            3.0, 7.0, //
            4.0, 9.0,
        ])
    }

    fn line_solver(
        options: LMOptions,
        initial: ParameterVector<2>,
    ) -> LevenbergMarquardtSolver<'static, Line, 5, 2, 2> {
        LevenbergMarquardtSolver::new(options, initial, &Line, line_data()).unwrap()
    }

    // ========================================
    // Construction Tests
    // ========================================

    #[test]
    fn test_new_solver_state() {
        let options = LMOptions::new(0.5, 3.0, 20);
        let solver = line_solver(options, ParameterVector::<2>::new(1.0, -1.0));

        assert_eq!(solver.state(), SolverState::Ready);
        assert_eq!(solver.lambda(), 0.5);
        assert_eq!(solver.iterations(), 0);
        assert_eq!(solver.params(), &ParameterVector::<2>::new(1.0, -1.0));
        assert_eq!(solver.options(), &options);
        assert_eq!(solver.data_points(), &line_data());
    }

    #[test]
    fn test_new_rejects_invalid_options() {
        let options = LMOptions {
            damping_factor: 0.0,
            ..Default::default()
        };
        let result =
            LevenbergMarquardtSolver::new(options, ParameterVector::zeros(), &Line, line_data());
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidDampingFactor(_))
        ));
    }

    #[test]
    fn test_new_rejects_non_finite_params() {
        let result = LevenbergMarquardtSolver::new(
            LMOptions::default(),
            ParameterVector::<2>::new(0.0, f64::NAN),
            &Line,
            line_data(),
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::NonFiniteParameter { index: 1 })
        ));
    }

    #[test]
    fn test_from_rows() {
        let rows = [[0.0, 1.0], [1.0, 3.0], [2.0, 5.0], [3.0, 7.0], [4.0, 9.0]];
        let solver = LevenbergMarquardtSolver::<_, 5, 2, 2>::from_rows(
            LMOptions::default(),
            ParameterVector::zeros(),
            &Line,
            &rows,
        )
        .unwrap();
        assert_eq!(solver.data_points(), &line_data());
    }

    #[test]
    fn test_from_rows_wrong_count() {
        let rows = [[0.0, 1.0], [1.0, 3.0]];
        let result = LevenbergMarquardtSolver::<_, 5, 2, 2>::from_rows(
            LMOptions::default(),
            ParameterVector::zeros(),
            &Line,
            &rows,
        );
        assert_eq!(
            result.unwrap_err(),
            ConfigurationError::DimensionMismatch {
                rows: 2,
                cols: 2,
                expected_rows: 5,
                expected_cols: 2,
            }
        );
    }

    // ========================================
    // Iterate Tests
    // ========================================

    #[test]
    fn test_iterate_accepts_and_anneals() {
        let mut solver = line_solver(LMOptions::default(), ParameterVector::zeros());
        let report = solver.iterate().unwrap();

        assert_eq!(report.retries, 0);
        assert_eq!(report.lambda_used, 1e-3);
        assert_eq!(report.lambda, 1e-3 / 10.0);
        assert_eq!(solver.lambda(), report.lambda);
        assert!(report.cost_after <= report.cost_before);
        assert_eq!(solver.state(), SolverState::Iterating);
        assert_eq!(solver.iterations(), 1);
    }

    #[test]
    fn test_iterate_rejections_grow_lambda() {
        let data = DataPoints::<1, 1>::new(0.0);
        let mut solver =
            LevenbergMarquardtSolver::new(LMOptions::default(), ParameterVector::<1>::new(3.0), &Arctan, data)
                .unwrap();

        let report = solver.iterate().unwrap();
        assert!(report.retries >= 1);

        let mut expected = 1e-3;
        for _ in 0..report.retries {
            expected *= 10.0;
        }
        assert_eq!(report.lambda_used, expected);
        assert_eq!(solver.lambda(), expected / 10.0);
        assert!(report.cost_after <= report.cost_before);
    }

    #[test]
    fn test_iterate_zero_residual_fixed_point() {
        let exact = ParameterVector::<2>::new(2.0, 1.0);
        let mut solver = line_solver(LMOptions::default(), exact);

        let report = solver.iterate().unwrap();
        assert_eq!(solver.params(), &exact);
        assert_eq!(report.cost_before, 0.0);
        assert_eq!(report.cost_after, 0.0);
        assert_eq!(report.step_norm, 0.0);
        assert!(solver.lambda() < 1e-3);
    }

    #[test]
    fn test_iterate_lambda_floor() {
        let options = LMOptions {
            damping_factor: 1e-14,
            min_lambda: 1e-14,
            ..Default::default()
        };
        let mut solver = line_solver(options, ParameterVector::zeros());
        solver.iterate().unwrap();
        assert_eq!(solver.lambda(), 1e-14);
    }

    #[test]
    fn test_iterate_non_finite_trial_is_evaluation_error() {
        let function = NanAtTrial {
            start: 5.0,
            jacobian_calls: Cell::new(0),
        };
        let data = DataPoints::<1, 1>::new(0.0);
        let mut solver =
            LevenbergMarquardtSolver::new(LMOptions::default(), ParameterVector::<1>::new(5.0), &function, data)
                .unwrap();

        let err = solver.iterate().unwrap_err();
        assert_eq!(
            err,
            SolverError::Evaluation(EvaluationError::NonFinite {
                quantity: "residual",
                index: 0,
            })
        );
        assert_eq!(solver.params()[0], 5.0);
        assert_eq!(solver.state(), SolverState::Failed);
        assert_eq!(function.jacobian_calls.get(), 1);
    }

    #[test]
    fn test_iterate_retry_limit() {
        let options = LMOptions {
            max_damping_retries: 0,
            ..Default::default()
        };
        let data = DataPoints::<1, 1>::new(0.0);
        let mut solver =
            LevenbergMarquardtSolver::new(options, ParameterVector::<1>::new(3.0), &Arctan, data).unwrap();

        let err = solver.iterate().unwrap_err();
        assert_eq!(
            err,
            SolverError::NonConvergentDamping {
                retries: 0,
                lambda: 1e-3,
            }
        );
        assert_eq!(solver.params()[0], 3.0);
    }

    #[test]
    fn test_iterate_lambda_ceiling() {
        let options = LMOptions {
            max_lambda: 0.05,
            ..Default::default()
        };
        let data = DataPoints::<1, 1>::new(0.0);
        let mut solver =
            LevenbergMarquardtSolver::new(options, ParameterVector::<1>::new(3.0), &Arctan, data).unwrap();

        match solver.iterate() {
            Err(SolverError::NonConvergentDamping { lambda, .. }) => {
                assert!(lambda <= 0.05);
            }
            other => panic!("expected NonConvergentDamping, got {:?}", other),
        }
    }

    #[test]
    fn test_iterate_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let mut solver =
            line_solver(LMOptions::default(), ParameterVector::zeros()).with_cancellation(token);

        assert_eq!(
            solver.iterate().unwrap_err(),
            SolverError::Cancelled { iterations: 0 }
        );
    }

    #[test]
    fn test_iterate_overflowing_cost_is_evaluation_error() {
        let data = DataPoints::<2, 1>::zeros();
        let mut solver = LevenbergMarquardtSolver::new(
            LMOptions::default(),
            ParameterVector::<1>::new(3.0),
            &OverflowingCost,
            data,
        )
        .unwrap();

        let overflow = SolverError::Evaluation(EvaluationError::NonFinite {
            quantity: "cost",
            index: 0,
        });
        assert_eq!(solver.iterate().unwrap_err(), overflow);
        assert_eq!(solver.params()[0], 3.0);
        assert_eq!(solver.iterations(), 0);
        assert_eq!(solver.state(), SolverState::Failed);
        assert_eq!(solver.cost().unwrap_err(), overflow);
    }

    #[test]
    fn test_iterate_singular_system() {
        let data = DataPoints::<1, 1>::new(0.0);
        let mut solver = LevenbergMarquardtSolver::new(
            LMOptions::default(),
            ParameterVector::<1>::new(1.0),
            &SteepJacobian,
            data,
        )
        .unwrap();

        assert_eq!(
            solver.iterate().unwrap_err(),
            SolverError::SingularSystem { lambda: 1e-3 }
        );
        assert_eq!(solver.params()[0], 1.0);
        assert_eq!(solver.lambda(), 1e-3);
        assert_eq!(solver.state(), SolverState::Failed);
    }

    // ========================================
    // Minimize Tests
    // ========================================

    #[test]
    fn test_minimize_linear_fit() {
        let mut solver = line_solver(LMOptions::default(), ParameterVector::<2>::new(-3.0, 8.0));
        let report = solver.minimize().unwrap();

        assert_eq!(report.termination, Termination::MaxIterationsReached);
        assert_eq!(report.iterations, 100);
        assert_eq!(solver.state(), SolverState::MaxIterationsReached);
        assert_abs_diff_eq!(report.params[0], 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(report.params[1], 1.0, epsilon = 1e-9);
        assert!(report.rmse().unwrap() < 1e-9);
    }

    #[test]
    fn test_minimize_tolerance_early_stop() {
        let options = LMOptions::default().with_tolerance(1e-6);
        let mut solver = line_solver(options, ParameterVector::<2>::new(-3.0, 8.0));
        let report = solver.minimize().unwrap();

        assert!(report.converged());
        assert!(report.iterations < 100);
        assert_eq!(solver.state(), SolverState::Converged);
        assert_abs_diff_eq!(report.params[0], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_minimize_plain_sum_measure_stalls() {
        let options = LMOptions::default().with_residual_measure(ResidualMeasure::PlainSum);
        let mut solver = line_solver(options, ParameterVector::<2>::new(0.0, 0.0));

        assert!(matches!(
            solver.minimize(),
            Err(SolverError::NonConvergentDamping { .. })
        ));
        assert_eq!(solver.params(), &ParameterVector::<2>::zeros());
        assert_eq!(solver.state(), SolverState::Failed);
    }

    #[test]
    fn test_cost_accessor() {
        let solver = line_solver(LMOptions::default(), ParameterVector::<2>::new(2.0, 0.0));
        // Every residual is -1
        assert_eq!(solver.cost().unwrap(), 5.0);
    }

    // ========================================
    // Report Tests
    // ========================================

    #[test]
    fn test_step_report_relative_change() {
        let report = StepReport {
            cost_before: 4.0,
            cost_after: 1.0,
            lambda_used: 1.0,
            lambda: 0.1,
            retries: 0,
            step_norm: 1.0,
        };
        assert_eq!(report.relative_change(), 0.75);

        let at_zero = StepReport {
            cost_before: 0.0,
            cost_after: 0.0,
            ..report
        };
        assert_eq!(at_zero.relative_change(), 0.0);
    }

    #[test]
    fn test_minimize_report_rmse() {
        let report = MinimizeReport::<1> {
            params: ParameterVector::<1>::new(1.0),
            cost: 4.0,
            iterations: 10,
            lambda: 1e-5,
            residual_count: 4,
            residual_measure: ResidualMeasure::SumOfSquares,
            termination: Termination::Converged,
        };
        assert_abs_diff_eq!(report.rmse().unwrap(), 1.0, epsilon = 1e-12);
        assert!(report.converged());

        let plain = MinimizeReport {
            cost: -4.0,
            residual_measure: ResidualMeasure::PlainSum,
            ..report
        };
        assert_eq!(plain.rmse(), None);
    }

    #[test]
    fn test_solver_debug() {
        let solver = line_solver(LMOptions::default(), ParameterVector::zeros());
        let debug_str = format!("{:?}", solver);
        assert!(debug_str.contains("LevenbergMarquardtSolver"));
        assert!(debug_str.contains("lambda"));
    }
}
