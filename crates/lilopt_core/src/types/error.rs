//! Error types for structured error handling.
//!
//! This module provides:
//! - `EvaluationError`: Failures reported by (or detected in) an error function
//! - `SolverError`: Failures of a Levenberg-Marquardt step or solve
//! - `ConfigurationError`: Invalid options or data supplied at construction

use thiserror::Error;

/// Error function evaluation errors.
///
/// Returned by [`ErrorFunction`](crate::traits::ErrorFunction) implementations
/// when residuals or the Jacobian cannot be computed, and raised by the solver
/// itself when an evaluation yields non-finite values.
///
/// # Examples
/// ```
/// use lilopt_core::types::EvaluationError;
///
/// let err = EvaluationError::DomainViolation("log of negative rate".to_string());
/// assert_eq!(format!("{}", err), "Model undefined at parameters: log of negative rate");
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    /// The model is not defined at the requested parameters.
    #[error("Model undefined at parameters: {0}")]
    DomainViolation(String),

    /// An evaluation produced NaN or an infinity, or the cost of finite
    /// residuals overflowed.
    #[error("Non-finite {quantity} at index {index}")]
    NonFinite {
        /// Which output was non-finite (`"residual"`, `"jacobian"` or `"cost"`)
        quantity: &'static str,
        /// Linear (column-major) index of the offending entry, 0 for the cost
        index: usize,
    },

    /// Any other evaluation failure.
    #[error("Evaluation failed: {0}")]
    Failed(String),
}

/// Levenberg-Marquardt solver errors.
///
/// Every variant is fatal to the enclosing `iterate()` / `minimize()` call.
/// Reaching the iteration cap is not an error; see
/// [`Termination`](crate::solvers::Termination).
///
/// # Examples
/// ```
/// use lilopt_core::types::SolverError;
///
/// let err = SolverError::NonConvergentDamping { retries: 64, lambda: 1e15 };
/// assert!(format!("{}", err).contains("64 damping increases"));
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    /// The error function could not be evaluated.
    #[error("Error function evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),

    /// The damped normal equations could not be solved.
    #[error("Damped normal equations are singular at lambda = {lambda}")]
    SingularSystem {
        /// Damping factor at which the solve failed
        lambda: f64,
    },

    /// No acceptable step was found before the retry or lambda limit.
    #[error("No acceptable step after {retries} damping increases (lambda = {lambda})")]
    NonConvergentDamping {
        /// Number of damping increases attempted
        retries: usize,
        /// Damping factor when the search gave up
        lambda: f64,
    },

    /// The solve was cancelled through its cancellation token.
    #[error("Solve cancelled after {iterations} iterations")]
    Cancelled {
        /// Steps completed before cancellation was observed
        iterations: usize,
    },
}

/// Construction-time configuration errors.
///
/// # Examples
/// ```
/// use lilopt_core::types::ConfigurationError;
///
/// let err = ConfigurationError::InvalidDampingFactor(-1.0);
/// assert!(err.to_string().contains("Invalid damping factor"));
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    /// Initial damping factor is not positive, not finite, or outside the lambda bounds.
    #[error("Invalid damping factor: {0}. Must be finite, positive and within [min_lambda, max_lambda]")]
    InvalidDampingFactor(f64),

    /// Damping growth multiplier is not a finite value greater than one.
    #[error("Invalid damping growth: {0}. Must be finite and greater than 1")]
    InvalidDampingGrowth(f64),

    /// Iteration cap is zero.
    #[error("max_iterations must be at least 1")]
    ZeroMaxIterations,

    /// Lambda floor and ceiling are inconsistent.
    #[error("Invalid lambda bounds: min_lambda = {min}, max_lambda = {max}")]
    InvalidLambdaBounds {
        /// Configured floor
        min: f64,
        /// Configured ceiling
        max: f64,
    },

    /// Convergence tolerance is negative or not finite.
    #[error("Invalid tolerance: {0}. Must be finite and non-negative")]
    InvalidTolerance(f64),

    /// Finite-difference step is not a finite positive value.
    #[error("Invalid finite-difference step: {0}. Must be finite and positive")]
    InvalidDifferenceStep(f64),

    /// Initial parameter vector contains NaN or an infinity.
    #[error("Initial parameter {index} is not finite")]
    NonFiniteParameter {
        /// Index of the offending parameter
        index: usize,
    },

    /// Data points do not have the shape the error function expects.
    #[error("Data points have shape {rows}x{cols}, expected {expected_rows}x{expected_cols}")]
    DimensionMismatch {
        /// Rows supplied
        rows: usize,
        /// Columns supplied
        cols: usize,
        /// Residual count expected by the error function
        expected_rows: usize,
        /// Point dimension expected by the error function
        expected_cols: usize,
    },

    /// Options file could not be read or parsed.
    #[error("Configuration file error: {0}")]
    File(String),

    /// Environment override could not be parsed.
    #[error("Invalid value for {key}: {value}")]
    Environment {
        /// Environment variable name
        key: String,
        /// Raw value that failed to parse
        value: String,
    },
}
