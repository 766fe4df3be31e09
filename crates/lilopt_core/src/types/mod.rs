//! Fixed-size numeric types and error types.
//!
//! This module provides:
//! - Shape aliases over nalgebra's statically sized matrices, parameterised by
//!   the residual count `R`, parameter count `P` and point dimension `D`
//! - `error`: Structured error types for evaluation, solver and configuration failures
//!
//! # Re-exports
//!
//! [`EvaluationError`], [`SolverError`] and [`ConfigurationError`] from `error`.

pub mod error;

pub use error::{ConfigurationError, EvaluationError, SolverError};

use nalgebra::{SMatrix, SVector};

/// Current estimate of the model parameters (length `P`).
pub type ParameterVector<const P: usize> = SVector<f64, P>;

/// One residual per observation (length `R`).
pub type ResidualVector<const R: usize> = SVector<f64, R>;

/// Partial derivatives `∂residual_i / ∂parameter_j` (`R x P`).
pub type Jacobian<const R: usize, const P: usize> = SMatrix<f64, R, P>;

/// Observed samples, one `D`-dimensional point per row (`R x D`).
pub type DataPoints<const R: usize, const D: usize> = SMatrix<f64, R, D>;
