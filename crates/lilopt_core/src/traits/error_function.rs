//! Error function abstractions consumed by the solver.
//!
//! - [`ErrorFunction`]: residuals and Jacobian of a model against data points
//! - [`ResidualFunction`]: residuals only, for models without an analytic Jacobian
//! - [`ForwardDifference`]: adapts a [`ResidualFunction`] into an [`ErrorFunction`]
//!
//! # Example
//!
//! ```
//! use lilopt_core::traits::{ErrorFunction, ForwardDifference, ResidualFunction};
//! use lilopt_core::types::{DataPoints, EvaluationError, ParameterVector, ResidualVector};
//!
//! // Residual of the line y = a * x + b against (x, y) samples.
//! struct Line;
//!
//! impl ResidualFunction<3, 2, 2> for Line {
//!     fn residuals(
//!         &self,
//!         data: &DataPoints<3, 2>,
//!         params: &ParameterVector<2>,
//!     ) -> Result<ResidualVector<3>, EvaluationError> {
//!         Ok(ResidualVector::from_fn(|i, _| {
//!             params[0] * data[(i, 0)] + params[1] - data[(i, 1)]
//!         }))
//!     }
//! }
//!
//! let data = DataPoints::<3, 2>::new(0.0, 1.0, 1.0, 3.0, 2.0, 5.0);
//! let function = ForwardDifference::new(Line);
//! let (_, jacobian) = function
//!     .residuals_and_jacobian(&data, &ParameterVector::<2>::new(1.0, 1.0))
//!     .unwrap();
//! assert!((jacobian[(2, 0)] - 2.0).abs() < 1e-6);
//! assert!((jacobian[(2, 1)] - 1.0).abs() < 1e-6);
//! ```

use crate::types::{
    ConfigurationError, DataPoints, EvaluationError, Jacobian, ParameterVector, ResidualVector,
};

/// Residuals and Jacobian of a parametric model against fixed data points.
///
/// Implementations must be pure: the same data and parameters always yield
/// the same output, and evaluation has no side effects. A model that is
/// undefined at some parameters reports an [`EvaluationError`] instead of
/// returning NaN.
///
/// # Type Parameters
///
/// * `R` - Number of residuals (one per observation)
/// * `P` - Number of parameters
/// * `D` - Dimension of each data point
pub trait ErrorFunction<const R: usize, const P: usize, const D: usize> {
    /// Evaluate the residual vector only.
    ///
    /// Used for trial steps, so it should avoid any Jacobian work.
    fn residuals(
        &self,
        data: &DataPoints<R, D>,
        params: &ParameterVector<P>,
    ) -> Result<ResidualVector<R>, EvaluationError>;

    /// Evaluate the residual vector and the Jacobian `∂r_i/∂p_j`.
    fn residuals_and_jacobian(
        &self,
        data: &DataPoints<R, D>,
        params: &ParameterVector<P>,
    ) -> Result<(ResidualVector<R>, Jacobian<R, P>), EvaluationError>;
}

/// Residual-only model, differentiated numerically by [`ForwardDifference`].
pub trait ResidualFunction<const R: usize, const P: usize, const D: usize> {
    /// Evaluate the residual vector.
    fn residuals(
        &self,
        data: &DataPoints<R, D>,
        params: &ParameterVector<P>,
    ) -> Result<ResidualVector<R>, EvaluationError>;
}

/// Forward finite-difference Jacobian around a [`ResidualFunction`].
///
/// Column `j` is `(r(p + h e_j) - r(p)) / h` with `h = epsilon * max(|p_j|, 1)`,
/// costing `P` extra residual evaluations per Jacobian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForwardDifference<M> {
    model: M,
    epsilon: f64,
}

impl<M> ForwardDifference<M> {
    /// Relative step used by [`ForwardDifference::new`].
    pub const DEFAULT_EPSILON: f64 = 1e-8;

    /// Wrap a model with the default relative step.
    pub fn new(model: M) -> Self {
        Self {
            model,
            epsilon: Self::DEFAULT_EPSILON,
        }
    }

    /// Wrap a model with a custom relative step.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidDifferenceStep`] if `epsilon` is
    /// not finite and positive.
    pub fn with_epsilon(model: M, epsilon: f64) -> Result<Self, ConfigurationError> {
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return Err(ConfigurationError::InvalidDifferenceStep(epsilon));
        }
        Ok(Self { model, epsilon })
    }

    /// The wrapped model.
    pub fn model(&self) -> &M {
        &self.model
    }

    /// The relative finite-difference step.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }
}

impl<M, const R: usize, const P: usize, const D: usize> ErrorFunction<R, P, D>
    for ForwardDifference<M>
where
    M: ResidualFunction<R, P, D>,
{
    fn residuals(
        &self,
        data: &DataPoints<R, D>,
        params: &ParameterVector<P>,
    ) -> Result<ResidualVector<R>, EvaluationError> {
        self.model.residuals(data, params)
    }

    fn residuals_and_jacobian(
        &self,
        data: &DataPoints<R, D>,
        params: &ParameterVector<P>,
    ) -> Result<(ResidualVector<R>, Jacobian<R, P>), EvaluationError> {
        let r0 = self.model.residuals(data, params)?;
        let mut jacobian = Jacobian::<R, P>::zeros();

        for j in 0..P {
            let h = self.epsilon * params[j].abs().max(1.0);
            let mut shifted = *params;
            shifted[j] += h;

            let r_plus = self.model.residuals(data, &shifted)?;
            jacobian.set_column(j, &((r_plus - r0) / h));
        }

        Ok((r0, jacobian))
    }
}
