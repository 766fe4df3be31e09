//! Levenberg-Marquardt solver and its supporting pieces.
//!
//! ## Components
//!
//! - [`LevenbergMarquardtSolver`]: Stateful fixed-size solver exposing
//!   single-step [`iterate`](LevenbergMarquardtSolver::iterate) and full
//!   [`minimize`](LevenbergMarquardtSolver::minimize)
//! - [`LMOptions`]: Damping constants, iteration and retry caps, λ bounds,
//!   optional early-stop tolerance
//! - [`DampedSystem`]: Cached normal-equation terms re-solved per trial λ
//! - [`CancellationToken`]: Cooperative cancellation shared across threads
//!
//! ## Configuration
//!
//! [`LMOptions`] defaults to λ = 1e-3, v = 10 and 100 iterations. Options can
//! be read from TOML with [`LMOptions::from_file`] and overridden through the
//! `LILOPT_*` environment variables by [`LMOptions::load`].
//!
//! ## Example
//!
//! ```
//! use lilopt_core::solvers::{LMOptions, LevenbergMarquardtSolver};
//! use lilopt_core::traits::{ForwardDifference, ResidualFunction};
//! use lilopt_core::types::{DataPoints, EvaluationError, ParameterVector, ResidualVector};
//!
//! // y = exp(k * t), residuals only; the Jacobian is approximated
//! struct Decay;
//!
//! impl ResidualFunction<3, 1, 2> for Decay {
//!     fn residuals(
//!         &self,
//!         data: &DataPoints<3, 2>,
//!         params: &ParameterVector<1>,
//!     ) -> Result<ResidualVector<3>, EvaluationError> {
//!         Ok(ResidualVector::from_fn(|i, _| {
//!             (params[0] * data[(i, 0)]).exp() - data[(i, 1)]
//!         }))
//!     }
//! }
//!
//! let rows = [
//!     [0.0, 1.0],
//!     [1.0, (-0.5f64).exp()],
//!     [2.0, (-1.0f64).exp()],
//! ];
//! let model = ForwardDifference::new(Decay);
//! let mut solver = LevenbergMarquardtSolver::<_, 3, 1, 2>::from_rows(
//!     LMOptions::default().with_tolerance(1e-12),
//!     ParameterVector::<1>::new(0.0),
//!     &model,
//!     &rows,
//! )
//! .unwrap();
//!
//! solver.minimize().unwrap();
//! assert!((solver.params()[0] + 0.5).abs() < 1e-5);
//! ```

mod cancellation;
mod damped_system;
mod levenberg_marquardt;
mod options;

// Re-export public types at module level
pub use cancellation::CancellationToken;
pub use damped_system::DampedSystem;
pub use levenberg_marquardt::{
    LevenbergMarquardtSolver, MinimizeReport, SolverState, StepReport, Termination,
};
pub use options::{
    Decomposition, LMOptions, ResidualMeasure, ENV_DAMPING_FACTOR, ENV_DAMPING_GROWTH,
    ENV_MAX_ITERATIONS, ENV_TOLERANCE,
};
