//! # lilopt_core: Fixed-Size Levenberg-Marquardt Solver
//!
//! lilopt_core fits the parameters of a user-supplied model to a fixed set of
//! data points by damped nonlinear least squares. Problem sizes are compile-time
//! constants, so every vector and matrix lives on the stack:
//!
//! - `R`: number of residuals (one per observation)
//! - `P`: number of parameters
//! - `D`: dimension of each data point
//!
//! ## Modules
//!
//! - `types`: Shape aliases (`ParameterVector`, `Jacobian`, ...) and error types
//! - `traits`: `ErrorFunction` implemented by callers, plus a finite-difference adapter
//! - `solvers`: `LevenbergMarquardtSolver`, `LMOptions` and cancellation
//!
//! ## Usage Examples
//!
//! ```rust
//! use lilopt_core::solvers::{LMOptions, LevenbergMarquardtSolver};
//! use lilopt_core::traits::ErrorFunction;
//! use lilopt_core::types::{DataPoints, EvaluationError, Jacobian, ParameterVector, ResidualVector};
//!
//! // Distance residual: r_i = |x_i - c| - radius for points x_i in the plane
//! struct Circle;
//!
//! impl ErrorFunction<4, 3, 2> for Circle {
//!     fn residuals(
//!         &self,
//!         data: &DataPoints<4, 2>,
//!         p: &ParameterVector<3>,
//!     ) -> Result<ResidualVector<4>, EvaluationError> {
//!         Ok(ResidualVector::from_fn(|i, _| {
//!             (data[(i, 0)] - p[0]).hypot(data[(i, 1)] - p[1]) - p[2]
//!         }))
//!     }
//!
//!     fn residuals_and_jacobian(
//!         &self,
//!         data: &DataPoints<4, 2>,
//!         p: &ParameterVector<3>,
//!     ) -> Result<(ResidualVector<4>, Jacobian<4, 3>), EvaluationError> {
//!         let mut jacobian = Jacobian::zeros();
//!         for i in 0..4 {
//!             let (dx, dy) = (data[(i, 0)] - p[0], data[(i, 1)] - p[1]);
//!             let dist = dx.hypot(dy);
//!             if dist == 0.0 {
//!                 return Err(EvaluationError::DomainViolation("point at centre".into()));
//!             }
//!             jacobian[(i, 0)] = -dx / dist;
//!             jacobian[(i, 1)] = -dy / dist;
//!             jacobian[(i, 2)] = -1.0;
//!         }
//!         Ok((self.residuals(data, p)?, jacobian))
//!     }
//! }
//!
//! // Points on the circle centred at (1, 2) with radius 3
//! let data = DataPoints::<4, 2>::from_row_slice(&[
//!     4.0, 2.0, //
//!     1.0, 5.0, //
//!     -2.0, 2.0, //
//!     1.0, -1.0,
//! ]);
//!
//! let mut solver = LevenbergMarquardtSolver::new(
//!     LMOptions::default().with_tolerance(1e-12),
//!     ParameterVector::<3>::new(0.5, 1.5, 1.0),
//!     &Circle,
//!     data,
//! )
//! .unwrap();
//!
//! let report = solver.minimize().unwrap();
//! assert!(report.cost < 1e-12);
//! assert!((solver.params()[2] - 3.0).abs() < 1e-6);
//! ```
//!
//! ## Logging
//!
//! The solver emits `tracing` events: `debug` per accepted step, `trace` per
//! rejected trial, `warn` on failures and `info` when `minimize` finishes.
//! Install any `tracing` subscriber to collect them.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

pub mod solvers;
pub mod traits;
pub mod types;
