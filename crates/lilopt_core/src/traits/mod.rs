//! Traits implemented by callers to describe a least-squares problem.
//!
//! The solver never owns a model: it borrows an [`ErrorFunction`] for its
//! whole lifetime and calls it with the data points it holds.

pub mod error_function;

pub use error_function::{ErrorFunction, ForwardDifference, ResidualFunction};
