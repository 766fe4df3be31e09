//! Damped Gauss-Newton normal equations.
//!
//! For a Jacobian `J` and residuals `r` evaluated at the current parameters,
//!
//! ```text
//! (JᵗJ + λ·diag(JᵗJ)) δ = Jᵗr
//! ```
//!
//! is re-solved for each trial λ from the cached `JᵗJ`, `diag(JᵗJ)` and `Jᵗr`,
//! so a rejected step never triggers another Jacobian evaluation.

use nalgebra::{Const, DimMin};

use super::options::Decomposition;
use crate::types::{Jacobian, ParameterVector, ResidualVector};

/// Cached normal-equation terms for one Jacobian evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DampedSystem<const P: usize> {
    jtj: Jacobian<P, P>,
    scaling: ParameterVector<P>,
    gradient: ParameterVector<P>,
}

impl<const P: usize> DampedSystem<P>
where
    Const<P>: DimMin<Const<P>, Output = Const<P>>,
{
    /// Form `JᵗJ`, its damping scale and `Jᵗr`.
    ///
    /// Zero diagonal entries (parameters the residuals do not depend on) are
    /// damped with unit scale so the damped matrix stays non-singular.
    pub fn new<const R: usize>(jacobian: &Jacobian<R, P>, residuals: &ResidualVector<R>) -> Self {
        let jtj = jacobian.tr_mul(jacobian);
        let gradient = jacobian.tr_mul(residuals);
        let scaling = jtj.diagonal().map(|d| if d > 0.0 { d } else { 1.0 });

        Self {
            jtj,
            scaling,
            gradient,
        }
    }

    /// `JᵗJ`.
    pub fn jtj(&self) -> &Jacobian<P, P> {
        &self.jtj
    }

    /// `Jᵗr`, the gradient of `½ rᵗr`.
    pub fn gradient(&self) -> &ParameterVector<P> {
        &self.gradient
    }

    /// The damped matrix `JᵗJ + λ·diag(JᵗJ)`.
    pub fn damped_matrix(&self, lambda: f64) -> Jacobian<P, P> {
        let mut damped = self.jtj;
        for i in 0..P {
            damped[(i, i)] += lambda * self.scaling[i];
        }
        damped
    }

    /// Solve for δ at damping λ.
    ///
    /// Returns `None` when the decomposition cannot solve the system or the
    /// solution is not finite.
    pub fn solve(&self, lambda: f64, decomposition: Decomposition) -> Option<ParameterVector<P>> {
        let damped = self.damped_matrix(lambda);
        let delta = match decomposition {
            Decomposition::ColumnPivotedQr => damped.col_piv_qr().solve(&self.gradient),
            Decomposition::FullPivotedLu => damped.full_piv_lu().solve(&self.gradient),
        }?;

        delta.iter().all(|v| v.is_finite()).then_some(delta)
    }
}
