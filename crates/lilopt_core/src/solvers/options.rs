//! Solver options and their loading from TOML files and the environment.
//!
//! Priority when using [`LMOptions::load`] (highest to lowest):
//! 1. Environment variables (`LILOPT_*`)
//! 2. Options file
//! 3. Default values

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{ConfigurationError, ResidualVector};

/// Environment variable overriding [`LMOptions::damping_factor`].
pub const ENV_DAMPING_FACTOR: &str = "LILOPT_DAMPING_FACTOR";
/// Environment variable overriding [`LMOptions::damping_growth`].
pub const ENV_DAMPING_GROWTH: &str = "LILOPT_DAMPING_GROWTH";
/// Environment variable overriding [`LMOptions::max_iterations`].
pub const ENV_MAX_ITERATIONS: &str = "LILOPT_MAX_ITERATIONS";
/// Environment variable overriding [`LMOptions::tolerance`].
pub const ENV_TOLERANCE: &str = "LILOPT_TOLERANCE";

/// Cost compared between the current and the trial parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidualMeasure {
    /// `rᵗr`, the least-squares objective.
    #[default]
    SumOfSquares,
    /// `Σ r_i`. Not a descent criterion; kept to compare against the
    /// sum-of-squares measure on problems with known minima.
    PlainSum,
}

impl ResidualMeasure {
    /// Evaluate the measure on a residual vector.
    #[inline]
    pub fn cost<const R: usize>(&self, residuals: &ResidualVector<R>) -> f64 {
        match self {
            ResidualMeasure::SumOfSquares => residuals.norm_squared(),
            ResidualMeasure::PlainSum => residuals.sum(),
        }
    }
}

/// Dense decomposition used to solve the damped normal equations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decomposition {
    /// Householder QR with column pivoting.
    #[default]
    ColumnPivotedQr,
    /// LU with full (row and column) pivoting.
    FullPivotedLu,
}

/// Configuration for the Levenberg-Marquardt solver.
///
/// The solver copies these options at construction and keeps its running
/// damping factor separately, so the caller's value is never modified.
///
/// # Example
///
/// ```
/// use lilopt_core::solvers::LMOptions;
///
/// let options = LMOptions::from_toml_str(
///     r#"
///     damping_factor = 0.01
///     max_iterations = 25
///     "#,
/// )
/// .unwrap();
/// assert_eq!(options.max_iterations, 25);
/// assert_eq!(options.damping_growth, 10.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LMOptions {
    /// Initial damping factor λ.
    pub damping_factor: f64,
    /// Multiplier v applied to λ on rejection; λ is divided by v on acceptance.
    pub damping_growth: f64,
    /// Maximum number of `iterate()` calls made by `minimize()`.
    pub max_iterations: usize,
    /// Maximum damping increases within a single `iterate()` call.
    pub max_damping_retries: usize,
    /// Floor applied when λ is annealed after an accepted step.
    pub min_lambda: f64,
    /// Ceiling λ may not exceed while searching for an acceptable step.
    pub max_lambda: f64,
    /// Relative cost change at which `minimize()` stops early.
    ///
    /// `None` runs every solve to `max_iterations`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    /// Cost used for step acceptance.
    pub residual_measure: ResidualMeasure,
    /// Decomposition used for the damped normal equations.
    pub decomposition: Decomposition,
}

impl Default for LMOptions {
    fn default() -> Self {
        Self {
            damping_factor: 1e-3,
            damping_growth: 10.0,
            max_iterations: 100,
            max_damping_retries: 64,
            min_lambda: 1e-15,
            max_lambda: 1e15,
            tolerance: None,
            residual_measure: ResidualMeasure::SumOfSquares,
            decomposition: Decomposition::ColumnPivotedQr,
        }
    }
}

impl LMOptions {
    /// Create options with the given damping constants and iteration cap.
    pub fn new(damping_factor: f64, damping_growth: f64, max_iterations: usize) -> Self {
        Self {
            damping_factor,
            damping_growth,
            max_iterations,
            ..Default::default()
        }
    }

    /// Relaxed tolerance and fewer iterations.
    pub fn fast() -> Self {
        Self {
            max_iterations: 50,
            tolerance: Some(1e-6),
            ..Default::default()
        }
    }

    /// Tight tolerance and more iterations.
    pub fn high_precision() -> Self {
        Self {
            max_iterations: 500,
            tolerance: Some(1e-14),
            ..Default::default()
        }
    }

    /// Builder-style setter for the early-stop tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Builder-style setter for the acceptance measure.
    pub fn with_residual_measure(mut self, measure: ResidualMeasure) -> Self {
        self.residual_measure = measure;
        self
    }

    /// Builder-style setter for the linear decomposition.
    pub fn with_decomposition(mut self, decomposition: Decomposition) -> Self {
        self.decomposition = decomposition;
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.min_lambda.is_finite()
            && self.max_lambda.is_finite()
            && self.min_lambda > 0.0
            && self.min_lambda < self.max_lambda)
        {
            return Err(ConfigurationError::InvalidLambdaBounds {
                min: self.min_lambda,
                max: self.max_lambda,
            });
        }

        if !(self.damping_factor.is_finite()
            && self.damping_factor > 0.0
            && self.damping_factor >= self.min_lambda
            && self.damping_factor <= self.max_lambda)
        {
            return Err(ConfigurationError::InvalidDampingFactor(
                self.damping_factor,
            ));
        }

        if !(self.damping_growth.is_finite() && self.damping_growth > 1.0) {
            return Err(ConfigurationError::InvalidDampingGrowth(
                self.damping_growth,
            ));
        }

        if self.max_iterations == 0 {
            return Err(ConfigurationError::ZeroMaxIterations);
        }

        if let Some(tolerance) = self.tolerance {
            if !(tolerance.is_finite() && tolerance >= 0.0) {
                return Err(ConfigurationError::InvalidTolerance(tolerance));
            }
        }

        Ok(())
    }

    /// Parse options from a TOML document. Missing keys take default values.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigurationError> {
        let options: LMOptions = toml::from_str(content)
            .map_err(|e| ConfigurationError::File(format!("Failed to parse TOML: {}", e)))?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigurationError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::File(format!(
                "Failed to read options file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialise the options as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigurationError> {
        toml::to_string(self)
            .map_err(|e| ConfigurationError::File(format!("Failed to serialise TOML: {}", e)))
    }

    /// Apply overrides from `LILOPT_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigurationError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// The lookup is queried with the `ENV_*` variable names.
    pub fn apply_overrides<L>(&mut self, lookup: L) -> Result<(), ConfigurationError>
    where
        L: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_DAMPING_FACTOR) {
            self.damping_factor = parse_override(ENV_DAMPING_FACTOR, &value)?;
        }
        if let Some(value) = lookup(ENV_DAMPING_GROWTH) {
            self.damping_growth = parse_override(ENV_DAMPING_GROWTH, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_ITERATIONS) {
            self.max_iterations = parse_override(ENV_MAX_ITERATIONS, &value)?;
        }
        if let Some(value) = lookup(ENV_TOLERANCE) {
            self.tolerance = match value.trim() {
                "" | "none" => None,
                raw => Some(parse_override(ENV_TOLERANCE, raw)?),
            };
        }
        Ok(())
    }

    /// Build options from all sources and validate the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigurationError> {
        let mut options = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        options.apply_env_overrides()?;
        options.validate()?;

        debug!(
            damping_factor = options.damping_factor,
            damping_growth = options.damping_growth,
            max_iterations = options.max_iterations,
            tolerance = ?options.tolerance,
            "Solver options loaded"
        );
        Ok(options)
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigurationError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigurationError::Environment {
            key: key.to_string(),
            value: value.to_string(),
        })
}
