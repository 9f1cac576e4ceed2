//! Capability traits
//!
//! High-level orchestration (likelihood scans, analysis drivers) talks to the
//! solvers only through these traits, so discrete, closed-form and continuous
//! formulations are interchangeable.

use crate::Result;
use crate::types::{FitResult, WarmStart};

/// Cumulative view of one group's threshold distribution.
pub trait CdfModel {
    /// `P(T <= t)`.
    fn cdf(&self, t: f64) -> f64;

    /// Density (continuous) or point mass (discrete) at `t`.
    fn pdf(&self, t: f64) -> f64;

    /// Total (unnormalized) count backing the model.
    fn total_count(&self) -> f64;

    /// `P(T <= t)`.
    fn fraction_le(&self, t: f64) -> f64 {
        self.cdf(t)
    }

    /// `P(T >= t)`.
    fn fraction_ge(&self, t: f64) -> f64;
}

/// Most-likely distribution pair at a fixed AUC.
///
/// Implementors hold the two prepared groups; `solve` only needs the target.
pub trait AucSolver: Send + Sync {
    /// Human-readable method name.
    fn name(&self) -> &str;

    /// AUC of the unconstrained fit.
    fn nominal_auc(&self) -> f64;

    /// Range of AUC values the formulation can reach, if known a priori.
    fn feasible_range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    /// Fit at `target_auc` (`None`: unconstrained), optionally seeded from a
    /// neighbouring fit.
    fn solve(&self, target_auc: Option<f64>, warm: Option<&WarmStart>) -> Result<FitResult>;
}
