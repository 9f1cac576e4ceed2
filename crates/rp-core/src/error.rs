//! Error types for roc-picker

use std::fmt;

use thiserror::Error;

/// Why a single constrained fit failed.
///
/// These are expected, data-dependent outcomes: the scanner records them per
/// grid point and keeps going.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// The numerical solver stopped without meeting its tolerances.
    NonConvergence(String),
    /// No distribution pair on the given support can reach the target AUC.
    Infeasible(String),
    /// The solver landed on the spurious `Λ = 0` root away from the free optimum.
    DegenerateRoot {
        /// Converged multiplier.
        lambda: f64,
        /// Requested AUC.
        target_auc: f64,
        /// AUC of the unconstrained fit.
        nominal_auc: f64,
    },
    /// Iteration cap reached.
    IterationCap(u64),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonConvergence(msg) => write!(f, "did not converge: {msg}"),
            Self::Infeasible(msg) => write!(f, "infeasible: {msg}"),
            Self::DegenerateRoot { lambda, target_auc, nominal_auc } => write!(
                f,
                "degenerate root (lambda={lambda:.3e}) at AUC={target_auc:.6}, free AUC={nominal_auc:.6}"
            ),
            Self::IterationCap(n) => write!(f, "iteration cap reached ({n})"),
        }
    }
}

/// roc-picker error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error (bad configuration or arguments)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed input data: empty group, non-finite value, negative weight.
    #[error("Invalid distribution: {0}")]
    InvalidDistribution(String),

    /// A single constrained fit failed.
    #[error("Optimization failed at AUC={target_auc:?}: {reason}")]
    OptimizationFailure {
        /// Requested AUC (`None` for the unconstrained fit).
        target_auc: Option<f64>,
        /// Failure cause.
        reason: FailureReason,
    },

    /// Every point of a likelihood scan failed.
    #[error("Scan infeasible: {0}")]
    ScanInfeasible(String),

    /// Datacard syntax error.
    #[error("Parse error at line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// Description.
        message: String,
    },
}

impl Error {
    /// Shorthand for an [`Error::OptimizationFailure`].
    pub fn optimization(target_auc: Option<f64>, reason: FailureReason) -> Self {
        Self::OptimizationFailure { target_auc, reason }
    }

    /// `true` for errors a scanner should record and skip rather than propagate.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::OptimizationFailure { .. })
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimization_failure_is_recoverable() {
        let e = Error::optimization(Some(0.9), FailureReason::IterationCap(50));
        assert!(e.is_recoverable());
        assert!(e.to_string().contains("iteration cap"));
        assert!(!Error::InvalidDistribution("empty".into()).is_recoverable());
    }

    #[test]
    fn degenerate_root_message_names_both_aucs() {
        let r = FailureReason::DegenerateRoot { lambda: 1e-12, target_auc: 0.3, nominal_auc: 0.5 };
        let msg = r.to_string();
        assert!(msg.contains("0.300000"));
        assert!(msg.contains("0.500000"));
    }
}
