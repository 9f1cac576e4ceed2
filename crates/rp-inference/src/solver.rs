//! Solver selection.
//!
//! The three formulations are interchangeable behind [`AucSolver`]; the
//! scanner and analysis drivers hold a [`SolverKind`] and never care which one.

use rp_core::{AucSolver, FitResult, Result, WarmStart};
use rp_prob::GroupDistribution;
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::delta::DeltaFunctionSolver;
use crate::discrete::{DiscreteProblem, DiscreteSolver};
use crate::variational::VariationalSolver;

/// Formulation tag, as used in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitMethod {
    /// Support-point weights, augmented-Lagrangian MLE.
    #[default]
    Discrete,
    /// Closed-form delta-function jumps, Newton shooting.
    DeltaFunctions,
    /// Kernel-smoothed Euler–Lagrange shooting.
    Variational,
}

/// One concrete solver.
#[derive(Debug, Clone)]
pub enum SolverKind {
    /// See [`DiscreteSolver`].
    Discrete(DiscreteSolver),
    /// See [`DeltaFunctionSolver`].
    DeltaFunctions(DeltaFunctionSolver),
    /// See [`VariationalSolver`].
    Variational(VariationalSolver),
}

impl SolverKind {
    /// Build the solver selected by `method` for the two groups.
    pub fn build(
        method: FitMethod,
        nonresponder: &GroupDistribution,
        responder: &GroupDistribution,
        config: &AnalysisConfig,
    ) -> Result<Self> {
        let problem = || DiscreteProblem::new(nonresponder.clone(), responder.clone());
        Ok(match method {
            FitMethod::Discrete => {
                Self::Discrete(DiscreteSolver::with_config(problem(), config.discrete.clone()))
            }
            FitMethod::DeltaFunctions => {
                Self::DeltaFunctions(DeltaFunctionSolver::with_config(problem(), config.delta.clone()))
            }
            FitMethod::Variational => Self::Variational(VariationalSolver::new(
                nonresponder,
                responder,
                config.variational.clone(),
            )?),
        })
    }

    /// Tag of the wrapped solver.
    pub fn method(&self) -> FitMethod {
        match self {
            Self::Discrete(_) => FitMethod::Discrete,
            Self::DeltaFunctions(_) => FitMethod::DeltaFunctions,
            Self::Variational(_) => FitMethod::Variational,
        }
    }

    fn inner(&self) -> &dyn AucSolver {
        match self {
            Self::Discrete(s) => s,
            Self::DeltaFunctions(s) => s,
            Self::Variational(s) => s,
        }
    }
}

impl AucSolver for SolverKind {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn nominal_auc(&self) -> f64 {
        self.inner().nominal_auc()
    }

    fn feasible_range(&self) -> (f64, f64) {
        self.inner().feasible_range()
    }

    fn solve(&self, target_auc: Option<f64>, warm: Option<&WarmStart>) -> Result<FitResult> {
        self.inner().solve(target_auc, warm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_names() {
        let nr = GroupDistribution::from_values(&[-5.0, 5.0, 15.0]).unwrap();
        let r = GroupDistribution::from_values(&[-10.0, 0.0, 10.0]).unwrap();
        let cfg = AnalysisConfig::default();
        for (method, name) in [
            (FitMethod::Discrete, "discrete"),
            (FitMethod::DeltaFunctions, "delta-functions"),
            (FitMethod::Variational, "variational"),
        ] {
            let s = SolverKind::build(method, &nr, &r, &cfg).unwrap();
            assert_eq!(s.name(), name);
            assert_eq!(s.method(), method);
        }
    }

    #[test]
    fn test_method_serde_names() {
        let m: FitMethod = serde_json::from_str("\"delta-functions\"").unwrap();
        assert_eq!(m, FitMethod::DeltaFunctions);
    }
}
