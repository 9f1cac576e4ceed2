//! Single-equality-constrained minimization (augmented Lagrangian).
//!
//! Minimizes `f(p)` subject to `c(p) = 0` by repeatedly minimizing
//! `L_ρ(p) = f(p) + λ c(p) + ½ ρ c(p)²` with L-BFGS, updating
//! `λ ← λ + ρ c` after each inner solve and growing `ρ` when the constraint
//! violation does not shrink fast enough.

use rp_core::Result;
use serde::{Deserialize, Serialize};

use crate::optimizer::{LbfgsbOptimizer, ObjectiveFunction, OptimizerConfig};

/// Objective and one equality constraint, both with analytic gradients.
pub trait EqualityConstrainedProblem: Send + Sync {
    /// `(f(p), ∇f(p))`.
    fn objective(&self, params: &[f64]) -> Result<(f64, Vec<f64>)>;

    /// `(c(p), ∇c(p))`; feasible points have `c = 0`.
    fn constraint(&self, params: &[f64]) -> Result<(f64, Vec<f64>)>;
}

/// Augmented-Lagrangian settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstrainedConfig {
    /// Maximum multiplier updates.
    pub max_outer_iter: u64,
    /// Accepted `|c|`.
    pub constraint_tol: f64,
    /// Accepted norm of `∇f + λ∇c`, relative to `max(1, |f|)`.
    pub stationarity_tol: f64,
    /// Initial penalty; `None` lets the caller pick a problem scale.
    pub rho_init: Option<f64>,
    /// Penalty growth factor.
    pub rho_growth: f64,
    /// Penalty cap.
    pub rho_max: f64,
    /// Inner L-BFGS settings.
    pub inner: OptimizerConfig,
}

impl Default for ConstrainedConfig {
    fn default() -> Self {
        Self {
            max_outer_iter: 60,
            constraint_tol: 1e-9,
            stationarity_tol: 1e-4,
            rho_init: None,
            rho_growth: 10.0,
            rho_max: 1e12,
            inner: OptimizerConfig::default(),
        }
    }
}

/// Outcome of a constrained minimization.
#[derive(Debug, Clone)]
pub struct ConstrainedResult {
    /// Final parameters.
    pub parameters: Vec<f64>,
    /// `f` at `parameters`.
    pub fval: f64,
    /// `c` at `parameters`.
    pub constraint: f64,
    /// Multiplier estimate.
    pub lambda: f64,
    /// Multiplier updates performed.
    pub n_outer: u64,
    /// Total inner iterations.
    pub n_inner: u64,
    /// Constraint and stationarity both within tolerance.
    pub converged: bool,
    /// Status message.
    pub message: String,
}

struct Augmented<'a> {
    problem: &'a dyn EqualityConstrainedProblem,
    lambda: f64,
    rho: f64,
}

impl Augmented<'_> {
    fn value_and_grad(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        let (f, mut g) = self.problem.objective(params)?;
        let (c, gc) = self.problem.constraint(params)?;
        let w = self.lambda + self.rho * c;
        for (gi, gci) in g.iter_mut().zip(&gc) {
            *gi += w * gci;
        }
        Ok((f + self.lambda * c + 0.5 * self.rho * c * c, g))
    }
}

impl ObjectiveFunction for Augmented<'_> {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        Ok(self.value_and_grad(params)?.0)
    }

    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        Ok(self.value_and_grad(params)?.1)
    }
}

/// Norm of the Lagrangian gradient `∇f + λ∇c`.
fn stationarity(
    problem: &dyn EqualityConstrainedProblem,
    params: &[f64],
    lambda: f64,
) -> Result<(f64, f64, f64)> {
    let (f, g) = problem.objective(params)?;
    let (c, gc) = problem.constraint(params)?;
    let kkt = g.iter().zip(&gc).map(|(a, b)| (a + lambda * b).powi(2)).sum::<f64>().sqrt();
    Ok((f, c, kkt))
}

/// Augmented-Lagrangian driver around [`LbfgsbOptimizer`].
pub struct AugmentedLagrangian {
    config: ConstrainedConfig,
}

impl AugmentedLagrangian {
    /// New driver.
    pub fn new(config: ConstrainedConfig) -> Self {
        Self { config }
    }

    /// Minimize from `init` with initial multiplier `lambda0`; `rho_scale` is
    /// used when the configuration leaves the initial penalty open.
    pub fn minimize(
        &self,
        problem: &dyn EqualityConstrainedProblem,
        init: &[f64],
        bounds: &[(f64, f64)],
        lambda0: f64,
        rho_scale: f64,
    ) -> Result<ConstrainedResult> {
        let cfg = &self.config;
        let inner = LbfgsbOptimizer::new(cfg.inner.clone());
        let mut params = init.to_vec();
        let mut lambda = lambda0;
        let mut rho = cfg.rho_init.unwrap_or(rho_scale).max(1e-8);
        let mut prev_violation = f64::INFINITY;
        let mut n_inner = 0;
        let mut message = String::from("outer iteration cap reached");

        let mut n_outer = 0;
        while n_outer < cfg.max_outer_iter {
            n_outer += 1;
            let aug = Augmented { problem, lambda, rho };
            match inner.minimize(&aug, &params, bounds) {
                Ok(res) => {
                    n_inner += res.n_iter;
                    params = res.parameters;
                }
                Err(e) if n_outer > 1 => {
                    // Keep the last iterate; the KKT check below decides.
                    log::debug!("augmented Lagrangian inner solve stopped: {e}");
                    message = format!("inner solve stopped: {e}");
                    break;
                }
                Err(e) => return Err(e),
            }

            let f = problem.objective(&params)?.0;
            let c = problem.constraint(&params)?.0;
            lambda += rho * c;
            let (_, _, kkt) = stationarity(problem, &params, lambda)?;
            log::trace!(
                "AL outer {n_outer}: f={f:.10} c={c:.3e} lambda={lambda:.6} rho={rho:.3e} kkt={kkt:.3e}"
            );

            if c.abs() <= cfg.constraint_tol && kkt <= cfg.stationarity_tol * f.abs().max(1.0) {
                message = "converged".to_string();
                break;
            }
            if c.abs() > 0.25 * prev_violation {
                rho = (rho * cfg.rho_growth).min(cfg.rho_max);
            }
            prev_violation = c.abs();
        }

        let (fval, constraint, kkt) = stationarity(problem, &params, lambda)?;
        let converged =
            constraint.abs() <= cfg.constraint_tol && kkt <= cfg.stationarity_tol * fval.abs().max(1.0);
        if converged {
            message = "converged".to_string();
        }
        Ok(ConstrainedResult {
            parameters: params,
            fval,
            constraint,
            lambda,
            n_outer,
            n_inner,
            converged,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rp_core::{Error, FailureReason};

    // min x² + y² subject to x + y = 1  →  x = y = ½, λ = −1
    struct Disk;

    impl EqualityConstrainedProblem for Disk {
        fn objective(&self, p: &[f64]) -> Result<(f64, Vec<f64>)> {
            Ok((p[0] * p[0] + p[1] * p[1], vec![2.0 * p[0], 2.0 * p[1]]))
        }

        fn constraint(&self, p: &[f64]) -> Result<(f64, Vec<f64>)> {
            Ok((p[0] + p[1] - 1.0, vec![1.0, 1.0]))
        }
    }

    #[test]
    fn test_linear_constraint() {
        let al = AugmentedLagrangian::new(ConstrainedConfig::default());
        let res = al.minimize(&Disk, &[3.0, -2.0], &[(-10.0, 10.0); 2], 0.0, 1.0).unwrap();
        assert!(res.converged, "{}", res.message);
        assert_relative_eq!(res.parameters[0], 0.5, epsilon = 1e-4);
        assert_relative_eq!(res.parameters[1], 0.5, epsilon = 1e-4);
        assert_relative_eq!(res.lambda, -1.0, epsilon = 1e-4);
    }

    // min (x-2)² + (y-1)² on the circle x² + y² = 1
    struct Circle;

    impl EqualityConstrainedProblem for Circle {
        fn objective(&self, p: &[f64]) -> Result<(f64, Vec<f64>)> {
            let (x, y) = (p[0], p[1]);
            Ok(((x - 2.0).powi(2) + (y - 1.0).powi(2), vec![2.0 * (x - 2.0), 2.0 * (y - 1.0)]))
        }

        fn constraint(&self, p: &[f64]) -> Result<(f64, Vec<f64>)> {
            Ok((p[0] * p[0] + p[1] * p[1] - 1.0, vec![2.0 * p[0], 2.0 * p[1]]))
        }
    }

    #[test]
    fn test_nonlinear_constraint() {
        let al = AugmentedLagrangian::new(ConstrainedConfig::default());
        let res = al.minimize(&Circle, &[0.5, 0.5], &[(-5.0, 5.0); 2], 0.0, 1.0).unwrap();
        let norm = 5.0_f64.sqrt();
        assert!(res.converged, "{}", res.message);
        assert_relative_eq!(res.parameters[0], 2.0 / norm, epsilon = 1e-4);
        assert_relative_eq!(res.parameters[1], 1.0 / norm, epsilon = 1e-4);
    }

    // Disk whose objective is undefined for x > 2.
    struct Cliff;

    impl EqualityConstrainedProblem for Cliff {
        fn objective(&self, p: &[f64]) -> Result<(f64, Vec<f64>)> {
            if p[0] > 2.0 {
                return Err(Error::InvalidDistribution("past the cliff".into()));
            }
            Disk.objective(p)
        }

        fn constraint(&self, p: &[f64]) -> Result<(f64, Vec<f64>)> {
            Disk.constraint(p)
        }
    }

    #[test]
    fn test_first_inner_failure_is_recoverable() {
        let al = AugmentedLagrangian::new(ConstrainedConfig::default());
        let err = al.minimize(&Cliff, &[-3.0, -3.0], &[(-10.0, 10.0); 2], 0.0, 100.0).unwrap_err();
        assert!(err.is_recoverable(), "{err}");
        assert!(matches!(err, Error::OptimizationFailure { reason: FailureReason::NonConvergence(_), .. }));
    }
}
