//! Box-constrained quasi-Newton minimization.
//!
//! The solvers hand small smooth objectives (softmax logits, augmented
//! Lagrangians) to argmin's L-BFGS with a More–Thuente line search. Iterates
//! are projected into the box before every evaluation, and gradient
//! components pointing out of an active face are dropped.

use std::collections::HashMap;

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use rp_core::{Error, FailureReason, Result};
use serde::{Deserialize, Serialize};

/// L-BFGS settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Iteration cap.
    pub max_iter: u64,
    /// Projected-gradient norm at which a fit counts as converged.
    pub grad_tol: f64,
    /// Stored correction pairs.
    pub history: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { max_iter: 2000, grad_tol: 1e-9, history: 10 }
    }
}

/// Outcome of [`LbfgsbOptimizer::minimize`].
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// Best iterate, inside the box.
    pub parameters: Vec<f64>,
    /// Objective at `parameters`.
    pub fval: f64,
    /// L-BFGS iterations.
    pub n_iter: u64,
    /// Objective and gradient evaluations as counted by argmin.
    pub n_evals: u64,
    /// Gradient tolerance met (or cost stalled below its tolerance).
    pub converged: bool,
    /// Termination status text.
    pub message: String,
}

/// Smooth scalar objective.
pub trait ObjectiveFunction: Send + Sync {
    /// Value at `params`.
    fn eval(&self, params: &[f64]) -> Result<f64>;

    /// Gradient at `params`. Central differences by default.
    fn gradient(&self, params: &[f64]) -> Result<Vec<f64>> {
        let mut shifted = params.to_vec();
        let mut grad = Vec::with_capacity(params.len());
        for (i, &p) in params.iter().enumerate() {
            let h = 1e-7 * p.abs().max(1.0);
            shifted[i] = p + h;
            let up = self.eval(&shifted)?;
            shifted[i] = p - h;
            let down = self.eval(&shifted)?;
            shifted[i] = p;
            grad.push(0.5 * (up - down) / h);
        }
        Ok(grad)
    }
}

fn into_box(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params.iter().zip(bounds).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

/// Drop gradient components that would leave an active face.
fn project(params: &[f64], grad: &mut [f64], bounds: &[(f64, f64)]) {
    const FACE: f64 = 1e-12;
    for ((g, &x), &(lo, hi)) in grad.iter_mut().zip(params).zip(bounds) {
        let at_lo = x <= lo + FACE && *g > 0.0;
        let at_hi = x >= hi - FACE && *g < 0.0;
        if at_lo || at_hi {
            *g = 0.0;
        }
    }
}

fn to_argmin(e: Error) -> argmin::core::Error {
    argmin::core::Error::msg(e.to_string())
}

/// Objective seen through the box projection.
struct BoxedObjective<'a> {
    inner: &'a dyn ObjectiveFunction,
    bounds: &'a [(f64, f64)],
}

impl CostFunction for BoxedObjective<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, p: &Vec<f64>) -> std::result::Result<f64, argmin::core::Error> {
        self.inner.eval(&into_box(p, self.bounds)).map_err(to_argmin)
    }
}

impl Gradient for BoxedObjective<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, p: &Vec<f64>) -> std::result::Result<Vec<f64>, argmin::core::Error> {
        let x = into_box(p, self.bounds);
        let mut g = self.inner.gradient(&x).map_err(to_argmin)?;
        project(&x, &mut g, self.bounds);
        Ok(g)
    }
}

/// L-BFGS over a box.
#[derive(Debug, Clone, Default)]
pub struct LbfgsbOptimizer {
    config: OptimizerConfig,
}

impl LbfgsbOptimizer {
    /// Minimizer with the given settings.
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    /// Settings.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Minimize `objective` from `init` within `bounds` (one pair per parameter).
    pub fn minimize(
        &self,
        objective: &dyn ObjectiveFunction,
        init: &[f64],
        bounds: &[(f64, f64)],
    ) -> Result<OptimizationResult> {
        if init.len() != bounds.len() {
            return Err(Error::Validation(format!(
                "{} start values for {} bounds",
                init.len(),
                bounds.len()
            )));
        }
        let start = into_box(init, bounds);
        let cfg = &self.config;

        // More–Thuente rejects a zero search direction.
        let mut g = objective.gradient(&start)?;
        project(&start, &mut g, bounds);
        if g.iter().map(|v| v * v).sum::<f64>().sqrt() <= cfg.grad_tol {
            let fval = objective.eval(&start)?;
            return Ok(OptimizationResult {
                parameters: start,
                fval,
                n_iter: 0,
                n_evals: 2,
                converged: true,
                message: "start is stationary".into(),
            });
        }

        let cost_tol = if cfg.grad_tol > 0.0 { (0.1 * cfg.grad_tol).max(1e-14) } else { 0.0 };
        let lbfgs = LBFGS::new(MoreThuenteLineSearch::new(), cfg.history)
            .with_tolerance_grad(cfg.grad_tol)
            .and_then(|s| s.with_tolerance_cost(cost_tol))
            .map_err(|e| Error::Validation(format!("optimizer tolerances: {e}")))?;

        let run = Executor::new(BoxedObjective { inner: objective, bounds }, lbfgs)
            .configure(|state| state.param(start).max_iters(cfg.max_iter))
            .run()
            .map_err(|e| Error::optimization(None, FailureReason::NonConvergence(format!("L-BFGS: {e}"))))?;

        let state = run.state();
        let best = state.get_best_param().ok_or_else(|| {
            Error::optimization(None, FailureReason::NonConvergence("L-BFGS kept no iterate".into()))
        })?;
        let status = state.get_termination_status();
        let counts: &HashMap<String, u64> = state.get_func_counts();
        Ok(OptimizationResult {
            parameters: into_box(best, bounds),
            fval: state.get_best_cost(),
            n_iter: state.get_iter(),
            n_evals: counts.values().sum(),
            converged: matches!(
                status,
                TerminationStatus::Terminated(
                    TerminationReason::SolverConverged | TerminationReason::TargetCostReached
                )
            ),
            message: status.to_string(),
        })
    }
}
