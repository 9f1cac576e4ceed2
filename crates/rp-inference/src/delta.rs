//! Closed-form delta-function solution of the stationarity equations.
//!
//! With point-mass data the Euler–Lagrange equations `ẋ(Λy + c1) = 2Ẋ`,
//! `ẏ(c2 − Λx) = 2Ẏ` can be integrated exactly: at each distinct threshold
//! with counts `(X, Y)` the CDFs jump by `(dx, dy)` solving
//!
//! ```text
//! dx (P + a·dy) = 2X,   dy (Q − a·dx) = 2Y,   P = c1 + Λy, Q = c2 − Λx, a = Λ/2
//! ```
//!
//! where `x`, `y` are the values before the jump (ties are split in half,
//! matching the rank-sum AUC). The smaller root of the resulting quadratic is
//! the branch that reduces to `dx = 2X/P` as `Λ → 0`. Shooting across all
//! thresholds leaves three residuals in `(Λ, c1, c2)`, closed with Newton and
//! continuation in the target AUC.

use rp_core::{
    AucSolver, CdfModel, Error, FailureReason, FitResult, FittedCurve, Multipliers, NumericalWarning,
    Result, WarmStart,
};
use rp_prob::math::weighted_nll;
use serde::{Deserialize, Serialize};

use crate::continuation::{ContinuationConfig, ShootingModel, continue_to};
use crate::discrete::DiscreteProblem;

/// Settings for [`DeltaFunctionSolver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeltaConfig {
    /// Continuation and Newton settings.
    pub continuation: ContinuationConfig,
    /// A jump denominator `P` or `Q` below `tol · N` is flagged.
    pub instability_tol: f64,
    /// Accepted residual of the implied multiplier relation, relative to `N_X + N_Y`.
    pub relation_tol: f64,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self { continuation: ContinuationConfig::default(), instability_tol: 1e-8, relation_tol: 1e-6 }
    }
}

#[derive(Debug, Clone, Copy)]
struct Threshold {
    nonresponder: f64,
    responder: f64,
}

/// Result of one shot across the thresholds.
#[derive(Debug, Clone)]
pub struct DeltaSweep {
    /// Jump of the non-responder CDF at each non-responder support point.
    pub nonresponder_jumps: Vec<f64>,
    /// Jump of the responder CDF at each responder support point.
    pub responder_jumps: Vec<f64>,
    /// Non-responder CDF after the last threshold.
    pub x_end: f64,
    /// Responder CDF after the last threshold.
    pub y_end: f64,
    /// `∫ y dx` accumulated along the sweep.
    pub auc: f64,
    /// Smallest of the `P`, `Q` denominators encountered.
    pub min_denominator: f64,
}

fn jump(p: f64, q: f64, a: f64, nx: f64, ny: f64) -> Option<(f64, f64)> {
    if nx == 0.0 {
        return (q > 0.0).then(|| (0.0, 2.0 * ny / q));
    }
    if ny == 0.0 {
        return (p > 0.0).then(|| (2.0 * nx / p, 0.0));
    }
    if p <= 0.0 || q <= 0.0 {
        return None;
    }
    let b = p * q + 2.0 * a * (nx + ny);
    let disc = b * b - 8.0 * a * p * nx * q;
    if disc < 0.0 {
        return None;
    }
    let denom = b + disc.sqrt();
    if denom <= 0.0 {
        return None;
    }
    let dx = 4.0 * nx * q / denom;
    let dy = (2.0 * (nx + ny) - p * dx) / q;
    (dx > 0.0 && dy > 0.0).then_some((dx, dy))
}

/// Delta-function shooting solver.
#[derive(Debug, Clone)]
pub struct DeltaFunctionSolver {
    problem: DiscreteProblem,
    thresholds: Vec<Threshold>,
    config: DeltaConfig,
}

impl DeltaFunctionSolver {
    /// Solver with default settings.
    pub fn new(problem: DiscreteProblem) -> Self {
        Self::with_config(problem, DeltaConfig::default())
    }

    /// Solver with explicit settings.
    pub fn with_config(problem: DiscreteProblem, config: DeltaConfig) -> Self {
        let nr = problem.nonresponder();
        let r = problem.responder();
        let (ns, nm) = (nr.support(), nr.multiplicities());
        let (rs, rm) = (r.support(), r.multiplicities());
        let mut thresholds = Vec::with_capacity(ns.len() + rs.len());
        let (mut i, mut j) = (0, 0);
        while i < ns.len() || j < rs.len() {
            let take_n = j >= rs.len() || (i < ns.len() && ns[i] <= rs[j]);
            let take_r = i >= ns.len() || (j < rs.len() && rs[j] <= ns[i]);
            let mut th = Threshold { nonresponder: 0.0, responder: 0.0 };
            if take_n {
                th.nonresponder = nm[i];
                i += 1;
            }
            if take_r {
                th.responder = rm[j];
                j += 1;
            }
            thresholds.push(th);
        }
        Self { problem, thresholds, config }
    }

    /// Underlying problem.
    pub fn problem(&self) -> &DiscreteProblem {
        &self.problem
    }

    fn counts(&self) -> (f64, f64) {
        (self.problem.nonresponder().total_count(), self.problem.responder().total_count())
    }

    /// Shoot across all thresholds with the given multipliers.
    ///
    /// Fails when a denominator turns non-positive or a jump has no valid root.
    pub fn sweep(&self, m: &Multipliers) -> Result<DeltaSweep> {
        let a = 0.5 * m.lambda;
        let mut x = 0.0;
        let mut y = 0.0;
        let mut auc = 0.0;
        let mut min_denominator = f64::INFINITY;
        let mut nonresponder_jumps = Vec::with_capacity(self.problem.nonresponder().len());
        let mut responder_jumps = Vec::with_capacity(self.problem.responder().len());

        for th in &self.thresholds {
            let p = m.c1 + m.lambda * y;
            let q = m.c2 - m.lambda * x;
            if th.nonresponder > 0.0 {
                min_denominator = min_denominator.min(p);
            }
            if th.responder > 0.0 {
                min_denominator = min_denominator.min(q);
            }
            let Some((dx, dy)) = jump(p, q, a, th.nonresponder, th.responder) else {
                return Err(Error::optimization(
                    None,
                    FailureReason::Infeasible(format!(
                        "no valid jump at lambda={:.6e} (P={p:.3e}, Q={q:.3e})",
                        m.lambda
                    )),
                ));
            };
            auc += dx * (y + 0.5 * dy);
            x += dx;
            y += dy;
            if th.nonresponder > 0.0 {
                nonresponder_jumps.push(dx);
            }
            if th.responder > 0.0 {
                responder_jumps.push(dy);
            }
        }

        Ok(DeltaSweep { nonresponder_jumps, responder_jumps, x_end: x, y_end: y, auc, min_denominator })
    }

    fn fit_from(&self, target: Option<f64>, m: Multipliers, n_iter: u64, message: String) -> Result<FitResult> {
        let sweep = self.sweep(&m)?;
        let x: Vec<f64> = sweep.nonresponder_jumps.iter().map(|d| d / sweep.x_end).collect();
        let y: Vec<f64> = sweep.responder_jumps.iter().map(|d| d / sweep.y_end).collect();
        let auc = self.problem.auc(&x, &y);
        let nll = weighted_nll(self.problem.nonresponder().multiplicities(), &x)
            + weighted_nll(self.problem.responder().multiplicities(), &y);

        let (nx, ny) = self.counts();
        let mut warnings = Vec::new();
        let drift = (sweep.x_end - 1.0).abs().max((sweep.y_end - 1.0).abs());
        if drift > 1e-6 {
            warnings.push(NumericalWarning::NormalizationDrift { residual: drift });
        }
        let relation = m.relation_residual(auc, nx, ny);
        if relation.abs() > self.config.relation_tol * (nx + ny) {
            log::warn!("delta solver: multiplier relation residual {relation:.3e} at AUC={auc:.6}");
            warnings.push(NumericalWarning::MultiplierRelation { residual: relation });
        }
        let rel_den = sweep.min_denominator / (2.0 * nx.min(ny));
        if rel_den < self.config.instability_tol {
            warnings.push(NumericalWarning::SmallDenominator { value: sweep.min_denominator });
        }

        Ok(FitResult {
            target_auc: target,
            auc,
            nll,
            converged: true,
            curve: FittedCurve::Weights {
                nonresponder_support: self.problem.nonresponder().support().to_vec(),
                nonresponder: x,
                responder_support: self.problem.responder().support().to_vec(),
                responder: y,
            },
            multipliers: Some(m),
            n_iter,
            warnings,
            message,
        })
    }
}

impl ShootingModel for DeltaFunctionSolver {
    fn residuals(&self, m: &Multipliers, target_auc: f64) -> Result<[f64; 3]> {
        let s = self.sweep(m)?;
        Ok([s.x_end - 1.0, s.y_end - 1.0, s.auc - target_auc])
    }
}

impl AucSolver for DeltaFunctionSolver {
    fn name(&self) -> &str {
        "delta-functions"
    }

    fn nominal_auc(&self) -> f64 {
        self.problem.nominal_auc()
    }

    fn feasible_range(&self) -> (f64, f64) {
        self.problem.auc_range()
    }

    fn solve(&self, target_auc: Option<f64>, warm: Option<&WarmStart>) -> Result<FitResult> {
        let (nx, ny) = self.counts();
        let nominal = Multipliers::nominal(nx, ny);
        let Some(target) = target_auc else {
            return self.fit_from(None, nominal, 0, "closed form".to_string());
        };
        if !target.is_finite() {
            return Err(Error::Validation(format!("target AUC must be finite, got {target}")));
        }
        if !self.problem.is_feasible(target) {
            let (lo, hi) = self.problem.auc_range();
            return Err(Error::optimization(
                Some(target),
                FailureReason::Infeasible(format!(
                    "AUC {target} outside the reachable range ({lo}, {hi})"
                )),
            ));
        }
        let nominal_auc = self.problem.nominal_auc();
        if (target - nominal_auc).abs() <= 1e-12 {
            return self.fit_from(Some(target), nominal, 0, "closed form".to_string());
        }

        let (start_auc, start) = match warm {
            Some(WarmStart { auc, multipliers: Some(m), .. }) => (*auc, *m),
            _ => (nominal_auc, nominal),
        };
        let outcome = continue_to(self, start_auc, start, target, &self.config.continuation)
            .map_err(|e| match e {
                Error::OptimizationFailure { reason, .. } => Error::optimization(Some(target), reason),
                other => other,
            })?;
        self.fit_from(
            Some(target),
            outcome.multipliers,
            outcome.n_newton,
            format!("converged in {} continuation steps", outcome.n_steps),
        )
    }
}
