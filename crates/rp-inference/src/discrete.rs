//! Discrete constrained maximum likelihood.
//!
//! The two groups keep their observed support; the fit re-weights the support
//! points. With multiplicities `X_n`, `Y_r` and weights `x_n`, `y_r` the
//! negative log-likelihood is `−Σ X_n ln x_n − Σ Y_r ln y_r` and the AUC is the
//! bilinear rank sum `Σ_n Σ_r x_n y_r K(t_n, t_r)` with `K = 1, ½, 0` for
//! `t_n >, =, < t_r`.
//!
//! The simplex constraints are removed by a softmax parameterization; the AUC
//! equality is enforced with the augmented Lagrangian of [`crate::constrained`].
//! At the optimum `x_n = X_n / (N_X + λ(F_n − A))` with `F_n = ∂A/∂x_n`, so
//! `Λ = 2λ` in the continuous convention.

use rp_core::{
    AucSolver, CdfModel, Error, FailureReason, FitResult, FittedCurve, Multipliers, NumericalWarning,
    Result, WarmStart,
};
use rp_prob::math::{softmax, softmax_into, weighted_nll};
use rp_prob::{GroupDistribution, auc_from_weights, mid_cdf_at};
use serde::{Deserialize, Serialize};

use crate::constrained::{AugmentedLagrangian, ConstrainedConfig, EqualityConstrainedProblem};

/// Settings for [`DiscreteSolver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscreteConfig {
    /// Augmented-Lagrangian settings.
    pub constrained: ConstrainedConfig,
    /// Box on the softmax logits.
    pub logit_bound: f64,
    /// A stationarity denominator below `tol · N` is flagged.
    pub instability_tol: f64,
}

impl Default for DiscreteConfig {
    fn default() -> Self {
        Self { constrained: ConstrainedConfig::default(), logit_bound: 50.0, instability_tol: 1e-8 }
    }
}

fn rank_kernel(t_nonresponder: f64, t_responder: f64) -> f64 {
    if t_nonresponder > t_responder {
        1.0
    } else if t_nonresponder == t_responder {
        0.5
    } else {
        0.0
    }
}

/// The two groups on their observed support.
#[derive(Debug, Clone)]
pub struct DiscreteProblem {
    nonresponder: GroupDistribution,
    responder: GroupDistribution,
}

impl DiscreteProblem {
    /// Problem over the supports of `nonresponder` and `responder`.
    pub fn new(nonresponder: GroupDistribution, responder: GroupDistribution) -> Self {
        Self { nonresponder, responder }
    }

    /// Problem from raw measurements.
    pub fn from_values(nonresponder: &[f64], responder: &[f64]) -> Result<Self> {
        Ok(Self::new(
            GroupDistribution::from_values(nonresponder)?,
            GroupDistribution::from_values(responder)?,
        ))
    }

    /// Non-responder group.
    pub fn nonresponder(&self) -> &GroupDistribution {
        &self.nonresponder
    }

    /// Responder group.
    pub fn responder(&self) -> &GroupDistribution {
        &self.responder
    }

    /// AUC of trial weights.
    pub fn auc(&self, x: &[f64], y: &[f64]) -> f64 {
        auc_from_weights(self.nonresponder.support(), x, self.responder.support(), y)
    }

    /// NLL of trial weights.
    pub fn nll(&self, x: &[f64], y: &[f64]) -> f64 {
        weighted_nll(self.nonresponder.multiplicities(), x)
            + weighted_nll(self.responder.multiplicities(), y)
    }

    /// AUC of the empirical frequencies.
    pub fn nominal_auc(&self) -> f64 {
        self.auc(&self.nonresponder.empirical_weights(), &self.responder.empirical_weights())
    }

    /// Closed interval spanned by the rank kernel; interior points are reachable.
    pub fn auc_range(&self) -> (f64, f64) {
        let nr = self.nonresponder.support();
        let r = self.responder.support();
        let (Some(&nr_lo), Some(&nr_hi), Some(&r_lo), Some(&r_hi)) =
            (nr.first(), nr.last(), r.first(), r.last())
        else {
            return (0.0, 1.0);
        };
        (rank_kernel(nr_lo, r_hi), rank_kernel(nr_hi, r_lo))
    }

    /// Whether a fit at `target` exists with strictly positive weights.
    pub fn is_feasible(&self, target: f64) -> bool {
        if !(0.0..=1.0).contains(&target) {
            return false;
        }
        if (target - self.nominal_auc()).abs() <= 1e-12 {
            return true;
        }
        let (lo, hi) = self.auc_range();
        lo < target && target < hi
    }

    /// Closed-form unconstrained optimum `x = X/ΣX`, `y = Y/ΣY`.
    pub fn unconstrained(&self) -> FitResult {
        let x = self.nonresponder.empirical_weights();
        let y = self.responder.empirical_weights();
        let auc = self.auc(&x, &y);
        FitResult {
            target_auc: None,
            auc,
            nll: self.nll(&x, &y),
            converged: true,
            curve: self.curve(x, y),
            multipliers: Some(Multipliers::nominal(
                self.nonresponder.total_count(),
                self.responder.total_count(),
            )),
            n_iter: 0,
            warnings: Vec::new(),
            message: "closed form".to_string(),
        }
    }

    fn curve(&self, x: Vec<f64>, y: Vec<f64>) -> FittedCurve {
        FittedCurve::Weights {
            nonresponder_support: self.nonresponder.support().to_vec(),
            nonresponder: x,
            responder_support: self.responder.support().to_vec(),
            responder: y,
        }
    }

    /// `F_n = ∂A/∂x_n` and `G_r = ∂A/∂y_r`.
    fn rank_gradients(&self, x: &[f64], y: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let nr = self.nonresponder.support();
        let r = self.responder.support();
        let f = mid_cdf_at(r, y, nr);
        let x_total: f64 = x.iter().sum();
        let g = mid_cdf_at(nr, x, r).into_iter().map(|below| x_total - below).collect();
        (f, g)
    }

    /// Smallest stationarity denominator `N + λ(F − A)` over both groups, relative to `N`.
    fn min_relative_denominator(&self, x: &[f64], y: &[f64], lambda: f64, auc: f64) -> f64 {
        let (f, g) = self.rank_gradients(x, y);
        let nx = self.nonresponder.total_count();
        let ny = self.responder.total_count();
        let dx = f.iter().map(|fi| (nx + lambda * (fi - auc)) / nx);
        let dy = g.iter().map(|gi| (ny + lambda * (gi - auc)) / ny);
        dx.chain(dy).fold(f64::INFINITY, f64::min)
    }
}

/// Softmax-logit view of the problem at a fixed target.
struct LogitProblem<'a> {
    problem: &'a DiscreteProblem,
    target: f64,
}

impl LogitProblem<'_> {
    fn split<'p>(&self, params: &'p [f64]) -> (&'p [f64], &'p [f64]) {
        params.split_at(self.problem.nonresponder.len())
    }

    fn weights(&self, params: &[f64]) -> (Vec<f64>, Vec<f64>, f64, f64) {
        let (a, b) = self.split(params);
        let mut x = vec![0.0; a.len()];
        let mut y = vec![0.0; b.len()];
        let lse_a = softmax_into(a, &mut x);
        let lse_b = softmax_into(b, &mut y);
        (x, y, lse_a, lse_b)
    }
}

impl EqualityConstrainedProblem for LogitProblem<'_> {
    fn objective(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        let (a, b) = self.split(params);
        let (x, y, lse_a, lse_b) = self.weights(params);
        let mx = self.problem.nonresponder.multiplicities();
        let my = self.problem.responder.multiplicities();
        let nx: f64 = mx.iter().sum();
        let ny: f64 = my.iter().sum();

        let nll = -mx.iter().zip(a).map(|(m, ai)| m * (ai - lse_a)).sum::<f64>()
            - my.iter().zip(b).map(|(m, bi)| m * (bi - lse_b)).sum::<f64>();
        let grad = mx
            .iter()
            .zip(&x)
            .map(|(m, xi)| nx * xi - m)
            .chain(my.iter().zip(&y).map(|(m, yi)| ny * yi - m))
            .collect();
        Ok((nll, grad))
    }

    fn constraint(&self, params: &[f64]) -> Result<(f64, Vec<f64>)> {
        let (x, y, _, _) = self.weights(params);
        let (f, g) = self.problem.rank_gradients(&x, &y);
        let auc: f64 = x.iter().zip(&f).map(|(a, b)| a * b).sum();
        let grad = x
            .iter()
            .zip(&f)
            .map(|(xi, fi)| xi * (fi - auc))
            .chain(y.iter().zip(&g).map(|(yi, gi)| yi * (gi - auc)))
            .collect();
        Ok((auc - self.target, grad))
    }
}

/// Attach the requested AUC to an inner optimizer failure.
fn at_target(e: Error, target: f64) -> Error {
    match e {
        Error::OptimizationFailure { reason, .. } => Error::optimization(Some(target), reason),
        other => other,
    }
}

/// Constrained MLE over support-point weights.
#[derive(Debug, Clone)]
pub struct DiscreteSolver {
    problem: DiscreteProblem,
    config: DiscreteConfig,
}

impl DiscreteSolver {
    /// Solver with default settings.
    pub fn new(problem: DiscreteProblem) -> Self {
        Self::with_config(problem, DiscreteConfig::default())
    }

    /// Solver with explicit settings.
    pub fn with_config(problem: DiscreteProblem, config: DiscreteConfig) -> Self {
        Self { problem, config }
    }

    /// Underlying problem.
    pub fn problem(&self) -> &DiscreteProblem {
        &self.problem
    }

    fn initial_logits(&self, warm: Option<&WarmStart>) -> Vec<f64> {
        let bound = self.config.logit_bound;
        let to_logits = |w: &[f64]| -> Vec<f64> {
            w.iter().map(|v| v.max(f64::MIN_POSITIVE).ln().clamp(-bound, bound)).collect()
        };
        let n = self.problem.nonresponder.len();
        let m = self.problem.responder.len();
        if let Some(FittedCurve::Weights { nonresponder, responder, .. }) =
            warm.and_then(|w| w.curve.as_ref())
        {
            if nonresponder.len() == n && responder.len() == m {
                let mut p = to_logits(nonresponder);
                p.extend(to_logits(responder));
                return p;
            }
        }
        let mut p = to_logits(&self.problem.nonresponder.empirical_weights());
        p.extend(to_logits(&self.problem.responder.empirical_weights()));
        p
    }

    /// Run the constrained minimization at `target`, without the closed-form
    /// shortcut at the nominal AUC.
    pub fn minimize_at(&self, target: f64, warm: Option<&WarmStart>) -> Result<FitResult> {
        let init = self.initial_logits(warm);
        let lambda0 = warm.and_then(|w| w.multipliers).map_or(0.0, |m| 0.5 * m.lambda);
        let bounds = vec![(-self.config.logit_bound, self.config.logit_bound); init.len()];
        let nx = self.problem.nonresponder.total_count();
        let ny = self.problem.responder.total_count();

        let logit = LogitProblem { problem: &self.problem, target };
        let al = AugmentedLagrangian::new(self.config.constrained.clone());
        let res = al.minimize(&logit, &init, &bounds, lambda0, nx + ny).map_err(|e| at_target(e, target))?;

        if !res.converged {
            let reason = if res.n_outer >= self.config.constrained.max_outer_iter {
                FailureReason::IterationCap(res.n_outer)
            } else {
                FailureReason::NonConvergence(format!(
                    "{} (|c|={:.3e})",
                    res.message,
                    res.constraint.abs()
                ))
            };
            return Err(Error::optimization(Some(target), reason));
        }

        let (a, b) = res.parameters.split_at(self.problem.nonresponder.len());
        let x = softmax(a);
        let y = softmax(b);
        let auc = self.problem.auc(&x, &y);
        let nll = self.problem.nll(&x, &y);

        let mut warnings = Vec::new();
        let min_den = self.problem.min_relative_denominator(&x, &y, res.lambda, auc);
        if min_den < self.config.instability_tol {
            warnings.push(NumericalWarning::SmallDenominator { value: min_den });
        }

        Ok(FitResult {
            target_auc: Some(target),
            auc,
            nll,
            converged: true,
            curve: self.problem.curve(x, y),
            multipliers: Some(Multipliers::from_lambda(2.0 * res.lambda, auc, nx, ny)),
            n_iter: res.n_outer,
            warnings,
            message: format!("{} ({} inner iterations)", res.message, res.n_inner),
        })
    }
}

impl AucSolver for DiscreteSolver {
    fn name(&self) -> &str {
        "discrete"
    }

    fn nominal_auc(&self) -> f64 {
        self.problem.nominal_auc()
    }

    fn feasible_range(&self) -> (f64, f64) {
        self.problem.auc_range()
    }

    fn solve(&self, target_auc: Option<f64>, warm: Option<&WarmStart>) -> Result<FitResult> {
        let Some(target) = target_auc else {
            return Ok(self.problem.unconstrained());
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
        if (target - self.problem.nominal_auc()).abs() <= 1e-12 {
            let mut fit = self.problem.unconstrained();
            fit.target_auc = Some(target);
            return Ok(fit);
        }
        self.minimize_at(target, warm)
    }
}
