//! Continuous variational solver.
//!
//! The data CDFs `X(t)`, `Y(t)` are kernel-smoothed so that `Ẋ`, `Ẏ` exist.
//! The most likely curve at fixed AUC satisfies the Euler–Lagrange system
//!
//! ```text
//! ẋ = 2Ẋ / (Λy + c1),   ẏ = 2Ẏ / (c2 − Λx)
//! ```
//!
//! integrated on the smoothing window together with two quadratures,
//! `ż = y ẋ` (the AUC) and `ẇ = −Ẋ ln ẋ − Ẏ ln ẏ` (the NLL). The three
//! boundary residuals `x(hi) − 1`, `y(hi) − 1`, `z(hi) − A` are closed by
//! Newton on `(Λ, c1, c2)` with continuation from the free fit.

use rp_core::{
    AucSolver, CdfModel, Error, FailureReason, FitResult, FittedCurve, Multipliers, NumericalWarning,
    Result, WarmStart,
};
use rp_prob::math::xlogy;
use rp_prob::{GroupDistribution, SmoothedDistribution, empirical_auc, narrow_bandwidth, silverman_bandwidth};
use serde::{Deserialize, Serialize};

use crate::continuation::{ContinuationConfig, ShootingModel, continue_to};
use crate::newton::NewtonConfig;
use crate::ode::{OdeOptions, OdeSystem, rk45};

/// Kernel bandwidth rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bandwidth {
    /// A fraction of the smallest support gap, halved until the free AUC
    /// matches the empirical AUC.
    #[default]
    Narrow,
    /// Silverman's rule on the pooled data. Smooths across neighbouring
    /// values, so the free AUC differs from the empirical one.
    Silverman,
    /// Fixed width.
    Fixed(f64),
}

/// Settings for [`VariationalSolver`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VariationalConfig {
    /// Kernel bandwidth rule.
    pub bandwidth: Bandwidth,
    /// Accepted gap between the free and the empirical AUC under [`Bandwidth::Narrow`].
    pub auc_match_tol: f64,
    /// Bandwidth halvings allowed while matching the empirical AUC.
    pub max_bandwidth_halvings: u32,
    /// Integrator settings; `h_max` is additionally capped at half a bandwidth.
    pub ode: OdeOptions,
    /// Continuation and Newton settings.
    pub continuation: ContinuationConfig,
    /// A converged `|Λ|` below this, away from the free AUC, is the spurious root.
    pub degenerate_lambda_tol: f64,
    /// AUC distance from the free fit beyond which `Λ ≈ 0` is rejected.
    pub auc_tol: f64,
    /// Accepted residual of the implied multiplier relation, relative to `N_X + N_Y`.
    pub relation_tol: f64,
    /// A denominator below `tol · N` is flagged.
    pub instability_tol: f64,
}

impl Default for VariationalConfig {
    fn default() -> Self {
        Self {
            bandwidth: Bandwidth::Narrow,
            auc_match_tol: 1e-6,
            max_bandwidth_halvings: 6,
            ode: OdeOptions { rtol: 1e-10, atol: 1e-12, ..OdeOptions::default() },
            continuation: ContinuationConfig {
                newton: NewtonConfig { tol: 1e-7, fd_step: 1e-6, ..NewtonConfig::default() },
                ..ContinuationConfig::default()
            },
            degenerate_lambda_tol: 1e-6,
            auc_tol: 1e-4,
            relation_tol: 1e-4,
            instability_tol: 1e-8,
        }
    }
}

struct EulerLagrange<'a> {
    solver: &'a VariationalSolver,
    m: Multipliers,
}

impl OdeSystem for EulerLagrange<'_> {
    fn ndim(&self) -> usize {
        4
    }

    fn rhs(&self, t: f64, s: &[f64], ds: &mut [f64]) -> Result<()> {
        let (x, y) = (s[0], s[1]);
        let p = self.m.lambda * y + self.m.c1;
        let q = self.m.c2 - self.m.lambda * x;
        if p <= 0.0 || q <= 0.0 || !p.is_finite() || !q.is_finite() {
            return Err(Error::optimization(
                None,
                FailureReason::Infeasible(format!("denominator left the domain at t={t:.6} (P={p:.3e}, Q={q:.3e})")),
            ));
        }
        let xd = self.solver.nonresponder.count_density(t);
        let yd = self.solver.responder.count_density(t);
        let dx = 2.0 * xd / p;
        let dy = 2.0 * yd / q;
        ds[0] = dx;
        ds[1] = dy;
        ds[2] = y * dx;
        ds[3] = -(xlogy(xd, dx) + xlogy(yd, dy));
        Ok(())
    }
}

/// Euler–Lagrange shooting solver on kernel-smoothed data.
#[derive(Debug, Clone)]
pub struct VariationalSolver {
    nonresponder: SmoothedDistribution,
    responder: SmoothedDistribution,
    window: (f64, f64),
    nominal_auc: f64,
    config: VariationalConfig,
}

impl VariationalSolver {
    /// Smooth both groups and integrate the free fit once.
    ///
    /// Under [`Bandwidth::Narrow`] the width is halved until the free AUC is
    /// within `auc_match_tol` of the empirical AUC.
    pub fn new(
        nonresponder: &GroupDistribution,
        responder: &GroupDistribution,
        config: VariationalConfig,
    ) -> Result<Self> {
        let mut h = match config.bandwidth {
            Bandwidth::Narrow => narrow_bandwidth(&[nonresponder, responder]),
            Bandwidth::Silverman => silverman_bandwidth(&[nonresponder, responder]),
            Bandwidth::Fixed(h) => h,
        };
        if config.bandwidth != Bandwidth::Narrow {
            return Self::with_bandwidth(nonresponder, responder, h, config);
        }
        let target = empirical_auc(nonresponder, responder);
        let mut halvings = 0;
        loop {
            let solver = Self::with_bandwidth(nonresponder, responder, h, config.clone())?;
            let gap = (solver.nominal_auc - target).abs();
            if gap <= config.auc_match_tol {
                return Ok(solver);
            }
            if halvings >= config.max_bandwidth_halvings {
                log::warn!(
                    "variational solver: free AUC {:.8} still {gap:.3e} from empirical {target:.8} at bandwidth {h:.3e}",
                    solver.nominal_auc
                );
                return Ok(solver);
            }
            h *= 0.5;
            halvings += 1;
        }
    }

    fn with_bandwidth(
        nonresponder: &GroupDistribution,
        responder: &GroupDistribution,
        h: f64,
        config: VariationalConfig,
    ) -> Result<Self> {
        let nonresponder = SmoothedDistribution::from_group(nonresponder, h)?;
        let responder = SmoothedDistribution::from_group(responder, h)?;
        let (a_lo, a_hi) = nonresponder.window();
        let (b_lo, b_hi) = responder.window();
        let mut solver = Self {
            nonresponder,
            responder,
            window: (a_lo.min(b_lo), a_hi.max(b_hi)),
            nominal_auc: f64::NAN,
            config,
        };
        let nominal = solver.nominal_multipliers();
        let end = solver.integrate(&nominal, false)?;
        solver.nominal_auc = end.z;
        log::debug!(
            "variational solver: bandwidth={h:.3e}, window=[{:.4}, {:.4}], free AUC={:.6}",
            solver.window.0,
            solver.window.1,
            end.z
        );
        Ok(solver)
    }

    /// Kernel bandwidth in use.
    pub fn bandwidth(&self) -> f64 {
        self.nonresponder.bandwidth()
    }

    /// Integration window.
    pub fn window(&self) -> (f64, f64) {
        self.window
    }

    fn counts(&self) -> (f64, f64) {
        (self.nonresponder.total_count(), self.responder.total_count())
    }

    fn nominal_multipliers(&self) -> Multipliers {
        let (nx, ny) = self.counts();
        Multipliers::nominal(nx, ny)
    }

    fn ode_options(&self, dense: bool) -> OdeOptions {
        let cap = 0.5 * self.bandwidth();
        let h_max = if self.config.ode.h_max > 0.0 { self.config.ode.h_max.min(cap) } else { cap };
        OdeOptions { h_max, dense_output: dense, ..self.config.ode.clone() }
    }

    fn integrate(&self, m: &Multipliers, dense: bool) -> Result<Trajectory> {
        let (lo, hi) = self.window;
        let y0 = [self.nonresponder.cdf(lo), self.responder.cdf(lo), 0.0, 0.0];
        let sys = EulerLagrange { solver: self, m: *m };
        let sol = rk45(&sys, &y0, lo, hi, &self.ode_options(dense))?;
        let Some(last) = sol.last() else {
            return Err(Error::Validation("empty ODE solution".into()));
        };
        let (x, y, z, w) = (last[0], last[1], last[2], last[3]);
        let min_denominator = sol
            .y
            .iter()
            .map(|s| (m.lambda * s[1] + m.c1).min(m.c2 - m.lambda * s[0]))
            .fold(f64::INFINITY, f64::min);
        let curve = dense.then(|| FittedCurve::Continuous {
            t: sol.t.clone(),
            x: sol.y.iter().map(|s| s[0]).collect(),
            y: sol.y.iter().map(|s| s[1]).collect(),
        });
        Ok(Trajectory { x, y, z, w, min_denominator, curve })
    }

    fn fit_from(&self, target: Option<f64>, m: Multipliers, n_iter: u64, message: String) -> Result<FitResult> {
        let tr = self.integrate(&m, true)?;
        let (nx, ny) = self.counts();
        let mut warnings = Vec::new();
        let drift = (tr.x - 1.0).abs().max((tr.y - 1.0).abs());
        if drift > 1e-5 {
            warnings.push(NumericalWarning::NormalizationDrift { residual: drift });
        }
        let relation = m.relation_residual(tr.z, nx, ny);
        if relation.abs() > self.config.relation_tol * (nx + ny) {
            log::warn!("variational solver: multiplier relation residual {relation:.3e} at AUC={:.6}", tr.z);
            warnings.push(NumericalWarning::MultiplierRelation { residual: relation });
        }
        if tr.min_denominator < self.config.instability_tol * 2.0 * nx.min(ny) {
            warnings.push(NumericalWarning::SmallDenominator { value: tr.min_denominator });
        }
        let Some(curve) = tr.curve else {
            return Err(Error::Validation("dense trajectory missing".into()));
        };
        Ok(FitResult {
            target_auc: target,
            auc: tr.z,
            nll: tr.w,
            converged: true,
            curve,
            multipliers: Some(m),
            n_iter,
            warnings,
            message,
        })
    }

    fn check_degenerate(&self, m: &Multipliers, target: f64) -> Result<()> {
        if m.lambda.abs() < self.config.degenerate_lambda_tol
            && (target - self.nominal_auc).abs() > self.config.auc_tol
        {
            return Err(Error::optimization(
                Some(target),
                FailureReason::DegenerateRoot {
                    lambda: m.lambda,
                    target_auc: target,
                    nominal_auc: self.nominal_auc,
                },
            ));
        }
        Ok(())
    }
}

struct Trajectory {
    x: f64,
    y: f64,
    z: f64,
    w: f64,
    min_denominator: f64,
    curve: Option<FittedCurve>,
}

impl ShootingModel for VariationalSolver {
    fn residuals(&self, m: &Multipliers, target_auc: f64) -> Result<[f64; 3]> {
        let tr = self.integrate(m, false)?;
        Ok([tr.x - 1.0, tr.y - 1.0, tr.z - target_auc])
    }
}

impl AucSolver for VariationalSolver {
    fn name(&self) -> &str {
        "variational"
    }

    fn nominal_auc(&self) -> f64 {
        self.nominal_auc
    }

    fn solve(&self, target_auc: Option<f64>, warm: Option<&WarmStart>) -> Result<FitResult> {
        let nominal = self.nominal_multipliers();
        let Some(target) = target_auc else {
            return self.fit_from(None, nominal, 0, "free fit".to_string());
        };
        if !target.is_finite() {
            return Err(Error::Validation(format!("target AUC must be finite, got {target}")));
        }
        if target <= 0.0 || target >= 1.0 {
            return Err(Error::optimization(
                Some(target),
                FailureReason::Infeasible(format!("AUC {target} outside (0, 1)")),
            ));
        }
        if (target - self.nominal_auc).abs() <= 1e-12 {
            return self.fit_from(Some(target), nominal, 0, "free fit".to_string());
        }

        let (start_auc, start) = match warm {
            Some(WarmStart { auc, multipliers: Some(m), .. }) => (*auc, *m),
            _ => (self.nominal_auc, nominal),
        };
        let outcome = continue_to(self, start_auc, start, target, &self.config.continuation)
            .map_err(|e| match e {
                Error::OptimizationFailure { reason, .. } => Error::optimization(Some(target), reason),
                other => other,
            })?;
        self.check_degenerate(&outcome.multipliers, target)?;
        self.fit_from(
            Some(target),
            outcome.multipliers,
            outcome.n_newton,
            format!("converged in {} continuation steps", outcome.n_steps),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn groups() -> (GroupDistribution, GroupDistribution) {
        let nr = GroupDistribution::from_values(&[
            2.0, 3.0, 3.0, 4.0, 6.0, 8.0, 9.0, 10.0, 10.0, 10.0, 10.0, 11.0, 12.0, 13.0,
        ])
        .unwrap();
        let r = GroupDistribution::from_values(&[1.0, 1.0, 2.0, 3.0, 9.0, 10.0]).unwrap();
        (nr, r)
    }

    #[test]
    fn test_free_fit_reproduces_smoothed_cdfs() {
        let (nr, r) = groups();
        let s = VariationalSolver::new(&nr, &r, VariationalConfig::default()).unwrap();
        let fit = s.solve(None, None).unwrap();
        let FittedCurve::Continuous { t, x, .. } = &fit.curve else {
            panic!("expected a continuous curve");
        };
        assert_relative_eq!(*x.last().unwrap(), 1.0, epsilon = 1e-8);
        let mid = t.len() / 2;
        assert_relative_eq!(x[mid], s.nonresponder.cdf(t[mid]), epsilon = 1e-7);
        assert_relative_eq!(fit.auc, empirical_auc(&nr, &r), epsilon = 1e-6);
        assert_relative_eq!(fit.auc, s.nominal_auc(), epsilon = 1e-12);
    }

    #[test]
    fn test_constrained_fit_hits_target() {
        let (nr, r) = groups();
        let s = VariationalSolver::new(&nr, &r, VariationalConfig::default()).unwrap();
        let free = s.solve(None, None).unwrap();
        let target = s.nominal_auc() - 0.05;
        let fit = s.solve(Some(target), None).unwrap();
        assert_relative_eq!(fit.auc, target, epsilon = 1e-6);
        assert!(fit.nll > free.nll);
        assert!(fit.multipliers.unwrap().lambda.abs() > 1e-3);
    }

    #[test]
    fn test_spurious_root_is_rejected() {
        let (nr, r) = groups();
        let s = VariationalSolver::new(&nr, &r, VariationalConfig::default()).unwrap();
        let m = Multipliers { lambda: 1e-9, c1: 28.0, c2: 12.0 };
        let err = s.check_degenerate(&m, s.nominal_auc() + 0.1).unwrap_err();
        assert!(matches!(
            err,
            Error::OptimizationFailure { reason: FailureReason::DegenerateRoot { .. }, .. }
        ));
        assert!(s.check_degenerate(&m, s.nominal_auc()).is_ok());
    }

    #[test]
    fn test_fixed_bandwidth() {
        let (nr, r) = groups();
        let cfg = VariationalConfig { bandwidth: Bandwidth::Fixed(0.5), ..VariationalConfig::default() };
        let s = VariationalSolver::new(&nr, &r, cfg).unwrap();
        assert_eq!(s.bandwidth(), 0.5);
        assert_eq!(s.window(), (1.0 - 4.0, 13.0 + 4.0));
    }

    #[test]
    fn test_silverman_bandwidth_blurs_the_auc() {
        let (nr, r) = groups();
        let cfg = VariationalConfig { bandwidth: Bandwidth::Silverman, ..VariationalConfig::default() };
        let wide = VariationalSolver::new(&nr, &r, cfg).unwrap();
        let narrow = VariationalSolver::new(&nr, &r, VariationalConfig::default()).unwrap();
        assert!(wide.bandwidth() > 10.0 * narrow.bandwidth());
        let empirical = empirical_auc(&nr, &r);
        assert!((wide.nominal_auc() - empirical).abs() > 1e-2);
        assert!((narrow.nominal_auc() - empirical).abs() <= 1e-6);
    }

    #[test]
    fn test_bandwidth_rule_serde() {
        let cfg: VariationalConfig = serde_json::from_str(r#"{"bandwidth": {"fixed": 0.25}}"#).unwrap();
        assert_eq!(cfg.bandwidth, Bandwidth::Fixed(0.25));
        let cfg: VariationalConfig = serde_json::from_str(r#"{"bandwidth": "silverman"}"#).unwrap();
        assert_eq!(cfg.bandwidth, Bandwidth::Silverman);
        assert_eq!(VariationalConfig::default().bandwidth, Bandwidth::Narrow);
    }
}
