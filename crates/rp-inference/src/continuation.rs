//! Continuation in the target AUC.
//!
//! Both stationarity-based formulations reduce a fixed-AUC fit to three
//! boundary residuals in the three unknowns `(Λ, c1, c2)`. Far from the free
//! optimum Newton needs a good start, so the target is moved outward in small
//! steps, each one seeded from the previous converged multipliers (or a secant
//! extrapolation of the last two). A failed step is halved and retried a
//! bounded number of times.

use rp_core::{Error, FailureReason, Multipliers, Result};
use serde::{Deserialize, Serialize};

use crate::newton::{self, NewtonConfig, NonlinearSystem};

/// A formulation that can be shot from the left boundary.
pub trait ShootingModel: Sync {
    /// `[x_end − 1, y_end − 1, auc − target]` for the given multipliers.
    fn residuals(&self, m: &Multipliers, target_auc: f64) -> Result<[f64; 3]>;
}

/// Continuation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuationConfig {
    /// Largest AUC increment per step.
    pub step: f64,
    /// Consecutive halvings allowed before giving up.
    pub max_step_halvings: u32,
    /// Extrapolate the next start from the last two solutions.
    pub secant_predictor: bool,
    /// Corrector settings.
    pub newton: NewtonConfig,
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self { step: 0.02, max_step_halvings: 6, secant_predictor: true, newton: NewtonConfig::default() }
    }
}

/// Converged end of a continuation path.
#[derive(Debug, Clone)]
pub struct ContinuationOutcome {
    /// Multipliers at the target.
    pub multipliers: Multipliers,
    /// Accepted continuation steps.
    pub n_steps: u64,
    /// Total Newton iterations.
    pub n_newton: u64,
    /// Smallest step used.
    pub min_step: f64,
}

struct AtTarget<'a> {
    model: &'a dyn ShootingModel,
    target: f64,
}

fn unpack(u: &[f64]) -> Multipliers {
    Multipliers { lambda: u[0], c1: u[1], c2: u[2] }
}

fn pack(m: &Multipliers) -> [f64; 3] {
    [m.lambda, m.c1, m.c2]
}

impl NonlinearSystem for AtTarget<'_> {
    fn dim(&self) -> usize {
        3
    }

    fn residuals(&self, u: &[f64]) -> Result<Vec<f64>> {
        Ok(self.model.residuals(&unpack(u), self.target)?.to_vec())
    }
}

/// Newton solve at a single target from `start`.
pub fn correct(
    model: &dyn ShootingModel,
    target_auc: f64,
    start: &Multipliers,
    config: &NewtonConfig,
) -> Result<(Multipliers, usize)> {
    let system = AtTarget { model, target: target_auc };
    let res = newton::solve(&system, &pack(start), config)?;
    if res.converged {
        Ok((unpack(&res.u), res.n_iter))
    } else {
        Err(Error::optimization(
            Some(target_auc),
            FailureReason::NonConvergence(format!(
                "newton: {} (max residual {:.3e})",
                res.message, res.max_residual
            )),
        ))
    }
}

/// Walk from `(start_auc, start)` to `target_auc`.
pub fn continue_to(
    model: &dyn ShootingModel,
    start_auc: f64,
    start: Multipliers,
    target_auc: f64,
    config: &ContinuationConfig,
) -> Result<ContinuationOutcome> {
    if config.step.is_nan() || config.step <= 0.0 {
        return Err(Error::Validation(format!("continuation step must be > 0, got {}", config.step)));
    }
    let direction = if target_auc >= start_auc { 1.0 } else { -1.0 };
    let mut auc = start_auc;
    let mut current = start;
    let mut previous: Option<(f64, Multipliers)> = None;
    let mut step = config.step;
    let mut min_step = step;
    let mut halvings = 0;
    let mut n_steps = 0;
    let mut n_newton = 0;

    while (target_auc - auc).abs() > 1e-14 {
        let remaining = (target_auc - auc).abs();
        let next = if remaining <= step { target_auc } else { auc + direction * step };

        let guess = match previous {
            Some((prev_auc, prev)) if config.secant_predictor && (auc - prev_auc).abs() > 0.0 => {
                let s = (next - auc) / (auc - prev_auc);
                Multipliers {
                    lambda: current.lambda + s * (current.lambda - prev.lambda),
                    c1: current.c1 + s * (current.c1 - prev.c1),
                    c2: current.c2 + s * (current.c2 - prev.c2),
                }
            }
            _ => current,
        };

        let attempt = correct(model, next, &guess, &config.newton).or_else(|e| {
            if guess != current {
                correct(model, next, &current, &config.newton)
            } else {
                Err(e)
            }
        });

        match attempt {
            Ok((m, iters)) => {
                n_newton += iters as u64;
                n_steps += 1;
                previous = Some((auc, current));
                auc = next;
                current = m;
                halvings = 0;
                step = (2.0 * step).min(config.step);
            }
            Err(e) => {
                halvings += 1;
                if halvings > config.max_step_halvings {
                    log::debug!("continuation stalled at AUC={auc:.6} towards {target_auc:.6}: {e}");
                    return Err(Error::optimization(
                        Some(target_auc),
                        FailureReason::NonConvergence(format!(
                            "continuation stalled at AUC={auc:.6} after {} step halvings",
                            config.max_step_halvings
                        )),
                    ));
                }
                step *= 0.5;
                min_step = min_step.min(step);
            }
        }
    }

    Ok(ContinuationOutcome { multipliers: current, n_steps, n_newton, min_step })
}
