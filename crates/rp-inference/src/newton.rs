//! Damped Newton solver for small square nonlinear systems.
//!
//! Jacobians are forward differences; the linear step is an LU solve. A step
//! is accepted when it lowers `‖r‖²`; otherwise (or when the residual cannot
//! be evaluated at the trial point) it is halved.

use nalgebra::{DMatrix, DVector};
use rp_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Square system `r(u) = 0`.
pub trait NonlinearSystem {
    /// Number of unknowns (and residuals).
    fn dim(&self) -> usize;

    /// Residual vector; an `Err` marks `u` as outside the valid domain.
    fn residuals(&self, u: &[f64]) -> Result<Vec<f64>>;

    /// Jacobian `∂r_i/∂u_j`; forward differences unless overridden.
    fn jacobian(&self, u: &[f64], r0: &[f64], rel_step: f64) -> Result<DMatrix<f64>> {
        let n = self.dim();
        let mut jac = DMatrix::zeros(n, n);
        let mut shifted = u.to_vec();
        for j in 0..n {
            let h = rel_step * u[j].abs().max(1.0);
            shifted[j] = u[j] + h;
            let r = match self.residuals(&shifted) {
                Ok(r) => r,
                Err(_) => {
                    // Backward difference when the forward step leaves the domain.
                    shifted[j] = u[j] - h;
                    let rb = self.residuals(&shifted)?;
                    shifted[j] = u[j];
                    for i in 0..n {
                        jac[(i, j)] = (r0[i] - rb[i]) / h;
                    }
                    continue;
                }
            };
            shifted[j] = u[j];
            for i in 0..n {
                jac[(i, j)] = (r[i] - r0[i]) / h;
            }
        }
        Ok(jac)
    }
}

/// Newton settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonConfig {
    /// Maximum Newton iterations.
    pub max_iter: usize,
    /// Converged when `max |r_i| <= tol`.
    pub tol: f64,
    /// Relative finite-difference step for the Jacobian.
    pub fd_step: f64,
    /// Maximum step halvings per iteration.
    pub max_backtracks: usize,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self { max_iter: 50, tol: 1e-10, fd_step: 1e-7, max_backtracks: 30 }
    }
}

/// Newton outcome.
#[derive(Debug, Clone)]
pub struct NewtonResult {
    /// Final unknowns.
    pub u: Vec<f64>,
    /// Residuals at `u`.
    pub residuals: Vec<f64>,
    /// `max |r_i|`.
    pub max_residual: f64,
    /// Iterations used.
    pub n_iter: usize,
    /// Tolerance met.
    pub converged: bool,
    /// Status message.
    pub message: String,
}

fn max_abs(v: &[f64]) -> f64 {
    v.iter().fold(0.0_f64, |m, x| m.max(x.abs()))
}

fn sq_norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum()
}

/// Solve `system` from `u0`.
///
/// Errors only when the residual cannot be evaluated at `u0`; a failure to
/// converge is reported through [`NewtonResult::converged`].
pub fn solve(system: &dyn NonlinearSystem, u0: &[f64], config: &NewtonConfig) -> Result<NewtonResult> {
    let n = system.dim();
    if u0.len() != n {
        return Err(Error::Validation(format!("newton: expected {n} unknowns, got {}", u0.len())));
    }
    let mut u = u0.to_vec();
    let mut r = system.residuals(&u)?;
    let mut message = format!("iteration cap ({}) reached", config.max_iter);

    let mut iter = 0;
    while iter < config.max_iter {
        if max_abs(&r) <= config.tol {
            message = "converged".to_string();
            break;
        }
        iter += 1;

        let jac = system.jacobian(&u, &r, config.fd_step)?;
        let rhs = DVector::from_iterator(n, r.iter().map(|v| -v));
        let Some(delta) = jac.lu().solve(&rhs) else {
            message = "singular Jacobian".to_string();
            break;
        };
        if delta.iter().any(|d| !d.is_finite()) {
            message = "non-finite Newton step".to_string();
            break;
        }

        let f0 = sq_norm(&r);
        let mut step = 1.0;
        let mut accepted = false;
        for _ in 0..=config.max_backtracks {
            let trial: Vec<f64> = u.iter().zip(delta.iter()).map(|(a, d)| a + step * d).collect();
            if let Ok(rt) = system.residuals(&trial) {
                if rt.iter().all(|v| v.is_finite()) && sq_norm(&rt) < f0 {
                    u = trial;
                    r = rt;
                    accepted = true;
                    break;
                }
            }
            step *= 0.5;
        }
        if !accepted {
            message = "line search failed".to_string();
            break;
        }
    }

    let max_residual = max_abs(&r);
    let converged = max_residual <= config.tol;
    if converged {
        message = "converged".to_string();
    }
    Ok(NewtonResult { u, residuals: r, max_residual, n_iter: iter, converged, message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // x² + y² = 4, x·y = 1
    struct Conic;

    impl NonlinearSystem for Conic {
        fn dim(&self) -> usize {
            2
        }

        fn residuals(&self, u: &[f64]) -> Result<Vec<f64>> {
            Ok(vec![u[0] * u[0] + u[1] * u[1] - 4.0, u[0] * u[1] - 1.0])
        }
    }

    #[test]
    fn test_conic_root() {
        let res = solve(&Conic, &[2.0, 0.3], &NewtonConfig::default()).unwrap();
        assert!(res.converged, "{}", res.message);
        let (x, y) = (res.u[0], res.u[1]);
        assert_relative_eq!(x * x + y * y, 4.0, epsilon = 1e-9);
        assert_relative_eq!(x * y, 1.0, epsilon = 1e-9);
    }

    // ln(u) - 1 = 0 only defined for u > 0
    struct Log;

    impl NonlinearSystem for Log {
        fn dim(&self) -> usize {
            1
        }

        fn residuals(&self, u: &[f64]) -> Result<Vec<f64>> {
            if u[0] <= 0.0 {
                return Err(Error::Validation("outside domain".into()));
            }
            Ok(vec![u[0].ln() - 1.0])
        }
    }

    #[test]
    fn test_backtracks_out_of_invalid_region() {
        // the full Newton step from 20 lands at a negative u
        let res = solve(&Log, &[20.0], &NewtonConfig::default()).unwrap();
        assert!(res.converged, "{}", res.message);
        assert_relative_eq!(res.u[0], std::f64::consts::E, epsilon = 1e-8);
    }

    #[test]
    fn test_invalid_start_is_error() {
        assert!(solve(&Log, &[-1.0], &NewtonConfig::default()).is_err());
    }
}
