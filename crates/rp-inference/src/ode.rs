//! Adaptive ODE integration (Dormand–Prince 5(4)).
//!
//! # Step policy
//! - Integrates forward only (`t1 >= t0`).
//! - Error control on the RMS of `err_i / (atol + rtol·max(|y_i|, |ŷ_i|))`.
//! - Step factor `0.9·err^(-1/5)` clamped to `[0.2, 5]`, step clamped to `[h_min, h_max]`.
//! - A right-hand side that fails at a trial stage shrinks the step by 4×;
//!   once the step is below `h_min` the error is propagated.

use rp_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// First-order system `dy/dt = f(t, y)` whose right-hand side may be undefined.
pub trait OdeSystem {
    /// State dimension.
    fn ndim(&self) -> usize;

    /// Write `f(t, y)` into `dydt`.
    fn rhs(&self, t: f64, y: &[f64], dydt: &mut [f64]) -> Result<()>;
}

/// Integrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OdeOptions {
    /// Relative tolerance.
    pub rtol: f64,
    /// Absolute tolerance.
    pub atol: f64,
    /// Initial step (`0` picks `(t1 − t0)/1000`).
    pub h0: f64,
    /// Smallest allowed step.
    pub h_min: f64,
    /// Largest allowed step (`0` means unbounded).
    pub h_max: f64,
    /// Step cap.
    pub max_steps: usize,
    /// Record every accepted step (otherwise only the endpoints).
    pub dense_output: bool,
}

impl Default for OdeOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-9,
            atol: 1e-12,
            h0: 0.0,
            h_min: 1e-12,
            h_max: 0.0,
            max_steps: 200_000,
            dense_output: true,
        }
    }
}

/// Time grid and states.
#[derive(Debug, Clone)]
pub struct OdeSolution {
    /// Accepted times (includes `t0` and `t1`).
    pub t: Vec<f64>,
    /// States aligned with `t`.
    pub y: Vec<Vec<f64>>,
}

impl OdeSolution {
    /// Final state.
    pub fn last(&self) -> Option<&[f64]> {
        self.y.last().map(Vec::as_slice)
    }
}

const C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
const A: [[f64; 6]; 7] = [
    [0.0; 6],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0, 0.0, 0.0],
    [9017.0 / 3168.0, -355.0 / 33.0, 46732.0 / 5247.0, 49.0 / 176.0, -5103.0 / 18656.0, 0.0],
    [35.0 / 384.0, 0.0, 500.0 / 1113.0, 125.0 / 192.0, -2187.0 / 6784.0, 11.0 / 84.0],
];
/// 5th-order minus embedded 4th-order weights.
const E: [f64; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

/// One Dormand–Prince attempt. `k[0]` must hold `f(t, y)`; on success `k[6]`
/// holds `f(t + h, y_new)`.
fn dp_step(
    system: &dyn OdeSystem,
    t: f64,
    y: &[f64],
    h: f64,
    k: &mut [Vec<f64>; 7],
    y_new: &mut [f64],
) -> Result<()> {
    for s in 1..7 {
        for (i, yi) in y_new.iter_mut().enumerate() {
            let acc: f64 = (0..s).map(|j| A[s][j] * k[j][i]).sum();
            *yi = y[i] + h * acc;
        }
        system.rhs(t + C[s] * h, y_new, &mut k[s])?;
    }
    // The last stage is evaluated at the 5th-order solution, left in `y_new`.
    Ok(())
}

fn error_norm(k: &[Vec<f64>; 7], y: &[f64], y_new: &[f64], h: f64, opts: &OdeOptions) -> f64 {
    let n = y.len();
    let mut acc = 0.0;
    for i in 0..n {
        let mut e = 0.0;
        for (s, ks) in k.iter().enumerate() {
            e += E[s] * ks[i];
        }
        let sc = opts.atol + opts.rtol * y[i].abs().max(y_new[i].abs());
        acc += (h * e / sc).powi(2);
    }
    (acc / n as f64).sqrt()
}

/// Integrate `system` from `(t0, y0)` to `t1`.
pub fn rk45(
    system: &dyn OdeSystem,
    y0: &[f64],
    t0: f64,
    t1: f64,
    opts: &OdeOptions,
) -> Result<OdeSolution> {
    if !t0.is_finite() || !t1.is_finite() || t1 < t0 {
        return Err(Error::Validation(format!("rk45: invalid interval [{t0}, {t1}]")));
    }
    let n = system.ndim();
    if y0.len() != n {
        return Err(Error::Validation(format!("rk45: expected {n} states, got {}", y0.len())));
    }
    if y0.iter().any(|v| !v.is_finite()) {
        return Err(Error::Validation("rk45: y0 must be finite".to_string()));
    }

    let span = t1 - t0;
    let h_max = if opts.h_max > 0.0 { opts.h_max } else { span.max(opts.h_min) };
    let mut h = if opts.h0 > 0.0 { opts.h0 } else { span / 1000.0 };
    h = h.clamp(opts.h_min, h_max);

    let mut sol = OdeSolution { t: vec![t0], y: vec![y0.to_vec()] };
    if span == 0.0 {
        return Ok(sol);
    }

    let mut t = t0;
    let mut y = y0.to_vec();
    let mut k: [Vec<f64>; 7] = std::array::from_fn(|_| vec![0.0; n]);
    let mut y_new = vec![0.0; n];
    system.rhs(t, &y, &mut k[0])?;

    let mut steps = 0;
    while t < t1 {
        if steps >= opts.max_steps {
            return Err(Error::Validation(format!(
                "rk45: exceeded max_steps={} at t={t} (t1={t1})",
                opts.max_steps
            )));
        }
        steps += 1;
        let h_try = h.min(t1 - t);

        if let Err(e) = dp_step(system, t, &y, h_try, &mut k, &mut y_new) {
            if h_try <= opts.h_min {
                return Err(e);
            }
            h = (0.25 * h_try).max(opts.h_min);
            continue;
        }

        let err = error_norm(&k, &y, &y_new, h_try, opts);
        let factor = if err == 0.0 { 5.0 } else { (0.9 * err.powf(-0.2)).clamp(0.2, 5.0) };

        if err <= 1.0 || h_try <= opts.h_min {
            t = if h_try == t1 - t { t1 } else { t + h_try };
            std::mem::swap(&mut y, &mut y_new);
            let (first, rest) = k.split_at_mut(1);
            first[0].copy_from_slice(&rest[5]);
            if opts.dense_output || t >= t1 {
                sol.t.push(t);
                sol.y.push(y.clone());
            }
        }
        h = (h_try * factor).clamp(opts.h_min, h_max);
    }

    Ok(sol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Decay(f64);

    impl OdeSystem for Decay {
        fn ndim(&self) -> usize {
            1
        }

        fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) -> Result<()> {
            dydt[0] = -self.0 * y[0];
            Ok(())
        }
    }

    struct Oscillator;

    impl OdeSystem for Oscillator {
        fn ndim(&self) -> usize {
            2
        }

        fn rhs(&self, _t: f64, y: &[f64], dydt: &mut [f64]) -> Result<()> {
            dydt[0] = y[1];
            dydt[1] = -y[0];
            Ok(())
        }
    }

    // dy/dt = 1/(2 - t) blows up at t = 2
    struct Pole;

    impl OdeSystem for Pole {
        fn ndim(&self) -> usize {
            1
        }

        fn rhs(&self, t: f64, _y: &[f64], dydt: &mut [f64]) -> Result<()> {
            let d = 2.0 - t;
            if d <= 0.0 {
                return Err(Error::Validation("denominator <= 0".into()));
            }
            dydt[0] = 1.0 / d;
            Ok(())
        }
    }

    #[test]
    fn test_exp_decay() {
        let sol = rk45(&Decay(1.3), &[2.0], 0.0, 1.0, &OdeOptions::default()).unwrap();
        let y1 = sol.last().unwrap()[0];
        assert_relative_eq!(y1, 2.0 * (-1.3_f64).exp(), epsilon = 1e-9);
        assert_eq!(*sol.t.last().unwrap(), 1.0);
    }

    #[test]
    fn test_oscillator_full_period() {
        let tau = 2.0 * std::f64::consts::PI;
        let sol = rk45(&Oscillator, &[1.0, 0.0], 0.0, tau, &OdeOptions::default()).unwrap();
        let y = sol.last().unwrap();
        assert_relative_eq!(y[0], 1.0, epsilon = 1e-7);
        assert_relative_eq!(y[1], 0.0, epsilon = 1e-7);
    }

    #[test]
    fn test_h_max_respected() {
        let opts = OdeOptions { h_max: 0.01, ..OdeOptions::default() };
        let sol = rk45(&Decay(0.1), &[1.0], 0.0, 1.0, &opts).unwrap();
        assert!(sol.t.windows(2).all(|w| w[1] - w[0] <= 0.01 + 1e-15));
        assert!(sol.t.len() >= 101);
    }

    #[test]
    fn test_rhs_failure_propagates() {
        assert!(rk45(&Pole, &[0.0], 0.0, 3.0, &OdeOptions::default()).is_err());
        let ok = rk45(&Pole, &[0.0], 0.0, 1.0, &OdeOptions::default()).unwrap();
        assert_relative_eq!(ok.last().unwrap()[0], 2.0_f64.ln(), epsilon = 1e-8);
    }
}
