//! ROC polylines.
//!
//! `x` is the non-responder CDF (false-positive axis), `y` the responder CDF.
//! Discrete curves are drawn through `(x(t_k), y(t_k))` over the sorted union
//! of both supports, so a tied threshold gives a diagonal segment and the
//! trapezoid area equals the half-tie rank AUC.

use rp_core::{Error, FitResult, FittedCurve, Result};
use rp_prob::GroupDistribution;
use serde::{Deserialize, Serialize};

/// Ordered `(x, y)` points from `(0, 0)` to `(1, 1)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RocCurve {
    /// False-positive axis.
    pub x: Vec<f64>,
    /// True-positive axis.
    pub y: Vec<f64>,
}

fn cumulative_on_union(
    nr_support: &[f64],
    nr_weights: &[f64],
    r_support: &[f64],
    r_weights: &[f64],
) -> RocCurve {
    let mut x = vec![0.0];
    let mut y = vec![0.0];
    let (mut i, mut j) = (0, 0);
    let (mut cx, mut cy) = (0.0, 0.0);
    while i < nr_support.len() || j < r_support.len() {
        let t = match (nr_support.get(i), r_support.get(j)) {
            (Some(&a), Some(&b)) => a.min(b),
            (Some(&a), None) => a,
            (None, Some(&b)) => b,
            (None, None) => break,
        };
        while i < nr_support.len() && nr_support[i] == t {
            cx += nr_weights[i];
            i += 1;
        }
        while j < r_support.len() && r_support[j] == t {
            cy += r_weights[j];
            j += 1;
        }
        x.push(cx);
        y.push(cy);
    }
    RocCurve { x, y }
}

impl RocCurve {
    /// Curve of the current weights of two groups.
    pub fn from_groups(nonresponder: &GroupDistribution, responder: &GroupDistribution) -> Self {
        cumulative_on_union(
            nonresponder.support(),
            nonresponder.weights(),
            responder.support(),
            responder.weights(),
        )
    }

    /// Curve of a fitted distribution pair.
    pub fn from_fit(fit: &FitResult) -> Result<Self> {
        match &fit.curve {
            FittedCurve::Weights { nonresponder_support, nonresponder, responder_support, responder } => {
                if nonresponder.len() != nonresponder_support.len()
                    || responder.len() != responder_support.len()
                {
                    return Err(Error::Validation("fitted weights and support differ in length".into()));
                }
                Ok(cumulative_on_union(nonresponder_support, nonresponder, responder_support, responder))
            }
            FittedCurve::Continuous { x, y, .. } => {
                if x.len() != y.len() || x.is_empty() {
                    return Err(Error::Validation("continuous curve must have matching, non-empty x/y".into()));
                }
                let mut cx = Vec::with_capacity(x.len() + 2);
                let mut cy = Vec::with_capacity(y.len() + 2);
                if x[0] > 0.0 || y[0] > 0.0 {
                    cx.push(0.0);
                    cy.push(0.0);
                }
                cx.extend_from_slice(x);
                cy.extend_from_slice(y);
                if cx.last().is_some_and(|v| *v < 1.0) || cy.last().is_some_and(|v| *v < 1.0) {
                    cx.push(1.0);
                    cy.push(1.0);
                }
                Ok(Self { x: cx, y: cy })
            }
        }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// `true` for a curve without points.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Trapezoid area `∫ y dx`.
    pub fn auc(&self) -> f64 {
        self.x
            .windows(2)
            .zip(self.y.windows(2))
            .map(|(xs, ys)| (xs[1] - xs[0]) * 0.5 * (ys[0] + ys[1]))
            .sum()
    }

    /// Largest `y` the polyline attains at `x` (clamped to `[0, 1]`).
    pub fn y_at(&self, x: f64) -> f64 {
        let x = x.clamp(0.0, 1.0);
        let mut best = f64::NEG_INFINITY;
        for (xs, ys) in self.x.windows(2).zip(self.y.windows(2)) {
            let (x0, x1) = (xs[0], xs[1]);
            if x < x0.min(x1) || x > x0.max(x1) {
                continue;
            }
            let v = if x1 == x0 {
                ys[0].max(ys[1])
            } else {
                ys[0] + (x - x0) / (x1 - x0) * (ys[1] - ys[0])
            };
            best = best.max(v);
        }
        if best.is_finite() {
            best
        } else {
            // single-point or degenerate curve
            self.y.iter().copied().fold(0.0, f64::max)
        }
    }

    /// `y_at` over a grid.
    pub fn sample(&self, x_grid: &[f64]) -> Vec<f64> {
        x_grid.iter().map(|&x| self.y_at(x)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rp_prob::{empirical_auc, mann_whitney_auc};

    #[test]
    fn test_auc_matches_rank_sum_with_ties() {
        let nr = [2.0, 3.0, 3.0, 4.0, 6.0, 8.0, 9.0, 10.0, 10.0, 10.0, 10.0, 11.0, 12.0, 13.0];
        let r = [1.0, 1.0, 2.0, 3.0, 9.0, 10.0];
        let g_nr = GroupDistribution::from_values(&nr).unwrap();
        let g_r = GroupDistribution::from_values(&r).unwrap();
        let roc = RocCurve::from_groups(&g_nr, &g_r);
        assert_relative_eq!(roc.auc(), mann_whitney_auc(&nr, &r), epsilon = 1e-12);
        assert_relative_eq!(roc.auc(), empirical_auc(&g_nr, &g_r), epsilon = 1e-12);
        assert_eq!((roc.x[0], roc.y[0]), (0.0, 0.0));
        assert_relative_eq!(*roc.x.last().unwrap(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(*roc.y.last().unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_upper_envelope_on_vertical_segment() {
        // responders strictly below non-responders: vertical rise at x = 0
        let g_nr = GroupDistribution::from_values(&[5.0, 6.0]).unwrap();
        let g_r = GroupDistribution::from_values(&[1.0, 2.0]).unwrap();
        let roc = RocCurve::from_groups(&g_nr, &g_r);
        assert_eq!(roc.y_at(0.0), 1.0);
        assert_eq!(roc.y_at(0.5), 1.0);
        assert_eq!(roc.auc(), 1.0);
    }

    #[test]
    fn test_from_continuous_fit_closes_endpoints() {
        let fit = FitResult {
            target_auc: None,
            auc: 0.5,
            nll: 0.0,
            converged: true,
            curve: FittedCurve::Continuous { t: vec![0.0, 1.0], x: vec![0.1, 0.9], y: vec![0.1, 0.9] },
            multipliers: None,
            n_iter: 0,
            warnings: vec![],
            message: String::new(),
        };
        let roc = RocCurve::from_fit(&fit).unwrap();
        assert_eq!(roc.len(), 4);
        assert_relative_eq!(roc.auc(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(roc.y_at(0.5), 0.5, epsilon = 1e-12);
    }
}
