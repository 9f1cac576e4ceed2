//! Empirical group distributions on a discrete support.
//!
//! A [`GroupDistribution`] collapses one group's measurements onto its distinct
//! values. The multiplicities are the data (they never change); the weights
//! are the tunable point masses a constrained fit adjusts.

use rp_core::{CdfModel, Error, Result};
use serde::{Deserialize, Serialize};

use crate::math::weighted_nll;

/// One group's support, multiplicities and normalized weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDistribution {
    support: Vec<f64>,
    multiplicities: Vec<f64>,
    weights: Vec<f64>,
    cumulative: Vec<f64>,
}

fn check_finite(values: &[f64]) -> Result<()> {
    if values.is_empty() {
        return Err(Error::InvalidDistribution("group has no samples".into()));
    }
    if let Some(v) = values.iter().find(|v| !v.is_finite()) {
        return Err(Error::InvalidDistribution(format!("non-finite measurement {v}")));
    }
    Ok(())
}

fn check_weights(weights: &[f64]) -> Result<f64> {
    if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(Error::InvalidDistribution(format!(
            "weights must be finite and non-negative, got {w}"
        )));
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(Error::InvalidDistribution("weights sum to zero".into()));
    }
    Ok(total)
}

fn cumulative_of(weights: &[f64]) -> Vec<f64> {
    let mut acc = 0.0;
    weights
        .iter()
        .map(|&w| {
            acc += w;
            acc
        })
        .collect()
}

impl GroupDistribution {
    /// Unweighted samples: every observation carries mass `1/N`.
    pub fn from_values(values: &[f64]) -> Result<Self> {
        Self::from_weighted(values, &vec![1.0; values.len()])
    }

    /// Externally weighted samples. Equal values are merged and their weights summed.
    pub fn from_weighted(values: &[f64], weights: &[f64]) -> Result<Self> {
        check_finite(values)?;
        if values.len() != weights.len() {
            return Err(Error::InvalidDistribution(format!(
                "values/weights length mismatch: {} != {}",
                values.len(),
                weights.len()
            )));
        }
        check_weights(weights)?;

        let mut pairs: Vec<(f64, f64)> =
            values.iter().copied().zip(weights.iter().copied()).collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut support: Vec<f64> = Vec::with_capacity(pairs.len());
        let mut multiplicities: Vec<f64> = Vec::with_capacity(pairs.len());
        for (v, w) in pairs {
            match support.last() {
                Some(&last) if last == v => {
                    if let Some(m) = multiplicities.last_mut() {
                        *m += w;
                    }
                }
                _ => {
                    support.push(v);
                    multiplicities.push(w);
                }
            }
        }

        let total: f64 = multiplicities.iter().sum();
        let weights: Vec<f64> = multiplicities.iter().map(|m| m / total).collect();
        let cumulative = cumulative_of(&weights);
        Ok(Self { support, multiplicities, weights, cumulative })
    }

    /// Same support and data, new trial weights (renormalized).
    pub fn with_weights(&self, weights: &[f64]) -> Result<Self> {
        if weights.len() != self.support.len() {
            return Err(Error::InvalidDistribution(format!(
                "expected {} weights, got {}",
                self.support.len(),
                weights.len()
            )));
        }
        let total = check_weights(weights)?;
        let weights: Vec<f64> = weights.iter().map(|w| w / total).collect();
        let cumulative = cumulative_of(&weights);
        Ok(Self {
            support: self.support.clone(),
            multiplicities: self.multiplicities.clone(),
            weights,
            cumulative,
        })
    }

    /// Value-negated copy (`t -> -t`), with support re-sorted.
    pub fn negated(&self) -> Self {
        let support: Vec<f64> = self.support.iter().rev().map(|t| -t).collect();
        let multiplicities: Vec<f64> = self.multiplicities.iter().rev().copied().collect();
        let weights: Vec<f64> = self.weights.iter().rev().copied().collect();
        let cumulative = cumulative_of(&weights);
        Self { support, multiplicities, weights, cumulative }
    }

    /// Distinct support points, strictly increasing.
    pub fn support(&self) -> &[f64] {
        &self.support
    }

    /// Observed count at each support point.
    pub fn multiplicities(&self) -> &[f64] {
        &self.multiplicities
    }

    /// Current normalized weights.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Number of distinct support points.
    pub fn len(&self) -> usize {
        self.support.len()
    }

    /// Never true for a constructed distribution.
    pub fn is_empty(&self) -> bool {
        self.support.is_empty()
    }

    /// Empirical frequencies `m_i / Σm`.
    pub fn empirical_weights(&self) -> Vec<f64> {
        let total = self.total_count();
        self.multiplicities.iter().map(|m| m / total).collect()
    }

    /// Multinomial NLL of the current weights given the observed multiplicities.
    pub fn nll(&self) -> f64 {
        weighted_nll(&self.multiplicities, &self.weights)
    }

    /// Point mass at exactly `t`.
    pub fn pmf(&self, t: f64) -> f64 {
        match self.support.binary_search_by(|s| s.total_cmp(&t)) {
            Ok(i) => self.weights[i],
            Err(_) => 0.0,
        }
    }

    /// `P(T < t)`.
    pub fn fraction_lt(&self, t: f64) -> f64 {
        let i = self.support.partition_point(|&s| s < t);
        if i == 0 { 0.0 } else { self.cumulative[i - 1].min(1.0) }
    }

    /// `P(T > t)`.
    pub fn fraction_gt(&self, t: f64) -> f64 {
        (1.0 - self.cdf(t)).max(0.0)
    }

    /// `P(T < t) + ½ P(T = t)`: the tie-splitting CDF used for AUC.
    pub fn mid_cdf(&self, t: f64) -> f64 {
        self.fraction_lt(t) + 0.5 * self.pmf(t)
    }
}

impl CdfModel for GroupDistribution {
    fn cdf(&self, t: f64) -> f64 {
        let i = self.support.partition_point(|&s| s <= t);
        if i == 0 { 0.0 } else { self.cumulative[i - 1].min(1.0) }
    }

    fn pdf(&self, t: f64) -> f64 {
        self.pmf(t)
    }

    fn total_count(&self) -> f64 {
        self.multiplicities.iter().sum()
    }

    fn fraction_ge(&self, t: f64) -> f64 {
        (1.0 - self.fraction_lt(t)).max(0.0)
    }
}

/// Tie-splitting CDF of `(support, weights)` evaluated at every point of the
/// sorted `at` slice: `Σ_{s<a} w + ½ Σ_{s=a} w`.
pub fn mid_cdf_at(support: &[f64], weights: &[f64], at: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(at.len());
    let mut j = 0;
    let mut below = 0.0;
    for &a in at {
        while j < support.len() && support[j] < a {
            below += weights[j];
            j += 1;
        }
        let tie = if j < support.len() && support[j] == a { weights[j] } else { 0.0 };
        out.push(below + 0.5 * tie);
    }
    out
}

/// AUC of two weighted supports: `Σ_n x_n (Σ_{t_r<t_n} y_r + ½ Σ_{t_r=t_n} y_r)`.
///
/// `x` weights the non-responder support, `y` the responder support.
pub fn auc_from_weights(
    nonresponder_support: &[f64],
    x: &[f64],
    responder_support: &[f64],
    y: &[f64],
) -> f64 {
    let f = mid_cdf_at(responder_support, y, nonresponder_support);
    x.iter().zip(&f).map(|(a, b)| a * b).sum()
}

/// AUC of the current weights of two groups.
pub fn empirical_auc(nonresponder: &GroupDistribution, responder: &GroupDistribution) -> f64 {
    auc_from_weights(
        nonresponder.support(),
        nonresponder.weights(),
        responder.support(),
        responder.weights(),
    )
}

/// Mann–Whitney AUC by direct pair counting, `O(N·M)`.
pub fn mann_whitney_auc(nonresponder: &[f64], responder: &[f64]) -> f64 {
    let mut u = 0.0;
    for &n in nonresponder {
        for &r in responder {
            if n > r {
                u += 1.0;
            } else if n == r {
                u += 0.5;
            }
        }
    }
    u / (nonresponder.len() * responder.len()) as f64
}
