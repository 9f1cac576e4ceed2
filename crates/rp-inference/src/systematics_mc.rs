//! Monte-Carlo ROC bands from per-sample systematic uncertainties.
//!
//! Each replicate perturbs every sample's value with its uncertainty sources,
//! rebuilds both groups with empirical weights and records the resulting ROC
//! curve and AUC. No likelihood reweighting happens here: the bands describe
//! systematic variation only.
//!
//! ## Reproducibility
//!
//! Replicate `i` draws from its own counter-based RNG, so an ensemble is
//! bit-identical for a given seed whether it is generated serially or on the
//! rayon pool.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::distributions::Open01;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Poisson, StandardNormal};
use rayon::prelude::*;
use rp_core::{Error, Group, Result, Sample, UncertaintyKind};
use rp_prob::GroupDistribution;
use rp_prob::normal;
use rp_prob::quantile::{percentile_pair, quantile_linear_sorted};
use serde::{Deserialize, Serialize};
use statrs::distribution::DiscreteCDF;

use crate::profile_likelihood::ConfidenceLevel;
use crate::roc::RocCurve;

/// Counter-based replicate RNG. Same `(seed, replicate)` → same draws.
#[inline]
fn replicate_rng(seed: u64, replicate: u64) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_mul(2654435761).wrapping_add(replicate))
}

/// Poisson(`mean`) quantile at `p`.
///
/// With `nonzero`, `p` is rescaled into `(P(0), 1)`, which draws from the
/// distribution conditioned on a positive count.
fn poisson_quantile(mean: f64, p: f64, nonzero: bool) -> Result<f64> {
    let dist = statrs::distribution::Poisson::new(mean)
        .map_err(|e| Error::Validation(format!("Poisson({mean}): {e}")))?;
    let p0 = if nonzero { (-mean).exp() } else { 0.0 };
    let k = dist.inverse_cdf((p0 + p * (1.0 - p0)).clamp(1e-12, 1.0 - 1e-12)) as f64;
    Ok(if nonzero { k.max(1.0) } else { k })
}

/// Monte-Carlo settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct McConfig {
    /// Number of replicates.
    pub n_replicates: usize,
    /// Base seed.
    pub seed: u64,
    /// False-positive grid on which bands are reported.
    pub x_grid: Vec<f64>,
    /// Percentile levels.
    pub levels: Vec<ConfidenceLevel>,
    /// Generate replicates on the rayon pool.
    pub parallel: bool,
    /// Negate perturbed values before building the curves.
    pub flip_sign: bool,
}

impl Default for McConfig {
    fn default() -> Self {
        Self {
            n_replicates: 1000,
            seed: 42,
            x_grid: (0..=100).map(|i| i as f64 / 100.0).collect(),
            levels: ConfidenceLevel::defaults(),
            parallel: true,
            flip_sign: false,
        }
    }
}

/// One perturbed draw of both groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McReplicate {
    /// Replicate index (RNG counter).
    pub index: u64,
    /// AUC of the perturbed groups.
    pub auc: f64,
    /// ROC curve of the perturbed groups.
    pub roc: RocCurve,
}

/// Percentile band at one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileBand {
    /// Level.
    pub level: ConfidenceLevel,
    /// Lower percentile of `y` at each grid point.
    pub lower: Vec<f64>,
    /// Upper percentile of `y` at each grid point.
    pub upper: Vec<f64>,
}

/// Pointwise ROC bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McBands {
    /// False-positive grid.
    pub x: Vec<f64>,
    /// Unperturbed curve on the grid.
    pub nominal: Vec<f64>,
    /// Replicate median on the grid.
    pub median: Vec<f64>,
    /// One band per level, in configuration order.
    pub bands: Vec<PercentileBand>,
}

impl McBands {
    /// `(x, lower_inner, upper_inner, lower_outer, upper_outer)` rows from the
    /// first two levels (68% and 95% by default).
    pub fn rows(&self) -> Result<Vec<[f64; 5]>> {
        let [inner, outer, ..] = self.bands.as_slice() else {
            return Err(Error::Validation("band rows need two confidence levels".into()));
        };
        Ok(self
            .x
            .iter()
            .enumerate()
            .map(|(i, &x)| [x, inner.lower[i], inner.upper[i], outer.lower[i], outer.upper[i]])
            .collect())
    }
}

/// Replicates plus the unperturbed reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McEnsemble {
    /// Curve of the unperturbed samples.
    pub nominal: RocCurve,
    /// AUC of the unperturbed samples.
    pub nominal_auc: f64,
    /// Replicates in index order.
    pub replicates: Vec<McReplicate>,
    /// Levels used by [`McEnsemble::bands`].
    pub levels: Vec<ConfidenceLevel>,
}

impl McEnsemble {
    /// Replicate AUCs.
    pub fn aucs(&self) -> Vec<f64> {
        self.replicates.iter().map(|r| r.auc).collect()
    }

    /// Pointwise percentiles of `y(x)` across replicates.
    pub fn bands(&self, x_grid: &[f64]) -> Result<McBands> {
        if self.replicates.is_empty() {
            return Err(Error::Validation("ensemble has no replicates".into()));
        }
        let mut median = Vec::with_capacity(x_grid.len());
        let mut bands: Vec<PercentileBand> = self
            .levels
            .iter()
            .map(|level| PercentileBand {
                level: level.clone(),
                lower: Vec::with_capacity(x_grid.len()),
                upper: Vec::with_capacity(x_grid.len()),
            })
            .collect();
        let mut ys = vec![0.0; self.replicates.len()];
        for &x in x_grid {
            for (slot, rep) in ys.iter_mut().zip(&self.replicates) {
                *slot = rep.roc.y_at(x);
            }
            ys.sort_by(f64::total_cmp);
            median.push(quantile_linear_sorted(&ys, 0.5));
            for band in &mut bands {
                band.lower.push(quantile_linear_sorted(&ys, band.level.quantile_low));
                band.upper.push(quantile_linear_sorted(&ys, band.level.quantile_high));
            }
        }
        Ok(McBands { x: x_grid.to_vec(), nominal: self.nominal.sample(x_grid), median, bands })
    }

    /// Percentile interval of the replicate AUCs.
    pub fn auc_interval(&self, level: &ConfidenceLevel) -> Result<(f64, f64)> {
        percentile_pair(&self.aucs(), level.quantile_low, level.quantile_high)
    }
}

/// Replicate generator over a fixed set of samples.
#[derive(Debug, Clone)]
pub struct SystematicsMonteCarlo {
    samples: Vec<Sample>,
    shared: BTreeMap<String, usize>,
    config: McConfig,
}

impl SystematicsMonteCarlo {
    /// Validate the samples and index the correlation groups.
    pub fn new(samples: Vec<Sample>, config: McConfig) -> Result<Self> {
        if config.n_replicates == 0 {
            return Err(Error::Validation("n_replicates must be > 0".into()));
        }
        let mut shared = BTreeMap::new();
        for s in &samples {
            if !s.value.is_finite() {
                return Err(Error::InvalidDistribution(format!("non-finite measurement {}", s.value)));
            }
            for u in &s.uncertainties {
                u.validate()?;
                if matches!(u.kind, UncertaintyKind::Poisson | UncertaintyKind::PoissonRatio) && s.value < 0.0 {
                    return Err(Error::InvalidDistribution(format!(
                        "Poisson uncertainty on negative value {}",
                        s.value
                    )));
                }
                if let Some(g) = &u.correlation_group {
                    let next = shared.len();
                    shared.entry(g.clone()).or_insert(next);
                }
            }
        }
        let n_r = samples.iter().filter(|s| s.group == Group::Responder).count();
        if n_r == 0 || n_r == samples.len() {
            return Err(Error::InvalidDistribution("both groups need at least one sample".into()));
        }
        Ok(Self { samples, shared, config })
    }

    /// Settings.
    pub fn config(&self) -> &McConfig {
        &self.config
    }

    fn curve_of(&self, values: impl Iterator<Item = (Group, f64)>) -> Result<RocCurve> {
        let sign = if self.config.flip_sign { -1.0 } else { 1.0 };
        let mut nr = Vec::new();
        let mut r = Vec::new();
        for (g, v) in values {
            match g {
                Group::NonResponder => nr.push(sign * v),
                Group::Responder => r.push(sign * v),
            }
        }
        Ok(RocCurve::from_groups(&GroupDistribution::from_values(&nr)?, &GroupDistribution::from_values(&r)?))
    }

    fn perturb(sample: &Sample, shared_z: &[f64], shared: &BTreeMap<String, usize>, rng: &mut StdRng) -> Result<f64> {
        let mut t = sample.value;
        for u in &sample.uncertainties {
            let common = u.correlation_group.as_ref().and_then(|g| shared.get(g)).map(|&i| shared_z[i]);
            t = match u.kind {
                UncertaintyKind::LogNormal => {
                    let z = common.unwrap_or_else(|| rng.sample(StandardNormal));
                    t * u.scale.powf(z)
                }
                UncertaintyKind::Gaussian => {
                    let z = common.unwrap_or_else(|| rng.sample(StandardNormal));
                    t + u.scale * z
                }
                UncertaintyKind::Poisson => {
                    let k = t * u.scale;
                    if k <= 0.0 {
                        0.0
                    } else if let Some(z) = common {
                        let p = normal::cdf(z).clamp(1e-12, 1.0 - 1e-12);
                        let dist = statrs::distribution::Poisson::new(k)
                            .map_err(|e| Error::Validation(format!("Poisson({k}): {e}")))?;
                        dist.inverse_cdf(p) as f64 / u.scale
                    } else {
                        let dist = Poisson::new(k)
                            .map_err(|e| Error::Validation(format!("Poisson({k}): {e}")))?;
                        dist.sample(rng) / u.scale
                    }
                }
                UncertaintyKind::PoissonRatio => {
                    let p_num = common.map_or_else(|| rng.sample(Open01), normal::cdf);
                    let num = if t > 0.0 { poisson_quantile(t * u.scale, p_num, false)? } else { 0.0 };
                    num / poisson_quantile(u.scale, rng.sample(Open01), true)?
                }
            };
        }
        Ok(t)
    }

    fn replicate(&self, index: u64) -> Result<McReplicate> {
        let mut rng = replicate_rng(self.config.seed, index);
        let shared_z: Vec<f64> = (0..self.shared.len()).map(|_| rng.sample(StandardNormal)).collect();
        let mut values = Vec::with_capacity(self.samples.len());
        for s in &self.samples {
            values.push((s.group, Self::perturb(s, &shared_z, &self.shared, &mut rng)?));
        }
        let roc = self.curve_of(values.into_iter())?;
        Ok(McReplicate { index, auc: roc.auc(), roc })
    }

    /// Draw all replicates.
    pub fn generate(&self) -> Result<McEnsemble> {
        let nominal = self.curve_of(self.samples.iter().map(|s| (s.group, s.value)))?;
        let n = self.config.n_replicates as u64;
        let replicates = if self.config.parallel {
            (0..n).into_par_iter().map(|i| self.replicate(i)).collect::<Result<Vec<_>>>()?
        } else {
            (0..n).map(|i| self.replicate(i)).collect::<Result<Vec<_>>>()?
        };
        log::debug!(
            "systematics MC: {} replicates, {} correlation groups, seed={}",
            replicates.len(),
            self.shared.len(),
            self.config.seed
        );
        Ok(McEnsemble {
            nominal_auc: nominal.auc(),
            nominal,
            replicates,
            levels: self.config.levels.clone(),
        })
    }
}
