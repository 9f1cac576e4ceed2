//! End-to-end ROC analyses.
//!
//! [`RocAnalysis`] holds one immutable data set plus its configuration and
//! produces either likelihood-based bands (profile scan plus the ROC curves at
//! the interval boundaries) or systematics-only Monte-Carlo bands. Results are
//! plain values; nothing is cached between calls.

use rp_core::{AucSolver, Error, FitResult, Result, Sample, split_groups};
use rp_prob::GroupDistribution;
use serde::{Deserialize, Serialize};

use crate::artifacts::{McBandArtifact, ProfileCurveArtifact, RocCurveArtifact};
use crate::config::AnalysisConfig;
use crate::profile_likelihood::{ConfidenceLevel, LikelihoodScanner, ProfileLikelihoodScan};
use crate::roc::RocCurve;
use crate::solver::{FitMethod, SolverKind};
use crate::systematics_mc::{McBands, McConfig, McEnsemble, SystematicsMonteCarlo};

/// ROC curve of a fit at a named AUC (`nominal`, `m68`, `p68`, `m95`, `p95`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtremalCurve {
    /// Curve name.
    pub name: String,
    /// AUC the fit was constrained to (free AUC for `nominal`).
    pub auc: f64,
    /// NLL of the fit.
    pub nll: f64,
    /// Curve.
    pub roc: RocCurve,
}

/// Likelihood scan plus the extremal curves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LikelihoodRocBands {
    /// Profile scan.
    pub scan: ProfileLikelihoodScan,
    /// `nominal` first, then `m`/`p` curves per closed interval end.
    pub curves: Vec<ExtremalCurve>,
}

impl LikelihoodRocBands {
    /// Curve by name.
    pub fn curve(&self, name: &str) -> Option<&ExtremalCurve> {
        self.curves.iter().find(|c| c.name == name)
    }

    /// Scan artifact.
    pub fn profile_artifact(&self) -> ProfileCurveArtifact {
        ProfileCurveArtifact::from(&self.scan)
    }

    /// Curve artifacts.
    pub fn curve_artifacts(&self) -> Vec<RocCurveArtifact> {
        self.curves.iter().map(|c| RocCurveArtifact::new(c.name.clone(), &c.roc, Some(c.nll))).collect()
    }
}

/// Monte-Carlo ensemble with its bands and AUC intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystematicsBands {
    /// Replicates.
    pub ensemble: McEnsemble,
    /// Pointwise bands on the configured grid.
    pub bands: McBands,
    /// AUC percentile interval per level.
    pub auc_intervals: Vec<(ConfidenceLevel, f64, f64)>,
}

impl SystematicsBands {
    /// Band artifact (needs at least two levels).
    pub fn artifact(&self) -> Result<McBandArtifact> {
        let intervals =
            self.auc_intervals.iter().map(|(l, lo, hi)| (l.label.clone(), *lo, *hi)).collect();
        McBandArtifact::new(self.ensemble.replicates.len(), self.ensemble.nominal_auc, intervals, &self.bands)
    }
}

/// NLL of two methods at one AUC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonPoint {
    /// AUC.
    pub auc: f64,
    /// NLL of the first method.
    pub nll_a: Option<f64>,
    /// NLL of the second method.
    pub nll_b: Option<f64>,
}

impl ComparisonPoint {
    /// `nll_b − nll_a` when both succeeded.
    pub fn difference(&self) -> Option<f64> {
        Some(self.nll_b? - self.nll_a?)
    }
}

/// Per-point NLL disagreement between two formulations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodComparison {
    /// First method.
    pub method_a: FitMethod,
    /// Second method.
    pub method_b: FitMethod,
    /// Points in input order.
    pub points: Vec<ComparisonPoint>,
}

impl MethodComparison {
    /// Largest `|nll_b − nll_a|` over points where both succeeded.
    pub fn max_abs_difference(&self) -> Option<f64> {
        self.points.iter().filter_map(ComparisonPoint::difference).map(f64::abs).reduce(f64::max)
    }
}

/// One data set and its configuration.
#[derive(Debug, Clone)]
pub struct RocAnalysis {
    samples: Vec<Sample>,
    nonresponder: GroupDistribution,
    responder: GroupDistribution,
    config: AnalysisConfig,
}

impl RocAnalysis {
    /// Analysis of labelled samples.
    pub fn new(samples: Vec<Sample>, config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let (r, nr) = split_groups(&samples);
        let sign = if config.flip_sign { -1.0 } else { 1.0 };
        let flip = |v: Vec<f64>| -> Vec<f64> { v.into_iter().map(|t| sign * t).collect() };
        let nonresponder = GroupDistribution::from_values(&flip(nr))?;
        let responder = GroupDistribution::from_values(&flip(r))?;
        Ok(Self { samples, nonresponder, responder, config })
    }

    /// Analysis of plain values without uncertainties.
    pub fn from_values(nonresponder: &[f64], responder: &[f64], config: AnalysisConfig) -> Result<Self> {
        let samples = responder
            .iter()
            .map(|&v| Sample::responder(v))
            .chain(nonresponder.iter().map(|&v| Sample::non_responder(v)))
            .collect();
        Self::new(samples, config)
    }

    /// Non-responder group (sign already applied).
    pub fn nonresponder(&self) -> &GroupDistribution {
        &self.nonresponder
    }

    /// Responder group (sign already applied).
    pub fn responder(&self) -> &GroupDistribution {
        &self.responder
    }

    /// Configuration.
    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Empirical ROC curve.
    pub fn nominal_roc(&self) -> RocCurve {
        RocCurve::from_groups(&self.nonresponder, &self.responder)
    }

    /// Solver of the given kind over this data set.
    pub fn solver(&self, method: FitMethod) -> Result<SolverKind> {
        SolverKind::build(method, &self.nonresponder, &self.responder, &self.config)
    }

    /// Profile scan with the configured method, plus the curves at each
    /// closed interval end.
    pub fn likelihood_bands(&self) -> Result<LikelihoodRocBands> {
        let solver = self.solver(self.config.method)?;
        let scan = LikelihoodScanner::new(self.config.scan.clone()).scan(&solver)?;

        let mut curves = Vec::with_capacity(1 + 2 * scan.intervals.len());
        let free = solver.solve(None, None)?;
        curves.push(extremal("nominal", &free)?);

        for ci in &scan.intervals {
            for (prefix, bound) in [("m", ci.lower), ("p", ci.upper)] {
                let name = format!("{prefix}{}", ci.level.label);
                let Some(auc) = bound.value() else {
                    log::debug!("{name}: interval end is open, no curve");
                    continue;
                };
                let warm = scan.nearest_fit(auc).map(FitResult::warm_start);
                match solver.solve(Some(auc), warm.as_ref()) {
                    Ok(fit) => curves.push(extremal(&name, &fit)?),
                    Err(e) => log::warn!("{name}: refit at AUC={auc:.6} failed: {e}"),
                }
            }
        }

        Ok(LikelihoodRocBands { scan, curves })
    }

    /// Monte-Carlo bands from the per-sample uncertainties.
    pub fn systematics_bands(&self) -> Result<SystematicsBands> {
        let mc = McConfig { flip_sign: self.config.mc.flip_sign || self.config.flip_sign, ..self.config.mc.clone() };
        let x_grid = mc.x_grid.clone();
        let ensemble = SystematicsMonteCarlo::new(self.samples.clone(), mc)?.generate()?;
        let bands = ensemble.bands(&x_grid)?;
        let auc_intervals = ensemble
            .levels
            .iter()
            .map(|l| ensemble.auc_interval(l).map(|(lo, hi)| (l.clone(), lo, hi)))
            .collect::<Result<Vec<_>>>()?;
        Ok(SystematicsBands { ensemble, bands, auc_intervals })
    }

    /// NLL of two methods at the same AUC values on this data set.
    pub fn compare_methods(&self, a: FitMethod, b: FitMethod, aucs: &[f64]) -> Result<MethodComparison> {
        compare_methods(&self.nonresponder, &self.responder, a, b, aucs, &self.config)
    }
}

fn extremal(name: &str, fit: &FitResult) -> Result<ExtremalCurve> {
    Ok(ExtremalCurve { name: name.to_string(), auc: fit.auc, nll: fit.nll, roc: RocCurve::from_fit(fit)? })
}

/// Solve both methods at every AUC in `aucs` and pair up the NLLs.
///
/// Failures are kept as `None`; the disagreement is reported, never forced away.
pub fn compare_methods(
    nonresponder: &GroupDistribution,
    responder: &GroupDistribution,
    a: FitMethod,
    b: FitMethod,
    aucs: &[f64],
    config: &AnalysisConfig,
) -> Result<MethodComparison> {
    if aucs.is_empty() {
        return Err(Error::Validation("compare_methods needs at least one AUC".into()));
    }
    let sa = SolverKind::build(a, nonresponder, responder, config)?;
    let sb = SolverKind::build(b, nonresponder, responder, config)?;
    let points = aucs
        .iter()
        .map(|&auc| {
            let nll_a = sa.solve(Some(auc), None).map(|f| f.nll).ok();
            let nll_b = sb.solve(Some(auc), None).map(|f| f.nll).ok();
            ComparisonPoint { auc, nll_a, nll_b }
        })
        .collect::<Vec<_>>();
    let cmp = MethodComparison { method_a: a, method_b: b, points };
    if let Some(d) = cmp.max_abs_difference() {
        log::debug!("compare {} vs {}: max |ΔNLL| = {d:.3e}", sa.name(), sb.name());
    }
    Ok(cmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rp_core::Uncertainty;

    const RESPONDERS: [f64; 6] = [1.0, 1.0, 2.0, 3.0, 9.0, 10.0];
    const NONRESPONDERS: [f64; 14] =
        [2.0, 3.0, 3.0, 4.0, 6.0, 8.0, 9.0, 10.0, 10.0, 10.0, 10.0, 11.0, 12.0, 13.0];

    #[test]
    fn test_flip_sign_mirrors_auc() {
        let plain = RocAnalysis::from_values(&NONRESPONDERS, &RESPONDERS, AnalysisConfig::default()).unwrap();
        let cfg = AnalysisConfig { flip_sign: true, ..AnalysisConfig::default() };
        let flipped = RocAnalysis::from_values(&NONRESPONDERS, &RESPONDERS, cfg).unwrap();
        assert_relative_eq!(plain.nominal_roc().auc() + flipped.nominal_roc().auc(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_comparison_difference() {
        let p = ComparisonPoint { auc: 0.5, nll_a: Some(1.0), nll_b: Some(1.25) };
        assert_eq!(p.difference(), Some(0.25));
        let q = ComparisonPoint { auc: 0.6, nll_a: None, nll_b: Some(1.0) };
        assert_eq!(q.difference(), None);
    }

    #[test]
    fn test_systematics_bands_artifact() {
        let samples: Vec<Sample> = RESPONDERS
            .iter()
            .map(|&v| Sample::responder(v).with_uncertainty(Uncertainty::log_normal(1.2)))
            .chain(NONRESPONDERS.iter().map(|&v| Sample::non_responder(v).with_uncertainty(Uncertainty::log_normal(1.2))))
            .collect();
        let mut cfg = AnalysisConfig::default();
        cfg.mc.n_replicates = 100;
        let sys = RocAnalysis::new(samples, cfg).unwrap().systematics_bands().unwrap();
        let art = sys.artifact().unwrap();
        assert_eq!(art.rows.len(), 101);
        assert_eq!(art.auc_intervals.len(), 2);
        let (_, lo, hi) = &art.auc_intervals[1];
        assert!(lo <= hi);
        assert!(art.to_csv().starts_with("x,lo68,hi68,lo95,hi95\n"));
    }
}
