//! Profile likelihood scan in the AUC.
//!
//! The solver is run at every AUC of a grid, sweeping outward from the free fit
//! in both directions so each point can be seeded from its neighbour. The scan
//! reference is the smallest NLL seen (the free fit is part of the scan), and
//! confidence intervals are read off `2ΔNLL = 2(NLL − NLL_min)` by linear
//! interpolation between adjacent feasible points.
//!
//! A failed grid point is recorded and skipped; only a scan in which every
//! grid point fails is an error.

use rayon::prelude::*;
use rp_core::{AucSolver, Error, FitResult, Result};
use serde::{Deserialize, Serialize};

/// AUC values to scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AucGrid {
    /// `start, start + step, ...` up to and including `stop`.
    Range {
        /// First value.
        start: f64,
        /// Last value (inclusive, up to rounding).
        stop: f64,
        /// Spacing.
        step: f64,
    },
    /// Explicit strictly increasing values.
    Explicit(Vec<f64>),
}

impl Default for AucGrid {
    fn default() -> Self {
        Self::Range { start: 0.01, stop: 0.99, step: 0.01 }
    }
}

impl AucGrid {
    /// Materialize and validate the grid.
    pub fn values(&self) -> Result<Vec<f64>> {
        let values = match self {
            Self::Range { start, stop, step } => {
                if !(start.is_finite() && stop.is_finite() && step.is_finite()) || *step <= 0.0 {
                    return Err(Error::Validation(format!(
                        "invalid AUC grid range start={start} stop={stop} step={step}"
                    )));
                }
                if stop < start {
                    return Err(Error::Validation(format!("AUC grid stop {stop} < start {start}")));
                }
                let n = ((stop - start) / step + 1e-9).floor() as usize + 1;
                (0..n).map(|i| start + i as f64 * step).collect()
            }
            Self::Explicit(v) => {
                if v.iter().any(|x| !x.is_finite()) {
                    return Err(Error::Validation("AUC grid values must be finite".into()));
                }
                if v.windows(2).any(|w| w[1] <= w[0]) {
                    return Err(Error::Validation("AUC grid must be strictly increasing".into()));
                }
                v.clone()
            }
        };
        if values.is_empty() {
            return Err(Error::Validation("AUC grid is empty".into()));
        }
        Ok(values)
    }
}

/// A confidence level: its likelihood-ratio threshold and the matching
/// percentiles used by the Monte-Carlo bands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceLevel {
    /// Short name, e.g. `"68"`.
    pub label: String,
    /// `2ΔNLL` threshold.
    pub twice_delta_nll: f64,
    /// Lower percentile (fraction).
    pub quantile_low: f64,
    /// Upper percentile (fraction).
    pub quantile_high: f64,
}

impl ConfidenceLevel {
    /// 68% (one sigma).
    pub fn cl68() -> Self {
        Self { label: "68".into(), twice_delta_nll: 1.0, quantile_low: 0.16, quantile_high: 0.84 }
    }

    /// 95%.
    pub fn cl95() -> Self {
        Self { label: "95".into(), twice_delta_nll: 3.84, quantile_low: 0.025, quantile_high: 0.975 }
    }

    /// `[68%, 95%]`.
    pub fn defaults() -> Vec<Self> {
        vec![Self::cl68(), Self::cl95()]
    }
}

/// Scan settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// AUC grid.
    pub grid: AucGrid,
    /// Confidence levels to report.
    pub levels: Vec<ConfidenceLevel>,
    /// Seed each point from the previous feasible one.
    pub warm_start: bool,
    /// Run independent work on the rayon pool.
    pub parallel: bool,
    /// Bisections between the last feasible and first failed grid point.
    pub refine_boundary: u32,
    /// Allowed `NLL_free − NLL_min` before the scan is flagged inconsistent.
    pub consistency_tol: f64,
    /// Allowed decrease of `2ΔNLL` moving away from the minimum.
    pub monotonicity_tol: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            grid: AucGrid::default(),
            levels: ConfidenceLevel::defaults(),
            warm_start: true,
            parallel: false,
            refine_boundary: 0,
            consistency_tol: 1e-6,
            monotonicity_tol: 1e-6,
        }
    }
}

/// One scanned AUC value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilePoint {
    /// Requested AUC (the achieved AUC for the free fit).
    pub target_auc: f64,
    /// Fit, when the solver succeeded.
    pub fit: Option<FitResult>,
    /// `2(NLL − NLL_min)`, when the solver succeeded.
    pub twice_delta_nll: Option<f64>,
    /// Failure description, when it did not.
    pub failure: Option<String>,
    /// Unconstrained fit.
    pub is_free_fit: bool,
    /// Added by boundary refinement rather than taken from the grid.
    pub refined: bool,
}

impl ProfilePoint {
    fn feasible(target_auc: f64, fit: FitResult) -> Self {
        Self {
            target_auc,
            fit: Some(fit),
            twice_delta_nll: None,
            failure: None,
            is_free_fit: false,
            refined: false,
        }
    }

    fn failed(target_auc: f64, err: &Error) -> Self {
        Self {
            target_auc,
            fit: None,
            twice_delta_nll: None,
            failure: Some(err.to_string()),
            is_free_fit: false,
            refined: false,
        }
    }

    /// NLL of the fit, if feasible.
    pub fn nll(&self) -> Option<f64> {
        self.fit.as_ref().map(|f| f.nll)
    }

    /// Whether the solver succeeded here.
    pub fn is_feasible(&self) -> bool {
        self.fit.is_some()
    }
}

/// One end of a confidence interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    /// Interpolated crossing of the threshold.
    Closed(f64),
    /// The threshold was not crossed before the feasible points ran out.
    Open {
        /// Outermost feasible AUC reached in this direction.
        last_feasible: f64,
    },
}

impl Bound {
    /// Crossing value, if closed.
    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Closed(v) => Some(*v),
            Self::Open { .. } => None,
        }
    }
}

/// Interval at one confidence level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// Level.
    pub level: ConfidenceLevel,
    /// Lower end.
    pub lower: Bound,
    /// Upper end.
    pub upper: Bound,
}

impl ConfidenceInterval {
    /// Both ends crossed.
    pub fn is_closed(&self) -> bool {
        matches!((self.lower, self.upper), (Bound::Closed(_), Bound::Closed(_)))
    }

    /// Whether `auc` lies inside (open ends extend to their last feasible point).
    pub fn contains(&self, auc: f64) -> bool {
        let lo = match self.lower {
            Bound::Closed(v) | Bound::Open { last_feasible: v } => v,
        };
        let hi = match self.upper {
            Bound::Closed(v) | Bound::Open { last_feasible: v } => v,
        };
        lo <= auc && auc <= hi
    }
}

/// Self-consistency report of a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanDiagnostics {
    /// AUC of the unconstrained fit.
    pub free_auc: f64,
    /// AUC of the lowest-NLL point.
    pub min_auc: f64,
    /// `NLL_free − NLL_min` (zero when the free fit is the minimum).
    pub consistency_gap: f64,
    /// Gap within tolerance.
    pub consistent: bool,
    /// Points where `2ΔNLL` decreases moving away from the minimum.
    pub non_monotone: Vec<f64>,
    /// Grid points that failed.
    pub n_failed: usize,
    /// Grid points that succeeded (free fit excluded).
    pub n_feasible: usize,
}

/// Result of [`LikelihoodScanner::scan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileLikelihoodScan {
    /// Solver name.
    pub method: String,
    /// AUC of the unconstrained fit.
    pub auc_hat: f64,
    /// NLL of the unconstrained fit.
    pub nll_hat: f64,
    /// Points sorted by AUC, free fit included.
    pub points: Vec<ProfilePoint>,
    /// One interval per configured level.
    pub intervals: Vec<ConfidenceInterval>,
    /// Self-consistency report.
    pub diagnostics: ScanDiagnostics,
}

impl ProfileLikelihoodScan {
    /// Reference NLL (smallest over feasible points).
    pub fn min_nll(&self) -> f64 {
        self.points.iter().filter_map(ProfilePoint::nll).fold(f64::INFINITY, f64::min)
    }

    /// `(AUC, 2ΔNLL)` over feasible points, sorted by AUC.
    pub fn twice_delta_nll(&self) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .filter_map(|p| p.twice_delta_nll.map(|d| (p.target_auc, d)))
            .collect()
    }

    /// Interval with the given label.
    pub fn interval(&self, label: &str) -> Option<&ConfidenceInterval> {
        self.intervals.iter().find(|ci| ci.level.label == label)
    }

    /// All intervals.
    pub fn intervals(&self) -> &[ConfidenceInterval] {
        &self.intervals
    }

    /// Feasible point nearest to `auc`.
    pub fn nearest_fit(&self, auc: f64) -> Option<&FitResult> {
        self.points
            .iter()
            .filter_map(|p| p.fit.as_ref().map(|f| (p.target_auc, f)))
            .min_by(|a, b| (a.0 - auc).abs().total_cmp(&(b.0 - auc).abs()))
            .map(|(_, f)| f)
    }
}

/// First crossing of `threshold` walking outward from `points[start]`.
fn crossing(points: &[(f64, f64)], start: usize, threshold: f64, upward: bool) -> Bound {
    let mut prev = points[start];
    let mut step = |i: usize| -> Option<Bound> {
        let cur = points[i];
        if cur.1 >= threshold {
            let t = if cur.1 > prev.1 { (threshold - prev.1) / (cur.1 - prev.1) } else { 1.0 };
            return Some(Bound::Closed(prev.0 + t.clamp(0.0, 1.0) * (cur.0 - prev.0)));
        }
        prev = cur;
        None
    };
    let found = if upward {
        (start + 1..points.len()).find_map(&mut step)
    } else {
        (0..start).rev().find_map(&mut step)
    };
    found.unwrap_or(Bound::Open { last_feasible: prev.0 })
}

/// Grid sweep driver.
#[derive(Debug, Clone, Default)]
pub struct LikelihoodScanner {
    config: ScanConfig,
}

impl LikelihoodScanner {
    /// Scanner with the given settings.
    pub fn new(config: ScanConfig) -> Self {
        Self { config }
    }

    /// Settings.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    fn solve_point(&self, solver: &dyn AucSolver, target: f64, warm: Option<&FitResult>) -> Result<FitResult> {
        let seed = warm.map(FitResult::warm_start);
        let res = solver.solve(Some(target), seed.as_ref());
        match &res {
            Ok(fit) => log::debug!(
                "{} scan: AUC={target:.6} nll={:.8} iters={}",
                solver.name(),
                fit.nll,
                fit.n_iter
            ),
            Err(e) => log::warn!("{} scan: AUC={target:.6} failed: {e}", solver.name()),
        }
        res
    }

    /// Sweep `targets` in order, carrying the last feasible fit.
    fn sweep(&self, solver: &dyn AucSolver, free: &FitResult, targets: &[f64]) -> Vec<ProfilePoint> {
        let mut out = Vec::with_capacity(targets.len());
        let mut carried = free.clone();
        let mut last_ok = Some(free.auc);
        for &t in targets {
            let warm = self.config.warm_start.then_some(&carried);
            match self.solve_point(solver, t, warm) {
                Ok(fit) => {
                    carried = fit.clone();
                    last_ok = Some(t);
                    out.push(ProfilePoint::feasible(t, fit));
                }
                Err(e) => {
                    if let Some(lo) = last_ok.take() {
                        self.refine(solver, &mut carried, lo, t, &mut out);
                    }
                    out.push(ProfilePoint::failed(t, &e));
                }
            }
        }
        out
    }

    /// Bisect between a feasible `lo` and a failed `hi`.
    fn refine(
        &self,
        solver: &dyn AucSolver,
        carried: &mut FitResult,
        mut lo: f64,
        mut hi: f64,
        out: &mut Vec<ProfilePoint>,
    ) {
        for _ in 0..self.config.refine_boundary {
            let mid = 0.5 * (lo + hi);
            let warm = self.config.warm_start.then_some(&*carried);
            match self.solve_point(solver, mid, warm) {
                Ok(fit) => {
                    *carried = fit.clone();
                    let mut p = ProfilePoint::feasible(mid, fit);
                    p.refined = true;
                    out.push(p);
                    lo = mid;
                }
                Err(_) => hi = mid,
            }
        }
        if self.config.refine_boundary > 0 {
            log::debug!("{} scan: feasibility edge in [{lo:.6}, {hi:.6}]", solver.name());
        }
    }

    /// Run the scan.
    pub fn scan(&self, solver: &dyn AucSolver) -> Result<ProfileLikelihoodScan> {
        let grid = self.config.grid.values()?;
        let free = solver.solve(None, None)?;
        let auc_hat = free.auc;
        let nll_hat = free.nll;

        let mut below: Vec<f64> = grid.iter().copied().filter(|&a| a < auc_hat - 1e-12).collect();
        below.reverse();
        let above: Vec<f64> = grid.iter().copied().filter(|&a| a > auc_hat + 1e-12).collect();

        let mut points = if self.config.warm_start {
            if self.config.parallel {
                let (mut lo, hi) =
                    rayon::join(|| self.sweep(solver, &free, &below), || self.sweep(solver, &free, &above));
                lo.extend(hi);
                lo
            } else {
                let mut lo = self.sweep(solver, &free, &below);
                lo.extend(self.sweep(solver, &free, &above));
                lo
            }
        } else {
            let targets: Vec<f64> = below.iter().chain(&above).copied().collect();
            let solve = |&t: &f64| match self.solve_point(solver, t, None) {
                Ok(fit) => ProfilePoint::feasible(t, fit),
                Err(e) => ProfilePoint::failed(t, &e),
            };
            if self.config.parallel {
                targets.par_iter().map(solve).collect()
            } else {
                targets.iter().map(solve).collect()
            }
        };

        let n_feasible = points.iter().filter(|p| p.is_feasible() && !p.refined).count();
        let n_failed = points.iter().filter(|p| !p.is_feasible()).count();
        if n_feasible == 0 && n_failed > 0 {
            return Err(Error::ScanInfeasible(format!(
                "{}: all {n_failed} grid points failed",
                solver.name()
            )));
        }

        let mut free_point = ProfilePoint::feasible(auc_hat, free);
        free_point.is_free_fit = true;
        points.push(free_point);
        points.sort_by(|a, b| a.target_auc.total_cmp(&b.target_auc));

        let min_nll = points.iter().filter_map(ProfilePoint::nll).fold(f64::INFINITY, f64::min);
        for p in &mut points {
            p.twice_delta_nll = p.nll().map(|nll| 2.0 * (nll - min_nll));
        }

        let curve: Vec<(f64, f64)> = points
            .iter()
            .filter_map(|p| p.twice_delta_nll.map(|d| (p.target_auc, d)))
            .collect();
        let min_idx = curve
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.1.total_cmp(&b.1.1))
            .map_or(0, |(i, _)| i);
        let min_auc = curve[min_idx].0;

        let consistency_gap = nll_hat - min_nll;
        let consistent = consistency_gap <= self.config.consistency_tol;
        if !consistent {
            log::warn!(
                "{} scan: free fit NLL exceeds scan minimum by {consistency_gap:.3e} (free AUC={auc_hat:.6}, min at {min_auc:.6})",
                solver.name()
            );
        }

        let mut non_monotone = Vec::new();
        for w in curve[min_idx..].windows(2) {
            if w[1].1 < w[0].1 - self.config.monotonicity_tol {
                non_monotone.push(w[1].0);
            }
        }
        for w in curve[..=min_idx].windows(2) {
            if w[0].1 < w[1].1 - self.config.monotonicity_tol {
                non_monotone.push(w[0].0);
            }
        }
        non_monotone.sort_by(f64::total_cmp);
        if !non_monotone.is_empty() {
            log::warn!("{} scan: non-monotone 2ΔNLL at AUC {non_monotone:?}", solver.name());
        }

        let intervals = self
            .config
            .levels
            .iter()
            .map(|level| ConfidenceInterval {
                level: level.clone(),
                lower: crossing(&curve, min_idx, level.twice_delta_nll, false),
                upper: crossing(&curve, min_idx, level.twice_delta_nll, true),
            })
            .collect();

        Ok(ProfileLikelihoodScan {
            method: solver.name().to_string(),
            auc_hat,
            nll_hat,
            points,
            intervals,
            diagnostics: ScanDiagnostics {
                free_auc: auc_hat,
                min_auc,
                consistency_gap,
                consistent,
                non_monotone,
                n_failed,
                n_feasible,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rp_core::{FailureReason, FittedCurve, WarmStart};

    /// NLL = 50·(A − 0.6)², feasible on [0.305, 0.745).
    struct Parabola;

    impl AucSolver for Parabola {
        fn name(&self) -> &str {
            "parabola"
        }

        fn nominal_auc(&self) -> f64 {
            0.6
        }

        fn solve(&self, target: Option<f64>, _warm: Option<&WarmStart>) -> Result<FitResult> {
            let a = target.unwrap_or(0.6);
            if !(0.305..0.745).contains(&a) {
                return Err(Error::optimization(target, FailureReason::Infeasible("edge".into())));
            }
            Ok(FitResult {
                target_auc: target,
                auc: a,
                nll: 50.0 * (a - 0.6).powi(2),
                converged: true,
                curve: FittedCurve::Continuous { t: vec![], x: vec![], y: vec![] },
                multipliers: None,
                n_iter: 1,
                warnings: vec![],
                message: String::new(),
            })
        }
    }

    /// The parabola with a local dip of 0.15 around A = 0.66.
    struct Dip;

    impl AucSolver for Dip {
        fn name(&self) -> &str {
            "dip"
        }

        fn nominal_auc(&self) -> f64 {
            0.6
        }

        fn solve(&self, target: Option<f64>, warm: Option<&WarmStart>) -> Result<FitResult> {
            let mut fit = Parabola.solve(target, warm)?;
            if (0.655..0.665).contains(&fit.auc) {
                fit.nll -= 0.15;
            }
            Ok(fit)
        }
    }

    fn scan_with(config: ScanConfig) -> ProfileLikelihoodScan {
        LikelihoodScanner::new(config).scan(&Parabola).unwrap()
    }

    #[test]
    fn test_grid_values() {
        let g = AucGrid::Range { start: 0.1, stop: 0.3, step: 0.1 };
        let v = g.values().unwrap();
        assert_eq!(v.len(), 3);
        assert_relative_eq!(v[2], 0.3, epsilon = 1e-12);
        assert!(AucGrid::Explicit(vec![0.2, 0.1]).values().is_err());
        assert!(AucGrid::Range { start: 0.1, stop: 0.3, step: 0.0 }.values().is_err());
    }

    #[test]
    fn test_intervals_of_parabola() {
        let scan = scan_with(ScanConfig::default());
        // 2ΔNLL = 100·(A − 0.6)² crosses 1 at ±0.1; grid is linear around there
        let ci = scan.interval("68").unwrap();
        assert!(ci.is_closed());
        assert_relative_eq!(ci.lower.value().unwrap(), 0.5, epsilon = 1e-3);
        assert_relative_eq!(ci.upper.value().unwrap(), 0.7, epsilon = 1e-3);
        // 95% crossing at ±0.196: below closes, above runs into the feasibility edge
        let ci95 = scan.interval("95").unwrap();
        assert!(ci95.lower.value().is_some());
        assert_eq!(ci95.upper.value(), None);
        if let Bound::Open { last_feasible } = ci95.upper {
            assert_relative_eq!(last_feasible, 0.74, epsilon = 1e-9);
        }
        assert!(scan.diagnostics.consistent);
        assert!(scan.diagnostics.non_monotone.is_empty());
        assert!(scan.diagnostics.n_failed > 0);
    }

    #[test]
    fn test_dip_is_reported_and_intervals_survive() {
        let grid = AucGrid::Explicit(vec![0.45, 0.5, 0.55, 0.62, 0.64, 0.66, 0.68, 0.72]);
        let scan = LikelihoodScanner::new(ScanConfig { grid, ..ScanConfig::default() }).scan(&Dip).unwrap();
        assert_eq!(scan.diagnostics.non_monotone.len(), 1);
        assert_relative_eq!(scan.diagnostics.non_monotone[0], 0.66, epsilon = 1e-12);
        assert!(scan.diagnostics.consistent);
        let ci = scan.interval("68").unwrap();
        assert!(ci.is_closed());
        // 2ΔNLL is 0.64 at 0.68 and 1.44 at 0.72
        assert_relative_eq!(ci.upper.value().unwrap(), 0.698, epsilon = 1e-9);
        assert_relative_eq!(ci.lower.value().unwrap(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn test_free_point_is_minimum() {
        let scan = scan_with(ScanConfig::default());
        let free = scan.points.iter().find(|p| p.is_free_fit).unwrap();
        assert_eq!(free.twice_delta_nll, Some(0.0));
        assert_eq!(scan.min_nll(), 0.0);
        assert!(scan.points.windows(2).all(|w| w[0].target_auc <= w[1].target_auc));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let seq = scan_with(ScanConfig { warm_start: false, ..ScanConfig::default() });
        let par = scan_with(ScanConfig { warm_start: false, parallel: true, ..ScanConfig::default() });
        assert_eq!(seq.twice_delta_nll(), par.twice_delta_nll());
    }

    #[test]
    fn test_refinement_tightens_edge() {
        let scan = scan_with(ScanConfig { refine_boundary: 6, ..ScanConfig::default() });
        let refined: Vec<f64> = scan.points.iter().filter(|p| p.refined).map(|p| p.target_auc).collect();
        assert!(refined.iter().any(|&a| a > 0.74 && a < 0.745));
        assert!(refined.iter().any(|&a| a >= 0.305 && a < 0.31));
    }

    #[test]
    fn test_all_points_failing_is_error() {
        let cfg = ScanConfig { grid: AucGrid::Explicit(vec![0.9, 0.95]), ..ScanConfig::default() };
        let err = LikelihoodScanner::new(cfg).scan(&Parabola).unwrap_err();
        assert!(matches!(err, Error::ScanInfeasible(_)));
    }

    #[test]
    fn test_crossing_interpolates_or_stays_open() {
        let pts = [(0.4, 0.5), (0.5, 0.0), (0.6, 0.2)];
        assert_eq!(crossing(&pts, 1, 1.0, true), Bound::Open { last_feasible: 0.6 });
        let lower = crossing(&pts, 1, 0.25, false).value().unwrap();
        assert_relative_eq!(lower, 0.45, epsilon = 1e-12);
    }
}
