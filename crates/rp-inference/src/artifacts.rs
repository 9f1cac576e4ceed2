//! Serializable outputs for plotting and reports.
//!
//! Plotting itself lives outside this workspace; these artifacts are the
//! hand-off format: ordered `(AUC, 2ΔNLL)` pairs with interval bounds, and
//! `(x, lo68, hi68, lo95, hi95)` band rows.
//!
//! The `schema_version` field tracks breaking changes. Current: `"1.0.0"`.

use serde::{Deserialize, Serialize};

use crate::profile_likelihood::{Bound, ConfidenceInterval, ProfileLikelihoodScan};
use crate::roc::RocCurve;
use crate::systematics_mc::McBands;

/// Current schema version.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Single point in a profile curve artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileCurvePoint {
    /// Scanned AUC.
    pub auc: f64,
    /// NLL at `auc`.
    pub nll: f64,
    /// `2(NLL − NLL_min)`.
    pub twice_delta_nll: f64,
    /// Solver iterations.
    pub n_iter: u64,
    /// Any numerical warning recorded on the fit.
    pub unstable: bool,
}

/// Interval bounds in flat form (`None` for an open end).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalArtifact {
    /// Level label.
    pub label: String,
    /// `2ΔNLL` threshold.
    pub twice_delta_nll: f64,
    /// Lower crossing.
    pub lower: Option<f64>,
    /// Upper crossing.
    pub upper: Option<f64>,
    /// Last feasible AUC below, when the lower end is open.
    pub lower_open_at: Option<f64>,
    /// Last feasible AUC above, when the upper end is open.
    pub upper_open_at: Option<f64>,
}

impl From<&ConfidenceInterval> for IntervalArtifact {
    fn from(ci: &ConfidenceInterval) -> Self {
        let open = |b: Bound| match b {
            Bound::Open { last_feasible } => Some(last_feasible),
            Bound::Closed(_) => None,
        };
        Self {
            label: ci.level.label.clone(),
            twice_delta_nll: ci.level.twice_delta_nll,
            lower: ci.lower.value(),
            upper: ci.upper.value(),
            lower_open_at: open(ci.lower),
            upper_open_at: open(ci.upper),
        }
    }
}

/// Plot-friendly artifact for an AUC profile scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileCurveArtifact {
    /// Schema version.
    pub schema_version: String,
    /// Solver name.
    pub method: String,
    /// Free-fit AUC.
    pub auc_hat: f64,
    /// Free-fit NLL.
    pub nll_hat: f64,
    /// Feasible points.
    pub points: Vec<ProfileCurvePoint>,
    /// AUC values that failed.
    pub failed: Vec<f64>,
    /// Scan x-values (same as `points[*].auc`).
    pub auc_values: Vec<f64>,
    /// `2ΔNLL` aligned with `auc_values`.
    pub twice_delta_nll: Vec<f64>,
    /// Intervals.
    pub intervals: Vec<IntervalArtifact>,
}

impl From<&ProfileLikelihoodScan> for ProfileCurveArtifact {
    fn from(scan: &ProfileLikelihoodScan) -> Self {
        let mut points = Vec::with_capacity(scan.points.len());
        let mut failed = Vec::new();
        let mut auc_values = Vec::with_capacity(scan.points.len());
        let mut twice_delta_nll = Vec::with_capacity(scan.points.len());

        for p in &scan.points {
            match (&p.fit, p.twice_delta_nll) {
                (Some(fit), Some(d)) => {
                    auc_values.push(p.target_auc);
                    twice_delta_nll.push(d);
                    points.push(ProfileCurvePoint {
                        auc: p.target_auc,
                        nll: fit.nll,
                        twice_delta_nll: d,
                        n_iter: fit.n_iter,
                        unstable: fit.is_unstable(),
                    });
                }
                _ => failed.push(p.target_auc),
            }
        }

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            method: scan.method.clone(),
            auc_hat: scan.auc_hat,
            nll_hat: scan.nll_hat,
            points,
            failed,
            auc_values,
            twice_delta_nll,
            intervals: scan.intervals.iter().map(IntervalArtifact::from).collect(),
        }
    }
}

impl ProfileCurveArtifact {
    /// Serialize to pretty JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Columns: `auc,nll,twice_delta_nll`
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("auc,nll,twice_delta_nll\n");
        for p in &self.points {
            csv.push_str(&format!("{},{},{}\n", p.auc, p.nll, p.twice_delta_nll));
        }
        csv
    }
}

/// Named ROC curve with its AUC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocCurveArtifact {
    /// Curve name (`nominal`, `m68`, ...).
    pub name: String,
    /// Area under the curve.
    pub auc: f64,
    /// NLL of the fit that produced the curve, if any.
    pub nll: Option<f64>,
    /// `x` values.
    pub x: Vec<f64>,
    /// `y` values.
    pub y: Vec<f64>,
}

impl RocCurveArtifact {
    /// Wrap a curve.
    pub fn new(name: impl Into<String>, curve: &RocCurve, nll: Option<f64>) -> Self {
        Self { name: name.into(), auc: curve.auc(), nll, x: curve.x.clone(), y: curve.y.clone() }
    }
}

/// Monte-Carlo band artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McBandArtifact {
    /// Schema version.
    pub schema_version: String,
    /// Replicates behind the bands.
    pub n_replicates: usize,
    /// AUC of the unperturbed samples.
    pub nominal_auc: f64,
    /// `(label, lower, upper)` AUC percentile intervals.
    pub auc_intervals: Vec<(String, f64, f64)>,
    /// `(x, lo68, hi68, lo95, hi95)` rows.
    pub rows: Vec<[f64; 5]>,
    /// Unperturbed curve on the band grid.
    pub nominal: Vec<f64>,
}

impl McBandArtifact {
    /// Serialize to pretty JSON string.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Columns: `x,lo68,hi68,lo95,hi95`
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("x,lo68,hi68,lo95,hi95\n");
        for r in &self.rows {
            csv.push_str(&format!("{},{},{},{},{}\n", r[0], r[1], r[2], r[3], r[4]));
        }
        csv
    }

    /// Assemble from computed bands.
    pub fn new(
        n_replicates: usize,
        nominal_auc: f64,
        auc_intervals: Vec<(String, f64, f64)>,
        bands: &McBands,
    ) -> rp_core::Result<Self> {
        Ok(Self {
            schema_version: SCHEMA_VERSION.to_string(),
            n_replicates,
            nominal_auc,
            auc_intervals,
            rows: bands.rows()?,
            nominal: bands.nominal.clone(),
        })
    }
}
