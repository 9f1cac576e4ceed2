//! Analysis configuration.
//!
//! Every section has defaults, so a JSON file only needs the fields it
//! overrides:
//!
//! ```json
//! { "method": "delta-functions", "scan": { "grid": { "range": { "start": 0.5, "stop": 0.95, "step": 0.01 } } } }
//! ```

use std::path::Path;

use rp_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::delta::DeltaConfig;
use crate::discrete::DiscreteConfig;
use crate::profile_likelihood::ScanConfig;
use crate::solver::FitMethod;
use crate::systematics_mc::McConfig;
use crate::variational::{Bandwidth, VariationalConfig};

/// All settings of a ROC analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Formulation used by the likelihood scan.
    pub method: FitMethod,
    /// Negate every measurement (maps AUC to 1 − AUC).
    pub flip_sign: bool,
    /// Discrete solver.
    pub discrete: DiscreteConfig,
    /// Delta-function solver.
    pub delta: DeltaConfig,
    /// Variational solver.
    pub variational: VariationalConfig,
    /// Likelihood scan.
    pub scan: ScanConfig,
    /// Systematics Monte Carlo.
    pub mc: McConfig,
}

impl AnalysisConfig {
    /// Parse from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings no solver can run with.
    pub fn validate(&self) -> Result<()> {
        self.scan.grid.values()?;
        for level in self.scan.levels.iter().chain(&self.mc.levels) {
            if level.twice_delta_nll.is_nan()
                || level.twice_delta_nll <= 0.0
                || !(0.0..=1.0).contains(&level.quantile_low)
                || !(0.0..=1.0).contains(&level.quantile_high)
                || level.quantile_low > level.quantile_high
            {
                return Err(Error::Validation(format!("invalid confidence level {level:?}")));
            }
        }
        if self.mc.n_replicates == 0 {
            return Err(Error::Validation("mc.n_replicates must be > 0".into()));
        }
        if let Bandwidth::Fixed(h) = self.variational.bandwidth {
            if !h.is_finite() || h <= 0.0 {
                return Err(Error::Validation(format!("variational.bandwidth must be > 0, got {h}")));
            }
        }
        let tol = self.variational.auc_match_tol;
        if !tol.is_finite() || tol <= 0.0 {
            return Err(Error::Validation(format!("variational.auc_match_tol must be > 0, got {tol}")));
        }
        for (name, step) in
            [("delta", self.delta.continuation.step), ("variational", self.variational.continuation.step)]
        {
            if !step.is_finite() || step <= 0.0 {
                return Err(Error::Validation(format!("{name}.continuation.step must be > 0, got {step}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile_likelihood::AucGrid;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let cfg = AnalysisConfig::from_json_str(
            r#"{ "method": "variational", "scan": { "grid": { "explicit": [0.6, 0.7] }, "refine_boundary": 3 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.method, FitMethod::Variational);
        assert_eq!(cfg.scan.grid, AucGrid::Explicit(vec![0.6, 0.7]));
        assert_eq!(cfg.scan.refine_boundary, 3);
        assert!(cfg.scan.warm_start);
        assert_eq!(cfg.mc.n_replicates, 1000);
        assert_eq!(cfg.scan.levels.len(), 2);
    }

    #[test]
    fn test_round_trip() {
        let cfg = AnalysisConfig::default();
        let back = AnalysisConfig::from_json_str(&cfg.to_json().unwrap()).unwrap();
        assert_eq!(back.scan.grid, cfg.scan.grid);
        assert_eq!(back.mc.x_grid, cfg.mc.x_grid);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(AnalysisConfig::from_json_str(r#"{ "mc": { "n_replicates": 0 } }"#).is_err());
        assert!(
            AnalysisConfig::from_json_str(r#"{ "scan": { "grid": { "explicit": [0.7, 0.6] } } }"#).is_err()
        );
        assert!(AnalysisConfig::from_json_str("{ not json").is_err());
        assert!(
            AnalysisConfig::from_json_str(r#"{ "variational": { "bandwidth": { "fixed": -1.0 } } }"#).is_err()
        );
        assert!(AnalysisConfig::from_json_str(r#"{ "variational": { "auc_match_tol": 0.0 } }"#).is_err());
    }
}
