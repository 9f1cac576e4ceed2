//! Core data types shared by the solvers.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Which of the two compared populations a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Group {
    /// Counts toward the true-positive axis (`y`).
    Responder,
    /// Counts toward the false-positive axis (`x`).
    NonResponder,
}

/// Shape of a per-sample nuisance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UncertaintyKind {
    /// `t -> t * scale^z`; `scale` is the multiplicative factor κ > 0.
    LogNormal,
    /// `t -> k'/scale` with `k' ~ Poisson(t * scale)`; `scale` is the exposure.
    Poisson,
    /// `t -> t + scale * z`.
    Gaussian,
    /// `t -> k'/d'` with `k' ~ Poisson(t * scale)` and an independent
    /// `d' ~ Poisson(scale)` conditioned on `d' > 0`; `scale` is the denominator count.
    #[serde(rename = "poisson_ratio")]
    PoissonRatio,
}

/// One uncertainty source attached to a sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Uncertainty {
    /// Distribution family.
    pub kind: UncertaintyKind,
    /// Family-specific scale (see [`UncertaintyKind`]).
    pub scale: f64,
    /// Samples sharing a group id share one draw per replicate.
    #[serde(default)]
    pub correlation_group: Option<String>,
}

impl Uncertainty {
    /// Multiplicative log-normal nuisance with factor `kappa`.
    pub fn log_normal(kappa: f64) -> Self {
        Self { kind: UncertaintyKind::LogNormal, scale: kappa, correlation_group: None }
    }

    /// Counting nuisance with the given exposure (1 for a plain count).
    pub fn poisson(exposure: f64) -> Self {
        Self { kind: UncertaintyKind::Poisson, scale: exposure, correlation_group: None }
    }

    /// Ratio of two counts, the denominator being `denominator`.
    pub fn poisson_ratio(denominator: f64) -> Self {
        Self { kind: UncertaintyKind::PoissonRatio, scale: denominator, correlation_group: None }
    }

    /// Additive Gaussian nuisance with standard deviation `sigma`.
    pub fn gaussian(sigma: f64) -> Self {
        Self { kind: UncertaintyKind::Gaussian, scale: sigma, correlation_group: None }
    }

    /// Tag this source with a correlation group.
    pub fn correlated(mut self, group: impl Into<String>) -> Self {
        self.correlation_group = Some(group.into());
        self
    }

    /// Check the scale against the family.
    pub fn validate(&self) -> Result<()> {
        let ok = match self.kind {
            UncertaintyKind::LogNormal => self.scale.is_finite() && self.scale > 0.0,
            UncertaintyKind::Poisson | UncertaintyKind::PoissonRatio => self.scale.is_finite() && self.scale > 0.0,
            UncertaintyKind::Gaussian => self.scale.is_finite() && self.scale >= 0.0,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::Validation(format!("invalid {:?} scale {}", self.kind, self.scale)))
        }
    }
}

/// A single scalar measurement. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Measured value `t`.
    pub value: f64,
    /// Population label.
    pub group: Group,
    /// Nuisances, possibly none.
    #[serde(default)]
    pub uncertainties: Vec<Uncertainty>,
}

impl Sample {
    /// Sample without uncertainties.
    pub fn new(value: f64, group: Group) -> Self {
        Self { value, group, uncertainties: Vec::new() }
    }

    /// Builder-style: attach an uncertainty.
    pub fn with_uncertainty(mut self, u: Uncertainty) -> Self {
        self.uncertainties.push(u);
        self
    }

    /// Responder sample.
    pub fn responder(value: f64) -> Self {
        Self::new(value, Group::Responder)
    }

    /// Non-responder sample.
    pub fn non_responder(value: f64) -> Self {
        Self::new(value, Group::NonResponder)
    }
}

/// Split samples into `(responders, non_responders)` values.
pub fn split_groups(samples: &[Sample]) -> (Vec<f64>, Vec<f64>) {
    let mut responders = Vec::new();
    let mut non_responders = Vec::new();
    for s in samples {
        match s.group {
            Group::Responder => responders.push(s.value),
            Group::NonResponder => non_responders.push(s.value),
        }
    }
    (responders, non_responders)
}

/// Constants of the stationarity conditions
/// `ẋ = 2Ẋ/(Λy + c1)`, `ẏ = 2Ẏ/(c2 − Λx)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Multipliers {
    /// AUC Lagrange multiplier Λ.
    pub lambda: f64,
    /// Normalization constant of the non-responder equation.
    pub c1: f64,
    /// Normalization constant of the responder equation.
    pub c2: f64,
}

impl Multipliers {
    /// Values at the unconstrained optimum (`Λ = 0`).
    pub fn nominal(n_nonresponder: f64, n_responder: f64) -> Self {
        Self { lambda: 0.0, c1: 2.0 * n_nonresponder, c2: 2.0 * n_responder }
    }

    /// Multipliers implied by `Λ` and the achieved AUC.
    pub fn from_lambda(lambda: f64, auc: f64, n_nonresponder: f64, n_responder: f64) -> Self {
        Self {
            lambda,
            c1: 2.0 * n_nonresponder - lambda * auc,
            c2: 2.0 * n_responder + lambda * (1.0 - auc),
        }
    }

    /// Residual of the dropped relation `Λ(2A − 1) + c1 + c2 = 2(N_X + N_Y)`.
    pub fn relation_residual(&self, auc: f64, n_nonresponder: f64, n_responder: f64) -> f64 {
        self.lambda * (2.0 * auc - 1.0) + self.c1 + self.c2
            - 2.0 * (n_nonresponder + n_responder)
    }
}

/// Fitted curve parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FittedCurve {
    /// Point masses on each group's observed support.
    Weights {
        /// Non-responder support points (strictly increasing).
        nonresponder_support: Vec<f64>,
        /// Non-responder weights (sum to 1).
        nonresponder: Vec<f64>,
        /// Responder support points (strictly increasing).
        responder_support: Vec<f64>,
        /// Responder weights (sum to 1).
        responder: Vec<f64>,
    },
    /// Sampled solution of the continuous boundary-value problem.
    Continuous {
        /// Threshold grid.
        t: Vec<f64>,
        /// Non-responder CDF on `t`.
        x: Vec<f64>,
        /// Responder CDF on `t`.
        y: Vec<f64>,
    },
}

/// Non-fatal numerical diagnostic recorded on a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NumericalWarning {
    /// A stationarity denominator came close to zero.
    SmallDenominator {
        /// Smallest denominator seen.
        value: f64,
    },
    /// The dropped multiplier relation is not satisfied.
    MultiplierRelation {
        /// Residual of the relation.
        residual: f64,
    },
    /// Fitted weights or CDF endpoints drifted from 1.
    NormalizationDrift {
        /// Largest deviation from 1.
        residual: f64,
    },
}

/// Best fit at one AUC value (or the free fit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    /// Requested AUC (`None` for the unconstrained fit).
    pub target_auc: Option<f64>,
    /// AUC of the fitted curve.
    pub auc: f64,
    /// Negative log-likelihood at the fit.
    pub nll: f64,
    /// Whether the solver met its tolerances.
    pub converged: bool,
    /// Fitted curve.
    pub curve: FittedCurve,
    /// Stationarity constants, when the formulation defines them.
    pub multipliers: Option<Multipliers>,
    /// Solver iterations (outer iterations for nested solvers).
    pub n_iter: u64,
    /// Numerical diagnostics.
    pub warnings: Vec<NumericalWarning>,
    /// Solver message.
    pub message: String,
}

impl FitResult {
    /// State to seed the next fit of a continuation sweep.
    pub fn warm_start(&self) -> WarmStart {
        WarmStart { auc: self.auc, multipliers: self.multipliers, curve: Some(self.curve.clone()) }
    }

    /// `true` when any numerical warning was recorded.
    pub fn is_unstable(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Carried state between consecutive fits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmStart {
    /// AUC the state was converged at.
    pub auc: f64,
    /// Multipliers at that AUC.
    pub multipliers: Option<Multipliers>,
    /// Curve at that AUC.
    pub curve: Option<FittedCurve>,
}
