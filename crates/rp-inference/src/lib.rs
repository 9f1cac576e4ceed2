//! # rp-inference
//!
//! Confidence bands for ROC curves and their AUC.
//!
//! This crate provides:
//! - constrained maximum likelihood at fixed AUC (discrete weights,
//!   closed-form delta functions, kernel-smoothed variational curves)
//! - profile likelihood scans in the AUC with 68%/95% intervals
//! - systematics-only Monte-Carlo ROC bands
//!
//! ## Architecture
//!
//! The scanner talks to the three formulations only through the
//! [`rp_core::AucSolver`] trait; [`SolverKind`] selects one of them from
//! configuration. Numerical back ends (L-BFGS, augmented Lagrangian, Newton,
//! RK45, continuation) are small internal modules the solvers share.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// End-to-end analyses: likelihood bands, systematics bands, method comparison.
pub mod analysis;
/// Serializable scan and band outputs.
pub mod artifacts;
/// Analysis configuration (JSON).
pub mod config;
/// Equality-constrained minimization (augmented Lagrangian).
pub mod constrained;
/// Continuation in the target AUC for shooting formulations.
pub mod continuation;
/// Closed-form delta-function solver.
pub mod delta;
/// Discrete constrained MLE over support-point weights.
pub mod discrete;
/// Damped Newton for small nonlinear systems.
pub mod newton;
/// Adaptive Dormand–Prince integration.
pub mod ode;
/// Generic numerical optimizer (L-BFGS backend).
pub mod optimizer;
/// Profile likelihood scans in the AUC.
pub mod profile_likelihood;
/// ROC polylines.
pub mod roc;
/// Solver selection.
pub mod solver;
/// Monte-Carlo bands from systematic uncertainties.
pub mod systematics_mc;
/// Continuous Euler–Lagrange solver.
pub mod variational;

pub use analysis::{
    ExtremalCurve, LikelihoodRocBands, MethodComparison, RocAnalysis, SystematicsBands, compare_methods,
};
pub use artifacts::{McBandArtifact, ProfileCurveArtifact, RocCurveArtifact};
pub use config::AnalysisConfig;
pub use delta::{DeltaConfig, DeltaFunctionSolver};
pub use discrete::{DiscreteConfig, DiscreteProblem, DiscreteSolver};
pub use optimizer::{LbfgsbOptimizer, ObjectiveFunction, OptimizationResult, OptimizerConfig};
pub use profile_likelihood::{
    AucGrid, Bound, ConfidenceInterval, ConfidenceLevel, LikelihoodScanner, ProfileLikelihoodScan,
    ProfilePoint, ScanConfig, ScanDiagnostics,
};
pub use roc::RocCurve;
pub use solver::{FitMethod, SolverKind};
pub use systematics_mc::{McBands, McConfig, McEnsemble, McReplicate, SystematicsMonteCarlo};
pub use variational::{Bandwidth, VariationalConfig, VariationalSolver};
