//! # rp-core
//!
//! Core types and traits for roc-picker.
//!
//! This crate provides:
//! - the error taxonomy shared by every crate
//! - samples, uncertainties and fit results
//! - the [`AucSolver`] capability that the likelihood scanner drives

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, FailureReason, Result};
pub use traits::{AucSolver, CdfModel};
pub use types::{
    FitResult, FittedCurve, Group, Multipliers, NumericalWarning, Sample, Uncertainty,
    UncertaintyKind, WarmStart, split_groups,
};
