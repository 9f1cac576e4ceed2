//! # rp-translate
//!
//! Input formats for roc-picker.
//!
//! Supports:
//! - datacards (fixed, Poisson and Poisson-density observables with `lnN` /
//!   `gauss` systematics)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod datacard;

pub use datacard::{Datacard, ObservableType, SystematicLine};
