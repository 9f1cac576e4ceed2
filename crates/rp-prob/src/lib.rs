//! Probability building blocks for roc-picker.
//!
//! This crate hosts the distribution models both likelihood formulations
//! share:
//! - empirical group distributions (support, multiplicities, tunable weights)
//! - kernel-smoothed CDFs for the continuous formulation
//! - small numeric helpers (stable log/softmax, normal CDF, quantiles)

pub mod empirical;
pub mod kernel;
pub mod math;
pub mod normal;
pub mod quantile;

pub use empirical::{GroupDistribution, auc_from_weights, empirical_auc, mann_whitney_auc, mid_cdf_at};
pub use kernel::{SmoothedDistribution, narrow_bandwidth, silverman_bandwidth};
