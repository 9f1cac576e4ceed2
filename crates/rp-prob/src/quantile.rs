//! Percentiles used for Monte-Carlo bands.

use rp_core::{Error, Result};

/// Quantile of already sorted data, linear interpolation between order statistics.
///
/// `q` is clamped to `[0, 1]`; empty input gives `NaN`.
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => return f64::NAN,
        1 => return sorted[0],
        _ => {}
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    if lo == hi { sorted[lo] } else { sorted[lo] + frac * (sorted[hi] - sorted[lo]) }
}

/// Quantile of unsorted data.
pub fn quantile_linear(data: &[f64], q: f64) -> f64 {
    let mut v = data.to_vec();
    v.sort_by(f64::total_cmp);
    quantile_linear_sorted(&v, q)
}

/// `(lower, upper)` quantiles of `samples` at the two given probabilities.
pub fn percentile_pair(samples: &[f64], q_low: f64, q_high: f64) -> Result<(f64, f64)> {
    if samples.is_empty() {
        return Err(Error::Validation("percentile_pair requires at least one sample".into()));
    }
    if !(0.0..=1.0).contains(&q_low) || !(0.0..=1.0).contains(&q_high) || q_low > q_high {
        return Err(Error::Validation(format!(
            "percentile probabilities must satisfy 0 <= q_low <= q_high <= 1, got ({q_low}, {q_high})"
        )));
    }
    let mut v = samples.to_vec();
    v.sort_by(f64::total_cmp);
    Ok((quantile_linear_sorted(&v, q_low), quantile_linear_sorted(&v, q_high)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quantile_edges() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_linear_sorted(&v, 0.0), 1.0);
        assert_eq!(quantile_linear_sorted(&v, 1.0), 4.0);
        assert_relative_eq!(quantile_linear_sorted(&v, 0.5), 2.5);
        assert!(quantile_linear_sorted(&[], 0.5).is_nan());
    }

    #[test]
    fn percentile_pair_orders_and_validates() {
        let v: Vec<f64> = (0..101).rev().map(|i| i as f64).collect();
        let (lo, hi) = percentile_pair(&v, 0.16, 0.84).unwrap();
        assert_relative_eq!(lo, 16.0, epsilon = 1e-12);
        assert_relative_eq!(hi, 84.0, epsilon = 1e-12);
        assert!(percentile_pair(&v, 0.9, 0.1).is_err());
        assert!(percentile_pair(&[], 0.1, 0.9).is_err());
    }
}
