//! Small numerically-stable math utilities used by the likelihood code.

/// `a * ln(b)` with the convention `0 * ln(0) = 0`.
///
/// Returns `-inf` when `a > 0` and `b == 0`, which makes an unsupported
/// weight assignment infinitely unlikely rather than `NaN`.
#[inline]
pub fn xlogy(a: f64, b: f64) -> f64 {
    if a == 0.0 { 0.0 } else { a * b.ln() }
}

/// Stable `ln(Σ exp(v_i))`.
///
/// Empty input returns `-inf`.
pub fn logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    let s: f64 = values.iter().map(|&v| (v - max).exp()).sum();
    max + s.ln()
}

/// Softmax of `logits` written into `out`; returns `logsumexp(logits)`.
pub fn softmax_into(logits: &[f64], out: &mut [f64]) -> f64 {
    debug_assert_eq!(logits.len(), out.len());
    let lse = logsumexp(logits);
    for (o, &l) in out.iter_mut().zip(logits) {
        *o = (l - lse).exp();
    }
    lse
}

/// Allocating softmax.
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; logits.len()];
    softmax_into(logits, &mut out);
    out
}

/// Multinomial negative log-likelihood `−Σ m_i ln w_i`.
///
/// Shared by every formulation so that re-evaluating a fitted weight vector
/// reproduces the recorded NLL exactly.
pub fn weighted_nll(multiplicities: &[f64], weights: &[f64]) -> f64 {
    -multiplicities.iter().zip(weights).map(|(&m, &w)| xlogy(m, w)).sum::<f64>()
}

/// Neumaier-compensated sum.
pub fn compensated_sum(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut sum = 0.0_f64;
    let mut c = 0.0_f64;
    for v in values {
        let t = sum + v;
        if sum.abs() >= v.abs() {
            c += (sum - t) + v;
        } else {
            c += (v - t) + sum;
        }
        sum = t;
    }
    sum + c
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_xlogy_zero_convention() {
        assert_eq!(xlogy(0.0, 0.0), 0.0);
        assert_eq!(xlogy(2.0, 0.0), f64::NEG_INFINITY);
        assert_relative_eq!(xlogy(2.0, 3.0), 2.0 * 3.0_f64.ln(), epsilon = 1e-15);
    }

    #[test]
    fn test_logsumexp_large_values() {
        let v = [1000.0, 1000.0];
        assert_relative_eq!(logsumexp(&v), 1000.0 + 2.0_f64.ln(), epsilon = 1e-12);
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_softmax_normalizes() {
        let w = softmax(&[0.0, 1.0, -3.0, 2.5]);
        assert_relative_eq!(w.iter().sum::<f64>(), 1.0, epsilon = 1e-14);
        assert!(w[3] > w[1] && w[1] > w[0] && w[0] > w[2]);
    }

    #[test]
    fn test_weighted_nll_matches_closed_form() {
        let m = [2.0, 1.0, 1.0];
        let w = [0.5, 0.25, 0.25];
        let expected = -(2.0 * 0.5_f64.ln() + 2.0 * 0.25_f64.ln());
        assert_relative_eq!(weighted_nll(&m, &w), expected, epsilon = 1e-14);
    }

    #[test]
    fn test_compensated_sum_small_terms() {
        let mut v = vec![1.0];
        v.extend(std::iter::repeat_n(1e-16, 10_000));
        assert_relative_eq!(compensated_sum(v), 1.0 + 1e-12, epsilon = 1e-15);
    }
}
