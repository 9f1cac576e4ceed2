//! Standard normal helpers.

use statrs::function::erf::{erfc, erfc_inv};

/// `1 / sqrt(2π)`.
const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;

/// Smallest probability passed to the inverse CDF.
const PROB_EPS: f64 = 1e-15;

/// Standard normal PDF.
#[inline]
pub fn pdf(z: f64) -> f64 {
    INV_SQRT_2PI * (-0.5 * z * z).exp()
}

/// Standard normal CDF.
///
/// `Φ(z) = erfc(-z/√2)/2`, accurate in both tails.
#[inline]
pub fn cdf(z: f64) -> f64 {
    0.5 * erfc(-z * std::f64::consts::FRAC_1_SQRT_2)
}

/// Standard normal quantile, with `p` clipped away from 0 and 1.
#[inline]
pub fn inverse_cdf(p: f64) -> f64 {
    let p = p.clamp(PROB_EPS, 1.0 - PROB_EPS);
    -std::f64::consts::SQRT_2 * erfc_inv(2.0 * p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cdf_symmetry_and_center() {
        assert_relative_eq!(cdf(0.0), 0.5, epsilon = 1e-15);
        for z in [0.3, 1.0, 2.5, 6.0] {
            assert_relative_eq!(cdf(z) + cdf(-z), 1.0, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_inverse_roundtrip() {
        for p in [0.025, 0.16, 0.5, 0.84, 0.975] {
            assert_relative_eq!(cdf(inverse_cdf(p)), p, epsilon = 1e-10);
        }
        assert_relative_eq!(inverse_cdf(0.975), 1.959_963_984_540_054, epsilon = 1e-9);
    }

    #[test]
    fn test_pdf_peak() {
        assert_relative_eq!(pdf(0.0), INV_SQRT_2PI, epsilon = 1e-16);
    }
}
