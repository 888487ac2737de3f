//! Synthetic signals for examples, benchmarks and tests.
//!
//! All generators are seeded; the same seed always yields the same samples.
use std::f64::consts::TAU;

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use crate::error::{GlmError, Result};

/// Sine at `freq` Hz whose amplitude changes linearly from `amp_start` to
/// `amp_end` over `n` samples.
pub fn sinusoid(freq: f64, amp_start: f64, amp_end: f64, n: usize, sample_rate: f64) -> Array1<f64> {
    let denom = n.saturating_sub(1).max(1) as f64;
    Array1::from_shape_fn(n, |t| {
        let amp = amp_start + (amp_end - amp_start) * t as f64 / denom;
        amp * (TAU * freq * t as f64 / sample_rate).sin()
    })
}

fn normal(std: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, std).map_err(|e| GlmError::config("std", e.to_string()))
}

/// Gaussian white noise.
pub fn white_noise(n: usize, std: f64, seed: u64) -> Result<Array1<f64>> {
    let dist = normal(std)?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(Array1::from_shape_fn(n, |_| dist.sample(&mut rng)))
}

/// Autoregressive noise `x[t] = Σ a[k]·x[t-1-k] + e[t]`, `e ~ N(0, std²)`.
///
/// The first `10 · order` samples are discarded so the output starts in the
/// stationary regime.  `coeffs` must describe a stable process.
pub fn ar_noise(coeffs: &[f64], n: usize, std: f64, seed: u64) -> Result<Array1<f64>> {
    if coeffs.iter().map(|a| a.abs()).sum::<f64>() >= 1.0 {
        return Err(GlmError::config(
            "coeffs",
            "sum of |coefficients| must be below 1 for a stable process",
        ));
    }
    let dist = normal(std)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let burn = 10 * coeffs.len();
    let mut x = vec![0.0; n + burn];
    for t in 0..x.len() {
        let mut v = dist.sample(&mut rng);
        for (k, a) in coeffs.iter().enumerate() {
            if t > k {
                v += a * x[t - 1 - k];
            }
        }
        x[t] = v;
    }
    Ok(Array1::from(x.split_off(burn)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sinusoid_envelope_is_linear() {
        let s = sinusoid(1.0, 2.0, 0.0, 401, 4.0);
        // quarter-period samples hit the peaks
        approx::assert_abs_diff_eq!(s[1], 2.0 * (1.0 - 1.0 / 400.0), epsilon = 1e-12);
        approx::assert_abs_diff_eq!(s[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn noise_is_seeded() {
        assert_eq!(white_noise(64, 1.0, 5).unwrap(), white_noise(64, 1.0, 5).unwrap());
        assert_ne!(white_noise(64, 1.0, 5).unwrap(), white_noise(64, 1.0, 6).unwrap());
    }

    #[test]
    fn ar_noise_has_positive_lag_one_correlation() {
        let x = ar_noise(&[0.8], 5000, 1.0, 1).unwrap();
        let m = x.mean().unwrap_or(0.0);
        let c0: f64 = x.iter().map(|v| (v - m).powi(2)).sum();
        let c1: f64 = x.windows(2).into_iter().map(|w| (w[0] - m) * (w[1] - m)).sum();
        assert!((c1 / c0 - 0.8).abs() < 0.05);
    }

    #[test]
    fn unstable_process_rejected() {
        assert!(ar_noise(&[0.7, 0.5], 10, 1.0, 0).is_err());
        assert!(white_noise(10, -1.0, 0).is_err());
    }
}
