//! Sliding-window segmentation.
//!
//! Splits continuous [C, T] data into fixed-length, possibly overlapping
//! windows of `nperseg` samples advanced by `step` samples.  The window count
//! is `(T - nperseg) / step + 1`; trailing samples that don't fill a complete
//! window are dropped, never padded.
//!
//! Sample-rate covariates (a linear trend, an EOG envelope, a bad-sample
//! indicator) are reduced to one value per window by averaging, so they line
//! up with the spectral observations.
use ndarray::{s, Array1, Array2, Array3};
use serde::{Deserialize, Serialize};

use crate::config::WindowParams;
use crate::error::{GlmError, Result};

/// Taper applied to each segment before the DFT.
///
/// Coefficients are periodic ("DFT-even"), matching
/// `scipy.signal.get_window(name, n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    #[default]
    Hann,
    Hamming,
    Boxcar,
}

impl Window {
    pub fn coefficients(self, n: usize) -> Vec<f64> {
        let arg = |i: usize| 2.0 * std::f64::consts::PI * i as f64 / n as f64;
        match self {
            Window::Hann => (0..n).map(|i| 0.5 - 0.5 * arg(i).cos()).collect(),
            Window::Hamming => (0..n).map(|i| 0.54 - 0.46 * arg(i).cos()).collect(),
            Window::Boxcar => vec![1.0; n],
        }
    }
}

/// Ordered set of equal-length windows over a recording of `n_samples`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSet {
    /// First sample of every window.
    pub starts: Vec<usize>,
    pub nperseg: usize,
    pub step: usize,
    pub n_samples: usize,
    pub sample_rate: f64,
}

impl SegmentSet {
    pub fn new(n_samples: usize, nperseg: usize, step: usize, sample_rate: f64) -> Result<Self> {
        if nperseg == 0 {
            return Err(GlmError::config("nperseg", "must be positive"));
        }
        if nperseg > n_samples {
            return Err(GlmError::config(
                "nperseg",
                format!("window of {nperseg} samples exceeds recording of {n_samples}"),
            ));
        }
        if step == 0 {
            return Err(GlmError::config("step", "must be positive"));
        }
        let n_segments = (n_samples - nperseg) / step + 1;
        let starts = (0..n_segments).map(|i| i * step).collect();
        Ok(Self { starts, nperseg, step, n_samples, sample_rate })
    }

    pub fn from_params(n_samples: usize, params: &WindowParams, sample_rate: f64) -> Result<Self> {
        Self::new(n_samples, params.nperseg, params.step, sample_rate)
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Centre of every window in seconds from the first sample.
    pub fn centre_times(&self) -> Array1<f64> {
        let half = self.nperseg as f64 / 2.0;
        self.starts
            .iter()
            .map(|&s| (s as f64 + half) / self.sample_rate)
            .collect()
    }

    /// Cut `data` ([C, T]) into a 3-D array [segment, channel, nperseg].
    pub fn segment(&self, data: &Array2<f64>) -> Result<Array3<f64>> {
        let (n_ch, n_t) = data.dim();
        if n_t != self.n_samples {
            return Err(GlmError::shape("time series samples", self.n_samples, n_t));
        }
        let mut out = Array3::<f64>::zeros((self.len(), n_ch, self.nperseg));
        for (e, &start) in self.starts.iter().enumerate() {
            out.slice_mut(s![e, .., ..])
                .assign(&data.slice(s![.., start..start + self.nperseg]));
        }
        Ok(out)
    }

    /// Average a per-sample covariate within each window.
    pub fn regressor(&self, samples: &[f64]) -> Result<Array1<f64>> {
        if samples.len() != self.n_samples {
            return Err(GlmError::shape("regressor samples", self.n_samples, samples.len()));
        }
        let inv = 1.0 / self.nperseg as f64;
        Ok(self
            .starts
            .iter()
            .map(|&s| samples[s..s + self.nperseg].iter().sum::<f64>() * inv)
            .collect())
    }

    /// Flag every window that overlaps at least one bad sample.
    pub fn overlaps_bad(&self, bad_samples: &[bool]) -> Result<Vec<bool>> {
        if bad_samples.len() != self.n_samples {
            return Err(GlmError::shape("bad-sample mask", self.n_samples, bad_samples.len()));
        }
        Ok(self
            .starts
            .iter()
            .map(|&s| bad_samples[s..s + self.nperseg].iter().any(|&b| b))
            .collect())
    }
}
