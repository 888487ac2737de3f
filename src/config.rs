//! Pipeline configuration.
//!
//! Every tunable parameter lives in a plain struct passed explicitly into the
//! entry points.  Fields that depend on the recording (window length, overlap)
//! are `Option`s resolved against the sample rate at construction of the
//! segment set, never mutated afterwards.
use serde::{Deserialize, Serialize};

use crate::error::{GlmError, Result};
use crate::permute::PermutationScheme;
use crate::spectrum::SpectrumMode;
use crate::window::Window;

/// Configuration of the sliding-window spectrum.
///
/// All fields are `pub` so you can construct one with struct-update syntax:
///
/// ```
/// use glmspec::{SpectrumConfig, SpectrumMode};
///
/// let cfg = SpectrumConfig {
///     nperseg: Some(256),          // 2 s windows at 128 Hz
///     mode:    SpectrumMode::Power,
///     fmin:    Some(1.0),
///     fmax:    Some(45.0),
///     ..SpectrumConfig::default()
/// };
/// assert_eq!(cfg.resolve(128.0).unwrap().step, 128);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Window length in samples.
    ///
    /// `None` resolves to `round(sample_rate)`, one-second windows giving a
    /// frequency resolution of 1 Hz.
    pub nperseg: Option<usize>,

    /// Number of samples shared by consecutive windows.
    ///
    /// `None` resolves to `nperseg / 2`.  Set to `Some(0)` for
    /// non-overlapping windows.
    pub noverlap: Option<usize>,

    /// DFT length.  Must be at least `nperseg`; the segment is zero-padded
    /// when larger.  `None` uses `nperseg`.
    pub nfft: Option<usize>,

    /// Taper applied to each segment before the transform.
    ///
    /// Default: [`Window::Hann`].
    pub window: Window,

    /// Remove each segment's mean before tapering.
    ///
    /// Default: `true`.
    pub detrend: bool,

    /// Output units of the spectrum.
    ///
    /// Default: [`SpectrumMode::Magnitude`].
    pub mode: SpectrumMode,

    /// Lowest frequency kept (inclusive, Hz).  `None` keeps DC.
    pub fmin: Option<f64>,

    /// Highest frequency kept (inclusive, Hz).  `None` keeps Nyquist.
    pub fmax: Option<f64>,

    /// Z-score every (frequency, channel) series across segments before the
    /// GLM fit, so copes are in units of standard deviations.
    ///
    /// Default: `false`.
    pub standardise_data: bool,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            nperseg: None,
            noverlap: None,
            nfft: None,
            window: Window::Hann,
            detrend: true,
            mode: SpectrumMode::Magnitude,
            fmin: None,
            fmax: None,
            standardise_data: false,
        }
    }
}

/// Window parameters after resolving defaults against a sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowParams {
    pub nperseg: usize,
    pub step: usize,
    pub nfft: usize,
}

impl SpectrumConfig {
    /// Resolve the optional window fields for a recording at `sample_rate`.
    pub fn resolve(&self, sample_rate: f64) -> Result<WindowParams> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(GlmError::config("sample_rate", format!("must be positive, got {sample_rate}")));
        }
        let nperseg = self.nperseg.unwrap_or_else(|| sample_rate.round() as usize);
        if nperseg == 0 {
            return Err(GlmError::config("nperseg", "must be positive"));
        }
        let noverlap = self.noverlap.unwrap_or(nperseg / 2);
        if noverlap >= nperseg {
            return Err(GlmError::config(
                "noverlap",
                format!("must be smaller than nperseg ({noverlap} >= {nperseg})"),
            ));
        }
        let nfft = self.nfft.unwrap_or(nperseg);
        if nfft < nperseg {
            return Err(GlmError::config(
                "nfft",
                format!("must be at least nperseg ({nfft} < {nperseg})"),
            ));
        }
        if let (Some(lo), Some(hi)) = (self.fmin, self.fmax) {
            if lo > hi {
                return Err(GlmError::config("fmin", format!("fmin {lo} exceeds fmax {hi}")));
            }
        }
        Ok(WindowParams { nperseg, step: nperseg - noverlap, nfft })
    }
}

/// Configuration of a permutation test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermutationConfig {
    /// Number of null draws, including the unpermuted design.
    ///
    /// Default: `1000`.
    pub nperms: usize,

    /// Cluster-forming threshold on |t|.  Unused by the max-statistic test.
    ///
    /// Default: `3.0`.
    pub cluster_forming_threshold: f64,

    /// Family-wise error rate.  Observed statistics beyond the
    /// `100 · (1 - alpha)` percentile of the null are significant.
    ///
    /// Default: `0.05`.
    pub alpha: f64,

    /// Base seed for the permutation draws.  `None` draws one from the OS
    /// and logs it at `info` level so the run can be repeated.
    pub seed: Option<u64>,

    /// Worker threads for the permutation loop.  `None` uses one per core.
    pub n_workers: Option<usize>,

    /// How the design is randomised for each draw.
    ///
    /// Default: [`PermutationScheme::Auto`].
    pub scheme: PermutationScheme,
}

impl Default for PermutationConfig {
    fn default() -> Self {
        Self {
            nperms: 1000,
            cluster_forming_threshold: 3.0,
            alpha: 0.05,
            seed: None,
            n_workers: None,
            scheme: PermutationScheme::Auto,
        }
    }
}

impl PermutationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.nperms == 0 {
            return Err(GlmError::config("nperms", "must be at least 1"));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(GlmError::config("alpha", format!("must lie in (0, 1), got {}", self.alpha)));
        }
        if !(self.cluster_forming_threshold.is_finite() && self.cluster_forming_threshold > 0.0) {
            return Err(GlmError::config(
                "cluster_forming_threshold",
                format!("must be positive, got {}", self.cluster_forming_threshold),
            ));
        }
        ParallelConfig { n_workers: self.n_workers }.validate()
    }

    /// Percentile of the null distribution used as the significance cut-off.
    pub fn percentile(&self) -> f64 {
        100.0 * (1.0 - self.alpha)
    }
}

/// Worker-pool sizing for embarrassingly parallel stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Worker threads.  `None` uses one per available core.
    pub n_workers: Option<usize>,
}

impl ParallelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_workers == Some(0) {
            return Err(GlmError::config("n_workers", "must be at least 1"));
        }
        Ok(())
    }

    /// Build a dedicated rayon pool so callers never oversubscribe the
    /// global one.
    pub fn build_pool(&self, name: &'static str) -> Result<rayon::ThreadPool> {
        self.validate()?;
        let mut builder = rayon::ThreadPoolBuilder::new()
            .thread_name(move |i| format!("{name}-{i}"));
        if let Some(n) = self.n_workers {
            builder = builder.num_threads(n);
        }
        builder
            .build()
            .map_err(|e| GlmError::config("n_workers", e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_to_one_second_half_overlap() {
        let p = SpectrumConfig::default().resolve(128.0).unwrap();
        assert_eq!(p, WindowParams { nperseg: 128, step: 64, nfft: 128 });
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let cfg = SpectrumConfig { nperseg: Some(64), noverlap: Some(64), ..Default::default() };
        assert!(matches!(
            cfg.resolve(128.0),
            Err(GlmError::InvalidConfiguration { param: "noverlap", .. })
        ));
    }

    #[test]
    fn zero_window_rejected() {
        let cfg = SpectrumConfig { nperseg: Some(0), ..Default::default() };
        assert!(cfg.resolve(100.0).is_err());
    }

    #[test]
    fn permutation_defaults_are_valid() {
        let cfg = PermutationConfig::default();
        cfg.validate().unwrap();
        approx::assert_abs_diff_eq!(cfg.percentile(), 95.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_workers_rejected() {
        let cfg = PermutationConfig { n_workers: Some(0), ..Default::default() };
        assert!(cfg.validate().is_err());
    }
}
