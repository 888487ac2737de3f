//! First-level GLM-Spectrum: one model per recording.
//!
//! [`glm_spectrum`] chains segmentation, the short-time transform, design
//! construction and the per-(frequency, channel) OLS fit.  Model arrays are
//! shaped [contrast, freq, channel].
use log::{error, info};
use ndarray::{Array1, ArrayView2, Ix2};
use rayon::prelude::*;

use crate::config::{ParallelConfig, SpectrumConfig};
use crate::design::{Design, DesignConfig};
use crate::error::{GlmError, Result};
use crate::glm::FittedGlm;
use crate::series::TimeSeries;

/// A fitted first-level model plus the axis metadata needed to interpret it.
#[derive(Debug, Clone, PartialEq)]
pub struct GlmSpectrum {
    pub config: SpectrumConfig,
    pub design: Design,
    pub model: FittedGlm,
    pub freqs: Array1<f64>,
    pub ch_names: Vec<String>,
    pub sample_rate: f64,
}

impl GlmSpectrum {
    pub fn n_freqs(&self) -> usize {
        self.freqs.len()
    }

    pub fn n_channels(&self) -> usize {
        self.ch_names.len()
    }

    pub fn contrast_names(&self) -> &[String] {
        &self.design.contrast_names
    }

    pub fn contrast_index(&self, name: &str) -> Result<usize> {
        self.design.contrast_index(name)
    }

    fn map2<'a>(&self, arr: ndarray::ArrayViewD<'a, f64>) -> Result<ArrayView2<'a, f64>> {
        arr.into_dimensionality::<Ix2>()
            .map_err(|e| GlmError::Format(e.to_string()))
    }

    /// Cope spectrum [freq, channel] of a named contrast.
    pub fn cope(&self, contrast: &str) -> Result<ArrayView2<'_, f64>> {
        let i = self.contrast_index(contrast)?;
        self.map2(self.model.cope(i))
    }

    pub fn varcope(&self, contrast: &str) -> Result<ArrayView2<'_, f64>> {
        let i = self.contrast_index(contrast)?;
        self.map2(self.model.varcope(i))
    }

    pub fn tstat(&self, contrast: &str) -> Result<ArrayView2<'_, f64>> {
        let i = self.contrast_index(contrast)?;
        self.map2(self.model.tstat(i))
    }

    /// Index of the frequency bin closest to `freq`.
    pub fn freq_index(&self, freq: f64) -> usize {
        self.freqs
            .iter()
            .enumerate()
            .fold((0, f64::INFINITY), |best, (i, &f)| {
                let d = (f - freq).abs();
                if d < best.1 { (i, d) } else { best }
            })
            .0
    }
}

/// Fit a GLM-Spectrum to one recording.
///
/// `regressors` carries sample-rate covariates (`covariate` for z-transformed
/// terms, `confound` for unit-max terms); each is averaged within every
/// window before the design is built.
///
/// ```no_run
/// use glmspec::{glm_spectrum, DesignConfig, SpectrumConfig, TimeSeries};
/// use ndarray::Array2;
///
/// let ts = TimeSeries::new(Array2::zeros((2, 1280)), 128.0).unwrap();
/// let trend: Vec<f64> = (0..1280).map(|t| t as f64).collect();
/// let spec = glm_spectrum(
///     &ts,
///     &SpectrumConfig::default(),
///     &DesignConfig::new().covariate("Linear", trend),
/// ).unwrap();
/// println!("{:?}", spec.cope("Linear").unwrap().dim());
/// ```
pub fn glm_spectrum(ts: &TimeSeries, cfg: &SpectrumConfig, regressors: &DesignConfig) -> Result<GlmSpectrum> {
    ts.segment(cfg)?.fit(regressors)
}

/// Fit many recordings on a dedicated worker pool.
///
/// `regressors(i, ts)` builds the design of recording `i`.  One failing
/// recording does not abort the others; the outer error only reports a pool
/// that could not be built.
pub fn fit_batch<F>(
    series: &[TimeSeries],
    cfg: &SpectrumConfig,
    regressors: F,
    parallel: &ParallelConfig,
) -> Result<Vec<Result<GlmSpectrum>>>
where
    F: Fn(usize, &TimeSeries) -> DesignConfig + Sync,
{
    let pool = parallel.build_pool("glmspec-fit")?;
    let results: Vec<Result<GlmSpectrum>> = pool.install(|| {
        series
            .par_iter()
            .enumerate()
            .map(|(i, ts)| {
                let r = glm_spectrum(ts, cfg, &regressors(i, ts));
                if let Err(e) = &r {
                    error!("recording {i}: {e}");
                }
                r
            })
            .collect()
    });
    let ok = results.iter().filter(|r| r.is_ok()).count();
    info!("first-level batch: {ok}/{} recordings fitted", results.len());
    Ok(results)
}
