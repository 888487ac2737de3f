//! Pipeline input variants and the conversions between them.
//!
//! ```text
//! TimeSeries ──segment()──▶ SegmentedSeries ──fit()──▶ GlmSpectrum
//! ```
//!
//! [`SpectrumInput`] wraps whichever stage the caller already has, and
//! [`SpectrumInput::into_fitted`] runs only the stages still missing.
use log::{info, warn};
use ndarray::Array2;

use crate::config::SpectrumConfig;
use crate::design::DesignConfig;
use crate::error::{GlmError, Result};
use crate::firstlevel::GlmSpectrum;
use crate::glm;
use crate::spectrum::{self, SpectralEstimate};
use crate::window::SegmentSet;

/// Continuous multichannel recording, `data` is [C, T].
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub data: Array2<f64>,
    pub sample_rate: f64,
    pub ch_names: Vec<String>,
    /// Samples marked bad by artefact annotation; length T when present.
    pub bad_samples: Option<Vec<bool>>,
}

impl TimeSeries {
    /// Wrap `data` with default channel names `ch0`, `ch1`, …
    pub fn new(data: Array2<f64>, sample_rate: f64) -> Result<Self> {
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(GlmError::config("sample_rate", format!("must be positive, got {sample_rate}")));
        }
        let ch_names = (0..data.nrows()).map(|c| format!("ch{c}")).collect();
        Ok(Self { data, sample_rate, ch_names, bad_samples: None })
    }

    pub fn with_ch_names(mut self, ch_names: Vec<String>) -> Result<Self> {
        if ch_names.len() != self.n_channels() {
            return Err(GlmError::shape("channel names", self.n_channels(), ch_names.len()));
        }
        self.ch_names = ch_names;
        Ok(self)
    }

    pub fn with_bad_samples(mut self, bad: Vec<bool>) -> Result<Self> {
        if bad.len() != self.n_samples() {
            return Err(GlmError::shape("bad-sample mask", self.n_samples(), bad.len()));
        }
        self.bad_samples = Some(bad);
        Ok(self)
    }

    pub fn n_channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Sample times in seconds.
    pub fn times(&self) -> Vec<f64> {
        (0..self.n_samples()).map(|t| t as f64 / self.sample_rate).collect()
    }

    /// Sliding-window spectrum of every channel.
    pub fn segment(&self, cfg: &SpectrumConfig) -> Result<SegmentedSeries> {
        let params = cfg.resolve(self.sample_rate)?;
        let segments = SegmentSet::from_params(self.n_samples(), &params, self.sample_rate)?;
        let spectrum = spectrum::stft(&self.data, &segments, cfg)?;
        let bad_segments = match &self.bad_samples {
            Some(mask) => segments.overlaps_bad(mask)?,
            None => vec![false; segments.len()],
        };
        Ok(SegmentedSeries {
            spectrum,
            segments,
            bad_segments,
            ch_names: self.ch_names.clone(),
            config: cfg.clone(),
        })
    }
}

/// Per-segment spectrum ready for model fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedSeries {
    pub spectrum: SpectralEstimate,
    pub segments: SegmentSet,
    /// Segments overlapping a bad sample; excluded from the fit.
    pub bad_segments: Vec<bool>,
    pub ch_names: Vec<String>,
    pub config: SpectrumConfig,
}

impl SegmentedSeries {
    /// Fit a GLM-Spectrum.  Regressor values in `regressors` are given at
    /// the sample rate and reduced to one value per segment.
    pub fn fit(&self, regressors: &DesignConfig) -> Result<GlmSpectrum> {
        let keep: Vec<bool> = self.bad_segments.iter().map(|&b| !b).collect();
        let n_keep = keep.iter().filter(|&&k| k).count();
        if n_keep < keep.len() {
            warn!("excluding {} of {} segments overlapping bad samples", keep.len() - n_keep, keep.len());
        }

        let design = regressors
            .per_segment(&self.segments)?
            .select_rows(&keep)?
            .build(n_keep)?;

        let mut spec = self.spectrum.select_segments(&keep)?;
        if self.config.standardise_data {
            spec.standardise_inplace();
        }

        let model = glm::fit(&design, &spec.data.clone().into_dyn())?;
        info!(
            "fitted GLM-Spectrum: {} segments, {} freqs, {} channels, {} contrasts",
            n_keep,
            spec.n_freqs(),
            spec.n_channels(),
            design.n_contrasts()
        );
        Ok(GlmSpectrum {
            config: self.config.clone(),
            design,
            model,
            freqs: spec.freqs,
            ch_names: self.ch_names.clone(),
            sample_rate: self.segments.sample_rate,
        })
    }
}

/// Any stage of the first-level pipeline.
#[derive(Debug, Clone)]
pub enum SpectrumInput {
    Raw(TimeSeries),
    Segmented(SegmentedSeries),
    Fitted(GlmSpectrum),
}

impl From<TimeSeries> for SpectrumInput {
    fn from(ts: TimeSeries) -> Self {
        SpectrumInput::Raw(ts)
    }
}

impl From<SegmentedSeries> for SpectrumInput {
    fn from(s: SegmentedSeries) -> Self {
        SpectrumInput::Segmented(s)
    }
}

impl From<GlmSpectrum> for SpectrumInput {
    fn from(g: GlmSpectrum) -> Self {
        SpectrumInput::Fitted(g)
    }
}

impl SpectrumInput {
    /// Run whichever stages are missing.  `cfg` is ignored for segmented
    /// input, both arguments are ignored for an already fitted model.
    pub fn into_fitted(self, cfg: &SpectrumConfig, regressors: &DesignConfig) -> Result<GlmSpectrum> {
        match self {
            SpectrumInput::Raw(ts) => ts.segment(cfg)?.fit(regressors),
            SpectrumInput::Segmented(s) => s.fit(regressors),
            SpectrumInput::Fitted(g) => Ok(g),
        }
    }
}
