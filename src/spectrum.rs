//! Short-time Fourier transform of segmented data.
//!
//! Algorithm, per segment and channel:
//!   1. Optionally subtract the segment mean (constant detrend).
//!   2. Multiply by the taper `w`.
//!   3. Zero-pad to `nfft` and take the DFT; keep bins `0..=nfft/2`.
//!   4. Scale to a one-sided density: `|X|² / (fs · Σw²)`, doubling every
//!      bin except DC and (for even `nfft`) Nyquist.
//!   5. `Magnitude` mode takes the square root of the power.
//!
//! Bins are spaced at `fs / nfft` from 0 to Nyquist, optionally truncated to
//! the inclusive band `[fmin, fmax]`.
use std::ops::Range;

use log::debug;
use ndarray::{s, Array1, Array2, Array3, Axis};
use rustfft::{num_complex::Complex64, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::config::SpectrumConfig;
use crate::error::{GlmError, Result};
use crate::window::SegmentSet;

/// Units of the per-segment spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpectrumMode {
    /// Squared magnitude; additive across incoherent sources.
    Power,
    /// Square root of power; same units as the input.
    #[default]
    Magnitude,
}

/// Real-valued spectrum, one row per segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralEstimate {
    /// [segment, freq, channel]
    pub data: Array3<f64>,
    pub freqs: Array1<f64>,
    pub mode: SpectrumMode,
}

/// Scaled complex coefficients prior to magnitude reduction.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexEstimate {
    /// [segment, freq, channel]
    pub data: Array3<Complex64>,
    pub freqs: Array1<f64>,
}

/// One-sided frequency axis for an `nfft`-point DFT at `sample_rate`.
pub fn frequency_axis(nfft: usize, sample_rate: f64) -> Array1<f64> {
    let df = sample_rate / nfft as f64;
    (0..nfft / 2 + 1).map(|k| k as f64 * df).collect()
}

/// Indices of `freqs` inside the inclusive band `[fmin, fmax]`.
pub fn band_indices(freqs: &Array1<f64>, fmin: Option<f64>, fmax: Option<f64>) -> Result<Range<usize>> {
    // Relative slack so that fmax = 64.0 still keeps a bin computed as 63.99999999.
    let tol = 1e-6 * freqs.last().copied().unwrap_or(1.0).max(1.0);
    let lo = fmin.unwrap_or(f64::NEG_INFINITY) - tol;
    let hi = fmax.unwrap_or(f64::INFINITY) + tol;
    let start = freqs.iter().position(|&f| f >= lo).unwrap_or(freqs.len());
    let end = freqs.iter().rposition(|&f| f <= hi).map_or(0, |i| i + 1);
    if start >= end {
        let param = if start == freqs.len() {
            "fmin"
        } else if end == 0 {
            "fmax"
        } else {
            "fmin/fmax"
        };
        return Err(GlmError::config(
            param,
            format!("band [{fmin:?}, {fmax:?}] contains no frequency bins"),
        ));
    }
    Ok(start..end)
}

/// Complex STFT of `data` ([C, T]) over `segments`, before band selection.
pub fn stft_complex(
    data: &Array2<f64>,
    segments: &SegmentSet,
    cfg: &SpectrumConfig,
) -> Result<ComplexEstimate> {
    let params = cfg.resolve(segments.sample_rate)?;
    if params.nperseg != segments.nperseg {
        return Err(GlmError::shape("segment length", params.nperseg, segments.nperseg));
    }
    let nfft = params.nfft;
    let fs = segments.sample_rate;
    let epochs = segments.segment(data)?; // [E, C, nperseg]
    let (n_seg, n_ch, n_t) = epochs.dim();

    let taper = cfg.window.coefficients(n_t);
    let win_s2: f64 = taper.iter().map(|w| w * w).sum();
    let n_freq = nfft / 2 + 1;

    // Density scaling on the amplitude, so |X|² lands on the power density.
    let mut amp_scale = vec![(1.0 / (fs * win_s2)).sqrt(); n_freq];
    let last_doubled = if nfft % 2 == 0 { n_freq - 1 } else { n_freq };
    for v in amp_scale.iter_mut().take(last_doubled).skip(1) {
        *v *= std::f64::consts::SQRT_2;
    }

    let mut planner: FftPlanner<f64> = FftPlanner::new();
    let fft = planner.plan_fft_forward(nfft);
    let mut buf = vec![Complex64::default(); nfft];
    let mut out = Array3::<Complex64>::zeros((n_seg, n_freq, n_ch));

    for e in 0..n_seg {
        for c in 0..n_ch {
            let x = epochs.slice(s![e, c, ..]);
            let mean = if cfg.detrend { x.mean().unwrap_or(0.0) } else { 0.0 };
            for (i, b) in buf.iter_mut().enumerate() {
                *b = if i < n_t {
                    Complex64::new((x[i] - mean) * taper[i], 0.0)
                } else {
                    Complex64::default()
                };
            }
            fft.process(&mut buf);
            for k in 0..n_freq {
                out[[e, k, c]] = buf[k] * amp_scale[k];
            }
        }
    }

    debug!("stft: {n_seg} segments × {n_freq} bins × {n_ch} channels (nfft={nfft})");
    Ok(ComplexEstimate { data: out, freqs: frequency_axis(nfft, fs) })
}

/// Real-valued STFT in the configured mode, truncated to the configured band.
pub fn stft(data: &Array2<f64>, segments: &SegmentSet, cfg: &SpectrumConfig) -> Result<SpectralEstimate> {
    let complex = stft_complex(data, segments, cfg)?;
    let band = band_indices(&complex.freqs, cfg.fmin, cfg.fmax)?;
    let kept = complex.data.slice(s![.., band.clone(), ..]);
    let data = match cfg.mode {
        SpectrumMode::Power => kept.mapv(|z| z.norm_sqr()),
        SpectrumMode::Magnitude => kept.mapv(|z| z.norm()),
    };
    let freqs = complex.freqs.slice(s![band]).to_owned();
    Ok(SpectralEstimate { data, freqs, mode: cfg.mode })
}

impl SpectralEstimate {
    pub fn n_segments(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn n_freqs(&self) -> usize {
        self.freqs.len()
    }

    pub fn n_channels(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// Welch estimate: mean over segments, shape [freq, channel].
    pub fn welch(&self) -> Array2<f64> {
        self.data
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array2::zeros((self.n_freqs(), self.n_channels())))
    }

    /// Keep only the segments where `keep` is true.
    pub fn select_segments(&self, keep: &[bool]) -> Result<Self> {
        if keep.len() != self.n_segments() {
            return Err(GlmError::shape("segment mask", self.n_segments(), keep.len()));
        }
        let idx: Vec<usize> = keep.iter().enumerate().filter(|(_, &k)| k).map(|(i, _)| i).collect();
        Ok(Self {
            data: self.data.select(Axis(0), &idx),
            freqs: self.freqs.clone(),
            mode: self.mode,
        })
    }

    /// Z-score every (freq, channel) series across segments (`ddof = 0`).
    /// Constant series are only mean-centred.
    pub fn standardise_inplace(&mut self) {
        for mut lane in self.data.lanes_mut(Axis(0)) {
            let n = lane.len() as f64;
            if n == 0.0 {
                continue;
            }
            let mean = lane.sum() / n;
            let var = lane.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let std = var.sqrt();
            if std > 0.0 {
                lane.mapv_inplace(|v| (v - mean) / std);
            } else {
                lane.mapv_inplace(|v| v - mean);
            }
        }
    }
}
