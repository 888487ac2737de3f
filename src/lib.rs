//! # glmspec — GLM-Spectrum for MEG/EEG in pure Rust
//!
//! `glmspec` models how the power spectrum of a continuous recording varies
//! over time.  The recording is cut into overlapping windows, each window
//! becomes one observation of its spectrum, and an ordinary least-squares
//! GLM is fitted independently at every (frequency, channel) pair.  Fitted
//! first-level contrasts from many recordings then feed a group GLM and
//! non-parametric permutation tests.
//!
//! _Pure Rust: [RustFFT](https://crates.io/crates/rustfft) for the
//! transform, [nalgebra](https://crates.io/crates/nalgebra) for the SVD,
//! [rayon](https://crates.io/crates/rayon) for the embarrassingly parallel
//! loops._
//!
//! ## Pipeline overview
//!
//! ```text
//! TimeSeries [C, T]
//!   │
//!   ├─ window::SegmentSet       sliding windows (default 1 s, 50 % overlap)
//!   ├─ spectrum::stft           tapered DFT → [segment, freq, C]
//!   ├─ design::DesignConfig     constant + z-scored / unit-max / categorical
//!   ├─ glm::fit                 OLS per (freq, C): betas, copes, t
//!   │     └─→ GlmSpectrum  [contrast, freq, C]
//!   │
//!   ├─ group::GroupData         stack copes → [recording, contrast, freq, C]
//!   ├─ group::group_glm_spectrum
//!   │     └─→ GroupGlmSpectrum  [g_contrast, fl_contrast, freq, C]
//!   │
//!   └─ permute                  max-|t| and cluster permutation tests
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use glmspec::{glm_spectrum, simulate, DesignConfig, SpectrumConfig, TimeSeries};
//! use ndarray::Array2;
//!
//! // 10 s of a 10 Hz rhythm at 128 Hz
//! let n = 1280;
//! let x = simulate::sinusoid(10.0, 1.0, 1.0, n, 128.0);
//! let ts = TimeSeries::new(x.insert_axis(ndarray::Axis(0)), 128.0).unwrap();
//!
//! // Mean spectrum plus a linear trend over time
//! let trend: Vec<f64> = (0..n).map(|t| t as f64).collect();
//! let model = glm_spectrum(
//!     &ts,
//!     &SpectrumConfig::default(),
//!     &DesignConfig::new().covariate("Linear", trend),
//! ).unwrap();
//!
//! let cope = model.cope("Linear").unwrap();     // [freq, channel]
//! println!("trend at 10 Hz: {}", cope[[model.freq_index(10.0), 0]]);
//! ```
//!
//! ## Group inference
//!
//! ```no_run
//! use glmspec::{
//!     cluster_permutation, group_glm_spectrum, Adjacency, DesignConfig, GroupData,
//!     GlmSpectrum, PermutationConfig,
//! };
//!
//! # fn models() -> Vec<GlmSpectrum> { vec![] }
//! let data  = GroupData::from_models(&models()).unwrap();
//! let n_ch  = data.ch_names.len();
//! let group = group_glm_spectrum(data, &DesignConfig::new()).unwrap();
//!
//! let cfg = PermutationConfig { nperms: 500, seed: Some(42), ..Default::default() };
//! let res = cluster_permutation(&group, 0, 1, &Adjacency::none(n_ch), &cfg, None).unwrap();
//! for c in res.significant_clusters() {
//!     println!("cluster stat {:.2}, p = {:.3}", c.stat, c.p_value);
//! }
//! ```

pub mod adjacency;
pub mod config;
pub mod design;
pub mod error;
pub mod firstlevel;
pub mod glm;
pub mod group;
pub mod io;
pub mod linalg;
pub mod permute;
pub mod series;
pub mod simulate;
pub mod spectrum;
pub mod window;

// ── Crate-root re-exports ─────────────────────────────────────────────────
//
// Everything a downstream user is likely to need is available directly as
// `glmspec::Foo` without having to know the internal module layout.

// errors
pub use error::{GlmError, Result};

// config
pub use config::{ParallelConfig, PermutationConfig, SpectrumConfig, WindowParams};

// windowing + transform
pub use window::{SegmentSet, Window};
pub use spectrum::{
    band_indices, frequency_axis, stft, stft_complex,
    ComplexEstimate, SpectralEstimate, SpectrumMode,
};

// design + fitting
pub use design::{ContrastKind, Design, DesignConfig, RegressorKind, CONSTANT_NAME};
pub use glm::{fit, FittedGlm, OlsSolver};

// first level
pub use series::{SegmentedSeries, SpectrumInput, TimeSeries};
pub use firstlevel::{fit_batch, glm_spectrum, GlmSpectrum};

// group level + inference
pub use group::{group_glm_spectrum, GroupData, GroupGlmSpectrum};
pub use adjacency::Adjacency;
pub use permute::{
    cluster_permutation, find_clusters, max_stat_permutation,
    CancelToken, Cluster, ClusterResult, MaxStatResult, NullDistribution, PermutationScheme,
};

// io — safetensors helpers
pub use io::{
    load_glm_spectrum, load_group, save_glm_spectrum, save_group,
    RawData, StFile, StWriter,
};
