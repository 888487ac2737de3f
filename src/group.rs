//! Group-level GLM-Spectrum.
//!
//! First-level copes from many recordings are stacked along a new leading
//! "recording" axis, giving group data shaped
//! [recording, fl_contrast, freq, channel].  The same OLS machinery is then
//! applied with a group design whose rows are recordings, giving model
//! arrays shaped [g_contrast, fl_contrast, freq, channel].
use log::info;
use ndarray::{s, Array1, Array2, Array4, ArrayView2, Axis, Ix2};

use crate::design::{Design, DesignConfig};
use crate::error::{GlmError, Result};
use crate::firstlevel::GlmSpectrum;
use crate::glm::{self, FittedGlm};

/// Stacked first-level copes.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupData {
    /// [recording, fl_contrast, freq, channel]
    pub data: Array4<f64>,
    pub fl_contrast_names: Vec<String>,
    pub freqs: Array1<f64>,
    pub ch_names: Vec<String>,
}

impl GroupData {
    /// Stack the copes of first-level models sharing the same axes.
    pub fn from_models(models: &[GlmSpectrum]) -> Result<Self> {
        let first = models
            .first()
            .ok_or_else(|| GlmError::config("models", "need at least one first-level model"))?;
        let (n_con, n_freq, n_ch) = (first.design.n_contrasts(), first.n_freqs(), first.n_channels());

        for (i, m) in models.iter().enumerate().skip(1) {
            if m.contrast_names() != first.contrast_names() {
                return Err(GlmError::shape(
                    "first-level contrasts",
                    format!("{:?}", first.contrast_names()),
                    format!("{:?} (recording {i})", m.contrast_names()),
                ));
            }
            if m.n_freqs() != n_freq || m.freqs.iter().zip(first.freqs.iter()).any(|(a, b)| (a - b).abs() > 1e-9) {
                return Err(GlmError::shape("frequency axis", n_freq, format!("{} (recording {i})", m.n_freqs())));
            }
            if m.n_channels() != n_ch {
                return Err(GlmError::shape("channels", n_ch, format!("{} (recording {i})", m.n_channels())));
            }
        }

        let mut data = Array4::<f64>::zeros((models.len(), n_con, n_freq, n_ch));
        for (i, m) in models.iter().enumerate() {
            let copes = m
                .model
                .copes
                .view()
                .into_dimensionality::<ndarray::Ix3>()
                .map_err(|e| GlmError::Format(e.to_string()))?;
            data.slice_mut(s![i, .., .., ..]).assign(&copes);
        }
        Ok(Self {
            data,
            fl_contrast_names: first.contrast_names().to_vec(),
            freqs: first.freqs.clone(),
            ch_names: first.ch_names.clone(),
        })
    }

    /// Wrap a precomputed [recording, fl_contrast, freq, channel] stack.
    pub fn from_array(
        data: Array4<f64>,
        fl_contrast_names: Vec<String>,
        freqs: Array1<f64>,
        ch_names: Vec<String>,
    ) -> Result<Self> {
        let (_, n_con, n_freq, n_ch) = data.dim();
        if fl_contrast_names.len() != n_con {
            return Err(GlmError::shape("first-level contrast names", n_con, fl_contrast_names.len()));
        }
        if freqs.len() != n_freq {
            return Err(GlmError::shape("frequency axis", n_freq, freqs.len()));
        }
        if ch_names.len() != n_ch {
            return Err(GlmError::shape("channel names", n_ch, ch_names.len()));
        }
        Ok(Self { data, fl_contrast_names, freqs, ch_names })
    }

    pub fn n_recordings(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn fl_contrast_index(&self, name: &str) -> Result<usize> {
        self.fl_contrast_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| GlmError::UnknownName { kind: "first-level contrast", name: name.to_string() })
    }

    /// Standard deviation of each recording across all remaining axes.
    /// Recordings far above the rest are candidate outliers.
    pub fn outlier_scores(&self) -> Array1<f64> {
        self.data
            .outer_iter()
            .map(|rec| rec.std(0.0))
            .collect()
    }

    /// One first-level contrast flattened to [recording, freq · channel].
    pub fn fl_contrast_matrix(&self, fl_contrast: usize) -> Result<Array2<f64>> {
        if fl_contrast >= self.fl_contrast_names.len() {
            return Err(GlmError::config(
                "fl_contrast",
                format!("index {fl_contrast} out of range for {} contrasts", self.fl_contrast_names.len()),
            ));
        }
        let (n_rec, _, n_freq, n_ch) = self.data.dim();
        let slab = self.data.index_axis(Axis(1), fl_contrast).to_owned();
        Ok(slab.into_shape_with_order((n_rec, n_freq * n_ch))?)
    }
}

/// A fitted group model.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupGlmSpectrum {
    pub data: GroupData,
    pub design: Design,
    /// Arrays shaped [g_contrast | regressor, fl_contrast, freq, channel].
    pub model: FittedGlm,
}

/// Fit a group design across stacked first-level results.
pub fn group_glm_spectrum(data: GroupData, design_cfg: &DesignConfig) -> Result<GroupGlmSpectrum> {
    let n_rec = data.n_recordings();
    if let Some(n) = design_cfg.n_observations() {
        if n != n_rec {
            return Err(GlmError::shape("group observations", n_rec, n));
        }
    }
    let design = design_cfg.build(n_rec)?;
    let model = glm::fit(&design, &data.data.clone().into_dyn())?;
    info!(
        "fitted group GLM-Spectrum: {} recordings, {} group contrasts × {} first-level contrasts",
        n_rec,
        design.n_contrasts(),
        data.fl_contrast_names.len()
    );
    Ok(GroupGlmSpectrum { data, design, model })
}

impl GroupGlmSpectrum {
    fn slab<'a>(&self, arr: ndarray::ArrayViewD<'a, f64>, fl_contrast: usize) -> Result<ArrayView2<'a, f64>> {
        if fl_contrast >= self.data.fl_contrast_names.len() {
            return Err(GlmError::config("fl_contrast", format!("index {fl_contrast} out of range")));
        }
        arr.index_axis_move(Axis(0), fl_contrast)
            .into_dimensionality::<Ix2>()
            .map_err(|e| GlmError::Format(e.to_string()))
    }

    fn check_gcontrast(&self, g: usize) -> Result<()> {
        if g >= self.design.n_contrasts() {
            return Err(GlmError::config(
                "g_contrast",
                format!("index {g} out of range for {} contrasts", self.design.n_contrasts()),
            ));
        }
        Ok(())
    }

    /// Group cope map [freq, channel].
    pub fn cope(&self, g_contrast: usize, fl_contrast: usize) -> Result<ArrayView2<'_, f64>> {
        self.check_gcontrast(g_contrast)?;
        self.slab(self.model.cope(g_contrast), fl_contrast)
    }

    /// Group t-statistic map [freq, channel].
    pub fn tstat(&self, g_contrast: usize, fl_contrast: usize) -> Result<ArrayView2<'_, f64>> {
        self.check_gcontrast(g_contrast)?;
        self.slab(self.model.tstat(g_contrast), fl_contrast)
    }

    pub fn n_freqs(&self) -> usize {
        self.data.freqs.len()
    }

    pub fn n_channels(&self) -> usize {
        self.data.ch_names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(n_rec: usize) -> GroupData {
        let data = Array4::from_shape_fn((n_rec, 2, 3, 2), |(r, c, f, ch)| {
            (r as f64 + 1.0) * (c as f64 + 1.0) + f as f64 * 0.1 + ch as f64
        });
        GroupData::from_array(
            data,
            vec!["Constant".into(), "Linear".into()],
            Array1::from(vec![1.0, 2.0, 3.0]),
            vec!["a".into(), "b".into()],
        )
        .unwrap()
    }

    #[test]
    fn group_mean_of_stack() {
        let g = group_glm_spectrum(stack(4), &DesignConfig::new()).unwrap();
        // mean over r of (r+1) = 2.5
        let cope = g.cope(0, 0).unwrap();
        approx::assert_abs_diff_eq!(cope[[0, 0]], 2.5, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(cope[[2, 1]], 2.5 + 0.2 + 1.0, epsilon = 1e-12);
    }

    #[test]
    fn design_rows_must_match_recordings() {
        let cfg = DesignConfig::new().covariate("age", vec![20.0, 30.0, 40.0]);
        let r = group_glm_spectrum(stack(4), &cfg);
        assert!(matches!(r, Err(GlmError::InputShapeMismatch { what: "group observations", .. })));
    }

    #[test]
    fn fl_contrast_matrix_is_row_major() {
        let g = stack(3);
        let m = g.fl_contrast_matrix(1).unwrap();
        assert_eq!(m.dim(), (3, 6));
        approx::assert_abs_diff_eq!(m[[2, 5]], g.data[[2, 1, 2, 1]], epsilon = 1e-12);
    }

    #[test]
    fn outlier_scores_one_per_recording() {
        assert_eq!(stack(5).outlier_scores().len(), 5);
    }
}
