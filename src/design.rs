//! Design matrix construction.
//!
//! Regressors are declared by name on a [`DesignConfig`] and materialised by
//! [`DesignConfig::build`].  Declaration order is column order.  Each kind is
//! preprocessed differently:
//!
//! | kind          | preprocessing                         | fails when        |
//! |---------------|---------------------------------------|-------------------|
//! | `Constant`    | column of ones (implicit, first)      | —                 |
//! | `Covariate`   | z-transform `(x − μ) / σ`, `ddof = 0` | σ = 0             |
//! | `Confound`    | unit-max `x / max|x|`                 | all zeros         |
//! | `Categorical` | indicator `label == code`             | no matching rows  |
//! | `Parametric`  | none                                  | —                 |
//!
//! A z-transformed covariate is zero-mean, so adding it leaves the constant
//! term equal to the data mean.  A unit-max confound is generally not
//! zero-mean and turns the constant term into an intercept.
//!
//! Near-collinearity never blocks a build; it is exposed through
//! [`Design::singular_values`], [`Design::correlation`] and
//! [`Design::variance_inflation`].
use std::collections::HashSet;

use log::{debug, warn};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{GlmError, Result};
use crate::linalg;
use crate::window::SegmentSet;

pub const CONSTANT_NAME: &str = "Constant";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegressorKind {
    Constant,
    Covariate,
    Confound,
    Categorical,
    Parametric,
}

/// How a contrast behaves under the null hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContrastKind {
    /// Weights sum to zero: a comparison between regressors.
    Differential,
    /// Anything else: a mean or a single slope.
    Main,
}

#[derive(Debug, Clone, PartialEq)]
enum Values {
    Real(Vec<f64>),
    Labels { labels: Vec<i64>, code: i64 },
}

impl Values {
    fn len(&self) -> usize {
        match self {
            Values::Real(v) => v.len(),
            Values::Labels { labels, .. } => labels.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RegressorDecl {
    name: String,
    kind: RegressorKind,
    values: Values,
}

#[derive(Debug, Clone, PartialEq)]
struct ContrastDecl {
    name: String,
    weights: Vec<(String, f64)>,
}

/// Declarative description of a design matrix.
///
/// ```
/// use glmspec::DesignConfig;
///
/// let design = DesignConfig::new()
///     .covariate("Linear", (0..20).map(|i| i as f64).collect())
///     .confound("EOG", (0..20).map(|i| (i % 3) as f64).collect())
///     .build(20)
///     .unwrap();
/// assert_eq!(design.regressor_names, ["Constant", "Linear", "EOG"]);
/// assert_eq!(design.contrast_names, ["Constant", "Linear", "EOG"]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DesignConfig {
    constant: bool,
    simple_contrasts: bool,
    regressors: Vec<RegressorDecl>,
    contrasts: Vec<ContrastDecl>,
}

impl Default for DesignConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DesignConfig {
    /// Empty config with the implicit constant term enabled.
    pub fn new() -> Self {
        Self { constant: true, simple_contrasts: false, regressors: vec![], contrasts: vec![] }
    }

    /// Enable or suppress the implicit constant regressor.
    pub fn constant(mut self, enabled: bool) -> Self {
        self.constant = enabled;
        self
    }

    /// Zero-mean, unit-variance covariate.
    pub fn covariate(self, name: &str, values: Vec<f64>) -> Self {
        self.push(name, RegressorKind::Covariate, Values::Real(values))
    }

    /// Confound scaled by its maximum absolute value.
    pub fn confound(self, name: &str, values: Vec<f64>) -> Self {
        self.push(name, RegressorKind::Confound, Values::Real(values))
    }

    /// Indicator selecting the observations whose label equals `code`.
    pub fn categorical(self, name: &str, labels: Vec<i64>, code: i64) -> Self {
        self.push(name, RegressorKind::Categorical, Values::Labels { labels, code })
    }

    /// Regressor used exactly as given.
    pub fn parametric(self, name: &str, values: Vec<f64>) -> Self {
        self.push(name, RegressorKind::Parametric, Values::Real(values))
    }

    /// Named contrast.  Regressors not listed get weight 0.
    pub fn contrast(mut self, name: &str, weights: &[(&str, f64)]) -> Self {
        self.contrasts.push(ContrastDecl {
            name: name.to_string(),
            weights: weights.iter().map(|(r, w)| (r.to_string(), *w)).collect(),
        });
        self
    }

    /// Add one identity contrast per regressor, ahead of any named contrasts.
    pub fn simple_contrasts(mut self) -> Self {
        self.simple_contrasts = true;
        self
    }

    fn push(mut self, name: &str, kind: RegressorKind, values: Values) -> Self {
        self.regressors.push(RegressorDecl { name: name.to_string(), kind, values });
        self
    }

    pub fn has_constant(&self) -> bool {
        self.constant
    }

    /// Observation count implied by the declared regressors, if any.
    pub fn n_observations(&self) -> Option<usize> {
        self.regressors.first().map(|r| r.values.len())
    }

    /// Reduce sample-rate regressors to one value per segment.
    ///
    /// Real-valued regressors are averaged within each window; labels are
    /// taken from the sample at the window centre.
    pub fn per_segment(&self, segments: &SegmentSet) -> Result<Self> {
        let mut out = self.clone();
        for r in out.regressors.iter_mut() {
            r.values = match &r.values {
                Values::Real(v) => Values::Real(segments.regressor(v)?.to_vec()),
                Values::Labels { labels, code } => {
                    if labels.len() != segments.n_samples {
                        return Err(GlmError::shape("regressor samples", segments.n_samples, labels.len()));
                    }
                    let mid = segments.nperseg / 2;
                    Values::Labels {
                        labels: segments.starts.iter().map(|&s| labels[s + mid]).collect(),
                        code: *code,
                    }
                }
            };
        }
        Ok(out)
    }

    /// Keep only the observations where `keep` is true.
    pub fn select_rows(&self, keep: &[bool]) -> Result<Self> {
        let mut out = self.clone();
        for r in out.regressors.iter_mut() {
            if r.values.len() != keep.len() {
                return Err(GlmError::shape("observation mask", r.values.len(), keep.len()));
            }
            let pick = |i: usize| keep[i];
            r.values = match &r.values {
                Values::Real(v) => Values::Real(
                    v.iter().enumerate().filter(|(i, _)| pick(*i)).map(|(_, &x)| x).collect(),
                ),
                Values::Labels { labels, code } => Values::Labels {
                    labels: labels.iter().enumerate().filter(|(i, _)| pick(*i)).map(|(_, &x)| x).collect(),
                    code: *code,
                },
            };
        }
        Ok(out)
    }

    /// Materialise the design for `n_obs` observations.
    pub fn build(&self, n_obs: usize) -> Result<Design> {
        if n_obs == 0 {
            return Err(GlmError::config("observations", "design needs at least one observation"));
        }
        let mut names: Vec<String> = vec![];
        let mut kinds: Vec<RegressorKind> = vec![];
        let mut columns: Vec<Vec<f64>> = vec![];

        if self.constant {
            names.push(CONSTANT_NAME.to_string());
            kinds.push(RegressorKind::Constant);
            columns.push(vec![1.0; n_obs]);
        }

        let mut seen: HashSet<String> = names.iter().cloned().collect();
        for r in &self.regressors {
            if !seen.insert(r.name.clone()) {
                return Err(GlmError::config("regressor name", format!("`{}` declared twice", r.name)));
            }
            if r.values.len() != n_obs {
                return Err(GlmError::shape("regressor length", n_obs, r.values.len()));
            }
            let col = match (&r.values, r.kind) {
                (Values::Real(v), RegressorKind::Covariate) => ztransform(&r.name, v)?,
                (Values::Real(v), RegressorKind::Confound) => unitmax(&r.name, v)?,
                (Values::Labels { labels, code }, _) => indicator(&r.name, labels, *code)?,
                (Values::Real(v), _) => v.clone(),
            };
            names.push(r.name.clone());
            kinds.push(r.kind);
            columns.push(col);
        }

        if names.is_empty() {
            return Err(GlmError::config("regressors", "design has no regressors"));
        }

        let n_reg = names.len();
        let matrix = Array2::from_shape_fn((n_obs, n_reg), |(i, j)| columns[j][i]);

        // Contrasts
        let mut contrast_names: Vec<String> = vec![];
        let mut rows: Vec<Vec<f64>> = vec![];
        if self.simple_contrasts || self.contrasts.is_empty() {
            for (j, n) in names.iter().enumerate() {
                let mut w = vec![0.0; n_reg];
                w[j] = 1.0;
                contrast_names.push(n.clone());
                rows.push(w);
            }
        }
        for c in &self.contrasts {
            if contrast_names.contains(&c.name) {
                return Err(GlmError::config("contrast name", format!("`{}` declared twice", c.name)));
            }
            let mut w = vec![0.0; n_reg];
            for (reg, weight) in &c.weights {
                let j = names.iter().position(|n| n == reg).ok_or_else(|| GlmError::UnknownName {
                    kind: "regressor",
                    name: reg.clone(),
                })?;
                w[j] = *weight;
            }
            contrast_names.push(c.name.clone());
            rows.push(w);
        }
        let contrasts = Array2::from_shape_fn((rows.len(), n_reg), |(i, j)| rows[i][j]);

        let design = Design {
            matrix,
            regressor_names: names,
            regressor_kinds: kinds,
            contrasts,
            contrast_names,
        };
        debug!(
            "design: {} observations × {} regressors, {} contrasts",
            n_obs,
            n_reg,
            design.n_contrasts()
        );
        if design.is_rank_deficient() {
            warn!(
                "design is rank deficient (rank {} < {} regressors); estimates are minimum-norm",
                design.rank(),
                n_reg
            );
        }
        Ok(design)
    }
}

fn ztransform(name: &str, v: &[f64]) -> Result<Vec<f64>> {
    let n = v.len() as f64;
    let mean = v.iter().sum::<f64>() / n;
    let std = (v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
    if !(std.is_finite() && std > 0.0) {
        return Err(GlmError::DegenerateRegressor {
            name: name.to_string(),
            reason: format!("standard deviation is {std}"),
        });
    }
    Ok(v.iter().map(|x| (x - mean) / std).collect())
}

fn unitmax(name: &str, v: &[f64]) -> Result<Vec<f64>> {
    let max = v.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
    if !(max.is_finite() && max > 0.0) {
        return Err(GlmError::DegenerateRegressor {
            name: name.to_string(),
            reason: format!("maximum absolute value is {max}"),
        });
    }
    Ok(v.iter().map(|x| x / max).collect())
}

fn indicator(name: &str, labels: &[i64], code: i64) -> Result<Vec<f64>> {
    let col: Vec<f64> = labels.iter().map(|&l| if l == code { 1.0 } else { 0.0 }).collect();
    if col.iter().all(|&v| v == 0.0) {
        return Err(GlmError::DegenerateRegressor {
            name: name.to_string(),
            reason: format!("no observation has label {code}"),
        });
    }
    Ok(col)
}

/// A materialised design matrix with its contrasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Design {
    /// [observation, regressor]
    pub matrix: Array2<f64>,
    pub regressor_names: Vec<String>,
    pub regressor_kinds: Vec<RegressorKind>,
    /// [contrast, regressor]
    pub contrasts: Array2<f64>,
    pub contrast_names: Vec<String>,
}

impl Design {
    pub fn n_observations(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn n_regressors(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn n_contrasts(&self) -> usize {
        self.contrasts.nrows()
    }

    pub fn contrast_index(&self, name: &str) -> Result<usize> {
        self.contrast_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| GlmError::UnknownName { kind: "contrast", name: name.to_string() })
    }

    pub fn regressor_index(&self, name: &str) -> Result<usize> {
        self.regressor_names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| GlmError::UnknownName { kind: "regressor", name: name.to_string() })
    }

    pub fn contrast_kind(&self, contrast: usize) -> ContrastKind {
        let w = self.contrasts.row(contrast);
        let nonzero = w.iter().filter(|v| **v != 0.0).count();
        if nonzero > 1 && w.sum().abs() < 1e-12 {
            ContrastKind::Differential
        } else {
            ContrastKind::Main
        }
    }

    /// Same regressors and contrasts over a different matrix.
    pub fn with_matrix(&self, matrix: Array2<f64>) -> Result<Self> {
        if matrix.dim() != self.matrix.dim() {
            return Err(GlmError::shape(
                "design matrix",
                format!("{:?}", self.matrix.dim()),
                format!("{:?}", matrix.dim()),
            ));
        }
        Ok(Self { matrix, ..self.clone() })
    }

    pub fn singular_values(&self) -> Array1<f64> {
        linalg::singular_values(&self.matrix)
    }

    pub fn rank(&self) -> usize {
        linalg::matrix_rank(&self.matrix)
    }

    pub fn is_rank_deficient(&self) -> bool {
        self.rank() < self.n_regressors()
    }

    /// Pearson correlation between regressors.  Entries involving a
    /// zero-variance column (the constant) are NaN.
    pub fn correlation(&self) -> Array2<f64> {
        let n = self.n_regressors();
        let centred = &self.matrix - &self.matrix.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n));
        let norms: Vec<f64> = centred.columns().into_iter().map(|c| c.dot(&c).sqrt()).collect();
        Array2::from_shape_fn((n, n), |(i, j)| {
            if norms[i] > 0.0 && norms[j] > 0.0 {
                centred.column(i).dot(&centred.column(j)) / (norms[i] * norms[j])
            } else {
                f64::NAN
            }
        })
    }

    /// Variance inflation factor `1 / (1 − R²)` of each regressor explained
    /// by all the others.  NaN for zero-variance columns.
    pub fn variance_inflation(&self) -> Array1<f64> {
        let n_reg = self.n_regressors();
        let mut vif = Array1::from_elem(n_reg, f64::NAN);
        for j in 0..n_reg {
            let y = self.matrix.column(j);
            let mean = y.mean().unwrap_or(0.0);
            let tss: f64 = y.iter().map(|v| (v - mean).powi(2)).sum();
            if tss <= 0.0 {
                continue;
            }
            let others: Vec<usize> = (0..n_reg).filter(|&k| k != j).collect();
            if others.is_empty() {
                vif[j] = 1.0;
                continue;
            }
            let x = self.matrix.select(Axis(1), &others);
            let beta = linalg::pinv(&x).dot(&y);
            let resid = &y - &x.dot(&beta);
            let rss = resid.dot(&resid);
            // Without a constant among the others, R² is still taken about the mean.
            let r2 = 1.0 - rss / tss;
            vif[j] = if r2 < 1.0 { 1.0 / (1.0 - r2) } else { f64::INFINITY };
        }
        vif
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_is_first_and_implicit() {
        let d = DesignConfig::new().build(5).unwrap();
        assert_eq!(d.regressor_names, ["Constant"]);
        assert!(d.matrix.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn covariate_is_ztransformed() {
        let d = DesignConfig::new().covariate("x", vec![1.0, 2.0, 3.0, 4.0]).build(4).unwrap();
        let col = d.matrix.column(1);
        approx::assert_abs_diff_eq!(col.mean().unwrap(), 0.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(col.std(0.0), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn confound_is_unitmax() {
        let d = DesignConfig::new().confound("c", vec![0.0, -2.0, 4.0]).build(3).unwrap();
        assert_eq!(d.matrix.column(1).to_vec(), vec![0.0, -0.5, 1.0]);
    }

    #[test]
    fn constant_covariate_is_degenerate() {
        let r = DesignConfig::new().covariate("flat", vec![2.0; 6]).build(6);
        assert!(matches!(r, Err(GlmError::DegenerateRegressor { name, .. }) if name == "flat"));
        let r = DesignConfig::new().confound("zeros", vec![0.0; 6]).build(6);
        assert!(matches!(r, Err(GlmError::DegenerateRegressor { .. })));
    }

    #[test]
    fn contrast_weights_default_to_zero() {
        let d = DesignConfig::new()
            .constant(false)
            .categorical("A", vec![0, 0, 1, 1], 0)
            .categorical("B", vec![0, 0, 1, 1], 1)
            .contrast("A>B", &[("A", 1.0), ("B", -1.0)])
            .contrast("A only", &[("A", 1.0)])
            .build(4)
            .unwrap();
        assert_eq!(d.contrasts.row(0).to_vec(), vec![1.0, -1.0]);
        assert_eq!(d.contrasts.row(1).to_vec(), vec![1.0, 0.0]);
        assert_eq!(d.contrast_kind(0), ContrastKind::Differential);
        assert_eq!(d.contrast_kind(1), ContrastKind::Main);
    }

    #[test]
    fn unknown_contrast_regressor() {
        let r = DesignConfig::new().contrast("bad", &[("nope", 1.0)]).build(3);
        assert!(matches!(r, Err(GlmError::UnknownName { .. })));
    }

    #[test]
    fn length_mismatch_is_shape_error() {
        let r = DesignConfig::new().covariate("x", vec![1.0, 2.0]).build(3);
        assert!(matches!(r, Err(GlmError::InputShapeMismatch { .. })));
    }

    #[test]
    fn duplicated_column_is_flagged_not_rejected() {
        let v = vec![1.0, 3.0, 2.0, 5.0];
        let d = DesignConfig::new()
            .parametric("a", v.clone())
            .parametric("b", v)
            .build(4)
            .unwrap();
        assert!(d.is_rank_deficient());
        assert_eq!(d.rank(), 2);
        assert!(d.variance_inflation()[1].is_infinite() || d.variance_inflation()[1] > 1e6);
    }

    #[test]
    fn correlation_blanks_constant() {
        let d = DesignConfig::new().covariate("x", vec![1.0, 2.0, 4.0]).build(3).unwrap();
        let c = d.correlation();
        assert!(c[[0, 0]].is_nan());
        approx::assert_abs_diff_eq!(c[[1, 1]], 1.0, epsilon = 1e-12);
    }
}
