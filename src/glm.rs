//! Ordinary least-squares fitting, one model per target.
//!
//! For a design `X` [obs, reg], contrasts `C` [con, reg] and data `y`
//! [obs, targets...], every target column is fitted independently:
//!
//! ```text
//! β        = pinv(X) · y
//! cope     = C · β
//! σ²       = ‖y − Xβ‖² / (n_obs − rank X)
//! varcope  = σ² · diag(C · pinv(XᵀX) · Cᵀ)
//! t        = cope / √varcope          (NaN when varcope ≤ 0 or no dof)
//! ```
//!
//! The pseudo-inverse makes rank-deficient designs yield minimum-norm
//! estimates rather than failing.  Columns are fitted in parallel; the design
//! is shared read-only and every column writes to its own output slot, so the
//! result does not depend on scheduling.
use log::{debug, warn};
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayViewD, Axis, IxDyn, Zip};

use crate::design::Design;
use crate::error::{GlmError, Result};
use crate::linalg;

/// Quantities that depend only on the design, computed once per fit.
#[derive(Debug, Clone)]
pub struct OlsSolver {
    x: Array2<f64>,
    pinv_x: Array2<f64>,
    contrasts: Array2<f64>,
    /// `w · pinv(XᵀX) · wᵀ` per contrast.
    contrast_var: Array1<f64>,
    rank: usize,
    dof: usize,
}

impl OlsSolver {
    pub fn new(design: &Design) -> Self {
        let x = design.matrix.clone();
        let pinv_x = linalg::pinv(&x);
        let xtx_pinv = linalg::pinv(&x.t().dot(&x));
        let contrast_var: Array1<f64> = design
            .contrasts
            .rows()
            .into_iter()
            .map(|w| w.dot(&xtx_pinv.dot(&w)))
            .collect();
        let rank = linalg::matrix_rank(&x);
        let dof = x.nrows().saturating_sub(rank);
        Self { x, pinv_x, contrasts: design.contrasts.clone(), contrast_var, rank, dof }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn dof(&self) -> usize {
        self.dof
    }

    fn check_rows(&self, y: &Array2<f64>) -> Result<()> {
        if y.nrows() != self.x.nrows() {
            return Err(GlmError::shape("observations", self.x.nrows(), y.nrows()));
        }
        Ok(())
    }

    fn residual_variance(&self, rss: f64) -> f64 {
        if self.dof == 0 {
            f64::NAN
        } else {
            rss / self.dof as f64
        }
    }

    fn column_rss(&self, yc: &ArrayView1<f64>, beta: &Array1<f64>) -> f64 {
        let resid = yc - &self.x.dot(beta);
        resid.dot(&resid)
    }

    /// Fit every column of `y` [obs, targets].
    pub fn fit_columns(&self, y: &Array2<f64>) -> Result<ColumnFit> {
        self.check_rows(y)?;
        let n_t = y.ncols();
        let n_reg = self.x.ncols();
        let n_con = self.contrasts.nrows();

        let mut betas = Array2::<f64>::zeros((n_reg, n_t));
        let mut copes = Array2::<f64>::zeros((n_con, n_t));
        let mut varcopes = Array2::<f64>::zeros((n_con, n_t));
        let mut tstats = Array2::<f64>::zeros((n_con, n_t));
        let mut rss = Array1::<f64>::zeros(n_t);

        Zip::from(betas.columns_mut())
            .and(copes.columns_mut())
            .and(varcopes.columns_mut())
            .and(tstats.columns_mut())
            .and(&mut rss)
            .and(y.columns())
            .par_for_each(|mut b, mut c, mut v, mut t, r, yc| {
                let beta = self.pinv_x.dot(&yc);
                *r = self.column_rss(&yc, &beta);
                let resvar = self.residual_variance(*r);
                c.assign(&self.contrasts.dot(&beta));
                b.assign(&beta);
                for k in 0..c.len() {
                    v[k] = resvar * self.contrast_var[k];
                    t[k] = tstat(c[k], v[k]);
                }
            });

        Ok(ColumnFit { betas, copes, varcopes, tstats, ss_residual: rss })
    }

    /// t-statistics of one contrast for every column, single-threaded.
    ///
    /// Used inside permutation draws, which are already parallel.
    pub fn contrast_tstats(&self, contrast: usize, y: &Array2<f64>) -> Result<Array1<f64>> {
        self.check_rows(y)?;
        if contrast >= self.contrasts.nrows() {
            return Err(GlmError::config(
                "contrast",
                format!("index {contrast} out of range for {} contrasts", self.contrasts.nrows()),
            ));
        }
        let w = self.contrasts.row(contrast);
        let cvar = self.contrast_var[contrast];
        Ok(y.columns()
            .into_iter()
            .map(|yc| {
                let beta = self.pinv_x.dot(&yc);
                let resvar = self.residual_variance(self.column_rss(&yc, &beta));
                tstat(w.dot(&beta), resvar * cvar)
            })
            .collect())
    }
}

#[inline]
fn tstat(cope: f64, varcope: f64) -> f64 {
    if varcope > 0.0 && varcope.is_finite() {
        cope / varcope.sqrt()
    } else {
        f64::NAN
    }
}

/// Flat [reg|con, target] result of [`OlsSolver::fit_columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFit {
    pub betas: Array2<f64>,
    pub copes: Array2<f64>,
    pub varcopes: Array2<f64>,
    pub tstats: Array2<f64>,
    pub ss_residual: Array1<f64>,
}

/// Fitted parameters for every target.  Immutable once computed.
///
/// Leading axis is regressor (`betas`) or contrast (`copes`, `varcopes`,
/// `tstats`); the remaining axes are the data's non-observation axes.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedGlm {
    pub betas: ArrayD<f64>,
    pub copes: ArrayD<f64>,
    pub varcopes: ArrayD<f64>,
    pub tstats: ArrayD<f64>,
    pub ss_residual: ArrayD<f64>,
    pub dof: usize,
}

impl FittedGlm {
    pub fn cope(&self, contrast: usize) -> ArrayViewD<'_, f64> {
        self.copes.index_axis(Axis(0), contrast)
    }

    pub fn varcope(&self, contrast: usize) -> ArrayViewD<'_, f64> {
        self.varcopes.index_axis(Axis(0), contrast)
    }

    pub fn tstat(&self, contrast: usize) -> ArrayViewD<'_, f64> {
        self.tstats.index_axis(Axis(0), contrast)
    }

    /// Shape of one target map (everything after the leading axis).
    pub fn target_shape(&self) -> &[usize] {
        &self.ss_residual.shape()[..]
    }
}

/// Flatten `data` [obs, ...] to [obs, targets] in row-major order.
pub fn flatten_targets(data: &ArrayD<f64>) -> Result<(Array2<f64>, Vec<usize>)> {
    if data.ndim() == 0 {
        return Err(GlmError::shape("data dimensions", "at least 1", 0));
    }
    let n_obs = data.shape()[0];
    let target_shape: Vec<usize> = data.shape()[1..].to_vec();
    let n_t: usize = target_shape.iter().product();
    let y = data
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((n_obs, n_t))?;
    Ok((y, target_shape))
}

fn unflatten(a: Array2<f64>, target_shape: &[usize]) -> Result<ArrayD<f64>> {
    let mut shape = vec![a.nrows()];
    shape.extend_from_slice(target_shape);
    Ok(a.into_shape_with_order(IxDyn(&shape))?)
}

/// Fit `design` to `data` [obs, ...].
pub fn fit(design: &Design, data: &ArrayD<f64>) -> Result<FittedGlm> {
    let (y, target_shape) = flatten_targets(data)?;
    if y.nrows() != design.n_observations() {
        return Err(GlmError::shape("observations", design.n_observations(), y.nrows()));
    }
    let solver = OlsSolver::new(design);
    if solver.dof() == 0 {
        warn!("design leaves no residual degrees of freedom; t-statistics are NaN");
    }
    let cols = solver.fit_columns(&y)?;
    debug!(
        "glm: {} observations, {} targets, rank {}, dof {}",
        y.nrows(),
        y.ncols(),
        solver.rank(),
        solver.dof()
    );

    let ss_residual = cols
        .ss_residual
        .into_shape_with_order(IxDyn(&target_shape))?;
    Ok(FittedGlm {
        betas: unflatten(cols.betas, &target_shape)?,
        copes: unflatten(cols.copes, &target_shape)?,
        varcopes: unflatten(cols.varcopes, &target_shape)?,
        tstats: unflatten(cols.tstats, &target_shape)?,
        ss_residual,
        dof: solver.dof(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::DesignConfig;
    use ndarray::array;

    #[test]
    fn simple_regression_recovers_slope() {
        // y = 2 + 3x exactly: betas exact, residual variance at round-off level.
        let x = vec![0.0, 1.0, 2.0, 3.0];
        let design = DesignConfig::new().parametric("x", x.clone()).build(4).unwrap();
        let y = Array2::from_shape_fn((4, 1), |(i, _)| 2.0 + 3.0 * x[i]).into_dyn();
        let fit = fit(&design, &y).unwrap();
        approx::assert_abs_diff_eq!(fit.betas[[0, 0]], 2.0, epsilon = 1e-10);
        approx::assert_abs_diff_eq!(fit.betas[[1, 0]], 3.0, epsilon = 1e-10);
        let t = fit.tstats[[1, 0]];
        assert!(t.is_nan() || t.abs() > 1e6);
    }

    #[test]
    fn varcope_matches_textbook_one_sample_t() {
        let y = array![[1.0], [2.0], [4.0], [5.0]].into_dyn();
        let design = DesignConfig::new().build(4).unwrap();
        let fit = fit(&design, &y).unwrap();
        // mean 3, sample variance 10/3, se² = (10/3)/4
        approx::assert_abs_diff_eq!(fit.copes[[0, 0]], 3.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(fit.varcopes[[0, 0]], 10.0 / 12.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(fit.tstats[[0, 0]], 3.0 / (10.0_f64 / 12.0).sqrt(), epsilon = 1e-12);
        assert_eq!(fit.dof, 3);
    }

    #[test]
    fn observation_mismatch_is_error() {
        let design = DesignConfig::new().build(4).unwrap();
        let y = Array2::<f64>::zeros((5, 2)).into_dyn();
        assert!(matches!(fit(&design, &y), Err(GlmError::InputShapeMismatch { .. })));
    }

    #[test]
    fn contrast_tstats_agree_with_full_fit() {
        let x = vec![0.3, -1.0, 2.0, 0.5, 1.5, -0.7];
        let design = DesignConfig::new().parametric("x", x).build(6).unwrap();
        let y = Array2::from_shape_fn((6, 3), |(i, j)| ((i * 7 + j * 3) % 5) as f64);
        let solver = OlsSolver::new(&design);
        let full = solver.fit_columns(&y).unwrap();
        let t1 = solver.contrast_tstats(1, &y).unwrap();
        for j in 0..3 {
            approx::assert_abs_diff_eq!(t1[j], full.tstats[[1, j]], epsilon = 1e-12);
        }
    }
}
