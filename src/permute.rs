//! Non-parametric inference on a group GLM-Spectrum.
//!
//! Each null draw randomises the group design, refits, and keeps one number:
//! the largest |t| (max-statistic test) or the largest |cluster statistic|
//! (cluster test).  Draw 0 is always the unpermuted design, so the observed
//! statistic is part of its own null.
//!
//! Only regressors with a non-zero weight in the tested contrast are
//! randomised:
//!
//! - **sign-flip** multiplies each recording's row of those regressors by ±1,
//!   valid when their sign is arbitrary under the null (group means);
//! - **row-shuffle** permutes those rows across recordings, valid when the
//!   rows are exchangeable under the null (differential contrasts and
//!   covariate slopes).
//!
//! Draws run in parallel.  Draw `i` seeds its own RNG from `(seed, i)`, so a
//! fixed seed reproduces the null exactly regardless of worker count.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::adjacency::Adjacency;
use crate::config::{ParallelConfig, PermutationConfig};
use crate::design::{ContrastKind, Design, RegressorKind};
use crate::error::{GlmError, Result};
use crate::glm::OlsSolver;
use crate::group::GroupGlmSpectrum;

/// How the group design is randomised for each null draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermutationScheme {
    /// Sign-flip for means of constant or indicator regressors, row-shuffle
    /// for differential contrasts and anything involving a covariate.
    #[default]
    Auto,
    SignFlip,
    RowShuffle,
}

impl PermutationScheme {
    pub fn resolve(self, design: &Design, contrast: usize) -> Self {
        match self {
            PermutationScheme::Auto => {
                if design.contrast_kind(contrast) == ContrastKind::Differential {
                    return PermutationScheme::RowShuffle;
                }
                // Flipping a covariate's sign is only exchangeable when its
                // distribution is symmetric.
                let mean_only = design
                    .contrasts
                    .row(contrast)
                    .iter()
                    .zip(&design.regressor_kinds)
                    .filter(|(&w, _)| w != 0.0)
                    .all(|(_, k)| matches!(k, RegressorKind::Constant | RegressorKind::Categorical));
                if mean_only {
                    PermutationScheme::SignFlip
                } else {
                    PermutationScheme::RowShuffle
                }
            }
            other => other,
        }
    }
}

/// Shared flag that stops a permutation run from issuing new draws.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Contiguous supra-threshold region of a [freq, channel] t-map.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Sum of the t-values inside the cluster (signed).
    pub stat: f64,
    /// (freq index, channel index) of every member.
    pub cells: Vec<(usize, usize)>,
    /// Fraction of null draws at least as extreme.  NaN until tested.
    pub p_value: f64,
    pub significant: bool,
}

impl Cluster {
    pub fn is_positive(&self) -> bool {
        self.stat > 0.0
    }

    /// Inclusive frequency-index range spanned by the cluster.
    pub fn freq_range(&self) -> (usize, usize) {
        let lo = self.cells.iter().map(|c| c.0).min().unwrap_or(0);
        let hi = self.cells.iter().map(|c| c.0).max().unwrap_or(0);
        (lo, hi)
    }
}

/// Connected regions where |t| exceeds `threshold`, split by sign and
/// sorted by decreasing |stat|.  NaN cells never join a cluster.
pub fn find_clusters(tstats: &ArrayView2<f64>, threshold: f64, adjacency: &Adjacency) -> Result<Vec<Cluster>> {
    let (n_freq, n_ch) = tstats.dim();
    if adjacency.n_channels() != n_ch {
        return Err(GlmError::shape("adjacency channels", n_ch, adjacency.n_channels()));
    }
    let sign_of = |f: usize, c: usize| -> i8 {
        let t = tstats[[f, c]];
        if t > threshold {
            1
        } else if t < -threshold {
            -1
        } else {
            0
        }
    };

    let mut visited = Array2::<bool>::from_elem((n_freq, n_ch), false);
    let mut clusters = vec![];
    let mut queue = VecDeque::new();

    for f0 in 0..n_freq {
        for c0 in 0..n_ch {
            let sign = sign_of(f0, c0);
            if sign == 0 || visited[[f0, c0]] {
                continue;
            }
            visited[[f0, c0]] = true;
            queue.push_back((f0, c0));
            let mut cells = vec![];
            let mut stat = 0.0;
            while let Some((f, c)) = queue.pop_front() {
                cells.push((f, c));
                stat += tstats[[f, c]];
                let along_freq = [f.checked_sub(1), (f + 1 < n_freq).then_some(f + 1)];
                let candidates = along_freq
                    .into_iter()
                    .flatten()
                    .map(|nf| (nf, c))
                    .chain(adjacency.neighbours(c).iter().map(|&nc| (f, nc)));
                for (nf, nc) in candidates {
                    if !visited[[nf, nc]] && sign_of(nf, nc) == sign {
                        visited[[nf, nc]] = true;
                        queue.push_back((nf, nc));
                    }
                }
            }
            cells.sort_unstable();
            clusters.push(Cluster { stat, cells, p_value: f64::NAN, significant: false });
        }
    }
    clusters.sort_by(|a, b| b.stat.abs().total_cmp(&a.stat.abs()));
    Ok(clusters)
}

/// Largest |cluster statistic| in a t-map, 0 when nothing crosses threshold.
pub fn max_cluster_stat(tstats: &ArrayView2<f64>, threshold: f64, adjacency: &Adjacency) -> Result<f64> {
    Ok(find_clusters(tstats, threshold, adjacency)?
        .first()
        .map_or(0.0, |c| c.stat.abs()))
}

fn max_abs(values: &Array1<f64>) -> f64 {
    values
        .iter()
        .filter(|v| !v.is_nan())
        .fold(0.0_f64, |m, v| m.max(v.abs()))
}

/// Null distribution of a maximum statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NullDistribution {
    /// One value per draw; index 0 is the unpermuted design.
    pub nulls: Vec<f64>,
}

impl NullDistribution {
    /// Percentile (0–100) with linear interpolation between order statistics.
    pub fn threshold(&self, percentile: f64) -> f64 {
        if self.nulls.is_empty() {
            return f64::NAN;
        }
        let mut v = self.nulls.clone();
        v.sort_by(|a, b| a.total_cmp(b));
        let pos = (percentile.clamp(0.0, 100.0) / 100.0) * (v.len() - 1) as f64;
        let lo = pos.floor() as usize;
        let hi = pos.ceil() as usize;
        v[lo] + (v[hi] - v[lo]) * (pos - lo as f64)
    }

    /// Fraction of draws whose statistic is at least `|stat|`.
    pub fn p_value(&self, stat: f64) -> f64 {
        if self.nulls.is_empty() {
            return f64::NAN;
        }
        let s = stat.abs();
        self.nulls.iter().filter(|&&n| n >= s).count() as f64 / self.nulls.len() as f64
    }
}

/// Draws randomised copies of a design.
#[derive(Debug, Clone)]
struct DesignPermuter {
    base: Array2<f64>,
    columns: Vec<usize>,
    scheme: PermutationScheme,
}

impl DesignPermuter {
    fn new(design: &Design, contrast: usize, scheme: PermutationScheme) -> Self {
        let columns = design
            .contrasts
            .row(contrast)
            .iter()
            .enumerate()
            .filter(|(_, &w)| w != 0.0)
            .map(|(j, _)| j)
            .collect();
        Self { base: design.matrix.clone(), columns, scheme: scheme.resolve(design, contrast) }
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> Array2<f64> {
        let mut m = self.base.clone();
        let n = m.nrows();
        match self.scheme {
            PermutationScheme::RowShuffle => {
                let mut order: Vec<usize> = (0..n).collect();
                order.shuffle(rng);
                for (i, &src) in order.iter().enumerate() {
                    for &j in &self.columns {
                        m[[i, j]] = self.base[[src, j]];
                    }
                }
            }
            // Auto is resolved in `new`.
            PermutationScheme::SignFlip | PermutationScheme::Auto => {
                for i in 0..n {
                    if rng.gen::<bool>() {
                        for &j in &self.columns {
                            m[[i, j]] = -m[[i, j]];
                        }
                    }
                }
            }
        }
        m
    }
}

fn draw_seed(base: u64, draw: usize) -> u64 {
    base ^ (draw as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

struct NullRun {
    observed: Array2<f64>,
    null: NullDistribution,
    scheme: PermutationScheme,
    seed: u64,
}

/// Shared driver: randomise, refit, reduce each t-map to one statistic.
fn run_null<F>(
    group: &GroupGlmSpectrum,
    g_contrast: usize,
    fl_contrast: usize,
    cfg: &PermutationConfig,
    cancel: Option<&CancelToken>,
    statistic: F,
) -> Result<NullRun>
where
    F: Fn(&Array1<f64>) -> Result<f64> + Sync,
{
    cfg.validate()?;
    if g_contrast >= group.design.n_contrasts() {
        return Err(GlmError::config(
            "g_contrast",
            format!("index {g_contrast} out of range for {} contrasts", group.design.n_contrasts()),
        ));
    }
    let y = group.data.fl_contrast_matrix(fl_contrast)?;
    let (n_freq, n_ch) = (group.n_freqs(), group.n_channels());

    let permuter = DesignPermuter::new(&group.design, g_contrast, cfg.scheme);
    let seed = cfg.seed.unwrap_or_else(rand::random);
    info!(
        "permutation test: {} draws, scheme {:?}, seed {seed}, permuting regressors {:?}",
        cfg.nperms, permuter.scheme, permuter.columns
    );

    let observed_flat = OlsSolver::new(&group.design).contrast_tstats(g_contrast, &y)?;
    let observed = observed_flat.into_shape_with_order((n_freq, n_ch))?;

    let pool = ParallelConfig { n_workers: cfg.n_workers }.build_pool("glmspec-perm")?;
    let draws: Vec<Result<f64>> = pool.install(|| {
        (0..cfg.nperms)
            .into_par_iter()
            .map(|i| {
                if cancel.is_some_and(CancelToken::is_cancelled) {
                    return Err(GlmError::Cancelled);
                }
                let matrix = if i == 0 {
                    permuter.base.clone()
                } else {
                    let mut rng = StdRng::seed_from_u64(draw_seed(seed, i));
                    permuter.draw(&mut rng)
                };
                let design = group.design.with_matrix(matrix)?;
                let t = OlsSolver::new(&design).contrast_tstats(g_contrast, &y)?;
                statistic(&t)
            })
            .collect()
    });
    let nulls = draws.into_iter().collect::<Result<Vec<f64>>>()?;
    debug!("null distribution complete: {} values", nulls.len());

    Ok(NullRun { observed, null: NullDistribution { nulls }, scheme: permuter.scheme, seed })
}

/// Outcome of a max-statistic permutation test.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxStatResult {
    /// Observed t-map [freq, channel].
    pub observed: Array2<f64>,
    pub null: NullDistribution,
    /// |t| cut-off at the configured percentile.
    pub threshold: f64,
    /// Cells whose |t| exceeds the cut-off.
    pub significant: Array2<bool>,
    pub scheme: PermutationScheme,
    pub seed: u64,
}

/// Max-|t| permutation test of group contrast `g_contrast` on first-level
/// contrast `fl_contrast`.
pub fn max_stat_permutation(
    group: &GroupGlmSpectrum,
    g_contrast: usize,
    fl_contrast: usize,
    cfg: &PermutationConfig,
    cancel: Option<&CancelToken>,
) -> Result<MaxStatResult> {
    let run = run_null(group, g_contrast, fl_contrast, cfg, cancel, |t| Ok(max_abs(t)))?;
    let threshold = run.null.threshold(cfg.percentile());
    let significant = run.observed.mapv(|t| t.abs() > threshold);
    info!(
        "max-stat threshold {threshold:.3}: {} of {} cells significant",
        significant.iter().filter(|&&s| s).count(),
        significant.len()
    );
    Ok(MaxStatResult {
        observed: run.observed,
        null: run.null,
        threshold,
        significant,
        scheme: run.scheme,
        seed: run.seed,
    })
}

/// Outcome of a cluster permutation test.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterResult {
    /// Observed t-map [freq, channel].
    pub observed: Array2<f64>,
    /// Every observed cluster, strongest first, with p-values.
    pub clusters: Vec<Cluster>,
    pub null: NullDistribution,
    /// |cluster statistic| cut-off at the configured percentile.
    pub threshold: f64,
    pub scheme: PermutationScheme,
    pub seed: u64,
}

impl ClusterResult {
    pub fn significant_clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.iter().filter(|c| c.significant)
    }

    pub fn has_significant(&self) -> bool {
        self.clusters.iter().any(|c| c.significant)
    }
}

/// Cluster permutation test of group contrast `g_contrast` on first-level
/// contrast `fl_contrast`, with clusters formed over frequency and the
/// supplied channel `adjacency`.
pub fn cluster_permutation(
    group: &GroupGlmSpectrum,
    g_contrast: usize,
    fl_contrast: usize,
    adjacency: &Adjacency,
    cfg: &PermutationConfig,
    cancel: Option<&CancelToken>,
) -> Result<ClusterResult> {
    let (n_freq, n_ch) = (group.n_freqs(), group.n_channels());
    if adjacency.n_channels() != n_ch {
        return Err(GlmError::shape("adjacency channels", n_ch, adjacency.n_channels()));
    }
    let thresh = cfg.cluster_forming_threshold;
    let run = run_null(group, g_contrast, fl_contrast, cfg, cancel, |t| {
        let map = t.view().into_shape_with_order((n_freq, n_ch))?;
        max_cluster_stat(&map, thresh, adjacency)
    })?;

    let threshold = run.null.threshold(cfg.percentile());
    let mut clusters = find_clusters(&run.observed.view(), thresh, adjacency)?;
    for c in clusters.iter_mut() {
        c.p_value = run.null.p_value(c.stat);
        c.significant = c.stat.abs() > threshold;
    }
    if clusters.is_empty() {
        info!("no clusters exceed |t| > {thresh}; no significant clusters");
    } else {
        info!(
            "cluster threshold {threshold:.3}: {} of {} clusters significant",
            clusters.iter().filter(|c| c.significant).count(),
            clusters.len()
        );
    }
    Ok(ClusterResult {
        observed: run.observed,
        clusters,
        null: run.null,
        threshold,
        scheme: run.scheme,
        seed: run.seed,
    })
}
