mod common;
use common::{bits, series, FS, N_SAMPLES};
use glmspec::{fit, fit_batch, glm_spectrum, simulate, DesignConfig, ParallelConfig, SpectrumConfig, TimeSeries};
use ndarray::{Array1, Array2, Array3};

fn observations() -> Array2<f64> {
    Array2::from_shape_fn((8, 3), |(i, j)| ((i * 5 + j * 11) % 7) as f64 + j as f64)
}

#[test]
fn constant_only_cope_is_the_mean() {
    let y = observations();
    let design = DesignConfig::new().build(8).unwrap();
    let m = fit(&design, &y.clone().into_dyn()).unwrap();
    let mean = y.mean_axis(ndarray::Axis(0)).unwrap();
    for j in 0..3 {
        approx::assert_abs_diff_eq!(m.copes[[0, j]], mean[j], epsilon = 1e-12);
    }
    assert_eq!(m.dof, 7);
}

#[test]
fn zero_mean_covariate_leaves_constant_as_mean() {
    let y = observations();
    let design = DesignConfig::new()
        .covariate("x", vec![3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0])
        .build(8)
        .unwrap();
    let m = fit(&design, &y.clone().into_dyn()).unwrap();
    let mean = y.mean_axis(ndarray::Axis(0)).unwrap();
    for j in 0..3 {
        approx::assert_abs_diff_eq!(m.copes[[0, j]], mean[j], epsilon = 1e-10);
    }
}

#[test]
fn unitmax_confound_turns_constant_into_intercept() {
    // y = 1 + 2·c exactly, c not zero-mean: the constant recovers 1, not mean(y).
    let c = vec![0.0, 1.0, 0.0, 0.0, 1.0, 1.0];
    let y = Array2::from_shape_fn((6, 1), |(i, _)| 1.0 + 2.0 * c[i]);
    let design = DesignConfig::new().confound("c", c).build(6).unwrap();
    let m = fit(&design, &y.into_dyn()).unwrap();
    approx::assert_abs_diff_eq!(m.copes[[0, 0]], 1.0, epsilon = 1e-10);
    approx::assert_abs_diff_eq!(m.copes[[1, 0]], 2.0, epsilon = 1e-10);
}

#[test]
fn refitting_is_bit_identical() {
    let y = observations().into_dyn();
    let design = DesignConfig::new().parametric("p", (0..8).map(|i| (i * i) as f64).collect()).build(8).unwrap();
    let a = fit(&design, &y).unwrap();
    let b = fit(&design, &y).unwrap();
    assert_eq!(bits(a.betas.view()), bits(b.betas.view()));
    assert_eq!(bits(a.tstats.view()), bits(b.tstats.view()));
}

#[test]
fn rank_deficient_design_gives_minimum_norm_estimate() {
    let v = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
    let design = DesignConfig::new()
        .constant(false)
        .parametric("a", v.clone())
        .parametric("b", v.clone())
        .build(8)
        .unwrap();
    let y = Array2::from_shape_fn((8, 1), |(i, _)| 4.0 * v[i]).into_dyn();
    let m = fit(&design, &y).unwrap();
    // Equal split is the minimum-norm solution of a + b = 4.
    approx::assert_abs_diff_eq!(m.betas[[0, 0]], 2.0, epsilon = 1e-9);
    approx::assert_abs_diff_eq!(m.betas[[1, 0]], 2.0, epsilon = 1e-9);
    assert_eq!(m.dof, 7);
}

#[test]
fn saturated_design_has_nan_tstats() {
    let y = Array2::from_shape_fn((2, 3), |(i, j)| (i + j) as f64).into_dyn();
    let design = DesignConfig::new().covariate("x", vec![1.0, 2.0]).build(2).unwrap();
    let m = fit(&design, &y).unwrap();
    assert_eq!(m.dof, 0);
    assert!(m.tstats.iter().all(|t| t.is_nan()));
    assert!(m.varcopes.iter().all(|v| v.is_nan()));
    approx::assert_abs_diff_eq!(m.copes[[0, 2]], 2.5, epsilon = 1e-12);
}

#[test]
fn targets_of_any_dimensionality_are_fitted_independently() {
    let y = Array3::from_shape_fn((5, 4, 3), |(i, f, c)| (i * (f + 1)) as f64 + c as f64);
    let design = DesignConfig::new().build(5).unwrap();
    let m = fit(&design, &y.clone().into_dyn()).unwrap();
    assert_eq!(m.copes.shape(), &[1, 4, 3]);
    for f in 0..4 {
        for c in 0..3 {
            let col = y.slice(ndarray::s![.., f, c]);
            approx::assert_abs_diff_eq!(m.copes[[0, f, c]], col.mean().unwrap(), epsilon = 1e-12);
        }
    }
}

#[test]
fn channels_are_fitted_independently() {
    let a = simulate::white_noise(N_SAMPLES, 1.0, 1).unwrap();
    let b = simulate::sinusoid(12.0, 1.0, 1.0, N_SAMPLES, FS);
    let both = series(&[a.clone(), b], FS);
    let alone = series(&[a], FS);
    let cfg = SpectrumConfig::default();
    let m2 = glm_spectrum(&both, &cfg, &DesignConfig::new()).unwrap();
    let m1 = glm_spectrum(&alone, &cfg, &DesignConfig::new()).unwrap();
    let c2 = m2.cope("Constant").unwrap();
    let c1 = m1.cope("Constant").unwrap();
    for f in 0..m1.n_freqs() {
        assert_eq!(c2[[f, 0]].to_bits(), c1[[f, 0]].to_bits());
    }
}

#[test]
fn batch_failures_are_isolated() {
    let ok = series(&[simulate::white_noise(N_SAMPLES, 1.0, 2).unwrap()], FS);
    let short = TimeSeries::new(Array2::zeros((1, 64)), FS).unwrap();
    let results = fit_batch(
        &[ok.clone(), short, ok],
        &SpectrumConfig::default(),
        |_, ts| DesignConfig::new().covariate("Linear", ts.times()),
        &ParallelConfig { n_workers: Some(2) },
    )
    .unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok() && results[2].is_ok());
    assert!(results[1].is_err());
    assert_eq!(results[0].as_ref().unwrap(), results[2].as_ref().unwrap());
}

#[test]
fn standardised_copes_are_in_sd_units() {
    let x = simulate::ar_noise(&[0.5], N_SAMPLES, 1.0, 3).unwrap();
    let ts = series(&[x], FS);
    let cfg = SpectrumConfig { standardise_data: true, ..Default::default() };
    let trend: Array1<f64> = Array1::linspace(0.0, 1.0, N_SAMPLES);
    let m = glm_spectrum(&ts, &cfg, &DesignConfig::new().covariate("Linear", trend.to_vec())).unwrap();
    // Standardised data is zero-mean, so the constant vanishes and the
    // z-scored trend's cope is a correlation, bounded by 1.
    assert!(m.cope("Constant").unwrap().iter().all(|v| v.abs() < 1e-10));
    assert!(m.cope("Linear").unwrap().iter().all(|v| v.abs() <= 1.0 + 1e-9));
}
