mod common;
use common::{noise_stack, series, two_rhythm_recording, FS, N_SAMPLES};
use glmspec::{
    glm_spectrum, group_glm_spectrum, simulate, DesignConfig, GlmError, GroupData, SpectrumConfig,
};
use ndarray::Array1;

fn first_level(seed: u64, n_ch: usize) -> glmspec::GlmSpectrum {
    let channels: Vec<Array1<f64>> = (0..n_ch)
        .map(|c| simulate::white_noise(N_SAMPLES, 1.0, seed * 10 + c as u64).unwrap())
        .collect();
    let trend: Vec<f64> = (0..N_SAMPLES).map(|t| t as f64).collect();
    glm_spectrum(
        &series(&channels, FS),
        &SpectrumConfig::default(),
        &DesignConfig::new().covariate("Linear", trend),
    )
    .unwrap()
}

#[test]
fn stacks_first_level_copes() {
    let models: Vec<_> = (0..4).map(|s| first_level(s, 2)).collect();
    let data = GroupData::from_models(&models).unwrap();
    assert_eq!(data.data.dim(), (4, 2, 65, 2));
    assert_eq!(data.fl_contrast_names, ["Constant", "Linear"]);
    assert_eq!(data.data[[2, 1, 10, 1]], models[2].cope("Linear").unwrap()[[10, 1]]);
}

#[test]
fn group_mean_is_average_of_recordings() {
    let models: Vec<_> = (0..5).map(|s| first_level(s, 1)).collect();
    let group = group_glm_spectrum(GroupData::from_models(&models).unwrap(), &DesignConfig::new()).unwrap();
    let cope = group.cope(0, 0).unwrap();
    let expected: f64 = models.iter().map(|m| m.cope("Constant").unwrap()[[12, 0]]).sum::<f64>() / 5.0;
    approx::assert_abs_diff_eq!(cope[[12, 0]], expected, epsilon = 1e-12);
    assert_eq!(group.model.copes.shape(), &[1, 2, 65, 1]);
}

#[test]
fn mismatched_channels_rejected() {
    let models = vec![first_level(0, 2), first_level(1, 3)];
    assert!(matches!(
        GroupData::from_models(&models),
        Err(GlmError::InputShapeMismatch { what: "channels", .. })
    ));
}

#[test]
fn mismatched_frequency_axes_rejected() {
    let a = glm_spectrum(&two_rhythm_recording(1), &SpectrumConfig::default(), &DesignConfig::new()).unwrap();
    let narrow = SpectrumConfig { fmax: Some(40.0), ..Default::default() };
    let b = glm_spectrum(&two_rhythm_recording(2), &narrow, &DesignConfig::new()).unwrap();
    assert!(matches!(
        GroupData::from_models(&[a, b]),
        Err(GlmError::InputShapeMismatch { what: "frequency axis", .. })
    ));
}

#[test]
fn design_must_have_one_row_per_recording() {
    let data = noise_stack(6, 4, 2, 0, 0.0, |_, _, _| false);
    let cfg = DesignConfig::new().covariate("Age", vec![20.0, 25.0, 30.0, 35.0, 40.0]);
    assert!(matches!(
        group_glm_spectrum(data, &cfg),
        Err(GlmError::InputShapeMismatch { what: "group observations", .. })
    ));
}

#[test]
fn group_covariate_slope_is_recovered() {
    // Each recording's cope grows with age; the z-scored age slope is
    // 2 · std(age).
    let ages = [20.0, 30.0, 40.0, 50.0, 60.0, 70.0];
    let base = noise_stack(6, 3, 2, 0, 0.0, |_, _, _| false);
    let mut data = base.data.clone();
    for (r, age) in ages.iter().enumerate() {
        data.index_axis_mut(ndarray::Axis(0), r).fill(2.0 * age);
    }
    let stacked = GroupData::from_array(data, base.fl_contrast_names, base.freqs, base.ch_names).unwrap();
    let group = group_glm_spectrum(stacked, &DesignConfig::new().covariate("Age", ages.to_vec())).unwrap();
    let age_std = Array1::from(ages.to_vec()).std(0.0);
    approx::assert_abs_diff_eq!(group.cope(1, 0).unwrap()[[1, 1]], 2.0 * age_std, epsilon = 1e-9);
    approx::assert_abs_diff_eq!(group.cope(0, 0).unwrap()[[1, 1]], 90.0, epsilon = 1e-9);
}

#[test]
fn outlier_recording_scores_highest() {
    let mut data = noise_stack(8, 6, 3, 4, 0.0, |_, _, _| false);
    data.data.index_axis_mut(ndarray::Axis(0), 5).mapv_inplace(|v| v * 10.0);
    let scores = data.outlier_scores();
    let worst = scores
        .iter()
        .enumerate()
        .fold((0, f64::MIN), |b, (i, &s)| if s > b.1 { (i, s) } else { b })
        .0;
    assert_eq!(worst, 5);
}
