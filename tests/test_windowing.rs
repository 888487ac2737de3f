mod common;
use common::{series, FS, N_SAMPLES};
use glmspec::{DesignConfig, GlmError, SegmentSet, SpectrumConfig, Window};
use ndarray::{Array1, Array2};

#[test]
fn default_windows_are_one_second_half_overlap() {
    let ts = series(&[Array1::zeros(N_SAMPLES)], FS);
    let seg = ts.segment(&SpectrumConfig::default()).unwrap();
    assert_eq!(seg.segments.nperseg, 128);
    assert_eq!(seg.segments.step, 64);
    assert_eq!(seg.segments.len(), 19);
    assert_eq!(seg.segments.starts.last(), Some(&1152));
}

#[test]
fn trailing_samples_are_dropped() {
    let segs = SegmentSet::new(1000, 128, 128, FS).unwrap();
    assert_eq!(segs.len(), 7);
    assert!(segs.starts.iter().all(|&s| s + 128 <= 1000));
}

#[test]
fn window_longer_than_recording_rejected() {
    let r = SegmentSet::new(100, 128, 64, FS);
    assert!(matches!(r, Err(GlmError::InvalidConfiguration { param: "nperseg", .. })));
}

#[test]
fn segments_copy_the_right_samples() {
    let data = Array2::from_shape_fn((2, 300), |(c, t)| (c * 1000 + t) as f64);
    let segs = SegmentSet::new(300, 100, 50, 100.0).unwrap();
    let cut = segs.segment(&data).unwrap();
    assert_eq!(cut.dim(), (5, 2, 100));
    assert_eq!(cut[[2, 1, 0]], 1100.0);
    assert_eq!(cut[[4, 0, 99]], 299.0);
}

#[test]
fn centre_times_in_seconds() {
    let segs = SegmentSet::new(1280, 128, 64, FS).unwrap();
    let c = segs.centre_times();
    approx::assert_abs_diff_eq!(c[0], 0.5, epsilon = 1e-12);
    approx::assert_abs_diff_eq!(c[1], 1.0, epsilon = 1e-12);
}

#[test]
fn hann_is_periodic() {
    let w = Window::Hann.coefficients(8);
    assert_eq!(w[0], 0.0);
    approx::assert_abs_diff_eq!(w[4], 1.0, epsilon = 1e-12);
    approx::assert_abs_diff_eq!(w[1], w[7], epsilon = 1e-12);
    assert!(Window::Boxcar.coefficients(4).iter().all(|&v| v == 1.0));
}

#[test]
fn sample_rate_regressor_is_window_mean() {
    let segs = SegmentSet::new(1280, 128, 64, FS).unwrap();
    let t: Vec<f64> = (0..1280).map(|i| i as f64).collect();
    let r = segs.regressor(&t).unwrap();
    approx::assert_abs_diff_eq!(r[0], 63.5, epsilon = 1e-12);
    approx::assert_abs_diff_eq!(r[1] - r[0], 64.0, epsilon = 1e-12);
}

#[test]
fn bad_samples_exclude_overlapping_windows() {
    let mut bad = vec![false; N_SAMPLES];
    bad[200] = true; // inside windows starting at 128 and 192
    let ts = series(&[Array1::from_shape_fn(N_SAMPLES, |t| (t as f64 * 0.3).sin())], FS)
        .with_bad_samples(bad)
        .unwrap();
    let seg = ts.segment(&SpectrumConfig::default()).unwrap();
    let flagged: Vec<usize> = seg
        .bad_segments
        .iter()
        .enumerate()
        .filter(|(_, &b)| b)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(flagged, vec![2, 3]);

    let model = seg.fit(&DesignConfig::new()).unwrap();
    assert_eq!(model.design.n_observations(), 17);
}

#[test]
fn all_segments_bad_is_an_error() {
    let ts = series(&[Array1::zeros(N_SAMPLES)], FS)
        .with_bad_samples(vec![true; N_SAMPLES])
        .unwrap();
    let r = ts.segment(&SpectrumConfig::default()).unwrap().fit(&DesignConfig::new());
    assert!(matches!(r, Err(GlmError::InvalidConfiguration { .. })));
}
