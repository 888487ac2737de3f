/// Shared signal and data generators for the integration tests.
use glmspec::{simulate, GroupData, TimeSeries};
use ndarray::{Array1, Array2, Array4, ArrayView, Dimension};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

pub const FS: f64 = 128.0;
pub const N_SAMPLES: usize = 1280;

#[allow(unused)]
/// Stack equal-length channels into a recording.
pub fn series(channels: &[Array1<f64>], sample_rate: f64) -> TimeSeries {
    let n = channels[0].len();
    let data = Array2::from_shape_fn((channels.len(), n), |(c, t)| channels[c][t]);
    TimeSeries::new(data, sample_rate).unwrap()
}

#[allow(unused)]
/// 10 s at 128 Hz: a stationary 10 Hz rhythm plus a 22 Hz rhythm decaying
/// from amplitude 1.0 to 0.5, with a little white noise.
pub fn two_rhythm_recording(seed: u64) -> TimeSeries {
    let x = simulate::sinusoid(10.0, 1.0, 1.0, N_SAMPLES, FS)
        + simulate::sinusoid(22.0, 1.0, 0.5, N_SAMPLES, FS)
        + simulate::white_noise(N_SAMPLES, 0.05, seed).unwrap();
    series(&[x], FS)
}

#[allow(unused)]
/// Group stack [rec, 1, freq, ch] of N(0, 1) noise, with `effect` added to
/// the cells where `mask(rec, freq, ch)` holds.
pub fn noise_stack<F>(n_rec: usize, n_freq: usize, n_ch: usize, seed: u64, effect: f64, mask: F) -> GroupData
where
    F: Fn(usize, usize, usize) -> bool,
{
    let normal = Normal::new(0.0, 1.0).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    let data = Array4::from_shape_fn((n_rec, 1, n_freq, n_ch), |(r, _, f, c)| {
        normal.sample(&mut rng) + if mask(r, f, c) { effect } else { 0.0 }
    });
    GroupData::from_array(
        data,
        vec!["Constant".into()],
        Array1::linspace(1.0, n_freq as f64, n_freq),
        (0..n_ch).map(|c| format!("ch{c}")).collect(),
    )
    .unwrap()
}

#[allow(unused)]
/// Maximum absolute difference between two arrays.
pub fn max_abs_diff<D: Dimension>(a: ArrayView<f64, D>, b: ArrayView<f64, D>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0_f64, f64::max)
}

#[allow(unused)]
/// Bit patterns, so NaN == NaN.
pub fn bits<D: Dimension>(a: ArrayView<f64, D>) -> Vec<u64> {
    a.iter().map(|v| v.to_bits()).collect()
}
