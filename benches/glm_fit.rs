use std::hint::black_box;
use criterion::{criterion_group, criterion_main, Criterion};
use glmspec::{
    glm_spectrum, group_glm_spectrum, max_stat_permutation, simulate, DesignConfig, GroupData,
    PermutationConfig, SpectrumConfig, TimeSeries,
};
use ndarray::{Array1, Array2, Array4};

const FS: f64 = 256.0;

fn recording(n_ch: usize, seconds: usize, seed: u64) -> TimeSeries {
    let n = seconds * FS as usize;
    let mut data = Array2::<f64>::zeros((n_ch, n));
    for (c, mut row) in data.rows_mut().into_iter().enumerate() {
        let noise = simulate::ar_noise(&[0.5], n, 1.0, seed + c as u64).unwrap();
        row.assign(&(noise + simulate::sinusoid(10.0, 1.0, 0.5, n, FS)));
    }
    TimeSeries::new(data, FS).unwrap()
}

fn bench_first_level(c: &mut Criterion) {
    let ts = recording(32, 60, 0);
    let trend = ts.times();
    let regs = DesignConfig::new().covariate("Linear", trend);
    let cfg = SpectrumConfig::default();
    c.bench_function("glm_spectrum [32 ch × 60 s @ 256 Hz]", |b| {
        b.iter(|| {
            let m = glm_spectrum(black_box(&ts), &cfg, &regs).unwrap();
            black_box(m.model.dof)
        })
    });
}

fn bench_permutation(c: &mut Criterion) {
    let data = Array4::from_shape_fn((20, 1, 40, 8), |(r, _, f, ch)| {
        ((r * 31 + f * 7 + ch * 3) % 17) as f64 / 17.0 - 0.5
    });
    let group = GroupData::from_array(
        data,
        vec!["Constant".into()],
        Array1::linspace(1.0, 40.0, 40),
        (0..8).map(|c| format!("ch{c}")).collect(),
    )
    .unwrap();
    let group = group_glm_spectrum(group, &DesignConfig::new()).unwrap();
    let cfg = PermutationConfig { nperms: 200, seed: Some(1), ..Default::default() };
    c.bench_function("max_stat_permutation [20 rec, 200 draws]", |b| {
        b.iter(|| {
            let r = max_stat_permutation(black_box(&group), 0, 0, &cfg, None).unwrap();
            black_box(r.threshold)
        })
    });
}

criterion_group!(benches, bench_first_level, bench_permutation);
criterion_main!(benches);
