/// glm-spectrum: fit a first-level GLM-Spectrum to each raw recording.
///
/// Input files are safetensors with keys `data` [C, T], `sfreq` [1] and
/// optionally `ch_names` and `bad_samples` [T] (U8).  One model file
/// `<stem>_glm.safetensors` is written per input.
use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, LevelFilter};
use std::path::{Path, PathBuf};

use glmspec::{
    fit_batch, io::RawData, save_glm_spectrum, DesignConfig, ParallelConfig, SpectrumConfig,
    SpectrumMode, TimeSeries,
};

#[derive(Parser, Debug)]
#[command(name = "glm-spectrum", about = "First-level GLM-Spectrum for MEG/EEG recordings")]
struct Args {
    /// Raw recordings (.safetensors).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for the fitted models.
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// JSON file with a full spectrum configuration.  Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Window length in samples (default: one second).
    #[arg(long)]
    nperseg: Option<usize>,

    /// Overlap in samples (default: half a window).
    #[arg(long)]
    noverlap: Option<usize>,

    /// Lowest frequency kept (Hz).
    #[arg(long)]
    fmin: Option<f64>,

    /// Highest frequency kept (Hz).
    #[arg(long)]
    fmax: Option<f64>,

    /// Model power instead of magnitude.
    #[arg(long)]
    power: bool,

    /// Z-score each (frequency, channel) across windows before fitting.
    #[arg(long)]
    standardise: bool,

    /// Add a z-scored linear trend over time.
    #[arg(long)]
    linear_trend: bool,

    /// Model bad samples with a unit-max confound instead of dropping the
    /// windows they touch.
    #[arg(long)]
    regress_bads: bool,

    /// Worker threads (default: one per core).
    #[arg(long)]
    workers: Option<usize>,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn spectrum_config(args: &Args) -> Result<SpectrumConfig> {
    let mut cfg: SpectrumConfig = match &args.config {
        Some(p) => {
            let text = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", p.display()))?
        }
        None => SpectrumConfig::default(),
    };
    if args.nperseg.is_some() {
        cfg.nperseg = args.nperseg;
    }
    if args.noverlap.is_some() {
        cfg.noverlap = args.noverlap;
    }
    if args.fmin.is_some() {
        cfg.fmin = args.fmin;
    }
    if args.fmax.is_some() {
        cfg.fmax = args.fmax;
    }
    if args.power {
        cfg.mode = SpectrumMode::Power;
    }
    if args.standardise {
        cfg.standardise_data = true;
    }
    Ok(cfg)
}

fn output_path(out_dir: &Path, input: &Path) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("recording");
    out_dir.join(format!("{stem}_glm.safetensors"))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new().filter_level(level).format_timestamp(None).init();

    let cfg = spectrum_config(&args)?;
    std::fs::create_dir_all(&args.out_dir)?;

    let mut paths = vec![];
    let mut series: Vec<TimeSeries> = vec![];
    let mut bad_confounds: Vec<Option<Vec<f64>>> = vec![];
    let mut failed = 0usize;
    for path in &args.inputs {
        match RawData::load(path).and_then(RawData::into_series) {
            Ok(mut ts) => {
                println!(
                    "Loaded {}: {} ch × {} samples @ {} Hz",
                    path.display(),
                    ts.n_channels(),
                    ts.n_samples(),
                    ts.sample_rate
                );
                let confound = if args.regress_bads {
                    ts.bad_samples
                        .take()
                        .filter(|m| m.iter().any(|&b| b))
                        .map(|m| m.into_iter().map(|b| if b { 1.0 } else { 0.0 }).collect())
                } else {
                    None
                };
                paths.push(path.clone());
                series.push(ts);
                bad_confounds.push(confound);
            }
            Err(e) => {
                error!("{}: {e}", path.display());
                println!("FAILED {}: {e}", path.display());
                failed += 1;
            }
        }
    }

    let linear_trend = args.linear_trend;
    let results = fit_batch(
        &series,
        &cfg,
        |i, ts| {
            let mut design = DesignConfig::new();
            if linear_trend {
                design = design.covariate("Linear", ts.times());
            }
            if let Some(bads) = &bad_confounds[i] {
                design = design.confound("BadSamples", bads.clone());
            }
            design
        },
        &ParallelConfig { n_workers: args.workers },
    )?;

    for (path, result) in paths.iter().zip(results) {
        let written = result
            .map_err(anyhow::Error::from)
            .and_then(|model| {
                let out = output_path(&args.out_dir, path);
                save_glm_spectrum(&model, &out)?;
                Ok((out, model))
            });
        match written {
            Ok((out, model)) => {
                info!("{} contrasts: {:?}", path.display(), model.contrast_names());
                println!(
                    "OK {} → {} ({} freqs × {} ch, dof {})",
                    path.display(),
                    out.display(),
                    model.n_freqs(),
                    model.n_channels(),
                    model.model.dof
                );
            }
            Err(e) => {
                println!("FAILED {}: {e:#}", path.display());
                failed += 1;
            }
        }
    }

    println!("{}/{} recordings fitted", args.inputs.len() - failed, args.inputs.len());
    if failed == args.inputs.len() {
        bail!("no recording could be fitted");
    }
    Ok(())
}
