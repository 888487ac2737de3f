//! Safetensors I/O for recordings and fitted models.
//!
//! File layout: 8-byte little-endian header length, a JSON header mapping
//! tensor names to `{dtype, shape, data_offsets}`, then the raw little-endian
//! tensor bytes.  String metadata lives under the reserved `__metadata__` key.
//! Floats are written as raw IEEE-754 bytes, so a save/load cycle reproduces
//! every array bit-for-bit.
//!
//! | file              | tensors                                                        |
//! |-------------------|----------------------------------------------------------------|
//! | raw recording     | `data` [C, T], `sfreq` [1], optional `ch_names`, `bad_samples` |
//! | first-level model | `betas`, `copes`, `varcopes`, `tstats`, `ss_residual`, design  |
//! | group model       | the above plus `group_data` [rec, flcon, freq, ch]            |
use std::collections::BTreeMap;
use std::path::Path;

use log::debug;
use ndarray::{Array1, Array2, ArrayBase, ArrayD, Data, Dimension, Ix1, Ix2, Ix4, IxDyn};
use serde::{Deserialize, Serialize};

use crate::config::SpectrumConfig;
use crate::design::{Design, RegressorKind};
use crate::error::{GlmError, Result};
use crate::firstlevel::GlmSpectrum;
use crate::glm::FittedGlm;
use crate::group::{GroupData, GroupGlmSpectrum};
use crate::series::TimeSeries;

const METADATA_KEY: &str = "__metadata__";
const FORMAT_KEY: &str = "format";
const FIRST_LEVEL_FORMAT: &str = "glmspec/first-level/1";
const GROUP_FORMAT: &str = "glmspec/group/1";

fn format_err(msg: impl Into<String>) -> GlmError {
    GlmError::Format(msg.into())
}

// ── Reader ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Entry {
    dtype: String,
    shape: Vec<usize>,
    start: usize,
    end: usize,
}

/// A parsed safetensors file held in memory.
#[derive(Debug, Clone)]
pub struct StFile {
    bytes: Vec<u8>,
    data_start: usize,
    entries: BTreeMap<String, Entry>,
    metadata: BTreeMap<String, String>,
}

impl StFile {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::parse(bytes)
    }

    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        let len_bytes: [u8; 8] = bytes
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| format_err("file too small for a safetensors header"))?;
        let n = u64::from_le_bytes(len_bytes) as usize;
        let data_start = 8usize
            .checked_add(n)
            .filter(|&e| e <= bytes.len())
            .ok_or_else(|| format_err(format!("header length {n} exceeds file size {}", bytes.len())))?;
        let header: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&bytes[8..data_start])?;

        let mut entries = BTreeMap::new();
        let mut metadata = BTreeMap::new();
        for (name, value) in header {
            if name == METADATA_KEY {
                metadata = serde_json::from_value(value)?;
                continue;
            }
            let entry = parse_entry(&name, &value)?;
            let in_file = data_start.checked_add(entry.end).is_some_and(|end| end <= bytes.len());
            if !in_file || entry.start > entry.end {
                return Err(format_err(format!("tensor `{name}` points outside the file")));
            }
            entries.insert(name, entry);
        }
        Ok(Self { bytes, data_start, entries, metadata })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn tensor_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    fn required_metadata(&self, key: &str) -> Result<&str> {
        self.metadata(key)
            .ok_or_else(|| format_err(format!("missing metadata key `{key}`")))
    }

    fn entry(&self, name: &str) -> Result<(&Entry, &[u8])> {
        let e = self
            .entries
            .get(name)
            .ok_or_else(|| format_err(format!("missing tensor `{name}`")))?;
        Ok((e, &self.bytes[self.data_start + e.start..self.data_start + e.end]))
    }

    /// Floating-point tensor as f64.  F32 data is widened.
    pub fn f64_tensor(&self, name: &str) -> Result<ArrayD<f64>> {
        let (e, raw) = self.entry(name)?;
        let values: Vec<f64> = match e.dtype.as_str() {
            "F64" => raw
                .chunks_exact(8)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect(),
            "F32" => raw
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
                .collect(),
            other => return Err(format_err(format!("tensor `{name}` has dtype {other}, expected F64 or F32"))),
        };
        Ok(ArrayD::from_shape_vec(IxDyn(&e.shape), values)?)
    }

    pub fn u8_tensor(&self, name: &str) -> Result<ArrayD<u8>> {
        let (e, raw) = self.entry(name)?;
        if e.dtype != "U8" {
            return Err(format_err(format!("tensor `{name}` has dtype {}, expected U8", e.dtype)));
        }
        Ok(ArrayD::from_shape_vec(IxDyn(&e.shape), raw.to_vec())?)
    }

    /// UTF-8 text stored as a U8 tensor, split on newlines.
    pub fn lines(&self, name: &str) -> Result<Vec<String>> {
        let (_, raw) = self.entry(name)?;
        let text = std::str::from_utf8(raw).map_err(|e| format_err(format!("tensor `{name}`: {e}")))?;
        Ok(text.split('\n').filter(|s| !s.is_empty()).map(String::from).collect())
    }

    fn array1(&self, name: &str) -> Result<Array1<f64>> {
        Ok(self.f64_tensor(name)?.into_dimensionality::<Ix1>()?)
    }

    fn array2(&self, name: &str) -> Result<Array2<f64>> {
        Ok(self.f64_tensor(name)?.into_dimensionality::<Ix2>()?)
    }
}

fn parse_entry(name: &str, value: &serde_json::Value) -> Result<Entry> {
    let bad = || format_err(format!("malformed header entry for `{name}`"));
    let dtype = value["dtype"].as_str().ok_or_else(bad)?.to_string();
    let shape = value["shape"]
        .as_array()
        .ok_or_else(bad)?
        .iter()
        .map(|v| v.as_u64().map(|n| n as usize).ok_or_else(bad))
        .collect::<Result<Vec<usize>>>()?;
    let offsets = value["data_offsets"].as_array().ok_or_else(bad)?;
    let (start, end) = match offsets.as_slice() {
        [s, e] => (
            s.as_u64().ok_or_else(bad)? as usize,
            e.as_u64().ok_or_else(bad)? as usize,
        ),
        _ => return Err(bad()),
    };
    let elem = match dtype.as_str() {
        "F64" | "I64" => 8,
        "F32" | "I32" => 4,
        "U8" => 1,
        _ => return Err(format_err(format!("tensor `{name}` has unsupported dtype {dtype}"))),
    };
    let needed = shape
        .iter()
        .try_fold(elem, |acc: usize, &d| acc.checked_mul(d))
        .ok_or_else(|| format_err(format!("tensor `{name}`: shape {shape:?} overflows")))?;
    if needed != end.saturating_sub(start) {
        return Err(format_err(format!(
            "tensor `{name}`: shape {shape:?} needs {needed} bytes, found {}",
            end.saturating_sub(start)
        )));
    }
    Ok(Entry { dtype, shape, start, end })
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Safetensors writer for F64, F32 and U8 tensors plus string metadata.
///
/// ```rust,no_run
/// use glmspec::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_f64("signal", &[1.0, 2.0, 3.0], &[1, 3]);
/// w.set_metadata("subject", "sub-01");
/// w.write(Path::new("/tmp/out.safetensors")).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, &'static str, Vec<usize>)>,
    metadata: BTreeMap<String, String>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F64", shape.to_vec()));
    }

    /// Any-dimensional f64 array, written in logical (row-major) order.
    pub fn add_f64_array<S, D>(&mut self, name: &str, arr: &ArrayBase<S, D>)
    where
        S: Data<Elem = f64>,
        D: Dimension,
    {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, arr.shape());
    }

    pub fn add_f32(&mut self, name: &str, data: &[f32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F32", shape.to_vec()));
    }

    pub fn add_u8(&mut self, name: &str, data: &[u8], shape: &[usize]) {
        self.entries.push((name.to_string(), data.to_vec(), "U8", shape.to_vec()));
    }

    /// Newline-joined strings as a U8 tensor.
    pub fn add_lines(&mut self, name: &str, lines: &[String]) {
        let joined = lines.join("\n").into_bytes();
        let n = joined.len();
        self.add_u8(name, &joined, &[n]);
    }

    pub fn set_metadata(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut header_map = serde_json::Map::new();
        if !self.metadata.is_empty() {
            header_map.insert(METADATA_KEY.to_string(), serde_json::to_value(&self.metadata)?);
        }
        let mut offset: usize = 0;
        for (name, data, dtype, shape) in &self.entries {
            header_map.insert(
                name.clone(),
                serde_json::json!({
                    "dtype": dtype,
                    "shape": shape,
                    "data_offsets": [offset, offset + data.len()],
                }),
            );
            offset += data.len();
        }
        let hdr_bytes = serde_json::to_vec(&header_map)?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        let mut out = Vec::with_capacity(8 + hdr_bytes.len() + pad + offset);
        out.extend_from_slice(&((hdr_bytes.len() + pad) as u64).to_le_bytes());
        out.extend_from_slice(&hdr_bytes);
        out.extend(std::iter::repeat(b' ').take(pad));
        for (_, data, _, _) in &self.entries {
            out.extend_from_slice(data);
        }
        Ok(out)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        debug!("wrote {} tensors to {}", self.entries.len(), path.display());
        Ok(())
    }
}

// ── Raw recordings ────────────────────────────────────────────────────────────

/// A continuous recording as stored on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct RawData {
    /// [C, T]
    pub data: Array2<f64>,
    pub sfreq: f64,
    /// Empty when the file carries no names.
    pub ch_names: Vec<String>,
    pub bad_samples: Option<Vec<bool>>,
}

impl RawData {
    pub fn load(path: &Path) -> Result<Self> {
        let st = StFile::open(path)?;
        let data = st.array2("data")?;
        let sfreq = st
            .f64_tensor("sfreq")?
            .iter()
            .next()
            .copied()
            .ok_or_else(|| format_err("`sfreq` tensor is empty"))?;
        let ch_names = if st.contains("ch_names") { st.lines("ch_names")? } else { vec![] };
        let bad_samples = if st.contains("bad_samples") {
            Some(st.u8_tensor("bad_samples")?.iter().map(|&b| b != 0).collect())
        } else {
            None
        };
        Ok(Self { data, sfreq, ch_names, bad_samples })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut w = StWriter::new();
        w.add_f64_array("data", &self.data);
        w.add_f64("sfreq", &[self.sfreq], &[1]);
        if !self.ch_names.is_empty() {
            w.add_lines("ch_names", &self.ch_names);
        }
        if let Some(bad) = &self.bad_samples {
            let bytes: Vec<u8> = bad.iter().map(|&b| b as u8).collect();
            w.add_u8("bad_samples", &bytes, &[bytes.len()]);
        }
        w.write(path)
    }

    pub fn into_series(self) -> Result<TimeSeries> {
        let mut ts = TimeSeries::new(self.data, self.sfreq)?;
        if !self.ch_names.is_empty() {
            ts = ts.with_ch_names(self.ch_names)?;
        }
        if let Some(bad) = self.bad_samples {
            ts = ts.with_bad_samples(bad)?;
        }
        Ok(ts)
    }
}

impl From<&TimeSeries> for RawData {
    fn from(ts: &TimeSeries) -> Self {
        Self {
            data: ts.data.clone(),
            sfreq: ts.sample_rate,
            ch_names: ts.ch_names.clone(),
            bad_samples: ts.bad_samples.clone(),
        }
    }
}

// ── Fitted models ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct DesignMeta {
    regressor_names: Vec<String>,
    regressor_kinds: Vec<RegressorKind>,
    contrast_names: Vec<String>,
    dof: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct FirstLevelMeta {
    config: SpectrumConfig,
    ch_names: Vec<String>,
    #[serde(flatten)]
    design: DesignMeta,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupMeta {
    fl_contrast_names: Vec<String>,
    ch_names: Vec<String>,
    #[serde(flatten)]
    design: DesignMeta,
}

fn write_model(w: &mut StWriter, design: &Design, model: &FittedGlm) {
    w.add_f64_array("design_matrix", &design.matrix);
    w.add_f64_array("contrasts", &design.contrasts);
    w.add_f64_array("betas", &model.betas);
    w.add_f64_array("copes", &model.copes);
    w.add_f64_array("varcopes", &model.varcopes);
    w.add_f64_array("tstats", &model.tstats);
    w.add_f64_array("ss_residual", &model.ss_residual);
}

fn design_meta(design: &Design, model: &FittedGlm) -> DesignMeta {
    DesignMeta {
        regressor_names: design.regressor_names.clone(),
        regressor_kinds: design.regressor_kinds.clone(),
        contrast_names: design.contrast_names.clone(),
        dof: model.dof,
    }
}

fn read_model(st: &StFile, meta: DesignMeta) -> Result<(Design, FittedGlm)> {
    let design = Design {
        matrix: st.array2("design_matrix")?,
        regressor_names: meta.regressor_names,
        regressor_kinds: meta.regressor_kinds,
        contrasts: st.array2("contrasts")?,
        contrast_names: meta.contrast_names,
    };
    if design.contrasts.nrows() != design.contrast_names.len() {
        return Err(GlmError::shape("contrast names", design.contrasts.nrows(), design.contrast_names.len()));
    }
    if design.matrix.ncols() != design.regressor_names.len() {
        return Err(GlmError::shape("regressor names", design.matrix.ncols(), design.regressor_names.len()));
    }
    let model = FittedGlm {
        betas: st.f64_tensor("betas")?,
        copes: st.f64_tensor("copes")?,
        varcopes: st.f64_tensor("varcopes")?,
        tstats: st.f64_tensor("tstats")?,
        ss_residual: st.f64_tensor("ss_residual")?,
        dof: meta.dof,
    };
    Ok((design, model))
}

fn check_format(st: &StFile, expected: &str) -> Result<()> {
    let found = st.required_metadata(FORMAT_KEY)?;
    if found != expected {
        return Err(format_err(format!("expected a `{expected}` file, found `{found}`")));
    }
    Ok(())
}

/// Write a first-level model.
pub fn save_glm_spectrum(spec: &GlmSpectrum, path: &Path) -> Result<()> {
    let mut w = StWriter::new();
    write_model(&mut w, &spec.design, &spec.model);
    w.add_f64_array("freqs", &spec.freqs);
    w.add_f64("sample_rate", &[spec.sample_rate], &[1]);
    let meta = FirstLevelMeta {
        config: spec.config.clone(),
        ch_names: spec.ch_names.clone(),
        design: design_meta(&spec.design, &spec.model),
    };
    w.set_metadata(FORMAT_KEY, FIRST_LEVEL_FORMAT);
    w.set_metadata("model", serde_json::to_string(&meta)?);
    w.write(path)
}

pub fn load_glm_spectrum(path: &Path) -> Result<GlmSpectrum> {
    let st = StFile::open(path)?;
    check_format(&st, FIRST_LEVEL_FORMAT)?;
    let meta: FirstLevelMeta = serde_json::from_str(st.required_metadata("model")?)?;
    let (design, model) = read_model(&st, meta.design)?;
    let freqs = st.array1("freqs")?;
    let sample_rate = st
        .f64_tensor("sample_rate")?
        .iter()
        .next()
        .copied()
        .ok_or_else(|| format_err("`sample_rate` tensor is empty"))?;
    if model.copes.shape() != [design.n_contrasts(), freqs.len(), meta.ch_names.len()] {
        return Err(GlmError::shape(
            "first-level copes",
            format!("[{}, {}, {}]", design.n_contrasts(), freqs.len(), meta.ch_names.len()),
            format!("{:?}", model.copes.shape()),
        ));
    }
    Ok(GlmSpectrum { config: meta.config, design, model, freqs, ch_names: meta.ch_names, sample_rate })
}

/// Write a group model together with its stacked first-level data.
pub fn save_group(group: &GroupGlmSpectrum, path: &Path) -> Result<()> {
    let mut w = StWriter::new();
    write_model(&mut w, &group.design, &group.model);
    w.add_f64_array("group_data", &group.data.data);
    w.add_f64_array("freqs", &group.data.freqs);
    let meta = GroupMeta {
        fl_contrast_names: group.data.fl_contrast_names.clone(),
        ch_names: group.data.ch_names.clone(),
        design: design_meta(&group.design, &group.model),
    };
    w.set_metadata(FORMAT_KEY, GROUP_FORMAT);
    w.set_metadata("model", serde_json::to_string(&meta)?);
    w.write(path)
}

pub fn load_group(path: &Path) -> Result<GroupGlmSpectrum> {
    let st = StFile::open(path)?;
    check_format(&st, GROUP_FORMAT)?;
    let meta: GroupMeta = serde_json::from_str(st.required_metadata("model")?)?;
    let data = GroupData::from_array(
        st.f64_tensor("group_data")?.into_dimensionality::<Ix4>()?,
        meta.fl_contrast_names.clone(),
        st.array1("freqs")?,
        meta.ch_names.clone(),
    )?;
    let (design, model) = read_model(&st, meta.design)?;
    if design.n_observations() != data.n_recordings() {
        return Err(GlmError::shape("group observations", data.n_recordings(), design.n_observations()));
    }
    Ok(GroupGlmSpectrum { data, design, model })
}
