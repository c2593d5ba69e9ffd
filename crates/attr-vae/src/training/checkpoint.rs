//! Checkpoint persistence: canonical + timestamped model records, optimizer
//! state, and a small JSON metadata file.
//!
//! Layout under `params_dir` for a run called `name`:
//!
//! ```text
//! <name>.mpk              latest model (overwritten every save)
//! <name>_<millis>.mpk     permanent history entry
//! <name>_optim.mpk        optimizer moments
//! <name>.meta.json        step counter, epochs, model shape
//! ```

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use burn::module::{ModuleVisitor, ParamId};
use burn::optim::Optimizer;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use crate::error::VaeError;
use crate::model::vae::{AttrVae, AttrVaeConfig};

/// Metadata written next to every checkpoint.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CheckpointMeta {
    pub name: String,
    /// Global optimizer step count at save time.
    pub step: usize,
    /// Epochs completed across all runs.
    pub epochs: usize,
    /// Milliseconds since the Unix epoch.
    pub saved_at_ms: u64,
    pub model: AttrVaeConfig,
}

/// File locations for one named run.
#[derive(Debug, Clone)]
pub struct CheckpointPaths {
    dir: PathBuf,
    name: String,
}

impl CheckpointPaths {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self { dir: dir.into(), name: name.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> PathBuf {
        self.dir.join(format!("{}.mpk", self.name))
    }

    pub fn timestamped(&self, millis: u64) -> PathBuf {
        self.dir.join(format!("{}_{millis}.mpk", self.name))
    }

    pub fn optimizer(&self) -> PathBuf {
        self.dir.join(format!("{}_optim.mpk", self.name))
    }

    pub fn meta(&self) -> PathBuf {
        self.dir.join(format!("{}.meta.json", self.name))
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn recorder() -> NamedMpkFileRecorder<FullPrecisionSettings> {
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
}

fn checkpoint_err(path: &Path, reason: impl ToString) -> VaeError {
    VaeError::Checkpoint { path: path.to_path_buf(), reason: reason.to_string() }
}

fn same_shape(a: &AttrVaeConfig, b: &AttrVaeConfig) -> bool {
    (a.hidden_dim, a.z_dim, a.time_step, a.event_dims, a.rhythm_dims)
        == (b.hidden_dim, b.z_dim, b.time_step, b.event_dims, b.rhythm_dims)
        && (a.note_dims, a.chroma_dims, a.n_classes, a.residual)
            == (b.note_dims, b.chroma_dims, b.n_classes, b.residual)
}

/// Dims of every float parameter, in visit order.
#[derive(Default)]
struct ParamShapes(Vec<Vec<usize>>);

impl<B: Backend> ModuleVisitor<B> for ParamShapes {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.0.push(tensor.dims().to_vec());
    }
}

fn param_shapes<B: Backend>(model: &AttrVae<B>) -> Vec<Vec<usize>> {
    let mut shapes = ParamShapes::default();
    model.visit(&mut shapes);
    shapes.0
}

/// Write model weights to `path`.
pub fn save_model<B: Backend>(model: &AttrVae<B>, path: &Path) -> Result<(), VaeError> {
    model
        .clone()
        .save_file(path.to_path_buf(), &recorder())
        .map_err(|e| checkpoint_err(path, e))
}

/// Load model weights from `path` into a freshly initialized model.
///
/// Returns `Ok(None)` when the file does not exist. Every loaded parameter
/// must have the dims `config` would initialize, otherwise the record is
/// rejected with [`VaeError::Checkpoint`].
pub fn load_model<B: Backend>(
    path: &Path,
    config: &AttrVaeConfig,
    device: &B::Device,
) -> Result<Option<AttrVae<B>>, VaeError> {
    if !path.exists() {
        return Ok(None);
    }
    let template = config.init::<B>(device);
    let expected = param_shapes(&template);
    let model = template
        .load_file(path.to_path_buf(), &recorder(), device)
        .map_err(|e| checkpoint_err(path, e))?;

    let found = param_shapes(&model);
    if found != expected {
        let first = found.iter().zip(&expected).position(|(f, e)| f != e);
        let reason = match first {
            Some(i) => format!("parameter {i} has dims {:?}, model expects {:?}", found[i], expected[i]),
            None => format!("record has {} parameters, model expects {}", found.len(), expected.len()),
        };
        return Err(checkpoint_err(path, reason));
    }
    Ok(Some(model))
}

pub fn write_meta(path: &Path, meta: &CheckpointMeta) -> Result<(), VaeError> {
    let json = serde_json::to_string_pretty(meta).map_err(|source| VaeError::Json {
        location: path.display().to_string(),
        source,
    })?;
    std::fs::write(path, json).map_err(|source| VaeError::Io { path: path.to_path_buf(), source })
}

/// Read checkpoint metadata, `Ok(None)` if absent.
pub fn read_meta(path: &Path) -> Result<Option<CheckpointMeta>, VaeError> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path).map_err(|source| VaeError::Io { path: path.to_path_buf(), source })?;
    let meta = serde_json::from_str(&text).map_err(|source| VaeError::Json {
        location: path.display().to_string(),
        source,
    })?;
    Ok(Some(meta))
}

/// Persist model (canonical and timestamped), optimizer state, and metadata.
///
/// Returns the timestamped model path.
pub fn save_checkpoint<B, O>(
    paths: &CheckpointPaths,
    model: &AttrVae<B>,
    optimizer: &O,
    meta: &CheckpointMeta,
) -> Result<PathBuf, VaeError>
where
    B: AutodiffBackend,
    O: Optimizer<AttrVae<B>, B>,
{
    std::fs::create_dir_all(paths.dir())
        .map_err(|source| VaeError::Io { path: paths.dir().to_path_buf(), source })?;

    save_model(model, &paths.model())?;
    let history = paths.timestamped(meta.saved_at_ms);
    save_model(model, &history)?;

    let optim_path = paths.optimizer();
    recorder()
        .record(optimizer.to_record(), optim_path.clone())
        .map_err(|e| checkpoint_err(&optim_path, e))?;

    write_meta(&paths.meta(), meta)?;

    tracing::info!(
        path = %paths.model().display(),
        history = %history.display(),
        step = meta.step,
        "Checkpoint saved (model + optimizer + meta)"
    );
    Ok(history)
}

/// Model restored from disk plus whatever metadata accompanied it.
pub struct LoadedCheckpoint<B: Backend> {
    pub model: AttrVae<B>,
    pub meta: Option<CheckpointMeta>,
}

/// Best-effort reload of the canonical checkpoint.
///
/// Absent checkpoint → `Ok(None)`. A checkpoint whose recorded model shape
/// differs from `config`, or whose record fails to load, is an error.
pub fn load_checkpoint<B: Backend>(
    paths: &CheckpointPaths,
    config: &AttrVaeConfig,
    device: &B::Device,
) -> Result<Option<LoadedCheckpoint<B>>, VaeError> {
    let model_path = paths.model();
    if !model_path.exists() {
        tracing::info!(path = %model_path.display(), "No checkpoint found, starting fresh");
        return Ok(None);
    }

    let meta = read_meta(&paths.meta())?;
    if let Some(m) = &meta {
        if !same_shape(&m.model, config) {
            return Err(checkpoint_err(
                &model_path,
                format!("saved model shape {:?} does not match current {:?}", m.model, config),
            ));
        }
    }

    let model = load_model::<B>(&model_path, config, device)?
        .ok_or_else(|| checkpoint_err(&model_path, "disappeared while loading"))?;
    tracing::info!(path = %model_path.display(), step = meta.as_ref().map(|m| m.step), "Loaded checkpoint");
    Ok(Some(LoadedCheckpoint { model, meta }))
}

/// Restore optimizer moments if a record exists; otherwise return it unchanged.
pub fn load_optimizer<B, O>(paths: &CheckpointPaths, optimizer: O, device: &B::Device) -> Result<O, VaeError>
where
    B: AutodiffBackend,
    O: Optimizer<AttrVae<B>, B>,
{
    let path = paths.optimizer();
    if !path.exists() {
        return Ok(optimizer);
    }
    let record = recorder()
        .load::<O::Record>(path.clone(), device)
        .map_err(|e| checkpoint_err(&path, e))?;
    tracing::info!(path = %path.display(), "Restored optimizer state");
    Ok(optimizer.load_record(record))
}
