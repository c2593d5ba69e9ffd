//! Music example dataset: JSONL loading, validation, deterministic 80/10/10
//! split, and batching into tensors.
//!
//! Upstream tooling is responsible for windowing raw MIDI into index
//! sequences; this module only checks that what arrives respects the
//! vocabulary sizes and pads/truncates to the configured sequence length.

use std::io::{BufRead, Write};
use std::path::Path;

use burn::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::VaeError;
use crate::model::bridge::{classes_to_tensor, labels_to_tensor, rows_to_tensor};
use crate::model::vae::{ATTR_CLASSES, CHROMA_DIMS, EVENT_DIMS, NOTE_DIMS, RHYTHM_DIMS};
use crate::training::features::{DensityFeatures, ONSET};

/// One windowed musical excerpt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MusicExample {
    /// Event indices in `0..342`, zero-padded at the end.
    pub events: Vec<i64>,
    /// Rhythm labels in `0..3` (1 = onset).
    pub rhythm: Vec<i64>,
    /// Note-density labels in `0..16`.
    pub note: Vec<i64>,
    /// 24-dim chroma feature.
    pub chroma: Vec<f32>,
    /// Rhythm class in `0..3`.
    #[serde(default)]
    pub rhythm_class: i64,
    /// Note class in `0..3`.
    #[serde(default)]
    pub note_class: i64,
}

fn fit_length(seq: &mut Vec<i64>, len: usize) {
    seq.resize(len, 0);
}

fn check_range(index: usize, field: &str, values: &[i64], vocab: usize) -> Result<(), VaeError> {
    if let Some(bad) = values.iter().find(|&&v| v < 0 || v as usize >= vocab) {
        return Err(VaeError::InvalidExample {
            index,
            reason: format!("{field} label {bad} outside 0..{vocab}"),
        });
    }
    Ok(())
}

impl MusicExample {
    /// Pad/truncate all sequences to `time_step` and validate label ranges.
    pub fn normalized(mut self, index: usize, time_step: usize) -> Result<Self, VaeError> {
        fit_length(&mut self.events, time_step);
        fit_length(&mut self.rhythm, time_step);
        fit_length(&mut self.note, time_step);

        check_range(index, "event", &self.events, EVENT_DIMS)?;
        check_range(index, "rhythm", &self.rhythm, RHYTHM_DIMS)?;
        check_range(index, "note", &self.note, NOTE_DIMS)?;
        check_range(index, "rhythm_class", &[self.rhythm_class], ATTR_CLASSES)?;
        check_range(index, "note_class", &[self.note_class], ATTR_CLASSES)?;

        if self.chroma.len() != CHROMA_DIMS {
            return Err(VaeError::InvalidExample {
                index,
                reason: format!("chroma has {} values, expected {CHROMA_DIMS}", self.chroma.len()),
            });
        }
        Ok(self)
    }
}

/// Load examples from a JSONL file (one [`MusicExample`] per line).
///
/// Blank lines are skipped. Every example is normalized to `time_step`.
pub fn load_examples(path: &Path, time_step: usize) -> Result<Vec<MusicExample>, VaeError> {
    let io_err = |source: std::io::Error| VaeError::Io { path: path.to_path_buf(), source };
    let file = std::fs::File::open(path).map_err(io_err)?;
    let reader = std::io::BufReader::new(file);

    let mut examples = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let example: MusicExample = serde_json::from_str(&line).map_err(|source| VaeError::Json {
            location: format!("{}:{}", path.display(), line_no + 1),
            source,
        })?;
        examples.push(example.normalized(examples.len(), time_step)?);
    }

    tracing::info!(path = %path.display(), examples = examples.len(), "Loaded music examples");
    Ok(examples)
}

/// Write examples as JSONL.
pub fn save_examples(path: &Path, examples: &[MusicExample]) -> Result<(), VaeError> {
    let io_err = |source: std::io::Error| VaeError::Io { path: path.to_path_buf(), source };
    let file = std::fs::File::create(path).map_err(io_err)?;
    let mut writer = std::io::BufWriter::new(file);
    for example in examples {
        let line = serde_json::to_string(example).map_err(|source| VaeError::Json {
            location: path.display().to_string(),
            source,
        })?;
        writeln!(writer, "{line}").map_err(io_err)?;
    }
    writer.flush().map_err(io_err)
}

/// Train / validation / test partitions.
#[derive(Clone, Debug, Default)]
pub struct DatasetSplits {
    pub train: Vec<MusicExample>,
    pub val: Vec<MusicExample>,
    pub test: Vec<MusicExample>,
}

/// Shuffle deterministically with `seed`, then cut at 80% and 90%.
pub fn split_dataset(mut examples: Vec<MusicExample>, seed: u64) -> DatasetSplits {
    let mut rng = StdRng::seed_from_u64(seed);
    examples.shuffle(&mut rng);

    let n = examples.len();
    let tlen = (0.8 * n as f64) as usize;
    let vlen = (0.9 * n as f64) as usize;

    let test = examples.split_off(vlen);
    let val = examples.split_off(tlen);
    DatasetSplits { train: examples, val, test }
}

/// A batch of examples as tensors, plus the host-computed density features.
#[derive(Debug, Clone)]
pub struct MusicBatch<B: Backend> {
    /// `(B, T)`
    pub events: Tensor<B, 2, Int>,
    /// `(B, T)`
    pub rhythm: Tensor<B, 2, Int>,
    /// `(B, T)`
    pub note: Tensor<B, 2, Int>,
    /// `(B, 24)`
    pub chroma: Tensor<B, 2>,
    /// `(B,)`
    pub rhythm_class: Tensor<B, 1, Int>,
    /// `(B,)`
    pub note_class: Tensor<B, 1, Int>,
    pub densities: DensityFeatures,
}

impl<B: Backend> MusicBatch<B> {
    pub fn len(&self) -> usize {
        self.densities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.densities.is_empty()
    }
}

/// Stack examples into a [`MusicBatch`].
///
/// # Panics
/// Panics if `examples` is empty or sequence lengths differ.
pub fn make_batch<B: Backend>(examples: &[&MusicExample], device: &B::Device) -> MusicBatch<B> {
    let events: Vec<Vec<i64>> = examples.iter().map(|e| e.events.clone()).collect();
    let rhythm: Vec<Vec<i64>> = examples.iter().map(|e| e.rhythm.clone()).collect();
    let note: Vec<Vec<i64>> = examples.iter().map(|e| e.note.clone()).collect();
    let chroma: Vec<Vec<f32>> = examples.iter().map(|e| e.chroma.clone()).collect();
    let rhythm_class: Vec<i64> = examples.iter().map(|e| e.rhythm_class).collect();
    let note_class: Vec<i64> = examples.iter().map(|e| e.note_class).collect();

    let densities = DensityFeatures::from_labels(&rhythm, &note);

    MusicBatch {
        events: labels_to_tensor(&events, device),
        rhythm: labels_to_tensor(&rhythm, device),
        note: labels_to_tensor(&note, device),
        chroma: rows_to_tensor(&chroma, device),
        rhythm_class: classes_to_tensor(&rhythm_class, device),
        note_class: classes_to_tensor(&note_class, device),
        densities,
    }
}

/// Index chunks for one pass over a split. The last batch may be short.
pub fn batch_indices(len: usize, batch_size: usize, rng: Option<&mut StdRng>) -> Vec<Vec<usize>> {
    assert!(batch_size > 0, "batch_size must be > 0");
    let mut order: Vec<usize> = (0..len).collect();
    if let Some(rng) = rng {
        order.shuffle(rng);
    }
    order.chunks(batch_size).map(|c| c.to_vec()).collect()
}

/// Number of batches a split yields at `batch_size`.
pub fn num_batches(len: usize, batch_size: usize) -> usize {
    len.div_ceil(batch_size)
}

/// Bucket a density into one of three classes given two thresholds.
fn bucket(value: f32, low: f32, high: f32) -> i64 {
    if value < low {
        0
    } else if value < high {
        1
    } else {
        2
    }
}

/// Random but well-formed examples for demos and tests.
///
/// Each example has its own onset rate and note activity level, so density
/// features vary across a batch. Event sequences carry a random amount of
/// trailing zero padding.
pub fn synthetic_examples(n: usize, time_step: usize, seed: u64) -> Vec<MusicExample> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let onset_p: f64 = rng.gen_range(0.05..0.9);
            let activity: i64 = rng.gen_range(0..NOTE_DIMS as i64 - 2);
            let valid = rng.gen_range(time_step.div_ceil(2)..=time_step);

            let events = (0..time_step)
                .map(|t| if t < valid { rng.gen_range(1..EVENT_DIMS as i64) } else { 0 })
                .collect();
            let rhythm: Vec<i64> = (0..time_step)
                .map(|_| if rng.gen_bool(onset_p) { ONSET } else { rng.gen_range(0..2) * 2 })
                .collect();
            let note: Vec<i64> = (0..time_step)
                .map(|_| (activity + rng.gen_range(0..3)).min(NOTE_DIMS as i64 - 1))
                .collect();
            let chroma = (0..CHROMA_DIMS).map(|_| rng.gen_range(0.0..1.0)).collect();

            let features = DensityFeatures::from_labels(std::slice::from_ref(&rhythm), std::slice::from_ref(&note));
            MusicExample {
                events,
                rhythm_class: bucket(features.rhythm[0], 0.3, 0.6),
                note_class: bucket(features.note_raw[0], 4.0, 9.0),
                rhythm,
                note,
                chroma,
            }
        })
        .collect()
}
