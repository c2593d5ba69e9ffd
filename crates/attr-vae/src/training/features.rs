//! Attribute density features derived purely from ground-truth label sequences.
//!
//! These are the "observed attributes" the latent regularizer aligns against.
//! Computed on the host at batch-construction time; never touch the model.

use burn::prelude::*;

use crate::model::bridge::scalars_to_tensor;

/// Rhythm label marking a note onset.
pub const ONSET: i64 = 1;

/// Fraction of positions that are onsets. Empty sequences have density 0.
pub fn rhythm_density(seq: &[i64]) -> f32 {
    if seq.is_empty() {
        return 0.0;
    }
    let onsets = seq.iter().filter(|&&v| v == ONSET).count();
    onsets as f32 / seq.len() as f32
}

/// Arithmetic mean of note-density labels. Empty sequences have mean 0.
pub fn mean_activation(seq: &[i64]) -> f32 {
    if seq.is_empty() {
        return 0.0;
    }
    seq.iter().sum::<i64>() as f32 / seq.len() as f32
}

/// Round to the closest of `floor(v)`, `floor(v) + 0.5`, `floor(v) + 1`.
///
/// Ties go to the earlier candidate in that order.
pub fn round_to_half(value: f32) -> f32 {
    let base = value.floor();
    let candidates = [base, base + 0.5, base + 1.0];
    let mut best = candidates[0];
    let mut best_dist = (value - best).abs();
    for &c in &candidates[1..] {
        let dist = (value - c).abs();
        if dist < best_dist {
            best = c;
            best_dist = dist;
        }
    }
    best
}

/// Mean note activation rounded to the nearest half.
pub fn note_density(seq: &[i64]) -> f32 {
    round_to_half(mean_activation(seq))
}

/// Per-example density features for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityFeatures {
    /// Onset rate per example.
    pub rhythm: Vec<f32>,
    /// Half-rounded mean note activation per example.
    pub note: Vec<f32>,
    /// Unrounded mean note activation per example.
    pub note_raw: Vec<f32>,
}

impl DensityFeatures {
    pub fn from_labels(rhythm: &[Vec<i64>], note: &[Vec<i64>]) -> Self {
        Self {
            rhythm: rhythm.iter().map(|s| rhythm_density(s)).collect(),
            note: note.iter().map(|s| note_density(s)).collect(),
            note_raw: note.iter().map(|s| mean_activation(s)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rhythm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rhythm.is_empty()
    }

    pub fn to_tensors<B: Backend>(&self, device: &B::Device) -> DensityTensors<B> {
        DensityTensors {
            rhythm: scalars_to_tensor(&self.rhythm, device),
            note: scalars_to_tensor(&self.note, device),
            note_raw: scalars_to_tensor(&self.note_raw, device),
        }
    }
}

/// Device-side copy of [`DensityFeatures`], each `(batch,)`.
#[derive(Debug, Clone)]
pub struct DensityTensors<B: Backend> {
    pub rhythm: Tensor<B, 1>,
    pub note: Tensor<B, 1>,
    pub note_raw: Tensor<B, 1>,
}
