//! Offline evaluation of a trained model over whole dataset splits.
//!
//! Runs the same loss computation as training (adversarial term at full
//! weight, no parameter updates) with latents taken at the posterior mean,
//! and adds per-example reconstruction accuracy. The primary event stream is
//! scored up to its last non-padding token; rhythm and note streams are
//! scored over their full length. Accuracies are summed per example and
//! divided by the split's example count; losses are averaged per batch.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::VaeError;
use crate::model::vae::{AttrVae, AttrVaeConfig, Sampling};
use crate::training::checkpoint::{load_checkpoint, CheckpointPaths};
use crate::training::data::{batch_indices, make_batch, DatasetSplits, MusicExample};
use crate::training::metrics::{class_accuracy, sequence_accuracy, AccuracyTotals, LossAccumulator};
use crate::training::step::{compute_losses, StepLosses};
use crate::training::trainer::{progress_bar, TrainingConfig};

/// Batch size of the offline evaluator.
pub const EVAL_BATCH_SIZE: usize = 128;

/// Aggregated metrics for one split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitReport {
    pub split: String,
    pub examples: usize,
    pub batches: usize,
    /// Per-batch loss averages.
    pub losses: StepLosses,
    /// Per-example accuracy averages.
    pub accuracy: AccuracyTotals,
}

impl SplitReport {
    pub fn print(&self, with_classes: bool) {
        let l = &self.losses;
        let a = &self.accuracy;
        println!("{}: {} examples", self.split, self.examples);
        println!("CE: {:.4}  {:.4}", l.primary_ce, l.auxiliary_ce);
        println!("KL: {:.4}", l.kl);
        println!("Regularized: {:.4}  {:.4}", l.reg_rhythm, l.reg_note);
        println!("Adversarial: {:.4}  {:.4}", l.adv_rhythm, l.adv_note);
        println!("Acc: {:.4}  {:.4}  {:.4}", a.events, a.rhythm, a.note);
        if with_classes {
            println!("Class acc: {:.4}  {:.4}", a.rhythm_class, a.note_class);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub step: usize,
    pub train: SplitReport,
    pub test: SplitReport,
}

/// Forward-only evaluator over a fixed model.
pub struct Evaluator<B: Backend> {
    model: AttrVae<B>,
    config: TrainingConfig,
    step: usize,
    device: B::Device,
    batch_size: usize,
    show_progress: bool,
}

impl<B: Backend> Evaluator<B> {
    /// `step` feeds the KL schedule so reported losses match the end of training.
    pub fn new(model: AttrVae<B>, config: TrainingConfig, step: usize, device: B::Device) -> Self {
        Self {
            model,
            config,
            step,
            device,
            batch_size: EVAL_BATCH_SIZE,
            show_progress: false,
        }
    }

    /// Reload the canonical checkpoint, or fall back to a fresh model if none exists.
    pub fn load(
        paths: &CheckpointPaths,
        model_config: &AttrVaeConfig,
        config: TrainingConfig,
        device: B::Device,
    ) -> Result<Self, VaeError> {
        let (model, step) = match load_checkpoint::<B>(paths, model_config, &device)? {
            Some(loaded) => {
                let step = loaded.meta.map(|m| m.step).unwrap_or(0);
                (loaded.model, step)
            }
            None => {
                tracing::warn!(
                    path = %paths.model().display(),
                    "No checkpoint to evaluate, using freshly initialized parameters"
                );
                (model_config.init::<B>(&device), 0)
            }
        };
        Ok(Self::new(model, config, step, device))
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn model(&self) -> &AttrVae<B> {
        &self.model
    }

    /// Evaluate one split in order.
    ///
    /// # Errors
    /// [`VaeError::EmptySplit`] if `examples` is empty.
    pub fn evaluate_split(&self, split: &'static str, examples: &[MusicExample]) -> Result<SplitReport, VaeError> {
        if examples.is_empty() {
            return Err(VaeError::EmptySplit(split));
        }

        let chunks = batch_indices(examples.len(), self.batch_size, None);
        let pb = progress_bar(chunks.len(), split, self.show_progress);
        let mut losses = LossAccumulator::new();
        let mut accuracy = AccuracyTotals::default();

        for chunk in &chunks {
            let refs: Vec<&MusicExample> = chunk.iter().map(|&i| &examples[i]).collect();
            let batch = make_batch::<B>(&refs, &self.device);
            let out = compute_losses(&self.model, &batch, &self.config, self.step, 1.0, Sampling::Mean);
            losses.update(&out.scalars());

            let output = &out.output;
            accuracy.add_sequences(
                sequence_accuracy(output.events.clone(), batch.events.clone(), true),
                sequence_accuracy(output.attributes[0].clone(), batch.rhythm.clone(), false),
                sequence_accuracy(output.attributes[1].clone(), batch.note.clone(), false),
            );
            if self.config.class_loss {
                let (logits_r, logits_n) = self.model.classify(&output.latents);
                accuracy.add_classes(
                    class_accuracy(logits_r, batch.rhythm_class.clone()),
                    class_accuracy(logits_n, batch.note_class.clone()),
                );
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        let report = SplitReport {
            split: split.to_string(),
            examples: accuracy.examples,
            batches: losses.count(),
            losses: losses.mean().unwrap_or_default(),
            accuracy: accuracy.averages(),
        };
        tracing::info!(
            split,
            examples = report.examples,
            loss = format!("{:.4}", report.losses.total),
            acc_events = format!("{:.4}", report.accuracy.events),
            "Split evaluated"
        );
        Ok(report)
    }
}

/// Evaluate the training and test splits and print both reports.
pub fn run_evaluation<B: Backend>(evaluator: &Evaluator<B>, splits: &DatasetSplits) -> anyhow::Result<EvaluationReport> {
    let with_classes = evaluator.config.class_loss;

    let train = evaluator.evaluate_split("train", &splits.train)?;
    train.print(with_classes);
    let test = evaluator.evaluate_split("test", &splits.test)?;
    test.print(with_classes);

    tracing::info!(step = evaluator.step, "Evaluation complete");
    Ok(EvaluationReport { step: evaluator.step, train, test })
}
