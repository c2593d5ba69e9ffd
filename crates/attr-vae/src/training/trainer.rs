//! Epoch orchestration for the attribute VAE.
//!
//! A [`TrainingContext`] owns the model, optimizer, global step counter and
//! dataset splits for the lifetime of a run, and is passed explicitly into
//! every epoch and step. [`run_training`] drives the epochs, prints per-term
//! averages per split, and writes the checkpoint once training finishes.

use std::path::PathBuf;
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use indicatif::{ProgressBar, ProgressStyle};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::VaeError;
use crate::model::vae::{AttrVae, AttrVaeConfig};
use crate::training::checkpoint::{
    load_checkpoint, load_optimizer, now_ms, save_checkpoint, CheckpointMeta, CheckpointPaths,
};
use crate::training::data::{batch_indices, make_batch, DatasetSplits, MusicBatch, MusicExample};
use crate::training::loss::BetaSchedule;
use crate::training::metrics::LossAccumulator;
use crate::training::regularization::RegularizationStrategy;
use crate::training::step::{self, StepLosses};

/// Optimizer, loss and schedule settings for a training run.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Adam learning rate (constant).
    #[config(default = 1e-3)]
    pub lr: f64,
    /// KL weight.
    #[config(default = 0.1)]
    pub beta: f64,
    #[config(default = "BetaSchedule::Constant")]
    pub beta_schedule: BetaSchedule,
    #[config(default = "RegularizationStrategy::RankTanh")]
    pub regularization: RegularizationStrategy,
    /// Add the density adversary loss.
    #[config(default = false)]
    pub adversarial: bool,
    /// Add the rhythm/note class-head loss.
    #[config(default = false)]
    pub class_loss: bool,
    /// Steps until the adversarial ramp reaches 1 (before capping).
    #[config(default = 5000)]
    pub adv_step_cap: usize,
    /// Ceiling of the adversarial weight during training.
    #[config(default = 0.15)]
    pub adv_weight_cap: f64,
    /// Maximum global gradient norm; larger gradients are rescaled.
    #[config(default = 1.0)]
    pub max_grad_norm: f64,
    #[config(default = 32)]
    pub batch_size: usize,
    #[config(default = 1)]
    pub n_epochs: usize,
    /// Seed for per-epoch batch shuffling.
    #[config(default = 42)]
    pub shuffle_seed: u64,
}

/// Adam optimizer for every run.
///
/// Clipping is applied to the global gradient norm in
/// [`step::train_step`], not per parameter by the optimizer.
pub fn build_optimizer<B: AutodiffBackend>() -> impl Optimizer<AttrVae<B>, B> {
    AdamConfig::new().init::<B, AttrVae<B>>()
}

pub(crate) fn progress_bar(len: usize, label: &str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_message(label.to_string());
    pb
}

/// Everything a training run mutates, in one place.
pub struct TrainingContext<B: AutodiffBackend, O: Optimizer<AttrVae<B>, B>> {
    pub model: AttrVae<B>,
    pub optimizer: O,
    pub device: B::Device,
    /// Global optimizer step count; drives the adversarial ramp and beta schedule.
    pub step: usize,
    /// Epochs completed, including those of earlier runs restored from disk.
    pub epochs_done: usize,
    pub model_config: AttrVaeConfig,
    pub config: TrainingConfig,
    pub splits: DatasetSplits,
    pub paths: CheckpointPaths,
    pub show_progress: bool,
    rng: StdRng,
}

impl<B, O> TrainingContext<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<AttrVae<B>, B>,
{
    /// Fresh context with a newly initialized model.
    pub fn new(
        model_config: AttrVaeConfig,
        config: TrainingConfig,
        splits: DatasetSplits,
        paths: CheckpointPaths,
        optimizer: O,
        device: B::Device,
    ) -> Self {
        let model = model_config.init::<B>(&device);
        let rng = StdRng::seed_from_u64(config.shuffle_seed);
        Self {
            model,
            optimizer,
            device,
            step: 0,
            epochs_done: 0,
            model_config,
            config,
            splits,
            paths,
            show_progress: false,
            rng,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Reload the canonical checkpoint, optimizer state and step counter if present.
    ///
    /// # Errors
    /// Fails if a checkpoint exists but does not fit the current model.
    pub fn restore(mut self) -> Result<Self, VaeError> {
        let Some(loaded) = load_checkpoint::<B>(&self.paths, &self.model_config, &self.device)? else {
            return Ok(self);
        };
        self.model = loaded.model;
        if let Some(meta) = loaded.meta {
            self.step = meta.step;
            self.epochs_done = meta.epochs;
        }
        let optimizer = load_optimizer(&self.paths, self.optimizer, &self.device)?;
        self.optimizer = optimizer;
        Ok(self)
    }

    /// One optimizer update on `batch`; advances the step counter.
    pub fn train_step(&mut self, batch: &MusicBatch<B>) -> Result<StepLosses, VaeError> {
        let (model, next, losses) =
            step::train_step(self.model.clone(), &mut self.optimizer, batch, &self.config, self.step)?;
        self.model = model;
        self.step = next;
        Ok(losses)
    }

    /// One shuffled pass over the training split.
    pub fn train_epoch(&mut self) -> Result<LossAccumulator, VaeError> {
        let chunks = batch_indices(self.splits.train.len(), self.config.batch_size, Some(&mut self.rng));
        let pb = progress_bar(chunks.len(), "train", self.show_progress);
        let mut acc = LossAccumulator::new();

        for chunk in &chunks {
            let batch = {
                let refs: Vec<&MusicExample> = chunk.iter().map(|&i| &self.splits.train[i]).collect();
                make_batch::<B>(&refs, &self.device)
            };
            let losses = self.train_step(&batch)?;
            acc.update(&losses);
            pb.inc(1);
        }
        pb.finish_and_clear();
        Ok(acc)
    }

    /// One shuffled forward-only pass over the validation split.
    pub fn validate_epoch(&mut self) -> LossAccumulator {
        let model = self.model.valid();
        let chunks = batch_indices(self.splits.val.len(), self.config.batch_size, Some(&mut self.rng));
        let pb = progress_bar(chunks.len(), "val", self.show_progress);
        let mut acc = LossAccumulator::new();

        for chunk in &chunks {
            let refs: Vec<&MusicExample> = chunk.iter().map(|&i| &self.splits.val[i]).collect();
            let batch = make_batch::<B::InnerBackend>(&refs, &self.device);
            acc.update(&step::eval_step(&model, &batch, &self.config, self.step));
            pb.inc(1);
        }
        pb.finish_and_clear();
        acc
    }

    /// Write the canonical and timestamped checkpoints. Returns the timestamped path.
    pub fn save(&self) -> Result<PathBuf, VaeError> {
        let meta = CheckpointMeta {
            name: self.paths.name().to_string(),
            step: self.step,
            epochs: self.epochs_done,
            saved_at_ms: now_ms(),
            model: self.model_config.clone(),
        };
        save_checkpoint(&self.paths, &self.model, &self.optimizer, &meta)
    }
}

/// Per-batch averages for one epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train: StepLosses,
    /// `None` when the validation split is empty.
    pub val: Option<StepLosses>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs: Vec<EpochSummary>,
    pub final_step: usize,
    pub checkpoint: PathBuf,
    pub history_checkpoint: PathBuf,
    pub elapsed_secs: f64,
}

pub(crate) const TERM_HEADER: &str = "Events, Attributes, KL, Reg R, Reg N, Adv R, Adv N, Class";

pub(crate) fn format_terms(l: &StepLosses) -> String {
    format!(
        "{:.5}  {:.5}  {:.5}  {:.5}  {:.5}  {:.5}  {:.5}  {:.5}",
        l.primary_ce, l.auxiliary_ce, l.kl, l.reg_rhythm, l.reg_note, l.adv_rhythm, l.adv_note, l.class_ce
    )
}

/// Run `config.n_epochs` epochs, then checkpoint.
///
/// Each epoch trains on the shuffled training split, then evaluates the
/// validation split, and prints per-batch averages of every loss term.
pub fn run_training<B, O>(ctx: &mut TrainingContext<B, O>) -> anyhow::Result<TrainingSummary>
where
    B: AutodiffBackend,
    O: Optimizer<AttrVae<B>, B>,
{
    if ctx.splits.train.is_empty() {
        return Err(VaeError::EmptySplit("train").into());
    }
    if ctx.splits.val.is_empty() {
        tracing::warn!("Validation split is empty; only training losses will be reported");
    }

    tracing::info!(
        train = ctx.splits.train.len(),
        val = ctx.splits.val.len(),
        test = ctx.splits.test.len(),
        start_step = ctx.step,
        regularization = %ctx.config.regularization,
        adversarial = ctx.config.adversarial,
        class_loss = ctx.config.class_loss,
        "Starting training"
    );

    let start = Instant::now();
    let n_epochs = ctx.config.n_epochs;
    let mut epochs = Vec::with_capacity(n_epochs);

    for epoch in 1..=n_epochs {
        println!("Epoch {epoch} / {n_epochs}");

        let train = ctx.train_epoch()?;
        let val = if ctx.splits.val.is_empty() { LossAccumulator::new() } else { ctx.validate_epoch() };
        let train_mean = train.mean().unwrap_or_default();
        let val_mean = val.mean();

        match &val_mean {
            Some(v) => println!("batch loss: {:.5}  {:.5}", train_mean.total, v.total),
            None => println!("batch loss: {:.5}", train_mean.total),
        }
        println!("{TERM_HEADER}");
        println!("train loss by term: {}", format_terms(&train_mean));
        if let Some(v) = &val_mean {
            println!("val loss by term: {}", format_terms(v));
        }

        ctx.epochs_done += 1;
        tracing::info!(
            epoch,
            step = ctx.step,
            train = %train.display(),
            val = %val.display(),
            "Epoch complete"
        );
        epochs.push(EpochSummary { epoch, train: train_mean, val: val_mean });
    }

    let history_checkpoint = ctx.save()?;
    let checkpoint = ctx.paths.model();
    println!("Model saved as {}!", checkpoint.display());

    let elapsed_secs = start.elapsed().as_secs_f64();
    tracing::info!(
        final_step = ctx.step,
        elapsed_secs = format!("{elapsed_secs:.1}"),
        "Training complete"
    );

    Ok(TrainingSummary {
        epochs,
        final_step: ctx.step,
        checkpoint,
        history_checkpoint,
        elapsed_secs,
    })
}
