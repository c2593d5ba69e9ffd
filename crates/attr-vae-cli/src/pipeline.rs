//! Training and evaluation pipelines behind the CLI subcommands.

use std::path::PathBuf;
use std::time::Instant;

use burn::prelude::Backend;
use burn::tensor::backend::AutodiffBackend;

use attr_vae::training::data::save_examples;
use attr_vae::{
    build_optimizer, load_examples, run_evaluation, run_training, split_dataset, synthetic_examples,
    DatasetSplits, EvaluationReport, Evaluator, TrainingContext, TrainingSummary,
};

use crate::config::{load_run_config, CliOverrides, RunConfig};
use crate::results::{best_epoch, RunRecord};

#[cfg(not(feature = "wgpu"))]
pub type TrainBackend = burn::backend::Autodiff<burn::backend::NdArray<f32>>;
#[cfg(feature = "wgpu")]
pub type TrainBackend = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Forward-only backend sharing the training backend's device type.
pub type EvalBackend = <TrainBackend as AutodiffBackend>::InnerBackend;

/// Arguments shared by `train`, `evaluate` and `run`.
#[derive(Debug, Clone)]
pub struct RunArgs {
    /// Path to the JSON or TOML run config.
    pub config: PathBuf,
    pub overrides: CliOverrides,
    /// Optional path for a JSON record of the run.
    pub output: Option<PathBuf>,
    /// Hide progress bars.
    pub quiet: bool,
}

/// Arguments for the `generate-synthetic` subcommand.
#[derive(Debug, Clone)]
pub struct GenerateArgs {
    pub output: PathBuf,
    pub count: usize,
    pub time_step: usize,
    pub seed: u64,
}

/// Load the config and the dataset, and split it.
fn prepare(args: &RunArgs) -> anyhow::Result<(RunConfig, DatasetSplits)> {
    let config = load_run_config(&args.config, &args.overrides)?;
    let data = config.data_path()?;
    let examples = load_examples(data, config.time_step)?;
    tracing::info!(path = %data.display(), count = examples.len(), "Loaded dataset");
    let splits = split_dataset(examples, config.split_seed);
    Ok((config, splits))
}

fn train_phase(config: &RunConfig, splits: &DatasetSplits, quiet: bool) -> anyhow::Result<TrainingSummary> {
    let device: <TrainBackend as Backend>::Device = Default::default();
    let training_config = config.to_training_config();
    let optimizer = build_optimizer::<TrainBackend>();

    let mut ctx = TrainingContext::new(
        config.to_model_config(),
        training_config,
        splits.clone(),
        config.checkpoint_paths(),
        optimizer,
        device,
    )
    .with_progress(!quiet)
    .restore()?;

    if ctx.step > 0 {
        tracing::info!(step = ctx.step, epochs = ctx.epochs_done, "Resuming from checkpoint");
    }
    run_training(&mut ctx)
}

fn evaluate_phase(config: &RunConfig, splits: &DatasetSplits, quiet: bool) -> anyhow::Result<EvaluationReport> {
    let evaluator = Evaluator::<EvalBackend>::load(
        &config.checkpoint_paths(),
        &config.to_model_config(),
        config.to_training_config(),
        Default::default(),
    )?
    .with_batch_size(config.eval_batch_size)
    .with_progress(!quiet);
    run_evaluation(&evaluator, splits)
}

fn print_training_summary(summary: &TrainingSummary) {
    println!("\n--- Training Summary ---");
    println!("Epochs: {}", summary.epochs.len());
    println!("Final step: {}", summary.final_step);
    if let Some(best) = best_epoch(summary) {
        if let Some(val) = &best.val {
            println!("Best val loss: {:.5} (epoch {})", val.total, best.epoch);
        }
    }
    println!("Checkpoint: {}", summary.checkpoint.display());
    println!("Elapsed: {:.1}s", summary.elapsed_secs);
}

fn write_record(
    output: Option<&PathBuf>,
    config: RunConfig,
    training: Option<TrainingSummary>,
    evaluation: Option<EvaluationReport>,
) -> anyhow::Result<()> {
    if let Some(path) = output {
        let mut record = RunRecord::new(config);
        record.training = training;
        record.evaluation = evaluation;
        record.save(path)?;
    }
    Ok(())
}

/// Train for the configured epochs, resuming from the canonical checkpoint if present.
pub fn run_train(args: RunArgs) -> anyhow::Result<TrainingSummary> {
    let (config, splits) = prepare(&args)?;
    let summary = train_phase(&config, &splits, args.quiet)?;
    print_training_summary(&summary);
    write_record(args.output.as_ref(), config, Some(summary.clone()), None)?;
    Ok(summary)
}

/// Evaluate the saved checkpoint on the training and test splits.
pub fn run_evaluate(args: RunArgs) -> anyhow::Result<EvaluationReport> {
    let (config, splits) = prepare(&args)?;
    let report = evaluate_phase(&config, &splits, args.quiet)?;
    write_record(args.output.as_ref(), config, None, Some(report.clone()))?;
    Ok(report)
}

/// Train, then evaluate the freshly saved checkpoint.
pub fn run_all(args: RunArgs) -> anyhow::Result<(TrainingSummary, EvaluationReport)> {
    let start = Instant::now();
    let (config, splits) = prepare(&args)?;

    let summary = train_phase(&config, &splits, args.quiet)?;
    print_training_summary(&summary);
    let report = evaluate_phase(&config, &splits, args.quiet)?;

    write_record(args.output.as_ref(), config, Some(summary.clone()), Some(report.clone()))?;
    tracing::info!(elapsed_secs = format!("{:.1}", start.elapsed().as_secs_f64()), "Run complete");
    Ok((summary, report))
}

/// Write a synthetic JSONL dataset.
pub fn run_generate_synthetic(args: GenerateArgs) -> anyhow::Result<()> {
    let examples = synthetic_examples(args.count, args.time_step, args.seed);
    if let Some(parent) = args.output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    save_examples(&args.output, &examples)?;
    println!("Wrote {} examples to {}", examples.len(), args.output.display());
    Ok(())
}
