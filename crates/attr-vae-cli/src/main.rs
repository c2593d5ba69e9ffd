mod config;
mod pipeline;
pub mod results;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use config::CliOverrides;
use pipeline::{GenerateArgs, RunArgs};

/// attr-vae: attribute-regularized VAE training for symbolic music.
#[derive(Parser)]
#[command(name = "attr-vae", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Options shared by the commands that read a run config.
#[derive(Args, Debug)]
struct CommonArgs {
    /// Path to the run config (JSON, or TOML by extension).
    #[arg(long, default_value = "configs/attr_vae.json")]
    config: PathBuf,
    /// JSONL dataset; overrides `data` in the config.
    #[arg(long)]
    data: Option<PathBuf>,
    /// Override the number of epochs.
    #[arg(long)]
    epochs: Option<usize>,
    /// Override the training batch size.
    #[arg(long)]
    batch_size: Option<usize>,
    /// Override the learning rate.
    #[arg(long)]
    lr: Option<f64>,
    /// Directory for checkpoints; overrides `params_dir` in the config.
    #[arg(long)]
    params_dir: Option<PathBuf>,
    /// Write a JSON record of the run to this path.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Hide progress bars.
    #[arg(long)]
    quiet: bool,
}

impl From<CommonArgs> for RunArgs {
    fn from(args: CommonArgs) -> Self {
        RunArgs {
            config: args.config,
            overrides: CliOverrides {
                epochs: args.epochs,
                batch_size: args.batch_size,
                lr: args.lr,
                data: args.data,
                params_dir: args.params_dir,
            },
            output: args.output,
            quiet: args.quiet,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Train the model, resuming from the saved checkpoint if one exists.
    Train(CommonArgs),
    /// Evaluate the saved checkpoint on the train and test splits.
    Evaluate(CommonArgs),
    /// Train, then evaluate.
    Run(CommonArgs),
    /// Write a synthetic JSONL dataset for smoke tests.
    GenerateSynthetic {
        /// Output JSONL path.
        #[arg(long)]
        output: PathBuf,
        /// Number of examples.
        #[arg(long, default_value_t = 200)]
        count: usize,
        /// Sequence length of each example.
        #[arg(long, default_value_t = 32)]
        time_step: usize,
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Train(args) => pipeline::run_train(args.into()).map(|_| ()),
        Command::Evaluate(args) => pipeline::run_evaluate(args.into()).map(|_| ()),
        Command::Run(args) => pipeline::run_all(args.into()).map(|_| ()),
        Command::GenerateSynthetic {
            output,
            count,
            time_step,
            seed,
        } => pipeline::run_generate_synthetic(GenerateArgs {
            output,
            count,
            time_step,
            seed,
        }),
    }
}
