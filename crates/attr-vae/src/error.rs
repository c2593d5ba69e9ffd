//! Error types for dataset loading, configuration and checkpoint handling.

use std::path::PathBuf;

/// Errors raised by the attribute-VAE library.
///
/// Orchestration code (trainer, evaluator) returns `anyhow::Result` and lifts
/// these with `?`; leaf code that can fail for a nameable reason returns them
/// directly.
#[derive(Debug, thiserror::Error)]
pub enum VaeError {
    /// Filesystem failure while reading data or writing checkpoints.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A dataset line or metadata file failed to parse.
    #[error("JSON error at {location}: {source}")]
    Json {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    /// An example violated the data model (label out of vocabulary, bad chroma width).
    #[error("Invalid example {index}: {reason}")]
    InvalidExample { index: usize, reason: String },

    /// A split has no examples, so per-batch averages are undefined.
    #[error("Split '{0}' is empty")]
    EmptySplit(&'static str),

    /// Checkpoint exists but could not be loaded into the current model.
    #[error("Checkpoint error for {path}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },

    /// The total loss became NaN or infinite.
    #[error("Non-finite loss at step {step}: {value}")]
    NonFiniteLoss { step: usize, value: f64 },

    /// Configuration value outside its valid range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
